//! Testing utilities for auxflow pipelines.
//!
//! Stages are owned by the pipeline once assembled, so the doubles here are
//! observed from the outside through a shared [`Recorder`] handle: every
//! delivery, processing call, generation, and transform is appended to one
//! ordered event log that tests inspect after the fact.

mod mocks;

pub use mocks::{
    ProbeConsumer, Recorder, ScriptedGenerator, ScriptedSource, ScriptedTransformer, StageEvent,
};
