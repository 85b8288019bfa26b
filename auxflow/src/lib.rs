//! # Auxflow
//!
//! A pipeline-composition engine with a policy-driven auxiliary data channel.
//!
//! An auxflow pipeline is a fixed, ordered chain of stages. A primary value
//! flows through the chain stage by stage, while a secondary channel of typed
//! auxiliary values is produced, consumed, and mutated in transit. Each
//! auxiliary datum carries an update policy declared by its producer:
//!
//! - **Never**: computed once, then immutable for the pipeline instance.
//! - **Always**: recomputed on every invocation.
//! - **Sometimes**: recomputed only when its producer (or a transformer of
//!   the same key) signals a change.
//!
//! Assembly runs a static resolver once per pipeline shape, hoisting every
//! provably constant value into a baseline store; each invocation then walks
//! the chain once, computing or reusing auxiliary data per policy.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use auxflow::prelude::*;
//!
//! let mut pipeline = PipelineBuilder::new("my-pipeline")
//!     .stage(IterSource::new("frames", frames.into_iter()))
//!     .stage(DecodeStage::new())
//!     .stage(RenderStage::new())
//!     .assemble()?;
//!
//! while let Some(frame) = pipeline.pump::<RenderedFrame>()? {
//!     sink.push(frame);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod errors;
pub mod keys;
pub mod pipeline;
pub mod policy;
pub mod stage;
pub mod store;
pub mod testing;
pub mod value;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::{
        AssemblyError, AssemblyErrorInfo, AuxflowError, InvocationError, TypeMismatchError,
    };
    pub use crate::keys::{AuxKey, KeySet};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, StageSpec};
    pub use crate::policy::UpdatePolicy;
    pub use crate::stage::{
        CapabilitySet, Consumer, FnProcessor, Generator, IterSource, Processor, ProvideDecl,
        Source, Stage, TransformDecl, Transformer,
    };
    pub use crate::store::{AuxDatum, AuxStore};
    pub use crate::value::{AuxKind, AuxValue, Payload, ValueType};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn prelude_covers_the_public_surface() {
        let mut pipeline = PipelineBuilder::new("smoke")
            .stage(FnProcessor::new("id", |n: i64| Ok(n)))
            .assemble()
            .unwrap();

        assert_eq!(pipeline.invoke::<i64, i64>(7).unwrap(), 7);
    }
}
