//! The assembled pipeline: stage chain, baseline store, and invocation entry
//! points.

use super::resolver::ResolvedPlan;
use super::runner;
use super::spec::StageSpec;
use crate::errors::InvocationError;
use crate::keys::KeySet;
use crate::policy::UpdatePolicy;
use crate::stage::Stage;
use crate::store::{AuxStore, FreezeSlots};
use crate::value::{Payload, ValueType};
use std::any::Any;
use tracing::{debug_span, warn};
use uuid::Uuid;

/// An assembled pipeline instance.
///
/// The shape (stage order, key space) is fixed at assembly; the stages are
/// owned exclusively by the pipeline for its whole lifetime. One invocation
/// runs to completion before the next may begin, which both entry points
/// enforce by taking `&mut self`.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    instance_id: Uuid,
    stages: Vec<Box<dyn Stage>>,
    specs: Vec<StageSpec>,
    baseline: AuxStore,
    plan: ResolvedPlan,
    freeze_slots: FreezeSlots,
    carry: AuxStore,
}

impl Pipeline {
    pub(crate) fn new(
        name: String,
        stages: Vec<Box<dyn Stage>>,
        specs: Vec<StageSpec>,
        baseline: AuxStore,
        plan: ResolvedPlan,
    ) -> Self {
        let mut freeze_slots = FreezeSlots::default();
        for key in &plan.deferred {
            freeze_slots.reserve(key);
        }

        Self {
            name,
            instance_id: Uuid::new_v4(),
            stages,
            specs,
            baseline,
            plan,
            freeze_slots,
            carry: AuxStore::new(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages in the chain.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the unique id of this pipeline instance.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Returns the baseline store built by the static resolver.
    #[must_use]
    pub fn baseline(&self) -> &AuxStore {
        &self.baseline
    }

    /// Returns every auxiliary key produced somewhere in the chain.
    #[must_use]
    pub fn key_space(&self) -> KeySet {
        self.specs
            .iter()
            .flat_map(|spec| spec.provides.iter().map(|decl| decl.key))
            .collect()
    }

    /// Returns a JSON rendering of the resolved execution plan, for
    /// inspection and logging.
    #[must_use]
    pub fn plan_summary(&self) -> serde_json::Value {
        serde_json::to_value(&self.plan).unwrap_or(serde_json::Value::Null)
    }

    /// Runs one invocation, feeding `input` to the head stage's processor.
    ///
    /// # Errors
    ///
    /// Returns an [`InvocationError`] when the head is a niladic source, when
    /// the input or requested output type does not match the chain's declared
    /// boundary types, or when a stage fails. A failed invocation commits
    /// nothing: frozen and carried auxiliary state is left exactly as the
    /// last successful invocation established it.
    pub fn invoke<I, O>(&mut self, input: I) -> Result<O, InvocationError>
    where
        I: Any + Send,
        O: Any,
    {
        let head = &self.specs[0];
        if head.capabilities.source {
            return Err(InvocationError::UnexpectedInput {
                stage: head.name.clone(),
            });
        }

        let actual = ValueType::of::<I>();
        if let Some(expected) = head.proc_input {
            if expected != actual {
                return Err(InvocationError::InputType {
                    expected: expected.name(),
                    actual: actual.name(),
                });
            }
        }

        let payload = self.run(Some(Payload::new(input)))?;
        take_output(payload)
    }

    /// Runs one invocation of a source-headed chain, or returns `Ok(None)`
    /// once the source reports it is out of data.
    ///
    /// An external driver loops on this until `None`; the loop itself stays
    /// outside the engine.
    ///
    /// # Errors
    ///
    /// Returns an [`InvocationError`] when the head expects external input,
    /// when the requested output type does not match the tail stage, or when
    /// a stage fails.
    pub fn pump<O: Any>(&mut self) -> Result<Option<O>, InvocationError> {
        if !self.specs[0].capabilities.source {
            return Err(InvocationError::MissingInput {
                stage: self.specs[0].name.clone(),
            });
        }

        if !self.stages[0].source().is_some_and(|s| s.is_active()) {
            return Ok(None);
        }

        let payload = self.run(None)?;
        take_output(payload).map(Some)
    }

    /// Runs the chain once and commits freeze/carry updates on success.
    fn run(&mut self, input: Option<Payload>) -> Result<Payload, InvocationError> {
        let span = debug_span!("invocation", pipeline = %self.name, instance = %self.instance_id);
        let _guard = span.enter();

        let outcome = runner::run_invocation(
            &mut self.stages,
            &self.specs,
            &self.plan,
            &self.baseline,
            &self.freeze_slots,
            &self.carry,
            input,
        )?;

        for (key, value) in outcome.freezes {
            if !self.freeze_slots.freeze(key, value) {
                warn!(%key, "freeze slot refused a second commit");
            }
        }
        for (key, value) in outcome.carry {
            self.carry.insert(key, value, UpdatePolicy::Sometimes);
        }

        Ok(outcome.payload)
    }
}

/// Unwraps the final payload into the caller's requested type.
fn take_output<O: Any>(payload: Payload) -> Result<O, InvocationError> {
    payload
        .take::<O>()
        .map_err(|err| InvocationError::OutputType {
            expected: err.expected,
            actual: err.found,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::stage::FnProcessor;

    fn identity_pipeline(name: &str) -> Pipeline {
        PipelineBuilder::new(name)
            .stage(FnProcessor::new("id", |n: i64| Ok(n)))
            .assemble()
            .unwrap()
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let first = identity_pipeline("a");
        let second = identity_pipeline("b");

        assert_ne!(first.instance_id(), second.instance_id());
    }

    #[test]
    fn test_invoke_threads_primary_value() {
        let mut pipeline = PipelineBuilder::new("math")
            .stage(FnProcessor::new("double", |n: i64| Ok(n * 2)))
            .stage(FnProcessor::new("inc", |n: i64| Ok(n + 1)))
            .assemble()
            .unwrap();

        assert_eq!(pipeline.invoke::<i64, i64>(20).unwrap(), 41);
        assert_eq!(pipeline.invoke::<i64, i64>(0).unwrap(), 1);
    }

    #[test]
    fn test_invoke_rejects_wrong_input_type() {
        let mut pipeline = identity_pipeline("typed");
        let err = pipeline.invoke::<String, i64>("nope".to_string()).unwrap_err();

        assert!(matches!(err, InvocationError::InputType { .. }));
    }

    #[test]
    fn test_invoke_rejects_wrong_output_type() {
        let mut pipeline = identity_pipeline("typed");
        let err = pipeline.invoke::<i64, String>(1).unwrap_err();

        assert!(matches!(err, InvocationError::OutputType { .. }));
    }

    #[test]
    fn test_empty_key_space_for_plain_chain() {
        let pipeline = identity_pipeline("plain");

        assert!(pipeline.key_space().is_empty());
        assert!(pipeline.baseline().is_empty());
    }

    #[test]
    fn test_plan_summary_is_structured() {
        let pipeline = identity_pipeline("plain");
        let summary = pipeline.plan_summary();

        assert!(summary.get("stages").is_some());
        assert_eq!(summary["stages"].as_array().map(Vec::len), Some(1));
    }
}
