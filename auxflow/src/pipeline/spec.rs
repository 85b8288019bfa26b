//! Assembly-time stage specifications.

use crate::keys::KeySet;
use crate::stage::{CapabilitySet, ProvideDecl, Stage, TransformDecl};
use crate::value::ValueType;

/// Assembly-time snapshot of one stage's capabilities and declarations.
///
/// Captured exactly once when the pipeline is assembled; the resolver and
/// runner consult the snapshot instead of re-querying the stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The stage name.
    pub name: String,
    /// The roles the stage opted into.
    pub capabilities: CapabilitySet,
    /// Primary output type of the source role, if present.
    pub source_output: Option<ValueType>,
    /// Primary input type of the processor role, if present.
    pub proc_input: Option<ValueType>,
    /// Primary output type of the processor role, if present.
    pub proc_output: Option<ValueType>,
    /// Generated keys with kinds and policies.
    pub provides: Vec<ProvideDecl>,
    /// Transform targets with per-key policies.
    pub transforms: Vec<TransformDecl>,
    /// Demanded keys.
    pub demands: KeySet,
}

impl StageSpec {
    /// Captures the snapshot for one stage, or `None` when the stage
    /// implements neither a source nor a processor role.
    pub(crate) fn capture(stage: &mut dyn Stage) -> Option<Self> {
        let name = stage.name().to_string();

        let capabilities = CapabilitySet {
            source: stage.source().is_some(),
            processor: stage.processor().is_some(),
            generator: stage.generator().is_some(),
            transformer: stage.transformer().is_some(),
            consumer: stage.consumer().is_some(),
        };

        if !capabilities.source && !capabilities.processor {
            return None;
        }

        let source_output = stage.source().map(|s| s.output_type());
        let (proc_input, proc_output) = match stage.processor() {
            Some(p) => (Some(p.input_type()), Some(p.output_type())),
            None => (None, None),
        };

        let provides = stage.generator().map(|g| g.provides()).unwrap_or_default();
        let transforms = stage
            .transformer()
            .map(|t| t.transforms())
            .unwrap_or_default();
        let demands = stage.consumer().map(|c| c.demands()).unwrap_or_default();

        Some(Self {
            name,
            capabilities,
            source_output,
            proc_input,
            proc_output,
            provides,
            transforms,
            demands,
        })
    }

    /// The primary type this stage emits, given whether it runs as the
    /// niladic chain head.
    pub(crate) fn emitted_type(&self, runs_as_source: bool) -> Option<ValueType> {
        if runs_as_source {
            self.source_output
        } else {
            self.proc_output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FnProcessor, IterSource};

    #[test]
    fn test_capture_processor_stage() {
        let mut stage = FnProcessor::new("double", |n: i64| Ok(n * 2));
        let spec = StageSpec::capture(&mut stage).unwrap();

        assert_eq!(spec.name, "double");
        assert!(spec.capabilities.processor);
        assert!(!spec.capabilities.source);
        assert_eq!(spec.proc_input, Some(ValueType::of::<i64>()));
        assert_eq!(spec.proc_output, Some(ValueType::of::<i64>()));
        assert!(spec.provides.is_empty());
        assert!(spec.demands.is_empty());
    }

    #[test]
    fn test_capture_source_stage() {
        let mut stage = IterSource::new("nums", vec![1_i64].into_iter());
        let spec = StageSpec::capture(&mut stage).unwrap();

        assert!(spec.capabilities.source);
        assert_eq!(spec.source_output, Some(ValueType::of::<i64>()));
        assert_eq!(spec.proc_input, None);
        assert_eq!(spec.emitted_type(true), Some(ValueType::of::<i64>()));
    }
}
