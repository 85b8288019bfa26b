//! Pipeline builder with key-space and type-chain validation.

use super::chain::Pipeline;
use super::resolver;
use super::spec::StageSpec;
use crate::errors::{AssemblyError, AssemblyErrorInfo};
use crate::keys::AuxKey;
use crate::stage::Stage;
use std::collections::BTreeMap;

/// Builder collecting stages in chain order.
///
/// All validation happens in [`PipelineBuilder::assemble`], because the
/// key-space rules (demand ordering, producer uniqueness) only make sense
/// over the complete chain.
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage to the chain.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the chain, runs the static resolver, and returns the
    /// assembled pipeline.
    ///
    /// # Errors
    ///
    /// Returns an [`AssemblyError`] when the declared key space or primary
    /// type chain is inconsistent.
    pub fn assemble(self) -> Result<Pipeline, AssemblyError> {
        let mut stages = self.stages;

        if stages.is_empty() {
            return Err(AssemblyError::new("Pipeline has no stages").with_info(
                AssemblyErrorInfo::new("ASSEMBLY-001-EMPTY", "Cannot assemble an empty pipeline")
                    .with_fix_hint("Add at least one stage before assembling."),
            ));
        }

        let mut specs = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter_mut().enumerate() {
            let spec = StageSpec::capture(stage.as_mut()).ok_or_else(|| {
                AssemblyError::new(format!(
                    "Stage '{}' implements neither a source nor a processor role",
                    stage.name()
                ))
                .with_stages(vec![stage.name().to_string()])
                .with_info(
                    AssemblyErrorInfo::new(
                        "ASSEMBLY-002-NO_PROCESSOR",
                        "Every stage must process the primary value",
                    )
                    .with_fix_hint("Implement the processor role (or the source role for the chain head)."),
                )
            })?;

            if spec.capabilities.source && index > 0 {
                return Err(AssemblyError::new(format!(
                    "Stage '{}' declares a source role but is not the chain head",
                    spec.name
                ))
                .with_stages(vec![spec.name])
                .with_info(
                    AssemblyErrorInfo::new(
                        "ASSEMBLY-003-SOURCE_POSITION",
                        "Niladic sources are only valid as the first stage",
                    )
                    .with_fix_hint("Move the source to the head of the chain or give the stage a processor role."),
                ));
            }

            if spec.capabilities.generator && spec.provides.is_empty() {
                return Err(AssemblyError::new(format!(
                    "Stage '{}' declares a generator role with no keys",
                    spec.name
                ))
                .with_stages(vec![spec.name])
                .with_info(
                    AssemblyErrorInfo::new(
                        "ASSEMBLY-004-EMPTY_GENERATOR",
                        "A generator must declare a non-empty key set",
                    )
                    .with_fix_hint("Declare at least one provided key, or drop the generator role."),
                ));
            }

            specs.push(spec);
        }

        validate_key_space(&specs)?;
        validate_primary_chain(&specs)?;

        let (baseline, plan) = resolver::resolve(&mut stages, &specs)?;

        Ok(Pipeline::new(self.name, stages, specs, baseline, plan))
    }
}

/// Checks producer uniqueness and demand/transform ordering over the whole
/// chain.
fn validate_key_space(specs: &[StageSpec]) -> Result<(), AssemblyError> {
    let mut producers: BTreeMap<AuxKey, usize> = BTreeMap::new();

    for (index, spec) in specs.iter().enumerate() {
        for decl in &spec.provides {
            if let Some(&existing) = producers.get(&decl.key) {
                return Err(AssemblyError::new(format!(
                    "Key '{}' is generated by both '{}' and '{}'",
                    decl.key, specs[existing].name, spec.name
                ))
                .with_stages(vec![specs[existing].name.clone(), spec.name.clone()])
                .with_info(
                    AssemblyErrorInfo::new(
                        "ASSEMBLY-005-DUP_PRODUCER",
                        "Each auxiliary key must have exactly one producer",
                    )
                    .with_fix_hint("Remove one of the generators or split the key in two."),
                ));
            }
            producers.insert(decl.key, index);
        }
    }

    for (index, spec) in specs.iter().enumerate() {
        let demanded = spec.demands.iter().map(|key| (key, "demands"));
        let transformed = spec.transforms.iter().map(|decl| (decl.key, "transforms"));

        for (key, verb) in demanded.chain(transformed) {
            match producers.get(&key) {
                None => {
                    return Err(AssemblyError::new(format!(
                        "Stage '{}' {} key '{}' which no generator provides",
                        spec.name, verb, key
                    ))
                    .with_stages(vec![spec.name.clone()])
                    .with_info(
                        AssemblyErrorInfo::new(
                            "ASSEMBLY-006-NO_PRODUCER",
                            "Demanded and transformed keys need an upstream generator",
                        )
                        .with_fix_hint("Add a generator for the key or drop the declaration."),
                    ));
                }
                Some(&producer) if producer >= index => {
                    return Err(AssemblyError::new(format!(
                        "Stage '{}' {} key '{}' before its producer '{}' appears in chain order",
                        spec.name, verb, key, specs[producer].name
                    ))
                    .with_stages(vec![spec.name.clone(), specs[producer].name.clone()])
                    .with_info(
                        AssemblyErrorInfo::new(
                            "ASSEMBLY-007-DEMAND_ORDER",
                            "A key's producer must sit strictly earlier in the chain",
                        )
                        .with_fix_hint("Reorder the stages so the generator runs first."),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

/// Checks that each stage's declared primary output matches the next
/// stage's declared input.
fn validate_primary_chain(specs: &[StageSpec]) -> Result<(), AssemblyError> {
    for (index, pair) in specs.windows(2).enumerate() {
        let (upstream, downstream) = (&pair[0], &pair[1]);

        let emitted = upstream.emitted_type(index == 0 && upstream.capabilities.source);
        let (Some(emitted), Some(accepted)) = (emitted, downstream.proc_input) else {
            // capture() guarantees the roles exist; nothing to compare.
            continue;
        };

        if emitted != accepted {
            return Err(AssemblyError::new(format!(
                "Stage '{}' emits {} but '{}' accepts {}",
                upstream.name, emitted, downstream.name, accepted
            ))
            .with_stages(vec![upstream.name.clone(), downstream.name.clone()])
            .with_info(
                AssemblyErrorInfo::new(
                    "ASSEMBLY-008-TYPE_CHAIN",
                    "Adjacent stages disagree on the primary value type",
                )
                .with_fix_hint("Insert an adapter stage or align the declared types."),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FnProcessor, IterSource};

    #[test]
    fn test_builder_empty() {
        let err = PipelineBuilder::new("empty").assemble().unwrap_err();
        assert_eq!(err.code(), Some("ASSEMBLY-001-EMPTY"));
    }

    #[test]
    fn test_builder_single_processor() {
        let pipeline = PipelineBuilder::new("single")
            .stage(FnProcessor::new("double", |n: i64| Ok(n * 2)))
            .assemble()
            .unwrap();

        assert_eq!(pipeline.name(), "single");
        assert_eq!(pipeline.stage_count(), 1);
    }

    #[test]
    fn test_builder_source_not_at_head() {
        let err = PipelineBuilder::new("bad")
            .stage(FnProcessor::new("id", |n: i64| Ok(n)))
            .stage(IterSource::new("late", vec![1_i64].into_iter()))
            .assemble()
            .unwrap_err();

        assert_eq!(err.code(), Some("ASSEMBLY-003-SOURCE_POSITION"));
    }

    #[test]
    fn test_builder_type_chain_mismatch() {
        let err = PipelineBuilder::new("bad")
            .stage(FnProcessor::new("stringify", |n: i64| Ok(n.to_string())))
            .stage(FnProcessor::new("double", |n: i64| Ok(n * 2)))
            .assemble()
            .unwrap_err();

        assert_eq!(err.code(), Some("ASSEMBLY-008-TYPE_CHAIN"));
        assert_eq!(err.stages, vec!["stringify".to_string(), "double".to_string()]);
    }

    #[test]
    fn test_builder_name_and_count() {
        let builder = PipelineBuilder::new("counted")
            .stage(FnProcessor::new("a", |n: i64| Ok(n)))
            .stage(FnProcessor::new("b", |n: i64| Ok(n)));

        assert_eq!(builder.name(), "counted");
        assert_eq!(builder.stage_count(), 2);
    }
}
