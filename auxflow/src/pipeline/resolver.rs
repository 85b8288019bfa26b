//! Static resolution: constant hoisting and the per-stage execution plan.
//!
//! Runs once per pipeline assembly. The resolver walks the chain in order,
//! bootstrapping consumers with already-known constants, applying
//! transformers to the accumulating baseline store, and hoisting every
//! `Never`-policy key that no later stage can still mutate. It also emits
//! the [`ResolvedPlan`] the runner executes on every invocation: what to
//! deliver, transform, generate, freeze, and retain at each stage.

use super::spec::StageSpec;
use crate::errors::{AssemblyError, AssemblyErrorInfo};
use crate::keys::{AuxKey, KeySet};
use crate::policy::{self, UpdatePolicy};
use crate::stage::{ProvideDecl, Stage, TransformDecl};
use crate::store::AuxStore;
use crate::value::AuxKind;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One runtime generation obligation.
#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct GenerateStep {
    /// The key to produce.
    pub key: AuxKey,
    /// The declared payload kind, checked against generated values.
    pub kind: AuxKind,
    /// The producer's update policy.
    pub policy: UpdatePolicy,
}

/// Per-stage execution plan.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct StagePlan {
    /// Keys to deliver to the stage's consumer role (intersected with the
    /// working store at runtime).
    pub deliver: KeySet,
    /// Transform targets still live at runtime. Targets whose key was
    /// hoisted at bootstrap, or is never generated, are excluded.
    pub transform: Vec<TransformDecl>,
    /// Keys this stage must produce at runtime.
    pub generate: Vec<GenerateStep>,
    /// Deferred `Never` keys whose final transformer sits at this stage;
    /// their values are captured here for freezing.
    pub freeze_here: KeySet,
    /// Keys the remaining chain still needs after this stage.
    pub retain_after: KeySet,
}

/// The complete resolution output.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct ResolvedPlan {
    /// One plan per stage, in chain order.
    pub stages: Vec<StagePlan>,
    /// `Never` keys that could not be hoisted; computed lazily on the
    /// first invocation and frozen at their freeze point.
    pub deferred: KeySet,
    /// `Sometimes` keys carried across invocations as last-known values.
    pub sometimes: KeySet,
}

/// How one produced key is handled for the lifetime of the instance.
#[derive(Debug)]
struct KeyFate {
    producer: usize,
    decl: ProvideDecl,
    hoisted: bool,
    deferred: bool,
    runtime_generated: bool,
    freeze_at: Option<usize>,
    last_use: Option<usize>,
}

/// Runs the static resolution over a validated chain.
pub(crate) fn resolve(
    stages: &mut [Box<dyn Stage>],
    specs: &[StageSpec],
) -> Result<(AuxStore, ResolvedPlan), AssemblyError> {
    let fates = classify_keys(specs);

    let mut plan = ResolvedPlan {
        stages: build_stage_plans(specs, &fates),
        ..ResolvedPlan::default()
    };
    for fate in fates.values() {
        if fate.deferred {
            plan.deferred.insert(fate.decl.key);
        }
        if fate.runtime_generated && fate.decl.policy == UpdatePolicy::Sometimes {
            plan.sometimes.insert(fate.decl.key);
        }
    }

    let baseline = bootstrap(stages, specs, &fates)?;

    Ok((baseline, plan))
}

/// Partitions every produced key into hoisted / deferred / runtime-generated
/// and records its freeze point and last point of use.
fn classify_keys(specs: &[StageSpec]) -> BTreeMap<AuxKey, KeyFate> {
    let mut transformers: BTreeMap<AuxKey, Vec<(usize, UpdatePolicy)>> = BTreeMap::new();
    let mut demanders: BTreeMap<AuxKey, Vec<usize>> = BTreeMap::new();

    for (index, spec) in specs.iter().enumerate() {
        for decl in &spec.transforms {
            transformers.entry(decl.key).or_default().push((index, decl.policy));
        }
        for key in &spec.demands {
            demanders.entry(key).or_default().push(index);
        }
    }

    let mut fates = BTreeMap::new();
    for (index, spec) in specs.iter().enumerate() {
        for decl in &spec.provides {
            let key = decl.key;
            let later_policies: Vec<UpdatePolicy> = transformers
                .get(&key)
                .map(|ts| ts.iter().map(|(_, p)| *p).collect())
                .unwrap_or_default();
            let last_demand = demanders.get(&key).and_then(|ds| ds.iter().max()).copied();
            let last_transform = transformers
                .get(&key)
                .and_then(|ts| ts.iter().map(|(i, _)| *i).max());

            let demanded = last_demand.is_some();
            if !demanded {
                debug!(%key, stage = %spec.name, "key has no demander; it will never be computed");
                fates.insert(
                    key,
                    KeyFate {
                        producer: index,
                        decl: *decl,
                        hoisted: false,
                        deferred: false,
                        runtime_generated: false,
                        freeze_at: None,
                        last_use: None,
                    },
                );
                continue;
            }

            let hoisted = policy::hoistable(decl.policy, &later_policies, demanded);
            let runtime_generated = !hoisted;
            let deferred = runtime_generated && decl.policy == UpdatePolicy::Never;
            let freeze_at = if deferred { last_transform } else { None };

            let last_use = if hoisted {
                last_demand
            } else {
                [last_demand, last_transform, freeze_at]
                    .into_iter()
                    .flatten()
                    .max()
            };

            debug!(
                %key,
                policy = %decl.policy,
                hoisted,
                deferred,
                "resolved auxiliary key"
            );

            fates.insert(
                key,
                KeyFate {
                    producer: index,
                    decl: *decl,
                    hoisted,
                    deferred,
                    runtime_generated,
                    freeze_at,
                    last_use,
                },
            );
        }
    }

    fates
}

fn build_stage_plans(specs: &[StageSpec], fates: &BTreeMap<AuxKey, KeyFate>) -> Vec<StagePlan> {
    let mut plans: Vec<StagePlan> = specs
        .iter()
        .map(|spec| StagePlan {
            deliver: spec.demands.clone(),
            transform: spec
                .transforms
                .iter()
                .filter(|decl| {
                    fates
                        .get(&decl.key)
                        .is_some_and(|fate| fate.runtime_generated)
                })
                .copied()
                .collect(),
            ..StagePlan::default()
        })
        .collect();

    for fate in fates.values() {
        if fate.runtime_generated {
            plans[fate.producer].generate.push(GenerateStep {
                key: fate.decl.key,
                kind: fate.decl.kind,
                policy: fate.decl.policy,
            });
        }
        if let Some(freeze_at) = fate.freeze_at {
            plans[freeze_at].freeze_here.insert(fate.decl.key);
        }
        if let Some(last_use) = fate.last_use {
            for plan in plans.iter_mut().take(last_use) {
                plan.retain_after.insert(fate.decl.key);
            }
        }
    }

    plans
}

/// The bootstrap walk: delivers known constants, applies transformers to
/// the accumulating baseline, and hoists qualifying `Never` keys.
fn bootstrap(
    stages: &mut [Box<dyn Stage>],
    specs: &[StageSpec],
    fates: &BTreeMap<AuxKey, KeyFate>,
) -> Result<AuxStore, AssemblyError> {
    let mut baseline = AuxStore::new();

    for (index, stage) in stages.iter_mut().enumerate() {
        let spec = &specs[index];

        // 1. Bootstrap consumers with already-known constants.
        if spec.capabilities.consumer {
            if let Some(consumer) = stage.consumer() {
                for key in &spec.demands {
                    if let Some(value) = baseline.get(key) {
                        consumer.set(key, value);
                    }
                }
            }
        }

        // 2. Constant transformers run during bootstrap so frozen data
        //    reflects every transformation it will ever receive.
        if spec.capabilities.transformer {
            if let Some(transformer) = stage.transformer() {
                for decl in &spec.transforms {
                    if let Some(value) = baseline.get_mut(decl.key) {
                        transformer.transform(decl.key, value);
                        debug!(key = %decl.key, stage = %spec.name, "applied bootstrap transform");
                    }
                }
            }
        }

        // 3. Hoist qualifying Never keys into the baseline.
        if spec.capabilities.generator {
            if let Some(generator) = stage.generator() {
                for decl in &spec.provides {
                    let hoisted = fates.get(&decl.key).is_some_and(|fate| fate.hoisted);
                    if !hoisted {
                        continue;
                    }

                    let value = generator.generate(decl.key);
                    if value.kind() != decl.kind {
                        return Err(AssemblyError::new(format!(
                            "Generator '{}' produced {} for key '{}' declared {}",
                            spec.name,
                            value.kind(),
                            decl.key,
                            decl.kind
                        ))
                        .with_stages(vec![spec.name.clone()])
                        .with_info(
                            AssemblyErrorInfo::new(
                                "ASSEMBLY-009-KIND_MISMATCH",
                                "Generated values must match their declared kind",
                            )
                            .with_fix_hint("Align the generator output with the declared AuxKind."),
                        ));
                    }

                    debug!(key = %decl.key, stage = %spec.name, "hoisted constant into baseline");
                    baseline.insert(decl.key, value, UpdatePolicy::Never);
                }
            }
        }
    }

    Ok(baseline)
}
