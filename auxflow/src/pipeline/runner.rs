//! Runtime propagation: the per-invocation walk over the stage chain.
//!
//! The runner seeds a working store from the baseline, the frozen slots, and
//! the carried `Sometimes` values, then visits each stage in chain order:
//! consumer delivery, processing, transformation, generation, freeze capture,
//! and working-store narrowing. Delivery always precedes the processing call,
//! which always precedes the transform call; downstream consumers therefore
//! observe upstream mutations, while a stage's own consumer sees pre-transform
//! data.
//!
//! The runner never commits instance state itself. Freeze and carry updates
//! are returned to the pipeline, which applies them only when the whole
//! invocation succeeded.

use super::resolver::ResolvedPlan;
use super::spec::StageSpec;
use crate::errors::InvocationError;
use crate::keys::{AuxKey, KeySet};
use crate::policy::{self, UpdatePolicy};
use crate::stage::Stage;
use crate::store::{AuxStore, FreezeSlots};
use crate::value::{AuxValue, Payload};
use tracing::{trace, warn};

/// Everything one successful invocation hands back to the pipeline.
pub(crate) struct InvocationOutcome {
    /// The final stage's output.
    pub payload: Payload,
    /// Deferred `Never` values captured past their last transformer, to be
    /// committed into the write-once slots.
    pub freezes: Vec<(AuxKey, AuxValue)>,
    /// Post-transform `Sometimes` values to carry into the next invocation
    /// as last-known data.
    pub carry: Vec<(AuxKey, AuxValue)>,
}

/// Walks the chain once.
///
/// `external_input` is `Some` when the caller feeds the head processor and
/// `None` when the head runs as a niladic source.
pub(crate) fn run_invocation(
    stages: &mut [Box<dyn Stage>],
    specs: &[StageSpec],
    plan: &ResolvedPlan,
    baseline: &AuxStore,
    freeze_slots: &FreezeSlots,
    carry: &AuxStore,
    external_input: Option<Payload>,
) -> Result<InvocationOutcome, InvocationError> {
    let mut working = seed_working_store(plan, baseline, freeze_slots, carry);
    let signals = collect_transform_signals(stages, specs, freeze_slots);

    // Keys recomputed during this invocation. Transformers only act on these:
    // frozen and carried values already embody the transforms applied when
    // they were produced.
    let mut fresh = KeySet::new();
    let mut freezes: Vec<(AuxKey, AuxValue)> = Vec::new();
    let mut carry_updates: Vec<(AuxKey, AuxValue)> = Vec::new();

    let mut payload = external_input;

    for (index, stage) in stages.iter_mut().enumerate() {
        let spec = &specs[index];
        let step = &plan.stages[index];

        // 1. Consumer delivery.
        if spec.capabilities.consumer {
            if let Some(consumer) = stage.consumer() {
                for key in &step.deliver {
                    match working.get(key) {
                        Some(value) => {
                            trace!(stage = %spec.name, %key, "delivering auxiliary value");
                            consumer.set(key, value);
                        }
                        None => {
                            warn!(
                                stage = %spec.name,
                                %key,
                                "demanded key has no value this invocation"
                            );
                        }
                    }
                }
            }
        }

        // 2. Processing of the primary value.
        let produced = match payload.take() {
            None => {
                let source = stage.source().ok_or_else(|| {
                    InvocationError::Internal(format!(
                        "stage '{}' has no source role for a niladic invocation",
                        spec.name
                    ))
                })?;
                source.produce().map_err(|source| InvocationError::Stage {
                    stage: spec.name.clone(),
                    source,
                })?
            }
            Some(input) => {
                let processor = stage.processor().ok_or_else(|| {
                    InvocationError::Internal(format!(
                        "stage '{}' has no processor role",
                        spec.name
                    ))
                })?;
                processor
                    .process(input)
                    .map_err(|source| InvocationError::Stage {
                        stage: spec.name.clone(),
                        source,
                    })?
            }
        };
        trace!(stage = %spec.name, "processed primary value");
        payload = Some(produced);

        // 3. Transformation of freshly computed values.
        if !step.transform.is_empty() {
            if let Some(transformer) = stage.transformer() {
                for decl in &step.transform {
                    if !fresh.contains(decl.key) {
                        continue;
                    }
                    if let Some(value) = working.get_mut(decl.key) {
                        trace!(stage = %spec.name, key = %decl.key, "applying transform");
                        transformer.transform(decl.key, value);
                    }
                }
            }
        }

        // 4. Generation of keys owed by this stage.
        if !step.generate.is_empty() {
            if let Some(generator) = stage.generator() {
                for gen in &step.generate {
                    let producer_fresh = gen.policy == UpdatePolicy::Sometimes
                        && generator.has_new_data(gen.key);
                    let signaled = signals.contains(gen.key);
                    let frozen = freeze_slots.is_frozen(gen.key);

                    if !policy::should_generate(gen.policy, producer_fresh, signaled, frozen) {
                        trace!(stage = %spec.name, key = %gen.key, "reusing prior value");
                        continue;
                    }

                    let value = generator.generate(gen.key);
                    if value.kind() != gen.kind {
                        return Err(InvocationError::KindMismatch {
                            key: gen.key.name(),
                            declared: gen.kind,
                            actual: value.kind(),
                        });
                    }

                    trace!(stage = %spec.name, key = %gen.key, "generated auxiliary value");
                    working.insert(gen.key, value, gen.policy);
                    fresh.insert(gen.key);
                }
            }
        }

        // 5. Capture deferred `Never` values once their last transformer has
        //    run; the pipeline commits them after the invocation succeeds.
        for key in &step.freeze_here {
            if fresh.contains(key) && !freeze_slots.is_frozen(key) {
                if let Some(value) = working.get(key) {
                    trace!(stage = %spec.name, %key, "capturing value for freeze");
                    freezes.push((key, value.clone()));
                }
            }
        }

        // 6. Narrow the working store to what the remaining chain demands.
        for (key, datum) in working.narrow(&step.retain_after) {
            trace!(stage = %spec.name, %key, "dropped from working store");
            if fresh.contains(key) && plan.sometimes.contains(key) {
                carry_updates.push((key, datum.value));
            }
        }
    }

    // Sometimes values still resident at the end of the chain are carried too.
    for (key, datum) in working.iter() {
        if fresh.contains(key) && plan.sometimes.contains(key) {
            carry_updates.push((key, datum.value.clone()));
        }
    }

    let payload = payload.ok_or_else(|| {
        InvocationError::Internal("invocation finished without a primary value".to_string())
    })?;

    Ok(InvocationOutcome {
        payload,
        freezes,
        carry: carry_updates,
    })
}

/// Builds the invocation's working store: baseline constants, then committed
/// frozen values, then carried `Sometimes` data from prior invocations.
fn seed_working_store(
    plan: &ResolvedPlan,
    baseline: &AuxStore,
    freeze_slots: &FreezeSlots,
    carry: &AuxStore,
) -> AuxStore {
    let mut working = baseline.clone();

    for key in &plan.deferred {
        if let Some(value) = freeze_slots.get(key) {
            working.insert(key, value.clone(), UpdatePolicy::Never);
        }
    }
    for (key, datum) in carry.iter() {
        working.insert(key, datum.value.clone(), UpdatePolicy::Sometimes);
    }

    working
}

/// Asks every `Sometimes` transformer up front whether its mutation changed,
/// so producers earlier in the chain can decide to recompute the keys those
/// transformers act on. Signals for already-frozen keys are ignored: the
/// write-once discipline outranks a late transformer.
fn collect_transform_signals(
    stages: &mut [Box<dyn Stage>],
    specs: &[StageSpec],
    freeze_slots: &FreezeSlots,
) -> KeySet {
    let mut signals = KeySet::new();

    for (stage, spec) in stages.iter_mut().zip(specs) {
        if !spec.capabilities.transformer {
            continue;
        }
        let Some(transformer) = stage.transformer() else {
            continue;
        };
        for decl in &spec.transforms {
            if decl.policy != UpdatePolicy::Sometimes {
                continue;
            }
            if transformer.changed(decl.key) {
                if freeze_slots.is_frozen(decl.key) {
                    warn!(
                        stage = %spec.name,
                        key = %decl.key,
                        "transformer signaled a change for a frozen key; ignored"
                    );
                    continue;
                }
                signals.insert(decl.key);
            }
        }
    }

    signals
}
