//! Scripted stages that record every engine interaction.

use crate::keys::{AuxKey, KeySet};
use crate::stage::{
    Consumer, Generator, Processor, ProvideDecl, Source, Stage, TransformDecl, Transformer,
};
use crate::value::{AuxValue, Payload, ValueType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// One observed engine interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// A consumer received a demanded value.
    Delivered {
        /// The receiving stage.
        stage: String,
        /// The delivered key.
        key: AuxKey,
        /// The delivered value.
        value: AuxValue,
    },
    /// A stage's processing (or source production) call ran.
    Processed {
        /// The processing stage.
        stage: String,
    },
    /// A generator computed a value.
    Generated {
        /// The producing stage.
        stage: String,
        /// The generated key.
        key: AuxKey,
    },
    /// A transformer's mutation call ran.
    Transformed {
        /// The mutating stage.
        stage: String,
        /// The mutated key.
        key: AuxKey,
    },
}

/// Shared, ordered log of [`StageEvent`]s across a whole pipeline.
///
/// Clone the recorder into every double before assembly; the clones all feed
/// the same log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<StageEvent>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn record(&self, event: StageEvent) {
        self.events.lock().push(event);
    }

    /// Returns a snapshot of all events in observation order.
    #[must_use]
    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().clone()
    }

    /// Counts how often `key` was generated, across all stages.
    #[must_use]
    pub fn generate_count(&self, key: AuxKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, StageEvent::Generated { key: k, .. } if *k == key))
            .count()
    }

    /// Counts how often `key` was transformed, across all stages.
    #[must_use]
    pub fn transform_count(&self, key: AuxKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, StageEvent::Transformed { key: k, .. } if *k == key))
            .count()
    }

    /// Returns the values delivered to `stage`, in delivery order.
    #[must_use]
    pub fn deliveries_to(&self, stage: &str) -> Vec<(AuxKey, AuxValue)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                StageEvent::Delivered { stage: s, key, value } if s == stage => {
                    Some((*key, value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// A source that drains a scripted list of items, recording each production.
pub struct ScriptedSource<T> {
    name: String,
    items: VecDeque<T>,
    recorder: Recorder,
}

impl<T: Send + 'static> ScriptedSource<T> {
    /// Creates a source over the given items.
    pub fn new(
        name: impl Into<String>,
        items: impl IntoIterator<Item = T>,
        recorder: &Recorder,
    ) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().collect(),
            recorder: recorder.clone(),
        }
    }
}

impl<T> Debug for ScriptedSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSource")
            .field("name", &self.name)
            .field("remaining", &self.items.len())
            .finish()
    }
}

impl<T: Send + 'static> Source for ScriptedSource<T> {
    fn output_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn produce(&mut self) -> anyhow::Result<Payload> {
        self.recorder.record(StageEvent::Processed {
            stage: self.name.clone(),
        });
        self.items
            .pop_front()
            .map(Payload::new)
            .ok_or_else(|| anyhow::anyhow!("source '{}' is exhausted", self.name))
    }

    fn is_active(&self) -> bool {
        !self.items.is_empty()
    }
}

impl<T: Send + 'static> Stage for ScriptedSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(self)
    }
}

#[derive(Debug, Default)]
struct GeneratorScript {
    values: BTreeMap<AuxKey, VecDeque<AuxValue>>,
    freshness: BTreeMap<AuxKey, VecDeque<bool>>,
}

/// A generator whose values and freshness answers follow per-key scripts.
///
/// Value scripts are drained one entry per generation call; the last entry
/// repeats once the script runs dry. Freshness scripts are drained one entry
/// per `has_new_data` query and answer `false` when exhausted. The primary
/// value of type `T` passes through unchanged.
pub struct ScriptedGenerator<T> {
    name: String,
    decls: Vec<ProvideDecl>,
    script: Mutex<GeneratorScript>,
    recorder: Recorder,
    _primary: PhantomData<fn(T) -> T>,
}

impl<T: Send + 'static> ScriptedGenerator<T> {
    /// Creates a generator with no declared keys.
    pub fn new(name: impl Into<String>, recorder: &Recorder) -> Self {
        Self {
            name: name.into(),
            decls: Vec::new(),
            script: Mutex::new(GeneratorScript::default()),
            recorder: recorder.clone(),
            _primary: PhantomData,
        }
    }

    /// Declares a key and the value script backing it.
    #[must_use]
    pub fn with_key(
        mut self,
        decl: ProvideDecl,
        values: impl IntoIterator<Item = AuxValue>,
    ) -> Self {
        self.script
            .get_mut()
            .values
            .insert(decl.key, values.into_iter().collect());
        self.decls.push(decl);
        self
    }

    /// Sets the `has_new_data` answer script for a `Sometimes` key.
    #[must_use]
    pub fn with_fresh_script(mut self, key: AuxKey, script: impl IntoIterator<Item = bool>) -> Self {
        self.script
            .get_mut()
            .freshness
            .insert(key, script.into_iter().collect());
        self
    }
}

impl<T> Debug for ScriptedGenerator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedGenerator")
            .field("name", &self.name)
            .field("decls", &self.decls)
            .finish()
    }
}

impl<T: Send + 'static> Generator for ScriptedGenerator<T> {
    fn provides(&self) -> Vec<ProvideDecl> {
        self.decls.clone()
    }

    fn generate(&mut self, key: AuxKey) -> AuxValue {
        self.recorder.record(StageEvent::Generated {
            stage: self.name.clone(),
            key,
        });

        let mut script = self.script.lock();
        let value = match script.values.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        value.unwrap_or(AuxValue::Bool(false))
    }

    fn has_new_data(&self, key: AuxKey) -> bool {
        self.script
            .lock()
            .freshness
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(false)
    }
}

impl<T: Send + 'static> Processor for ScriptedGenerator<T> {
    fn input_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn output_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn process(&mut self, input: Payload) -> anyhow::Result<Payload> {
        self.recorder.record(StageEvent::Processed {
            stage: self.name.clone(),
        });
        Ok(input)
    }
}

impl<T: Send + 'static> Stage for ScriptedGenerator<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn processor(&mut self) -> Option<&mut dyn Processor> {
        Some(self)
    }

    fn generator(&mut self) -> Option<&mut dyn Generator> {
        Some(self)
    }
}

#[derive(Default)]
struct TransformerScript {
    changed: BTreeMap<AuxKey, VecDeque<bool>>,
    last_answer: BTreeMap<AuxKey, bool>,
}

/// A transformer applying one mutation to every declared target, with a
/// scripted `changed` answer per key.
///
/// A gated transformer applies its mutation only when its most recent
/// `changed` answer for the key was `true`; an ungated one mutates whenever
/// the engine invokes it. The primary value of type `T` passes through
/// unchanged.
pub struct ScriptedTransformer<T> {
    name: String,
    decls: Vec<TransformDecl>,
    op: Box<dyn FnMut(&mut AuxValue) + Send>,
    gated: bool,
    script: Mutex<TransformerScript>,
    recorder: Recorder,
    _primary: PhantomData<fn(T) -> T>,
}

impl<T: Send + 'static> ScriptedTransformer<T> {
    /// Creates a transformer applying `op` to its targets.
    pub fn new(
        name: impl Into<String>,
        op: impl FnMut(&mut AuxValue) + Send + 'static,
        recorder: &Recorder,
    ) -> Self {
        Self {
            name: name.into(),
            decls: Vec::new(),
            op: Box::new(op),
            gated: false,
            script: Mutex::new(TransformerScript::default()),
            recorder: recorder.clone(),
            _primary: PhantomData,
        }
    }

    /// Declares a transform target.
    #[must_use]
    pub fn with_target(mut self, decl: TransformDecl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Sets the `changed` answer script for a `Sometimes` target.
    #[must_use]
    pub fn with_changed_script(
        mut self,
        key: AuxKey,
        script: impl IntoIterator<Item = bool>,
    ) -> Self {
        self.script
            .get_mut()
            .changed
            .insert(key, script.into_iter().collect());
        self
    }

    /// Makes the mutation conditional on the latest `changed` answer.
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }
}

impl<T> Debug for ScriptedTransformer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransformer")
            .field("name", &self.name)
            .field("decls", &self.decls)
            .field("gated", &self.gated)
            .finish()
    }
}

impl<T: Send + 'static> Transformer for ScriptedTransformer<T> {
    fn transforms(&self) -> Vec<TransformDecl> {
        self.decls.clone()
    }

    fn transform(&mut self, key: AuxKey, value: &mut AuxValue) {
        self.recorder.record(StageEvent::Transformed {
            stage: self.name.clone(),
            key,
        });

        let apply = if self.gated {
            self.script
                .lock()
                .last_answer
                .get(&key)
                .copied()
                .unwrap_or(false)
        } else {
            true
        };
        if apply {
            (self.op)(value);
        }
    }

    fn changed(&self, key: AuxKey) -> bool {
        let mut script = self.script.lock();
        let answer = script
            .changed
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(false);
        script.last_answer.insert(key, answer);
        answer
    }
}

impl<T: Send + 'static> Processor for ScriptedTransformer<T> {
    fn input_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn output_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn process(&mut self, input: Payload) -> anyhow::Result<Payload> {
        self.recorder.record(StageEvent::Processed {
            stage: self.name.clone(),
        });
        Ok(input)
    }
}

impl<T: Send + 'static> Stage for ScriptedTransformer<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn processor(&mut self) -> Option<&mut dyn Processor> {
        Some(self)
    }

    fn transformer(&mut self) -> Option<&mut dyn Transformer> {
        Some(self)
    }
}

/// A consumer that records every delivery and passes the primary value of
/// type `T` through unchanged.
pub struct ProbeConsumer<T> {
    name: String,
    demands: KeySet,
    recorder: Recorder,
    _primary: PhantomData<fn(T) -> T>,
}

impl<T: Send + 'static> ProbeConsumer<T> {
    /// Creates a consumer demanding the given keys.
    pub fn new(
        name: impl Into<String>,
        demands: impl IntoIterator<Item = AuxKey>,
        recorder: &Recorder,
    ) -> Self {
        Self {
            name: name.into(),
            demands: demands.into_iter().collect(),
            recorder: recorder.clone(),
            _primary: PhantomData,
        }
    }
}

impl<T> Debug for ProbeConsumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeConsumer")
            .field("name", &self.name)
            .field("demands", &self.demands)
            .finish()
    }
}

impl<T: Send + 'static> Consumer for ProbeConsumer<T> {
    fn demands(&self) -> KeySet {
        self.demands.clone()
    }

    fn set(&mut self, key: AuxKey, value: &AuxValue) {
        self.recorder.record(StageEvent::Delivered {
            stage: self.name.clone(),
            key,
            value: value.clone(),
        });
    }
}

impl<T: Send + 'static> Processor for ProbeConsumer<T> {
    fn input_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn output_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn process(&mut self, input: Payload) -> anyhow::Result<Payload> {
        self.recorder.record(StageEvent::Processed {
            stage: self.name.clone(),
        });
        Ok(input)
    }
}

impl<T: Send + 'static> Stage for ProbeConsumer<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn processor(&mut self) -> Option<&mut dyn Processor> {
        Some(self)
    }

    fn consumer(&mut self) -> Option<&mut dyn Consumer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::UpdatePolicy;
    use crate::value::AuxKind;

    const K: AuxKey = AuxKey::new("k");

    #[test]
    fn test_scripted_source_drains_and_records() {
        let recorder = Recorder::new();
        let mut source = ScriptedSource::new("src", vec![1_i64, 2], &recorder);

        assert!(source.is_active());
        assert_eq!(source.produce().unwrap().take::<i64>().unwrap(), 1);
        assert_eq!(source.produce().unwrap().take::<i64>().unwrap(), 2);
        assert!(!source.is_active());
        assert!(source.produce().is_err());

        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn test_scripted_generator_repeats_last_value() {
        let recorder = Recorder::new();
        let mut gen = ScriptedGenerator::<i64>::new("gen", &recorder).with_key(
            ProvideDecl::new(K, AuxKind::Int, UpdatePolicy::Always),
            [AuxValue::Int(1), AuxValue::Int(2)],
        );

        assert_eq!(gen.generate(K), AuxValue::Int(1));
        assert_eq!(gen.generate(K), AuxValue::Int(2));
        assert_eq!(gen.generate(K), AuxValue::Int(2));
        assert_eq!(recorder.generate_count(K), 3);
    }

    #[test]
    fn test_scripted_generator_fresh_script_runs_dry() {
        let recorder = Recorder::new();
        let gen = ScriptedGenerator::<i64>::new("gen", &recorder)
            .with_key(
                ProvideDecl::new(K, AuxKind::Int, UpdatePolicy::Sometimes),
                [AuxValue::Int(1)],
            )
            .with_fresh_script(K, [true, false]);

        assert!(gen.has_new_data(K));
        assert!(!gen.has_new_data(K));
        assert!(!gen.has_new_data(K));
    }

    #[test]
    fn test_gated_transformer_follows_changed_answers() {
        let recorder = Recorder::new();
        let mut doubler = ScriptedTransformer::<i64>::new(
            "double",
            |value| {
                if let AuxValue::Int(n) = value {
                    *n *= 2;
                }
            },
            &recorder,
        )
        .with_target(TransformDecl::new(K, UpdatePolicy::Sometimes))
        .with_changed_script(K, [false, true])
        .gated();

        let mut value = AuxValue::Int(5);

        assert!(!doubler.changed(K));
        doubler.transform(K, &mut value);
        assert_eq!(value, AuxValue::Int(5));

        assert!(doubler.changed(K));
        doubler.transform(K, &mut value);
        assert_eq!(value, AuxValue::Int(10));

        assert_eq!(recorder.transform_count(K), 2);
    }

    #[test]
    fn test_ungated_transformer_always_applies() {
        let recorder = Recorder::new();
        let mut inc = ScriptedTransformer::<i64>::new(
            "inc",
            |value| {
                if let AuxValue::Int(n) = value {
                    *n += 1;
                }
            },
            &recorder,
        )
        .with_target(TransformDecl::new(K, UpdatePolicy::Always));

        let mut value = AuxValue::Int(0);
        inc.transform(K, &mut value);
        inc.transform(K, &mut value);

        assert_eq!(value, AuxValue::Int(2));
    }

    #[test]
    fn test_probe_consumer_records_deliveries() {
        let recorder = Recorder::new();
        let mut probe = ProbeConsumer::<i64>::new("probe", [K], &recorder);

        probe.set(K, &AuxValue::Int(7));

        assert_eq!(probe.demands().len(), 1);
        assert_eq!(recorder.deliveries_to("probe"), vec![(K, AuxValue::Int(7))]);
        assert!(recorder.deliveries_to("other").is_empty());
    }

    #[test]
    fn test_recorder_clear() {
        let recorder = Recorder::new();
        recorder.record(StageEvent::Processed {
            stage: "s".to_string(),
        });

        assert_eq!(recorder.events().len(), 1);
        recorder.clear();
        assert!(recorder.events().is_empty());
    }
}
