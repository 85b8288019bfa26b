//! Stage contract: capability traits and assembly-time declarations.
//!
//! A stage opts into capabilities by overriding the accessor methods on
//! [`Stage`]. Capability presence and every declaration (provided keys,
//! transform targets, demanded keys, primary types) are discovered exactly
//! once, at assembly time, and cached in the pipeline's stage specs; they
//! are never re-queried per invocation.

use crate::keys::{AuxKey, KeySet};
use crate::policy::UpdatePolicy;
use crate::value::{AuxKind, AuxValue, Payload, ValueType};
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Declaration of one generated auxiliary key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProvideDecl {
    /// The key being supplied.
    pub key: AuxKey,
    /// The concrete payload kind every generated value must carry.
    pub kind: AuxKind,
    /// When the value must be recomputed.
    pub policy: UpdatePolicy,
}

impl ProvideDecl {
    /// Creates a declaration.
    #[must_use]
    pub const fn new(key: AuxKey, kind: AuxKind, policy: UpdatePolicy) -> Self {
        Self { key, kind, policy }
    }
}

/// Declaration of one in-place transform target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransformDecl {
    /// The key being mutated.
    pub key: AuxKey,
    /// The transformer's own update policy for this key.
    pub policy: UpdatePolicy,
}

impl TransformDecl {
    /// Creates a declaration.
    #[must_use]
    pub const fn new(key: AuxKey, policy: UpdatePolicy) -> Self {
        Self { key, policy }
    }
}

/// Which roles a stage opted into; discovered once at assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    /// Niladic head-of-chain production.
    pub source: bool,
    /// Primary-value processing.
    pub processor: bool,
    /// Auxiliary-data generation.
    pub generator: bool,
    /// Auxiliary-data in-place transformation.
    pub transformer: bool,
    /// Auxiliary-data consumption.
    pub consumer: bool,
}

/// Mandatory processing capability: transforms the primary value.
pub trait Processor {
    /// The primary type this stage accepts.
    fn input_type(&self) -> ValueType;

    /// The primary type this stage emits.
    fn output_type(&self) -> ValueType;

    /// Processes the primary value.
    fn process(&mut self, input: Payload) -> anyhow::Result<Payload>;
}

/// Niladic head-of-chain capability: produces the primary value from
/// nothing, gated by [`Source::is_active`].
pub trait Source {
    /// The primary type this source emits.
    fn output_type(&self) -> ValueType;

    /// Produces the next primary value.
    fn produce(&mut self) -> anyhow::Result<Payload>;

    /// Reports whether the source can still produce data. An external
    /// driver (or [`crate::pipeline::Pipeline::pump`]) checks this before
    /// each invocation.
    fn is_active(&self) -> bool;
}

/// Auxiliary production capability.
pub trait Generator {
    /// The keys this stage supplies, with their kinds and policies.
    /// Must be non-empty.
    fn provides(&self) -> Vec<ProvideDecl>;

    /// Computes the value for one declared key.
    fn generate(&mut self, key: AuxKey) -> AuxValue;

    /// Reports whether fresh data is available for a `Sometimes`-policy
    /// key. Only consulted for keys declared `Sometimes`.
    fn has_new_data(&self, key: AuxKey) -> bool {
        let _ = key;
        false
    }
}

/// Auxiliary in-place mutation capability.
pub trait Transformer {
    /// The keys this stage mutates, with its own policy per key.
    fn transforms(&self) -> Vec<TransformDecl>;

    /// Mutates the stored value for one declared key.
    fn transform(&mut self, key: AuxKey, value: &mut AuxValue);

    /// Reports whether the transformation for a `Sometimes`-policy target
    /// differs from the one last applied. Only consulted for targets
    /// declared `Sometimes`.
    fn changed(&self, key: AuxKey) -> bool {
        let _ = key;
        false
    }
}

/// Auxiliary demand capability.
pub trait Consumer {
    /// The keys this stage requires.
    fn demands(&self) -> KeySet;

    /// Receives one demanded value. Called once per invocation per
    /// available key, before this stage's processing call.
    fn set(&mut self, key: AuxKey, value: &AuxValue);
}

/// A pipeline stage.
///
/// Implementations opt into capabilities by overriding the accessors; every
/// stage except a chain head must expose [`Stage::processor`], and a chain
/// head must expose either [`Stage::source`] or [`Stage::processor`].
pub trait Stage: Debug + Send {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// The niladic source role, if implemented.
    fn source(&mut self) -> Option<&mut dyn Source> {
        None
    }

    /// The processor role, if implemented.
    fn processor(&mut self) -> Option<&mut dyn Processor> {
        None
    }

    /// The generator role, if implemented.
    fn generator(&mut self) -> Option<&mut dyn Generator> {
        None
    }

    /// The transformer role, if implemented.
    fn transformer(&mut self) -> Option<&mut dyn Transformer> {
        None
    }

    /// The consumer role, if implemented.
    fn consumer(&mut self) -> Option<&mut dyn Consumer> {
        None
    }
}

/// A closure-backed processor stage.
pub struct FnProcessor<I, O, F>
where
    I: 'static + Send,
    O: 'static + Send,
    F: FnMut(I) -> anyhow::Result<O> + Send,
{
    name: String,
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnProcessor<I, O, F>
where
    I: 'static + Send,
    O: 'static + Send,
    F: FnMut(I) -> anyhow::Result<O> + Send,
{
    /// Creates a new closure-backed processor stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> Debug for FnProcessor<I, O, F>
where
    I: 'static + Send,
    O: 'static + Send,
    F: FnMut(I) -> anyhow::Result<O> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor").field("name", &self.name).finish()
    }
}

impl<I, O, F> Processor for FnProcessor<I, O, F>
where
    I: 'static + Send,
    O: 'static + Send,
    F: FnMut(I) -> anyhow::Result<O> + Send,
{
    fn input_type(&self) -> ValueType {
        ValueType::of::<I>()
    }

    fn output_type(&self) -> ValueType {
        ValueType::of::<O>()
    }

    fn process(&mut self, input: Payload) -> anyhow::Result<Payload> {
        let input = input.take::<I>()?;
        Ok(Payload::new((self.func)(input)?))
    }
}

impl<I, O, F> Stage for FnProcessor<I, O, F>
where
    I: 'static + Send,
    O: 'static + Send,
    F: FnMut(I) -> anyhow::Result<O> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn processor(&mut self) -> Option<&mut dyn Processor> {
        Some(self)
    }
}

/// An iterator-backed source stage.
///
/// Holds one item of lookahead so that [`Source::is_active`] can answer
/// without advancing the iterator.
pub struct IterSource<I>
where
    I: Iterator + Send,
    I::Item: 'static + Send,
{
    name: String,
    iter: I,
    lookahead: Option<I::Item>,
}

impl<I> IterSource<I>
where
    I: Iterator + Send,
    I::Item: 'static + Send,
{
    /// Creates a source that drains the given iterator.
    pub fn new(name: impl Into<String>, mut iter: I) -> Self {
        let lookahead = iter.next();
        Self {
            name: name.into(),
            iter,
            lookahead,
        }
    }
}

impl<I> Debug for IterSource<I>
where
    I: Iterator + Send,
    I::Item: 'static + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterSource").field("name", &self.name).finish()
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator + Send,
    I::Item: 'static + Send,
{
    fn output_type(&self) -> ValueType {
        ValueType::of::<I::Item>()
    }

    fn produce(&mut self) -> anyhow::Result<Payload> {
        match self.lookahead.take() {
            Some(item) => {
                self.lookahead = self.iter.next();
                Ok(Payload::new(item))
            }
            None => Err(anyhow::anyhow!("source '{}' is exhausted", self.name)),
        }
    }

    fn is_active(&self) -> bool {
        self.lookahead.is_some()
    }
}

impl<I> Stage for IterSource<I>
where
    I: Iterator + Send,
    I::Item: 'static + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(self)
    }
}
