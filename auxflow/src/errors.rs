//! Error types for the auxflow engine.
//!
//! Assembly-time configuration errors carry a structured, coded diagnostic
//! so misconfigured pipelines fail loudly at construction. Runtime errors
//! abort the invocation that raised them and surface to the caller; no
//! partially-executed invocation ever commits auxiliary state.

use crate::value::AuxKind;
use serde::Serialize;
use thiserror::Error;

/// The main error type for auxflow operations.
#[derive(Debug, Error)]
pub enum AuxflowError {
    /// A pipeline assembly error occurred.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// An invocation error occurred.
    #[error("{0}")]
    Invocation(#[from] InvocationError),
}

/// Structured diagnostic attached to assembly failures.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyErrorInfo {
    /// Error code (e.g. `ASSEMBLY-005-DUP_PRODUCER`).
    pub code: &'static str,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<&'static str>,
}

impl AssemblyErrorInfo {
    /// Creates a new diagnostic.
    #[must_use]
    pub fn new(code: &'static str, summary: impl Into<String>) -> Self {
        Self {
            code,
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: &'static str) -> Self {
        self.fix_hint = Some(hint);
        self
    }
}

/// Error raised when pipeline assembly fails.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AssemblyError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Structured diagnostic.
    pub info: Option<AssemblyErrorInfo>,
}

impl AssemblyError {
    /// Creates a new assembly error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the structured diagnostic.
    #[must_use]
    pub fn with_info(mut self, info: AssemblyErrorInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Returns the diagnostic code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        self.info.as_ref().map(|i| i.code)
    }
}

/// Error raised while running one invocation.
///
/// Any variant aborts the invocation immediately; working-store mutations
/// made before the failure are discarded with it.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// A stage's processing call failed.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        /// The failing stage.
        stage: String,
        /// The stage-reported error.
        #[source]
        source: anyhow::Error,
    },

    /// The caller's input type does not match the head stage's declaration.
    #[error("input type mismatch: pipeline expects {expected}, got {actual}")]
    InputType {
        /// The type declared by the head stage.
        expected: &'static str,
        /// The type the caller supplied.
        actual: &'static str,
    },

    /// The caller's requested output type does not match the tail stage's
    /// declaration.
    #[error("output type mismatch: caller expects {expected}, pipeline produces {actual}")]
    OutputType {
        /// The type the caller requested.
        expected: &'static str,
        /// The type declared by the tail stage.
        actual: &'static str,
    },

    /// `invoke` was called on a source-headed chain.
    #[error("pipeline head '{stage}' is a source and takes no external input; use pump")]
    UnexpectedInput {
        /// The head stage.
        stage: String,
    },

    /// `pump` was called on a chain whose head expects external input.
    #[error("pipeline head '{stage}' expects external input; use invoke")]
    MissingInput {
        /// The head stage.
        stage: String,
    },

    /// A generator produced a value of a kind other than the one it declared.
    #[error("generator for '{key}' produced {actual} but declared {declared}")]
    KindMismatch {
        /// The offending key.
        key: &'static str,
        /// The declared kind.
        declared: AuxKind,
        /// The kind actually produced.
        actual: AuxKind,
    },

    /// An engine invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Primary-value downcast failure.
#[derive(Debug, Clone, Error)]
#[error("payload type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatchError {
    /// The type the caller asked for.
    pub expected: &'static str,
    /// The type the payload holds.
    pub found: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_error_info() {
        let info = AssemblyErrorInfo::new("ASSEMBLY-005-DUP_PRODUCER", "duplicate producer")
            .with_fix_hint("Remove one of the two generators.");

        assert_eq!(info.code, "ASSEMBLY-005-DUP_PRODUCER");
        assert_eq!(info.fix_hint, Some("Remove one of the two generators."));
    }

    #[test]
    fn test_assembly_error_code() {
        let err = AssemblyError::new("boom")
            .with_stages(vec!["a".to_string()])
            .with_info(AssemblyErrorInfo::new("ASSEMBLY-001-EMPTY", "empty"));

        assert_eq!(err.code(), Some("ASSEMBLY-001-EMPTY"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_invocation_error_wraps_stage_failure() {
        let err = InvocationError::Stage {
            stage: "decode".to_string(),
            source: anyhow::anyhow!("bad frame"),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("decode"));
        assert!(rendered.contains("bad frame"));
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: AuxflowError = AssemblyError::new("nope").into();
        assert!(matches!(err, AuxflowError::Assembly(_)));
    }
}
