//! Update policies and the caching/freshness decision logic.
//!
//! The decision functions here are deliberately free of any stage machinery
//! so the policy branches can be tested on their own.

use serde::Serialize;
use std::fmt;

/// Hint for when an auxiliary datum must be recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Computed once; thereafter immutable for the pipeline instance.
    Never,
    /// Recomputed only when the producer or a transformer signals a change.
    Sometimes,
    /// Recomputed on every invocation.
    Always,
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::Sometimes => f.write_str("sometimes"),
            Self::Always => f.write_str("always"),
        }
    }
}

/// Decides whether a generated key can be hoisted into the baseline store.
///
/// A key qualifies iff its producer declared it `Never`, at least one later
/// stage demands it, and no later transformer declares it under a
/// `Sometimes` or `Always` policy (such a key cannot be frozen yet).
pub(crate) fn hoistable(
    policy: UpdatePolicy,
    later_transform_policies: &[UpdatePolicy],
    demanded_later: bool,
) -> bool {
    policy == UpdatePolicy::Never
        && demanded_later
        && !later_transform_policies
            .iter()
            .any(|p| matches!(p, UpdatePolicy::Sometimes | UpdatePolicy::Always))
}

/// Decides whether a key must be computed at its producing stage during the
/// current invocation.
///
/// `producer_fresh` is the producer's `has_new_data` answer (only meaningful
/// for `Sometimes`), `transformer_signaled` is true when a downstream
/// `Sometimes` transformer of the same key reported a change, and `frozen`
/// is true once a deferred `Never` value has been committed.
pub(crate) fn should_generate(
    policy: UpdatePolicy,
    producer_fresh: bool,
    transformer_signaled: bool,
    frozen: bool,
) -> bool {
    match policy {
        UpdatePolicy::Always => true,
        UpdatePolicy::Sometimes => producer_fresh || transformer_signaled,
        UpdatePolicy::Never => !frozen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hoistable_requires_never_policy() {
        assert!(hoistable(UpdatePolicy::Never, &[], true));
        assert!(!hoistable(UpdatePolicy::Always, &[], true));
        assert!(!hoistable(UpdatePolicy::Sometimes, &[], true));
    }

    #[test]
    fn test_hoistable_requires_a_downstream_demand() {
        assert!(!hoistable(UpdatePolicy::Never, &[], false));
    }

    #[test]
    fn test_hoistable_blocked_by_mutable_transformers() {
        assert!(!hoistable(
            UpdatePolicy::Never,
            &[UpdatePolicy::Always],
            true
        ));
        assert!(!hoistable(
            UpdatePolicy::Never,
            &[UpdatePolicy::Never, UpdatePolicy::Sometimes],
            true
        ));
    }

    #[test]
    fn test_hoistable_allows_constant_transformers() {
        assert!(hoistable(UpdatePolicy::Never, &[UpdatePolicy::Never], true));
    }

    #[test]
    fn test_always_generates_every_invocation() {
        assert!(should_generate(UpdatePolicy::Always, false, false, false));
        assert!(should_generate(UpdatePolicy::Always, true, true, false));
    }

    #[test]
    fn test_sometimes_needs_a_freshness_signal() {
        assert!(!should_generate(UpdatePolicy::Sometimes, false, false, false));
        assert!(should_generate(UpdatePolicy::Sometimes, true, false, false));
        assert!(should_generate(UpdatePolicy::Sometimes, false, true, false));
    }

    #[test]
    fn test_never_generates_until_frozen() {
        assert!(should_generate(UpdatePolicy::Never, false, false, false));
        assert!(!should_generate(UpdatePolicy::Never, false, false, true));
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(UpdatePolicy::Never.to_string(), "never");
        assert_eq!(UpdatePolicy::Sometimes.to_string(), "sometimes");
        assert_eq!(UpdatePolicy::Always.to_string(), "always");
    }
}
