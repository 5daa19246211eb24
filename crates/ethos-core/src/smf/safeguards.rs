//! Immutable safeguards.
//!
//! A small closed set of booleans, all true, never configurable and never
//! reachable from the data path. Validation runs before a proposal is
//! persisted and again before execution; a proposal that names a safeguard
//! or tries to downgrade consent on a constitutive edge is rejected.

use crate::error::CoreError;
use crate::smf::ApprovalLevel;

/// The safeguard set. Part of the schema, not of the configuration.
pub const IMMUTABLE_SAFEGUARDS: [(&str, bool); 4] = [
    ("constitutive_edges_require_bilateral_consent", true),
    ("smf_cannot_modify_safeguards", true),
    ("audit_log_always_on", true),
    ("neutral_proposal_framing", true),
];

/// Actions that target safeguard machinery by name
const FORBIDDEN_ACTIONS: [&str; 6] = [
    "modify_safeguards",
    "disable_safeguards",
    "disable_audit",
    "disable_audit_log",
    "disable_neutral_framing",
    "bypass_consent",
];

pub fn is_safeguard(name: &str) -> bool {
    IMMUTABLE_SAFEGUARDS.iter().any(|(n, _)| *n == name)
}

/// Reject proposals that touch safeguards or downgrade consent.
pub fn validate_safeguards(
    action: &str,
    has_constitutive_edge: bool,
    approval_level: ApprovalLevel,
) -> Result<(), CoreError> {
    let normalized = action.to_lowercase();

    if normalized.contains("safeguard") || FORBIDDEN_ACTIONS.contains(&normalized.as_str()) {
        return Err(CoreError::Safeguard(format!(
            "SAFEGUARD_VIOLATION: SMF cannot modify safeguards (action '{action}')"
        )));
    }

    if has_constitutive_edge && approval_level != ApprovalLevel::Bilateral {
        return Err(CoreError::Safeguard(
            "SAFEGUARD_VIOLATION: constitutive edges require bilateral consent".to_string(),
        ));
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
