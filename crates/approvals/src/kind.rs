use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crewbook_core::{DomainError, FieldError, ProfileId};

/// What an approval request asks permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Remove the target profile's owner membership.
    OwnerRemoval,
    /// Grant the target profile an owner membership.
    OwnerAddition,
    /// Plain sign-off on an external reference; no side effect.
    SignOff,
}

/// Parsed `target_ref` of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalTarget {
    Profile(ProfileId),
    Reference(String),
}

impl ApprovalTarget {
    /// Canonical stored form. Profile ids are hyphenated lowercase whatever
    /// spelling the caller used, so equal targets compare equal as text.
    pub fn to_ref(&self) -> String {
        match self {
            ApprovalTarget::Profile(p) => p.to_string(),
            ApprovalTarget::Reference(r) => r.clone(),
        }
    }
}

impl ApprovalKind {
    pub const ALL: [ApprovalKind; 3] = [
        ApprovalKind::OwnerRemoval,
        ApprovalKind::OwnerAddition,
        ApprovalKind::SignOff,
    ];

    pub const MAX_REFERENCE_LEN: usize = 200;

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalKind::OwnerRemoval => "owner_removal",
            ApprovalKind::OwnerAddition => "owner_addition",
            ApprovalKind::SignOff => "sign_off",
        }
    }

    /// Whether approval triggers a downstream effect (`approved → applied|failed`).
    pub fn has_effect(&self) -> bool {
        !matches!(self, ApprovalKind::SignOff)
    }

    pub fn parse_target(&self, target_ref: &str) -> Result<ApprovalTarget, FieldError> {
        let target_ref = target_ref.trim();
        match self {
            ApprovalKind::OwnerRemoval | ApprovalKind::OwnerAddition => target_ref
                .parse::<ProfileId>()
                .map(ApprovalTarget::Profile)
                .map_err(|_| FieldError::new("target_ref", "must be a profile id")),
            ApprovalKind::SignOff => {
                if target_ref.is_empty() {
                    Err(FieldError::new("target_ref", "cannot be empty"))
                } else if target_ref.chars().count() > Self::MAX_REFERENCE_LEN {
                    Err(FieldError::new("target_ref", "must be at most 200 characters"))
                } else {
                    Ok(ApprovalTarget::Reference(target_ref.to_string()))
                }
            }
        }
    }
}

impl core::fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| {
                DomainError::validation("kind", "must be one of: owner_removal, owner_addition, sign_off")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_kinds_require_profile_targets() {
        let profile = ProfileId::new();
        assert_eq!(
            ApprovalKind::OwnerRemoval.parse_target(&profile.to_string()),
            Ok(ApprovalTarget::Profile(profile))
        );
        assert!(ApprovalKind::OwnerAddition.parse_target("bob").is_err());
    }

    #[test]
    fn sign_off_accepts_bounded_free_text() {
        assert_eq!(
            ApprovalKind::SignOff.parse_target("  payroll 2026-09  "),
            Ok(ApprovalTarget::Reference("payroll 2026-09".to_string()))
        );
        assert!(ApprovalKind::SignOff.parse_target("   ").is_err());
        assert!(ApprovalKind::SignOff.parse_target(&"x".repeat(201)).is_err());
    }

    #[test]
    fn only_sign_off_is_effect_free() {
        assert!(ApprovalKind::OwnerRemoval.has_effect());
        assert!(ApprovalKind::OwnerAddition.has_effect());
        assert!(!ApprovalKind::SignOff.has_effect());
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        assert!("owner-removal".parse::<ApprovalKind>().is_err());
        assert_eq!("sign_off".parse::<ApprovalKind>().unwrap(), ApprovalKind::SignOff);
    }
}
