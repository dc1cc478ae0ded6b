//! Capability roles for replication peers.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The capability class of a session.
///
/// Roles are fixed at session creation and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The single peer that owns the replicated state and always
    /// publishes synchronization frames, even empty ones.
    Authoritative,
    /// A peer that both observes state and contributes input.
    #[default]
    Participant,
    /// A receive-only peer; observers cannot register input buffers.
    Observer,
}

impl Role {
    /// Whether this role owns the replicated state.
    #[must_use]
    pub fn is_authoritative(self) -> bool {
        matches!(self, Role::Authoritative)
    }

    /// Whether this role is allowed to register input buffers.
    #[must_use]
    pub fn accepts_input(self) -> bool {
        !matches!(self, Role::Observer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Authoritative => write!(f, "authoritative"),
            Role::Participant => write!(f, "participant"),
            Role::Observer => write!(f, "observer"),
        }
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authoritative" => Ok(Role::Authoritative),
            "participant" => Ok(Role::Participant),
            "observer" => Ok(Role::Observer),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct RoleParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_pairwise_distinct() {
        assert_ne!(Role::Authoritative, Role::Participant);
        assert_ne!(Role::Participant, Role::Observer);
        assert_ne!(Role::Observer, Role::Authoritative);
    }

    #[test]
    fn default_role_is_participant() {
        assert_eq!(Role::default(), Role::Participant);
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in [Role::Authoritative, Role::Participant, Role::Observer] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("coordinator".parse::<Role>().is_err());
    }

    #[test]
    fn observer_rejects_input() {
        assert!(Role::Participant.accepts_input());
        assert!(Role::Authoritative.accepts_input());
        assert!(!Role::Observer.accepts_input());
    }
}
