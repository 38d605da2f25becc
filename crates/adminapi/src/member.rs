//! Role and health of a managed instance.

use std::fmt;

use crate::flags::{flag_enum, FlagSet};

/// Role/health of the target as seen from its own session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    OnlineRW,
    OnlineRO,
    Recovering,
    Unreachable,
    Offline,
    Error,
    Missing,
}

flag_enum!(InstanceState {
    OnlineRW,
    OnlineRO,
    Recovering,
    Unreachable,
    Offline,
    Error,
    Missing,
});

/// Allowed-state mask. "Any" exists only as a mask, never as an observation.
pub type InstanceStates = FlagSet<InstanceState>;

impl InstanceStates {
    pub fn any() -> Self {
        Self::all()
    }

    pub fn online() -> Self {
        InstanceState::OnlineRW | InstanceState::OnlineRO
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstanceState::OnlineRW => "Read/Write",
            InstanceState::OnlineRO => "Read Only",
            InstanceState::Recovering => "Recovering",
            InstanceState::Unreachable => "Unreachable",
            InstanceState::Offline => "Offline",
            InstanceState::Error => "Error",
            InstanceState::Missing => "(Missing)",
        })
    }
}

/// `MEMBER_STATE` of a Group Replication member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Error,
    Unreachable,
    Missing,
}

impl MemberState {
    /// Parses a `MEMBER_STATE` value; empty means the member is missing.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Some(MemberState::Online),
            "RECOVERING" => Some(MemberState::Recovering),
            "OFFLINE" => Some(MemberState::Offline),
            "ERROR" => Some(MemberState::Error),
            "UNREACHABLE" => Some(MemberState::Unreachable),
            "MISSING" | "" => Some(MemberState::Missing),
            _ => None,
        }
    }

    /// Members that cannot take part in a majority vote.
    pub fn is_unavailable(self) -> bool {
        matches!(
            self,
            MemberState::Unreachable | MemberState::Offline | MemberState::Missing
        )
    }

    /// Role of the target given its member state and whether it is primary.
    pub fn to_instance_state(self, is_primary: bool) -> InstanceState {
        match self {
            MemberState::Online if is_primary => InstanceState::OnlineRW,
            MemberState::Online => InstanceState::OnlineRO,
            MemberState::Recovering => InstanceState::Recovering,
            MemberState::Offline => InstanceState::Offline,
            MemberState::Error => InstanceState::Error,
            MemberState::Unreachable => InstanceState::Unreachable,
            MemberState::Missing => InstanceState::Missing,
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberState::Online => "ONLINE",
            MemberState::Recovering => "RECOVERING",
            MemberState::Offline => "OFFLINE",
            MemberState::Error => "ERROR",
            MemberState::Unreachable => "UNREACHABLE",
            MemberState::Missing => "(MISSING)",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::Flag;

    #[test]
    fn test_parse_member_state() {
        assert_eq!(MemberState::parse("online"), Some(MemberState::Online));
        assert_eq!(MemberState::parse(""), Some(MemberState::Missing));
        assert_eq!(MemberState::parse("bogus"), None);
    }

    #[test]
    fn test_online_role_depends_on_primary() {
        assert_eq!(
            MemberState::Online.to_instance_state(true),
            InstanceState::OnlineRW
        );
        assert_eq!(
            MemberState::Online.to_instance_state(false),
            InstanceState::OnlineRO
        );
        assert_eq!(
            MemberState::Recovering.to_instance_state(true),
            InstanceState::Recovering
        );
    }

    #[test]
    fn test_any_mask_contains_every_state() {
        let any = InstanceStates::any();
        for state in InstanceState::ALL {
            assert!(any.contains(*state));
        }
        assert!(!InstanceStates::online().contains(InstanceState::Offline));
    }
}
