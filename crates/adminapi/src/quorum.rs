//! Quorum evaluation for a replication group.

use shell_core::{query_scalar, Session};
use tracing::debug;

use crate::flags::{flag_enum, FlagSet};
use crate::member::{InstanceState, MemberState};
use crate::AdminError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuorumState {
    /// A majority of members is reachable.
    Normal,
    /// Every member is ONLINE. Only ever set together with `Normal`.
    AllOnline,
    Quorumless,
    Dead,
}

flag_enum!(QuorumState {
    Normal,
    AllOnline,
    Quorumless,
    Dead,
});

/// Observed quorum (possibly `Normal | AllOnline`) or an allowed-quorum mask.
pub type QuorumStates = FlagSet<QuorumState>;

/// Quorum of a group of `total` members of which `unavailable` cannot vote.
pub fn evaluate_quorum(total: usize, unavailable: usize) -> QuorumStates {
    if total == 0 || unavailable >= total {
        return QuorumStates::of(QuorumState::Dead);
    }

    if total - unavailable > total / 2 {
        let mut quorum = QuorumStates::of(QuorumState::Normal);
        if unavailable == 0 {
            quorum |= QuorumState::AllOnline;
        }
        quorum
    } else {
        QuorumStates::of(QuorumState::Quorumless)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub uuid: String,
    pub host: String,
    pub port: u32,
    pub state: MemberState,
    pub primary: bool,
}

/// Group membership as reported by one member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub members: Vec<GroupMember>,
}

const MEMBERS_QUERY: &str = "SELECT MEMBER_ID, MEMBER_HOST, MEMBER_PORT, MEMBER_STATE, \
     IF(@@group_replication_single_primary_mode = 0 OR MEMBER_ID = \
     (SELECT VARIABLE_VALUE FROM performance_schema.global_status \
     WHERE VARIABLE_NAME = 'group_replication_primary_member'), 1, 0) AS IS_PRIMARY \
     FROM performance_schema.replication_group_members ORDER BY MEMBER_ID";

const DELAYED_START_QUERY: &str = "SELECT COUNT(*) FROM performance_schema.threads \
     WHERE NAME = 'thread/group_rpl/THD_delayed_initialization'";

impl MembershipSnapshot {
    pub async fn query(session: &mut dyn Session) -> Result<Self, AdminError> {
        let result = session.query(MEMBERS_QUERY).await?;
        let mut members = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let uuid: String = row.get(0)?;
            let state_text = row.get::<Option<String>>(3)?.unwrap_or_default();
            let state = MemberState::parse(&state_text).ok_or_else(|| {
                AdminError::runtime(format!(
                    "Unexpected state '{state_text}' for group member {uuid}"
                ))
            })?;
            members.push(GroupMember {
                uuid,
                host: row.get::<Option<String>>(1)?.unwrap_or_default(),
                port: row.get::<Option<u64>>(2)?.unwrap_or(0) as u32,
                state,
                primary: row.get::<Option<bool>>(4)?.unwrap_or(false),
            });
        }
        Ok(Self { members })
    }

    pub fn member(&self, uuid: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.uuid == uuid)
    }

    pub fn unavailable(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.state.is_unavailable())
            .count()
    }

    /// Quorum as seen by the member `uuid`.
    ///
    /// Only an ONLINE member gives a meaningful view of the rest of the group.
    pub fn quorum_seen_by(&self, uuid: &str) -> Result<QuorumStates, AdminError> {
        let me = self
            .member(uuid)
            .filter(|m| m.state != MemberState::Missing)
            .ok_or_else(|| AdminError::runtime("Target member appears to not be in a group"))?;
        if me.state != MemberState::Online {
            return Err(AdminError::runtime(format!(
                "Target member is in state {}",
                me.state
            )));
        }

        let mut quorum = evaluate_quorum(self.members.len(), self.unavailable());
        if self.members.iter().any(|m| m.state != MemberState::Online) {
            quorum.remove(QuorumState::AllOnline);
        }
        Ok(quorum)
    }

    /// Role of member `uuid`, `Missing` if it is not part of the group.
    pub fn state_of(&self, uuid: &str) -> InstanceState {
        self.member(uuid)
            .map(|m| m.state.to_instance_state(m.primary))
            .unwrap_or(InstanceState::Missing)
    }
}

/// Whether the group has quorum from the point of view of `uuid`.
pub async fn has_quorum(session: &mut dyn Session, uuid: &str) -> Result<bool, AdminError> {
    let snapshot = MembershipSnapshot::query(session).await?;
    Ok(snapshot
        .quorum_seen_by(uuid)?
        .contains(QuorumState::Normal))
}

/// Fails while Group Replication is still in its delayed start-up.
pub async fn ensure_not_delayed_starting(session: &mut dyn Session) -> Result<(), AdminError> {
    let starting = query_scalar::<i64>(session, DELAYED_START_QUERY)
        .await?
        .unwrap_or(0)
        > 0;
    if starting {
        debug!("Group Replication delayed initialization thread found");
        return Err(AdminError::runtime(
            "Cannot perform operation while group replication is starting up",
        ));
    }
    Ok(())
}
