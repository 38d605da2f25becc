//! Precondition checks run before every AdminAPI operation.
//!
//! The checker gathers a [`ClusterCheckInfo`] snapshot of the target and
//! compares it against the operation's [`FunctionAvailability`]. Checks run
//! in a fixed order: server version, instance type, instance role, quorum.
//! The first failing check produces the error.

use shell_core::{Console, Version};
use tracing::{debug, info, warn};

use crate::availability::{
    FunctionAvailability, Operation, QuorumRequirement, MAX_ADMINAPI_SERVER_VERSION,
    MIN_ADMINAPI_SERVER_VERSION,
};
use crate::member::InstanceState;
use crate::metadata::{check_metadata_preconditions, MessageCatalog, MetadataState, MetadataStorage};
use crate::quorum::{ensure_not_delayed_starting, MembershipSnapshot, QuorumState, QuorumStates};
use crate::topology::{get_instance_type, InstanceType};
use crate::{AdminError, ErrorCode, Instance};

/// Snapshot of the target used to evaluate preconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCheckInfo {
    pub source_type: InstanceType,
    pub source_state: InstanceState,
    pub quorum: QuorumStates,
    pub source_version: Version,
}

/// Fails unless the session is open and the server is in the supported range.
pub fn validate_session(instance: &Instance) -> Result<(), AdminError> {
    if !instance.is_open() {
        return Err(AdminError::runtime(
            "The session was closed. An open session is required to perform this operation",
        ));
    }

    let version = instance.version();
    if version < MIN_ADMINAPI_SERVER_VERSION || version >= MAX_ADMINAPI_SERVER_VERSION {
        return Err(AdminError::runtime(
            "Unsupported server version: AdminAPI operations require MySQL server versions 5.7 or 8.0",
        ));
    }
    Ok(())
}

/// Role of the target in its group and the quorum it observes.
///
/// A target that cannot judge quorum (not ONLINE itself) reports `Dead`.
async fn get_replication_group_state(
    instance: &mut Instance,
) -> Result<(InstanceState, QuorumStates), AdminError> {
    let snapshot = MembershipSnapshot::query(instance.session()).await?;
    let state = snapshot.state_of(instance.uuid());
    let quorum = match snapshot.quorum_seen_by(instance.uuid()) {
        Ok(quorum) => quorum,
        Err(e) => {
            warn!("Cannot evaluate quorum from {}: {e}", instance.descr());
            QuorumStates::of(QuorumState::Dead)
        }
    };
    Ok((state, quorum))
}

/// Gathers type, role, quorum and version of the target.
pub async fn get_cluster_check_info(
    instance: &mut Instance,
    metadata: &dyn MetadataStorage,
) -> Result<ClusterCheckInfo, AdminError> {
    validate_session(instance)?;

    let source_type = match get_instance_type(instance, metadata).await {
        Ok(instance_type) => instance_type,
        Err(e) if e.is_connection_error() => return Err(e),
        Err(e @ AdminError::Runtime(_)) => return Err(e),
        Err(e) => {
            warn!("Error detecting GR instance: {e}");
            InstanceType::Unknown
        }
    };

    let (source_state, quorum) = match source_type {
        InstanceType::GroupReplication | InstanceType::InnoDBCluster => {
            ensure_not_delayed_starting(instance.session()).await?;
            let (state, mut quorum) = get_replication_group_state(instance).await?;

            if source_type == InstanceType::InnoDBCluster
                && quorum.contains(QuorumState::AllOnline)
                && !metadata.check_all_members_online(instance.session()).await?
            {
                quorum.remove(QuorumState::AllOnline);
            }
            (state, quorum)
        }
        InstanceType::AsyncReplicaSet => {
            let uuid = instance.uuid().to_string();
            let record = metadata
                .get_instance_by_uuid(instance.session(), &uuid)
                .await?
                .ok_or_else(|| {
                    AdminError::runtime(format!(
                        "Instance {} is not registered in the metadata",
                        instance.descr()
                    ))
                })?;
            let state = if record.primary_master {
                InstanceState::OnlineRW
            } else {
                InstanceState::OnlineRO
            };
            (state, QuorumStates::of(QuorumState::Normal))
        }
        _ => (InstanceState::Offline, QuorumStates::of(QuorumState::Normal)),
    };

    Ok(ClusterCheckInfo {
        source_type,
        source_state,
        quorum,
        source_version: instance.version(),
    })
}

const NOT_AVAILABLE: &str = "This function is not available through a session";

fn instance_type_error(
    source_type: InstanceType,
    availability: &FunctionAvailability,
) -> AdminError {
    let allows_replica_set = availability
        .instance_types
        .contains(InstanceType::AsyncReplicaSet);

    let (suffix, code) = match source_type {
        InstanceType::Standalone => (" to a standalone instance", Some(ErrorCode::NotManaged)),
        InstanceType::StandaloneWithMetadata if allows_replica_set => (
            " to a standalone instance (metadata exists, instance does not belong to that metadata)",
            None,
        ),
        InstanceType::StandaloneWithMetadata => (
            " to a standalone instance (metadata exists, instance does not belong to that metadata, and GR is not active)",
            None,
        ),
        InstanceType::StandaloneInMetadata if allows_replica_set => (
            " to a standalone instance (metadata exists, instance belongs to that metadata)",
            Some(ErrorCode::NotOnline),
        ),
        InstanceType::StandaloneInMetadata => (
            " to a standalone instance (metadata exists, instance belongs to that metadata, but GR is not active)",
            Some(ErrorCode::NotOnline),
        ),
        InstanceType::GroupReplication => (
            " to an instance belonging to an unmanaged replication group",
            None,
        ),
        InstanceType::InnoDBCluster => (
            " to an instance already in an InnoDB cluster",
            Some(ErrorCode::ManagedInCluster),
        ),
        InstanceType::AsyncReplicaSet => (
            " to an instance that is a member of an InnoDB ReplicaSet",
            Some(ErrorCode::ManagedInReplicaSet),
        ),
        InstanceType::Unknown => {
            return AdminError::precondition(
                "Unable to detect target instance state. Please see the shell log for more details.",
                None,
            )
        }
    };
    AdminError::precondition(format!("{NOT_AVAILABLE}{suffix}"), code)
}

fn instance_state_error(state: InstanceState) -> AdminError {
    let suffix = match state {
        InstanceState::OnlineRO => " to a read only instance",
        InstanceState::Offline => " to an offline instance",
        InstanceState::Error => " to an instance in error state",
        InstanceState::Recovering => " to a recovering instance",
        InstanceState::Unreachable => " to an unreachable instance",
        InstanceState::OnlineRW | InstanceState::Missing => "",
    };
    AdminError::precondition(format!("{NOT_AVAILABLE}{suffix}"), None)
}

fn quorum_error(observed: QuorumStates, allowed: QuorumStates) -> AdminError {
    if observed.contains(QuorumState::Normal) {
        let message = if allowed.contains(QuorumState::AllOnline) {
            "This operation requires all the cluster members to be ONLINE"
        } else {
            "Unable to perform this operation"
        };
        AdminError::precondition(message, None)
    } else if observed.contains(QuorumState::Quorumless) {
        AdminError::precondition(
            "There is no quorum to perform the operation",
            Some(ErrorCode::GroupHasNoQuorum),
        )
    } else {
        AdminError::precondition("Unable to perform the operation on a dead InnoDB cluster", None)
    }
}

/// Compares `info` against `availability`.
pub fn check_preconditions(
    function_name: &str,
    info: &ClusterCheckInfo,
    availability: &FunctionAvailability,
) -> Result<(), AdminError> {
    debug!(
        "Checking preconditions for {function_name}: type={} state={} quorum={:?} version={}",
        info.source_type, info.source_state, info.quorum, info.source_version
    );

    if info.source_version < availability.min_version {
        return Err(AdminError::precondition(
            format!(
                "Unsupported server version: This AdminAPI operation requires MySQL version {} or newer, but target is {}",
                availability.min_version, info.source_version
            ),
            None,
        ));
    }

    if !availability.instance_types.contains(info.source_type) {
        return Err(instance_type_error(info.source_type, availability));
    }

    if info.source_type.is_managed_member() {
        if !availability.instance_states.contains(info.source_state) {
            return Err(instance_state_error(info.source_state));
        }

        if info.source_type != InstanceType::AsyncReplicaSet {
            if let QuorumRequirement::AnyOf(allowed) = availability.quorum {
                if !allowed.intersects(info.quorum) {
                    return Err(quorum_error(info.quorum, allowed));
                }
            }
        }
    }

    Ok(())
}

/// Full check for `operation`: open session, metadata gate, then the
/// registry or `custom` availability.
///
/// A metadata schema left behind by a failed setup skips the registry
/// check, so the instance can be set up again.
pub async fn check_function_preconditions(
    operation: Operation,
    instance: &mut Instance,
    metadata: &dyn MetadataStorage,
    messages: &dyn MessageCatalog,
    console: &dyn Console,
    custom: Option<&FunctionAvailability>,
) -> Result<ClusterCheckInfo, AdminError> {
    if !instance.is_open() {
        return Err(AdminError::runtime(
            "An open session is required to perform this operation.",
        ));
    }

    let metadata_state =
        check_metadata_preconditions(operation, instance, metadata, messages, console).await?;

    let info = get_cluster_check_info(instance, metadata).await?;

    if metadata_state == MetadataState::FailedSetup {
        info!(
            "Skipping preconditions for {operation}: metadata setup did not complete on {}",
            instance.descr()
        );
    } else {
        let registered;
        let availability = match custom {
            Some(custom) => custom,
            None => {
                registered = operation.availability();
                &registered
            }
        };
        check_preconditions(operation.name(), &info, availability)?;
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::InstanceStates;
    use crate::topology::InstanceTypes;

    fn info(source_type: InstanceType, source_state: InstanceState, quorum: QuorumStates) -> ClusterCheckInfo {
        ClusterCheckInfo {
            source_type,
            source_state,
            quorum,
            source_version: Version::new(8, 0, 36),
        }
    }

    fn normal_all_online() -> QuorumStates {
        QuorumState::Normal | QuorumState::AllOnline
    }

    fn message(result: Result<(), AdminError>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_add_instance_on_healthy_primary() {
        let availability = Operation::ClusterAddInstance.availability();
        let info = info(InstanceType::InnoDBCluster, InstanceState::OnlineRW, normal_all_online());
        check_preconditions("Cluster.addInstance", &info, &availability).unwrap();
    }

    #[test]
    fn test_version_too_old() {
        let availability = Operation::CreateReplicaSet.availability();
        let mut info = info(InstanceType::Standalone, InstanceState::Offline, normal_all_online());
        info.source_version = Version::new(8, 0, 4);
        assert_eq!(
            message(check_preconditions("Dba.createReplicaSet", &info, &availability)),
            "Unsupported server version: This AdminAPI operation requires MySQL version 8.0.11 or newer, but target is 8.0.4"
        );
    }

    #[test]
    fn test_type_errors_carry_codes() {
        let availability = Operation::ClusterAddInstance.availability();

        let err = check_preconditions(
            "Cluster.addInstance",
            &info(InstanceType::AsyncReplicaSet, InstanceState::OnlineRW, normal_all_online()),
            &availability,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "This function is not available through a session to an instance that is a member of an InnoDB ReplicaSet"
        );
        assert_eq!(err.code(), Some(ErrorCode::ManagedInReplicaSet));

        let err = check_preconditions(
            "Cluster.addInstance",
            &info(InstanceType::StandaloneInMetadata, InstanceState::Offline, normal_all_online()),
            &availability,
        )
        .unwrap_err();
        assert!(err.to_string().ends_with("belongs to that metadata, but GR is not active)"));
        assert_eq!(err.code(), Some(ErrorCode::NotOnline));

        let err = check_preconditions(
            "Cluster.addInstance",
            &info(InstanceType::Unknown, InstanceState::Offline, normal_all_online()),
            &availability,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to detect target instance state. Please see the shell log for more details."
        );
    }

    #[test]
    fn test_standalone_with_metadata_wording_depends_on_mask() {
        let availability = Operation::GetCluster.availability();
        let info = info(InstanceType::StandaloneWithMetadata, InstanceState::Offline, normal_all_online());
        let err = check_preconditions("Dba.getCluster", &info, &availability).unwrap_err();
        assert!(err
            .to_string()
            .ends_with("does not belong to that metadata, and GR is not active)"));
        assert_eq!(err.code(), None);

        let availability = Operation::GetReplicaSet.availability();
        let err = check_preconditions("Dba.getReplicaSet", &info, &availability).unwrap_err();
        assert!(err.to_string().ends_with("does not belong to that metadata)"));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_read_only_member_rejected_for_dissolve() {
        let availability = Operation::ReplicaSetDissolve.availability();
        let info = info(InstanceType::AsyncReplicaSet, InstanceState::OnlineRO, normal_all_online());
        assert_eq!(
            message(check_preconditions("ReplicaSet.dissolve", &info, &availability)),
            "This function is not available through a session to a read only instance"
        );
    }

    #[test]
    fn test_quorum_errors() {
        let availability = Operation::ClusterAddInstance.availability();
        let err = check_preconditions(
            "Cluster.addInstance",
            &info(InstanceType::InnoDBCluster, InstanceState::OnlineRW, QuorumStates::of(QuorumState::Quorumless)),
            &availability,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "There is no quorum to perform the operation");
        assert_eq!(err.code(), Some(ErrorCode::GroupHasNoQuorum));

        let availability = Operation::ClusterSetPrimaryInstance.availability();
        assert_eq!(
            message(check_preconditions(
                "Cluster.setPrimaryInstance",
                &info(InstanceType::InnoDBCluster, InstanceState::OnlineRW, QuorumStates::of(QuorumState::Normal)),
                &availability,
            )),
            "This operation requires all the cluster members to be ONLINE"
        );

        let availability = Operation::ClusterForceQuorumUsingPartitionOf.availability();
        check_preconditions(
            "Cluster.forceQuorumUsingPartitionOf",
            &info(InstanceType::InnoDBCluster, InstanceState::OnlineRW, QuorumStates::of(QuorumState::Quorumless)),
            &availability,
        )
        .unwrap();
    }

    #[test]
    fn test_dead_cluster_with_custom_availability() {
        let custom = FunctionAvailability {
            min_version: Version::new(5, 7, 0),
            instance_types: InstanceTypes::of(InstanceType::InnoDBCluster),
            quorum: QuorumRequirement::of(QuorumState::Normal),
            instance_states: InstanceStates::any(),
            metadata_validations: Vec::new(),
        };
        assert_eq!(
            message(check_preconditions(
                "Cluster.custom",
                &info(InstanceType::InnoDBCluster, InstanceState::Recovering, QuorumStates::of(QuorumState::Dead)),
                &custom,
            )),
            "Unable to perform the operation on a dead InnoDB cluster"
        );
    }

    #[test]
    fn test_quorum_ignored_for_replica_sets() {
        let mut availability = Operation::ReplicaSetStatus.availability();
        availability.quorum = QuorumRequirement::of(QuorumState::AllOnline);
        let info = info(InstanceType::AsyncReplicaSet, InstanceState::OnlineRO, QuorumStates::of(QuorumState::Normal));
        check_preconditions("ReplicaSet.status", &info, &availability).unwrap();
    }
}
