//! Which operations may run against which instance, role, quorum and
//! metadata state.
//!
//! The registry is a match over the closed [`Operation`] enum, so every
//! operation has an entry by construction.

use std::fmt;
use std::str::FromStr;

use shell_core::Version;

use crate::member::{InstanceState, InstanceStates};
use crate::metadata::{
    MdsAction, MetadataStates, COMPATIBLE_LOWER, FAILED_SETUP, INCOMPATIBLE,
    INCOMPATIBLE_OR_UPGRADING, MAJOR_HIGHER, MAJOR_LOWER, UPGRADE_IN_PROGRESS, UPGRADE_STATES,
};
use crate::quorum::{QuorumState, QuorumStates};
use crate::topology::{InstanceType, InstanceTypes};
use crate::AdminError;

pub const MIN_GR_VERSION: Version = Version::new(5, 7, 0);
pub const MIN_AR_VERSION: Version = Version::new(8, 0, 11);
pub const MIN_ADMINAPI_SERVER_VERSION: Version = Version::new(5, 7, 0);
/// First server version no longer supported.
pub const MAX_ADMINAPI_SERVER_VERSION: Version = Version::new(8, 1, 0);

/// Quorum requirement of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumRequirement {
    /// Async replica sets have no quorum.
    NotApplicable,
    AnyOf(QuorumStates),
}

impl QuorumRequirement {
    pub fn any() -> Self {
        QuorumRequirement::AnyOf(QuorumStates::all())
    }

    pub fn of(state: QuorumState) -> Self {
        QuorumRequirement::AnyOf(QuorumStates::of(state))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataValidation {
    pub states: MetadataStates,
    pub action: MdsAction,
}

impl MetadataValidation {
    pub const fn new(states: MetadataStates, action: MdsAction) -> Self {
        Self { states, action }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAvailability {
    pub min_version: Version,
    pub instance_types: InstanceTypes,
    pub quorum: QuorumRequirement,
    pub instance_states: InstanceStates,
    /// Applied in order by the metadata gate.
    pub metadata_validations: Vec<MetadataValidation>,
}

macro_rules! operations {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// An AdminAPI operation guarded by preconditions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($variant),+
        }

        impl Operation {
            pub const ALL: &'static [Operation] = &[$(Operation::$variant),+];

            /// `Class.method` name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Operation::$variant => $name),+
                }
            }
        }
    };
}

operations! {
    CreateCluster => "Dba.createCluster",
    GetCluster => "Dba.getCluster",
    DropMetadataSchema => "Dba.dropMetadataSchema",
    RebootClusterFromCompleteOutage => "Dba.rebootClusterFromCompleteOutage",
    ConfigureLocalInstance => "Dba.configureLocalInstance",
    CheckInstanceConfiguration => "Dba.checkInstanceConfiguration",
    ConfigureInstance => "Dba.configureInstance",
    UpgradeMetadata => "Dba.upgradeMetadata",
    ConfigureReplicaSetInstance => "Dba.configureReplicaSetInstance",
    CreateReplicaSet => "Dba.createReplicaSet",
    GetReplicaSet => "Dba.getReplicaSet",

    ClusterAddInstance => "Cluster.addInstance",
    ClusterRemoveInstance => "Cluster.removeInstance",
    ClusterRejoinInstance => "Cluster.rejoinInstance",
    ClusterDescribe => "Cluster.describe",
    ClusterStatus => "Cluster.status",
    ClusterResetRecoveryAccountsPassword => "Cluster.resetRecoveryAccountsPassword",
    ClusterOptions => "Cluster.options",
    ClusterDissolve => "Cluster.dissolve",
    ClusterCheckInstanceState => "Cluster.checkInstanceState",
    ClusterRescan => "Cluster.rescan",
    ClusterForceQuorumUsingPartitionOf => "Cluster.forceQuorumUsingPartitionOf",
    ClusterSwitchToSinglePrimaryMode => "Cluster.switchToSinglePrimaryMode",
    ClusterSwitchToMultiPrimaryMode => "Cluster.switchToMultiPrimaryMode",
    ClusterSetPrimaryInstance => "Cluster.setPrimaryInstance",
    ClusterSetOption => "Cluster.setOption",
    ClusterSetInstanceOption => "Cluster.setInstanceOption",
    ClusterListRouters => "Cluster.listRouters",
    ClusterRemoveRouterMetadata => "Cluster.removeRouterMetadata",
    ClusterSetupAdminAccount => "Cluster.setupAdminAccount",
    ClusterSetupRouterAccount => "Cluster.setupRouterAccount",

    ReplicaSetAddInstance => "ReplicaSet.addInstance",
    ReplicaSetRejoinInstance => "ReplicaSet.rejoinInstance",
    ReplicaSetRemoveInstance => "ReplicaSet.removeInstance",
    ReplicaSetDescribe => "ReplicaSet.describe",
    ReplicaSetStatus => "ReplicaSet.status",
    ReplicaSetDissolve => "ReplicaSet.dissolve",
    ReplicaSetCheckInstanceState => "ReplicaSet.checkInstanceState",
    ReplicaSetSetPrimaryInstance => "ReplicaSet.setPrimaryInstance",
    ReplicaSetForcePrimaryInstance => "ReplicaSet.forcePrimaryInstance",
    ReplicaSetListRouters => "ReplicaSet.listRouters",
    ReplicaSetRemoveRouterMetadata => "ReplicaSet.removeRouterMetadata",
    ReplicaSetSetupAdminAccount => "ReplicaSet.setupAdminAccount",
    ReplicaSetSetupRouterAccount => "ReplicaSet.setupRouterAccount",
    ReplicaSetSetOption => "ReplicaSet.setOption",
    ReplicaSetSetInstanceOption => "ReplicaSet.setInstanceOption",
    ReplicaSetOptions => "ReplicaSet.options",
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| AdminError::runtime(format!("Unknown AdminAPI operation '{s}'")))
    }
}

fn validations(list: &[(MetadataStates, MdsAction)]) -> Vec<MetadataValidation> {
    list.iter()
        .map(|(states, action)| MetadataValidation::new(*states, *action))
        .collect()
}

impl Operation {
    pub fn availability(self) -> FunctionAvailability {
        use InstanceType as T;
        use MdsAction::*;
        use Operation::*;

        let any_state = InstanceStates::any();
        let online = InstanceStates::online();
        let any_quorum = QuorumRequirement::any();
        let normal = QuorumRequirement::of(QuorumState::Normal);
        let all_online = QuorumRequirement::of(QuorumState::AllOnline);
        let na = QuorumRequirement::NotApplicable;

        let raise_incompatible = validations(&[(INCOMPATIBLE_OR_UPGRADING, RaiseError)]);
        let raise_upgrading = validations(&[(UPGRADE_STATES, RaiseError)]);

        let (min_version, instance_types, quorum, instance_states, metadata_validations) =
            match self {
                CreateCluster => (
                    MIN_GR_VERSION,
                    T::Standalone | T::StandaloneWithMetadata | T::GroupReplication,
                    any_quorum,
                    any_state,
                    validations(&[
                        (INCOMPATIBLE_OR_UPGRADING, RaiseError),
                        (COMPATIBLE_LOWER, Note),
                        (FAILED_SETUP, None),
                    ]),
                ),
                GetCluster => (
                    MIN_GR_VERSION,
                    InstanceTypes::of(T::InnoDBCluster),
                    any_quorum,
                    any_state,
                    validations(&[
                        (UPGRADE_STATES, RaiseError),
                        (INCOMPATIBLE, Warn),
                        (COMPATIBLE_LOWER, Note),
                    ]),
                ),
                DropMetadataSchema => (
                    MIN_ADMINAPI_SERVER_VERSION,
                    T::StandaloneWithMetadata
                        | T::StandaloneInMetadata
                        | T::InnoDBCluster
                        | T::AsyncReplicaSet,
                    normal,
                    online,
                    Vec::new(),
                ),
                RebootClusterFromCompleteOutage => (
                    MIN_GR_VERSION,
                    T::StandaloneInMetadata | T::InnoDBCluster,
                    any_quorum,
                    online,
                    validations(&[
                        (UPGRADE_STATES, RaiseError),
                        (MAJOR_HIGHER, RaiseError),
                        (MAJOR_LOWER, Warn),
                        (COMPATIBLE_LOWER, Note),
                    ]),
                ),
                ConfigureLocalInstance | CheckInstanceConfiguration => (
                    MIN_GR_VERSION,
                    T::Standalone
                        | T::StandaloneWithMetadata
                        | T::StandaloneInMetadata
                        | T::InnoDBCluster
                        | T::GroupReplication
                        | T::Unknown,
                    any_quorum,
                    any_state,
                    Vec::new(),
                ),
                ConfigureInstance => (
                    MIN_GR_VERSION,
                    T::Standalone
                        | T::StandaloneWithMetadata
                        | T::StandaloneInMetadata
                        | T::GroupReplication
                        | T::InnoDBCluster,
                    any_quorum,
                    any_state,
                    Vec::new(),
                ),
                UpgradeMetadata => (
                    MIN_GR_VERSION,
                    T::InnoDBCluster | T::AsyncReplicaSet,
                    all_online,
                    any_state,
                    validations(&[(UPGRADE_IN_PROGRESS, RaiseError)]),
                ),
                ConfigureReplicaSetInstance => (
                    MIN_AR_VERSION,
                    T::Standalone
                        | T::StandaloneWithMetadata
                        | T::StandaloneInMetadata
                        | T::AsyncReplicaSet
                        | T::Unknown,
                    na,
                    any_state,
                    Vec::new(),
                ),
                CreateReplicaSet => (
                    MIN_AR_VERSION,
                    T::Standalone | T::StandaloneWithMetadata,
                    na,
                    any_state,
                    validations(&[
                        (INCOMPATIBLE_OR_UPGRADING, RaiseError),
                        (COMPATIBLE_LOWER, Note),
                    ]),
                ),
                GetReplicaSet => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    any_state,
                    validations(&[
                        (UPGRADE_STATES, RaiseError),
                        (INCOMPATIBLE, Warn),
                        (COMPATIBLE_LOWER, Note),
                    ]),
                ),

                ClusterAddInstance
                | ClusterRemoveInstance
                | ClusterRejoinInstance
                | ClusterResetRecoveryAccountsPassword
                | ClusterDissolve
                | ClusterRescan
                | ClusterSetInstanceOption => (
                    MIN_GR_VERSION,
                    InstanceTypes::of(T::InnoDBCluster),
                    normal,
                    online,
                    raise_incompatible,
                ),
                ClusterDescribe
                | ClusterStatus
                | ClusterOptions
                | ClusterListRouters
                | ClusterRemoveRouterMetadata => (
                    MIN_GR_VERSION,
                    InstanceTypes::of(T::InnoDBCluster),
                    any_quorum,
                    any_state,
                    raise_upgrading,
                ),
                ClusterCheckInstanceState | ClusterSetupAdminAccount | ClusterSetupRouterAccount => (
                    MIN_GR_VERSION,
                    InstanceTypes::of(T::InnoDBCluster),
                    normal,
                    online,
                    raise_upgrading,
                ),
                ClusterForceQuorumUsingPartitionOf => (
                    MIN_GR_VERSION,
                    T::GroupReplication | T::InnoDBCluster,
                    any_quorum,
                    online,
                    validations(&[(UPGRADE_STATES, RaiseError), (MAJOR_HIGHER, RaiseError)]),
                ),
                ClusterSwitchToSinglePrimaryMode
                | ClusterSwitchToMultiPrimaryMode
                | ClusterSetPrimaryInstance
                | ClusterSetOption => (
                    MIN_GR_VERSION,
                    InstanceTypes::of(T::InnoDBCluster),
                    all_online,
                    online,
                    raise_incompatible,
                ),

                ReplicaSetAddInstance
                | ReplicaSetRejoinInstance
                | ReplicaSetRemoveInstance
                | ReplicaSetSetOption
                | ReplicaSetSetInstanceOption => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    online,
                    raise_incompatible,
                ),
                ReplicaSetDissolve => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    InstanceStates::of(InstanceState::OnlineRW),
                    raise_incompatible,
                ),
                ReplicaSetSetPrimaryInstance | ReplicaSetForcePrimaryInstance => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    any_state,
                    raise_incompatible,
                ),
                ReplicaSetDescribe
                | ReplicaSetStatus
                | ReplicaSetListRouters
                | ReplicaSetRemoveRouterMetadata
                | ReplicaSetOptions => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    any_state,
                    raise_upgrading,
                ),
                ReplicaSetCheckInstanceState => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    online,
                    Vec::new(),
                ),
                ReplicaSetSetupAdminAccount | ReplicaSetSetupRouterAccount => (
                    MIN_AR_VERSION,
                    InstanceTypes::of(T::AsyncReplicaSet),
                    na,
                    online,
                    raise_upgrading,
                ),
            };

        FunctionAvailability {
            min_version,
            instance_types,
            quorum,
            instance_states,
            metadata_validations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_for_every_operation() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), *op);
            assert!(op.name().contains('.'), "{op} is not Class.method");
        }
        assert!("Cluster.nope".parse::<Operation>().is_err());
    }

    #[test]
    fn test_every_operation_allows_some_instance() {
        for op in Operation::ALL {
            let availability = op.availability();
            assert!(!availability.instance_types.is_empty(), "{op}");
            assert!(!availability.instance_states.is_empty(), "{op}");
        }
    }

    #[test]
    fn test_replica_set_operations_skip_quorum() {
        for op in Operation::ALL.iter().filter(|op| op.name().starts_with("ReplicaSet.")) {
            assert_eq!(op.availability().quorum, QuorumRequirement::NotApplicable, "{op}");
        }
        assert_eq!(
            Operation::ClusterAddInstance.availability().quorum,
            QuorumRequirement::of(QuorumState::Normal)
        );
    }

    #[test]
    fn test_mode_switches_require_all_members_online() {
        for op in [
            Operation::ClusterSwitchToSinglePrimaryMode,
            Operation::ClusterSwitchToMultiPrimaryMode,
            Operation::ClusterSetPrimaryInstance,
            Operation::ClusterSetOption,
            Operation::UpgradeMetadata,
        ] {
            assert_eq!(op.availability().quorum, QuorumRequirement::of(QuorumState::AllOnline));
        }
    }

    #[test]
    fn test_create_cluster_metadata_rules_in_order() {
        let rules = Operation::CreateCluster.availability().metadata_validations;
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].action, MdsAction::RaiseError);
        assert_eq!(rules[1].action, MdsAction::Note);
        assert_eq!(rules[2], MetadataValidation::new(FAILED_SETUP, MdsAction::None));
    }
}
