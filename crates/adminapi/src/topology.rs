//! Classification of a target instance's place in a replication topology.

use std::fmt;

use shell_core::{codes, query_scalar, SessionError};
use tracing::{debug, warn};

use crate::flags::{flag_enum, FlagSet};
use crate::metadata::MetadataStorage;
use crate::{AdminError, Instance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceType {
    Standalone,
    /// Metadata schema present, instance not registered in it.
    StandaloneWithMetadata,
    /// Registered in the metadata of a cluster, but Group Replication is stopped.
    StandaloneInMetadata,
    /// Group Replication running without matching metadata.
    GroupReplication,
    InnoDBCluster,
    AsyncReplicaSet,
    Unknown,
}

flag_enum!(InstanceType {
    Standalone,
    StandaloneWithMetadata,
    StandaloneInMetadata,
    GroupReplication,
    InnoDBCluster,
    AsyncReplicaSet,
    Unknown,
});

pub type InstanceTypes = FlagSet<InstanceType>;

impl InstanceType {
    /// Types whose members report a role and, for GR, a quorum.
    pub fn is_managed_member(self) -> bool {
        matches!(
            self,
            InstanceType::GroupReplication
                | InstanceType::InnoDBCluster
                | InstanceType::AsyncReplicaSet
        )
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceType::Standalone => "Standalone",
            InstanceType::StandaloneWithMetadata => "StandaloneWithMetadata",
            InstanceType::StandaloneInMetadata => "StandaloneInMetadata",
            InstanceType::GroupReplication => "GroupReplication",
            InstanceType::InnoDBCluster => "InnoDBCluster",
            InstanceType::AsyncReplicaSet => "AsyncReplicaSet",
            InstanceType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Kind of cluster an instance is registered in, as recorded in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    None,
    GroupReplication,
    AsyncReplication,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClusterType::None => "NONE",
            ClusterType::GroupReplication => "GROUP-REPLICATION",
            ClusterType::AsyncReplication => "ASYNC-REPLICATION",
        })
    }
}

/// Combines the three signals into a single classification.
///
/// Metadata presence is consulted before liveness, so a registered cluster
/// member whose Group Replication stopped still reports as managed.
pub fn classify(has_metadata: bool, cluster_type: ClusterType, gr_active: bool) -> InstanceType {
    if !has_metadata {
        return if gr_active {
            InstanceType::GroupReplication
        } else {
            InstanceType::Standalone
        };
    }

    match (cluster_type, gr_active) {
        (ClusterType::GroupReplication, true) => InstanceType::InnoDBCluster,
        (ClusterType::GroupReplication, false) => InstanceType::StandaloneInMetadata,
        (_, true) => InstanceType::GroupReplication,
        (ClusterType::AsyncReplication, false) => InstanceType::AsyncReplicaSet,
        (ClusterType::None, false) => InstanceType::StandaloneWithMetadata,
    }
}

const GR_ACTIVE_QUERY: &str = "SELECT COUNT(*) FROM performance_schema.replication_group_members \
     WHERE MEMBER_ID = @@server_uuid AND MEMBER_STATE IS NOT NULL AND MEMBER_STATE <> 'OFFLINE'";

/// Whether Group Replication is running on the instance.
///
/// A missing table means the plugin was never installed.
pub async fn check_group_replication_active(instance: &mut Instance) -> Result<bool, AdminError> {
    match query_scalar::<i64>(instance.session(), GR_ACTIVE_QUERY).await {
        Ok(count) => {
            let active = count.unwrap_or(0) != 0;
            debug!(
                "Instance type check: {}: GR is {}",
                instance.descr(),
                if active { "active" } else { "installed but not active" }
            );
            Ok(active)
        }
        Err(e) => {
            warn!("Error querying GR member state: {}: {e}", instance.descr());
            match e.code() {
                Some(codes::ER_NO_SUCH_TABLE) => Ok(false),
                Some(codes::ER_TABLEACCESS_DENIED_ERROR) => Err(AdminError::runtime(
                    "Unable to detect target instance state. Please check account privileges.",
                )),
                _ => Err(e.into()),
            }
        }
    }
}

/// Metadata version and the cluster type this instance is registered under.
async fn check_metadata(
    instance: &mut Instance,
    metadata: &dyn MetadataStorage,
) -> Result<Option<ClusterType>, SessionError> {
    let Some(version) = metadata.check_version(instance.session()).await? else {
        return Ok(None);
    };
    debug!(
        "Instance type check: {}: Metadata version {version} found",
        instance.descr()
    );

    let uuid = instance.uuid().to_string();
    let cluster_type = metadata
        .check_instance_type(instance.session(), &uuid, &version)
        .await?;
    match cluster_type {
        ClusterType::None => debug!("Instance {uuid} is not managed"),
        other => debug!("Instance {uuid} is managed for {other}"),
    }
    Ok(Some(cluster_type))
}

/// Classifies the instance behind `instance`.
pub async fn get_instance_type(
    instance: &mut Instance,
    metadata: &dyn MetadataStorage,
) -> Result<InstanceType, AdminError> {
    let cluster_type = check_metadata(instance, metadata).await?;
    let gr_active = check_group_replication_active(instance).await?;

    let has_metadata = cluster_type.is_some();
    let cluster_type = cluster_type.unwrap_or(ClusterType::None);
    let instance_type = classify(has_metadata, cluster_type, gr_active);

    if instance_type == InstanceType::GroupReplication && cluster_type != ClusterType::None {
        warn!(
            "Instance {} is running Group Replication, but does not belong to a InnoDB cluster",
            instance.descr()
        );
    }
    debug_assert!(
        !(cluster_type == ClusterType::AsyncReplication
            && instance_type == InstanceType::StandaloneInMetadata)
    );

    Ok(instance_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_table() {
        use ClusterType as C;
        use InstanceType as T;

        let expected = [
            ((false, C::None, false), T::Standalone),
            ((false, C::None, true), T::GroupReplication),
            ((false, C::GroupReplication, false), T::Standalone),
            ((false, C::GroupReplication, true), T::GroupReplication),
            ((false, C::AsyncReplication, false), T::Standalone),
            ((false, C::AsyncReplication, true), T::GroupReplication),
            ((true, C::None, false), T::StandaloneWithMetadata),
            ((true, C::None, true), T::GroupReplication),
            ((true, C::GroupReplication, false), T::StandaloneInMetadata),
            ((true, C::GroupReplication, true), T::InnoDBCluster),
            ((true, C::AsyncReplication, false), T::AsyncReplicaSet),
            ((true, C::AsyncReplication, true), T::GroupReplication),
        ];

        for ((has_metadata, cluster_type, gr_active), want) in expected {
            assert_eq!(
                classify(has_metadata, cluster_type, gr_active),
                want,
                "has_metadata={has_metadata} cluster_type={cluster_type} gr_active={gr_active}"
            );
        }
    }

    #[test]
    fn test_managed_members() {
        assert!(InstanceType::InnoDBCluster.is_managed_member());
        assert!(InstanceType::AsyncReplicaSet.is_managed_member());
        assert!(!InstanceType::StandaloneInMetadata.is_managed_member());
        let allowed = InstanceType::Standalone | InstanceType::GroupReplication;
        assert!(allowed.contains(InstanceType::GroupReplication));
        assert!(!allowed.contains(InstanceType::InnoDBCluster));
    }
}
