use async_trait::async_trait;
use shell_core::sql::quote_string;
use shell_core::{codes, query_scalar, Session, SessionError, Version};
use tracing::debug;

use super::{compare_versions, InstanceMetadata, MetadataState, MetadataStorage, CURRENT_VERSION};
use crate::topology::ClusterType;

const VERSION_QUERY: &str =
    "SELECT `major`, `minor`, `patch` FROM mysql_innodb_cluster_metadata.schema_version";
const UPGRADE_LOCK_QUERY: &str =
    "SELECT IS_USED_LOCK('mysql_innodb_cluster_metadata.upgrade_in_progress')";
const BACKUP_SCHEMA_QUERY: &str = "SELECT COUNT(*) FROM information_schema.SCHEMATA \
     WHERE SCHEMA_NAME = 'mysql_innodb_cluster_metadata_bkp'";

/// Version reported while a setup or upgrade is half done.
const MARKER_VERSION: Version = Version::new(0, 0, 0);

fn parse_cluster_type(value: Option<String>) -> ClusterType {
    match value.as_deref() {
        Some("gr") => ClusterType::GroupReplication,
        Some("ar") => ClusterType::AsyncReplication,
        _ => ClusterType::None,
    }
}

/// [`MetadataStorage`] reading `mysql_innodb_cluster_metadata` on the target.
#[derive(Debug, Clone, Copy)]
pub struct SchemaMetadataStorage {
    supported: Version,
}

impl Default for SchemaMetadataStorage {
    fn default() -> Self {
        Self {
            supported: CURRENT_VERSION,
        }
    }
}

impl SchemaMetadataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supported_version(supported: Version) -> Self {
        Self { supported }
    }
}

#[async_trait]
impl MetadataStorage for SchemaMetadataStorage {
    async fn check_version(&self, session: &mut dyn Session) -> Result<Option<Version>, SessionError> {
        match session.query(VERSION_QUERY).await {
            Ok(result) => match result.first() {
                Some(row) => Ok(Some(Version::new(
                    row.get::<u64>(0)? as u32,
                    row.get::<u64>(1)? as u32,
                    row.get::<u64>(2)? as u32,
                ))),
                None => Ok(None),
            },
            Err(e) if matches!(e.code(), Some(codes::ER_NO_SUCH_TABLE | codes::ER_BAD_DB_ERROR)) => {
                debug!("No metadata schema on {}: {e}", session.describe());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn check_instance_type(
        &self,
        session: &mut dyn Session,
        uuid: &str,
        version: &Version,
    ) -> Result<ClusterType, SessionError> {
        let query = if version.major == 1 {
            format!(
                "SELECT 'gr' FROM mysql_innodb_cluster_metadata.instances \
                 WHERE mysql_server_uuid = {}",
                quote_string(uuid)
            )
        } else {
            format!(
                "SELECT c.cluster_type FROM mysql_innodb_cluster_metadata.v2_instances i \
                 JOIN mysql_innodb_cluster_metadata.v2_clusters c ON c.cluster_id = i.cluster_id \
                 WHERE i.mysql_server_uuid = {}",
                quote_string(uuid)
            )
        };
        Ok(parse_cluster_type(
            query_scalar::<Option<String>>(session, &query).await?.flatten(),
        ))
    }

    async fn installed_version(&self, session: &mut dyn Session) -> Result<Version, SessionError> {
        Ok(self.check_version(session).await?.unwrap_or(MARKER_VERSION))
    }

    async fn state(&self, session: &mut dyn Session) -> Result<MetadataState, SessionError> {
        let Some(installed) = self.check_version(session).await? else {
            return Ok(MetadataState::Equal);
        };
        if installed != MARKER_VERSION {
            return Ok(compare_versions(installed, self.supported));
        }

        let lock_owner = query_scalar::<Option<i64>>(session, UPGRADE_LOCK_QUERY)
            .await?
            .flatten();
        if lock_owner.is_some() {
            return Ok(MetadataState::Upgrading);
        }

        let backups = query_scalar::<i64>(session, BACKUP_SCHEMA_QUERY)
            .await?
            .unwrap_or(0);
        if backups > 0 {
            Ok(MetadataState::FailedUpgrade)
        } else {
            Ok(MetadataState::FailedSetup)
        }
    }

    async fn get_instance_by_uuid(
        &self,
        session: &mut dyn Session,
        uuid: &str,
    ) -> Result<Option<InstanceMetadata>, SessionError> {
        let query = format!(
            "SELECT i.mysql_server_uuid, i.address, c.cluster_type, \
             IFNULL(m.member_role = 'PRIMARY', 0) \
             FROM mysql_innodb_cluster_metadata.v2_instances i \
             JOIN mysql_innodb_cluster_metadata.v2_clusters c ON c.cluster_id = i.cluster_id \
             LEFT JOIN mysql_innodb_cluster_metadata.v2_ar_members m ON m.instance_id = i.instance_id \
             WHERE i.mysql_server_uuid = {}",
            quote_string(uuid)
        );
        let result = session.query(&query).await?;
        let Some(row) = result.first() else {
            return Ok(None);
        };
        Ok(Some(InstanceMetadata {
            uuid: row.get(0)?,
            address: row.get::<Option<String>>(1)?.unwrap_or_default(),
            cluster_type: parse_cluster_type(row.get(2)?),
            primary_master: row.get::<Option<bool>>(3)?.unwrap_or(false),
        }))
    }

    async fn check_all_members_online(&self, session: &mut dyn Session) -> Result<bool, SessionError> {
        let not_online = query_scalar::<i64>(
            session,
            "SELECT COUNT(*) FROM mysql_innodb_cluster_metadata.v2_instances i \
             LEFT JOIN performance_schema.replication_group_members m \
             ON m.MEMBER_ID = i.mysql_server_uuid \
             WHERE i.cluster_id = (SELECT cluster_id FROM mysql_innodb_cluster_metadata.v2_instances \
             WHERE mysql_server_uuid = @@server_uuid) \
             AND (m.MEMBER_STATE IS NULL OR m.MEMBER_STATE <> 'ONLINE')",
        )
        .await?
        .unwrap_or(0);
        Ok(not_online == 0)
    }
}
