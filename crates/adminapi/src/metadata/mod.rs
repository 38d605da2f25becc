//! The cluster metadata schema: version states, storage access and the
//! compatibility gate run before every operation.

mod gate;
mod messages;
mod schema;

use std::fmt;

use async_trait::async_trait;
use shell_core::{Session, SessionError, Version};

use crate::flags::{flag_enum, FlagSet};
use crate::topology::ClusterType;

pub use gate::check_metadata_preconditions;
pub use messages::{DefaultMessages, MessageCatalog};
pub use schema::SchemaMetadataStorage;

/// Metadata schema version understood by this client.
pub const CURRENT_VERSION: Version = Version::new(2, 0, 0);

/// Installed metadata version compared against [`CURRENT_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataState {
    Equal,
    MajorHigher,
    MajorLower,
    MinorLower,
    PatchLower,
    FailedUpgrade,
    Upgrading,
    FailedSetup,
}

flag_enum!(MetadataState {
    Equal,
    MajorHigher,
    MajorLower,
    MinorLower,
    PatchLower,
    FailedUpgrade,
    Upgrading,
    FailedSetup,
});

pub type MetadataStates = FlagSet<MetadataState>;

const fn states(list: &[MetadataState]) -> MetadataStates {
    let mut bits = 0u16;
    let mut i = 0;
    while i < list.len() {
        bits |= 1 << (list[i] as u16);
        i += 1;
    }
    MetadataStates::from_bits(bits)
}

pub const INCOMPATIBLE_OR_UPGRADING: MetadataStates = states(&[
    MetadataState::MajorHigher,
    MetadataState::MajorLower,
    MetadataState::FailedUpgrade,
    MetadataState::Upgrading,
]);
pub const COMPATIBLE_LOWER: MetadataStates =
    states(&[MetadataState::MinorLower, MetadataState::PatchLower]);
pub const UPGRADE_STATES: MetadataStates =
    states(&[MetadataState::FailedUpgrade, MetadataState::Upgrading]);
pub const INCOMPATIBLE: MetadataStates =
    states(&[MetadataState::MajorHigher, MetadataState::MajorLower]);
pub const UPGRADE_IN_PROGRESS: MetadataStates = states(&[MetadataState::Upgrading]);
pub const FAILED_SETUP: MetadataStates = states(&[MetadataState::FailedSetup]);
pub const MAJOR_HIGHER: MetadataStates = states(&[MetadataState::MajorHigher]);
pub const MAJOR_LOWER: MetadataStates = states(&[MetadataState::MajorLower]);

impl fmt::Display for MetadataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetadataState::Equal => "EQUAL",
            MetadataState::MajorHigher => "MAJOR_HIGHER",
            MetadataState::MajorLower => "MAJOR_LOWER",
            MetadataState::MinorLower => "MINOR_LOWER",
            MetadataState::PatchLower => "PATCH_LOWER",
            MetadataState::FailedUpgrade => "FAILED_UPGRADE",
            MetadataState::Upgrading => "UPGRADING",
            MetadataState::FailedSetup => "FAILED_SETUP",
        })
    }
}

/// Compares an installed version to the supported one.
///
/// Newer minor or patch releases remain readable and count as equal.
pub fn compare_versions(installed: Version, supported: Version) -> MetadataState {
    use std::cmp::Ordering::*;

    match installed.major.cmp(&supported.major) {
        Greater => MetadataState::MajorHigher,
        Less => MetadataState::MajorLower,
        Equal => match installed.minor.cmp(&supported.minor) {
            Less => MetadataState::MinorLower,
            Greater => MetadataState::Equal,
            Equal if installed.patch < supported.patch => MetadataState::PatchLower,
            Equal => MetadataState::Equal,
        },
    }
}

/// What the gate does when an operation runs against a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdsAction {
    None,
    Note,
    Warn,
    RaiseError,
}

/// What the metadata records about one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub uuid: String,
    pub address: String,
    pub cluster_type: ClusterType,
    /// Recorded primary of an async replica set.
    pub primary_master: bool,
}

/// Access to the metadata schema stored on the target server.
///
/// Every call runs on the caller's session so that the checker keeps a
/// single connection to the target.
#[async_trait]
pub trait MetadataStorage: Send + Sync {
    /// Installed metadata version, `None` when there is no metadata schema.
    async fn check_version(&self, session: &mut dyn Session) -> Result<Option<Version>, SessionError>;

    /// Cluster type `uuid` is registered under.
    async fn check_instance_type(
        &self,
        session: &mut dyn Session,
        uuid: &str,
        version: &Version,
    ) -> Result<ClusterType, SessionError>;

    async fn installed_version(&self, session: &mut dyn Session) -> Result<Version, SessionError>;

    /// Installed version classified against [`CURRENT_VERSION`].
    async fn state(&self, session: &mut dyn Session) -> Result<MetadataState, SessionError>;

    async fn get_instance_by_uuid(
        &self,
        session: &mut dyn Session,
        uuid: &str,
    ) -> Result<Option<InstanceMetadata>, SessionError>;

    /// Whether every member registered for the target's cluster is ONLINE.
    async fn check_all_members_online(&self, session: &mut dyn Session) -> Result<bool, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        let supported = Version::new(2, 0, 0);
        assert_eq!(compare_versions(Version::new(2, 0, 0), supported), MetadataState::Equal);
        assert_eq!(compare_versions(Version::new(3, 0, 0), supported), MetadataState::MajorHigher);
        assert_eq!(compare_versions(Version::new(1, 0, 1), supported), MetadataState::MajorLower);
        assert_eq!(compare_versions(Version::new(2, 1, 0), supported), MetadataState::Equal);
        assert_eq!(compare_versions(Version::new(2, 0, 3), supported), MetadataState::Equal);

        let supported = Version::new(2, 1, 2);
        assert_eq!(compare_versions(Version::new(2, 0, 9), supported), MetadataState::MinorLower);
        assert_eq!(compare_versions(Version::new(2, 1, 1), supported), MetadataState::PatchLower);
    }

    #[test]
    fn test_state_groups() {
        assert!(INCOMPATIBLE_OR_UPGRADING.contains(MetadataState::Upgrading));
        assert!(!INCOMPATIBLE_OR_UPGRADING.contains(MetadataState::MinorLower));
        assert!(COMPATIBLE_LOWER.contains(MetadataState::PatchLower));
        assert!(UPGRADE_STATES.contains(MetadataState::FailedUpgrade));
        assert!(!INCOMPATIBLE.contains(MetadataState::Upgrading));
        assert!(FAILED_SETUP.contains(MetadataState::FailedSetup));
        assert!(!UPGRADE_IN_PROGRESS.contains(MetadataState::FailedUpgrade));
    }
}
