//! Human-readable messages for metadata version problems.

use super::MetadataState;
use crate::topology::ClusterType;

/// Message templates keyed by operation name and metadata state.
///
/// Templates may contain `{installed}` and `{supported}` placeholders and
/// `<<<member>>>` references to other commands.
pub trait MessageCatalog: Send + Sync {
    fn lookup(&self, function: &str, state: MetadataState) -> Option<String>;
}

/// The built-in catalog.
///
/// Lookup falls back from `Class.method` to `Class` to the generic `*` entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMessages;

fn thing(cluster_type: ClusterType) -> &'static str {
    match cluster_type {
        ClusterType::AsyncReplication => "InnoDB ReplicaSet",
        _ => "InnoDB Cluster",
    }
}

fn entry(function: &str, state: MetadataState) -> Option<String> {
    use MetadataState::*;

    let message = match (function, state) {
        ("*", MajorHigher) => "The installed metadata version {installed} is higher than the \
             supported by the Shell which is version {supported}. It is recommended to use a \
             Shell version that supports this metadata."
            .to_string(),
        ("*", MajorLower | MinorLower | PatchLower) => "The installed metadata version \
             {installed} is lower than the version required by Shell which is version \
             {supported}. It is recommended to upgrade the metadata. See \\? \
             dba.<<<upgradeMetadata>>> for additional details."
            .to_string(),
        ("*", FailedUpgrade) => "An unfinished metadata upgrade was detected, which may have \
             left it in an invalid state. Execute dba.<<<upgradeMetadata>>> again to repair it."
            .to_string(),
        ("*", Upgrading) => "The metadata is being upgraded. Wait until the upgrade process \
             completes and then retry the operation."
            .to_string(),

        ("Dba.createCluster" | "Dba.createReplicaSet", MajorHigher) => "Operation not allowed. \
             The installed metadata version {installed} is higher than the supported by the \
             Shell which is version {supported}. Please use the latest version of the Shell."
            .to_string(),
        ("Dba.createCluster" | "Dba.createReplicaSet", MajorLower) => "Operation not allowed. \
             The installed metadata version {installed} is lower than the version required by \
             Shell which is version {supported}. Upgrade the metadata to execute this \
             operation. See \\? dba.<<<upgradeMetadata>>> for additional details."
            .to_string(),

        ("Dba.getCluster" | "Dba.getReplicaSet", MajorHigher | MajorLower) => {
            let cluster_type = if function == "Dba.getCluster" {
                ClusterType::GroupReplication
            } else {
                ClusterType::AsyncReplication
            };
            if state == MajorHigher {
                format!(
                    "No {} change operations can be executed because the installed metadata \
                     version {{installed}} is higher than the supported by the Shell which is \
                     version {{supported}}. Please use the latest version of the Shell.",
                    thing(cluster_type)
                )
            } else {
                format!(
                    "No {} change operations can be executed because the installed metadata \
                     version {{installed}} is lower than the version required by Shell which \
                     is version {{supported}}. Upgrade the metadata to remove this \
                     restriction. See \\? dba.<<<upgradeMetadata>>> for additional details.",
                    thing(cluster_type)
                )
            }
        }

        ("Dba.rebootClusterFromCompleteOutage", MajorHigher) => format!(
            "Operation not allowed. No {} change operations can be executed because the \
             installed metadata version {{installed}} is higher than the supported by the \
             Shell which is version {{supported}}. Please use the latest version of the Shell.",
            thing(ClusterType::GroupReplication)
        ),
        ("Dba.rebootClusterFromCompleteOutage", MajorLower) => format!(
            "The {} will be rebooted as configured on the metadata, however, no change \
             operations can be executed because the installed metadata version {{installed}} \
             is lower than the version required by Shell which is version {{supported}}. \
             Upgrade the metadata to remove this restriction. See \\? \
             dba.<<<upgradeMetadata>>> for additional details.",
            thing(ClusterType::GroupReplication)
        ),

        ("Cluster" | "ReplicaSet", MajorHigher | MajorLower) => {
            let cluster_type = if function == "Cluster" {
                ClusterType::GroupReplication
            } else {
                ClusterType::AsyncReplication
            };
            let detail = if state == MajorHigher {
                "higher than the supported by the Shell which is version {supported}. Please \
                 use the latest version of the Shell."
            } else {
                "lower than the version required by Shell which is version {supported}. \
                 Upgrade the metadata to remove this restriction. See \\? \
                 dba.<<<upgradeMetadata>>> for additional details."
            };
            format!(
                "Operation not allowed. No {} change operations can be executed because the \
                 installed metadata version {{installed}} is {detail}",
                thing(cluster_type)
            )
        }

        _ => return None,
    };
    Some(message)
}

impl MessageCatalog for DefaultMessages {
    fn lookup(&self, function: &str, state: MetadataState) -> Option<String> {
        if let Some(message) = entry(function, state) {
            return Some(message);
        }
        if function == "*" {
            return None;
        }
        match function.split_once('.') {
            Some((class, _)) => self.lookup(class, state),
            None => self.lookup("*", state),
        }
    }
}

/// Fills in the version placeholders and resolves `<<<member>>>` names.
pub(crate) fn render(template: &str, installed: &str, supported: &str) -> String {
    let text = template
        .replace("{installed}", installed)
        .replace("{supported}", supported);

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find("<<<") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        match after.find(">>>") {
            Some(end) => {
                out.push_str(&after[..end]);
                rest = &after[end + 3..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_specific_message_wins() {
        let msg = DefaultMessages
            .lookup("Dba.createCluster", MetadataState::MajorHigher)
            .unwrap();
        assert!(msg.starts_with("Operation not allowed. The installed metadata"));
    }

    #[test]
    fn test_falls_back_to_class_then_generic() {
        let msg = DefaultMessages
            .lookup("Cluster.addInstance", MetadataState::MajorLower)
            .unwrap();
        assert!(msg.starts_with("Operation not allowed. No InnoDB Cluster change operations"));

        let msg = DefaultMessages
            .lookup("ReplicaSet.status", MetadataState::Upgrading)
            .unwrap();
        assert!(msg.starts_with("The metadata is being upgraded"));

        let msg = DefaultMessages
            .lookup("Dba.getReplicaSet", MetadataState::MinorLower)
            .unwrap();
        assert!(msg.contains("It is recommended to upgrade the metadata"));
    }

    #[test]
    fn test_no_message_for_failed_setup() {
        assert!(DefaultMessages
            .lookup("Dba.createCluster", MetadataState::FailedSetup)
            .is_none());
    }

    #[test]
    fn test_render_substitutes_versions_and_members() {
        let text = render(
            "Version {installed} vs {supported}. See dba.<<<upgradeMetadata>>> now.",
            "1.0.1",
            "2.0.0",
        );
        assert_eq!(text, "Version 1.0.1 vs 2.0.0. See dba.upgradeMetadata now.");
    }
}
