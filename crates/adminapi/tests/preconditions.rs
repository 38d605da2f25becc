//! End-to-end precondition checks against scripted servers.

use adminapi::{
    check_function_preconditions, AdminError, DefaultMessages, ErrorCode, Instance, InstanceState,
    InstanceType, Operation, QuorumState, SchemaMetadataStorage,
};
use shell_core::testing::{result, RecordingConsole, Script};
use shell_core::{Session, Value, Version};

const UUID: &str = "5ef81566-9395-11e9-87e9-111111111111";

fn metadata_version(script: &Script, major: &str, minor: &str, patch: &str) {
    script.on(
        "schema_version",
        result(&["major", "minor", "patch"], vec![vec![major, minor, patch]]),
    );
}

fn replica_set_member(script: &Script, primary: &str) {
    script
        .on(
            "v2_ar_members",
            result(
                &["uuid", "address", "cluster_type", "primary"],
                vec![vec![UUID, "db1:3306", "ar", primary]],
            ),
        )
        .on("v2_clusters", result(&["cluster_type"], vec![vec!["ar"]]));
}

fn cluster_member(script: &Script, member_state: &str) {
    script
        .on(
            "mysql_innodb_cluster_metadata.instances",
            result(&["type"], vec![vec!["gr"]]),
        )
        .on("MEMBER_ID = @@server_uuid AND", result(&["c"], vec![vec!["1"]]))
        .on(
            "IS_PRIMARY",
            result(
                &["MEMBER_ID", "MEMBER_HOST", "MEMBER_PORT", "MEMBER_STATE", "IS_PRIMARY"],
                vec![
                    vec![Value::from(UUID), "db1".into(), "3306".into(), member_state.into(), "1".into()],
                    vec![Value::from("other-1"), "db2".into(), "3306".into(), "ONLINE".into(), "0".into()],
                    vec![Value::from("other-2"), "db3".into(), "3306".into(), "ONLINE".into(), "0".into()],
                ],
            ),
        );
}

async fn check(
    operation: Operation,
    instance: &mut Instance,
    console: &RecordingConsole,
) -> Result<adminapi::ClusterCheckInfo, AdminError> {
    check_function_preconditions(
        operation,
        instance,
        &SchemaMetadataStorage::new(),
        &DefaultMessages,
        console,
        None,
    )
    .await
}

#[tokio::test]
async fn test_cluster_operation_on_replica_set_member() {
    let script = Script::new();
    metadata_version(&script, "2", "0", "0");
    replica_set_member(&script, "1");
    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    let console = RecordingConsole::new();

    let err = check(Operation::ClusterAddInstance, &mut instance, &console)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "This function is not available through a session to an instance that is a member of an InnoDB ReplicaSet"
    );
    assert_eq!(err.code(), Some(ErrorCode::ManagedInReplicaSet));
    assert!(console.is_empty());
}

#[tokio::test]
async fn test_replica_set_primary_passes() {
    let script = Script::new();
    metadata_version(&script, "2", "0", "0");
    replica_set_member(&script, "1");
    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    let console = RecordingConsole::new();

    let info = check(Operation::ReplicaSetDissolve, &mut instance, &console)
        .await
        .unwrap();
    assert_eq!(info.source_type, InstanceType::AsyncReplicaSet);
    assert_eq!(info.source_state, InstanceState::OnlineRW);
    assert!(info.quorum.contains(QuorumState::Normal));
}

#[tokio::test]
async fn test_failed_setup_skips_registry_check() {
    let script = Script::new();
    metadata_version(&script, "0", "0", "0");
    script.on("v2_clusters", result(&["cluster_type"], vec![vec!["gr"]]));
    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    let console = RecordingConsole::new();

    // Registered in a cluster with GR stopped: createCluster would normally refuse.
    let info = check(Operation::CreateCluster, &mut instance, &console)
        .await
        .unwrap();
    assert_eq!(info.source_type, InstanceType::StandaloneInMetadata);
    assert_eq!(info.source_state, InstanceState::Offline);
}

#[tokio::test]
async fn test_lower_major_metadata_blocks_changes_and_warns_on_reads() {
    let script = Script::new();
    metadata_version(&script, "1", "0", "1");
    cluster_member(&script, "ONLINE");
    let console = RecordingConsole::new();

    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    let err = check(Operation::ClusterAddInstance, &mut instance, &console)
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::Metadata(_)));
    let message = err.to_string();
    assert!(message.starts_with("Operation not allowed. No InnoDB Cluster change operations"));
    assert!(message.contains("version 1.0.1 is lower"));
    assert!(message.contains("dba.upgradeMetadata"));

    let info = check(Operation::GetCluster, &mut instance, &console)
        .await
        .unwrap();
    assert_eq!(info.source_type, InstanceType::InnoDBCluster);
    assert_eq!(info.source_state, InstanceState::OnlineRW);
    assert!(info.quorum.contains(QuorumState::AllOnline));
    assert_eq!(console.warnings().len(), 1);
    assert!(console.warnings()[0].starts_with("No InnoDB Cluster change operations"));
}

#[tokio::test]
async fn test_recovering_member_is_rejected_before_quorum() {
    let script = Script::new();
    metadata_version(&script, "2", "0", "0");
    script.on("v2_clusters", result(&["cluster_type"], vec![vec!["gr"]]));
    cluster_member(&script, "RECOVERING");
    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    let console = RecordingConsole::new();

    let err = check(Operation::ClusterAddInstance, &mut instance, &console)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "This function is not available through a session to a recovering instance"
    );
}

#[tokio::test]
async fn test_member_in_error_sees_a_dead_cluster() {
    let script = Script::new();
    metadata_version(&script, "2", "0", "0");
    script.on("v2_clusters", result(&["cluster_type"], vec![vec!["gr"]]));
    cluster_member(&script, "ERROR");
    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    let console = RecordingConsole::new();

    // upgradeMetadata accepts any member state, so the quorum check is reached.
    let err = check(Operation::UpgradeMetadata, &mut instance, &console)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unable to perform the operation on a dead InnoDB cluster"
    );
    assert_eq!(err.code(), None);
    assert_eq!(script.count("IS_PRIMARY"), 1);
}

#[tokio::test]
async fn test_closed_session_and_unsupported_server() {
    let console = RecordingConsole::new();

    let script = Script::new();
    let mut instance = Instance::from_parts(script.session().boxed(), UUID);
    instance.session().close().await.unwrap();
    let err = check(Operation::ClusterStatus, &mut instance, &console)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "An open session is required to perform this operation."
    );

    let script = Script::new();
    let mut instance =
        Instance::from_parts(script.session_with_version(Version::new(5, 6, 40)).boxed(), UUID);
    let err = check(Operation::ConfigureInstance, &mut instance, &console)
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Unsupported server version: AdminAPI operations require"));
}
