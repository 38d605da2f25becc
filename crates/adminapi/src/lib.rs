//! AdminAPI precondition engine.
//!
//! Before any InnoDB Cluster or ReplicaSet operation runs, the target
//! instance is classified ([`topology`]), its role and the group quorum are
//! read ([`member`], [`quorum`]), the metadata schema version is checked
//! against what the operation tolerates ([`metadata`]) and the result is
//! compared with the operation's entry in the availability registry
//! ([`availability`]). [`check_function_preconditions`] runs the whole
//! sequence.

pub mod availability;
mod error;
mod flags;
mod instance;
pub mod member;
pub mod metadata;
mod preconditions;
pub mod quorum;
pub mod topology;

pub use availability::{FunctionAvailability, MetadataValidation, Operation, QuorumRequirement};
pub use error::{AdminError, ErrorCode};
pub use flags::{Flag, FlagSet};
pub use instance::Instance;
pub use member::{InstanceState, InstanceStates, MemberState};
pub use metadata::{
    DefaultMessages, MdsAction, MessageCatalog, MetadataState, MetadataStorage,
    SchemaMetadataStorage,
};
pub use preconditions::{
    check_function_preconditions, check_preconditions, get_cluster_check_info, validate_session,
    ClusterCheckInfo,
};
pub use quorum::{evaluate_quorum, QuorumState, QuorumStates};
pub use topology::{get_instance_type, ClusterType, InstanceType, InstanceTypes};
