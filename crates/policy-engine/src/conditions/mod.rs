//! Domain-specific checks run before rule matching.
//!
//! Each condition set from the configuration compiles into a policy struct
//! with an `evaluate` method returning a [`Decision`](crate::Decision).

mod command;
mod data;
mod filesystem;
mod network;

pub use command::{evaluate_command_condition, CommandPolicy};
pub use data::{evaluate_data_condition, DataPayload, DataPolicy};
pub use filesystem::{evaluate_filesystem_condition, FileOperation, FilesystemPolicy};
pub use network::{evaluate_network_condition, NetworkPolicy, NetworkTarget};

pub(crate) use filesystem::resolve_path;
