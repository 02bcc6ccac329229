//! # Registry drivers
//!
//! The control-plane operations of a container registry, as a trait which
//! concrete service clients implement.

mod driver;
mod error;
pub mod replication;

pub use driver::{
    BatchDeleteOutput, DescribeImages, DescribeRepositories, Driver, ImageFailure, ImageId,
    ImageRecord, Page, RepositoryRecord,
};
pub use error::{DriverError, DriverErrorBuilder, DriverErrorKind};
pub use replication::{
    ReplicationConfiguration, ReplicationDestination, ReplicationRule, RepositoryFilter,
    RepositoryFilterType,
};
