//! # ECR
//!
//! A convenience client for a container registry's control plane: resolve
//! repositories and images by name, tag or digest, configure replication and
//! cross-account access, and expire untagged images.
//!
//! Every operation takes the [`EcrClient`] explicitly. The client wraps a
//! [`Driver`], which performs the actual registry calls.
//!
//! ## Example
//!
//! ```no_run
//! use ecr::{EcrClient, Image, Repository};
//! use futures::TryStreamExt as _;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = EcrClient::new(ecr::aws::AwsEcrDriver::from_env().await);
//!
//! if Repository::get(&client, "my-repo").await?.is_none() {
//!     println!("my-repo does not exist");
//! }
//!
//! let latest = Image::get_by_tag(&client, "my-repo", "latest").await?;
//! let images: Vec<Image> = Image::list(&client, "my-repo", None).try_collect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod error;
pub mod expiration;
pub(crate) mod memory;
pub mod model;
mod paginate;
pub mod policy;
pub mod replication;
mod retry;

#[cfg(feature = "aws")]
#[doc(inline)]
pub use aws_ecr as aws;

#[doc(inline)]
pub use ecr_driver::{Driver, DriverError, DriverErrorKind, ImageId};

pub use self::error::EcrError;
pub use self::expiration::{delete_untagged_images, ExpirationReport, UntaggedImageExpiration};
#[doc(inline)]
pub use self::memory::MemoryDriver;
pub use self::model::{image_uri, Image, Repository};
pub use self::paginate::Paginated;
pub use self::retry::Backoff;

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A handle on a registry, shared by every operation in this crate.
///
/// Cloning is cheap; clones share the same driver.
#[derive(Debug, Clone)]
pub struct EcrClient {
    driver: ArcDriver,
}

impl<D> From<D> for EcrClient
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        EcrClient::new(value)
    }
}

impl EcrClient {
    /// Create a client which owns a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Create a client from a driver which is shared elsewhere.
    pub fn from_shared<D: Driver + Send + Sync + 'static>(driver: Arc<D>) -> Self {
        Self { driver }
    }

    /// The driver behind this client.
    pub fn driver(&self) -> &(dyn Driver + Send + Sync) {
        self.driver.as_ref()
    }

    pub(crate) fn shared(&self) -> ArcDriver {
        self.driver.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static_assertions::assert_impl_all!(EcrClient: Send, Sync, Clone);
    static_assertions::assert_impl_all!(Paginated<Image>: Send, Unpin, futures::Stream);

    #[test]
    fn client_names_driver() {
        let client = EcrClient::from(MemoryDriver::new());
        assert_eq!(client.driver().name(), "memory");
    }
}
