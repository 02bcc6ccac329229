use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::replication::ReplicationConfiguration;

/// Identifies a single image within a repository.
///
/// The service accepts a tag or a digest; exactly one is supplied per identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageId {
    /// Content digest, e.g. `sha256:2f6c...`
    Digest(String),

    /// A mutable tag, e.g. `latest`
    Tag(String),
}

impl ImageId {
    /// Identify an image by content digest.
    pub fn digest(digest: impl Into<String>) -> Self {
        ImageId::Digest(digest.into())
    }

    /// Identify an image by tag.
    pub fn tag(tag: impl Into<String>) -> Self {
        ImageId::Tag(tag.into())
    }

    /// The digest, if this identifier is a digest.
    pub fn as_digest(&self) -> Option<&str> {
        match self {
            ImageId::Digest(digest) => Some(digest),
            ImageId::Tag(_) => None,
        }
    }

    /// The tag, if this identifier is a tag.
    pub fn as_tag(&self) -> Option<&str> {
        match self {
            ImageId::Digest(_) => None,
            ImageId::Tag(tag) => Some(tag),
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageId::Digest(digest) => write!(f, "@{digest}"),
            ImageId::Tag(tag) => write!(f, ":{tag}"),
        }
    }
}

/// Parameters for one `DescribeRepositories` page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeRepositories {
    /// Restrict the listing to these repository names.
    pub repository_names: Option<Vec<String>>,

    /// Continuation token from the previous page.
    pub next_token: Option<String>,
}

/// Parameters for one `DescribeImages` page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeImages {
    /// The repository to describe.
    pub repository_name: String,

    /// Restrict the listing to these images.
    pub image_ids: Option<Vec<ImageId>>,

    /// Continuation token from the previous page.
    pub next_token: Option<String>,
}

impl DescribeImages {
    /// Describe every image in a repository.
    pub fn new(repository_name: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            ..Default::default()
        }
    }
}

/// One page of results, with the token for the next page if there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Records in this page, in service order.
    pub items: Vec<T>,

    /// Opaque continuation token. `None` on the last page.
    pub next_token: Option<String>,
}

/// A repository as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// Repository name
    pub repository_name: Option<String>,
    /// Account id of the owning registry
    pub registry_id: Option<String>,
    /// Amazon resource name
    pub repository_arn: Option<String>,
    /// URI used to push and pull, without a tag
    pub repository_uri: Option<String>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
}

/// An image as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRecord {
    /// Owning repository name
    pub repository_name: Option<String>,
    /// Account id of the owning registry
    pub registry_id: Option<String>,
    /// Content digest
    pub image_digest: Option<String>,
    /// Tags, empty when the image is untagged
    pub image_tags: Vec<String>,
    /// Size in bytes
    pub image_size_in_bytes: Option<i64>,
    /// Push time
    pub image_pushed_at: Option<DateTime<Utc>>,
    /// Last recorded pull time
    pub last_recorded_pull_time: Option<DateTime<Utc>>,
    /// Manifest media type
    pub image_manifest_media_type: Option<String>,
    /// Artifact media type
    pub artifact_media_type: Option<String>,
}

/// An image the service failed to delete in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    /// The image which failed, when the service says which one.
    pub image_id: Option<ImageId>,

    /// Service failure code, e.g. `ImageNotFound`.
    pub code: String,

    /// Human readable reason.
    pub reason: String,
}

/// Result of a batch delete call. A single call can partially succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteOutput {
    /// Images the service deleted
    pub deleted: Vec<ImageId>,
    /// Images the service refused to delete
    pub failures: Vec<ImageFailure>,
}

/// A registry driver: the remote control-plane operations this workspace is built on.
///
/// Implementations must report missing repositories and images with the
/// matching [`DriverErrorKind`](crate::DriverErrorKind) so that lookups can
/// tell an absent entity from a failed call.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Fetch one page of repositories.
    async fn describe_repositories(
        &self,
        request: DescribeRepositories,
    ) -> Result<Page<RepositoryRecord>, DriverError>;

    /// Fetch one page of images.
    async fn describe_images(
        &self,
        request: DescribeImages,
    ) -> Result<Page<ImageRecord>, DriverError>;

    /// Delete a batch of images from a repository.
    ///
    /// Per-image failures are reported in the output, not as an error.
    async fn batch_delete_images(
        &self,
        repository_name: &str,
        image_ids: &[ImageId],
    ) -> Result<BatchDeleteOutput, DriverError>;

    /// Replace the registry's replication configuration.
    async fn put_replication_configuration(
        &self,
        configuration: &ReplicationConfiguration,
    ) -> Result<ReplicationConfiguration, DriverError>;

    /// Replace the registry-level permissions policy.
    async fn put_registry_policy(&self, policy_text: &str) -> Result<(), DriverError>;

    /// Replace a repository's permissions policy.
    async fn set_repository_policy(
        &self,
        repository_name: &str,
        policy_text: &str,
    ) -> Result<(), DriverError>;
}
