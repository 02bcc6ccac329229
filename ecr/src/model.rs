//! Repositories and images, resolved from the registry.
//!
//! Entities are read-only snapshots of a single response: nothing is cached,
//! and every mutation goes back through the registry driver.

use chrono::{DateTime, Utc};
use ecr_driver::{DescribeImages, DescribeRepositories, ImageId, ImageRecord, RepositoryRecord};
use futures::StreamExt as _;

use crate::{EcrClient, EcrError, Paginated};

/// Build the URI of a tagged image in a private ECR registry.
pub fn image_uri(account_id: &str, region: &str, repository_name: &str, tag: &str) -> String {
    format!("{account_id}.dkr.ecr.{region}.amazonaws.com/{repository_name}:{tag}")
}

/// Resolve the first item of a point lookup, treating the not-found kinds as absent.
async fn first_or_none<T>(mut stream: Paginated<T>) -> Result<Option<T>, EcrError> {
    match stream.next().await {
        Some(Ok(item)) => Ok(Some(item)),
        Some(Err(error)) if error.is_not_found() => {
            tracing::debug!("Lookup found nothing: {error}");
            Ok(None)
        }
        Some(Err(error)) => Err(error),
        None => Ok(None),
    }
}

/// A named collection of images in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    name: String,
    registry_id: String,
    arn: Option<String>,
    uri: String,
    created_at: DateTime<Utc>,
}

impl Repository {
    /// List every repository, or only the named ones.
    ///
    /// The name filter is sent to the registry. Naming a repository which
    /// does not exist makes the registry fail the request.
    #[tracing::instrument(skip(client))]
    pub fn list(client: &EcrClient, repository_names: Option<Vec<String>>) -> Paginated<Repository> {
        let driver = client.shared();
        Paginated::new(move |next_token| {
            let driver = driver.clone();
            let request = DescribeRepositories {
                repository_names: repository_names.clone(),
                next_token,
            };
            async move { driver.describe_repositories(request).await }
        })
    }

    /// Get a repository by name, or `None` if it does not exist.
    #[tracing::instrument(skip(client))]
    pub async fn get(client: &EcrClient, repository_name: &str) -> Result<Option<Repository>, EcrError> {
        first_or_none(Repository::list(client, Some(vec![repository_name.to_owned()]))).await
    }

    /// Repository name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registry (account) id which owns this repository.
    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    /// Amazon resource name, when reported.
    pub fn arn(&self) -> Option<&str> {
        self.arn.as_deref()
    }

    /// The URI used to push and pull images, without a tag.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// When the repository was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The URI of a tagged image in this repository.
    pub fn image_uri(&self, tag: &str) -> String {
        format!("{}:{}", self.uri, tag)
    }

    /// The URI of an image in this repository, pinned by digest.
    pub fn digest_uri(&self, digest: &str) -> String {
        format!("{}@{}", self.uri, digest)
    }
}

impl TryFrom<RepositoryRecord> for Repository {
    type Error = EcrError;

    fn try_from(record: RepositoryRecord) -> Result<Self, Self::Error> {
        Ok(Repository {
            name: record
                .repository_name
                .ok_or_else(|| EcrError::missing("repository", "repositoryName"))?,
            registry_id: record
                .registry_id
                .ok_or_else(|| EcrError::missing("repository", "registryId"))?,
            arn: record.repository_arn,
            uri: record
                .repository_uri
                .ok_or_else(|| EcrError::missing("repository", "repositoryUri"))?,
            created_at: record
                .created_at
                .ok_or_else(|| EcrError::missing("repository", "createdAt"))?,
        })
    }
}

/// One pushed image, identified by its digest.
///
/// Tags are mutable aliases: they can move to another digest or be removed.
/// An image with no tags is "untagged".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    repository_name: String,
    registry_id: Option<String>,
    digest: String,
    tags: Vec<String>,
    size_in_bytes: Option<u64>,
    pushed_at: DateTime<Utc>,
    last_pulled_at: Option<DateTime<Utc>>,
    manifest_media_type: Option<String>,
    artifact_media_type: Option<String>,
}

impl Image {
    /// List the images in a repository, optionally restricted to some image ids.
    #[tracing::instrument(skip(client))]
    pub fn list(
        client: &EcrClient,
        repository_name: &str,
        image_ids: Option<Vec<ImageId>>,
    ) -> Paginated<Image> {
        let driver = client.shared();
        let repository_name = repository_name.to_owned();
        Paginated::new(move |next_token| {
            let driver = driver.clone();
            let request = DescribeImages {
                repository_name: repository_name.clone(),
                image_ids: image_ids.clone(),
                next_token,
            };
            async move { driver.describe_images(request).await }
        })
    }

    /// Get an image by tag, or `None` if the image or repository does not exist.
    pub async fn get_by_tag(
        client: &EcrClient,
        repository_name: &str,
        image_tag: &str,
    ) -> Result<Option<Image>, EcrError> {
        Image::get(client, repository_name, ImageId::tag(image_tag)).await
    }

    /// Get an image by digest, or `None` if the image or repository does not exist.
    pub async fn get_by_digest(
        client: &EcrClient,
        repository_name: &str,
        image_digest: &str,
    ) -> Result<Option<Image>, EcrError> {
        Image::get(client, repository_name, ImageId::digest(image_digest)).await
    }

    #[tracing::instrument(skip(client))]
    async fn get(
        client: &EcrClient,
        repository_name: &str,
        image_id: ImageId,
    ) -> Result<Option<Image>, EcrError> {
        first_or_none(Image::list(client, repository_name, Some(vec![image_id]))).await
    }

    /// The repository holding this image.
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// The registry (account) id, when reported.
    pub fn registry_id(&self) -> Option<&str> {
        self.registry_id.as_deref()
    }

    /// Content digest, e.g. `sha256:2f6c...`
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Tags, in the order the registry reports them.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the image has no tags.
    pub fn is_untagged(&self) -> bool {
        self.tags.is_empty()
    }

    /// Size of the image in bytes, when reported.
    pub fn size_in_bytes(&self) -> Option<u64> {
        self.size_in_bytes
    }

    /// When the image was pushed.
    pub fn pushed_at(&self) -> DateTime<Utc> {
        self.pushed_at
    }

    /// When the image was last pulled, if the registry has recorded a pull.
    pub fn last_pulled_at(&self) -> Option<DateTime<Utc>> {
        self.last_pulled_at
    }

    /// Manifest media type.
    pub fn manifest_media_type(&self) -> Option<&str> {
        self.manifest_media_type.as_deref()
    }

    /// Artifact media type.
    pub fn artifact_media_type(&self) -> Option<&str> {
        self.artifact_media_type.as_deref()
    }

    /// Time elapsed since the image was pushed.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.pushed_at
    }

    /// An identifier for this image which never changes.
    pub fn id(&self) -> ImageId {
        ImageId::digest(&self.digest)
    }
}

impl TryFrom<ImageRecord> for Image {
    type Error = EcrError;

    fn try_from(record: ImageRecord) -> Result<Self, Self::Error> {
        Ok(Image {
            repository_name: record
                .repository_name
                .ok_or_else(|| EcrError::missing("image", "repositoryName"))?,
            registry_id: record.registry_id,
            digest: record
                .image_digest
                .ok_or_else(|| EcrError::missing("image", "imageDigest"))?,
            tags: record.image_tags,
            size_in_bytes: record
                .image_size_in_bytes
                .and_then(|size| u64::try_from(size).ok()),
            pushed_at: record
                .image_pushed_at
                .ok_or_else(|| EcrError::missing("image", "imagePushedAt"))?,
            last_pulled_at: record.last_recorded_pull_time,
            manifest_media_type: record.image_manifest_media_type,
            artifact_media_type: record.artifact_media_type,
        })
    }
}
