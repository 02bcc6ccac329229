//! Expire untagged images.
//!
//! Images which have lost all of their tags and were pushed longer ago than
//! a cutoff are deleted in batches. Tagged images are never touched, however
//! old they are.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ecr_driver::{BatchDeleteOutput, ImageId};
use futures::TryStreamExt as _;
use serde::{Deserialize, Deserializer};

use crate::{Backoff, EcrClient, EcrError, Image};

/// The most image ids the registry accepts in a single batch delete.
pub const MAX_BATCH_DELETE: usize = 100;

fn default_chunk_size() -> usize {
    MAX_BATCH_DELETE
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Settings for expiring untagged images.
///
/// ```
/// # use ecr::UntaggedImageExpiration;
/// let expiration: UntaggedImageExpiration =
///     serde_json::from_str(r#"{"expire-after": 86400}"#).unwrap();
/// assert_eq!(expiration.expire_after().as_secs(), 86400);
/// assert_eq!(expiration.chunk_size(), 100);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UntaggedImageExpiration {
    #[serde(deserialize_with = "deserialize_seconds")]
    expire_after: Duration,

    #[serde(default = "default_chunk_size")]
    chunk_size: usize,

    #[serde(skip)]
    backoff: Option<Backoff>,
}

impl UntaggedImageExpiration {
    /// Expire untagged images older than `expire_after`.
    pub fn new(expire_after: Duration) -> Self {
        Self {
            expire_after,
            chunk_size: MAX_BATCH_DELETE,
            backoff: None,
        }
    }

    /// Delete at most `chunk_size` images per call, clamped to `1..=100`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Retry batch deletes which fail with a retryable error, using this backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Minimum age of an untagged image before it expires.
    pub fn expire_after(&self) -> Duration {
        self.expire_after
    }

    /// Number of images deleted per batch call.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_BATCH_DELETE)
    }

    /// Images pushed before this instant expire.
    ///
    /// `None` when the cutoff would fall before the earliest representable time,
    /// in which case nothing expires.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let age = chrono::Duration::from_std(self.expire_after).ok()?;
        now.checked_sub_signed(age)
    }

    /// Whether `image` has expired at `now`.
    ///
    /// An image pushed exactly at the cutoff has not expired yet.
    pub fn is_expired(&self, image: &Image, now: DateTime<Utc>) -> bool {
        image.is_untagged()
            && self
                .cutoff(now)
                .is_some_and(|cutoff| image.pushed_at() < cutoff)
    }

    /// Delete the expired untagged images in a repository.
    pub async fn run(
        &self,
        client: &EcrClient,
        repository_name: &str,
    ) -> Result<ExpirationReport, ExpirationError> {
        self.run_at(client, repository_name, Utc::now()).await
    }

    /// Delete the images which have expired as of `now`.
    ///
    /// Every image in the repository is visited once, then the expired
    /// digests are deleted in chunks. Per-image failures are recorded in the
    /// report. A chunk which fails outright stops the run, and the error
    /// carries the report of the chunks completed before it.
    #[tracing::instrument(skip(self, client), fields(expire_after = ?self.expire_after))]
    pub async fn run_at(
        &self,
        client: &EcrClient,
        repository_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ExpirationReport, ExpirationError> {
        let mut report = ExpirationReport::new(repository_name);

        let expired = match self.select(client, repository_name, now).await {
            Ok(expired) => expired,
            Err(source) => return Err(ExpirationError { report, source }),
        };

        if expired.is_empty() {
            tracing::debug!("No untagged images have expired");
            return Ok(report);
        }
        tracing::info!(count = expired.len(), "Deleting expired untagged images");

        for chunk in expired.chunks(self.chunk_size()) {
            match self.delete_chunk(client, repository_name, chunk).await {
                Ok(output) => report.chunks.push(ChunkReport::new(chunk, output)),
                Err(source) => return Err(ExpirationError { report, source }),
            }
        }

        for (digest, code, reason) in report.failed() {
            tracing::warn!(%digest, %code, "Failed to delete image: {reason}");
        }
        tracing::info!(
            deleted = report.deleted_count(),
            failed = report.failed_count(),
            "Expired untagged images"
        );
        Ok(report)
    }

    async fn select(
        &self,
        client: &EcrClient,
        repository_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ImageId>, EcrError> {
        Image::list(client, repository_name, None)
            .try_filter_map(|image| {
                let id = self.is_expired(&image, now).then(|| image.id());
                async move { Ok(id) }
            })
            .try_collect()
            .await
    }

    async fn delete_chunk(
        &self,
        client: &EcrClient,
        repository_name: &str,
        chunk: &[ImageId],
    ) -> Result<BatchDeleteOutput, EcrError> {
        let driver = client.driver();
        let output = match &self.backoff {
            Some(backoff) => {
                backoff
                    .retry(|| driver.batch_delete_images(repository_name, chunk))
                    .await?
            }
            None => driver.batch_delete_images(repository_name, chunk).await?,
        };
        Ok(output)
    }
}

/// Delete untagged images older than `expire_after` from a repository,
/// 100 at a time.
pub async fn delete_untagged_images(
    client: &EcrClient,
    repository_name: &str,
    expire_after: Duration,
) -> Result<ExpirationReport, ExpirationError> {
    UntaggedImageExpiration::new(expire_after)
        .run(client, repository_name)
        .await
}

/// What happened to one image selected for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// The image was deleted.
    Deleted {
        /// Digest of the deleted image
        digest: String,
    },

    /// The registry refused to delete the image.
    Failed {
        /// Digest of the image
        digest: String,
        /// Failure code reported by the registry
        code: String,
        /// Failure reason reported by the registry
        reason: String,
    },
}

impl DeletionOutcome {
    /// The image digest.
    pub fn digest(&self) -> &str {
        match self {
            DeletionOutcome::Deleted { digest } | DeletionOutcome::Failed { digest, .. } => digest,
        }
    }

    /// Whether the image was deleted.
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeletionOutcome::Deleted { .. })
    }
}

/// Outcomes of a single batch delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    /// One outcome per requested image, in request order.
    pub outcomes: Vec<DeletionOutcome>,
}

impl ChunkReport {
    fn new(requested: &[ImageId], output: BatchDeleteOutput) -> Self {
        let deleted: HashSet<&str> = output
            .deleted
            .iter()
            .filter_map(ImageId::as_digest)
            .collect();

        let outcomes = requested
            .iter()
            .filter_map(ImageId::as_digest)
            .map(|digest| {
                if deleted.contains(digest) {
                    return DeletionOutcome::Deleted {
                        digest: digest.to_owned(),
                    };
                }

                let failure = output.failures.iter().find(|failure| {
                    failure.image_id.as_ref().and_then(ImageId::as_digest) == Some(digest)
                });
                match failure {
                    Some(failure) => DeletionOutcome::Failed {
                        digest: digest.to_owned(),
                        code: failure.code.clone(),
                        reason: failure.reason.clone(),
                    },
                    None => DeletionOutcome::Failed {
                        digest: digest.to_owned(),
                        code: "Unreported".to_owned(),
                        reason: "The registry reported neither a deletion nor a failure"
                            .to_owned(),
                    },
                }
            })
            .collect();

        Self { outcomes }
    }
}

/// The result of expiring images in one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirationReport {
    /// The repository images were expired from.
    pub repository_name: String,

    /// One report per batch delete call, in call order.
    pub chunks: Vec<ChunkReport>,
}

impl ExpirationReport {
    fn new(repository_name: &str) -> Self {
        Self {
            repository_name: repository_name.to_owned(),
            chunks: Vec::new(),
        }
    }

    /// Every outcome, in the order images were deleted.
    pub fn outcomes(&self) -> impl Iterator<Item = &DeletionOutcome> {
        self.chunks.iter().flat_map(|chunk| chunk.outcomes.iter())
    }

    /// Digests of deleted images.
    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.outcomes()
            .filter(|outcome| outcome.is_deleted())
            .map(DeletionOutcome::digest)
    }

    /// Digest, code and reason of each image which could not be deleted.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.outcomes().filter_map(|outcome| match outcome {
            DeletionOutcome::Failed {
                digest,
                code,
                reason,
            } => Some((digest.as_str(), code.as_str(), reason.as_str())),
            DeletionOutcome::Deleted { .. } => None,
        })
    }

    /// Number of deleted images.
    pub fn deleted_count(&self) -> usize {
        self.deleted().count()
    }

    /// Number of images which could not be deleted.
    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// Whether nothing was selected for deletion.
    pub fn is_empty(&self) -> bool {
        self.outcomes().next().is_none()
    }
}

/// Expiration stopped early. The report holds the chunks completed before the error.
#[derive(Debug, thiserror::Error)]
#[error(
    "Expiring images in {} stopped after {} deletions",
    .report.repository_name,
    .report.deleted_count()
)]
pub struct ExpirationError {
    /// Outcomes recorded before the failure.
    pub report: ExpirationReport,

    /// The error which stopped expiration.
    #[source]
    pub source: EcrError,
}
