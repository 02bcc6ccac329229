use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use ecr_driver::{
    BatchDeleteOutput, DescribeImages, DescribeRepositories, Driver, DriverError,
    DriverErrorKind, ImageFailure, ImageId, ImageRecord, Page, ReplicationConfiguration,
    RepositoryRecord,
};
use tokio::sync::RwLock;

const ENGINE: &str = "memory";
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug)]
struct MemoryRepository {
    record: RepositoryRecord,
    images: Vec<ImageRecord>,
    policy: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryRegistry {
    repositories: BTreeMap<String, MemoryRepository>,
    replication: Option<ReplicationConfiguration>,
    policy: Option<String>,
    failures: VecDeque<DriverErrorKind>,
    rejected: HashMap<String, (String, String)>,
}

/// Registry driver which keeps repositories and images in memory.
///
/// Pages are cut at a configurable size, and failures can be injected, so
/// callers can exercise pagination and error handling without a live registry.
#[derive(Debug)]
pub struct MemoryDriver {
    registry_id: String,
    region: String,
    page_size: usize,
    state: RwLock<MemoryRegistry>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Create an empty registry for account `123456789012` in `us-east-1`.
    pub fn new() -> Self {
        Self::with_registry("123456789012", "us-east-1")
    }

    /// Create an empty registry for a specific account and region.
    pub fn with_registry(registry_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            registry_id: registry_id.into(),
            region: region.into(),
            page_size: DEFAULT_PAGE_SIZE,
            state: RwLock::new(MemoryRegistry::default()),
        }
    }

    /// Return at most `page_size` records per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a repository.
    pub async fn create_repository(
        &self,
        repository_name: &str,
        created_at: DateTime<Utc>,
    ) -> RepositoryRecord {
        let record = RepositoryRecord {
            repository_name: Some(repository_name.to_owned()),
            registry_id: Some(self.registry_id.clone()),
            repository_arn: Some(format!(
                "arn:aws:ecr:{}:{}:repository/{}",
                self.region, self.registry_id, repository_name
            )),
            repository_uri: Some(format!(
                "{}.dkr.ecr.{}.amazonaws.com/{}",
                self.registry_id, self.region, repository_name
            )),
            created_at: Some(created_at),
        };

        let mut state = self.state.write().await;
        state.repositories.insert(
            repository_name.to_owned(),
            MemoryRepository {
                record: record.clone(),
                images: Vec::new(),
                policy: None,
            },
        );
        record
    }

    /// Push an image. Tags already pointing at another image move to this one.
    pub async fn push_image(
        &self,
        repository_name: &str,
        digest: &str,
        tags: &[&str],
        pushed_at: DateTime<Utc>,
    ) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        let repository = state
            .repositories
            .get_mut(repository_name)
            .ok_or_else(|| repository_not_found("PutImage", repository_name))?;

        for image in repository.images.iter_mut() {
            image.image_tags.retain(|tag| !tags.contains(&tag.as_str()));
        }
        repository
            .images
            .retain(|image| image.image_digest.as_deref() != Some(digest));

        repository.images.push(ImageRecord {
            repository_name: Some(repository_name.to_owned()),
            registry_id: Some(self.registry_id.clone()),
            image_digest: Some(digest.to_owned()),
            image_tags: tags.iter().map(|tag| (*tag).to_owned()).collect(),
            image_size_in_bytes: Some(0),
            image_pushed_at: Some(pushed_at),
            last_recorded_pull_time: None,
            image_manifest_media_type: Some(
                "application/vnd.docker.distribution.manifest.v2+json".to_owned(),
            ),
            artifact_media_type: None,
        });
        Ok(())
    }

    /// Fail the next driver call with an error of `kind`.
    pub async fn fail_next(&self, kind: DriverErrorKind) {
        self.state.write().await.failures.push_back(kind);
    }

    /// Report a failure for this digest whenever it is batch deleted.
    pub async fn reject_delete(&self, digest: &str, code: &str, reason: &str) {
        self.state
            .write()
            .await
            .rejected
            .insert(digest.to_owned(), (code.to_owned(), reason.to_owned()));
    }

    /// Digests currently stored in a repository, in push order.
    pub async fn digests(&self, repository_name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .repositories
            .get(repository_name)
            .map(|repository| {
                repository
                    .images
                    .iter()
                    .filter_map(|image| image.image_digest.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The current replication configuration.
    pub async fn replication_configuration(&self) -> Option<ReplicationConfiguration> {
        self.state.read().await.replication.clone()
    }

    /// The current registry policy text.
    pub async fn registry_policy(&self) -> Option<String> {
        self.state.read().await.policy.clone()
    }

    /// The current policy text of a repository.
    pub async fn repository_policy(&self, repository_name: &str) -> Option<String> {
        self.state
            .read()
            .await
            .repositories
            .get(repository_name)
            .and_then(|repository| repository.policy.clone())
    }

    fn injected(&self, state: &mut MemoryRegistry, operation: &'static str) -> Result<(), DriverError> {
        match state.failures.pop_front() {
            Some(kind) => Err(DriverError::builder(ENGINE, kind, "injected failure")
                .operation(operation)
                .build()),
            None => Ok(()),
        }
    }

    fn page<T: Clone>(
        &self,
        items: &[T],
        operation: &'static str,
        next_token: Option<String>,
    ) -> Result<Page<T>, DriverError> {
        let start = match next_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                DriverError::builder(
                    ENGINE,
                    DriverErrorKind::InvalidRequest,
                    format!("invalid pagination token {token:?}"),
                )
                .operation(operation)
                .build()
            })?,
            None => 0,
        };

        let end = usize::min(start.saturating_add(self.page_size), items.len());
        let start = usize::min(start, end);
        Ok(Page {
            items: items[start..end].to_vec(),
            next_token: (end < items.len()).then(|| end.to_string()),
        })
    }
}

fn repository_not_found(operation: &'static str, repository_name: &str) -> DriverError {
    DriverError::builder(
        ENGINE,
        DriverErrorKind::RepositoryNotFound,
        format!("The repository with name '{repository_name}' does not exist"),
    )
    .operation(operation)
    .repository(repository_name)
    .build()
}

fn matches(image: &ImageRecord, id: &ImageId) -> bool {
    match id {
        ImageId::Digest(digest) => image.image_digest.as_deref() == Some(digest.as_str()),
        ImageId::Tag(tag) => image.image_tags.iter().any(|t| t == tag),
    }
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn describe_repositories(
        &self,
        request: DescribeRepositories,
    ) -> Result<Page<RepositoryRecord>, DriverError> {
        const OPERATION: &str = "DescribeRepositories";
        let mut state = self.state.write().await;
        self.injected(&mut state, OPERATION)?;

        if let Some(names) = &request.repository_names {
            if let Some(missing) = names
                .iter()
                .find(|name| !state.repositories.contains_key(name.as_str()))
            {
                return Err(repository_not_found(OPERATION, missing));
            }
        }

        let records: Vec<RepositoryRecord> = state
            .repositories
            .iter()
            .filter(|(name, _)| {
                request
                    .repository_names
                    .as_ref()
                    .map_or(true, |names| names.contains(*name))
            })
            .map(|(_, repository)| repository.record.clone())
            .collect();

        self.page(&records, OPERATION, request.next_token)
    }

    async fn describe_images(
        &self,
        request: DescribeImages,
    ) -> Result<Page<ImageRecord>, DriverError> {
        const OPERATION: &str = "DescribeImages";
        let mut state = self.state.write().await;
        self.injected(&mut state, OPERATION)?;

        let repository = state
            .repositories
            .get(&request.repository_name)
            .ok_or_else(|| repository_not_found(OPERATION, &request.repository_name))?;

        let records: Vec<ImageRecord> = match &request.image_ids {
            None => repository.images.clone(),
            Some(ids) => {
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    let image = repository
                        .images
                        .iter()
                        .find(|image| matches(image, id))
                        .ok_or_else(|| {
                            DriverError::builder(
                                ENGINE,
                                DriverErrorKind::ImageNotFound,
                                format!("The image with imageId {id} does not exist"),
                            )
                            .operation(OPERATION)
                            .repository(&request.repository_name)
                            .build()
                        })?;
                    records.push(image.clone());
                }
                records
            }
        };

        self.page(&records, OPERATION, request.next_token)
    }

    async fn batch_delete_images(
        &self,
        repository_name: &str,
        image_ids: &[ImageId],
    ) -> Result<BatchDeleteOutput, DriverError> {
        const OPERATION: &str = "BatchDeleteImage";
        let mut state = self.state.write().await;
        self.injected(&mut state, OPERATION)?;

        let MemoryRegistry {
            repositories,
            rejected,
            ..
        } = &mut *state;
        let repository = repositories
            .get_mut(repository_name)
            .ok_or_else(|| repository_not_found(OPERATION, repository_name))?;

        let mut output = BatchDeleteOutput::default();
        for id in image_ids {
            if let Some((code, reason)) = id.as_digest().and_then(|digest| rejected.get(digest)) {
                output.failures.push(ImageFailure {
                    image_id: Some(id.clone()),
                    code: code.clone(),
                    reason: reason.clone(),
                });
                continue;
            }

            match repository.images.iter().position(|image| matches(image, id)) {
                Some(index) => {
                    let image = repository.images.remove(index);
                    if let Some(digest) = image.image_digest {
                        output.deleted.push(ImageId::Digest(digest));
                    }
                }
                None => output.failures.push(ImageFailure {
                    image_id: Some(id.clone()),
                    code: "ImageNotFound".to_owned(),
                    reason: "Requested image not found".to_owned(),
                }),
            }
        }

        Ok(output)
    }

    async fn put_replication_configuration(
        &self,
        configuration: &ReplicationConfiguration,
    ) -> Result<ReplicationConfiguration, DriverError> {
        let mut state = self.state.write().await;
        self.injected(&mut state, "PutReplicationConfiguration")?;
        state.replication = Some(configuration.clone());
        Ok(configuration.clone())
    }

    async fn put_registry_policy(&self, policy_text: &str) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        self.injected(&mut state, "PutRegistryPolicy")?;
        state.policy = Some(policy_text.to_owned());
        Ok(())
    }

    async fn set_repository_policy(
        &self,
        repository_name: &str,
        policy_text: &str,
    ) -> Result<(), DriverError> {
        const OPERATION: &str = "SetRepositoryPolicy";
        let mut state = self.state.write().await;
        self.injected(&mut state, OPERATION)?;
        let repository = state
            .repositories
            .get_mut(repository_name)
            .ok_or_else(|| repository_not_found(OPERATION, repository_name))?;
        repository.policy = Some(policy_text.to_owned());
        Ok(())
    }
}
