use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone as _, Utc};
use ecr::expiration::{DeletionOutcome, UntaggedImageExpiration};
use ecr::{delete_untagged_images, Backoff, DriverErrorKind, EcrClient, MemoryDriver};
use ecr_driver::{
    BatchDeleteOutput, DescribeImages, DescribeRepositories, Driver, DriverError, ImageId,
    ImageRecord, Page, ReplicationConfiguration, RepositoryRecord,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap()
}

fn days_ago(days: i64) -> DateTime<Utc> {
    now() - chrono::Duration::days(days)
}

async fn registry(page_size: usize) -> Arc<MemoryDriver> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let driver = Arc::new(MemoryDriver::new().with_page_size(page_size));
    driver.create_repository("demo", days_ago(1000)).await;
    driver
}

#[tokio::test]
async fn expires_only_old_untagged_images() {
    let driver = registry(100).await;
    driver.push_image("demo", "sha256:a", &[], days_ago(400)).await.unwrap();
    driver
        .push_image("demo", "sha256:b", &["release"], days_ago(400))
        .await
        .unwrap();
    driver.push_image("demo", "sha256:c", &[], days_ago(1)).await.unwrap();
    let client = EcrClient::from_shared(driver.clone());

    let report = UntaggedImageExpiration::new(DAY * 365)
        .run_at(&client, "demo", now())
        .await
        .unwrap();

    assert_eq!(report.repository_name, "demo");
    assert_eq!(report.chunks.len(), 1);
    assert_eq!(report.deleted().collect::<Vec<_>>(), vec!["sha256:a"]);
    assert_eq!(report.failed_count(), 0);
    assert_eq!(driver.digests("demo").await, vec!["sha256:b", "sha256:c"]);
}

#[tokio::test]
async fn records_partial_failures() {
    let driver = registry(100).await;
    for digest in ["sha256:1", "sha256:2", "sha256:3"] {
        driver.push_image("demo", digest, &[], days_ago(30)).await.unwrap();
    }
    driver
        .reject_delete(
            "sha256:2",
            "ImageReferencedByManifestList",
            "Image is referenced by a manifest list",
        )
        .await;
    let client = EcrClient::from_shared(driver.clone());

    let report = UntaggedImageExpiration::new(DAY)
        .run_at(&client, "demo", now())
        .await
        .unwrap();

    assert_eq!(report.deleted_count(), 2);
    assert_eq!(
        report.failed().collect::<Vec<_>>(),
        vec![(
            "sha256:2",
            "ImageReferencedByManifestList",
            "Image is referenced by a manifest list"
        )]
    );
    assert_eq!(driver.digests("demo").await, vec!["sha256:2"]);
}

#[tokio::test]
async fn partial_failure_continues_with_next_chunk() {
    let driver = registry(100).await;
    for digest in ["sha256:1", "sha256:2", "sha256:3", "sha256:4"] {
        driver.push_image("demo", digest, &[], days_ago(30)).await.unwrap();
    }
    driver
        .reject_delete("sha256:1", "ImageReferencedByManifestList", "in use")
        .await;
    let client = EcrClient::from_shared(driver.clone());

    let report = UntaggedImageExpiration::new(DAY)
        .with_chunk_size(2)
        .run_at(&client, "demo", now())
        .await
        .unwrap();

    assert_eq!(report.chunks.len(), 2);
    assert_eq!(
        report.chunks[0].outcomes,
        vec![
            DeletionOutcome::Failed {
                digest: "sha256:1".into(),
                code: "ImageReferencedByManifestList".into(),
                reason: "in use".into(),
            },
            DeletionOutcome::Deleted {
                digest: "sha256:2".into()
            },
        ]
    );
    assert!(report.chunks[1].outcomes.iter().all(DeletionOutcome::is_deleted));
    assert_eq!(
        report.deleted().collect::<Vec<_>>(),
        vec!["sha256:2", "sha256:3", "sha256:4"]
    );
    assert_eq!(driver.digests("demo").await, vec!["sha256:1"]);
}

#[tokio::test]
async fn empty_repository_deletes_nothing() {
    let driver = registry(100).await;
    let client = EcrClient::from_shared(driver.clone());

    let report = delete_untagged_images(&client, "demo", DAY).await.unwrap();
    assert!(report.is_empty());
    assert!(report.chunks.is_empty());
}

#[tokio::test]
async fn flattens_pages_and_chunks_deletes() {
    let driver = registry(2).await;
    for index in 0..5 {
        driver
            .push_image("demo", &format!("sha256:{index}"), &[], days_ago(10))
            .await
            .unwrap();
    }
    driver
        .push_image("demo", "sha256:tagged", &["latest"], days_ago(10))
        .await
        .unwrap();
    let client = EcrClient::from_shared(driver.clone());

    let report = UntaggedImageExpiration::new(DAY)
        .with_chunk_size(2)
        .run_at(&client, "demo", now())
        .await
        .unwrap();

    let sizes: Vec<usize> = report.chunks.iter().map(|chunk| chunk.outcomes.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(report.outcomes().all(DeletionOutcome::is_deleted));
    assert_eq!(driver.digests("demo").await, vec!["sha256:tagged"]);
}

#[tokio::test]
async fn missing_repository_is_an_error() {
    let client = EcrClient::new(MemoryDriver::new());

    let error = delete_untagged_images(&client, "missing", DAY)
        .await
        .unwrap_err();
    assert!(error.report.is_empty());
    assert_eq!(error.source.kind(), Some(DriverErrorKind::RepositoryNotFound));
}

/// Fails batch deletes in a scripted order: `Some(kind)` fails the call,
/// `None` (or an exhausted script) passes it through.
#[derive(Debug)]
struct ScriptedDeletes {
    inner: Arc<MemoryDriver>,
    script: Mutex<VecDeque<Option<DriverErrorKind>>>,
    calls: AtomicUsize,
}

impl ScriptedDeletes {
    fn new(inner: Arc<MemoryDriver>, script: Vec<Option<DriverErrorKind>>) -> Self {
        Self {
            inner,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Driver for ScriptedDeletes {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn describe_repositories(
        &self,
        request: DescribeRepositories,
    ) -> Result<Page<RepositoryRecord>, DriverError> {
        self.inner.describe_repositories(request).await
    }

    async fn describe_images(
        &self,
        request: DescribeImages,
    ) -> Result<Page<ImageRecord>, DriverError> {
        self.inner.describe_images(request).await
    }

    async fn batch_delete_images(
        &self,
        repository_name: &str,
        image_ids: &[ImageId],
    ) -> Result<BatchDeleteOutput, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().flatten();
        if let Some(kind) = step {
            return Err(DriverError::new(self.name(), kind, "scripted failure"));
        }
        self.inner.batch_delete_images(repository_name, image_ids).await
    }

    async fn put_replication_configuration(
        &self,
        configuration: &ReplicationConfiguration,
    ) -> Result<ReplicationConfiguration, DriverError> {
        self.inner.put_replication_configuration(configuration).await
    }

    async fn put_registry_policy(&self, policy_text: &str) -> Result<(), DriverError> {
        self.inner.put_registry_policy(policy_text).await
    }

    async fn set_repository_policy(
        &self,
        repository_name: &str,
        policy_text: &str,
    ) -> Result<(), DriverError> {
        self.inner.set_repository_policy(repository_name, policy_text).await
    }
}

#[tokio::test]
async fn failed_batch_keeps_earlier_outcomes() {
    let driver = registry(100).await;
    for index in 0..3 {
        driver
            .push_image("demo", &format!("sha256:{index}"), &[], days_ago(10))
            .await
            .unwrap();
    }
    let client = EcrClient::new(ScriptedDeletes::new(
        driver.clone(),
        vec![None, Some(DriverErrorKind::PermissionDenied)],
    ));

    let error = UntaggedImageExpiration::new(DAY)
        .with_chunk_size(2)
        .run_at(&client, "demo", now())
        .await
        .unwrap_err();

    assert_eq!(error.source.kind(), Some(DriverErrorKind::PermissionDenied));
    assert_eq!(
        error.report.deleted().collect::<Vec<_>>(),
        vec!["sha256:0", "sha256:1"]
    );
    assert_eq!(driver.digests("demo").await, vec!["sha256:2"]);
}

#[tokio::test(start_paused = true)]
async fn throttled_batches_are_retried_with_backoff() {
    let driver = registry(100).await;
    driver.push_image("demo", "sha256:old", &[], days_ago(10)).await.unwrap();
    let scripted = Arc::new(ScriptedDeletes::new(
        driver.clone(),
        vec![Some(DriverErrorKind::Throttled)],
    ));
    let client = EcrClient::from_shared(scripted.clone());

    let report = UntaggedImageExpiration::new(DAY)
        .with_backoff(Backoff::default())
        .run_at(&client, "demo", now())
        .await
        .unwrap();

    assert_eq!(scripted.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.deleted().collect::<Vec<_>>(), vec!["sha256:old"]);
}

#[tokio::test]
async fn throttling_without_backoff_stops_the_run() {
    let driver = registry(100).await;
    driver.push_image("demo", "sha256:old", &[], days_ago(10)).await.unwrap();
    let client = EcrClient::new(ScriptedDeletes::new(
        driver.clone(),
        vec![Some(DriverErrorKind::Throttled)],
    ));

    let error = UntaggedImageExpiration::new(DAY)
        .run_at(&client, "demo", now())
        .await
        .unwrap_err();

    assert_eq!(error.source.kind(), Some(DriverErrorKind::Throttled));
    assert_eq!(driver.digests("demo").await, vec!["sha256:old"]);
}
