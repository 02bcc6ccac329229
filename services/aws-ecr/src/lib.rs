//! Registry driver backed by the Amazon ECR API.

use std::fmt;

use aws_config::BehaviorVersion;
use aws_sdk_ecr::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ecr::primitives::DateTime as AwsDateTime;
use chrono::{DateTime, Utc};
use ecr_driver::{
    BatchDeleteOutput, DescribeImages, DescribeRepositories, Driver, DriverError,
    DriverErrorBuilder, DriverErrorKind, ImageFailure, ImageId, ImageRecord, Page,
    RepositoryRecord,
};
use serde::Deserialize;

mod replication;

const ENGINE: &str = "aws-ecr";

/// Connection settings for ECR.
///
/// Every field is optional; anything left unset is resolved by the standard
/// AWS configuration chain (environment, profile files, instance metadata).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AwsEcrConfiguration {
    /// AWS region, e.g. `us-east-1`.
    pub region: Option<String>,

    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,

    /// Override the service endpoint, e.g. for a local emulator.
    pub endpoint_url: Option<String>,
}

impl AwsEcrConfiguration {
    /// Load the AWS configuration and build a driver from it.
    #[tracing::instrument]
    pub async fn driver(&self) -> AwsEcrDriver {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }

        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;
        tracing::debug!(region = ?config.region(), "Loaded AWS configuration for ECR");
        AwsEcrDriver::new(aws_sdk_ecr::Client::new(&config))
    }
}

/// A registry driver which talks to Amazon ECR.
#[derive(Debug, Clone)]
pub struct AwsEcrDriver {
    client: aws_sdk_ecr::Client,
}

impl AwsEcrDriver {
    /// Wrap an existing ECR client.
    pub fn new(client: aws_sdk_ecr::Client) -> Self {
        Self { client }
    }

    /// Create a driver from the ambient AWS configuration.
    pub async fn from_env() -> Self {
        AwsEcrConfiguration::default().driver().await
    }

    /// Access the inner ECR client.
    pub fn client(&self) -> &aws_sdk_ecr::Client {
        &self.client
    }
}

fn kind_from_code(code: Option<&str>) -> DriverErrorKind {
    match code {
        Some("RepositoryNotFoundException") => DriverErrorKind::RepositoryNotFound,
        Some("ImageNotFoundException") => DriverErrorKind::ImageNotFound,
        Some("ThrottlingException" | "TooManyRequestsException" | "RequestLimitExceeded") => {
            DriverErrorKind::Throttled
        }
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "ExpiredTokenException"
            | "InvalidSignatureException",
        ) => DriverErrorKind::PermissionDenied,
        Some("InvalidParameterException" | "ValidationException") => {
            DriverErrorKind::InvalidRequest
        }
        Some("ServerException" | "ServiceUnavailableException") => {
            DriverErrorKind::ServiceUnavailable
        }
        _ => DriverErrorKind::Other,
    }
}

fn driver_error<E, R>(operation: &'static str, error: SdkError<E, R>) -> DriverErrorBuilder
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    let kind = match &error {
        SdkError::ConstructionFailure(_) => DriverErrorKind::InvalidRequest,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => DriverErrorKind::Io,
        SdkError::ResponseError(_) => DriverErrorKind::SerializationError,
        _ => kind_from_code(error.code()),
    };

    tracing::trace!(%kind, operation, code = ?error.code(), "ECR request failed");
    DriverError::builder(ENGINE, kind, error).operation(operation)
}

fn timestamp(value: Option<&AwsDateTime>) -> Option<DateTime<Utc>> {
    value.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

fn image_identifier(id: &ImageId) -> aws_sdk_ecr::types::ImageIdentifier {
    let builder = aws_sdk_ecr::types::ImageIdentifier::builder();
    match id {
        ImageId::Digest(digest) => builder.image_digest(digest).build(),
        ImageId::Tag(tag) => builder.image_tag(tag).build(),
    }
}

fn image_id(identifier: &aws_sdk_ecr::types::ImageIdentifier) -> Option<ImageId> {
    identifier
        .image_digest()
        .map(ImageId::digest)
        .or_else(|| identifier.image_tag().map(ImageId::tag))
}

fn repository_record(repository: &aws_sdk_ecr::types::Repository) -> RepositoryRecord {
    RepositoryRecord {
        repository_name: repository.repository_name().map(str::to_owned),
        registry_id: repository.registry_id().map(str::to_owned),
        repository_arn: repository.repository_arn().map(str::to_owned),
        repository_uri: repository.repository_uri().map(str::to_owned),
        created_at: timestamp(repository.created_at()),
    }
}

fn image_record(detail: &aws_sdk_ecr::types::ImageDetail) -> ImageRecord {
    ImageRecord {
        repository_name: detail.repository_name().map(str::to_owned),
        registry_id: detail.registry_id().map(str::to_owned),
        image_digest: detail.image_digest().map(str::to_owned),
        image_tags: detail.image_tags().to_vec(),
        image_size_in_bytes: detail.image_size_in_bytes(),
        image_pushed_at: timestamp(detail.image_pushed_at()),
        last_recorded_pull_time: timestamp(detail.last_recorded_pull_time()),
        image_manifest_media_type: detail.image_manifest_media_type().map(str::to_owned),
        artifact_media_type: detail.artifact_media_type().map(str::to_owned),
    }
}

fn image_failure(failure: &aws_sdk_ecr::types::ImageFailure) -> ImageFailure {
    ImageFailure {
        image_id: failure.image_id().and_then(image_id),
        code: failure
            .failure_code()
            .map(|code| code.as_str().to_owned())
            .unwrap_or_default(),
        reason: failure.failure_reason().unwrap_or_default().to_owned(),
    }
}

#[async_trait::async_trait]
impl Driver for AwsEcrDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn describe_repositories(
        &self,
        request: DescribeRepositories,
    ) -> Result<Page<RepositoryRecord>, DriverError> {
        let output = self
            .client
            .describe_repositories()
            .set_repository_names(request.repository_names)
            .set_next_token(request.next_token)
            .send()
            .await
            .map_err(|error| driver_error("DescribeRepositories", error).build())?;

        Ok(Page {
            items: output.repositories().iter().map(repository_record).collect(),
            next_token: output.next_token().map(str::to_owned),
        })
    }

    async fn describe_images(
        &self,
        request: DescribeImages,
    ) -> Result<Page<ImageRecord>, DriverError> {
        let image_ids = request
            .image_ids
            .as_ref()
            .map(|ids| ids.iter().map(image_identifier).collect());

        let output = self
            .client
            .describe_images()
            .repository_name(&request.repository_name)
            .set_image_ids(image_ids)
            .set_next_token(request.next_token)
            .send()
            .await
            .map_err(|error| {
                driver_error("DescribeImages", error)
                    .repository(&request.repository_name)
                    .build()
            })?;

        Ok(Page {
            items: output.image_details().iter().map(image_record).collect(),
            next_token: output.next_token().map(str::to_owned),
        })
    }

    async fn batch_delete_images(
        &self,
        repository_name: &str,
        image_ids: &[ImageId],
    ) -> Result<BatchDeleteOutput, DriverError> {
        let output = self
            .client
            .batch_delete_image()
            .repository_name(repository_name)
            .set_image_ids(Some(image_ids.iter().map(image_identifier).collect()))
            .send()
            .await
            .map_err(|error| {
                driver_error("BatchDeleteImage", error)
                    .repository(repository_name)
                    .build()
            })?;

        Ok(BatchDeleteOutput {
            deleted: output.image_ids().iter().filter_map(image_id).collect(),
            failures: output.failures().iter().map(image_failure).collect(),
        })
    }

    async fn put_replication_configuration(
        &self,
        configuration: &ecr_driver::ReplicationConfiguration,
    ) -> Result<ecr_driver::ReplicationConfiguration, DriverError> {
        let request = replication::to_service(configuration).map_err(|error| {
            DriverError::builder(ENGINE, DriverErrorKind::InvalidRequest, error)
                .operation("PutReplicationConfiguration")
                .build()
        })?;

        let output = self
            .client
            .put_replication_configuration()
            .replication_configuration(request)
            .send()
            .await
            .map_err(|error| driver_error("PutReplicationConfiguration", error).build())?;

        Ok(output
            .replication_configuration()
            .map(replication::from_service)
            .unwrap_or_else(|| configuration.clone()))
    }

    async fn put_registry_policy(&self, policy_text: &str) -> Result<(), DriverError> {
        self.client
            .put_registry_policy()
            .policy_text(policy_text)
            .send()
            .await
            .map_err(|error| driver_error("PutRegistryPolicy", error).build())?;
        Ok(())
    }

    async fn set_repository_policy(
        &self,
        repository_name: &str,
        policy_text: &str,
    ) -> Result<(), DriverError> {
        self.client
            .set_repository_policy()
            .repository_name(repository_name)
            .policy_text(policy_text)
            .send()
            .await
            .map_err(|error| {
                driver_error("SetRepositoryPolicy", error)
                    .repository(repository_name)
                    .build()
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn service_codes_map_to_kinds() {
        assert_eq!(
            kind_from_code(Some("RepositoryNotFoundException")),
            DriverErrorKind::RepositoryNotFound
        );
        assert_eq!(
            kind_from_code(Some("ImageNotFoundException")),
            DriverErrorKind::ImageNotFound
        );
        assert_eq!(
            kind_from_code(Some("ThrottlingException")),
            DriverErrorKind::Throttled
        );
        assert_eq!(
            kind_from_code(Some("AccessDeniedException")),
            DriverErrorKind::PermissionDenied
        );
        assert_eq!(kind_from_code(Some("Frobulated")), DriverErrorKind::Other);
        assert_eq!(kind_from_code(None), DriverErrorKind::Other);
    }

    #[test]
    fn timestamps_are_utc() {
        let pushed = AwsDateTime::from_secs(1_700_000_000);
        let converted = timestamp(Some(&pushed)).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert!(timestamp(None).is_none());
    }

    #[test]
    fn image_identifiers_prefer_digest() {
        let both = aws_sdk_ecr::types::ImageIdentifier::builder()
            .image_digest("sha256:abc")
            .image_tag("latest")
            .build();
        assert_eq!(image_id(&both), Some(ImageId::digest("sha256:abc")));

        let tagged = image_identifier(&ImageId::tag("v1"));
        assert_eq!(tagged.image_tag(), Some("v1"));
        assert_eq!(tagged.image_digest(), None);
    }

    #[test]
    fn untagged_detail_has_no_tags() {
        let detail = aws_sdk_ecr::types::ImageDetail::builder()
            .repository_name("demo")
            .image_digest("sha256:d1")
            .image_pushed_at(AwsDateTime::from_secs(1_600_000_000))
            .build();

        let record = image_record(&detail);
        assert_eq!(record.image_digest.as_deref(), Some("sha256:d1"));
        assert!(record.image_tags.is_empty());
        assert_eq!(
            record.image_pushed_at.map(|t| t.timestamp()),
            Some(1_600_000_000)
        );
    }

    #[test]
    fn configuration_deserializes() {
        let config: AwsEcrConfiguration =
            serde_json::from_str(r#"{"region": "us-east-1", "endpoint-url": "http://localhost:4566"}"#)
                .unwrap();
        assert_eq!(config.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert!(config.profile.is_none());
    }
}
