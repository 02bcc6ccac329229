//! Cross-region and cross-account replication.
//!
//! Replication needs both sides configured: the source registry gets the
//! replication rules, and each destination registry gets a policy allowing
//! the source accounts to replicate into it.

#[doc(inline)]
pub use ecr_driver::replication::{
    ReplicationConfiguration, ReplicationDestination, ReplicationRule, RepositoryFilter,
    RepositoryFilterType,
};

use crate::policy::{put_registry_policy, PolicyDocument};
use crate::{EcrClient, EcrError};

/// Replace the replication configuration of the client's registry.
///
/// Returns the configuration the registry accepted.
#[tracing::instrument(skip(client, rules), fields(rules = rules.len()))]
pub async fn configure_replication_for_source_registry(
    client: &EcrClient,
    rules: Vec<ReplicationRule>,
) -> Result<ReplicationConfiguration, EcrError> {
    let configuration = ReplicationConfiguration::from(rules);
    let accepted = client
        .driver()
        .put_replication_configuration(&configuration)
        .await?;
    tracing::debug!(rules = accepted.rules.len(), "Configured replication");
    Ok(accepted)
}

/// Allow source accounts to replicate into the client's registry, which is
/// `target_account_id` in `target_region`.
///
/// Replaces the registry policy, and returns the policy which now applies.
pub async fn configure_replication_for_destination_registry<S: AsRef<str>>(
    client: &EcrClient,
    source_account_ids: &[S],
    target_account_id: &str,
    target_region: &str,
) -> Result<PolicyDocument, EcrError> {
    let policy =
        PolicyDocument::replication_destination(source_account_ids, target_account_id, target_region);
    put_registry_policy(client, &policy).await?;
    Ok(policy)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ecr_driver::DriverErrorKind;

    use super::*;
    use crate::MemoryDriver;

    #[tokio::test]
    async fn source_registry_rules() {
        let driver = Arc::new(MemoryDriver::new());
        let client = EcrClient::from_shared(driver.clone());

        let rules = vec![ReplicationRule::new(vec![ReplicationDestination::new(
            "us-west-2",
            "222222222222",
        )])
        .with_filter(RepositoryFilter::prefix("app-"))];

        let accepted = configure_replication_for_source_registry(&client, rules)
            .await
            .unwrap();

        assert_eq!(accepted.rules.len(), 1);
        assert_eq!(accepted.rules[0].destinations[0].region, "us-west-2");
        assert_eq!(driver.replication_configuration().await, Some(accepted));
    }

    #[tokio::test]
    async fn destination_registry_policy() {
        let driver = Arc::new(MemoryDriver::with_registry("222222222222", "us-west-2"));
        let client = EcrClient::from_shared(driver.clone());

        let policy = configure_replication_for_destination_registry(
            &client,
            &["111111111111", "333333333333"],
            "222222222222",
            "us-west-2",
        )
        .await
        .unwrap();

        let stored: PolicyDocument =
            serde_json::from_str(&driver.registry_policy().await.unwrap()).unwrap();
        assert_eq!(stored, policy);
        assert_eq!(
            stored.statement[0].resource.as_deref(),
            Some("arn:aws:ecr:us-west-2:222222222222:repository/*")
        );
    }

    #[tokio::test]
    async fn rejected_configuration_is_an_error() {
        let driver = Arc::new(MemoryDriver::new());
        driver.fail_next(DriverErrorKind::InvalidRequest).await;
        let client = EcrClient::from_shared(driver.clone());

        let error = configure_replication_for_source_registry(&client, Vec::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), Some(DriverErrorKind::InvalidRequest));
        assert!(driver.replication_configuration().await.is_none());
    }
}
