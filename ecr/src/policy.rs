//! Permission policies for cross-account access.
//!
//! Each helper builds a complete policy document and puts it, replacing
//! whatever policy was there before.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EcrClient, EcrError};

/// The IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Actions needed to pull an image.
pub const PULL_ACTIONS: &[&str] = &["ecr:BatchGetImage", "ecr:GetDownloadUrlForLayer"];

/// Actions a source registry needs on a replication destination.
pub const REPLICATION_ACTIONS: &[&str] = &["ecr:CreateRepository", "ecr:ReplicateImage"];

const LAMBDA_SERVICE: &str = "lambda.amazonaws.com";

/// The root principal of an AWS account.
pub fn account_root(account_id: &str) -> String {
    format!("arn:aws:iam::{account_id}:root")
}

/// Whether a statement grants or denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Grant the actions.
    Allow,
    /// Refuse the actions, overriding any grant.
    Deny,
}

/// Who a statement applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    /// IAM principals, by ARN.
    #[serde(rename = "AWS")]
    Aws(Vec<String>),

    /// An AWS service, e.g. `lambda.amazonaws.com`.
    Service(String),
}

/// A single policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Allow or deny
    pub effect: Effect,

    /// Who the statement applies to
    pub principal: Principal,

    /// Actions, e.g. `ecr:BatchGetImage`
    pub action: Vec<String>,

    /// Resource ARN, for registry policies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Conditions, keyed by operator then by context key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Statement {
    /// Allow `principal` to perform `actions`.
    pub fn allow(principal: Principal, actions: &[&str]) -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal,
            action: actions.iter().map(|action| (*action).to_owned()).collect(),
            resource: None,
            condition: BTreeMap::new(),
        }
    }

    /// Name the statement.
    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Restrict the statement to a resource.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Add a condition, e.g. `StringLike` / `aws:sourceARN`.
    pub fn condition(mut self, operator: &str, key: &str, values: Vec<String>) -> Self {
        self.condition
            .entry(operator.to_owned())
            .or_default()
            .insert(key.to_owned(), values);
        self
    }
}

/// A complete permissions policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    pub version: String,

    /// Statements, evaluated together
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// A policy made of `statements`.
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_owned(),
            statement: statements,
        }
    }

    /// Serialize the policy for the registry.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Let other accounts pull images.
    pub fn cross_account_pull<S: AsRef<str>>(account_ids: &[S]) -> Self {
        Self::new(vec![cross_account_statement(account_ids)])
    }

    /// Let other accounts, and Lambda functions in those accounts whose names
    /// start with `function_name_prefix`, pull images.
    pub fn cross_account_lambda_get<S: AsRef<str>>(
        account_ids: &[S],
        function_name_prefix: &str,
    ) -> Self {
        let source_arns = account_ids
            .iter()
            .map(|id| {
                format!(
                    "arn:aws:lambda:*:{}:function:{}*",
                    id.as_ref(),
                    function_name_prefix
                )
            })
            .collect();

        Self::new(vec![
            cross_account_statement(account_ids),
            Statement::allow(Principal::Service(LAMBDA_SERVICE.to_owned()), PULL_ACTIONS)
                .sid("LambdaECRImageCrossAccountRetrievalPolicy")
                .condition("StringLike", "aws:sourceARN", source_arns),
        ])
    }

    /// Let source accounts replicate into every repository of the target registry.
    pub fn replication_destination<S: AsRef<str>>(
        source_account_ids: &[S],
        target_account_id: &str,
        target_region: &str,
    ) -> Self {
        Self::new(vec![Statement::allow(
            principals(source_account_ids),
            REPLICATION_ACTIONS,
        )
        .sid("AllowReplicationFromSourceAccounts")
        .resource(format!(
            "arn:aws:ecr:{target_region}:{target_account_id}:repository/*"
        ))])
    }
}

fn principals<S: AsRef<str>>(account_ids: &[S]) -> Principal {
    Principal::Aws(
        account_ids
            .iter()
            .map(|id| account_root(id.as_ref()))
            .collect(),
    )
}

fn cross_account_statement<S: AsRef<str>>(account_ids: &[S]) -> Statement {
    Statement::allow(principals(account_ids), PULL_ACTIONS).sid("CrossAccountPermission")
}

/// Replace a repository's policy.
#[tracing::instrument(skip(client, policy))]
pub async fn set_repository_policy(
    client: &EcrClient,
    repository_name: &str,
    policy: &PolicyDocument,
) -> Result<(), EcrError> {
    let text = policy.to_json()?;
    client
        .driver()
        .set_repository_policy(repository_name, &text)
        .await?;
    tracing::debug!(statements = policy.statement.len(), "Set repository policy");
    Ok(())
}

/// Replace the registry-level policy.
#[tracing::instrument(skip(client, policy))]
pub async fn put_registry_policy(client: &EcrClient, policy: &PolicyDocument) -> Result<(), EcrError> {
    let text = policy.to_json()?;
    client.driver().put_registry_policy(&text).await?;
    tracing::debug!(statements = policy.statement.len(), "Put registry policy");
    Ok(())
}

/// Grant other accounts pull access to a repository.
///
/// Returns the policy which now applies to the repository.
pub async fn grant_cross_account_pull<S: AsRef<str>>(
    client: &EcrClient,
    repository_name: &str,
    account_ids: &[S],
) -> Result<PolicyDocument, EcrError> {
    let policy = PolicyDocument::cross_account_pull(account_ids);
    set_repository_policy(client, repository_name, &policy).await?;
    Ok(policy)
}

/// Grant other accounts, and their Lambda functions, pull access to a repository,
/// so functions in those accounts can be deployed from its images.
pub async fn configure_cross_account_lambda_get<S: AsRef<str>>(
    client: &EcrClient,
    repository_name: &str,
    account_ids: &[S],
    function_name_prefix: &str,
) -> Result<PolicyDocument, EcrError> {
    let policy = PolicyDocument::cross_account_lambda_get(account_ids, function_name_prefix);
    set_repository_policy(client, repository_name, &policy).await?;
    Ok(policy)
}
