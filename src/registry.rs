//! ECR access through the AWS CLI
//!
//! The registry is only ever read here: repositories are listed, their
//! resource tags fetched, and a short-lived push credential issued.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::config::Config;

/// Repositories requested per `describe-repositories` call
const PAGE_SIZE: u32 = 100;

/// A repository in the target registry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub repository_name: String,
    pub repository_arn: String,
    pub repository_uri: String,
}

/// `username:password` credential for pushing to the registry
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Decode the base64 `authorizationToken` returned by ECR
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("Authorization token is not valid base64")?;
        let credential =
            String::from_utf8(bytes).context("Authorization token is not valid UTF-8")?;
        Self::from_credential(credential)
    }

    pub fn from_credential(credential: impl Into<String>) -> Result<Self> {
        let credential = credential.into();
        if !credential.contains(':') {
            bail!("Authorization token is not a username:password pair");
        }
        Ok(Self(credential))
    }

    pub fn username(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// The full `username:password` string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({}:***)", self.username())
    }
}

/// Read-only view of the target registry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// List every repository, following pagination to the end
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Fetch the resource tags attached to a repository
    async fn repository_tags(&self, repository_arn: &str) -> Result<HashMap<String, String>>;

    /// Issue a push credential for the registry
    async fn authorization_token(&self) -> Result<AuthToken>;
}

/// Temporary credentials from `sts assume-role`
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleOutput {
    credentials: RoleCredentials,
}

#[derive(Deserialize)]
struct DescribeRepositoriesOutput {
    #[serde(default)]
    repositories: Vec<Repository>,
    #[serde(rename = "NextToken", alias = "nextToken")]
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Deserialize)]
struct ListTagsOutput {
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationData {
    authorization_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationOutput {
    authorization_data: Vec<AuthorizationData>,
}

/// `RegistryClient` backed by the `aws` command line tool
pub struct AwsCliRegistry {
    aws: String,
    registry_id: Option<String>,
    region: Option<String>,
    credentials: Option<RoleCredentials>,
}

impl AwsCliRegistry {
    /// Create a client, assuming the configured role first if there is one
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut client = Self {
            aws: config.tools.aws.clone(),
            registry_id: config.registry.registry_id.clone(),
            region: config.registry.region.clone(),
            credentials: None,
        };

        if let Some(role_arn) = &config.registry.role_arn {
            info!("Assuming role {}", role_arn);
            let output: AssumeRoleOutput = client
                .run_json(
                    "sts",
                    &[
                        "assume-role".to_string(),
                        "--role-arn".to_string(),
                        role_arn.clone(),
                        "--role-session-name".to_string(),
                        config.registry.role_session_name.clone(),
                        "--duration-seconds".to_string(),
                        config.registry.role_duration_secs.to_string(),
                    ],
                )
                .await
                .with_context(|| format!("Failed to assume role {}", role_arn))?;
            client.credentials = Some(output.credentials);
        }

        Ok(client)
    }

    fn registry_args(&self) -> Vec<String> {
        match &self.registry_id {
            Some(id) => vec!["--registry-id".to_string(), id.clone()],
            None => Vec::new(),
        }
    }

    /// Run `aws <service> <args>` and parse its JSON output
    async fn run_json<T: DeserializeOwned>(&self, service: &str, args: &[String]) -> Result<T> {
        let mut command = AsyncCommand::new(&self.aws);
        command.arg(service).args(args).args(["--output", "json"]);

        if let Some(region) = &self.region {
            command.arg("--region").arg(region);
        }
        if let Some(credentials) = &self.credentials {
            command
                .env("AWS_ACCESS_KEY_ID", &credentials.access_key_id)
                .env("AWS_SECRET_ACCESS_KEY", &credentials.secret_access_key)
                .env("AWS_SESSION_TOKEN", &credentials.session_token);
        }

        debug!("Running {} {} {}", self.aws, service, args.join(" "));

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.aws))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} {} {} failed: {}",
                self.aws,
                service,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            ));
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse output of {} {}", self.aws, service))
    }
}

#[async_trait]
impl RegistryClient for AwsCliRegistry {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        let mut next_token: Option<String> = None;
        let mut page = 1u32;

        loop {
            let mut args = vec![
                "describe-repositories".to_string(),
                "--max-items".to_string(),
                PAGE_SIZE.to_string(),
            ];
            args.extend(self.registry_args());
            if let Some(token) = &next_token {
                args.push("--starting-token".to_string());
                args.push(token.clone());
            }

            let output: DescribeRepositoriesOutput = self
                .run_json("ecr", &args)
                .await
                .with_context(|| format!("Failed to list repositories page {}", page))?;

            repositories.extend(output.repositories);

            match output.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
            page += 1;
        }

        info!("Found {} repositories", repositories.len());
        Ok(repositories)
    }

    async fn repository_tags(&self, repository_arn: &str) -> Result<HashMap<String, String>> {
        let output: ListTagsOutput = self
            .run_json(
                "ecr",
                &[
                    "list-tags-for-resource".to_string(),
                    "--resource-arn".to_string(),
                    repository_arn.to_string(),
                ],
            )
            .await?;

        Ok(output
            .tags
            .into_iter()
            .map(|tag| (tag.key, tag.value))
            .collect())
    }

    async fn authorization_token(&self) -> Result<AuthToken> {
        let mut args = vec!["get-authorization-token".to_string()];
        if let Some(id) = &self.registry_id {
            args.push("--registry-ids".to_string());
            args.push(id.clone());
        }

        let output: AuthorizationOutput = self
            .run_json("ecr", &args)
            .await
            .context("Failed to get registry authorization token")?;

        let data = output
            .authorization_data
            .first()
            .ok_or_else(|| anyhow!("Registry returned no authorization data"))?;

        AuthToken::decode(&data.authorization_token)
    }
}
