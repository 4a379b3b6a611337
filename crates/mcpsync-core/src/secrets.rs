use crate::env_store::{SecretMap, SecretRepository};
use crate::error::McpSyncError;
use crate::models::validate_server_name;
use crate::placeholder::namespaced_key;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

const REQUESTS_HINT: &str = "Pass one secret as '{\"name\": \"KEY\", \"description\": \"desc\"}' \
     or several as '[{\"name\": \"KEY1\", \"description\": \"desc1\"}, ...]'";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl SecretRequest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequests {
    One(SecretRequest),
    Many(Vec<SecretRequest>),
}

/// Accepts either a single `{name, description}` object or an array of them.
pub fn parse_secret_requests(raw: &str) -> Result<Vec<SecretRequest>, McpSyncError> {
    let parsed = serde_json::from_str::<RawRequests>(raw).map_err(|error| {
        McpSyncError::invalid_input(
            format!("Invalid JSON in secrets parameter: {error}"),
            REQUESTS_HINT,
        )
    })?;
    let requests = match parsed {
        RawRequests::One(request) => vec![request],
        RawRequests::Many(requests) => requests,
    };
    if requests.iter().any(|request| request.name.trim().is_empty()) {
        return Err(McpSyncError::invalid_input(
            "every secret needs a non-empty name",
            REQUESTS_HINT,
        ));
    }
    Ok(requests)
}

/// What the out-of-process prompt handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Values keyed by the namespaced secret name; empty values are ignored.
    Submitted(SecretMap),
    TimedOut,
}

/// The collaborator that shows the secret form and waits for the user.
///
/// Implementations must return within `timeout`, either with whatever the
/// user submitted or with `TimedOut`.
pub trait SecretPrompt {
    fn prompt(
        &mut self,
        server_name: &str,
        requests: &[NamespacedRequest],
        timeout: Duration,
    ) -> PromptOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespacedRequest {
    pub key: String,
    pub original_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    AllCollected,
    Partial,
    NoneCollected,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionOutcome {
    pub completed: bool,
    pub status: CollectionStatus,
    /// Original (un-namespaced) names that were stored.
    pub saved: Vec<String>,
    pub missing: Vec<String>,
}

pub fn namespace_requests(server_name: &str, requests: &[SecretRequest]) -> Vec<NamespacedRequest> {
    requests
        .iter()
        .map(|request| NamespacedRequest {
            key: namespaced_key(server_name, &request.name),
            original_name: request.name.clone(),
            description: request.description.clone(),
        })
        .collect()
}

/// Runs the prompt and stores every non-empty submitted value under its
/// namespaced key. Secret values are never logged or returned.
pub fn collect_secrets(
    server_name: &str,
    requests: &[SecretRequest],
    prompt: &mut dyn SecretPrompt,
    repository: &dyn SecretRepository,
    timeout: Duration,
) -> Result<CollectionOutcome, McpSyncError> {
    validate_server_name(server_name)?;
    let namespaced = namespace_requests(server_name, requests);
    tracing::info!(server = server_name, count = namespaced.len(), "collecting secrets");

    let submitted = match prompt.prompt(server_name, &namespaced, timeout) {
        PromptOutcome::Submitted(values) => values,
        PromptOutcome::TimedOut => {
            tracing::warn!(server = server_name, "secret collection timed out");
            return Ok(CollectionOutcome {
                completed: false,
                status: CollectionStatus::TimedOut,
                saved: Vec::new(),
                missing: requests.iter().map(|request| request.name.clone()).collect(),
            });
        }
    };

    let mut saved = Vec::new();
    let mut missing = Vec::new();
    for request in &namespaced {
        match submitted.get(&request.key).map(|value| value.trim()) {
            Some(value) if !value.is_empty() => {
                repository.upsert(&request.key, value)?;
                tracing::info!(key = %request.key, "secret stored (value hidden)");
                saved.push(request.original_name.clone());
            }
            _ => missing.push(request.original_name.clone()),
        }
    }

    let status = match (saved.is_empty(), missing.is_empty()) {
        (false, true) => CollectionStatus::AllCollected,
        (false, false) => CollectionStatus::Partial,
        (true, _) => CollectionStatus::NoneCollected,
    };
    Ok(CollectionOutcome {
        completed: !saved.is_empty(),
        status,
        saved,
        missing,
    })
}

/// Lines telling the user which keys to add to the secret file by hand.
pub fn manual_secret_instructions(
    server_name: &str,
    requests: &[SecretRequest],
    env_path: &Path,
) -> Vec<String> {
    let mut lines = vec![
        format!("Please add these secrets manually to {}:", env_path.display()),
        String::new(),
    ];
    for request in namespace_requests(server_name, requests) {
        if !request.description.is_empty() {
            lines.push(format!("# {}", request.description));
        }
        lines.push(format!("{}=your_value_here", request.key));
    }
    lines.push(String::new());
    lines.push(format!(
        "Then re-run the client configuration for '{server_name}'."
    ));
    lines
}
