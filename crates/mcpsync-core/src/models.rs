use crate::error::McpSyncError;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

pub const CENTRAL_CONFIG_VERSION: &str = "1.0";
pub const PLACEHOLDER_SUFFIX: &str = ".env";

/// Value of one `env` entry in a server definition.
///
/// Placeholders name a secret that lives in the central `.env` file and are
/// written to disk as `"<KEY>.env"`. Literals that happen to end in `.env`
/// are written as `{"literal": "..."}` so they survive a reload unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvValue {
    Literal(String),
    Placeholder(String),
}

impl EnvValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn placeholder(base_key: impl Into<String>) -> Self {
        Self::Placeholder(base_key.into())
    }

    /// Interprets the on-disk string convention.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_suffix(PLACEHOLDER_SUFFIX) {
            Some(base) if !base.is_empty() => Self::Placeholder(base.to_string()),
            _ => Self::Literal(raw.to_string()),
        }
    }

    /// Text handed to client applications.
    pub fn render(&self) -> String {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Placeholder(base) => format!("{base}{PLACEHOLDER_SUFFIX}"),
        }
    }

    pub fn placeholder_key(&self) -> Option<&str> {
        match self {
            Self::Placeholder(base) => Some(base),
            Self::Literal(_) => None,
        }
    }
}

impl Serialize for EnvValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Placeholder(_) => serializer.serialize_str(&self.render()),
            Self::Literal(value) if value.ends_with(PLACEHOLDER_SUFFIX) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("literal", value)?;
                map.end()
            }
            Self::Literal(value) => serializer.serialize_str(value),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvValue {
    Text(String),
    Tagged { literal: String },
}

impl<'de> Deserialize<'de> for EnvValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawEnvValue::deserialize(deserializer)? {
            RawEnvValue::Text(text) => Self::parse(&text),
            RawEnvValue::Tagged { literal } => Self::Literal(literal),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, EnvValue>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn placeholders(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .filter_map(|(key, value)| value.placeholder_key().map(|base| (key.as_str(), base)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralRecord {
    pub name: String,
    pub config: ServerConfig,
    #[serde(default, rename = "required_env_vars")]
    pub required_env_vars: BTreeSet<String>,
    #[serde(default, rename = "installed_at")]
    pub installed_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralMetadata {
    #[serde(default)]
    pub created: String,
    #[serde(default, rename = "last_updated")]
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralConfig {
    pub version: String,
    /// Kept in insertion order; sync-all writes servers in this order.
    #[serde(default)]
    pub servers: IndexMap<String, CentralRecord>,
    #[serde(default)]
    pub metadata: CentralMetadata,
}

impl CentralConfig {
    pub fn fresh() -> Self {
        let now = iso8601_now();
        Self {
            version: CENTRAL_CONFIG_VERSION.to_string(),
            servers: IndexMap::new(),
            metadata: CentralMetadata {
                created: now.clone(),
                last_updated: now,
            },
        }
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}

pub fn validate_server_name(name: &str) -> Result<(), McpSyncError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(McpSyncError::InvalidServerName(name.to_string()))
    }
}

pub fn iso8601_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
