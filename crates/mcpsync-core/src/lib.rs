pub mod backup;
pub mod central_store;
pub mod clients;
pub mod detect;
pub mod engine;
pub mod env_store;
pub mod error;
mod fs;
pub mod inventory;
pub mod models;
pub mod paths;
pub mod placeholder;
pub mod secrets;
pub mod sync;
pub mod validate;

pub use central_store::{
    CentralConfigFile, CentralConfigRepository, CentralConfigStore, InMemoryCentralConfig,
};
pub use clients::{default_client_targets, ClientTarget};
pub use detect::{
    detect_command, introspect_installation, DirectorySnapshot, InstallationInfo,
    ToolAvailability,
};
pub use engine::{
    AddServerOutcome, AddServerRequest, McpSyncEngine, McpSyncEnvironment, RemoveServerOutcome,
};
pub use env_store::{EnvFileStore, InMemorySecrets, SecretMap, SecretRepository};
pub use error::McpSyncError;
pub use inventory::{ExportedServer, InstalledServer, Inventory, SetupExport};
pub use models::{CentralConfig, CentralRecord, EnvValue, ServerConfig};
pub use paths::McpSyncPaths;
pub use secrets::{
    parse_secret_requests, CollectionOutcome, CollectionStatus, PromptOutcome, SecretPrompt,
    SecretRequest, DEFAULT_SESSION_TIMEOUT,
};
pub use sync::{ClientConfigSynchronizer, ConfiguredServers, SyncReport, PROTECTED_SERVER};
pub use validate::{
    ConfigValidator, ExecutableLocator, LookupOutcome, PathLocator, ValidationReport,
};
