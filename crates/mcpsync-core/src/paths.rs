use std::path::{Path, PathBuf};

pub const BASE_DIR_ENV: &str = "MCPSYNC_BASE_DIR";

#[derive(Debug, Clone)]
pub struct McpSyncPaths {
    pub base_directory: PathBuf,
    pub central_config_path: PathBuf,
    pub central_env_path: PathBuf,
}

impl McpSyncPaths {
    pub fn detect() -> Self {
        if let Ok(override_dir) = std::env::var(BASE_DIR_ENV) {
            if !override_dir.trim().is_empty() {
                return Self::from_base(PathBuf::from(override_dir));
            }
        }

        if let Some(home) = home_dir() {
            return Self::from_base(home.join("mcp-servers"));
        }

        Self::from_base(PathBuf::from("mcp-servers"))
    }

    pub fn from_base(base_directory: PathBuf) -> Self {
        let central_config_path = base_directory.join("mcp-servers-config.json");
        let central_env_path = base_directory.join(".env");
        Self {
            base_directory,
            central_config_path,
            central_env_path,
        }
    }

    /// Default location of an installed server's directory.
    pub fn server_directory(&self, server_name: &str) -> PathBuf {
        self.base_directory.join(server_name)
    }
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()))
}

pub fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
