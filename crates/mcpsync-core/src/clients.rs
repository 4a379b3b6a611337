use serde::Serialize;
use std::path::{Path, PathBuf};

/// One client application's JSON configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientTarget {
    pub client: String,
    pub path: PathBuf,
}

impl ClientTarget {
    pub fn new(client: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            client: client.into(),
            path: path.into(),
        }
    }

    /// A client counts as installed when the directory holding its config exists.
    pub fn is_installed(&self) -> bool {
        self.path.parent().is_some_and(Path::is_dir)
    }
}

/// Known MCP clients and where each keeps its configuration under `home`.
pub fn default_client_targets(home: &Path) -> Vec<ClientTarget> {
    let cline_settings = |root: PathBuf| {
        root.join("Cursor")
            .join("User")
            .join("globalStorage")
            .join("saoudrizwan.claude-dev")
            .join("settings")
            .join("cline_mcp_settings.json")
    };

    vec![
        ClientTarget::new("claude_code", home.join(".claude.json")),
        ClientTarget::new(
            "claude_desktop_macos",
            home.join("Library")
                .join("Application Support")
                .join("Claude")
                .join("claude_desktop_config.json"),
        ),
        ClientTarget::new(
            "claude_desktop_linux",
            home.join(".config")
                .join("Claude")
                .join("claude_desktop_config.json"),
        ),
        ClientTarget::new(
            "claude_desktop_windows",
            home.join("AppData")
                .join("Roaming")
                .join("Claude")
                .join("claude_desktop_config.json"),
        ),
        ClientTarget::new(
            "cursor",
            home.join(".cursor")
                .join("User")
                .join("globalStorage")
                .join("cursor-ai.cursor-ai")
                .join("config.json"),
        ),
        ClientTarget::new(
            "cline_cursor_macos",
            cline_settings(home.join("Library").join("Application Support")),
        ),
        ClientTarget::new("cline_cursor_linux", cline_settings(home.join(".config"))),
        ClientTarget::new(
            "windsurf",
            home.join(".codeium").join("windsurf").join("mcp_config.json"),
        ),
        ClientTarget::new("windsurf_legacy", home.join(".windsurf").join("mcp.json")),
    ]
}

#[cfg(test)]
mod tests {
    use super::{default_client_targets, ClientTarget};
    use std::collections::HashSet;
    use std::path::Path;

    #[test]
    fn default_targets_have_unique_ids_and_paths() {
        let targets = default_client_targets(Path::new("/home/u"));
        let ids: HashSet<_> = targets.iter().map(|t| t.client.as_str()).collect();
        let paths: HashSet<_> = targets.iter().map(|t| t.path.clone()).collect();
        assert_eq!(ids.len(), targets.len());
        assert_eq!(paths.len(), targets.len());
        assert!(targets
            .iter()
            .any(|t| t.client == "claude_code" && t.path == Path::new("/home/u/.claude.json")));
    }

    #[test]
    fn installed_follows_parent_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let present = ClientTarget::new("a", temp.path().join("config.json"));
        let missing = ClientTarget::new("b", temp.path().join("nope").join("config.json"));
        assert!(present.is_installed());
        assert!(!missing.is_installed());
    }
}
