//! Guessing how an installed server directory should be launched and where it
//! came from.
//!
//! Command detection works on a [`DirectorySnapshot`] so it stays a pure
//! function; only `scan` and `introspect_installation` touch the filesystem.

use crate::error::McpSyncError;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use walkdir::WalkDir;

const SCAN_DEPTH: usize = 2;
pub const GIT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const SKIPPED_DIRS: [&str; 4] = ["node_modules", ".git", ".venv", "__pycache__"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub name: String,
    pub root: PathBuf,
    /// Paths relative to `root`, `/`-separated.
    pub files: BTreeSet<String>,
    pub executables: BTreeSet<String>,
}

impl DirectorySnapshot {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            files: BTreeSet::new(),
            executables: BTreeSet::new(),
        }
    }

    pub fn with_file(mut self, relative: &str) -> Self {
        self.files.insert(relative.to_string());
        self
    }

    pub fn with_executable(mut self, relative: &str) -> Self {
        self.files.insert(relative.to_string());
        self.executables.insert(relative.to_string());
        self
    }

    pub fn scan(root: &Path) -> Result<Self, McpSyncError> {
        let name = root
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut snapshot = Self::new(name, root);

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(SCAN_DEPTH)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !entry.file_type().is_dir() || !SKIPPED_DIRS.iter().any(|skipped| *skipped == name)
            });

        for entry in walker {
            let entry = entry.map_err(|error| {
                let path = error.path().unwrap_or(root).to_path_buf();
                McpSyncError::io(path, std::io::Error::other(error.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if is_executable_entry(&entry) {
                snapshot.executables.insert(relative.clone());
            }
            snapshot.files.insert(relative);
        }

        Ok(snapshot)
    }

    fn has(&self, relative: &str) -> bool {
        self.files.contains(relative)
    }

    fn absolute(&self, relative: &str) -> String {
        self.root.join(relative).display().to_string()
    }

    fn module_name(&self) -> String {
        self.name.replace('-', "_")
    }
}

#[cfg(unix)]
fn is_executable_entry(entry: &walkdir::DirEntry) -> bool {
    use std::os::unix::fs::PermissionsExt;
    entry
        .metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_entry(entry: &walkdir::DirEntry) -> bool {
    entry
        .path()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}

/// Launchers available on this machine that change the detected command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolAvailability {
    pub uv: bool,
}

/// Places `uv` is commonly installed that may be missing from `PATH`.
pub fn uv_fallback_locations(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(".local").join("bin").join("uv"),
        home.join(".cargo").join("bin").join("uv"),
        PathBuf::from("/usr/local/bin/uv"),
        PathBuf::from("/opt/homebrew/bin/uv"),
        PathBuf::from("/usr/bin/uv"),
    ]
}

/// Picks a `(command, args)` pair for the server in `snapshot`.
pub fn detect_command(snapshot: &DirectorySnapshot, tools: ToolAvailability) -> (String, Vec<String>) {
    if snapshot.has("package.json") {
        for built in ["build/index.js", "dist/index.js", "index.js"] {
            if snapshot.has(built) {
                return (String::from("node"), vec![snapshot.absolute(built)]);
            }
        }
        return (
            String::from("npx"),
            vec![String::from("-y"), snapshot.name.clone()],
        );
    }

    let module_script = format!("{}.py", snapshot.module_name());
    if snapshot.has("pyproject.toml") || snapshot.has("requirements.txt") {
        for entry_point in ["server.py", "__main__.py", module_script.as_str()] {
            if !snapshot.has(entry_point) {
                continue;
            }
            if tools.uv {
                return (
                    String::from("uv"),
                    vec![
                        String::from("run"),
                        String::from("--python"),
                        String::from("3.11"),
                        snapshot.absolute(entry_point),
                    ],
                );
            }
            return python_launch(snapshot, entry_point);
        }
    }

    for entry_point in ["server.py", "__main__.py", module_script.as_str()] {
        if snapshot.has(entry_point) {
            return python_launch(snapshot, entry_point);
        }
    }

    if snapshot.has("server.sh") {
        return (String::from("bash"), vec![snapshot.absolute("server.sh")]);
    }

    if snapshot.executables.contains(&snapshot.name) {
        return (snapshot.absolute(&snapshot.name), Vec::new());
    }

    (String::from("node"), vec![snapshot.absolute("index.js")])
}

fn python_launch(snapshot: &DirectorySnapshot, entry_point: &str) -> (String, Vec<String>) {
    if entry_point == "__main__.py" {
        return (
            String::from("python3"),
            vec![String::from("-m"), snapshot.module_name()],
        );
    }
    (String::from("python3"), vec![snapshot.absolute(entry_point)])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationType {
    Git,
    Npm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    Node,
    Python,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_type: Option<InstallationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npm_package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_type: Option<ServerType>,
    pub needs_requirements: bool,
    pub required_secrets: Vec<String>,
}

/// Best-effort provenance of an installed server directory.
pub fn introspect_installation(server_dir: &Path) -> InstallationInfo {
    let mut info = InstallationInfo::default();

    if server_dir.join(".git").exists() {
        if let Some(url) = git_remote_url(server_dir, GIT_LOOKUP_TIMEOUT) {
            info.installation_type = Some(InstallationType::Git);
            info.source_url = Some(url);
        }
    }

    let package_json = server_dir.join("package.json");
    if package_json.exists() {
        info.server_type = Some(ServerType::Node);
        let package_name = std::fs::read(&package_json)
            .ok()
            .and_then(|raw| serde_json::from_slice::<JsonValue>(&raw).ok())
            .and_then(|value| value.get("name").and_then(JsonValue::as_str).map(str::to_string));
        if let Some(name) = package_name.filter(|name| name.starts_with('@')) {
            info.installation_type = Some(InstallationType::Npm);
            info.npm_package = Some(name);
        }
    }

    let has_requirements = server_dir.join("requirements.txt").exists();
    if has_requirements || server_dir.join("pyproject.toml").exists() {
        info.server_type = Some(ServerType::Python);
        info.needs_requirements = has_requirements;
    }

    if let Ok(raw) = std::fs::read_to_string(server_dir.join(".env.example")) {
        info.required_secrets = required_secrets_from_env_example(&raw);
    }

    info
}

/// Variable names declared as `NAME=` in an `.env.example` file.
pub fn required_secrets_from_env_example(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, _)| key)
        .filter(|key| !key.is_empty() && key.chars().all(|c| c.is_ascii_uppercase() || c == '_'))
        .map(str::to_string)
        .collect()
}

/// `origin` of the repository at `server_dir`, or `None` when git fails or
/// does not answer within `timeout`. An overrunning `git` is left to finish on
/// its own thread.
pub fn git_remote_url(server_dir: &Path, timeout: Duration) -> Option<String> {
    let (tx, rx) = mpsc::channel();
    let dir = server_dir.to_path_buf();
    let spawned = std::thread::Builder::new()
        .name(String::from("mcpsync-git"))
        .spawn(move || {
            let output = Command::new("git")
                .args(["remote", "get-url", "origin"])
                .current_dir(&dir)
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output();
            let _ = tx.send(output);
        });
    if let Err(error) = spawned {
        tracing::warn!(path = %server_dir.display(), %error, "failed to start git");
        return None;
    }

    let output = match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => {
            tracing::debug!(path = %server_dir.display(), %error, "git unavailable");
            return None;
        }
        Err(RecvTimeoutError::Disconnected) => return None,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(path = %server_dir.display(), ?timeout, "timed out reading git remote");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!url.is_empty()).then_some(url)
}

#[cfg(test)]
mod tests {
    use super::{
        detect_command, git_remote_url, introspect_installation,
        required_secrets_from_env_example, uv_fallback_locations, DirectorySnapshot,
        InstallationType, ServerType, ToolAvailability,
    };
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn snapshot(name: &str) -> DirectorySnapshot {
        DirectorySnapshot::new(name, format!("/srv/{name}"))
    }

    #[test]
    fn node_server_prefers_build_output() {
        let snap = snapshot("weather")
            .with_file("package.json")
            .with_file("dist/index.js")
            .with_file("build/index.js");
        let (command, args) = detect_command(&snap, ToolAvailability::default());
        assert_eq!(command, "node");
        assert_eq!(args, vec![String::from("/srv/weather/build/index.js")]);
    }

    #[test]
    fn node_package_without_build_uses_npx() {
        let snap = snapshot("weather").with_file("package.json");
        let (command, args) = detect_command(&snap, ToolAvailability::default());
        assert_eq!(command, "npx");
        assert_eq!(args, vec![String::from("-y"), String::from("weather")]);
    }

    #[test]
    fn python_project_uses_uv_when_available() {
        let snap = snapshot("notes")
            .with_file("pyproject.toml")
            .with_file("server.py");
        let (command, args) = detect_command(&snap, ToolAvailability { uv: true });
        assert_eq!(command, "uv");
        assert_eq!(args[..3], [String::from("run"), String::from("--python"), String::from("3.11")]);

        let (command, args) = detect_command(&snap, ToolAvailability { uv: false });
        assert_eq!(command, "python3");
        assert_eq!(args, vec![String::from("/srv/notes/server.py")]);
    }

    #[test]
    fn python_module_runs_with_dash_m() {
        let snap = snapshot("my-tool").with_file("__main__.py");
        let (command, args) = detect_command(&snap, ToolAvailability::default());
        assert_eq!(command, "python3");
        assert_eq!(args, vec![String::from("-m"), String::from("my_tool")]);
    }

    #[test]
    fn shell_and_binary_fallbacks() {
        let (command, _) = detect_command(
            &snapshot("sh").with_file("server.sh"),
            ToolAvailability::default(),
        );
        assert_eq!(command, "bash");

        let (command, args) = detect_command(
            &snapshot("gobin").with_executable("gobin"),
            ToolAvailability::default(),
        );
        assert_eq!(command, "/srv/gobin/gobin");
        assert!(args.is_empty());

        let (command, args) = detect_command(&snapshot("empty"), ToolAvailability::default());
        assert_eq!(command, "node");
        assert_eq!(args, vec![String::from("/srv/empty/index.js")]);
    }

    #[test]
    fn scan_lists_nested_files_and_skips_node_modules() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("weather");
        std::fs::create_dir_all(root.join("build")).expect("build dir");
        std::fs::create_dir_all(root.join("node_modules").join("dep")).expect("deps");
        std::fs::write(root.join("package.json"), "{}").expect("package.json");
        std::fs::write(root.join("build").join("index.js"), "").expect("index.js");
        std::fs::write(root.join("node_modules").join("dep").join("index.js"), "").expect("dep");

        let snap = DirectorySnapshot::scan(&root).expect("scan");
        assert_eq!(snap.name, "weather");
        assert!(snap.files.contains("package.json"));
        assert!(snap.files.contains("build/index.js"));
        assert!(!snap.files.iter().any(|file| file.starts_with("node_modules")));
    }

    #[test]
    fn env_example_yields_upper_snake_names() {
        let names = required_secrets_from_env_example(
            "API_KEY=\n# COMMENT=1\nlower=1\nSECRET_TOKEN=changeme\n",
        );
        assert_eq!(names, vec![String::from("API_KEY"), String::from("SECRET_TOKEN")]);
    }

    #[test]
    fn introspection_reads_package_and_env_example() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        std::fs::write(dir.join("package.json"), r#"{"name": "@acme/weather-mcp"}"#)
            .expect("package.json");
        std::fs::write(dir.join(".env.example"), "WEATHER_KEY=\n").expect("env example");

        let info = introspect_installation(dir);
        assert_eq!(info.installation_type, Some(InstallationType::Npm));
        assert_eq!(info.npm_package.as_deref(), Some("@acme/weather-mcp"));
        assert_eq!(info.server_type, Some(ServerType::Node));
        assert_eq!(info.required_secrets, vec![String::from("WEATHER_KEY")]);
    }

    #[test]
    fn git_remote_gives_up_instead_of_hanging() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join(".git")).expect("fake git dir");

        assert_eq!(git_remote_url(temp.path(), Duration::ZERO), None);
        assert_eq!(git_remote_url(temp.path(), Duration::from_secs(5)), None);

        let info = introspect_installation(temp.path());
        assert!(info.installation_type.is_none());
        assert!(info.source_url.is_none());
    }

    #[test]
    fn uv_fallbacks_start_in_the_home_directory() {
        let locations = uv_fallback_locations(Path::new("/home/dev"));
        assert_eq!(locations[0], PathBuf::from("/home/dev/.local/bin/uv"));
        assert_eq!(locations[1], PathBuf::from("/home/dev/.cargo/bin/uv"));
        assert!(locations.contains(&PathBuf::from("/opt/homebrew/bin/uv")));
        assert_eq!(locations.last(), Some(&PathBuf::from("/usr/bin/uv")));
    }
}
