use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use mcpsync_core::{
    AddServerRequest, ConfiguredServers, Inventory, McpSyncEngine, SecretRequest, SetupExport,
    SyncReport, ValidationReport,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "MCPSYNC_LOG";

#[derive(Parser, Debug)]
#[command(name = "mcpsync")]
#[command(about = "Manage MCP server configurations across all clients")]
#[command(after_help = "Examples:
  mcpsync my-server                                  add/update, auto-detect command
  mcpsync my-server -c python3 -a /path/to/server.py
  mcpsync github -c npx -R TOKEN -- -y @modelcontextprotocol/server-github
  mcpsync my-server --remove
  mcpsync --list
  mcpsync --inventory
  mcpsync --export > setup.md
  mcpsync --sync

Arguments that start with '-' go after '--'.")]
struct Cli {
    /// Name of the MCP server
    server: Option<String>,

    /// Command to run the server (detected from the server directory when omitted)
    #[arg(short, long)]
    command: Option<String>,

    /// Arguments for the command
    #[arg(short, long, num_args = 1..)]
    args: Option<Vec<String>>,

    /// Arguments for the command given after `--`, appended to `--args`
    #[arg(last = true, value_name = "ARGS")]
    trailing: Vec<String>,

    /// Literal environment variable, KEY=VALUE
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Variable whose value is read from the central secret file
    #[arg(short = 'R', long = "require", value_name = "VAR")]
    require: Vec<String>,

    /// Path to the server directory
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Remove the server from all configurations
    #[arg(short, long)]
    remove: bool,

    /// List all configured servers
    #[arg(short, long)]
    list: bool,

    /// Write every server from the central config into every client
    #[arg(long)]
    sync: bool,

    /// Show installed server directories with their central and client status
    #[arg(long)]
    inventory: bool,

    /// Print instructions for rebuilding this setup on another machine
    #[arg(long)]
    export: bool,

    /// Validate the server's definition without writing anything
    #[arg(long)]
    check: bool,

    #[arg(long)]
    json: bool,

    /// Suppress output
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// `--args` values followed by everything after `--`; `None` when neither was given.
    fn command_args(&self) -> Option<Vec<String>> {
        if self.args.is_none() && self.trailing.is_empty() {
            return None;
        }
        let mut args = self.args.clone().unwrap_or_default();
        args.extend(self.trailing.iter().cloned());
        Some(args)
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!(
            "Invalid environment variable format: {raw} (expected KEY=VALUE)"
        )),
    }
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "error" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    tracing::debug!(?cli, "parsed arguments");

    let engine = McpSyncEngine::current();
    let verbose = !cli.quiet && !cli.json;

    if cli.list {
        let configured = engine.list_configured();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&configured)?);
        } else if verbose {
            print_configured(&configured);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.inventory {
        let inventory = engine
            .inventory()
            .context("failed to read installed servers")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&inventory)?);
        } else if verbose {
            print_inventory(&inventory);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.export {
        let export = engine.export_setup().context("failed to export setup")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&export)?);
        } else if !cli.quiet {
            print_export(&export);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.sync {
        let report = engine.sync_all();
        emit_report(&cli, &report, None)?;
        return Ok(exit_code(&report, false));
    }

    let Some(server) = cli.server.clone() else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "server name is required unless using --list, --inventory, --export or --sync",
            )
            .exit();
    };

    if cli.check {
        let validation = engine
            .check_server(&server)
            .with_context(|| format!("failed to validate {server}"))?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&validation)?);
        } else if verbose {
            print_validation(&server, &validation);
        }
        return Ok(if validation.valid {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        });
    }

    if cli.remove {
        let outcome = engine
            .remove_server(&server)
            .with_context(|| format!("failed to remove {server}"))?;
        if verbose && outcome.removed_from_central {
            println!("Removed {server} from the central config");
        }
        emit_report(&cli, &outcome.report, Some(&server))?;
        return Ok(exit_code(&outcome.report, true));
    }

    let request = AddServerRequest {
        command: cli.command.clone(),
        args: cli.command_args(),
        required_env_vars: cli.require.clone(),
        extra_env_vars: cli.env.iter().cloned().collect::<BTreeMap<_, _>>(),
        server_path: cli.path.clone(),
        ..AddServerRequest::new(server.as_str())
    };
    let outcome = engine
        .add_server(&request)
        .with_context(|| format!("failed to configure {server}"))?;

    if verbose {
        for warning in &outcome.validation.warnings {
            println!("⚠️  {warning}");
        }
    }
    emit_report(&cli, &outcome.report, Some(&server))?;

    if verbose && !outcome.report.unresolved.is_empty() {
        let requests = outcome
            .record
            .required_env_vars
            .iter()
            .map(|name| SecretRequest::new(name.as_str(), ""))
            .collect::<Vec<_>>();
        println!();
        for line in engine.manual_secret_instructions(&server, &requests) {
            println!("{line}");
        }
    }

    Ok(exit_code(&outcome.report, false))
}

fn exit_code(report: &SyncReport, removal: bool) -> ExitCode {
    if !report.errors.is_empty() {
        ExitCode::from(1)
    } else if report.updated.is_empty() && !removal {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn emit_report(cli: &Cli, report: &SyncReport, server: Option<&str>) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if !cli.quiet {
        print_report(report, server, cli.remove);
    }
    Ok(())
}

fn print_report(report: &SyncReport, server: Option<&str>, removal: bool) {
    match server {
        Some(server) if removal => println!("\nRemoving {server} MCP server..."),
        Some(server) => println!("\nConfiguring {server} MCP server..."),
        None => println!("\nSyncing {} MCP servers...", report.servers.len()),
    }

    if !report.updated.is_empty() {
        println!("✅ Updated {} clients:", report.updated.len());
        for target in &report.updated {
            println!("   - {} ({})", target.client, target.action.as_str());
            if let Some(name) = target.backup_path.file_name() {
                println!("     💾 Backup created: {}", name.to_string_lossy());
            }
        }
    }

    if !report.skipped.is_empty() {
        println!("⏭️  Skipped {} clients:", report.skipped.len());
        for target in &report.skipped {
            println!("   - {} ({})", target.client, target.reason.as_str());
        }
    }

    if !report.errors.is_empty() {
        println!("❌ Errors in {} clients:", report.errors.len());
        for target in &report.errors {
            println!("   - {}: {}", target.client, target.message);
        }
    }

    for entry in &report.preserved {
        println!(
            "🔒 Kept local {} entry in {} (command is a local path)",
            entry.server, entry.client
        );
    }

    for (name, keys) in &report.unresolved {
        println!("⚠️  {name}: unresolved environment variables: {}", keys.join(", "));
    }

    if report.updated.is_empty() && !removal {
        println!(
            "⚠️  No MCP clients found. Please install Claude Desktop, Cursor, or another MCP client."
        );
    }
}

fn print_configured(configured: &ConfiguredServers) {
    for warning in &configured.warnings {
        println!("⚠️  Warning: {warning}");
    }
    if configured.servers.is_empty() {
        return;
    }
    println!("\n📋 Configured MCP Servers:");
    for (server, clients) in &configured.servers {
        println!("\n{server}:");
        for client in clients {
            println!("  - {client}");
        }
    }
}

fn print_inventory(inventory: &Inventory) {
    println!(
        "\n📦 {} MCP servers in {}",
        inventory.total_servers,
        inventory.base_directory.display()
    );
    for server in &inventory.servers {
        let central = if server.in_central { "central" } else { "not in central" };
        println!("\n{} ({central}):", server.name);
        if server.configured_in_clients.is_empty() {
            println!("  not configured in any client");
        } else {
            println!("  configured in: {}", server.configured_in_clients.join(", "));
        }
        if let Some(configuration) = &server.configuration {
            let command = configuration.command.as_deref().unwrap_or("?");
            println!("  command: {command} {}", configuration.args.join(" "));
        }
    }

    let central = &inventory.central_config;
    println!(
        "\nCentral config: {} ({} servers, last updated {})",
        central.path.display(),
        central.servers_in_config,
        central.last_updated
    );
    if !central.exists {
        println!("⚠️  Central config does not exist yet");
    }
    println!();
    for line in &inventory.replication_instructions {
        println!("{line}");
    }
}

fn print_export(export: &SetupExport) {
    println!("{}", export.replication_instructions);
    println!();
    for note in &export.notes {
        println!("> {note}");
    }
}

fn print_validation(server: &str, validation: &ValidationReport) {
    let status = if validation.valid { "valid" } else { "invalid" };
    println!("{server}: {status}");
    for error in &validation.errors {
        println!("❌ {error}");
    }
    for warning in &validation.warnings {
        println!("⚠️  {warning}");
    }
    if let Some(resolved) = &validation.checks.command_resolved {
        println!("   command resolved to {resolved}");
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_env_pair, Cli};
    use clap::Parser;

    #[test]
    fn env_pairs_split_on_first_equals() {
        assert_eq!(
            parse_env_pair("URL=postgres://u:p@h/db?x=1"),
            Ok((String::from("URL"), String::from("postgres://u:p@h/db?x=1")))
        );
        assert!(parse_env_pair("NOVALUE").is_err());
        assert!(parse_env_pair("=value").is_err());
    }

    #[test]
    fn args_after_double_dash_accept_leading_hyphens() {
        let cli = Cli::try_parse_from([
            "mcpsync",
            "github",
            "-c",
            "npx",
            "-R",
            "TOKEN",
            "-e",
            "LOG=debug",
            "--",
            "-y",
            "@modelcontextprotocol/server-github",
        ])
        .expect("parse");
        assert_eq!(cli.server.as_deref(), Some("github"));
        assert_eq!(cli.require, vec![String::from("TOKEN")]);
        assert_eq!(cli.env, vec![(String::from("LOG"), String::from("debug"))]);
        assert_eq!(
            cli.command_args(),
            Some(vec![
                String::from("-y"),
                String::from("@modelcontextprotocol/server-github")
            ])
        );
    }

    #[test]
    fn flags_after_args_are_not_swallowed() {
        let cli = Cli::try_parse_from([
            "mcpsync", "srv", "-a", "/p/server.py", "-q", "-e", "K=V",
        ])
        .expect("parse");
        assert_eq!(cli.command_args(), Some(vec![String::from("/p/server.py")]));
        assert!(cli.quiet);
        assert_eq!(cli.env, vec![(String::from("K"), String::from("V"))]);
    }

    #[test]
    fn args_and_trailing_args_are_joined() {
        let cli = Cli::try_parse_from([
            "mcpsync", "srv", "-a", "serve", "--", "--port", "8080",
        ])
        .expect("parse");
        assert_eq!(
            cli.command_args(),
            Some(vec![
                String::from("serve"),
                String::from("--port"),
                String::from("8080")
            ])
        );

        let bare = Cli::try_parse_from(["mcpsync", "srv"]).expect("parse");
        assert_eq!(bare.command_args(), None);
    }

    #[test]
    fn inventory_and_export_need_no_server() {
        let cli = Cli::try_parse_from(["mcpsync", "--inventory", "--json"]).expect("parse");
        assert!(cli.inventory && cli.json);
        let cli = Cli::try_parse_from(["mcpsync", "--export"]).expect("parse");
        assert!(cli.export);
        assert!(cli.server.is_none());
    }

    #[test]
    fn list_needs_no_server() {
        let cli = Cli::try_parse_from(["mcpsync", "--list"]).expect("parse");
        assert!(cli.list);
        assert!(cli.server.is_none());
    }

    #[test]
    fn definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
