//! Command-line entry point for the deployer.
//!
//! Offline administration of a site's endpoints: probe the environment,
//! inspect persisted strategy state, tear everything down, or scaffold a
//! config. Dynamic routes are served by `deployer-host`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deployer::dispatch::Dispatcher;
use deployer::endpoint::Endpoint;
use deployer::exit_codes;
use deployer::io::config::{DeployerConfig, EndpointConfig, load_config, write_config};
use deployer::io::http::{HttpClient, ReqwestClient};
use deployer::io::store::JsonFileStore;
use deployer::manager::EndpointManager;
use deployer::probe::{EnvironmentProbe, Signals};
use deployer::status::render_table;

const EXAMPLE_CONTENT: &str = "{\n  \"name\": \"example\",\n  \"version\": 1\n}\n";

#[derive(Parser)]
#[command(
    name = "deployer",
    version,
    about = "Environment-adaptive endpoint deployment"
)]
struct Cli {
    /// Path to `deployer.toml`.
    #[arg(short, long, default_value = "deployer.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the platform and verify filesystem and rewrite-config access.
    Probe,
    /// Print the active strategy of every endpoint.
    Status {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Tear down every deployed endpoint and forget its state.
    Deactivate,
    /// Write a starter `deployer.toml` and example content.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    deployer::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Probe => cmd_probe(&cli.config),
        Command::Status { json } => cmd_status(&cli.config, json),
        Command::Deactivate => cmd_deactivate(&cli.config),
        Command::Init { force } => cmd_init(&cli.config, force),
    }
}

fn cmd_probe(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let signals = Signals::from_process_env(&cfg.probe);
    let profile = EnvironmentProbe::new(&cfg.site, &cfg.probe, &signals).probe();
    let payload = serde_json::to_string_pretty(&profile).context("serialize profile")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}

fn cmd_status(config_path: &Path, json: bool) -> Result<i32> {
    let manager = open_manager(config_path)?;
    let rows = manager.status()?;
    if json {
        let payload = serde_json::to_string_pretty(&rows).context("serialize status")?;
        println!("{payload}");
    } else {
        print!("{}", render_table(&rows));
    }
    if rows.iter().any(|row| row.needs_attention) {
        return Ok(exit_codes::NEEDS_ATTENTION);
    }
    Ok(exit_codes::OK)
}

fn cmd_deactivate(config_path: &Path) -> Result<i32> {
    let manager = open_manager(config_path)?;
    let mut code = exit_codes::OK;
    for outcome in manager.deactivate()? {
        match outcome.result {
            Ok(()) => println!("removed {}", outcome.path),
            Err(err) => {
                eprintln!("{}: {err:#}", outcome.path);
                code = exit_codes::INVALID;
            }
        }
    }
    Ok(code)
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    let base = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if force || !config_path.exists() {
        write_config(config_path, &starter_config())?;
    }
    let content_path = base.join("content").join("ai.json");
    if force || !content_path.exists() {
        fs::create_dir_all(base.join("content")).context("create content directory")?;
        fs::write(&content_path, EXAMPLE_CONTENT)
            .with_context(|| format!("write {}", content_path.display()))?;
    }
    fs::create_dir_all(base.join("public")).context("create document root")?;
    Ok(exit_codes::OK)
}

fn starter_config() -> DeployerConfig {
    DeployerConfig {
        endpoints: vec![EndpointConfig {
            path: "/.well-known/ai.json".to_string(),
            content_file: Some(PathBuf::from("content/ai.json")),
            ..EndpointConfig::default()
        }],
        ..DeployerConfig::default()
    }
}

/// Manager over the persisted state with every configured endpoint adopted.
fn open_manager(config_path: &Path) -> Result<EndpointManager<JsonFileStore>> {
    let cfg = load_config(config_path)?;
    let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&cfg.http)?);
    let signals = Signals::from_process_env(&cfg.probe);
    let store = JsonFileStore::new(cfg.site.state_path.clone());
    let endpoints = cfg
        .endpoints
        .iter()
        .map(Endpoint::from_config)
        .collect::<Result<Vec<_>>>()?;
    let manager = EndpointManager::new(
        cfg,
        Arc::clone(&client),
        store,
        Dispatcher::new(client),
        signals,
    );
    for endpoint in endpoints {
        manager.adopt(endpoint);
    }
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_json() {
        let cli = Cli::parse_from(["deployer", "status", "--json"]);
        assert!(matches!(cli.command, Command::Status { json: true }));
        assert_eq!(cli.config, PathBuf::from("deployer.toml"));
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["deployer", "probe", "--config", "site/deployer.toml"]);
        assert!(matches!(cli.command, Command::Probe));
        assert_eq!(cli.config, PathBuf::from("site/deployer.toml"));
    }

    #[test]
    fn starter_config_is_valid() {
        starter_config().validate().expect("valid starter config");
    }
}
