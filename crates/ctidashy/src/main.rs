//! `ctidashy` - CLI for the CTI dashboard
//!
//! This binary runs the dashboard server and a few administrative commands
//! that work on the same configuration and account files.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ctidashy::cli::{Cli, Command, ConfigCommand, ManifestCommand, ServeCommand, UserCommand};
use ctidashy::opencti::OpenCtiBackend;
use ctidashy::{init_logging, manifest, web, AppState, Config, Panel, UserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity(), cli.log_format.into());

    let config_path = cli.config.clone();

    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(config_path, serve_cmd).await,
        Command::Config(config_cmd) => handle_config(config_path, config_cmd),
        Command::User(user_cmd) => {
            let config = Config::load_from(config_path)?;
            handle_user(&config, user_cmd)
        }
        Command::Manifest(manifest_cmd) => handle_manifest(manifest_cmd),
    }
}

async fn handle_serve(config_path: Option<PathBuf>, cmd: ServeCommand) -> anyhow::Result<()> {
    let mut config = Config::load_from(config_path.clone())?;
    if let Some(bind) = cmd.bind {
        config.server.bind_addr = bind;
    }
    let addr = config.bind_addr()?;
    let save_path = config_path.unwrap_or_else(Config::default_config_path);

    // Make sure the default admin exists before the first login
    UserStore::open(config.user_file_path())
        .with_context(|| format!("opening {}", config.user_file_path().display()))?;

    let state = AppState::new(config, save_path, Arc::new(OpenCtiBackend));
    web::serve(state, addr).await?;
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn show_path(path: Option<&PathBuf>) -> String {
    path.map_or_else(|| "(not set)".to_string(), |p| p.display().to_string())
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Server]");
    println!("  Bind address:       {}", config.server.bind_addr);
    println!("  Session TTL (min):  {}", config.server.session_ttl_minutes);
    println!();
    println!("[Paths]");
    let paths = &config.paths;
    println!("  Low-side manifests: {}", show_path(paths.low_side_manifest_dir.as_ref()));
    println!("  High-side manifests: {}", show_path(paths.high_side_manifest_dir.as_ref()));
    println!("  Resend manifests:   {}", show_path(paths.resend_manifest_dir.as_ref()));
    println!("  Feed backup:        {}", show_path(paths.feed_backup_dir.as_ref()));
    println!("  Resend folder:      {}", show_path(paths.resend_folder.as_ref()));
    println!("  Storage folder:     {}", show_path(paths.storage_folder.as_ref()));
    println!("  Queued folder:      {}", show_path(paths.queued_folder.as_ref()));
    println!("  Dupe scan folder:   {}", show_path(paths.dupe_scan_folder.as_ref()));
    println!("  Tor CSV directory:  {}", show_path(paths.tor_csv_dir.as_ref()));
    println!();
    println!("[Features]");
    println!("  Manifest:           {}", config.features.manifest_enabled);
    println!("  Resend:             {}", config.features.resend_enabled);
    println!("  Tor:                {}", config.features.tor_enabled);
    println!();
    println!("[OpenCTI]");
    println!("  URL:                {}", config.opencti.url);
    println!("  API key:            {}", config.opencti.api_key);
    println!("  Verify TLS:         {}", config.opencti.verify_tls);
    println!();
    println!("[Accounts]");
    println!("  User file:          {}", config.user_file_path().display());
    println!("  Preset file:        {}", config.preset_file_path().display());
    println!("  Watchlist file:     {}", config.watchlist_file_path().display());
}

fn handle_user(config: &Config, cmd: UserCommand) -> anyhow::Result<()> {
    let store = UserStore::open(config.user_file_path())?;
    match cmd {
        UserCommand::List => {
            for user in store.list()? {
                let panels: Vec<&str> = user.panels.iter().map(|p| p.as_str()).collect();
                println!("{:<20} {}", user.username, panels.join(", "));
            }
        }
        UserCommand::Add { username, password } => {
            let user = store.add(&username, &password)?;
            println!("Created user {}", user.username);
        }
        UserCommand::Remove { username } => {
            if store.remove(&username)? {
                println!("Removed user {username}");
            } else {
                anyhow::bail!("no such user: {username}");
            }
        }
        UserCommand::Grant { username, panel } => {
            let user = store.append_panel(&username, panel.parse::<Panel>()?)?;
            let panels: Vec<&str> = user.panels.iter().map(Panel::as_str).collect();
            println!("{} now has: {}", user.username, panels.join(", "));
        }
    }
    Ok(())
}

fn handle_manifest(cmd: ManifestCommand) -> anyhow::Result<()> {
    match cmd {
        ManifestCommand::Compare {
            source,
            target,
            json,
        } => {
            let missing = manifest::compare_manifests(&source, &target)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&missing)?);
            } else if missing.is_empty() {
                println!("Every row of {} reached the target.", source.display());
            } else {
                println!("{} rows missing from {}:", missing.len(), target.display());
                for row in &missing {
                    println!("  {}  {}  {}", row.md5_hash, row.ctifeed, row.filename);
                }
            }
        }
    }
    Ok(())
}
