use anyhow::{anyhow, Context, Result};
use clap::Parser;
use secrecy::{ExposeSecret, SecretString};
use std::io::BufRead;
use tracing_subscriber::EnvFilter;

use crate::cli::cli::{Cli, Command};
use crate::config::Config;
use crate::host;
use crate::vault::header::{load_header, VaultPaths};
use crate::vault::service::VaultService;

pub async fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::create()?;

    match cli.command.unwrap_or(Command::Host) {
        Command::Host => host::run(config).await,
        Command::Init { user } => handle_init(&config, &user),
        Command::Header => handle_header(&config),
        Command::ChangeMaster => handle_change_master(&config),
    }
}

/// Logs go to stderr only; stdout belongs to the messaging protocol.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_init(config: &Config, user: &str) -> Result<()> {
    let mut service = VaultService::open(VaultPaths::new(config.vault_dir.clone()))?;
    if !service.needs_master_setup()? {
        return Err(anyhow!("vault already has a master password"));
    }
    let master = resolve_password("KRYPTA_PASSWORD", "Master password")?;
    service.set_master(user, master.expose_secret())?;
    println!("Vault initialized at {}", config.vault_dir.display());
    Ok(())
}

fn handle_header(config: &Config) -> Result<()> {
    let header = load_header(&VaultPaths::new(config.vault_dir.clone()))
        .context("failed to load vault header")?;
    println!("Vault header:");
    println!("  version: {}", header.version);
    println!("  user: {}", header.user);
    println!("  created: {}", header.created_at);
    println!("  updated: {}", header.updated_at);
    println!("  kdf: {}", header.kdf.name);
    println!("  kdf memoryMB: {}", header.kdf.memory_mb);
    println!("  kdf time: {}", header.kdf.time);
    println!("  kdf parallelism: {}", header.kdf.parallelism);
    println!(
        "  initialized: {}",
        if header.is_initialized() { "yes" } else { "no" }
    );
    Ok(())
}

fn handle_change_master(config: &Config) -> Result<()> {
    let mut service = VaultService::open(VaultPaths::new(config.vault_dir.clone()))?;
    let old = resolve_password("KRYPTA_PASSWORD", "Current master password")?;
    let new = resolve_password("KRYPTA_NEW_PASSWORD", "New master password")?;
    service.change_master(old.expose_secret(), new.expose_secret())?;
    println!("Master password changed");
    Ok(())
}

/// Resolve a password from the environment, falling back to one line on
/// stdin. There is no interactive prompt; this binary is driven by the
/// extension or by scripts.
fn resolve_password(env_var: &str, label: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(env_var) {
        return Ok(SecretString::new(pw.into()));
    }
    eprintln!("{label} (reading one line from stdin):");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
    if trimmed.is_empty() {
        return Err(anyhow!("empty password"));
    }
    Ok(SecretString::new(trimmed.into()))
}
