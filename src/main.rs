mod client;
mod config;
mod controller;
mod error;
mod guard;
mod history;
mod reveal;
mod store;
mod tui;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use config::{ConfigFile, ResolvedConfig};

use client::{AuthMode, ChatApi, HttpApi};
use store::AuthStore;

#[derive(Parser, Debug)]
#[command(
    name = "auralis",
    about = "Terminal client for the Auralis chat service",
    long_about = None,
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Profile to use from config file
    #[arg(short, long, env = "AURALIS_PROFILE", global = true)]
    profile: Option<String>,

    /// Override backend URL
    #[arg(long, env = "AURALIS_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Where the stored credential and logs live
    #[arg(long, env = "AURALIS_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Write a default config file to ~/.config/auralis/config.toml and exit
    #[arg(long)]
    init: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the access token
    Login(Credentials),
    /// Create an account and store the access token
    Signup(Credentials),
    /// Forget the stored token and active session
    Logout,
    /// List sessions, marking the active one
    Sessions,
}

#[derive(clap::Args, Debug)]
struct Credentials {
    #[arg(long, env = "AURALIS_EMAIL")]
    email: String,
    #[arg(long, env = "AURALIS_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: auralis");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;
    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.data_dir.as_deref(),
    );

    init_logging(&resolved)?;

    match args.command {
        None => tui::run(resolved).await,
        Some(Command::Login(c)) => authenticate(&resolved, AuthMode::Login, c).await,
        Some(Command::Signup(c)) => authenticate(&resolved, AuthMode::Signup, c).await,
        Some(Command::Logout) => {
            let mut store = AuthStore::open(resolved.state_path());
            store.clear_all()?;
            if let Some(path) = store.path() {
                println!("  signed out  ·  cleared {}", path.display());
            }
            Ok(())
        }
        Some(Command::Sessions) => list_sessions(&resolved).await,
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// The TUI owns stdout, so logs go to `<data_dir>/auralis.log`.
fn init_logging(resolved: &ResolvedConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(&resolved.data_dir)
        .with_context(|| format!("Failed to create {}", resolved.data_dir.display()))?;
    let log_file = std::fs::File::options()
        .create(true)
        .append(true)
        .open(resolved.log_path())
        .with_context(|| format!("Failed to open {}", resolved.log_path().display()))?;

    let filter = EnvFilter::try_from_env("AURALIS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

// ── Non-interactive commands (plain stdout, no TUI) ───────────────────────────

fn http_api(resolved: &ResolvedConfig) -> Result<HttpApi> {
    HttpApi::new(resolved.endpoint.clone(), resolved.request_timeout)
}

async fn authenticate(resolved: &ResolvedConfig, mode: AuthMode, creds: Credentials) -> Result<()> {
    let api = http_api(resolved)?;
    let token = match api.authenticate(mode, creds.email.trim(), &creds.password).await {
        Ok(t) => t,
        Err(e) => bail!("{} failed: {}", mode.label(), e.message()),
    };
    let mut store = AuthStore::open(resolved.state_path());
    store.set_credential(&token)?;
    println!("  ✓ signed in as {}  ·  {}", creds.email.trim(), resolved.endpoint);
    Ok(())
}

async fn list_sessions(resolved: &ResolvedConfig) -> Result<()> {
    let mut store = AuthStore::open(resolved.state_path());
    let Some(token) = store.credential().map(str::to_string) else {
        bail!("not signed in; run `auralis login --email <EMAIL> --password <PASSWORD>`");
    };

    let api = http_api(resolved)?;
    let sessions = match api.list_sessions(Some(&token)).await {
        Ok(s) => s,
        Err(e) if e.is_unauthorized() => {
            store.clear_all()?;
            bail!("stored token was rejected; signed out");
        }
        Err(e) => bail!("{}", e.message()),
    };

    println!();
    if sessions.is_empty() {
        println!("  no sessions");
    }
    let active = store.active_session();
    for s in &sessions {
        let marker = if active == Some(s.id.as_str()) { "●" } else { "○" };
        println!("  {marker} {}  {}", s.id, s.title.as_deref().unwrap_or(""));
    }
    println!();
    Ok(())
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "auralis", &mut std::io::stdout());
    Ok(())
}
