use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use gatekeeper::{audit::AuditLog, cli, config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gatekeeper", about = "Role-based access gate for protected routes")]
pub struct Args {
    #[arg(long, env = "GATEKEEPER_CONFIG", help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "GATEKEEPER_AUDIT_LOG", help = "Append decisions to this JSONL file")]
    pub audit_log: Option<PathBuf>,

    #[arg(
        long,
        value_name = "MODE",
        help = "Role match mode: exact, hierarchy"
    )]
    pub mode: Option<String>,

    #[arg(long, help = "Debug output (log gate internals to stderr)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate a single request
    Check {
        /// Request path, optionally with a query string
        path: String,
        #[arg(long, help = "Session cookie value (JSON)", conflicts_with = "cookie_header")]
        cookie: Option<String>,
        #[arg(long, help = "Raw Cookie: header")]
        cookie_header: Option<String>,
        #[arg(long, value_name = "MS", help = "Evaluate at this time (ms since epoch)")]
        now: Option<i64>,
        #[arg(long, help = "Print the decision as JSON")]
        json: bool,
    },
    /// Evaluate JSON-lines requests from a file ("-" for stdin)
    Replay { input: PathBuf },
    /// Show the effective route table
    Routes,
    /// Print a session cookie for local testing
    Mint {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        role: String,
        #[arg(long, help = "Solana wallet address to embed")]
        wallet: Option<String>,
        #[arg(long, value_name = "SECS", default_value_t = 0, help = "Backdate the session")]
        age: u64,
        #[arg(long, help = "Percent-encode the value")]
        encode: bool,
        #[arg(long, help = "Print as name=value for a Cookie: header")]
        header: bool,
    },
    /// Check the configuration and report every problem
    Validate,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_with_builtins(config_path)?
    } else {
        config::Config::load()?
    };

    if let Some(mode_str) = &args.mode {
        cfg.gate.mode = config::MatchMode::from_str(mode_str).ok_or_else(|| {
            anyhow!("Invalid match mode: {}. Use: exact, hierarchy", mode_str)
        })?;
    }
    if let Some(path) = &args.audit_log {
        cfg.audit.path = Some(path.clone());
    }

    tracing::debug!(
        routes = cfg.routes.len(),
        mode = cfg.gate.mode.as_str(),
        cookie = %cfg.gate.cookie_name,
        "configuration loaded"
    );

    // Refuse to gate anything with a broken policy table
    let gating = matches!(args.command, Command::Check { .. } | Command::Replay { .. });
    if gating {
        if let Err(errors) = cfg.validate() {
            let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(anyhow!(
                "Invalid configuration:\n  {}",
                details.join("\n  ")
            ));
        }
    }

    let audit = match (&cfg.audit.path, gating) {
        (Some(path), true) => {
            let run_id = uuid::Uuid::new_v4().to_string();
            Some(AuditLog::open(path, &run_id)?)
        }
        _ => None,
    };

    let ctx = cli::Context::new(cfg, audit);

    match &args.command {
        Command::Check {
            path,
            cookie,
            cookie_header,
            now,
            json,
        } => cli::run_check(
            &ctx,
            path,
            cookie.as_deref(),
            cookie_header.as_deref(),
            *now,
            *json,
        ),
        Command::Replay { input } => cli::run_replay(&ctx, input),
        Command::Routes => cli::run_routes(&ctx),
        Command::Mint {
            subject,
            role,
            wallet,
            age,
            encode,
            header,
        } => cli::run_mint(
            &ctx,
            subject,
            role,
            wallet.as_deref(),
            *age,
            *encode,
            *header,
        ),
        Command::Validate => cli::run_validate(&ctx),
    }
}
