//! Warden CLI - operator interface for authorization, integrity and recovery

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - authorization, integrity and recovery for coding agents")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./warden.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a token for a principal
    Issue {
        /// Principal id
        #[arg(short, long)]
        principal: String,
        /// Role name
        #[arg(short, long)]
        role: String,
        /// Lifetime in seconds (config default when omitted)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Revoke a token
    Revoke {
        /// Token string
        token: String,
    },
    /// Dry-run an operation through the full pre-operation check
    Check {
        /// Principal id
        #[arg(short, long)]
        principal: String,
        /// Role to register the principal with
        #[arg(short, long)]
        role: String,
        /// Operation name (Read, Write, Execute, ...)
        #[arg(short, long)]
        operation: String,
        /// Resource path
        #[arg(long)]
        path: Option<String>,
    },
    /// Register a component's current content as trusted
    Register {
        /// Component name
        #[arg(short, long)]
        name: String,
        /// File or directory
        #[arg(short, long)]
        path: PathBuf,
        /// Record the component as untrusted
        #[arg(long)]
        untrusted: bool,
    },
    /// Verify one component, or every registered component
    Verify {
        /// Component name (all components when omitted)
        #[arg(short, long, requires = "path")]
        name: Option<String>,
        /// Component path
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Seal the security baseline
    Seal,
    /// Full system audit
    Audit {
        /// Also print the most recent audit log entries
        #[arg(long, default_value_t = 0)]
        events: usize,
    },
    /// Emergency stop
    KillSwitch {
        #[command(subcommand)]
        action: KillSwitchAction,
    },
    /// Rollback controller
    Rollback {
        #[command(subcommand)]
        action: RollbackAction,
    },
    /// Sandbox router
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },
    /// Authorize and run a command in the sandbox
    Run {
        /// Principal id
        #[arg(short, long)]
        principal: String,
        /// Role to register the principal with
        #[arg(short, long)]
        role: String,
        /// Task writes files
        #[arg(long)]
        write: bool,
        /// Task needs network
        #[arg(long)]
        network: bool,
        /// Task runs without supervision
        #[arg(long)]
        autonomous: bool,
        /// Record the result against this component
        #[arg(long)]
        component: Option<String>,
        /// Timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Command line
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum KillSwitchAction {
    /// Engage the kill switch
    Engage {
        /// Reason recorded in the marker and audit log
        #[arg(short, long)]
        reason: String,
    },
    /// Release the kill switch
    Release,
    /// Show kill switch state
    Status,
}

#[derive(Subcommand)]
enum RollbackAction {
    /// Show failure counters, checkpoint and recovery mode
    Status,
    /// Leave recovery mode
    ExitRecovery,
    /// Record a test or build result
    Record {
        /// Component name
        #[arg(long)]
        component: String,
        /// The run failed
        #[arg(long)]
        failed: bool,
        /// Details
        #[arg(short, long, default_value = "")]
        details: String,
    },
    /// Set the known-good checkpoint to the current head
    MarkGood,
}

#[derive(Subcommand)]
enum SandboxAction {
    /// Self-check the sandbox
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Issue {
            principal,
            role,
            ttl_secs,
        } => commands::issue(config, &principal, &role, ttl_secs),
        Commands::Revoke { token } => commands::revoke(config, &token),
        Commands::Check {
            principal,
            role,
            operation,
            path,
        } => commands::check(config, &principal, &role, &operation, path),
        Commands::Register { name, path, untrusted } => commands::register(config, &name, &path, !untrusted),
        Commands::Verify { name, path } => commands::verify(config, name.as_deref(), path.as_deref()),
        Commands::Seal => commands::seal(config),
        Commands::Audit { events } => commands::audit(config, events),
        Commands::KillSwitch { action } => match action {
            KillSwitchAction::Engage { reason } => commands::kill_switch_engage(config, &reason),
            KillSwitchAction::Release => commands::kill_switch_release(config),
            KillSwitchAction::Status => commands::kill_switch_status(config),
        },
        Commands::Rollback { action } => match action {
            RollbackAction::Status => commands::rollback_status(config),
            RollbackAction::ExitRecovery => commands::rollback_exit_recovery(config),
            RollbackAction::Record {
                component,
                failed,
                details,
            } => commands::rollback_record(config, &component, !failed, &details).await,
            RollbackAction::MarkGood => commands::rollback_mark_good(config).await,
        },
        Commands::Sandbox {
            action: SandboxAction::Validate,
        } => commands::sandbox_validate(config).await,
        Commands::Run {
            principal,
            role,
            write,
            network,
            autonomous,
            component,
            timeout_secs,
            command,
        } => {
            let mut profile = warden_sandbox::TaskProfile::new();
            profile.writes_files = write;
            profile.requires_network = network;
            profile.autonomous = autonomous;
            commands::run(config, &principal, &role, profile, component, timeout_secs, &command.join(" ")).await
        }
    }
}
