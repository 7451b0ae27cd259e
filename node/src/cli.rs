//! # CLI Interface
//!
//! Command-line arguments for `tollgate-node`, via `clap` derive. Four
//! subcommands: `run`, `init`, `plans`, and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tollgate_core::config::{DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT, DEFAULT_TRIAL_DAYS};

/// Tollgate node.
///
/// Resolves wallets to billing identities and answers quota questions for
/// metered APIs over HTTP. Exposes Prometheus metrics on a second port.
#[derive(Parser, Debug)]
#[command(
    name = "tollgate-node",
    about = "Wallet identity and entitlement service",
    version,
    propagate_version = true
)]
pub struct TollgateCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API and metrics servers.
    Run(RunArgs),
    /// Create the data directory and write the default plan catalogue.
    Init(InitArgs),
    /// Print the plan catalogue that `run` would load.
    Plans(PlansArgs),
    /// Print version information and exit.
    Version,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output.
    Pretty,
    /// JSON lines, for log aggregation.
    Json,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the identity store.
    #[arg(long, short = 'd', env = "TOLLGATE_DATA_DIR", default_value = "./tollgate-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "TOLLGATE_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TOLLGATE_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Plan catalogue (JSON). Falls back to `<data-dir>/plans.json`, then
    /// to the built-in tiers.
    #[arg(long, short = 'p', env = "TOLLGATE_PLANS")]
    pub plans: Option<PathBuf>,

    /// Length of the free trial in days.
    #[arg(long, env = "TOLLGATE_TRIAL_DAYS", default_value_t = DEFAULT_TRIAL_DAYS)]
    pub trial_days: u32,

    #[arg(long, env = "TOLLGATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Accept ownership proofs without checking them. Only for deployments
    /// where an upstream gateway has already verified the wallet signature.
    #[arg(long, env = "TOLLGATE_TRUST_UPSTREAM_SIGNATURES")]
    pub trust_upstream_signatures: bool,

    /// Shared secret the payment collaborator sends in the
    /// `x-tollgate-billing-secret` header. Without it `/subscriptions`
    /// rejects every call.
    #[arg(long, env = "TOLLGATE_BILLING_SECRET", hide_env_values = true)]
    pub billing_secret: Option<String>,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize.
    #[arg(long, short = 'd', env = "TOLLGATE_DATA_DIR", default_value = "./tollgate-data")]
    pub data_dir: PathBuf,

    /// Overwrite an existing `plans.json`.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct PlansArgs {
    /// Plan catalogue (JSON). Built-in tiers when omitted.
    #[arg(long, short = 'p', env = "TOLLGATE_PLANS")]
    pub plans: Option<PathBuf>,
}
