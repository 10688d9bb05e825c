use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "relay",
    about = "Inspect provider failover candidates, auth profile order, and cooldown probing",
    version
)]
/// Public struct `Cli` used across relay components.
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "RELAY_CONFIG",
        help = "Gateway config JSON file. Built-in defaults apply when omitted."
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Print the ordered model candidates for a request.
    Candidates(CandidatesArgs),
    /// Print the resolved auth profile order for a provider.
    AuthOrder(AuthOrderArgs),
    /// Print cooldown expiry and whether a recovery probe would run now.
    ProbeWindow(ProbeWindowArgs),
}

#[derive(Debug, Args)]
pub struct CandidatesArgs {
    #[arg(long, help = "Explicit provider for this request.")]
    pub provider: Option<String>,

    #[arg(long, help = "Explicit model for this request.")]
    pub model: Option<String>,

    #[arg(
        long = "fallback",
        value_delimiter = ',',
        conflicts_with = "no_fallbacks",
        help = "Fallback chain replacing the configured one. Accepts provider/model or aliases."
    )]
    pub fallbacks: Vec<String>,

    #[arg(long, help = "Replace the configured fallback chain with an empty one.")]
    pub no_fallbacks: bool,

    #[arg(
        long,
        conflicts_with_all = ["provider", "fallbacks", "no_fallbacks"],
        help = "Resolve image-model candidates; --model then acts as the image override."
    )]
    pub image: bool,
}

impl CandidatesArgs {
    pub fn fallbacks_override(&self) -> Option<&[String]> {
        if self.no_fallbacks || !self.fallbacks.is_empty() {
            Some(&self.fallbacks)
        } else {
            None
        }
    }
}

#[derive(Debug, Args)]
pub struct AuthStoreArgs {
    #[arg(long, env = "RELAY_AUTH_STORE", help = "Auth profile store JSON file.")]
    pub store: PathBuf,

    #[arg(
        long,
        help = "Mirror provider API keys from well-known environment variables into the store."
    )]
    pub import_env: bool,
}

#[derive(Debug, Args)]
pub struct AuthOrderArgs {
    #[command(flatten)]
    pub store: AuthStoreArgs,

    #[arg(long)]
    pub provider: String,

    #[arg(long, help = "Profile id to move to the front when present.")]
    pub preferred: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProbeWindowArgs {
    #[command(flatten)]
    pub store: AuthStoreArgs,

    #[arg(long)]
    pub provider: String,

    #[arg(
        long,
        help = "Model requested with --provider. Without it the configured chain decides whether the provider leads."
    )]
    pub model: Option<String>,

    #[arg(long, help = "Agent scope used for the probe throttle key.")]
    pub agent_scope: Option<String>,
}
