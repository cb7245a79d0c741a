//! Command-line surface of the reference agent.

use clap::{Parser, Subcommand};

use a2g_domain::config::Config;

/// Reference A2G agent: manages identities and asks governance for verdicts.
#[derive(Debug, Parser)]
#[command(name = "a2g-hello-agent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, inspect, and delete stored identities.
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Inspect the resolved configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print a fresh 256-bit signing key.
    Keygen,
    /// Register the agent and the capabilities it wants.
    Register {
        /// Identity to act as (defaults to `[identity].name`).
        #[arg(long)]
        identity: Option<String>,
        /// Capability to request.  Repeatable.
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// Ask for a verdict on a tool call, then report its outcome.
    Intent {
        /// Tool name, e.g. `fs.read`.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Identity to act as (defaults to `[identity].name`).
        #[arg(long)]
        identity: Option<String>,
        /// Free-form justification sent with the intent.
        #[arg(long)]
        reasoning: Option<String>,
        /// Session the intent belongs to.
        #[arg(long)]
        session: Option<String>,
        /// Request deadline in milliseconds (overrides config).
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Do not send an outcome report after the verdict.
        #[arg(long)]
        no_report: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum IdentityCommand {
    /// Create and store a new identity.
    Create {
        /// Lowercase alphanumerics and internal hyphens.
        name: String,
        /// Optional metadata as a JSON value.
        #[arg(long)]
        metadata: Option<String>,
    },
    /// List stored identity names.
    List,
    /// Show an identity's public fields.
    Show { name: String },
    /// Delete a stored identity.
    Delete { name: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Print the resolved config (defaults filled in) as TOML.
    Show,
}

/// Load the configuration from `A2G_CONFIG` (or `a2g.toml`).  Returns the
/// parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("A2G_CONFIG").unwrap_or_else(|_| "a2g.toml".into());
    let config =
        Config::load(&config_path).map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;
    Ok((config, config_path))
}
