//! Reference agent for the A2G governance protocol.
//!
//! Usage:
//!   a2g-hello-agent identity create my-agent
//!   A2G_API_KEY=secret a2g-hello-agent intent fs.read --identity my-agent \
//!       --args '{"path": "/etc/hosts"}'
//!
//! Env vars:
//!   A2G_CONFIG   path to the TOML config (default: "a2g.toml")
//!   A2G_API_KEY  bearer key (the variable name is configurable)
//!   RUST_LOG     log filter (default: "warn")

mod cli;

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use a2g_domain::config::{Config, ConfigSeverity};
use a2g_domain::{AgentIdentity, FileIdentityStore, IdentityStore, Signer};
use a2g_protocol::{AgentMetadata, Verdict};
use a2g_sdk::{AgentClient, AgentClientBuilder, ContextToken, ExecutionOutcome, IntentOptions};

use cli::{Cli, Command, ConfigCommand, IdentityCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();
    let (config, config_path) = cli::load_config()?;

    match cli.command {
        Command::Identity(cmd) => identity_cmd(&config, cmd),
        Command::Config(ConfigCommand::Validate) => {
            if !validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Keygen => {
            println!("{}", Signer::generate_key());
            Ok(())
        }
        Command::Register {
            identity,
            capabilities,
        } => {
            let client = connect(&config, identity.as_deref()).await?;
            let metadata = AgentMetadata {
                name: "a2g-hello-agent".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                runtime: Some("rust".into()),
            };
            let result = client.register(capabilities, Some(metadata)).await;
            client.disconnect().await?;
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }
        Command::Intent {
            tool,
            args,
            identity,
            reasoning,
            session,
            timeout_ms,
            no_report,
        } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let client = connect(&config, identity.as_deref()).await?;

            let token = ContextToken::generate();
            let options = IntentOptions {
                session_id: session,
                reasoning,
                timeout: timeout_ms.map(Duration::from_millis),
                context: Some(token.clone()),
                ..Default::default()
            };

            let started = Instant::now();
            let verdict = client.request_intent(&tool, arguments.clone(), options).await;
            let verdict = match verdict {
                Ok(v) => v,
                Err(e) => {
                    client.disconnect().await?;
                    return Err(e.into());
                }
            };
            println!("{}", serde_json::to_string_pretty(&verdict)?);

            if !no_report {
                let outcome = match verdict.verdict {
                    Verdict::Approved | Verdict::Conditional => {
                        // Nothing is executed here; the arguments are echoed.
                        ExecutionOutcome::success(arguments, started.elapsed())
                    }
                    Verdict::Denied | Verdict::Escalate => {
                        ExecutionOutcome::aborted(format!("verdict {:?}", verdict.verdict))
                    }
                };
                let intent_id = client.report_for_context(&token, &outcome).await?;
                tracing::info!(intent_id = %intent_id, status = ?outcome.status, "outcome reported");
            }

            client.disconnect().await?;
            Ok(())
        }
    }
}

/// Initialize compact stderr-only tracing.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<FileIdentityStore> {
    FileIdentityStore::new(&config.identity.store_dir)
        .with_context(|| format!("opening identity store {}", config.identity.store_dir.display()))
}

fn identity_cmd(config: &Config, cmd: IdentityCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match cmd {
        IdentityCommand::Create { name, metadata } => {
            if store.exists(&name)? {
                anyhow::bail!("identity {name:?} already exists");
            }
            let metadata = metadata
                .map(|m| serde_json::from_str(&m))
                .transpose()
                .context("--metadata must be valid JSON")?;
            let id = AgentIdentity::create(&name, None, metadata)?;
            store.save(&id)?;
            println!("{}", id.did());
        }
        IdentityCommand::List => {
            for name in store.list()? {
                println!("{name}");
            }
        }
        IdentityCommand::Show { name } => {
            let id = store.load(&name)?;
            let view = serde_json::json!({
                "did": id.did(),
                "name": id.name(),
                "created_at": id.created_at(),
                "fingerprint": Signer::hash(id.signing_key(), id.did()),
                "metadata": id.metadata(),
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        IdentityCommand::Delete { name } => {
            if !store.delete(&name)? {
                anyhow::bail!("no identity named {name:?}");
            }
            println!("deleted {name}");
        }
    }
    Ok(())
}

async fn connect(config: &Config, identity: Option<&str>) -> anyhow::Result<AgentClient> {
    let name = identity
        .map(str::to_string)
        .or_else(|| config.identity.name.clone())
        .context("no identity given; pass --identity or set [identity].name")?;
    let id = open_store(config)?.load(&name)?;

    let client = AgentClientBuilder::from_config(config).identity(&id).build()?;
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            tracing::debug!(event = ?ev, "client event");
        }
    });

    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.governance.url))?;
    Ok(client)
}

/// Print config issues.  Returns `false` when any is an error.
fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    for issue in &issues {
        println!("{issue}");
    }
    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count,
        issues.len() - error_count,
    );
    error_count == 0
}
