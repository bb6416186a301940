//! Diagnostics CLI: connect to one upstream MCP server from flags, run a
//! single operation, print its result, and disconnect. Not a config-file
//! driven control plane — that belongs to the embedding application.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mcpup_client::{CoreClientDeps, EnvSecretResolver, ManagedClient, ServerConfig};
use mcpup_logging::{LoggingConfig, SecretRegistry};
use mcpup_supervisor::{IsolationDefaults, ServerMutexMap, read_or_create_instance_id};

#[derive(Parser, Debug)]
#[command(name = "mcpup", version, about = "Diagnostics CLI for a single upstream MCP server")]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Connection {
    /// Name to register this server under (used for logging and OAuth token keys).
    #[arg(long, default_value = "upstream")]
    name: String,

    /// Command to run over stdio. Overrides `--url` if both are given.
    #[arg(long)]
    command: Option<String>,

    /// Extra argv entries for `--command`, repeatable.
    #[arg(long = "arg")]
    args: Vec<String>,

    /// Remote server URL for HTTP/SSE.
    #[arg(long)]
    url: Option<String>,

    /// Extra header as KEY=VALUE, repeatable. Values may be `${env:NAME}`.
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long)]
    verbose: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tools the upstream advertises.
    ToolsList,
    /// Call a single tool.
    ToolsCall {
        #[arg(long)]
        name: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
    /// Dump the connection's diagnostics snapshot.
    Diagnostics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.connection.verbose { "debug" } else { "info" };
    let registry = SecretRegistry::new();
    let _guard = LoggingConfig::stderr(level).init(registry.clone()).context("failed to initialize logging")?;

    let mut config = ServerConfig::new(cli.connection.name.clone())?;
    config.connect_timeout = Duration::from_secs(cli.connection.timeout_secs);

    if let Some(command) = &cli.connection.command {
        config.command = command.clone();
        config.args = cli.connection.args.clone();
    } else if let Some(url) = &cli.connection.url {
        config.url = url.clone();
        config.headers = cli.connection.headers.iter().cloned().collect::<HashMap<_, _>>();
    } else {
        anyhow::bail!("either --command or --url must be specified");
    }

    let state_dir = std::env::temp_dir().join("mcpup");
    let instance_id = read_or_create_instance_id(&state_dir).context("failed to read/create instance id")?;

    let deps = CoreClientDeps {
        isolation_defaults: IsolationDefaults::default(),
        secret_resolver: Arc::new(EnvSecretResolver),
        secret_registry: registry,
        token_store: None,
        docker_mutex: ServerMutexMap::new(),
        instance_id,
    };

    let client = ManagedClient::new(config, deps);
    client.connect().await.context("failed to connect to upstream")?;

    let result = run_command(&client, cli.command).await;

    client.disconnect().await.ok();
    result
}

async fn run_command(client: &ManagedClient, command: Command) -> Result<()> {
    match command {
        Command::ToolsList => {
            let tools = client.list_tools().await.context("list_tools failed")?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::ToolsCall { name, arguments } => {
            let args_value: serde_json::Value =
                serde_json::from_str(&arguments).context("arguments must be valid JSON")?;
            let result = client.call_tool(&name, Some(args_value)).await.context("call_tool failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Diagnostics => {
            let diagnostics = client.get_diagnostics().await;
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        }
    }
    Ok(())
}
