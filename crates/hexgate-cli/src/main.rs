//! # hexgate CLI Entry Point
//!
//! Main binary for the hexgate script-execution gateway. Starts the HTTP
//! gateway in front of an execution engine, or submits code to a running
//! gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Start the gateway (HTTP on 0.0.0.0:4341, engine at 127.0.0.1:9001)
//! hexgate serve
//!
//! # Point it at another engine and shorten the execution timeout
//! hexgate serve -b 127.0.0.1:8080 -e 10.0.0.5:9001 --execute-timeout-ms 5000
//!
//! # Run code through a running gateway (outputs the raw envelope)
//! hexgate exec http://127.0.0.1:4341 -c "1 + 1"
//! hexgate exec http://127.0.0.1:4341 -f script.js | jq '.result'
//! ```
//!
//! ## Environment
//!
//! `HEXGATE_BIND` and `HEXGATE_ENGINE` are used when `--bind` and
//! `--engine` are not given. Logging honours `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use hexgate_client::{ClientConfig, ReconnectConfig, DEFAULT_ENGINE_ADDR};
use hexgate_common::Envelope;

/// Default HTTP bind address.
const DEFAULT_BIND: &str = "0.0.0.0:4341";

const BIND_ENV: &str = "HEXGATE_BIND";
const ENGINE_ENV: &str = "HEXGATE_ENGINE";

/// Validates that a URL string starts with http:// or https://
fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

#[derive(FromArgs)]
/// hexgate - HTTP gateway for a remote script-execution engine
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Exec(ExecArgs),
}

/// Arguments for running the gateway.
///
/// Flags take priority over the environment, which takes priority over the
/// built-in defaults.
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "serve")]
/// start the HTTP gateway
struct ServeArgs {
    /// address to bind the HTTP server to
    ///
    /// Falls back to HEXGATE_BIND, then to 0.0.0.0:4341.
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// host:port of the execution engine
    ///
    /// Falls back to HEXGATE_ENGINE, then to 127.0.0.1:9001.
    #[argh(option, short = 'e')]
    engine: Option<String>,

    /// maximum time to wait for an execution in milliseconds
    ///
    /// Defaults to 30000ms. 0 waits indefinitely.
    #[argh(option, long = "execute-timeout-ms", default = "30000")]
    execute_timeout_ms: u64,

    /// timeout for connecting to the engine in milliseconds
    #[argh(option, long = "connect-timeout-ms", default = "5000")]
    connect_timeout_ms: u64,

    /// maximum number of executions awaiting a response
    #[argh(option, long = "max-pending", default = "1024")]
    max_pending: usize,

    /// do not reconnect to the engine after the session fails
    #[argh(switch, long = "no-reconnect")]
    no_reconnect: bool,

    /// upper bound of the reconnect backoff in milliseconds
    #[argh(option, long = "reconnect-max-backoff-ms", default = "10000")]
    reconnect_max_backoff_ms: u64,
}

/// Arguments for submitting code to a running gateway.
///
/// Prints the raw response envelope to stdout, which makes the output
/// suitable for piping into other tools. Exits non-zero when the envelope
/// reports a failure.
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "exec")]
/// run code through a gateway
struct ExecArgs {
    /// gateway URL, including the http:// or https:// prefix
    #[argh(positional)]
    url: String,

    /// code to execute
    #[argh(option, short = 'c')]
    code: Option<String>,

    /// file whose contents to execute
    #[argh(option, short = 'f')]
    file: Option<String>,
}

impl ServeArgs {
    /// Resolves the bind address and client configuration, reading fallbacks
    /// through `env`.
    fn resolve<F>(&self, env: F) -> Result<(SocketAddr, ClientConfig)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = self
            .bind
            .clone()
            .or_else(|| env(BIND_ENV))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", bind, e))?;

        let engine = self
            .engine
            .clone()
            .or_else(|| env(ENGINE_ENV))
            .unwrap_or_else(|| DEFAULT_ENGINE_ADDR.to_string());

        let execute_timeout = match self.execute_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let reconnect = ReconnectConfig {
            enabled: !self.no_reconnect,
            max_backoff_ms: self.reconnect_max_backoff_ms,
            ..ReconnectConfig::default()
        };

        let config = ClientConfig::new(engine)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_execute_timeout(execute_timeout)
            .with_max_pending(self.max_pending)
            .with_reconnect(reconnect);
        config.validate()?;

        Ok((addr, config))
    }
}

impl ExecArgs {
    fn source(&self) -> Result<String> {
        match (&self.code, &self.file) {
            (Some(code), None) => Ok(code.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path)),
            (Some(_), Some(_)) => Err(anyhow::anyhow!("Pass either --code or --file, not both")),
            (None, None) => Err(anyhow::anyhow!("Pass --code or --file")),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/execute", self.url.trim_end_matches('/'))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli: Cli = argh::from_env();

    // exec prints raw JSON; keep stdout free of log lines.
    if !matches!(cli.command, Commands::Exec(_)) {
        // RUST_LOG wins over the info default.
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => {
            run_serve(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exec(args) => run_exec(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let (addr, config) = args.resolve(|key| std::env::var(key).ok())?;

    tracing::info!("Starting hexgate gateway");
    tracing::info!("Binding to: {}", addr);
    tracing::info!("Engine: {}", config.engine_addr);
    match config.execute_timeout {
        Some(timeout) => tracing::info!("Execution timeout: {}ms", timeout.as_millis()),
        None => tracing::info!("Execution timeout disabled"),
    }
    if !config.reconnect.enabled {
        tracing::info!("Reconnection disabled");
    }

    let client = hexgate_server::start_client(config).await?;
    hexgate_server::HttpServer::new(client.clone()).run(addr).await?;

    client.disconnect();
    Ok(())
}

/// Executes the `exec` subcommand.
///
/// No tracing is initialized for this command so the output stays clean
/// for unix tool usage.
async fn run_exec(args: ExecArgs) -> Result<ExitCode> {
    validate_http_url(&args.url, "gateway URL")?;
    let code = args.source()?;

    let response = reqwest::Client::new()
        .post(args.endpoint())
        .json(&serde_json::json!({ "code": code }))
        .send()
        .await
        .with_context(|| format!("Failed to reach gateway at {}", args.url))?;
    let envelope: Envelope = response
        .json()
        .await
        .context("Gateway returned a malformed envelope")?;

    println!("{}", serde_json::to_string(&envelope)?);

    Ok(if envelope.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
