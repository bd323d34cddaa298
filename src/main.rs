use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use code_exec::Config;
use code_exec::api::{ApiState, ExecApi};
use code_exec::sandbox::{DockerBackend, SandboxManager};

/// Sandboxed code execution service.
#[derive(Parser, Debug)]
#[command(name = "code-exec", version, about)]
struct Cli {
    /// Address to bind the HTTP API to
    #[arg(long, env = "CODE_EXEC_HOST")]
    host: Option<IpAddr>,

    /// Port to bind the HTTP API to
    #[arg(short, long, env = "CODE_EXEC_PORT")]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("code_exec=info,tower_http=info"));
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(host) = cli.host {
        config.http.host = host;
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }

    let backend = DockerBackend::connect()
        .await
        .context("failed to connect to Docker")?;
    let manager = SandboxManager::new(config.sandbox.clone(), Arc::new(backend))?;
    manager.initialize().await?;

    let state = ApiState {
        manager: Arc::new(manager),
    };

    ExecApi::serve(state, config.http.addr(), async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    })
    .await?;

    Ok(())
}
