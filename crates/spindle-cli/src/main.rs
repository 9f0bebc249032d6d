//! spindle - job queue server and demo driver.

mod http;
mod tasks;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use spindle_core::{JobState, Runtime, SpindleConfig};

use crate::tasks::{Add, SlowDouble};

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Job queue with leased workers, retries and a result store")]
#[command(version)]
struct Cli {
    /// TOML config file; flags override its values
    #[arg(short, long, env = "SPINDLE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "SPINDLE_STORE_URL", global = true)]
    store_url: Option<String>,

    /// Worker pool size
    #[arg(long, env = "SPINDLE_WORKERS", global = true)]
    workers: Option<usize>,

    #[arg(long, env = "SPINDLE_VISIBILITY_TIMEOUT_MS", global = true)]
    visibility_timeout_ms: Option<u64>,

    #[arg(long, env = "SPINDLE_MAX_ATTEMPTS", global = true)]
    max_attempts: Option<u32>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SPINDLE_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers and the HTTP API until Ctrl-C
    Serve {
        #[arg(long, env = "SPINDLE_HTTP_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },

    /// Submit the demo tasks in-process and print their results
    Demo {
        #[arg(long, default_value_t = 2)]
        x: i64,

        #[arg(long, default_value_t = 3)]
        y: i64,

        /// Seconds to wait for each result
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<SpindleConfig> {
        let mut config = match &self.config {
            Some(path) => SpindleConfig::from_path(path)?,
            None => SpindleConfig::default(),
        };
        if let Some(url) = &self.store_url {
            config.store_url = url.clone();
        }
        if let Some(n) = self.workers {
            config.worker_pool_size = n;
        }
        if let Some(ms) = self.visibility_timeout_ms {
            config.visibility_timeout_ms = ms;
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = n;
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn build_runtime(config: SpindleConfig) -> anyhow::Result<Arc<Runtime>> {
    let runtime = tasks::builder(Duration::from_secs(3))?
        .config(config)
        .build()
        .context("failed to build runtime")?;
    Ok(Arc::new(runtime))
}

async fn serve(runtime: Arc<Runtime>, bind: SocketAddr) -> anyhow::Result<()> {
    runtime.start().await;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "http listening");

    axum::serve(listener, http::router(runtime.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("http server failed")?;

    runtime.shutdown().await;
    Ok(())
}

async fn demo(runtime: Arc<Runtime>, x: i64, y: i64, wait: Duration) -> anyhow::Result<()> {
    runtime.start().await;

    let add = runtime.submit_task(&Add { x, y }).await?;
    let double = runtime.submit_task(&SlowDouble { x }).await?;
    println!("submitted add={add} slow_double={double}");

    let add_status = runtime.wait_for(add, wait).await?;
    let double_status = runtime.wait_for(double, wait).await?;
    runtime.shutdown().await;

    for (name, status, value) in [
        ("add", &add_status, http::decode_result::<Add>(&add_status)),
        (
            "slow_double",
            &double_status,
            http::decode_result::<SlowDouble>(&double_status),
        ),
    ] {
        match (status.state, value) {
            (JobState::Succeeded, Some(v)) => println!("{name}: {v}"),
            (state, _) => println!(
                "{name}: {state}{}",
                status
                    .error
                    .as_deref()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default()
            ),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.load_config()?;
    let runtime = build_runtime(config)?;

    match cli.command {
        Commands::Serve { bind } => serve(runtime, bind).await,
        Commands::Demo { x, y, wait_secs } => {
            demo(runtime, x, y, Duration::from_secs(wait_secs)).await
        }
    }
}
