use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scorekeeper::{cli, web, Db, Engine, GameConfig, ProbeContext};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scorekeeper", about = "Service-availability scoring engine")]
struct Opt {
    /// SQLite database the scores live in.
    #[arg(long, env = "SCOREKEEPER_DB", default_value = "sqlite://scorekeeper.db")]
    database_url: String,

    /// Directory holding per-VM service config files.
    #[arg(long, env = "SCOREKEEPER_CONFIG_DIR", default_value = "gameconfigs")]
    config_dir: PathBuf,

    /// Main game configuration file.
    #[arg(long, env = "SCOREKEEPER_CONFIG", default_value = "gameconfigs/main.yaml")]
    game_config: PathBuf,

    /// Bind address for the read-only JSON API.
    #[arg(long, env = "SCOREKEEPER_BIND", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Directory for log files and the report artifact.
    #[arg(long, env = "SCOREKEEPER_LOGS", default_value = "logs")]
    log_directory: PathBuf,

    /// Seconds between scoring rounds.
    #[arg(long, env = "SCOREKEEPER_REFRESH", default_value_t = 15)]
    refresh_secs: u64,

    /// Maximum probes in flight at once.
    #[arg(long, env = "SCOREKEEPER_PROBE_WIDTH", default_value_t = 16)]
    probe_width: usize,
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("could not create log directory {}", log_dir.display()))?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(
        log_dir,
        "scorekeeper.log",
    ));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let _guard = init_tracing(&opt.log_directory)?;

    let config = GameConfig::load(&opt.config_dir, &opt.game_config)
        .context("configuration rejected")?;

    let db = Db::connect(&opt.database_url).await?;
    db.migrate().await?;

    let ctx = Arc::new(ProbeContext::seeded());
    let engine = Engine::new(
        config,
        db.clone(),
        ctx,
        Duration::from_secs(opt.refresh_secs),
        opt.probe_width,
    );
    engine.init().await.context("expansion failed")?;

    let bind = opt.bind_addr;
    tokio::spawn(async move {
        if let Err(err) = web::serve(db, bind).await {
            error!(error = %err, "read api failed");
        }
    });

    let runner = engine.clone();
    let scheduler = tokio::spawn(async move { runner.run().await });

    cli::run(engine.clone(), opt.log_directory.clone()).await?;

    // Operator left the shell: tear the loop down and wait for it.
    engine.shutdown();
    scheduler.await??;
    Ok(())
}
