use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use onefuzz_runtime::store::Store;
use onefuzz_runtime::{Config, WorkerBuilder};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

mod error;
mod routes;
mod secret;
mod state;
mod webhook;

use secret::EnvSecretResolver;
use state::AppState;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,

    #[arg(long, env = "ONEFUZZ_INSTANCE_ID")]
    instance_id: Option<uuid::Uuid>,

    #[arg(long, env = "ONEFUZZ_INSTANCE_NAME", default_value = "onefuzz")]
    instance_name: String,

    /// Automatically migrate the database during worker startup if the database
    /// version does not match the expected version.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_filter(tracing_subscriber::EnvFilter::from_default_env()),
        )
        .init();

    let args = Args::parse();

    let options = sqlx::postgres::PgConnectOptions::from_str(&args.database_url)
        .context("failed to parse database url")?
        .application_name("onefuzz-server");
    let pool = sqlx::pool::PoolOptions::new()
        .acquire_timeout(Duration::from_secs(60))
        .max_connections(50)
        .connect_with(options)
        .await
        .context("failed to connect to the database")?;

    let config = Config {
        instance_id: args.instance_id.unwrap_or_else(uuid::Uuid::nil),
        instance_name: args.instance_name,
        ..Config::default()
    };

    let mut worker = WorkerBuilder::new(pool.clone())
        .config(config.clone())
        .migrate(args.migrate)
        .build()
        .await
        .context("failed to start the worker")?;

    let handle = Arc::new(worker.handle());
    let store = Store::new(pool);
    let config = Arc::new(config);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build the http client")?;
    let secrets = Arc::new(EnvSecretResolver);

    tokio::spawn(webhook::run(handle.clone(), store.clone(), config.clone(), http.clone(), secrets.clone()));

    let app_state = AppState {
        store,
        config,
        http,
        secrets,
        worker: handle.clone(),
    };

    let router = routes::router().with_state(app_state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&args.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_addr))?;

    tracing::info!(addr = %args.bind_addr, "onefuzz-server starting up");

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(handle.clone()));
    let worker_run = worker.run();

    let (serve_result, worker_result) = tokio::join!(serve, worker_run);
    serve_result.context("http server exited with an error")?;
    worker_result.context("worker exited with an error")?;

    Ok(())
}

async fn shutdown_signal(handle: Arc<onefuzz_runtime::WorkerHandle>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => (),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("got signal, shutting down");
    handle.shutdown();
}
