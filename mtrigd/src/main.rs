//! Main entry point for the binary daemon
use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use mtrig::config::{Connection, Settings, Watched};
use mtrig::{metrics::Metrics, shutdown, ChangeEvent, TriggerServer};
use tracing::{info, warn};

/// MongoDB change stream trigger daemon
///
/// Settings are layered: built-in defaults, then the optional config file,
/// then environment variables, then the flags below.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,
    /// Prefix for environment variables
    #[arg(short, long, default_value = "MTRIG")]
    prefix: String,
    /// Listen address of the health and metrics endpoints
    #[arg(long, default_value = "0.0.0.0:3000")]
    http_addr: String,
    /// MongoDB cluster name
    #[arg(long)]
    cluster: Option<String>,
    /// MongoDB account username
    #[arg(long)]
    username: Option<String>,
    /// MongoDB account password
    #[arg(long)]
    password: Option<String>,
    /// MongoDB database name
    #[arg(long)]
    database: Option<String>,
    /// MongoDB collection name
    #[arg(long)]
    collection: Option<String>,
    /// Operation types to trigger on (1:insert, 2:update, 4:delete, summed)
    #[arg(long, allow_negative_numbers = true)]
    trigger: Option<i64>,
    /// Full connection string, replaces cluster, username and password
    #[arg(long)]
    uri: Option<String>,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut builder = config::Config::builder()
        .set_default("cluster", "cluster9.candidate.mongodb.net")?
        .set_default("username", "demo")?
        .set_default("password", "verysecret")?
        .set_default("database", "db1")?
        .set_default("collection", "verysecret")?
        .set_default("trigger", 0_i64)?;

    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::with_name(path));
    }

    let config = builder
        .add_source(config::Environment::default().prefix(&cli.prefix))
        .set_override_option("cluster", cli.cluster.clone())?
        .set_override_option("username", cli.username.clone())?
        .set_override_option("password", cli.password.clone())?
        .set_override_option("database", cli.database.clone())?
        .set_override_option("collection", cli.collection.clone())?
        .set_override_option("trigger", cli.trigger)?
        .set_override_option("uri", cli.uri.clone())?
        .build()?;

    let connection = config.clone().try_deserialize::<Connection>()?;
    let watched = config.clone().try_deserialize::<Watched>()?;
    let trigger = config.get_int("trigger")?;

    Ok(Settings::new(connection, watched, trigger))
}

fn log_event(event: ChangeEvent) {
    let operation = event
        .get_str("operationType")
        .unwrap_or("unknown")
        .to_owned();
    let json: serde_json::Value = bson::Bson::Document(event).into_relaxed_extjson();
    info!(%operation, event = %json, "Document {} event", operation);
}

fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(export_metrics))
        .with_state(metrics)
}

async fn health() -> &'static str {
    "OK"
}

async fn export_metrics(State(metrics): State<Metrics>) -> Result<String, (StatusCode, String)> {
    metrics
        .export()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let settings = load_settings(&cli)?;
    let metrics = Metrics::new();

    let health_api = tokio::spawn({
        let metrics = metrics.clone();
        let http_addr = cli.http_addr.clone();
        async move {
            let listener = tokio::net::TcpListener::bind(&http_addr).await?;
            info!(addr = %http_addr, "Serving /health and /metrics");
            axum::serve(listener, router(metrics)).await
        }
    });

    let (handle, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, stopping watchers");
                handle.trigger();
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });

    let server = TriggerServer::with_metrics(settings, metrics);
    tokio::select! {
        res = server.serve_until(log_event, shutdown) => {
            let reports = res?;
            let failed = reports.iter().filter(|r| r.result.is_err()).count();
            info!(watchers = reports.len(), failed, "Trigger server finished");
        }
        res = health_api => {
            res??;
        }
    }

    Ok(())
}
