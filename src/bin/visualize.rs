//! Model visualisation server
//!
//! Loads a model file (any of the three `file-id` types), computes a
//! read-only view once, and serves it as JSON over HTTP. Rendering is a
//! client concern; this binary only publishes the data:
//!
//! - `GET /`, `GET /summary`  summary (file type, alphabet size, framing)
//! - `GET /operations`        the operation alphabet
//! - `GET /matrix`            the transition matrix (counts or probabilities)
//! - `GET /ecdf/:which`       `contract` / `key` / `value` / `snapshot` ECDFs
//! - `GET /model`             the raw model JSON as loaded
//!
//! The view is computed before the server starts and never mutated after
//! publication.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, process};

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use statewalk::ecdf::EcdfPoint;
use statewalk::model::{
    self, EventsFile, SimulationFile, StatsFile, FILE_ID_EVENTS, FILE_ID_SIMULATION,
    FILE_ID_STATS,
};

const KNOWN_FLAGS: &[&str] = &["--model", "--port"];

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn check_usage(args: &[String]) -> anyhow::Result<()> {
    for a in &args[1..] {
        if a.starts_with("--") && !KNOWN_FLAGS.contains(&a.as_str()) {
            return Err(anyhow::anyhow!(
                "unrecognised flag `{a}`\nusage: visualize --model <model.json> [--port <port>]"
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Clone)]
struct Summary {
    file_id: String,
    model_path: String,
    loaded_at: String,
    operations: usize,
    framing: Option<FramingSummary>,
    lambdas: Option<LambdaSummary>,
}

#[derive(Debug, Serialize, Clone)]
struct FramingSummary {
    block_length: u64,
    sync_period_length: u64,
    transaction_length: u64,
}

#[derive(Debug, Serialize, Clone)]
struct LambdaSummary {
    contracts: f64,
    keys: f64,
    values: f64,
    snapshots: f64,
}

/// Read-only view published to the handlers.
struct ViewModel {
    summary: Summary,
    operations: Vec<String>,
    matrix: serde_json::Value,
    ecdfs: BTreeMap<&'static str, Vec<EcdfPoint>>,
    raw: serde_json::Value,
}

fn build_view(path: &std::path::Path) -> anyhow::Result<ViewModel> {
    let file_id = model::peek_file_id(path)
        .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let loaded_at = chrono::Utc::now().to_rfc3339();
    let mut ecdfs = BTreeMap::new();

    let view = match file_id.as_str() {
        FILE_ID_EVENTS => {
            let events = EventsFile::read(path)?;
            ecdfs.insert("contract", events.contract_stats.counting.ecdf.clone());
            ecdfs.insert("key", events.key_stats.counting.ecdf.clone());
            ecdfs.insert("value", events.value_stats.counting.ecdf.clone());
            ecdfs.insert("snapshot", events.snapshot_ecdf.clone());
            ViewModel {
                summary: Summary {
                    file_id,
                    model_path: path.display().to_string(),
                    loaded_at,
                    operations: events.operations.len(),
                    framing: None,
                    lambdas: None,
                },
                operations: events.operations.clone(),
                matrix: serde_json::to_value(&events.transition_frequencies)?,
                ecdfs,
                raw,
            }
        }
        FILE_ID_SIMULATION => {
            let sim = SimulationFile::read(path)?;
            ViewModel {
                summary: Summary {
                    file_id,
                    model_path: path.display().to_string(),
                    loaded_at,
                    operations: sim.operations.len(),
                    framing: Some(FramingSummary {
                        block_length: sim.block_length,
                        sync_period_length: sim.sync_period_length,
                        transaction_length: sim.transaction_length,
                    }),
                    lambdas: Some(LambdaSummary {
                        contracts: sim.contract_stats.lambda,
                        keys: sim.key_stats.lambda,
                        values: sim.value_stats.lambda,
                        snapshots: sim.snapshot_lambda,
                    }),
                },
                operations: sim.operations.clone(),
                matrix: serde_json::to_value(&sim.stochastic_matrix)?,
                ecdfs,
                raw,
            }
        }
        FILE_ID_STATS => {
            let stats = StatsFile::read(path)?;
            ecdfs.insert("contract", stats.contract_stats.counting.ecdf.clone());
            ecdfs.insert("key", stats.key_stats.counting.ecdf.clone());
            ecdfs.insert("value", stats.value_stats.counting.ecdf.clone());
            ViewModel {
                summary: Summary {
                    file_id,
                    model_path: path.display().to_string(),
                    loaded_at,
                    operations: 0,
                    framing: None,
                    lambdas: None,
                },
                operations: Vec::new(),
                matrix: serde_json::Value::Null,
                ecdfs,
                raw,
            }
        }
        other => {
            return Err(anyhow::anyhow!("unknown file-id `{other}`"));
        }
    };
    Ok(view)
}

async fn summary(State(view): State<Arc<ViewModel>>) -> Json<Summary> {
    Json(view.summary.clone())
}

async fn operations(State(view): State<Arc<ViewModel>>) -> Json<Vec<String>> {
    Json(view.operations.clone())
}

async fn matrix(State(view): State<Arc<ViewModel>>) -> Json<serde_json::Value> {
    Json(view.matrix.clone())
}

async fn ecdf(
    State(view): State<Arc<ViewModel>>,
    AxumPath(which): AxumPath<String>,
) -> Result<Json<Vec<EcdfPoint>>, (StatusCode, String)> {
    view.ecdfs
        .get(which.as_str())
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!(
                    "no ECDF `{which}` in this model (available: {:?})",
                    view.ecdfs.keys().collect::<Vec<_>>()
                ),
            )
        })
}

async fn raw_model(State(view): State<Arc<ViewModel>>) -> Json<serde_json::Value> {
    Json(view.raw.clone())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

#[tokio::main]
async fn serve(view: Arc<ViewModel>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(summary))
        .route("/summary", get(summary))
        .route("/operations", get(operations))
        .route("/matrix", get(matrix))
        .route("/ecdf/:which", get(ecdf))
        .route("/model", get(raw_model))
        .with_state(view)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("model view listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "visualize=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();
    check_usage(&args)?;

    let model_path = PathBuf::from(
        parse_flag(&args, "--model")
            .ok_or_else(|| anyhow::anyhow!("missing required flag --model"))?,
    );
    let port: u16 = match parse_flag(&args, "--port") {
        Some(s) => s
            .parse()
            .map_err(|_| anyhow::anyhow!("--port must be a port number (got `{s}`)"))?,
        None => 8080,
    };

    let view = Arc::new(build_view(&model_path)?);
    eprintln!(
        "✓ Loaded {} model from {} ({} operations)",
        view.summary.file_id,
        model_path.display(),
        view.summary.operations
    );
    serve(view, SocketAddr::from(([127, 0, 0, 1], port)))
}
