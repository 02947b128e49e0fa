//! # FlowMesh Node Runtime
//!
//! The main entry point for a FlowMesh node: a peer in the serverless
//! automation mesh that ingests triggers, validates them through the
//! layered pipeline, and schedules flow steps across the worker pool.
//!
//! ## Subsystems
//!
//! 1. Validation Cache
//! 2. Validation Pipeline
//! 3. Admission Controller
//! 4. Flow Model
//! 5. Execution Scheduler
//! 6. Checkpoint & Recovery
//! 7. Node/Tenant Registry

use anyhow::Result;
use fm_02_validation_pipeline::StaticKeyProvider;
use node_runtime::{local_collaborators, FlowMeshRuntime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("flowmesh.json"));
    let config = if config_path.exists() {
        info!(path = %config_path.display(), "Loading configuration");
        RuntimeConfig::from_file(&config_path)?
    } else {
        info!("No configuration file; using defaults");
        RuntimeConfig::default()
    };

    info!("===========================================");
    info!("FlowMesh Node");
    info!("===========================================");

    let runtime = FlowMeshRuntime::init(
        config,
        local_collaborators(Arc::new(StaticKeyProvider::new())),
    );

    info!("Node ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown();
    Ok(())
}
