use raft_consensus::kv::http::{router, AppState};
use raft_consensus::kv::KvStore;
use raft_consensus::orchestrator::{OrchestratorConfig, RaftOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;

/// Reads `PORT`, `OTHER_PORTS`, `PERSISTENCE_FILE_PATH`, `LOG_LEVEL`
/// once at startup (§6 configuration) and brings up one Raft node plus
/// its key/value HTTP surface. The HTTP surface listens one port above
/// the node's own Raft port.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let port: u16 = std::env::var("PORT")
        .expect("PORT must be set")
        .parse()
        .expect("PORT must be a valid port number");
    let peer_addresses: Vec<String> = std::env::var("OTHER_PORTS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|p| format!("127.0.0.1:{p}"))
        .collect();
    let persistence_path = std::env::var("PERSISTENCE_FILE_PATH")
        .unwrap_or_else(|_| format!("raft_state_{port}.bin"));

    let node_address = format!("127.0.0.1:{port}");
    let http_address = format!("127.0.0.1:{}", port + 1);

    let store = KvStore::new();
    let orchestrator = Arc::new(
        RaftOrchestrator::new(
            node_address.clone(),
            peer_addresses,
            store.clone(),
            PathBuf::from(persistence_path),
            OrchestratorConfig::default(),
        )
        .await?,
    );

    log::info!("raft node listening on {node_address}, http surface on {http_address}");
    let app = router(AppState { orchestrator, store });
    let listener = tokio::net::TcpListener::bind(&http_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
