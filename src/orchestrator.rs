use crate::driver::{DriverCallbacks, NodeDriver};
use crate::error::Result;
use crate::log::RequestId;
use crate::persistence::{FilePersistence, Persistence};
use crate::state::{Event, Message, PeerId};
use crate::state_machine::StateMachine;
use crate::transport::{TcpTransport, Transport};
use crate::wire::{read_framed, NodeMessage};
use async_trait::async_trait;
use log::{error, info, warn};
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};

/// Tunables from §4.6/§6. `slowdown` scales both timer families
/// uniformly, matching this codebase's existing knob for running
/// clusters at test speed vs. realistic network speed.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub slowdown: f64,
    pub election_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { slowdown: 1.0, election_timeout_ms: 150, heartbeat_timeout_ms: 50 }
    }
}

fn scaled(ms: u64, slowdown: f64) -> Duration {
    Duration::from_millis(((ms as f64) * slowdown) as u64)
}

/// Result of `RaftOrchestrator::add_to_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddToLogOutcome {
    Committed,
    NotLeader,
    TimedOut,
}

/// Result of `RaftOrchestrator::sync_before_read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBeforeReadOutcome {
    pub is_leader: bool,
}

enum Command<V> {
    Dispatch(Event<V>),
    AddToLog { value: V, id: RequestId, respond: oneshot::Sender<AddToLogOutcome> },
    ForgetWaiter { id: RequestId },
}

struct OrchestratorCallbacks<V> {
    self_address: PeerId,
    transport: Arc<dyn Transport<V>>,
    election_reset_tx: mpsc::UnboundedSender<()>,
    heartbeat_reset_txs: HashMap<PeerId, mpsc::UnboundedSender<()>>,
}

#[async_trait]
impl<V: Serialize + Send + Sync> DriverCallbacks<V> for OrchestratorCallbacks<V> {
    async fn send_message(&self, node: PeerId, message: Message<V>) {
        let envelope = NodeMessage { message, response_port: self.self_address.clone() };
        self.transport.send(&node, envelope).await;
    }

    fn reset_election_timeout(&self) {
        let _ = self.election_reset_tx.send(());
    }

    fn reset_heartbeat_timeout(&self, node: &PeerId) {
        if let Some(tx) = self.heartbeat_reset_txs.get(node) {
            let _ = tx.send(());
        }
    }
}

/// The public Raft API (§4.6): owns no state directly. Every public
/// method talks to a single driver task over an `mpsc` channel, which
/// is the one place `State` is mutated -- this is the "dedicated actor
/// thread" form of the concurrency model in its cooperative-task
/// incarnation (§5).
pub struct RaftOrchestrator<V> {
    command_tx: mpsc::Sender<Command<V>>,
    leader_commit_rx: watch::Receiver<crate::driver::LeaderCommitStatus>,
}

impl<V> RaftOrchestrator<V>
where
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn new(
        node_address: PeerId,
        peer_addresses: Vec<PeerId>,
        state_machine: Arc<dyn StateMachine<V>>,
        persistence_path: PathBuf,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let persistence: Arc<dyn Persistence<V>> = Arc::new(FilePersistence::new(persistence_path));
        let driver = NodeDriver::new(
            node_address.clone(),
            peer_addresses.clone(),
            persistence,
            state_machine,
        )
        .await?;
        let leader_commit_rx = driver.subscribe_leader_commit_status();

        let (command_tx, command_rx) = mpsc::channel(256);
        let (election_reset_tx, election_reset_rx) = mpsc::unbounded_channel();

        let mut heartbeat_reset_txs = HashMap::new();
        for peer in &peer_addresses {
            let (tx, rx) = mpsc::unbounded_channel();
            heartbeat_reset_txs.insert(peer.clone(), tx);
            spawn_heartbeat_timer(peer.clone(), rx, command_tx.clone(), config);
        }

        let transport: Arc<dyn Transport<V>> = Arc::new(TcpTransport);
        let callbacks = OrchestratorCallbacks {
            self_address: node_address.clone(),
            transport,
            election_reset_tx,
            heartbeat_reset_txs,
        };

        spawn_election_timer(election_reset_rx, command_tx.clone(), config);
        spawn_listener(node_address, command_tx.clone());
        spawn_driver_task(driver, callbacks, command_rx, command_tx.clone());

        Ok(Self { command_tx, leader_commit_rx })
    }

    /// Injects a client value. Returns once either the entry commits,
    /// ten seconds elapse, or this node was never the leader to begin
    /// with. Safe to retry with the same `id` (§4.5).
    pub async fn add_to_log(&self, value: V, id: RequestId) -> AddToLogOutcome {
        let (respond_tx, respond_rx) = oneshot::channel();
        if self.command_tx.send(Command::AddToLog { value, id, respond: respond_tx }).await.is_err() {
            return AddToLogOutcome::NotLeader;
        }
        respond_rx.await.unwrap_or(AddToLogOutcome::NotLeader)
    }

    /// Resolves once this leadership epoch has committed at least one
    /// entry in its own term, or immediately if not (or no longer) the
    /// leader (§4.5/§4.6).
    pub async fn sync_before_read(&self) -> SyncBeforeReadOutcome {
        let mut rx = self.leader_commit_rx.clone();
        loop {
            let status = *rx.borrow();
            if !status.is_leader {
                return SyncBeforeReadOutcome { is_leader: false };
            }
            if status.has_committed_this_term {
                return SyncBeforeReadOutcome { is_leader: true };
            }
            if rx.changed().await.is_err() {
                return SyncBeforeReadOutcome { is_leader: false };
            }
        }
    }
}

fn spawn_driver_task<V>(
    mut driver: NodeDriver<V>,
    callbacks: OrchestratorCallbacks<V>,
    mut command_rx: mpsc::Receiver<Command<V>>,
    command_self_tx: mpsc::Sender<Command<V>>,
) where
    V: Clone + PartialEq + Send + Sync + Serialize + 'static,
{
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::Dispatch(event) => {
                    if let Err(err) = driver.dispatch(event, &callbacks).await {
                        error!("fatal raft error, stopping node: {err}");
                        std::process::exit(1);
                    }
                }

                Command::AddToLog { value, id, respond } => {
                    if !driver.is_leader() {
                        let _ = respond.send(AddToLogOutcome::NotLeader);
                        continue;
                    }

                    let waiter = driver.register_pending_waiter(id);
                    if let Err(err) =
                        driver.dispatch(Event::AppendToLog { value, id }, &callbacks).await
                    {
                        error!("fatal raft error, stopping node: {err}");
                        std::process::exit(1);
                    }

                    spawn_add_to_log_waiter(waiter, id, respond, command_self_tx.clone());
                }

                Command::ForgetWaiter { id } => driver.forget_pending_waiter(id),
            }
        }
    });
}

const ADD_TO_LOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Races a commit notification against the 10s deadline from §5, then
/// reports the outcome back to the original caller. On timeout, tells
/// the driver to drop the waiter so a later, delayed commit of the
/// same `id` resolves nothing (the entry still reaches the state
/// machine; only the waiter bookkeeping is forgotten).
fn spawn_add_to_log_waiter<V: Send + 'static>(
    waiter: oneshot::Receiver<()>,
    id: RequestId,
    respond: oneshot::Sender<AddToLogOutcome>,
    command_tx: mpsc::Sender<Command<V>>,
) {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(ADD_TO_LOG_TIMEOUT, waiter).await {
            Ok(Ok(())) => AddToLogOutcome::Committed,
            Ok(Err(_)) => AddToLogOutcome::TimedOut,
            Err(_) => {
                let _ = command_tx.send(Command::ForgetWaiter { id }).await;
                AddToLogOutcome::TimedOut
            }
        };
        let _ = respond.send(outcome);
    });
}

fn spawn_election_timer<V>(
    mut reset_rx: mpsc::UnboundedReceiver<()>,
    command_tx: mpsc::Sender<Command<V>>,
    config: OrchestratorConfig,
) where
    V: Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let t = scaled(config.election_timeout_ms, config.slowdown);
            let jittered = Duration::from_millis(
                rand::thread_rng().gen_range(t.as_millis() as u64..=2 * t.as_millis() as u64),
            );
            tokio::select! {
                _ = tokio::time::sleep(jittered) => {
                    if command_tx.send(Command::Dispatch(Event::ElectionTimeout)).await.is_err() {
                        return;
                    }
                }
                got = reset_rx.recv() => {
                    if got.is_none() {
                        return;
                    }
                }
            }
        }
    });
}

fn spawn_heartbeat_timer<V>(
    node: PeerId,
    mut reset_rx: mpsc::UnboundedReceiver<()>,
    command_tx: mpsc::Sender<Command<V>>,
    config: OrchestratorConfig,
) where
    V: Send + 'static,
{
    tokio::spawn(async move {
        let interval = scaled(config.heartbeat_timeout_ms, config.slowdown);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let event = Event::SendHeartbeatMessageTimeout { node: node.clone() };
                    if command_tx.send(Command::Dispatch(event)).await.is_err() {
                        return;
                    }
                }
                got = reset_rx.recv() => {
                    if got.is_none() {
                        return;
                    }
                }
            }
        }
    });
}

fn spawn_listener<V>(node_address: PeerId, command_tx: mpsc::Sender<Command<V>>)
where
    V: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&node_address).await {
            Ok(l) => l,
            Err(err) => {
                error!("failed to bind {node_address}: {err}");
                std::process::exit(1);
            }
        };
        info!("listening on {node_address}");

        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            };
            let command_tx = command_tx.clone();
            tokio::spawn(async move {
                match read_framed::<_, V>(&mut stream).await {
                    Ok(envelope) => {
                        let event = Event::ReceivedMessageFromNode {
                            node: envelope.response_port,
                            message: envelope.message,
                        };
                        let _ = command_tx.send(Command::Dispatch(event)).await;
                    }
                    Err(err) => warn!("dropping malformed inbound message: {err}"),
                }
            });
        }
    });
}
