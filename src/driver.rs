use crate::error::Result;
use crate::log::{Entry, RequestId};
use crate::persistence::{Persistence, PersistentSnapshot};
use crate::state::{self, Effect, Event, Message, PeerId, State};
use crate::state_machine::StateMachine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Outward actions the driver cannot perform itself (§9 design notes):
/// sending a message and resetting a timer both reach back into the
/// orchestrator, which owns the sockets and timer tasks. Handing the
/// driver a small capability record instead of a reference to the
/// orchestrator avoids a heap cycle between the two.
#[async_trait]
pub trait DriverCallbacks<V>: Send + Sync {
    async fn send_message(&self, node: PeerId, message: Message<V>);
    fn reset_election_timeout(&self);
    fn reset_heartbeat_timeout(&self, node: &PeerId);
}

/// Watched by `syncBeforeRead`: flips `has_committed_this_term` once
/// per leader epoch, the moment the leader commits its first entry in
/// its own term. `epoch` changes on every term/role transition so a
/// stale watcher can tell its epoch ended even if the new one hasn't
/// committed anything yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderCommitStatus {
    pub epoch: u64,
    pub is_leader: bool,
    pub has_committed_this_term: bool,
}

/// Owns the immutable `State`, the persistence handle, and everything
/// needed to turn "commit index advanced" into "state machine called,
/// client waiter resolved" exactly once (§4.5).
pub struct NodeDriver<V> {
    state: State<V>,
    persistence: Arc<dyn Persistence<V>>,
    state_machine: Arc<dyn StateMachine<V>>,
    applied_serial: HashMap<u64, u64>,
    pending_requests: HashMap<(u64, u64), Vec<oneshot::Sender<()>>>,
    leader_commit_tx: watch::Sender<LeaderCommitStatus>,
    epoch: u64,
}

impl<V: Clone + PartialEq + Send + Sync + 'static> NodeDriver<V> {
    pub async fn new(
        self_id: PeerId,
        other_cluster_nodes: Vec<PeerId>,
        persistence: Arc<dyn Persistence<V>>,
        state_machine: Arc<dyn StateMachine<V>>,
    ) -> Result<Self> {
        let snapshot = persistence.read().await?;
        let state = State::from_persisted(
            self_id,
            other_cluster_nodes,
            snapshot.current_term,
            snapshot.voted_for,
            crate::log::Log::from_entries(snapshot.entries),
        );
        let (leader_commit_tx, _) = watch::channel(LeaderCommitStatus {
            epoch: 0,
            is_leader: false,
            has_committed_this_term: false,
        });
        Ok(Self {
            state,
            persistence,
            state_machine,
            applied_serial: HashMap::new(),
            pending_requests: HashMap::new(),
            leader_commit_tx,
            epoch: 0,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    pub fn current_term(&self) -> u64 {
        self.state.current_term()
    }

    pub fn self_id(&self) -> &PeerId {
        self.state.self_id()
    }

    pub fn other_cluster_nodes(&self) -> &[PeerId] {
        self.state.other_cluster_nodes()
    }

    pub fn subscribe_leader_commit_status(&self) -> watch::Receiver<LeaderCommitStatus> {
        self.leader_commit_tx.subscribe()
    }

    /// Registers a one-shot waiter for `id`; the orchestrator's
    /// `addToLog` races this against a timeout. Multiple concurrent
    /// calls for the same `id` (a client retry racing its own first
    /// attempt) all get resolved together when the entry commits.
    pub fn register_pending_waiter(&mut self, id: RequestId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending_requests.entry((id.client_id, id.request_serial)).or_default().push(tx);
        rx
    }

    /// Drops a waiter after `addToLog` times out, so a commit that
    /// lands later resolves nothing but still reaches the state
    /// machine (§5 cancellation policy).
    pub fn forget_pending_waiter(&mut self, id: RequestId) {
        self.pending_requests.remove(&(id.client_id, id.request_serial));
    }

    /// Runs one event through the reducer, executes its effects, and
    /// applies any newly committed entries to the state machine.
    pub async fn dispatch(&mut self, event: Event<V>, callbacks: &dyn DriverCallbacks<V>) -> Result<()> {
        let previous_commit_index = self.state.commit_index();
        let previous_term = self.state.current_term();
        let previous_was_leader = self.state.is_leader();

        let (mut new_state, effects) = state::step(self.state.clone(), event);

        // `AppendNoopEntryToLog` grows the log after the reducer has
        // already run, so whether a persist is owed must be decided
        // before that mutation, but the snapshot itself must be taken
        // after -- otherwise a freshly-elected leader's self-appended
        // noop entry is never durably written (§4.2: persist whenever
        // currentTerm, votedFor, or the log changes in this step).
        let needs_persist = effects
            .iter()
            .any(|e| matches!(e, Effect::PersistLog | Effect::AppendNoopEntryToLog));

        for effect in effects {
            match effect {
                Effect::PersistLog => {}

                Effect::ResetElectionTimeout => callbacks.reset_election_timeout(),

                Effect::AppendNoopEntryToLog => match &mut new_state {
                    State::Leader(leader) => {
                        let entry = Entry::Noop { term: leader.current_term };
                        leader.log = leader.log.append_one(entry);
                    }
                    _ => {
                        return Err(crate::error::RaftError::InvariantViolation(
                            "AppendNoopEntryToLog effect produced outside leader state".into(),
                        ));
                    }
                },

                Effect::SendMessageToNode { node, message } => {
                    if new_state.is_leader() && matches!(message, Message::AppendEntries { .. }) {
                        callbacks.reset_heartbeat_timeout(&node);
                    }
                    callbacks.send_message(node, message).await;
                }
            }
        }

        if needs_persist {
            let snapshot = PersistentSnapshot {
                current_term: new_state.current_term(),
                voted_for: voted_for_of(&new_state),
                entries: new_state.log().get_entries().to_vec(),
            };
            self.persistence.write(&snapshot).await?;
        }

        self.state = new_state;
        self.recompute_leader_commit_index();

        self.apply_newly_committed_entries(previous_commit_index).await;
        self.update_leader_commit_status(previous_term, previous_was_leader);

        Ok(())
    }

    /// The reducer only recomputes `commitIndex` from `followerInfo` on
    /// `appendEntriesResponse` (§4.3/§4.4). A single-node cluster never
    /// receives one, and even a multi-node leader's own log grows (via
    /// `AppendToLog`/`AppendNoopEntryToLog`) without a response round
    /// trip, so the driver re-runs the calculator after every step a
    /// leader's log could have grown -- `compute_commit_index` is pure
    /// and idempotent, so recomputing on every dispatch is harmless.
    fn recompute_leader_commit_index(&mut self) {
        if let State::Leader(leader) = &mut self.state {
            let candidate = crate::commit::compute_commit_index(
                &leader.log,
                &leader.follower_info,
                leader.current_term,
                leader.commit_index,
            );
            if candidate > leader.commit_index {
                leader.commit_index = candidate;
                leader.has_committed_entry_this_term = true;
            }
        }
    }

    async fn apply_newly_committed_entries(&mut self, previous_commit_index: i64) {
        let new_commit_index = self.state.commit_index();
        if new_commit_index <= previous_commit_index {
            return;
        }

        let start = (previous_commit_index + 1) as u64;
        let end = new_commit_index as u64;
        for index in start..=end {
            let entry = match self.state.log().get(index) {
                Some(e) => e.clone(),
                None => continue,
            };

            if let Entry::Value { value, id, .. } = entry {
                let already_applied = self
                    .applied_serial
                    .get(&id.client_id)
                    .map(|serial| *serial >= id.request_serial)
                    .unwrap_or(false);

                if !already_applied {
                    self.state_machine.handle_value(value).await;
                    self.applied_serial.insert(id.client_id, id.request_serial);
                }

                if let Some(waiters) = self.pending_requests.remove(&(id.client_id, id.request_serial)) {
                    for waiter in waiters {
                        let _ = waiter.send(());
                    }
                }
            }
        }
    }

    fn update_leader_commit_status(&mut self, previous_term: u64, previous_was_leader: bool) {
        let now_leader = self.state.is_leader();
        let now_term = self.state.current_term();

        if now_term != previous_term || now_leader != previous_was_leader {
            self.epoch += 1;
            let _ = self.leader_commit_tx.send(LeaderCommitStatus {
                epoch: self.epoch,
                is_leader: now_leader,
                has_committed_this_term: false,
            });
            return;
        }

        if let State::Leader(leader) = &self.state {
            let already_flipped = self.leader_commit_tx.borrow().has_committed_this_term;
            if leader.has_committed_entry_this_term && !already_flipped {
                let _ = self.leader_commit_tx.send(LeaderCommitStatus {
                    epoch: self.epoch,
                    is_leader: true,
                    has_committed_this_term: true,
                });
            }
        }
    }
}

/// Raft's implicit self-vote: a candidate (and the leader it becomes)
/// has voted for itself in its current term even though `CandidateState`
/// and `LeaderState` don't carry a `voted_for` field -- recording this on
/// persist keeps a node that restarts mid-election from voting twice.
fn voted_for_of<V>(state: &State<V>) -> Option<PeerId> {
    match state {
        State::Follower(s) => s.voted_for.clone(),
        State::Candidate(s) => Some(s.self_id.clone()),
        State::Leader(s) => Some(s.self_id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FilePersistence;
    use std::sync::Mutex;

    struct RecordingCallbacks {
        sent: Mutex<Vec<(PeerId, Message<String>)>>,
        election_resets: Mutex<u32>,
    }

    impl RecordingCallbacks {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()), election_resets: Mutex::new(0) }
        }
    }

    #[async_trait]
    impl DriverCallbacks<String> for RecordingCallbacks {
        async fn send_message(&self, node: PeerId, message: Message<String>) {
            self.sent.lock().unwrap().push((node, message));
        }

        fn reset_election_timeout(&self) {
            *self.election_resets.lock().unwrap() += 1;
        }

        fn reset_heartbeat_timeout(&self, _node: &PeerId) {}
    }

    struct RecordingStateMachine {
        applied: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StateMachine<String> for RecordingStateMachine {
        async fn handle_value(&self, value: String) {
            self.applied.lock().unwrap().push(value);
        }
    }

    #[tokio::test]
    async fn single_node_cluster_commits_and_applies_without_peers() {
        let dir = tempfile::tempdir().unwrap();
        let persistence: Arc<dyn Persistence<String>> =
            Arc::new(FilePersistence::new(dir.path().join("state.bin")));
        let state_machine = Arc::new(RecordingStateMachine { applied: Mutex::new(Vec::new()) });
        let mut driver = NodeDriver::new(
            "solo".to_string(),
            vec![],
            persistence,
            state_machine.clone(),
        )
        .await
        .unwrap();

        let callbacks = RecordingCallbacks::new();
        driver.dispatch(Event::ElectionTimeout, &callbacks).await.unwrap();
        assert!(driver.is_leader());

        let id = RequestId { client_id: 1, request_serial: 1 };
        let mut waiter = driver.register_pending_waiter(id);
        driver
            .dispatch(Event::AppendToLog { value: "x<-1".to_string(), id }, &callbacks)
            .await
            .unwrap();

        assert!(waiter.try_recv().is_ok());
        assert_eq!(state_machine.applied.lock().unwrap().as_slice(), ["x<-1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_request_is_applied_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let persistence: Arc<dyn Persistence<String>> =
            Arc::new(FilePersistence::new(dir.path().join("state.bin")));
        let state_machine = Arc::new(RecordingStateMachine { applied: Mutex::new(Vec::new()) });
        let mut driver =
            NodeDriver::new("solo".to_string(), vec![], persistence, state_machine.clone())
                .await
                .unwrap();
        let callbacks = RecordingCallbacks::new();
        driver.dispatch(Event::ElectionTimeout, &callbacks).await.unwrap();

        let id = RequestId { client_id: 7, request_serial: 42 };
        driver
            .dispatch(Event::AppendToLog { value: "same".to_string(), id }, &callbacks)
            .await
            .unwrap();
        // A retried client call appends a second log entry carrying the
        // same request id; the driver must still apply it at most once.
        driver
            .dispatch(Event::AppendToLog { value: "same".to_string(), id }, &callbacks)
            .await
            .unwrap();

        assert_eq!(state_machine.applied.lock().unwrap().len(), 1);
    }
}
