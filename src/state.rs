use crate::log::{Entry, EntryIdentifier, Log, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Opaque identifier for a cluster member. In this implementation it
/// is the peer's dial address, matching how the rest of this codebase
/// already names servers.
pub type PeerId = String;

/// Node-to-node RPC payloads (§4.3, §6). The sender's identity is
/// carried by the enclosing `Event::ReceivedMessageFromNode { node, .. }`
/// rather than inside the message itself -- the wire envelope (see
/// `wire.rs`) is what resolves a `responsePort` to a `PeerId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message<V> {
    AppendEntries {
        term: u64,
        previous_entry_identifier: Option<EntryIdentifier>,
        entries: Vec<Entry<V>>,
        leader_commit: i64,
    },
    AppendEntriesResponse {
        ok: bool,
        term: u64,
        prev_log_index_from_request: i64,
        number_of_entries_sent_in_request: u64,
    },
    RequestVote {
        term: u64,
        last_log: Option<EntryIdentifier>,
    },
    RequestVoteResponse {
        term: u64,
        vote_granted: bool,
    },
}

impl<V> Message<V> {
    fn term(&self) -> u64 {
        match self {
            Message::AppendEntries { term, .. } => *term,
            Message::AppendEntriesResponse { term, .. } => *term,
            Message::RequestVote { term, .. } => *term,
            Message::RequestVoteResponse { term, .. } => *term,
        }
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone)]
pub enum Event<V> {
    ElectionTimeout,
    SendHeartbeatMessageTimeout { node: PeerId },
    ReceivedMessageFromNode { node: PeerId, message: Message<V> },
    AppendToLog { value: V, id: RequestId },
}

/// Outputs of the reducer, executed by the driver.
#[derive(Debug, Clone)]
pub enum Effect<V> {
    SendMessageToNode { node: PeerId, message: Message<V> },
    ResetElectionTimeout,
    AppendNoopEntryToLog,
    PersistLog,
}

/// Leader's per-peer replication progress.
#[derive(Debug, Clone, Copy)]
pub struct FollowerInfo {
    pub next_index: u64,
    pub match_index: i64,
}

#[derive(Debug, Clone)]
pub struct FollowerState<V> {
    pub self_id: PeerId,
    pub current_term: u64,
    pub voted_for: Option<PeerId>,
    pub log: Log<V>,
    pub commit_index: i64,
    pub other_cluster_nodes: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct CandidateState<V> {
    pub self_id: PeerId,
    pub current_term: u64,
    pub log: Log<V>,
    pub commit_index: i64,
    pub other_cluster_nodes: Vec<PeerId>,
    pub votes_received: HashSet<PeerId>,
}

#[derive(Debug, Clone)]
pub struct LeaderState<V> {
    pub self_id: PeerId,
    pub current_term: u64,
    pub log: Log<V>,
    pub commit_index: i64,
    pub other_cluster_nodes: Vec<PeerId>,
    pub follower_info: HashMap<PeerId, FollowerInfo>,
    pub has_committed_entry_this_term: bool,
}

#[derive(Debug, Clone)]
pub enum State<V> {
    Follower(FollowerState<V>),
    Candidate(CandidateState<V>),
    Leader(LeaderState<V>),
}

impl<V: Clone + PartialEq> State<V> {
    pub fn new_follower(self_id: PeerId, other_cluster_nodes: Vec<PeerId>) -> Self {
        State::Follower(FollowerState {
            self_id,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: -1,
            other_cluster_nodes,
        })
    }

    /// Reconstruct volatile startup state from a persisted snapshot.
    /// Recovered state after restart is always `Follower` (§3).
    pub fn from_persisted(
        self_id: PeerId,
        other_cluster_nodes: Vec<PeerId>,
        current_term: u64,
        voted_for: Option<PeerId>,
        log: Log<V>,
    ) -> Self {
        State::Follower(FollowerState {
            self_id,
            current_term,
            voted_for,
            log,
            commit_index: -1,
            other_cluster_nodes,
        })
    }

    pub fn current_term(&self) -> u64 {
        match self {
            State::Follower(s) => s.current_term,
            State::Candidate(s) => s.current_term,
            State::Leader(s) => s.current_term,
        }
    }

    pub fn commit_index(&self) -> i64 {
        match self {
            State::Follower(s) => s.commit_index,
            State::Candidate(s) => s.commit_index,
            State::Leader(s) => s.commit_index,
        }
    }

    pub fn log(&self) -> &Log<V> {
        match self {
            State::Follower(s) => &s.log,
            State::Candidate(s) => &s.log,
            State::Leader(s) => &s.log,
        }
    }

    pub fn self_id(&self) -> &PeerId {
        match self {
            State::Follower(s) => &s.self_id,
            State::Candidate(s) => &s.self_id,
            State::Leader(s) => &s.self_id,
        }
    }

    pub fn other_cluster_nodes(&self) -> &[PeerId] {
        match self {
            State::Follower(s) => &s.other_cluster_nodes,
            State::Candidate(s) => &s.other_cluster_nodes,
            State::Leader(s) => &s.other_cluster_nodes,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, State::Leader(_))
    }
}

fn majority_of(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Starts (or restarts) a campaign for `new_term`. A lone node already
/// forms a majority of one with just its own implicit vote, so it wins
/// outright instead of broadcasting a `requestVote` nobody is there to
/// answer (§8 boundary case: "single-node cluster ... leader immediately
/// advances commit").
fn start_election<V: Clone + PartialEq>(
    self_id: PeerId,
    new_term: u64,
    log: Log<V>,
    commit_index: i64,
    other_cluster_nodes: Vec<PeerId>,
) -> (State<V>, Vec<Effect<V>>) {
    let cluster_size = other_cluster_nodes.len() + 1;
    if 1 >= majority_of(cluster_size) {
        return win_election(self_id, new_term, log, commit_index, other_cluster_nodes);
    }

    let candidate = CandidateState {
        self_id,
        current_term: new_term,
        log,
        commit_index,
        other_cluster_nodes,
        votes_received: HashSet::new(),
    };
    let last_log = candidate.log.last_entry_identifier();
    let mut effects: Vec<Effect<V>> = candidate
        .other_cluster_nodes
        .iter()
        .map(|node| Effect::SendMessageToNode {
            node: node.clone(),
            message: Message::RequestVote { term: new_term, last_log },
        })
        .collect();
    effects.push(Effect::ResetElectionTimeout);
    (State::Candidate(candidate), effects)
}

/// Transitions straight to `Leader` once a majority of votes (including
/// the implicit self-vote) is in hand -- shared by the ordinary
/// vote-counting path and by a lone node winning its own election
/// instantly.
fn win_election<V: Clone + PartialEq>(
    self_id: PeerId,
    current_term: u64,
    log: Log<V>,
    commit_index: i64,
    other_cluster_nodes: Vec<PeerId>,
) -> (State<V>, Vec<Effect<V>>) {
    let next_index = log.len();
    let mut follower_info = HashMap::new();
    let mut effects = Vec::new();
    for peer in &other_cluster_nodes {
        follower_info.insert(peer.clone(), FollowerInfo { next_index, match_index: -1 });
        effects.push(Effect::SendMessageToNode {
            node: peer.clone(),
            message: Message::AppendEntries {
                term: current_term,
                previous_entry_identifier: log.last_entry_identifier(),
                entries: vec![],
                leader_commit: commit_index,
            },
        });
    }
    effects.push(Effect::AppendNoopEntryToLog);

    let leader = LeaderState {
        self_id,
        current_term,
        log,
        commit_index,
        other_cluster_nodes,
        follower_info,
        has_committed_entry_this_term: false,
    };
    (State::Leader(leader), effects)
}

/// Raft §5.4.1: candidate's log must be at least as up to date as ours.
/// Higher term wins; equal term means higher index wins; `None` is the
/// minimum possible log.
fn is_at_least_as_up_to_date(candidate_last_log: Option<EntryIdentifier>, our_last_log: Option<EntryIdentifier>) -> bool {
    match (candidate_last_log, our_last_log) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(_), None) => true,
        (Some(c), Some(o)) => c.term > o.term || (c.term == o.term && c.index >= o.index),
    }
}

fn become_follower<V: Clone + PartialEq>(
    self_id: PeerId,
    other_cluster_nodes: Vec<PeerId>,
    current_term: u64,
    log: Log<V>,
    commit_index: i64,
) -> FollowerState<V> {
    FollowerState {
        self_id,
        current_term,
        voted_for: None,
        log,
        commit_index,
        other_cluster_nodes,
    }
}

/// Universal pre-processing (§4.3): if an inbound message carries a
/// higher term than ours, step down to `Follower` before any
/// state-tag-specific handling runs. Returns whether the term changed
/// (and therefore whether a persist is owed even if nothing else does).
fn apply_universal_preprocessing<V: Clone + PartialEq>(
    state: State<V>,
    event: &Event<V>,
) -> (State<V>, bool) {
    let incoming_term = match event {
        Event::ReceivedMessageFromNode { message, .. } => Some(message.term()),
        _ => None,
    };

    let incoming_term = match incoming_term {
        Some(t) => t,
        None => return (state, false),
    };

    if incoming_term <= state.current_term() {
        return (state, false);
    }

    let (self_id, other_cluster_nodes, log, commit_index) = match &state {
        State::Follower(s) => {
            (s.self_id.clone(), s.other_cluster_nodes.clone(), s.log.clone(), s.commit_index)
        }
        State::Candidate(s) => {
            (s.self_id.clone(), s.other_cluster_nodes.clone(), s.log.clone(), s.commit_index)
        }
        State::Leader(s) => {
            (s.self_id.clone(), s.other_cluster_nodes.clone(), s.log.clone(), s.commit_index)
        }
    };

    let follower = become_follower(self_id, other_cluster_nodes, incoming_term, log, commit_index);
    (State::Follower(follower), true)
}

/// Runs one step of the reducer: `(Event, State) -> (State, Vec<Effect>)`.
pub fn step<V: Clone + PartialEq>(state: State<V>, event: Event<V>) -> (State<V>, Vec<Effect<V>>) {
    let (state, term_changed_in_preprocessing) = apply_universal_preprocessing(state, &event);

    let (new_state, mut effects, persist_needed) = match state {
        State::Follower(s) => follower_step(s, event),
        State::Candidate(s) => candidate_step(s, event),
        State::Leader(s) => leader_step(s, event),
    };

    if (term_changed_in_preprocessing || persist_needed)
        && !effects.iter().any(|e| matches!(e, Effect::PersistLog))
    {
        effects.push(Effect::PersistLog);
    }

    (new_state, effects)
}

fn follower_step<V: Clone + PartialEq>(
    state: FollowerState<V>,
    event: Event<V>,
) -> (State<V>, Vec<Effect<V>>, bool) {
    match event {
        Event::ElectionTimeout => {
            let new_term = state.current_term + 1;
            let (new_state, effects) = start_election(
                state.self_id,
                new_term,
                state.log,
                state.commit_index,
                state.other_cluster_nodes,
            );
            (new_state, effects, true)
        }

        Event::SendHeartbeatMessageTimeout { .. } => {
            // A follower never schedules heartbeat timers for peers; if one
            // somehow fires it is a stale timer from a previous leader epoch.
            (State::Follower(state), vec![], false)
        }

        Event::ReceivedMessageFromNode { node, message } => match message {
            Message::AppendEntries { term, previous_entry_identifier, entries, leader_commit } => {
                if term < state.current_term {
                    let response = Message::AppendEntriesResponse {
                        ok: false,
                        term: state.current_term,
                        prev_log_index_from_request: previous_entry_identifier
                            .map(|p| p.index as i64)
                            .unwrap_or(-1),
                        number_of_entries_sent_in_request: entries.len() as u64,
                    };
                    let effects = vec![Effect::SendMessageToNode { node, message: response }];
                    return (State::Follower(state), effects, false);
                }

                let append = state.log.append_entries(previous_entry_identifier, &entries);
                let prev_log_index_from_request =
                    previous_entry_identifier.map(|p| p.index as i64).unwrap_or(-1);
                let response = Message::AppendEntriesResponse {
                    ok: append.ok,
                    term: state.current_term,
                    prev_log_index_from_request,
                    number_of_entries_sent_in_request: entries.len() as u64,
                };

                let mut effects = vec![
                    Effect::SendMessageToNode { node, message: response },
                    Effect::ResetElectionTimeout,
                ];

                let (new_log, new_commit_index, log_changed) = if append.ok {
                    let new_commit_index = if leader_commit > state.commit_index {
                        std::cmp::min(leader_commit, append.new_log.len() as i64 - 1)
                    } else {
                        state.commit_index
                    };
                    let changed = append.new_log != state.log;
                    (append.new_log, new_commit_index, changed)
                } else {
                    (state.log.clone(), state.commit_index, false)
                };

                if log_changed {
                    effects.push(Effect::PersistLog);
                }

                (
                    State::Follower(FollowerState {
                        log: new_log,
                        commit_index: new_commit_index,
                        ..state
                    }),
                    effects,
                    false,
                )
            }

            Message::RequestVote { term, last_log } => {
                if term < state.current_term {
                    let response = Message::RequestVoteResponse {
                        term: state.current_term,
                        vote_granted: false,
                    };
                    return (
                        State::Follower(state),
                        vec![Effect::SendMessageToNode { node, message: response }],
                        false,
                    );
                }

                let may_vote = match &state.voted_for {
                    None => true,
                    Some(existing) => existing == &node,
                };
                let up_to_date = is_at_least_as_up_to_date(last_log, state.log.last_entry_identifier());
                let vote_granted = may_vote && up_to_date;

                let response = Message::RequestVoteResponse { term: state.current_term, vote_granted };
                let mut effects = vec![Effect::SendMessageToNode { node: node.clone(), message: response }];

                if vote_granted {
                    effects.push(Effect::ResetElectionTimeout);
                    (
                        State::Follower(FollowerState { voted_for: Some(node), ..state }),
                        effects,
                        true,
                    )
                } else {
                    (State::Follower(state), effects, false)
                }
            }

            // Stale replies from a leadership epoch we've already left; ignore.
            Message::AppendEntriesResponse { .. } | Message::RequestVoteResponse { .. } => {
                (State::Follower(state), vec![], false)
            }
        },

        Event::AppendToLog { .. } => {
            // The driver only injects client appends on the leader; a
            // follower receiving one indicates a caller bug upstream of
            // the reducer. Drop it rather than crash the cluster.
            (State::Follower(state), vec![], false)
        }
    }
}

fn candidate_step<V: Clone + PartialEq>(
    state: CandidateState<V>,
    event: Event<V>,
) -> (State<V>, Vec<Effect<V>>, bool) {
    match event {
        Event::ElectionTimeout => {
            let new_term = state.current_term + 1;
            let (new_state, effects) = start_election(
                state.self_id,
                new_term,
                state.log,
                state.commit_index,
                state.other_cluster_nodes,
            );
            (new_state, effects, true)
        }

        Event::SendHeartbeatMessageTimeout { .. } => (State::Candidate(state), vec![], false),

        Event::ReceivedMessageFromNode { node, message } => {
            if matches!(&message, Message::AppendEntries { .. }) && message.term() >= state.current_term {
                // A current-term (or newly higher-term, already handled by
                // universal preprocessing) leader is asserting itself; step
                // down and re-dispatch the same event as a follower. A
                // lower-term AppendEntries is stale and handled below
                // without abandoning the candidacy.
                let follower = become_follower(
                    state.self_id,
                    state.other_cluster_nodes,
                    state.current_term,
                    state.log,
                    state.commit_index,
                );
                let (new_state, effects, persist) = follower_step(
                    follower,
                    Event::ReceivedMessageFromNode { node, message },
                );
                return (new_state, effects, persist);
            }

            match message {
            Message::AppendEntries { term, previous_entry_identifier, entries, .. } => {
                // Stale term: reject in place, same as a follower would,
                // without giving up our own candidacy.
                debug_assert!(term < state.current_term);
                let response = Message::AppendEntriesResponse {
                    ok: false,
                    term: state.current_term,
                    prev_log_index_from_request: previous_entry_identifier
                        .map(|p| p.index as i64)
                        .unwrap_or(-1),
                    number_of_entries_sent_in_request: entries.len() as u64,
                };
                (
                    State::Candidate(state),
                    vec![Effect::SendMessageToNode { node, message: response }],
                    false,
                )
            }

            Message::RequestVote { last_log, .. } => {
                // We've implicitly voted for ourselves this term; reject
                // anyone else's candidacy in the same term.
                let _ = last_log;
                let vote_granted = false;
                let response = Message::RequestVoteResponse { term: state.current_term, vote_granted };
                (
                    State::Candidate(state),
                    vec![Effect::SendMessageToNode { node, message: response }],
                    false,
                )
            }

            Message::RequestVoteResponse { term, vote_granted } => {
                if term != state.current_term || !vote_granted {
                    return (State::Candidate(state), vec![], false);
                }

                let mut votes_received = state.votes_received.clone();
                votes_received.insert(node);
                let cluster_size = state.other_cluster_nodes.len() + 1;
                let have_majority = votes_received.len() + 1 >= majority_of(cluster_size);

                if !have_majority {
                    return (
                        State::Candidate(CandidateState { votes_received, ..state }),
                        vec![],
                        false,
                    );
                }

                let (new_state, effects) = win_election(
                    state.self_id,
                    state.current_term,
                    state.log,
                    state.commit_index,
                    state.other_cluster_nodes,
                );
                (new_state, effects, false)
            }

            Message::AppendEntriesResponse { .. } => (State::Candidate(state), vec![], false),
            }
        }

        Event::AppendToLog { .. } => (State::Candidate(state), vec![], false),
    }
}

fn leader_step<V: Clone + PartialEq>(
    state: LeaderState<V>,
    event: Event<V>,
) -> (State<V>, Vec<Effect<V>>, bool) {
    match event {
        Event::ElectionTimeout => {
            panic!("raft invariant violated: election timeout fired while leader");
        }

        Event::SendHeartbeatMessageTimeout { node } => {
            let info = *state
                .follower_info
                .get(&node)
                .unwrap_or_else(|| panic!("raft invariant violated: heartbeat timer for unknown peer {node}"));

            let previous_entry_identifier = if info.next_index == 0 {
                None
            } else {
                state.log.get(info.next_index - 1).map(|e| EntryIdentifier {
                    index: info.next_index - 1,
                    term: e.term(),
                })
            };
            let entries = state.log.get_entries()[info.next_index as usize..].to_vec();
            let message = Message::AppendEntries {
                term: state.current_term,
                previous_entry_identifier,
                entries,
                leader_commit: state.commit_index,
            };
            (
                State::Leader(state),
                vec![Effect::SendMessageToNode { node, message }],
                false,
            )
        }

        Event::ReceivedMessageFromNode { node, message } => match message {
            Message::RequestVote { term, .. } => {
                let response = Message::RequestVoteResponse { term, vote_granted: false };
                (
                    State::Leader(state),
                    vec![Effect::SendMessageToNode { node, message: response }],
                    false,
                )
            }

            Message::AppendEntriesResponse {
                ok,
                prev_log_index_from_request,
                number_of_entries_sent_in_request,
                ..
            } => {
                if ok {
                    let mut follower_info = state.follower_info.clone();
                    let entry = follower_info.entry(node.clone()).or_insert(FollowerInfo {
                        next_index: 0,
                        match_index: -1,
                    });
                    let replicated_through =
                        prev_log_index_from_request + number_of_entries_sent_in_request as i64;
                    entry.match_index = std::cmp::max(entry.match_index, replicated_through);
                    entry.next_index = (entry.match_index + 1) as u64;

                    let new_commit_index = crate::commit::compute_commit_index(
                        &state.log,
                        &follower_info,
                        state.current_term,
                        state.commit_index,
                    );
                    let has_committed_entry_this_term = state.has_committed_entry_this_term
                        || (new_commit_index > state.commit_index
                            && state
                                .log
                                .get(new_commit_index as u64)
                                .map(|e| e.term() == state.current_term)
                                .unwrap_or(false));

                    (
                        State::Leader(LeaderState {
                            follower_info,
                            commit_index: new_commit_index,
                            has_committed_entry_this_term,
                            ..state
                        }),
                        vec![],
                        false,
                    )
                } else {
                    let mut follower_info = state.follower_info.clone();
                    let new_next_index = std::cmp::max(0, prev_log_index_from_request) as u64;
                    let entry = follower_info
                        .entry(node.clone())
                        .or_insert(FollowerInfo { next_index: 0, match_index: -1 });
                    entry.next_index = new_next_index;

                    let previous_entry_identifier = if new_next_index == 0 {
                        None
                    } else {
                        state.log.get(new_next_index - 1).map(|e| EntryIdentifier {
                            index: new_next_index - 1,
                            term: e.term(),
                        })
                    };
                    let entries = state.log.get_entries()[new_next_index as usize..].to_vec();
                    let retry = Message::AppendEntries {
                        term: state.current_term,
                        previous_entry_identifier,
                        entries,
                        leader_commit: state.commit_index,
                    };

                    (
                        State::Leader(LeaderState { follower_info, ..state }),
                        vec![Effect::SendMessageToNode { node, message: retry }],
                        false,
                    )
                }
            }

            // A stray vote response or another leader's heartbeat at our own
            // term/an older term; already filtered by universal preprocessing
            // for higher terms, so this is a no-op here.
            Message::RequestVoteResponse { .. } | Message::AppendEntries { .. } => {
                (State::Leader(state), vec![], false)
            }
        },

        Event::AppendToLog { value, id } => {
            let entry = Entry::Value { term: state.current_term, value, id };
            let log = state.log.append_one(entry);
            (State::Leader(LeaderState { log, ..state }), vec![Effect::PersistLog], false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::RequestId;

    fn three_node_follower(self_id: &str) -> FollowerState<String> {
        let others: Vec<PeerId> =
            ["a", "b", "c"].iter().filter(|n| **n != self_id).map(|s| s.to_string()).collect();
        FollowerState {
            self_id: self_id.to_string(),
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: -1,
            other_cluster_nodes: others,
        }
    }

    #[test]
    fn election_timeout_becomes_candidate_and_broadcasts_request_vote() {
        let (new_state, effects) = step(
            State::Follower(three_node_follower("a")),
            Event::ElectionTimeout,
        );
        match new_state {
            State::Candidate(c) => {
                assert_eq!(c.current_term, 1);
                assert!(c.votes_received.is_empty());
            }
            _ => panic!("expected candidate"),
        }
        let vote_requests = effects
            .iter()
            .filter(|e| matches!(e, Effect::SendMessageToNode { message: Message::RequestVote { .. }, .. }))
            .count();
        assert_eq!(vote_requests, 2);
        assert!(effects.iter().any(|e| matches!(e, Effect::ResetElectionTimeout)));
        assert!(effects.iter().any(|e| matches!(e, Effect::PersistLog)));
    }

    #[test]
    fn candidate_becomes_leader_on_majority_and_appends_noop() {
        let (candidate_state, _) =
            step(State::Follower(three_node_follower("a")), Event::ElectionTimeout);

        let (state_after_one_vote, _) = step(
            candidate_state,
            Event::ReceivedMessageFromNode {
                node: "b".to_string(),
                message: Message::RequestVoteResponse { term: 1, vote_granted: true },
            },
        );

        match state_after_one_vote {
            State::Leader(l) => {
                assert_eq!(l.current_term, 1);
                assert_eq!(l.follower_info.len(), 2);
            }
            other => panic!("expected leader after reaching majority, got {other:?}"),
        }
    }

    #[test]
    fn single_node_cluster_becomes_leader_on_election_timeout() {
        let follower = FollowerState {
            self_id: "solo".to_string(),
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: -1,
            other_cluster_nodes: vec![],
        };
        let (new_state, effects) = step(State::Follower(follower), Event::ElectionTimeout);
        // A lone node already satisfies majority_of(1) == 1 via its own
        // implicit vote, with no peers to send a requestVote to -- it must
        // become leader on the very election timeout that starts its term,
        // not merely candidate.
        match new_state {
            State::Leader(l) => {
                assert_eq!(l.current_term, 1);
                assert!(l.follower_info.is_empty());
            }
            other => panic!("expected leader, got {other:?}"),
        }
        assert!(effects.iter().any(|e| matches!(e, Effect::AppendNoopEntryToLog)));
        assert!(effects.iter().any(|e| matches!(e, Effect::PersistLog)));
    }

    #[test]
    fn follower_grants_vote_for_up_to_date_candidate() {
        let follower = three_node_follower("a");
        let (new_state, effects) = step(
            State::Follower(follower),
            Event::ReceivedMessageFromNode {
                node: "b".to_string(),
                message: Message::RequestVote { term: 1, last_log: None },
            },
        );
        match new_state {
            State::Follower(f) => assert_eq!(f.voted_for, Some("b".to_string())),
            _ => panic!("expected follower"),
        }
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SendMessageToNode { message: Message::RequestVoteResponse { vote_granted: true, .. }, .. }
        )));
    }

    #[test]
    fn follower_denies_second_vote_in_same_term() {
        let mut follower = three_node_follower("a");
        follower.current_term = 1;
        follower.voted_for = Some("b".to_string());
        let (_, effects) = step(
            State::Follower(follower),
            Event::ReceivedMessageFromNode {
                node: "c".to_string(),
                message: Message::RequestVote { term: 1, last_log: None },
            },
        );
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SendMessageToNode { message: Message::RequestVoteResponse { vote_granted: false, .. }, .. }
        )));
    }

    #[test]
    fn follower_denies_vote_for_stale_candidate_log() {
        let mut follower = three_node_follower("a");
        follower.log = Log::from_entries(vec![Entry::Value {
            term: 1,
            value: "x".to_string(),
            id: RequestId { client_id: 1, request_serial: 1 },
        }]);
        follower.current_term = 1;
        let (_, effects) = step(
            State::Follower(follower),
            Event::ReceivedMessageFromNode {
                node: "b".to_string(),
                message: Message::RequestVote { term: 1, last_log: None },
            },
        );
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SendMessageToNode { message: Message::RequestVoteResponse { vote_granted: false, .. }, .. }
        )));
    }

    #[test]
    fn higher_term_message_demotes_leader_to_follower() {
        let leader = LeaderState {
            self_id: "a".to_string(),
            current_term: 1,
            log: Log::new(),
            commit_index: -1,
            other_cluster_nodes: vec!["b".to_string(), "c".to_string()],
            follower_info: HashMap::new(),
            has_committed_entry_this_term: false,
        };
        let (new_state, effects) = step(
            State::Leader(leader),
            Event::ReceivedMessageFromNode {
                node: "b".to_string(),
                message: Message::AppendEntriesResponse {
                    ok: false,
                    term: 5,
                    prev_log_index_from_request: -1,
                    number_of_entries_sent_in_request: 0,
                },
            },
        );
        match new_state {
            State::Follower(f) => {
                assert_eq!(f.current_term, 5);
                assert!(f.voted_for.is_none());
            }
            _ => panic!("expected follower after observing higher term"),
        }
        assert!(effects.iter().any(|e| matches!(e, Effect::PersistLog)));
    }

    #[test]
    fn leader_election_timeout_is_fatal() {
        let leader = LeaderState {
            self_id: "a".to_string(),
            current_term: 1,
            log: Log::new(),
            commit_index: -1,
            other_cluster_nodes: vec![],
            follower_info: HashMap::new(),
            has_committed_entry_this_term: false,
        };
        let result = std::panic::catch_unwind(|| step(State::Leader(leader), Event::ElectionTimeout));
        assert!(result.is_err());
    }
}
