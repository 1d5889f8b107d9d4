use crate::log::Log;
use crate::state::{FollowerInfo, PeerId};
use std::collections::HashMap;

/// Leader-only pure function (§4.4): given the leader's log and its
/// view of each follower's replication progress, returns the highest
/// index that can be considered committed.
///
/// Never commits an entry from an earlier term purely on replica
/// count (Raft §5.4.2) -- the noop a fresh leader appends on election
/// exists precisely so this function can eventually advance past
/// those earlier-term entries once the noop itself is replicated.
pub fn compute_commit_index<V>(
    log: &Log<V>,
    follower_info: &HashMap<PeerId, FollowerInfo>,
    current_term: u64,
    commit_index: i64,
) -> i64 {
    let mut match_indexes: Vec<i64> =
        follower_info.values().map(|info| info.match_index).collect();
    match_indexes.push(log.len() as i64 - 1);
    match_indexes.sort_unstable();

    let median_position = (match_indexes.len() - 1) / 2;
    let candidate = match_indexes[median_position];

    if candidate == -1 {
        return commit_index;
    }

    match log.get(candidate as u64) {
        Some(entry) if entry.term() == current_term => std::cmp::max(commit_index, candidate),
        _ => commit_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Entry;

    fn term_log(terms: &[u64]) -> Log<String> {
        Log::from_entries(terms.iter().map(|t| Entry::Noop { term: *t }).collect())
    }

    fn info(match_index: i64) -> FollowerInfo {
        FollowerInfo { next_index: (match_index + 1).max(0) as u64, match_index }
    }

    /// S3: leader currentTerm=1, log=[{t:1},{t:1},{t:1}], matchIndex =
    /// {p1:-1, p2:2, p3:1, p4:0} -> commitIndex = 1.
    #[test]
    fn scenario_s3_commit_index_median() {
        let log = term_log(&[1, 1, 1]);
        let mut follower_info = HashMap::new();
        follower_info.insert("p1".to_string(), info(-1));
        follower_info.insert("p2".to_string(), info(2));
        follower_info.insert("p3".to_string(), info(1));
        follower_info.insert("p4".to_string(), info(0));

        let result = compute_commit_index(&log, &follower_info, 1, -1);
        assert_eq!(result, 1);
    }

    /// S4: same shape, but currentTerm=3 and the candidate index's term
    /// does not match -- commitIndex must stay unchanged.
    #[test]
    fn scenario_s4_stale_term_does_not_commit() {
        let log = term_log(&[1, 1, 3]);
        let mut follower_info = HashMap::new();
        follower_info.insert("p1".to_string(), info(-1));
        follower_info.insert("p2".to_string(), info(2));
        follower_info.insert("p3".to_string(), info(1));
        follower_info.insert("p4".to_string(), info(0));

        let result = compute_commit_index(&log, &follower_info, 3, -1);
        assert_eq!(result, -1);
    }

    #[test]
    fn empty_log_never_commits() {
        let log: Log<String> = Log::new();
        let follower_info = HashMap::new();
        let result = compute_commit_index(&log, &follower_info, 0, -1);
        assert_eq!(result, -1);
    }

    #[test]
    fn single_node_cluster_commits_its_own_last_index() {
        let log = term_log(&[1]);
        let follower_info = HashMap::new();
        let result = compute_commit_index(&log, &follower_info, 1, -1);
        assert_eq!(result, 0);
    }

    #[test]
    fn commit_index_never_regresses() {
        let log = term_log(&[1, 1]);
        let mut follower_info = HashMap::new();
        follower_info.insert("p1".to_string(), info(-1));
        // Already committed index 1 previously; a lagging quorum snapshot
        // must not move it backwards.
        let result = compute_commit_index(&log, &follower_info, 1, 1);
        assert_eq!(result, 1);
    }
}
