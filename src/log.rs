use serde::{Deserialize, Serialize};

/// Identifies a client request for deduplication: `requestSerial` is
/// monotonically increasing per `clientId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId {
    pub client_id: u64,
    pub request_serial: u64,
}

/// Identifies a slot in the log by position and term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryIdentifier {
    pub index: u64,
    pub term: u64,
}

/// A single slot in the replicated log. `V` is an opaque application
/// payload the core never inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry<V> {
    Value { term: u64, value: V, id: RequestId },
    Noop { term: u64 },
}

impl<V> Entry<V> {
    pub fn term(&self) -> u64 {
        match self {
            Entry::Value { term, .. } => *term,
            Entry::Noop { term } => *term,
        }
    }
}

/// Ordered, 0-indexed, append-mostly sequence of entries.
///
/// `append_entries` is purely functional: it never mutates `self`, it
/// returns a new log. This mirrors the persistent-data-structure style
/// the reducer relies on -- the driver swaps its handle to the log
/// rather than mutating one in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Log<V> {
    entries: Vec<Entry<V>>,
}

/// Outcome of `Log::append_entries`.
pub struct AppendResult<V> {
    pub ok: bool,
    pub new_log: Log<V>,
}

impl<V: Clone + PartialEq> Log<V> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn from_entries(entries: Vec<Entry<V>>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only view of the entries in index order.
    pub fn get_entries(&self) -> &[Entry<V>] {
        &self.entries
    }

    pub fn get(&self, index: u64) -> Option<&Entry<V>> {
        self.entries.get(index as usize)
    }

    pub fn last_entry_identifier(&self) -> Option<EntryIdentifier> {
        if self.entries.is_empty() {
            None
        } else {
            let index = self.entries.len() as u64 - 1;
            Some(EntryIdentifier { index, term: self.entries[index as usize].term() })
        }
    }

    /// Append a single entry, returning the new log. Used by the
    /// leader when it accepts a client value or a self-issued noop.
    pub fn append_one(&self, entry: Entry<V>) -> Log<V> {
        let mut entries = self.entries.clone();
        entries.push(entry);
        Log { entries }
    }

    /// Raft's append/truncate rule (§4.1).
    ///
    /// Returns `ok = false` without copying when `previous_entry_identifier`
    /// names a slot this log doesn't have (or has under a different
    /// term). Otherwise truncates any conflicting suffix and appends
    /// the new entries. When the existing suffix already matches
    /// `entries` exactly, returns the receiver unchanged so that
    /// duplicated or late-delivered requests are idempotent.
    pub fn append_entries(
        &self,
        previous_entry_identifier: Option<EntryIdentifier>,
        entries: &[Entry<V>],
    ) -> AppendResult<V> {
        let attach_index = match previous_entry_identifier {
            None => 0u64,
            Some(prev) => match self.entries.get(prev.index as usize) {
                Some(existing) if existing.term() == prev.term => prev.index + 1,
                _ => {
                    return AppendResult { ok: false, new_log: self.clone() };
                }
            },
        };

        let suffix = &self.entries[attach_index as usize..];
        if suffix.len() == entries.len()
            && suffix.iter().zip(entries.iter()).all(|(a, b)| a.term() == b.term())
        {
            return AppendResult { ok: true, new_log: self.clone() };
        }

        let mut new_entries = self.entries[..attach_index as usize].to_vec();
        new_entries.extend_from_slice(entries);
        AppendResult { ok: true, new_log: Log { entries: new_entries } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(term: u64) -> Entry<String> {
        Entry::Noop { term }
    }

    fn value(term: u64, v: &str, client_id: u64, request_serial: u64) -> Entry<String> {
        Entry::Value { term, value: v.to_string(), id: RequestId { client_id, request_serial } }
    }

    #[test]
    fn append_to_empty_log_with_no_previous() {
        let log: Log<String> = Log::new();
        let result = log.append_entries(None, &[noop(1)]);
        assert!(result.ok);
        assert_eq!(result.new_log.len(), 1);
    }

    #[test]
    fn append_rejected_when_previous_missing() {
        let log: Log<String> = Log::new();
        let result =
            log.append_entries(Some(EntryIdentifier { index: 0, term: 1 }), &[noop(1)]);
        assert!(!result.ok);
        assert_eq!(result.new_log, log);
    }

    #[test]
    fn append_rejected_when_previous_term_mismatches() {
        let log = Log::from_entries(vec![noop(1)]);
        let result =
            log.append_entries(Some(EntryIdentifier { index: 0, term: 2 }), &[noop(2)]);
        assert!(!result.ok);
        assert_eq!(result.new_log, log);
    }

    #[test]
    fn empty_entries_with_valid_previous_leaves_log_unchanged() {
        let log = Log::from_entries(vec![noop(1), value(1, "x<-1", 1, 1)]);
        let result =
            log.append_entries(Some(EntryIdentifier { index: 1, term: 1 }), &[]);
        assert!(result.ok);
        assert_eq!(result.new_log, log);
    }

    #[test]
    fn idempotent_append_does_not_truncate_matching_suffix() {
        let log = Log::from_entries(vec![value(1, "x<-1", 1, 1)]);
        let new_entries = vec![value(1, "y<-3", 2, 1), value(1, "z<-4", 2, 2)];
        let once = log.append_entries(Some(EntryIdentifier { index: 0, term: 1 }), &new_entries);
        assert!(once.ok);

        let mut current = once.new_log;
        for _ in 0..4 {
            let repeat =
                current.append_entries(Some(EntryIdentifier { index: 0, term: 1 }), &new_entries);
            assert!(repeat.ok);
            assert_eq!(repeat.new_log, current);
            current = repeat.new_log;
        }
        assert_eq!(current.get_entries().len(), 3);
    }

    #[test]
    fn conflicting_suffix_is_truncated_and_replaced() {
        let log = Log::from_entries(vec![noop(1), value(1, "stale", 9, 1)]);
        let result = log.append_entries(
            Some(EntryIdentifier { index: 0, term: 1 }),
            &[value(2, "fresh", 9, 1)],
        );
        assert!(result.ok);
        assert_eq!(result.new_log.get_entries(), &[noop(1), value(2, "fresh", 9, 1)]);
    }

    #[test]
    fn whole_log_overwrite_at_index_zero() {
        let log = Log::from_entries(vec![noop(1), value(1, "a", 1, 1), value(1, "b", 1, 2)]);
        let result = log.append_entries(None, &[noop(2)]);
        assert!(result.ok);
        assert_eq!(result.new_log.get_entries(), &[noop(2)]);
    }

    #[test]
    fn last_entry_identifier_is_none_for_empty_log() {
        let log: Log<String> = Log::new();
        assert!(log.last_entry_identifier().is_none());
    }
}
