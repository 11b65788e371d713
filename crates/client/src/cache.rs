use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tandem_contracts::canonical;

const ANONYMOUS_SESSION: &str = "anon";

/// Cache partition for one credential: a fingerprint of the access token,
/// or `anon` without one. Results fetched under one session are never
/// served to another.
pub(crate) fn session_key(access_token: Option<&str>) -> String {
    match access_token {
        Some(token) => canonical::fingerprint(token),
        None => ANONYMOUS_SESSION.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    session: String,
    procedure: String,
    input: String,
}

impl CacheKey {
    fn new(session: &str, procedure: &str, input: Option<&Value>) -> Self {
        Self {
            session: session.to_string(),
            procedure: procedure.to_string(),
            input: canonical::canonical_json_string(input.unwrap_or(&Value::Null)),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// Successful query results, fresh for `stale_time` after they were stored.
///
/// Inputs are keyed by their canonical JSON, so `{"a":1,"b":2}` and
/// `{"b":2,"a":1}` share an entry. At most `max_entries` are held; expired
/// entries are pruned on every insert and the oldest go first on overflow.
#[derive(Debug)]
pub struct QueryCache {
    stale_time: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl QueryCache {
    pub fn new(stale_time: Duration, max_entries: usize) -> Self {
        Self {
            stale_time,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_entries > 0 && !self.stale_time.is_zero()
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn get(&self, session: &str, procedure: &str, input: Option<&Value>) -> Option<Value> {
        if !self.enabled() {
            return None;
        }

        let key = CacheKey::new(session, procedure, input);
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(&key)?;
        if entry.stored_at.elapsed() < self.stale_time {
            return Some(entry.value.clone());
        }
        entries.remove(&key);
        None
    }

    pub fn put(&self, session: &str, procedure: &str, input: Option<&Value>, value: Value) {
        if !self.enabled() {
            return;
        }

        let Ok(mut entries) = self.entries.lock() else {
            return;
        };

        let stale_time = self.stale_time;
        entries.retain(|_, entry| entry.stored_at.elapsed() < stale_time);
        entries.insert(
            CacheKey::new(session, procedure, input),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );

        if entries.len() <= self.max_entries {
            return;
        }

        let mut by_age = entries
            .iter()
            .map(|(key, entry)| (entry.stored_at, key.clone()))
            .collect::<Vec<_>>();
        by_age.sort_by_key(|(stored_at, _)| *stored_at);

        let overflow = entries.len() - self.max_entries;
        for (_, key) in by_age.into_iter().take(overflow) {
            entries.remove(&key);
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn invalidate_procedure(&self, procedure: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| key.procedure != procedure);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
