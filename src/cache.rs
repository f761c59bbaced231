//! Process-wide response cache keyed by request path.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.put_at(key, value, ttl, Utc::now());
    }

    pub fn put_at(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.prune_expired(now);
            self.trim_to(self.max_entries - 1);
        }

        self.entries.insert(
            key,
            CacheEntry {
                value: value.into(),
                expires_at: now + ttl,
            },
        );
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn trim_to(&mut self, limit: usize) {
        if self.entries.len() <= limit {
            return;
        }

        let overflow = self.entries.len() - limit;
        let mut soonest = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.expires_at))
            .collect::<Vec<_>>();
        soonest.sort_by_key(|(_, expires_at)| *expires_at);

        for (key, _) in soonest.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }
}
