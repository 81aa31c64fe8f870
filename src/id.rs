//! Block id generation: `KB-<YYYYMMDD>-<NNN>`, monotonic per day.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Per-day monotonic counters, shared by a `MemoryCore` for the lifetime of
/// the process. Not persisted: a restart re-derives the next counter from
/// `BlockStore::list()` via [`IdGenerator::seed_from_existing`].
#[derive(Debug, Default)]
pub struct IdGenerator {
    counters: DashMap<String, Arc<AtomicU32>>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next id for "today" (UTC).
    pub fn next_id(&self) -> String {
        let day = Utc::now().format("%Y%m%d").to_string();
        self.next_id_for_day(&day)
    }

    fn next_id_for_day(&self, day: &str) -> String {
        let counter = self
            .counters
            .entry(day.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone();
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("KB-{day}-{n:03}")
    }

    /// Seed counters from ids already on disk, so a restarted process
    /// doesn't reissue an id that collides with an existing block.
    pub fn seed_from_existing<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            if let Some((day, n)) = parse_generated_id(id) {
                let counter = self
                    .counters
                    .entry(day)
                    .or_insert_with(|| Arc::new(AtomicU32::new(0)));
                let current = counter.load(Ordering::SeqCst);
                if n > current {
                    counter.store(n, Ordering::SeqCst);
                }
            }
        }
    }
}

fn parse_generated_id(id: &str) -> Option<(String, u32)> {
    let rest = id.strip_prefix("KB-")?;
    let (day, n) = rest.split_once('-')?;
    if day.len() != 8 || !day.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: u32 = n.parse().ok()?;
    Some((day.to_string(), n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_within_a_day() {
        let gen = IdGenerator::new();
        let a = gen.next_id_for_day("20260101");
        let b = gen.next_id_for_day("20260101");
        assert_eq!(a, "KB-20260101-001");
        assert_eq!(b, "KB-20260101-002");
    }

    #[test]
    fn counters_are_independent_per_day() {
        let gen = IdGenerator::new();
        gen.next_id_for_day("20260101");
        let first_of_new_day = gen.next_id_for_day("20260102");
        assert_eq!(first_of_new_day, "KB-20260102-001");
    }

    #[test]
    fn seed_from_existing_avoids_collisions() {
        let gen = IdGenerator::new();
        gen.seed_from_existing(["KB-20260101-005", "KB-20260101-002", "not-an-id"]);
        let next = gen.next_id_for_day("20260101");
        assert_eq!(next, "KB-20260101-006");
    }
}
