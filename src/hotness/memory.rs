//! In-process [`ScoreStore`] used by tests and single-node deployments that do
//! not need scores to survive a restart.

use std::{
    cmp::Reverse,
    collections::{BTreeSet, HashMap},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{HotnessEntry, Result, ScoreStore};

/// Sorted set of video scores.
///
/// A hash map gives the current score of a key; a B-tree keyed by
/// `(score descending, first-insert sequence)` keeps the ranking. An update
/// removes the old rank key and inserts the new one under the same lock, so
/// every increment is atomic and top-K is a prefix walk of the tree.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    inner: Mutex<Ranking>,
}

#[derive(Debug, Default)]
struct Ranking {
    slots: HashMap<String, Slot>,
    index: BTreeSet<(Reverse<i64>, u64, String)>,
    next_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    score: i64,
    seq: u64,
}

impl Ranking {
    fn increment(&mut self, key: &str, delta: i64) -> i64 {
        match self.slots.get_mut(key) {
            Some(slot) => {
                self.index
                    .remove(&(Reverse(slot.score), slot.seq, key.to_owned()));
                slot.score = slot.score.saturating_add(delta);
                self.index
                    .insert((Reverse(slot.score), slot.seq, key.to_owned()));
                slot.score
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.slots.insert(key.to_owned(), Slot { score: delta, seq });
                self.index.insert((Reverse(delta), seq, key.to_owned()));
                delta
            }
        }
    }
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn increment_or_insert(&self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.inner.lock().increment(key, delta))
    }

    async fn score(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.inner.lock().slots.get(key).map(|slot| slot.score))
    }

    async fn range_descending(&self, limit: usize) -> Result<Vec<HotnessEntry>> {
        let ranking = self.inner.lock();
        Ok(ranking
            .index
            .iter()
            .take(limit)
            .map(|(Reverse(score), _, key)| HotnessEntry::new(key.clone(), *score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_increment_inserts() {
        let store = MemoryScoreStore::new();
        assert!(store.is_empty());
        assert_eq!(store.increment_or_insert("a", 3).await.unwrap(), 3);
        assert_eq!(store.increment_or_insert("a", 2).await.unwrap(), 5);
        assert_eq!(store.score("a").await.unwrap(), Some(5));
        assert_eq!(store.score("b").await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn updates_move_entries_in_the_ranking() {
        let store = MemoryScoreStore::new();
        store.increment_or_insert("a", 1).await.unwrap();
        store.increment_or_insert("b", 3).await.unwrap();
        store.increment_or_insert("c", 2).await.unwrap();
        assert_eq!(
            store.range_descending(10).await.unwrap(),
            vec![
                HotnessEntry::new("b", 3),
                HotnessEntry::new("c", 2),
                HotnessEntry::new("a", 1),
            ]
        );

        // "a" catches up with "b" and, being older, ranks ahead of it.
        store.increment_or_insert("a", 2).await.unwrap();
        assert_eq!(
            store.range_descending(2).await.unwrap(),
            vec![HotnessEntry::new("a", 3), HotnessEntry::new("b", 3)]
        );
        // One rank key per video, whatever the number of updates.
        assert_eq!(store.inner.lock().index.len(), 3);
    }

    #[tokio::test]
    async fn negative_delta_corrects_a_score() {
        let store = MemoryScoreStore::new();
        store.increment_or_insert("a", 5).await.unwrap();
        store.increment_or_insert("b", 4).await.unwrap();
        assert_eq!(store.increment_or_insert("a", -2).await.unwrap(), 3);
        assert_eq!(
            store.range_descending(1).await.unwrap(),
            vec![HotnessEntry::new("b", 4)]
        );
    }

    #[tokio::test]
    async fn increments_saturate_at_the_integer_bounds() {
        let store = MemoryScoreStore::new();
        store.increment_or_insert("up", i64::MAX - 1).await.unwrap();
        assert_eq!(store.increment_or_insert("up", 5).await.unwrap(), i64::MAX);

        store.increment_or_insert("down", i64::MIN + 1).await.unwrap();
        assert_eq!(store.increment_or_insert("down", -5).await.unwrap(), i64::MIN);
        assert_eq!(
            store.range_descending(2).await.unwrap(),
            vec![HotnessEntry::new("up", i64::MAX), HotnessEntry::new("down", i64::MIN)]
        );
    }
}
