//! Tracked shards and their cursors

use crate::service::CursorToken;
use std::collections::BTreeMap;

/// A shard the engine polls, together with its read position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: String,
    pub is_open: bool,
    /// `None` once the shard is exhausted
    pub cursor: Option<CursorToken>,
}

impl Shard {
    /// An open shard positioned at `cursor`
    pub fn open(id: impl Into<String>, cursor: CursorToken) -> Self {
        Self {
            id: id.into(),
            is_open: true,
            cursor: Some(cursor),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Shard id → shard, replaced wholesale on every catalog resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedSet {
    shards: BTreeMap<String, Shard>,
}

impl TrackedSet {
    pub fn new(shards: impl IntoIterator<Item = Shard>) -> Self {
        Self {
            shards: shards.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn get(&self, shard_id: &str) -> Option<&Shard> {
        self.shards.get(shard_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.shards.keys().map(String::as_str)
    }

    /// Shards that still hold a cursor, paired with it
    pub fn readable(&self) -> impl Iterator<Item = (&str, &CursorToken)> {
        self.shards
            .values()
            .filter_map(|s| s.cursor.as_ref().map(|c| (s.id.as_str(), c)))
    }

    /// Move a shard to its successor cursor, or mark it exhausted on `None`
    pub fn advance(&mut self, shard_id: &str, next: Option<CursorToken>) {
        if let Some(shard) = self.shards.get_mut(shard_id) {
            shard.cursor = next;
        }
    }

    pub fn any_exhausted(&self) -> bool {
        self.shards.values().any(Shard::is_exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> TrackedSet {
        TrackedSet::new([
            Shard::open("b", CursorToken::new("cb")),
            Shard::open("a", CursorToken::new("ca")),
        ])
    }

    #[test]
    fn iterates_in_id_order() {
        let ids: Vec<_> = set().ids().map(str::to_string).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn advance_to_none_exhausts_shard() {
        let mut tracked = set();
        assert!(!tracked.any_exhausted());

        tracked.advance("a", Some(CursorToken::new("ca2")));
        assert_eq!(tracked.get("a").unwrap().cursor, Some(CursorToken::new("ca2")));
        assert!(!tracked.any_exhausted());

        tracked.advance("b", None);
        assert!(tracked.get("b").unwrap().is_exhausted());
        assert!(tracked.any_exhausted());
        assert_eq!(tracked.readable().count(), 1);
    }

    #[test]
    fn advancing_unknown_shard_is_ignored() {
        let mut tracked = set();
        tracked.advance("zzz", None);
        assert!(!tracked.any_exhausted());
        assert_eq!(tracked.len(), 2);
    }
}
