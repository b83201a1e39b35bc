//! Queue item store
//!
//! Ordered sequence of queue items for one queue. `replace` is the single
//! splice primitive behind every structural mutation: load, clear, shuffle,
//! move and delete all route through it (or through `update` for pure
//! reorders).

use rand::seq::SliceRandom;
use uuid::Uuid;

use super::types::QueueItem;

/// Ordered item storage for one queue
#[derive(Debug, Default)]
pub struct ItemStore {
    items: Vec<QueueItem>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn from_items(items: Vec<QueueItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QueueItem> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut QueueItem> {
        self.items.get_mut(index)
    }

    pub fn get_by_id(&self, queue_item_id: Uuid) -> Option<&QueueItem> {
        self.items.iter().find(|x| x.queue_item_id == queue_item_id)
    }

    pub fn get_by_id_mut(&mut self, queue_item_id: Uuid) -> Option<&mut QueueItem> {
        self.items
            .iter_mut()
            .find(|x| x.queue_item_id == queue_item_id)
    }

    pub fn index_of(&self, queue_item_id: Uuid) -> Option<usize> {
        self.items
            .iter()
            .position(|x| x.queue_item_id == queue_item_id)
    }

    pub fn as_slice(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<QueueItem> {
        self.items.clone()
    }

    /// Splice `new_items` into the store at `insert_at`.
    ///
    /// - `keep_played`: preserve the items before `insert_at`
    /// - `keep_remaining`: preserve the items at/after `insert_at`, appended
    ///   after the new items
    /// - `shuffle`: randomly permute the spliced region (never the kept
    ///   played prefix)
    ///
    /// Every spliced item's `sort_index` is incremented by
    /// `insert_at + position` before any shuffle. The increments are monotone
    /// in *input* order, so for input already ordered by `sort_index` the
    /// ordering survives and sorting on `sort_index` later restores the
    /// pre-shuffle relative order. Callers re-shuffling an already-shuffled
    /// store must sort first (as `set_shuffle` does).
    pub fn replace(
        &mut self,
        new_items: Vec<QueueItem>,
        insert_at: usize,
        keep_remaining: bool,
        keep_played: bool,
        shuffle: bool,
    ) {
        let insert_at = insert_at.min(self.items.len());
        let remaining = self.items.split_off(insert_at);
        let prev_items = if keep_played {
            std::mem::take(&mut self.items)
        } else {
            self.items.clear();
            Vec::new()
        };

        let mut next_items = new_items;
        if keep_remaining {
            next_items.extend(remaining);
        }

        for (position, item) in next_items.iter_mut().enumerate() {
            item.sort_index += (insert_at + position) as u64;
        }
        if shuffle {
            next_items.shuffle(&mut rand::thread_rng());
        }

        self.items = prev_items;
        self.items.extend(next_items);
    }

    /// Overwrite the item list outright (reorders from move_item)
    pub fn update(&mut self, items: Vec<QueueItem>) {
        self.items = items;
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_common::MediaItem;
    use std::collections::HashSet;

    fn make_items(queue_id: Uuid, count: usize, offset: usize) -> Vec<QueueItem> {
        (0..count)
            .map(|i| {
                QueueItem::from_media_item(
                    queue_id,
                    MediaItem::track(
                        format!("library://track/{}", offset + i),
                        format!("Track {}", offset + i),
                        180,
                    ),
                )
            })
            .collect()
    }

    fn uris(store: &ItemStore) -> Vec<String> {
        store
            .as_slice()
            .iter()
            .map(|x| x.uri().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_replace_assigns_sort_index() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 3, 0), 0, true, true, false);
        let indices: Vec<u64> = store.as_slice().iter().map(|x| x.sort_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        // inserting in the middle offsets by the insert point
        store.replace(make_items(queue_id, 2, 10), 1, true, true, false);
        assert_eq!(store.len(), 5);
        assert_eq!(store.get(1).unwrap().sort_index, 1);
        assert_eq!(store.get(2).unwrap().sort_index, 2);
    }

    #[test]
    fn test_replace_keep_played_false_drops_prefix() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 5, 0), 0, true, true, false);
        store.replace(make_items(queue_id, 2, 10), 3, true, false, false);
        // nothing before the insert point survived
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(0).unwrap().uri().unwrap(), "library://track/10");
    }

    #[test]
    fn test_replace_keep_remaining_preserves_suffix_set() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 5, 0), 0, true, true, false);
        let suffix_before: HashSet<Uuid> = store.as_slice()[2..]
            .iter()
            .map(|x| x.queue_item_id)
            .collect();

        store.replace(make_items(queue_id, 2, 10), 2, true, true, true);

        let all_after: HashSet<Uuid> = store
            .as_slice()
            .iter()
            .map(|x| x.queue_item_id)
            .collect();
        for id in &suffix_before {
            assert!(all_after.contains(id), "suffix item lost by replace");
        }
    }

    #[test]
    fn test_unshuffle_restores_relative_order() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 8, 0), 0, true, true, false);
        let original = uris(&store);

        // shuffle the whole store, as set_shuffle(true) does for the tail
        let items = store.to_vec();
        store.replace(items, 0, false, false, true);

        // un-shuffle: sort by sort_index and reload without shuffling
        let mut items = store.to_vec();
        items.sort_by_key(|x| x.sort_index);
        store.replace(items, 0, false, false, false);

        assert_eq!(uris(&store), original);
    }

    #[test]
    fn test_unshuffle_survives_repeated_shuffles() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 6, 0), 0, true, true, false);
        let original = uris(&store);

        for _ in 0..3 {
            // reload in sort order before each re-shuffle, as set_shuffle does
            let mut items = store.to_vec();
            items.sort_by_key(|x| x.sort_index);
            store.replace(items, 0, false, false, true);
        }
        let mut items = store.to_vec();
        items.sort_by_key(|x| x.sort_index);
        store.replace(items, 0, false, false, false);

        assert_eq!(uris(&store), original);
    }

    #[test]
    fn test_no_duplicate_item_ids() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 4, 0), 0, true, true, false);
        store.replace(make_items(queue_id, 4, 4), 2, true, true, false);
        let ids: HashSet<Uuid> = store
            .as_slice()
            .iter()
            .map(|x| x.queue_item_id)
            .collect();
        assert_eq!(ids.len(), store.len());
    }

    #[test]
    fn test_insert_past_end_appends() {
        let queue_id = Uuid::new_v4();
        let mut store = ItemStore::new();
        store.replace(make_items(queue_id, 2, 0), 0, true, true, false);
        store.replace(make_items(queue_id, 1, 5), 99, true, true, false);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(2).unwrap().uri().unwrap(), "library://track/5");
    }
}
