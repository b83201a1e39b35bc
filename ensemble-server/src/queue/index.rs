//! Next-index resolution
//!
//! Pure functions that compute the next playable position in a queue given
//! repeat mode and end-of-queue rules. No state is touched here; the command
//! processor and reconciler decide what to do with the answer.

use super::store::ItemStore;
use super::types::{QueueItem, RepeatMode};

/// Return the next index for the queue, accounting for repeat settings.
///
/// - `is_skip`: the move was user-initiated (next button), which overrides
///   single-track repeat
/// - `allow_repeat`: false when pre-resolving the item *after* the current
///   one without committing to a repeat
///
/// Returns `None` when there are no (more) items in the queue.
pub fn next_index(
    repeat_mode: RepeatMode,
    item_count: usize,
    cur_index: Option<usize>,
    is_skip: bool,
    allow_repeat: bool,
) -> Option<usize> {
    let cur_index = cur_index?;
    if item_count == 0 {
        return None;
    }
    // repeat single track
    if repeat_mode == RepeatMode::One && !is_skip {
        return if allow_repeat { Some(cur_index) } else { None };
    }
    // cur_index is (at or past) the last index of the queue
    if cur_index >= item_count.saturating_sub(1) {
        if allow_repeat && repeat_mode == RepeatMode::All {
            return Some(0);
        }
        return None;
    }
    Some(cur_index + 1)
}

/// Return the next playable item, skipping entries whose media is marked
/// unavailable. Bounded by the item count so a fully-unavailable queue (or a
/// repeat-one loop on an unavailable item) terminates.
pub fn next_item<'a>(
    store: &'a ItemStore,
    repeat_mode: RepeatMode,
    cur_index: Option<usize>,
) -> Option<&'a QueueItem> {
    let mut cur = cur_index;
    for _ in 0..=store.len() {
        let idx = next_index(repeat_mode, store.len(), cur, false, true)?;
        let item = store.get(idx)?;
        if item.available() {
            return Some(item);
        }
        if Some(idx) == cur {
            // repeat-one on an unavailable item would loop forever
            return None;
        }
        cur = Some(idx);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_common::MediaItem;
    use uuid::Uuid;

    #[test]
    fn test_empty_queue_returns_none() {
        for mode in [RepeatMode::Off, RepeatMode::One, RepeatMode::All] {
            assert_eq!(next_index(mode, 0, Some(0), false, true), None);
            assert_eq!(next_index(mode, 5, None, false, true), None);
        }
    }

    #[test]
    fn test_repeat_one_returns_same_index() {
        assert_eq!(next_index(RepeatMode::One, 5, Some(2), false, true), Some(2));
        // pre-resolve without committing to the repeat
        assert_eq!(next_index(RepeatMode::One, 5, Some(2), false, false), None);
        // user skip overrides single-track repeat
        assert_eq!(next_index(RepeatMode::One, 5, Some(2), true, true), Some(3));
    }

    #[test]
    fn test_last_index_behavior() {
        assert_eq!(next_index(RepeatMode::Off, 3, Some(2), false, true), None);
        assert_eq!(next_index(RepeatMode::All, 3, Some(2), false, true), Some(0));
        assert_eq!(next_index(RepeatMode::All, 3, Some(2), false, false), None);
    }

    #[test]
    fn test_result_always_in_bounds() {
        // for all repeat modes and positions the result is a valid index,
        // except the explicit ALL-repeat wrap to 0
        for mode in [RepeatMode::Off, RepeatMode::One, RepeatMode::All] {
            for count in 1..6usize {
                for cur in 0..count {
                    for is_skip in [false, true] {
                        for allow in [false, true] {
                            if let Some(next) =
                                next_index(mode, count, Some(cur), is_skip, allow)
                            {
                                assert!(next < count, "{mode:?} {count} {cur} -> {next}");
                            }
                        }
                    }
                }
            }
        }
    }

    fn store_with_availability(avail: &[bool]) -> ItemStore {
        let queue_id = Uuid::new_v4();
        let items = avail
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let mut media = MediaItem::track(format!("library://track/{i}"), "t", 100);
                media.available = *a;
                QueueItem::from_media_item(queue_id, media)
            })
            .collect();
        ItemStore::from_items(items)
    }

    #[test]
    fn test_next_item_skips_unavailable() {
        let store = store_with_availability(&[true, false, false, true]);
        let item = next_item(&store, RepeatMode::Off, Some(0)).unwrap();
        assert_eq!(item.uri().unwrap(), "library://track/3");
    }

    #[test]
    fn test_next_item_exhausts_to_none() {
        let store = store_with_availability(&[true, false, false]);
        assert!(next_item(&store, RepeatMode::Off, Some(0)).is_none());
    }
}
