//! Playback state reconciliation
//!
//! Renderers report their state roughly once a second. The reconciler maps
//! each report back onto queue state: which item is actually playing, how
//! far into it we are, and whether anything changed that listeners or the
//! state store need to hear about. In flow mode the renderer only knows one
//! endless stream, so the current item is reconstructed by walking the
//! play log against the reported total elapsed time.

use chrono::Utc;
use ensemble_common::events::EnsembleEvent;
use ensemble_common::{MediaItem, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::providers::PlayerSnapshot;

use super::controller::QueueController;
use super::store::ItemStore;
use super::types::{PlayLogEntry, PlayState, QueueItem, TransitionState};

/// Placeholder length for log entries whose duration is still unknown
/// (live radio, or an item still streaming). Effectively "never ends".
const UNKNOWN_DURATION_SECS: f64 = (7 * 24 * 3600) as f64;

/// How many items ahead of the current one must remain before a radio
/// refill is scheduled
const RADIO_REFILL_THRESHOLD: usize = 5;

/// Minimum in-track seconds before a progress report is worth sending
const PROGRESS_REPORT_MIN_SECS: u64 = 10;

/// Derived queue state diffed between consecutive renderer reports
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompareState {
    pub state: PlayState,
    pub current_item_id: Option<Uuid>,
    pub next_item_id: Option<Uuid>,
    pub elapsed_time: u64,
    pub stream_title: Option<String>,
    pub codec_type: Option<String>,
    pub output_formats: Vec<String>,
}

impl CompareState {
    fn changed_keys(&self, other: &CompareState) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.state != other.state {
            changed.push("state");
        }
        if self.current_item_id != other.current_item_id {
            changed.push("current_item_id");
        }
        if self.next_item_id != other.next_item_id {
            changed.push("next_item_id");
        }
        if self.elapsed_time != other.elapsed_time {
            changed.push("elapsed_time");
        }
        if self.stream_title != other.stream_title {
            changed.push("stream_title");
        }
        if self.codec_type != other.codec_type {
            changed.push("codec_type");
        }
        if self.output_formats != other.output_formats {
            changed.push("output_formats");
        }
        changed
    }
}

/// Walk the flow play log to locate `(item index, in-track seconds)` for a
/// renderer-reported total elapsed time.
///
/// Entries without a known length act as open-ended: the walk stops there.
/// Elapsed time past the end of the log (the withheld fade-out tail) is
/// attributed to the last logged item.
pub(crate) fn flow_stream_position(
    log: &[PlayLogEntry],
    items: &ItemStore,
    total_elapsed: u64,
) -> Option<(usize, u64)> {
    let mut remaining = total_elapsed as f64;
    for entry in log {
        let entry_seconds = entry
            .seconds_streamed
            .or(entry.duration)
            .unwrap_or(UNKNOWN_DURATION_SECS);
        if remaining > entry_seconds {
            remaining -= entry_seconds;
            continue;
        }
        let index = items.index_of(entry.queue_item_id)?;
        let seek = items
            .get(index)
            .and_then(|x| x.streamdetails.as_ref())
            .map(|d| d.seek_position)
            .unwrap_or(0);
        return Some((index, seek + remaining as u64));
    }
    let last = log.last()?;
    let index = items.index_of(last.queue_item_id)?;
    Some((index, remaining as u64))
}

impl QueueController {
    /// Process a renderer state report.
    pub async fn on_player_update(&self, snapshot: PlayerSnapshot) -> Result<()> {
        let queue_id = snapshot.player_id;
        let mut reg = self.inner.lock().await;
        let Ok(slot) = reg.slot_mut(queue_id) else {
            // report from a player without a registered queue
            return Ok(());
        };

        let active = snapshot.active_source == Some(queue_id);
        if !active {
            if slot.queue.active {
                slot.queue.active = false;
                self.signal_update(slot, false);
            }
            return Ok(());
        }
        slot.queue.active = true;

        // a play request is in flight; the renderer still reports the old
        // track, so anything derived now would be wrong
        if slot.queue.transition == TransitionState::Transitioning {
            debug!(%queue_id, "ignoring renderer report during track transition");
            return Ok(());
        }

        let (new_index, track_elapsed) =
            if slot.queue.flow_mode && !slot.queue.flow_mode_stream_log.is_empty() {
                match flow_stream_position(
                    &slot.queue.flow_mode_stream_log,
                    &slot.items,
                    snapshot.elapsed_time,
                ) {
                    Some(position) => position,
                    None => return Ok(()),
                }
            } else {
                let Some(item_id) = snapshot.current_media.as_ref().and_then(|m| m.queue_item_id)
                else {
                    return Ok(());
                };
                let Some(index) = slot.items.index_of(item_id) else {
                    return Ok(());
                };
                let seek = slot
                    .items
                    .get(index)
                    .and_then(|x| x.streamdetails.as_ref())
                    .map(|d| d.seek_position)
                    .unwrap_or(0);
                (index, seek + snapshot.elapsed_time)
            };

        let current_item = slot.items.get(new_index).cloned();
        let next_item = self.peek_next_item(slot, Some(new_index));
        let details = current_item.as_ref().and_then(|x| x.streamdetails.as_ref());
        let new_state = CompareState {
            state: snapshot.state,
            current_item_id: current_item.as_ref().map(|x| x.queue_item_id),
            next_item_id: next_item.as_ref().map(|x| x.queue_item_id),
            elapsed_time: track_elapsed,
            stream_title: details.and_then(|d| d.stream_title.clone()),
            codec_type: details.map(|d| d.codec_type.clone()),
            output_formats: snapshot.output_formats.clone(),
        };
        let prev = slot.prev_state.replace(new_state.clone());
        let changed = match &prev {
            Some(p) => p.changed_keys(&new_state),
            None => vec!["state", "current_item_id", "elapsed_time"],
        };
        if changed.is_empty() {
            return Ok(());
        }

        let prev_play_state = slot.queue.state;
        if changed == ["elapsed_time"] {
            // high-frequency path: dedicated lean event, nothing persisted
            slot.queue.state = snapshot.state;
            slot.queue.elapsed_time = track_elapsed;
            slot.queue.elapsed_time_last_updated = Utc::now();
            self.events.emit(EnsembleEvent::QueueTimeUpdated {
                queue_id,
                elapsed_time: track_elapsed,
            });
        } else {
            slot.queue.state = snapshot.state;
            slot.queue.current_index = Some(new_index);
            slot.queue.current_item = current_item.clone();
            slot.queue.next_item = next_item;
            slot.queue.elapsed_time = track_elapsed;
            slot.queue.elapsed_time_last_updated = Utc::now();
            self.signal_update(slot, false);
        }

        // --- side effects -------------------------------------------------

        let item_changed = changed.contains(&"current_item_id");
        let state_changed = changed.contains(&"state");

        // progress reporting back to the catalog
        if item_changed {
            if let Some(prev_state) = &prev {
                let prev_item = prev_state
                    .current_item_id
                    .and_then(|id| slot.items.get_by_id(id).cloned());
                if let Some(prev_item) = prev_item {
                    self.report_progress(queue_id, &prev_item, prev_state.elapsed_time);
                }
            }
        } else if state_changed && snapshot.state != PlayState::Playing {
            if let Some(item) = &current_item {
                if track_elapsed > PROGRESS_REPORT_MIN_SECS {
                    self.report_progress(queue_id, item, track_elapsed);
                }
            }
        } else if snapshot.state == PlayState::Playing
            && track_elapsed > 0
            && track_elapsed % 30 == 0
        {
            if let Some(item) = &current_item {
                self.report_progress(queue_id, item, track_elapsed);
            }
        }

        // the player's output chain changed; resolved stream details for the
        // buffered item may no longer match
        if changed.contains(&"output_formats") && prev.is_some() {
            debug!(%queue_id, "player output formats changed, refreshing stream details");
            if let Some(item_id) = slot
                .queue
                .index_in_buffer
                .and_then(|i| slot.items.get(i))
                .map(|x| x.queue_item_id)
            {
                let ctrl = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = ctrl.refresh_stream_details(queue_id, item_id).await {
                        warn!(%queue_id, %err, "stream details refresh failed");
                    }
                });
            }
        }

        // end-of-queue handling with a grace period; a renderer that merely
        // hiccups back to playing cancels it
        let item_count = slot.items.len();
        let at_last_item = new_index + 1 >= item_count;
        if snapshot.state == PlayState::Idle
            && prev_play_state == PlayState::Playing
            && at_last_item
        {
            let ctrl = self.clone();
            self.scheduler.call_later(
                format!("end_of_queue_{queue_id}"),
                self.settings.end_of_queue_grace(),
                async move {
                    ctrl.finish_queue(queue_id).await;
                },
            );
        } else if snapshot.state == PlayState::Playing {
            self.scheduler.cancel(&format!("end_of_queue_{queue_id}"));
        }

        if snapshot.state == PlayState::Playing {
            // arm don't-stop-the-music right before the queue runs dry
            let items_left = item_count.saturating_sub(new_index);
            if slot.queue.dont_stop_the_music_enabled
                && slot.queue.radio_source.is_empty()
                && !slot.queue.enqueued_media_items.is_empty()
                && items_left <= 1
            {
                slot.queue.radio_source =
                    slot.queue.enqueued_media_items.iter().cloned().collect();
                debug!(%queue_id, "don't stop the music armed from enqueue history");
            }
            // keep a radio queue topped up
            if !slot.queue.radio_source.is_empty() && items_left < RADIO_REFILL_THRESHOLD {
                self.schedule_radio_refill(queue_id);
            }
        }
        Ok(())
    }

    /// Report listen progress for an item to the catalog and event bus.
    fn report_progress(&self, queue_id: Uuid, item: &QueueItem, seconds_played: u64) {
        let Some(media_item) = item.media_item.clone() else {
            return;
        };
        let fully_played = item
            .duration
            .map(|d| seconds_played + 5 >= d)
            .unwrap_or(false);
        self.events.emit(EnsembleEvent::MediaItemPlayed {
            queue_id,
            uri: media_item.uri.clone(),
            seconds_played,
            fully_played,
            timestamp: Utc::now(),
        });
        let catalog = std::sync::Arc::clone(&self.catalog);
        tokio::spawn(async move {
            if let Err(err) = catalog
                .mark_item_played(&media_item, fully_played, seconds_played)
                .await
            {
                debug!(uri = %media_item.uri, %err, "mark_item_played failed");
            }
        });
    }

    /// Re-resolve stream details after the player's output chain changed.
    async fn refresh_stream_details(&self, queue_id: Uuid, item_id: Uuid) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let following = {
            let slot = reg.slot(queue_id)?;
            let idx = slot.items.index_of(item_id);
            idx.and_then(|i| {
                super::index::next_index(
                    slot.queue.repeat_mode,
                    slot.items.len(),
                    Some(i),
                    false,
                    false,
                )
            })
        };
        let seek = reg
            .slot(queue_id)?
            .items
            .get_by_id(item_id)
            .and_then(|x| x.streamdetails.as_ref())
            .map(|d| d.seek_position)
            .unwrap_or(0);
        self.load_item_details(&mut reg, queue_id, item_id, following, false, seek, false)
            .await
    }

    /// The queue played out and stayed idle through the grace period.
    async fn finish_queue(&self, queue_id: Uuid) {
        let mut reg = self.inner.lock().await;
        let Ok(slot) = reg.slot_mut(queue_id) else {
            return;
        };
        // anything queued up or resumed in the meantime cancels the cleanup
        if slot.queue.state != PlayState::Idle || slot.queue.next_item.is_some() {
            return;
        }
        debug!(%queue_id, "queue finished playing");
        // final progress report for the last item
        if let Some(item) = slot.queue.current_item.clone() {
            let seconds = slot.queue.elapsed_time;
            self.report_progress(queue_id, &item, seconds);
        }
        slot.queue.resume_pos = 0;
        self.clear_inner(slot);
    }

    /// Restore a slot's arming seeds; test hook used by integration tests.
    #[doc(hidden)]
    pub async fn debug_set_radio_source(&self, queue_id: Uuid, seeds: Vec<MediaItem>) {
        let mut reg = self.inner.lock().await;
        if let Ok(slot) = reg.slot_mut(queue_id) {
            slot.queue.radio_source = seeds;
        }
    }
}
