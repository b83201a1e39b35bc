//! Queue command processor
//!
//! `QueueController` exclusively owns every `PlayerQueue` and its item
//! store. All mutation happens inside command handlers holding the single
//! registry lock, so queue state never changes between a read and its
//! corresponding write within one command. The reconciler and the flow
//! stream assembler go through this API as well; neither holds a long-lived
//! reference into the registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ensemble_common::events::{EnsembleEvent, EventBus};
use ensemble_common::{Error, MediaItem, MediaType, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::db::StateStore;
use crate::providers::{Catalog, PlayerMedia, PlayerTransport, StreamResolver};
use crate::tasks::TaskScheduler;

use super::index::{next_index, next_item};
use super::radio;
use super::reconciler::CompareState;
use super::store::ItemStore;
use super::types::{
    PlayLogEntry, PlayState, PlayerQueue, QueueItem, QueueOption, RepeatMode, TransitionState,
};

/// Reference to a queue item by position or id
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    Index(usize),
    Id(Uuid),
}

/// Input accepted by `play_media`: a uri to resolve or an already resolved
/// media item
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlayMediaInput {
    Uri(String),
    Item(MediaItem),
}

pub(crate) struct QueueSlot {
    pub queue: PlayerQueue,
    pub items: ItemStore,
    /// Last derived snapshot the reconciler diffed against
    pub prev_state: Option<CompareState>,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub queues: HashMap<Uuid, QueueSlot>,
}

impl Registry {
    pub fn slot_mut(&mut self, queue_id: Uuid) -> Result<&mut QueueSlot> {
        self.queues
            .get_mut(&queue_id)
            .ok_or_else(|| Error::PlayerUnavailable(format!("queue {queue_id} is not available")))
    }

    pub fn slot(&self, queue_id: Uuid) -> Result<&QueueSlot> {
        self.queues
            .get(&queue_id)
            .ok_or_else(|| Error::PlayerUnavailable(format!("queue {queue_id} is not available")))
    }
}

/// The public command surface over all player queues
#[derive(Clone)]
pub struct QueueController {
    pub(crate) inner: Arc<Mutex<Registry>>,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) streams: Arc<dyn StreamResolver>,
    pub(crate) players: Arc<dyn PlayerTransport>,
    pub(crate) state_store: StateStore,
    pub(crate) events: Arc<EventBus>,
    pub(crate) scheduler: TaskScheduler,
    pub(crate) settings: Arc<QueueSettings>,
    base_url: String,
}

impl QueueController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        streams: Arc<dyn StreamResolver>,
        players: Arc<dyn PlayerTransport>,
        state_store: StateStore,
        events: Arc<EventBus>,
        settings: QueueSettings,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
            catalog,
            streams,
            players,
            state_store,
            events,
            scheduler: TaskScheduler::new(),
            settings: Arc::new(settings),
            base_url: base_url.into(),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Player lifecycle
    // ------------------------------------------------------------------

    /// Register a queue for a player, restoring the previous snapshot from
    /// the state store when one exists.
    pub async fn register_player(&self, queue_id: Uuid, display_name: &str) -> Result<()> {
        let (mut queue, items) = match self.state_store.load_queue(queue_id).await {
            Ok(Some(restored)) => {
                let items = self.state_store.load_items(queue_id).await.unwrap_or_default();
                info!(%queue_id, items = items.len(), "restored queue from state store");
                (restored, items)
            }
            Ok(None) => (PlayerQueue::new(queue_id, display_name), Vec::new()),
            Err(err) => {
                warn!(%queue_id, %err, "failed to restore queue state");
                (PlayerQueue::new(queue_id, display_name), Vec::new())
            }
        };
        // volatile state never survives a restart
        queue.display_name = display_name.to_string();
        queue.state = PlayState::Idle;
        queue.active = false;
        queue.transition = TransitionState::Stable;
        queue.item_count = items.len();

        let mut reg = self.inner.lock().await;
        reg.queues.insert(
            queue_id,
            QueueSlot {
                queue,
                items: ItemStore::from_items(items),
                prev_state: None,
            },
        );
        self.events.emit(EnsembleEvent::QueueAdded {
            queue_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Drop a queue when its player is removed from the registry.
    pub async fn remove_player(&self, queue_id: Uuid) {
        let mut reg = self.inner.lock().await;
        reg.queues.remove(&queue_id);
        drop(reg);
        let store = self.state_store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.delete_queue(queue_id).await {
                warn!(%queue_id, %err, "failed to delete persisted queue state");
            }
        });
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub async fn get_queue(&self, queue_id: Uuid) -> Option<PlayerQueue> {
        let reg = self.inner.lock().await;
        reg.queues.get(&queue_id).map(|slot| slot.queue.clone())
    }

    pub async fn list_queues(&self) -> Vec<PlayerQueue> {
        let reg = self.inner.lock().await;
        reg.queues.values().map(|slot| slot.queue.clone()).collect()
    }

    pub async fn get_items(&self, queue_id: Uuid, limit: usize, offset: usize) -> Vec<QueueItem> {
        let reg = self.inner.lock().await;
        match reg.queues.get(&queue_id) {
            Some(slot) => slot
                .items
                .as_slice()
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn get_item(&self, queue_id: Uuid, item: ItemRef) -> Option<QueueItem> {
        let reg = self.inner.lock().await;
        let slot = reg.queues.get(&queue_id)?;
        match item {
            ItemRef::Index(index) => slot.items.get(index).cloned(),
            ItemRef::Id(id) => slot.items.get_by_id(id).cloned(),
        }
    }

    // ------------------------------------------------------------------
    // Queue settings commands
    // ------------------------------------------------------------------

    /// Configure shuffle on the queue. Only the not-yet-buffered remainder
    /// is reshuffled (or restored to original sort order when disabling).
    pub async fn set_shuffle(&self, queue_id: Uuid, shuffle_enabled: bool) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        if slot.queue.shuffle_enabled == shuffle_enabled {
            return Ok(());
        }
        slot.queue.shuffle_enabled = shuffle_enabled;
        let cur_index = slot.queue.index_in_buffer.or(slot.queue.current_index);
        let (next_index, mut next_items) = match cur_index {
            Some(cur) => {
                let idx = cur + 1;
                let items: Vec<QueueItem> = slot
                    .items
                    .as_slice()
                    .iter()
                    .skip(idx)
                    .cloned()
                    .collect();
                (idx, items)
            }
            None => (0, slot.items.to_vec()),
        };
        if !shuffle_enabled {
            // restore the original sort order of the remaining items
            next_items.sort_by_key(|x| x.sort_index);
        }
        self.load_inner(slot, next_items, next_index, false, true, shuffle_enabled);
        Ok(())
    }

    pub async fn set_repeat(&self, queue_id: Uuid, repeat_mode: RepeatMode) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        if slot.queue.repeat_mode == repeat_mode {
            return Ok(());
        }
        slot.queue.repeat_mode = repeat_mode;
        self.signal_update(slot, false);
        Ok(())
    }

    /// Configure don't-stop-the-music. When enabled on a queue already down
    /// to its last item, the recently enqueued media items become the radio
    /// source and a fill is scheduled right away.
    pub async fn set_dont_stop_the_music(&self, queue_id: Uuid, enabled: bool) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        slot.queue.dont_stop_the_music_enabled = enabled;
        self.signal_update(slot, false);
        let arm_now = enabled
            && !slot.queue.enqueued_media_items.is_empty()
            && slot
                .queue
                .current_index
                .map(|cur| slot.items.len().saturating_sub(cur) <= 1)
                .unwrap_or(false);
        if arm_now {
            slot.queue.radio_source = slot.queue.enqueued_media_items.iter().cloned().collect();
            self.schedule_radio_refill(queue_id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // play_media and structural mutation
    // ------------------------------------------------------------------

    /// Play media item(s) on the given queue.
    ///
    /// Inputs are resolved into concrete playable items (collections are
    /// expanded), then spliced into the queue according to `option`.
    pub async fn play_media(
        &self,
        queue_id: Uuid,
        media: Vec<PlayMediaInput>,
        option: Option<QueueOption>,
        radio_mode: bool,
        start_item: Option<String>,
    ) -> Result<()> {
        let mut reg = self.inner.lock().await;
        reg.slot(queue_id)?;

        // clear the queue first if it was finished
        {
            let slot = reg.slot_mut(queue_id)?;
            if let Some(cur) = slot.queue.current_index {
                if !slot.items.is_empty() && cur >= slot.items.len() - 1 {
                    slot.queue.current_index = None;
                    slot.items.clear();
                    slot.queue.item_count = 0;
                }
            }
        }

        let mut option = option;
        if option == Some(QueueOption::Replace) {
            self.clear_inner(reg.slot_mut(queue_id)?);
        }
        // a fresh queue request invalidates the radio-seed history
        if !matches!(option, Some(QueueOption::Add) | Some(QueueOption::Next)) {
            reg.slot_mut(queue_id)?.queue.enqueued_media_items.clear();
        }

        let mut media_items: Vec<MediaItem> = Vec::new();
        let mut radio_source: Vec<MediaItem> = Vec::new();
        for input in media {
            let resolved = match input {
                PlayMediaInput::Uri(uri) => self.catalog.resolve_uri(&uri).await,
                PlayMediaInput::Item(item) => Ok(item),
            };
            let media_item = match resolved {
                Ok(item) => item,
                Err(err) => {
                    warn!(%err, "skipping unresolvable media input");
                    continue;
                }
            };
            // remember collection-level requests as future radio seeds
            if media_item.media_type.is_radio_seed() {
                reg.slot_mut(queue_id)?
                    .queue
                    .remember_enqueued_media_item(media_item.clone());
            }
            if option.is_none() {
                let default = self.settings.default_enqueue_option(media_item.media_type);
                if default == QueueOption::Replace {
                    self.clear_inner(reg.slot_mut(queue_id)?);
                }
                option = Some(default);
            }
            if radio_mode {
                radio_source.push(media_item);
            } else {
                match self.resolve_media_items(&media_item, start_item.as_deref()).await {
                    Ok(items) => media_items.extend(items),
                    Err(err) => warn!(uri = %media_item.uri, %err, "skipping media item"),
                }
            }
        }
        let option = option.unwrap_or(QueueOption::Replace);

        // overwrite or append the radio source
        {
            let slot = reg.slot_mut(queue_id)?;
            if matches!(option, QueueOption::Add | QueueOption::Next) {
                slot.queue.radio_source.extend(radio_source);
            } else {
                slot.queue.radio_source = radio_source;
            }
        }
        if radio_mode {
            let seeds = reg.slot(queue_id)?.queue.radio_source.clone();
            media_items = radio::radio_tracks(self.catalog.as_ref(), &seeds, true).await?;
        }

        let queue_items: Vec<QueueItem> = media_items
            .into_iter()
            .filter(|x| x.available)
            .map(|x| QueueItem::from_media_item(queue_id, x))
            .collect();
        if queue_items.is_empty() {
            return Err(Error::MediaNotFound("no playable items found".to_string()));
        }

        let slot = reg.slot_mut(queue_id)?;
        let cur_index = if matches!(slot.queue.state, PlayState::Playing | PlayState::Paused) {
            slot.queue.index_in_buffer.unwrap_or(0)
        } else {
            slot.queue.current_index.unwrap_or(0)
        };
        let insert_at = if slot.items.is_empty() { 0 } else { cur_index + 1 };
        // radio batches arrive pre-interleaved; keep their order
        let shuffle = slot.queue.shuffle_enabled && queue_items.len() > 1 && !radio_mode;
        let item_count = queue_items.len();

        match option {
            QueueOption::Replace => {
                self.load_inner(slot, queue_items, 0, false, false, shuffle);
                self.play_index_inner(&mut reg, queue_id, ItemRef::Index(0), 0, false, false)
                    .await?;
            }
            QueueOption::Next => {
                self.load_inner(slot, queue_items, insert_at, true, true, shuffle);
            }
            QueueOption::ReplaceNext => {
                self.load_inner(slot, queue_items, insert_at, false, true, shuffle);
            }
            QueueOption::Play => {
                self.load_inner(slot, queue_items, insert_at, true, true, shuffle);
                let len = reg.slot(queue_id)?.items.len();
                let target = insert_at.min(len.saturating_sub(1));
                self.play_index_inner(&mut reg, queue_id, ItemRef::Index(target), 0, false, false)
                    .await?;
            }
            QueueOption::Add => {
                let at = if slot.queue.shuffle_enabled {
                    insert_at
                } else {
                    slot.items.len()
                };
                let shuffle_add = slot.queue.shuffle_enabled;
                self.load_inner(slot, queue_items, at, true, true, shuffle_add);
                // edge case: queue was empty and items were only added
                let slot = reg.slot_mut(queue_id)?;
                if slot.queue.current_index.is_none() {
                    slot.queue.current_index = Some(0);
                    slot.queue.current_item = slot.items.get(0).cloned();
                    slot.queue.item_count = item_count;
                    self.signal_update(slot, false);
                }
            }
        }
        Ok(())
    }

    /// Move a queue item up/down the queue.
    ///
    /// - positive `pos_shift`: move down that many positions
    /// - negative: move up
    /// - zero: move to the position right after the current item
    pub async fn move_item(&self, queue_id: Uuid, queue_item_id: Uuid, pos_shift: i64) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        let item_index = slot
            .items
            .index_of(queue_item_id)
            .ok_or_else(|| Error::MediaNotFound(format!("unknown item {queue_item_id}")))?;
        if item_index <= slot.queue.index_in_buffer.unwrap_or(0)
            && slot.queue.index_in_buffer.is_some()
        {
            return Err(Error::InvalidCommand(format!(
                "item at index {item_index} is already played/buffered"
            )));
        }
        let cur = slot.queue.current_index.unwrap_or(0);
        let new_index = if pos_shift == 0 && slot.queue.state == PlayState::Playing {
            cur + 1
        } else if pos_shift == 0 {
            cur
        } else {
            let shifted = item_index as i64 + pos_shift;
            if shifted < 0 {
                return Ok(());
            }
            shifted as usize
        };
        if new_index < cur || new_index > slot.items.len() {
            return Ok(());
        }
        let mut items = slot.items.to_vec();
        let item = items.remove(item_index);
        items.insert(new_index.min(items.len()), item);
        slot.items.update(items);
        slot.queue.item_count = slot.items.len();
        self.signal_update(slot, true);
        Ok(())
    }

    /// Delete an item from the queue. Silently ignored for items already
    /// loaded in the renderer's buffer.
    pub async fn delete_item(&self, queue_id: Uuid, item: ItemRef) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        let item_index = match item {
            ItemRef::Index(index) => index,
            ItemRef::Id(id) => slot
                .items
                .index_of(id)
                .ok_or_else(|| Error::MediaNotFound(format!("unknown item {id}")))?,
        };
        if let Some(buffered) = slot.queue.index_in_buffer {
            if item_index <= buffered {
                // the frontend should guard; this is just in case
                warn!(%queue_id, item_index, "delete requested for item already loaded in buffer");
                return Ok(());
            }
        }
        if item_index >= slot.items.len() {
            return Ok(());
        }
        let mut items = slot.items.to_vec();
        items.remove(item_index);
        slot.items.update(items);
        slot.queue.item_count = slot.items.len();
        self.signal_update(slot, true);
        Ok(())
    }

    /// Clear all items in the queue.
    pub async fn clear(&self, queue_id: Uuid) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        self.clear_inner(slot);
        Ok(())
    }

    pub(crate) fn clear_inner(&self, slot: &mut QueueSlot) {
        slot.queue.radio_source.clear();
        if slot.queue.state != PlayState::Idle {
            let players = Arc::clone(&self.players);
            let queue_id = slot.queue.queue_id;
            tokio::spawn(async move {
                if let Err(err) = players.cmd_stop(queue_id).await {
                    warn!(%queue_id, %err, "stop command failed");
                }
            });
        }
        slot.queue.current_index = None;
        slot.queue.current_item = None;
        slot.queue.next_item = None;
        slot.queue.elapsed_time = 0;
        slot.queue.index_in_buffer = None;
        slot.queue.flow_mode_stream_log.clear();
        slot.items.clear();
        slot.queue.item_count = 0;
        self.signal_update(slot, true);
    }

    // ------------------------------------------------------------------
    // Transport commands
    // ------------------------------------------------------------------

    pub async fn stop(&self, queue_id: Uuid) -> Result<()> {
        {
            let mut reg = self.inner.lock().await;
            if let Ok(slot) = reg.slot_mut(queue_id) {
                if slot.queue.active {
                    slot.queue.resume_pos = slot.queue.corrected_elapsed_time();
                }
            }
        }
        self.players.cmd_stop(queue_id).await
    }

    pub async fn play(&self, queue_id: Uuid) -> Result<()> {
        let paused_and_active = {
            let reg = self.inner.lock().await;
            reg.queues
                .get(&queue_id)
                .map(|slot| slot.queue.active && slot.queue.state == PlayState::Paused)
                .unwrap_or(false)
        };
        if paused_and_active {
            return self.players.cmd_play(queue_id).await;
        }
        self.resume(queue_id, None).await
    }

    pub async fn pause(&self, queue_id: Uuid) -> Result<()> {
        {
            let mut reg = self.inner.lock().await;
            if let Ok(slot) = reg.slot_mut(queue_id) {
                slot.queue.resume_pos = slot.queue.corrected_elapsed_time();
            }
        }
        self.players.cmd_pause(queue_id).await
    }

    pub async fn play_pause(&self, queue_id: Uuid) -> Result<()> {
        let playing = {
            let reg = self.inner.lock().await;
            reg.queues
                .get(&queue_id)
                .map(|slot| slot.queue.state == PlayState::Playing)
                .unwrap_or(false)
        };
        if playing {
            self.pause(queue_id).await
        } else {
            self.play(queue_id).await
        }
    }

    /// Skip to the next playable item, stepping over items whose stream
    /// details cannot be resolved.
    pub async fn next(&self, queue_id: Uuid) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot(queue_id)?;
        if !slot.queue.active {
            return Ok(());
        }
        let repeat = slot.queue.repeat_mode;
        let len = slot.items.len();
        let mut idx = slot.queue.current_index;
        for _ in 0..=len {
            let Some(target) = next_index(repeat, len, idx, true, true) else {
                return Ok(());
            };
            match self
                .play_index_inner(&mut reg, queue_id, ItemRef::Index(target), 0, false, true)
                .await
            {
                Ok(()) => return Ok(()),
                Err(Error::MediaNotFound(_)) => {
                    warn!(%queue_id, index = target, "failed to fetch next track - trying next item");
                    idx = Some(idx.map(|i| i + 1).unwrap_or(target));
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::QueueEmpty(
            "no more playable tracks left in the queue".to_string(),
        ))
    }

    pub async fn previous(&self, queue_id: Uuid) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot(queue_id)?;
        if !slot.queue.active {
            return Ok(());
        }
        let Some(current_index) = slot.queue.current_index else {
            return Ok(());
        };
        let target = current_index.saturating_sub(1);
        self.play_index_inner(&mut reg, queue_id, ItemRef::Index(target), 0, false, true)
            .await
    }

    /// Skip within the current track by `seconds` (negative skips back).
    pub async fn skip(&self, queue_id: Uuid, seconds: i64) -> Result<()> {
        let elapsed = {
            let reg = self.inner.lock().await;
            let slot = reg.slot(queue_id)?;
            if !slot.queue.active {
                return Ok(());
            }
            slot.queue.elapsed_time as i64
        };
        self.seek(queue_id, (elapsed + seconds).max(0) as u64).await
    }

    /// Seek to an absolute position (seconds) in the current item.
    pub async fn seek(&self, queue_id: Uuid, position: u64) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot(queue_id)?;
        let Some(current_item) = slot.queue.current_item.as_ref() else {
            return Err(Error::InvalidCommand(format!(
                "queue {} has no item(s) loaded",
                slot.queue.display_name
            )));
        };
        let Some(duration) = current_item.duration else {
            return Err(Error::InvalidCommand(
                "can not seek items without duration".to_string(),
            ));
        };
        if position > duration {
            return Err(Error::InvalidCommand(
                "can not seek outside of duration range".to_string(),
            ));
        }
        let Some(index) = slot.queue.current_index else {
            return Ok(());
        };
        self.play_index_inner(&mut reg, queue_id, ItemRef::Index(index), position, false, false)
            .await
    }

    /// Resume playback from the last known position.
    pub async fn resume(&self, queue_id: Uuid, fade_in: Option<bool>) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot(queue_id)?;
        let queue = &slot.queue;
        let mut resume_item = queue.current_item.clone();
        let mut resume_pos = if queue.state == PlayState::Playing {
            queue.corrected_elapsed_time()
        } else if queue.resume_pos > 0 {
            queue.resume_pos
        } else {
            queue.elapsed_time
        };

        if resume_item.is_none() && !slot.items.is_empty() {
            let index = queue.current_index.unwrap_or(0);
            resume_item = slot.items.get(index).cloned();
            resume_pos = 0;
        }

        let Some(resume_item) = resume_item else {
            return Err(Error::QueueEmpty(format!(
                "resume requested but queue {} is empty",
                queue.display_name
            )));
        };
        // tiny resume offsets are noise; start at the top
        if resume_pos <= 10 {
            resume_pos = 0;
        }
        let fade_in = fade_in.unwrap_or(queue.state == PlayState::Idle && resume_pos > 0);
        if resume_item.media_type() == MediaType::Radio {
            // seeking into live radio is pointless
            resume_pos = 0;
        }
        self.play_index_inner(
            &mut reg,
            queue_id,
            ItemRef::Id(resume_item.queue_item_id),
            resume_pos,
            fade_in,
            false,
        )
        .await
    }

    /// Play the item at the given index (or item id).
    pub async fn play_index(
        &self,
        queue_id: Uuid,
        item: ItemRef,
        seek_position: u64,
        fade_in: bool,
        debounce: bool,
    ) -> Result<()> {
        let mut reg = self.inner.lock().await;
        self.play_index_inner(&mut reg, queue_id, item, seek_position, fade_in, debounce)
            .await
    }

    pub(crate) async fn play_index_inner(
        &self,
        reg: &mut Registry,
        queue_id: Uuid,
        item: ItemRef,
        seek_position: u64,
        fade_in: bool,
        debounce: bool,
    ) -> Result<()> {
        let slot = reg.slot_mut(queue_id)?;
        slot.queue.resume_pos = 0;
        let index = match item {
            ItemRef::Index(index) => index,
            ItemRef::Id(id) => slot
                .items
                .index_of(id)
                .ok_or_else(|| Error::MediaNotFound(format!("unknown item {id}")))?,
        };
        let queue_item = slot
            .items
            .get(index)
            .cloned()
            .ok_or_else(|| Error::MediaNotFound(format!("unknown index {index}")))?;

        slot.queue.current_index = Some(index);
        slot.queue.index_in_buffer = Some(index);
        slot.queue.flow_mode_stream_log.clear();
        // no point in flow mode for live radio
        slot.queue.flow_mode =
            self.settings.flow_mode_enabled && queue_item.media_type() != MediaType::Radio;
        slot.queue.current_item = Some(queue_item.clone());
        let flow_mode = slot.queue.flow_mode;

        // inferred seek from the persisted resume point of the media item
        let mut seek_position = seek_position;
        if seek_position == 0 {
            if let Some(resume_ms) = queue_item
                .media_item
                .as_ref()
                .and_then(|m| m.resume_position_ms)
            {
                seek_position = resume_ms.saturating_sub(500) / 1000;
            }
        }

        // resolve stream details now to catch unavailable items early; also
        // pre-resolves the loudness hint against the following item
        let following = next_index(
            slot.queue.repeat_mode,
            slot.items.len(),
            Some(index),
            false,
            false,
        );
        self.load_item_details(
            reg,
            queue_id,
            queue_item.queue_item_id,
            following,
            true,
            seek_position,
            fade_in,
        )
        .await?;

        let slot = reg.slot_mut(queue_id)?;
        slot.queue.transition = TransitionState::Transitioning;
        let media = self.player_media_from_item(&queue_item, flow_mode);
        let delay = if debounce {
            self.settings.play_debounce()
        } else {
            self.settings.play_dispatch_delay()
        };
        // debounced: rapid next/previous presses collapse into the last call
        let ctrl = self.clone();
        self.scheduler.call_later(
            format!("play_media_{queue_id}"),
            delay,
            async move {
                ctrl.dispatch_play(queue_id, media).await;
            },
        );
        self.signal_update(slot, false);
        Ok(())
    }

    /// Deferred transport dispatch for `play_index`.
    async fn dispatch_play(&self, queue_id: Uuid, media: PlayerMedia) {
        if let Err(err) = self.players.play_media(queue_id, media).await {
            warn!(%queue_id, %err, "play_media dispatch failed");
        }
        tokio::time::sleep(self.settings.transition_settle()).await;
        let mut reg = self.inner.lock().await;
        if let Ok(slot) = reg.slot_mut(queue_id) {
            slot.queue.transition = TransitionState::Stable;
        }
    }

    /// Transfer queue configuration and items to another queue.
    pub async fn transfer_queue(
        &self,
        source_queue_id: Uuid,
        target_queue_id: Uuid,
        auto_play: Option<bool>,
    ) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let source = reg.slot(source_queue_id)?;
        let auto_play = auto_play.unwrap_or(source.queue.state == PlayState::Playing);
        let source_items = source.items.to_vec();
        let src = source.queue.clone();
        reg.slot(target_queue_id)?;

        {
            let target = reg.slot_mut(target_queue_id)?;
            target.queue.repeat_mode = src.repeat_mode;
            target.queue.shuffle_enabled = src.shuffle_enabled;
            target.queue.dont_stop_the_music_enabled = src.dont_stop_the_music_enabled;
            target.queue.radio_source = src.radio_source.clone();
            target.queue.enqueued_media_items = src.enqueued_media_items.clone();
            target.queue.resume_pos = src.elapsed_time;
            target.queue.current_index = src.current_index;
            if let Some(mut item) = src.current_item.clone() {
                item.queue_id = target_queue_id;
                target.queue.current_item = Some(item);
            }
        }
        self.clear_inner(reg.slot_mut(source_queue_id)?);

        let target = reg.slot_mut(target_queue_id)?;
        let mut items = source_items;
        for item in &mut items {
            item.queue_id = target_queue_id;
        }
        self.load_inner(target, items, 0, false, false, false);
        if auto_play {
            drop(reg);
            self.resume(target_queue_id, None).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Renderer-facing loading
    // ------------------------------------------------------------------

    /// Pre-fetch the next item and its stream details for the renderer or
    /// the flow assembler. Skips unplayable items; `QueueEmpty` when no
    /// playable item remains.
    pub async fn load_next_item(&self, queue_id: Uuid, current_item_id: Uuid) -> Result<QueueItem> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot(queue_id)?;
        let repeat = slot.queue.repeat_mode;
        let len = slot.items.len();
        let Some(cur_index) = slot.items.index_of(current_item_id) else {
            return Err(Error::QueueEmpty("no more tracks left in the queue".to_string()));
        };
        let mut offset = 0usize;
        for _ in 0..=len {
            let Some(idx) = next_index(repeat, len, Some(cur_index + offset), false, true) else {
                return Err(Error::QueueEmpty("no more tracks left in the queue".to_string()));
            };
            let Some(candidate) = reg.slot(queue_id)?.items.get(idx).cloned() else {
                return Err(Error::QueueEmpty("no more tracks left in the queue".to_string()));
            };
            let following = next_index(repeat, len, Some(idx), false, false);
            match self
                .load_item_details(&mut reg, queue_id, candidate.queue_item_id, following, false, 0, false)
                .await
            {
                Ok(()) => {
                    let item = reg
                        .slot(queue_id)?
                        .items
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| Error::Internal(format!("item at {idx} vanished")))?;
                    return Ok(item);
                }
                Err(Error::MediaNotFound(_)) => {
                    info!(%queue_id, uri = ?candidate.uri(), "skipping unplayable item");
                    offset += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::QueueEmpty(
            "no more (playable) tracks left in the queue".to_string(),
        ))
    }

    /// Called when a renderer has (started) loading a track in its buffer.
    pub async fn track_loaded_in_buffer(&self, queue_id: Uuid, item_id: Uuid) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        slot.queue.index_in_buffer = slot.items.index_of(item_id);
        debug!(%queue_id, %item_id, "item loaded in renderer buffer");
        self.signal_update(slot, false);
        if slot.queue.flow_mode {
            return Ok(());
        }
        // enqueue the next track on the player; retried once because some
        // renderers don't accept the next track while still buffering
        let (first, second) = self.settings.enqueue_retry_secs;
        let ctrl = self.clone();
        self.scheduler.call_later(
            format!("enqueue_next_item_{queue_id}"),
            std::time::Duration::from_secs(first),
            async move {
                ctrl.enqueue_next_attempt(queue_id, item_id).await;
                tokio::time::sleep(std::time::Duration::from_secs(second.saturating_sub(first)))
                    .await;
                ctrl.enqueue_next_attempt(queue_id, item_id).await;
            },
        );
        Ok(())
    }

    async fn enqueue_next_attempt(&self, queue_id: Uuid, current_item_id: Uuid) {
        let next_item = match self.load_next_item(queue_id, current_item_id).await {
            Ok(item) => item,
            Err(Error::QueueEmpty(_)) => return,
            Err(err) => {
                warn!(%queue_id, %err, "failed to load next item for enqueue");
                return;
            }
        };
        let media = self.player_media_from_item(&next_item, false);
        if let Err(err) = self.players.enqueue_next(queue_id, media).await {
            warn!(%queue_id, %err, "enqueue_next failed");
        } else {
            debug!(%queue_id, item = %next_item.name, "enqueued next track on player");
        }
    }

    // ------------------------------------------------------------------
    // Radio fill
    // ------------------------------------------------------------------

    pub(crate) fn schedule_radio_refill(&self, queue_id: Uuid) {
        let ctrl = self.clone();
        self.scheduler.call_later(
            format!("fill_radio_tracks_{queue_id}"),
            self.settings.radio_refill_delay(),
            async move {
                if let Err(err) = ctrl.fill_radio_tracks(queue_id).await {
                    warn!(%queue_id, %err, "radio refill failed");
                }
            },
        );
    }

    /// Fill the queue with additional radio tracks.
    pub async fn fill_radio_tracks(&self, queue_id: Uuid) -> Result<()> {
        debug!(%queue_id, "filling radio tracks");
        let seeds = {
            let reg = self.inner.lock().await;
            reg.slot(queue_id)?.queue.radio_source.clone()
        };
        let tracks = radio::radio_tracks(self.catalog.as_ref(), &seeds, false).await?;
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        let queue_items: Vec<QueueItem> = tracks
            .into_iter()
            .filter(|x| x.available)
            .map(|x| QueueItem::from_media_item(queue_id, x))
            .collect();
        let at = slot.items.len();
        self.load_inner(slot, queue_items, at, true, true, false);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Splice items into the slot's store and signal the change.
    pub(crate) fn load_inner(
        &self,
        slot: &mut QueueSlot,
        items: Vec<QueueItem>,
        insert_at: usize,
        keep_remaining: bool,
        keep_played: bool,
        shuffle: bool,
    ) {
        slot.items
            .replace(items, insert_at, keep_remaining, keep_played, shuffle);
        slot.queue.item_count = slot.items.len();
        self.signal_update(slot, true);
    }

    /// Resolve stream details for one item and attach them in the store.
    pub(crate) async fn load_item_details(
        &self,
        reg: &mut Registry,
        queue_id: Uuid,
        item_id: Uuid,
        following_index: Option<usize>,
        is_start: bool,
        seek_position: u64,
        fade_in: bool,
    ) -> Result<()> {
        let (item_clone, prefer_album_loudness) = {
            let slot = reg.slot(queue_id)?;
            let item = slot
                .items
                .get_by_id(item_id)
                .ok_or_else(|| Error::MediaNotFound(format!("unknown item {item_id}")))?;
            let album = item.media_item.as_ref().and_then(|m| m.album_id.as_deref());
            let next_album = following_index
                .and_then(|i| slot.items.get(i))
                .and_then(|x| x.media_item.as_ref())
                .and_then(|m| m.album_id.as_deref());
            let prefer = album.is_some() && album == next_album;
            (item.clone(), prefer)
        };
        let mut details = self
            .streams
            .resolve(&item_clone, seek_position, fade_in, prefer_album_loudness)
            .await?;
        if self.settings.crossfade_enabled {
            // stripping silence at the track edges makes for much smoother
            // crossfades; the session start keeps its leading silence
            details.strip_silence_end = true;
            details.strip_silence_begin = !is_start;
        }
        let slot = reg.slot_mut(queue_id)?;
        if let Some(item) = slot.items.get_by_id_mut(item_id) {
            item.streamdetails = Some(details.clone());
        }
        if let Some(current) = slot.queue.current_item.as_mut() {
            if current.queue_item_id == item_id {
                current.streamdetails = Some(details);
            }
        }
        Ok(())
    }

    /// Opaque, time-stamped stream url for a queue item.
    pub fn resolve_stream_url(&self, queue_item: &QueueItem, flow_mode: bool) -> String {
        let kind = if flow_mode { "flow" } else { "single" };
        format!(
            "{}/stream/{}/{}/{}.pcm?ts={}",
            self.base_url,
            kind,
            queue_item.queue_id,
            queue_item.queue_item_id,
            Utc::now().timestamp()
        )
    }

    pub(crate) fn player_media_from_item(&self, item: &QueueItem, flow_mode: bool) -> PlayerMedia {
        PlayerMedia {
            uri: self.resolve_stream_url(item, flow_mode),
            title: if flow_mode {
                "Ensemble".to_string()
            } else {
                item.name.clone()
            },
            duration: item.duration,
            queue_id: item.queue_id,
            queue_item_id: Some(item.queue_item_id),
            flow_mode,
        }
    }

    /// Expand a media item into the concrete playable items to enqueue.
    async fn resolve_media_items(
        &self,
        media_item: &MediaItem,
        start_item: Option<&str>,
    ) -> Result<Vec<MediaItem>> {
        match media_item.media_type {
            MediaType::Playlist | MediaType::Artist | MediaType::Album | MediaType::Podcast => {
                self.spawn_mark_played(media_item.clone());
                self.catalog.collection_tracks(media_item, start_item).await
            }
            MediaType::Audiobook => {
                let (fully_played, resume_ms) = self.catalog.resume_position(media_item).await?;
                let mut item = media_item.clone();
                item.resume_position_ms = if fully_played { None } else { Some(resume_ms) };
                Ok(vec![item])
            }
            MediaType::PodcastEpisode => {
                let (fully_played, resume_ms) = self.catalog.resume_position(media_item).await?;
                let mut item = media_item.clone();
                item.fully_played = fully_played;
                item.resume_position_ms = if fully_played { None } else { Some(resume_ms) };
                Ok(vec![item])
            }
            // single track or radio item
            MediaType::Track | MediaType::Radio => Ok(vec![media_item.clone()]),
        }
    }

    fn spawn_mark_played(&self, item: MediaItem) {
        let catalog = Arc::clone(&self.catalog);
        tokio::spawn(async move {
            if let Err(err) = catalog.mark_item_played(&item, false, 0).await {
                debug!(uri = %item.uri, %err, "mark_item_played failed");
            }
        });
    }

    /// Emit update events and persist queue (+ item) snapshots.
    pub(crate) fn signal_update(&self, slot: &mut QueueSlot, items_changed: bool) {
        let queue_id = slot.queue.queue_id;
        if items_changed {
            self.events.emit(EnsembleEvent::QueueItemsUpdated {
                queue_id,
                item_count: slot.items.len(),
                timestamp: Utc::now(),
            });
            let store = self.state_store.clone();
            let items = slot.items.to_vec();
            tokio::spawn(async move {
                if let Err(err) = store.save_items(queue_id, &items).await {
                    warn!(%queue_id, %err, "failed to persist queue items");
                }
            });
        }
        self.events.emit(EnsembleEvent::QueueUpdated {
            queue_id,
            timestamp: Utc::now(),
        });
        let store = self.state_store.clone();
        let queue = slot.queue.clone();
        tokio::spawn(async move {
            if let Err(err) = store.save_queue(&queue).await {
                warn!(queue_id = %queue.queue_id, %err, "failed to persist queue state");
            }
        });
    }

    /// Next playable item after `cur_index`, for display purposes.
    pub(crate) fn peek_next_item(&self, slot: &QueueSlot, cur_index: Option<usize>) -> Option<QueueItem> {
        next_item(&slot.items, slot.queue.repeat_mode, cur_index).cloned()
    }

    // ------------------------------------------------------------------
    // Flow session bookkeeping (called by the stream assembler)
    // ------------------------------------------------------------------

    /// Fetch the session's start item, resolving stream details when the
    /// renderer fetched the stream url before `play_index` finished loading.
    pub async fn flow_start_item(&self, queue_id: Uuid, item_id: Uuid) -> Result<QueueItem> {
        {
            let mut reg = self.inner.lock().await;
            reg.slot_mut(queue_id)?.queue.flow_mode = true;
        }
        self.prepare_stream_item(queue_id, item_id).await
    }

    /// Ensure an item has resolved stream details and return it.
    pub async fn prepare_stream_item(&self, queue_id: Uuid, item_id: Uuid) -> Result<QueueItem> {
        let mut reg = self.inner.lock().await;
        let needs_details = {
            let slot = reg.slot(queue_id)?;
            let item = slot
                .items
                .get_by_id(item_id)
                .ok_or_else(|| Error::MediaNotFound(format!("unknown item {item_id}")))?;
            item.streamdetails.is_none()
        };
        if needs_details {
            let slot = reg.slot(queue_id)?;
            let idx = slot.items.index_of(item_id);
            let following = idx.and_then(|i| {
                next_index(slot.queue.repeat_mode, slot.items.len(), Some(i), false, false)
            });
            self.load_item_details(&mut reg, queue_id, item_id, following, true, 0, false)
                .await?;
        }
        let item = reg
            .slot(queue_id)?
            .items
            .get_by_id(item_id)
            .cloned()
            .ok_or_else(|| Error::MediaNotFound(format!("unknown item {item_id}")))?;
        Ok(item)
    }

    /// Append a play-log entry for an item entering the flow stream.
    pub async fn begin_flow_log_entry(&self, queue_id: Uuid, item_id: Uuid) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        slot.queue
            .flow_mode_stream_log
            .push(PlayLogEntry::new(item_id));
        Ok(())
    }

    /// Record the PCM seconds actually emitted for an item and correct its
    /// stream details so the play-log walk stays accurate.
    pub async fn finish_flow_log_entry(
        &self,
        queue_id: Uuid,
        item_id: Uuid,
        seconds_streamed: f64,
    ) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        let seek_position = slot
            .items
            .get_by_id(item_id)
            .and_then(|x| x.streamdetails.as_ref())
            .map(|d| d.seek_position)
            .unwrap_or(0);
        let duration = seek_position as f64 + seconds_streamed;
        if let Some(entry) = slot
            .queue
            .flow_mode_stream_log
            .iter_mut()
            .rev()
            .find(|e| e.queue_item_id == item_id)
        {
            entry.seconds_streamed = Some(seconds_streamed);
            entry.duration = Some(duration);
        }
        if let Some(details) = slot
            .items
            .get_by_id_mut(item_id)
            .and_then(|x| x.streamdetails.as_mut())
        {
            details.seconds_streamed = Some(seconds_streamed);
            details.duration = Some(duration);
        }
        Ok(())
    }

    /// Extend an item's log entry after its withheld fade-out tail was
    /// flushed at the end of the session.
    pub async fn extend_flow_log_entry(
        &self,
        queue_id: Uuid,
        item_id: Uuid,
        extra_seconds: f64,
    ) -> Result<()> {
        let mut reg = self.inner.lock().await;
        let slot = reg.slot_mut(queue_id)?;
        if let Some(entry) = slot
            .queue
            .flow_mode_stream_log
            .iter_mut()
            .rev()
            .find(|e| e.queue_item_id == item_id)
        {
            entry.seconds_streamed = Some(entry.seconds_streamed.unwrap_or(0.0) + extra_seconds);
            entry.duration = Some(entry.duration.unwrap_or(0.0) + extra_seconds);
        }
        if let Some(details) = slot
            .items
            .get_by_id_mut(item_id)
            .and_then(|x| x.streamdetails.as_mut())
        {
            details.seconds_streamed = Some(details.seconds_streamed.unwrap_or(0.0) + extra_seconds);
            details.duration = Some(details.duration.unwrap_or(0.0) + extra_seconds);
        }
        Ok(())
    }

    /// Record a mid-stream error on an item; the flow session moves on.
    pub async fn mark_stream_error(&self, queue_id: Uuid, item_id: Uuid) {
        let mut reg = self.inner.lock().await;
        if let Ok(slot) = reg.slot_mut(queue_id) {
            if let Some(details) = slot
                .items
                .get_by_id_mut(item_id)
                .and_then(|x| x.streamdetails.as_mut())
            {
                details.stream_error = true;
            }
        }
    }
}
