//! Shared test fixtures: in-memory collaborators and a controller harness.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_stream::try_stream;
use async_trait::async_trait;
use ensemble_common::events::EventBus;
use ensemble_common::{Error, MediaItem, MediaType, PcmFormat, Result};
use uuid::Uuid;

use ensemble_server::config::QueueSettings;
use ensemble_server::db::StateStore;
use ensemble_server::providers::{
    Catalog, PcmStream, PlayerMedia, PlayerTransport, StreamResolver,
};
use ensemble_server::queue::types::{QueueItem, StreamDetails};
use ensemble_server::queue::QueueController;

pub const PCM: PcmFormat = PcmFormat {
    sample_rate: 44100,
    bit_depth: 16,
    channels: 2,
};

#[derive(Default)]
pub struct MockCatalog {
    pub items: Mutex<HashMap<String, MediaItem>>,
    pub collections: Mutex<HashMap<String, Vec<MediaItem>>>,
    pub similar: Mutex<Vec<MediaItem>>,
    pub played: Mutex<Vec<(String, bool, u64)>>,
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn resolve_uri(&self, uri: &str) -> Result<MediaItem> {
        if let Some(item) = self.items.lock().unwrap().get(uri) {
            return Ok(item.clone());
        }
        if self.collections.lock().unwrap().contains_key(uri) {
            let mut item = MediaItem::track(uri, uri, 0);
            item.media_type = MediaType::Playlist;
            item.duration = None;
            return Ok(item);
        }
        Err(Error::MediaNotFound(format!("unknown uri {uri}")))
    }

    async fn collection_tracks(
        &self,
        collection: &MediaItem,
        start_item: Option<&str>,
    ) -> Result<Vec<MediaItem>> {
        let mut tracks = self
            .collections
            .lock()
            .unwrap()
            .get(&collection.uri)
            .cloned()
            .ok_or_else(|| Error::MediaNotFound(format!("unknown collection {}", collection.uri)))?;
        if let Some(start) = start_item {
            if let Some(pos) = tracks.iter().position(|t| t.uri == start) {
                tracks.drain(..pos);
            }
        }
        Ok(tracks)
    }

    async fn similar_tracks(&self, _track: &MediaItem, allow_lookup: bool) -> Result<Vec<MediaItem>> {
        if allow_lookup {
            Ok(self.similar.lock().unwrap().clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn radio_base_tracks(&self, seed: &MediaItem) -> Result<Vec<MediaItem>> {
        if seed.media_type == MediaType::Track {
            Ok(vec![seed.clone()])
        } else {
            Err(Error::UnsupportedFeature("no radio for this seed".into()))
        }
    }

    async fn resume_position(&self, item: &MediaItem) -> Result<(bool, u64)> {
        Ok((item.fully_played, item.resume_position_ms.unwrap_or(0)))
    }

    async fn mark_item_played(
        &self,
        item: &MediaItem,
        fully_played: bool,
        seconds_played: u64,
    ) -> Result<()> {
        self.played
            .lock()
            .unwrap()
            .push((item.uri.clone(), fully_played, seconds_played));
        Ok(())
    }
}

/// Serves `seconds` of silence per uri, in half-second chunks
#[derive(Default)]
pub struct MockStreams {
    pub seconds: Mutex<HashMap<String, u64>>,
    /// uris whose resolve step fails (unplayable item)
    pub fail_resolve: Mutex<HashSet<String>>,
    /// uris whose stream errors halfway through
    pub fail_midway: Mutex<HashSet<String>>,
}

#[async_trait]
impl StreamResolver for MockStreams {
    async fn resolve(
        &self,
        queue_item: &QueueItem,
        seek_position: u64,
        fade_in: bool,
        _prefer_album_loudness: bool,
    ) -> Result<StreamDetails> {
        let uri = queue_item
            .uri()
            .ok_or_else(|| Error::MediaNotFound("item without media".into()))?;
        if self.fail_resolve.lock().unwrap().contains(uri) {
            return Err(Error::MediaNotFound(format!("cannot play {uri}")));
        }
        let seconds = self
            .seconds
            .lock()
            .unwrap()
            .get(uri)
            .copied()
            .ok_or_else(|| Error::MediaNotFound(format!("unknown stream {uri}")))?;
        let mut details = StreamDetails::new(uri);
        details.seek_position = seek_position;
        details.fade_in = fade_in;
        details.duration = Some(seconds as f64);
        Ok(details)
    }

    async fn open(&self, details: &StreamDetails, pcm_format: PcmFormat) -> Result<PcmStream> {
        let seconds = self
            .seconds
            .lock()
            .unwrap()
            .get(&details.uri)
            .copied()
            .ok_or_else(|| Error::MediaNotFound(format!("unknown stream {}", details.uri)))?;
        let fail_midway = self.fail_midway.lock().unwrap().contains(&details.uri);
        let total_bytes =
            (seconds.saturating_sub(details.seek_position)) * pcm_format.bytes_per_second() as u64;
        let chunk_size = pcm_format.bytes_per_second() as usize / 2;
        Ok(Box::pin(try_stream! {
            let mut sent = 0u64;
            while sent < total_bytes {
                if fail_midway && sent >= total_bytes / 2 {
                    Err(Error::Internal("stream broke".to_string()))?;
                }
                let n = chunk_size.min((total_bytes - sent) as usize);
                yield vec![0u8; n];
                sent += n as u64;
            }
        }))
    }
}

#[derive(Default)]
pub struct MockTransport {
    pub plays: Mutex<Vec<(Uuid, PlayerMedia)>>,
    pub enqueues: Mutex<Vec<(Uuid, PlayerMedia)>>,
    pub stops: Mutex<Vec<Uuid>>,
    pub pauses: Mutex<Vec<Uuid>>,
    pub resumes: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl PlayerTransport for MockTransport {
    async fn play_media(&self, player_id: Uuid, media: PlayerMedia) -> Result<()> {
        self.plays.lock().unwrap().push((player_id, media));
        Ok(())
    }

    async fn enqueue_next(&self, player_id: Uuid, media: PlayerMedia) -> Result<()> {
        self.enqueues.lock().unwrap().push((player_id, media));
        Ok(())
    }

    async fn cmd_stop(&self, player_id: Uuid) -> Result<()> {
        self.stops.lock().unwrap().push(player_id);
        Ok(())
    }

    async fn cmd_play(&self, player_id: Uuid) -> Result<()> {
        self.resumes.lock().unwrap().push(player_id);
        Ok(())
    }

    async fn cmd_pause(&self, player_id: Uuid) -> Result<()> {
        self.pauses.lock().unwrap().push(player_id);
        Ok(())
    }
}

pub struct Harness {
    pub controller: QueueController,
    pub catalog: Arc<MockCatalog>,
    pub streams: Arc<MockStreams>,
    pub transport: Arc<MockTransport>,
    pub events: Arc<EventBus>,
    pub queue_id: Uuid,
}

impl Harness {
    pub async fn new(settings: QueueSettings) -> Self {
        let catalog = Arc::new(MockCatalog::default());
        let streams = Arc::new(MockStreams::default());
        let transport = Arc::new(MockTransport::default());
        let events = Arc::new(EventBus::default());
        let state_store = StateStore::in_memory().await.unwrap();
        let controller = QueueController::new(
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            Arc::clone(&streams) as Arc<dyn StreamResolver>,
            Arc::clone(&transport) as Arc<dyn PlayerTransport>,
            state_store,
            Arc::clone(&events),
            settings,
            "http://localhost:8927",
        );
        let queue_id = Uuid::new_v4();
        controller.register_player(queue_id, "Living room").await.unwrap();
        Self {
            controller,
            catalog,
            streams,
            transport,
            events,
            queue_id,
        }
    }

    /// Register a playable track with the catalog and stream mocks
    pub fn add_track(&self, uri: &str, seconds: u64) -> MediaItem {
        let item = MediaItem::track(uri, uri, seconds);
        self.catalog
            .items
            .lock()
            .unwrap()
            .insert(uri.to_string(), item.clone());
        self.streams
            .seconds
            .lock()
            .unwrap()
            .insert(uri.to_string(), seconds);
        item
    }

    /// Register a collection of the given track uris
    pub fn add_collection(&self, uri: &str, track_uris: &[&str]) {
        let tracks: Vec<MediaItem> = track_uris
            .iter()
            .map(|u| self.catalog.items.lock().unwrap().get(*u).cloned().unwrap())
            .collect();
        self.catalog
            .collections
            .lock()
            .unwrap()
            .insert(uri.to_string(), tracks);
    }
}
