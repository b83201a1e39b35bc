//! Filesystem-backed collaborators
//!
//! The simplest provider set that makes the server usable standalone:
//! `file://` uris resolve to audio files under a music root, directories act
//! as playlists, and streams are served straight from disk. Real deployments
//! wire richer catalog and transcoding collaborators instead; the traits are
//! the contract, this module is the reference implementation.

use std::path::{Path, PathBuf};

use async_stream::try_stream;
use async_trait::async_trait;
use ensemble_common::{Error, MediaItem, MediaType, PcmFormat, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;
use uuid::Uuid;

use crate::queue::types::{QueueItem, StreamDetails};

use super::{Catalog, PcmStream, PlayerMedia, PlayerTransport, StreamResolver};

const URI_SCHEME: &str = "file://";
const READ_CHUNK_SIZE: usize = 64 * 1024;

fn relative_path(uri: &str) -> Result<&Path> {
    let rel = uri
        .strip_prefix(URI_SCHEME)
        .ok_or_else(|| Error::MediaNotFound(format!("unsupported uri {uri}")))?;
    let path = Path::new(rel);
    // keep lookups inside the music root
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(Error::MediaNotFound(format!("invalid uri {uri}")));
    }
    Ok(path)
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Catalog over a directory tree of raw PCM files
pub struct FsCatalog {
    root: PathBuf,
    pcm_format: PcmFormat,
}

impl FsCatalog {
    pub fn new(root: PathBuf, pcm_format: PcmFormat) -> Self {
        Self { root, pcm_format }
    }

    async fn item_for(&self, uri: &str, full: &Path) -> Result<MediaItem> {
        let meta = tokio::fs::metadata(full)
            .await
            .map_err(|_| Error::MediaNotFound(format!("no such media {uri}")))?;
        if meta.is_dir() {
            return Ok(MediaItem {
                uri: uri.to_string(),
                item_id: uri.to_string(),
                provider: "filesystem".to_string(),
                name: display_name(full),
                media_type: MediaType::Playlist,
                available: true,
                duration: None,
                album_id: None,
                resume_position_ms: None,
                fully_played: false,
            });
        }
        // raw PCM: duration follows from the file size
        let duration = meta.len() / self.pcm_format.bytes_per_second() as u64;
        let mut item = MediaItem::track(uri, display_name(full), duration);
        item.album_id = full
            .parent()
            .map(|p| p.to_string_lossy().to_string());
        Ok(item)
    }
}

#[async_trait]
impl Catalog for FsCatalog {
    async fn resolve_uri(&self, uri: &str) -> Result<MediaItem> {
        let rel = relative_path(uri)?;
        self.item_for(uri, &self.root.join(rel)).await
    }

    async fn collection_tracks(
        &self,
        collection: &MediaItem,
        start_item: Option<&str>,
    ) -> Result<Vec<MediaItem>> {
        let rel = relative_path(&collection.uri)?;
        let dir = self.root.join(rel);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| Error::MediaNotFound(format!("no such collection {}", collection.uri)))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        let mut tracks = Vec::with_capacity(paths.len());
        for path in paths {
            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy();
            let uri = format!("{URI_SCHEME}{rel}");
            tracks.push(self.item_for(&uri, &path).await?);
        }
        // cursor: playback starts from the requested item
        if let Some(start) = start_item {
            if let Some(pos) = tracks.iter().position(|t| t.uri == start) {
                tracks.drain(..pos);
            }
        }
        Ok(tracks)
    }

    async fn similar_tracks(&self, _track: &MediaItem, _allow_lookup: bool) -> Result<Vec<MediaItem>> {
        Ok(Vec::new())
    }

    async fn radio_base_tracks(&self, _seed: &MediaItem) -> Result<Vec<MediaItem>> {
        Err(Error::UnsupportedFeature(
            "filesystem catalog has no similarity data".to_string(),
        ))
    }

    async fn resume_position(&self, _item: &MediaItem) -> Result<(bool, u64)> {
        Ok((false, 0))
    }

    async fn mark_item_played(
        &self,
        item: &MediaItem,
        fully_played: bool,
        seconds_played: u64,
    ) -> Result<()> {
        debug!(uri = %item.uri, fully_played, seconds_played, "playback progress");
        Ok(())
    }
}

/// Streams raw PCM files from disk
pub struct FsStreamResolver {
    root: PathBuf,
}

impl FsStreamResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl StreamResolver for FsStreamResolver {
    async fn resolve(
        &self,
        queue_item: &QueueItem,
        seek_position: u64,
        fade_in: bool,
        _prefer_album_loudness: bool,
    ) -> Result<StreamDetails> {
        let uri = queue_item
            .uri()
            .ok_or_else(|| Error::MediaNotFound("item without media".to_string()))?;
        let rel = relative_path(uri)?;
        let full = self.root.join(rel);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|_| Error::MediaNotFound(format!("no such media {uri}")))?;
        let mut details = StreamDetails::new(full.to_string_lossy());
        details.seek_position = seek_position;
        details.fade_in = fade_in;
        details.duration =
            Some(meta.len() as f64 / details.audio_format.bytes_per_second() as f64);
        Ok(details)
    }

    async fn open(&self, details: &StreamDetails, pcm_format: PcmFormat) -> Result<PcmStream> {
        let mut file = tokio::fs::File::open(&details.uri)
            .await
            .map_err(|_| Error::MediaNotFound(format!("no such media {}", details.uri)))?;
        let offset = details.seek_position * pcm_format.bytes_per_second() as u64;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        Ok(Box::pin(try_stream! {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield buf[..n].to_vec();
            }
        }))
    }
}

/// Transport for renderers that pull their own streams
///
/// Pull-based renderers fetch the stream url themselves and report state
/// through the player-update endpoint, so dispatch is just bookkeeping.
pub struct PullTransport;

#[async_trait]
impl PlayerTransport for PullTransport {
    async fn play_media(&self, player_id: Uuid, media: PlayerMedia) -> Result<()> {
        debug!(%player_id, uri = %media.uri, flow = media.flow_mode, "play_media dispatched");
        Ok(())
    }

    async fn enqueue_next(&self, player_id: Uuid, media: PlayerMedia) -> Result<()> {
        debug!(%player_id, uri = %media.uri, "next track announced");
        Ok(())
    }

    async fn cmd_stop(&self, player_id: Uuid) -> Result<()> {
        debug!(%player_id, "stop dispatched");
        Ok(())
    }

    async fn cmd_play(&self, player_id: Uuid) -> Result<()> {
        debug!(%player_id, "play dispatched");
        Ok(())
    }

    async fn cmd_pause(&self, player_id: Uuid) -> Result<()> {
        debug!(%player_id, "pause dispatched");
        Ok(())
    }
}
