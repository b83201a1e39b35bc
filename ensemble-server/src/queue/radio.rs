//! Dynamic radio track selection
//!
//! Expands a queue's radio seeds into a bounded batch of tracks: base tracks
//! come straight from the seeds' owning catalog controllers, dynamic tracks
//! come from similarity lookups on a sample of those base tracks.

use ensemble_common::{Error, MediaItem, Result};
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::providers::Catalog;

/// How many base tracks are sampled as similarity seeds
const BASE_TRACK_SAMPLE_SIZE: usize = 5;

/// Stop collecting similar-track candidates once the pool reaches this size
const DYNAMIC_POOL_TARGET: usize = 50;

/// How many unused dynamic tracks a refill appends
const REFILL_BATCH_SIZE: usize = 25;

/// Tracks longer than this are excluded from radio mode (mixes, DJ sets)
const RADIO_TRACK_MAX_DURATION_SECS: u64 = 20 * 60;

/// Compute the next batch of radio tracks for the given seeds.
///
/// `initial` selects the front-loaded interleave used when radio mode is
/// first activated (pattern B,D,D,B,D,D,...); refills simply append up to 25
/// unused dynamic tracks.
///
/// Fails with `UnsupportedFeature` when no seed yields any base track.
pub async fn radio_tracks(
    catalog: &dyn Catalog,
    radio_source: &[MediaItem],
    initial: bool,
) -> Result<Vec<MediaItem>> {
    if radio_source.is_empty() {
        // races with a delayed refill after the source was cleared
        return Ok(Vec::new());
    }
    info!(
        seeds = %radio_source.iter().map(|x| x.name.as_str()).collect::<Vec<_>>().join(", "),
        "fetching radio tracks"
    );

    // grab all available base tracks, seeds in random order
    let mut seeds: Vec<&MediaItem> = radio_source.iter().collect();
    seeds.shuffle(&mut rand::thread_rng());
    let mut base_pool: Vec<MediaItem> = Vec::new();
    for seed in seeds {
        match catalog.radio_base_tracks(seed).await {
            Ok(tracks) => {
                for track in tracks {
                    if !base_pool.contains(&track) {
                        base_pool.push(track);
                    }
                }
            }
            Err(Error::UnsupportedFeature(reason)) => {
                debug!(uri = %seed.uri, %reason, "skipping radio seed");
            }
            Err(err) => return Err(err),
        }
    }
    if base_pool.is_empty() {
        return Err(Error::UnsupportedFeature(
            "radio mode not available for source items".to_string(),
        ));
    }

    // sample the similarity seeds from the base pool
    let sample_size = BASE_TRACK_SAMPLE_SIZE.min(base_pool.len());
    let base_tracks: Vec<MediaItem> = base_pool
        .choose_multiple(&mut rand::thread_rng(), sample_size)
        .cloned()
        .collect();

    // collect dynamic candidates; first pass avoids remote lookups to keep
    // latency down, second pass allows them if the first found nothing
    let mut dynamic_tracks: Vec<MediaItem> = Vec::new();
    for allow_lookup in [false, true] {
        if !dynamic_tracks.is_empty() {
            break;
        }
        'seeds: for base_track in &base_tracks {
            for track in catalog.similar_tracks(base_track, allow_lookup).await? {
                if base_tracks.contains(&track) || dynamic_tracks.contains(&track) {
                    continue;
                }
                if track.duration.unwrap_or(0) > RADIO_TRACK_MAX_DURATION_SECS {
                    continue;
                }
                dynamic_tracks.push(track);
            }
            if dynamic_tracks.len() >= DYNAMIC_POOL_TARGET {
                break 'seeds;
            }
        }
    }

    let mut queue_tracks: Vec<MediaItem> = Vec::new();
    if initial {
        // front-load a richer mix: first base track, then alternate
        // 1 base + 2 sampled dynamic tracks per remaining base track
        queue_tracks.push(base_tracks[0].clone());
        for base_track in base_tracks.iter().skip(1) {
            queue_tracks.push(base_track.clone());
            let unused: Vec<&MediaItem> = dynamic_tracks
                .iter()
                .filter(|t| !queue_tracks.contains(t))
                .collect();
            queue_tracks.extend(
                unused
                    .choose_multiple(&mut rand::thread_rng(), 2.min(unused.len()))
                    .map(|t| (*t).clone()),
            );
        }
    }

    // append unused dynamic tracks, bounded per refill
    let remaining: Vec<&MediaItem> = dynamic_tracks
        .iter()
        .filter(|t| !queue_tracks.contains(t))
        .collect();
    let take = REFILL_BATCH_SIZE.min(remaining.len());
    queue_tracks.extend(
        remaining
            .choose_multiple(&mut rand::thread_rng(), take)
            .map(|t| (*t).clone()),
    );

    debug!(count = queue_tracks.len(), "radio batch assembled");
    Ok(queue_tracks)
}
