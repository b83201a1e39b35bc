//! Continuous flow stream assembly
//!
//! A flow session renders an entire queue as one endless PCM stream. Track
//! boundaries are stitched with a crossfade: the tail of every finished
//! track is withheld and mixed into the head of the next one. Because the
//! renderer only sees one stream, the controller's play log records how
//! many PCM seconds each item actually contributed so the reconciler can
//! map the renderer's total elapsed time back onto queue items.

use async_stream::try_stream;
use ensemble_common::{Error, PcmFormat, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::providers::PcmStream;
use crate::queue::QueueController;

use super::crossfade::crossfade_pcm_parts;

/// Assemble the flow stream for a queue, starting at the given item.
pub fn flow_stream(
    ctrl: QueueController,
    queue_id: Uuid,
    start_item_id: Uuid,
    pcm_format: PcmFormat,
) -> PcmStream {
    Box::pin(try_stream! {
        let use_crossfade = ctrl.settings().crossfade_enabled;
        let bytes_per_second = pcm_format.bytes_per_second() as usize;
        let crossfade_size =
            bytes_per_second * ctrl.settings().crossfade_duration_secs as usize;
        // always keep enough buffered to have the fade-out tail in hand
        // when the track ends
        let buffer_threshold = if use_crossfade {
            crossfade_size
        } else {
            bytes_per_second * 2
        };

        info!(%queue_id, crossfade = use_crossfade, "flow stream session started");
        let mut current = ctrl.flow_start_item(queue_id, start_item_id).await?;
        let mut last_fadeout_part: Vec<u8> = Vec::new();

        loop {
            let item_id = current.queue_item_id;
            let details = current
                .streamdetails
                .clone()
                .ok_or_else(|| Error::Internal(format!("item {item_id} has no stream details")))?;
            debug!(%queue_id, item = %current.name, "flow stream track start");
            ctrl.begin_flow_log_entry(queue_id, item_id).await?;

            let mut bytes_written: usize = 0;
            let mut stream_failed = false;
            let mut buffer: Vec<u8> = Vec::new();
            match ctrl.streams.open(&details, pcm_format).await {
                Ok(mut source) => {
                    while let Some(chunk) = source.next().await {
                        let chunk = match chunk {
                            Ok(chunk) => chunk,
                            Err(err) => {
                                warn!(%queue_id, item = %current.name, %err, "stream error, moving on");
                                ctrl.mark_stream_error(queue_id, item_id).await;
                                stream_failed = true;
                                break;
                            }
                        };
                        buffer.extend_from_slice(&chunk);
                        if !last_fadeout_part.is_empty() {
                            // buffering the head of the new track for the crossfade
                            if buffer.len() >= crossfade_size {
                                let remainder = buffer.split_off(crossfade_size);
                                let mixed = crossfade_pcm_parts(
                                    &buffer,
                                    &last_fadeout_part,
                                    pcm_format,
                                );
                                last_fadeout_part.clear();
                                bytes_written += mixed.len();
                                yield mixed;
                                buffer = remainder;
                            }
                        } else if buffer.len() > buffer_threshold {
                            let keep = buffer.split_off(buffer.len() - buffer_threshold);
                            bytes_written += buffer.len();
                            yield std::mem::replace(&mut buffer, keep);
                        }
                    }
                }
                Err(err) => {
                    warn!(%queue_id, item = %current.name, %err, "failed to open stream, skipping item");
                    ctrl.mark_stream_error(queue_id, item_id).await;
                    stream_failed = true;
                }
            }

            // a short track may end before its crossfade buffer filled up
            if !last_fadeout_part.is_empty() && !buffer.is_empty() {
                buffer = crossfade_pcm_parts(&buffer, &last_fadeout_part, pcm_format);
                last_fadeout_part.clear();
            }
            // withhold the fade-out tail for the next track
            if use_crossfade && !stream_failed && !buffer.is_empty() {
                let tail_start = buffer.len().saturating_sub(crossfade_size);
                last_fadeout_part = buffer.split_off(tail_start);
            }
            if !buffer.is_empty() {
                bytes_written += buffer.len();
                yield std::mem::take(&mut buffer);
            }

            let seconds_streamed = bytes_written as f64 / bytes_per_second as f64;
            ctrl.finish_flow_log_entry(queue_id, item_id, seconds_streamed)
                .await?;
            debug!(
                %queue_id,
                item = %current.name,
                seconds_streamed,
                "flow stream track finished"
            );

            match ctrl.load_next_item(queue_id, item_id).await {
                Ok(next) => current = next,
                Err(Error::QueueEmpty(_)) => {
                    // no crossfade partner left: flush the withheld tail and
                    // credit it back to its track
                    if !last_fadeout_part.is_empty() {
                        let tail_seconds =
                            last_fadeout_part.len() as f64 / bytes_per_second as f64;
                        ctrl.extend_flow_log_entry(queue_id, item_id, tail_seconds)
                            .await?;
                        yield std::mem::take(&mut last_fadeout_part);
                    }
                    break;
                }
                Err(err) => Err(err)?,
            }
        }
        info!(%queue_id, "flow stream session ended");
    })
}

/// Stream a single queue item (non-flow rendering).
///
/// Seconds actually emitted are written back to the item's stream details
/// so resume points and duration corrections stay accurate.
pub fn single_item_stream(
    ctrl: QueueController,
    queue_id: Uuid,
    item_id: Uuid,
    pcm_format: PcmFormat,
) -> PcmStream {
    Box::pin(try_stream! {
        let item = ctrl.prepare_stream_item(queue_id, item_id).await?;
        let details = item
            .streamdetails
            .clone()
            .ok_or_else(|| Error::Internal(format!("item {item_id} has no stream details")))?;
        let bytes_per_second = pcm_format.bytes_per_second() as usize;
        let mut source = ctrl.streams.open(&details, pcm_format).await?;
        let mut bytes_written: usize = 0;
        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(chunk) => {
                    bytes_written += chunk.len();
                    yield chunk;
                }
                Err(err) => {
                    warn!(%queue_id, %item_id, %err, "stream error");
                    ctrl.mark_stream_error(queue_id, item_id).await;
                    break;
                }
            }
        }
        let seconds_streamed = bytes_written as f64 / bytes_per_second as f64;
        ctrl.finish_flow_log_entry(queue_id, item_id, seconds_streamed)
            .await?;
    })
}
