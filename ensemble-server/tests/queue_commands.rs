//! End-to-end queue command tests against mock collaborators.

mod common;

use std::time::Duration;

use common::Harness;
use ensemble_common::MediaType;
use ensemble_server::config::QueueSettings;
use ensemble_server::queue::controller::{ItemRef, PlayMediaInput};
use ensemble_server::queue::types::{PlayState, QueueOption, RepeatMode};

fn uris(items: &[ensemble_server::queue::types::QueueItem]) -> Vec<String> {
    items.iter().map(|x| x.uri().unwrap().to_string()).collect()
}

async fn settle() {
    // let debounced dispatches and spawned persistence tasks run
    tokio::time::sleep(Duration::from_secs(3)).await;
}

/// Build the harness on the real clock, then pause it.
///
/// The state store's sqlite connection is established on a blocking thread;
/// under a paused clock the runtime auto-advances past the pool's acquire
/// timeout while that connect is still in flight. Pausing after the pool
/// holds its connection keeps later acquires instant and timer-free.
async fn paused_harness(settings: QueueSettings) -> Harness {
    let h = Harness::new(settings).await;
    tokio::time::pause();
    h
}

#[tokio::test]
async fn test_play_album_replaces_queue_and_starts_playback() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..4 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &[
            "library://track/0",
            "library://track/1",
            "library://track/2",
            "library://track/3",
        ],
    );

    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.item_count, 4);
    assert_eq!(queue.current_index, Some(0));

    let items = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(uris(&items)[0], "library://track/0");

    // exactly one play dispatch, for the first track
    let plays = h.transport.plays.lock().unwrap();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].0, h.queue_id);
    assert!(plays[0].1.uri.contains("/stream/"));
}

#[tokio::test]
async fn test_collection_start_item_cursor() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..3 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://playlist/1",
        &["library://track/0", "library://track/1", "library://track/2"],
    );

    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://playlist/1".to_string())],
            None,
            false,
            Some("library://track/1".to_string()),
        )
        .await
        .unwrap();
    settle().await;

    let items = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(
        uris(&items),
        vec!["library://track/1", "library://track/2"]
    );
}

#[tokio::test]
async fn test_track_default_option_plays_inserted_item() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..3 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &["library://track/0", "library://track/1"],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    // single track without an option defaults to Play: inserted after the
    // current item and played immediately
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://track/2".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    let items = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(
        uris(&items),
        vec!["library://track/0", "library://track/2", "library://track/1"]
    );
    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.current_index, Some(1));
    assert_eq!(h.transport.plays.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_play_media_nothing_playable_errors() {
    let h = paused_harness(QueueSettings::default()).await;
    let err = h
        .controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://track/missing".to_string())],
            Some(QueueOption::Add),
            false,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ensemble_common::Error::MediaNotFound(_)));
}

#[tokio::test]
async fn test_enqueue_next_keeps_remainder() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..5 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &["library://track/0", "library://track/1", "library://track/2"],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://track/4".to_string())],
            Some(QueueOption::Next),
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    let items = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(
        uris(&items),
        vec![
            "library://track/0",
            "library://track/4",
            "library://track/1",
            "library://track/2",
        ]
    );
}

#[tokio::test]
async fn test_shuffle_and_unshuffle_restore_order() {
    let h = paused_harness(QueueSettings::default()).await;
    let track_uris: Vec<String> = (0..10).map(|i| format!("library://track/{i}")).collect();
    for uri in &track_uris {
        h.add_track(uri, 180);
    }
    let refs: Vec<&str> = track_uris.iter().map(|s| s.as_str()).collect();
    h.add_collection("library://album/1", &refs);
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    h.controller.set_shuffle(h.queue_id, true).await.unwrap();
    let shuffled = h.controller.get_items(h.queue_id, 100, 0).await;
    // the current item stays put
    assert_eq!(shuffled[0].uri().unwrap(), "library://track/0");

    h.controller.set_shuffle(h.queue_id, false).await.unwrap();
    let restored = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(uris(&restored), track_uris);
}

#[tokio::test]
async fn test_next_skips_unresolvable_item() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..3 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &["library://track/0", "library://track/1", "library://track/2"],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    // mark the queue active so transport commands are accepted
    h.controller
        .on_player_update(ensemble_server::providers::PlayerSnapshot {
            player_id: h.queue_id,
            state: PlayState::Playing,
            elapsed_time: 5,
            active_source: Some(h.queue_id),
            current_media: Some(ensemble_server::providers::PlayerMediaRef {
                queue_id: Some(h.queue_id),
                queue_item_id: h
                    .controller
                    .get_item(h.queue_id, ItemRef::Index(0))
                    .await
                    .map(|x| x.queue_item_id),
                uri: None,
            }),
            output_formats: vec![],
        })
        .await
        .unwrap();

    // track 1 cannot be resolved; next() lands on track 2
    h.streams
        .fail_resolve
        .lock()
        .unwrap()
        .insert("library://track/1".to_string());
    h.controller.next(h.queue_id).await.unwrap();
    settle().await;

    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.current_index, Some(2));
}

#[tokio::test]
async fn test_rapid_next_presses_collapse_to_one_dispatch() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..5 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &[
            "library://track/0",
            "library://track/1",
            "library://track/2",
            "library://track/3",
            "library://track/4",
        ],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;
    h.transport.plays.lock().unwrap().clear();

    h.controller
        .on_player_update(ensemble_server::providers::PlayerSnapshot {
            player_id: h.queue_id,
            state: PlayState::Playing,
            elapsed_time: 5,
            active_source: Some(h.queue_id),
            current_media: Some(ensemble_server::providers::PlayerMediaRef {
                queue_id: Some(h.queue_id),
                queue_item_id: h
                    .controller
                    .get_item(h.queue_id, ItemRef::Index(0))
                    .await
                    .map(|x| x.queue_item_id),
                uri: None,
            }),
            output_formats: vec![],
        })
        .await
        .unwrap();

    // three rapid presses within the debounce window
    h.controller.next(h.queue_id).await.unwrap();
    h.controller.next(h.queue_id).await.unwrap();
    h.controller.next(h.queue_id).await.unwrap();
    settle().await;

    // only the last target was dispatched to the player
    let plays = h.transport.plays.lock().unwrap();
    assert_eq!(plays.len(), 1);
    let queue_after = plays[0].1.queue_item_id;
    drop(plays);
    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.current_index, Some(3));
    assert_eq!(
        queue_after,
        queue.current_item.map(|x| x.queue_item_id)
    );
}

#[tokio::test]
async fn test_audiobook_resume_position_becomes_seek() {
    let h = paused_harness(QueueSettings::default()).await;
    let mut book = h.add_track("library://audiobook/1", 7200);
    book.media_type = MediaType::Audiobook;
    book.resume_position_ms = Some(90_500);
    h.catalog
        .items
        .lock()
        .unwrap()
        .insert(book.uri.clone(), book);

    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://audiobook/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    let item = h
        .controller
        .get_item(h.queue_id, ItemRef::Index(0))
        .await
        .unwrap();
    let details = item.streamdetails.unwrap();
    // (90500 - 500) / 1000 = 90 seconds
    assert_eq!(details.seek_position, 90);
}

#[tokio::test]
async fn test_move_and_delete_respect_buffer_guard() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..4 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &[
            "library://track/0",
            "library://track/1",
            "library://track/2",
            "library://track/3",
        ],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    // deleting the buffered current item is silently ignored
    let current = h
        .controller
        .get_item(h.queue_id, ItemRef::Index(0))
        .await
        .unwrap();
    h.controller
        .delete_item(h.queue_id, ItemRef::Id(current.queue_item_id))
        .await
        .unwrap();
    assert_eq!(h.controller.get_items(h.queue_id, 100, 0).await.len(), 4);

    // moving an upcoming item works
    let third = h
        .controller
        .get_item(h.queue_id, ItemRef::Index(2))
        .await
        .unwrap();
    h.controller
        .move_item(h.queue_id, third.queue_item_id, 1)
        .await
        .unwrap();
    let items = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(items[3].queue_item_id, third.queue_item_id);

    // deleting an upcoming item works
    h.controller
        .delete_item(h.queue_id, ItemRef::Index(1))
        .await
        .unwrap();
    assert_eq!(h.controller.get_items(h.queue_id, 100, 0).await.len(), 3);
}

#[tokio::test]
async fn test_transfer_queue_moves_items_and_settings() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..3 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &["library://track/0", "library://track/1", "library://track/2"],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    h.controller
        .set_repeat(h.queue_id, RepeatMode::All)
        .await
        .unwrap();
    settle().await;

    let target_id = uuid::Uuid::new_v4();
    h.controller
        .register_player(target_id, "Kitchen")
        .await
        .unwrap();
    h.controller
        .transfer_queue(h.queue_id, target_id, Some(false))
        .await
        .unwrap();
    settle().await;

    let source = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(source.item_count, 0);
    let target = h.controller.get_queue(target_id).await.unwrap();
    assert_eq!(target.item_count, 3);
    assert_eq!(target.repeat_mode, RepeatMode::All);
    let items = h.controller.get_items(target_id, 100, 0).await;
    assert!(items.iter().all(|x| x.queue_id == target_id));
}

#[tokio::test]
async fn test_radio_mode_fills_queue_from_seeds() {
    let h = paused_harness(QueueSettings::default()).await;
    h.add_track("library://track/seed0", 180);
    h.add_track("library://track/seed1", 180);
    {
        let mut similar = h.catalog.similar.lock().unwrap();
        for i in 0..30 {
            let item = ensemble_common::MediaItem::track(
                format!("library://track/similar{i}"),
                format!("similar {i}"),
                200,
            );
            similar.push(item);
        }
    }
    for i in 0..30 {
        h.streams
            .seconds
            .lock()
            .unwrap()
            .insert(format!("library://track/similar{i}"), 200);
    }

    h.controller
        .play_media(
            h.queue_id,
            vec![
                PlayMediaInput::Uri("library://track/seed0".to_string()),
                PlayMediaInput::Uri("library://track/seed1".to_string()),
            ],
            None,
            true,
            None,
        )
        .await
        .unwrap();
    settle().await;

    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.radio_source.len(), 2);
    // base tracks plus a batch of dynamic tracks
    assert!(queue.item_count > 2, "radio fill produced {}", queue.item_count);
}

#[tokio::test]
async fn test_restart_restores_persisted_queue() {
    let h = paused_harness(QueueSettings::default()).await;
    for i in 0..3 {
        h.add_track(&format!("library://track/{i}"), 180);
    }
    h.add_collection(
        "library://album/1",
        &["library://track/0", "library://track/1", "library://track/2"],
    );
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://album/1".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    h.controller
        .set_repeat(h.queue_id, RepeatMode::All)
        .await
        .unwrap();
    settle().await;

    // simulate a restart: drop the queue, re-register with the same store
    h.controller
        .register_player(h.queue_id, "Living room")
        .await
        .unwrap();
    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.repeat_mode, RepeatMode::All);
    assert_eq!(queue.item_count, 3);
    assert_eq!(queue.state, PlayState::Idle);
    let items = h.controller.get_items(h.queue_id, 100, 0).await;
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn test_stop_records_resume_position() {
    let h = paused_harness(QueueSettings::default()).await;
    h.add_track("library://track/0", 180);
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://track/0".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    h.controller
        .on_player_update(ensemble_server::providers::PlayerSnapshot {
            player_id: h.queue_id,
            state: PlayState::Playing,
            elapsed_time: 42,
            active_source: Some(h.queue_id),
            current_media: Some(ensemble_server::providers::PlayerMediaRef {
                queue_id: Some(h.queue_id),
                queue_item_id: h
                    .controller
                    .get_item(h.queue_id, ItemRef::Index(0))
                    .await
                    .map(|x| x.queue_item_id),
                uri: None,
            }),
            output_formats: vec![],
        })
        .await
        .unwrap();

    h.controller.stop(h.queue_id).await.unwrap();
    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert!(queue.resume_pos >= 42);
    assert_eq!(h.transport.stops.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_end_of_queue_grace_clears_items() {
    let h = paused_harness(QueueSettings::default()).await;
    h.add_track("library://track/0", 180);
    h.controller
        .play_media(
            h.queue_id,
            vec![PlayMediaInput::Uri("library://track/0".to_string())],
            None,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    let item_id = h
        .controller
        .get_item(h.queue_id, ItemRef::Index(0))
        .await
        .map(|x| x.queue_item_id);
    let snapshot = |state, elapsed| ensemble_server::providers::PlayerSnapshot {
        player_id: h.queue_id,
        state,
        elapsed_time: elapsed,
        active_source: Some(h.queue_id),
        current_media: Some(ensemble_server::providers::PlayerMediaRef {
            queue_id: Some(h.queue_id),
            queue_item_id: item_id,
            uri: None,
        }),
        output_formats: vec![],
    };
    h.controller
        .on_player_update(snapshot(PlayState::Playing, 170))
        .await
        .unwrap();
    // the last track ran out and the renderer went idle
    h.controller
        .on_player_update(snapshot(PlayState::Idle, 180))
        .await
        .unwrap();

    // stays idle through the grace period: the queue is cleared outright
    tokio::time::sleep(Duration::from_secs(6)).await;
    let queue = h.controller.get_queue(h.queue_id).await.unwrap();
    assert_eq!(queue.item_count, 0);
    assert!(queue.current_index.is_none());
    assert!(queue.current_item.is_none());
    assert!(h.controller.get_items(h.queue_id, 100, 0).await.is_empty());
}
