// Integration tests for the conversation session orchestrator
//
// Every termination path must finalize the session row exactly once,
// release the transport and leave the orchestrator ready for a new start.

mod common;

use anyhow::Result;
use chrono::Duration;
use common::{eventually, ConversationHarness};
use luna_practice::conversation::{
    ConnectionStatus, ConversationConfig, EndReason, EnvironmentSignal, VerificationState,
};
use luna_practice::records::RecordStore;
use luna_practice::transport::{
    MediaHandle, ParticipantInfo, QualityLayer, SendPreset, TrackInfo, TrackKind, TrackState,
    TransportEvent,
};
use luna_practice::{Clock, PracticeError};
use std::sync::atomic::Ordering;

fn remote(session_id: &str) -> ParticipantInfo {
    ParticipantInfo {
        session_id: session_id.to_string(),
        user_name: "Luna".to_string(),
        local: false,
    }
}

fn track(kind: TrackKind, media_id: &str) -> TrackInfo {
    TrackInfo {
        kind,
        state: TrackState::Playable,
        media: Some(MediaHandle {
            id: media_id.to_string(),
        }),
    }
}

/// Events are applied in order; once the marker participant shows up,
/// everything emitted before it has been handled
async fn flush(h: &ConversationHarness, marker: &str) -> Result<()> {
    h.transport
        .emit(TransportEvent::ParticipantJoined {
            participant: remote(marker),
        })
        .await?;

    let session = h.session.clone();
    let marker = marker.to_string();
    eventually("marker participant", || {
        let session = session.clone();
        let marker = marker.clone();
        async move {
            session
                .snapshot()
                .await
                .participants
                .iter()
                .any(|p| p.session_id == marker)
        }
    })
    .await;
    Ok(())
}

async fn assert_finalized_once(h: &ConversationHarness, record_id: &str, minutes: u32) -> Result<()> {
    let record = h.store.get_session(record_id).await?.expect("record exists");
    assert_eq!(record.duration_minutes, minutes);
    assert_eq!(record.completed_at, h.clock.now());
    assert!(record.completed_at > common::at(2024, 1, 1, 10, 0));
    assert_eq!(h.store.updates(), 1, "Record should be finalized exactly once");

    let snapshot = h.session.snapshot().await;
    assert!(snapshot.room_url.is_none());
    assert!(snapshot.conversation_id.is_none());
    assert!(snapshot.record_id.is_none());
    assert!(!h.transport.is_subscribed());
    Ok(())
}

#[tokio::test]
async fn test_connect_creates_placeholder_record() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());

    let record_id = h.connect().await?;

    // Verify: The row exists from the moment the session began
    let record = h.store.get_session(&record_id).await?.expect("record exists");
    assert_eq!(record.duration_minutes, 0);
    assert_eq!(record.score, 0);
    assert_eq!(record.language, "es");
    assert_eq!(record.completed_at, common::at(2024, 1, 1, 10, 0));

    let snapshot = h.session.snapshot().await;
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.conversation_id.as_deref(), Some("conv-1"));
    assert!(snapshot
        .room_url
        .as_deref()
        .unwrap_or_default()
        .contains("luna-coffee-shop-user-1-"));
    assert_eq!(h.transport.joins.load(Ordering::SeqCst), 1);

    // Initial quality is applied on join
    assert_eq!(
        h.transport.receive_layers.lock().unwrap().last(),
        Some(&QualityLayer::High)
    );
    assert_eq!(
        h.transport.send_presets.lock().unwrap().last(),
        Some(&SendPreset::H720)
    );
    Ok(())
}

#[tokio::test]
async fn test_finalize_is_idempotent() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let record_id = h.connect().await?;
    h.clock.advance(Duration::minutes(3));

    let first = h.session.stop().await;
    let second = h.session.stop().await;
    let third = h.session.finalize(EndReason::RemoteLeft).await;

    let outcome = first.expect("first finalize does the work");
    assert_eq!(outcome.record_id.as_deref(), Some(record_id.as_str()));
    assert_eq!(outcome.duration_minutes, Some(3));
    assert!(second.is_none());
    assert!(third.is_none());

    assert_finalized_once(&h, &record_id, 3).await?;
    assert_eq!(h.provisioner.ended(), vec!["conv-1".to_string()]);
    assert_eq!(h.transport.leaves.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.status().await, ConnectionStatus::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_every_lifecycle_signal_finalizes_exactly_once() -> Result<()> {
    let signals = [
        EnvironmentSignal::PageUnload,
        EnvironmentSignal::VisibilityHidden,
        EnvironmentSignal::HistoryNavigation,
        EnvironmentSignal::Teardown,
    ];

    for signal in signals {
        let h = ConversationHarness::new(ConversationConfig::default());
        let record_id = h.connect().await?;
        h.clock.advance(Duration::minutes(7));

        let outcome = h.session.signal(signal).await;
        assert!(outcome.is_some(), "{:?} should finalize", signal);

        // Any later trigger finds nothing to do
        assert!(h.session.stop().await.is_none());
        assert!(h.session.teardown().await.is_none());

        assert_finalized_once(&h, &record_id, 7).await?;

        if signal == EnvironmentSignal::PageUnload {
            assert!(
                h.provisioner.ended().is_empty(),
                "A closing page leaves the remote conversation to time out"
            );
        } else {
            assert_eq!(h.provisioner.ended(), vec!["conv-1".to_string()]);
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_remote_left_finalizes() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let record_id = h.connect().await?;
    h.clock.advance(Duration::minutes(2));

    h.transport.emit(TransportEvent::Left).await?;

    let session = h.session.clone();
    eventually("session disconnected", || {
        let session = session.clone();
        async move { session.status().await == ConnectionStatus::Disconnected }
    })
    .await;

    // A late end-call click is a no-op
    assert!(h.session.stop().await.is_none());
    assert_finalized_once(&h, &record_id, 2).await?;
    Ok(())
}

#[tokio::test]
async fn test_transport_error_after_join_finalizes_and_fails() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let record_id = h.connect().await?;
    h.clock.advance(Duration::minutes(4));

    h.transport
        .emit(TransportEvent::Error {
            message: "ice failed".to_string(),
        })
        .await?;

    let session = h.session.clone();
    eventually("session failed", || {
        let session = session.clone();
        async move { session.status().await == ConnectionStatus::Failed }
    })
    .await;

    assert_finalized_once(&h, &record_id, 4).await?;

    let snapshot = h.session.snapshot().await;
    let message = snapshot.error.expect("user-facing error");
    assert!(!message.contains("ice failed"), "Raw transport errors stay out of the UI");
    Ok(())
}

#[tokio::test]
async fn test_ten_second_session_records_one_minute() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let record_id = h.connect().await?;
    h.clock.advance(Duration::seconds(10));

    let outcome = h.session.stop().await.expect("finalized");

    assert_eq!(outcome.duration_minutes, Some(1));
    assert_finalized_once(&h, &record_id, 1).await?;
    Ok(())
}

#[tokio::test]
async fn test_finalize_updates_progress() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;
    h.clock.advance(Duration::minutes(5));
    h.session.stop().await;

    let progress = h
        .store
        .get_progress(common::USER_ID)
        .await?
        .expect("progress row created");
    assert_eq!(progress.streak_days, 1);
    assert_eq!(progress.speaking_time_minutes, 5);
    Ok(())
}

#[tokio::test]
async fn test_provisioning_failure_leaves_no_record() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.provisioner.fail.store(true, Ordering::SeqCst);

    let result = h.session.start("business-meeting", "fr").await;

    assert!(matches!(result, Err(PracticeError::Provisioning(_))));
    assert_eq!(h.session.status().await, ConnectionStatus::Failed);
    assert!(h.session.snapshot().await.error.is_some());
    assert_eq!(h.transport.joins.load(Ordering::SeqCst), 0);
    assert!(h.store.list_sessions(common::USER_ID).await?.is_empty());

    // Finalize after a failed attempt has nothing to do
    assert!(h.session.stop().await.is_none());

    // Retry works once the service recovers
    h.provisioner.fail.store(false, Ordering::SeqCst);
    h.connect().await?;
    Ok(())
}

#[tokio::test]
async fn test_join_failure_ends_remote_conversation() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.transport.fail_join.store(true, Ordering::SeqCst);

    let result = h.session.start("airport", "de").await;

    assert!(matches!(result, Err(PracticeError::Connection(_))));
    assert_eq!(h.session.status().await, ConnectionStatus::Failed);
    assert_eq!(h.provisioner.ended(), vec!["conv-1".to_string()]);
    assert!(!h.transport.is_subscribed());
    assert!(h.store.list_sessions(common::USER_ID).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_scenario_is_rejected_before_provisioning() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());

    let scenario = h.session.start("space-station", "en").await;
    let language = h.session.start("coffee-shop", "tlh").await;

    assert!(matches!(scenario, Err(PracticeError::InvalidState(_))));
    assert!(matches!(language, Err(PracticeError::InvalidState(_))));
    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.status().await, ConnectionStatus::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_start_while_connected_is_rejected() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;

    let result = h.session.start("dating", "it").await;

    assert!(matches!(result, Err(PracticeError::InvalidState(_))));
    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_late_provisioning_result_is_discarded() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let gate = h.provisioner.hold();

    // Setup: start is stuck waiting on the provisioning service
    let session = h.session.clone();
    let start = tokio::spawn(async move { session.start("shopping", "pt").await });

    let session = h.session.clone();
    eventually("connecting", || {
        let session = session.clone();
        async move { session.status().await == ConnectionStatus::Connecting }
    })
    .await;

    // The user navigates away before the room exists
    h.session.signal(EnvironmentSignal::HistoryNavigation).await;
    gate.notify_one();

    let result = start.await?;

    // Verify: The orphaned conversation is ended and nothing is joined
    assert!(matches!(result, Err(PracticeError::Cancelled(_))));
    assert_eq!(h.provisioner.ended(), vec!["conv-1".to_string()]);
    assert_eq!(h.transport.joins.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.status().await, ConnectionStatus::Disconnected);
    assert!(h.store.list_sessions(common::USER_ID).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_start_still_connects_after_caller_goes_away() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let gate = h.provisioner.hold();

    // Setup: The start request is abandoned while provisioning
    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        h.session.start("coffee-shop", "es"),
    )
    .await;
    assert!(abandoned.is_err(), "Provisioning should still be held");
    assert_eq!(h.session.status().await, ConnectionStatus::Connecting);

    gate.notify_one();

    // Verify: The attempt carries on and joins the room
    let transport = h.transport.clone();
    eventually("room joined", || {
        let transport = transport.clone();
        async move { transport.joins.load(Ordering::SeqCst) == 1 }
    })
    .await;
    assert_eq!(
        h.session.snapshot().await.conversation_id.as_deref(),
        Some("conv-1")
    );

    h.transport
        .emit(TransportEvent::Joined {
            local_session_id: "local".to_string(),
        })
        .await?;
    let session = h.session.clone();
    eventually("connected", || {
        let session = session.clone();
        async move { session.status().await == ConnectionStatus::Connected }
    })
    .await;

    assert!(h.session.stop().await.is_some());
    assert_eq!(h.provisioner.ended(), vec!["conv-1".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_start_then_stop_ends_late_room() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let gate = h.provisioner.hold();

    // Setup: The start request is abandoned, then the user ends the call
    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        h.session.start("coffee-shop", "es"),
    )
    .await;
    assert!(abandoned.is_err());
    h.session.stop().await;
    assert_eq!(h.session.status().await, ConnectionStatus::Disconnected);

    gate.notify_one();

    // Verify: The room that arrives late is ended, never joined
    let provisioner = h.provisioner.clone();
    eventually("late room ended", || {
        let provisioner = provisioner.clone();
        async move { provisioner.ended() == vec!["conv-1".to_string()] }
    })
    .await;
    assert_eq!(h.transport.joins.load(Ordering::SeqCst), 0);

    // Verify: Nothing is left behind to block the next start
    gate.notify_one();
    h.session.start("coffee-shop", "es").await?;
    assert_eq!(h.transport.joins.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.status().await, ConnectionStatus::Connecting);
    Ok(())
}

#[tokio::test]
async fn test_hidden_tab_kept_alive_when_configured() -> Result<()> {
    let config = ConversationConfig {
        end_on_hidden: false,
        ..ConversationConfig::default()
    };
    let h = ConversationHarness::new(config);
    let record_id = h.connect().await?;

    let outcome = h.session.signal(EnvironmentSignal::VisibilityHidden).await;

    assert!(outcome.is_none());
    assert_eq!(h.session.status().await, ConnectionStatus::Connected);
    assert_eq!(h.store.updates(), 0);

    // Other signals still end it
    h.clock.advance(Duration::minutes(1));
    assert!(h.session.signal(EnvironmentSignal::PageUnload).await.is_some());
    assert_finalized_once(&h, &record_id, 1).await?;
    Ok(())
}

#[tokio::test]
async fn test_repeated_events_are_idempotent() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;

    let luna = remote("luna");
    for _ in 0..2 {
        h.transport
            .emit(TransportEvent::ParticipantJoined {
                participant: luna.clone(),
            })
            .await?;
        h.transport
            .emit(TransportEvent::TrackStarted {
                participant: luna.clone(),
                track: track(TrackKind::Audio, "luna-audio"),
            })
            .await?;
        h.transport
            .emit(TransportEvent::TrackStarted {
                participant: luna.clone(),
                track: track(TrackKind::Video, "luna-video"),
            })
            .await?;
    }
    // Repeated joined is ignored too
    h.transport
        .emit(TransportEvent::Joined {
            local_session_id: "local".to_string(),
        })
        .await?;
    flush(&h, "marker").await?;

    assert_eq!(h.transport.attached_count(), 2);
    assert_eq!(h.store.creates.load(Ordering::SeqCst), 1);

    let snapshot = h.session.snapshot().await;
    assert_eq!(snapshot.audio.remote_audio_tracks, 1);
    assert_eq!(
        snapshot
            .participants
            .iter()
            .filter(|p| p.session_id == "luna")
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_tracks_attach_only_when_playable_with_media() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;

    let me = ParticipantInfo {
        session_id: "local".to_string(),
        user_name: "Ana".to_string(),
        local: true,
    };
    let luna = remote("luna");

    // Own microphone is never played back
    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: me.clone(),
            track: track(TrackKind::Audio, "my-audio"),
        })
        .await?;
    // Not yet playable
    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: luna.clone(),
            track: TrackInfo {
                kind: TrackKind::Audio,
                state: TrackState::Blocked,
                media: Some(MediaHandle {
                    id: "luna-audio".to_string(),
                }),
            },
        })
        .await?;
    // No media handle yet
    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: luna.clone(),
            track: TrackInfo {
                kind: TrackKind::Video,
                state: TrackState::Loading,
                media: None,
            },
        })
        .await?;
    flush(&h, "marker-1").await?;
    assert_eq!(h.transport.attached_count(), 0);

    let snapshot = h.session.snapshot().await;
    assert!(snapshot.audio.is_silent());

    // The same track later becomes playable
    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: luna.clone(),
            track: track(TrackKind::Audio, "luna-audio"),
        })
        .await?;
    flush(&h, "marker-2").await?;
    assert_eq!(h.transport.attached_count(), 1);
    assert!(!h.session.snapshot().await.audio.is_silent());
    Ok(())
}

#[tokio::test]
async fn test_autoplay_block_uses_fallback_and_is_released() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;
    h.transport.block_autoplay_once("luna-audio");

    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: remote("luna"),
            track: track(TrackKind::Audio, "luna-audio"),
        })
        .await?;
    flush(&h, "marker").await?;

    // Verify: Fallback started and the retry attached the audio
    assert_eq!(h.transport.fallbacks_created.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.active_fallbacks(), 1);
    assert_eq!(h.transport.attached_count(), 1);
    assert!(h.session.snapshot().await.audio.fallback_active);

    h.session.stop().await;

    assert_eq!(h.transport.active_fallbacks(), 0, "Fallback sinks are released on finalize");
    Ok(())
}

#[tokio::test]
async fn test_reported_autoplay_block_starts_one_fallback() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;
    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: remote("luna"),
            track: track(TrackKind::Audio, "luna-audio"),
        })
        .await?;

    // Video and our own microphone never need a fallback
    let own = ParticipantInfo {
        local: true,
        ..remote("local")
    };
    for (participant, track) in [
        (remote("luna"), track(TrackKind::Video, "luna-video")),
        (own, track(TrackKind::Audio, "local-audio")),
        (remote("luna"), track(TrackKind::Audio, "luna-audio")),
        (remote("luna"), track(TrackKind::Audio, "luna-audio")),
    ] {
        h.transport
            .emit(TransportEvent::AutoplayBlocked { participant, track })
            .await?;
    }
    flush(&h, "marker").await?;

    assert_eq!(h.transport.fallbacks_created.load(Ordering::SeqCst), 1);
    assert!(h.session.snapshot().await.audio.fallback_active);

    h.session.stop().await;
    assert_eq!(h.transport.active_fallbacks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_participant_left_detaches_tracks() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;

    h.transport
        .emit(TransportEvent::TrackStarted {
            participant: remote("luna"),
            track: track(TrackKind::Audio, "luna-audio"),
        })
        .await?;
    h.transport
        .emit(TransportEvent::ParticipantLeft {
            session_id: "luna".to_string(),
        })
        .await?;
    flush(&h, "marker").await?;

    assert_eq!(h.transport.attached_count(), 0);
    let snapshot = h.session.snapshot().await;
    assert!(snapshot.participants.iter().all(|p| p.session_id != "luna"));
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    Ok(())
}

#[tokio::test]
async fn test_quality_verification() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    h.connect().await?;

    // Setup: Requested high, receiving 720p
    h.transport.set_stats(1280, 720);
    h.session.check_quality().await;

    let observed = h.session.snapshot().await.observed;
    assert_eq!(observed.layer, 2);
    assert_eq!(observed.resolution_label, "1280x720");
    assert_eq!(observed.verification, VerificationState::Verified);

    // Changing the request resets verification until the next sample
    h.session.set_quality(QualityLayer::Medium).await?;
    assert_eq!(
        h.session.snapshot().await.observed.verification,
        VerificationState::Pending
    );
    assert_eq!(
        h.transport.send_presets.lock().unwrap().last(),
        Some(&SendPreset::H540)
    );

    h.session.check_quality().await;
    assert_eq!(
        h.session.snapshot().await.observed.verification,
        VerificationState::Mismatch
    );

    h.transport.set_stats(640, 360);
    h.session.check_quality().await;
    assert_eq!(
        h.session.snapshot().await.observed.verification,
        VerificationState::Verified
    );
    Ok(())
}

#[tokio::test]
async fn test_device_controls_require_connection() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());

    assert!(matches!(
        h.session.set_microphone(false).await,
        Err(PracticeError::InvalidState(_))
    ));

    h.connect().await?;
    h.session.set_microphone(false).await?;
    h.session.set_camera(false).await?;
    h.session.set_speaker(false).await?;

    let snapshot = h.session.snapshot().await;
    assert!(!snapshot.local_audio);
    assert!(!snapshot.local_video);
    assert!(!snapshot.speaker);
    Ok(())
}

#[tokio::test]
async fn test_new_session_after_finalize() -> Result<()> {
    let h = ConversationHarness::new(ConversationConfig::default());
    let first = h.connect().await?;
    h.clock.advance(Duration::minutes(2));
    h.session.stop().await;

    // Events from the first attempt's subscription are gone
    assert!(h.transport.emit(TransportEvent::Left).await.is_err());

    let second = h.connect().await?;
    assert_ne!(first, second);
    assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 2);
    assert_eq!(h.session.snapshot().await.conversation_id.as_deref(), Some("conv-2"));
    Ok(())
}
