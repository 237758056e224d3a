//! Connection protocol tests: client events in, server events out

mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use std::time::Duration;

use voice_call_config::Settings;
use voice_call_core::{
    CallSettingsUpdate, ChannelSink, ClientEvent, EndReason, PromptKind, ServerEvent,
};
use voice_call_server::websocket::{CallConnection, Flow, NO_SESSION, SETTINGS_UPDATED};
use voice_call_server::TurnStart;

use common::{is_answer, wait_for, Harness, LlmBehavior};

const QUESTION: &str = "How far away is the moon?";
const ANSWER: &str = "About three hundred eighty four thousand kilometers.";

fn audio_event(bytes: &[u8]) -> ClientEvent {
    ClientEvent::AudioData {
        audio_data: BASE64.encode(bytes),
    }
}

#[tokio::test]
async fn test_requests_before_session_start_are_rejected() {
    let h = Harness::new(QUESTION, LlmBehavior::Answer(ANSWER));
    let (sink, mut rx) = ChannelSink::channel(64);
    let mut call = CallConnection::new(h.manager.clone(), Arc::new(sink));

    assert_eq!(call.handle_text("{not json").await, Flow::Continue);
    match rx.recv().await {
        Some(ServerEvent::Error { message, stage }) => {
            assert!(message.starts_with("Invalid message"));
            assert!(stage.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(call.handle_event(ClientEvent::Interrupt).await, Flow::Continue);
    assert_eq!(
        rx.recv().await,
        Some(ServerEvent::error(NO_SESSION, None))
    );

    call.handle_event(audio_event(&[0; 100])).await;
    assert_eq!(
        rx.recv().await,
        Some(ServerEvent::error(NO_SESSION, None))
    );
    assert_eq!(h.manager.count(), 0);
    assert!(call.session().is_none());
}

#[tokio::test]
async fn test_session_protocol_round_trip() {
    let h = Harness::new(QUESTION, LlmBehavior::Answer(ANSWER));
    let (sink, mut rx) = ChannelSink::channel(64);
    let mut call = CallConnection::new(h.manager.clone(), Arc::new(sink));

    let start = r#"{"type":"session_start","settings":{"kid_friendly":true,"language":"en"}}"#;
    assert_eq!(call.handle_text(start).await, Flow::Continue);
    let session_id = match rx.recv().await {
        Some(ServerEvent::SessionStarted { session_id }) => session_id,
        other => panic!("unexpected {:?}", other),
    };
    match rx.recv().await {
        Some(ServerEvent::AiResponse {
            prompt: Some(PromptKind::Greeting),
            ..
        }) => {}
        other => panic!("expected greeting, got {:?}", other),
    }
    let session = call.session().cloned().unwrap();
    assert_eq!(session.id, session_id);
    assert!(session.settings().kid_friendly);

    // Second start on the same connection
    call.handle_text(start).await;
    assert!(matches!(rx.recv().await, Some(ServerEvent::Error { .. })));
    assert_eq!(h.manager.count(), 1);

    call.handle_text(r#"{"type":"ping"}"#).await;
    assert_eq!(rx.recv().await, Some(ServerEvent::Pong));

    call.handle_event(ClientEvent::SettingsUpdate {
        settings: CallSettingsUpdate {
            speed: Some(1.5),
            ..Default::default()
        },
    })
    .await;
    assert_eq!(rx.recv().await, Some(ServerEvent::status(SETTINGS_UPDATED)));
    assert_eq!(session.settings().speed, 1.5);
    assert!(session.settings().kid_friendly);

    // Nothing in flight: no confirmation
    call.handle_event(ClientEvent::Interrupt).await;
    assert!(rx.try_recv().is_err());

    assert_eq!(call.handle_event(ClientEvent::SessionEnd).await, Flow::Close);
    let (before, ended) = wait_for(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, ServerEvent::SessionEnded { .. })
    })
    .await;
    assert!(before.iter().any(|e| matches!(
        e,
        ServerEvent::AiResponse {
            prompt: Some(PromptKind::Farewell),
            ..
        }
    )));
    match ended {
        ServerEvent::SessionEnded { summary } => {
            assert_eq!(summary.end_reason, EndReason::SessionEnd);
            assert_eq!(summary.turns, 0);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(!call.end(EndReason::Disconnected).await);
    assert_eq!(h.store.reasons(), vec![EndReason::SessionEnd]);
    assert_eq!(h.manager.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_short_utterance_flushed_after_pause() {
    let mut settings = Settings::default();
    settings.audio.min_processable_bytes = 500;
    let h = Harness::with_settings(settings, QUESTION, LlmBehavior::Answer(ANSWER));
    let (sink, mut rx) = ChannelSink::channel(64);
    let mut call = CallConnection::new(h.manager.clone(), Arc::new(sink));

    call.handle_event(ClientEvent::SessionStart {
        settings: CallSettingsUpdate::default(),
    })
    .await;
    let session = call.session().cloned().unwrap();

    // Below the buffer's ready threshold, so nothing starts yet
    call.handle_event(audio_event(&[3; 800])).await;
    assert_eq!(session.buffered_bytes(), 800);
    assert!(session.turn_taking().is_user_speaking());

    // No more audio: the first deadline ends the utterance, the second flushes it
    let deadline = call.flush_deadline().unwrap();
    tokio::time::sleep_until(deadline).await;
    assert_eq!(call.on_flush_deadline().await, TurnStart::Waiting);
    assert!(!session.turn_taking().is_user_speaking());

    let deadline = call.flush_deadline().unwrap();
    tokio::time::sleep_until(deadline).await;
    assert_eq!(call.on_flush_deadline().await, TurnStart::Started);
    assert!(call.flush_deadline().is_none());
    assert_eq!(session.buffered_bytes(), 0);

    let (_, transcription) = wait_for(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, ServerEvent::Transcription { .. })
    })
    .await;
    assert_eq!(
        transcription,
        ServerEvent::Transcription {
            text: QUESTION.to_string()
        }
    );
    wait_for(&mut rx, Duration::from_secs(5), is_answer).await;
}

#[tokio::test(start_paused = true)]
async fn test_explicit_stop_flushes_after_pause() {
    let mut settings = Settings::default();
    settings.audio.min_processable_bytes = 500;
    let h = Harness::with_settings(settings, QUESTION, LlmBehavior::Answer(ANSWER));
    let (sink, mut rx) = ChannelSink::channel(64);
    let mut call = CallConnection::new(h.manager.clone(), Arc::new(sink));

    call.handle_event(ClientEvent::SessionStart {
        settings: CallSettingsUpdate::default(),
    })
    .await;
    let session = call.session().cloned().unwrap();

    call.handle_audio(vec![5; 600]).await;
    call.handle_event(ClientEvent::UserStopSpeaking).await;
    assert!(!session.turn_taking().is_user_speaking());

    // Too early: the caller may resume
    assert_eq!(h.manager.flush_after_pause(&session), TurnStart::Waiting);

    let deadline = call.flush_deadline().unwrap();
    tokio::time::sleep_until(deadline).await;
    assert_eq!(call.on_flush_deadline().await, TurnStart::Started);
    wait_for(&mut rx, Duration::from_secs(5), is_answer).await;
}

#[tokio::test(start_paused = true)]
async fn test_utterance_below_minimum_is_not_flushed() {
    let h = Harness::new(QUESTION, LlmBehavior::Answer(ANSWER));
    let (sink, _rx) = ChannelSink::channel(64);
    let mut call = CallConnection::new(h.manager.clone(), Arc::new(sink));

    call.handle_event(ClientEvent::SessionStart {
        settings: CallSettingsUpdate::default(),
    })
    .await;
    let session = call.session().cloned().unwrap();

    call.handle_audio(vec![5; 300]).await;
    call.handle_event(ClientEvent::UserStopSpeaking).await;
    let deadline = call.flush_deadline().unwrap();
    tokio::time::sleep_until(deadline).await;
    assert_eq!(call.on_flush_deadline().await, TurnStart::Insufficient);
    assert_eq!(session.buffered_bytes(), 300);
    assert!(h.llm.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_complete_question_shortens_next_pause() {
    let mut settings = Settings::default();
    settings.audio.min_processable_bytes = 500;
    let h = Harness::with_settings(settings, QUESTION, LlmBehavior::Answer(ANSWER));
    let (sink, mut rx) = ChannelSink::channel(64);
    let mut call = CallConnection::new(h.manager.clone(), Arc::new(sink));

    call.handle_event(ClientEvent::SessionStart {
        settings: CallSettingsUpdate::default(),
    })
    .await;
    let session = call.session().cloned().unwrap();

    call.handle_audio(vec![5; 600]).await;
    call.handle_event(ClientEvent::UserStopSpeaking).await;
    let first = call.flush_deadline().unwrap() - tokio::time::Instant::now();
    assert_eq!(first, Duration::from_millis(2010));
    tokio::time::sleep(first).await;
    assert_eq!(call.on_flush_deadline().await, TurnStart::Started);
    wait_for(&mut rx, Duration::from_secs(5), is_answer).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!session.is_turn_running());

    // The question ended cleanly, so the follow-up is answered sooner
    call.handle_audio(vec![5; 600]).await;
    call.handle_event(ClientEvent::UserStopSpeaking).await;
    let second = call.flush_deadline().unwrap() - tokio::time::Instant::now();
    assert_eq!(second, Duration::from_millis(1210));
    tokio::time::sleep(second).await;
    assert_eq!(call.on_flush_deadline().await, TurnStart::Started);
    wait_for(&mut rx, Duration::from_secs(5), is_answer).await;
    assert_eq!(h.llm.calls().len(), 2);
}
