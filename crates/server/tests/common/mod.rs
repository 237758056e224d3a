//! Mock backends and helpers shared by the server integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use voice_call_config::Settings;
use voice_call_core::{
    AudioFormat, ChatMessage, ConversationMetadata, ConversationStore, EndReason, Error,
    LanguageModelClient, Result, ServerEvent, SpeechRecognizer, SpeechSynthesizer,
    SynthesizedAudio, Transcription, Turn,
};
use voice_call_pipeline::{BackendPool, DeterministicPhrases, InterruptCoordinator, PipelineOrchestrator};
use voice_call_server::{Session, SessionManager, TurnStart};

/// Recognizer replaying a script, repeating its last line once exhausted
pub struct MockRecognizer {
    script: Vec<&'static str>,
    calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn scripted(script: &[&'static str]) -> Self {
        Self {
            script: script.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn recognize(&self, _: &[u8], _: AudioFormat, _: &str) -> Result<Transcription> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .script
            .get(n)
            .or(self.script.last())
            .copied()
            .unwrap_or_default();
        Ok(Transcription::new(text))
    }

    fn name(&self) -> &str {
        "mock-stt"
    }
}

#[derive(Clone, Copy)]
pub enum LlmBehavior {
    Answer(&'static str),
    Hang,
}

/// Language model recording (model, message count, timeout) per call
pub struct MockLlm {
    behavior: LlmBehavior,
    pub calls: Mutex<Vec<(String, usize, Duration)>>,
}

impl MockLlm {
    pub fn new(behavior: LlmBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, usize, Duration)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LanguageModelClient for MockLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        timeout: Duration,
    ) -> Result<String> {
        self.calls
            .lock()
            .push((model.to_string(), messages.len(), timeout));
        match self.behavior {
            LlmBehavior::Answer(text) => Ok(text.to_string()),
            LlmBehavior::Hang => std::future::pending::<Result<String>>().await,
        }
    }

    fn name(&self) -> &str {
        "mock-llm"
    }
}

pub struct MockTts;

#[async_trait]
impl SpeechSynthesizer for MockTts {
    async fn synthesize(&self, text: &str, _: &str, _: &str, _: f32) -> Result<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(Error::Synthesis("nothing to say".to_string()));
        }
        Ok(SynthesizedAudio {
            bytes: vec![42; 64],
            format: AudioFormat::Raw,
        })
    }

    fn name(&self) -> &str {
        "mock-tts"
    }
}

/// Store counting saves, keeping what each one received
#[derive(Default)]
pub struct RecordingStore {
    pub saves: Mutex<Vec<(String, Vec<Turn>, EndReason)>>,
}

impl RecordingStore {
    pub fn save_count(&self) -> usize {
        self.saves.lock().len()
    }

    pub fn reasons(&self) -> Vec<EndReason> {
        self.saves.lock().iter().map(|(_, _, r)| *r).collect()
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn save(
        &self,
        session_id: &str,
        turns: &[Turn],
        metadata: &ConversationMetadata,
    ) -> Result<()> {
        self.saves
            .lock()
            .push((session_id.to_string(), turns.to_vec(), metadata.end_reason));
        Ok(())
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub llm: Arc<MockLlm>,
    pub store: Arc<RecordingStore>,
}

impl Harness {
    /// One utterance: audio, an explicit stop, then the full pause
    pub async fn say(&self, session: &Arc<Session>, bytes: usize) -> TurnStart {
        let buffered = self.manager.handle_audio(session, vec![0u8; bytes]).await;
        assert_ne!(buffered, TurnStart::Started, "no turn while the caller talks");
        self.manager.user_stopped_speaking(session);
        let pause = session.turn_taking().response_pause();
        tokio::time::sleep(pause + Duration::from_millis(10)).await;
        self.manager.flush_after_pause(session)
    }
}

impl Harness {
    pub fn new(transcript: &'static str, behavior: LlmBehavior) -> Self {
        Self::with_settings(Settings::default(), transcript, behavior)
    }

    pub fn with_settings(settings: Settings, transcript: &'static str, behavior: LlmBehavior) -> Self {
        Self::build(settings, MockRecognizer::scripted(&[transcript]), behavior)
    }

    /// Successive recognitions return successive lines of `script`
    pub fn scripted(script: &[&'static str], behavior: LlmBehavior) -> Self {
        Self::build(Settings::default(), MockRecognizer::scripted(script), behavior)
    }

    fn build(settings: Settings, recognizer: MockRecognizer, behavior: LlmBehavior) -> Self {
        let llm = MockLlm::new(behavior);
        let store = Arc::new(RecordingStore::default());
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(recognizer),
            llm.clone(),
            Arc::new(MockTts),
            Arc::new(InterruptCoordinator::new()),
            BackendPool::new(&settings.pool),
            settings.pipeline.clone(),
        );
        let manager = SessionManager::new(
            &settings,
            Arc::new(orchestrator),
            Arc::new(DeterministicPhrases),
        )
        .with_store(store.clone());
        Self {
            manager: Arc::new(manager),
            llm,
            store,
        }
    }
}

/// Receive events until one matches, returning it and everything before it
pub async fn wait_for(
    rx: &mut mpsc::Receiver<ServerEvent>,
    within: Duration,
    pred: impl Fn(&ServerEvent) -> bool,
) -> (Vec<ServerEvent>, ServerEvent) {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(within, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
            seen.push(event);
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => (seen, event),
        Ok(None) => panic!("sink closed; saw {:?}", seen),
        Err(_) => panic!("no matching event in {:?}; saw {:?}", within, seen),
    }
}

/// An AI answer to the caller, as opposed to a prompt from the monitor
pub fn is_answer(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::AiResponse { prompt: None, .. })
}

pub async fn wait_until(within: Duration, cond: impl Fn() -> bool) {
    tokio::time::timeout(within, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
