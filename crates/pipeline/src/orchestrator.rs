//! Per-turn pipeline orchestration
//!
//! One [`PipelineOrchestrator`] is shared by every session. A turn runs
//! recognize → validate → infer → filter → synthesize and ends with the AI
//! response on the session's sink. Inference and synthesis run as spawned
//! tasks registered with the [`InterruptCoordinator`], so an interrupt
//! unblocks the turn within the cancel grace period even if the backend
//! ignores the signal.
//!
//! Stage failures end the turn, never the session. The only error returned
//! from [`PipelineOrchestrator::run_turn`] is a transport failure.

use base64::Engine as _;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use voice_call_config::PipelineConfig;
use voice_call_core::{
    AudioFormat, CallSession, CallSettings, ChatMessage, ContentPolicy, Error, EventSink,
    FillerAudioSource, LanguageModelClient, MetricsSink, NoopMetrics, PromptKind, ResponseTiming,
    Result, ServerEvent, SpeechRecognizer, SpeechSynthesizer, Stage, StageStatus,
    SynthesizedAudio, TopicVerdict, Turn, TurnTiming,
};

use crate::interrupt::{InterruptCoordinator, TaskHandle, TaskKind};
use crate::metrics;
use crate::pool::BackendPool;
use crate::turn_taking::{is_emergency_interrupt, InputAction, TurnTaking};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, knowledgeable, and friendly AI \
assistant on a voice call. Keep answers short and conversational.";

/// Everything a turn touches that belongs to one session
pub struct TurnScope<'a> {
    pub session_id: &'a str,
    pub settings: CallSettings,
    pub call: &'a Mutex<CallSession>,
    pub turn_taking: &'a TurnTaking,
    pub sink: &'a Arc<dyn EventSink>,
}

/// How a turn finished
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The AI response was delivered
    Completed(ResponseTiming),
    /// Nothing recognizable was said
    Skipped,
    /// The caller ended the conversation with this turn
    Ended,
    /// The AI task was cancelled by an interruption
    Interrupted,
    /// A stage failed after its fallbacks
    Aborted(Stage),
}

/// Shared per-turn pipeline
pub struct PipelineOrchestrator {
    recognizer: Arc<dyn SpeechRecognizer>,
    llm: Arc<dyn LanguageModelClient>,
    primary_tts: Arc<dyn SpeechSynthesizer>,
    fallback_tts: Option<Arc<dyn SpeechSynthesizer>>,
    policy: Option<Arc<dyn ContentPolicy>>,
    filler: Option<Arc<dyn FillerAudioSource>>,
    metrics: Arc<dyn MetricsSink>,
    coordinator: Arc<InterruptCoordinator>,
    pool: BackendPool,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        llm: Arc<dyn LanguageModelClient>,
        primary_tts: Arc<dyn SpeechSynthesizer>,
        coordinator: Arc<InterruptCoordinator>,
        pool: BackendPool,
        config: PipelineConfig,
    ) -> Self {
        Self {
            recognizer,
            llm,
            primary_tts,
            fallback_tts: None,
            policy: None,
            filler: None,
            metrics: Arc::new(NoopMetrics),
            coordinator,
            pool,
            config,
        }
    }

    pub fn with_fallback_tts(mut self, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        self.fallback_tts = Some(tts);
        self
    }

    /// Policy applied to kid-friendly sessions
    pub fn with_policy(mut self, policy: Arc<dyn ContentPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_filler(mut self, filler: Arc<dyn FillerAudioSource>) -> Self {
        self.filler = Some(filler);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn coordinator(&self) -> &Arc<InterruptCoordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one turn over an utterance drained from the session's buffer
    pub async fn run_turn(&self, scope: TurnScope<'_>, audio: Vec<u8>) -> Result<TurnOutcome> {
        let session_id = scope.session_id;
        let turn_started = Instant::now();
        self.coordinator.clear_interrupt(session_id);

        // Recognition
        scope
            .sink
            .send(ServerEvent::stage(
                Stage::Stt,
                StageStatus::Active,
                "Transcribing audio",
            ))
            .await?;

        let format = AudioFormat::detect(&audio);
        let stt_started = Instant::now();
        let recognized = self
            .recognize(&audio, format, &scope.settings.language)
            .await;
        let recognition_ms = elapsed_ms(stt_started);

        let text = match recognized {
            Ok(t) if !t.is_empty() => {
                self.metrics
                    .record(Stage::Stt, stt_started.elapsed(), true, None);
                t.text
            }
            Ok(_) => {
                self.metrics
                    .record(Stage::Stt, stt_started.elapsed(), false, Some("empty"));
                tracing::debug!(session_id, bytes = audio.len(), "No speech detected");
                scope
                    .sink
                    .send(ServerEvent::stage(
                        Stage::Stt,
                        StageStatus::Completed,
                        "No speech detected",
                    ))
                    .await?;
                return Ok(TurnOutcome::Skipped);
            }
            Err(e) => {
                let message = e.to_string();
                self.metrics
                    .record(Stage::Stt, stt_started.elapsed(), false, Some(&message));
                tracing::warn!(session_id, error = %e, "Recognition failed, skipping turn");
                scope
                    .sink
                    .send(ServerEvent::stage(
                        Stage::Stt,
                        StageStatus::Completed,
                        "No speech detected",
                    ))
                    .await?;
                return Ok(TurnOutcome::Skipped);
            }
        };

        scope
            .sink
            .send(ServerEvent::stage(
                Stage::Stt,
                StageStatus::Completed,
                format!("Transcribed in {}ms", recognition_ms),
            ))
            .await?;
        scope
            .sink
            .send(ServerEvent::Transcription { text: text.clone() })
            .await?;
        scope.call.lock().push_turn(Turn::user(text.clone()));

        let analysis = scope.turn_taking.handle_user_input(&text).await;
        if analysis.action == InputAction::EndConversation {
            return Ok(TurnOutcome::Ended);
        }
        if analysis.emergency_interrupt {
            // Nothing is in flight yet, so the stop phrase only skips the answer
            scope.turn_taking.revert_to_user();
            tracing::info!(session_id, "Emergency stop phrase, yielding the floor");
            return Ok(TurnOutcome::Interrupted);
        }

        let policy = self
            .policy
            .as_ref()
            .filter(|_| scope.settings.kid_friendly);

        // Validation, then inference unless redirected
        let redirect = match policy.map(|p| p.validate_topic(&text)) {
            Some(TopicVerdict::Redirect(message)) => Some(message),
            _ => None,
        };

        scope.turn_taking.begin_ai_response();
        let mut timing = ResponseTiming {
            recognition_ms,
            ..Default::default()
        };

        let (response, prompt) = match redirect {
            Some(message) => {
                tracing::info!(session_id, "Topic redirected by content policy");
                (message, Some(PromptKind::Redirect))
            }
            None => {
                let inference_started = Instant::now();
                let result = {
                    let _filler = self.start_filler(&scope);
                    self.infer(&scope, policy, &mut timing).await
                };
                timing.inference_ms = elapsed_ms(inference_started);

                match result {
                    Ok(text) => (text, None),
                    Err(Error::Cancelled) => {
                        scope.turn_taking.revert_to_user();
                        return Ok(TurnOutcome::Interrupted);
                    }
                    Err(Error::SessionNotFound(_)) => return Ok(TurnOutcome::Ended),
                    Err(e) => {
                        tracing::error!(session_id, error = %e, "Inference failed after fallback");
                        scope.turn_taking.revert_to_user();
                        self.report_failure(&scope, Stage::Llm, "AI response failed")
                            .await?;
                        return Ok(TurnOutcome::Aborted(Stage::Llm));
                    }
                }
            }
        };

        let response = match policy {
            Some(p) => p.filter_response(&response),
            None => response,
        };

        // Synthesis
        scope
            .sink
            .send(ServerEvent::stage(
                Stage::Tts,
                StageStatus::Active,
                "Generating speech",
            ))
            .await?;
        let tts_started = Instant::now();
        let synthesized = self.synthesize(&scope, &response, &mut timing).await;
        timing.synthesis_ms = elapsed_ms(tts_started);

        let audio = match synthesized {
            Ok(audio) => audio,
            Err(Error::Cancelled) => {
                scope.turn_taking.revert_to_user();
                return Ok(TurnOutcome::Interrupted);
            }
            Err(Error::SessionNotFound(_)) => return Ok(TurnOutcome::Ended),
            Err(e) => {
                tracing::error!(session_id, error = %e, "Synthesis failed on every backend");
                scope.turn_taking.revert_to_user();
                self.report_failure(&scope, Stage::Tts, "Speech generation failed")
                    .await?;
                return Ok(TurnOutcome::Aborted(Stage::Tts));
            }
        };
        scope
            .sink
            .send(ServerEvent::stage(
                Stage::Tts,
                StageStatus::Completed,
                format!("Generated {} bytes of audio", audio.bytes.len()),
            ))
            .await?;

        timing.total_ms = elapsed_ms(turn_started);
        scope.call.lock().push_turn(
            Turn::assistant(response.clone()).with_timing(TurnTiming {
                recognition_ms: Some(timing.recognition_ms),
                inference_ms: prompt.is_none().then_some(timing.inference_ms),
                synthesis_ms: Some(timing.synthesis_ms),
            }),
        );
        scope.turn_taking.handle_ai_response_complete(&response);

        self.deliver(&scope, response, audio, timing, prompt).await?;
        tracing::info!(
            session_id,
            total_ms = timing.total_ms,
            recognition_ms = timing.recognition_ms,
            inference_ms = timing.inference_ms,
            synthesis_ms = timing.synthesis_ms,
            "Turn completed"
        );
        Ok(TurnOutcome::Completed(timing))
    }

    /// Recognize audio that arrived while a turn is running and report
    /// whether it asks to stop the AI immediately
    pub async fn is_emergency_stop(&self, session_id: &str, audio: &[u8], language: &str) -> bool {
        let format = AudioFormat::detect(audio);
        match self.recognize(audio, format, language).await {
            Ok(t) => is_emergency_interrupt(&t.text),
            Err(e) => {
                tracing::debug!(session_id, error = %e, "Barge-in audio not recognized");
                false
            }
        }
    }

    async fn recognize(
        &self,
        audio: &[u8],
        format: AudioFormat,
        language: &str,
    ) -> Result<voice_call_core::Transcription> {
        let _permit = self.pool.acquire().await?;
        self.recognizer.recognize(audio, format, language).await
    }

    /// Primary model over the full context, then once more on the fallback model
    async fn infer(
        &self,
        scope: &TurnScope<'_>,
        policy: Option<&Arc<dyn ContentPolicy>>,
        timing: &mut ResponseTiming,
    ) -> Result<String> {
        let session_id = scope.session_id;
        let system = policy
            .and_then(|p| p.system_prompt())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        scope
            .sink
            .send(ServerEvent::stage(
                Stage::Llm,
                StageStatus::Active,
                "Generating response",
            ))
            .await?;

        let model = if scope.settings.model.is_empty() {
            self.config.default_model.clone()
        } else {
            scope.settings.model.clone()
        };
        let messages = build_messages(&system, scope.turn_taking.context());

        let started = Instant::now();
        let primary = self
            .complete(session_id, messages, model, self.config.inference_timeout())
            .await;
        match primary {
            Ok(text) => {
                self.metrics.record(Stage::Llm, started.elapsed(), true, None);
                scope
                    .sink
                    .send(ServerEvent::stage(
                        Stage::Llm,
                        StageStatus::Completed,
                        "Response generated",
                    ))
                    .await?;
                return Ok(text);
            }
            Err(e @ (Error::Cancelled | Error::SessionNotFound(_))) => return Err(e),
            Err(e) => {
                let message = e.to_string();
                self.metrics
                    .record(Stage::Llm, started.elapsed(), false, Some(&message));
                tracing::warn!(
                    session_id,
                    error = %e,
                    fallback_model = %self.config.fallback_model,
                    "Inference failed, trying fallback model"
                );
            }
        }

        metrics::record_fallback(Stage::Llm);
        timing.fallback_model = true;
        let recent = scope
            .turn_taking
            .recent_context(self.config.fallback_context_turns);
        let messages = build_messages(&system, recent);

        let started = Instant::now();
        let fallback = self
            .complete(
                session_id,
                messages,
                self.config.fallback_model.clone(),
                self.config.fallback_timeout(),
            )
            .await;
        let message = fallback.as_ref().err().map(|e| e.to_string());
        self.metrics.record(
            Stage::Llm,
            started.elapsed(),
            fallback.is_ok(),
            message.as_deref(),
        );
        let text = fallback?;
        scope
            .sink
            .send(ServerEvent::stage(
                Stage::Llm,
                StageStatus::Completed,
                "Response generated by fallback model",
            ))
            .await?;
        Ok(text)
    }

    async fn complete(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
        model: String,
        timeout: Duration,
    ) -> Result<String> {
        let llm = self.llm.clone();
        let text = self
            .guarded(session_id, TaskKind::Inference, async move {
                match tokio::time::timeout(timeout, llm.complete(&messages, &model, timeout)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::InferenceTimeout(timeout)),
                }
            })
            .await?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::Inference("empty response".to_string()));
        }
        Ok(text)
    }

    /// Primary synthesizer, then the fallback one
    async fn synthesize(
        &self,
        scope: &TurnScope<'_>,
        text: &str,
        timing: &mut ResponseTiming,
    ) -> Result<SynthesizedAudio> {
        let started = Instant::now();
        let primary = self
            .synthesize_with(self.primary_tts.clone(), scope, text)
            .await;
        let error = match primary {
            Ok(audio) => {
                self.metrics.record(Stage::Tts, started.elapsed(), true, None);
                return Ok(audio);
            }
            Err(e @ (Error::Cancelled | Error::SessionNotFound(_))) => return Err(e),
            Err(e) => e,
        };

        let message = error.to_string();
        self.metrics
            .record(Stage::Tts, started.elapsed(), false, Some(&message));

        let Some(fallback) = self.fallback_tts.clone() else {
            return Err(error);
        };
        tracing::warn!(
            session_id = scope.session_id,
            error = %error,
            fallback = fallback.name(),
            "Primary synthesis failed, trying fallback voice"
        );
        metrics::record_fallback(Stage::Tts);
        timing.fallback_voice = true;

        let started = Instant::now();
        let result = self.synthesize_with(fallback, scope, text).await;
        let message = result.as_ref().err().map(|e| e.to_string());
        self.metrics.record(
            Stage::Tts,
            started.elapsed(),
            result.is_ok(),
            message.as_deref(),
        );
        result
    }

    async fn synthesize_with(
        &self,
        tts: Arc<dyn SpeechSynthesizer>,
        scope: &TurnScope<'_>,
        text: &str,
    ) -> Result<SynthesizedAudio> {
        let text = text.to_string();
        let voice = scope.settings.voice.clone();
        let language = scope.settings.language.clone();
        let speed = scope.settings.speed;
        self.guarded(scope.session_id, TaskKind::Synthesis, async move {
            tts.synthesize(&text, &voice, &language, speed).await
        })
        .await
    }

    /// Run a backend call as the session's single in-flight task
    ///
    /// The call holds a pool permit while it runs. Once the task's token is
    /// cancelled the caller waits at most the cancel grace for the task to
    /// wind down, then abandons it.
    async fn guarded<T, F>(&self, session_id: &str, kind: TaskKind, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let handle = TaskHandle::new();
        if !self.coordinator.set_task(session_id, kind, true, &handle) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        let token = handle.token().clone();
        let child = token.clone();
        let pool = self.pool.clone();
        let mut task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => Err(Error::Cancelled),
                result = async move {
                    let _permit = pool.acquire().await?;
                    work.await
                } => result,
            }
        });

        let result = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                Err(e) => Err(task_failure(kind, e.to_string())),
            },
            _ = token.cancelled() => {
                if tokio::time::timeout(self.config.cancel_grace(), &mut task).await.is_err() {
                    tracing::warn!(session_id, ?kind, "Cancelled task did not stop, abandoning it");
                    task.abort();
                }
                Err(Error::Cancelled)
            }
        };
        self.coordinator.set_task(session_id, kind, false, &handle);

        if handle.is_cancelled() {
            return Err(Error::Cancelled);
        }
        result
    }

    /// Play filler audio if inference is still pending after the filler delay
    fn start_filler(&self, scope: &TurnScope<'_>) -> Option<FillerGuard> {
        if !scope.settings.background_audio {
            return None;
        }
        let filler = self.filler.clone()?;
        let sink = scope.sink.clone();
        let delay = self.config.filler_delay();
        let language = scope.settings.language.clone();
        let session_id = scope.session_id.to_string();

        Some(FillerGuard(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match filler.filler(&language).await {
                Ok(Some(bytes)) => {
                    let audio = base64::engine::general_purpose::STANDARD.encode(bytes);
                    if let Err(e) = sink.send(ServerEvent::FillerAudio { audio }).await {
                        tracing::debug!(session_id, error = %e, "Filler audio not delivered");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(session_id, error = %e, "Filler audio unavailable"),
            }
        })))
    }

    async fn report_failure(&self, scope: &TurnScope<'_>, stage: Stage, message: &str) -> Result<()> {
        scope
            .sink
            .send(ServerEvent::stage(stage, StageStatus::Error, message))
            .await?;
        scope
            .sink
            .send(ServerEvent::error(message, Some(stage)))
            .await
    }

    /// Send the response, streaming the audio when it is too large for one event
    async fn deliver(
        &self,
        scope: &TurnScope<'_>,
        text: String,
        audio: SynthesizedAudio,
        timing: ResponseTiming,
        prompt: Option<PromptKind>,
    ) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&audio.bytes);

        if encoded.len() <= self.config.stream_threshold_chars {
            return scope
                .sink
                .send(ServerEvent::AiResponse {
                    text,
                    audio: Some(encoded),
                    timing: Some(timing),
                    prompt,
                })
                .await;
        }

        scope
            .sink
            .send(ServerEvent::AiResponse {
                text: text.clone(),
                audio: None,
                timing: Some(timing),
                prompt,
            })
            .await?;

        let chunks: Vec<&[u8]> = encoded
            .as_bytes()
            .chunks(self.config.stream_chunk_chars.max(4))
            .collect();
        let total_chunks = chunks.len();
        tracing::debug!(
            session_id = scope.session_id,
            chars = encoded.len(),
            total_chunks,
            "Streaming response audio"
        );
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            scope
                .sink
                .send(ServerEvent::StreamingAudioChunk {
                    text: text.clone(),
                    audio_chunk: String::from_utf8_lossy(chunk).into_owned(),
                    chunk_index,
                    total_chunks,
                    is_final: chunk_index + 1 == total_chunks,
                })
                .await?;
        }
        Ok(())
    }
}

/// Aborts the filler task when the pending stage finishes on any path
struct FillerGuard(JoinHandle<()>);

impl Drop for FillerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn build_messages(system: &str, context: Vec<Turn>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend(context.iter().map(ChatMessage::from));
    messages
}

fn task_failure(kind: TaskKind, message: String) -> Error {
    match kind {
        TaskKind::Inference => Error::Inference(format!("inference task failed: {}", message)),
        TaskKind::Synthesis => Error::Synthesis(format!("synthesis task failed: {}", message)),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use voice_call_config::{PoolConfig, TurnTakingConfig};
    use voice_call_core::{ChannelSink, ChatRole, Transcription};

    use crate::policy::KidFriendlyPolicy;
    use crate::turn_taking::DeterministicPhrases;

    struct MockRecognizer(&'static str);

    #[async_trait]
    impl SpeechRecognizer for MockRecognizer {
        async fn recognize(&self, _: &[u8], _: AudioFormat, _: &str) -> Result<Transcription> {
            Ok(Transcription::new(self.0))
        }

        fn name(&self) -> &str {
            "mock-stt"
        }
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Text(&'static str),
        After(Duration, &'static str),
        Hang,
        Fail,
    }

    struct MockLlm {
        primary: Reply,
        fallback: Reply,
        calls: Mutex<Vec<(String, usize, Duration)>>,
    }

    impl MockLlm {
        fn new(primary: Reply, fallback: Reply) -> Arc<Self> {
            Arc::new(Self {
                primary,
                fallback,
                calls: Mutex::new(Vec::new()),
            })
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
            let reply = if model == FALLBACK_MODEL {
                self.fallback
            } else {
                self.primary
            };
            match reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::After(delay, text) => {
                    tokio::time::sleep(delay).await;
                    Ok(text.to_string())
                }
                Reply::Hang => std::future::pending::<Result<String>>().await,
                Reply::Fail => Err(Error::Inference("model unavailable".to_string())),
            }
        }

        fn name(&self) -> &str {
            "mock-llm"
        }
    }

    struct MockTts {
        fail: bool,
        bytes: usize,
    }

    #[async_trait]
    impl SpeechSynthesizer for MockTts {
        async fn synthesize(&self, _: &str, _: &str, _: &str, _: f32) -> Result<SynthesizedAudio> {
            if self.fail {
                return Err(Error::Synthesis("voice unavailable".to_string()));
            }
            Ok(SynthesizedAudio {
                bytes: vec![7; self.bytes],
                format: AudioFormat::Raw,
            })
        }

        fn name(&self) -> &str {
            "mock-tts"
        }
    }

    struct MockFiller;

    #[async_trait]
    impl FillerAudioSource for MockFiller {
        async fn filler(&self, _: &str) -> Result<Option<Vec<u8>>> {
            Ok(Some(vec![1, 2, 3]))
        }
    }

    const FALLBACK_MODEL: &str = "tiny";

    struct Harness {
        coordinator: Arc<InterruptCoordinator>,
        call: Mutex<CallSession>,
        turn_taking: Arc<TurnTaking>,
        sink: Arc<dyn EventSink>,
        rx: mpsc::Receiver<ServerEvent>,
        settings: CallSettings,
    }

    impl Harness {
        fn new() -> Self {
            let (sink, rx) = ChannelSink::channel(256);
            let sink: Arc<dyn EventSink> = Arc::new(sink);
            let coordinator = Arc::new(InterruptCoordinator::new());
            coordinator.register_session("s1", sink.clone());
            let settings = CallSettings {
                model: "large".to_string(),
                ..Default::default()
            };
            Self {
                coordinator,
                call: Mutex::new(CallSession::new("s1", settings.clone())),
                turn_taking: TurnTaking::new(
                    "s1",
                    TurnTakingConfig::default(),
                    Arc::new(DeterministicPhrases),
                    sink.clone(),
                ),
                sink,
                rx,
                settings,
            }
        }

        fn scope(&self) -> TurnScope<'_> {
            TurnScope {
                session_id: "s1",
                settings: self.settings.clone(),
                call: &self.call,
                turn_taking: &self.turn_taking,
                sink: &self.sink,
            }
        }

        fn orchestrator(
            &self,
            transcript: &'static str,
            llm: Arc<MockLlm>,
            tts: MockTts,
        ) -> PipelineOrchestrator {
            let config = PipelineConfig {
                fallback_model: FALLBACK_MODEL.to_string(),
                ..Default::default()
            };
            PipelineOrchestrator::new(
                Arc::new(MockRecognizer(transcript)),
                llm,
                Arc::new(tts),
                self.coordinator.clone(),
                BackendPool::new(&PoolConfig::default()),
                config,
            )
        }

        fn events(&mut self) -> Vec<ServerEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn kinds(events: &[ServerEvent]) -> Vec<&'static str> {
        events
            .iter()
            .filter(|e| !matches!(e, ServerEvent::ProcessStatus { .. }))
            .map(|e| e.kind())
            .collect()
    }

    fn tts() -> MockTts {
        MockTts {
            fail: false,
            bytes: 64,
        }
    }

    #[tokio::test]
    async fn test_turn_emits_transcription_then_response() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("Sure, here you go."), Reply::Fail);
        let orch = h.orchestrator("tell me a fact", llm.clone(), tts());

        let outcome = orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed(_)));

        let events = h.events();
        assert_eq!(kinds(&events), vec!["transcription", "ai_response"]);
        match events.iter().find(|e| e.kind() == "ai_response") {
            Some(ServerEvent::AiResponse {
                text,
                audio,
                timing,
                ..
            }) => {
                assert_eq!(text, "Sure, here you go.");
                assert!(audio.as_deref().is_some_and(|a| !a.is_empty()));
                assert!(!timing.unwrap().fallback_model);
            }
            other => panic!("unexpected {:?}", other),
        }

        let turns = h.call.lock().turns().to_vec();
        assert_eq!(turns.len(), 2);
        assert!(turns[1].timing.is_some());
        assert_eq!(h.turn_taking.context().len(), 2);
        assert!(!h.coordinator.has_in_flight("s1"));
        assert_eq!(llm.calls.lock()[0].0, "large");
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_silently() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("unused"), Reply::Fail);
        let orch = h.orchestrator("   ", llm.clone(), tts());

        let outcome = orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Skipped);
        let events = h.events();
        assert!(kinds(&events).is_empty());
        assert!(llm.calls.lock().is_empty());
        assert!(h.call.lock().turns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_timeout_falls_back_once_then_aborts() {
        let mut h = Harness::new();
        for i in 0..3 {
            h.turn_taking.handle_user_input(&format!("question {}", i)).await;
            h.turn_taking.handle_ai_response_complete("answer");
        }
        let llm = MockLlm::new(Reply::Hang, Reply::Hang);
        let orch = h.orchestrator("and another thing", llm.clone(), tts());

        let outcome = orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Aborted(Stage::Llm));

        let calls = llm.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "large");
        assert_eq!(calls[0].1, 8);
        assert_eq!(calls[0].2, Duration::from_secs(30));
        assert_eq!(calls[1].0, FALLBACK_MODEL);
        assert_eq!(calls[1].1, 4);
        assert_eq!(calls[1].2, Duration::from_secs(15));

        let events = h.events();
        assert!(!events.iter().any(|e| e.kind() == "ai_response"));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::Error { stage: Some(Stage::Llm), .. })));
        assert!(!h.coordinator.has_in_flight("s1"));
        assert!(h.turn_taking.snapshot().waiting_for_response);
    }

    #[tokio::test]
    async fn test_fallback_model_answers() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Fail, Reply::Text("Short answer."));
        let orch = h.orchestrator("hello there", llm, tts());

        match orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap() {
            TurnOutcome::Completed(timing) => assert!(timing.fallback_model),
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.events().iter().any(|e| e.kind() == "ai_response"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_inference() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Hang, Reply::Text("unused"));
        let orch = h.orchestrator("tell me a long story", llm.clone(), tts());
        let coordinator = h.coordinator.clone();

        let (outcome, interrupted) = tokio::join!(orch.run_turn(h.scope(), vec![0; 2000]), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            coordinator.interrupt("s1").await
        });
        assert!(interrupted);
        assert_eq!(outcome.unwrap(), TurnOutcome::Interrupted);
        assert_eq!(llm.calls.lock().len(), 1);

        let events = h.events();
        let confirmed = events
            .iter()
            .filter(|e| e.kind() == "interrupt_confirmed")
            .count();
        assert_eq!(confirmed, 1);
        assert!(!events.iter().any(|e| e.kind() == "ai_response"));
        assert!(!h.coordinator.has_in_flight("s1"));
    }

    #[tokio::test]
    async fn test_synthesis_falls_back_to_secondary_voice() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("Hi!"), Reply::Fail);
        let orch = h
            .orchestrator("hey", llm, MockTts { fail: true, bytes: 0 })
            .with_fallback_tts(Arc::new(tts()));

        match orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap() {
            TurnOutcome::Completed(timing) => assert!(timing.fallback_voice),
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.events().iter().any(|e| e.kind() == "ai_response"));
    }

    #[tokio::test]
    async fn test_total_synthesis_failure_is_turn_scoped() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("Hi!"), Reply::Fail);
        let orch = h.orchestrator("hey", llm, MockTts { fail: true, bytes: 0 });

        let outcome = orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Aborted(Stage::Tts));
        let events = h.events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ServerEvent::Error { .. }))
                .count(),
            1
        );
        assert!(!events.iter().any(|e| e.kind() == "ai_response"));
        assert!(!h.turn_taking.is_ended());
    }

    #[tokio::test]
    async fn test_goodbye_ends_without_inference() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("unused"), Reply::Fail);
        let orch = h.orchestrator("ok goodbye", llm.clone(), tts());

        let outcome = orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Ended);
        assert!(llm.calls.lock().is_empty());
        assert!(h.turn_taking.is_ended());
        assert_eq!(kinds(&h.events()), vec!["transcription", "ai_response"]);
    }

    #[tokio::test]
    async fn test_stop_phrase_yields_floor_without_answer() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("unused"), Reply::Fail);
        let orch = h.orchestrator("stop stop", llm.clone(), tts());

        assert!(orch.is_emergency_stop("s1", &[0; 2000], "en").await);
        let outcome = orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Interrupted);
        assert!(llm.calls.lock().is_empty());
        assert_eq!(h.turn_taking.snapshot().owner, crate::turn_taking::TurnOwner::User);
        assert!(!h.events().iter().any(|e| matches!(e, ServerEvent::AiResponse { .. })));

        let calm = h.orchestrator("please stop by the shop", llm, tts());
        assert!(!calm.is_emergency_stop("s1", &[0; 2000], "en").await);
    }

    #[tokio::test]
    async fn test_kid_policy_redirects_blocked_topic() {
        let mut h = Harness::new();
        h.settings.kid_friendly = true;
        let llm = MockLlm::new(Reply::Text("unused"), Reply::Fail);
        let orch = h
            .orchestrator("tell me a scary story", llm.clone(), tts())
            .with_policy(Arc::new(KidFriendlyPolicy));

        orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        assert!(llm.calls.lock().is_empty());
        let redirected = h.events().into_iter().any(|e| {
            matches!(
                e,
                ServerEvent::AiResponse {
                    prompt: Some(PromptKind::Redirect),
                    ..
                }
            )
        });
        assert!(redirected);
    }

    #[tokio::test]
    async fn test_kid_policy_supplies_system_prompt() {
        let mut h = Harness::new();
        h.settings.kid_friendly = true;
        let llm = MockLlm::new(Reply::Text("Cats purr."), Reply::Fail);
        let orch = h
            .orchestrator("tell me about cats", llm.clone(), tts())
            .with_policy(Arc::new(KidFriendlyPolicy));

        orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        // system prompt plus the user's question
        assert_eq!(llm.calls.lock()[0].1, 2);
        assert!(h.events().iter().any(|e| e.kind() == "ai_response"));
    }

    #[test]
    fn test_build_messages_puts_system_first() {
        let messages = build_messages("be brief", vec![Turn::user("hi"), Turn::assistant("hello")]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[2].role, ChatRole::Assistant);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filler_audio_while_inference_pending() {
        let mut h = Harness::new();
        let llm = MockLlm::new(
            Reply::After(Duration::from_secs(2), "Done thinking."),
            Reply::Fail,
        );
        let orch = h
            .orchestrator("what is the weather", llm, tts())
            .with_filler(Arc::new(MockFiller));

        orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        let events = h.events();
        let filler = events.iter().position(|e| e.kind() == "filler_audio");
        let response = events.iter().position(|e| e.kind() == "ai_response");
        assert!(filler.is_some());
        assert!(filler < response);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_filler_when_inference_is_fast() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("Quick."), Reply::Fail);
        let orch = h
            .orchestrator("hi", llm, tts())
            .with_filler(Arc::new(MockFiller));

        orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.events().iter().any(|e| e.kind() == "filler_audio"));
    }

    #[tokio::test]
    async fn test_large_audio_is_streamed() {
        let mut h = Harness::new();
        let llm = MockLlm::new(Reply::Text("Long reply."), Reply::Fail);
        let mut orch = h.orchestrator(
            "read me a book",
            llm,
            MockTts {
                fail: false,
                bytes: 300,
            },
        );
        orch.config.stream_threshold_chars = 100;
        orch.config.stream_chunk_chars = 160;

        orch.run_turn(h.scope(), vec![0; 2000]).await.unwrap();
        let events = h.events();
        let chunks: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::StreamingAudioChunk {
                    chunk_index,
                    total_chunks,
                    is_final,
                    ..
                } => Some((*chunk_index, *total_chunks, *is_final)),
                _ => None,
            })
            .collect();
        // 300 bytes encode to 400 base64 chars
        assert_eq!(chunks, vec![(0, 3, false), (1, 3, false), (2, 3, true)]);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::AiResponse { audio: None, .. })));
    }
}
