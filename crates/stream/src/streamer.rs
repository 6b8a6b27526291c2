use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

use crate::error::SessionError;
use crate::hooks::StreamerHooks;
use crate::session::Session;
use crate::transport::{StreamTransport, TransportEvent};

/// Default drain interval between displayed units.
pub const DEFAULT_TYPING_SPEED: Duration = Duration::from_millis(30);

/// Animation pacing configuration. Affects pace only, never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamerConfig {
    pub typing_speed: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            typing_speed: DEFAULT_TYPING_SPEED,
        }
    }
}

/// Input attached to one session: a live transport, or a complete literal
/// string whose drain animation is purely cosmetic.
pub enum AnswerSource {
    Transport(StreamTransport),
    Literal(String),
}

impl From<StreamTransport> for AnswerSource {
    fn from(transport: StreamTransport) -> Self {
        Self::Transport(transport)
    }
}

/// Spawns and owns the per-session consumer actor.
///
/// One actor task owns the whole [`Session`], so transport events and
/// drain ticks are serialized through a single `select!` loop: an append
/// always happens-before the next tick that could observe it, and a second
/// concurrent drain clock cannot exist. Attaching a different transport
/// means spawning a new streamer; an existing session is never re-pointed.
pub struct CharacterStreamer;

impl CharacterStreamer {
    /// Spawns the consumer for `source`. Must be called within a tokio
    /// runtime. Returns the lifecycle guard for the session.
    pub fn spawn(
        source: AnswerSource,
        hooks: StreamerHooks,
        config: StreamerConfig,
    ) -> StreamerHandle {
        // Interval construction panics on zero, so clamp pacing upward.
        let typing_speed = config.typing_speed.max(Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let actor = SessionActor {
            session: Session::new(),
            hooks,
            drain_active: false,
        };
        let task = tokio::spawn(actor.run(source, typing_speed, shutdown_rx));

        StreamerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Lifecycle guard for one spawned session.
///
/// Dropping the handle tears the session down the same way an explicit
/// [`StreamerHandle::shutdown`] does: the drain clock stops, listener
/// bindings detach, and the transport is closed. No hook fires afterwards,
/// even if ticks or events were already queued.
pub struct StreamerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamerHandle {
    /// Tears down the session and waits for the actor to exit.
    pub async fn shutdown(mut self) {
        self.request_shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn request_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

struct SessionActor {
    session: Session,
    hooks: StreamerHooks,
    drain_active: bool,
}

impl SessionActor {
    async fn run(
        mut self,
        source: AnswerSource,
        typing_speed: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut transport = match source {
            AnswerSource::Transport(transport) => Some(transport),
            AnswerSource::Literal(text) => {
                // The whole answer is known up front; queue it as if it
                // were a single message event and animate identically.
                self.session.append_message(&text);
                self.drain_active = !self.session.queue_is_empty();
                None
            }
        };

        let mut ticker = time::interval(typing_speed);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval's first tick completes immediately; push it out one
        // period so the first unit is paced like every later one.
        ticker.reset();

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = next_transport_event(transport.as_mut()), if transport.is_some() => {
                    match event {
                        Some(TransportEvent::Startup(payload)) => self.on_startup(&payload),
                        Some(TransportEvent::Message(payload)) => {
                            self.on_message(&payload, &mut ticker);
                        }
                        Some(TransportEvent::End) => self.on_end(),
                        Some(TransportEvent::Error(payload)) => {
                            self.on_error_event(&payload);
                            if let Some(transport) = transport.as_mut() {
                                transport.close();
                            }
                            transport = None;
                        }
                        None => {
                            // Producer went away without an end marker.
                            // Nothing more will arrive; keep draining what
                            // is already queued.
                            transport = None;
                        }
                    }
                }
                _ = ticker.tick(), if self.drain_active => self.on_tick(),
            }
        }

        if let Some(transport) = transport.as_mut() {
            transport.close();
        }
    }

    fn on_startup(&mut self, payload: &str) {
        match self.session.apply_startup(payload) {
            Ok(()) => {
                tracing::debug!(
                    metadata_ready = self.session.metadata_ready(),
                    "startup metadata received"
                );
                self.check_completion();
            }
            Err(error) => {
                // Fatal to finalization: the session can never become
                // metadata-ready, and the failure is surfaced rather than
                // silently retried.
                tracing::warn!(error = %error, "startup metadata payload failed to parse");
                if self.session.mark_errored() {
                    self.hooks.emit_error(error);
                }
            }
        }
    }

    fn on_message(&mut self, payload: &str, ticker: &mut Interval) {
        self.session.append_message(payload);
        self.ensure_draining(ticker);
    }

    fn on_end(&mut self) {
        if self.session.observe_end() {
            // Lifecycle notification only, fired synchronously and
            // independent of drain progress; final-answer delivery still
            // waits for the completion predicate.
            self.hooks.emit_streaming_complete();
        }
        self.check_completion();
    }

    fn on_error_event(&mut self, payload: &str) {
        let message = extract_error_message(payload);
        tracing::warn!(message = %message, "transport reported a stream error");
        if self.session.mark_errored() {
            self.hooks.emit_error(SessionError::Transport { message });
        }
    }

    fn on_tick(&mut self) {
        match self.session.drain_one() {
            Some(_) => self.hooks.emit_output(self.session.output_text()),
            None => {
                self.drain_active = false;
                tracing::trace!(
                    output_len = self.session.output_text().len(),
                    "drain clock went idle"
                );
            }
        }
        self.check_completion();
    }

    /// Restarts the drain clock after an append. Idempotent: an active
    /// clock is never doubled.
    fn ensure_draining(&mut self, ticker: &mut Interval) {
        if !self.drain_active && !self.session.queue_is_empty() {
            self.drain_active = true;
            ticker.reset();
        }
    }

    fn check_completion(&mut self) {
        if let Some(answer) = self.session.take_final_answer(!self.drain_active) {
            tracing::debug!(
                answer_len = answer.answer.len(),
                data_point_count = answer.data_points.len(),
                "completion predicate satisfied; emitting final answer"
            );
            self.hooks.emit_final_answer(answer);
        }
    }
}

async fn next_transport_event(
    transport: Option<&mut StreamTransport>,
) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: String,
}

/// Structured parse of an error payload, falling back to the raw text
/// verbatim so a malformed payload is never silently swallowed.
fn extract_error_message(payload: &str) -> String {
    match serde_json::from_str::<ErrorPayload>(payload) {
        Ok(parsed) => parsed.error,
        Err(_) => payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::metadata::FinalAnswer;
    use crate::transport;

    const READY_METADATA: &str = r#"{
        "data_points": ["docs/report.pdf| excerpt"],
        "web_citation_lookup": {"File0": {"citation": "page.html"}},
        "thought_chain": {"work_query": "q"}
    }"#;

    fn test_config() -> StreamerConfig {
        StreamerConfig {
            typing_speed: Duration::from_millis(5),
        }
    }

    #[derive(Clone, Default)]
    struct Capture {
        outputs: Arc<Mutex<Vec<String>>>,
        finals: Arc<Mutex<Vec<FinalAnswer>>>,
        completes: Arc<Mutex<usize>>,
        errors: Arc<Mutex<Vec<SessionError>>>,
    }

    impl Capture {
        fn hooks(&self) -> StreamerHooks {
            let outputs = Arc::clone(&self.outputs);
            let finals = Arc::clone(&self.finals);
            let completes = Arc::clone(&self.completes);
            let errors = Arc::clone(&self.errors);
            StreamerHooks::new()
                .on_output(move |text| outputs.lock().unwrap().push(text.to_string()))
                .on_final_answer(move |answer| finals.lock().unwrap().push(answer))
                .on_streaming_complete(move || *completes.lock().unwrap() += 1)
                .on_error(move |error| errors.lock().unwrap().push(error))
        }

        fn outputs(&self) -> Vec<String> {
            self.outputs.lock().unwrap().clone()
        }

        fn finals(&self) -> Vec<FinalAnswer> {
            self.finals.lock().unwrap().clone()
        }

        fn completes(&self) -> usize {
            *self.completes.lock().unwrap()
        }

        fn error_count(&self) -> usize {
            self.errors.lock().unwrap().len()
        }
    }

    #[test]
    fn error_message_extraction_prefers_structured_payloads() {
        assert_eq!(extract_error_message(r#"{"error": "boom"}"#), "boom");
        assert_eq!(extract_error_message("plain failure text"), "plain failure text");
        assert_eq!(extract_error_message(r#"{"other": 1}"#), r#"{"other": 1}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn message_payloads_drain_in_arrival_order() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("Hello,");
        // Arrival gap mid-drain must not affect final ordering.
        time::sleep(Duration::from_millis(12)).await;
        sender.message(" world");
        sender.startup(READY_METADATA);
        sender.end();
        time::sleep(Duration::from_millis(200)).await;

        let finals = capture.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].answer, "Hello, world");

        let outputs = capture.outputs();
        assert_eq!(outputs.first().map(String::as_str), Some("H"));
        assert_eq!(outputs.last().map(String::as_str), Some("Hello, world"));
        // Each render snapshot extends the previous one by exactly one unit.
        for pair in outputs.windows(2) {
            assert!(pair[1].starts_with(pair[0].as_str()));
            assert_eq!(pair[1].chars().count(), pair[0].chars().count() + 1);
        }

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn finalization_fires_exactly_once_despite_duplicate_end() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("answer");
        sender.end();
        sender.end();
        sender.startup(READY_METADATA);
        time::sleep(Duration::from_millis(200)).await;
        sender.end();
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(capture.finals().len(), 1);
        assert_eq!(capture.completes(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_finalization_when_metadata_never_becomes_ready() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("answer");
        // Received-but-empty lookups must not count as ready.
        sender.startup(r#"{"web_citation_lookup": {}, "work_citation_lookup": {}}"#);
        sender.end();
        time::sleep(Duration::from_millis(500)).await;

        assert!(capture.finals().is_empty());
        assert_eq!(capture.completes(), 1, "lifecycle hook still fires on end");
        assert_eq!(
            capture.outputs().last().map(String::as_str),
            Some("answer"),
            "draining is not gated on metadata"
        );
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_clock_and_callbacks() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("abc");
        time::sleep(Duration::from_millis(7)).await;
        assert_eq!(capture.outputs().len(), 1);

        handle.shutdown().await;
        assert!(sender.is_closed(), "teardown closes the transport");

        sender.message("late");
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(capture.outputs().len(), 1, "no callbacks after teardown");
        assert!(capture.finals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_tears_down_too() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("abc");
        time::sleep(Duration::from_millis(7)).await;
        drop(handle);
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(capture.outputs().len(), 1);
        assert!(sender.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn line_break_marker_normalizes_to_newline() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("A<br>B");
        sender.startup(READY_METADATA);
        sender.end();
        time::sleep(Duration::from_millis(100)).await;

        let finals = capture.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].answer, "A\nB");
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn literal_mode_drains_without_finalizing() {
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Literal("hello".to_string()),
            capture.hooks(),
            test_config(),
        );

        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            capture.outputs(),
            vec!["h", "he", "hel", "hell", "hello"],
            "units drain in order, one per tick"
        );
        assert!(capture.finals().is_empty(), "no metadata, no final answer");
        assert_eq!(capture.completes(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_suppresses_finalization() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.startup(READY_METADATA);
        sender.message("ok");
        sender.error("boom");
        time::sleep(Duration::from_millis(100)).await;

        {
            let errors = capture.errors.lock().unwrap();
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0], SessionError::Transport { .. }));
            assert!(errors[0].to_string().contains("boom"));
        }
        assert!(sender.is_closed(), "error closes the transport");
        assert_eq!(
            capture.outputs().last().map(String::as_str),
            Some("ok"),
            "already-queued units still drain after an error"
        );
        assert!(capture.finals().is_empty());
        assert_eq!(capture.completes(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn structured_error_payload_yields_inner_message() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.error(r#"{"error": "Error generating embedding"}"#);
        time::sleep(Duration::from_millis(20)).await;

        let errors = capture.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "stream transport reported an error: Error generating embedding"
        );
        drop(errors);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_end_defers_finalization_until_drain_completes() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("hi");
        sender.startup(READY_METADATA);
        time::sleep(Duration::from_millis(7)).await;
        assert_eq!(capture.outputs(), vec!["h"], "one unit drained so far");

        sender.end();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(capture.completes(), 1, "lifecycle hook fires immediately");
        assert!(
            capture.finals().is_empty(),
            "finalization waits for the queue to drain"
        );

        time::sleep(Duration::from_millis(50)).await;
        let finals = capture.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].answer, "hi");
        assert_eq!(finals[0].web_citation_lookup["File0"].citation, "page.html");
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn startup_arriving_last_still_finalizes() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.message("ok");
        sender.end();
        time::sleep(Duration::from_millis(100)).await;
        assert!(capture.finals().is_empty(), "metadata has not arrived yet");

        sender.startup(READY_METADATA);
        time::sleep(Duration::from_millis(20)).await;

        let finals = capture.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].answer, "ok");
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn message_after_end_is_drained_and_included() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.startup(READY_METADATA);
        sender.message("hi");
        sender.end();
        // Late burst while the queue is still draining: appended, drained,
        // and included in the final answer.
        sender.message(" there");
        time::sleep(Duration::from_millis(200)).await;

        let finals = capture.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].answer, "hi there");
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_parse_failure_reports_distinct_error_and_never_finalizes() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.startup("not json at all");
        sender.message("partial");
        sender.end();
        time::sleep(Duration::from_millis(200)).await;

        {
            let errors = capture.errors.lock().unwrap();
            assert_eq!(errors.len(), 1);
            assert!(matches!(errors[0], SessionError::MetadataParse { .. }));
        }
        assert_eq!(
            capture.outputs().last().map(String::as_str),
            Some("partial"),
            "partial output remains visible"
        );
        assert!(capture.finals().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_startup_supersedes_the_first() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.startup(r#"{"web_citation_lookup": {"File0": {"citation": "old.html"}}}"#);
        sender.startup(r#"{"web_citation_lookup": {"File1": {"citation": "new.html"}}}"#);
        sender.message("x");
        sender.end();
        time::sleep(Duration::from_millis(100)).await;

        let finals = capture.finals();
        assert_eq!(finals.len(), 1);
        assert!(finals[0].web_citation_lookup.contains_key("File1"));
        assert!(!finals[0].web_citation_lookup.contains_key("File0"));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_error_reports_once() {
        let (sender, stream) = transport::channel();
        let capture = Capture::default();
        let handle = CharacterStreamer::spawn(
            AnswerSource::Transport(stream),
            capture.hooks(),
            test_config(),
        );

        sender.error("first");
        sender.error("second");
        time::sleep(Duration::from_millis(20)).await;

        assert_eq!(capture.error_count(), 1);
        handle.shutdown().await;
    }
}
