use snafu::ResultExt;

use crate::error::{MetadataParseSnafu, SessionResult};
use crate::metadata::{FinalAnswer, StartupMetadata};
use crate::queue::{ChunkQueue, OutputBuffer};

/// Literal marker rewritten to a logical newline before units are queued.
/// The downstream renderer consumes Markdown, where `<br>` has no effect.
const LINE_BREAK_MARKER: &str = "<br>";

/// Rewrites the line-break marker; all other content passes through
/// verbatim. Sanitization is the external renderer's responsibility.
pub fn normalize_message(raw: &str) -> String {
    raw.replace(LINE_BREAK_MARKER, "\n")
}

/// Aggregate state for one streaming session.
///
/// Owns the chunk queue, the drained output, the completion signals, and
/// the error/finalization flags. Deliberately synchronous and free of any
/// runtime machinery so the completion predicate is testable in isolation;
/// the actor in [`crate::streamer`] drives it and owns the drain clock.
///
/// Signals are monotonic within a session: `end_observed`, `errored`, and
/// `finalized` never clear once set. Queue emptiness is the one signal
/// that can regress, whenever new units arrive after a drain had emptied
/// the queue. A replacement transport always gets a fresh `Session`; state
/// is never reset in place.
#[derive(Debug, Default)]
pub struct Session {
    queue: ChunkQueue,
    output: OutputBuffer,
    metadata: Option<StartupMetadata>,
    end_observed: bool,
    errored: bool,
    finalized: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes one raw `message` payload and queues its units.
    pub fn append_message(&mut self, raw: &str) {
        self.queue.append(&normalize_message(raw));
    }

    /// Moves one unit from the queue to the output surface.
    /// `None` is the normal idle condition, not an error.
    pub fn drain_one(&mut self) -> Option<char> {
        let unit = self.queue.pop_front()?;
        self.output.push(unit);
        Some(unit)
    }

    /// Parses a `startup` payload and replaces the metadata wholesale.
    /// A later payload supersedes an earlier one (last writer wins).
    pub fn apply_startup(&mut self, payload: &str) -> SessionResult<()> {
        let metadata = StartupMetadata::parse(payload).context(MetadataParseSnafu {
            stage: "parse-startup-payload",
        })?;
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Records the end-of-stream marker. Returns true only on the first
    /// observation so the streaming-complete hook fires exactly once.
    pub fn observe_end(&mut self) -> bool {
        let first = !self.end_observed;
        self.end_observed = true;
        first
    }

    /// Marks the session errored. Returns true only on the first call so
    /// the error hook fires at most once per session.
    pub fn mark_errored(&mut self) -> bool {
        let first = !self.errored;
        self.errored = true;
        first
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn output_text(&self) -> &str {
        self.output.as_str()
    }

    pub fn end_observed(&self) -> bool {
        self.end_observed
    }

    pub fn errored(&self) -> bool {
        self.errored
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// True once a startup payload with at least one non-empty citation
    /// lookup has been received. Absence of metadata is distinguishable
    /// from received-but-empty; neither satisfies the predicate.
    pub fn metadata_ready(&self) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(StartupMetadata::citations_ready)
    }

    /// The completion predicate: queue empty, drain clock idle, end
    /// observed, metadata ready. Errors and prior finalization suppress it
    /// permanently. There is deliberately no timeout path: if metadata
    /// never becomes ready the predicate simply never holds.
    pub fn completion_ready(&self, drain_idle: bool) -> bool {
        !self.finalized
            && !self.errored
            && drain_idle
            && self.queue.is_empty()
            && self.end_observed
            && self.metadata_ready()
    }

    /// Emits the final-answer record the first time the predicate holds,
    /// then latches `finalized` so every later call is a no-op.
    pub fn take_final_answer(&mut self, drain_idle: bool) -> Option<FinalAnswer> {
        if !self.completion_ready(drain_idle) {
            return None;
        }
        let metadata = self.metadata.as_ref()?;
        let answer = FinalAnswer {
            answer: self.output.snapshot(),
            data_points: metadata.data_points.clone(),
            web_citation_lookup: metadata.web_citation_lookup.clone(),
            work_citation_lookup: metadata.work_citation_lookup.clone(),
            thought_chain: metadata.thought_chain.clone(),
        };
        self.finalized = true;
        Some(answer)
    }
}
