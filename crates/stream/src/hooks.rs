use crate::error::SessionError;
use crate::metadata::FinalAnswer;

type OutputFn = Box<dyn FnMut(&str) + Send>;
type FinalAnswerFn = Box<dyn FnMut(FinalAnswer) + Send>;
type StreamingCompleteFn = Box<dyn FnMut() + Send>;
type ErrorFn = Box<dyn FnMut(SessionError) + Send>;

/// Optional caller callbacks observing one streaming session.
///
/// Every hook is optional; an unconfigured hook is skipped silently. The
/// actor guarantees the delivery contract: `on_output` after every drained
/// unit, `on_final_answer` at most once, `on_streaming_complete` at most
/// once, `on_error` at most once. Nothing fires after teardown.
#[derive(Default)]
pub struct StreamerHooks {
    output: Option<OutputFn>,
    final_answer: Option<FinalAnswerFn>,
    streaming_complete: Option<StreamingCompleteFn>,
    error: Option<ErrorFn>,
}

impl StreamerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renderer feed: invoked with the full output snapshot after each
    /// drained unit.
    pub fn on_output(mut self, hook: impl FnMut(&str) + Send + 'static) -> Self {
        self.output = Some(Box::new(hook));
        self
    }

    pub fn on_final_answer(mut self, hook: impl FnMut(FinalAnswer) + Send + 'static) -> Self {
        self.final_answer = Some(Box::new(hook));
        self
    }

    /// Lifecycle notification for the first `end` event, decoupled from
    /// final-answer delivery (the queue may still be draining).
    pub fn on_streaming_complete(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.streaming_complete = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl FnMut(SessionError) + Send + 'static) -> Self {
        self.error = Some(Box::new(hook));
        self
    }

    pub(crate) fn emit_output(&mut self, text: &str) {
        if let Some(hook) = self.output.as_mut() {
            hook(text);
        }
    }

    pub(crate) fn emit_final_answer(&mut self, answer: FinalAnswer) {
        if let Some(hook) = self.final_answer.as_mut() {
            hook(answer);
        }
    }

    pub(crate) fn emit_streaming_complete(&mut self) {
        if let Some(hook) = self.streaming_complete.as_mut() {
            hook();
        }
    }

    pub(crate) fn emit_error(&mut self, error: SessionError) {
        if let Some(hook) = self.error.as_mut() {
            hook(error);
        }
    }
}
