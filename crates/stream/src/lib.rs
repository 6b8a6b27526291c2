#![deny(unsafe_code)]

/// Incremental streaming consumer and completion coordinator.
///
/// This crate turns a live, out-of-order push stream of answer events
/// (`startup`/`message`/`end`/`error`) into a smoothly animated partial
/// answer plus a single final-answer record, emitted exactly once, only
/// after every required piece of data has arrived. Rendering the output
/// and producing the events are both external collaborators.
pub mod error;
/// Optional caller callbacks observing one session.
pub mod hooks;
/// Startup metadata payload and the final-answer record.
pub mod metadata;
/// Pending-unit queue and the append-only output surface.
pub mod queue;
/// Session aggregate and the completion predicate.
pub mod session;
/// The session actor: drain clock, listener bindings, lifecycle guard.
pub mod streamer;
/// Transport event contract and channel plumbing.
pub mod transport;

pub use error::{SessionError, SessionResult};
pub use hooks::StreamerHooks;
pub use metadata::{Citation, FinalAnswer, StartupMetadata};
pub use queue::{ChunkQueue, OutputBuffer};
pub use session::Session;
pub use streamer::{AnswerSource, CharacterStreamer, StreamerConfig, StreamerHandle};
pub use transport::{StreamTransport, TransportEvent, TransportSender, TransportWorker};
