use snafu::Snafu;

/// Session-fatal error taxonomy reported through the error hook.
///
/// Both variants permanently suppress finalization for the session that
/// raised them; already-drained output stays visible either way.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    /// The transport delivered an `error` event.
    #[snafu(display("stream transport reported an error: {message}"))]
    Transport { message: String },
    /// The `startup` payload could not be parsed into metadata, so the
    /// session can never satisfy its completion predicate.
    #[snafu(display("failed to parse startup metadata at `{stage}`: {source}"))]
    MetadataParse {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
