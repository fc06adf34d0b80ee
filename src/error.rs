/// Errors an [`crate::adapter::EngineAdapter`] can report back to the core.
///
/// The core only ever reacts to the `Processless` / `NotFound` variants by
/// silently dropping the event or inspection result that produced them;
/// everything else is folded into a transient-vs-permanent decision by the
/// [`crate::watcher::Watcher`] retry loop.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The container exists but has no initial process (created, dead,
    /// restarting). Distinct from `NotFound` so callers can special-case it.
    #[error("container {0} has no process")]
    Processless(String),

    /// The engine has no record of the container at all.
    #[error("container {0} not found")]
    NotFound(String),

    /// The surrounding cancellation token fired; the adapter must surface
    /// this on its error stream and then close it.
    #[error("cancelled")]
    Cancelled,

    /// Anything else: connection refused, malformed payloads, engine-side
    /// 5xx, a dropped socket, a disconnected gRPC stream.
    #[error("engine error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AdapterError {
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(err))
    }

    pub fn is_processless_or_not_found(&self) -> bool {
        matches!(self, Self::Processless(_) | Self::NotFound(_))
    }
}

/// The terminal result of [`crate::watcher::Watcher::watch`].
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The backoff policy gave up after a transient failure.
    #[error("gave up retrying after: {0}")]
    GaveUp(#[source] AdapterError),
}
