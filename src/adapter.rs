use std::pin::Pin;

use futures::Stream;

use crate::error::AdapterError;

/// Reserved project sentinel used by adapters that cannot resolve the
/// project of a container at event time. Distinct from [`crate::model::NO_PROJECT`]
/// (the empty string), which means "this container genuinely has no
/// project".
pub const PROJECT_UNKNOWN: &str = "project-unknown";

/// A lifecycle event as reported by an adapter's event stream.
///
/// Every variant carries the container id and a project name that is
/// either known or [`PROJECT_UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started { id: String, project: String },
    Exited { id: String, project: String },
    Paused { id: String, project: String },
    Unpaused { id: String, project: String },
}

impl Event {
    pub fn id(&self) -> &str {
        match self {
            Self::Started { id, .. }
            | Self::Exited { id, .. }
            | Self::Paused { id, .. }
            | Self::Unpaused { id, .. } => id,
        }
    }

    pub fn project(&self) -> &str {
        match self {
            Self::Started { project, .. }
            | Self::Exited { project, .. }
            | Self::Paused { project, .. }
            | Self::Unpaused { project, .. } => project,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;
pub type ErrorStream = Pin<Box<dyn Stream<Item = AdapterError> + Send>>;

/// The contract the core consumes from each engine-specific implementation.
///
/// One adapter instance backs exactly one [`crate::watcher::Watcher`], which
/// owns it exclusively and calls [`EngineAdapter::close`] on its own
/// `close()`.
#[async_trait::async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Lists currently alive containers. Implementations MUST filter out
    /// containers lacking an initial process before returning them.
    async fn list(&self) -> Result<Vec<crate::model::Container>, AdapterError>;

    /// Inspects a single container by id or name.
    ///
    /// MUST return [`AdapterError::Processless`] or [`AdapterError::NotFound`]
    /// (rather than `Other`) for those specific conditions, since the core
    /// relies on the distinction to silently drop the corresponding event.
    async fn inspect(&self, id_or_name: &str) -> Result<crate::model::Container, AdapterError>;

    /// Opens two lazy streams: lifecycle events, and adapter errors.
    ///
    /// Subscribing MUST take effect before this call returns so that no
    /// event between subscription and the caller's first `list()` is
    /// missed. When the supplied token is cancelled, the adapter MUST push
    /// [`AdapterError::Cancelled`] onto the error stream and then end it.
    async fn lifecycle_events(
        &self,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<(EventStream, ErrorStream), AdapterError>;

    /// Engine id, or empty if the engine has no such notion.
    fn id(&self) -> &str;

    /// Short ASCII engine type tag, e.g. `"docker.com"`, `"containerd.io"`,
    /// `"k8s.io/cri-api"`.
    fn engine_type(&self) -> &str;

    /// Engine version string, as reported by the engine itself.
    fn version(&self) -> &str;

    /// The API endpoint this adapter is talking to.
    fn api(&self) -> &str;

    /// Engine daemon pid, or zero if unknown.
    fn pid(&self) -> u32;

    /// The underlying raw client handle, for callers that need
    /// engine-specific functionality this trait does not expose. Downcast
    /// with [`std::any::Any::downcast_ref`] to the concrete type documented
    /// by the adapter that produced it (e.g. `&bollard::Docker` for
    /// [`crate::docker::DockerAdapter`]).
    fn client(&self) -> &(dyn std::any::Any + Send + Sync);

    /// Releases adapter resources. MUST be idempotent and safe to call
    /// after the event stream has already ended on its own.
    async fn close(&self);
}
