//! Engine-neutral synchronization of the "alive container" portfolio.
//!
//! Tracks containers with an initial process (running or paused) across
//! Docker, containerd, or any CRI-API engine, reconciling a non-atomic
//! enumeration against a live event stream and publishing a queryable
//! snapshot ("make-before-break": the previous snapshot stays visible
//! while a re-sync is in flight).
//!
//! The core is engine-agnostic; engine support lives behind cargo
//! features (`docker`, `containerd`, `cri`) and is layered on top of the
//! [`adapter::EngineAdapter`] contract.

pub mod adapter;
pub mod backoff;
pub mod error;
pub mod model;
mod pending;
pub mod watcher;

#[cfg(feature = "docker")]
pub mod docker;

#[cfg(feature = "containerd")]
pub mod containerd;

#[cfg(feature = "cri")]
pub mod cri;

pub use adapter::{EngineAdapter, Event, PROJECT_UNKNOWN};
pub use backoff::{Backoff, BackoffOutcome, ExponentialBackoff, NeverRetry};
pub use error::{AdapterError, WatchError};
pub use model::{AddOutcome, Container, NotPresent, Portfolio, Project, NO_PROJECT};
pub use watcher::Watcher;

use std::sync::Arc;

/// Opens a [`Watcher`] against a Docker (or Moby-compatible) daemon.
///
/// `endpoint` is passed straight to bollard; pass an empty string for the
/// platform default (`unix:///var/run/docker.sock` on Linux).
#[cfg(feature = "docker")]
pub fn watch_docker(
    endpoint: &str,
    backoff: Option<Box<dyn Backoff>>,
) -> Result<Watcher, docker::ConnectError> {
    let adapter: Arc<dyn EngineAdapter> = Arc::new(docker::DockerAdapter::connect(endpoint)?);
    Ok(match backoff {
        Some(b) => Watcher::with_backoff(adapter, BoxedBackoff(b)),
        None => Watcher::new(adapter),
    })
}

/// Opens a [`Watcher`] against a containerd socket.
///
/// `namespace` selects the containerd namespace to watch (e.g. `"default"`,
/// `"k8s.io"`); the `moby` namespace is intentionally unsupported since it
/// is Docker's own sub-namespace (see [`adapter::EngineAdapter`] docs).
#[cfg(feature = "containerd")]
pub async fn watch_containerd(
    endpoint: &str,
    namespace: &str,
    backoff: Option<Box<dyn Backoff>>,
) -> Result<Watcher, containerd::ConnectError> {
    let adapter: Arc<dyn EngineAdapter> =
        Arc::new(containerd::ContainerdAdapter::connect(endpoint, namespace).await?);
    Ok(match backoff {
        Some(b) => Watcher::with_backoff(adapter, BoxedBackoff(b)),
        None => Watcher::new(adapter),
    })
}

/// Opens a [`Watcher`] against any CRI-API compliant runtime endpoint.
///
/// `fallback_pid` seeds every discovered container's pid, since CRI exposes
/// no host pid through its public API; pass `None` for the adapter's
/// default of `1`.
#[cfg(feature = "cri")]
pub async fn watch_cri(
    endpoint: &str,
    fallback_pid: Option<u32>,
    backoff: Option<Box<dyn Backoff>>,
) -> Result<Watcher, cri::ConnectError> {
    let adapter: Arc<dyn EngineAdapter> = Arc::new(
        cri::CriAdapter::connect_with_pid(endpoint, fallback_pid.unwrap_or(1)).await?,
    );
    Ok(match backoff {
        Some(b) => Watcher::with_backoff(adapter, BoxedBackoff(b)),
        None => Watcher::new(adapter),
    })
}

/// Adapts a boxed trait object so it can be passed where `impl Backoff` is
/// expected by [`Watcher::with_backoff`].
struct BoxedBackoff(Box<dyn Backoff>);

impl Backoff for BoxedBackoff {
    fn next(&self, attempt: u32) -> BackoffOutcome {
        self.0.next(attempt)
    }
}
