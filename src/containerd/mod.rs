//! containerd adapter, built on [`containerd_client`].
//!
//! Honors the `nerdctl/name` naming convention and containerd's namespace
//! ("space") prefixing. The `moby` sub-namespace — containerd's
//! bookkeeping for containers actually managed by the Docker daemon — is
//! intentionally refused at construction time rather than silently
//! enumerated, since container names are not meaningful at that layer.

mod adapter;

pub use adapter::{ConnectError, ContainerdAdapter};
