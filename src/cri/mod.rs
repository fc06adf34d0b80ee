//! CRI-API adapter for any runtime implementing the Kubernetes
//! `runtime.v1.RuntimeService` (containerd with the CRI plugin, CRI-O,
//! etc).
//!
//! There is no generated client here: `proto` hand-declares the minimal
//! subset of `api.proto` the adapter calls, since this workspace has no
//! `protoc`/`build.rs` step available to it.

mod adapter;
mod proto;

pub use adapter::{ConnectError, CriAdapter};
