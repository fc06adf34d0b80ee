//! Docker/Moby adapter, built on [`bollard`].
//!
//! Composer project grouping follows the `com.docker.compose.project`
//! label convention.

mod adapter;

pub use adapter::{ConnectError, DockerAdapter};
