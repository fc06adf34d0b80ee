use std::collections::HashMap;

use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::service::{ContainerInspectResponse, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ErrorStream, Event, EventStream};
use crate::error::AdapterError;
use crate::model::Container;

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

#[derive(Debug, thiserror::Error)]
#[error("failed to connect to docker daemon at {endpoint:?}: {source}")]
pub struct ConnectError {
    endpoint: String,
    #[source]
    source: bollard::errors::Error,
}

/// Docker/Moby adapter. `endpoint` is empty for the platform default socket,
/// otherwise a unix socket path or `tcp://host:port`.
pub struct DockerAdapter {
    docker: Docker,
    endpoint: String,
}

impl DockerAdapter {
    pub fn connect(endpoint: &str) -> Result<Self, ConnectError> {
        let docker = if endpoint.is_empty() {
            Docker::connect_with_local_defaults()
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_socket(endpoint, 120, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|source| ConnectError {
            endpoint: endpoint.to_string(),
            source,
        })?;

        Ok(Self {
            docker,
            endpoint: endpoint.to_string(),
        })
    }

}

#[async_trait::async_trait]
impl crate::adapter::EngineAdapter for DockerAdapter {
    async fn list(&self) -> Result<Vec<Container>, AdapterError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(AdapterError::other)?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let state = summary.state.as_deref().unwrap_or_default();
            if state != "running" && state != "paused" {
                continue;
            }
            let id = match &summary.id {
                Some(id) => id.clone(),
                None => continue,
            };
            match self.inspect(&id).await {
                Ok(container) => containers.push(container),
                Err(err) if err.is_processless_or_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(containers)
    }

    async fn inspect(&self, id_or_name: &str) -> Result<Container, AdapterError> {
        let response: ContainerInspectResponse = self
            .docker
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
            .map_err(|err| match &err {
                bollard::errors::Error::DockerResponseServerError { status_code, .. }
                    if *status_code == 404 =>
                {
                    AdapterError::NotFound(id_or_name.to_string())
                }
                _ => AdapterError::other(err),
            })?;

        let id = response.id.unwrap_or_else(|| id_or_name.to_string());
        let name = response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());
        let labels = response
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();
        let pid = response
            .state
            .as_ref()
            .and_then(|s| s.pid)
            .unwrap_or(0);
        let paused = response
            .state
            .as_ref()
            .and_then(|s| s.paused)
            .unwrap_or(false);

        if pid <= 0 {
            return Err(AdapterError::Processless(id));
        }

        let project = labels.get(COMPOSE_PROJECT_LABEL).cloned().unwrap_or_default();
        Ok(Container::new(id, name, labels, pid as u32, project, paused))
    }

    async fn lifecycle_events(
        &self,
        cancellation: CancellationToken,
    ) -> Result<(EventStream, ErrorStream), AdapterError> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            since: None,
            until: None,
            filters,
        };

        let mut upstream = self.docker.events(Some(options));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (error_tx, error_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        let _ = error_tx.send(AdapterError::Cancelled).await;
                        break;
                    }
                    message = upstream.next() => {
                        match message {
                            Some(Ok(msg)) => {
                                if let Some(event) = translate(msg) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Err(err)) => {
                                let _ = error_tx.send(AdapterError::other(err)).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let events: EventStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(event_rx));
        let errors: ErrorStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(error_rx));
        Ok((events, errors))
    }

    fn id(&self) -> &str {
        ""
    }

    fn engine_type(&self) -> &str {
        "docker.com"
    }

    fn version(&self) -> &str {
        ""
    }

    fn api(&self) -> &str {
        &self.endpoint
    }

    fn pid(&self) -> u32 {
        0
    }

    /// Downcasts to `&bollard::Docker`.
    fn client(&self) -> &(dyn std::any::Any + Send + Sync) {
        &self.docker
    }

    async fn close(&self) {}
}

fn translate(msg: EventMessage) -> Option<Event> {
    if msg.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let actor = msg.actor?;
    let id = actor.id?;
    let attributes = actor.attributes.unwrap_or_default();
    // Docker's /events Actor.Attributes carries the same label set
    // inspect_container exposes, so the project is genuinely known here;
    // empty means "no compose label", not "unresolvable".
    let project = attributes.get(COMPOSE_PROJECT_LABEL).cloned().unwrap_or_default();

    match msg.action.as_deref() {
        Some("start") => Some(Event::Started { id, project }),
        Some("die") => Some(Event::Exited { id, project }),
        Some("pause") => Some(Event::Paused { id, project }),
        Some("unpause") => Some(Event::Unpaused { id, project }),
        other => {
            if let Some(action) = other {
                tracing::trace!(action, "ignoring unhandled docker event action");
            }
            None
        }
    }
}

