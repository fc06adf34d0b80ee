use std::collections::HashMap;

use containerd_client::services::v1::containers_client::ContainersClient;
use containerd_client::services::v1::events_client::EventsClient;
use containerd_client::services::v1::tasks_client::TasksClient;
use containerd_client::services::v1::{
    GetContainerRequest, GetRequest as GetTaskRequest, ListContainersRequest, ListTasksRequest,
    SubscribeRequest,
};
use containerd_client::with_namespace;
use futures::StreamExt;
use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::adapter::{ErrorStream, Event, EventStream, PROJECT_UNKNOWN};
use crate::error::AdapterError;
use crate::model::Container;

const NAME_LABEL: &str = "nerdctl/name";
const MOBY_NAMESPACE: &str = "moby";

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("the moby namespace is managed by Docker and is not supported here")]
    MobyNamespace,
    #[error("failed to connect to containerd at {endpoint:?}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
}

pub struct ContainerdAdapter {
    channel: Channel,
    namespace: String,
    endpoint: String,
}

impl ContainerdAdapter {
    pub async fn connect(endpoint: &str, namespace: &str) -> Result<Self, ConnectError> {
        if namespace == MOBY_NAMESPACE {
            return Err(ConnectError::MobyNamespace);
        }
        let channel = containerd_client::connect(endpoint)
            .await
            .map_err(|source| ConnectError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        Ok(Self {
            channel,
            namespace: namespace.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    /// containerd names and ids are prefixed with `<namespace>/` outside the
    /// default namespace; `nerdctl/name` falls back to the raw id when
    /// absent.
    fn scoped(&self, raw: &str) -> String {
        scope_id(&self.namespace, raw)
    }

    fn unscope<'a>(&self, id_or_name: &'a str) -> &'a str {
        let prefix = format!("{}/", self.namespace);
        id_or_name.strip_prefix(prefix.as_str()).unwrap_or(id_or_name)
    }
}

/// Shared by [`ContainerdAdapter::scoped`] and the event translator, which
/// runs on a detached task that only captures the namespace string.
fn scope_id(namespace: &str, raw: &str) -> String {
    if namespace == "default" {
        raw.to_string()
    } else {
        format!("{namespace}/{raw}")
    }
}

#[async_trait::async_trait]
impl crate::adapter::EngineAdapter for ContainerdAdapter {
    async fn list(&self) -> Result<Vec<Container>, AdapterError> {
        let mut containers_client = ContainersClient::new(self.channel.clone());
        let mut tasks_client = TasksClient::new(self.channel.clone());

        let containers = containers_client
            .list(with_namespace!(ListContainersRequest { filters: vec![] }, self.namespace))
            .await
            .map_err(AdapterError::other)?
            .into_inner()
            .containers;

        let tasks = tasks_client
            .list(with_namespace!(ListTasksRequest { filter: String::new() }, self.namespace))
            .await
            .map_err(AdapterError::other)?
            .into_inner()
            .tasks;

        let pids: HashMap<String, (u32, bool)> = tasks
            .into_iter()
            .map(|task| (task.container_id, (task.pid, task.status == 5 /* PAUSED */)))
            .collect();

        let mut result = Vec::with_capacity(containers.len());
        for container in containers {
            let Some(&(pid, paused)) = pids.get(&container.id) else {
                continue;
            };
            if pid == 0 {
                continue;
            }
            let name = container
                .labels
                .get(NAME_LABEL)
                .cloned()
                .unwrap_or_else(|| container.id.clone());
            result.push(Container::new(
                self.scoped(&container.id),
                self.scoped(&name),
                container.labels,
                pid,
                crate::model::NO_PROJECT,
                paused,
            ));
        }
        Ok(result)
    }

    async fn inspect(&self, id_or_name: &str) -> Result<Container, AdapterError> {
        let id = self.unscope(id_or_name).to_string();
        let mut containers_client = ContainersClient::new(self.channel.clone());
        let mut tasks_client = TasksClient::new(self.channel.clone());

        let container = containers_client
            .get(with_namespace!(GetContainerRequest { id: id.clone() }, self.namespace))
            .await
            .map_err(|status| {
                if status.code() == tonic::Code::NotFound {
                    AdapterError::NotFound(id_or_name.to_string())
                } else {
                    AdapterError::other(status)
                }
            })?
            .into_inner()
            .container
            .ok_or_else(|| AdapterError::NotFound(id_or_name.to_string()))?;

        let task = tasks_client
            .get(with_namespace!(GetTaskRequest { container_id: id.clone(), exec_id: String::new() }, self.namespace))
            .await
            .map_err(|status| {
                if status.code() == tonic::Code::NotFound {
                    AdapterError::Processless(id_or_name.to_string())
                } else {
                    AdapterError::other(status)
                }
            })?
            .into_inner()
            .process
            .ok_or_else(|| AdapterError::Processless(id_or_name.to_string()))?;

        if task.pid == 0 {
            return Err(AdapterError::Processless(id_or_name.to_string()));
        }

        let name = container
            .labels
            .get(NAME_LABEL)
            .cloned()
            .unwrap_or_else(|| container.id.clone());

        Ok(Container::new(
            self.scoped(&container.id),
            self.scoped(&name),
            container.labels,
            task.pid,
            crate::model::NO_PROJECT,
            task.status == 5,
        ))
    }

    async fn lifecycle_events(
        &self,
        cancellation: CancellationToken,
    ) -> Result<(EventStream, ErrorStream), AdapterError> {
        let mut events_client = EventsClient::new(self.channel.clone());
        let mut upstream = events_client
            .subscribe(with_namespace!(SubscribeRequest { filters: vec![] }, self.namespace))
            .await
            .map_err(AdapterError::other)?
            .into_inner();

        let (event_tx, event_rx) = mpsc::channel(16);
        let (error_tx, error_rx) = mpsc::channel(1);
        let namespace = self.namespace.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        let _ = error_tx.send(AdapterError::Cancelled).await;
                        break;
                    }
                    envelope = upstream.next() => {
                        match envelope {
                            Some(Ok(envelope)) => {
                                if envelope.namespace != namespace {
                                    continue;
                                }
                                if let Some(event) = translate(&envelope.topic, envelope.event, &namespace) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Err(status)) => {
                                let _ = error_tx.send(AdapterError::other(status)).await;
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
        &self.namespace
    }

    fn engine_type(&self) -> &str {
        "containerd.io"
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

    /// Downcasts to `&tonic::transport::Channel`.
    fn client(&self) -> &(dyn std::any::Any + Send + Sync) {
        &self.channel
    }

    async fn close(&self) {}
}

/// containerd's task events do not carry project/compose labels, so every
/// translated event reports [`PROJECT_UNKNOWN`]; the Watcher resolves it
/// from the already-known Portfolio entry. Ids are scoped to match the ids
/// `list`/`inspect` store in the Portfolio, via the same `<namespace>/` rule.
fn translate(topic: &str, payload: Option<prost_types::Any>, namespace: &str) -> Option<Event> {
    let payload = payload?;
    match topic {
        "/tasks/start" => {
            let msg = containerd_client::events::TaskStart::decode(payload.value.as_slice()).ok()?;
            Some(Event::Started {
                id: scope_id(namespace, &msg.container_id),
                project: PROJECT_UNKNOWN.to_string(),
            })
        }
        "/tasks/exit" => {
            let msg = containerd_client::events::TaskExit::decode(payload.value.as_slice()).ok()?;
            Some(Event::Exited {
                id: scope_id(namespace, &msg.container_id),
                project: PROJECT_UNKNOWN.to_string(),
            })
        }
        "/tasks/paused" => {
            let msg = containerd_client::events::TaskPaused::decode(payload.value.as_slice()).ok()?;
            Some(Event::Paused {
                id: scope_id(namespace, &msg.container_id),
                project: PROJECT_UNKNOWN.to_string(),
            })
        }
        "/tasks/resumed" => {
            let msg = containerd_client::events::TaskResumed::decode(payload.value.as_slice()).ok()?;
            Some(Event::Unpaused {
                id: scope_id(namespace, &msg.container_id),
                project: PROJECT_UNKNOWN.to_string(),
            })
        }
        _ => None,
    }
}
