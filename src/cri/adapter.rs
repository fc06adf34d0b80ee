use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::proto::{
    self, ContainerEventType, ContainerFilter, ContainerState, ContainerStateValue,
    GetEventsRequest, ListContainersRequest, ListPodSandboxRequest, PodSandboxFilter,
    PodSandboxStateValue, PodSandboxStatusRequest, RuntimeServiceClient,
};
use crate::adapter::{ErrorStream, Event, EventStream, PROJECT_UNKNOWN};
use crate::error::AdapterError;
use crate::model::Container;

const ANNOTATION_PREFIX: &str = "annotation.k8s/";
const LABEL_POD_NAME: &str = "io.kubernetes.pod.name";
const LABEL_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";
const LABEL_POD_UID: &str = "io.kubernetes.pod.uid";
const LABEL_CONTAINER_NAME: &str = "io.kubernetes.container.name";
const LABEL_SANDBOX_MARKER: &str = "io.kubernetes.sandbox";

#[derive(Debug, thiserror::Error)]
#[error("failed to connect to CRI endpoint {endpoint:?}: {source}")]
pub struct ConnectError {
    endpoint: String,
    #[source]
    source: tonic::transport::Error,
}

/// CRI does not expose a host pid through the public API (host-namespace
/// visitation for that is explicitly out of scope here), nor does it have
/// a pause/unpause concept. This adapter reports every discovered
/// container with `fallback_pid` and never emits Paused/Unpaused.
pub struct CriAdapter {
    client: Mutex<RuntimeServiceClient>,
    endpoint: String,
    fallback_pid: u32,
}

impl CriAdapter {
    pub async fn connect(endpoint: &str) -> Result<Self, ConnectError> {
        Self::connect_with_pid(endpoint, 1).await
    }

    pub async fn connect_with_pid(endpoint: &str, fallback_pid: u32) -> Result<Self, ConnectError> {
        let channel = tonic::transport::Endpoint::from_shared(endpoint.to_string())
            .map_err(|source| ConnectError {
                endpoint: endpoint.to_string(),
                source,
            })?
            .connect()
            .await
            .map_err(|source| ConnectError {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Self {
            client: Mutex::new(RuntimeServiceClient::new(channel)),
            endpoint: endpoint.to_string(),
            fallback_pid: fallback_pid.max(1),
        })
    }

    async fn namespace_of(&self, pod_sandbox_id: &str) -> Option<String> {
        if pod_sandbox_id.is_empty() {
            return None;
        }
        let mut client = self.client.lock().await;
        let response = client
            .pod_sandbox_status(PodSandboxStatusRequest {
                pod_sandbox_id: pod_sandbox_id.to_string(),
                verbose: false,
            })
            .await
            .ok()?;
        response
            .into_inner()
            .status
            .and_then(|status| status.metadata)
            .map(|metadata| metadata.namespace)
    }

    fn labels_for(status: &proto::ContainerStatus, sandbox_namespace: Option<&str>) -> HashMap<String, String> {
        let mut labels = status.labels.clone();
        for (key, value) in &status.annotations {
            labels.insert(format!("{ANNOTATION_PREFIX}{key}"), value.clone());
        }
        if let Some(metadata) = &status.metadata {
            labels.insert(LABEL_CONTAINER_NAME.to_string(), metadata.name.clone());
        }
        if let Some(namespace) = sandbox_namespace {
            labels.insert(LABEL_POD_NAMESPACE.to_string(), namespace.to_string());
        }
        labels
    }

    /// The sandbox (pause) container backing a pod is not returned by
    /// `ListContainers`/`ContainerStatus`; it is its own CRI entity. Modeled
    /// here as a container in its own right, carrying the `io.kubernetes.sandbox`
    /// marker label so consumers can tell it apart from an application container.
    fn sandbox_container(sandbox: &proto::PodSandbox, fallback_pid: u32) -> Container {
        let mut labels = sandbox.labels.clone();
        for (key, value) in &sandbox.annotations {
            labels.insert(format!("{ANNOTATION_PREFIX}{key}"), value.clone());
        }
        labels.insert(LABEL_SANDBOX_MARKER.to_string(), "true".to_string());

        let (name, namespace) = match &sandbox.metadata {
            Some(metadata) => {
                labels.insert(LABEL_POD_NAME.to_string(), metadata.name.clone());
                labels.insert(LABEL_POD_UID.to_string(), metadata.uid.clone());
                labels.insert(LABEL_POD_NAMESPACE.to_string(), metadata.namespace.clone());
                (metadata.name.clone(), metadata.namespace.clone())
            }
            None => (sandbox.id.clone(), crate::model::NO_PROJECT.to_string()),
        };

        let project = if namespace.is_empty() {
            crate::model::NO_PROJECT.to_string()
        } else {
            namespace
        };

        Container::new(sandbox.id.clone(), name, labels, fallback_pid, project, false)
    }

    /// `pod_sandbox_id` is the hint from a `ListContainers` summary; pass
    /// `""` when inspecting a bare id (e.g. from a lifecycle event), in
    /// which case the pod namespace label set by kubelet on the container
    /// itself (if present) is used instead of an extra round trip.
    async fn inspect_with_sandbox(
        &self,
        id_or_name: &str,
        pod_sandbox_id: &str,
    ) -> Result<Container, AdapterError> {
        let response = {
            let mut client = self.client.lock().await;
            client
                .container_status(proto::ContainerStatusRequest {
                    container_id: id_or_name.to_string(),
                    verbose: false,
                })
                .await
                .map_err(|status| {
                    if status.code() == tonic::Code::NotFound {
                        AdapterError::NotFound(id_or_name.to_string())
                    } else {
                        AdapterError::other(status)
                    }
                })?
        };

        let status = response
            .into_inner()
            .status
            .ok_or_else(|| AdapterError::NotFound(id_or_name.to_string()))?;

        if status.state != ContainerState::Running as i32 {
            return Err(AdapterError::Processless(id_or_name.to_string()));
        }

        let name = status
            .metadata
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| status.id.clone());

        let namespace = self.namespace_of(pod_sandbox_id).await;
        let labels = Self::labels_for(&status, namespace.as_deref());
        let project = labels
            .get(LABEL_POD_NAMESPACE)
            .cloned()
            .unwrap_or_else(|| crate::model::NO_PROJECT.to_string());

        Ok(Container::new(
            status.id,
            name,
            labels,
            self.fallback_pid,
            project,
            false,
        ))
    }

    async fn inspect_sandbox(&self, id_or_name: &str) -> Result<Container, AdapterError> {
        let response = {
            let mut client = self.client.lock().await;
            client
                .pod_sandbox_status(PodSandboxStatusRequest {
                    pod_sandbox_id: id_or_name.to_string(),
                    verbose: false,
                })
                .await
                .map_err(|status| {
                    if status.code() == tonic::Code::NotFound {
                        AdapterError::NotFound(id_or_name.to_string())
                    } else {
                        AdapterError::other(status)
                    }
                })?
        };

        let status = response
            .into_inner()
            .status
            .ok_or_else(|| AdapterError::NotFound(id_or_name.to_string()))?;

        if status.state != proto::PodSandboxState::Ready as i32 {
            return Err(AdapterError::Processless(id_or_name.to_string()));
        }

        let sandbox = proto::PodSandbox {
            id: status.id,
            metadata: status.metadata,
            state: status.state,
            labels: status.labels,
            annotations: status.annotations,
        };
        Ok(Self::sandbox_container(&sandbox, self.fallback_pid))
    }
}

#[async_trait::async_trait]
impl crate::adapter::EngineAdapter for CriAdapter {
    async fn list(&self) -> Result<Vec<Container>, AdapterError> {
        let running = ContainerFilter {
            state: Some(ContainerStateValue {
                state: ContainerState::Running as i32,
            }),
            ..ContainerFilter::default()
        };

        let ready_sandboxes = PodSandboxFilter {
            state: Some(PodSandboxStateValue {
                state: proto::PodSandboxState::Ready as i32,
            }),
            ..PodSandboxFilter::default()
        };

        let (containers_response, sandboxes_response) = {
            let mut client = self.client.lock().await;
            let containers = client
                .list_containers(ListContainersRequest { filter: Some(running) })
                .await
                .map_err(AdapterError::other)?;
            let sandboxes = client
                .list_pod_sandbox(ListPodSandboxRequest {
                    filter: Some(ready_sandboxes),
                })
                .await
                .map_err(AdapterError::other)?;
            (containers, sandboxes)
        };

        let mut containers = Vec::new();
        for summary in containers_response.into_inner().containers {
            match self.inspect_with_sandbox(&summary.id, &summary.pod_sandbox_id).await {
                Ok(container) => containers.push(container),
                Err(err) if err.is_processless_or_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        for sandbox in sandboxes_response.into_inner().items {
            containers.push(Self::sandbox_container(&sandbox, self.fallback_pid));
        }
        Ok(containers)
    }

    async fn inspect(&self, id_or_name: &str) -> Result<Container, AdapterError> {
        match self.inspect_with_sandbox(id_or_name, "").await {
            Err(AdapterError::NotFound(_)) => self.inspect_sandbox(id_or_name).await,
            result => result,
        }
    }

    async fn lifecycle_events(
        &self,
        cancellation: CancellationToken,
    ) -> Result<(EventStream, ErrorStream), AdapterError> {
        let mut upstream = {
            let mut client = self.client.lock().await;
            client
                .get_container_events(GetEventsRequest {})
                .await
                .map_err(AdapterError::other)?
                .into_inner()
        };

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
                            Some(Ok(envelope)) => {
                                if let Some(event) = translate(envelope) {
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
        ""
    }

    fn engine_type(&self) -> &str {
        "k8s.io/cri-api"
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

    /// Downcasts to `&tokio::sync::Mutex<RuntimeServiceClient>`; callers
    /// needing direct access lock it themselves the same way this adapter
    /// does internally.
    fn client(&self) -> &(dyn std::any::Any + Send + Sync) {
        &self.client
    }

    async fn close(&self) {}
}

/// The sandbox container for a pod carries no distinguishing CRI state of
/// its own (marker key `io.kubernetes.sandbox`); CRI's event
/// payload includes a fully-populated `pod_sandbox_status`, which is the
/// only place the namespace is available without an extra round trip.
fn translate(envelope: proto::ContainerEventResponse) -> Option<Event> {
    let namespace = envelope
        .pod_sandbox_status
        .as_ref()
        .and_then(|s| s.metadata.as_ref())
        .map(|m| m.namespace.clone());
    let project = namespace.unwrap_or_else(|| PROJECT_UNKNOWN.to_string());

    match ContainerEventType::from_i32(envelope.container_event_type) {
        Some(ContainerEventType::Started) => Some(Event::Started {
            id: envelope.container_id,
            project,
        }),
        Some(ContainerEventType::Stopped) => Some(Event::Exited {
            id: envelope.container_id,
            project,
        }),
        _ => None,
    }
}
