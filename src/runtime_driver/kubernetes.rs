//! Pod variant of the worker driver
//!
//! One single-replica Deployment per stream; the deployment name is the
//! handle. Inspect reports rollout readiness, tail collects logs from the
//! running pod.

use super::{
    with_deadline, DriverError, WorkerDriver, WorkerSpec, WorkerState, WorkerStatus,
    INSPECT_DEADLINE, START_DEADLINE, STOP_DEADLINE,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use std::collections::BTreeMap;

/// Kubernetes driver
pub struct KubeDriver {
    client: kube::Client,
    namespace: String,
    image: String,
}

impl KubeDriver {
    pub async fn new(namespace: String, image: String) -> Result<Self, DriverError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| DriverError::retryable(format!("kube client init failed: {}", e)))?;
        Ok(Self {
            client,
            namespace,
            image,
        })
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn labels(spec: &WorkerSpec) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "vectorflow-worker".to_string());
        labels.insert("stream_id".to_string(), spec.stream_id.to_string());
        labels
    }

    fn build_deployment(&self, spec: &WorkerSpec) -> Deployment {
        let labels = Self::labels(spec);

        let env: Vec<EnvVar> = spec
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: "worker".to_string(),
            image: Some(self.image.clone()),
            env: Some(env),
            ..Default::default()
        };

        Deployment {
            metadata: ObjectMeta {
                name: Some(spec.handle.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn map_kube_error(e: kube::Error) -> DriverError {
        match e {
            kube::Error::Api(ref api) if api.code == 422 || api.code == 400 => {
                DriverError::permanent(format!("K8s rejected the resource: {}", e))
            }
            _ => DriverError::retryable(format!("K8s API error: {}", e)),
        }
    }
}

#[async_trait]
impl WorkerDriver for KubeDriver {
    async fn start(&self, spec: &WorkerSpec) -> Result<String, DriverError> {
        let deployment = self.build_deployment(spec);
        let deployments = self.deployments();
        let handle = spec.handle.clone();

        with_deadline(START_DEADLINE, "deployment create", async move {
            match deployments
                .create(&PostParams::default(), &deployment)
                .await
            {
                Ok(_) => {
                    tracing::info!(handle = %handle, "Worker deployment created");
                    Ok(handle)
                }
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    // Already exists: converge it to the desired spec
                    deployments
                        .patch(
                            &handle,
                            &PatchParams::apply("vectorflow-control").force(),
                            &Patch::Apply(&deployment),
                        )
                        .await
                        .map_err(Self::map_kube_error)?;
                    tracing::info!(handle = %handle, "Worker deployment converged");
                    Ok(handle)
                }
                Err(e) => Err(Self::map_kube_error(e)),
            }
        })
        .await
    }

    async fn stop(&self, handle: &str) -> Result<(), DriverError> {
        let deployments = self.deployments();
        let handle = handle.to_string();

        with_deadline(STOP_DEADLINE, "deployment delete", async move {
            match deployments.delete(&handle, &DeleteParams::default()).await {
                Ok(_) => {
                    tracing::info!(handle = %handle, "Worker deployment deleted");
                    Ok(())
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    tracing::debug!(handle = %handle, "Worker deployment already absent");
                    Ok(())
                }
                Err(e) => Err(Self::map_kube_error(e)),
            }
        })
        .await
    }

    async fn inspect(&self, handle: &str) -> Result<WorkerStatus, DriverError> {
        let deployments = self.deployments();
        let handle = handle.to_string();

        with_deadline(INSPECT_DEADLINE, "deployment inspect", async move {
            let deployment = match deployments.get(&handle).await {
                Ok(d) => d,
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    return Ok(WorkerStatus {
                        state: WorkerState::Missing,
                        started_at: None,
                        last_error: None,
                    });
                }
                Err(e) => return Err(Self::map_kube_error(e)),
            };

            let status = deployment.status.unwrap_or_default();
            let ready = status.ready_replicas.unwrap_or(0);
            let state = if ready >= 1 {
                WorkerState::Running
            } else {
                WorkerState::Starting
            };

            let started_at = deployment.metadata.creation_timestamp.map(|t| t.0);

            let last_error = status
                .conditions
                .unwrap_or_default()
                .into_iter()
                .find(|c| c.type_ == "Progressing" && c.status == "False")
                .and_then(|c| c.message);

            Ok(WorkerStatus {
                state,
                started_at,
                last_error,
            })
        })
        .await
    }

    async fn tail(&self, handle: &str, lines: usize) -> Result<Vec<String>, DriverError> {
        let pods = self.pods();
        let handle = handle.to_string();

        with_deadline(INSPECT_DEADLINE, "pod logs", async move {
            // Derive the stream_id label back from the handle
            let stream_id = handle.strip_prefix("worker-").unwrap_or(&handle);
            let selector = format!("app=vectorflow-worker,stream_id={}", stream_id);
            let list = pods
                .list(&ListParams::default().labels(&selector))
                .await
                .map_err(Self::map_kube_error)?;

            let Some(pod) = list.items.into_iter().next() else {
                return Ok(Vec::new());
            };
            let Some(pod_name) = pod.metadata.name else {
                return Ok(Vec::new());
            };

            let params = LogParams {
                tail_lines: Some(lines as i64),
                ..Default::default()
            };
            let raw = pods
                .logs(&pod_name, &params)
                .await
                .map_err(Self::map_kube_error)?;
            Ok(raw.lines().map(|l| l.to_string()).collect())
        })
        .await
    }
}
