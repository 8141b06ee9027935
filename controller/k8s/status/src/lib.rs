//! Writes controller output back to the Kubernetes API.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Context;
use mesh_controller_core::{AccessCertStatusWriter, SecretStore, CONTROLLER_NAME};
use mesh_controller_k8s_api::{
    self as k8s, AccessCert, AccessCertStatus, Api, ByteString, DeleteParams, ObjectMeta, Patch,
    PatchParams, Secret,
};
use std::collections::BTreeMap;

/// Stores secrets with server-side apply.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: k8s::Client,
}

/// Patches the status subresource of `AccessCert` resources.
#[derive(Clone)]
pub struct KubeAccessCertStatus {
    client: k8s::Client,
}

// === impl KubeSecretStore ===

impl KubeSecretStore {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    async fn create_or_update_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        type_: &str,
    ) -> anyhow::Result<()> {
        let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
        let secret = make_secret(namespace, name, data, type_);
        let params = PatchParams::apply(CONTROLLER_NAME).force();
        api.patch(name, &params, &Patch::Apply(&secret))
            .await
            .with_context(|| format!("failed to apply secret {namespace}/{name}"))?;
        tracing::debug!(%namespace, %name, "Applied secret");
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::debug!(%namespace, %name, "Deleted secret");
                Ok(())
            }
            Err(kube::Error::Api(rsp)) if rsp.code == 404 => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to delete secret {namespace}/{name}"))
            }
        }
    }
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

// === impl KubeAccessCertStatus ===

impl KubeAccessCertStatus {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AccessCertStatusWriter for KubeAccessCertStatus {
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: AccessCertStatus,
    ) -> anyhow::Result<()> {
        let api = Api::<AccessCert>::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &make_status_patch(&status))
            .await
            .with_context(|| format!("failed to patch status of accesscert {namespace}/{name}"))?;
        Ok(())
    }
}

impl std::fmt::Debug for KubeAccessCertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeAccessCertStatus").finish_non_exhaustive()
    }
}

fn make_secret(
    namespace: &str,
    name: &str,
    data: BTreeMap<String, Vec<u8>>,
    type_: &str,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
        type_: Some(type_.to_string()),
        ..Default::default()
    }
}

fn make_status_patch(status: &AccessCertStatus) -> Patch<serde_json::Value> {
    Patch::Merge(serde_json::json!({ "status": status }))
}
