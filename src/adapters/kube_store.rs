//! Resource store backed by the Kubernetes API

use async_trait::async_trait;
use kube::{
    api::{Api, PostParams},
    Client, ResourceExt,
};

use crate::crd::{Hazelcast, HotBackup, ResourceKey};
use crate::error::{Error, Result};

/// Read and conflict-detected write access to the resources the reconciler
/// works on.
///
/// Writes carry the `resourceVersion` of the object they were derived from;
/// a stale version must fail with [`Error::Conflict`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a HotBackup, `None` when it does not exist
    async fn get_backup(&self, key: &ResourceKey) -> Result<Option<HotBackup>>;

    /// Replace metadata and spec of a HotBackup
    async fn replace_backup(&self, backup: &HotBackup) -> Result<HotBackup>;

    /// Replace the status subresource of a HotBackup
    async fn replace_backup_status(&self, backup: &HotBackup) -> Result<HotBackup>;

    /// Fetch a Hazelcast cluster, `None` when it does not exist
    async fn get_hazelcast(&self, key: &ResourceKey) -> Result<Option<Hazelcast>>;
}

/// [`ResourceStore`] talking to the API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn backups(&self, namespace: &str) -> Api<HotBackup> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate API status codes the reconciler handles locally
fn map_write_error(err: kube::Error, key: &ResourceKey) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(key.to_string()),
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(key.to_string()),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_backup(&self, key: &ResourceKey) -> Result<Option<HotBackup>> {
        Ok(self.backups(&key.namespace).get_opt(&key.name).await?)
    }

    async fn replace_backup(&self, backup: &HotBackup) -> Result<HotBackup> {
        let key = ResourceKey::of(backup);
        self.backups(&key.namespace)
            .replace(&backup.name_any(), &PostParams::default(), backup)
            .await
            .map_err(|e| map_write_error(e, &key))
    }

    async fn replace_backup_status(&self, backup: &HotBackup) -> Result<HotBackup> {
        let key = ResourceKey::of(backup);
        let data = serde_json::to_vec(backup)?;
        self.backups(&key.namespace)
            .replace_status(&backup.name_any(), &PostParams::default(), data)
            .await
            .map_err(|e| map_write_error(e, &key))
    }

    async fn get_hazelcast(&self, key: &ResourceKey) -> Result<Option<Hazelcast>> {
        let api: Api<Hazelcast> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }
}
