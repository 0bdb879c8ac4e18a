//! Endpoint persistence

use super::Endpoint;
use crate::error::MiddlewareResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Data access for endpoints
#[async_trait::async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn find_all(&self) -> MiddlewareResult<Vec<Endpoint>>;

    async fn find_by_external_endpoint_id(
        &self,
        external_endpoint_id: &str,
    ) -> MiddlewareResult<Option<Endpoint>>;

    async fn find_by_agrirouter_endpoint_id(
        &self,
        agrirouter_endpoint_id: &str,
    ) -> MiddlewareResult<Option<Endpoint>>;

    /// Insert or replace, keyed by external endpoint id
    async fn save(&self, endpoint: &Endpoint) -> MiddlewareResult<()>;

    async fn delete(&self, external_endpoint_id: &str) -> MiddlewareResult<()>;
}

/// Endpoint store held in memory, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct InMemoryEndpointRepository {
    endpoints: RwLock<HashMap<String, Endpoint>>,
    file: Option<PathBuf>,
}

impl InMemoryEndpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: RwLock::new(
                endpoints
                    .into_iter()
                    .map(|e| (e.external_endpoint_id.clone(), e))
                    .collect(),
            ),
            file: None,
        }
    }

    /// Load the endpoints from `path` and write every change back to it
    ///
    /// A missing file starts an empty repository.
    pub async fn load_from_file(path: &Path) -> MiddlewareResult<Self> {
        let endpoints: Vec<Endpoint> = match tokio::fs::read(path).await {
            Ok(content) => serde_json::from_slice(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Loaded {} endpoints from '{}'.",
            endpoints.len(),
            path.display()
        );

        let mut repository = Self::with_endpoints(endpoints);
        repository.file = Some(path.to_path_buf());
        Ok(repository)
    }

    async fn write_through(&self, endpoints: &HashMap<String, Endpoint>) -> MiddlewareResult<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let mut snapshot: Vec<&Endpoint> = endpoints.values().collect();
        snapshot.sort_by(|a, b| a.external_endpoint_id.cmp(&b.external_endpoint_id));
        let content = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, content).await?;
        debug!("Persisted {} endpoints.", snapshot.len());
        Ok(())
    }
}

#[async_trait::async_trait]
impl EndpointRepository for InMemoryEndpointRepository {
    async fn find_all(&self) -> MiddlewareResult<Vec<Endpoint>> {
        Ok(self.endpoints.read().await.values().cloned().collect())
    }

    async fn find_by_external_endpoint_id(
        &self,
        external_endpoint_id: &str,
    ) -> MiddlewareResult<Option<Endpoint>> {
        Ok(self.endpoints.read().await.get(external_endpoint_id).cloned())
    }

    async fn find_by_agrirouter_endpoint_id(
        &self,
        agrirouter_endpoint_id: &str,
    ) -> MiddlewareResult<Option<Endpoint>> {
        Ok(self
            .endpoints
            .read()
            .await
            .values()
            .find(|e| e.agrirouter_endpoint_id == agrirouter_endpoint_id)
            .cloned())
    }

    async fn save(&self, endpoint: &Endpoint) -> MiddlewareResult<()> {
        let mut endpoints = self.endpoints.write().await;
        endpoints.insert(endpoint.external_endpoint_id.clone(), endpoint.clone());
        self.write_through(&endpoints).await
    }

    async fn delete(&self, external_endpoint_id: &str) -> MiddlewareResult<()> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.remove(external_endpoint_id).is_some() {
            self.write_through(&endpoints).await?;
        }
        Ok(())
    }
}
