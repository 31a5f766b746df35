//! Cache client speaking to the mesh cache service.
//!
//! Calls go to the routing endpoint like every other mesh call; the proxy behind it
//! routes `crm.CacheService` requests to the cache replica.

use std::sync::Arc;

use async_trait::async_trait;
use crm_cache::{Cache, CacheError, Ttl};
use crm_proto::cache_service_client::CacheServiceClient;
use crm_proto::{CacheGetRequest, CacheSetRequest};

use crate::{MeshChannel, MeshDialer};

pub struct GrpcCache {
    dialer: Arc<MeshDialer>,
}

impl GrpcCache {
    pub fn new(dialer: Arc<MeshDialer>) -> Self {
        Self { dialer }
    }

    async fn client(&self) -> Result<CacheServiceClient<MeshChannel>, CacheError> {
        let channel = self
            .dialer
            .dial()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(CacheServiceClient::new(channel))
    }
}

#[async_trait]
impl Cache for GrpcCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let response = self
            .client()
            .await?
            .get(CacheGetRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|status| CacheError::Backend(status.message().to_string()))?
            .into_inner();

        Ok(response.found.then_some(response.value))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Ttl) -> Result<bool, CacheError> {
        let response = self
            .client()
            .await?
            .set(CacheSetRequest {
                key: key.to_string(),
                value: value.to_string(),
                ttl_seconds: ttl.as_secs(),
            })
            .await
            .map_err(|status| CacheError::Backend(status.message().to_string()))?
            .into_inner();

        Ok(response.stored)
    }
}
