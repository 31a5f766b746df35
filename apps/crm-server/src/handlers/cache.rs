//! Cache service: GET and SET-if-absent with TTL over process memory.

use std::sync::Arc;

use crm_cache::{Cache, CacheError, Ttl};
use crm_cache_memory::MemoryCache;
use crm_proto::cache_service_server::CacheService;
use crm_proto::{CacheGetRequest, CacheGetResponse, CacheSetRequest, CacheSetResponse};
use tonic::{Request, Response, Status};

use crate::metrics::RequestTimer;

#[derive(Clone, Default)]
pub struct CacheHost {
    cache: Arc<MemoryCache>,
}

impl CacheHost {
    pub fn new(cache: Arc<MemoryCache>) -> Self {
        Self { cache }
    }
}

fn to_status(err: CacheError) -> Status {
    match err {
        CacheError::ZeroTtl => Status::invalid_argument("ttl_seconds must be positive"),
        CacheError::Unavailable(msg) => Status::unavailable(msg),
        CacheError::Backend(msg) => Status::internal(msg),
    }
}

#[tonic::async_trait]
impl CacheService for CacheHost {
    async fn get(
        &self,
        request: Request<CacheGetRequest>,
    ) -> Result<Response<CacheGetResponse>, Status> {
        let timer = RequestTimer::new("cache_get");
        let key = request.into_inner().key;
        match self.cache.get(&key).await {
            Ok(value) => {
                timer.success();
                Ok(Response::new(CacheGetResponse {
                    found: value.is_some(),
                    value: value.unwrap_or_default(),
                }))
            }
            Err(err) => {
                timer.error("cache");
                Err(to_status(err))
            }
        }
    }

    async fn set(
        &self,
        request: Request<CacheSetRequest>,
    ) -> Result<Response<CacheSetResponse>, Status> {
        let timer = RequestTimer::new("cache_set");
        let req = request.into_inner();
        let result = match Ttl::from_secs(req.ttl_seconds) {
            Ok(ttl) => self.cache.set_if_absent(&req.key, &req.value, ttl).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(stored) => {
                timer.success();
                Ok(Response::new(CacheSetResponse { stored }))
            }
            Err(err) => {
                timer.error("cache");
                Err(to_status(err))
            }
        }
    }
}
