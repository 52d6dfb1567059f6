use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider, ProviderError};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Methods that must never be retried blindly: re-sending a raw transaction
/// can double-spend a nonce, and a failed estimate usually means a revert,
/// not a flaky connection.
const METHODS_TO_NOT_RETRY: &[&str] = &[
    "eth_estimateGas",
    "eth_sendTransaction",
    "eth_sendRawTransaction",
];

/// The provider type every publisher talks through.
pub type CeloProvider = Provider<RetryingHttp>;

/// Connect to an RPC endpoint.
pub fn connect(url: &str) -> Result<Arc<CeloProvider>, ProviderError> {
    let inner = Http::from_str(url)
        .map_err(|e| ProviderError::CustomError(format!("invalid rpc url: {e}")))?;
    Ok(Arc::new(Provider::new(RetryingHttp::new(inner))))
}

/// An HTTP transport with a simple naive exponential backoff built in.
#[derive(Debug, Clone)]
pub struct RetryingHttp {
    inner: Http,
    max_requests: u32,
    base_retry_ms: u64,
}

impl RetryingHttp {
    /// Wrap a transport with the default retry schedule.
    pub fn new(inner: Http) -> Self {
        Self {
            inner,
            max_requests: 6,
            base_retry_ms: 250,
        }
    }
}

/// Error type for [`RetryingHttp`].
#[derive(Debug, Error)]
pub enum RetryingHttpError {
    /// An error we did not want to retry on.
    #[error(transparent)]
    HttpClientError(HttpClientError),
    /// Hit max requests.
    #[error("hit max requests: {0}")]
    MaxRequests(HttpClientError),
}

impl From<RetryingHttpError> for ProviderError {
    fn from(src: RetryingHttpError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(src))
    }
}

#[async_trait]
impl JsonRpcClient for RetryingHttp {
    type Error = RetryingHttpError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(&params)
            .expect("request params are always serializable");

        let mut last_err;
        let mut attempt = 1;
        loop {
            let result = match &params {
                serde_json::Value::Null => self.inner.request(method, ()).await,
                p => self.inner.request(method, p).await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e @ HttpClientError::JsonRpcError(_))
                    if METHODS_TO_NOT_RETRY.contains(&method) =>
                {
                    warn!(method, error = %e, "JSON-RPC error on non-retryable method");
                    return Err(RetryingHttpError::HttpClientError(e));
                }
                Err(e) => {
                    debug!(method, attempt, error = %e, "Retryable provider error");
                    last_err = e;
                }
            }

            if attempt >= self.max_requests {
                return Err(RetryingHttpError::MaxRequests(last_err));
            }
            let backoff = Duration::from_millis(self.base_retry_ms * 2u64.pow(attempt - 1));
            sleep(backoff).await;
            attempt += 1;
        }
    }
}
