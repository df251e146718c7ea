//! Bounded HTTP GET shared by image and model fetching.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// GET `url`, requiring a 2xx status and at most `limit` body bytes.
///
/// `timeout` bounds the whole exchange, body included.
pub(crate) async fn get_bytes(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    limit: Option<usize>,
) -> Result<Vec<u8>, FetchError> {
    let mut response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url, status = status.as_u16(), "fetch rejected");
        return Err(FetchError::Status(status.as_u16()));
    }

    if let (Some(limit), Some(len)) = (limit, response.content_length()) {
        if len > limit as u64 {
            return Err(FetchError::TooLarge { limit });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::from_reqwest(e, timeout))?
    {
        if let Some(limit) = limit {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}
