//! HTTP plumbing shared by the vendor adapters
//!
//! No retries happen here: a failed call is returned as-is.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CompletionError, ConfigurationError, TransportError};

use super::types::CompletionOptions;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn build_client(timeout: Duration) -> Result<Client, ConfigurationError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("confab/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ConfigurationError::HttpClient)
}

/// Validate a base URL and strip any trailing slash
pub(crate) fn parse_base_url(base_url: &str) -> Result<String, ConfigurationError> {
    url::Url::parse(base_url).map_err(|source| ConfigurationError::InvalidBaseUrl {
        url: base_url.to_string(),
        source,
    })?;
    Ok(base_url.trim_end_matches('/').to_string())
}

/// Overlay caller options onto a request object
pub(crate) fn merge_options(target: &mut Map<String, Value>, options: &CompletionOptions) {
    for (key, value) in options {
        target.insert(key.clone(), value.clone());
    }
}

/// Send a prepared request and decode a successful JSON body
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    provider: &str,
) -> Result<T, CompletionError> {
    let response = request.send().await.map_err(TransportError::Http)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.map_err(TransportError::Http)?;
        return Err(TransportError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    debug!("{} responded with status {}", provider, status);
    let decoded = response.json::<T>().await.map_err(TransportError::Http)?;
    Ok(decoded)
}
