//! HTTP collaborators: the config backend client and the transport behind
//! the sandbox's `fetch`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sieve_core::traits::TransportError;
use sieve_core::{FetchTransport, LibraryCode, SieveError, SieveResult, SourceProvider, TransformationCode};
use tracing::debug;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// [Hexagonal Adapter] Reads transformation source from the config backend
#[derive(Debug, Clone)]
pub struct HttpSourceProvider {
    client: Client,
    base_url: Url,
}

impl HttpSourceProvider {
    pub fn new(base_url: &str) -> SieveResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SieveError::Config(format!("config backend url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SieveError::Config(format!("config backend url {base_url} cannot be a base")));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| SieveError::Config(format!("http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn transformation_url(&self, version_id: &str) -> SieveResult<Url> {
        self.lookup_url("transformation", version_id)
    }

    pub fn library_url(&self, version_id: &str) -> SieveResult<Url> {
        self.lookup_url("transformationLibrary", version_id)
    }

    /// `<base>/<resource>/getByVersionId?versionId=<id>`, with the id form-encoded
    fn lookup_url(&self, resource: &str, version_id: &str) -> SieveResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SieveError::Config(format!("config backend url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend([resource, "getByVersionId"]);
        url.query_pairs_mut().clear().append_pair("versionId", version_id);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, version_id: &str) -> SieveResult<T> {
        let fetch_error = |message: String| SieveError::SourceFetch {
            version_id: version_id.to_string(),
            message,
        };

        debug!("🌐 GET {}", url);
        self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| fetch_error(e.to_string()))?
            .json::<T>()
            .await
            .map_err(|e| fetch_error(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    async fn get_transformation_code(&self, version_id: &str) -> SieveResult<TransformationCode> {
        self.get_json(self.transformation_url(version_id)?, version_id).await
    }

    async fn get_library_code(&self, version_id: &str) -> SieveResult<LibraryCode> {
        self.get_json(self.library_url(version_id)?, version_id).await
    }
}

/// [Hexagonal Adapter] Real network access for sandboxed `fetch`
#[derive(Debug, Clone)]
pub struct HttpFetchTransport {
    client: Client,
}

impl HttpFetchTransport {
    pub fn new() -> SieveResult<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> SieveResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SieveError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchTransport for HttpFetchTransport {
    async fn fetch_json(&self, url: &str, options: Option<Value>) -> Result<Value, TransportError> {
        let options = options.unwrap_or(Value::Null);

        let method = match options.get("method").and_then(Value::as_str) {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())?,
            None => Method::GET,
        };

        let mut headers = HeaderMap::new();
        if let Some(map) = options.get("headers").and_then(Value::as_object) {
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(&value)?);
            }
        }

        let mut request = self.client.request(method, url).headers(headers);
        match options.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(body)) => request = request.body(body.clone()),
            Some(body) => request = request.json(body),
        }

        let response = request.send().await?;
        Ok(response.json::<Value>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_urls_follow_service_layout() {
        let provider = HttpSourceProvider::new("http://config.local/").unwrap();
        assert_eq!(
            provider.transformation_url("tv-1").unwrap().as_str(),
            "http://config.local/transformation/getByVersionId?versionId=tv-1"
        );
        assert_eq!(
            provider.library_url("lib-1").unwrap().as_str(),
            "http://config.local/transformationLibrary/getByVersionId?versionId=lib-1"
        );
    }

    #[test]
    fn version_ids_are_encoded() {
        let provider = HttpSourceProvider::new("http://config.local/api").unwrap();
        let url = provider.transformation_url("a b&versionId=x/../y").unwrap();
        assert_eq!(url.path(), "/api/transformation/getByVersionId");

        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1, "a b&versionId=x/../y");
    }

    #[test]
    fn malformed_base_url_is_a_config_error() {
        assert!(matches!(HttpSourceProvider::new("not a url"), Err(SieveError::Config(_))));
        assert!(matches!(HttpSourceProvider::new("mailto:ops@example.com"), Err(SieveError::Config(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let transport = HttpFetchTransport::with_timeout(Duration::from_secs(2)).unwrap();
        assert!(transport.fetch_json("http://127.0.0.1:1/", None).await.is_err());
    }

    #[tokio::test]
    async fn invalid_method_is_an_error() {
        let transport = HttpFetchTransport::new().unwrap();
        let options = serde_json::json!({ "method": "NOT A METHOD" });
        assert!(transport.fetch_json("http://127.0.0.1:1/", Some(options)).await.is_err());
    }
}
