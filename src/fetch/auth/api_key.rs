use crate::error::{Error, Result};
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The match-data service authenticates every read with `X-TBA-Auth-Key`;
/// the header is validated once at construction.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid API key header name: {e}")))?;
        let mut key = HeaderValue::from_str(key)
            .map_err(|e| Error::Config(format!("invalid API key: {e}")))?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            key,
        })
    }

    /// Uses the `X-TBA-Auth-Key` header.
    pub fn tba(inner: C, key: &str) -> Result<Self> {
        Self::new(inner, "X-TBA-Auth-Key", key)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_rejects_invalid_header_name() {
        let client = BasicClient::new().unwrap();
        let result = ApiKey::new(client, "bad header", "abc");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_invalid_key() {
        let client = BasicClient::new().unwrap();
        assert!(ApiKey::tba(client, "line\nbreak").is_err());
    }

    #[test]
    fn test_accepts_tba_key() {
        let client = BasicClient::new().unwrap();
        assert!(ApiKey::tba(client, "abc123").is_ok());
    }
}
