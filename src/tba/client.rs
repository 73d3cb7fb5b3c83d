use super::api::{EventOprs, EventRankings, MatchDataApi, PlayoffAlliance, TbaMatch};
use crate::error::{Error, Result};
use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH, HeaderValue};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://www.thebluealliance.com/api/v3";

struct CachedResponse {
    etag: HeaderValue,
    body: String,
}

/// HTTP client for one event with an ETag / `If-None-Match` response cache.
pub struct TbaClient<C> {
    http: C,
    base_url: String,
    event_key: String,
    cache: Mutex<HashMap<String, CachedResponse>>,
}

impl TbaClient<ApiKey<BasicClient>> {
    pub fn new(api_key: &str, event_key: &str) -> Result<Self> {
        let basic = BasicClient::new()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_http(ApiKey::tba(basic, api_key)?, event_key))
    }
}

impl<C: HttpClient> TbaClient<C> {
    pub fn with_http(http: C, event_key: &str) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            event_key: event_key.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Fetches `<base>/event/<event>/<suffix>`, logging and swallowing failures.
    async fn event_json<T: DeserializeOwned>(&self, suffix: &str) -> Option<T> {
        let url = format!("{}/event/{}/{}", self.base_url, self.event_key, suffix);
        match self.fetch_json(&url).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(url = %url, error = %e, "Match-data request failed");
                None
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut req = reqwest::Request::new(
            reqwest::Method::GET,
            url.parse()
                .map_err(|e| Error::Config(format!("invalid URL {url}: {e}")))?,
        );
        if let Some(etag) = self.cached_etag(url)? {
            req.headers_mut().insert(IF_NONE_MATCH, etag);
        }

        let resp = self
            .http
            .execute(req)
            .await
            .map_err(|e| Error::ExternalUnavailable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("Serving cached response");
            let cache = self.lock_cache()?;
            let cached = cache.get(url).ok_or_else(|| {
                Error::InconsistentState(format!("304 for uncached URL {url}"))
            })?;
            return Ok(serde_json::from_str(&cached.body)?);
        }
        if !status.is_success() {
            return Err(Error::ExternalUnavailable(format!(
                "status {status} for {url}"
            )));
        }

        let etag = resp.headers().get(ETAG).cloned();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::ExternalUnavailable(e.to_string()))?;
        let parsed = serde_json::from_str(&body)?;

        if let Some(etag) = etag {
            self.lock_cache()?
                .insert(url.to_string(), CachedResponse { etag, body });
        }
        Ok(parsed)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CachedResponse>>> {
        self.cache
            .lock()
            .map_err(|_| Error::InconsistentState("response cache lock poisoned".into()))
    }

    fn cached_etag(&self, url: &str) -> Result<Option<HeaderValue>> {
        Ok(self.lock_cache()?.get(url).map(|c| c.etag.clone()))
    }
}

#[async_trait]
impl<C: HttpClient> MatchDataApi for TbaClient<C> {
    async fn event_matches(&self) -> Option<Vec<TbaMatch>> {
        self.event_json("matches").await
    }

    async fn event_teams(&self) -> Option<Vec<String>> {
        self.event_json("teams/keys").await
    }

    async fn event_rankings(&self) -> Option<EventRankings> {
        self.event_json("rankings").await
    }

    async fn event_alliances(&self) -> Option<Vec<PlayoffAlliance>> {
        self.event_json("alliances").await
    }

    async fn event_oprs(&self) -> Option<EventOprs> {
        self.event_json("oprs").await
    }
}
