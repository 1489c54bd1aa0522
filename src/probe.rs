use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::CatalogError;

/// Largest body `get_text` will read.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Status line and content type of a probed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
}

impl ProbeResponse {
    pub fn new(status: u16, content_type: Option<&str>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access used by link validation and enrichment.
///
/// `timeout` of `None` leaves the request unbounded.
pub trait HttpProbe: Send + Sync {
    /// GET without reading the body.
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError>;
    fn head(&self, url: &str, timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError>;
    /// GET and read the body as text.
    fn get_text(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<(ProbeResponse, String), CatalogError>;
}

#[derive(Clone)]
pub struct HttpProbeClient {
    client: Client,
}

impl HttpProbeClient {
    pub fn new() -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("geonet-stac/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CatalogError::Http(err.to_string()))?,
        );
        // Per-request timeouts are applied by callers.
        let client = Client::builder()
            .default_headers(headers)
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| CatalogError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn summarize(response: &Response) -> ProbeResponse {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        ProbeResponse::new(response.status().as_u16(), content_type)
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        timeout: Option<Duration>,
    ) -> Result<Response, CatalogError> {
        let request = match timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };
        request
            .send()
            .map_err(|err| CatalogError::Http(err.to_string()))
    }
}

impl HttpProbe for HttpProbeClient {
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
        let response = self.send(self.client.get(url), timeout)?;
        Ok(Self::summarize(&response))
    }

    fn head(&self, url: &str, timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
        let response = self.send(self.client.head(url), timeout)?;
        Ok(Self::summarize(&response))
    }

    fn get_text(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<(ProbeResponse, String), CatalogError> {
        let response = self.send(self.client.get(url), timeout)?;
        let summary = Self::summarize(&response);
        let text = read_capped(response, url, MAX_BODY_BYTES)?;
        Ok((summary, text))
    }
}

/// Reads at most `limit` bytes; a longer body is an error rather than truncated text.
fn read_capped(reader: impl Read, url: &str, limit: u64) -> Result<String, CatalogError> {
    let mut body = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut body)
        .map_err(|err| CatalogError::Http(format!("{url}: {err}")))?;
    if body.len() as u64 > limit {
        return Err(CatalogError::Http(format!(
            "{url}: response body exceeds {limit} bytes"
        )));
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}
