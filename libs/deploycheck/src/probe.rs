//! HTTP probing of the deployed application.

use std::time::Duration;

use url::Url;

/// One GET and the literal body it must return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub path: String,
    pub body: String,
}

impl Expectation {
    pub fn new(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
        }
    }
}

/// The checks run against the example web application, in order.
pub fn default_expectations() -> Vec<Expectation> {
    vec![
        Expectation::new("webresources/helloworld", "Hello World"),
        Expectation::new("webresources/another", "Another"),
        Expectation::new("webresources/additional", "Additional Bundle!"),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum BaseUriError {
    #[error("invalid base uri: {0}")]
    Parse(#[from] url::ParseError),
    #[error("base uri '{0}' cannot carry a path")]
    CannotBeABase(String),
}

/// `http://{host}:{port}{context_path}`. The result never ends in `/`.
pub fn base_uri(host: &str, port: u16, context_path: &str) -> Result<Url, BaseUriError> {
    let mut url = Url::parse(&format!("http://{host}:{port}/"))?;
    let shown = url.to_string();
    url.path_segments_mut()
        .map_err(|_| BaseUriError::CannotBeABase(shown))?
        .clear()
        .extend(context_path.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// Append `path` (relative, `/`-separated) to `base` without dropping the
/// base's own last segment.
pub fn join_path(base: &Url, path: &str) -> Result<Url, BaseUriError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| BaseUriError::CannotBeABase(base.to_string()))?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

/// Status and body of a probed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

/// Issues GETs under one base URI. Owned by a single scenario run.
#[derive(Debug)]
pub struct ProbeClient {
    client: reqwest::Client,
    base: Url,
}

impl ProbeClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url_for(&self, path: &str) -> Result<Url, BaseUriError> {
        join_path(&self.base, path)
    }

    /// GET `url` and read the body as text, whatever the status.
    pub async fn get_text(&self, url: Url) -> Result<ProbeResponse, reqwest::Error> {
        tracing::debug!(%url, "GET");
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(ProbeResponse { status, body })
    }
}
