//! HTTP transport for the remote catalog
//!
//! The transport only moves bytes. Status interpretation, signing and
//! response validation belong to [`super::CatalogClient`].

use anyhow::{Context, Result};
use plinth_core::types::CatalogConfig;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Status code and body of a catalog response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub code: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }
}

/// Header name and value
pub type Header = (String, String);

/// Form field name and value
pub type FormField = (String, String);

#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// POST url-encoded form data
    fn post(&self, url: &str, headers: &[Header], form: &[FormField]) -> Result<TransportResponse>;

    /// Plain GET
    fn get(&self, url: &str) -> Result<TransportResponse>;

    /// POST form data and stream the body to `destination`, returning the status code
    fn download(&self, url: &str, headers: &[Header], form: &[FormField], destination: &Path) -> Result<u16>;
}

/// Blocking reqwest transport; redirects are not followed
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    fn form_request(
        &self,
        url: &str,
        headers: &[Header],
        form: &[FormField],
    ) -> reqwest::blocking::RequestBuilder {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();

        let mut request = self
            .client
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &str, headers: &[Header], form: &[FormField]) -> Result<TransportResponse> {
        tracing::debug!("POST {}", url);
        let response = self
            .form_request(url, headers, form)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;
        let code = response.status().as_u16();
        let body = response.text().context("Failed to read response body")?;
        Ok(TransportResponse { code, body })
    }

    fn get(&self, url: &str) -> Result<TransportResponse> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;
        let code = response.status().as_u16();
        let body = response.text().context("Failed to read response body")?;
        Ok(TransportResponse { code, body })
    }

    fn download(&self, url: &str, headers: &[Header], form: &[FormField], destination: &Path) -> Result<u16> {
        tracing::debug!("Downloading {} to {}", url, destination.display());
        let mut response = self
            .form_request(url, headers, form)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        response
            .copy_to(&mut file)
            .context("Failed to write downloaded file")?;

        Ok(response.status().as_u16())
    }
}
