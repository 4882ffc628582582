//! A thin `reqwest` wrapper for talking to `dnsctld`'s control-plane HTTP API.

use std::time::Duration;

use reqwest::{IntoUrl, Method, RequestBuilder};
use url::Url;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct DnsctlApiClient {
    base_uri: Url,
}

impl DnsctlApiClient {
    pub fn new(base_uri: impl IntoUrl) -> Self {
        DnsctlApiClient {
            base_uri: base_uri.into_url().unwrap(),
        }
    }

    pub fn base_uri(&self) -> &str {
        self.base_uri.as_str()
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let path = self.base_uri.join(path).unwrap();

        let client = reqwest::ClientBuilder::new()
            .user_agent(APP_USER_AGENT)
            .timeout(HTTP_CLIENT_TIMEOUT)
            .build()
            .unwrap();

        tracing::debug!("Sending HTTP {method} request to '{path}'");

        client.request(method, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }
}

pub fn format_http_error(err: reqwest::Error) -> String {
    if err.is_decode() {
        format!("HTTP request failed: {err:?}")
    } else {
        format!("HTTP request failed: {err}")
    }
}

/// Turns a non-2xx response into a `String` error carrying the daemon's
/// `ServiceError` body, falling back to the raw status if the body isn't
/// one.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, String> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    match response.json::<dnsctl_api::ServiceError>().await {
        Ok(err) => Err(format!("{status}: {err}")),
        Err(_) => Err(format!("request failed with status {status}")),
    }
}
