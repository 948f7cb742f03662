//! HTTP Transport
//!
//! The seam between the fetcher and the network. The default transport
//! drives a blocking reqwest client on smol's blocking thread pool.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::{NetError, Response};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// User agent string
    pub user_agent: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max redirects to follow (0 = disable)
    pub max_redirects: u32,
    /// Default headers
    pub default_headers: Vec<(String, String)>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: "fOS-Engine/0.1".into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_redirects: 10,
            default_headers: vec![("Accept".into(), "image/*".into())],
        }
    }
}

/// Performs GET requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Response, NetError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    default_headers: Vec<(String, String)>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, NetError> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self, NetError> {
        let redirect = match config.max_redirects {
            0 => reqwest::redirect::Policy::none(),
            max => reqwest::redirect::Policy::limited(max as usize),
        };
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(redirect)
            .build()
            .map_err(|e| NetError::Network(e.to_string()))?;
        Ok(Self {
            client,
            default_headers: config.default_headers,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<Response, NetError> {
        tracing::info!("HTTP GET {}", url);

        let mut request = self.client.get(url.clone());
        for (name, value) in &self.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        smol::unblock(move || {
            let response = request.send().map_err(|e| NetError::Network(e.to_string()))?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
                .collect();
            let body = response.bytes().map_err(|e| NetError::Network(e.to_string()))?.to_vec();
            Ok(Response { status, headers, body })
        })
        .await
    }
}
