// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP plumbing for batch uploads.
//!
//! - [`HttpTransport`]: the seam between the sender and the network
//! - [`ReqwestTransport`]: the production transport
//! - [`RequestTemplate`]: URL and headers shared by every upload
//! - [`classify`]: maps a response or transport failure to a delivery decision

use crate::config::{upload_url, SenderConfig};
use crate::constants::{APP_SECRET_HEADER, INSTALL_ID_HEADER};
use crate::error::{SenderError, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tracing::error;

/// A fully built upload request.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct IngestionResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Performs upload requests.
///
/// Implementations must be cancel-safe: the sender drops the returned future
/// when it suspends delivery.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: IngestionRequest) -> Result<IngestionResponse, TransportError>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(config: &SenderConfig) -> Self {
        Self {
            client: get_client(config),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: IngestionRequest) -> Result<IngestionResponse, TransportError> {
        let resp = self
            .client
            .post(request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        // Only error bodies are interesting; skip reading successful ones.
        let body = if (200..300).contains(&status) {
            Bytes::new()
        } else {
            resp.bytes().await.unwrap_or_default()
        };
        Ok(IngestionResponse { status, body })
    }
}

/// Creates a `reqwest::Client` honouring the configured timeout and proxy.
///
/// An unusable proxy is logged and ignored rather than failing the sender.
#[must_use]
pub fn get_client(config: &SenderConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "SENDER | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            build_client(config, false).unwrap_or_else(|inner| {
                error!(
                    "SENDER | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                    inner
                );
                reqwest::Client::new()
            })
        }
    }
}

fn build_client(config: &SenderConfig, with_proxy: bool) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(270))
        .tcp_keepalive(Duration::from_secs(120));

    if with_proxy {
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
    }
    builder.build()
}

/// URL and headers shared by every upload of a sender.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    url: Url,
    headers: HeaderMap,
    api_path: String,
    query_params: std::collections::BTreeMap<String, String>,
}

impl RequestTemplate {
    pub fn new(config: &SenderConfig) -> Result<Self, SenderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.compression_level.is_some() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        insert_header(&mut headers, APP_SECRET_HEADER, &config.app_secret)?;
        insert_header(&mut headers, INSTALL_ID_HEADER, &config.install_id)?;
        for (name, value) in &config.headers {
            insert_header(&mut headers, name, value)?;
        }

        Ok(Self {
            url: config.upload_url()?,
            headers,
            api_path: config.api_path.clone(),
            query_params: config.query_params.clone(),
        })
    }

    /// Points later requests at a different ingestion host.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), SenderError> {
        self.url = upload_url(base_url, &self.api_path, &self.query_params)?;
        Ok(())
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn build(&self, body: Bytes) -> IngestionRequest {
        IngestionRequest {
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), SenderError> {
    if value.is_empty() {
        return Ok(());
    }
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| SenderError::InvalidConfig(format!("Invalid header name '{name}': {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| SenderError::InvalidConfig(format!("Invalid value for header '{name}': {e}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// How the sender should react to the outcome of one upload attempt.
#[derive(Debug)]
pub enum ResponseClass {
    /// 2xx.
    Success { status: u16 },
    /// Permanent rejection; retrying would not help.
    Terminal(SenderError),
    /// 5xx, 408, 429, timeouts and other transport failures.
    Recoverable(SenderError),
    /// The host was unreachable.
    Offline(TransportError),
}

#[must_use]
pub fn classify(response: Result<IngestionResponse, TransportError>) -> ResponseClass {
    match response {
        Ok(resp) => match resp.status {
            200..=299 => ResponseClass::Success {
                status: resp.status,
            },
            408 | 429 => ResponseClass::Recoverable(SenderError::ClientError {
                status: resp.status,
                message: String::from_utf8_lossy(&resp.body).into_owned(),
            }),
            500..=599 => ResponseClass::Recoverable(SenderError::ServerError {
                status: resp.status,
            }),
            status => ResponseClass::Terminal(SenderError::ClientError {
                status,
                message: String::from_utf8_lossy(&resp.body).into_owned(),
            }),
        },
        Err(TransportError::Offline(msg)) => ResponseClass::Offline(TransportError::Offline(msg)),
        Err(err) => ResponseClass::Recoverable(SenderError::Transport(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn response(status: u16) -> Result<IngestionResponse, TransportError> {
        Ok(IngestionResponse {
            status,
            body: Bytes::from_static(b"details"),
        })
    }

    #[test]
    fn test_classify_success() {
        assert!(matches!(
            classify(response(200)),
            ResponseClass::Success { status: 200 }
        ));
        assert!(matches!(
            classify(response(202)),
            ResponseClass::Success { status: 202 }
        ));
    }

    #[test]
    fn test_classify_client_errors() {
        match classify(response(404)) {
            ResponseClass::Terminal(SenderError::ClientError { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "details");
            }
            other => panic!("unexpected classification {other:?}"),
        }
        assert!(matches!(
            classify(response(403)),
            ResponseClass::Terminal(_)
        ));
        assert!(matches!(
            classify(response(304)),
            ResponseClass::Terminal(_)
        ));
    }

    #[test]
    fn test_classify_recoverable() {
        assert!(matches!(
            classify(response(500)),
            ResponseClass::Recoverable(SenderError::ServerError { status: 500 })
        ));
        assert!(matches!(
            classify(response(503)),
            ResponseClass::Recoverable(_)
        ));
        assert!(matches!(
            classify(response(429)),
            ResponseClass::Recoverable(_)
        ));
        assert!(matches!(
            classify(response(408)),
            ResponseClass::Recoverable(_)
        ));
        assert!(matches!(
            classify(Err(TransportError::Timeout("slow".into()))),
            ResponseClass::Recoverable(SenderError::Transport(_))
        ));
    }

    #[test]
    fn test_classify_offline() {
        assert!(matches!(
            classify(Err(TransportError::Offline("no route".into()))),
            ResponseClass::Offline(_)
        ));
    }

    #[test]
    fn test_request_template_headers() {
        let mut config = SenderConfig {
            app_secret: "0123456789abcdef".to_string(),
            install_id: "f8c3e0b2".to_string(),
            ..Default::default()
        };
        config
            .headers
            .insert("X-Client".to_string(), "ios".to_string());

        let template = RequestTemplate::new(&config).unwrap();
        let headers = template.headers();
        assert_eq!(headers.get("App-Secret").unwrap(), "0123456789abcdef");
        assert_eq!(headers.get("Install-ID").unwrap(), "f8c3e0b2");
        assert_eq!(headers.get("X-Client").unwrap(), "ios");
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert!(!headers.contains_key("Content-Encoding"));
    }

    #[test]
    fn test_request_template_compression_header() {
        let config = SenderConfig {
            compression_level: Some(3),
            ..Default::default()
        };
        let template = RequestTemplate::new(&config).unwrap();
        assert_eq!(template.headers().get("Content-Encoding").unwrap(), "zstd");
    }

    #[test]
    fn test_request_template_rejects_bad_header() {
        let mut config = SenderConfig::default();
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());
        assert!(matches!(
            RequestTemplate::new(&config),
            Err(SenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_set_base_url_keeps_path_and_query() {
        let mut template = RequestTemplate::new(&SenderConfig::default()).unwrap();
        template.set_base_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(
            template.url().as_str(),
            "http://127.0.0.1:8080/logs?api-version=1.0.0-preview20160914"
        );
        assert!(template.set_base_url("::").is_err());
    }

    #[tokio::test]
    async fn test_reqwest_transport_posts_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "1.0.0-preview20160914".into(),
            ))
            .match_header("App-Secret", "secret-value")
            .match_header("Content-Type", "application/json")
            .match_body(r#"{"batchId":"b1","logs":[]}"#)
            .with_status(200)
            .create_async()
            .await;

        let config = SenderConfig {
            base_url: server.url(),
            app_secret: "secret-value".to_string(),
            ..Default::default()
        };
        let transport = ReqwestTransport::new(&config);
        let template = RequestTemplate::new(&config).unwrap();

        let resp = transport
            .send(template.build(Bytes::from_static(br#"{"batchId":"b1","logs":[]}"#)))
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_reads_error_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/logs")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("malformed batch")
            .create_async()
            .await;

        let config = SenderConfig {
            base_url: server.url(),
            ..Default::default()
        };
        let transport = ReqwestTransport::new(&config);
        let template = RequestTemplate::new(&config).unwrap();

        let resp = transport
            .send(template.build(Bytes::from_static(b"{}")))
            .await
            .unwrap();
        assert_eq!(resp.status, 400);
        assert_eq!(&resp.body[..], b"malformed batch");
    }

    #[tokio::test]
    async fn test_reqwest_transport_unreachable_is_offline() {
        let config = SenderConfig {
            // Port 9 (discard) is not expected to accept connections locally.
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let transport = ReqwestTransport::new(&config);
        let template = RequestTemplate::new(&config).unwrap();

        let err = transport
            .send(template.build(Bytes::from_static(b"{}")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Offline(_)));
    }
}
