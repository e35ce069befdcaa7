use std::io::Read;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue};
#[cfg(feature = "tls-rustls")]
use http::uri::Scheme;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use tracing::debug;

use crate::config::UnitConfig;
use crate::error::{TransportError, TransportErrorKind};
#[cfg(feature = "tls-rustls")]
use crate::http2::{Http2Client, TransportRequestError, classify_transport_error};
use crate::request::{ProtocolVersion, RequestSpec};
use crate::tls::{TlsBackend, TlsPolicy, build_tls_config};
use crate::util::{
    is_credential_header, is_redirect_status, redact_uri_for_logs, redirect_location,
    redirect_method, resolve_redirect_uri, same_origin,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn into_text_lossy(self) -> String {
        match String::from_utf8(Vec::from(self.body)) {
            Ok(text) => text,
            Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
        }
    }
}

/// Connection pools shared by every call of a unit: a ureq agent for
/// HTTP/1.1 and, when HTTP/2 is requested, a hyper client for `https` hops.
pub struct TransportClient {
    agent: ureq::Agent,
    #[cfg(feature = "tls-rustls")]
    http2: Option<Arc<Http2Client>>,
    tls_backend: TlsBackend,
    connect_timeout: Duration,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportClient")
            .field("tls_backend", &self.tls_backend)
            .field("http2", &self.negotiates_http2())
            .field("connect_timeout", &self.connect_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

/// One request of a redirect chain.
struct Hop<'a> {
    method: &'a Method,
    #[cfg_attr(not(feature = "tls-rustls"), allow(dead_code))]
    uri: &'a Uri,
    uri_text: &'a str,
    redacted_uri: &'a str,
    headers: &'a [(HeaderName, HeaderValue)],
    body: Option<&'a Bytes>,
}

enum Exchange {
    Http1(ureq::http::Response<ureq::Body>),
    #[cfg(feature = "tls-rustls")]
    Http2(Arc<Http2Client>, http::Response<hyper::body::Incoming>),
}

impl Exchange {
    fn status(&self) -> StatusCode {
        match self {
            Self::Http1(response) => response.status(),
            #[cfg(feature = "tls-rustls")]
            Self::Http2(_, response) => response.status(),
        }
    }

    fn headers(&self) -> &HeaderMap {
        match self {
            Self::Http1(response) => response.headers(),
            #[cfg(feature = "tls-rustls")]
            Self::Http2(_, response) => response.headers(),
        }
    }

    fn version(&self) -> Version {
        match self {
            Self::Http1(response) => response.version(),
            #[cfg(feature = "tls-rustls")]
            Self::Http2(_, response) => response.version(),
        }
    }
}

impl TransportClient {
    /// Builds the connection pools. TLS is resolved whenever an `https` hop
    /// can occur: for `https` targets and for any target that may redirect.
    pub fn new(
        config: &UnitConfig,
        request: &RequestSpec,
        tls_policy: &TlsPolicy,
    ) -> crate::Result<Self> {
        let may_use_tls = request.is_secure() || request.redirect_policy().max_redirects() > 0;
        let tls_config = if may_use_tls {
            Some(build_tls_config(config.tls_backend, tls_policy)?)
        } else {
            None
        };

        let connect_timeout = config.connect_timeout();
        let mut builder = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .max_redirects(0)
            .user_agent(config.user_agent.as_str())
            .timeout_connect(Some(connect_timeout));
        if let Some(tls_config) = tls_config {
            builder = builder.tls_config(tls_config);
        }

        let wants_http2 = may_use_tls && request.protocol_version() == ProtocolVersion::Http2;
        #[cfg(feature = "tls-rustls")]
        let http2 = if wants_http2 && config.tls_backend == TlsBackend::Rustls {
            debug!("https hops offer HTTP/2 with HTTP/1.1 fallback");
            Some(Arc::new(Http2Client::new(
                tls_policy,
                connect_timeout,
                config.user_agent.as_str(),
            )?))
        } else {
            None
        };
        #[cfg(feature = "tls-rustls")]
        let http2_unavailable = wants_http2 && http2.is_none();
        #[cfg(not(feature = "tls-rustls"))]
        let http2_unavailable = wants_http2;
        if http2_unavailable {
            debug!(
                tls_backend = config.tls_backend.as_str(),
                "HTTP/2 needs the rustls backend, calls use HTTP/1.1"
            );
        }

        Ok(Self {
            agent: builder.build().new_agent(),
            #[cfg(feature = "tls-rustls")]
            http2,
            tls_backend: config.tls_backend,
            connect_timeout,
            max_response_body_bytes: config.max_response_body_bytes.max(1),
        })
    }

    pub fn tls_backend(&self) -> TlsBackend {
        self.tls_backend
    }

    /// Whether `https` hops go through the HTTP/2-capable client.
    pub fn negotiates_http2(&self) -> bool {
        #[cfg(feature = "tls-rustls")]
        {
            self.http2.is_some()
        }
        #[cfg(not(feature = "tls-rustls"))]
        {
            false
        }
    }

    /// Issues the request, following redirects as the request's policy allows.
    pub fn send(&self, request: &RequestSpec) -> Result<Response, TransportError> {
        let policy = request.redirect_policy();
        let started_at = Instant::now();
        let mut method = request.method().clone();
        let mut uri = request.uri().clone();
        let mut uri_text = request.uri_text().to_owned();
        let mut headers: Vec<(HeaderName, HeaderValue)> = request.headers().to_vec();
        let mut body = request.body().cloned();
        let mut redirect_count = 0_usize;

        loop {
            let redacted = redact_uri_for_logs(&uri_text);
            let timeout = remaining_timeout(request.timeout(), started_at);
            debug!(method = %method, uri = %redacted, redirects = redirect_count, "sending request");

            let hop = Hop {
                method: &method,
                uri: &uri,
                uri_text: &uri_text,
                redacted_uri: &redacted,
                headers: &headers,
                body: body.as_ref(),
            };
            let exchange = self.run_once(&hop, timeout)?;
            let status = exchange.status();

            if is_redirect_status(status) && policy.max_redirects() > 0 {
                let Some(location) = redirect_location(exchange.headers()) else {
                    return Err(TransportError::MissingRedirectLocation {
                        status: status.as_u16(),
                        method,
                        uri: redacted,
                    });
                };
                let Some(next_uri) = resolve_redirect_uri(&uri, &location) else {
                    return Err(TransportError::InvalidRedirectLocation {
                        location,
                        method,
                        uri: redacted,
                    });
                };

                if policy.allows(&uri, &next_uri) {
                    if redirect_count >= policy.max_redirects() {
                        return Err(TransportError::RedirectLimitExceeded {
                            max_redirects: policy.max_redirects(),
                            method,
                            uri: redacted,
                        });
                    }
                    let next_method = redirect_method(&method, status);
                    let switched_to_get = next_method == Method::GET && method != Method::GET;
                    let same_origin_redirect = same_origin(&uri, &next_uri);
                    headers.retain(|(name, _)| {
                        !(switched_to_get && (*name == CONTENT_LENGTH || *name == CONTENT_TYPE))
                            && (same_origin_redirect || !is_credential_header(name))
                    });
                    if switched_to_get {
                        body = None;
                    }
                    debug!(
                        status = status.as_u16(),
                        location = %redact_uri_for_logs(&next_uri.to_string()),
                        "following redirect"
                    );
                    method = next_method;
                    uri_text = next_uri.to_string();
                    uri = next_uri;
                    redirect_count += 1;
                    continue;
                }
                debug!(status = status.as_u16(), "redirect not allowed by policy");
            }

            debug!(status = status.as_u16(), version = ?exchange.version(), "response received");
            let response_headers = exchange.headers().clone();
            let read_timeout = remaining_timeout(request.timeout(), started_at);
            let body = self
                .read_body(exchange, read_timeout)
                .map_err(|error| match error {
                    ReadBodyError::TimedOut => TransportError::Timeout {
                        timeout_ms: request.timeout().as_millis(),
                        method: method.clone(),
                        uri: redacted.clone(),
                    },
                    ReadBodyError::Read(source) => TransportError::ReadBody {
                        method: method.clone(),
                        uri: redacted.clone(),
                        source,
                    },
                    ReadBodyError::TooLarge { actual_bytes } => {
                        TransportError::ResponseBodyTooLarge {
                            limit_bytes: self.max_response_body_bytes,
                            actual_bytes,
                            method: method.clone(),
                            uri: redacted.clone(),
                        }
                    }
                })?;
            return Ok(Response::new(status, response_headers, body));
        }
    }

    fn run_once(&self, hop: &Hop<'_>, timeout: Duration) -> Result<Exchange, TransportError> {
        let method = hop.method;
        let redacted_uri = hop.redacted_uri;

        #[cfg(feature = "tls-rustls")]
        if let Some(http2) = &self.http2
            && hop.uri.scheme() == Some(&Scheme::HTTPS)
        {
            return http2
                .send(method, hop.uri_text, hop.headers, hop.body, timeout)
                .map(|response| Exchange::Http2(Arc::clone(http2), response))
                .map_err(|error| match error {
                    TransportRequestError::RequestBuild(source) => {
                        TransportError::RequestBuild { source }
                    }
                    TransportRequestError::Timeout => TransportError::Timeout {
                        timeout_ms: timeout.as_millis(),
                        method: method.clone(),
                        uri: redacted_uri.to_owned(),
                    },
                    TransportRequestError::Transport(source) => TransportError::Transport {
                        kind: classify_transport_error(&source),
                        method: method.clone(),
                        uri: redacted_uri.to_owned(),
                        source: Box::new(source),
                    },
                });
        }

        let mut builder = ureq::http::Request::builder()
            .method(method.clone())
            .uri(hop.uri_text);
        for (name, value) in hop.headers {
            builder = builder.header(name, value);
        }
        let response = match hop.body {
            Some(body) => {
                let request = builder
                    .body(body.to_vec())
                    .map_err(|source| TransportError::RequestBuild { source })?;
                self.run_configured_request(request, timeout, method, redacted_uri)
            }
            None => {
                let request = builder
                    .body(())
                    .map_err(|source| TransportError::RequestBuild { source })?;
                self.run_configured_request(request, timeout, method, redacted_uri)
            }
        }?;
        Ok(Exchange::Http1(response))
    }

    fn run_configured_request<S: ureq::AsSendBody>(
        &self,
        request: ureq::http::Request<S>,
        timeout: Duration,
        method: &Method,
        redacted_uri: &str,
    ) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let configured_request = self
            .agent
            .configure_request(request)
            .timeout_global(Some(timeout))
            .build();

        self.agent
            .run(configured_request)
            .map_err(|source| match source {
                ureq::Error::Timeout(_) => TransportError::Timeout {
                    timeout_ms: timeout.as_millis(),
                    method: method.clone(),
                    uri: redacted_uri.to_owned(),
                },
                other => TransportError::Transport {
                    kind: classify_ureq_transport_error(&other),
                    method: method.clone(),
                    uri: redacted_uri.to_owned(),
                    source: Box::new(other),
                },
            })
    }

    /// ureq enforces the request's global timeout while the body streams;
    /// the hyper body read gets what is left of the call timeout.
    fn read_body(&self, exchange: Exchange, timeout: Duration) -> Result<Bytes, ReadBodyError> {
        #[cfg(not(feature = "tls-rustls"))]
        let _ = timeout;
        match exchange {
            Exchange::Http1(mut response) => {
                read_body_limited(&mut response, self.max_response_body_bytes)
            }
            #[cfg(feature = "tls-rustls")]
            Exchange::Http2(http2, response) => {
                http2.read_body(response.into_body(), self.max_response_body_bytes, timeout)
            }
        }
    }

    /// Drops the pools and their connections.
    pub fn close(self) {
        debug!(tls_backend = self.tls_backend.as_str(), "closing transport client");
        drop(self);
    }
}

fn remaining_timeout(total: Duration, started_at: Instant) -> Duration {
    total
        .saturating_sub(started_at.elapsed())
        .max(Duration::from_millis(1))
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-rustls")]
        ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::NativeTls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::Der(_) => TransportErrorKind::Tls,
        ureq::Error::Pem(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectionFailed => TransportErrorKind::Connect,
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Read
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}

fn wrapped_ureq_error(io_error: &std::io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}

pub(crate) enum ReadBodyError {
    Read(BoxError),
    TimedOut,
    TooLarge { actual_bytes: usize },
}

fn read_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut total_len = 0_usize;

    loop {
        let read = reader.read(&mut chunk).map_err(|source| {
            if matches!(wrapped_ureq_error(&source), Some(ureq::Error::Timeout(_))) {
                ReadBodyError::TimedOut
            } else {
                ReadBodyError::Read(Box::new(source))
            }
        })?;
        if read == 0 {
            break;
        }
        total_len = total_len.saturating_add(read);
        if total_len > max_bytes {
            return Err(ReadBodyError::TooLarge {
                actual_bytes: total_len,
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}
