use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::runtime::Runtime;
use tokio::time::timeout;

use crate::error::{Error, TransportErrorKind};
use crate::tls::{TlsPolicy, build_rustls_client_config};
use crate::transport::ReadBodyError;
use crate::util::parse_header_value;

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub(crate) enum TransportRequestError {
    RequestBuild(http::Error),
    Transport(hyper_util::client::legacy::Error),
    Timeout,
}

/// hyper client that offers `h2` and `http/1.1` over ALPN and keeps whichever
/// the server picks. Driven on its own current-thread runtime so the unit
/// stays blocking.
pub(crate) struct Http2Client {
    runtime: Runtime,
    client: HyperClient,
    user_agent: HeaderValue,
}

impl Http2Client {
    pub(crate) fn new(
        tls_policy: &TlsPolicy,
        connect_timeout: Duration,
        user_agent: &str,
    ) -> crate::Result<Self> {
        let tls_config = build_rustls_client_config(tls_policy)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| Error::TransportInit { source })?;

        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(connect_timeout));
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new()).build(https);

        let user_agent = parse_header_value(USER_AGENT.as_str(), user_agent)?;
        Ok(Self {
            runtime,
            client,
            user_agent,
        })
    }

    pub(crate) fn send(
        &self,
        method: &Method,
        uri_text: &str,
        headers: &[(HeaderName, HeaderValue)],
        body: Option<&Bytes>,
        transport_timeout: Duration,
    ) -> Result<Response<Incoming>, TransportRequestError> {
        let mut builder = Request::builder().method(method.clone()).uri(uri_text);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !headers.iter().any(|(name, _)| *name == USER_AGENT) {
            builder = builder.header(USER_AGENT, self.user_agent.clone());
        }
        let request = builder
            .body(Full::new(body.cloned().unwrap_or_default()))
            .map_err(TransportRequestError::RequestBuild)?;

        self.runtime.block_on(async {
            match timeout(transport_timeout, self.client.request(request)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(source)) => Err(TransportRequestError::Transport(source)),
                Err(_) => Err(TransportRequestError::Timeout),
            }
        })
    }

    pub(crate) fn read_body(
        &self,
        body: Incoming,
        max_bytes: usize,
        read_timeout: Duration,
    ) -> Result<Bytes, ReadBodyError> {
        self.runtime.block_on(async {
            match timeout(read_timeout, read_all_body_limited(body, max_bytes)).await {
                Ok(result) => result,
                Err(_) => Err(ReadBodyError::TimedOut),
            }
        })
    }
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| ReadBodyError::Read(Box::new(source)))?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(ReadBodyError::TooLarge {
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let text = error_chain_text(error);
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.to_ascii_lowercase()
}
