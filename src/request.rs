use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Uri};
use tracing::debug;

use crate::config::UnitConfig;
use crate::error::Error;
use crate::policy::RedirectPolicy;
use crate::util::{encode_query, parse_header_name, parse_header_value, redact_uri_for_logs};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolVersion {
    Http11,
    Http2,
}

impl ProtocolVersion {
    /// `"1.1"` selects HTTP/1.1, any other value HTTP/2.
    pub fn from_config(value: &str) -> Self {
        if value.trim() == "1.1" {
            Self::Http11
        } else {
            Self::Http2
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http11 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }
}

/// The immutable template every call of a unit is issued from.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    method: Method,
    uri: Uri,
    uri_text: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Bytes>,
    timeout: Duration,
    protocol_version: ProtocolVersion,
    redirect_policy: RedirectPolicy,
}

impl RequestSpec {
    pub fn from_config(config: &UnitConfig) -> crate::Result<Self> {
        let (uri_text, uri) = resolve_request_uri(config)?;
        let method = parse_method(&config.method)?;
        let headers = parse_headers(&config.header)?;
        let body = if method_carries_body(&method) {
            Some(Bytes::from(config.body.trim().to_owned()))
        } else {
            None
        };
        let protocol_version = ProtocolVersion::from_config(&config.http_version);
        let redirect_policy = RedirectPolicy::from_config(&config.follow_redirect);

        debug!(
            method = %method,
            uri = %redact_uri_for_logs(&uri_text),
            headers = headers.len(),
            http_version = protocol_version.as_str(),
            redirect = redirect_policy.as_str(),
            "resolved request"
        );

        Ok(Self {
            method,
            uri,
            uri_text,
            headers,
            body,
            timeout: config.timeout(),
            protocol_version,
            redirect_policy,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn uri_text(&self) -> &str {
        &self.uri_text
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn redirect_policy(&self) -> RedirectPolicy {
        self.redirect_policy
    }

    pub fn is_secure(&self) -> bool {
        self.uri
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"))
    }
}

/// The explicit `url` verbatim, or `protocol://domain[:port]path`.
pub fn resolve_request_url(config: &UnitConfig) -> String {
    if let Some(url) = config.url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        return url.to_owned();
    }

    let mut url = String::new();
    let protocol = config.protocol.trim();
    if !protocol.is_empty() {
        url.push_str(protocol);
        url.push_str("://");
    }
    url.push_str(config.domain.trim());
    if config.port > 0 {
        url.push(':');
        url.push_str(&config.port.to_string());
    }
    url.push_str(config.path.trim());
    url
}

/// `?query` (percent-encoded when enabled) or an empty string.
pub fn request_query(config: &UnitConfig) -> String {
    let query = config.query.trim();
    if query.is_empty() {
        return String::new();
    }
    if config.encode_query {
        format!("?{}", encode_query(query))
    } else {
        format!("?{query}")
    }
}

pub fn resolve_request_uri(config: &UnitConfig) -> crate::Result<(String, Uri)> {
    let uri_text = resolve_request_url(config) + &request_query(config);
    let invalid = || Error::InvalidUri {
        uri: uri_text.clone(),
    };

    let parsed = url::Url::parse(&uri_text).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    let uri = uri_text.parse::<Uri>().map_err(|_| invalid())?;
    Ok((uri_text, uri))
}

fn parse_method(raw: &str) -> crate::Result<Method> {
    let method = raw.trim().to_ascii_uppercase();
    if method.is_empty() {
        return Err(Error::InvalidMethod {
            method: raw.to_owned(),
        });
    }
    Method::from_bytes(method.as_bytes()).map_err(|_| Error::InvalidMethod {
        method: raw.to_owned(),
    })
}

fn method_carries_body(method: &Method) -> bool {
    *method != Method::GET && *method != Method::DELETE
}

/// Reads `entries` as alternating header name and value.
fn parse_headers(entries: &[String]) -> crate::Result<Vec<(HeaderName, HeaderValue)>> {
    let mut headers = Vec::with_capacity(entries.len() / 2);
    for pair in entries.chunks(2) {
        let [raw_name, value] = pair else {
            return Err(Error::InvalidHeader {
                entry: pair.concat(),
            });
        };
        let name = raw_name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader {
                entry: raw_name.clone(),
            });
        }
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value.trim())?;
        headers.push((header_name, header_value));
    }
    Ok(headers)
}
