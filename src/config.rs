use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::Error;
use crate::tls::{TlsBackend, default_tls_backend};

pub(crate) const DEFAULT_PROTOCOL: &str = "http";
pub(crate) const DEFAULT_DOMAIN: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 8080;
pub(crate) const DEFAULT_PATH: &str = "/";
pub(crate) const DEFAULT_HTTP_VERSION: &str = "2";
pub(crate) const DEFAULT_METHOD: &str = "GET";
pub(crate) const DEFAULT_NUMBER_OF_CALLS: u64 = 1;
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub(crate) const DEFAULT_SLEEP_BEFORE_RETRY_SECS: u64 = 3;
pub(crate) const DEFAULT_FOLLOW_REDIRECT: &str = "true";
pub(crate) const DEFAULT_EXPECTED_RESPONSE_CODE: u16 = 200;
pub(crate) const DEFAULT_MAX_RETRIES_PER_CALL: u32 = 3;
pub(crate) const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
pub(crate) const DEFAULT_USER_AGENT: &str = "httpunit";

/// Resolved configuration of one unit.
///
/// Every key has an explicit default, so a host only supplies what it wants
/// to override. Field names follow the parameter keys a scheduler uses
/// (`numberOfCalls`, `sleeptimeBeforeRetry`, ...) when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct UnitConfig {
    pub protocol: String,
    pub domain: String,
    pub port: u16,
    pub path: String,
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub http_version: String,
    pub verify_certificate: bool,
    pub trust_certificate: Option<String>,
    pub method: String,
    pub query: String,
    pub encode_query: bool,
    /// Alternating header name and value entries, sent in order.
    pub header: Vec<String>,
    pub body: String,
    pub number_of_calls: u64,
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,
    #[serde(rename = "connectTimeout")]
    pub connect_timeout_secs: Option<u64>,
    pub retry_after_timeout: bool,
    #[serde(rename = "sleeptimeBeforeRetry")]
    pub sleeptime_before_retry_secs: u64,
    pub max_retries_per_call: u32,
    #[serde(deserialize_with = "lenient_string")]
    pub follow_redirect: String,
    pub expected_response_code: u16,
    pub strict_response_code: bool,
    pub max_response_body_bytes: usize,
    pub user_agent: String,
    #[serde(skip)]
    pub tls_backend: TlsBackend,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_owned(),
            domain: DEFAULT_DOMAIN.to_owned(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_owned(),
            url: None,
            http_version: DEFAULT_HTTP_VERSION.to_owned(),
            verify_certificate: true,
            trust_certificate: None,
            method: DEFAULT_METHOD.to_owned(),
            query: String::new(),
            encode_query: false,
            header: Vec::new(),
            body: String::new(),
            number_of_calls: DEFAULT_NUMBER_OF_CALLS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: None,
            retry_after_timeout: true,
            sleeptime_before_retry_secs: DEFAULT_SLEEP_BEFORE_RETRY_SECS,
            max_retries_per_call: DEFAULT_MAX_RETRIES_PER_CALL,
            follow_redirect: DEFAULT_FOLLOW_REDIRECT.to_owned(),
            expected_response_code: DEFAULT_EXPECTED_RESPONSE_CODE,
            strict_response_code: false,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            tls_backend: default_tls_backend(),
        }
    }
}

impl UnitConfig {
    /// Resolves a scheduler-style parameter list where every value is a string.
    ///
    /// `header` accumulates across repeated entries, empty values included, and
    /// is read as alternating name and value. For every other key the last
    /// occurrence wins. String values are trimmed.
    pub fn from_parameters<I, K, V>(parameters: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (name, value) in parameters {
            config.apply_parameter(name.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|source| {
            Error::invalid_parameter("<json>", json, source.to_string())
        })
    }

    fn apply_parameter(&mut self, name: &str, raw_value: &str) -> crate::Result<()> {
        let value = raw_value.trim();
        match name {
            "protocol" => self.protocol = value.to_owned(),
            "domain" => self.domain = value.to_owned(),
            "port" => self.port = parse_port(name, value)?,
            "path" => self.path = value.to_owned(),
            "url" => self.url = Some(value.to_owned()).filter(|url| !url.is_empty()),
            "httpVersion" => self.http_version = value.to_owned(),
            "verifyCertificate" => self.verify_certificate = parse_bool(name, value)?,
            "trustCertificate" => {
                self.trust_certificate = Some(value.to_owned()).filter(|pem| !pem.is_empty());
            }
            "method" => self.method = value.to_owned(),
            "query" => self.query = value.to_owned(),
            "encodeQuery" => self.encode_query = parse_bool(name, value)?,
            "header" => self.header.push(value.to_owned()),
            "body" => self.body = value.to_owned(),
            "numberOfCalls" => self.number_of_calls = parse_number(name, value)?,
            "timeout" => self.timeout_secs = parse_number(name, value)?,
            "connectTimeout" => self.connect_timeout_secs = Some(parse_number(name, value)?),
            "retryAfterTimeout" => self.retry_after_timeout = parse_bool(name, value)?,
            "sleeptimeBeforeRetry" => {
                self.sleeptime_before_retry_secs = parse_number(name, value)?;
            }
            "maxRetriesPerCall" => self.max_retries_per_call = parse_number(name, value)?,
            "followRedirect" => self.follow_redirect = value.to_owned(),
            "expectedResponseCode" => self.expected_response_code = parse_number(name, value)?,
            "strictResponseCode" => self.strict_response_code = parse_bool(name, value)?,
            "maxResponseBodyBytes" => self.max_response_body_bytes = parse_number(name, value)?,
            "userAgent" => self.user_agent = value.to_owned(),
            _ => return Err(Error::invalid_parameter(name, value, "unknown parameter")),
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::invalid_parameter(
                "timeout",
                "0",
                "timeout must be at least one second",
            ));
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(Error::invalid_parameter(
                "connectTimeout",
                "0",
                "connect timeout must be at least one second",
            ));
        }
        if self.max_response_body_bytes == 0 {
            return Err(Error::invalid_parameter(
                "maxResponseBodyBytes",
                "0",
                "response body limit must be positive",
            ));
        }
        if !(100..=999).contains(&self.expected_response_code) {
            return Err(Error::invalid_parameter(
                "expectedResponseCode",
                &self.expected_response_code.to_string(),
                "not an http status code",
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(self.timeout_secs))
    }

    pub fn sleep_before_retry(&self) -> Duration {
        Duration::from_secs(self.sleeptime_before_retry_secs)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_http_version(mut self, http_version: impl Into<String>) -> Self {
        self.http_version = http_version.into();
        self
    }

    pub fn with_verify_certificate(mut self, verify_certificate: bool) -> Self {
        self.verify_certificate = verify_certificate;
        self
    }

    pub fn with_trust_certificate(mut self, pem: impl Into<String>) -> Self {
        self.trust_certificate = Some(pem.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_encode_query(mut self, encode_query: bool) -> Self {
        self.encode_query = encode_query;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.header.push(name.to_owned());
        self.header.push(value.to_owned());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_number_of_calls(mut self, number_of_calls: u64) -> Self {
        self.number_of_calls = number_of_calls;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_connect_timeout_secs(mut self, connect_timeout_secs: u64) -> Self {
        self.connect_timeout_secs = Some(connect_timeout_secs);
        self
    }

    pub fn with_retry_after_timeout(mut self, retry_after_timeout: bool) -> Self {
        self.retry_after_timeout = retry_after_timeout;
        self
    }

    pub fn with_sleeptime_before_retry_secs(mut self, sleeptime_secs: u64) -> Self {
        self.sleeptime_before_retry_secs = sleeptime_secs;
        self
    }

    pub fn with_max_retries_per_call(mut self, max_retries_per_call: u32) -> Self {
        self.max_retries_per_call = max_retries_per_call;
        self
    }

    pub fn with_follow_redirect(mut self, follow_redirect: impl Into<String>) -> Self {
        self.follow_redirect = follow_redirect.into();
        self
    }

    pub fn with_expected_response_code(mut self, expected_response_code: u16) -> Self {
        self.expected_response_code = expected_response_code;
        self
    }

    pub fn with_strict_response_code(mut self, strict_response_code: bool) -> Self {
        self.strict_response_code = strict_response_code;
        self
    }

    pub fn with_max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_tls_backend(mut self, tls_backend: TlsBackend) -> Self {
        self.tls_backend = tls_backend;
        self
    }
}

fn parse_bool(name: &str, value: &str) -> crate::Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::invalid_parameter(name, value, "expected true or false"))
    }
}

fn parse_number<T>(name: &str, value: &str) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|source| Error::invalid_parameter(name, value, source.to_string()))
}

// Zero or negative ports mean "no explicit port".
fn parse_port(name: &str, value: &str) -> crate::Result<u16> {
    let port = parse_number::<i64>(name, value)?;
    if port <= 0 {
        return Ok(0);
    }
    u16::try_from(port).map_err(|_| Error::invalid_parameter(name, value, "port out of range"))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Bool(flag) => Ok(flag.to_string()),
        serde_json::Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, boolean or number, got {other}"
        ))),
    }
}
