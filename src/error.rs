use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidParameter,
    InvalidHeader,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidMethod,
    TlsBackendUnavailable,
    TlsConfig,
    TransportInit,
    Released,
    Snapshot,
    SnapshotMismatch,
    Transport,
    Timeout,
    RequestBuild,
    ReadBody,
    ResponseBodyTooLarge,
    MissingRedirectLocation,
    InvalidRedirectLocation,
    RedirectLimitExceeded,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidParameter => "invalid_parameter",
            Self::InvalidHeader => "invalid_header",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::InvalidMethod => "invalid_method",
            Self::TlsBackendUnavailable => "tls_backend_unavailable",
            Self::TlsConfig => "tls_config",
            Self::TransportInit => "transport_init",
            Self::Released => "released",
            Self::Snapshot => "snapshot",
            Self::SnapshotMismatch => "snapshot_mismatch",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::RequestBuild => "request_build",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::MissingRedirectLocation => "missing_redirect_location",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::RedirectLimitExceeded => "redirect_limit_exceeded",
        }
    }

    /// Configuration and lifecycle errors abort the unit; everything else is
    /// absorbed into the failure counter of a single call.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InvalidUri
                | Self::InvalidParameter
                | Self::InvalidHeader
                | Self::InvalidHeaderName
                | Self::InvalidHeaderValue
                | Self::InvalidMethod
                | Self::TlsBackendUnavailable
                | Self::TlsConfig
                | Self::TransportInit
                | Self::Released
                | Self::Snapshot
                | Self::SnapshotMismatch
        )
    }
}

/// Errors raised while initializing, resuming or driving a unit. Any of these
/// ends the unit; no call is attempted after one is returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid value {value:?} for parameter {name}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
    #[error("invalid header entry {entry:?}, header entries alternate name and value")]
    InvalidHeader { entry: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("invalid request method {method:?}")]
    InvalidMethod { method: String },
    #[error("requested tls backend is not enabled in this build: {backend}")]
    TlsBackendUnavailable { backend: &'static str },
    #[error("invalid tls configuration for backend {backend}: {message}")]
    TlsConfig {
        backend: &'static str,
        message: String,
    },
    #[error("failed to start transport runtime: {source}")]
    TransportInit {
        #[source]
        source: std::io::Error,
    },
    #[error("http unit transport was already released")]
    Released,
    #[error("failed to encode or decode unit snapshot: {source}")]
    Snapshot {
        #[source]
        source: serde_json::Error,
    },
    #[error("unit snapshot requests {snapshot} calls but configuration requests {configured}")]
    SnapshotMismatch { snapshot: u64, configured: u64 },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::InvalidHeader { .. } => ErrorCode::InvalidHeader,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::InvalidMethod { .. } => ErrorCode::InvalidMethod,
            Self::TlsBackendUnavailable { .. } => ErrorCode::TlsBackendUnavailable,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
            Self::Released => ErrorCode::Released,
            Self::Snapshot { .. } => ErrorCode::Snapshot,
            Self::SnapshotMismatch { .. } => ErrorCode::SnapshotMismatch,
        }
    }

    pub(crate) fn invalid_parameter(
        name: &str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            name: name.to_owned(),
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single call. Recorded as a failed call by the engine, the loop
/// keeps going.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to read response body for {method} {uri}: {source}")]
    ReadBody {
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("redirect response {status} missing location header for {method} {uri}")]
    MissingRedirectLocation {
        status: u16,
        method: Method,
        uri: String,
    },
    #[error("invalid redirect location {location} for {method} {uri}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        uri: String,
    },
    #[error("redirect limit exceeded ({max_redirects}) for {method} {uri}")]
    RedirectLimitExceeded {
        max_redirects: usize,
        method: Method,
        uri: String,
    },
}

impl TransportError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::MissingRedirectLocation { .. } => ErrorCode::MissingRedirectLocation,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::RedirectLimitExceeded { .. } => ErrorCode::RedirectLimitExceeded,
        }
    }

    pub const fn kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, TransportError};

    #[test]
    fn configuration_errors_are_fatal_and_call_errors_are_not() {
        let error = Error::InvalidUri {
            uri: "http://".to_owned(),
        };
        assert!(error.code().is_fatal());
        assert_eq!(error.code().as_str(), "invalid_uri");

        let error = TransportError::Timeout {
            timeout_ms: 1000,
            method: http::Method::GET,
            uri: "http://localhost/".to_owned(),
        };
        assert_eq!(error.code(), ErrorCode::Timeout);
        assert!(!error.code().is_fatal());
        assert!(error.kind().is_none());
    }
}
