//! `httpunit` runs one configured HTTP request a fixed number of times, one
//! blocking call per host step, and queues every successful response body in
//! call order.
//!
//! # Quick Start
//!
//! ```no_run
//! use httpunit::prelude::{HttpUnit, UnitConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UnitConfig::from_parameters([
//!         ("url", "https://api.example.com/v1/status"),
//!         ("numberOfCalls", "3"),
//!         ("header", "Accept"),
//!         ("header", "application/json"),
//!     ])?;
//!
//!     let mut unit = HttpUnit::initialize(config)?;
//!     while unit.run_one_step()?.more_work {}
//!     unit.release();
//!
//!     while let Ok(body) = unit.queue_mut().pop() {
//!         println!("{body}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Failure Model
//!
//! - [`Error`] is fatal: bad configuration, TLS setup, a released unit.
//! - [`TransportError`] belongs to a single call and is only counted as a
//!   failure; the loop continues with the next step.

#[cfg(all(not(feature = "tls-rustls"), not(feature = "tls-native")))]
compile_error!("httpunit requires one TLS backend feature: enable `tls-rustls` or `tls-native`");

mod config;
mod engine;
mod error;
#[cfg(feature = "tls-rustls")]
mod http2;
mod policy;
mod queue;
mod request;
mod retry;
mod runner;
mod state;
mod tls;
mod transport;
mod util;

pub use crate::config::UnitConfig;
pub use crate::engine::{
    CallFailure, HttpUnit, StepOutcome, StepReport, UnitSnapshot, UnitState,
};
pub use crate::error::{Error, ErrorCode, TransportError, TransportErrorKind};
pub use crate::policy::RedirectPolicy;
pub use crate::queue::{EmptyQueue, ResultQueue};
pub use crate::request::{
    ProtocolVersion, RequestSpec, request_query, resolve_request_uri, resolve_request_url,
};
pub use crate::retry::{CallDisposition, RetryPolicy};
pub use crate::runner::{RunReport, UnitRunner};
pub use crate::state::CallState;
pub use crate::tls::{TlsBackend, TlsPolicy, TrustPolicy};
pub use crate::transport::{Response, TransportClient};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CallFailure, CallState, EmptyQueue, Error, ErrorCode, HttpUnit, ResultQueue, RunReport,
        StepOutcome, StepReport, TlsBackend, TransportError, TransportErrorKind, UnitConfig,
        UnitRunner, UnitState,
    };
}
