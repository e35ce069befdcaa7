use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info, warn};

use crate::config::UnitConfig;
use crate::error::{Error, TransportError};
use crate::queue::ResultQueue;
use crate::request::RequestSpec;
use crate::retry::{CallDisposition, RetryPolicy};
use crate::state::CallState;
use crate::tls::TlsPolicy;
use crate::transport::{Response, TransportClient};
use crate::util::{redact_uri_for_logs, truncate_for_log};

/// Lifecycle of a unit as seen by its host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    Ready,
    Running,
    Suspended,
    Completed,
    Released,
}

impl UnitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Released => "released",
        }
    }
}

/// Why a call was counted as failed.
#[derive(Debug)]
pub enum CallFailure {
    UnexpectedStatus { status: StatusCode },
    Transport(TransportError),
}

#[derive(Debug)]
pub enum StepOutcome {
    /// The body was pushed to the result queue.
    Success {
        status: StatusCode,
        status_matches_expected: bool,
    },
    /// 404 under the retry policy; the same call slot runs again next step.
    RetryDelay { status: StatusCode, delay: Duration },
    Failure(CallFailure),
    /// The call budget was already spent, nothing was sent.
    Idle,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Success { status, .. }
            | Self::RetryDelay { status, .. }
            | Self::Failure(CallFailure::UnexpectedStatus { status }) => Some(*status),
            Self::Failure(CallFailure::Transport(_)) | Self::Idle => None,
        }
    }
}

#[derive(Debug)]
pub struct StepReport {
    pub more_work: bool,
    pub outcome: StepOutcome,
}

/// Serializable progress of a unit, taken between steps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSnapshot {
    call_state: CallState,
    queue: ResultQueue,
    #[serde(default)]
    retries_in_slot: u32,
}

impl UnitSnapshot {
    pub fn call_state(&self) -> &CallState {
        &self.call_state
    }

    pub fn queue(&self) -> &ResultQueue {
        &self.queue
    }

    pub fn retries_in_slot(&self) -> u32 {
        self.retries_in_slot
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|source| Error::Snapshot { source })
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|source| Error::Snapshot { source })
    }
}

/// One unit of work: a fixed request issued `numberOfCalls` times, one call
/// per host step.
///
/// Transport resources live from [`HttpUnit::initialize`] until
/// [`HttpUnit::release`] (or drop). Counters and queued bodies stay readable
/// after release.
#[derive(Debug)]
pub struct HttpUnit {
    config: UnitConfig,
    request: RequestSpec,
    tls_policy: TlsPolicy,
    retry_policy: RetryPolicy,
    transport: Option<TransportClient>,
    call_state: CallState,
    queue: ResultQueue,
    retries_in_slot: u32,
    steps: u64,
    state: UnitState,
}

impl HttpUnit {
    pub fn initialize(config: UnitConfig) -> crate::Result<Self> {
        config.validate()?;
        let request = RequestSpec::from_config(&config)?;
        let tls_policy = TlsPolicy::from_config(&config);
        let transport = TransportClient::new(&config, &request, &tls_policy)?;
        let retry_policy = RetryPolicy::from_config(&config);
        let call_state = CallState::new(config.number_of_calls);

        info!(
            method = %request.method(),
            uri = %redact_uri_for_logs(request.uri_text()),
            calls = config.number_of_calls,
            tls_backend = transport.tls_backend().as_str(),
            http2 = transport.negotiates_http2(),
            "http unit initialized"
        );

        Ok(Self {
            config,
            request,
            tls_policy,
            retry_policy,
            transport: Some(transport),
            call_state,
            queue: ResultQueue::new(),
            retries_in_slot: 0,
            steps: 0,
            state: UnitState::Ready,
        })
    }

    /// Re-creates transport resources from `config` and continues from `snapshot`.
    pub fn resume(config: UnitConfig, snapshot: UnitSnapshot) -> crate::Result<Self> {
        let requested = snapshot.call_state.calls_requested();
        if requested != config.number_of_calls {
            return Err(Error::SnapshotMismatch {
                snapshot: requested,
                configured: config.number_of_calls,
            });
        }
        if !snapshot.call_state.is_consistent() {
            return Err(Error::Snapshot {
                source: <serde_json::Error as serde::de::Error>::custom(
                    "call counters do not add up",
                ),
            });
        }

        let mut unit = Self::initialize(config)?;
        unit.call_state = snapshot.call_state;
        unit.queue = snapshot.queue;
        unit.retries_in_slot = snapshot.retries_in_slot;
        unit.state = if unit.call_state.has_more_work() {
            UnitState::Suspended
        } else {
            UnitState::Completed
        };
        debug!(
            completed = unit.call_state.calls_completed(),
            queued = unit.queue.size(),
            "http unit resumed from snapshot"
        );
        Ok(unit)
    }

    pub fn estimate_total_calls(&self) -> u64 {
        self.call_state.calls_requested()
    }

    /// Performs at most one call and reports whether calls remain.
    ///
    /// Per-call failures are recorded and returned in the outcome; only a
    /// released unit makes this return `Err`.
    pub fn run_one_step(&mut self) -> crate::Result<StepReport> {
        let Some(transport) = self.transport.as_ref() else {
            return Err(Error::Released);
        };
        if !self.call_state.has_more_work() {
            self.state = UnitState::Completed;
            return Ok(StepReport {
                more_work: false,
                outcome: StepOutcome::Idle,
            });
        }

        self.steps += 1;
        let span = debug_span!("http_unit_step", step = self.steps);
        let _entered = span.enter();
        self.state = UnitState::Running;

        let outcome = match transport.send(&self.request) {
            Ok(response) => self.record_response(response),
            Err(error) => {
                warn!(
                    code = error.code().as_str(),
                    error = %error,
                    "http call failed"
                );
                self.retries_in_slot = 0;
                self.call_state.record_failure();
                StepOutcome::Failure(CallFailure::Transport(error))
            }
        };

        let more_work = self.call_state.has_more_work();
        if !more_work {
            self.state = UnitState::Completed;
            info!(
                success = self.call_state.success_count(),
                failure = self.call_state.failure_count(),
                retries = self.call_state.retry_count(),
                queued = self.queue.size(),
                "http unit completed"
            );
        }
        Ok(StepReport { more_work, outcome })
    }

    fn record_response(&mut self, response: Response) -> StepOutcome {
        let status = response.status();
        let expected = self.retry_policy.expected_status_value();

        match self.retry_policy.classify(status, self.retries_in_slot) {
            CallDisposition::Success {
                status_matches_expected,
            } => {
                if !status_matches_expected {
                    warn!(
                        status = status.as_u16(),
                        expected, "response status differs from expected status"
                    );
                }
                debug!(status = status.as_u16(), bytes = response.body().len(), "http call succeeded");
                self.queue.push(response.into_text_lossy());
                self.retries_in_slot = 0;
                self.call_state.record_success();
                StepOutcome::Success {
                    status,
                    status_matches_expected,
                }
            }
            CallDisposition::RetryDelay { delay } => {
                self.retries_in_slot += 1;
                self.call_state.record_retry();
                warn!(
                    status = status.as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.retries_in_slot,
                    "resource not found, delaying before retrying call"
                );
                std::thread::sleep(delay);
                StepOutcome::RetryDelay { status, delay }
            }
            CallDisposition::Failure { .. } => {
                warn!(
                    status = status.as_u16(),
                    expected,
                    strict = self.retry_policy.is_strict(),
                    body = %truncate_for_log(&response.text_lossy()),
                    "http call returned failing status"
                );
                self.retries_in_slot = 0;
                self.call_state.record_failure();
                StepOutcome::Failure(CallFailure::UnexpectedStatus { status })
            }
        }
    }

    /// Marks a pause chosen by the host between two steps.
    pub fn suspend(&mut self) {
        if self.state == UnitState::Running || self.state == UnitState::Ready {
            self.state = UnitState::Suspended;
        }
    }

    /// Closes the transport. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
            info!(
                completed = self.call_state.calls_completed(),
                requested = self.call_state.calls_requested(),
                "http unit released"
            );
        }
        self.state = UnitState::Released;
    }

    pub fn is_released(&self) -> bool {
        self.transport.is_none()
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            call_state: self.call_state.clone(),
            queue: self.queue.clone(),
            retries_in_slot: self.retries_in_slot,
        }
    }

    /// Releases the unit and hands its counters and queue to the caller.
    pub fn into_parts(mut self) -> (CallState, ResultQueue) {
        self.release();
        (
            std::mem::take(&mut self.call_state),
            std::mem::take(&mut self.queue),
        )
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn call_state(&self) -> &CallState {
        &self.call_state
    }

    pub fn queue(&self) -> &ResultQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ResultQueue {
        &mut self.queue
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn request(&self) -> &RequestSpec {
        &self.request
    }

    pub fn tls_policy(&self) -> &TlsPolicy {
        &self.tls_policy
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Drop for HttpUnit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpUnit, UnitSnapshot, UnitState};
    use crate::{ErrorCode, UnitConfig};

    fn closed_port_config(calls: u64) -> UnitConfig {
        UnitConfig::default()
            .with_domain("127.0.0.1")
            .with_port(9)
            .with_number_of_calls(calls)
            .with_timeout_secs(2)
    }

    #[test]
    fn zero_calls_completes_without_network() {
        let mut unit =
            HttpUnit::initialize(closed_port_config(0)).expect("unit should initialize");
        assert_eq!(unit.estimate_total_calls(), 0);
        assert_eq!(unit.state(), UnitState::Ready);

        let report = unit.run_one_step().expect("step should run");
        assert!(!report.more_work);
        assert!(matches!(report.outcome, super::StepOutcome::Idle));
        assert_eq!(unit.state(), UnitState::Completed);
        assert_eq!(unit.steps(), 0);
    }

    #[test]
    fn release_is_idempotent_and_blocks_further_steps() {
        let mut unit =
            HttpUnit::initialize(closed_port_config(1)).expect("unit should initialize");
        unit.release();
        unit.release();
        assert!(unit.is_released());
        assert_eq!(unit.state(), UnitState::Released);

        let error = unit.run_one_step().expect_err("released unit must not step");
        assert_eq!(error.code(), ErrorCode::Released);
        assert_eq!(unit.call_state().calls_completed(), 0);
    }

    #[test]
    fn invalid_configuration_fails_initialization() {
        let error = HttpUnit::initialize(UnitConfig::default().with_url("::bogus"))
            .expect_err("uri should be rejected");
        assert_eq!(error.code(), ErrorCode::InvalidUri);

        let error = HttpUnit::initialize(UnitConfig::default().with_timeout_secs(0))
            .expect_err("zero timeout should be rejected");
        assert_eq!(error.code(), ErrorCode::InvalidParameter);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut unit =
            HttpUnit::initialize(closed_port_config(3)).expect("unit should initialize");
        unit.queue_mut().push("kept");
        let json = unit.snapshot().to_json().expect("snapshot should encode");
        unit.release();

        let snapshot = UnitSnapshot::from_json(&json).expect("snapshot should decode");
        let resumed =
            HttpUnit::resume(closed_port_config(3), snapshot).expect("unit should resume");
        assert_eq!(resumed.state(), UnitState::Suspended);
        assert_eq!(resumed.queue().iter().collect::<Vec<_>>(), vec!["kept"]);
        assert_eq!(resumed.call_state().calls_requested(), 3);
    }

    #[test]
    fn snapshot_with_other_budget_is_rejected() {
        let unit = HttpUnit::initialize(closed_port_config(2)).expect("unit should initialize");
        let snapshot = unit.snapshot();
        drop(unit);

        let error = HttpUnit::resume(closed_port_config(5), snapshot)
            .expect_err("budget mismatch should be rejected");
        assert_eq!(error.code(), ErrorCode::SnapshotMismatch);
    }

    #[test]
    fn malformed_snapshot_json_is_rejected() {
        let error = UnitSnapshot::from_json("{\"callState\": 1}").expect_err("should fail");
        assert_eq!(error.code(), ErrorCode::Snapshot);

        let snapshot = UnitSnapshot::from_json(
            r#"{"callState":{"callsRequested":1,"callsCompleted":1,"successCount":0,"failureCount":0,"retryCount":0},"queue":[]}"#,
        )
        .expect("snapshot should decode");
        let error = HttpUnit::resume(closed_port_config(1), snapshot)
            .expect_err("inconsistent counters should be rejected");
        assert_eq!(error.code(), ErrorCode::Snapshot);
    }
}
