use std::time::Duration;

use http::StatusCode;

use crate::config::UnitConfig;

/// What a received status means for the current call slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDisposition {
    /// Body is queued and the call counts as successful.
    Success { status_matches_expected: bool },
    /// Wait `delay` and issue the same call slot again on the next step.
    RetryDelay { delay: Duration },
    /// The call counts as failed, nothing is queued.
    Failure { status_matches_expected: bool },
}

/// Classification of responses by status code.
///
/// A 404 under `retry_on_not_found` is evaluated first, then either the
/// strict (`status == expected`) or lenient (`2xx`) success rule applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    retry_on_not_found: bool,
    sleep_before_retry: Duration,
    max_retries_per_call: u32,
    expected_status: u16,
    strict_expected_status: bool,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            retry_on_not_found: false,
            sleep_before_retry: Duration::ZERO,
            max_retries_per_call: 0,
            expected_status: 200,
            strict_expected_status: false,
        }
    }

    pub fn from_config(config: &UnitConfig) -> Self {
        Self {
            retry_on_not_found: config.retry_after_timeout,
            sleep_before_retry: config.sleep_before_retry(),
            max_retries_per_call: config.max_retries_per_call,
            expected_status: config.expected_response_code,
            strict_expected_status: config.strict_response_code,
        }
    }

    pub fn retry_on_not_found(mut self, enabled: bool) -> Self {
        self.retry_on_not_found = enabled;
        self
    }

    pub fn sleep_before_retry(mut self, delay: Duration) -> Self {
        self.sleep_before_retry = delay;
        self
    }

    pub fn max_retries_per_call(mut self, max_retries: u32) -> Self {
        self.max_retries_per_call = max_retries;
        self
    }

    pub fn expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn strict_expected_status(mut self, strict: bool) -> Self {
        self.strict_expected_status = strict;
        self
    }

    pub fn expected_status_value(&self) -> u16 {
        self.expected_status
    }

    pub fn is_strict(&self) -> bool {
        self.strict_expected_status
    }

    /// `retries_in_slot` counts the retry-delays already spent on the current slot.
    pub fn classify(&self, status: StatusCode, retries_in_slot: u32) -> CallDisposition {
        let status_matches_expected = status.as_u16() == self.expected_status;

        if status == StatusCode::NOT_FOUND && self.retry_on_not_found {
            if retries_in_slot < self.max_retries_per_call {
                return CallDisposition::RetryDelay {
                    delay: self.sleep_before_retry,
                };
            }
            return CallDisposition::Failure {
                status_matches_expected,
            };
        }

        let success = if self.strict_expected_status {
            status_matches_expected
        } else {
            status.is_success()
        };
        if success {
            CallDisposition::Success {
                status_matches_expected,
            }
        } else {
            CallDisposition::Failure {
                status_matches_expected,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UnitConfig::default())
    }
}
