//! Failure classification.
//!
//! Every attempt ends in an [`Outcome`]; [`classify`] reduces it to at most one
//! [`FailureKind`]. Rules, first match wins:
//!
//! 1. delivery count above the threshold → `DeliveryExhausted`
//! 2. decode failure → `MalformedInput`
//! 3. fault on the transient allow-list → `TransientInfrastructure`
//! 4. any other fault → `PermanentInfrastructure`
//! 5. unsuccessful result without a fault → `BusinessRejection`
//!
//! A successful result is never a failure, whatever the delivery count.

use crate::envelope::DecodeFailure;
use crate::error::HandlerError;
use crate::result::OperationResult;
use database::StoreErrorKind;
use std::collections::BTreeSet;

/// SQL Server error numbers and Postgres SQLSTATEs treated as transient:
///
/// | code | meaning |
/// |---|---|
/// | 40613 | database unavailable |
/// | 40501 | service busy |
/// | 40197 | service error processing request |
/// | -2 | timeout expired |
/// | 1205 | deadlock victim |
/// | 40001 | serialization_failure |
/// | 40P01 | deadlock_detected |
/// | 55P03 | lock_not_available |
/// | 57P03 | cannot_connect_now |
/// | 53300 | too_many_connections |
pub const DEFAULT_TRANSIENT_CODES: &[&str] = &[
    "40613", "40501", "40197", "-2", "1205", "40001", "40P01", "55P03", "57P03", "53300",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    MalformedInput,
    BusinessRejection,
    TransientInfrastructure,
    PermanentInfrastructure,
    DeliveryExhausted,
}

/// Explicit allow-list of error codes considered retryable.
///
/// Matching is by exact code, never by message text. Concurrency conflicts, timeouts and
/// cancellation are transient regardless of code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientFaults {
    codes: BTreeSet<String>,
}

impl TransientFaults {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn is_transient(&self, err: &HandlerError) -> bool {
        match err {
            HandlerError::Store(e) => {
                matches!(
                    e.kind(),
                    StoreErrorKind::ConcurrencyConflict
                        | StoreErrorKind::Timeout
                        | StoreErrorKind::Cancelled
                ) || e.code().is_some_and(|code| self.contains_code(code))
            }
            HandlerError::Cancelled => true,
            HandlerError::Panicked(_)
            | HandlerError::EventMismatch { .. }
            | HandlerError::Unexpected { .. } => false,
        }
    }
}

impl Default for TransientFaults {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSIENT_CODES.iter().copied())
    }
}

/// How one attempt ended, before classification.
#[derive(Debug)]
pub enum Outcome {
    Undecodable(DecodeFailure),
    Handled(OperationResult),
    Faulted(HandlerError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Handled(result) if result.is_success())
    }

    /// The fault behind this outcome, if any.
    pub fn fault(&self) -> Option<&HandlerError> {
        match self {
            Outcome::Faulted(err) => Some(err),
            Outcome::Handled(result) => result.cause(),
            Outcome::Undecodable(_) => None,
        }
    }
}

/// `None` means success.
pub fn classify(
    outcome: &Outcome,
    delivery_count: u32,
    max_delivery_count: u32,
    faults: &TransientFaults,
) -> Option<FailureKind> {
    if outcome.is_success() {
        return None;
    }

    if delivery_count > max_delivery_count {
        return Some(FailureKind::DeliveryExhausted);
    }

    let kind = match outcome {
        Outcome::Undecodable(_) => FailureKind::MalformedInput,
        _ => match outcome.fault() {
            Some(err) if faults.is_transient(err) => FailureKind::TransientInfrastructure,
            Some(_) => FailureKind::PermanentInfrastructure,
            None => FailureKind::BusinessRejection,
        },
    };
    Some(kind)
}
