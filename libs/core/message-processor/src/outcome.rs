//! Outcome routing: failure kind → terminal action, plus the per-attempt state machine.
//!
//! An attempt moves `Received → Decoding → Dispatching → Resolved`, or skips
//! `Dispatching` when decoding fails. The states are types, so an attempt cannot move
//! backwards or be resolved twice.

use crate::classifier::{FailureKind, Outcome};
use crate::envelope::DecodeFailure;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

pub const PROP_DEAD_LETTER_REASON: &str = "DeadLetterReason";
pub const PROP_DEAD_LETTER_DESCRIPTION: &str = "DeadLetterErrorDescription";
pub const PROP_ORIGINAL_EXCEPTION_TYPE: &str = "OriginalExceptionType";
pub const PROP_ORIGINAL_EXCEPTION_MESSAGE: &str = "OriginalExceptionMessage";
pub const PROP_EVENT_TYPE: &str = "EventType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString)]
pub enum DeadLetterReason {
    MissingEventType,
    UnknownEventType,
    MaxDeliveryAttemptsExceeded,
    DatabaseUpdateFailure,
}

/// Dead-letter instruction with its machine-readable diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub reason: DeadLetterReason,
    pub description: String,
    /// Always contains `DeadLetterReason` and `DeadLetterErrorDescription`.
    pub properties: BTreeMap<String, String>,
}

impl DeadLetter {
    pub fn new(reason: DeadLetterReason, description: impl Into<String>) -> Self {
        let description = description.into();
        let mut properties = BTreeMap::new();
        properties.insert(PROP_DEAD_LETTER_REASON.to_string(), reason.to_string());
        properties.insert(PROP_DEAD_LETTER_DESCRIPTION.to_string(), description.clone());
        Self {
            reason,
            description,
            properties,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    Complete,
    Abandon,
    DeadLetter(DeadLetter),
}

impl TerminalAction {
    pub fn name(&self) -> &'static str {
        match self {
            TerminalAction::Complete => "complete",
            TerminalAction::Abandon => "abandon",
            TerminalAction::DeadLetter(_) => "dead_letter",
        }
    }

    pub fn dead_letter(&self) -> Option<&DeadLetter> {
        match self {
            TerminalAction::DeadLetter(dl) => Some(dl),
            _ => None,
        }
    }
}

/// Message facts the router needs besides the outcome itself.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub routing_key_property: &'a str,
    pub event_type: Option<&'a str>,
    pub delivery_count: u32,
    pub max_delivery_count: u32,
}

/// | kind | action |
/// |---|---|
/// | none | `Complete` |
/// | `TransientInfrastructure`, `BusinessRejection` | `Abandon` |
/// | `MalformedInput` | `DeadLetter(MissingEventType \| UnknownEventType)` |
/// | `DeliveryExhausted` | `DeadLetter(MaxDeliveryAttemptsExceeded)` |
/// | `PermanentInfrastructure` | `DeadLetter(DatabaseUpdateFailure)` |
pub fn route(kind: Option<FailureKind>, outcome: &Outcome, ctx: &RouteContext<'_>) -> TerminalAction {
    let Some(kind) = kind else {
        return TerminalAction::Complete;
    };

    let dead_letter = match kind {
        FailureKind::TransientInfrastructure | FailureKind::BusinessRejection => {
            return TerminalAction::Abandon;
        }
        FailureKind::MalformedInput => malformed(outcome, ctx),
        FailureKind::DeliveryExhausted => with_fault(
            DeadLetter::new(
                DeadLetterReason::MaxDeliveryAttemptsExceeded,
                format!(
                    "Message was delivered {} times, exceeding the maximum of {}.",
                    ctx.delivery_count, ctx.max_delivery_count
                ),
            ),
            outcome,
        ),
        FailureKind::PermanentInfrastructure => {
            let description = outcome
                .fault()
                .map(|err| err.detail())
                .unwrap_or_else(|| "Handler failed without an error".to_string());
            with_fault(
                DeadLetter::new(DeadLetterReason::DatabaseUpdateFailure, description),
                outcome,
            )
        }
    };

    let dead_letter = match ctx.event_type {
        Some(event_type) => dead_letter.with_property(PROP_EVENT_TYPE, event_type),
        None => dead_letter,
    };
    TerminalAction::DeadLetter(dead_letter)
}

fn malformed(outcome: &Outcome, ctx: &RouteContext<'_>) -> DeadLetter {
    match outcome {
        Outcome::Undecodable(DecodeFailure::MissingRoutingKey { property }) => DeadLetter::new(
            DeadLetterReason::MissingEventType,
            format!("The {} property is missing or invalid.", property),
        ),
        Outcome::Undecodable(DecodeFailure::UnknownEventType(event_type)) => DeadLetter::new(
            DeadLetterReason::UnknownEventType,
            format!("Unknown event type: {}", event_type),
        ),
        Outcome::Undecodable(DecodeFailure::MalformedBody { event_type, reason }) => {
            DeadLetter::new(
                DeadLetterReason::UnknownEventType,
                format!("Invalid body for event type {}: {}", event_type, reason),
            )
        }
        _ => DeadLetter::new(
            DeadLetterReason::MissingEventType,
            format!("The {} property is missing or invalid.", ctx.routing_key_property),
        ),
    }
}

fn with_fault(dead_letter: DeadLetter, outcome: &Outcome) -> DeadLetter {
    match outcome.fault() {
        Some(err) => dead_letter
            .with_property(PROP_ORIGINAL_EXCEPTION_TYPE, err.type_name())
            .with_property(PROP_ORIGINAL_EXCEPTION_MESSAGE, err.detail()),
        None => dead_letter,
    }
}

pub trait AttemptState {
    const NAME: &'static str;
}

pub struct Received;
pub struct Decoding;
pub struct Dispatching;

impl AttemptState for Received {
    const NAME: &'static str = "received";
}
impl AttemptState for Decoding {
    const NAME: &'static str = "decoding";
}
impl AttemptState for Dispatching {
    const NAME: &'static str = "dispatching";
}

/// One processing attempt of one delivery.
pub struct Attempt<S: AttemptState> {
    started: Instant,
    _state: PhantomData<S>,
}

impl<S: AttemptState> Attempt<S> {
    pub fn state(&self) -> &'static str {
        S::NAME
    }

    fn to<N: AttemptState>(self) -> Attempt<N> {
        Attempt {
            started: self.started,
            _state: PhantomData,
        }
    }

    fn finish(self, action: TerminalAction) -> Resolved {
        Resolved {
            action,
            elapsed: self.started.elapsed(),
        }
    }
}

impl Attempt<Received> {
    pub fn start() -> Self {
        Attempt {
            started: Instant::now(),
            _state: PhantomData,
        }
    }

    pub fn decoding(self) -> Attempt<Decoding> {
        self.to()
    }
}

impl Attempt<Decoding> {
    pub fn dispatching(self) -> Attempt<Dispatching> {
        self.to()
    }

    /// Decoding failed; no handler runs.
    pub fn resolve(self, action: TerminalAction) -> Resolved {
        self.finish(action)
    }
}

impl Attempt<Dispatching> {
    pub fn resolve(self, action: TerminalAction) -> Resolved {
        self.finish(action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub action: TerminalAction,
    pub elapsed: Duration,
}
