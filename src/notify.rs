//! Notification events emitted by the workflows
//!
//! Emitting is best effort: a failed emit is logged and never undoes the
//! financial transition that triggered it.
use super::error::NotifyError;
use super::types::Money;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    DepositSubmitted,
    DepositAssigned,
    DepositEscalated,
    DepositApproved,
    DepositRejected,
    ApprovalRewarded,
    MemberPromoted,
    ExMemberActivated,
    RoleDemoted,
    SubscriptionRenewed,
    SubscriptionExpired,
    ReportFiled,
    ReportApproved,
    ReportRejected,
    PenaltyCharged,
    PostCharged,
    PostRefunded,
}

/// Flat key/value payload handed to the emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(BTreeMap<&'static str, String>);

pub trait NotificationEmitter: Send + Sync {
    fn emit(&self, user_id: &str, event: EventType, payload: &Payload) -> Result<(), NotifyError>;
}

/// Writes every event to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

/// Keeps every event in memory, handy for inspecting what a flow emitted.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<Notification>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: String,
    pub event: EventType,
    pub payload: Payload,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DepositSubmitted => "deposit_submitted",
            EventType::DepositAssigned => "deposit_assigned",
            EventType::DepositEscalated => "deposit_escalated",
            EventType::DepositApproved => "deposit_approved",
            EventType::DepositRejected => "deposit_rejected",
            EventType::ApprovalRewarded => "approval_rewarded",
            EventType::MemberPromoted => "member_promoted",
            EventType::ExMemberActivated => "ex_member_activated",
            EventType::RoleDemoted => "role_demoted",
            EventType::SubscriptionRenewed => "subscription_renewed",
            EventType::SubscriptionExpired => "subscription_expired",
            EventType::ReportFiled => "report_filed",
            EventType::ReportApproved => "report_approved",
            EventType::ReportRejected => "report_rejected",
            EventType::PenaltyCharged => "penalty_charged",
            EventType::PostCharged => "post_charged",
            EventType::PostRefunded => "post_refunded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.0.insert(key, value.to_string());
        self
    }
    pub fn with_amount(self, key: &'static str, amount: Money) -> Self {
        self.with(key, amount)
    }
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl NotificationEmitter for TracingEmitter {
    fn emit(&self, user_id: &str, event: EventType, payload: &Payload) -> Result<(), NotifyError> {
        tracing::info!(user_id, event = event.as_str(), %payload, "notification");
        Ok(())
    }
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }
    pub fn events_for(&self, user_id: &str) -> Vec<EventType> {
        self.events
            .lock()
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.event)
            .collect()
    }
}

impl NotificationEmitter for RecordingEmitter {
    fn emit(&self, user_id: &str, event: EventType, payload: &Payload) -> Result<(), NotifyError> {
        self.events.lock().push(Notification {
            user_id: user_id.to_string(),
            event,
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Emits and swallows failures after logging them.
pub(crate) fn emit_best_effort(
    emitter: &dyn NotificationEmitter,
    user_id: &str,
    event: EventType,
    payload: Payload,
) {
    if let Err(err) = emitter.emit(user_id, event, &payload) {
        tracing::warn!(user_id, event = event.as_str(), error = %err, "notification dropped");
    }
}
