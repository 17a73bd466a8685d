use chrono::{DateTime, Utc};
use loanbook_core::{AccountId, WaiverEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PAYMENTS_CLEARED_CHANNEL: &str = "payments.cleared";
pub const WAIVER_EVENTS_CHANNEL: &str = "waivers.events";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentClearedEvent {
    pub account_id: AccountId,
    /// Minor currency units.
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
    #[serde(default)]
    pub payment_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiverEventMessage {
    pub message_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WaiverEvent,
}

impl WaiverEventMessage {
    pub fn new(event: WaiverEvent) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_cleared_event_parses_without_reference() {
        let raw = r#"{"account_id":42,"amount":150000,"paid_at":"2026-09-01T08:30:00Z"}"#;
        let event: PaymentClearedEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.account_id, 42);
        assert_eq!(event.amount, 150_000);
        assert!(event.payment_ref.is_none());
    }

    #[test]
    fn waiver_message_flattens_event_tag() {
        let message = WaiverEventMessage::new(WaiverEvent::PtpInstallmentPaid {
            account_id: 9,
            request_id: Uuid::nil(),
            sequence: 2,
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["event"], "ptp_installment_paid");
        assert_eq!(value["sequence"], 2);
        assert_eq!(value["account_id"], 9);
    }
}
