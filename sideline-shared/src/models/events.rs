//! Lifecycle events published for read-only consumers (admin dashboards, analytics).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOPIC_BOOKINGS: &str = "sideline.bookings";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleEventKind {
    #[serde(rename = "booking.created")]
    BookingCreated,
    #[serde(rename = "booking.paid")]
    BookingPaid,
    #[serde(rename = "booking.completed")]
    BookingCompleted,
    #[serde(rename = "booking.cancelled")]
    BookingCancelled,
    #[serde(rename = "booking.refunded")]
    BookingRefunded,
    #[serde(rename = "review.accepted")]
    ReviewAccepted,
    #[serde(rename = "review.declined")]
    ReviewDeclined,
    #[serde(rename = "review.delivered")]
    ReviewDelivered,
    #[serde(rename = "review.expired")]
    ReviewExpired,
}

impl LifecycleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::BookingCreated => "booking.created",
            LifecycleEventKind::BookingPaid => "booking.paid",
            LifecycleEventKind::BookingCompleted => "booking.completed",
            LifecycleEventKind::BookingCancelled => "booking.cancelled",
            LifecycleEventKind::BookingRefunded => "booking.refunded",
            LifecycleEventKind::ReviewAccepted => "review.accepted",
            LifecycleEventKind::ReviewDeclined => "review.declined",
            LifecycleEventKind::ReviewDelivered => "review.delivered",
            LifecycleEventKind::ReviewExpired => "review.expired",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingLifecycleEvent {
    pub kind: LifecycleEventKind,
    pub booking_id: Uuid,
    pub coach_id: Uuid,
    pub listing_id: Uuid,
    pub payment_status: String,
    pub review_status: Option<String>,
    pub amount_paid: i64,
    pub currency: String,
    pub deadline_at: Option<DateTime<Utc>>,
    pub timestamp: i64,
}
