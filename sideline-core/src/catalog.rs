use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::BookingType;

/// A registered account (athlete, coach or both)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
}

/// A service provider. `payment_account_id` is written at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coach {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub payment_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A purchasable offering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub coach_id: Uuid,
    pub booking_type: BookingType,
    pub title: String,
    /// Minor currency units
    pub price_cents: i64,
    pub currency: String,
    pub duration_minutes: Option<i32>,
    /// Film reviews only
    pub turnaround_hours: Option<i32>,
    pub is_active: bool,
}
