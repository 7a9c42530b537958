use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sideline_core::booking::{Booking, BookingType, BuyerContact};
use sideline_core::payment::{CheckoutSessionRequest, PaymentProcessor};
use sideline_core::repository::MarketplaceStore;
use sideline_core::{CoreError, CoreResult};
use sideline_shared::models::events::LifecycleEventKind;
use tracing::info;
use uuid::Uuid;

use crate::accounts::PaymentIdentityManager;
use crate::finance::FeePolicy;
use crate::manager::lifecycle_event;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub listing_id: Uuid,
    pub coach_id: Uuid,
    pub buyer: BuyerContact,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub booking_id: Uuid,
    pub session_url: String,
}

fn normalize_email(email: &str) -> CoreResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.contains(char::is_whitespace) {
        return Err(CoreError::ValidationError("a valid buyer email is required".to_string()));
    }
    Ok(email)
}

/// Turns a purchase intent into a pending booking plus a hosted checkout session
#[derive(Clone)]
pub struct CheckoutCoordinator {
    store: Arc<dyn MarketplaceStore>,
    processor: Arc<dyn PaymentProcessor>,
    identities: PaymentIdentityManager,
    fees: FeePolicy,
    app_base_url: String,
}

impl CheckoutCoordinator {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        processor: Arc<dyn PaymentProcessor>,
        identities: PaymentIdentityManager,
        fees: FeePolicy,
        app_base_url: &str,
    ) -> Self {
        Self {
            store,
            processor,
            identities,
            fees,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn fee_policy(&self) -> FeePolicy {
        self.fees
    }

    pub async fn start_checkout(&self, request: CheckoutRequest) -> CoreResult<CheckoutStarted> {
        let email = normalize_email(&request.buyer.email)?;

        let listing = self
            .store
            .get_listing(request.listing_id)
            .await?
            .filter(|l| l.coach_id == request.coach_id)
            .ok_or_else(|| CoreError::not_found("listing"))?;
        if !listing.is_active {
            return Err(CoreError::ValidationError("listing is not available".to_string()));
        }
        if listing.price_cents <= 0 {
            return Err(CoreError::ValidationError("listing has no price".to_string()));
        }
        if listing.booking_type == BookingType::FilmReview
            && !listing.turnaround_hours.map(|h| h > 0).unwrap_or(false)
        {
            return Err(CoreError::ValidationError(
                "film review listing has no turnaround window".to_string(),
            ));
        }

        let coach = self
            .store
            .get_coach(request.coach_id)
            .await?
            .ok_or_else(|| CoreError::not_found("coach"))?;
        let destination_account = self.identities.require_charge_capable(&coach).await?;

        let split = self.fees.split(listing.price_cents);
        let booking_id = Uuid::new_v4();
        let session = self
            .processor
            .create_checkout_session(&CheckoutSessionRequest {
                booking_id,
                destination_account,
                amount: split.amount,
                application_fee: split.platform_fee,
                currency: listing.currency.clone(),
                product_name: listing.title.clone(),
                customer_email: Some(email.clone()),
                success_url: format!(
                    "{}/bookings/{}/success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.app_base_url, booking_id
                ),
                cancel_url: format!("{}/bookings/{}/cancelled", self.app_base_url, booking_id),
            })
            .await?;

        let now = Utc::now();
        let buyer = BuyerContact { profile_id: request.buyer.profile_id, email };
        let booking = Booking::new_pending(booking_id, &listing, buyer, split.platform_fee, session.id.clone(), now)?;
        let created = lifecycle_event(&booking, LifecycleEventKind::BookingCreated, now);
        self.store.insert_booking(&booking, &[created]).await?;

        info!(
            booking_id = %booking.id,
            listing_id = %listing.id,
            amount = split.amount,
            platform_fee = split.platform_fee,
            "Checkout started"
        );
        Ok(CheckoutStarted { booking_id, session_url: session.url })
    }
}
