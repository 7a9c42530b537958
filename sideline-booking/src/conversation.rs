use std::sync::Arc;

use chrono::Utc;
use sideline_core::repository::MarketplaceStore;
use sideline_core::{CoreError, CoreResult};
use tracing::info;
use uuid::Uuid;

use crate::manager::{listing_title, load_booking, Viewer};

const LINK_ATTEMPTS: usize = 3;

/// Opens the coach/athlete thread for a booking, exactly once
#[derive(Clone)]
pub struct ConversationBootstrapper {
    store: Arc<dyn MarketplaceStore>,
}

impl ConversationBootstrapper {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    /// Idempotent: returns the existing conversation when there is one. `requester` is
    /// checked against the booking when the call comes from a user rather than the outbox.
    pub async fn ensure_conversation(&self, booking_id: Uuid, requester: Option<&Viewer>) -> CoreResult<Uuid> {
        let store = self.store.as_ref();
        let booking = load_booking(store, booking_id).await?;
        if let Some(viewer) = requester {
            if !viewer.can_view(&booking) {
                return Err(CoreError::not_found("booking"));
            }
        }
        if let Some(existing) = booking.conversation_id {
            return Ok(existing);
        }

        let coach = store
            .get_coach(booking.coach_id)
            .await?
            .ok_or_else(|| CoreError::not_found("coach"))?;
        let buyer_profile_id = match booking.buyer_profile_id {
            Some(id) => id,
            None => store
                .find_profile_by_email(&booking.buyer_email)
                .await?
                .map(|p| p.id)
                .ok_or(CoreError::BuyerNotRegistered)?,
        };

        let title = listing_title(store, &booking).await;
        let system_message = format!(
            "{} and the athlete are now connected for {}. Use this thread to share film and questions.",
            coach.display_name, title
        );
        let conversation_id = store
            .create_booking_conversation(booking_id, &[coach.profile_id, buyer_profile_id], &system_message)
            .await?;

        let mut booking = booking;
        for _ in 0..LINK_ATTEMPTS {
            if let Some(linked) = booking.conversation_id {
                return Ok(linked);
            }
            booking.conversation_id = Some(conversation_id);
            booking.buyer_profile_id.get_or_insert(buyer_profile_id);
            booking.updated_at = Utc::now();
            if store.update_booking(&booking, &[]).await? {
                info!(%booking_id, %conversation_id, "Booking conversation created");
                return Ok(conversation_id);
            }
            booking = load_booking(store, booking_id).await?;
        }
        Err(CoreError::ConflictError(
            "booking kept changing while linking its conversation".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixtures;
    use sideline_core::repository::BookingRepository;
    use sideline_store::MemoryStore;

    #[tokio::test]
    async fn test_conversation_created_once_with_both_parties() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_c1", "pi_c1").await;
        let bootstrapper = ConversationBootstrapper::new(store.clone());

        let (a, b) = tokio::join!(
            bootstrapper.ensure_conversation(booking.id, None),
            bootstrapper.ensure_conversation(booking.id, None)
        );
        assert_eq!(a.unwrap(), b.unwrap());

        let conversation = store.conversation_for_booking(booking.id).await.unwrap();
        assert!(conversation.participants.contains(&fx.coach.profile_id));
        assert!(conversation.participants.contains(&fx.athlete.id));
        assert_eq!(conversation.messages.len(), 1);

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.conversation_id, Some(conversation.id));
        assert_eq!(stored.buyer_profile_id, Some(fx.athlete.id));
    }

    #[tokio::test]
    async fn test_unregistered_buyer_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let mut booking = fixtures::paid_booking(&store, &fx.film, "cs_c2", "pi_c2").await;
        booking.buyer_email = "guest@example.com".to_string();
        assert!(store.update_booking(&booking, &[]).await.unwrap());

        let bootstrapper = ConversationBootstrapper::new(store.clone());
        let err = bootstrapper.ensure_conversation(booking.id, None).await.unwrap_err();
        assert!(matches!(err, CoreError::BuyerNotRegistered));
        assert!(store.conversation_for_booking(booking.id).await.is_none());
    }

    #[tokio::test]
    async fn test_strangers_cannot_open_thread() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_c3", "pi_c3").await;
        let bootstrapper = ConversationBootstrapper::new(store.clone());

        let stranger = Viewer { profile_id: Uuid::new_v4(), coach_id: None, verified_email: None };
        let err = bootstrapper.ensure_conversation(booking.id, Some(&stranger)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFoundError(_)));
    }
}
