use std::sync::Arc;

use serde::Serialize;
use sideline_core::catalog::Coach;
use sideline_core::effects::SideEffect;
use sideline_core::payment::{AccountStatus, PaymentProcessor};
use sideline_core::repository::{AccountClaim, MarketplaceStore};
use sideline_core::{CoreError, CoreResult};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Where the hosted onboarding flow sends the coach back to
#[derive(Debug, Clone)]
pub struct OnboardingUrls {
    pub refresh_url: String,
    pub return_url: String,
}

impl OnboardingUrls {
    pub fn from_base(app_base_url: &str) -> Self {
        let base = app_base_url.trim_end_matches('/');
        Self {
            refresh_url: format!("{}/coach/payments/refresh", base),
            return_url: format!("{}/coach/payments/complete", base),
        }
    }
}

/// The coach's merchant account and whether they still need to onboard
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIdentity {
    pub account_id: String,
    pub charges_enabled: bool,
    pub details_submitted: bool,
}

impl PaymentIdentity {
    fn new(account_id: String, status: AccountStatus) -> Self {
        Self {
            account_id,
            charges_enabled: status.charges_enabled,
            details_submitted: status.details_submitted,
        }
    }

    pub fn onboarding_required(&self) -> bool {
        !self.charges_enabled
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OnboardingLink {
    #[serde(flatten)]
    pub identity: PaymentIdentity,
    /// Present only while onboarding is incomplete
    pub onboarding_url: Option<String>,
}

/// Owns the coach -> merchant account mapping
#[derive(Clone)]
pub struct PaymentIdentityManager {
    store: Arc<dyn MarketplaceStore>,
    processor: Arc<dyn PaymentProcessor>,
    urls: OnboardingUrls,
}

impl PaymentIdentityManager {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        processor: Arc<dyn PaymentProcessor>,
        urls: OnboardingUrls,
    ) -> Self {
        Self { store, processor, urls }
    }

    async fn load_coach(&self, coach_id: Uuid) -> CoreResult<Coach> {
        self.store
            .get_coach(coach_id)
            .await?
            .ok_or_else(|| CoreError::not_found("coach"))
    }

    /// Returns the coach's account, creating one on first use. Concurrent callers converge on
    /// whichever account was stored first; the losing account is discarded through the outbox.
    pub async fn ensure_account(&self, coach_id: Uuid) -> CoreResult<PaymentIdentity> {
        let coach = self.load_coach(coach_id).await?;
        if let Some(account_id) = coach.payment_account_id {
            return self.get_status(&account_id).await;
        }

        let created = self.processor.create_account(coach.id, &coach.email).await?;
        match self.store.set_payment_account_if_unset(coach.id, &created.id).await? {
            AccountClaim::Claimed => {
                info!(coach_id = %coach.id, account_id = %created.id, "Payment account created");
                let status = AccountStatus {
                    charges_enabled: created.charges_enabled,
                    details_submitted: created.details_submitted,
                };
                Ok(PaymentIdentity::new(created.id, status))
            }
            AccountClaim::AlreadySet(existing) => {
                warn!(
                    coach_id = %coach.id,
                    kept = %existing,
                    discarded = %created.id,
                    "Lost payment account race; discarding duplicate"
                );
                let discard = [SideEffect::DiscardMerchantAccount { account_id: created.id.clone() }];
                if let Err(e) = self.store.enqueue(&discard).await {
                    error!(account_id = %created.id, error = %e, "Failed to schedule account discard");
                }
                self.get_status(&existing).await
            }
        }
    }

    pub async fn create_onboarding_link(&self, account_id: &str) -> CoreResult<String> {
        Ok(self
            .processor
            .create_onboarding_link(account_id, &self.urls.refresh_url, &self.urls.return_url)
            .await?)
    }

    pub async fn get_status(&self, account_id: &str) -> CoreResult<PaymentIdentity> {
        let status = self.processor.account_status(account_id).await?;
        Ok(PaymentIdentity::new(account_id.to_string(), status))
    }

    /// Ensure the account exists and hand back an onboarding link if it cannot charge yet.
    pub async fn ensure_onboarding_link(&self, coach_id: Uuid) -> CoreResult<OnboardingLink> {
        let identity = self.ensure_account(coach_id).await?;
        let onboarding_url = if identity.onboarding_required() {
            Some(self.create_onboarding_link(&identity.account_id).await?)
        } else {
            None
        };
        Ok(OnboardingLink { identity, onboarding_url })
    }

    /// Status of the coach's stored account without creating one
    pub async fn status_for_coach(&self, coach_id: Uuid) -> CoreResult<Option<PaymentIdentity>> {
        let coach = self.load_coach(coach_id).await?;
        match coach.payment_account_id {
            Some(account_id) => Ok(Some(self.get_status(&account_id).await?)),
            None => Ok(None),
        }
    }

    /// Destination account for a checkout, or `PaymentSetupIncomplete`.
    pub async fn require_charge_capable(&self, coach: &Coach) -> CoreResult<String> {
        let account_id = coach
            .payment_account_id
            .clone()
            .ok_or(CoreError::PaymentSetupIncomplete)?;
        let status = self.processor.account_status(&account_id).await?;
        if !status.charges_enabled {
            return Err(CoreError::PaymentSetupIncomplete);
        }
        Ok(account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fixtures, MockPaymentProcessor};
    use sideline_core::repository::CoachRepository;
    use sideline_store::MemoryStore;

    fn manager(store: Arc<MemoryStore>, processor: Arc<MockPaymentProcessor>) -> PaymentIdentityManager {
        PaymentIdentityManager::new(store, processor, OnboardingUrls::from_base("https://app.example.com/"))
    }

    #[tokio::test]
    async fn test_first_call_creates_and_stores_account() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let fx = fixtures::seed(&store).await;
        let identities = manager(store.clone(), processor.clone());

        let first = identities.ensure_account(fx.coach.id).await.unwrap();
        let second = identities.ensure_account(fx.coach.id).await.unwrap();
        assert_eq!(first.account_id, second.account_id);
        assert!(first.onboarding_required());
        assert_eq!(processor.created_accounts().await.len(), 1);

        let coach = store.get_coach(fx.coach.id).await.unwrap().unwrap();
        assert_eq!(coach.payment_account_id, Some(first.account_id));
    }

    #[tokio::test]
    async fn test_concurrent_calls_converge_on_one_account() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let fx = fixtures::seed(&store).await;
        let identities = manager(store.clone(), processor.clone());

        let (a, b) = tokio::join!(
            identities.ensure_account(fx.coach.id),
            identities.ensure_account(fx.coach.id)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.account_id, b.account_id);

        let stored = store.get_coach(fx.coach.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_account_id.as_deref(), Some(a.account_id.as_str()));

        let created = processor.created_accounts().await;
        let discards: Vec<String> = store
            .outbox_tasks()
            .await
            .into_iter()
            .filter_map(|t| match t.effect {
                SideEffect::DiscardMerchantAccount { account_id } => Some(account_id),
                _ => None,
            })
            .collect();
        assert_eq!(discards.len(), created.len() - 1);
        assert!(!discards.contains(&a.account_id));
    }

    #[tokio::test]
    async fn test_onboarding_link_only_when_required() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let fx = fixtures::seed(&store).await;
        let identities = manager(store.clone(), processor.clone());

        let link = identities.ensure_onboarding_link(fx.coach.id).await.unwrap();
        let url = link.onboarding_url.unwrap();
        assert!(url.contains(&link.identity.account_id));
        assert!(url.contains("https://app.example.com/coach/payments/complete"));

        processor.register_account(&link.identity.account_id, true).await;
        let ready = identities.ensure_onboarding_link(fx.coach.id).await.unwrap();
        assert!(ready.onboarding_url.is_none());
    }

    #[tokio::test]
    async fn test_checkout_requires_charge_capable_account() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let fx = fixtures::seed(&store).await;
        let identities = manager(store.clone(), processor.clone());

        let err = identities.require_charge_capable(&fx.coach).await.unwrap_err();
        assert!(matches!(err, CoreError::PaymentSetupIncomplete));

        let identity = identities.ensure_account(fx.coach.id).await.unwrap();
        let coach = store.get_coach(fx.coach.id).await.unwrap().unwrap();
        let err = identities.require_charge_capable(&coach).await.unwrap_err();
        assert!(matches!(err, CoreError::PaymentSetupIncomplete));

        processor.register_account(&identity.account_id, true).await;
        assert_eq!(identities.require_charge_capable(&coach).await.unwrap(), identity.account_id);
    }
}
