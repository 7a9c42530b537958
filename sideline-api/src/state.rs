use std::sync::Arc;

use sideline_booking::accounts::OnboardingUrls;
use sideline_booking::{
    BookingManager, CheckoutCoordinator, ConversationBootstrapper, FeePolicy,
    PaymentIdentityManager, ReviewGate, ReviewWorkflow, WebhookProcessor, WebhookSecrets,
};
use sideline_core::payment::PaymentProcessor;
use sideline_core::repository::MarketplaceStore;
use sideline_store::RedisClient;

use crate::middleware::ResiliencyState;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

/// Knobs the services are built with
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub fees: FeePolicy,
    pub app_base_url: String,
    pub webhooks: WebhookSecrets,
}

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutCoordinator>,
    pub bookings: Arc<BookingManager>,
    pub review_workflow: Arc<ReviewWorkflow>,
    pub review_gate: Arc<ReviewGate>,
    pub identities: Arc<PaymentIdentityManager>,
    pub conversations: Arc<ConversationBootstrapper>,
    pub webhooks: Arc<WebhookProcessor>,
    pub resiliency: Arc<ResiliencyState>,
    /// Rate limiting is skipped without Redis
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        processor: Arc<dyn PaymentProcessor>,
        settings: ServiceSettings,
        auth: AuthConfig,
        redis: Option<Arc<RedisClient>>,
    ) -> Self {
        let identities = PaymentIdentityManager::new(
            store.clone(),
            processor.clone(),
            OnboardingUrls::from_base(&settings.app_base_url),
        );
        let bookings = BookingManager::new(store.clone());

        Self {
            checkout: Arc::new(CheckoutCoordinator::new(
                store.clone(),
                processor,
                identities.clone(),
                settings.fees,
                &settings.app_base_url,
            )),
            webhooks: Arc::new(WebhookProcessor::new(store.clone(), bookings.clone(), settings.webhooks)),
            bookings: Arc::new(bookings),
            review_workflow: Arc::new(ReviewWorkflow::new(store.clone())),
            review_gate: Arc::new(ReviewGate::new(store.clone())),
            identities: Arc::new(identities),
            conversations: Arc::new(ConversationBootstrapper::new(store.clone())),
            resiliency: Arc::new(ResiliencyState::new()),
            redis,
            auth,
        }
    }
}
