pub mod accounts;
pub mod checkout;
pub mod conversation;
pub mod finance;
pub mod ingest;
pub mod manager;
pub mod mock;
pub mod notifications;
pub mod outbox;
pub mod refund;
pub mod review_workflow;
pub mod reviews;
pub mod signature;

pub use accounts::{PaymentIdentity, PaymentIdentityManager};
pub use checkout::{CheckoutCoordinator, CheckoutRequest, CheckoutStarted};
pub use conversation::ConversationBootstrapper;
pub use finance::{FeePolicy, PriceSplit};
pub use ingest::{WebhookAck, WebhookProcessor, WebhookSecrets};
pub use manager::{BookingManager, BookingStatusView, TransitionOutcome, Viewer};
pub use mock::MockPaymentProcessor;
pub use outbox::{DrainReport, SideEffectExecutor};
pub use refund::{RefundCoordinator, RefundOutcome};
pub use review_workflow::ReviewWorkflow;
pub use reviews::{Rater, ReviewGate};
