pub mod app_config;
pub mod database;
pub mod events;
pub mod mailer;
pub mod memory;
pub mod pg_store;
pub mod redis_repo;
pub mod stripe;

pub use app_config::Config;
pub use database::DbClient;
pub use events::EventProducer;
pub use mailer::{HttpMailer, LogMailer};
pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use redis_repo::RedisClient;
pub use stripe::StripeClient;
