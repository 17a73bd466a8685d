pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;
pub mod redis_bus;

pub use config::{EngineSettings, ServiceConfig};
pub use contracts::{
    PAYMENTS_CLEARED_CHANNEL, PaymentClearedEvent, WAIVER_EVENTS_CHANNEL, WaiverEventMessage,
};
pub use db::{connect_database, ensure_schema};
pub use pg_store::PgServicingStore;
pub use redis_bus::{RedisBus, RedisNotifier};
