pub mod config;
pub mod config_validator;
pub mod error;
pub mod evaluator;
pub mod handlers;
pub mod key_generator;
pub mod limiter;
pub mod middleware;
pub mod procedure;
pub mod response;
pub mod server;
pub mod store;
pub mod strategy;
pub mod validation;

pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use evaluator::EvaluationOutcome;
pub use limiter::{Limiter, Usage};
pub use server::create_app;
pub use store::{CounterStore, MemoryStore, RedisStore};
pub use strategy::{Strategy, StrategySet};
