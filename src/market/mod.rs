//! Market engine: pricing, stability, trade validation and execution.

pub mod engine;
pub mod pricing;
pub mod stability;
pub mod trade;
pub mod validate;

pub use engine::{MarketEngine, MarketSnapshot};
pub use pricing::PricingState;
pub use stability::{GridStatus, Stability};
pub use trade::{Trade, TradeStatus};
pub use validate::TradeRequest;
