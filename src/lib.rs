//! MyWoW local data layer
//!
//! Persistence and domain services for a crypto-market journaling tool:
//! - SQLite row store with a typed value/column model
//! - Schema registry that reconciles the live schema and replays the
//!   plain-text table mirrors at startup
//! - Typed record models (predictions, candles, market trades)
//! - Prediction lifecycle service with a cache-first candle lookup
//!
//! # Example
//!
//! ```no_run
//! use mywow::{Database, MarketDataSource, PredictionService, SetupService};
//!
//! fn run(source: Box<dyn MarketDataSource>) -> mywow::Result<()> {
//!     let db = Database::open("data/mywow.db")?;
//!     let registry = SetupService::new(db, "data");
//!     registry.setup()?;
//!
//!     let mut service = PredictionService::new(registry, source);
//!     let closed = service.update_predictions()?;
//!     println!("closed {closed} predictions");
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod market;
pub mod models;
pub mod schema;
pub mod service;

pub use db::{Database, InsertOutcome, Record, SqlValue, TableDef, Where};
pub use error::{MyWowError, Result};
pub use market::{Granularity, MarketDataSource};
pub use models::{Candle, MarketTrade, Prediction, PredictionResult, TradeSide};
pub use schema::SetupService;
pub use service::PredictionService;
