//! Per-instrument market statistics: ATR, relative volume and ATR-normalized relative
//! strength against a benchmark.

pub mod atr;
pub mod engine;
pub mod rsrw;
pub mod rvol;
pub mod series;

pub use engine::{
    AnalyticsConfig, AnalyticsEngine, BucketStatistics, Dataset, StatisticsReport,
    StatisticsSnapshot,
};
