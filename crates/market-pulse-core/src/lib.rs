pub mod analytics;
pub mod bar;
pub mod clock;
pub mod error;
pub mod indicator;
pub mod instrument;
pub mod ledger;
pub mod memory;
pub mod schema;
pub mod store;
pub mod timeframe;
