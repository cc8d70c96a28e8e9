pub mod client;
pub mod error;
pub mod method;
pub mod notify;
pub mod provider;
pub mod twelvedata;
