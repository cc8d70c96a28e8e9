pub mod backfill;
pub mod config;
pub mod daily;
pub mod error;
pub mod pipeline;

#[cfg(test)]
mod testing;
