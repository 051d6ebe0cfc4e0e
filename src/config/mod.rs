//! Configuration module for nup

mod query_config;

pub use query_config::QueryConfig;
