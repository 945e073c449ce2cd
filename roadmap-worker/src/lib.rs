pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingress;
pub mod service;
pub mod signals;
pub mod stats;
pub mod test_utils;
pub mod worker;
