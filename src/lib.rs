//! Rideshare — conversational ride-sharing bot core.

pub mod channels;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod matching;
pub mod session;
pub mod store;
