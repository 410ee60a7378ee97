pub mod artifact;
pub mod config;
pub mod diff;
pub mod envelope;
pub mod extraction;
pub mod metrics;
pub mod storage;
