pub mod config;
pub mod error;
pub mod kafka;
pub mod pipeline;
pub mod publisher;
pub mod source;
pub mod worker;
