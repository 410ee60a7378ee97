mod app;
mod compare;
mod error;
mod extract;

pub use app::{app, ExtractorState};
pub use error::ApiError;
