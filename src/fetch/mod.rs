//! Fetch layer: the one HTTP client every component talks through.

mod client;
mod error;
pub mod redirect;
mod retry;

pub use client::{FetchClient, FetchRequest, FetchResponse, Method};
pub use error::FetchError;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RETRYABLE_STATUSES, RetryDecision, RetryPolicy,
    classify_transport_error, is_error_status,
};
