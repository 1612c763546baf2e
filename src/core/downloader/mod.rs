mod client;
mod scheduler;

pub use client::{FetchResponse, HttpTransport, Transport};
pub use scheduler::{FetchPolicy, FetchProgress, FetchReport, FetchScheduler, DEFAULT_CONCURRENCY};
