//! Session client for the platform's LIVE endpoints.

mod client;
mod types;

pub use client::{StreamClient, StreamError, END_PATH_PREFIX, INFO_PATH, MAX_QUERY_CHARS, START_PATH};
pub use types::{AccountInfo, Category, StartedStream};
