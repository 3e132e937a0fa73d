//! tiklive: TikTok LIVE credential acquisition and RTMP session control.
//!
//! - [`auth`] obtains a bearer token from local storage or a browser login
//! - [`streaming`] uses it to query the account and start or end a broadcast
//! - [`accounts`] keeps saved accounts with their tokens in the OS keyring

pub mod accounts;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod streaming;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod tests_end_to_end;
