//! HTTP plumbing for the external match-data service.
//!
//! [`HttpClient`] is the seam: the plain client executes requests, wrappers
//! such as [`auth::ApiKey`] decorate them before delegating.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;
