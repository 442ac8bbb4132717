//! Async session context for the social graph service.
//!
//! [`SocialClient`] owns the session lifecycle, the event queue with its
//! flush timer and the feed cache. Requests go through a [`Transport`];
//! [`HttpTransport`] talks to the REST API.

mod client;
pub mod config;
mod events;
mod facade;
pub mod http;
pub mod logging;
pub mod scheduler;
#[cfg(test)]
mod test_support;
pub mod transport;

pub use client::SocialClient;
pub use config::{ClientConfig, ConfigError};
pub use http::HttpTransport;
pub use scheduler::FlushScheduler;
pub use transport::{AuthenticatedUser, Credentials, Transport};
