//! cpthook — relays webhooks from GitLab, Prometheus, Icinga2, Travis CI and
//! plain HTTP posts to IRC.
//!
//! Single Rust binary. HTTP handlers decode and route each event, then hand
//! rendered lines to a bounded queue drained by one self-healing IRC
//! connection.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;

pub mod dispatch;
pub mod input;
pub mod irc;
pub mod routing;

pub mod http;
