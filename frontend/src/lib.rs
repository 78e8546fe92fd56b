//! Client core for session-credit attendance and daily ledger reconciliation.
//!
//! - [`domain`] holds the pure rules (balance evaluation, ledger rollup,
//!   attendance history, payment validation).
//! - [`services`] talks to the backend and loads configuration.
//! - [`hooks`] are the stateful view controllers built on top of both.

pub mod domain;
pub mod error;
pub mod hooks;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ActionError, ApiError};
pub use services::api::{ApiClient, ClinicApi};
pub use services::config::ClientConfig;
