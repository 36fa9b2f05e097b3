//! Realmshop HTTP API Service.
//!
//! This crate provides the HTTP API for the realmshop commerce ledger:
//!
//! - Catalog browsing and administration
//! - Credit and vote point balances
//! - Purchases with in-game delivery over the realm's SOAP command channel
//! - PayPal and Bold donations, reconciled exactly once
//! - Vote site rewards with per-account cooldowns
//!
//! # Authentication
//!
//! End-user and admin requests carry a session JWT. Gateway webhooks are
//! authenticated by the gateway's own signature scheme.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router even when they don't await

pub mod auth;
pub mod bold;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod paypal;
pub mod reconcile;
pub mod rewards;
pub mod routes;
pub mod state;

pub use bold::{BoldClient, BoldError};
pub use config::ServiceConfig;
pub use delivery::{DeliveryDispatcher, DeliveryError};
pub use error::ApiError;
pub use paypal::{PayPalClient, PayPalError};
pub use routes::create_router;
pub use state::AppState;
