//! PayPal gateway adapter.
//!
//! PayPal handles:
//! - Client-credentials OAuth
//! - Order creation and capture
//! - Webhook delivery and signature verification

pub mod client;
pub mod types;

pub use client::{PayPalClient, PayPalError};
pub use types::*;
