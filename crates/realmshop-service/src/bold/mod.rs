//! Bold gateway adapter.
//!
//! Bold is signature-based: the checkout button is opened with an integrity hash
//! we compute locally, and the final status arrives by webhook.

pub mod client;

pub use client::{
    generate_order_id, normalize_status, BoldClient, BoldError, BoldWebhook, PaymentVoucher,
};
