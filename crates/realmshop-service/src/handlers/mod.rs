//! HTTP request handlers.

pub mod balances;
pub mod catalog;
pub mod donations;
pub mod health;
pub mod purchases;
pub mod votes;
pub mod webhooks;

use serde::Deserialize;

/// Raw page parameters; handlers clamp them with [`realmshop_core::PageRequest::clamped`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    /// One-based page number.
    #[serde(default)]
    pub page: Option<u32>,
    /// Rows per page.
    #[serde(default)]
    pub page_size: Option<u32>,
}
