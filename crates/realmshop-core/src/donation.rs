//! Donation payments and their reconciliation state machine.
//!
//! A donation is created when a gateway order is opened and then advanced by any
//! of three convergent events: a manual capture, a status query, or a webhook.
//! [`plan_transition`] decides, from the stored row alone, what an incoming status
//! does. The grant is always computed from the stored amount and the credit rate
//! snapshotted at creation; inbound events never carry a value that is trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ShopError};
use crate::ids::{PaymentId, Username};

/// Maximum accepted donation, in minor units.
pub const MAX_AMOUNT_CENTS: i64 = 10_000_000_000;

/// Maximum external order id length.
pub const MAX_EXTERNAL_ID_LEN: usize = 128;

/// A payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    /// OAuth-style provider with create/capture orders.
    #[serde(rename = "paypal")]
    PayPal,
    /// Signature-based provider with integrity hashes.
    Bold,
}

impl Gateway {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PayPal => "paypal",
            Self::Bold => "bold",
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paypal" => Ok(Self::PayPal),
            "bold" => Ok(Self::Bold),
            other => Err(ShopError::InvalidInput(format!("unknown gateway: {other}"))),
        }
    }
}

/// Normalized payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Order opened at the gateway.
    Created,
    /// Buyer approved the order; funds not yet captured.
    Approved,
    /// Funds captured; credits granted.
    Completed,
    /// Rejected by the gateway.
    Failed,
    /// Gateway has not decided yet.
    Pending,
    /// Abandoned by the buyer.
    Cancelled,
}

impl PaymentStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never move again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ShopError;

    /// Parse a stored or provider status, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "saved" => Ok(Self::Created),
            "approved" | "payer_action_required" => Ok(Self::Approved),
            "completed" => Ok(Self::Completed),
            "failed" | "rejected" | "declined" | "voided" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(ShopError::InvalidStatus(other.to_string())),
        }
    }
}

/// A stored donation payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationPayment {
    /// Payment id.
    pub id: PaymentId,
    /// Donor account.
    pub username: Username,
    /// Provider.
    pub gateway: Gateway,
    /// Provider order id, unique per gateway.
    pub external_id: String,
    /// Current status.
    pub status: PaymentStatus,
    /// Amount in minor units, as stored at creation.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Credits per major currency unit, snapshotted at creation.
    pub credits_rate: i64,
    /// Credits granted; zero until completion, then fixed.
    pub credits_granted: i64,
    /// When the order was opened.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// When credits were granted.
    pub granted_at: Option<DateTime<Utc>>,
}

impl DonationPayment {
    /// The amount as a decimal string, e.g. `"10.00"`.
    #[must_use]
    pub fn amount(&self) -> String {
        format_amount(self.amount_cents)
    }

    /// Credits this payment is worth on completion.
    #[must_use]
    pub fn credits_due(&self) -> i64 {
        credits_for(self.amount_cents, self.credits_rate)
    }
}

/// Input for recording a freshly opened gateway order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDonation {
    /// Donor account.
    pub username: Username,
    /// Provider.
    pub gateway: Gateway,
    /// Provider order id.
    pub external_id: String,
    /// Initial status reported by the provider.
    pub status: PaymentStatus,
    /// Amount in minor units.
    pub amount_cents: i64,
    /// ISO currency code (uppercase).
    pub currency: String,
    /// Credit rate snapshot.
    pub credits_rate: i64,
}

impl NewDonation {
    /// Check the record before it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidAmount`] or [`ShopError::InvalidInput`].
    pub fn validate(&self) -> Result<()> {
        if self.amount_cents <= 0 || self.amount_cents > MAX_AMOUNT_CENTS {
            return Err(ShopError::InvalidAmount(format_amount(self.amount_cents)));
        }
        if self.credits_rate < 1 {
            return Err(ShopError::InvalidInput("credit rate must be positive".into()));
        }
        let id = self.external_id.trim();
        if id.is_empty() || id.len() > MAX_EXTERNAL_ID_LEN {
            return Err(ShopError::InvalidInput("invalid external order id".into()));
        }
        Ok(())
    }
}

/// What an incoming status does to a stored payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changes; the stored record is returned as is.
    Unchanged,
    /// Persist a new status and grant `grant` credits (zero unless completing).
    Advance {
        /// The new status.
        status: PaymentStatus,
        /// Credits to add to the donor's balance.
        grant: i64,
    },
}

/// Decide the effect of `incoming` on `current`.
///
/// Completed payments are frozen, which makes duplicate webhooks, replays and
/// webhook/capture races no-ops. Failed and cancelled payments are frozen too.
#[must_use]
pub fn plan_transition(current: &DonationPayment, incoming: PaymentStatus) -> Transition {
    if current.status.is_terminal() || current.credits_granted > 0 {
        return Transition::Unchanged;
    }
    if current.status == incoming {
        return Transition::Unchanged;
    }
    let grant = if incoming == PaymentStatus::Completed {
        current.credits_due()
    } else {
        0
    };
    Transition::Advance {
        status: incoming,
        grant,
    }
}

/// The result of applying a status to a stored payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciled {
    /// The payment after the transition.
    pub payment: DonationPayment,
    /// Credits granted by this call (zero on a no-op).
    pub granted_now: i64,
    /// Whether this call changed the stored row.
    pub changed: bool,
}

/// Filter for donation listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationFilter {
    /// Restrict to one donor.
    pub username: Option<Username>,
    /// Restrict to one status.
    pub status: Option<PaymentStatus>,
    /// Restrict to one gateway.
    pub gateway: Option<Gateway>,
}

impl DonationFilter {
    /// Whether a payment passes this filter.
    #[must_use]
    pub fn matches(&self, payment: &DonationPayment) -> bool {
        self.username.as_ref().map_or(true, |u| &payment.username == u)
            && self.status.map_or(true, |s| payment.status == s)
            && self.gateway.map_or(true, |g| payment.gateway == g)
    }
}

/// `floor(amount * rate)` with the amount given in minor units.
#[must_use]
pub fn credits_for(amount_cents: i64, rate: i64) -> i64 {
    let credits = i128::from(amount_cents.max(0)) * i128::from(rate.max(0)) / 100;
    i64::try_from(credits).unwrap_or(i64::MAX)
}

/// Parse a decimal amount (at most two fraction digits) into minor units.
///
/// # Errors
///
/// Returns [`ShopError::InvalidAmount`] for malformed, zero or negative amounts.
pub fn parse_amount(text: &str) -> Result<i64> {
    let invalid = || ShopError::InvalidAmount(text.to_string());
    let trimmed = text.trim();
    let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<2}").parse().map_err(|_| invalid())?
    };
    let cents = whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(invalid)?;
    if cents <= 0 || cents > MAX_AMOUNT_CENTS {
        return Err(invalid());
    }
    Ok(cents)
}

/// Format minor units as a two-decimal string.
#[must_use]
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Uppercase a currency code and check it against an allow-list.
///
/// # Errors
///
/// Returns [`ShopError::CurrencyNotAllowed`] if the code is not listed.
pub fn normalize_currency(currency: &str, allowed: &[String]) -> Result<String> {
    let code = currency.trim().to_ascii_uppercase();
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&code)) {
        Ok(code)
    } else {
        Err(ShopError::CurrencyNotAllowed(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: PaymentStatus, amount_cents: i64, granted: i64) -> DonationPayment {
        DonationPayment {
            id: PaymentId::new(1),
            username: "donor".parse().unwrap(),
            gateway: Gateway::PayPal,
            external_id: "ORDER-1".into(),
            status,
            amount_cents,
            currency: "USD".into(),
            credits_rate: 100,
            credits_granted: granted,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            granted_at: None,
        }
    }

    #[test]
    fn ten_dollars_at_rate_one_hundred_is_one_thousand_credits() {
        assert_eq!(credits_for(parse_amount("10.00").unwrap(), 100), 1000);
        assert_eq!(credits_for(1, 150), 1);
        assert_eq!(credits_for(199, 1), 1);
    }

    #[test]
    fn amounts_parse_exactly() {
        assert_eq!(parse_amount("10").unwrap(), 1000);
        assert_eq!(parse_amount("10.5").unwrap(), 1050);
        assert_eq!(parse_amount(" 0.01 ").unwrap(), 1);
        for bad in ["", "0", "0.00", "-5", "1.234", "abc", "1e3", ".5"] {
            assert!(parse_amount(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(format_amount(1050), "10.50");
    }

    #[test]
    fn currency_must_be_allowed() {
        let allowed = vec!["USD".to_string(), "EUR".to_string()];
        assert_eq!(normalize_currency("eur", &allowed).unwrap(), "EUR");
        assert_eq!(
            normalize_currency("cop", &allowed),
            Err(ShopError::CurrencyNotAllowed("COP".into()))
        );
    }

    #[test]
    fn completion_grants_from_stored_amount() {
        let p = payment(PaymentStatus::Created, 1000, 0);
        assert_eq!(
            plan_transition(&p, PaymentStatus::Completed),
            Transition::Advance {
                status: PaymentStatus::Completed,
                grant: 1000
            }
        );
    }

    #[test]
    fn completed_payment_is_frozen() {
        let p = payment(PaymentStatus::Completed, 1000, 1000);
        assert_eq!(plan_transition(&p, PaymentStatus::Completed), Transition::Unchanged);
        assert_eq!(plan_transition(&p, PaymentStatus::Failed), Transition::Unchanged);
    }

    #[test]
    fn pending_may_advance_later() {
        let p = payment(PaymentStatus::Created, 500, 0);
        let Transition::Advance { status, grant } = plan_transition(&p, PaymentStatus::Pending) else {
            panic!("expected advance");
        };
        assert_eq!((status, grant), (PaymentStatus::Pending, 0));

        let p = payment(PaymentStatus::Pending, 500, 0);
        assert!(matches!(
            plan_transition(&p, PaymentStatus::Completed),
            Transition::Advance { grant: 500, .. }
        ));
    }

    #[test]
    fn rejected_and_cancelled_are_terminal() {
        for terminal in [PaymentStatus::Failed, PaymentStatus::Cancelled] {
            let p = payment(terminal, 500, 0);
            assert_eq!(plan_transition(&p, PaymentStatus::Completed), Transition::Unchanged);
        }
    }

    #[test]
    fn provider_statuses_normalize() {
        assert_eq!("COMPLETED".parse::<PaymentStatus>().unwrap(), PaymentStatus::Completed);
        assert_eq!("rejected".parse::<PaymentStatus>().unwrap(), PaymentStatus::Failed);
        assert_eq!("Canceled".parse::<PaymentStatus>().unwrap(), PaymentStatus::Cancelled);
        assert!("refunded".parse::<PaymentStatus>().is_err());
        assert_eq!("PayPal".parse::<Gateway>().unwrap(), Gateway::PayPal);
    }

    #[test]
    fn new_donation_validation() {
        let ok = NewDonation {
            username: "donor".parse().unwrap(),
            gateway: Gateway::Bold,
            external_id: "donor-1".into(),
            status: PaymentStatus::Created,
            amount_cents: 5_000_000,
            currency: "COP".into(),
            credits_rate: 100,
        };
        assert!(ok.validate().is_ok());
        assert!(NewDonation { amount_cents: 0, ..ok.clone() }.validate().is_err());
        assert!(NewDonation { external_id: " ".into(), ..ok }.validate().is_err());
    }
}
