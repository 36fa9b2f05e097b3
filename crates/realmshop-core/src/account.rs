//! Account balance types for realmshop.
//!
//! An account holds two spendable currencies: credits (bought with real money)
//! and vote points (earned by voting). Balances only move through
//! [`AccountBalance::apply`], which refuses to drive either currency negative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShopError};
use crate::ids::Username;

/// A per-account ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account username.
    pub username: Username,

    /// Spendable credits.
    pub credits: i64,

    /// Spendable vote points.
    pub vote_points: i64,

    /// When the balance last changed.
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Create an empty balance for an account.
    #[must_use]
    pub fn new(username: Username) -> Self {
        Self {
            username,
            credits: 0,
            vote_points: 0,
            updated_at: Utc::now(),
        }
    }

    /// Check whether the balance covers a cost in both currencies.
    #[must_use]
    pub fn covers(&self, cost: &Cost) -> bool {
        self.credits >= cost.credits && self.vote_points >= cost.vote_points
    }

    /// Return the balance after applying a delta.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InsufficientFunds`] if either currency would go negative.
    pub fn apply(&self, delta: BalanceDelta) -> Result<Self> {
        let credits = self.credits.saturating_add(delta.credits);
        let vote_points = self.vote_points.saturating_add(delta.vote_points);

        if credits < 0 || vote_points < 0 {
            return Err(ShopError::InsufficientFunds {
                credits_balance: self.credits,
                credits_required: (-delta.credits).max(0),
                vote_points_balance: self.vote_points,
                vote_points_required: (-delta.vote_points).max(0),
            });
        }

        Ok(Self {
            username: self.username.clone(),
            credits,
            vote_points,
            updated_at: Utc::now(),
        })
    }
}

/// A signed change to both currencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// Change in credits.
    pub credits: i64,
    /// Change in vote points.
    pub vote_points: i64,
}

impl BalanceDelta {
    /// A credit-only grant.
    #[must_use]
    pub const fn credits(amount: i64) -> Self {
        Self {
            credits: amount,
            vote_points: 0,
        }
    }

    /// A vote-point-only grant.
    #[must_use]
    pub const fn vote_points(amount: i64) -> Self {
        Self {
            credits: 0,
            vote_points: amount,
        }
    }

    /// The debit corresponding to a cost.
    #[must_use]
    pub const fn debit(cost: &Cost) -> Self {
        Self {
            credits: -cost.credits,
            vote_points: -cost.vote_points,
        }
    }
}

/// A non-negative price or total in both currencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    /// Credits.
    pub credits: i64,
    /// Vote points.
    pub vote_points: i64,
}

impl Cost {
    /// The cost of `quantity` units at this unit price.
    #[must_use]
    pub const fn times(&self, quantity: i64) -> Self {
        Self {
            credits: self.credits.saturating_mul(quantity),
            vote_points: self.vote_points.saturating_mul(quantity),
        }
    }

    /// Sum of two costs.
    #[must_use]
    pub const fn plus(&self, other: &Self) -> Self {
        Self {
            credits: self.credits.saturating_add(other.credits),
            vote_points: self.vote_points.saturating_add(other.vote_points),
        }
    }

    /// Whether the cost is zero in both currencies.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.credits == 0 && self.vote_points == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(credits: i64, vote_points: i64) -> AccountBalance {
        let mut b = AccountBalance::new("thrall".parse().unwrap());
        b.credits = credits;
        b.vote_points = vote_points;
        b
    }

    #[test]
    fn new_balance_is_empty() {
        let b = AccountBalance::new("thrall".parse().unwrap());
        assert_eq!(b.credits, 0);
        assert_eq!(b.vote_points, 0);
    }

    #[test]
    fn debit_within_balance() {
        let b = balance(500, 10);
        let cost = Cost {
            credits: 300,
            vote_points: 10,
        };
        assert!(b.covers(&cost));

        let after = b.apply(BalanceDelta::debit(&cost)).unwrap();
        assert_eq!(after.credits, 200);
        assert_eq!(after.vote_points, 0);
    }

    #[test]
    fn debit_never_goes_negative() {
        let b = balance(500, 0);
        let cost = Cost {
            credits: 600,
            vote_points: 0,
        };
        assert!(!b.covers(&cost));

        let err = b.apply(BalanceDelta::debit(&cost)).unwrap_err();
        assert_eq!(
            err,
            ShopError::InsufficientFunds {
                credits_balance: 500,
                credits_required: 600,
                vote_points_balance: 0,
                vote_points_required: 0,
            }
        );
    }

    #[test]
    fn grants_add_to_balance() {
        let b = balance(5, 1);
        let after = b
            .apply(BalanceDelta::credits(1000))
            .unwrap()
            .apply(BalanceDelta::vote_points(2))
            .unwrap();
        assert_eq!(after.credits, 1005);
        assert_eq!(after.vote_points, 3);
    }

    #[test]
    fn cost_arithmetic() {
        let unit = Cost {
            credits: 300,
            vote_points: 2,
        };
        let total = unit.times(2).plus(&Cost {
            credits: 1,
            vote_points: 0,
        });
        assert_eq!(total.credits, 601);
        assert_eq!(total.vote_points, 4);
        assert!(Cost::default().is_free());
    }
}
