//! Delivery planning.
//!
//! Purchased quantities are aggregated by world item, split into stacks no larger
//! than the item's maximum stack size, and packed first-fit into batches of at
//! most [`BATCH_CAPACITY`] stacks. Each batch becomes one `send items` command.
//! Nothing here performs I/O; the dispatcher feeds the plan to a remote channel
//! and folds the responses back with [`summarize`].

use serde::{Deserialize, Serialize};

use crate::ids::ItemEntry;
use crate::purchase::{truncate_chars, DeliveryRecord, DeliveryStatus, PurchaseLine};

/// Maximum stacks attached to one in-game mail.
pub const BATCH_CAPACITY: usize = 12;

/// Maximum characters kept from one batch response.
pub const MAX_BATCH_RESPONSE_LEN: usize = 1000;

/// Separator between batch responses in the stored diagnostic.
pub const RESPONSE_SEPARATOR: &str = "\n---\n";

/// Recorded when a purchase has no recipient character.
pub const REASON_NO_RECIPIENT: &str = "no recipient character";

/// Recorded when the realm's remote channel is disabled or missing.
pub const REASON_CHANNEL_DISABLED: &str = "remote channel disabled or not configured";

/// A bundle of identical items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// World item.
    pub entry: ItemEntry,
    /// Units in this stack.
    pub count: i64,
}

/// Sum quantities per world item, in order of first appearance.
#[must_use]
pub fn aggregate(lines: &[PurchaseLine]) -> Vec<(ItemEntry, i64)> {
    let mut totals: Vec<(ItemEntry, i64)> = Vec::new();
    for line in lines {
        match totals.iter_mut().find(|(entry, _)| *entry == line.world_entry) {
            Some((_, total)) => *total = total.saturating_add(line.quantity),
            None => totals.push((line.world_entry, line.quantity)),
        }
    }
    totals
}

/// Split `quantity` units into full stacks of `max_stack` followed by the remainder.
///
/// A missing or non-positive stack size counts as one.
#[must_use]
pub fn split_stacks(entry: ItemEntry, quantity: i64, max_stack: Option<i64>) -> Vec<Stack> {
    let max_stack = max_stack.filter(|s| *s >= 1).unwrap_or(1);
    let mut stacks = Vec::new();
    let mut remaining = quantity;
    while remaining > 0 {
        let count = remaining.min(max_stack);
        stacks.push(Stack { entry, count });
        remaining -= count;
    }
    stacks
}

/// Pack stacks, in order, into batches of at most `capacity`.
#[must_use]
pub fn pack_batches(stacks: Vec<Stack>, capacity: usize) -> Vec<Vec<Stack>> {
    let capacity = capacity.max(1);
    let mut batches: Vec<Vec<Stack>> = Vec::new();
    for stack in stacks {
        match batches.last_mut() {
            Some(batch) if batch.len() < capacity => batch.push(stack),
            _ => batches.push(vec![stack]),
        }
    }
    batches
}

/// The ordered batches for one purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPlan {
    /// Batches in dispatch order.
    pub batches: Vec<Vec<Stack>>,
}

impl DeliveryPlan {
    /// Build a plan from purchase lines and a stack-size lookup.
    #[must_use]
    pub fn build(lines: &[PurchaseLine], stack_size: impl Fn(ItemEntry) -> Option<i64>) -> Self {
        let stacks = aggregate(lines)
            .into_iter()
            .flat_map(|(entry, quantity)| split_stacks(entry, quantity, stack_size(entry)))
            .collect();
        Self {
            batches: pack_batches(stacks, BATCH_CAPACITY),
        }
    }

    /// Distinct world items referenced by some lines, in first-appearance order.
    #[must_use]
    pub fn entries(lines: &[PurchaseLine]) -> Vec<ItemEntry> {
        aggregate(lines).into_iter().map(|(entry, _)| entry).collect()
    }

    /// Whether there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Subject and body of the delivery mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailTemplate {
    /// Mail subject.
    pub subject: String,
    /// Mail body; `{name}` is replaced with the recipient name.
    pub body: String,
}

impl Default for MailTemplate {
    fn default() -> Self {
        Self {
            subject: "Shop Purchase".into(),
            body: "Thank you for your purchase, {name}!".into(),
        }
    }
}

/// Render one `send items` command.
///
/// Quotes and line breaks are stripped from the quoted fields and whitespace from
/// the recipient so the command stays a single well-formed line.
#[must_use]
pub fn render_command(recipient: &str, template: &MailTemplate, batch: &[Stack]) -> String {
    let recipient: String = recipient.chars().filter(|c| !c.is_whitespace()).collect();
    let subject = quoted_field(&template.subject);
    let body = quoted_field(&template.body.replace("{name}", &recipient));
    let parts: Vec<String> = batch
        .iter()
        .map(|s| format!("{}:{}", s.entry, s.count))
        .collect();
    format!(
        "send items {recipient} \"{subject}\" \"{body}\" {}",
        parts.join(" ")
    )
}

fn quoted_field(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .filter(|c| *c != '"')
        .collect()
}

/// Outcome of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The channel accepted the command and returned this text.
    Sent(String),
    /// The command failed with this message.
    Failed(String),
}

/// Fold batch outcomes into the record stored on the purchase.
///
/// The purchase is sent only if every batch succeeded.
#[must_use]
pub fn summarize(outcomes: &[BatchOutcome]) -> DeliveryRecord {
    let mut ok = !outcomes.is_empty();
    let parts: Vec<String> = outcomes
        .iter()
        .map(|outcome| match outcome {
            BatchOutcome::Sent(text) => truncate_chars(text, MAX_BATCH_RESPONSE_LEN).to_string(),
            BatchOutcome::Failed(err) => {
                ok = false;
                let line = format!("Error: {err}");
                truncate_chars(&line, MAX_BATCH_RESPONSE_LEN).to_string()
            }
        })
        .collect();
    let status = if ok {
        DeliveryStatus::Sent
    } else {
        DeliveryStatus::Failed
    };
    DeliveryRecord::new(status, parts.join(RESPONSE_SEPARATOR))
}
