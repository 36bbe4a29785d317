//! Product catalog parser for the delimited markdown dialect.
//!
//! ```text
//! --- item start ---
//! id: sku-1
//! name: Trail Runner
//! price: 89.90
//! tags: [shoes, running]
//! ### description
//! Lightweight trail shoe.
//! --- item end ---
//! ```
//!
//! Scanning is a three-state machine ([`ScanState`]) driven one line at a
//! time. Each delimited item is parsed independently: an item missing its
//! `name` or `description` is recorded as a [`ParseItemError`] and the scan
//! moves on, so one bad record never blocks the rest of the catalog.
//!
//! Leniency rules:
//! - `name` and `description` are truncated to 200 and 2000 characters.
//! - A `tags` value without a `[...]` bracket pair yields no tags.
//! - A missing `id` is back-filled with a random UUID.
//! - An item that is never closed by `--- item end ---` is dropped.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{ParseItemError, ParseResult, ParseSummary, Product};

pub const ITEM_START: &str = "--- item start ---";
pub const ITEM_END: &str = "--- item end ---";
pub const DESCRIPTION_HEADER: &str = "### description";

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Where the scanner is relative to item and description boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Outside,
    InItem,
    InDescriptionBlock,
}

/// What a single line means in the state it was read in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// Line carries nothing for the item (blank, prose, or outside any item).
    Ignore,
    OpenItem,
    CloseItem,
    EnterDescription,
    /// The `###`/`---` line that ended a description block; the line itself is dropped.
    LeaveDescription,
    DescriptionLine(&'a str),
    Field { key: &'a str, value: &'a str },
}

impl ScanState {
    /// Advance the machine by one line.
    pub fn step(self, line: &str) -> (ScanState, LineEvent<'_>) {
        let trimmed = line.trim();

        if trimmed == ITEM_START {
            return (ScanState::InItem, LineEvent::OpenItem);
        }
        if trimmed == ITEM_END {
            return match self {
                ScanState::Outside => (ScanState::Outside, LineEvent::Ignore),
                _ => (ScanState::Outside, LineEvent::CloseItem),
            };
        }

        match self {
            ScanState::Outside => (ScanState::Outside, LineEvent::Ignore),
            ScanState::InItem => {
                if trimmed.starts_with(DESCRIPTION_HEADER) {
                    (ScanState::InDescriptionBlock, LineEvent::EnterDescription)
                } else if let Some((key, value)) = split_field(line) {
                    (ScanState::InItem, LineEvent::Field { key, value })
                } else {
                    (ScanState::InItem, LineEvent::Ignore)
                }
            }
            ScanState::InDescriptionBlock => {
                if trimmed.starts_with(DESCRIPTION_HEADER) {
                    (ScanState::InDescriptionBlock, LineEvent::Ignore)
                } else if trimmed.starts_with("###") || trimmed.starts_with("---") {
                    (ScanState::InItem, LineEvent::LeaveDescription)
                } else {
                    (ScanState::InDescriptionBlock, LineEvent::DescriptionLine(line))
                }
            }
        }
    }
}

/// Match `key: value` where the key is one or more word characters
/// starting at column zero.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, rest) = line.split_once(':')?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, rest.trim()))
}

/// Accumulated content of one delimited item.
#[derive(Debug, Default)]
struct ItemDraft {
    fields: HashMap<String, String>,
    description_lines: Vec<String>,
    line_count: usize,
}

impl ItemDraft {
    fn apply(&mut self, event: LineEvent<'_>) {
        self.line_count += 1;
        match event {
            LineEvent::Field { key, value } => {
                self.fields.insert(key.to_string(), value.to_string());
            }
            LineEvent::DescriptionLine(line) => self.description_lines.push(line.to_string()),
            _ => {}
        }
    }

    fn field(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn into_product(self) -> Result<Product, String> {
        let description = if self.description_lines.is_empty() {
            self.field("description").unwrap_or_default()
        } else {
            self.description_lines.join("\n").trim().to_string()
        };
        let name = self.field("name").unwrap_or_default();

        if name.is_empty() {
            return Err("Missing required fields: name".to_string());
        }
        if description.is_empty() {
            return Err("Missing required fields: description".to_string());
        }

        Ok(Product {
            id: self
                .field("id")
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: truncate_chars(&name, MAX_NAME_CHARS),
            description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
            category: self.field("category"),
            price: self.field("price").as_deref().and_then(parse_price),
            currency: self.field("currency"),
            availability: self.field("availability"),
            tags: self.field("tags").as_deref().and_then(parse_tags),
            image_url: self.field("imageUrl"),
            product_url: self.field("productUrl"),
            brand: self.field("brand"),
            updated_at: Utc::now(),
        })
    }
}

/// Parse a delimited markdown catalog into products and per-item errors.
pub fn parse_markdown(content: &str) -> ParseResult {
    let mut state = ScanState::Outside;
    let mut current: Option<ItemDraft> = None;
    let mut drafts = Vec::new();

    for line in content.lines() {
        let (next, event) = state.step(line);
        match event {
            LineEvent::OpenItem => current = Some(ItemDraft::default()),
            LineEvent::CloseItem => {
                if let Some(draft) = current.take().filter(|d| d.line_count > 0) {
                    drafts.push(draft);
                }
            }
            other => {
                if let Some(draft) = current.as_mut() {
                    draft.apply(other);
                }
            }
        }
        state = next;
    }

    let total_items = drafts.len();
    let mut products = Vec::new();
    let mut errors = Vec::new();
    for (item_index, draft) in drafts.into_iter().enumerate() {
        match draft.into_product() {
            Ok(product) => products.push(product),
            Err(reason) => errors.push(ParseItemError { item_index, reason }),
        }
    }

    tracing::debug!(
        total_items,
        success_count = products.len(),
        failure_count = errors.len(),
        "parsed product markdown"
    );

    ParseResult {
        summary: ParseSummary {
            total_items,
            success_count: products.len(),
            failure_count: errors.len(),
        },
        products,
        errors,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Text between the first `[` and the last `]`, split on commas.
fn parse_tags(raw: &str) -> Option<Vec<String>> {
    let open = raw.find('[')?;
    let close = raw.rfind(']')?;
    if close <= open {
        return None;
    }
    let tags: Vec<String> = raw[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

/// Longest leading decimal number of the value, so `12.50 EUR` yields `12.5`
/// and `1.2.3` yields `1.2`.
fn parse_price(raw: &str) -> Option<f64> {
    let raw = raw.trim_start();
    let bytes = raw.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = match bytes.first() {
        Some(b'-' | b'+') => 1,
        _ => 0,
    };
    end = digits_from(end);
    if bytes.get(end) == Some(&b'.') {
        end = digits_from(end + 1);
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'-' | b'+')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    raw[..end].parse::<f64>().ok().filter(|p| p.is_finite())
}
