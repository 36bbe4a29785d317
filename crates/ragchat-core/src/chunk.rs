//! Chunk building for products and crawled pages.
//!
//! A [`ChunkDraft`] is everything a chunk needs except its embedding: the
//! ingestion pipeline builds all drafts first, embeds their texts in one
//! batch, then zips each embedding back onto its draft with
//! [`ChunkDraft::into_chunk`].
//!
//! The product text produced by [`product_text`] is exactly what gets
//! embedded, so its layout is part of the retrieval contract:
//!
//! ```text
//! <name>
//! <description>
//! Category: <category>
//! Brand: <brand>
//! Price: <price> <currency or USD>
//! Availability: <availability>
//! Tags: <tag>, <tag>
//! ```
//!
//! Optional lines appear only when the field is present. Changing this
//! layout changes embeddings, so existing knowledge spaces must be
//! re-ingested rather than updated in place.
//!
//! Crawled pages are split with a paragraph-boundary chunker:
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush.
//! 4. Hard-split a single oversized paragraph at the nearest newline or
//!    space boundary, never inside a UTF-8 character.
//! 5. Prefix every segment after the first with the last `overlap_tokens`
//!    worth of the previous segment, starting on a word boundary, so text
//!    that straddles a cut is retrievable from either side.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::Embedding;
use crate::models::{Chunk, ChunkMetadata, CrawledPage, Namespace, Product};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Source label for products without a brand.
pub const DEFAULT_PRODUCT_LABEL: &str = "product";

pub const DEFAULT_CURRENCY: &str = "USD";

/// Default web-page chunk size in tokens.
pub const DEFAULT_PAGE_MAX_TOKENS: usize = 600;

/// Default overlap between adjacent web-page chunks in tokens.
pub const DEFAULT_PAGE_OVERLAP_TOKENS: usize = 75;

/// Segment sizing for crawled pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageChunking {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for PageChunking {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_PAGE_MAX_TOKENS,
            overlap_tokens: DEFAULT_PAGE_OVERLAP_TOKENS,
        }
    }
}

/// A chunk awaiting its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub url: String,
    pub source_label: String,
    pub title: String,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub text: String,
}

impl ChunkDraft {
    /// Attach `embedding` and the namespace, producing a storable chunk.
    pub fn into_chunk(
        self,
        namespace: &Namespace,
        embedding: Embedding,
        created_at: DateTime<Utc>,
    ) -> Chunk {
        let content_hash = content_hash(&self.text);
        Chunk {
            id: Uuid::new_v4().to_string(),
            tenant_id: namespace.tenant_id.clone(),
            knowledge_space_id: namespace.knowledge_space_id.clone(),
            url: self.url,
            source_label: self.source_label,
            text: self.text,
            embedding,
            metadata: ChunkMetadata {
                title: self.title,
                version: namespace.version.clone(),
                product_id: self.product_id,
                product_name: self.product_name,
                content_hash,
            },
            created_at,
        }
    }
}

/// Render a product as the text handed to the embedding provider.
pub fn product_text(product: &Product) -> String {
    let mut lines = vec![product.name.clone(), product.description.clone()];

    if let Some(category) = &product.category {
        lines.push(format!("Category: {}", category));
    }
    if let Some(brand) = &product.brand {
        lines.push(format!("Brand: {}", brand));
    }
    if let Some(price) = product.price {
        let currency = product.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
        lines.push(format!("Price: {} {}", price, currency));
    }
    if let Some(availability) = &product.availability {
        lines.push(format!("Availability: {}", availability));
    }
    if let Some(tags) = product.tags.as_ref().filter(|t| !t.is_empty()) {
        lines.push(format!("Tags: {}", tags.join(", ")));
    }

    lines.join("\n")
}

pub fn product_draft(product: &Product) -> ChunkDraft {
    ChunkDraft {
        url: product.product_url.clone().unwrap_or_default(),
        source_label: product
            .brand
            .clone()
            .unwrap_or_else(|| DEFAULT_PRODUCT_LABEL.to_string()),
        title: product.name.clone(),
        product_id: Some(product.id.clone()),
        product_name: Some(product.name.clone()),
        text: product_text(product),
    }
}

/// One draft per overlapping, paragraph-bounded segment of the page content.
pub fn page_drafts(page: &CrawledPage, chunking: PageChunking) -> Vec<ChunkDraft> {
    let segments = split_text(&page.content, chunking.max_tokens);
    with_overlap(segments, chunking.overlap_tokens * CHARS_PER_TOKEN)
        .into_iter()
        .map(|text| ChunkDraft {
            url: page.url.clone(),
            source_label: page.domain.clone(),
            title: page.title.clone(),
            product_id: None,
            product_name: None,
            text,
        })
        .collect()
}

/// Split text into segments on paragraph boundaries, respecting `max_tokens`.
///
/// Blank input yields no segments.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut segments = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            segments.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut segments);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        segments.push(current_buf);
    }

    segments
}

/// Prefix each segment after the first with the tail of its predecessor.
pub fn with_overlap(segments: Vec<String>, overlap_chars: usize) -> Vec<String> {
    if overlap_chars == 0 || segments.len() < 2 {
        return segments;
    }

    let mut out = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let tail = match i {
            0 => "",
            _ => overlap_tail(&segments[i - 1], overlap_chars),
        };
        if tail.is_empty() {
            out.push(segment.clone());
        } else {
            out.push(format!("{}\n\n{}", tail, segment));
        }
    }
    out
}

/// The last `overlap_chars` bytes of `text`, moved forward to the next
/// word boundary when the cut lands inside a word.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if text.len() <= overlap_chars {
        return text.trim();
    }
    let mut start = text.len() - overlap_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    let starts_mid_word = text[..start]
        .chars()
        .next_back()
        .map(|c| !c.is_whitespace())
        .unwrap_or(false);
    if !starts_mid_word {
        return tail.trim();
    }
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim(),
        None => tail.trim(),
    }
}

/// Split an oversized paragraph at newline/space boundaries.
fn hard_split(paragraph: &str, max_chars: usize, segments: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let split_at = if split_at == 0 {
            first_char_len(remaining)
        } else {
            split_at
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            segments.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn first_char_len(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(s.len())
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// SHA-256 hex digest of chunk text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
