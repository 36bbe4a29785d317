//! HTTP [`PageFetcher`] for web ingestion.
//!
//! Fetches a page with a plain GET and parses it with `scraper`. The text
//! of `<body>` is collected with `script`, `style`, `noscript` and
//! `template` subtrees skipped. Block-level elements and `<br>` end a
//! paragraph, and each paragraph's whitespace collapses to single spaces.
//! Paragraph breaks are kept so the web chunker can split on them.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use ragchat_core::ingest::PageFetcher;
use ragchat_core::models::CrawledPage;

use crate::retry::{error_for_status, send_with_retry};

const USER_AGENT: &str = concat!("ragchat/", env!("CARGO_PKG_VERSION"));
const UNTITLED: &str = "Untitled";

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "footer", "aside", "nav", "li", "ul",
    "ol", "tr", "table", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "dd", "dt",
];

pub struct HttpPageFetcher {
    client: reqwest::Client,
    max_retries: u32,
    extractor: PageExtractor,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build page fetcher HTTP client")?;
        Ok(Self {
            client,
            max_retries,
            extractor: PageExtractor::new(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<CrawledPage> {
        let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;
        let domain = parsed.host_str().unwrap_or_default().to_string();

        let response =
            send_with_retry("page fetch", self.max_retries, || self.client.get(url)).await?;
        let response = error_for_status("page fetch", response).await?;
        let html = response.text().await.context("failed to read page body")?;

        let page = self.extractor.extract(url, &domain, &html);
        tracing::debug!(url, chars = page.content.len(), "fetched page");
        Ok(page)
    }
}

/// Reduces an HTML document to a [`CrawledPage`].
#[derive(Clone)]
pub struct PageExtractor {
    title: Selector,
    body: Selector,
}

impl PageExtractor {
    pub fn new() -> Self {
        Self {
            title: Selector::parse("title").expect("title selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    pub fn extract(&self, url: &str, domain: &str, html: &str) -> CrawledPage {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title)
            .next()
            .map(|t| collapse_whitespace(&t.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        let root = document
            .select(&self.body)
            .next()
            .unwrap_or_else(|| document.root_element());

        let mut collector = ParagraphCollector::default();
        collector.walk(root);

        CrawledPage {
            url: url.to_string(),
            domain: domain.to_string(),
            title,
            content: collector.finish(),
        }
    }
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct ParagraphCollector {
    paragraphs: Vec<String>,
    current: String,
}

impl ParagraphCollector {
    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                self.current.push_str(text);
                continue;
            }
            let Some(child) = ElementRef::wrap(child) else {
                continue;
            };
            let name = child.value().name();
            if HIDDEN_TAGS.contains(&name) {
                continue;
            }
            if name == "br" {
                self.flush();
                continue;
            }
            let block = BLOCK_TAGS.contains(&name);
            if block {
                self.flush();
            }
            self.walk(child);
            if block {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        let paragraph = collapse_whitespace(&self.current);
        if !paragraph.is_empty() {
            self.paragraphs.push(paragraph);
        }
        self.current.clear();
    }

    fn finish(mut self) -> String {
        self.flush();
        self.paragraphs.join("\n\n")
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
