//! `HttpPageFetcher` against a local axum site.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;

use ragchat::fetcher::HttpPageFetcher;
use ragchat_core::ingest::PageFetcher;

const FAQ: &str = r#"<!doctype html>
<html>
<head>
  <title>Caf&eacute; &#8211; FAQ</title>
  <script>window.analytics = "do not index";</script>
  <style>p { margin: 0 }</style>
</head>
<body>
  <!-- build 42 > internal note -->
  <nav><a href="/">Home</a></nav>
  <h1>Opening hours</h1>
  <p>We&#8217;re open 7&nbsp;days a week &amp; on holidays.</p>
  <img alt="latte > espresso" src="latte.png">
  <script>trackPageView();</script>
  <noscript>Enable JavaScript</noscript>
  <p>Prices are in &euro; &mdash; tips welcome.</p>
</body>
</html>"#;

async fn faq() -> Html<&'static str> {
    Html(FAQ)
}

async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "warming up").into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "text/html")],
            "<html><head><title>Ready</title></head><body><p>Back online</p></body></html>",
        )
            .into_response()
    }
}

async fn serve_site() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/faq", get(faq))
        .route("/flaky", get(flaky))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn fetcher(max_retries: u32) -> HttpPageFetcher {
    HttpPageFetcher::new(Duration::from_secs(5), max_retries).unwrap()
}

#[tokio::test]
async fn test_fetch_extracts_clean_text() {
    let (base, _) = serve_site().await;
    let url = format!("{}/faq", base);

    let page = fetcher(0).fetch(&url).await.unwrap();

    assert_eq!(page.url, url);
    assert_eq!(page.domain, "127.0.0.1");
    assert_eq!(page.title, "Caf\u{e9} \u{2013} FAQ");
    assert_eq!(
        page.content,
        "Home\n\nOpening hours\n\n\
         We\u{2019}re open 7 days a week & on holidays.\n\n\
         Prices are in \u{20ac} \u{2014} tips welcome."
    );
    for leaked in ["analytics", "trackPageView", "internal note", "espresso", "JavaScript", "&amp;"] {
        assert!(!page.content.contains(leaked), "leaked {:?}", leaked);
    }
}

#[tokio::test]
async fn test_missing_page_is_an_error() {
    let (base, _) = serve_site().await;
    let err = fetcher(2)
        .fetch(&format!("{}/nope", base))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_unavailable_page_is_retried() {
    let (base, hits) = serve_site().await;

    let page = fetcher(1).fetch(&format!("{}/flaky", base)).await.unwrap();

    assert_eq!(page.title, "Ready");
    assert_eq!(page.content, "Back online");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    assert!(fetcher(0).fetch("not a url").await.is_err());
}
