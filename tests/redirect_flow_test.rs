//! End-to-end tests: rewrite content, then follow the rewritten link through
//! the axum router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use embed_redirects::html::TagProcessor;
use embed_redirects::{
    server, EmbedRedirects, EnvironmentType, MemoryOptionStore, RedirectConfig, RenderContext,
};
use tower::ServiceExt;

fn build(environment: EnvironmentType, descriptive_paths: bool) -> Arc<EmbedRedirects> {
    let config = RedirectConfig {
        site_url: "https://news.test/".to_string(),
        environment,
        descriptive_paths,
        ..RedirectConfig::default()
    };
    Arc::new(EmbedRedirects::new(config, Arc::new(MemoryOptionStore::new())).unwrap())
}

async fn send(router: Router, target: &str) -> Response {
    let request = Request::builder().uri(target).body(Body::empty()).unwrap();
    router.oneshot(request).await.unwrap()
}

/// First anchor's href, reduced to a request target on the local site.
fn first_link_target(html: &str) -> String {
    let mut processor = TagProcessor::new(html);
    assert!(processor.next_tag("a"));
    let href = processor.get_attribute("href").unwrap();
    href.as_text()
        .unwrap()
        .strip_prefix("https://news.test")
        .unwrap()
        .to_string()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn test_rewritten_link_redirects_in_development() {
    let redirects = build(EnvironmentType::Development, true);
    let html = r#"<p><a href="https://example.com/">Example</a></p>"#;
    let rendered = redirects
        .rewrite_content(html, &RenderContext::embed())
        .unwrap();

    let target = first_link_target(&rendered);
    assert!(target.starts_with("/verified-redirect/"));

    let response = send(server::router(redirects), &target).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://example.com/");
    assert_eq!(
        response.headers().get("x-redirect-by").unwrap(),
        "verified-redirect"
    );
}

#[tokio::test]
async fn test_production_and_staging_redirect_permanently() {
    for environment in [EnvironmentType::Production, EnvironmentType::Staging] {
        let redirects = build(environment, true);
        let target = redirects
            .signed_url("https://example.com/")
            .unwrap()
            .trim_start_matches("https://news.test")
            .to_string();
        let response = send(server::router(redirects), &target).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&response), "https://example.com/");
    }
}

#[tokio::test]
async fn test_query_embedded_link_round_trip() {
    let redirects = build(EnvironmentType::Local, false);
    let destination = "https://example.com/search?q=rust&page=2";
    let html = r#"<a href="https://example.com/search?q=rust&amp;page=2">s</a>"#;
    let rendered = redirects
        .rewrite_content(html, &RenderContext::embed())
        .unwrap();

    let target = first_link_target(&rendered);
    assert!(target.starts_with("/?pwcc-er-checksum="));

    let response = send(server::router(redirects), &target).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), destination);
}

#[tokio::test]
async fn test_both_schemes_agree() {
    let redirects = build(EnvironmentType::Development, true);
    let destination = "https://example.com/a/b";
    let checksum = redirects.sign(destination).unwrap();

    let path = format!("/verified-redirect/{checksum}/{destination}");
    let query = format!(
        "/?pwcc-er-checksum={checksum}&verified-redirect={}",
        urlencoding::encode(destination)
    );
    let by_path = send(server::router(redirects.clone()), &path).await;
    let by_query = send(server::router(redirects.clone()), &query).await;
    assert_eq!(by_path.status(), by_query.status());
    assert_eq!(location(&by_path), location(&by_query));

    let upper = checksum.as_str().to_ascii_uppercase();
    let path = format!("/verified-redirect/{upper}/{destination}");
    let query = format!(
        "/?pwcc-er-checksum={upper}&verified-redirect={}",
        urlencoding::encode(destination)
    );
    assert_eq!(
        send(server::router(redirects.clone()), &path).await.status(),
        StatusCode::FOUND
    );
    assert_eq!(
        send(server::router(redirects), &query).await.status(),
        StatusCode::FOUND
    );
}

#[tokio::test]
async fn test_forged_requests_are_plain_not_found() {
    let redirects = build(EnvironmentType::Production, true);
    let checksum = redirects.sign("https://example.com/").unwrap();
    let truncated = &checksum.as_str()[..5];

    let forged = [
        "/verified-redirect/0000000000/https://example.com/".to_string(),
        format!("/verified-redirect/{checksum}/https://evil.test/"),
        format!("/verified-redirect/{truncated}/https://example.com/"),
        format!("/verified-redirect/{checksum}/"),
        "/?pwcc-er-checksum=&verified-redirect=https%3A%2F%2Fexample.com%2F".to_string(),
        format!("/?pwcc-er-checksum={checksum}&verified-redirect=javascript%3Aalert(1)"),
    ];

    let plain_404 = send(server::router(redirects.clone()), "/no-such-page").await;
    for target in &forged {
        let response = send(server::router(redirects.clone()), target).await;
        assert_eq!(response.status(), plain_404.status(), "{target}");
        assert!(response.headers().get(header::LOCATION).is_none(), "{target}");
    }
}

#[tokio::test]
async fn test_forged_request_never_reaches_listing() {
    let redirects = build(EnvironmentType::Production, true);
    let listings = Arc::new(AtomicUsize::new(0));
    let counter = listings.clone();
    let app = Router::new().route(
        "/",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                "listing"
            }
        }),
    );
    let app = server::layer_into(app, redirects);

    let forged = "/?pwcc-er-checksum=abcdef0123&verified-redirect=https%3A%2F%2Fexample.com%2F";
    let response = send(app.clone(), forged).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(listings.load(Ordering::SeqCst), 0);

    let response = send(app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(listings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_same_site_destination_rejected_even_if_signed() {
    let redirects = build(EnvironmentType::Development, true);
    let destination = "https://news.test/private";
    let checksum = redirects.sign(destination).unwrap();
    let response = send(
        server::router(redirects),
        &format!("/verified-redirect/{checksum}/{destination}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rendered_page_outside_embed_is_untouched() {
    let redirects = build(EnvironmentType::Production, true);
    let html = r#"<a href="https://example.com/">x</a>"#;
    assert_eq!(
        redirects
            .rewrite_content(html, &RenderContext::page())
            .unwrap(),
        html
    );
}
