//! Integration tests for the HTTP fetcher

use engine::{EngineConfig, FetchError, Fetcher, HttpFetcher};
use futures_util::StreamExt;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_with_timeout(secs: u64) -> HttpFetcher {
    let config = EngineConfig {
        request_timeout_secs: secs,
        ..EngineConfig::default()
    };
    HttpFetcher::new(&config).unwrap()
}

#[tokio::test]
async fn test_fetch_sends_query_and_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photos/random"))
        .and(query_param("query", "mountain"))
        .and(query_param("count", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_with_timeout(5);
    let url = format!("{}/photos/random", server.uri());
    let body = fetcher
        .fetch(&url, &[("query", "mountain"), ("count", "2")])
        .await
        .unwrap();

    assert_eq!(&body[..], b"[]");
}

#[tokio::test]
async fn test_fetch_404_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = fetcher_with_timeout(5);
    let result = fetcher
        .fetch(&format!("{}/missing.jpg", server.uri()), &[])
        .await;

    // verify the error carries the status
    assert_eq!(result, Err(FetchError::Status(404)));
}

#[tokio::test]
async fn test_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let fetcher = fetcher_with_timeout(1);
    let result = fetcher.fetch(&server.uri(), &[]).await;

    assert_eq!(result, Err(FetchError::Timeout(Duration::from_secs(1))));
}

#[tokio::test]
async fn test_stream_reports_content_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 2048]))
        .mount(&server)
        .await;

    let fetcher = fetcher_with_timeout(5);
    let stream = fetcher
        .fetch_stream(&format!("{}/photo.jpg", server.uri()))
        .await
        .unwrap();
    assert_eq!(stream.total, Some(2048));

    let chunks: Vec<_> = stream.chunks.collect().await;
    let received: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
    assert_eq!(received, 2048);
}

#[tokio::test]
async fn test_stream_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = fetcher_with_timeout(5);
    let result = fetcher.fetch_stream(&server.uri()).await;

    assert!(matches!(result, Err(FetchError::Status(503))));
}
