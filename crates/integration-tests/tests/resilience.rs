//! Failure-path scenarios: rate limits, retries, blacklisting, timeouts

mod harness;

use std::time::Duration;

use harness::gateway::TestGateway;
use harness::mock_upstream::MockUpstream;
use serde_json::json;

fn chat_body() -> serde_json::Value {
    json!({
        "model": "claude-sonnet-4",
        "messages": [{"role": "user", "content": "hello"}]
    })
}

fn two_provider_config(first: &str, second: &str) -> String {
    format!(
        r#"
        [[providers]]
        name = "alpha"
        api_base_url = "{first}"
        api_key = "ka"
        models = ["m"]
        weight = 5

        [[providers]]
        name = "beta"
        api_base_url = "{second}"
        api_key = "kb"
        models = ["m"]

        [router]
        default = "alpha,m;beta,m"
        "#
    )
}

#[tokio::test]
async fn rate_limit_cools_down_and_next_request_uses_the_other_pipeline() {
    let alpha = MockUpstream::start_failing_with(&[429]).await.unwrap();
    let beta = MockUpstream::start_with_response("from beta").await.unwrap();

    let gateway = TestGateway::start(&two_provider_config(&alpha.base_url(), &beta.base_url()))
        .await
        .unwrap();

    // First request lands on alpha (higher weight) and sees the 429;
    // no retry, no silent substitution — the client gets the error
    let first = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 502);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["type"], "upstream_rate_limited");
    assert_eq!(alpha.completion_count(), 1);

    // Alpha's key slot is cooling down; the next request picks beta
    let second = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "from beta");
    assert_eq!(alpha.completion_count(), 1);
    assert_eq!(beta.completion_count(), 1);
}

#[tokio::test]
async fn a_429_is_never_retried() {
    let upstream = MockUpstream::start_always(429).await.unwrap();
    let config = format!(
        r#"
        [[providers]]
        name = "solo"
        api_base_url = "{}"
        api_key = "k"
        models = ["m"]

        [router]
        default = "solo,m"
        "#,
        upstream.base_url(),
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    let resp = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    // Exactly one outbound call despite the retry budget
    assert_eq!(upstream.completion_count(), 1);
}

#[tokio::test]
async fn transient_500_is_retried_then_succeeds() {
    let upstream = MockUpstream::start_failing_with(&[500]).await.unwrap();
    let config = format!(
        r#"
        [[providers]]
        name = "solo"
        api_base_url = "{}"
        api_key = "k"
        models = ["m"]

        [router]
        default = "solo,m"
        "#,
        upstream.base_url(),
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    let resp = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    // The failed attempt plus one retry
    assert_eq!(upstream.completion_count(), 2);
}

#[tokio::test]
async fn saturated_single_pipeline_returns_503() {
    let upstream = MockUpstream::start_always(429).await.unwrap();
    let config = format!(
        r#"
        [[providers]]
        name = "solo"
        api_base_url = "{}"
        api_key = "k"
        models = ["m"]

        [router]
        default = "solo,m"
        "#,
        upstream.base_url(),
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    // The 429 puts the only key slot into cooldown
    let first = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 502);

    // With every candidate cooling down the handler reports 503
    let second = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 503);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["type"], "no_eligible_pipeline");
    assert_eq!(body["code"], 503);

    // No additional upstream traffic while ineligible
    assert_eq!(upstream.completion_count(), 1);
}

#[tokio::test]
async fn malformed_upstream_body_blacklists_the_pipeline() {
    let upstream = MockUpstream::start_malformed().await.unwrap();
    let config = format!(
        r#"
        [[providers]]
        name = "broken"
        api_base_url = "{}"
        api_key = "k"
        models = ["m"]

        [router]
        default = "broken,m"
        "#,
        upstream.base_url(),
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    // HTTP 200 with no `choices` array is a schema violation
    let first = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 502);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["type"], "response_schema_invalid");

    // The fatal outcome blacklists the pipeline for the error window
    let second = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 503);
    assert_eq!(upstream.completion_count(), 1);
}

#[tokio::test]
async fn slow_upstream_hits_the_request_deadline() {
    let upstream = MockUpstream::start_with_delay(Duration::from_secs(5))
        .await
        .unwrap();
    let config = format!(
        r#"
        [[providers]]
        name = "slow"
        api_base_url = "{}"
        api_key = "k"
        models = ["m"]

        [router]
        default = "slow,m"

        [server]
        request_timeout_ms = 300
        "#,
        upstream.base_url(),
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    let started = std::time::Instant::now();
    let resp = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "request_timeout");
    // The deadline, not the upstream delay, bounded the wait
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn traffic_returns_after_cooldown_expires() {
    // Alpha 429s once then recovers; beta is permanently rate limited
    let alpha = MockUpstream::start_failing_with(&[429]).await.unwrap();
    let beta = MockUpstream::start_always(429).await.unwrap();

    let gateway = TestGateway::start(&two_provider_config(&alpha.base_url(), &beta.base_url()))
        .await
        .unwrap();

    // Both pipelines take a 429 and enter cooldown
    for _ in 0..2 {
        let resp = gateway
            .client()
            .post(gateway.url("/v1/messages"))
            .json(&chat_body())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }
    assert_eq!(alpha.completion_count(), 1);
    assert_eq!(beta.completion_count(), 1);

    // Base key cooldown is one second; wait it out
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let after = gateway
        .client()
        .post(gateway.url("/v1/messages"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), 200);
    // Alpha recovered and took the request
    assert_eq!(alpha.completion_count(), 2);
    assert_eq!(beta.completion_count(), 1);
}
