//! End-to-end tests driving the coordinator over HTTP against wiremock
//! participants.

use std::net::SocketAddr;
use std::num::NonZeroU8;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lra_coordinator::config::RetryPolicy;
use lra_coordinator::dispatch::{Dispatcher, HttpParticipantClient};
use lra_coordinator::engine::Coordinator;
use lra_coordinator::headers::{
    LRA_CONTEXT_HEADER, LRA_ENDED_CONTEXT_HEADER, LRA_RECOVERY_HEADER,
};
use lra_coordinator::http::app;
use lra_coordinator::store::MemoryStore;

struct TestCoordinator {
    addr: SocketAddr,
    http: reqwest::Client,
}

impl TestCoordinator {
    async fn spawn() -> Self {
        Self::spawn_with_policy(RetryPolicy {
            request_timeout: Duration::from_secs(2),
            max_attempts: NonZeroU8::new(3).unwrap(),
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(80),
        })
        .await
    }

    async fn spawn_with_policy(policy: RetryPolicy) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dispatcher = Arc::new(Dispatcher::new(Arc::new(HttpParticipantClient::new()), policy));
        let coordinator = Coordinator::new(
            Arc::new(MemoryStore::new()),
            dispatcher,
            Url::parse(&format!("http://{addr}")).unwrap(),
        );

        tokio::spawn(async move {
            axum::serve(listener, app(coordinator)).await.unwrap();
        });

        TestCoordinator {
            addr,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Start an LRA; returns its uuid path segment and full URI.
    async fn start(&self) -> (String, String) {
        let response = self
            .http
            .post(self.url("/lra/start"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let lra_uri = response
            .headers()
            .get(LRA_CONTEXT_HEADER)
            .expect("context header")
            .to_str()
            .unwrap()
            .to_string();
        let segment = lra_uri.rsplit('/').next().unwrap().to_string();
        (segment, lra_uri)
    }

    async fn enlist(&self, segment: &str, participant: &MockServer) -> Value {
        let response = self
            .http
            .post(self.url(&format!("/lra/{segment}/enlist")))
            .json(&json!({
                "compensateUrl": format!("{}/compensate", participant.uri()),
                "completeUrl": format!("{}/complete", participant.uri()),
                "afterUrl": format!("{}/after", participant.uri()),
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key(LRA_RECOVERY_HEADER));
        response.json().await.unwrap()
    }

    async fn status(&self, segment: &str) -> Value {
        let response = self
            .http
            .get(self.url(&format!("/lra/{segment}/status")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    async fn wait_for_status(&self, segment: &str, expected: &str) -> Value {
        for _ in 0..200 {
            let status = self.status(segment).await;
            if status["status"] == expected {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("lra never reached {expected}");
    }
}

#[tokio::test]
async fn test_close_with_two_participants_reaches_closed() {
    let coordinator = TestCoordinator::spawn().await;
    let (segment, lra_uri) = coordinator.start().await;

    let p1 = MockServer::start().await;
    let p2 = MockServer::start().await;
    for participant in [&p1, &p2] {
        Mock::given(method("PUT"))
            .and(path("/complete"))
            .and(header_exists(LRA_CONTEXT_HEADER))
            .and(header_exists(LRA_RECOVERY_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .named("complete")
            .mount(participant)
            .await;
        Mock::given(method("PUT"))
            .and(path("/after"))
            .and(header_exists(LRA_ENDED_CONTEXT_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .mount(participant)
            .await;
    }

    coordinator.enlist(&segment, &p1).await;
    coordinator.enlist(&segment, &p2).await;

    let response = coordinator
        .http
        .put(coordinator.url(&format!("/lra/{segment}/close")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let status = coordinator.wait_for_status(&segment, "Closed").await;
    assert_eq!(status["lraId"], lra_uri);
    for participant in status["participants"].as_array().unwrap() {
        assert_eq!(participant["status"], "Completed");
    }
}

#[tokio::test]
async fn test_cancel_compensates_and_notifies_after() {
    let coordinator = TestCoordinator::spawn().await;
    let (segment, lra_uri) = coordinator.start().await;

    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/compensate"))
        .and(header(LRA_CONTEXT_HEADER, lra_uri.as_str()))
        .and(header_exists(LRA_RECOVERY_HEADER))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .named("compensate")
        .mount(&participant)
        .await;
    Mock::given(method("PUT"))
        .and(path("/after"))
        .and(header(LRA_ENDED_CONTEXT_HEADER, lra_uri.as_str()))
        .and(wiremock::matchers::body_string("Cancelled"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .named("after")
        .mount(&participant)
        .await;

    coordinator.enlist(&segment, &participant).await;

    let response = coordinator
        .http
        .put(coordinator.url(&format!("/lra/{segment}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    coordinator.wait_for_status(&segment, "Cancelled").await;
    // Give the fire-and-forget after notification a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_unreachable_participant_settles_failed_to_cancel() {
    let coordinator = TestCoordinator::spawn_with_policy(RetryPolicy {
        request_timeout: Duration::from_millis(200),
        max_attempts: NonZeroU8::new(3).unwrap(),
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(40),
    })
    .await;
    let (segment, _lra_uri) = coordinator.start().await;

    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/compensate"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .expect(3)
        .mount(&participant)
        .await;

    coordinator.enlist(&segment, &participant).await;

    coordinator
        .http
        .put(coordinator.url(&format!("/lra/{segment}/cancel")))
        .send()
        .await
        .unwrap();

    let status = coordinator.wait_for_status(&segment, "FailedToCancel").await;
    assert_eq!(
        status["participants"][0]["status"],
        "FailedToCompensate"
    );
    assert_eq!(status["participants"][0]["attempts"], 3);
}

#[tokio::test]
async fn test_enlist_is_idempotent_per_callback_pair() {
    let coordinator = TestCoordinator::spawn().await;
    let (segment, _lra_uri) = coordinator.start().await;

    let participant = MockServer::start().await;
    let first = coordinator.enlist(&segment, &participant).await;
    let second = coordinator.enlist(&segment, &participant).await;

    assert_eq!(first["participantId"], second["participantId"]);
    assert_eq!(first["recoveryUri"], second["recoveryUri"]);

    let status = coordinator.status(&segment).await;
    assert_eq!(status["participants"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_recovery_uri_is_queryable() {
    let coordinator = TestCoordinator::spawn().await;
    let (segment, _lra_uri) = coordinator.start().await;

    let participant = MockServer::start().await;
    let enlisted = coordinator.enlist(&segment, &participant).await;
    let recovery_uri = enlisted["recoveryUri"].as_str().unwrap();

    let response = coordinator.http.get(recovery_uri).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let view: Value = response.json().await.unwrap();
    assert_eq!(view["participantId"], enlisted["participantId"]);
    assert_eq!(view["status"], "Active");
}

#[tokio::test]
async fn test_operation_errors_surface_as_http_statuses() {
    let coordinator = TestCoordinator::spawn().await;

    // Unknown LRA.
    let response = coordinator
        .http
        .put(coordinator.url("/lra/no-such-lra/close"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Close is only legal from Active.
    let (segment, _lra_uri) = coordinator.start().await;
    coordinator
        .http
        .put(coordinator.url(&format!("/lra/{segment}/close")))
        .send()
        .await
        .unwrap();
    coordinator.wait_for_status(&segment, "Closed").await;

    let response = coordinator
        .http
        .put(coordinator.url(&format!("/lra/{segment}/close")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Enlisting after the end is a conflict too.
    let response = coordinator
        .http
        .post(coordinator.url(&format!("/lra/{segment}/enlist")))
        .json(&json!({
            "compensateUrl": "http://late.test/compensate",
            "completeUrl": "http://late.test/complete",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn test_nested_start_records_parent() {
    let coordinator = TestCoordinator::spawn().await;
    let (_parent_segment, parent_uri) = coordinator.start().await;

    let response = coordinator
        .http
        .post(coordinator.url(&format!(
            "/lra/start?parentLra={}",
            urlencoded(&parent_uri)
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // A bogus parent is rejected.
    let response = coordinator
        .http
        .post(coordinator.url(&format!(
            "/lra/start?parentLra={}",
            urlencoded("http://elsewhere/lra/ghost")
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

fn urlencoded(raw: &str) -> String {
    let mut out = String::new();
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
