//! HTTP participant client.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;

use super::{CallOutcome, CallbackKind, CallbackRequest, ParticipantClient};
use crate::headers::{LRA_CONTEXT_HEADER, LRA_ENDED_CONTEXT_HEADER, LRA_RECOVERY_HEADER};

/// Delivers callbacks as `PUT` requests per the LRA participant contract:
/// complete/compensate carry the context and recovery headers, `after`
/// carries the ended-context header with the final status as body.
pub struct HttpParticipantClient {
    http: reqwest::Client,
}

impl HttpParticipantClient {
    pub fn new() -> Self {
        HttpParticipantClient {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpParticipantClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticipantClient for HttpParticipantClient {
    async fn call(&self, request: &CallbackRequest<'_>, timeout: Duration) -> CallOutcome {
        let participant = request.participant;
        let url = match request.kind {
            CallbackKind::Complete => &participant.complete_url,
            CallbackKind::Compensate => &participant.compensate_url,
            CallbackKind::After => match &participant.after_url {
                Some(url) => url,
                None => return CallOutcome::Ack,
            },
        };

        let mut builder = self.http.put(url.clone()).timeout(timeout);
        builder = match request.kind {
            CallbackKind::Complete | CallbackKind::Compensate => builder
                .header(LRA_CONTEXT_HEADER, request.lra.as_str())
                .header(LRA_RECOVERY_HEADER, &request.recovery_uri),
            CallbackKind::After => {
                let body = request
                    .final_status
                    .map(|s| s.as_str())
                    .unwrap_or_default();
                builder
                    .header(LRA_ENDED_CONTEXT_HEADER, request.lra.as_str())
                    .body(body)
            }
        };

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    CallOutcome::Ack
                } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                    CallOutcome::Gone
                } else {
                    CallOutcome::Failed(format!("unexpected status {status}"))
                }
            }
            Err(e) if e.is_timeout() => CallOutcome::Timeout,
            Err(e) => CallOutcome::Failed(e.to_string()),
        }
    }
}
