// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request dispatch with endpoint failover.
//!
//! Every call goes to the ring's current endpoint. Connectivity failures
//! (unreachable host, timeout, HTTP status other than 200/400) move the call
//! to the next endpoint; anything the server itself answered (success, an
//! `ERROR` envelope, an unparsable body) ends the call.
//!
//! Three protocols are offered:
//!
//! - [`Dispatcher::submit_blocking`] walks the ring once on the caller's
//!   thread and stops when it is back where it started.
//! - [`Dispatcher::submit`] counts failures and retries while the budget
//!   (ring size) lasts and the ring has visibly moved.
//! - [`Dispatcher::submit_job`] (see [`crate::job`]) wraps long-running
//!   endpoints in a server-side job and polls it.

use std::{sync::Arc, time::Duration};

use reqwest::header::HeaderMap;
use serde_json::Value;
use snafu::{ResultExt, ensure};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{
    ring::EndpointRing,
    transport::Transport,
    types::{ClientError, ClientResult, ResponsePayload, RuntimeSnafu, ValidationSnafu},
};

/// Endpoints that always run as server-side jobs.
pub const JOB_ENDPOINTS: [&str; 2] = ["/alter/table", "/alter/table/columns"];

pub fn is_job_endpoint(path: &str) -> bool { JOB_ENDPOINTS.contains(&path) }

/// Outcome of one HTTP exchange with one endpoint
#[derive(Debug)]
pub(crate) enum Attempt {
    /// The server answered; the call is over whatever the answer was
    Done(ClientResult<ResponsePayload>),
    /// Connectivity problem; another endpoint may do better
    Failover(ClientError),
}

/// Failure budget of one logical call.
///
/// The job protocol keeps a single budget across its create and poll
/// phases.
#[derive(Debug)]
pub(crate) struct FailoverBudget<'a> {
    ring:     &'a EndpointRing,
    initial:  String,
    failures: usize,
}

impl<'a> FailoverBudget<'a> {
    pub(crate) fn new(ring: &'a EndpointRing) -> Self {
        Self {
            ring,
            initial: ring.current().to_string(),
            failures: 0,
        }
    }

    /// Records a failed attempt against `attempted`.
    ///
    /// Returns `Ok(())` when the call should retry at the ring's current
    /// endpoint, or the error when it must be delivered. The ring is only
    /// advanced here if no other call has moved it since the attempt.
    pub(crate) fn record(&mut self, attempted: &str, error: ClientError) -> ClientResult<()> {
        self.failures += 1;
        if self.failures >= self.ring.size() {
            warn!(
                "Giving up after {} failed attempts: {}",
                self.failures, error
            );
            return Err(error);
        }

        if attempted != self.ring.current() || self.ring.advance() != self.initial {
            debug!(
                "Attempt {} against {} failed ({}), retrying at {}",
                self.failures,
                attempted,
                error,
                self.ring.current()
            );
            Ok(())
        } else {
            // Back at the starting endpoint with budget left
            warn!("Ring returned to {} early: {}", self.initial, error);
            Err(error)
        }
    }
}

/// Submits serialized requests against an [`EndpointRing`]
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ring:          Arc<EndpointRing>,
    transport:     Arc<dyn Transport>,
    timeout:       Option<Duration>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        ring: Arc<EndpointRing>,
        transport: Arc<dyn Transport>,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ring,
            transport,
            timeout,
            poll_interval,
        }
    }

    pub fn ring(&self) -> &EndpointRing { &self.ring }

    pub(crate) fn poll_interval(&self) -> Duration { self.poll_interval }

    /// Sends `body` to `address + path` and classifies the exchange.
    pub(crate) async fn attempt(
        &self,
        address: &str,
        path: &str,
        headers: &HeaderMap,
        body: &str,
    ) -> Attempt {
        let url = format!("{address}{path}");
        debug!("POST {}", url);

        let reply = match self
            .transport
            .post(&url, headers.clone(), body.to_string(), self.timeout)
            .await
        {
            Ok(reply) => reply,
            Err(error) if error.is_retryable() => return Attempt::Failover(error),
            Err(error) => return Attempt::Done(Err(error)),
        };

        if !reply.has_envelope() {
            return Attempt::Failover(ClientError::Transport {
                url,
                message: format!(
                    "Request failed with HTTP {} ({})",
                    reply.status, reply.reason
                ),
            });
        }
        Attempt::Done(ResponsePayload::from_body(&reply.body))
    }

    /// Walks the ring once, starting at the current endpoint.
    ///
    /// The walk ends with the last connectivity error once it is back at
    /// the starting endpoint or has made `ring.size()` attempts, whichever
    /// comes first. Other calls may move the shared cursor meanwhile.
    pub(crate) async fn walk_ring(
        &self,
        path: &str,
        headers: &HeaderMap,
        body: &str,
    ) -> ClientResult<ResponsePayload> {
        let initial = self.ring.current().to_string();
        let mut attempts = 0;
        loop {
            let address = self.ring.current().to_string();
            let error = match self.attempt(&address, path, headers, body).await {
                Attempt::Done(result) => return result,
                Attempt::Failover(error) => error,
            };
            attempts += 1;
            warn!("Endpoint {} failed: {}", address, error);
            if self.ring.advance() == initial || attempts >= self.ring.size() {
                return Err(error);
            }
        }
    }

    /// Submits on the caller's thread and waits for the result.
    ///
    /// Job endpoints are driven to completion as well, polls included.
    ///
    /// # Errors
    /// Returns a `ClientError::Validation` when called from inside a Tokio
    /// runtime; use [`Dispatcher::submit`] there.
    pub fn submit_blocking(&self, path: &str, headers: &HeaderMap, body: &str) -> ClientResult<Value> {
        ensure!(
            Handle::try_current().is_err(),
            ValidationSnafu {
                message: "blocking submission cannot run inside an async runtime",
            }
        );
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context(RuntimeSnafu)?;

        runtime.block_on(async {
            if is_job_endpoint(path) {
                self.submit_job(path, headers, body).await
            } else {
                self.walk_ring(path, headers, body)
                    .await
                    .map(|payload| payload.data)
            }
        })
    }

    /// Submits without blocking the thread.
    ///
    /// Job endpoints are routed to [`Dispatcher::submit_job`].
    pub async fn submit(&self, path: &str, headers: &HeaderMap, body: &str) -> ClientResult<Value> {
        if is_job_endpoint(path) {
            return self.submit_job(path, headers, body).await;
        }

        let mut budget = FailoverBudget::new(&self.ring);
        loop {
            let address = self.ring.current().to_string();
            match self.attempt(&address, path, headers, body).await {
                Attempt::Done(result) => return result.map(|payload| payload.data),
                Attempt::Failover(error) => budget.record(&address, error)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::transport::testing::{ScriptedTransport, business_error, ok, status, unreachable};

    const ADDRESSES: [&str; 3] = ["http://a:9191", "http://b:9191", "http://c:9191"];

    fn dispatcher(transport: &ScriptedTransport) -> Dispatcher {
        let ring = EndpointRing::new(ADDRESSES.iter().map(|a| a.to_string()).collect(), None).unwrap();
        Dispatcher::new(
            Arc::new(ring),
            Arc::new(transport.clone()),
            None,
            Duration::from_millis(5000),
        )
    }

    fn headers() -> HeaderMap { HeaderMap::new() }

    #[test_case(1; "first endpoint")]
    #[test_case(2; "second endpoint")]
    #[test_case(3; "last endpoint")]
    #[tokio::test]
    async fn test_first_success_short_circuits(k: usize) {
        let mut script: Vec<_> = (1..k).map(|_| status(503)).collect();
        script.push(ok("show_system_status_response", json!({"status_map": {}})));
        let transport = ScriptedTransport::new(script);
        let dispatcher = dispatcher(&transport);

        let data = dispatcher.submit("/show/system/status", &headers(), "{}").await.unwrap();
        assert_eq!(data, json!({"status_map": {}}));
        assert_eq!(transport.calls().len(), k);
        assert_eq!(dispatcher.ring().current(), ADDRESSES[k - 1]);

        let transport = ScriptedTransport::new(
            (1..k)
                .map(|i| unreachable(ADDRESSES[i - 1]))
                .chain([ok("x", json!(1))])
                .collect(),
        );
        let dispatcher = self::dispatcher(&transport);
        dispatcher.walk_ring("/x", &headers(), "{}").await.unwrap();
        assert_eq!(transport.calls().len(), k);
    }

    #[tokio::test]
    async fn test_nonblocking_exhaustion_stays_on_last_endpoint() {
        let transport =
            ScriptedTransport::new(vec![unreachable("a"), status(502), unreachable("c")]);
        let dispatcher = dispatcher(&transport);

        let err = dispatcher.submit("/show/table", &headers(), "{}").await.unwrap_err();
        assert_eq!(
            transport.urls(),
            vec![
                "http://a:9191/show/table",
                "http://b:9191/show/table",
                "http://c:9191/show/table"
            ]
        );
        // The error of the last attempt is delivered
        assert!(matches!(err, ClientError::Transport { ref url, .. } if url == "c"));
        assert_eq!(dispatcher.ring().position(), 2);
    }

    #[tokio::test]
    async fn test_blocking_walk_exhaustion_returns_to_start() {
        let transport = ScriptedTransport::new(vec![status(500), unreachable("b"), status(502)]);
        let dispatcher = dispatcher(&transport);

        let err = dispatcher.walk_ring("/show/table", &headers(), "{}").await.unwrap_err();
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(
            err.to_string(),
            "Request failed with HTTP 502 (Bad Gateway) (http://c:9191/show/table)"
        );
        assert_eq!(dispatcher.ring().position(), 0);
    }

    /// Answers 503 and, whenever the cursor sits on the last endpoint,
    /// moves it one extra step as a concurrent failing call would. The walk
    /// then never advances onto its starting endpoint.
    #[derive(Debug)]
    struct RotatingTransport {
        ring:  Arc<EndpointRing>,
        calls: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Transport for RotatingTransport {
        async fn post(
            &self,
            url: &str,
            _headers: HeaderMap,
            _body: String,
            _timeout: Option<Duration>,
        ) -> ClientResult<crate::types::HttpReply> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.ring.position() == self.ring.size() - 1 {
                self.ring.advance();
            }
            Ok(crate::types::HttpReply::new(503, ""))
        }
    }

    #[test_case(2; "two endpoints")]
    #[test_case(3; "three endpoints")]
    #[test_case(4; "four endpoints")]
    #[tokio::test]
    async fn test_blocking_walk_bounded_under_concurrent_rotation(size: usize) {
        let addresses = (0..size).map(|i| format!("http://h{i}:9191")).collect();
        let ring = Arc::new(EndpointRing::new(addresses, Some(0)).unwrap());
        let transport = Arc::new(RotatingTransport {
            ring:  ring.clone(),
            calls: std::sync::Mutex::default(),
        });
        let dispatcher = Dispatcher::new(ring, transport.clone(), None, Duration::from_millis(5000));

        let err = dispatcher.walk_ring("/x", &headers(), "{}").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.calls.lock().unwrap().len(), size);
    }

    #[tokio::test]
    async fn test_business_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![business_error("Table 'nope' does not exist")]);
        let dispatcher = dispatcher(&transport);

        let err = dispatcher.submit("/show/table", &headers(), "{}").await.unwrap_err();
        assert!(matches!(err, ClientError::ServerError { .. }));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(dispatcher.ring().position(), 0);
    }

    #[tokio::test]
    async fn test_unparsable_envelope_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(crate::types::HttpReply::new(200, "not json"))]);
        let dispatcher = dispatcher(&transport);

        let err = dispatcher.walk_ring("/show/table", &headers(), "{}").await.unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failover() {
        let transport = ScriptedTransport::new(vec![
            Err(ClientError::Timeout {
                url: "http://a:9191/x".to_string(),
            }),
            ok("x", json!({"ok": true})),
        ]);
        let dispatcher = dispatcher(&transport);

        let data = dispatcher.submit("/x", &headers(), "{}").await.unwrap();
        assert_eq!(data, json!({"ok": true}));
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn test_budget_guard_skips_advance_when_ring_moved() {
        let ring = EndpointRing::new(ADDRESSES.iter().map(|a| a.to_string()).collect(), None).unwrap();
        let mut budget = FailoverBudget::new(&ring);

        // Another call already moved the ring off the failed endpoint
        ring.advance();
        budget.record("http://a:9191", ClientError::Timeout { url: "a".into() }).unwrap();
        assert_eq!(ring.current(), "http://b:9191");

        // Ring still on the failed endpoint: this call advances it
        budget.record("http://b:9191", ClientError::Timeout { url: "b".into() }).unwrap();
        assert_eq!(ring.current(), "http://c:9191");
    }

    #[test]
    fn test_budget_gives_up_when_ring_wraps_to_start() {
        let ring = EndpointRing::new(ADDRESSES.iter().map(|a| a.to_string()).collect(), None).unwrap();
        let mut budget = FailoverBudget::new(&ring);

        // Another call walked the ring to the last endpoint; advancing from
        // there lands on the starting endpoint.
        ring.advance();
        ring.advance();
        let err = budget
            .record("http://c:9191", ClientError::Timeout { url: "c".into() })
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(ring.current(), "http://a:9191");
    }

    #[test]
    fn test_blocking_submit_outside_runtime() {
        let transport = ScriptedTransport::new(vec![status(503), ok("x", json!([1, 2]))]);
        let dispatcher = dispatcher(&transport);

        let data = dispatcher.submit_blocking("/x", &headers(), "{}").unwrap();
        assert_eq!(data, json!([1, 2]));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_blocking_submit_inside_runtime_rejected() {
        let transport = ScriptedTransport::new(Vec::new());
        let dispatcher = dispatcher(&transport);

        let err = dispatcher.submit_blocking("/x", &headers(), "{}").unwrap_err();
        assert!(matches!(err, ClientError::Validation { .. }));
        assert!(transport.calls().is_empty());
    }
}
