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

//! Asynchronous server-side jobs.
//!
//! A job-wrapped call posts `/create/job` with the target endpoint and its
//! serialized request, then polls `/get/job` until the job is successful,
//! errored or cancelled.

use std::{collections::BTreeMap, time::Duration};

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    dispatch::{Attempt, Dispatcher, FailoverBudget},
    types::{ClientError, ClientResult, EncodeSnafu, ParseSnafu},
};

pub const CREATE_JOB_ENDPOINT: &str = "/create/job";
pub const GET_JOB_ENDPOINT: &str = "/get/job";

const CREATE_JOB_RESPONSE: &str = "create_job_response";
const GET_JOB_RESPONSE: &str = "get_job_response";

/// Delay between two status polls of a running job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    endpoint:         &'a str,
    request_encoding: &'static str,
    data:             &'static str,
    data_str:         &'a str,
    options:          BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct GetJobRequest {
    job_id:  i64,
    options: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    job_id: i64,
}

/// Body of a `get_job_response`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetJobResponse {
    pub endpoint:         String,
    pub job_status:       String,
    pub running:          bool,
    pub progress:         i32,
    pub successful:       bool,
    pub job_response_str: String,
    pub status_map:       BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Successful,
    Errored,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Errored | JobStatus::Cancelled
        )
    }
}

/// Client-side view of one server job
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id:        i64,
    pub status:        JobStatus,
    pub payload:       Option<Value>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// A freshly created job that has not been polled yet.
    pub fn pending(job_id: i64) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            payload: None,
            error_message: None,
        }
    }

    /// Folds one poll result into the record.
    ///
    /// A terminal record does not change any more.
    pub fn observe(&mut self, response: GetJobResponse) -> ClientResult<()> {
        if self.status.is_terminal() {
            return Ok(());
        }
        if response.successful {
            let payload = serde_json::from_str(&response.job_response_str).context(ParseSnafu)?;
            self.payload = Some(payload);
            self.status = JobStatus::Successful;
        } else if response.running {
            self.status = JobStatus::Running;
        } else {
            match response.job_status.as_str() {
                "ERROR" => {
                    self.error_message = Some(
                        response
                            .status_map
                            .get("error_message")
                            .cloned()
                            .unwrap_or_default(),
                    );
                    self.status = JobStatus::Errored;
                }
                "CANCELLED" => self.status = JobStatus::Cancelled,
                other => {
                    return Err(ClientError::UnknownJobStatus {
                        job_id: self.job_id,
                        status: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The job's result once it is terminal, `None` while it still runs.
    pub fn outcome(&self) -> Option<ClientResult<Value>> {
        match self.status {
            JobStatus::Pending | JobStatus::Running => None,
            JobStatus::Successful => Some(Ok(self.payload.clone().unwrap_or(Value::Null))),
            JobStatus::Errored => Some(Err(ClientError::JobFailed {
                job_id:  self.job_id,
                message: self.error_message.clone().unwrap_or_default(),
            })),
            JobStatus::Cancelled => Some(Err(ClientError::JobCancelled {
                job_id: self.job_id,
            })),
        }
    }
}

impl Dispatcher {
    /// Runs `path` as a server-side job and waits for its result.
    ///
    /// The create and poll phases share one failover budget. After a
    /// failover the job is polled again if its id is known, otherwise it is
    /// created again.
    pub async fn submit_job(&self, path: &str, headers: &HeaderMap, body: &str) -> ClientResult<Value> {
        let create_body = serde_json::to_string(&CreateJobRequest {
            endpoint:         path,
            request_encoding: "json",
            data:             "",
            data_str:         body,
            options:          BTreeMap::new(),
        })
        .context(EncodeSnafu)?;

        let mut budget = FailoverBudget::new(self.ring());
        let mut record: Option<JobRecord> = None;
        loop {
            let address = self.ring().current().to_string();
            let attempt = match &record {
                None => {
                    self.attempt(&address, CREATE_JOB_ENDPOINT, headers, &create_body)
                        .await
                }
                Some(job) => {
                    let poll_body = serde_json::to_string(&GetJobRequest {
                        job_id:  job.job_id,
                        options: BTreeMap::new(),
                    })
                    .context(EncodeSnafu)?;
                    self.attempt(&address, GET_JOB_ENDPOINT, headers, &poll_body)
                        .await
                }
            };

            let payload = match attempt {
                Attempt::Done(result) => result?,
                Attempt::Failover(error) => {
                    budget.record(&address, error)?;
                    continue;
                }
            };

            match payload.data_type.as_str() {
                CREATE_JOB_RESPONSE => {
                    let created: CreateJobResponse =
                        serde_json::from_value(payload.data).context(ParseSnafu)?;
                    info!("Created job {} for {}", created.job_id, path);
                    record = Some(JobRecord::pending(created.job_id));
                }
                GET_JOB_RESPONSE => {
                    let response: GetJobResponse =
                        serde_json::from_value(payload.data).context(ParseSnafu)?;
                    let job = record.get_or_insert_with(|| JobRecord::pending(0));
                    job.observe(response)?;
                    if let Some(outcome) = job.outcome() {
                        info!("Job {} finished as {}", job.job_id, job.status);
                        return outcome;
                    }
                    debug!(
                        "Job {} still {}, polling again in {:?}",
                        job.job_id,
                        job.status,
                        self.poll_interval()
                    );
                    tokio::time::sleep(self.poll_interval()).await;
                }
                other => {
                    return Err(ClientError::UnexpectedResponse {
                        data_type: other.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::{
        ring::EndpointRing,
        transport::testing::{ScriptedTransport, business_error, ok, status, unreachable},
    };

    fn dispatcher(transport: &ScriptedTransport, endpoints: usize) -> Dispatcher {
        let addresses = (0..endpoints).map(|i| format!("http://h{i}:9191")).collect();
        Dispatcher::new(
            Arc::new(EndpointRing::new(addresses, None).unwrap()),
            Arc::new(transport.clone()),
            None,
            DEFAULT_POLL_INTERVAL,
        )
    }

    fn created(job_id: i64) -> ClientResult<crate::types::HttpReply> {
        ok(CREATE_JOB_RESPONSE, json!({"job_id": job_id, "info": {}}))
    }

    fn running() -> ClientResult<crate::types::HttpReply> {
        ok(
            GET_JOB_RESPONSE,
            json!({"endpoint": "/alter/table", "job_status": "RUNNING", "running": true, "progress": 10, "successful": false, "job_response_str": "", "status_map": {}}),
        )
    }

    fn finished(result: Value) -> ClientResult<crate::types::HttpReply> {
        ok(
            GET_JOB_RESPONSE,
            json!({"endpoint": "/alter/table", "job_status": "DONE", "running": false, "progress": 100, "successful": true, "job_response_str": result.to_string(), "status_map": {}}),
        )
    }

    fn stopped(job_status: &str, error_message: &str) -> ClientResult<crate::types::HttpReply> {
        ok(
            GET_JOB_RESPONSE,
            json!({"job_status": job_status, "running": false, "successful": false, "status_map": {"error_message": error_message}}),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_converges_after_two_polls() {
        let transport = ScriptedTransport::new(vec![
            created(42),
            running(),
            running(),
            finished(json!({"table_name": "t", "action": "add_column"})),
        ]);
        let dispatcher = dispatcher(&transport, 2);
        let started = tokio::time::Instant::now();

        let data = dispatcher
            .submit_job("/alter/table", &HeaderMap::new(), r#"{"table_name":"t"}"#)
            .await
            .unwrap();

        assert_eq!(data, json!({"table_name": "t", "action": "add_column"}));
        assert_eq!(started.elapsed(), DEFAULT_POLL_INTERVAL * 2);

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].url, "http://h0:9191/create/job");
        assert_eq!(calls[0].body["endpoint"], "/alter/table");
        assert_eq!(calls[0].body["request_encoding"], "json");
        assert_eq!(calls[0].body["data_str"], r#"{"table_name":"t"}"#);
        for poll in &calls[1..] {
            assert_eq!(poll.url, "http://h0:9191/get/job");
            assert_eq!(poll.body["job_id"], 42);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_error_carries_server_message() {
        let transport = ScriptedTransport::new(vec![created(7), stopped("ERROR", "boom")]);
        let dispatcher = dispatcher(&transport, 1);

        let err = dispatcher
            .submit_job("/alter/table/columns", &HeaderMap::new(), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::JobFailed { job_id: 7, .. }));
        assert!(err.to_string().contains("boom"));
        // No further polls after the terminal status
        assert_eq!(transport.calls().len(), 2);
    }

    #[test_case("CANCELLED", "Job was cancelled."; "cancelled")]
    #[test_case("WEIRD", "Unknown status: WEIRD"; "unknown")]
    #[tokio::test(start_paused = true)]
    async fn test_job_stopped_statuses(job_status: &str, expected: &str) {
        let transport = ScriptedTransport::new(vec![created(1), running(), stopped(job_status, "")]);
        let dispatcher = dispatcher(&transport, 1);

        let err = dispatcher
            .submit_job("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), expected);
        match job_status {
            "CANCELLED" => assert!(matches!(err, ClientError::JobCancelled { job_id: 1 })),
            _ => assert!(matches!(
                err,
                ClientError::UnknownJobStatus { job_id: 1, ref status } if status == job_status
            )),
        }
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failover_resumes_polling() {
        let transport = ScriptedTransport::new(vec![
            created(9),
            unreachable("h0"),
            finished(json!({"ok": true})),
        ]);
        let dispatcher = dispatcher(&transport, 3);

        let data = dispatcher
            .submit_job("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap();
        assert_eq!(data, json!({"ok": true}));
        assert_eq!(
            transport.urls(),
            vec![
                "http://h0:9191/create/job",
                "http://h0:9191/get/job",
                "http://h1:9191/get/job"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failover_recreates() {
        let transport = ScriptedTransport::new(vec![status(503), created(3), finished(json!(1))]);
        let dispatcher = dispatcher(&transport, 2);

        dispatcher
            .submit_job("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap();
        assert_eq!(
            transport.urls(),
            vec![
                "http://h0:9191/create/job",
                "http://h1:9191/create/job",
                "http://h1:9191/get/job"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_poll_share_budget() {
        // Two endpoints: one failure while creating and one while polling
        // spend the whole budget.
        let transport = ScriptedTransport::new(vec![
            unreachable("h0"),
            created(5),
            running(),
            unreachable("h1"),
        ]);
        let dispatcher = dispatcher(&transport, 2);

        let err = dispatcher
            .submit_job("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_business_error_and_unexpected_type() {
        let transport = ScriptedTransport::new(vec![business_error("no such table")]);
        let err = dispatcher(&transport, 2)
            .submit_job("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no such table");
        assert_eq!(transport.calls().len(), 1);

        let transport = ScriptedTransport::new(vec![ok("show_table_response", json!({}))]);
        let err = dispatcher(&transport, 1)
            .submit_job("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_endpoints_routed_from_submit() {
        let transport = ScriptedTransport::new(vec![created(2), finished(json!({"done": 1}))]);
        let data = dispatcher(&transport, 1)
            .submit("/alter/table", &HeaderMap::new(), "{}")
            .await
            .unwrap();
        assert_eq!(data, json!({"done": 1}));
        assert_eq!(transport.calls()[0].url, "http://h0:9191/create/job");
    }

    #[test]
    fn test_record_is_terminal_once_done() {
        let mut record = JobRecord::pending(1);
        assert!(record.outcome().is_none());

        record
            .observe(GetJobResponse {
                job_status: "CANCELLED".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.status.to_string(), "cancelled");

        record
            .observe(GetJobResponse {
                running: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(matches!(record.outcome(), Some(Err(ClientError::JobCancelled { job_id: 1 }))));
    }
}
