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

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

/// Common result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error types
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// The HTTP client could not be constructed
    #[snafu(display("HTTP error: {source}"))]
    Http { source: reqwest::Error },

    /// An endpoint address is not an absolute URL
    #[snafu(display("Invalid URL '{url}': {source}"))]
    InvalidUrl {
        url:    String,
        source: url::ParseError,
    },

    /// A custom header was rejected at registration time
    #[snafu(display("Invalid header '{name}': {message}"))]
    InvalidHeader { name: String, message: String },

    /// Bad arguments detected before any network call
    #[snafu(display("Invalid argument: {message}"))]
    Validation { message: String },

    /// The request body could not be serialized
    #[snafu(display("Unable to encode request: {source}"))]
    Encode { source: serde_json::Error },

    /// Either layer of the response was not valid JSON
    #[snafu(display("Unable to parse response: {source}"))]
    Parse { source: serde_json::Error },

    /// A decoded payload had a shape that cannot be decoded
    #[snafu(display("Unable to parse response: {message}"))]
    MalformedPayload { message: String },

    /// The server answered with an `ERROR` envelope
    #[snafu(display("{message}"))]
    ServerError { message: String },

    /// The endpoint could not be reached or answered with an unusable status
    #[snafu(display("{message} ({url})"))]
    Transport { url: String, message: String },

    /// The per-call timeout elapsed
    #[snafu(display("Request timed out ({url})"))]
    Timeout { url: String },

    /// The server answered a job call with an unexpected data type
    #[snafu(display("Unexpected endpoint response: {data_type}"))]
    UnexpectedResponse { data_type: String },

    /// The job finished with an error
    #[snafu(display("Error during job execution: {message}"))]
    JobFailed { job_id: i64, message: String },

    /// The job was cancelled on the server
    #[snafu(display("Job was cancelled."))]
    JobCancelled { job_id: i64 },

    /// The job reported a terminal status this client does not know
    #[snafu(display("Unknown status: {status}"))]
    UnknownJobStatus { job_id: i64, status: String },

    /// A local file could not be read
    #[snafu(display("Failed to read '{}': {source}", path.display()))]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    /// The runtime backing a blocking call could not be started
    #[snafu(display("Failed to start runtime: {source}"))]
    Runtime { source: std::io::Error },
}

impl ClientError {
    /// Whether the error is a connectivity problem that moves the call to
    /// the next endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport { .. } | ClientError::Timeout { .. })
    }
}

/// Raw HTTP exchange handed back by a [`crate::transport::Transport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub reason: String,
    pub body:   String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            body: body.into(),
        }
    }

    /// Only 200 and 400 carry the server's own response envelope.
    pub fn has_envelope(&self) -> bool { self.status == 200 || self.status == 400 }
}

/// Outer response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    status:    String,
    #[serde(default)]
    message:   String,
    #[serde(default)]
    data_type: String,
    #[serde(default)]
    data_str:  String,
}

/// Successfully unwrapped response: the inner JSON layer and its type tag
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    pub data_type: String,
    pub data:      Value,
}

impl ResponsePayload {
    /// Unwraps both JSON layers of a response body.
    ///
    /// A well-formed `ERROR` envelope becomes [`ClientError::ServerError`].
    pub fn from_body(body: &str) -> ClientResult<Self> {
        let envelope: ResponseEnvelope = serde_json::from_str(body).context(ParseSnafu)?;
        if envelope.status != "OK" {
            return ServerSnafu {
                message: envelope.message,
            }
            .fail();
        }
        let data = serde_json::from_str(&envelope.data_str).context(ParseSnafu)?;
        Ok(Self {
            data_type: envelope.data_type,
            data,
        })
    }
}
