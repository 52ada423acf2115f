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

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, header::HeaderMap};
use snafu::ResultExt;
use tracing::debug;

use crate::types::{ClientError, ClientResult, HttpReply, HttpSnafu};

/// One HTTP POST against one endpoint.
///
/// Implementations report connectivity problems as
/// [`ClientError::Transport`] or [`ClientError::Timeout`]; any HTTP status,
/// including 5xx, is a reply.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: String,
        timeout: Option<Duration>,
    ) -> ClientResult<HttpReply>;
}

/// [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    /// Returns a `ClientError::Http` if the HTTP client cannot be built
    pub fn new() -> ClientResult<Self> {
        // System proxies are bypassed
        let client = Client::builder().no_proxy().build().context(HttpSnafu)?;
        Ok(Self { client })
    }
}

fn connectivity_error(url: &str, error: &reqwest::Error) -> ClientError {
    debug!("Request to {} failed: {:?}", url, error);
    if error.is_timeout() {
        ClientError::Timeout {
            url: url.to_string(),
        }
    } else {
        ClientError::Transport {
            url:     url.to_string(),
            message: "Request failed".to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: String,
        timeout: Option<Duration>,
    ) -> ClientResult<HttpReply> {
        let mut request = self.client.post(url).headers(headers).body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| connectivity_error(url, &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| connectivity_error(url, &e))?;

        debug!("POST {} answered {}", url, status);
        Ok(HttpReply {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}
