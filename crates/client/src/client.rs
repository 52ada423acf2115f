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

use std::{
    collections::BTreeMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bon::Builder;
use rand::Rng;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info};
use url::Url;

use crate::{
    decode,
    dispatch::Dispatcher,
    headers::HeaderContext,
    job::DEFAULT_POLL_INTERVAL,
    ring::EndpointRing,
    transport::{HttpTransport, Transport},
    types::{ClientResult, EncodeSnafu, InvalidUrlSnafu, ParseSnafu, ValidationSnafu},
    upload::FileHandler,
};

/// Files larger than this are uploaded in parts of this size.
pub const DEFAULT_CHUNK_SIZE: u64 = 60 * 1024 * 1024;

/// `limit` value meaning "every remaining record".
pub const END_OF_SET: i64 = -9999;

/// Connection options for [`GpudbClient`]
#[derive(Debug, Clone, Builder)]
pub struct ClientOptions {
    #[builder(into)]
    pub username:      Option<String>,
    #[builder(into)]
    pub password:      Option<String>,
    /// Per-call timeout in milliseconds; 0 disables it
    #[builder(default)]
    pub timeout_ms:    u64,
    /// Starting endpoint; random when absent, 0 when out of range
    pub initial_index: Option<usize>,
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size:    u64,
    #[builder(default)]
    pub force_infinity_nan_conversion_to_null: bool,
    #[builder(default)]
    pub http_headers:  BTreeMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self { Self::builder().build() }
}

/// Called exactly once with the outcome of a non-blocking submission
pub type Completion = Box<dyn FnOnce(ClientResult<Value>) + Send + 'static>;

/// A serialized request bound for one endpoint.
///
/// Without a callback the envelope is submitted in blocking mode.
pub struct RequestEnvelope {
    pub path:     String,
    pub body:     String,
    pub callback: Option<Completion>,
}

impl RequestEnvelope {
    pub fn new<R: Serialize>(path: impl Into<String>, request: &R) -> ClientResult<Self> {
        Ok(Self {
            path:     path.into(),
            body:     serde_json::to_string(request).context(EncodeSnafu)?,
            callback: None,
        })
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// What [`GpudbClient::submit_request`] did with an envelope
#[derive(Debug)]
pub enum Submission {
    /// Blocking envelope: the decoded response
    Completed(Value),
    /// Callback envelope: the task that will invoke the callback
    Spawned(JoinHandle<()>),
}

/// Column-oriented records returned by `/get/records/bycolumn`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordsByColumn {
    pub table_name:              String,
    pub response_schema_str:     String,
    /// Decoded `json_encoded_response`
    pub data:                    Value,
    pub total_number_of_records: i64,
    pub has_more_records:        bool,
    pub info:                    BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct GetRecordsByColumnRequest<'a> {
    table_name:   &'a str,
    column_names: &'a [String],
    offset:       i64,
    limit:        i64,
    encoding:     &'static str,
    options:      &'a BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GetRecordsByColumnResponse {
    table_name:              String,
    response_schema_str:     String,
    json_encoded_response:   Value,
    total_number_of_records: i64,
    has_more_records:        bool,
    info:                    BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct UploadFilesRequest<'a> {
    file_names: &'a [String],
    file_data:  &'a [String],
    options:    &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct DownloadFilesRequest<'a> {
    file_names:   &'a [String],
    read_offsets: &'a [i64],
    read_lengths: &'a [i64],
    options:      &'a BTreeMap<String, String>,
}

/// Client for a cluster of equivalent GPUdb endpoints
///
/// # Examples
///
/// ```rust,no_run
/// use gpudb_client::{ClientOptions, GpudbClient};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = ClientOptions::builder()
///         .username("admin")
///         .password("secret")
///         .timeout_ms(10_000)
///         .build();
///     let client = GpudbClient::new(["http://db1:9191", "http://db2:9191"], options)?;
///
///     let status = client
///         .submit("/show/system/status", &json!({"options": {}}))
///         .await?;
///     println!("{status}");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GpudbClient {
    dispatcher: Dispatcher,
    headers:    Arc<RwLock<HeaderContext>>,
    sanitize:   Arc<AtomicBool>,
    chunk_size: u64,
}

impl GpudbClient {
    /// Creates a client talking HTTP to `addresses`.
    ///
    /// # Errors
    /// Returns a `ClientError` if an address is not a URL, the list is
    /// empty, a configured header is protected, or the HTTP client cannot
    /// be built
    pub fn new<I, S>(addresses: I, options: ClientOptions) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_transport(addresses, options, Arc::new(HttpTransport::new()?))
    }

    /// Creates a client on top of a caller-supplied [`Transport`].
    pub fn with_transport<I, S>(
        addresses: I,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = addresses
            .into_iter()
            .map(|address| normalize_address(address.as_ref()))
            .collect::<ClientResult<Vec<_>>>()?;
        let initial = options
            .initial_index
            .or_else(|| (!addresses.is_empty()).then(|| rand::thread_rng().gen_range(0..addresses.len())));
        let ring = Arc::new(EndpointRing::new(addresses, initial)?);

        let mut headers = HeaderContext::new(options.username.as_deref(), options.password.as_deref());
        headers.replace(options.http_headers)?;

        let timeout = (options.timeout_ms > 0).then(|| Duration::from_millis(options.timeout_ms));
        info!(
            "Creating GPUdb client for {} endpoint(s), starting at {}",
            ring.size(),
            ring.current()
        );

        Ok(Self {
            dispatcher: Dispatcher::new(ring, transport, timeout, options.poll_interval),
            headers:    Arc::new(RwLock::new(headers)),
            sanitize:   Arc::new(AtomicBool::new(
                options.force_infinity_nan_conversion_to_null,
            )),
            chunk_size: options.chunk_size,
        })
    }

    /// Endpoint the next call will go to.
    pub fn url(&self) -> &str { self.dispatcher.ring().current() }

    pub fn urls(&self) -> &[String] { self.dispatcher.ring().addresses() }

    pub fn ring(&self) -> &EndpointRing { self.dispatcher.ring() }

    // -- Headers ------------------------------------------------------------

    /// Registers a custom header sent with every later request.
    ///
    /// # Errors
    /// Returns a `ClientError::InvalidHeader` for protected or malformed
    /// headers; nothing is stored in that case
    pub fn add_http_header(&self, name: &str, value: &str) -> ClientResult<()> {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(name, value)
    }

    pub fn remove_http_header(&self, name: &str) -> ClientResult<()> {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Replaces every custom header at once.
    pub fn set_http_headers(&self, headers: BTreeMap<String, String>) -> ClientResult<()> {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(headers)
    }

    /// Copy of the custom headers.
    pub fn http_headers(&self) -> BTreeMap<String, String> {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .custom()
            .clone()
    }

    fn header_map(&self) -> ClientResult<HeaderMap> {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .header_map()
    }

    // -- Decoding -----------------------------------------------------------

    pub fn force_infinity_nan_conversion_to_null(&self) -> bool { self.sanitize.load(Ordering::Acquire) }

    /// Switches record decoding between literal and non-finite-to-null
    /// modes. Calls already started, including those still waiting on the
    /// network, keep the mode they started with.
    pub fn set_force_infinity_nan_conversion_to_null(&self, value: bool) {
        self.sanitize.store(value, Ordering::Release);
    }

    /// Decodes a record payload with the current mode.
    pub fn decode(&self, payload: &Value) -> ClientResult<Value> {
        decode::decode(payload, self.force_infinity_nan_conversion_to_null())
    }

    // -- Submission ---------------------------------------------------------

    /// Submits an envelope: blocking without a callback, spawned on the
    /// current Tokio runtime with one.
    ///
    /// # Errors
    /// Blocking envelopes return their request error. Callback envelopes
    /// fail here only when no Tokio runtime is available; every later
    /// outcome goes to the callback.
    pub fn submit_request(&self, envelope: RequestEnvelope) -> ClientResult<Submission> {
        let RequestEnvelope {
            path,
            body,
            callback,
        } = envelope;
        let headers = self.header_map()?;

        match callback {
            None => self
                .dispatcher
                .submit_blocking(&path, &headers, &body)
                .map(Submission::Completed),
            Some(callback) => self
                .spawn(path, headers, body, callback)
                .map(Submission::Spawned),
        }
    }

    fn spawn(
        &self,
        path: String,
        headers: HeaderMap,
        body: String,
        callback: Completion,
    ) -> ClientResult<JoinHandle<()>> {
        let handle = Handle::try_current().ok().context(ValidationSnafu {
            message: "callback submission requires a Tokio runtime",
        })?;
        let dispatcher = self.dispatcher.clone();
        debug!("Spawning non-blocking submission to {}", path);
        Ok(handle.spawn(async move {
            let result = dispatcher.submit(&path, &headers, &body).await;
            callback(result);
        }))
    }

    /// Serializes `request` and submits it on the caller's thread.
    pub fn submit_blocking<R: Serialize>(&self, path: &str, request: &R) -> ClientResult<Value> {
        let body = serde_json::to_string(request).context(EncodeSnafu)?;
        self.dispatcher
            .submit_blocking(path, &self.header_map()?, &body)
    }

    /// Serializes `request` and submits it without blocking.
    pub async fn submit<R: Serialize>(&self, path: &str, request: &R) -> ClientResult<Value> {
        let body = serde_json::to_string(request).context(EncodeSnafu)?;
        let headers = self.header_map()?;
        self.dispatcher.submit(path, &headers, &body).await
    }

    /// Runs `path` as a server-side job whatever the endpoint.
    pub async fn submit_job<R: Serialize>(&self, path: &str, request: &R) -> ClientResult<Value> {
        let body = serde_json::to_string(request).context(EncodeSnafu)?;
        let headers = self.header_map()?;
        self.dispatcher.submit_job(path, &headers, &body).await
    }

    /// Submits in the background and hands the outcome to `callback`.
    pub fn submit_with_callback<R, F>(&self, path: &str, request: &R, callback: F) -> ClientResult<JoinHandle<()>>
    where
        R: Serialize,
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        let body = serde_json::to_string(request).context(EncodeSnafu)?;
        self.spawn(path.to_string(), self.header_map()?, body, Box::new(callback))
    }

    // -- Endpoints ----------------------------------------------------------

    /// Reads `column_names` of `table_name`, decoding the embedded records
    /// with the decode mode in force when the call starts.
    pub async fn get_records_by_column(
        &self,
        table_name: &str,
        column_names: &[String],
        offset: Option<i64>,
        limit: Option<i64>,
        options: &BTreeMap<String, String>,
    ) -> ClientResult<RecordsByColumn> {
        let sanitize = self.force_infinity_nan_conversion_to_null();
        let request = GetRecordsByColumnRequest {
            table_name,
            column_names,
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(END_OF_SET),
            encoding: "json",
            options,
        };
        let data = self.submit("/get/records/bycolumn", &request).await?;
        let response: GetRecordsByColumnResponse = serde_json::from_value(data).context(ParseSnafu)?;

        Ok(RecordsByColumn {
            data:                    decode::decode(&response.json_encoded_response, sanitize)?,
            table_name:              response.table_name,
            response_schema_str:     response.response_schema_str,
            total_number_of_records: response.total_number_of_records,
            has_more_records:        response.has_more_records,
            info:                    response.info,
        })
    }

    /// Raw `/upload/files` call.
    pub async fn upload_files(
        &self,
        file_names: &[String],
        file_data: &[String],
        options: &BTreeMap<String, String>,
    ) -> ClientResult<Value> {
        let request = UploadFilesRequest {
            file_names,
            file_data,
            options,
        };
        self.submit("/upload/files", &request).await
    }

    /// Raw `/download/files` call.
    pub async fn download_files(
        &self,
        file_names: &[String],
        read_offsets: &[i64],
        read_lengths: &[i64],
        options: &BTreeMap<String, String>,
    ) -> ClientResult<Value> {
        let request = DownloadFilesRequest {
            file_names,
            read_offsets,
            read_lengths,
            options,
        };
        self.submit("/download/files", &request).await
    }

    /// File transfer helper using the configured chunk size.
    pub fn file_handler(&self) -> FileHandler<'_> { FileHandler::new(self, self.chunk_size) }
}

/// Validates an endpoint address and strips its trailing slash.
fn normalize_address(address: &str) -> ClientResult<String> {
    Url::parse(address).context(InvalidUrlSnafu { url: address })?;
    Ok(address.trim_end_matches('/').to_string())
}
