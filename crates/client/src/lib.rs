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

//! GPUdb Client Library
//!
//! Resilient request dispatch for a cluster of equivalent GPUdb endpoints.
//!
//! # Features
//!
//! - **Endpoint failover**: calls move round-robin across the cluster when
//!   an endpoint is unreachable, times out, or answers with an unusable
//!   HTTP status
//! - **Three submission modes**: blocking, non-blocking (async or callback),
//!   and job-wrapped for long-running endpoints
//! - **Record decoding**: optional conversion of `"Infinity"`,
//!   `"-Infinity"` and `"NaN"` to `null`
//! - **File transfer**: single-shot or multipart uploads with progress, and
//!   downloads
//! - **Comprehensive Error Handling**: Using snafu for structured error types
//!
//! # Examples
//!
//! ## Non-blocking
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use gpudb_client::{ClientOptions, GpudbClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GpudbClient::new(
//!         ["http://db1:9191", "http://db2:9191"],
//!         ClientOptions::default(),
//!     )?;
//!
//!     let columns = vec!["id".to_string(), "name".to_string()];
//!     let records = client
//!         .get_records_by_column("nodes", &columns, None, Some(1000), &BTreeMap::new())
//!         .await?;
//!     println!("{} records: {}", records.total_number_of_records, records.data);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Blocking
//!
//! ```rust,no_run
//! use gpudb_client::{ClientOptions, GpudbClient};
//! use serde_json::json;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GpudbClient::new(["http://db1:9191"], ClientOptions::default())?;
//!
//!     // Always runs as a server-side job and polls until it finishes
//!     let altered = client.submit_blocking(
//!         "/alter/table",
//!         &json!({"table_name": "t", "action": "refresh", "value": "", "options": {}}),
//!     )?;
//!     println!("{altered}");
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod decode;
pub mod dispatch;
pub mod headers;
pub mod job;
pub mod ring;
pub mod transport;
pub mod types;
pub mod upload;

// Re-export the main client types
pub use client::{
    ClientOptions, Completion, DEFAULT_CHUNK_SIZE, END_OF_SET, GpudbClient, RecordsByColumn,
    RequestEnvelope, Submission,
};
pub use decode::{decode_no_inf_nan, decode_regular, encode};
pub use dispatch::Dispatcher;
pub use headers::{HeaderContext, PROTECTED_HEADERS};
pub use job::{JobRecord, JobStatus};
pub use ring::EndpointRing;
pub use transport::{HttpTransport, Transport};
pub use types::{ClientError, ClientResult, HttpReply};
pub use upload::{DownloadedFile, FileHandler, MultipartOperation, UploadSession};
