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

use clap::Args;
use gpudb_client::GpudbClient;
use serde_json::Value;
use snafu::{ResultExt, Whatever};
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Clone, Args)]
#[command(
    name = "request",
    about = "Send a raw JSON request to an endpoint",
    long_about = "Send a JSON request body to any endpoint, failing over across the cluster.

Examples:
  gpudb request /show/system/status
  gpudb request /show/table --body '{\"table_name\": \"t\", \"options\": {}}'
  gpudb request /alter/table --body '{\"table_name\": \"t\", \"action\": \"refresh\"}'
  gpudb request /clear/table --job --body '{\"table_name\": \"t\"}'"
)]
pub(crate) struct RequestArgs {
    /// Endpoint path, e.g. /show/table
    path: String,

    /// JSON request body
    #[arg(short, long, default_value = "{}")]
    body: String,

    /// Run as a server-side job and poll until it finishes
    #[arg(long, conflicts_with = "blocking")]
    job: bool,

    /// Submit on a blocking worker thread
    #[arg(long)]
    blocking: bool,
}

/// Run the request command
pub(crate) async fn run(client: GpudbClient, args: RequestArgs) -> Result<(), Whatever> {
    let body: Value =
        serde_json::from_str(&args.body).whatever_context("Request body is not valid JSON")?;
    info!("Sending {} to {}", args.path, client.url());

    let result = if args.blocking {
        // Blocking mode refuses to run on a thread that has a runtime context
        let (tx, rx) = oneshot::channel();
        let path = args.path.clone();
        std::thread::spawn(move || {
            let _ = tx.send(client.submit_blocking(&path, &body));
        });
        rx.await
            .whatever_context("Blocking submission did not complete")?
    } else if args.job {
        client.submit_job(&args.path, &body).await
    } else {
        client.submit(&args.path, &body).await
    };
    let response = result.whatever_context(format!("Request to {} failed", args.path))?;

    let pretty =
        serde_json::to_string_pretty(&response).whatever_context("Failed to format response")?;
    println!("{pretty}");
    Ok(())
}
