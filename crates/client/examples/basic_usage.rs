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

//! Basic usage example for the GPUdb client library
//!
//! Starts a small in-process stand-in for a GPUdb node, then drives it
//! through a two-endpoint client whose first endpoint is down, showing
//! failover, the three submission modes and record decoding.
//!
//! To run this example: `cargo run --example basic_usage`

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{Router, extract::Path, routing::post};
use gpudb_client::{ClientOptions, GpudbClient};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{Level, info};

fn envelope(data_type: &str, data: Value) -> String {
    json!({
        "status": "OK",
        "message": "",
        "data_type": data_type,
        "data_str": data.to_string(),
    })
    .to_string()
}

/// Answers just enough of the protocol for this example
async fn node(polls: Arc<AtomicUsize>, path: String, body: String) -> String {
    match path.as_str() {
        "create/job" => envelope("create_job_response", json!({"job_id": 1, "info": {}})),
        "get/job" => {
            let done = polls.fetch_add(1, Ordering::SeqCst) >= 1;
            envelope(
                "get_job_response",
                json!({
                    "job_status": if done { "DONE" } else { "RUNNING" },
                    "running": !done,
                    "successful": done,
                    "job_response_str": json!({"table_name": "readings"}).to_string(),
                }),
            )
        }
        "get/records/bycolumn" => envelope(
            "get_records_by_column_response",
            json!({
                "table_name": "readings",
                "json_encoded_response": "{\"column_1\": [\"s1\", \"s2\"], \"column_2\": [23.5, \"NaN\"]}",
                "total_number_of_records": 2,
                "has_more_records": false,
            }),
        ),
        _ => envelope("echo_response", json!({"path": path, "request": body})),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting embedded GPUdb stand-in...");
    let polls = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/{*path}",
        post(move |Path(path): Path<String>, body: String| node(polls.clone(), path, body)),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let live = format!("http://{}", listener.local_addr()?);
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // Nothing listens on port 9; every call there fails over to the live node
    let options = ClientOptions::builder()
        .initial_index(0)
        .username("admin")
        .password("secret")
        .timeout_ms(2_000)
        .poll_interval(Duration::from_millis(200))
        .build();
    let client = GpudbClient::new(["http://127.0.0.1:9", live.as_str()], options)?;

    info!("Non-blocking submission...");
    let status = client
        .submit("/show/system/status", &json!({"options": {}}))
        .await?;
    info!("Status from {}: {}", client.url(), status);

    info!("Callback submission...");
    let handle = client.submit_with_callback("/show/table", &json!({"table_name": "readings"}), |result| {
        match result {
            Ok(data) => info!("Callback received {}", data),
            Err(e) => eprintln!("Callback received error: {e}"),
        }
    })?;
    handle.await?;

    info!("Job-wrapped submission...");
    let altered = client
        .submit("/alter/table", &json!({"table_name": "readings", "action": "refresh"}))
        .await?;
    info!("Job finished with {}", altered);

    info!("Reading records with non-finite values as null...");
    client.set_force_infinity_nan_conversion_to_null(true);
    let columns = vec!["sensor".to_string(), "value".to_string()];
    let records = client
        .get_records_by_column("readings", &columns, None, None, &BTreeMap::new())
        .await?;
    info!("{} records: {}", records.total_number_of_records, records.data);

    info!("Blocking submission from a plain thread...");
    let blocking = client.clone();
    let echoed = std::thread::spawn(move || blocking.submit_blocking("/show/table", &json!({"table_name": "readings"})))
        .join()
        .map_err(|_| "blocking thread panicked")??;
    info!("Blocking call returned {}", echoed);

    info!("Examples completed successfully!");
    server_handle.abort();
    Ok(())
}
