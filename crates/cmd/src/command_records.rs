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

use std::collections::BTreeMap;

use clap::Args;
use gpudb_client::GpudbClient;
use snafu::{ResultExt, Whatever};
use tracing::info;

#[derive(Debug, Clone, Args)]
#[command(
    name = "records",
    about = "Read table columns through /get/records/bycolumn",
    long_about = "Read table columns as JSON.

Examples:
  gpudb records graph_nodes --columns id,name
  gpudb records graph_nodes -c id,score --offset 100 --limit 50 --sanitize"
)]
pub(crate) struct RecordsArgs {
    /// Table to read
    table: String,

    /// Columns to return
    #[arg(short, long, required = true, value_delimiter = ',')]
    columns: Vec<String>,

    #[arg(long)]
    offset: Option<i64>,

    /// Maximum records; all remaining when omitted
    #[arg(long)]
    limit: Option<i64>,

    /// Return Infinity, -Infinity and NaN values as null
    #[arg(long)]
    sanitize: bool,
}

/// Run the records command
pub(crate) async fn run(client: GpudbClient, args: RecordsArgs) -> Result<(), Whatever> {
    client.set_force_infinity_nan_conversion_to_null(args.sanitize);

    let records = client
        .get_records_by_column(
            &args.table,
            &args.columns,
            args.offset,
            args.limit,
            &BTreeMap::new(),
        )
        .await
        .whatever_context(format!("Failed to read records from {}", args.table))?;

    info!(
        "Read {} of {} record(s) from {}{}",
        args.limit.map_or_else(|| "all".to_string(), |limit| limit.to_string()),
        records.total_number_of_records,
        records.table_name,
        if records.has_more_records { ", more available" } else { "" }
    );
    let pretty =
        serde_json::to_string_pretty(&records.data).whatever_context("Failed to format records")?;
    println!("{pretty}");
    Ok(())
}
