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

use clap::{Parser, Subcommand};
use gpudb_common::{ConnectionSettings, LoggingOptions, logging};
use snafu::{ResultExt, Whatever};
use tracing::info;

mod command_download;
mod command_records;
mod command_request;
mod command_upload;
mod connection;

#[derive(Debug, Parser)]
#[command(
    name = "gpudb",
    about = "GPUdb cluster command line interface",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    connection: connection::ConnectionArgs,

    /// Log level used when RUST_LOG is unset
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Also write rotated log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a raw JSON request to an endpoint
    Request(command_request::RequestArgs),
    /// Upload local files into a KiFS directory
    Upload(command_upload::UploadArgs),
    /// Download KiFS files into a local directory
    Download(command_download::DownloadArgs),
    /// Read table columns through /get/records/bycolumn
    Records(command_records::RecordsArgs),
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    // Parse command line arguments
    let cli = Cli::parse();

    let _guard = logging::init(&LoggingOptions {
        level: cli.log_level.clone(),
        directory: cli.log_dir.clone(),
        ..LoggingOptions::default()
    })
    .whatever_context("Failed to initialize logging")?;

    info!("Starting gpudb version {}", env!("CARGO_PKG_VERSION"));

    let settings = ConnectionSettings::from_env().whatever_context("Failed to read connection settings")?;
    let client = cli.connection.connect(settings)?;

    // Execute the selected command
    match cli.command {
        Commands::Request(args) => {
            command_request::run(client, args).await?;
        }
        Commands::Upload(args) => {
            command_upload::run(client, args).await?;
        }
        Commands::Download(args) => {
            command_download::run(client, args).await?;
        }
        Commands::Records(args) => {
            command_records::run(client, args).await?;
        }
    }
    Ok(())
}
