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

use clap::Args;
use gpudb_client::{FileHandler, GpudbClient};
use snafu::{ResultExt, Whatever};
use tracing::info;

#[derive(Debug, Clone, Args)]
#[command(
    name = "upload",
    about = "Upload local files into a KiFS directory",
    long_about = "Upload local files into a KiFS directory. Files larger than the chunk size are sent in parts.

Examples:
  gpudb upload data.csv --destination kifs/staging
  gpudb upload a.parquet b.parquet -d kifs/staging/ --chunk-size 1048576"
)]
pub(crate) struct UploadArgs {
    /// Local files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Remote KiFS directory
    #[arg(short, long)]
    destination: String,

    /// Part size in bytes for multipart uploads
    #[arg(long)]
    chunk_size: Option<u64>,
}

/// Run the upload command
pub(crate) async fn run(client: GpudbClient, args: UploadArgs) -> Result<(), Whatever> {
    let handler = match args.chunk_size {
        Some(chunk_size) => FileHandler::new(&client, chunk_size),
        None => client.file_handler(),
    };
    info!(
        "Uploading {} file(s) to {} in parts of {} bytes",
        args.files.len(),
        args.destination,
        handler.chunk_size()
    );

    let responses = handler
        .upload(&args.files, &args.destination, |percent| {
            info!("Multipart upload {:.1}% complete", percent);
        })
        .await
        .whatever_context("Upload failed")?;

    info!("Uploaded {} file(s)", responses.len());
    Ok(())
}
