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

use std::path::{Path, PathBuf};

use clap::Args;
use gpudb_client::GpudbClient;
use snafu::{OptionExt, ResultExt, Whatever};
use tracing::info;

#[derive(Debug, Clone, Args)]
#[command(
    name = "download",
    about = "Download KiFS files into a local directory",
    long_about = "Download whole KiFS files into a local directory, keeping their base names.

Examples:
  gpudb download kifs/staging/data.csv
  gpudb download kifs/a.csv kifs/b.csv --output-dir ./out"
)]
pub(crate) struct DownloadArgs {
    /// Remote KiFS file paths
    #[arg(required = true)]
    files: Vec<String>,

    /// Local directory to write into
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

/// Run the download command
pub(crate) async fn run(client: GpudbClient, args: DownloadArgs) -> Result<(), Whatever> {
    let files = client
        .file_handler()
        .download(&args.files)
        .await
        .whatever_context("Download failed")?;

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .whatever_context(format!("Failed to create {}", args.output_dir.display()))?;

    for file in files {
        let name = Path::new(&file.name)
            .file_name()
            .whatever_context(format!("Remote path '{}' has no file name", file.name))?;
        let target = args.output_dir.join(name);
        tokio::fs::write(&target, &file.data)
            .await
            .whatever_context(format!("Failed to write {}", target.display()))?;
        info!("Wrote {} ({} bytes)", target.display(), file.data.len());
    }
    Ok(())
}
