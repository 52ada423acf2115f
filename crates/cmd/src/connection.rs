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
use gpudb_client::{ClientOptions, GpudbClient};
use gpudb_common::ConnectionSettings;
use snafu::{ResultExt, Whatever, ensure_whatever};
use tracing::debug;

/// Connection flags; each one overrides its `GPUDB_*` environment variable
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct ConnectionArgs {
    /// Endpoint URL; repeat or comma-separate for a cluster
    #[arg(long = "url", global = true, value_delimiter = ',')]
    urls: Vec<String>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Per-call timeout in milliseconds, 0 for none
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Start at this endpoint instead of a random one
    #[arg(long, global = true)]
    initial_index: Option<usize>,
}

impl ConnectionArgs {
    pub(crate) fn resolve(
        &self,
        settings: ConnectionSettings,
    ) -> Result<(Vec<String>, ClientOptions), Whatever> {
        let urls = if self.urls.is_empty() {
            settings.urls
        } else {
            self.urls.clone()
        };
        ensure_whatever!(
            !urls.is_empty(),
            "No endpoints configured; pass --url or set GPUDB_URLS"
        );

        let options = ClientOptions::builder()
            .maybe_username(self.username.clone().or(settings.username))
            .maybe_password(self.password.clone().or(settings.password))
            .maybe_timeout_ms(self.timeout_ms.or(settings.timeout_ms))
            .maybe_initial_index(self.initial_index)
            .build();
        Ok((urls, options))
    }

    pub(crate) fn connect(&self, settings: ConnectionSettings) -> Result<GpudbClient, Whatever> {
        let (urls, options) = self.resolve(settings)?;
        debug!("Connecting to {:?}", urls);
        GpudbClient::new(&urls, options).whatever_context("Failed to create GPUdb client")
    }
}
