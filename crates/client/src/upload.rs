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

//! File transfer to and from the server's file system.
//!
//! Files up to the chunk size go up in one `/upload/files` call. Larger
//! files use a multipart session: `init`, one `upload_part` per chunk in
//! order, then `complete`. Any failure after `init` cancels the session
//! before the error is returned.

use std::{collections::BTreeMap, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    client::GpudbClient,
    types::{ClientError, ClientResult, IoSnafu, ParseSnafu, ValidationSnafu},
};

const FILE_ENCODING: &str = "base64";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MultipartOperation {
    Init,
    UploadPart,
    Complete,
    Cancel,
}

/// One multipart upload, from `init` to `complete` or `cancel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub uuid:             String,
    /// Full remote path of the file
    pub destination_path: String,
    pub chunk_size:       u64,
    /// Parts sent so far; the next part gets `sequence + 1`
    pub sequence:         u64,
    pub total_chunks:     u64,
    file_size:            u64,
}

impl UploadSession {
    pub fn new(destination_path: impl Into<String>, file_size: u64, chunk_size: u64) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            destination_path: destination_path.into(),
            chunk_size,
            sequence: 0,
            total_chunks: file_size.div_ceil(chunk_size).max(1),
            file_size,
        }
    }

    /// Size of the next part, `None` once every part was sent.
    pub fn next_chunk_len(&self) -> Option<u64> {
        if self.sequence >= self.total_chunks {
            return None;
        }
        let sent = self.sequence * self.chunk_size;
        Some(self.chunk_size.min(self.file_size.saturating_sub(sent)))
    }

    /// Percentage of parts sent.
    pub fn progress(&self) -> f64 { self.sequence as f64 / self.total_chunks as f64 * 100.0 }

    fn options(&self, operation: MultipartOperation) -> BTreeMap<String, String> {
        let mut options = BTreeMap::from([
            ("file_encoding".to_string(), FILE_ENCODING.to_string()),
            ("multipart_upload_uuid".to_string(), self.uuid.clone()),
            ("multipart_operation".to_string(), operation.to_string()),
        ]);
        if operation == MultipartOperation::UploadPart {
            options.insert(
                "multipart_upload_part_number".to_string(),
                self.sequence.to_string(),
            );
        }
        options
    }
}

/// A file fetched with [`FileHandler::download`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DownloadFilesResponse {
    file_names: Vec<String>,
    file_data:  Vec<String>,
}

/// Uploads and downloads files through a [`GpudbClient`]
#[derive(Debug, Clone, Copy)]
pub struct FileHandler<'a> {
    client:     &'a GpudbClient,
    chunk_size: u64,
}

impl<'a> FileHandler<'a> {
    pub fn new(client: &'a GpudbClient, chunk_size: u64) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u64 { self.chunk_size }

    /// Checks a destination directory and makes sure it ends with `/`.
    pub fn parse_dir_destination(destination: &str) -> ClientResult<String> {
        ensure!(
            !destination.is_empty(),
            ValidationSnafu {
                message: "destination path cannot be empty",
            }
        );
        if destination.ends_with('/') {
            Ok(destination.to_string())
        } else {
            Ok(format!("{destination}/"))
        }
    }

    /// Uploads `files` into the `destination` directory, one after another.
    ///
    /// `progress` receives the percentage of parts sent for each file that
    /// goes through a multipart session. Returns one server response per
    /// file.
    pub async fn upload<P, F>(&self, files: &[P], destination: &str, mut progress: F) -> ClientResult<Vec<Value>>
    where
        P: AsRef<Path>,
        F: FnMut(f64),
    {
        ensure!(
            !files.is_empty(),
            ValidationSnafu {
                message: "no files specified",
            }
        );
        let destination = Self::parse_dir_destination(destination)?;
        let remote_names = files
            .iter()
            .map(|file| remote_name(&destination, file.as_ref()))
            .collect::<ClientResult<Vec<_>>>()?;

        let mut responses = Vec::with_capacity(files.len());
        for (file, remote) in files.iter().zip(remote_names) {
            let path = file.as_ref();
            let size = tokio::fs::metadata(path)
                .await
                .context(IoSnafu { path })?
                .len();

            let response = if size <= self.chunk_size {
                self.upload_whole(path, remote).await?
            } else {
                self.upload_multipart(path, remote, size, &mut progress)
                    .await?
            };
            responses.push(response);
        }
        Ok(responses)
    }

    async fn upload_whole(&self, path: &Path, remote: String) -> ClientResult<Value> {
        let data = tokio::fs::read(path).await.context(IoSnafu { path })?;
        debug!("Uploading {} ({} bytes) in one call", remote, data.len());

        let options = BTreeMap::from([("file_encoding".to_string(), FILE_ENCODING.to_string())]);
        self.client
            .upload_files(&[remote], &[STANDARD.encode(data)], &options)
            .await
    }

    async fn upload_multipart<F>(&self, path: &Path, remote: String, size: u64, progress: &mut F) -> ClientResult<Value>
    where
        F: FnMut(f64),
    {
        let mut session = UploadSession::new(remote, size, self.chunk_size);
        info!(
            "Starting multipart upload {} of {} in {} parts",
            session.uuid, session.destination_path, session.total_chunks
        );

        // Nothing to cancel if the session never started
        self.call(&session, MultipartOperation::Init, Vec::new())
            .await?;

        let result = match self.send_parts(path, &mut session, progress).await {
            Ok(()) => {
                self.call(&session, MultipartOperation::Complete, Vec::new())
                    .await
            }
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            warn!(
                "Multipart upload {} failed at part {}: {}",
                session.uuid, session.sequence, error
            );
            if let Err(cancel_error) = self
                .call(&session, MultipartOperation::Cancel, Vec::new())
                .await
            {
                warn!(
                    "Failed to cancel multipart upload {}: {}",
                    session.uuid, cancel_error
                );
            }
        }
        result
    }

    async fn send_parts<F>(&self, path: &Path, session: &mut UploadSession, progress: &mut F) -> ClientResult<()>
    where
        F: FnMut(f64),
    {
        let mut file = File::open(path).await.context(IoSnafu { path })?;
        while let Some(len) = session.next_chunk_len() {
            let mut chunk = vec![0u8; len as usize];
            file.read_exact(&mut chunk)
                .await
                .context(IoSnafu { path })?;

            session.sequence += 1;
            self.call(
                session,
                MultipartOperation::UploadPart,
                vec![STANDARD.encode(&chunk)],
            )
            .await?;
            debug!(
                "Uploaded part {}/{} of {}",
                session.sequence, session.total_chunks, session.uuid
            );
            progress(session.progress());
        }
        Ok(())
    }

    async fn call(
        &self,
        session: &UploadSession,
        operation: MultipartOperation,
        data: Vec<String>,
    ) -> ClientResult<Value> {
        self.client
            .upload_files(
                std::slice::from_ref(&session.destination_path),
                &data,
                &session.options(operation),
            )
            .await
    }

    /// Downloads whole files by their remote paths.
    pub async fn download(&self, file_names: &[String]) -> ClientResult<Vec<DownloadedFile>> {
        ensure!(
            !file_names.is_empty(),
            ValidationSnafu {
                message: "no files specified",
            }
        );
        let options = BTreeMap::from([("file_encoding".to_string(), FILE_ENCODING.to_string())]);
        let data = self
            .client
            .download_files(file_names, &[], &[], &options)
            .await?;
        let response: DownloadFilesResponse = serde_json::from_value(data).context(ParseSnafu)?;

        response
            .file_names
            .into_iter()
            .zip(response.file_data)
            .map(|(name, encoded)| -> ClientResult<DownloadedFile> {
                let data = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| ClientError::MalformedPayload {
                        message: format!("file '{name}' is not valid base64: {e}"),
                    })?;
                Ok(DownloadedFile { name, data })
            })
            .collect()
    }
}

fn remote_name(destination: &str, file: &Path) -> ClientResult<String> {
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .context(ValidationSnafu {
            message: format!("'{}' does not name a file", file.display()),
        })?;
    Ok(format!("{destination}{name}"))
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Arc};

    use serde_json::json;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    use super::*;
    use crate::{
        client::ClientOptions,
        transport::testing::{ScriptedTransport, business_error, ok},
    };

    const CHUNK: u64 = 4;

    fn client(transport: &ScriptedTransport) -> GpudbClient {
        let options = ClientOptions::builder()
            .initial_index(0)
            .chunk_size(CHUNK)
            .build();
        GpudbClient::with_transport(["http://a:9191"], options, Arc::new(transport.clone())).unwrap()
    }

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn uploaded() -> ClientResult<crate::types::HttpReply> {
        ok("upload_files_response", json!({"info": {}}))
    }

    fn operations(transport: &ScriptedTransport) -> Vec<String> {
        transport
            .calls()
            .iter()
            .map(|call| {
                call.body["options"]["multipart_operation"]
                    .as_str()
                    .unwrap_or("single")
                    .to_string()
            })
            .collect()
    }

    #[test_case("kifs", "kifs/"; "appends separator")]
    #[test_case("kifs/data/", "kifs/data/"; "keeps separator")]
    fn test_parse_dir_destination(input: &str, expected: &str) {
        assert_eq!(FileHandler::parse_dir_destination(input).unwrap(), expected);
    }

    #[test_case(10, 4, 3; "two and a half chunks")]
    #[test_case(8, 4, 2; "exact multiple")]
    #[test_case(0, 4, 1; "empty file")]
    fn test_session_chunk_count(size: u64, chunk: u64, expected: u64) {
        assert_eq!(UploadSession::new("d/f", size, chunk).total_chunks, expected);
    }

    #[tokio::test]
    async fn test_multipart_chunk_accounting() {
        let file = file_with(b"0123456789");
        let transport = ScriptedTransport::new(vec![
            uploaded(),
            uploaded(),
            uploaded(),
            uploaded(),
            ok("upload_files_response", json!({"info": {"done": "1"}})),
        ]);
        let client = client(&transport);
        let mut progress = Vec::new();

        let responses = client
            .file_handler()
            .upload(&[file.path()], "kifs/in", |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(responses, vec![json!({"info": {"done": "1"}})]);
        assert_eq!(
            operations(&transport),
            ["init", "upload_part", "upload_part", "upload_part", "complete"]
        );

        let calls = transport.calls();
        let uuid = calls[0].body["options"]["multipart_upload_uuid"].clone();
        let name = file.path().file_name().unwrap().to_str().unwrap();
        for (i, call) in calls.iter().enumerate() {
            assert_eq!(call.url, "http://a:9191/upload/files");
            assert_eq!(call.body["options"]["multipart_upload_uuid"], uuid);
            assert_eq!(call.body["file_names"], json!([format!("kifs/in/{name}")]));
            if (1..=3).contains(&i) {
                assert_eq!(
                    call.body["options"]["multipart_upload_part_number"],
                    i.to_string()
                );
            }
        }
        assert_eq!(calls[1].body["file_data"], json!([STANDARD.encode("0123")]));
        assert_eq!(calls[3].body["file_data"], json!([STANDARD.encode("89")]));

        assert_eq!(progress.len(), 3);
        assert!((progress[0] - 100.0 / 3.0).abs() < 1e-9);
        assert!((progress[1] - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(progress[2], 100.0);
    }

    #[tokio::test]
    async fn test_failed_part_cancels_once() {
        let file = file_with(b"0123456789");
        let transport = ScriptedTransport::new(vec![
            uploaded(),
            uploaded(),
            business_error("disk full"),
            uploaded(),
        ]);
        let client = client(&transport);
        let mut progress = Vec::new();

        let err = client
            .file_handler()
            .upload(&[file.path()], "kifs", |p| progress.push(p))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert_eq!(
            operations(&transport),
            ["init", "upload_part", "upload_part", "cancel"]
        );
        assert_eq!(progress.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_complete_cancels() {
        let file = file_with(b"01234");
        let transport = ScriptedTransport::new(vec![
            uploaded(),
            uploaded(),
            uploaded(),
            business_error("checksum mismatch"),
            business_error("unknown session"),
        ]);
        let client = client(&transport);

        let err = client
            .file_handler()
            .upload(&[file.path()], "kifs", |_| {})
            .await
            .unwrap_err();

        // The cancel failure is logged; the complete failure is returned
        assert_eq!(err.to_string(), "checksum mismatch");
        assert_eq!(
            operations(&transport),
            ["init", "upload_part", "upload_part", "complete", "cancel"]
        );
    }

    #[tokio::test]
    async fn test_failed_init_sends_nothing_else() {
        let file = file_with(b"0123456789");
        let transport = ScriptedTransport::new(vec![business_error("not allowed")]);
        let client = client(&transport);

        assert!(
            client
                .file_handler()
                .upload(&[file.path()], "kifs", |_| {})
                .await
                .is_err()
        );
        assert_eq!(operations(&transport), ["init"]);
    }

    #[tokio::test]
    async fn test_small_file_single_call() {
        let file = file_with(b"abcd");
        let transport = ScriptedTransport::new(vec![uploaded()]);
        let client = client(&transport);

        client
            .file_handler()
            .upload(&[file.path()], "kifs", |_| panic!("no progress for single uploads"))
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body["file_data"], json!([STANDARD.encode("abcd")]));
        assert_eq!(calls[0].body["options"], json!({"file_encoding": "base64"}));
    }

    #[tokio::test]
    async fn test_validation_before_network() {
        let file = file_with(b"abcd");
        let transport = ScriptedTransport::default();
        let client = client(&transport);
        let handler = client.file_handler();

        let empty: [&Path; 0] = [];
        assert!(matches!(
            handler.upload(&empty, "kifs", |_| {}).await,
            Err(ClientError::Validation { .. })
        ));
        assert!(matches!(
            handler.upload(&[file.path()], "", |_| {}).await,
            Err(ClientError::Validation { .. })
        ));
        assert!(matches!(
            handler.download(&[]).await,
            Err(ClientError::Validation { .. })
        ));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_download_decodes_files() {
        let transport = ScriptedTransport::new(vec![ok(
            "download_files_response",
            json!({"file_names": ["kifs/a.csv"], "file_data": [STANDARD.encode("x,y\n1,2\n")], "info": {}}),
        )]);
        let client = client(&transport);

        let files = client
            .file_handler()
            .download(&["kifs/a.csv".to_string()])
            .await
            .unwrap();
        assert_eq!(
            files,
            vec![DownloadedFile {
                name: "kifs/a.csv".to_string(),
                data: b"x,y\n1,2\n".to_vec(),
            }]
        );
        assert_eq!(transport.calls()[0].url, "http://a:9191/download/files");
    }
}
