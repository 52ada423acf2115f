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

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use snafu::ensure;

use crate::types::{ClientError, ClientResult, InvalidHeaderSnafu};

/// Headers the client owns; custom headers may never replace them.
pub const PROTECTED_HEADERS: [&str; 4] = ["Accept", "Authorization", "Content-type", "X-Kinetica-Group"];

/// Authorization token plus the caller's custom headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderContext {
    authorization: String,
    custom:        BTreeMap<String, String>,
}

impl HeaderContext {
    /// Derives the Basic token; it stays empty when neither credential is
    /// given.
    pub fn new(username: Option<&str>, password: Option<&str>) -> Self {
        let username = username.unwrap_or_default();
        let password = password.unwrap_or_default();
        let authorization = if username.is_empty() && password.is_empty() {
            String::new()
        } else {
            format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
        };
        Self {
            authorization,
            custom: BTreeMap::new(),
        }
    }

    pub fn authorization(&self) -> &str { &self.authorization }

    pub fn is_protected(name: &str) -> bool {
        PROTECTED_HEADERS
            .iter()
            .any(|protected| protected.eq_ignore_ascii_case(name))
    }

    /// Registers a custom header, replacing any previous value.
    pub fn add(&mut self, name: &str, value: &str) -> ClientResult<()> {
        validate(name, value)?;
        self.custom.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Removes a custom header; unknown names are ignored.
    pub fn remove(&mut self, name: &str) -> ClientResult<()> {
        ensure!(
            !Self::is_protected(name),
            InvalidHeaderSnafu {
                name,
                message: "cannot remove a protected header",
            }
        );
        self.custom.remove(name);
        Ok(())
    }

    /// Replaces every custom header. Nothing changes if any entry is
    /// rejected.
    pub fn replace(&mut self, headers: BTreeMap<String, String>) -> ClientResult<()> {
        for (name, value) in &headers {
            validate(name, value)?;
        }
        self.custom = headers;
        Ok(())
    }

    pub fn custom(&self) -> &BTreeMap<String, String> { &self.custom }

    /// Builds the outgoing header set: content type, authorization when
    /// present, then the custom headers.
    pub fn header_map(&self) -> ClientResult<HeaderMap> {
        let mut map = HeaderMap::new();
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.authorization.is_empty() {
            let mut value = header_value(AUTHORIZATION.as_str(), &self.authorization)?;
            value.set_sensitive(true);
            map.insert(AUTHORIZATION, value);
        }
        for (name, value) in &self.custom {
            map.insert(header_name(name)?, header_value(name, value)?);
        }
        Ok(map)
    }
}

fn validate(name: &str, value: &str) -> ClientResult<()> {
    ensure!(
        !name.is_empty(),
        InvalidHeaderSnafu {
            name,
            message: "header name must be a non-empty string",
        }
    );
    ensure!(
        !HeaderContext::is_protected(name),
        InvalidHeaderSnafu {
            name,
            message: "cannot override a protected header",
        }
    );
    header_name(name)?;
    header_value(name, value)?;
    Ok(())
}

fn header_name(name: &str) -> ClientResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ClientError::InvalidHeader {
        name:    name.to_string(),
        message: e.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> ClientResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeader {
        name:    name.to_string(),
        message: e.to_string(),
    })
}
