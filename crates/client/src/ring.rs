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

use std::sync::atomic::{AtomicUsize, Ordering};

use snafu::ensure;

use crate::types::{ClientResult, ValidationSnafu};

/// Round-robin list of interchangeable server addresses.
///
/// Membership is fixed at construction. The cursor is shared by every call
/// made through the same ring, so one call's failover also moves the next
/// call away from an endpoint that was just found unreachable.
#[derive(Debug)]
pub struct EndpointRing {
    addresses: Vec<String>,
    cursor:    AtomicUsize,
}

impl EndpointRing {
    /// Creates a ring starting at `initial`, or at 0 when `initial` is
    /// absent or out of range.
    pub fn new(addresses: Vec<String>, initial: Option<usize>) -> ClientResult<Self> {
        ensure!(
            !addresses.is_empty(),
            ValidationSnafu {
                message: "at least one endpoint address is required",
            }
        );
        let start = initial.filter(|i| *i < addresses.len()).unwrap_or(0);
        Ok(Self {
            addresses,
            cursor: AtomicUsize::new(start),
        })
    }

    /// Address under the cursor.
    pub fn current(&self) -> &str { &self.addresses[self.position()] }

    /// Moves the cursor forward, wrapping at the end, and returns the new
    /// current address.
    pub fn advance(&self) -> &str {
        let len = self.addresses.len();
        let previous = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        &self.addresses[(previous + 1) % len]
    }

    pub fn size(&self) -> usize { self.addresses.len() }

    pub fn position(&self) -> usize { self.cursor.load(Ordering::Acquire) }

    pub fn addresses(&self) -> &[String] { &self.addresses }
}
