// This file is part of IoT Hub E2E.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Observer of the connection status transitions reported by the device client.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::client::ConnectionStatusCallback;
use crate::error::HarnessError;

/// Interval the recorder is polled at while waiting for a recovery.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connected,
    DisconnectedRetrying,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatusChangeReason {
    ConnectionOk,
    ExpiredSasToken,
    BadCredential,
    RetryExpired,
    NoNetwork,
    CommunicationError,
    ClientClose,
}

/// A single transition, timestamped when recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatusUpdate {
    pub status: ConnectionStatus,
    pub reason: ConnectionStatusChangeReason,
    pub at: Instant,
}

/// Collects every status transition of a client.
#[derive(Debug, Clone, Default)]
pub struct StatusRecorder {
    updates: Arc<Mutex<Vec<ConnectionStatusUpdate>>>,
}

impl StatusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback to register on the device client.
    pub fn callback(&self) -> ConnectionStatusCallback {
        let recorder = self.clone();

        Arc::new(move |status, reason| recorder.record(status, reason))
    }

    pub fn record(&self, status: ConnectionStatus, reason: ConnectionStatusChangeReason) {
        debug!(?status, ?reason, "connection status changed");

        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ConnectionStatusUpdate {
                status,
                reason,
                at: Instant::now(),
            });
    }

    pub fn updates(&self) -> Vec<ConnectionStatusUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn saw(&self, status: ConnectionStatus) -> bool {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|update| update.status == status)
    }

    pub fn last(&self) -> Option<ConnectionStatus> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|update| update.status)
    }

    pub fn clear(&self) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Whether the client went through a retrying disconnection and has been connected, without
    /// further transitions, for at least `settle`.
    pub fn has_recovered(&self, settle: Duration) -> bool {
        let updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(retrying) = updates
            .iter()
            .position(|update| update.status == ConnectionStatus::DisconnectedRetrying)
        else {
            return false;
        };

        match updates.last() {
            Some(last) => {
                updates.len() > retrying + 1
                    && last.status == ConnectionStatus::Connected
                    && last.at.elapsed() >= settle
            }
            None => false,
        }
    }

    /// Waits for a retrying disconnection followed by a stable connection.
    #[instrument(skip(self))]
    pub async fn wait_for_recovery(
        &self,
        settle: Duration,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        let recovered = crate::tools::wait_until(timeout, POLL_INTERVAL, || {
            self.has_recovered(settle)
        })
        .await;

        if !recovered {
            return Err(HarnessError::timeout(
                format!(
                    "the connection to recover, last status {:?}",
                    self.last()
                ),
                timeout,
            ));
        }

        debug!("connection recovered");

        Ok(())
    }
}
