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

//! Connection of a single matrix entry across the test cases of a suite.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::client::{ClientError, ClientFactory, IotHubClient};
use crate::config::DEFAULT_INTERTEST_DELAY_MS;
use crate::correlation::CorrelationDetails;
use crate::error::{HarnessError, Report};
use crate::matrix::TestMatrixEntry;
use crate::message::{IotHubStatusCode, MessageAndResult};
use crate::methods::DeviceEmulator;
use crate::tools::retry_with_delay;

/// How long to wait for the hub to acknowledge a message in the method suites.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Attempts to open the client before giving up.
pub const OPEN_ATTEMPTS: usize = 3;
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Client of a matrix entry, with its direct method responder.
///
/// The handle is either stopped or started, it starts stopped.
pub struct ConnectionHandle {
    entry: TestMatrixEntry,
    client: Box<dyn IotHubClient>,
    factory: Arc<dyn ClientFactory>,
    emulator: Arc<DeviceEmulator>,
    started: bool,
    intertest_delay: Duration,
}

impl ConnectionHandle {
    pub fn new(entry: TestMatrixEntry, factory: Arc<dyn ClientFactory>) -> Result<Self, ClientError> {
        let client = factory.create(
            entry.identity().connection_string(),
            entry.protocol(),
            entry.client_certificate(),
        )?;

        Ok(Self {
            entry,
            client,
            factory,
            emulator: Arc::new(DeviceEmulator::new()),
            started: false,
            intertest_delay: Duration::from_millis(DEFAULT_INTERTEST_DELAY_MS),
        })
    }

    /// Wait after releasing the handle, between two test cases.
    pub fn with_intertest_delay(mut self, delay: Duration) -> Self {
        self.intertest_delay = delay;
        self
    }

    pub fn entry(&self) -> &TestMatrixEntry {
        &self.entry
    }

    pub fn client(&self) -> &dyn IotHubClient {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> &mut dyn IotHubClient {
        self.client.as_mut()
    }

    pub fn emulator(&self) -> &Arc<DeviceEmulator> {
        &self.emulator
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Correlation details of the entry, for the assertions.
    pub fn correlation(&self, host_name: &str) -> CorrelationDetails {
        let identity = self.entry.identity();

        CorrelationDetails::new(
            host_name,
            identity.device_id(),
            identity.module_id().map(str::to_string),
            self.entry.protocol(),
        )
    }

    async fn open(&mut self) -> Result<(), ClientError> {
        retry_with_delay(
            OPEN_ATTEMPTS,
            OPEN_RETRY_DELAY,
            self.client.as_mut(),
            |client| client.open(),
        )
        .await
    }

    /// Opens the client, then subscribes to the direct methods and starts the twin.
    ///
    /// HTTPS has neither methods nor twin, only the connection is opened.
    #[instrument(skip_all, fields(entry = %self.entry))]
    pub async fn start(&mut self) -> Result<(), ClientError> {
        self.open().await?;
        self.started = true;

        if self.entry.protocol().is_stateful() {
            self.client
                .subscribe_to_methods(self.emulator.callback())
                .await?;

            self.client.start_twin().await?;
        }

        debug!("client started");

        Ok(())
    }

    /// Closes the client, if started.
    #[instrument(skip_all, fields(entry = %self.entry))]
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        if !self.started {
            return Ok(());
        }

        self.started = false;
        self.client.close().await?;

        debug!("client stopped");

        Ok(())
    }

    /// Restarts the client from a clean state.
    ///
    /// Errors while stopping are logged, a twin already initialized on start isn't an error.
    pub async fn reset(&mut self) -> Result<(), HarnessError> {
        if let Err(err) = self.stop().await {
            warn!(entry = %self.entry, error = %Report::new(&err), "couldn't stop the client");
        }

        self.client.clear_state();
        self.emulator.clear();

        match self.start().await {
            Ok(()) | Err(ClientError::TwinAlreadyInitialized) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Stops the client and waits the inter test delay.
    pub async fn release(&mut self) {
        if let Err(err) = self.stop().await {
            warn!(entry = %self.entry, error = %Report::new(&err), "couldn't stop the client");
        }

        tokio::time::sleep(self.intertest_delay).await;
    }

    /// Replaces the client with a new one, after the device was reset.
    #[instrument(skip_all, fields(entry = %self.entry))]
    pub async fn restart(&mut self, connection_string: &str) -> Result<(), HarnessError> {
        if let Err(err) = self.stop().await {
            warn!(error = %Report::new(&err), "couldn't stop the client");
        }

        self.client = self.factory.create(
            connection_string,
            self.entry.protocol(),
            self.entry.client_certificate(),
        )?;
        self.emulator.clear();

        self.start().await?;

        info!("client restarted");

        Ok(())
    }

    /// Sends the message and waits for the hub acknowledgement.
    ///
    /// With an expected status, not getting the acknowledgement in time or getting another status
    /// is a failure. Without, like for the error injection messages, the acknowledgement isn't
    /// guaranteed and its absence is only logged.
    #[instrument(skip_all, fields(entry = %self.entry, message_id = msg.message.message_id()))]
    pub async fn send_message_and_wait(
        &self,
        msg: &MessageAndResult,
        timeout: Duration,
    ) -> Result<Option<IotHubStatusCode>, HarnessError> {
        let sent = tokio::time::timeout(timeout, self.client.send_event(msg.message.clone())).await;

        let Some(expected) = msg.expected else {
            return match sent {
                Ok(Ok(status)) => Ok(Some(status)),
                Ok(Err(err)) => {
                    debug!(error = %Report::new(&err), "unacknowledged message");

                    Ok(None)
                }
                Err(_) => {
                    debug!("no acknowledgement");

                    Ok(None)
                }
            };
        };

        let status = sent
            .map_err(|_| HarnessError::timeout("the message acknowledgement", timeout))??;

        if status != expected {
            return Err(HarnessError::Assertion(format!(
                "expected {expected:?} but received {status:?} sending over {}",
                self.entry.protocol()
            )));
        }

        Ok(Some(status))
    }

    /// Sends the messages in order, stopping at the first failure.
    pub async fn send_messages(
        &self,
        messages: &[MessageAndResult],
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        for msg in messages {
            self.send_message_and_wait(msg, timeout).await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("entry", &self.entry)
            .field("started", &self.started)
            .field("intertest_delay", &self.intertest_delay)
            .finish_non_exhaustive()
    }
}
