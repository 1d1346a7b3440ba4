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

//! Cloud to device messages.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::client::{ClientError, MessageCallback};
use crate::error::HarnessError;
use crate::error_injection::FollowUp;
use crate::lifecycle::ConnectionHandle;
use crate::message::{IotHubMessageResult, Message};
use crate::tools::wait_until;

pub const EXPECTED_CORRELATION_ID: &str = "1234";
pub const EXPECTED_MESSAGE_ID: &str = "5678";
/// Messages sent in a row by the back to back scenario.
pub const MAX_COMMANDS_TO_SEND: usize = 5;
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Service client sending the cloud to device messages.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn open(&self) -> Result<(), ClientError>;

    async fn send(&self, device_id: &str, message: Message) -> Result<(), ClientError>;

    async fn send_to_module(
        &self,
        device_id: &str,
        module_id: &str,
        message: Message,
    ) -> Result<(), ClientError>;
}

/// Application properties every service message carries.
pub fn expected_properties() -> BTreeMap<String, String> {
    (1..=3)
        .map(|i| (format!("name{i}"), format!("value{i}")))
        .collect()
}

/// Message with the expected properties, correlation and message id.
pub fn service_message(protocol_name: &str) -> Message {
    let message = Message::new(format!(
        "Rust service e2e test message to be received over {protocol_name} protocol"
    ))
    .with_correlation_id(EXPECTED_CORRELATION_ID)
    .with_message_id(EXPECTED_MESSAGE_ID);

    expected_properties()
        .into_iter()
        .fold(message, |message, (key, value)| {
            message.with_property(key, value)
        })
}

pub fn has_expected_properties(message: &Message, expected: &BTreeMap<String, String>) -> bool {
    expected
        .iter()
        .all(|(key, value)| message.property(key) == Some(value.as_str()))
}

pub fn has_expected_system_properties(message: &Message) -> bool {
    message.correlation_id() == Some(EXPECTED_CORRELATION_ID)
        && message.message_id() == Some(EXPECTED_MESSAGE_ID)
}

#[derive(Debug, Default)]
struct Received {
    fired: bool,
    matched: bool,
}

/// Records if the message callback fired and if the message was the expected one.
#[derive(Debug, Clone, Default)]
pub struct MessageReceivedTracker {
    state: Arc<Mutex<Received>>,
}

impl MessageReceivedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> MessageCallback {
        let tracker = self.clone();
        let expected = expected_properties();

        Arc::new(move |message: &Message| {
            let matched =
                has_expected_properties(message, &expected) && has_expected_system_properties(message);

            tracker.record(matched);

            IotHubMessageResult::Complete
        })
    }

    fn record(&self, matched: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.fired = true;
        state.matched = matched;
    }

    pub fn was_fired(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fired
    }

    pub fn matched(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .matched
    }

    /// Waits for the callback, then checks the message had the expected properties.
    pub async fn wait_for_message(&self, timeout: Duration) -> Result<(), HarnessError> {
        if !wait_until(timeout, POLL_INTERVAL, || self.was_fired()).await {
            return Err(HarnessError::timeout("the message to be received", timeout));
        }

        if !self.matched() {
            return Err(HarnessError::Assertion(
                "received message was missing expected properties".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct MessageIds {
    sent: Vec<String>,
    received: Vec<String>,
}

/// Message ids sent by the service and received by the device, cleared after every test case.
#[derive(Debug, Clone, Default)]
pub struct BackToBackTracker {
    ids: Arc<Mutex<MessageIds>>,
}

impl BackToBackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MessageIds> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn callback(&self) -> MessageCallback {
        let tracker = self.clone();

        Arc::new(move |message: &Message| {
            if let Some(id) = message.message_id() {
                tracker.lock().received.push(id.to_string());
            }

            IotHubMessageResult::Complete
        })
    }

    pub fn record_sent(&self, message_id: &str) {
        self.lock().sent.push(message_id.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    pub fn clear(&self) {
        let mut ids = self.lock();

        ids.sent.clear();
        ids.received.clear();
    }

    /// Waits until as many messages as sent are received, then checks every sent id arrived.
    pub async fn wait_for_all(&self, timeout: Duration) -> Result<(), HarnessError> {
        let arrived = wait_until(timeout, POLL_INTERVAL, || {
            let ids = self.lock();

            ids.received.len() >= ids.sent.len()
        })
        .await;

        if !arrived {
            return Err(HarnessError::timeout("the back to back messages", timeout));
        }

        let ids = self.lock();
        let missing: Vec<&String> = ids
            .sent
            .iter()
            .filter(|id| !ids.received.contains(id))
            .collect();

        if !missing.is_empty() {
            return Err(HarnessError::Assertion(format!(
                "received messages don't match up with sent messages, missing {missing:?}"
            )));
        }

        Ok(())
    }
}

async fn send_to_entry(
    service: &dyn ServiceClient,
    handle: &ConnectionHandle,
    message: Message,
) -> Result<(), ClientError> {
    let identity = handle.entry().identity();

    match identity.module_id() {
        Some(module_id) => {
            service
                .send_to_module(identity.device_id(), module_id, message)
                .await
        }
        None => service.send(identity.device_id(), message).await,
    }
}

/// Sends a message from the service and waits for the device to receive it.
#[instrument(skip_all, fields(entry = %handle.entry()))]
pub async fn receive_message(
    handle: &mut ConnectionHandle,
    service: &dyn ServiceClient,
    timeout: Duration,
) -> Result<(), HarnessError> {
    let tracker = MessageReceivedTracker::new();
    handle
        .client_mut()
        .set_message_callback(Some(tracker.callback()));

    let protocol = handle.entry().protocol();
    let res = async {
        service.open().await?;
        send_to_entry(service, handle, service_message(protocol.as_str())).await?;

        tracker.wait_for_message(timeout).await
    }
    .await;

    handle.client_mut().set_message_callback(None);

    res
}

/// Sends [`MAX_COMMANDS_TO_SEND`] messages in a row and waits for all of them.
#[instrument(skip_all, fields(entry = %handle.entry()))]
pub async fn receive_back_to_back(
    handle: &mut ConnectionHandle,
    service: &dyn ServiceClient,
    tracker: &BackToBackTracker,
    timeout: Duration,
) -> Result<(), HarnessError> {
    handle
        .client_mut()
        .set_message_callback(Some(tracker.callback()));

    let res = async {
        service.open().await?;

        for _ in 0..MAX_COMMANDS_TO_SEND {
            let id = Uuid::new_v4().to_string();
            let message = Message::new("back to back message").with_message_id(id.as_str());

            tracker.record_sent(&id);
            send_to_entry(service, handle, message).await?;
        }

        debug!("back to back messages sent");

        tracker.wait_for_all(timeout).await
    }
    .await;

    handle.client_mut().set_message_callback(None);

    res
}

/// Receives a message on the recovered connection.
pub struct ReceiveFollowUp {
    service: Arc<dyn ServiceClient>,
    timeout: Duration,
}

impl ReceiveFollowUp {
    pub fn new(service: Arc<dyn ServiceClient>) -> Self {
        Self {
            service,
            timeout: RECEIVE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FollowUp for ReceiveFollowUp {
    async fn check(&self, handle: &mut ConnectionHandle) -> Result<(), HarnessError> {
        receive_message(handle, self.service.as_ref(), self.timeout).await
    }
}
