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

//! Messages exchanged with the hub and their expected outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use uuid::Uuid;

/// Status the hub acknowledges a device to cloud message with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IotHubStatusCode {
    Ok,
    OkEmpty,
    BadFormat,
    Unauthorized,
    TooManyDevices,
    HubOrDeviceIdNotFound,
    PreconditionFailed,
    RequestEntityTooLarge,
    ThrottlingException,
    InternalServerError,
    ServerBusy,
    Error,
    MessageExpired,
    MessageCancelledOnClose,
}

/// Answer of the device to a received cloud to device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IotHubMessageResult {
    Complete,
    Abandon,
    Reject,
}

/// A message sent to or received from the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    properties: BTreeMap<String, String>,
    expiry: Option<Duration>,
}

impl Message {
    /// Creates a message with a random message id.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            message_id: Some(Uuid::new_v4().to_string()),
            correlation_id: None,
            properties: BTreeMap::new(),
            expiry: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    /// Time after which the hub drops the message instead of delivering it.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body if it's valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }
}

/// A message to send and the status its acknowledgement must have.
///
/// Error injection messages have no expected status, the hub may drop them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAndResult {
    pub message: Message,
    pub expected: Option<IotHubStatusCode>,
}

impl MessageAndResult {
    pub fn new(message: Message, expected: Option<IotHubStatusCode>) -> Self {
        Self { message, expected }
    }

    /// A plain telemetry message expecting [`IotHubStatusCode::OkEmpty`].
    pub fn normal() -> Self {
        Self::new(Message::new("test message"), Some(IotHubStatusCode::OkEmpty))
    }
}

/// Telemetry message carrying a counter and `num_keys` `key<i>=value<i>` properties.
pub fn telemetry_message(text: &str, count: usize, num_keys: usize) -> Message {
    (0..num_keys).fold(
        Message::new(text).with_property("messageCount", count.to_string()),
        |msg, i| msg.with_property(format!("key{i}"), format!("value{i}")),
    )
}
