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

//! Device client collaborator.
//!
//! The transport itself lives in the SDK under test, the harness only drives it through the
//! [`IotHubClient`] trait. A [`ClientFactory`] builds a client for a matrix entry.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::certificate::CertificateMaterial;
use crate::message::{IotHubMessageResult, IotHubStatusCode, Message};
use crate::methods::{MethodRequest, MethodResponse};
use crate::status::{ConnectionStatus, ConnectionStatusChangeReason};
use crate::transport::TransportProtocol;

/// Called for every cloud to device message the client receives.
pub type MessageCallback = Arc<dyn Fn(&Message) -> IotHubMessageResult + Send + Sync>;

/// Called on every connection status transition.
pub type ConnectionStatusCallback =
    Arc<dyn Fn(ConnectionStatus, ConnectionStatusChangeReason) + Send + Sync>;

/// Answers the direct methods invoked on the device.
pub type MethodCallback =
    Arc<dyn Fn(MethodRequest) -> BoxFuture<'static, MethodResponse> + Send + Sync>;

/// Errors returned by the device client.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The twin was already started on this client.
    #[error("the device twin is already initialized")]
    TwinAlreadyInitialized,
    #[error("the client isn't open")]
    NotOpen,
    #[error("the operation timed out")]
    Timeout,
    /// Error reported by the transport of the SDK.
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Desired and reported properties of a twin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinProperties {
    pub desired: Map<String, Value>,
    pub reported: Map<String, Value>,
}

/// Device or module client of the SDK under test.
#[async_trait]
pub trait IotHubClient: Send + Sync {
    async fn open(&mut self) -> Result<(), ClientError>;

    async fn close(&mut self) -> Result<(), ClientError>;

    /// Drops the state cached between two connections, like pending twin subscriptions.
    fn clear_state(&mut self);

    /// Sends a device to cloud message, resolving with the hub acknowledgement.
    async fn send_event(&self, message: Message) -> Result<IotHubStatusCode, ClientError>;

    fn set_message_callback(&mut self, callback: Option<MessageCallback>);

    fn set_connection_status_callback(&mut self, callback: Option<ConnectionStatusCallback>);

    async fn subscribe_to_methods(&mut self, callback: MethodCallback) -> Result<(), ClientError>;

    /// Starts the twin, [`ClientError::TwinAlreadyInitialized`] if already started.
    async fn start_twin(&mut self) -> Result<(), ClientError>;

    async fn get_twin(&self) -> Result<TwinProperties, ClientError>;

    async fn update_reported_properties(
        &self,
        properties: Map<String, Value>,
    ) -> Result<(), ClientError>;
}

/// Builds the device or module clients.
pub trait ClientFactory: Send + Sync {
    /// The certificate is given only for self signed identities.
    fn create(
        &self,
        connection_string: &str,
        protocol: TransportProtocol,
        certificate: Option<Arc<CertificateMaterial>>,
    ) -> Result<Box<dyn IotHubClient>, ClientError>;
}
