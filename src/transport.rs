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

//! Transport protocols, authentication types and client roles the matrix is built from.

use std::fmt::Display;

/// Transport protocol used by the device client.
///
/// The declaration order is the iteration order of [`TransportProtocol::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    Https,
    Mqtt,
    MqttWs,
    Amqps,
    AmqpsWs,
}

impl TransportProtocol {
    pub const ALL: [TransportProtocol; 5] = [
        TransportProtocol::Https,
        TransportProtocol::Mqtt,
        TransportProtocol::MqttWs,
        TransportProtocol::Amqps,
        TransportProtocol::AmqpsWs,
    ];

    /// Protocols that can carry direct methods and cloud to device messages.
    pub const STATEFUL: [TransportProtocol; 4] = [
        TransportProtocol::Mqtt,
        TransportProtocol::MqttWs,
        TransportProtocol::Amqps,
        TransportProtocol::AmqpsWs,
    ];

    /// Returns true if the protocol is tunneled over WebSockets.
    pub fn is_websocket(self) -> bool {
        matches!(self, TransportProtocol::MqttWs | TransportProtocol::AmqpsWs)
    }

    pub fn is_mqtt(self) -> bool {
        matches!(self, TransportProtocol::Mqtt | TransportProtocol::MqttWs)
    }

    pub fn is_amqp(self) -> bool {
        matches!(self, TransportProtocol::Amqps | TransportProtocol::AmqpsWs)
    }

    /// Keeps a connection open, unlike HTTPS.
    pub fn is_stateful(self) -> bool {
        self != TransportProtocol::Https
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportProtocol::Https => "HTTPS",
            TransportProtocol::Mqtt => "MQTT",
            TransportProtocol::MqttWs => "MQTT_WS",
            TransportProtocol::Amqps => "AMQPS",
            TransportProtocol::AmqpsWs => "AMQPS_WS",
        }
    }
}

impl Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the identity authenticates with the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthenticationType {
    /// Shared access key.
    Sas,
    /// Self signed X.509 certificate registered by thumbprint.
    SelfSigned,
}

impl AuthenticationType {
    pub const ALL: [AuthenticationType; 2] =
        [AuthenticationType::Sas, AuthenticationType::SelfSigned];

    pub fn is_x509(self) -> bool {
        matches!(self, AuthenticationType::SelfSigned)
    }
}

impl Display for AuthenticationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthenticationType::Sas => write!(f, "SAS"),
            AuthenticationType::SelfSigned => write!(f, "SELF_SIGNED"),
        }
    }
}

/// Whether the client connects as a device or as a module of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClientRole {
    Device,
    Module,
}

impl Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientRole::Device => write!(f, "DeviceClient"),
            ClientRole::Module => write!(f, "ModuleClient"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_protocols() {
        let ws: Vec<TransportProtocol> = TransportProtocol::ALL
            .into_iter()
            .filter(|p| p.is_websocket())
            .collect();

        assert_eq!(ws, [TransportProtocol::MqttWs, TransportProtocol::AmqpsWs]);
    }

    #[test]
    fn protocol_families() {
        assert!(TransportProtocol::MqttWs.is_mqtt());
        assert!(!TransportProtocol::MqttWs.is_amqp());
        assert!(TransportProtocol::AmqpsWs.is_amqp());
        assert!(!TransportProtocol::Https.is_mqtt());
        assert!(!TransportProtocol::Https.is_amqp());
    }

    #[test]
    fn display_names() {
        let names: Vec<String> = TransportProtocol::ALL
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(names, ["HTTPS", "MQTT", "MQTT_WS", "AMQPS", "AMQPS_WS"]);
        assert_eq!(ClientRole::Module.to_string(), "ModuleClient");
        assert_eq!(AuthenticationType::SelfSigned.to_string(), "SELF_SIGNED");
    }
}
