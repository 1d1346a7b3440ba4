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

//! Faults injected through specially tagged telemetry messages.
//!
//! The hub drops the connection, a link or shuts the protocol down when it receives a message
//! carrying the fault properties. The flow checks the client goes through a retrying
//! disconnection and recovers.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::HarnessError;
use crate::lifecycle::ConnectionHandle;
use crate::message::{Message, MessageAndResult};
use crate::methods::{
    loopback_payload, MethodInvocation, MethodServiceClient, MethodTarget, METHOD_LOOPBACK,
    METHOD_SUCCESS, PAYLOAD_STRING,
};
use crate::status::{ConnectionStatus, StatusRecorder};
use crate::transport::{AuthenticationType, TransportProtocol};

pub const FAULT_OPERATION_TYPE: &str = "AzIoTHub_FaultOperationType";
pub const FAULT_OPERATION_CLOSE_REASON: &str = "AzIoTHub_FaultOperationCloseReason";
pub const FAULT_OPERATION_DELAY_IN_SECS: &str = "AzIoTHub_FaultOperationDelayInSecs";
pub const FAULT_OPERATION_DURATION_IN_SECS: &str = "AzIoTHub_FaultOperationDurationInSecs";

pub const FAULT_CLOSE_REASON: &str = "boom";
pub const DEFAULT_DELAY_IN_SECS: u32 = 1;
pub const DEFAULT_DURATION_IN_SECS: u32 = 10;

/// Expiry of the injection message, so the client doesn't resend it on every reconnection.
pub const INJECTION_MESSAGE_EXPIRY: Duration = Duration::from_millis(200);
pub const RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
/// The connection must stay up this long to be considered recovered.
pub const SETTLE_WINDOW: Duration = Duration::from_secs(2);
pub const SEND_TIMEOUT: Duration = Duration::from_millis(120_000);

pub const NUM_MESSAGES_PER_CONNECTION: usize = 6;
/// Position of the injection message in the lists of [`build_message_lists`].
pub const INJECTION_MESSAGE_INDEX: usize = NUM_MESSAGES_PER_CONNECTION / 2;

/// Fault the hub injects in the connection of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    TcpConnectionDrop,
    AmqpConnectionDrop,
    AmqpSessionDrop,
    AmqpCbsRequestLinkDrop,
    AmqpCbsResponseLinkDrop,
    AmqpD2cLinkDrop,
    AmqpC2dLinkDrop,
    AmqpMethodRequestLinkDrop,
    AmqpMethodResponseLinkDrop,
    AmqpTwinRequestLinkDrop,
    AmqpTwinResponseLinkDrop,
    AmqpGracefulShutdown,
    MqttGracefulShutdown,
}

impl FaultKind {
    pub const ALL: [FaultKind; 13] = [
        FaultKind::TcpConnectionDrop,
        FaultKind::AmqpConnectionDrop,
        FaultKind::AmqpSessionDrop,
        FaultKind::AmqpCbsRequestLinkDrop,
        FaultKind::AmqpCbsResponseLinkDrop,
        FaultKind::AmqpD2cLinkDrop,
        FaultKind::AmqpC2dLinkDrop,
        FaultKind::AmqpMethodRequestLinkDrop,
        FaultKind::AmqpMethodResponseLinkDrop,
        FaultKind::AmqpTwinRequestLinkDrop,
        FaultKind::AmqpTwinResponseLinkDrop,
        FaultKind::AmqpGracefulShutdown,
        FaultKind::MqttGracefulShutdown,
    ];

    /// Value of the fault operation type property.
    pub fn operation_type(self) -> &'static str {
        match self {
            FaultKind::TcpConnectionDrop => "KillTcp",
            FaultKind::AmqpConnectionDrop => "KillAmqpConnection",
            FaultKind::AmqpSessionDrop => "KillAmqpSession",
            FaultKind::AmqpCbsRequestLinkDrop => "KillAmqpCBSLinkReq",
            FaultKind::AmqpCbsResponseLinkDrop => "KillAmqpCBSLinkResp",
            FaultKind::AmqpD2cLinkDrop => "KillAmqpD2CLink",
            FaultKind::AmqpC2dLinkDrop => "KillAmqpC2DLink",
            FaultKind::AmqpMethodRequestLinkDrop => "KillAmqpMethodReqLink",
            FaultKind::AmqpMethodResponseLinkDrop => "KillAmqpMethodRespLink",
            FaultKind::AmqpTwinRequestLinkDrop => "KillAmqpTwinLinkReq",
            FaultKind::AmqpTwinResponseLinkDrop => "KillAmqpTwinLinkResp",
            FaultKind::AmqpGracefulShutdown => "ShutDownAmqp",
            FaultKind::MqttGracefulShutdown => "ShutDownMqtt",
        }
    }

    fn is_amqp_only(self) -> bool {
        !matches!(
            self,
            FaultKind::TcpConnectionDrop | FaultKind::MqttGracefulShutdown
        )
    }

    fn is_method_or_twin_link(self) -> bool {
        matches!(
            self,
            FaultKind::AmqpMethodRequestLinkDrop
                | FaultKind::AmqpMethodResponseLinkDrop
                | FaultKind::AmqpTwinRequestLinkDrop
                | FaultKind::AmqpTwinResponseLinkDrop
        )
    }

    /// Whether the fault can be injected, and reliably recovered from, on the connection.
    ///
    /// CBS links only exist with SAS authentication. The C2D link drop with X.509 and the method
    /// and twin link drops on AMQPS with a self signed certificate are skipped since they
    /// don't recover reliably.
    pub fn applies_to(self, protocol: TransportProtocol, auth: AuthenticationType) -> bool {
        match self {
            FaultKind::TcpConnectionDrop => protocol.is_stateful(),
            FaultKind::MqttGracefulShutdown => protocol.is_mqtt(),
            _ if self.is_amqp_only() && !protocol.is_amqp() => false,
            FaultKind::AmqpCbsRequestLinkDrop
            | FaultKind::AmqpCbsResponseLinkDrop
            | FaultKind::AmqpC2dLinkDrop => auth == AuthenticationType::Sas,
            _ if self.is_method_or_twin_link() => {
                !(protocol == TransportProtocol::Amqps && auth == AuthenticationType::SelfSigned)
            }
            _ => true,
        }
    }

    /// Message that injects the fault.
    pub fn message(self, delay_in_secs: u32, duration_in_secs: u32) -> Message {
        Message::new(format!("{} error injection", self.operation_type()))
            .with_property(FAULT_OPERATION_TYPE, self.operation_type())
            .with_property(FAULT_OPERATION_CLOSE_REASON, FAULT_CLOSE_REASON)
            .with_property(FAULT_OPERATION_DELAY_IN_SECS, delay_in_secs.to_string())
            .with_property(
                FAULT_OPERATION_DURATION_IN_SECS,
                duration_in_secs.to_string(),
            )
            .with_expiry(INJECTION_MESSAGE_EXPIRY)
    }

    /// The injection message with the default delay and duration.
    pub fn default_message(self) -> Message {
        self.message(DEFAULT_DELAY_IN_SECS, DEFAULT_DURATION_IN_SECS)
    }
}

impl Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.operation_type())
    }
}

/// For every fault, the messages to send on a single connection.
///
/// The injection message is in the middle and isn't expected to be acknowledged, the others
/// expect [`OkEmpty`](crate::message::IotHubStatusCode::OkEmpty).
pub fn build_message_lists() -> Vec<(FaultKind, Vec<MessageAndResult>)> {
    FaultKind::ALL
        .iter()
        .map(|&fault| (fault, message_list(fault)))
        .collect()
}

/// Messages for a single fault, see [`build_message_lists`].
pub fn message_list(fault: FaultKind) -> Vec<MessageAndResult> {
    (0..NUM_MESSAGES_PER_CONNECTION)
        .map(|i| {
            if i == INJECTION_MESSAGE_INDEX {
                MessageAndResult::new(fault.default_message(), None)
            } else {
                MessageAndResult::normal()
            }
        })
        .collect()
}

/// Messages sent on a connection without faults.
pub fn normal_message_list() -> Vec<MessageAndResult> {
    std::iter::repeat_with(MessageAndResult::normal)
        .take(NUM_MESSAGES_PER_CONNECTION)
        .collect()
}

/// Result of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    Recovered,
    /// The fault doesn't apply to the protocol and authentication of the entry.
    Skipped,
}

/// Check run on the recovered connection.
#[async_trait]
pub trait FollowUp: Send + Sync {
    async fn check(&self, handle: &mut ConnectionHandle) -> Result<(), HarnessError>;
}

/// Sends a normal telemetry message.
#[derive(Debug, Clone, Copy)]
pub struct SendFollowUp {
    pub timeout: Duration,
}

impl Default for SendFollowUp {
    fn default() -> Self {
        Self {
            timeout: SEND_TIMEOUT,
        }
    }
}

#[async_trait]
impl FollowUp for SendFollowUp {
    async fn check(&self, handle: &mut ConnectionHandle) -> Result<(), HarnessError> {
        handle
            .send_message_and_wait(&MessageAndResult::normal(), self.timeout)
            .await?;

        Ok(())
    }
}

/// Invokes the loopback method on the recovered device.
pub struct MethodFollowUp {
    service: Arc<dyn MethodServiceClient>,
}

impl MethodFollowUp {
    pub fn new(service: Arc<dyn MethodServiceClient>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl FollowUp for MethodFollowUp {
    async fn check(&self, handle: &mut ConnectionHandle) -> Result<(), HarnessError> {
        let target = MethodTarget::from(handle.entry().identity().as_ref());
        let invocation =
            MethodInvocation::with_default_timeouts(METHOD_LOOPBACK).with_payload(PAYLOAD_STRING);

        let result = self.service.invoke(&target, invocation).await?;

        let expected = loopback_payload(Some(&PAYLOAD_STRING.into()));
        if result.status != METHOD_SUCCESS || result.payload_str() != Some(expected.as_str()) {
            return Err(HarnessError::Assertion(format!(
                "{}: unexpected method result after recovery {result:?}",
                handle.entry()
            )));
        }

        Ok(())
    }
}

/// Injects the faults and checks the recovery.
#[derive(Debug, Clone, Copy)]
pub struct ErrorInjectionFlow {
    recovery_timeout: Duration,
    settle_window: Duration,
    send_timeout: Duration,
}

impl Default for ErrorInjectionFlow {
    fn default() -> Self {
        Self {
            recovery_timeout: RECOVERY_TIMEOUT,
            settle_window: SETTLE_WINDOW,
            send_timeout: SEND_TIMEOUT,
        }
    }
}

impl ErrorInjectionFlow {
    pub fn new(recovery_timeout: Duration, settle_window: Duration, send_timeout: Duration) -> Self {
        Self {
            recovery_timeout,
            settle_window,
            send_timeout,
        }
    }

    /// Injects the fault, waits for the recovery, then runs the follow-up check.
    #[instrument(skip_all, fields(entry = %handle.entry(), %fault))]
    pub async fn run(
        &self,
        handle: &mut ConnectionHandle,
        fault: FaultKind,
        follow_up: &dyn FollowUp,
    ) -> Result<FlowOutcome, HarnessError> {
        let entry = handle.entry();
        if !fault.applies_to(entry.protocol(), entry.auth()) {
            info!("fault not applicable, skipping");

            return Ok(FlowOutcome::Skipped);
        }

        let recorder = StatusRecorder::new();
        handle
            .client_mut()
            .set_connection_status_callback(Some(recorder.callback()));

        let res = self
            .inject_and_follow_up(handle, fault, &recorder, follow_up)
            .await;

        handle.client_mut().set_connection_status_callback(None);

        res?;

        self.ensure_disconnected(handle, &recorder)?;

        info!("recovered from the fault");

        Ok(FlowOutcome::Recovered)
    }

    async fn inject_and_follow_up(
        &self,
        handle: &mut ConnectionHandle,
        fault: FaultKind,
        recorder: &StatusRecorder,
        follow_up: &dyn FollowUp,
    ) -> Result<(), HarnessError> {
        let injection = MessageAndResult::new(fault.default_message(), None);

        // The acknowledgement may arrive only after the reconnection, if at all.
        let (sent, recovered) = tokio::join!(
            handle.send_message_and_wait(&injection, self.recovery_timeout),
            recorder.wait_for_recovery(self.settle_window, self.recovery_timeout),
        );
        sent?;
        recovered?;

        follow_up.check(handle).await
    }

    /// Sends the messages in order, waiting for the recovery after the injection message.
    ///
    /// Faults that don't apply to the entry are skipped.
    #[instrument(skip_all, fields(entry = %handle.entry(), messages = messages.len()))]
    pub async fn send_messages(
        &self,
        handle: &mut ConnectionHandle,
        messages: &[MessageAndResult],
    ) -> Result<FlowOutcome, HarnessError> {
        let Some(fault) = messages.iter().find_map(injected_fault) else {
            handle.send_messages(messages, self.send_timeout).await?;

            return Ok(FlowOutcome::Recovered);
        };

        let entry = handle.entry();
        if !fault.applies_to(entry.protocol(), entry.auth()) {
            info!(%fault, "fault not applicable, skipping");

            return Ok(FlowOutcome::Skipped);
        }

        let recorder = StatusRecorder::new();
        handle
            .client_mut()
            .set_connection_status_callback(Some(recorder.callback()));

        let res = self.send_with_recovery(handle, messages, &recorder).await;

        handle.client_mut().set_connection_status_callback(None);

        res?;

        self.ensure_disconnected(handle, &recorder)?;

        Ok(FlowOutcome::Recovered)
    }

    async fn send_with_recovery(
        &self,
        handle: &ConnectionHandle,
        messages: &[MessageAndResult],
        recorder: &StatusRecorder,
    ) -> Result<(), HarnessError> {
        for msg in messages {
            if msg.expected.is_some() {
                handle.send_message_and_wait(msg, self.send_timeout).await?;

                continue;
            }

            let (sent, recovered) = tokio::join!(
                handle.send_message_and_wait(msg, self.recovery_timeout),
                recorder.wait_for_recovery(self.settle_window, self.recovery_timeout),
            );
            sent?;
            recovered?;
        }

        Ok(())
    }

    fn ensure_disconnected(
        &self,
        handle: &ConnectionHandle,
        recorder: &StatusRecorder,
    ) -> Result<(), HarnessError> {
        if recorder.saw(ConnectionStatus::DisconnectedRetrying) {
            return Ok(());
        }

        let entry = handle.entry();

        Err(HarnessError::Assertion(format!(
            "{}, {}: error injection message did not cause service to drop the connection",
            entry.protocol(),
            entry.auth()
        )))
    }
}

/// The fault a message injects, if any.
pub fn injected_fault(msg: &MessageAndResult) -> Option<FaultKind> {
    let operation = msg.message.property(FAULT_OPERATION_TYPE)?;

    FaultKind::ALL
        .into_iter()
        .find(|fault| fault.operation_type() == operation)
}
