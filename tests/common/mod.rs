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

//! In-memory hub: registry, device clients, method and cloud to device services.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use iothub_e2e::certificate::CertificateMaterial;
use iothub_e2e::client::{
    ClientError, ClientFactory, ConnectionStatusCallback, IotHubClient, MessageCallback,
    MethodCallback, TwinProperties,
};
use iothub_e2e::config::HarnessConfig;
use iothub_e2e::error_injection::FAULT_OPERATION_TYPE;
use iothub_e2e::message::{IotHubStatusCode, Message};
use iothub_e2e::methods::{
    MethodError, MethodInvocation, MethodRequest, MethodResult, MethodServiceClient, MethodTarget,
};
use iothub_e2e::receive::ServiceClient;
use iothub_e2e::registry::{Device, Module, RegistryError, RegistryManager};
use iothub_e2e::suite::{SuiteContext, SuitePlan};
use iothub_e2e::status::{ConnectionStatus, ConnectionStatusChangeReason};
use iothub_e2e::twin::TwinServiceClient;
use iothub_e2e::TransportProtocol;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const HOST_NAME: &str = "fake-hub.azure-devices.net";

type Target = (String, Option<String>);

#[derive(Default)]
struct State {
    devices: HashMap<String, Device>,
    modules: HashMap<(String, String), Module>,
    failing_removals: HashSet<String>,
    message_callbacks: HashMap<Target, MessageCallback>,
    method_callbacks: HashMap<Target, MethodCallback>,
    twins: HashMap<Target, TwinProperties>,
}

/// Shared state of the fake hub.
#[derive(Default)]
pub struct FakeHub {
    state: Mutex<State>,
    opened: AtomicUsize,
    sent: AtomicUsize,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removing the device fails, and so does every module of it.
    pub fn fail_removal_of(&self, device_id: &str) {
        self.lock().failing_removals.insert(device_id.to_string());
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.lock().devices.keys().cloned().collect()
    }

    pub fn module_count(&self) -> usize {
        self.lock().modules.len()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn target(device_id: &str, module_id: Option<&str>) -> Target {
        (device_id.to_string(), module_id.map(str::to_string))
    }

    fn deliver(&self, target: Target, message: &Message) -> Result<(), ClientError> {
        let callback = self
            .lock()
            .message_callbacks
            .get(&target)
            .cloned()
            .ok_or_else(|| ClientError::Transport(format!("{target:?} isn't listening")))?;

        callback(message);

        Ok(())
    }

    fn twin(&self, target: &Target) -> TwinProperties {
        self.lock().twins.get(target).cloned().unwrap_or_default()
    }

    fn removal_error(resource: String) -> RegistryError {
        RegistryError::Status {
            resource,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "removal refused".to_string(),
        }
    }
}

#[async_trait]
impl RegistryManager for FakeHub {
    async fn add_device(&self, device: &Device) -> Result<Device, RegistryError> {
        let mut state = self.lock();

        if state.devices.contains_key(&device.device_id) {
            return Err(RegistryError::AlreadyExists(device.device_id.clone()));
        }

        state
            .devices
            .insert(device.device_id.clone(), device.clone());

        Ok(device.clone())
    }

    async fn get_device(&self, device_id: &str) -> Result<Device, RegistryError> {
        self.lock()
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("device {device_id}")))
    }

    async fn remove_device(&self, device_id: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();

        if state.failing_removals.contains(device_id) {
            return Err(Self::removal_error(format!("device {device_id}")));
        }

        state
            .devices
            .remove(device_id)
            .map(drop)
            .ok_or_else(|| RegistryError::NotFound(format!("device {device_id}")))
    }

    async fn add_module(&self, module: &Module) -> Result<Module, RegistryError> {
        let mut state = self.lock();

        if !state.devices.contains_key(&module.device_id) {
            return Err(RegistryError::NotFound(format!("device {}", module.device_id)));
        }

        state.modules.insert(
            (module.device_id.clone(), module.module_id.clone()),
            module.clone(),
        );

        Ok(module.clone())
    }

    async fn get_module(&self, device_id: &str, module_id: &str) -> Result<Module, RegistryError> {
        self.lock()
            .modules
            .get(&(device_id.to_string(), module_id.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("module {device_id}/{module_id}")))
    }

    async fn remove_module(&self, device_id: &str, module_id: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();

        if state.failing_removals.contains(device_id) {
            return Err(Self::removal_error(format!("module {device_id}/{module_id}")));
        }

        state
            .modules
            .remove(&(device_id.to_string(), module_id.to_string()))
            .map(drop)
            .ok_or_else(|| RegistryError::NotFound(format!("module {device_id}/{module_id}")))
    }
}

#[async_trait]
impl MethodServiceClient for FakeHub {
    async fn invoke(
        &self,
        target: &MethodTarget,
        invocation: MethodInvocation,
    ) -> Result<MethodResult, MethodError> {
        let callback = self
            .lock()
            .method_callbacks
            .get(&Self::target(target.device_id(), target.module_id()))
            .cloned()
            .ok_or_else(|| MethodError::NotFound(target.to_string()))?;

        let response = callback(MethodRequest {
            name: invocation.name().to_string(),
            payload: invocation.payload().cloned(),
        });

        let response = match invocation.response_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, response)
                .await
                .map_err(|_| MethodError::GatewayTimeout(target.to_string()))?,
            None => response.await,
        };

        Ok(MethodResult {
            status: response.status,
            payload: response.payload,
        })
    }
}

#[async_trait]
impl ServiceClient for FakeHub {
    async fn open(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn send(&self, device_id: &str, message: Message) -> Result<(), ClientError> {
        self.deliver(Self::target(device_id, None), &message)
    }

    async fn send_to_module(
        &self,
        device_id: &str,
        module_id: &str,
        message: Message,
    ) -> Result<(), ClientError> {
        self.deliver(Self::target(device_id, Some(module_id)), &message)
    }
}

#[async_trait]
impl TwinServiceClient for FakeHub {
    async fn get_twin(&self, target: &MethodTarget) -> Result<TwinProperties, ClientError> {
        Ok(self.twin(&Self::target(target.device_id(), target.module_id())))
    }

    async fn update_desired_properties(
        &self,
        target: &MethodTarget,
        properties: Map<String, Value>,
    ) -> Result<(), ClientError> {
        self.lock()
            .twins
            .entry(Self::target(target.device_id(), target.module_id()))
            .or_default()
            .desired
            .extend(properties);

        Ok(())
    }
}

/// Device client bound to an identity of the fake hub.
pub struct FakeClient {
    hub: Arc<FakeHub>,
    target: Target,
    open: bool,
    status: Option<ConnectionStatusCallback>,
}

#[async_trait]
impl IotHubClient for FakeClient {
    async fn open(&mut self) -> Result<(), ClientError> {
        self.hub.opened.fetch_add(1, Ordering::SeqCst);
        self.open = true;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.open = false;
        self.hub.lock().method_callbacks.remove(&self.target);

        Ok(())
    }

    fn clear_state(&mut self) {
        self.status = None;
    }

    async fn send_event(&self, message: Message) -> Result<IotHubStatusCode, ClientError> {
        if !self.open {
            return Err(ClientError::NotOpen);
        }

        self.hub.sent.fetch_add(1, Ordering::SeqCst);

        if message.property(FAULT_OPERATION_TYPE).is_some() {
            if let Some(status) = &self.status {
                status(
                    ConnectionStatus::DisconnectedRetrying,
                    ConnectionStatusChangeReason::NoNetwork,
                );
                status(
                    ConnectionStatus::Connected,
                    ConnectionStatusChangeReason::ConnectionOk,
                );
            }
        }

        Ok(IotHubStatusCode::OkEmpty)
    }

    fn set_message_callback(&mut self, callback: Option<MessageCallback>) {
        let mut state = self.hub.lock();

        match callback {
            Some(callback) => {
                state.message_callbacks.insert(self.target.clone(), callback);
            }
            None => {
                state.message_callbacks.remove(&self.target);
            }
        }
    }

    fn set_connection_status_callback(&mut self, callback: Option<ConnectionStatusCallback>) {
        self.status = callback;
    }

    async fn subscribe_to_methods(&mut self, callback: MethodCallback) -> Result<(), ClientError> {
        if !self.open {
            return Err(ClientError::NotOpen);
        }

        self.hub
            .lock()
            .method_callbacks
            .insert(self.target.clone(), callback);

        Ok(())
    }

    async fn start_twin(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn get_twin(&self) -> Result<TwinProperties, ClientError> {
        if !self.open {
            return Err(ClientError::NotOpen);
        }

        Ok(self.hub.twin(&self.target))
    }

    async fn update_reported_properties(
        &self,
        properties: Map<String, Value>,
    ) -> Result<(), ClientError> {
        if !self.open {
            return Err(ClientError::NotOpen);
        }

        self.hub
            .lock()
            .twins
            .entry(self.target.clone())
            .or_default()
            .reported
            .extend(properties);

        Ok(())
    }
}

/// Creates the [`FakeClient`]s from the identity connection strings.
pub struct FakeFactory {
    hub: Arc<FakeHub>,
}

impl FakeFactory {
    pub fn new(hub: Arc<FakeHub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

fn field<'a>(connection_string: &'a str, key: &str) -> Option<&'a str> {
    connection_string
        .split(';')
        .filter_map(|segment| segment.split_once('='))
        .find_map(|(k, v)| (k == key).then_some(v))
}

impl ClientFactory for FakeFactory {
    fn create(
        &self,
        connection_string: &str,
        _protocol: TransportProtocol,
        _certificate: Option<Arc<CertificateMaterial>>,
    ) -> Result<Box<dyn IotHubClient>, ClientError> {
        let device_id = field(connection_string, "DeviceId")
            .ok_or_else(|| ClientError::Transport("missing DeviceId".to_string()))?;
        let module_id = field(connection_string, "ModuleId");

        Ok(Box::new(FakeClient {
            hub: Arc::clone(&self.hub),
            target: FakeHub::target(device_id, module_id),
            open: false,
            status: None,
        }))
    }
}

/// Configuration without waits between the test cases.
pub fn config(rerun_count: usize) -> HarnessConfig {
    HarnessConfig {
        hub: format!("HostName={HOST_NAME};SharedAccessKeyName=iothubowner;SharedAccessKey=a2V5")
            .parse()
            .unwrap(),
        storage_account_connection_string: None,
        certificate: Arc::new(CertificateMaterial::generate("fake-hub").unwrap()),
        rerun_count,
        intertest_delay: Duration::ZERO,
        settle_delay: Duration::ZERO,
    }
}

/// Registers the suite identities on the hub, with fake clients.
pub async fn setup(hub: &Arc<FakeHub>, rerun_count: usize, plan: &SuitePlan) -> SuiteContext {
    init_tracing();

    let registry: Arc<dyn RegistryManager> = Arc::clone(hub) as Arc<dyn RegistryManager>;

    SuiteContext::setup(
        &config(rerun_count),
        registry,
        FakeFactory::new(Arc::clone(hub)),
        plan,
    )
    .await
    .unwrap()
}

/// Logs of the harness in the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    // Already installed by another test of the binary.
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}
