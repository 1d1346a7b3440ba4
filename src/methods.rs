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

//! Direct methods.
//!
//! The service side invokes the methods through a [`MethodServiceClient`], the device side answers
//! them with the [`DeviceEmulator`].

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::client::MethodCallback;
use crate::config::HubConnectionString;
use crate::error::{HarnessError, Report};
use crate::identity::EphemeralIdentity;
use crate::rest::{error_status, RestClient, RestError};
use crate::sas::SasCredential;

/// Version of the service REST API for the direct methods.
pub const API_VERSION: &str = "2020-09-30";

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(200);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const PAYLOAD_STRING: &str = "This is a valid payload";
pub const NUMBER_INVOKES_PARALLEL: usize = 10;

pub const METHOD_LOOPBACK: &str = "loopback";
pub const METHOD_DELAY_IN_MILLISECONDS: &str = "delayInMilliseconds";
pub const METHOD_RESET: &str = "reset";
pub const METHOD_UNKNOWN: &str = "unknown";

pub const METHOD_SUCCESS: i32 = 200;
pub const METHOD_RESET_STATUS: i32 = 201;
pub const METHOD_THROWS: i32 = 400;
pub const METHOD_NOT_DEFINED: i32 = 404;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum MethodError {
    /// The device or the module isn't registered or isn't connected.
    #[error("{0} not found")]
    NotFound(String),
    /// The device didn't answer within the response timeout.
    #[error("gateway timeout invoking {0}")]
    GatewayTimeout(String),
    #[error("couldn't prepare the method request")]
    Rest(#[from] RestError),
    #[error("couldn't send the method request")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status error ({status}) invoking {target}: {body}")]
    Status {
        target: String,
        status: StatusCode,
        body: String,
    },
}

/// Device, or module, the method is invoked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodTarget {
    device_id: String,
    module_id: Option<String>,
}

impl MethodTarget {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            module_id: None,
        }
    }

    pub fn module(device_id: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            module_id: Some(module_id.into()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }
}

impl From<&EphemeralIdentity> for MethodTarget {
    fn from(identity: &EphemeralIdentity) -> Self {
        Self {
            device_id: identity.device_id().to_string(),
            module_id: identity.module_id().map(str::to_string),
        }
    }
}

impl Display for MethodTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.module_id {
            Some(module_id) => write!(f, "module {}/{module_id}", self.device_id),
            None => write!(f, "device {}", self.device_id),
        }
    }
}

/// A method to invoke.
///
/// The timeouts left unset use the ones of the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInvocation {
    name: String,
    response_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    payload: Option<Value>,
}

impl MethodInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_timeout: None,
            connect_timeout: None,
            payload: None,
        }
    }

    /// Invocation with the default timeouts of the suites.
    pub fn with_default_timeouts(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_response_timeout(DEFAULT_RESPONSE_TIMEOUT)
            .with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

/// Status and payload returned by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    pub status: i32,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl MethodResult {
    /// The payload as a string, `None` if absent or not a JSON string.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Value::as_str)
    }
}

/// A method invocation received by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRequest {
    pub name: String,
    pub payload: Option<Value>,
}

/// Answer of the device to a [`MethodRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResponse {
    pub status: i32,
    pub payload: Option<Value>,
}

impl MethodResponse {
    fn new(status: i32, payload: impl Into<String>) -> Self {
        Self {
            status,
            payload: Some(Value::String(payload.into())),
        }
    }
}

/// Invokes the direct methods on behalf of the service.
#[async_trait]
pub trait MethodServiceClient: Send + Sync {
    async fn invoke(
        &self,
        target: &MethodTarget,
        invocation: MethodInvocation,
    ) -> Result<MethodResult, MethodError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    method_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_timeout_in_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connect_timeout_in_seconds: Option<u64>,
    payload: &'a Option<Value>,
}

impl<'a> From<&'a MethodInvocation> for InvokeBody<'a> {
    fn from(invocation: &'a MethodInvocation) -> Self {
        Self {
            method_name: &invocation.name,
            response_timeout_in_seconds: invocation.response_timeout.map(|t| t.as_secs()),
            connect_timeout_in_seconds: invocation.connect_timeout.map(|t| t.as_secs()),
            payload: &invocation.payload,
        }
    }
}

/// Method service client over the service REST API.
#[derive(Debug, Clone)]
pub struct RestMethodServiceClient {
    rest: RestClient,
}

impl RestMethodServiceClient {
    pub fn new(hub: &HubConnectionString) -> Result<Self, MethodError> {
        let base_url = RestClient::host_url(hub.host_name())?;

        Self::with_base_url(base_url, hub.credential())
    }

    pub fn with_base_url(base_url: Url, credential: SasCredential) -> Result<Self, MethodError> {
        let rest = RestClient::new(base_url, credential, API_VERSION)?;

        Ok(Self { rest })
    }

    fn url(&self, target: &MethodTarget) -> Result<Url, RestError> {
        match target.module_id() {
            Some(module_id) => self.rest.endpoint(&[
                "twins",
                target.device_id(),
                "modules",
                module_id,
                "methods",
            ]),
            None => self.rest.endpoint(&["twins", target.device_id(), "methods"]),
        }
    }
}

#[async_trait]
impl MethodServiceClient for RestMethodServiceClient {
    #[instrument(skip_all, fields(%target, method = invocation.name()))]
    async fn invoke(
        &self,
        target: &MethodTarget,
        invocation: MethodInvocation,
    ) -> Result<MethodResult, MethodError> {
        let url = self.url(target)?;

        let res = self
            .rest
            .request(Method::POST, url)?
            .json(&InvokeBody::from(&invocation))
            .send()
            .await?;

        match res.status() {
            StatusCode::NOT_FOUND => return Err(MethodError::NotFound(target.to_string())),
            StatusCode::GATEWAY_TIMEOUT => {
                return Err(MethodError::GatewayTimeout(target.to_string()))
            }
            _ => {}
        }

        let res = error_status(res)
            .await
            .map_err(|(status, body)| MethodError::Status {
                target: target.to_string(),
                status,
                body,
            })?;

        let result: MethodResult = res.json().await?;

        debug!(status = result.status, "method invoked");

        Ok(result)
    }
}

/// Textual form of a payload, `null` when absent.
fn payload_text(payload: Option<&Value>) -> String {
    match payload {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Payload the loopback method answers with.
pub fn loopback_payload(payload: Option<&Value>) -> String {
    format!("LOOPBACK:{}", payload_text(payload))
}

fn parse_delay(payload: Option<&Value>) -> Result<u64, String> {
    match payload {
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map_err(|err| format!("invalid number \"{text}\": {err}")),
        Some(Value::Number(number)) => number
            .as_u64()
            .ok_or_else(|| format!("invalid number \"{number}\": not a positive integer")),
        other => Err(format!(
            "invalid number \"{}\": not a number",
            payload_text(other)
        )),
    }
}

/// Device side responder of the direct methods.
#[derive(Debug, Default)]
pub struct DeviceEmulator {
    invocations: AtomicUsize,
    reset_requested: AtomicBool,
}

impl DeviceEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback to subscribe the client to the direct methods with.
    pub fn callback(self: &Arc<Self>) -> MethodCallback {
        let emulator = Arc::clone(self);

        Arc::new(move |request| {
            let emulator = Arc::clone(&emulator);

            async move { emulator.respond(request).await }.boxed()
        })
    }

    #[instrument(skip_all, fields(method = %request.name))]
    pub async fn respond(&self, request: MethodRequest) -> MethodResponse {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let payload = request.payload.as_ref();

        match request.name.as_str() {
            METHOD_LOOPBACK => MethodResponse::new(METHOD_SUCCESS, loopback_payload(payload)),
            METHOD_DELAY_IN_MILLISECONDS => match parse_delay(payload) {
                Ok(delay) => {
                    tokio::time::sleep(Duration::from_millis(delay)).await;

                    MethodResponse::new(
                        METHOD_SUCCESS,
                        format!("{METHOD_DELAY_IN_MILLISECONDS}:succeed"),
                    )
                }
                Err(message) => {
                    warn!(%message, "invalid delay");

                    MethodResponse::new(METHOD_THROWS, message)
                }
            },
            METHOD_RESET => {
                self.reset_requested.store(true, Ordering::SeqCst);

                MethodResponse::new(METHOD_RESET_STATUS, format!("{METHOD_RESET}:succeed"))
            }
            unknown => MethodResponse::new(METHOD_NOT_DEFINED, format!("unknown:{unknown}")),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// The service asked the device to reset.
    pub fn reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.invocations.store(0, Ordering::SeqCst);
        self.reset_requested.store(false, Ordering::SeqCst);
    }
}

/// Invokes the loopback method from `workers` concurrent tasks.
///
/// Worker `i` sends the payload `Thread<i>`. The returned vector has exactly one slot per worker,
/// holding its result or the error it failed with.
#[instrument(skip(client))]
pub async fn invoke_parallel(
    client: Arc<dyn MethodServiceClient>,
    target: &MethodTarget,
    workers: usize,
) -> Vec<Result<MethodResult, HarnessError>> {
    let mut tasks = JoinSet::new();

    for worker in 0..workers {
        let client = Arc::clone(&client);
        let target = target.clone();

        tasks.spawn(async move {
            let invocation = MethodInvocation::with_default_timeouts(METHOD_LOOPBACK)
                .with_payload(format!("Thread{worker}"));

            (worker, client.invoke(&target, invocation).await)
        });
    }

    let mut slots: Vec<Option<Result<MethodResult, HarnessError>>> =
        std::iter::repeat_with(|| None).take(workers).collect();
    let mut failed_tasks = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((worker, res)) => slots[worker] = Some(res.map_err(HarnessError::from)),
            Err(err) => {
                warn!(error = %Report::new(&err), "invocation task failed");

                failed_tasks.push(err);
            }
        }
    }

    // A task that didn't complete can't tell its index, it takes the first free slot.
    let mut failed_tasks = failed_tasks.into_iter();
    slots
        .into_iter()
        .map(|slot| match slot {
            Some(res) => res,
            None => Err(failed_tasks
                .next()
                .map(HarnessError::from)
                .unwrap_or_else(|| HarnessError::Assertion("invocation never completed".into()))),
        })
        .collect()
}

/// Expected payload of the parallel worker `i`.
pub fn parallel_payload(worker: usize) -> String {
    loopback_payload(Some(&Value::String(format!("Thread{worker}"))))
}
