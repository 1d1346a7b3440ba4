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

//! Best-effort cleanup of everything a suite registered.

use std::fmt::Display;

use tracing::{error, info, instrument, warn};

use crate::error::{HarnessError, Report};
use crate::lifecycle::ConnectionHandle;
use crate::registry::RegistryManager;

/// Identities to delete once the suite completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupList {
    devices: Vec<String>,
    modules: Vec<(String, String)>,
}

impl CleanupList {
    pub fn record_device(&mut self, device_id: &str) {
        self.devices.push(device_id.to_string());
    }

    pub fn record_module(&mut self, device_id: &str, module_id: &str) {
        self.modules
            .push((device_id.to_string(), module_id.to_string()));
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn modules(&self) -> &[(String, String)] {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.modules.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    Device(String),
    Module { device_id: String, module_id: String },
}

/// A resource that couldn't be deleted and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    resource: Resource,
    reason: String,
}

impl TeardownFailure {
    pub fn device(device_id: impl Into<String>, reason: impl Display) -> Self {
        Self {
            resource: Resource::Device(device_id.into()),
            reason: reason.to_string(),
        }
    }

    pub fn module(
        device_id: impl Into<String>,
        module_id: impl Into<String>,
        reason: impl Display,
    ) -> Self {
        Self {
            resource: Resource::Module {
                device_id: device_id.into(),
                module_id: module_id.into(),
            },
            reason: reason.to_string(),
        }
    }

    /// Name of the resource, like `device <id>` or `module <device>/<module>`.
    pub fn resource(&self) -> String {
        match &self.resource {
            Resource::Device(id) => format!("device {id}"),
            Resource::Module {
                device_id,
                module_id,
            } => format!("module {device_id}/{module_id}"),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Stops the handles and deletes the identities, modules before their parent devices.
///
/// Every deletion is attempted even if a previous one failed, the failures are returned together
/// as a single [`HarnessError::TeardownFailed`].
#[instrument(skip_all, fields(devices = cleanup.devices().len(), modules = cleanup.modules().len()))]
pub async fn teardown(
    registry: &dyn RegistryManager,
    handles: &mut [ConnectionHandle],
    cleanup: &CleanupList,
) -> Result<(), HarnessError> {
    for handle in handles.iter_mut() {
        if let Err(err) = handle.stop().await {
            warn!(entry = %handle.entry(), error = %Report::new(&err), "couldn't stop the client");
        }
    }

    let mut failures = Vec::new();

    for (device_id, module_id) in cleanup.modules() {
        if let Err(err) = registry.remove_module(device_id, module_id).await {
            error!(%device_id, %module_id, error = %Report::new(&err), "couldn't remove module");

            failures.push(TeardownFailure::module(
                device_id.as_str(),
                module_id.as_str(),
                Report::new(&err),
            ));
        }
    }

    for device_id in cleanup.devices() {
        if let Err(err) = registry.remove_device(device_id).await {
            error!(%device_id, error = %Report::new(&err), "couldn't remove device");

            failures.push(TeardownFailure::device(device_id.as_str(), Report::new(&err)));
        }
    }

    if !failures.is_empty() {
        return Err(HarnessError::TeardownFailed(failures));
    }

    info!("teardown completed");

    Ok(())
}
