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

//! Throw-away identities registered for a test suite.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::certificate::CertificateMaterial;
use crate::registry::{
    AuthMechanismType, AuthenticationMechanism, Device, Module, RegistryError, RegistryManager,
};
use crate::teardown::CleanupList;
use crate::transport::{AuthenticationType, ClientRole};

/// A device, or a module with its parent device, living only for the duration of a suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralIdentity {
    device_id: String,
    module_id: Option<String>,
    auth: AuthenticationType,
    thumbprint: Option<String>,
    connection_string: String,
}

impl EphemeralIdentity {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    pub fn auth(&self) -> AuthenticationType {
        self.auth
    }

    pub fn thumbprint(&self) -> Option<&str> {
        self.thumbprint.as_deref()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        device_id: &str,
        module_id: Option<&str>,
        auth: AuthenticationType,
        connection_string: &str,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            module_id: module_id.map(str::to_string),
            auth,
            thumbprint: None,
            connection_string: connection_string.to_string(),
        }
    }

    pub fn role(&self) -> ClientRole {
        if self.module_id.is_some() {
            ClientRole::Module
        } else {
            ClientRole::Device
        }
    }
}

fn auth_segment(
    resource: &str,
    authentication: &AuthenticationMechanism,
) -> Result<String, RegistryError> {
    match authentication.kind {
        AuthMechanismType::Sas => {
            let key = authentication
                .primary_key()
                .ok_or_else(|| RegistryError::MissingKey(resource.to_string()))?;

            Ok(format!("SharedAccessKey={key}"))
        }
        AuthMechanismType::SelfSigned | AuthMechanismType::CertificateAuthority => {
            Ok("x509=true".to_string())
        }
        AuthMechanismType::None => Err(RegistryError::MissingKey(resource.to_string())),
    }
}

/// `HostName=..;DeviceId=..;SharedAccessKey=..` or `HostName=..;DeviceId=..;x509=true`.
pub fn device_connection_string(host_name: &str, device: &Device) -> Result<String, RegistryError> {
    let resource = format!("device {}", device.device_id);
    let auth = auth_segment(&resource, &device.authentication)?;

    Ok(format!(
        "HostName={host_name};DeviceId={};{auth}",
        device.device_id
    ))
}

/// The device connection string of the module, with the `ModuleId` appended.
pub fn module_connection_string(host_name: &str, module: &Module) -> Result<String, RegistryError> {
    let resource = format!("module {}/{}", module.device_id, module.module_id);
    let auth = auth_segment(&resource, &module.authentication)?;

    Ok(format!(
        "HostName={host_name};DeviceId={};{auth};ModuleId={}",
        module.device_id, module.module_id
    ))
}

/// Registers the identities on the hub.
pub struct IdentityProvisioner {
    registry: Arc<dyn RegistryManager>,
    host_name: String,
    prefix: String,
}

impl IdentityProvisioner {
    /// Identities are named `<prefix>-device-<uuid>` and `<prefix>-module-<uuid>`.
    pub fn new(
        registry: Arc<dyn RegistryManager>,
        host_name: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            host_name: host_name.into(),
            prefix: prefix.into(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn RegistryManager> {
        &self.registry
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    fn identity_id(&self, kind: &str, auth: AuthenticationType) -> String {
        let suffix = if auth.is_x509() { "-x509" } else { "" };

        format!("{}-{kind}{suffix}-{}", self.prefix, Uuid::new_v4())
    }

    /// Registers a new identity, recording it in the cleanup list as soon as it exists.
    ///
    /// A module identity registers its parent device first.
    #[instrument(skip(self, certificate, cleanup))]
    pub async fn create(
        &self,
        role: ClientRole,
        auth: AuthenticationType,
        certificate: &CertificateMaterial,
        cleanup: &mut CleanupList,
    ) -> Result<EphemeralIdentity, RegistryError> {
        let authentication = match auth {
            AuthenticationType::Sas => AuthenticationMechanism::sas(),
            AuthenticationType::SelfSigned => {
                AuthenticationMechanism::self_signed(certificate.thumbprint())
            }
        };
        let thumbprint = auth.is_x509().then(|| certificate.thumbprint().to_string());

        let device = Device::new(self.identity_id("device", auth), authentication.clone());
        let device = self.registry.add_device(&device).await?;
        cleanup.record_device(&device.device_id);

        let (module_id, connection_string) = match role {
            ClientRole::Device => (None, device_connection_string(&self.host_name, &device)?),
            ClientRole::Module => {
                let module = Module::new(
                    device.device_id.clone(),
                    self.identity_id("module", auth),
                    authentication,
                );
                let module = self.registry.add_module(&module).await?;
                cleanup.record_module(&module.device_id, &module.module_id);

                let connection_string = module_connection_string(&self.host_name, &module)?;

                (Some(module.module_id), connection_string)
            }
        };

        info!(device_id = %device.device_id, ?module_id, "identity registered");

        Ok(EphemeralIdentity {
            device_id: device.device_id,
            module_id,
            auth,
            thumbprint,
            connection_string,
        })
    }
}
