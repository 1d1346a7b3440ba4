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

//! Registry of the device and module identities.

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::IF_MATCH;
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::HubConnectionString;
use crate::rest::{error_status, RestClient, RestError};
use crate::sas::SasCredential;

/// Version of the service REST API.
pub const API_VERSION: &str = "2020-09-30";

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("couldn't prepare the registry request")]
    Rest(#[from] RestError),
    #[error("couldn't send the request to the registry")]
    Request(#[from] reqwest::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// The identity has no symmetric key to build the connection string with.
    #[error("{0} has no symmetric key")]
    MissingKey(String),
    #[error("HTTP status error ({status}) for {resource}: {body}")]
    Status {
        resource: String,
        status: StatusCode,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMechanismType {
    Sas,
    SelfSigned,
    CertificateAuthority,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKey {
    pub primary_key: Option<String>,
    pub secondary_key: Option<String>,
}

impl SymmetricKey {
    /// Random base64 encoded 256 bit keys.
    pub fn generate() -> Self {
        Self {
            primary_key: Some(random_key()),
            secondary_key: Some(random_key()),
        }
    }
}

fn random_key() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());

    BASE64_STANDARD.encode(bytes)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Thumbprint {
    pub primary_thumbprint: Option<String>,
    pub secondary_thumbprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationMechanism {
    #[serde(rename = "type")]
    pub kind: AuthMechanismType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symmetric_key: Option<SymmetricKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509_thumbprint: Option<X509Thumbprint>,
}

impl AuthenticationMechanism {
    pub fn sas() -> Self {
        Self {
            kind: AuthMechanismType::Sas,
            symmetric_key: Some(SymmetricKey::generate()),
            x509_thumbprint: None,
        }
    }

    /// Self signed certificate, used as both primary and secondary thumbprint.
    pub fn self_signed(thumbprint: &str) -> Self {
        Self {
            kind: AuthMechanismType::SelfSigned,
            symmetric_key: None,
            x509_thumbprint: Some(X509Thumbprint {
                primary_thumbprint: Some(thumbprint.to_string()),
                secondary_thumbprint: Some(thumbprint.to_string()),
            }),
        }
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.symmetric_key
            .as_ref()
            .and_then(|key| key.primary_key.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceStatus {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    pub authentication: AuthenticationMechanism,
    #[serde(default, skip_serializing)]
    pub connection_state: Option<String>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, authentication: AuthenticationMechanism) -> Self {
        Self {
            device_id: device_id.into(),
            generation_id: None,
            etag: None,
            status: DeviceStatus::Enabled,
            authentication,
            connection_state: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub device_id: String,
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
    pub authentication: AuthenticationMechanism,
}

impl Module {
    pub fn new(
        device_id: impl Into<String>,
        module_id: impl Into<String>,
        authentication: AuthenticationMechanism,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            module_id: module_id.into(),
            generation_id: None,
            etag: None,
            managed_by: None,
            authentication,
        }
    }
}

/// Registry manager of the hub.
#[async_trait]
pub trait RegistryManager: Send + Sync {
    async fn add_device(&self, device: &Device) -> Result<Device, RegistryError>;

    async fn get_device(&self, device_id: &str) -> Result<Device, RegistryError>;

    async fn remove_device(&self, device_id: &str) -> Result<(), RegistryError>;

    async fn add_module(&self, module: &Module) -> Result<Module, RegistryError>;

    async fn get_module(&self, device_id: &str, module_id: &str) -> Result<Module, RegistryError>;

    async fn remove_module(&self, device_id: &str, module_id: &str) -> Result<(), RegistryError>;
}

async fn check_response(resource: &str, res: Response) -> Result<Response, RegistryError> {
    match res.status() {
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(resource.to_string())),
        StatusCode::CONFLICT => Err(RegistryError::AlreadyExists(resource.to_string())),
        _ => error_status(res)
            .await
            .map_err(|(status, body)| RegistryError::Status {
                resource: resource.to_string(),
                status,
                body,
            }),
    }
}

/// Registry manager over the service REST API.
#[derive(Debug, Clone)]
pub struct RestRegistryManager {
    rest: RestClient,
}

impl RestRegistryManager {
    pub fn new(hub: &HubConnectionString) -> Result<Self, RegistryError> {
        let base_url = RestClient::host_url(hub.host_name())?;

        Self::with_base_url(base_url, hub.credential())
    }

    /// Sends the requests to the given url instead of the hub host.
    pub fn with_base_url(base_url: Url, credential: SasCredential) -> Result<Self, RegistryError> {
        let rest = RestClient::new(base_url, credential, API_VERSION)?;

        Ok(Self { rest })
    }

    async fn put<T>(&self, resource: &str, url: Url, body: &T) -> Result<T, RegistryError>
    where
        T: Serialize + DeserializeOwned,
    {
        let res = self.rest.request(Method::PUT, url)?.json(body).send().await?;

        let created = check_response(resource, res).await?.json().await?;

        Ok(created)
    }

    async fn get<T>(&self, resource: &str, url: Url) -> Result<T, RegistryError>
    where
        T: DeserializeOwned,
    {
        let res = self.rest.request(Method::GET, url)?.send().await?;

        let found = check_response(resource, res).await?.json().await?;

        Ok(found)
    }

    async fn delete(&self, resource: &str, url: Url) -> Result<(), RegistryError> {
        let res = self
            .rest
            .request(Method::DELETE, url)?
            .header(IF_MATCH, "*")
            .send()
            .await?;

        check_response(resource, res).await?;

        Ok(())
    }
}

#[async_trait]
impl RegistryManager for RestRegistryManager {
    #[instrument(skip_all, fields(device_id = %device.device_id))]
    async fn add_device(&self, device: &Device) -> Result<Device, RegistryError> {
        let url = self.rest.endpoint(&["devices", &device.device_id])?;

        let created = self
            .put(&format!("device {}", device.device_id), url, device)
            .await?;

        debug!("device added");

        Ok(created)
    }

    async fn get_device(&self, device_id: &str) -> Result<Device, RegistryError> {
        let url = self.rest.endpoint(&["devices", device_id])?;

        self.get(&format!("device {device_id}"), url).await
    }

    #[instrument(skip(self))]
    async fn remove_device(&self, device_id: &str) -> Result<(), RegistryError> {
        let url = self.rest.endpoint(&["devices", device_id])?;

        self.delete(&format!("device {device_id}"), url).await?;

        debug!("device removed");

        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %module.device_id, module_id = %module.module_id))]
    async fn add_module(&self, module: &Module) -> Result<Module, RegistryError> {
        let url = self.rest.endpoint(&[
            "devices",
            &module.device_id,
            "modules",
            &module.module_id,
        ])?;

        let created = self
            .put(
                &format!("module {}/{}", module.device_id, module.module_id),
                url,
                module,
            )
            .await?;

        debug!("module added");

        Ok(created)
    }

    async fn get_module(&self, device_id: &str, module_id: &str) -> Result<Module, RegistryError> {
        let url = self.rest.endpoint(&["devices", device_id, "modules", module_id])?;

        self.get(&format!("module {device_id}/{module_id}"), url)
            .await
    }

    #[instrument(skip(self))]
    async fn remove_module(&self, device_id: &str, module_id: &str) -> Result<(), RegistryError> {
        let url = self.rest.endpoint(&["devices", device_id, "modules", module_id])?;

        self.delete(&format!("module {device_id}/{module_id}"), url)
            .await?;

        debug!("module removed");

        Ok(())
    }
}
