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

//! Enrollments of the device provisioning service.
//!
//! Thin client over the service REST API, enough to manage the enrollment groups and the
//! individual enrollments used by the provisioning scenarios.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, IF_MATCH};
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, trace};

use crate::config::{ConfigError, HubConnectionString};
use crate::rest::{error_status, RestClient, RestError};
use crate::sas::SasCredential;

/// Version of the provisioning service REST API.
pub const API_VERSION: &str = "2019-03-31";

/// Query returning every enrollment group.
pub const ALL_ENROLLMENT_GROUPS: &str = "SELECT * FROM ENROLLMENTGROUPS";

const CONTINUATION_HEADER: &str = "x-ms-continuation";
const MAX_ITEM_COUNT_HEADER: &str = "x-ms-max-item-count";

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    #[error("invalid provisioning connection string")]
    ConnectionString(#[from] ConfigError),
    #[error("couldn't prepare the provisioning request")]
    Rest(#[from] RestError),
    #[error("couldn't send the request to the provisioning service")]
    Request(#[from] reqwest::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("HTTP status error ({status}) for {resource}: {body}")]
    Status {
        resource: String,
        status: StatusCode,
        body: String,
    },
}

/// Service connection string of the provisioning service.
///
/// Same format as the hub one, `HostName=..;SharedAccessKeyName=..;SharedAccessKey=..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConnectionString(HubConnectionString);

impl ProvisioningConnectionString {
    pub fn host_name(&self) -> &str {
        self.0.host_name()
    }

    pub fn credential(&self) -> SasCredential {
        self.0.credential()
    }
}

impl FromStr for ProvisioningConnectionString {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.parse()?;

        Ok(Self(inner))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningStatus {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocationPolicy {
    Hashed,
    GeoLatency,
    Static,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttestationType {
    None,
    Tpm,
    X509,
    SymmetricKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmAttestation {
    pub endorsement_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKeyAttestation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
}

/// Details of a certificate, filled in by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CertificateInfo {
    pub subject_name: Option<String>,
    pub sha1_thumbprint: Option<String>,
    pub sha256_thumbprint: Option<String>,
    pub issuer_name: Option<String>,
    pub not_before_utc: Option<DateTime<Utc>>,
    pub not_after_utc: Option<DateTime<Utc>>,
    pub serial_number: Option<String>,
    pub version: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CertificateWithInfo {
    /// PEM certificate, only sent to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing)]
    pub info: Option<X509CertificateInfo>,
}

impl X509CertificateWithInfo {
    pub fn new(certificate: impl Into<String>) -> Self {
        Self {
            certificate: Some(certificate.into()),
            info: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Certificates {
    pub primary: Option<X509CertificateWithInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<X509CertificateWithInfo>,
}

/// Names of the certificate authorities uploaded to the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CaReferences {
    pub primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Attestation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificates: Option<X509Certificates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_certificates: Option<X509Certificates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_references: Option<X509CaReferences>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationMechanism {
    #[serde(rename = "type")]
    pub kind: AttestationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmAttestation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509: Option<X509Attestation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symmetric_key: Option<SymmetricKeyAttestation>,
}

impl AttestationMechanism {
    /// Group attestation by a signing certificate.
    pub fn x509_signing_certificate(certificate: impl Into<String>) -> Self {
        Self {
            kind: AttestationType::X509,
            tpm: None,
            x509: Some(X509Attestation {
                signing_certificates: Some(X509Certificates {
                    primary: Some(X509CertificateWithInfo::new(certificate)),
                    secondary: None,
                }),
                ..Default::default()
            }),
            symmetric_key: None,
        }
    }

    /// Individual attestation by the device certificate.
    pub fn x509_client_certificate(certificate: impl Into<String>) -> Self {
        Self {
            kind: AttestationType::X509,
            tpm: None,
            x509: Some(X509Attestation {
                client_certificates: Some(X509Certificates {
                    primary: Some(X509CertificateWithInfo::new(certificate)),
                    secondary: None,
                }),
                ..Default::default()
            }),
            symmetric_key: None,
        }
    }

    /// Symmetric key attestation, the service generates the missing keys.
    pub fn symmetric_key(keys: SymmetricKeyAttestation) -> Self {
        Self {
            kind: AttestationType::SymmetricKey,
            tpm: None,
            x509: None,
            symmetric_key: Some(keys),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialTwinProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialTwin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<InitialTwinProperties>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub iot_edge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprovisionPolicy {
    pub update_hub_assignment: bool,
    pub migrate_device_data: bool,
}

impl Default for ReprovisionPolicy {
    fn default() -> Self {
        Self {
            update_hub_assignment: true,
            migrate_device_data: true,
        }
    }
}

/// Outcome of the last registration of an individual enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationState {
    pub registration_id: Option<String>,
    pub created_date_time_utc: Option<DateTime<Utc>>,
    pub assigned_hub: Option<String>,
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub substatus: Option<String>,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpecification {
    pub query: String,
}

impl QuerySpecification {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualEnrollment {
    pub registration_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub attestation: AttestationMechanism,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DeviceCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_hub_host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_twin: Option<InitialTwin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprovision_policy: Option<ReprovisionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_policy: Option<AllocationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_hubs: Option<Vec<String>>,
    #[serde(default, skip_serializing)]
    pub registration_state: Option<DeviceRegistrationState>,
    #[serde(default, skip_serializing)]
    pub created_date_time_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
}

impl IndividualEnrollment {
    pub fn new(registration_id: impl Into<String>, attestation: AttestationMechanism) -> Self {
        Self {
            registration_id: registration_id.into(),
            device_id: None,
            attestation,
            capabilities: None,
            iot_hub_host_name: None,
            initial_twin: None,
            etag: None,
            provisioning_status: None,
            reprovision_policy: None,
            allocation_policy: None,
            iot_hubs: None,
            registration_state: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_provisioning_status(mut self, status: ProvisioningStatus) -> Self {
        self.provisioning_status = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentGroup {
    pub enrollment_group_id: String,
    pub attestation: AttestationMechanism,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DeviceCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_hub_host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_twin: Option<InitialTwin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprovision_policy: Option<ReprovisionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_policy: Option<AllocationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_hubs: Option<Vec<String>>,
    #[serde(default, skip_serializing)]
    pub created_date_time_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
}

impl EnrollmentGroup {
    pub fn new(enrollment_group_id: impl Into<String>, attestation: AttestationMechanism) -> Self {
        Self {
            enrollment_group_id: enrollment_group_id.into(),
            attestation,
            capabilities: None,
            iot_hub_host_name: None,
            initial_twin: None,
            etag: None,
            provisioning_status: None,
            reprovision_policy: None,
            allocation_policy: None,
            iot_hubs: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
        }
    }

    /// Hub the devices are assigned to, must be linked to the provisioning service.
    pub fn with_iot_hub_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.iot_hub_host_name = Some(host_name.into());
        self
    }

    pub fn with_provisioning_status(mut self, status: ProvisioningStatus) -> Self {
        self.provisioning_status = Some(status);
        self
    }
}

async fn check_response(resource: &str, res: Response) -> Result<Response, ProvisioningError> {
    if res.status() == StatusCode::NOT_FOUND {
        return Err(ProvisioningError::NotFound(resource.to_string()));
    }

    error_status(res)
        .await
        .map_err(|(status, body)| ProvisioningError::Status {
            resource: resource.to_string(),
            status,
            body,
        })
}

/// Client of the provisioning service REST API.
#[derive(Debug, Clone)]
pub struct ProvisioningServiceClient {
    rest: RestClient,
    page_size: Option<u32>,
}

impl ProvisioningServiceClient {
    pub fn new(connection_string: &ProvisioningConnectionString) -> Result<Self, ProvisioningError> {
        let base_url = RestClient::host_url(connection_string.host_name())?;

        Self::with_base_url(base_url, connection_string.credential())
    }

    /// Sends the requests to the given url instead of the service host.
    pub fn with_base_url(
        base_url: Url,
        credential: SasCredential,
    ) -> Result<Self, ProvisioningError> {
        let rest = RestClient::new(base_url, credential, API_VERSION)?;

        Ok(Self {
            rest,
            page_size: None,
        })
    }

    /// Maximum number of items the service returns for each query page.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    async fn put<T>(&self, resource: &str, url: Url, body: &T) -> Result<T, ProvisioningError>
    where
        T: Serialize + DeserializeOwned,
    {
        let res = self.rest.request(Method::PUT, url)?.json(body).send().await?;

        let created = check_response(resource, res).await?.json().await?;

        Ok(created)
    }

    async fn get<T>(&self, resource: &str, url: Url) -> Result<T, ProvisioningError>
    where
        T: DeserializeOwned,
    {
        let res = self.rest.request(Method::GET, url)?.send().await?;

        let found = check_response(resource, res).await?.json().await?;

        Ok(found)
    }

    async fn delete(&self, resource: &str, url: Url) -> Result<(), ProvisioningError> {
        let res = self
            .rest
            .request(Method::DELETE, url)?
            .header(IF_MATCH, "*")
            .send()
            .await?;

        check_response(resource, res).await?;

        Ok(())
    }

    /// Follows the continuation token until every page was read.
    async fn query<T>(
        &self,
        resource: &str,
        url: Url,
        spec: &QuerySpecification,
    ) -> Result<Vec<T>, ProvisioningError>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut continuation: Option<HeaderValue> = None;

        loop {
            let mut req = self.rest.request(Method::POST, url.clone())?.json(spec);

            if let Some(page_size) = self.page_size {
                req = req.header(MAX_ITEM_COUNT_HEADER, page_size);
            }

            if let Some(token) = continuation.take() {
                req = req.header(CONTINUATION_HEADER, token);
            }

            let res = check_response(resource, req.send().await?).await?;

            continuation = res
                .headers()
                .get(CONTINUATION_HEADER)
                .filter(|token| !token.is_empty())
                .cloned();

            let page: Vec<T> = res.json().await?;

            trace!(items = page.len(), "query page read");

            items.extend(page);

            if continuation.is_none() {
                return Ok(items);
            }
        }
    }

    #[instrument(skip_all, fields(id = %group.enrollment_group_id))]
    pub async fn create_or_update_enrollment_group(
        &self,
        group: &EnrollmentGroup,
    ) -> Result<EnrollmentGroup, ProvisioningError> {
        let url = self
            .rest
            .endpoint(&["enrollmentGroups", &group.enrollment_group_id])?;

        let created = self
            .put(
                &format!("enrollment group {}", group.enrollment_group_id),
                url,
                group,
            )
            .await?;

        debug!("enrollment group created");

        Ok(created)
    }

    pub async fn get_enrollment_group(&self, id: &str) -> Result<EnrollmentGroup, ProvisioningError> {
        let url = self.rest.endpoint(&["enrollmentGroups", id])?;

        self.get(&format!("enrollment group {id}"), url).await
    }

    #[instrument(skip_all, fields(query = %spec.query))]
    pub async fn query_enrollment_groups(
        &self,
        spec: &QuerySpecification,
    ) -> Result<Vec<EnrollmentGroup>, ProvisioningError> {
        let url = self.rest.endpoint(&["enrollmentGroups", "query"])?;

        self.query("enrollment groups", url, spec).await
    }

    #[instrument(skip(self))]
    pub async fn delete_enrollment_group(&self, id: &str) -> Result<(), ProvisioningError> {
        let url = self.rest.endpoint(&["enrollmentGroups", id])?;

        self.delete(&format!("enrollment group {id}"), url).await?;

        debug!("enrollment group deleted");

        Ok(())
    }

    #[instrument(skip_all, fields(id = %enrollment.registration_id))]
    pub async fn create_or_update_individual_enrollment(
        &self,
        enrollment: &IndividualEnrollment,
    ) -> Result<IndividualEnrollment, ProvisioningError> {
        let url = self
            .rest
            .endpoint(&["enrollments", &enrollment.registration_id])?;

        let created = self
            .put(
                &format!("enrollment {}", enrollment.registration_id),
                url,
                enrollment,
            )
            .await?;

        debug!("individual enrollment created");

        Ok(created)
    }

    pub async fn get_individual_enrollment(
        &self,
        registration_id: &str,
    ) -> Result<IndividualEnrollment, ProvisioningError> {
        let url = self.rest.endpoint(&["enrollments", registration_id])?;

        self.get(&format!("enrollment {registration_id}"), url).await
    }

    #[instrument(skip(self))]
    pub async fn delete_individual_enrollment(
        &self,
        registration_id: &str,
    ) -> Result<(), ProvisioningError> {
        let url = self.rest.endpoint(&["enrollments", registration_id])?;

        self.delete(&format!("enrollment {registration_id}"), url)
            .await?;

        debug!("individual enrollment deleted");

        Ok(())
    }
}
