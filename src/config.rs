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

//! Configuration of the harness, read from the command line or the environment.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};

use crate::certificate::{CertificateError, CertificateMaterial};
use crate::sas::SasCredential;

pub const DEFAULT_RERUN_COUNT: usize = 3;
pub const DEFAULT_INTERTEST_DELAY_MS: u64 = 2000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Common name of the generated self signed certificate.
const GENERATED_CERT_CN: &str = "iothub-e2e";

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is missing or empty")]
    MissingEnv(String),
    #[error("connection string is missing the {0} field")]
    MissingField(&'static str),
    #[error("malformed connection string segment '{0}'")]
    Malformed(String),
    /// Only one of the certificate and private key was configured.
    #[error("both the X.509 certificate and its private key must be set")]
    IncompleteCertificate,
    #[error("invalid certificate material")]
    Certificate(#[from] CertificateError),
    #[error("couldn't parse the arguments")]
    Args(#[from] clap::Error),
}

/// Owner connection string of the hub, `HostName=..;SharedAccessKeyName=..;SharedAccessKey=..`.
#[derive(Clone, PartialEq, Eq)]
pub struct HubConnectionString {
    host_name: String,
    shared_access_key_name: String,
    shared_access_key: String,
}

impl HubConnectionString {
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn shared_access_key_name(&self) -> &str {
        &self.shared_access_key_name
    }

    /// Credential to sign the service REST requests.
    pub fn credential(&self) -> SasCredential {
        SasCredential::new(
            self.host_name.clone(),
            Some(self.shared_access_key_name.clone()),
            self.shared_access_key.clone(),
        )
    }
}

impl FromStr for HubConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;

        for segment in s.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConfigError::Malformed(segment.to_string()))?;

            match key {
                "HostName" => host_name = Some(value.to_string()),
                "SharedAccessKeyName" => shared_access_key_name = Some(value.to_string()),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                _ => debug!(key, "ignoring connection string field"),
            }
        }

        Ok(Self {
            host_name: host_name.ok_or(ConfigError::MissingField("HostName"))?,
            shared_access_key_name: shared_access_key_name
                .ok_or(ConfigError::MissingField("SharedAccessKeyName"))?,
            shared_access_key: shared_access_key
                .ok_or(ConfigError::MissingField("SharedAccessKey"))?,
        })
    }
}

impl std::fmt::Debug for HubConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnectionString")
            .field("host_name", &self.host_name)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .finish_non_exhaustive()
    }
}

/// Arguments of the harness.
#[derive(Debug, Clone, Parser)]
#[command(name = "iothub-e2e")]
pub struct HarnessArgs {
    /// Owner connection string of the IoT Hub under test.
    #[arg(long, env = "IOTHUB_CONNECTION_STRING", hide_env_values = true)]
    pub iothub_connection_string: String,
    /// Storage account used by the file upload scenarios.
    #[arg(long, env = "STORAGE_ACCOUNT_CONNECTION_STRING", hide_env_values = true)]
    pub storage_account_connection_string: Option<String>,
    /// Base64 encoded PEM certificate for the self signed identities.
    #[arg(long, env = "IOTHUB_E2E_X509_CERT_BASE64")]
    pub x509_cert_base64: Option<String>,
    /// Base64 encoded PEM private key of the certificate.
    #[arg(long, env = "IOTHUB_E2E_X509_PRIVATE_KEY_BASE64", hide_env_values = true)]
    pub x509_private_key_base64: Option<String>,
    /// Expected thumbprint of the certificate.
    #[arg(long, env = "IOTHUB_E2E_X509_THUMBPRINT")]
    pub x509_thumbprint: Option<String>,
    /// Number of attempts for each test case.
    #[arg(long, env = "IOTHUB_E2E_RERUN_COUNT", default_value_t = DEFAULT_RERUN_COUNT)]
    pub rerun_count: usize,
    /// Delay between two test cases, in milliseconds.
    #[arg(long, env = "IOTHUB_E2E_INTERTEST_DELAY_MS", default_value_t = DEFAULT_INTERTEST_DELAY_MS)]
    pub intertest_delay_ms: u64,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub hub: HubConnectionString,
    pub storage_account_connection_string: Option<String>,
    pub certificate: Arc<CertificateMaterial>,
    pub rerun_count: usize,
    pub intertest_delay: Duration,
    /// Wait after the identities are registered, before they are used.
    pub settle_delay: Duration,
}

impl HarnessConfig {
    /// Reads the configuration from the environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let args = HarnessArgs::try_parse_from(["iothub-e2e"])?;

        Self::from_args(args)
    }

    pub fn from_args(args: HarnessArgs) -> Result<Self, ConfigError> {
        let hub: HubConnectionString = args.iothub_connection_string.parse()?;

        let certificate = match (args.x509_cert_base64, args.x509_private_key_base64) {
            (Some(cert), Some(key)) => {
                let material = CertificateMaterial::from_base64(&cert, &key)?;

                if let Some(thumbprint) = &args.x509_thumbprint {
                    material.verify_thumbprint(thumbprint)?;
                }

                material
            }
            (None, None) => {
                info!("no X.509 material configured, generating a self signed certificate");

                CertificateMaterial::generate(GENERATED_CERT_CN)?
            }
            _ => return Err(ConfigError::IncompleteCertificate),
        };

        Ok(Self {
            hub,
            storage_account_connection_string: args.storage_account_connection_string,
            certificate: Arc::new(certificate),
            rerun_count: args.rerun_count.max(1),
            intertest_delay: Duration::from_millis(args.intertest_delay_ms),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        })
    }
}
