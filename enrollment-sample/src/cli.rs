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

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Section;
use eyre::WrapErr;
use iothub_e2e::certificate::CertificateMaterial;
use iothub_e2e::provisioning::{
    AttestationMechanism, EnrollmentGroup, ProvisioningConnectionString, ProvisioningStatus,
};
use uuid::Uuid;

/// Common name of the signing certificate generated when none is given.
const GENERATED_CERT_CN: &str = "iothub-e2e-enrollment-group";

/// Creates, reads, queries and deletes an X.509 enrollment group.
#[derive(Debug, Parser)]
#[command(name = "enrollment-sample")]
pub(crate) struct Cli {
    /// Service connection string of the provisioning service.
    #[arg(long, env = "PROVISIONING_CONNECTION_STRING", hide_env_values = true)]
    pub(crate) connection_string: String,
    /// Hub the enrolled devices are assigned to, must be linked to the provisioning service.
    #[arg(long, env = "IOTHUB_HOST_NAME")]
    pub(crate) iothub_host_name: Option<String>,
    /// PEM signing certificate of the group, a self signed one is generated if missing.
    #[arg(long, env = "ENROLLMENT_SIGNING_CERTIFICATE")]
    pub(crate) certificate: Option<PathBuf>,
    /// Prefix of the generated enrollment group id.
    #[arg(long, default_value = "enrollmentgroupid")]
    pub(crate) group_prefix: String,
}

impl Cli {
    pub(crate) fn connection_string(&self) -> eyre::Result<ProvisioningConnectionString> {
        self.connection_string
            .parse()
            .wrap_err("couldn't parse the provisioning connection string")
    }

    pub(crate) fn group_id(&self) -> String {
        format!("{}-{}", self.group_prefix, Uuid::new_v4())
    }

    pub(crate) fn signing_certificate(&self) -> eyre::Result<String> {
        match &self.certificate {
            Some(path) => std::fs::read_to_string(path)
                .wrap_err("couldn't read the signing certificate")
                .with_note(|| format!("for file {}", path.display())),
            None => {
                let material = CertificateMaterial::generate(GENERATED_CERT_CN)?;

                Ok(material.certificate_pem().to_string())
            }
        }
    }

    /// Enabled group attested by the signing certificate.
    pub(crate) fn enrollment_group(&self, id: String, certificate: String) -> EnrollmentGroup {
        let group = EnrollmentGroup::new(id, AttestationMechanism::x509_signing_certificate(certificate))
            .with_provisioning_status(ProvisioningStatus::Enabled);

        match &self.iothub_host_name {
            Some(host_name) => group.with_iot_hub_host_name(host_name),
            None => group,
        }
    }
}

#[cfg(test)]
mod tests {
    use iothub_e2e::provisioning::AttestationType;
    use pretty_assertions::assert_eq;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut all = vec![
            "enrollment-sample",
            "--connection-string",
            "HostName=dps.net;SharedAccessKeyName=owner;SharedAccessKey=a2V5",
        ];
        all.extend_from_slice(args);

        Cli::try_parse_from(all).unwrap()
    }

    #[test]
    fn generated_group_id_has_prefix() {
        let cli = cli(&["--group-prefix", "sample"]);

        let id = cli.group_id();

        assert!(id.starts_with("sample-"));
        assert_ne!(id, cli.group_id());
    }

    #[test]
    fn builds_x509_group() {
        let cli = cli(&["--iothub-host-name", "hub.azure-devices.net"]);

        let group = cli.enrollment_group("group-1".to_string(), "PEM".to_string());

        assert_eq!(group.attestation.kind, AttestationType::X509);
        assert_eq!(group.iot_hub_host_name.as_deref(), Some("hub.azure-devices.net"));
        assert_eq!(group.provisioning_status, Some(ProvisioningStatus::Enabled));
        assert_eq!(cli.connection_string().unwrap().host_name(), "dps.net");
    }
}
