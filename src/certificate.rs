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

//! X.509 material used by the self signed identities.

use base64::prelude::*;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use sha1::{Digest, Sha1};
use tracing::debug;

/// Errors that can occur while generating or loading the certificate material.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum CertificateError {
    /// Failed to generate the self signed certificate.
    #[error("couldn't generate the self signed certificate")]
    Generate(#[from] rcgen::Error),
    #[error("couldn't decode the base64 certificate material")]
    Base64(#[from] base64::DecodeError),
    /// Invalid UTF-8 character in the PEM file.
    #[error("invalid UTF-8 encoded PEM")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("couldn't parse the PEM certificate")]
    Pem(#[from] std::io::Error),
    #[error("no certificate found in the PEM")]
    MissingCertificate,
    /// The configured thumbprint doesn't belong to the certificate.
    #[error("thumbprint mismatch, configured {configured} but the certificate has {computed}")]
    ThumbprintMismatch { configured: String, computed: String },
}

/// PEM certificate, PEM private key and the thumbprint registered on the hub.
#[derive(Clone)]
pub struct CertificateMaterial {
    certificate_pem: String,
    private_key_pem: String,
    thumbprint: String,
}

impl CertificateMaterial {
    /// Generates a self signed certificate for the given common name.
    pub fn generate(common_name: &str) -> Result<Self, CertificateError> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);

        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::new([])?;
        params.distinguished_name = dn;

        let certificate = params.self_signed(&key_pair)?;
        let thumbprint = thumbprint(certificate.der());

        debug!(%thumbprint, "generated self signed certificate");

        Ok(Self {
            certificate_pem: certificate.pem(),
            private_key_pem: key_pair.serialize_pem(),
            thumbprint,
        })
    }

    /// Loads the material from PEM, the thumbprint is computed from the first certificate.
    pub fn from_pem(
        certificate_pem: String,
        private_key_pem: String,
    ) -> Result<Self, CertificateError> {
        let der = rustls_pemfile::certs(&mut certificate_pem.as_bytes())
            .next()
            .ok_or(CertificateError::MissingCertificate)??;

        let thumbprint = thumbprint(&der);

        Ok(Self {
            certificate_pem,
            private_key_pem,
            thumbprint,
        })
    }

    /// Loads base64 encoded PEM values, as stored in the environment.
    pub fn from_base64(certificate: &str, private_key: &str) -> Result<Self, CertificateError> {
        let certificate_pem = String::from_utf8(BASE64_STANDARD.decode(certificate.trim())?)?;
        let private_key_pem = String::from_utf8(BASE64_STANDARD.decode(private_key.trim())?)?;

        Self::from_pem(certificate_pem, private_key_pem)
    }

    /// Checks the configured thumbprint against the computed one, ignoring case.
    pub fn verify_thumbprint(&self, configured: &str) -> Result<(), CertificateError> {
        if configured.eq_ignore_ascii_case(&self.thumbprint) {
            return Ok(());
        }

        Err(CertificateError::ThumbprintMismatch {
            configured: configured.to_string(),
            computed: self.thumbprint.clone(),
        })
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// Upper case hex SHA-1 of the DER certificate.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

/// Upper case hex encoded SHA-1 digest of a DER certificate.
pub fn thumbprint(der: &[u8]) -> String {
    Sha1::digest(der)
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect()
}
