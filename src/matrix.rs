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

//! Matrix of protocol and authentication combinations a suite runs over.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use itertools::iproduct;
use tracing::{debug, info, instrument};

use crate::certificate::CertificateMaterial;
use crate::config::DEFAULT_SETTLE_DELAY_MS;
use crate::identity::{EphemeralIdentity, IdentityProvisioner};
use crate::registry::{RegistryError, RegistryManager};
use crate::teardown::CleanupList;
use crate::transport::{AuthenticationType, ClientRole, TransportProtocol};

/// Combinations the hub doesn't support.
///
/// Modules can't connect over HTTPS and X.509 isn't available over WebSockets.
pub fn is_excluded(role: ClientRole, protocol: TransportProtocol, auth: AuthenticationType) -> bool {
    (role == ClientRole::Module && protocol == TransportProtocol::Https)
        || (auth.is_x509() && protocol.is_websocket())
}

/// Valid combinations, every protocol for the first auth type before the next auth type.
pub fn combinations(
    role: ClientRole,
    protocols: &[TransportProtocol],
    auth_types: &[AuthenticationType],
) -> Vec<(TransportProtocol, AuthenticationType)> {
    iproduct!(auth_types.iter().copied(), protocols.iter().copied())
        .filter(|&(auth, protocol)| !is_excluded(role, protocol, auth))
        .map(|(auth, protocol)| (protocol, auth))
        .collect()
}

/// A single parametrization of a suite.
#[derive(Debug, Clone)]
pub struct TestMatrixEntry {
    protocol: TransportProtocol,
    auth: AuthenticationType,
    role: ClientRole,
    identity: Arc<EphemeralIdentity>,
    certificate: Arc<CertificateMaterial>,
}

impl TestMatrixEntry {
    pub fn new(
        protocol: TransportProtocol,
        auth: AuthenticationType,
        role: ClientRole,
        identity: Arc<EphemeralIdentity>,
        certificate: Arc<CertificateMaterial>,
    ) -> Self {
        Self {
            protocol,
            auth,
            role,
            identity,
            certificate,
        }
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn auth(&self) -> AuthenticationType {
        self.auth
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    pub fn identity(&self) -> &Arc<EphemeralIdentity> {
        &self.identity
    }

    pub fn certificate(&self) -> &Arc<CertificateMaterial> {
        &self.certificate
    }

    /// The certificate the client must present, only for X.509 entries.
    pub fn client_certificate(&self) -> Option<Arc<CertificateMaterial>> {
        self.auth.is_x509().then(|| Arc::clone(&self.certificate))
    }
}

impl Display for TestMatrixEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.role, self.protocol, self.auth)
    }
}

/// Ordered entries of a suite.
#[derive(Debug, Clone, Default)]
pub struct TestMatrix {
    entries: Vec<TestMatrixEntry>,
}

impl TestMatrix {
    pub fn entries(&self) -> &[TestMatrixEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TestMatrixEntry> {
        self.entries.iter()
    }
}

impl IntoIterator for TestMatrix {
    type Item = TestMatrixEntry;
    type IntoIter = std::vec::IntoIter<TestMatrixEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Registers the identities and builds the matrix.
pub struct MatrixGenerator {
    provisioner: IdentityProvisioner,
    settle_delay: Duration,
}

impl MatrixGenerator {
    pub fn new(
        registry: Arc<dyn RegistryManager>,
        host_name: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            provisioner: IdentityProvisioner::new(registry, host_name, prefix),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }

    /// Wait after the registration, for the identities to propagate in the hub.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn provisioner(&self) -> &IdentityProvisioner {
        &self.provisioner
    }

    /// Registers one identity per authentication type in use and builds an entry per valid
    /// combination.
    ///
    /// The registered identities are recorded in `cleanup` even when the generation fails.
    #[instrument(skip(self, protocols, auth_types, certificate, cleanup))]
    pub async fn generate(
        &self,
        role: ClientRole,
        protocols: &[TransportProtocol],
        auth_types: &[AuthenticationType],
        certificate: Arc<CertificateMaterial>,
        cleanup: &mut CleanupList,
    ) -> Result<TestMatrix, RegistryError> {
        let combinations = combinations(role, protocols, auth_types);

        let mut identities: HashMap<AuthenticationType, Arc<EphemeralIdentity>> = HashMap::new();
        let mut entries = Vec::with_capacity(combinations.len());

        for (protocol, auth) in combinations {
            let identity = match identities.get(&auth) {
                Some(identity) => Arc::clone(identity),
                None => {
                    let identity = self
                        .provisioner
                        .create(role, auth, &certificate, cleanup)
                        .await?;
                    let identity = Arc::new(identity);

                    identities.insert(auth, Arc::clone(&identity));

                    identity
                }
            };

            debug!(%protocol, %auth, "matrix entry");

            entries.push(TestMatrixEntry::new(
                protocol,
                auth,
                role,
                identity,
                Arc::clone(&certificate),
            ));
        }

        info!(
            entries = entries.len(),
            identities = identities.len(),
            "matrix generated"
        );

        tokio::time::sleep(self.settle_delay).await;

        Ok(TestMatrix { entries })
    }
}
