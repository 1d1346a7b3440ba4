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

//! Error types for the harness.

use std::error::Error as StdError;
use std::fmt::Display;
use std::time::Duration;

use crate::certificate::CertificateError;
use crate::client::ClientError;
use crate::config::ConfigError;
use crate::methods::MethodError;
use crate::provisioning::ProvisioningError;
use crate::registry::RegistryError;
use crate::teardown::TeardownFailure;

/// Harness error.
///
/// Configuration and registry errors are fatal for the whole suite, assertion failures are
/// retried by the [`Rerun`](crate::rerun::Rerun) rule and teardown failures are aggregated.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    /// Missing or invalid configuration.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// A registry operation failed during setup.
    #[error("couldn't complete registry operation")]
    Registry(#[from] RegistryError),

    /// Error returned by the device client collaborator.
    #[error("device client error")]
    Client(#[from] ClientError),

    /// Error returned by the direct method service collaborator.
    #[error("direct method invocation failed")]
    Method(#[from] MethodError),

    #[error("invalid certificate material")]
    Certificate(#[from] CertificateError),

    #[error("provisioning service error")]
    Provisioning(#[from] ProvisioningError),

    /// Expected and observed behaviour differ.
    #[error("{0}")]
    Assertion(String),

    /// An operation didn't complete in time.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// One or more resources couldn't be cleaned up.
    #[error("teardown failed for {}", display_failures(.0))]
    TeardownFailed(Vec<TeardownFailure>),

    /// The body of a test case panicked.
    #[error("test case panicked: {0}")]
    Panicked(String),

    /// A spawned test task panicked or was cancelled.
    #[error("test task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl HarnessError {
    pub(crate) fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

fn display_failures(failures: &[TeardownFailure]) -> String {
    itertools::join(failures.iter().map(|failure| failure.resource()), ", ")
}

/// Display an error together with all its sources.
///
/// Used to log an error on a single line: `error!(error = %Report::new(&err), "...")`.
pub struct Report<E> {
    error: E,
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> Display for Report<E>
where
    E: StdError,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;

            source = err.source();
        }

        Ok(())
    }
}
