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

//! State shared by the test cases of a suite.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, info, instrument};

use crate::client::ClientFactory;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Report};
use crate::lifecycle::ConnectionHandle;
use crate::matrix::{MatrixGenerator, TestMatrix};
use crate::receive::BackToBackTracker;
use crate::registry::RegistryManager;
use crate::rerun::{catch_panic, Rerun};
use crate::teardown::{teardown, CleanupList};
use crate::transport::{AuthenticationType, ClientRole, TransportProtocol};

/// What a suite runs over.
#[derive(Debug, Clone)]
pub struct SuitePlan {
    pub role: ClientRole,
    pub protocols: Vec<TransportProtocol>,
    pub auth_types: Vec<AuthenticationType>,
    /// Prefix of the identities registered for the suite.
    pub prefix: String,
}

impl SuitePlan {
    /// Every protocol and authentication type.
    pub fn all(role: ClientRole, prefix: impl Into<String>) -> Self {
        Self {
            role,
            protocols: TransportProtocol::ALL.to_vec(),
            auth_types: AuthenticationType::ALL.to_vec(),
            prefix: prefix.into(),
        }
    }

    /// Without HTTPS, for the direct methods and the cloud to device messages.
    pub fn stateful(role: ClientRole, prefix: impl Into<String>) -> Self {
        Self {
            protocols: TransportProtocol::STATEFUL.to_vec(),
            ..Self::all(role, prefix)
        }
    }
}

/// Test case body, run on the handle of a matrix entry.
pub type CaseBody<'a> = BoxFuture<'a, Result<(), HarnessError>>;

/// The registry, the matrix with a handle per entry and what to clean up at the end.
pub struct SuiteContext {
    registry: Arc<dyn RegistryManager>,
    host_name: String,
    matrix: TestMatrix,
    handles: Vec<ConnectionHandle>,
    cleanup: CleanupList,
    rerun: Rerun,
    back_to_back: BackToBackTracker,
}

impl SuiteContext {
    /// Registers the identities and creates the clients.
    ///
    /// If the setup fails, what was already registered is removed before returning.
    #[instrument(skip_all, fields(role = %plan.role, prefix = %plan.prefix))]
    pub async fn setup(
        config: &HarnessConfig,
        registry: Arc<dyn RegistryManager>,
        factory: Arc<dyn ClientFactory>,
        plan: &SuitePlan,
    ) -> Result<Self, HarnessError> {
        let host_name = config.hub.host_name().to_string();
        let generator = MatrixGenerator::new(Arc::clone(&registry), host_name.as_str(), &plan.prefix)
            .with_settle_delay(config.settle_delay);

        let mut cleanup = CleanupList::default();

        let res = Self::connect(config, &generator, factory, plan, &mut cleanup).await;

        let (matrix, handles) = match res {
            Ok(ok) => ok,
            Err(err) => {
                error!(error = %Report::new(&err), "suite setup failed");

                if let Err(teardown_err) = teardown(registry.as_ref(), &mut [], &cleanup).await {
                    error!(error = %Report::new(&teardown_err), "couldn't clean up after the failed setup");
                }

                return Err(err);
            }
        };

        info!(entries = matrix.len(), "suite ready");

        Ok(Self {
            registry,
            host_name,
            matrix,
            handles,
            cleanup,
            rerun: Rerun::new(config.rerun_count),
            back_to_back: BackToBackTracker::new(),
        })
    }

    async fn connect(
        config: &HarnessConfig,
        generator: &MatrixGenerator,
        factory: Arc<dyn ClientFactory>,
        plan: &SuitePlan,
        cleanup: &mut CleanupList,
    ) -> Result<(TestMatrix, Vec<ConnectionHandle>), HarnessError> {
        let matrix = generator
            .generate(
                plan.role,
                &plan.protocols,
                &plan.auth_types,
                Arc::clone(&config.certificate),
                cleanup,
            )
            .await?;

        let handles = matrix
            .iter()
            .map(|entry| {
                ConnectionHandle::new(entry.clone(), Arc::clone(&factory))
                    .map(|handle| handle.with_intertest_delay(config.intertest_delay))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((matrix, handles))
    }

    pub fn registry(&self) -> &Arc<dyn RegistryManager> {
        &self.registry
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn matrix(&self) -> &TestMatrix {
        &self.matrix
    }

    pub fn handles(&self) -> &[ConnectionHandle] {
        &self.handles
    }

    pub fn cleanup(&self) -> &CleanupList {
        &self.cleanup
    }

    /// Message ids of the back to back scenario, cleared after every test case.
    pub fn back_to_back(&self) -> &BackToBackTracker {
        &self.back_to_back
    }

    /// Runs a test case on the entry at `index`.
    ///
    /// Every run resets the handle first, and releases it and clears the per test state after
    /// the body completes. The case is re-run on failure as configured, a panicking body is a
    /// failed run.
    #[instrument(skip(self, body))]
    pub async fn run_case<F>(
        &mut self,
        index: usize,
        name: &str,
        mut body: F,
    ) -> Result<(), HarnessError>
    where
        F: for<'h> FnMut(&'h mut ConnectionHandle) -> CaseBody<'h>,
    {
        let rerun = self.rerun;
        let handle = self.handles.get_mut(index).ok_or_else(|| {
            HarnessError::Assertion(format!("no matrix entry at index {index}"))
        })?;

        let mut run = 1;

        loop {
            let res = match handle.reset().await {
                Ok(()) => catch_panic(body(handle)).await,
                Err(err) => Err(err),
            };

            self.back_to_back.clear();
            handle.release().await;

            match res {
                Ok(()) => return Ok(()),
                Err(err) => {
                    rerun.report_failure(name, run, &err);

                    if run >= rerun.count() {
                        return Err(err);
                    }

                    run += 1;
                }
            }
        }
    }

    /// Runs the test case on every entry, one result per entry in matrix order.
    pub async fn run_all<F>(&mut self, name: &str, mut body: F) -> Vec<Result<(), HarnessError>>
    where
        F: for<'h> FnMut(&'h mut ConnectionHandle) -> CaseBody<'h>,
    {
        let mut results = Vec::with_capacity(self.handles.len());

        for index in 0..self.handles.len() {
            let entry = self.handles[index].entry().to_string();
            let name = format!("{name}[{entry}]");

            results.push(self.run_case(index, &name, &mut body).await);
        }

        results
    }

    /// Stops the clients and removes every registered identity.
    pub async fn teardown(mut self) -> Result<(), HarnessError> {
        teardown(self.registry.as_ref(), &mut self.handles, &self.cleanup).await
    }
}

impl std::fmt::Debug for SuiteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteContext")
            .field("host_name", &self.host_name)
            .field("matrix", &self.matrix)
            .field("cleanup", &self.cleanup)
            .field("rerun", &self.rerun)
            .finish_non_exhaustive()
    }
}
