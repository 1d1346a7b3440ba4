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

//! Device twin scenarios.
//!
//! The device reports properties the service must see, and the service sets desired properties
//! the device must read back from its twin. Only the stateful protocols have a twin.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::client::{ClientError, TwinProperties};
use crate::error::HarnessError;
use crate::error_injection::FollowUp;
use crate::lifecycle::ConnectionHandle;
use crate::methods::MethodTarget;

pub const PROPERTY_KEY: &str = "Key";
pub const PROPERTY_VALUE: &str = "Value";
pub const PROPERTY_VALUE_UPDATE: &str = "Update";
/// Properties set by every scenario.
pub const MAX_PROPERTIES_TO_TEST: usize = 5;

/// How long the twin may take to reflect an update.
pub const TWIN_TIMEOUT: Duration = Duration::from_secs(60);
pub const TWIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Reads and updates the twins on behalf of the service.
#[async_trait]
pub trait TwinServiceClient: Send + Sync {
    async fn get_twin(&self, target: &MethodTarget) -> Result<TwinProperties, ClientError>;

    /// Merges the properties into the desired ones.
    async fn update_desired_properties(
        &self,
        target: &MethodTarget,
        properties: Map<String, Value>,
    ) -> Result<(), ClientError>;
}

/// `Key0` to `Key4`, each set to the prefix followed by a fresh uuid.
pub fn unique_properties(value_prefix: &str) -> Map<String, Value> {
    (0..MAX_PROPERTIES_TO_TEST)
        .map(|i| {
            (
                format!("{PROPERTY_KEY}{i}"),
                Value::String(format!("{value_prefix}{}", Uuid::new_v4())),
            )
        })
        .collect()
}

/// Checks every expected property is in the twin section with the same value.
pub fn contains_all(section: &Map<String, Value>, expected: &Map<String, Value>) -> bool {
    expected
        .iter()
        .all(|(key, value)| section.get(key) == Some(value))
}

/// Runs the twin scenarios on a started handle.
pub struct TwinScenario {
    service: Arc<dyn TwinServiceClient>,
    timeout: Duration,
    interval: Duration,
}

impl TwinScenario {
    pub fn new(service: Arc<dyn TwinServiceClient>) -> Self {
        Self {
            service,
            timeout: TWIN_TIMEOUT,
            interval: TWIN_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The device updates its reported properties, the service must read them.
    #[instrument(skip_all, fields(entry = %handle.entry()))]
    pub async fn reported_properties(&self, handle: &ConnectionHandle) -> Result<(), HarnessError> {
        let target = MethodTarget::from(handle.entry().identity().as_ref());
        let properties = unique_properties(PROPERTY_VALUE);

        handle
            .client()
            .update_reported_properties(properties.clone())
            .await?;

        self.poll("reported properties on the service twin", || async {
            let twin = self.service.get_twin(&target).await?;

            Ok::<_, HarnessError>(contains_all(&twin.reported, &properties))
        })
        .await?;

        info!("reported properties updated");

        Ok(())
    }

    /// The service updates the desired properties, the device must get them with its twin.
    #[instrument(skip_all, fields(entry = %handle.entry()))]
    pub async fn desired_properties(&self, handle: &ConnectionHandle) -> Result<(), HarnessError> {
        let target = MethodTarget::from(handle.entry().identity().as_ref());
        let properties = unique_properties(PROPERTY_VALUE_UPDATE);

        self.service
            .update_desired_properties(&target, properties.clone())
            .await?;

        self.poll("desired properties on the device twin", || async {
            let twin = handle.client().get_twin().await?;

            Ok::<_, HarnessError>(contains_all(&twin.desired, &properties))
        })
        .await?;

        info!("desired properties received");

        Ok(())
    }

    /// Polls until the check is true, failing on the first error or on timeout.
    async fn poll<F, Fut>(&self, operation: &str, mut check: F) -> Result<(), HarnessError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<bool, HarnessError>>,
    {
        let wait = async {
            loop {
                if check().await? {
                    return Ok::<(), HarnessError>(());
                }

                debug!(operation, "twin not updated yet");

                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| HarnessError::timeout(operation, self.timeout))?
    }
}

/// Updates the reported properties on the recovered connection.
pub struct TwinFollowUp {
    scenario: TwinScenario,
}

impl TwinFollowUp {
    pub fn new(service: Arc<dyn TwinServiceClient>) -> Self {
        Self {
            scenario: TwinScenario::new(service),
        }
    }
}

#[async_trait]
impl FollowUp for TwinFollowUp {
    async fn check(&self, handle: &mut ConnectionHandle) -> Result<(), HarnessError> {
        self.scenario.reported_properties(handle).await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::mock::MockTwinService;
    use super::*;
    use crate::client::mock::MockClient;
    use crate::lifecycle::tests::handle;
    use crate::transport::TransportProtocol;

    #[test]
    fn properties_are_unique() {
        let first = unique_properties(PROPERTY_VALUE);
        let second = unique_properties(PROPERTY_VALUE);

        assert_eq!(first.len(), MAX_PROPERTIES_TO_TEST);
        assert!(first.contains_key("Key0"));
        assert!(first.contains_key("Key4"));
        assert!(first["Key0"].as_str().unwrap().starts_with(PROPERTY_VALUE));
        assert_ne!(first, second);
    }

    #[test]
    fn contains_all_compares_values() {
        let section = json!({"Key0": "a", "Key1": "b", "other": 1});
        let section = section.as_object().unwrap();

        let expected = json!({"Key0": "a", "Key1": "b"});
        assert!(contains_all(section, expected.as_object().unwrap()));

        let stale = json!({"Key0": "a", "Key1": "c"});
        assert!(!contains_all(section, stale.as_object().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn reported_properties_reach_the_service() {
        let reported = Arc::new(Mutex::new(Map::new()));

        let mut client = MockClient::new();
        let sink = Arc::clone(&reported);
        client
            .expect_update_reported_properties()
            .once()
            .returning(move |properties| {
                sink.lock().unwrap().extend(properties);

                Ok(())
            });
        let handle = handle(TransportProtocol::Mqtt, client);

        let mut service = MockTwinService::new();
        let source = Arc::clone(&reported);
        let mut polls = 0;
        service.expect_get_twin().times(2).returning(move |target| {
            assert_eq!(target.device_id(), "dev-1");
            polls += 1;

            // The first read doesn't see the update yet.
            let reported = if polls == 1 {
                Map::new()
            } else {
                source.lock().unwrap().clone()
            };

            Ok(TwinProperties {
                desired: Map::new(),
                reported,
            })
        });

        TwinScenario::new(Arc::new(service))
            .reported_properties(&handle)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_desired_properties_time_out() {
        let mut client = MockClient::new();
        client
            .expect_get_twin()
            .returning(|| Ok(TwinProperties::default()));
        let handle = handle(TransportProtocol::Amqps, client);

        let mut service = MockTwinService::new();
        service
            .expect_update_desired_properties()
            .once()
            .returning(|_, properties| {
                assert_eq!(properties.len(), MAX_PROPERTIES_TO_TEST);

                Ok(())
            });

        let err = TwinScenario::new(Arc::new(service))
            .with_timeout(Duration::from_secs(5))
            .desired_properties(&handle)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_stops_the_polling() {
        let mut client = MockClient::new();
        client
            .expect_get_twin()
            .once()
            .returning(|| Err(ClientError::NotOpen));
        let handle = handle(TransportProtocol::Amqps, client);

        let mut service = MockTwinService::new();
        service
            .expect_update_desired_properties()
            .returning(|_, _| Ok(()));

        let err = TwinScenario::new(Arc::new(service))
            .desired_properties(&handle)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Client(ClientError::NotOpen)));
    }
}
