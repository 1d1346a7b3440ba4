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

//! Assertions that tag their failures with the identity under test.

use std::fmt::Debug;

use chrono::{DateTime, Local};

use crate::error::HarnessError;
use crate::transport::TransportProtocol;

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";

/// Hub, identity and protocol of a failing check, to find the run in the hub logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationDetails {
    hostname: String,
    device_id: String,
    module_id: Option<String>,
    protocol: TransportProtocol,
}

impl CorrelationDetails {
    pub fn new(
        hostname: impl Into<String>,
        device_id: impl Into<String>,
        module_id: Option<String>,
        protocol: TransportProtocol,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            device_id: device_id.into(),
            module_id: module_id.filter(|id| !id.is_empty()),
            protocol,
        }
    }

    /// The message followed by the correlation details, stamped with the local time.
    pub fn message(&self, base: &str) -> String {
        self.message_at(base, Local::now())
    }

    fn message_at(&self, base: &str, now: DateTime<Local>) -> String {
        let mut message = format!(
            "{base}: Correlation details : Hostname:{} Device id: {}",
            self.hostname, self.device_id
        );

        if let Some(module_id) = &self.module_id {
            message.push_str(" Module id: ");
            message.push_str(module_id);
        }

        message.push_str(&format!(
            " Protocol: {} Timestamp: {}",
            self.protocol,
            now.format(TIMESTAMP_FORMAT)
        ));

        message
    }

    pub fn fail(&self, message: &str) -> HarnessError {
        HarnessError::Assertion(self.message(message))
    }

    pub fn ensure(&self, condition: bool, message: &str) -> Result<(), HarnessError> {
        if condition {
            Ok(())
        } else {
            Err(self.fail(message))
        }
    }

    pub fn ensure_eq<T>(&self, expected: T, actual: T, message: &str) -> Result<(), HarnessError>
    where
        T: PartialEq + Debug,
    {
        if expected == actual {
            return Ok(());
        }

        Err(self.fail(&format!(
            "{message} expected:<{expected:?}> but was:<{actual:?}>"
        )))
    }
}
