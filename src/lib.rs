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

//! End to end test harness for an IoT Hub.
//!
//! The harness provisions throw-away identities on a live hub, builds the matrix of transport
//! protocols and authentication types to exercise, drives each scenario through the device client
//! collaborator and cleans everything up afterwards.
//!
//! The device client, the registry and the service clients are reached through the traits in
//! [`client`], [`registry`], [`methods`] and [`receive`], so the scenarios can run against any SDK
//! binding or against an in-memory fake.

pub mod certificate;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod error_injection;
pub mod identity;
pub mod lifecycle;
pub mod matrix;
pub mod message;
pub mod methods;
pub mod provisioning;
pub mod receive;
pub mod registry;
pub mod rest;
pub mod rerun;
pub mod sas;
pub mod status;
pub mod suite;
pub mod teardown;
pub mod tools;
pub mod transport;
pub mod twin;

pub use crate::error::HarnessError;
pub use crate::matrix::{TestMatrix, TestMatrixEntry};
pub use crate::transport::{AuthenticationType, ClientRole, TransportProtocol};
