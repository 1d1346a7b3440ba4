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

//! Manages an enrollment group on the device provisioning service.
//!
//! Creates an X.509 enrollment group with a generated id, reads it back, queries all the groups and
//! finally deletes it, printing every result as JSON. The group is deleted even when reading it
//! back or querying fails.

use clap::Parser;
use iothub_e2e::provisioning::ProvisioningServiceClient;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

mod cli;
mod flow;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()?;

    let cli = Cli::parse();

    let client = ProvisioningServiceClient::new(&cli.connection_string()?)?;

    let group = cli.enrollment_group(cli.group_id(), cli.signing_certificate()?);

    flow::manage_group(&client, &group).await
}
