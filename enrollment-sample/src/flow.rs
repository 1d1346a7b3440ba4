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

//! Steps run on the enrollment group.

use eyre::WrapErr;
use iothub_e2e::provisioning::{
    EnrollmentGroup, ProvisioningServiceClient, QuerySpecification, ALL_ENROLLMENT_GROUPS,
};
use serde::Serialize;
use tracing::{error, info};

fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    let json = serde_json::to_string_pretty(value).wrap_err("couldn't serialize the result")?;

    println!("{json}");

    Ok(())
}

/// Creates the group, reads it back and queries all the groups, then deletes it.
///
/// Once created, the group is deleted even if a later step fails. The first error is returned.
pub(crate) async fn manage_group(
    client: &ProvisioningServiceClient,
    group: &EnrollmentGroup,
) -> eyre::Result<()> {
    let id = group.enrollment_group_id.as_str();

    info!(id, "creating the enrollment group");
    let created = client
        .create_or_update_enrollment_group(group)
        .await
        .wrap_err("couldn't create the enrollment group")?;
    print_json(&created)?;

    let res = inspect(client, id).await;

    info!(id, "deleting the enrollment group");
    let deleted = client
        .delete_enrollment_group(id)
        .await
        .wrap_err("couldn't delete the enrollment group");

    match (res, deleted) {
        (Err(err), Err(delete_err)) => {
            error!(id, error = %delete_err, "the enrollment group was left on the service");

            Err(err)
        }
        (res, deleted) => res.and(deleted),
    }
}

async fn inspect(client: &ProvisioningServiceClient, id: &str) -> eyre::Result<()> {
    info!(id, "getting the enrollment group");
    let found = client
        .get_enrollment_group(id)
        .await
        .wrap_err("couldn't get the enrollment group")?;
    print_json(&found)?;

    info!("querying the enrollment groups");
    let groups = client
        .query_enrollment_groups(&QuerySpecification::new(ALL_ENROLLMENT_GROUPS))
        .await
        .wrap_err("couldn't query the enrollment groups")?;
    for group in &groups {
        print_json(group)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use iothub_e2e::provisioning::{AttestationMechanism, ProvisioningStatus};
    use iothub_e2e::sas::SasCredential;
    use mockito::Matcher;

    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn client(server: &mockito::Server) -> ProvisioningServiceClient {
        let credential = SasCredential::new("dps", Some("owner".into()), "a2V5".into());

        ProvisioningServiceClient::with_base_url(server.url().parse().unwrap(), credential).unwrap()
    }

    fn group() -> EnrollmentGroup {
        EnrollmentGroup::new("sample-group", AttestationMechanism::x509_signing_certificate(PEM))
            .with_provisioning_status(ProvisioningStatus::Enabled)
    }

    #[tokio::test]
    async fn group_is_deleted_when_a_step_fails() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::to_string(&group()).unwrap();

        let _create = server
            .mock("PUT", "/enrollmentGroups/sample-group")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(&body)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/enrollmentGroups/sample-group")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/enrollmentGroups/sample-group")
            .match_query(Matcher::Any)
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let err = manage_group(&client(&server), &group()).await.unwrap_err();

        delete.assert_async().await;
        assert!(err.to_string().contains("couldn't get the enrollment group"));
    }

    #[tokio::test]
    async fn failed_creation_deletes_nothing() {
        let mut server = mockito::Server::new_async().await;

        let _create = server
            .mock("PUT", "/enrollmentGroups/sample-group")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("bad certificate")
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/enrollmentGroups/sample-group")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = manage_group(&client(&server), &group()).await.unwrap_err();

        delete.assert_async().await;
        assert!(err.to_string().contains("couldn't create the enrollment group"));
    }
}
