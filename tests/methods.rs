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

//! Direct method scenarios driven against the in-memory hub.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use iothub_e2e::methods::{
    MethodError, MethodInvocation, MethodServiceClient, MethodTarget, METHOD_DELAY_IN_MILLISECONDS,
    METHOD_LOOPBACK, METHOD_NOT_DEFINED, METHOD_RESET, METHOD_RESET_STATUS, METHOD_SUCCESS,
    METHOD_UNKNOWN, PAYLOAD_STRING,
};
use iothub_e2e::suite::SuitePlan;
use iothub_e2e::{ClientRole, HarnessError};
use pretty_assertions::assert_eq;

use crate::common::{setup, FakeHub};

mod common;

fn method_service(hub: &Arc<FakeHub>) -> Arc<dyn MethodServiceClient> {
    Arc::clone(hub) as Arc<dyn MethodServiceClient>
}

#[tokio::test]
async fn reset_then_restart_serves_methods_again() {
    let hub = FakeHub::new();
    let methods = method_service(&hub);
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Device, "e2e-reset")).await;
    let opened = hub.opened();

    ctx.run_case(0, "reset", |handle| {
        let methods = Arc::clone(&methods);

        async move {
            let target = MethodTarget::from(handle.entry().identity().as_ref());

            let res = methods
                .invoke(&target, MethodInvocation::with_default_timeouts(METHOD_RESET))
                .await?;

            assert_eq!(res.status, METHOD_RESET_STATUS);
            assert_eq!(res.payload_str(), Some("reset:succeed"));
            assert!(handle.emulator().reset_requested());

            let connection_string = handle.entry().identity().connection_string().to_string();
            handle.restart(&connection_string).await?;

            assert!(handle.is_started());
            assert!(!handle.emulator().reset_requested());
            assert_eq!(handle.emulator().invocations(), 0);

            let res = methods
                .invoke(
                    &target,
                    MethodInvocation::with_default_timeouts(METHOD_LOOPBACK)
                        .with_payload(PAYLOAD_STRING),
                )
                .await?;

            assert_eq!(res.status, METHOD_SUCCESS);
            assert_eq!(res.payload_str(), Some("LOOPBACK:This is a valid payload"));

            Ok(())
        }
        .boxed()
    })
    .await
    .unwrap();

    // Reset before the case, then the restart.
    assert_eq!(hub.opened() - opened, 2);

    ctx.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn delay_beyond_the_response_timeout_is_a_gateway_timeout() {
    let hub = FakeHub::new();
    let methods = method_service(&hub);
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Module, "e2e-delay")).await;

    ctx.run_case(0, "delay", |handle| {
        let methods = Arc::clone(&methods);

        async move {
            let target = MethodTarget::from(handle.entry().identity().as_ref());

            let fast = MethodInvocation::new(METHOD_DELAY_IN_MILLISECONDS)
                .with_response_timeout(Duration::from_secs(5))
                .with_payload("100");
            let res = methods.invoke(&target, fast).await?;

            assert_eq!(res.status, METHOD_SUCCESS);
            assert_eq!(res.payload_str(), Some("delayInMilliseconds:succeed"));

            let slow = MethodInvocation::new(METHOD_DELAY_IN_MILLISECONDS)
                .with_response_timeout(Duration::from_secs(5))
                .with_payload("10000");
            let err = methods.invoke(&target, slow).await.unwrap_err();

            assert!(
                matches!(&err, MethodError::GatewayTimeout(name) if *name == target.to_string()),
                "{err:?}"
            );

            Ok(())
        }
        .boxed()
    })
    .await
    .unwrap();

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn unknown_method_is_not_defined() {
    let hub = FakeHub::new();
    let methods = method_service(&hub);
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Device, "e2e-unknown")).await;

    let results = ctx
        .run_all("unknown method", |handle| {
            let methods = Arc::clone(&methods);

            async move {
                let target = MethodTarget::from(handle.entry().identity().as_ref());

                let res = methods
                    .invoke(&target, MethodInvocation::with_default_timeouts(METHOD_UNKNOWN))
                    .await?;

                assert_eq!(res.status, METHOD_NOT_DEFINED);
                assert_eq!(res.payload_str(), Some("unknown:unknown"));

                Ok(())
            }
            .boxed()
        })
        .await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(Result::is_ok));

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn unknown_device_is_not_found() {
    let hub = FakeHub::new();
    let methods = method_service(&hub);
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Device, "e2e-missing")).await;

    let err = ctx
        .run_case(0, "unknown device", |_handle| {
            let methods = Arc::clone(&methods);

            async move {
                let target = MethodTarget::device("e2e-missing-device");

                methods
                    .invoke(&target, MethodInvocation::with_default_timeouts(METHOD_LOOPBACK))
                    .await?;

                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Method(MethodError::NotFound(target)) if target == "device e2e-missing-device"
    ));

    ctx.teardown().await.unwrap();
}
