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

//! Full suites driven against the in-memory hub.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use iothub_e2e::error_injection::{
    message_list, ErrorInjectionFlow, FaultKind, FlowOutcome, MethodFollowUp, SendFollowUp,
};
use iothub_e2e::methods::{
    invoke_parallel, parallel_payload, MethodInvocation, MethodServiceClient, MethodTarget,
    METHOD_LOOPBACK, METHOD_SUCCESS, NUMBER_INVOKES_PARALLEL, PAYLOAD_STRING,
};
use iothub_e2e::receive::{receive_back_to_back, receive_message, ReceiveFollowUp, ServiceClient};
use iothub_e2e::suite::SuitePlan;
use iothub_e2e::{AuthenticationType, ClientRole, HarnessError, TransportProtocol};
use pretty_assertions::assert_eq;

use crate::common::{setup, FakeHub};

mod common;

#[tokio::test]
async fn device_matrix_is_sas_first_and_cleaned_up() {
    let hub = FakeHub::new();
    let ctx = setup(&hub, 1, &SuitePlan::all(ClientRole::Device, "e2e-matrix")).await;

    let entries: Vec<(TransportProtocol, AuthenticationType)> = ctx
        .matrix()
        .iter()
        .map(|entry| (entry.protocol(), entry.auth()))
        .collect();

    use AuthenticationType::{Sas, SelfSigned};
    use TransportProtocol::{Amqps, AmqpsWs, Https, Mqtt, MqttWs};
    assert_eq!(
        entries,
        [
            (Https, Sas),
            (Mqtt, Sas),
            (MqttWs, Sas),
            (Amqps, Sas),
            (AmqpsWs, Sas),
            (Https, SelfSigned),
            (Mqtt, SelfSigned),
            (Amqps, SelfSigned),
        ]
    );
    assert_eq!(hub.device_ids().len(), 2);
    assert!(ctx.cleanup().devices().iter().all(|id| id.starts_with("e2e-matrix")));

    ctx.teardown().await.unwrap();

    assert!(hub.device_ids().is_empty());
}

#[tokio::test]
async fn loopback_on_every_stateful_entry() {
    let hub = FakeHub::new();
    let methods: Arc<dyn MethodServiceClient> = Arc::clone(&hub) as Arc<dyn MethodServiceClient>;
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Module, "e2e-loopback")).await;

    let results = ctx
        .run_all("loopback", |handle| {
            let methods = Arc::clone(&methods);

            async move {
                let target = MethodTarget::from(handle.entry().identity().as_ref());
                let invocation = MethodInvocation::with_default_timeouts(METHOD_LOOPBACK)
                    .with_payload(PAYLOAD_STRING);

                let res = methods.invoke(&target, invocation).await?;

                assert_eq!(res.status, METHOD_SUCCESS);
                assert_eq!(res.payload_str(), Some("LOOPBACK:This is a valid payload"));
                assert_eq!(handle.emulator().invocations(), 1);

                Ok(())
            }
            .boxed()
        })
        .await;

    // Modules run over MQTT, MQTT_WS, AMQPS and AMQPS_WS with SAS, and over MQTT and AMQPS with
    // X.509.
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(Result::is_ok));

    ctx.teardown().await.unwrap();

    assert!(hub.device_ids().is_empty());
    assert_eq!(hub.module_count(), 0);
}

#[tokio::test]
async fn parallel_invocations_fill_every_slot() {
    let hub = FakeHub::new();
    let methods: Arc<dyn MethodServiceClient> = Arc::clone(&hub) as Arc<dyn MethodServiceClient>;
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Device, "e2e-parallel")).await;

    ctx.run_case(0, "parallel", |handle| {
        let methods = Arc::clone(&methods);

        async move {
            let target = MethodTarget::from(handle.entry().identity().as_ref());

            let results = invoke_parallel(methods, &target, NUMBER_INVOKES_PARALLEL).await;

            assert_eq!(results.len(), NUMBER_INVOKES_PARALLEL);
            for (worker, res) in results.into_iter().enumerate() {
                let res = res?;

                assert_eq!(res.status, METHOD_SUCCESS);
                assert_eq!(res.payload_str(), Some(parallel_payload(worker).as_str()));
            }

            Ok(())
        }
        .boxed()
    })
    .await
    .unwrap();

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn rerun_exhausts_and_propagates_last_failure() {
    let hub = FakeHub::new();
    let mut ctx = setup(&hub, 3, &SuitePlan::all(ClientRole::Device, "e2e-rerun")).await;
    let runs = Arc::new(AtomicUsize::new(0));
    let opened = hub.opened();

    let err = ctx
        .run_case(0, "always fails", |_handle| {
            let runs = Arc::clone(&runs);

            async move {
                let run = runs.fetch_add(1, Ordering::SeqCst) + 1;

                Err(HarnessError::Assertion(format!("run {run}")))
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(matches!(err, HarnessError::Assertion(message) if message == "run 3"));
    // Every run starts from a fresh connection.
    assert_eq!(hub.opened() - opened, 3);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn teardown_aggregates_failures() {
    let hub = FakeHub::new();
    let ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Module, "e2e-teardown")).await;

    let failing = ctx.cleanup().devices()[0].clone();
    hub.fail_removal_of(&failing);

    let err = ctx.teardown().await.unwrap_err();

    let failures = match err {
        HarnessError::TeardownFailed(failures) => failures,
        other => panic!("expected a teardown failure, got {other:?}"),
    };
    let resources: Vec<String> = failures.iter().map(|failure| failure.resource()).collect();
    assert_eq!(resources.len(), 2);
    assert!(resources[0].starts_with(&format!("module {failing}/")));
    assert_eq!(resources[1], format!("device {failing}"));

    // The other identity was removed anyway.
    assert_eq!(hub.device_ids(), [failing]);
    assert_eq!(hub.module_count(), 1);
}

#[tokio::test]
async fn cloud_to_device_messages_reach_every_entry() {
    let hub = FakeHub::new();
    let service: Arc<dyn ServiceClient> = Arc::clone(&hub) as Arc<dyn ServiceClient>;
    let mut ctx = setup(&hub, 1, &SuitePlan::stateful(ClientRole::Device, "e2e-receive")).await;
    let tracker = ctx.back_to_back().clone();

    let results = ctx
        .run_all("receive", |handle| {
            let service = Arc::clone(&service);
            let tracker = tracker.clone();

            async move {
                receive_message(handle, service.as_ref(), Duration::from_secs(5)).await?;
                receive_back_to_back(handle, service.as_ref(), &tracker, Duration::from_secs(5))
                    .await
            }
            .boxed()
        })
        .await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(Result::is_ok));
    // Cleared after every case.
    assert!(ctx.back_to_back().sent().is_empty());

    ctx.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn error_injection_recovers_on_applicable_entries() {
    let hub = FakeHub::new();
    let methods: Arc<dyn MethodServiceClient> = Arc::clone(&hub) as Arc<dyn MethodServiceClient>;
    let service: Arc<dyn ServiceClient> = Arc::clone(&hub) as Arc<dyn ServiceClient>;
    let mut ctx = setup(&hub, 1, &SuitePlan::all(ClientRole::Device, "e2e-faults")).await;
    let flow = ErrorInjectionFlow::default();
    let outcomes = Arc::new(std::sync::Mutex::new(Vec::new()));

    let results = ctx
        .run_all("tcp connection drop", |handle| {
            let methods = Arc::clone(&methods);
            let service = Arc::clone(&service);
            let outcomes = Arc::clone(&outcomes);

            async move {
                let fault = FaultKind::TcpConnectionDrop;

                let sent = flow
                    .run(handle, fault, &SendFollowUp::default())
                    .await?;
                let methods = flow
                    .run(handle, fault, &MethodFollowUp::new(methods))
                    .await?;
                let received = flow
                    .run(handle, fault, &ReceiveFollowUp::new(service))
                    .await?;
                let listed = flow.send_messages(handle, &message_list(fault)).await?;

                outcomes
                    .lock()
                    .unwrap()
                    .push((handle.entry().protocol(), [sent, methods, received, listed]));

                Ok(())
            }
            .boxed()
        })
        .await;

    assert!(results.iter().all(Result::is_ok));

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 8);
    for (protocol, flows) in outcomes.iter() {
        let expected = if protocol.is_stateful() {
            FlowOutcome::Recovered
        } else {
            FlowOutcome::Skipped
        };

        assert!(flows.iter().all(|outcome| *outcome == expected), "{protocol}: {flows:?}");
    }

    ctx.teardown().await.unwrap();
}
