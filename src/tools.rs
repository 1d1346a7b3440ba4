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

//! Small helpers shared by the scenarios.

use std::error::Error as StdError;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{trace, warn};

use crate::config::ConfigError;
use crate::error::Report;

/// Reads a required environment variable, an empty value counts as missing.
pub fn retrieve_env_var(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) | Err(_) => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

/// Returns the first error of type `E` in the source chain, the error itself included.
pub fn find_cause<'a, E>(err: &'a (dyn StdError + 'static)) -> Option<&'a E>
where
    E: StdError + 'static,
{
    let mut current = Some(err);

    while let Some(err) = current {
        if let Some(cause) = err.downcast_ref::<E>() {
            return Some(cause);
        }

        current = err.source();
    }

    None
}

/// Checks if an error of type `E` is anywhere in the source chain.
pub fn is_cause<E>(err: &(dyn StdError + 'static)) -> bool
where
    E: StdError + 'static,
{
    find_cause::<E>(err).is_some()
}

/// Polls the condition every `interval` until it's true or the timeout elapses.
///
/// Returns `false` on timeout.
pub async fn wait_until<F>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll).await.is_ok()
}

/// Retries an operation on `state` that may fail transiently, with a fixed delay.
///
/// Every attempt borrows the state mutably, so it can be a client opened in place.
pub async fn retry_with_delay<S, F, U, E>(
    times: usize,
    delay: Duration,
    state: &mut S,
    mut f: F,
) -> Result<U, E>
where
    S: ?Sized,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<U, E>>,
    E: StdError,
{
    let mut attempt = 1;

    loop {
        match f(state).await {
            Ok(out) => return Ok(out),
            Err(err) if attempt < times => {
                warn!(attempt, error = %Report::new(&err), "attempt failed, retrying");

                tokio::time::sleep(delay).await;

                attempt += 1;
            }
            Err(err) => {
                trace!(attempt, "no attempts left");

                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::client::ClientError;
    use crate::error::HarnessError;

    #[test]
    fn cause_is_found_in_chain() {
        let err = HarnessError::from(ClientError::TwinAlreadyInitialized);

        assert!(is_cause::<ClientError>(&err));
        assert!(is_cause::<HarnessError>(&err));
        assert!(!is_cause::<std::io::Error>(&err));
    }

    #[test]
    fn missing_env_var() {
        let err = retrieve_env_var("IOTHUB_E2E_SURELY_NOT_SET").unwrap_err();

        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "IOTHUB_E2E_SURELY_NOT_SET"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_times_out() {
        let ok = wait_until(Duration::from_secs(1), Duration::from_millis(100), || false).await;

        assert!(!ok);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let mut calls = 0usize;

        let res: Result<usize, ClientError> =
            retry_with_delay(3, Duration::from_millis(100), &mut calls, |calls| {
                async move {
                    *calls += 1;
                    if *calls < 3 {
                        Err(ClientError::NotOpen)
                    } else {
                        Ok(*calls)
                    }
                }
                .boxed()
            })
            .await;

        assert_eq!(res.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_returns_last_error() {
        let mut calls = 0usize;

        let res: Result<(), ClientError> =
            retry_with_delay(2, Duration::from_millis(100), &mut calls, |calls| {
                async move {
                    *calls += 1;

                    Err(ClientError::NotOpen)
                }
                .boxed()
            })
            .await;

        assert!(matches!(res, Err(ClientError::NotOpen)));
        assert_eq!(calls, 2);
    }
}
