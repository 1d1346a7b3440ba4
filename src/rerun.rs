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

//! Re-runs a flaky test case.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, instrument, warn};

use crate::config::DEFAULT_RERUN_COUNT;
use crate::error::{HarnessError, Report};

/// Runs a test case up to `count` times, until it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rerun {
    count: usize,
}

impl Rerun {
    /// A count of zero still runs the case once.
    pub fn new(count: usize) -> Self {
        Self {
            count: count.max(1),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns on the first success, or with the error of the last attempt.
    ///
    /// A panicking attempt counts as a failed one.
    #[instrument(skip(self, f))]
    pub async fn run<F, Fut, T>(&self, name: &str, mut f: F) -> Result<T, HarnessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HarnessError>>,
    {
        let mut run = 1;

        loop {
            match catch_panic(f()).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    self.report_failure(name, run, &err);

                    if run >= self.count {
                        return Err(err);
                    }

                    run += 1;
                }
            }
        }
    }

    /// Logs the failure of a run, for callers driving the runs themselves.
    pub fn report_failure(&self, name: &str, run: usize, err: &HarnessError) {
        if run < self.count {
            warn!(test = name, run, error = %Report::new(err), "failed run {run}");
        } else {
            error!(
                test = name,
                error = %Report::new(err),
                "test failed after {} failures", self.count
            );
        }
    }
}

/// Awaits the future, turning a panic into [`HarnessError::Panicked`].
pub(crate) async fn catch_panic<Fut, T>(fut: Fut) -> Result<T, HarnessError>
where
    Fut: Future<Output = Result<T, HarnessError>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(HarnessError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Default for Rerun {
    fn default() -> Self {
        Self::new(DEFAULT_RERUN_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn stops_at_first_success() {
        let calls = AtomicUsize::new(0);

        let out = Rerun::default()
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HarnessError::Assertion("first".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn returns_last_error_after_count_runs() {
        let calls = AtomicUsize::new(0);

        let err = Rerun::new(4)
            .run("broken", || async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;

                Err::<(), _>(HarnessError::Assertion(format!("run {call}")))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, HarnessError::Assertion(message) if message == "run 4"));
    }

    #[tokio::test]
    async fn panicking_run_is_retried() {
        let calls = AtomicUsize::new(0);

        let out = Rerun::new(2)
            .run("panics_once", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run");
                }

                Ok::<_, HarnessError>("second")
            })
            .await
            .unwrap();

        assert_eq!(out, "second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn last_panic_is_returned() {
        let calls = AtomicUsize::new(0);

        let err = Rerun::new(2)
            .run("always_panics", || async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call > 0 {
                    panic!("run {call}");
                }

                Ok::<(), HarnessError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Panicked(message) if message == "run 2"));
    }

    #[test]
    fn zero_runs_once() {
        assert_eq!(Rerun::new(0).count(), 1);
    }
}
