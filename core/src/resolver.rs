// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::{Context, Error, ProvideCredential, Result};
use log::{debug, warn};
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;

enum State<K> {
    Pending,
    Ready(Arc<K>),
    Failed(String),
}

/// CredentialResolver resolves a credential exactly once and shares it read-only.
///
/// Resolution runs in a background task started by [`CredentialResolver::spawn`].
/// Every caller of [`CredentialResolver::resolve`] waits on the same readiness
/// signal, so a request issued while resolution is still in flight is queued
/// instead of being signed with a missing credential. A failed resolution is
/// cached as well and reported as [`ErrorKind::CredentialUnavailable`](crate::ErrorKind::CredentialUnavailable)
/// to every later caller.
pub struct CredentialResolver<K> {
    state: watch::Receiver<State<K>>,
}

impl<K> Clone for CredentialResolver<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K> Debug for CredentialResolver<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            State::Pending => "pending",
            State::Ready(_) => "ready",
            State::Failed(_) => "failed",
        };

        f.debug_struct("CredentialResolver")
            .field("state", &state)
            .finish()
    }
}

impl<K> CredentialResolver<K>
where
    K: Send + Sync + 'static,
{
    /// Start resolving on the current tokio runtime.
    ///
    /// Returns a `ConfigInvalid` error when called outside a runtime.
    pub fn spawn(ctx: Context, provider: impl ProvideCredential<Credential = K>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            Error::config_invalid("credential resolution requires a running tokio runtime")
                .with_source(e)
        })?;

        Ok(Self::spawn_on(&handle, ctx, provider))
    }

    /// Start resolving on the given runtime handle.
    pub fn spawn_on(
        handle: &Handle,
        ctx: Context,
        provider: impl ProvideCredential<Credential = K>,
    ) -> Self {
        let (tx, rx) = watch::channel(State::Pending);

        handle.spawn(async move {
            let state = match provider.provide_credential(&ctx).await {
                Ok(Some(cred)) => {
                    debug!("credential resolved by {provider:?}");
                    State::Ready(Arc::new(cred))
                }
                Ok(None) => {
                    warn!("no valid credential found by {provider:?}");
                    State::Failed("no valid credential found in any provider".to_string())
                }
                Err(err) => {
                    warn!("credential resolution by {provider:?} failed: {err}");
                    State::Failed(err.to_string())
                }
            };

            // All receivers may be gone already, nobody is waiting then.
            let _ = tx.send(state);
        });

        Self { state: rx }
    }

    /// Build a resolver that already holds the given credential.
    pub fn ready(credential: K) -> Self {
        let (_, rx) = watch::channel(State::Ready(Arc::new(credential)));
        Self { state: rx }
    }

    /// Wait for resolution to finish and return the shared credential.
    pub async fn resolve(&self) -> Result<Arc<K>> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| !matches!(state, State::Pending))
            .await
            .map_err(|_| {
                Error::credential_unavailable(
                    "credential resolution stopped before producing a credential",
                )
            })?;

        match &*state {
            State::Ready(cred) => Ok(cred.clone()),
            State::Failed(reason) => Err(Error::credential_unavailable(
                "credentials not available",
            )
            .with_context(format!("cause: {reason}"))),
            State::Pending => Err(Error::credential_unavailable(
                "credential resolution is still pending",
            )),
        }
    }

    /// Return the credential if resolution already succeeded, without waiting.
    pub fn try_get(&self) -> Option<Arc<K>> {
        match &*self.state.borrow() {
            State::Ready(cred) => Some(cred.clone()),
            _ => None,
        }
    }

    /// Check if resolution is still in flight.
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.borrow(), State::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    struct CountingProvider {
        value: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProvideCredential for CountingProvider {
        type Credential = String;

        async fn provide_credential(&self, _: &Context) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.map(|v| v.to_string()))
        }
    }

    #[derive(Debug)]
    struct FailingProvider;

    #[async_trait]
    impl ProvideCredential for FailingProvider {
        type Credential = String;

        async fn provide_credential(&self, _: &Context) -> Result<Option<String>> {
            Err(Error::unexpected("instance metadata unreachable"))
        }
    }

    /// Holds resolution until the test releases it.
    #[derive(Debug)]
    struct GatedProvider {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl ProvideCredential for GatedProvider {
        type Credential = String;

        async fn provide_credential(&self, _: &Context) -> Result<Option<String>> {
            let gate = self.gate.lock().expect("lock poisoned").take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(Some("late".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ready_resolves_immediately() {
        let resolver = CredentialResolver::ready("explicit".to_string());

        assert!(!resolver.is_pending());
        assert_eq!(resolver.try_get().as_deref().map(String::as_str), Some("explicit"));
        let cred = resolver.resolve().await.expect("must resolve");
        assert_eq!(cred.as_str(), "explicit");
    }

    #[tokio::test]
    async fn test_resolves_once_and_shares() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::spawn(
            Context::new(),
            CountingProvider {
                value: Some("from-env"),
                calls: calls.clone(),
            },
        )
        .expect("runtime is running");

        let first = resolver.resolve().await.expect("must resolve");
        let second = resolver.clone().resolve().await.expect("must resolve");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_unavailable() {
        let resolver = CredentialResolver::spawn(
            Context::new(),
            CountingProvider {
                value: None,
                calls: Arc::new(AtomicUsize::new(0)),
            },
        )
        .expect("runtime is running");

        let err = resolver.resolve().await.expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(resolver.try_get().is_none());

        // Failure is cached, not retried.
        let err = resolver.resolve().await.expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
    }

    #[tokio::test]
    async fn test_provider_error_is_unavailable() {
        let resolver = CredentialResolver::spawn(Context::new(), FailingProvider)
            .expect("runtime is running");

        let err = resolver.resolve().await.expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(err.to_string().contains("instance metadata unreachable"));
    }

    #[tokio::test]
    async fn test_pending_resolution_is_awaited() {
        let (release, gate) = oneshot::channel();
        let resolver = CredentialResolver::spawn(
            Context::new(),
            GatedProvider {
                gate: Mutex::new(Some(gate)),
            },
        )
        .expect("runtime is running");
        assert!(resolver.is_pending());

        let waiter = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        release.send(()).expect("provider must be waiting");
        let cred = waiter
            .await
            .expect("task must not panic")
            .expect("must resolve");
        assert_eq!(cred.as_str(), "late");
    }

    #[test]
    fn test_spawn_without_runtime() {
        let err = CredentialResolver::spawn(Context::new(), FailingProvider)
            .expect_err("no runtime is running");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
