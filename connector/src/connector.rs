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

use crate::{
    ConnectorConfig, Endpoint, Host, RequestDescriptor, RequestParams, ReqwestTransport, Response,
    ResponseAccumulator, Transport,
};
use bytes::Bytes;
use esigv4_aws_v4::constants::{PRESIGNED_EXPIRES, SERVICE_ES, X_AMZ_CONTENT_SHA_256};
use esigv4_aws_v4::{Config, Credential, DefaultCredentialProvider, RequestSigner};
use esigv4_core::hash::hex_sha256;
use esigv4_core::{
    Context, CredentialResolver, Error, ErrorKind, OsEnv, ProvideCredential, Result, Signer,
};
use esigv4_file_read_tokio::TokioFileRead;
use esigv4_http_send_reqwest::ReqwestHttpSend;
use http::header::HOST;
use http::{HeaderValue, Method};
use log::{debug, trace};
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Connection is what a search client talks to.
pub trait Connection: Send + Sync {
    /// Start a request.
    ///
    /// Returns before anything is sent, so the call can be aborted at any
    /// point through [`InFlight::abort_handle`].
    fn request(&self, params: RequestParams) -> InFlight;
}

/// Stage of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Params are turned into a descriptor.
    Building,
    /// Waiting for credentials and signing.
    Signing,
    /// Request submitted, waiting for the response head.
    Dispatching,
    /// Receiving the body.
    Streaming,
    /// A response was delivered.
    Completed,
    /// An error was delivered.
    Failed,
    /// The caller aborted the call.
    Aborted,
}

impl Stage {
    /// Check if the call reached a terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Aborted)
    }
}

/// SignedConnector signs every request with SigV4 for the `es` service and
/// sends it over a [`Transport`].
///
/// Credentials are resolved once per connector in the background; calls
/// issued before that finished wait for it.
#[derive(Clone)]
pub struct SignedConnector {
    inner: Arc<Inner>,
}

struct Inner {
    host: Host,
    endpoint: Endpoint,
    region: String,
    request_timeout: Duration,
    signer: Signer<Credential>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
}

impl Debug for SignedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedConnector")
            .field("endpoint", &self.inner.endpoint)
            .field("region", &self.inner.region)
            .field("request_timeout", &self.inner.request_timeout)
            .field("signer", &self.inner.signer)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl SignedConnector {
    /// Create a connector with the default context, transport and credential chain.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(host: Host, config: ConnectorConfig) -> Result<Self> {
        Self::builder(host).config(config).build()
    }

    /// Start building a connector for `host`.
    pub fn builder(host: Host) -> ConnectorBuilder {
        ConnectorBuilder {
            host,
            config: ConnectorConfig::default(),
            ctx: None,
            transport: None,
            provider: None,
            signer: None,
        }
    }

    /// Endpoint this connector sends to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Region requests are signed for.
    pub fn region(&self) -> &str {
        &self.inner.region
    }
}

impl Connection for SignedConnector {
    fn request(&self, params: RequestParams) -> InFlight {
        let (tx, rx) = oneshot::channel();
        let completion = Arc::new(Completion::new(tx, &params));

        let inner = self.inner.clone();
        let guard = SettleOnDrop(completion.clone());
        let task = self.inner.runtime.spawn(async move {
            let completion = &guard.0;
            let outcome = match tokio::time::timeout(
                inner.request_timeout,
                inner.execute(params, completion),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::timeout("request did not complete in time")
                    .with_context(format!("timeout: {:?}", inner.request_timeout))),
            };
            completion.settle(outcome);
        });

        InFlight {
            rx,
            abort: AbortHandle {
                completion,
                task: task.abort_handle(),
            },
        }
    }
}

impl Inner {
    async fn execute(&self, params: RequestParams, completion: &Completion) -> Result<Response> {
        completion.enter(Stage::Building)?;
        let descriptor = RequestDescriptor::build(&self.host, params)?;

        completion.enter(Stage::Signing)?;
        let req = self.sign(descriptor).await?;

        completion.enter(Stage::Dispatching)?;
        debug!("dispatching {} {}", req.method(), req.uri());
        let resp = self.transport.send(req).await?;

        completion.enter(Stage::Streaming)?;
        let (parts, mut body) = resp.into_parts();
        let mut acc = ResponseAccumulator::new(parts.status, parts.headers);
        while let Some(chunk) = body.chunk().await? {
            // Settled by abort, nothing may be appended anymore.
            if completion.is_settled() {
                return Err(Error::aborted("request aborted while streaming"));
            }
            acc.append(&chunk)?;
        }
        acc.finish()
    }

    async fn sign(&self, descriptor: RequestDescriptor) -> Result<http::Request<Bytes>> {
        let (mut parts, body) = descriptor.into_request(&self.endpoint)?.into_parts();

        parts
            .headers
            .insert(HOST, HeaderValue::from_str(&self.endpoint.host_header())?);
        parts
            .headers
            .insert(PRESIGNED_EXPIRES, HeaderValue::from_static("false"));
        parts
            .headers
            .insert(X_AMZ_CONTENT_SHA_256, HeaderValue::from_str(&hex_sha256(&body))?);

        self.signer.sign(&mut parts).await?;
        Ok(http::Request::from_parts(parts, body))
    }
}

/// ConnectorBuilder assembles a [`SignedConnector`].
pub struct ConnectorBuilder {
    host: Host,
    config: ConnectorConfig,
    ctx: Option<Context>,
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Box<dyn FnOnce(&Handle, Context) -> CredentialResolver<Credential> + Send>>,
    signer: Option<Signer<Credential>>,
}

impl ConnectorBuilder {
    /// Set the connector config.
    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this context for environment, file and metadata access.
    pub fn context(mut self, ctx: Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Send requests over this transport.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Resolve credentials from this provider instead of the default chain.
    ///
    /// Takes precedence over credentials set in the config.
    pub fn credential_provider(
        mut self,
        provider: impl ProvideCredential<Credential = Credential>,
    ) -> Self {
        self.provider = Some(Box::new(move |handle, ctx| {
            CredentialResolver::spawn_on(handle, ctx, provider)
        }));
        self
    }

    /// Use a ready signer; region and credential settings are ignored then.
    pub fn signer(mut self, signer: Signer<Credential>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Build the connector.
    ///
    /// Credential resolution starts right away, this never waits for it.
    pub fn build(self) -> Result<SignedConnector> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::config_invalid("connector requires a running tokio runtime").with_source(e)
        })?;

        let endpoint = Endpoint::from_host(&self.host)?;
        let ctx = match self.ctx {
            Some(ctx) => ctx,
            None => default_context()?,
        };

        let mut config = Config::from_env(&ctx);
        if let Some(region) = self.config.amazon.region.filter(|v| !v.is_empty()) {
            config.region = Some(region);
        }
        let region = config.region_or_default().to_string();

        let signer = match self.signer {
            Some(signer) => signer,
            None => {
                let resolver = match (self.provider, self.config.amazon.credentials) {
                    (Some(spawn), _) => spawn(&runtime, ctx.clone()),
                    (None, Some(cred)) => CredentialResolver::ready(cred),
                    (None, None) => CredentialResolver::spawn_on(
                        &runtime,
                        ctx.clone(),
                        DefaultCredentialProvider::new(Arc::new(config)),
                    ),
                };
                Signer::with_resolver(ctx, resolver, RequestSigner::new(SERVICE_ES, &region))
            }
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        debug!("connector for {endpoint} signs for region {region}");
        Ok(SignedConnector {
            inner: Arc::new(Inner {
                host: self.host,
                endpoint,
                region,
                request_timeout: self.config.request_timeout,
                signer,
                transport,
                runtime,
            }),
        })
    }
}

fn default_context() -> Result<Context> {
    // Metadata endpoints are unreachable off AWS; do not let them stall resolution.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(1))
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| Error::config_invalid("failed to build metadata client").with_source(e))?;

    Ok(Context::new()
        .with_file_read(TokioFileRead)
        .with_http_send(ReqwestHttpSend::new(client))
        .with_env(OsEnv))
}

/// InFlight resolves to the outcome of one call.
///
/// Dropping it does not cancel the call; use [`AbortHandle::abort`] for that.
#[derive(Debug)]
pub struct InFlight {
    rx: oneshot::Receiver<Result<Response>>,
    abort: AbortHandle,
}

impl InFlight {
    /// Handle that aborts this call.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl Future for InFlight {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(Error::unexpected("request task ended without an outcome")))
        })
    }
}

/// AbortHandle cancels a call that has not completed yet.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    completion: Arc<Completion>,
    task: tokio::task::AbortHandle,
}

impl AbortHandle {
    /// Abort the call.
    ///
    /// The caller gets an `Aborted` error and the exchange is torn down. Does
    /// nothing once the call completed.
    pub fn abort(&self) {
        if self
            .completion
            .settle(Err(Error::aborted("request aborted by caller")))
        {
            self.task.abort();
        }
    }

    /// Current stage of the call.
    pub fn stage(&self) -> Stage {
        self.completion.stage()
    }

    /// Check if an outcome was delivered.
    pub fn is_finished(&self) -> bool {
        self.completion.is_settled()
    }
}

/// Completion makes sure a call delivers exactly one outcome.
struct Completion {
    state: Mutex<CompletionState>,
    method: Method,
    path: String,
    started: Instant,
}

struct CompletionState {
    stage: Stage,
    tx: Option<oneshot::Sender<Result<Response>>>,
}

impl Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("stage", &self.stage())
            .finish()
    }
}

impl Completion {
    fn new(tx: oneshot::Sender<Result<Response>>, params: &RequestParams) -> Self {
        Self {
            state: Mutex::new(CompletionState {
                stage: Stage::Building,
                tx: Some(tx),
            }),
            method: params.method.clone(),
            path: params.path.clone(),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CompletionState> {
        // No code panics while holding the lock, recover the state anyway.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stage(&self) -> Stage {
        self.lock().stage
    }

    fn is_settled(&self) -> bool {
        self.lock().tx.is_none()
    }

    /// Move to `stage`, failing with `Aborted` if the call is already settled.
    fn enter(&self, stage: Stage) -> Result<()> {
        let mut state = self.lock();
        if state.tx.is_none() {
            return Err(Error::aborted("request already settled"));
        }
        state.stage = stage;
        Ok(())
    }

    /// Deliver `outcome` unless something was delivered already.
    ///
    /// Returns `true` for the single call that delivered.
    fn settle(&self, outcome: Result<Response>) -> bool {
        let tx = {
            let mut state = self.lock();
            let Some(tx) = state.tx.take() else {
                return false;
            };
            state.stage = match &outcome {
                Ok(_) => Stage::Completed,
                Err(err) if err.kind() == ErrorKind::Aborted => Stage::Aborted,
                Err(_) => Stage::Failed,
            };
            tx
        };

        match &outcome {
            Ok(resp) => trace!(
                "{} {} -> {} ({} bytes) in {:?}",
                self.method,
                self.path,
                resp.status,
                resp.body.len(),
                self.started.elapsed()
            ),
            Err(err) => trace!(
                "{} {} -> {err} in {:?}",
                self.method,
                self.path,
                self.started.elapsed()
            ),
        }

        // The caller may have dropped the InFlight already.
        let _ = tx.send(outcome);
        true
    }
}

/// Settles the call if its task goes away without doing so, e.g. on panic
/// or runtime shutdown.
struct SettleOnDrop(Arc<Completion>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        self.0
            .settle(Err(Error::unexpected("request task ended before completing")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BodyEnd, MockTransport, Script};
    use crate::FullBody;
    use async_trait::async_trait;
    use esigv4_core::StaticEnv;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::Ordering;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn static_ctx(envs: &[(&str, &str)]) -> Context {
        Context::new().with_env(StaticEnv {
            home_dir: None,
            envs: envs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        })
    }

    fn connector(transport: &MockTransport, config: ConnectorConfig) -> SignedConnector {
        SignedConnector::builder(Host::new("search.us-east-1.es.amazonaws.com"))
            .context(static_ctx(&[]))
            .config(config)
            .transport(transport.clone())
            .build()
            .expect("connector must build")
    }

    fn with_credentials() -> ConnectorConfig {
        ConnectorConfig::default().with_credentials(Credential::new("AKIDEXAMPLE", "SECRET"))
    }

    fn gzip(input: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(input).expect("write must succeed");
        enc.finish().expect("finish must succeed")
    }

    #[tokio::test]
    async fn test_signed_search() -> Result<()> {
        init_logger();

        let transport = MockTransport::new(Script::respond(200, &[], &[b"{}"]));
        let conn = connector(&transport, with_credentials());

        let resp = conn
            .request(RequestParams::new(Method::GET, "/_search").with_query("q", "a"))
            .await?;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, "{}");

        let reqs = transport.requests();
        assert_eq!(reqs.len(), 1);
        let req = &reqs[0];
        assert_eq!(
            req.uri().to_string(),
            "https://search.us-east-1.es.amazonaws.com/_search?q=a"
        );
        assert_eq!(req.headers()[HOST], "search.us-east-1.es.amazonaws.com");
        assert_eq!(req.headers()[PRESIGNED_EXPIRES], "false");
        assert_eq!(req.headers()[X_AMZ_CONTENT_SHA_256], hex_sha256(b""));

        let auth = req.headers()[http::header::AUTHORIZATION].to_str()?;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/es/aws4_request"));
        assert!(!auth.contains("presigned-expires"));
        Ok(())
    }

    #[tokio::test]
    async fn test_body_digest() -> Result<()> {
        let transport = MockTransport::new(Script::respond(201, &[], &[b"created"]));
        let conn = connector(&transport, with_credentials());

        let body = r#"{"title":"rust"}"#;
        let resp = conn
            .request(RequestParams::new(Method::PUT, "/books/_doc/1").with_body(body))
            .await?;
        assert_eq!(resp.status, StatusCode::CREATED);

        let reqs = transport.requests();
        let req = &reqs[0];
        assert_eq!(
            req.headers()[X_AMZ_CONTENT_SHA_256],
            hex_sha256(body.as_bytes()).as_str()
        );
        assert_eq!(req.body().as_ref(), body.as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() -> Result<()> {
        let transport = MockTransport::new(Script::respond(502, &[], &[b"bad ", b"gateway"]));
        let conn = connector(&transport, with_credentials());

        let inflight = conn.request(RequestParams::new(Method::GET, "/"));
        let handle = inflight.abort_handle();
        let resp = inflight.await?;

        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
        assert_eq!(resp.body, "bad gateway");
        assert_eq!(handle.stage(), Stage::Completed);
        assert!(handle.is_finished());
        Ok(())
    }

    #[tokio::test]
    async fn test_gzip_response() -> Result<()> {
        let body = r#"{"took":3,"hits":{"hits":[]}}"#;
        let encoded = gzip(body.as_bytes());
        let chunks = encoded.chunks(5).collect::<Vec<_>>();

        let transport =
            MockTransport::new(Script::respond(200, &[("Content-Encoding", "gzip")], &chunks));
        let conn = connector(&transport, with_credentials());

        let resp = conn.request(RequestParams::new(Method::GET, "/_search")).await?;
        assert_eq!(resp.body, body);
        Ok(())
    }

    #[tokio::test]
    async fn test_deflate_response() -> Result<()> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(b"acknowledged")?;
        let encoded = enc.finish()?;

        let transport = MockTransport::new(Script::respond(
            200,
            &[("content-encoding", "Deflate ")],
            &[encoded.as_slice()],
        ));
        let conn = connector(&transport, with_credentials());

        let resp = conn.request(RequestParams::new(Method::GET, "/")).await?;
        assert_eq!(resp.body, "acknowledged");
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_error() {
        let transport = MockTransport::new(Script::Fail);
        let conn = connector(&transport, with_credentials());

        let inflight = conn.request(RequestParams::new(Method::GET, "/"));
        let handle = inflight.abort_handle();
        let err = inflight.await.expect_err("transport failure must surface");

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(handle.stage(), Stage::Failed);
    }

    #[tokio::test]
    async fn test_stream_error() {
        let transport = MockTransport::new(Script::Respond {
            status: 200,
            headers: vec![],
            chunks: vec![Bytes::from_static(b"{\"partial\":")],
            then: BodyEnd::Fail,
        });
        let conn = connector(&transport, with_credentials());

        let err = conn
            .request(RequestParams::new(Method::GET, "/"))
            .await
            .expect_err("stream failure must surface");
        assert_eq!(err.kind(), ErrorKind::ResponseStream);
    }

    #[tokio::test]
    async fn test_corrupt_encoding() {
        let transport = MockTransport::new(Script::respond(
            200,
            &[("content-encoding", "gzip")],
            &[b"not gzip at all"],
        ));
        let conn = connector(&transport, with_credentials());

        let err = conn
            .request(RequestParams::new(Method::GET, "/"))
            .await
            .expect_err("decode failure must surface");
        assert_eq!(err.kind(), ErrorKind::ResponseStream);
    }

    #[tokio::test]
    async fn test_abort_while_dispatching() {
        let transport = MockTransport::new(Script::Hang);
        let conn = connector(&transport, with_credentials());

        let inflight = conn.request(RequestParams::new(Method::GET, "/_search"));
        let handle = inflight.abort_handle();
        transport.wait_started().await;
        assert_eq!(handle.stage(), Stage::Dispatching);

        handle.abort();
        let err = inflight.await.expect_err("aborted call must fail");
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(handle.stage(), Stage::Aborted);

        // The exchange is torn down.
        transport.wait_dropped().await;
    }

    #[tokio::test]
    async fn test_abort_while_streaming() {
        let transport = MockTransport::new(Script::Respond {
            status: 200,
            headers: vec![],
            chunks: vec![Bytes::from_static(b"first")],
            then: BodyEnd::Hang,
        });
        let conn = connector(&transport, with_credentials());

        let inflight = conn.request(RequestParams::new(Method::GET, "/"));
        let handle = inflight.abort_handle();
        transport.wait_drained().await;
        assert_eq!(handle.stage(), Stage::Streaming);
        handle.abort();

        let err = inflight.await.expect_err("aborted call must fail");
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(handle.stage(), Stage::Aborted);
        transport.wait_dropped().await;
    }

    #[tokio::test]
    async fn test_abort_before_start() {
        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let conn = connector(&transport, with_credentials());

        let inflight = conn.request(RequestParams::new(Method::GET, "/"));
        inflight.abort_handle().abort();

        let err = inflight.await.expect_err("aborted call must fail");
        assert_eq!(err.kind(), ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn test_abort_after_completion_is_noop() -> Result<()> {
        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let conn = connector(&transport, with_credentials());

        let inflight = conn.request(RequestParams::new(Method::GET, "/"));
        let handle = inflight.abort_handle();
        let resp = inflight.await?;
        assert_eq!(resp.body, "ok");

        handle.abort();
        handle.abort();
        assert_eq!(handle.stage(), Stage::Completed);
        assert!(handle.stage().is_terminal());
        Ok(())
    }

    #[tokio::test]
    async fn test_settle_once() {
        let (tx, mut rx) = oneshot::channel();
        let completion = Completion::new(tx, &RequestParams::new(Method::GET, "/"));

        assert!(completion.settle(Err(Error::transport("first"))));
        assert!(!completion.settle(Err(Error::aborted("second"))));
        assert!(completion.enter(Stage::Streaming).is_err());
        assert_eq!(completion.stage(), Stage::Failed);

        let delivered = rx.try_recv().expect("outcome must be delivered");
        assert_eq!(
            delivered.expect_err("first outcome wins").kind(),
            ErrorKind::Transport
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let transport = MockTransport::new(Script::Hang);
        let conn = connector(
            &transport,
            with_credentials().with_request_timeout(Duration::from_millis(50)),
        );

        let err = conn
            .request(RequestParams::new(Method::GET, "/"))
            .await
            .expect_err("hanging call must time out");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        transport.wait_dropped().await;
    }

    #[derive(Debug)]
    struct NoCredential;

    #[async_trait]
    impl ProvideCredential for NoCredential {
        type Credential = Credential;

        async fn provide_credential(&self, _: &Context) -> Result<Option<Credential>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_credential_failure_never_sends() {
        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let conn = SignedConnector::builder(Host::new("search.us-east-1.es.amazonaws.com"))
            .context(static_ctx(&[]))
            .transport(transport.clone())
            .credential_provider(NoCredential)
            .build()
            .expect("connector must build");

        for _ in 0..2 {
            let err = conn
                .request(RequestParams::new(Method::GET, "/_search"))
                .await
                .expect_err("unsigned request must not be sent");
            assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_credential_never_sends() {
        let mut cred = Credential::new("AKIDEXAMPLE", "SECRET");
        cred.expires_in = Some(esigv4_core::time::now() - chrono::Duration::minutes(1));

        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let conn = connector(&transport, ConnectorConfig::default().with_credentials(cred));

        let err = conn
            .request(RequestParams::new(Method::GET, "/"))
            .await
            .expect_err("expired credential must not sign");
        assert_eq!(err.kind(), ErrorKind::CredentialInvalid);
        assert_eq!(transport.calls(), 0);
    }

    #[derive(Debug)]
    struct GatedProvider(Mutex<Option<oneshot::Receiver<()>>>);

    #[async_trait]
    impl ProvideCredential for GatedProvider {
        type Credential = Credential;

        async fn provide_credential(&self, _: &Context) -> Result<Option<Credential>> {
            let gate = self.0.lock().expect("lock must succeed").take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(Some(Credential::new("AKIDGATED", "SECRET")))
        }
    }

    #[tokio::test]
    async fn test_requests_wait_for_credentials() -> Result<()> {
        let (open, gate) = oneshot::channel();
        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let conn = SignedConnector::builder(Host::new("search.us-east-1.es.amazonaws.com"))
            .context(static_ctx(&[]))
            .transport(transport.clone())
            .credential_provider(GatedProvider(Mutex::new(Some(gate))))
            .build()?;

        let first = conn.request(RequestParams::new(Method::GET, "/a"));
        let second = conn.request(RequestParams::new(Method::GET, "/b"));
        let handle = first.abort_handle();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.stage(), Stage::Signing);
        assert_eq!(transport.calls(), 0);

        open.send(()).expect("gate must be open");
        assert_eq!(first.await?.body, "ok");
        assert_eq!(second.await?.body, "ok");

        for req in transport.requests() {
            let auth = req.headers()[http::header::AUTHORIZATION].to_str()?;
            assert!(auth.contains("Credential=AKIDGATED/"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_region_resolution() -> Result<()> {
        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let host = Host::new("search.example.com");

        let conn = SignedConnector::builder(host.clone())
            .context(static_ctx(&[]))
            .config(with_credentials())
            .transport(transport.clone())
            .build()?;
        assert_eq!(conn.region(), "us-east-1");

        let conn = SignedConnector::builder(host.clone())
            .context(static_ctx(&[("AWS_REGION", "eu-west-1")]))
            .config(with_credentials())
            .transport(transport.clone())
            .build()?;
        assert_eq!(conn.region(), "eu-west-1");

        let conn = SignedConnector::builder(host)
            .context(static_ctx(&[("AWS_REGION", "eu-west-1")]))
            .config(with_credentials().with_region("ap-south-1"))
            .transport(transport.clone())
            .build()?;
        assert_eq!(conn.region(), "ap-south-1");

        conn.request(RequestParams::new(Method::GET, "/")).await?;
        let auth = transport.requests()[0].headers()[http::header::AUTHORIZATION]
            .to_str()?
            .to_string();
        assert!(auth.contains("/ap-south-1/es/aws4_request"));
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_transport_with_full_body() -> Result<()> {
        #[derive(Debug)]
        struct Static;

        #[async_trait]
        impl Transport for Static {
            async fn send(
                &self,
                _: http::Request<Bytes>,
            ) -> Result<http::Response<Box<dyn crate::ResponseBody>>> {
                Ok(http::Response::new(
                    Box::new(FullBody::new("pong")) as Box<dyn crate::ResponseBody>
                ))
            }
        }

        let conn = SignedConnector::builder(Host::new("search.example.com"))
            .context(static_ctx(&[]))
            .config(with_credentials())
            .transport(Static)
            .build()?;
        assert_eq!(conn.request(RequestParams::new(Method::HEAD, "/")).await?.body, "pong");
        Ok(())
    }

    #[test]
    fn test_build_without_runtime() {
        let err = SignedConnector::new(Host::new("search.example.com"), with_credentials())
            .expect_err("building outside a runtime must fail");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_invalid_host() {
        let err = SignedConnector::builder(Host::new(""))
            .context(static_ctx(&[]))
            .config(with_credentials())
            .build()
            .expect_err("empty host must be rejected");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_port_in_hostname_fails_at_build() {
        let err = SignedConnector::builder(Host::new("search.example.com:9200").with_port(9200))
            .context(static_ctx(&[]))
            .config(with_credentials())
            .build()
            .expect_err("hostname with a port must be rejected");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_transport_future_dropped_on_success() -> Result<()> {
        let transport = MockTransport::new(Script::respond(200, &[], &[b"ok"]));
        let conn = connector(&transport, with_credentials());
        conn.request(RequestParams::new(Method::GET, "/")).await?;
        transport.wait_dropped().await;
        assert!(transport.dropped.load(Ordering::SeqCst) >= 1);
        Ok(())
    }
}
