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

use async_trait::async_trait;
use bytes::Bytes;
use esigv4_core::{Error, Result};
use std::fmt::Debug;
use std::time::Duration;

/// Transport submits signed requests to the search endpoint.
///
/// The returned response carries its head right away; the body is pulled
/// chunk by chunk through [`ResponseBody`]. Dropping either future or body
/// must tear the exchange down.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Send the request and return once the response head arrived.
    ///
    /// Failures before the head is received are `Transport` errors.
    async fn send(
        &self,
        req: http::Request<Bytes>,
    ) -> Result<http::Response<Box<dyn ResponseBody>>>;
}

/// ResponseBody yields the raw body of a response.
#[async_trait]
pub trait ResponseBody: Send + 'static {
    /// Next chunk, `None` once the body ended.
    ///
    /// Failures are `ResponseStream` errors.
    async fn chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Transport backed by a [`reqwest::Client`].
///
/// Bodies are handed over exactly as received; no decompression happens in
/// here.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the client with no-delay and keep-alive on every connection.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| Error::config_invalid("failed to build http client").with_source(e))?;

        Ok(Self { client })
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        req: http::Request<Bytes>,
    ) -> Result<http::Response<Box<dyn ResponseBody>>> {
        let uri = req.uri().to_string();
        let req = reqwest::Request::try_from(req).map_err(|e| {
            Error::request_invalid("request cannot be converted for reqwest")
                .with_source(e)
                .with_context(format!("uri: {uri}"))
        })?;

        let resp = self.client.execute(req).await.map_err(|e| {
            Error::transport("failed to send request")
                .with_source(e)
                .with_context(format!("uri: {uri}"))
                .set_retryable(true)
        })?;

        let status = resp.status();
        let version = resp.version();
        let headers = resp.headers().clone();

        let mut out = http::Response::new(Box::new(ReqwestBody(resp)) as Box<dyn ResponseBody>);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

struct ReqwestBody(reqwest::Response);

#[async_trait]
impl ResponseBody for ReqwestBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.0
            .chunk()
            .await
            .map_err(|e| Error::response_stream("failed to read response body").with_source(e))
    }
}

/// A body that is already fully in memory.
#[derive(Debug, Default)]
pub struct FullBody(Option<Bytes>);

impl FullBody {
    /// Wrap `bytes`.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(Some(bytes.into()))
    }
}

#[async_trait]
impl ResponseBody for FullBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.0.take().filter(|bs| !bs.is_empty()))
    }
}
