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

//! Scripted transport for unit tests.

use crate::{ResponseBody, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use esigv4_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// What the body does after its chunks ran out.
#[derive(Debug, Clone, Copy)]
pub enum BodyEnd {
    Finish,
    Fail,
    Hang,
}

/// How the mock answers every request.
#[derive(Debug, Clone)]
pub enum Script {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<Bytes>,
        then: BodyEnd,
    },
    Fail,
    Hang,
}

impl Script {
    pub fn respond(
        status: u16,
        headers: &[(&'static str, &'static str)],
        chunks: &[&[u8]],
    ) -> Self {
        Script::Respond {
            status,
            headers: headers.to_vec(),
            chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            then: BodyEnd::Finish,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    script: Script,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<http::Request<Bytes>>>>,
    started: Arc<Notify>,
    drained: Arc<Notify>,
    pub dropped: Arc<AtomicUsize>,
    dropped_notify: Arc<Notify>,
}

impl MockTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::default(),
            requests: Arc::default(),
            started: Arc::default(),
            drained: Arc::default(),
            dropped: Arc::default(),
            dropped_notify: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of every request sent so far.
    pub fn requests(&self) -> Vec<http::Request<Bytes>> {
        self.requests
            .lock()
            .expect("lock must succeed")
            .iter()
            .map(|req| {
                let mut copy = http::Request::new(req.body().clone());
                *copy.method_mut() = req.method().clone();
                *copy.uri_mut() = req.uri().clone();
                *copy.headers_mut() = req.headers().clone();
                copy
            })
            .collect()
    }

    pub async fn wait_started(&self) {
        self.started.notified().await
    }

    /// Wait until a hanging body handed out all of its chunks.
    pub async fn wait_drained(&self) {
        self.drained.notified().await
    }

    pub async fn wait_dropped(&self) {
        while self.dropped.load(Ordering::SeqCst) == 0 {
            self.dropped_notify.notified().await;
        }
    }

    fn exchange(&self) -> Exchange {
        Exchange {
            dropped: self.dropped.clone(),
            notify: self.dropped_notify.clone(),
        }
    }
}

/// Stands in for the socket; records when it gets dropped.
struct Exchange {
    dropped: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        req: http::Request<Bytes>,
    ) -> Result<http::Response<Box<dyn ResponseBody>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock must succeed").push(req);
        let exchange = self.exchange();
        self.started.notify_one();

        match &self.script {
            Script::Fail => Err(Error::transport("connection refused").set_retryable(true)),
            Script::Hang => {
                std::future::pending::<()>().await;
                drop(exchange);
                Err(Error::transport("unreachable"))
            }
            Script::Respond {
                status,
                headers,
                chunks,
                then,
            } => {
                let body = MockBody {
                    chunks: chunks.iter().cloned().collect(),
                    then: *then,
                    drained: self.drained.clone(),
                    _exchange: exchange,
                };
                let mut resp = http::Response::new(Box::new(body) as Box<dyn ResponseBody>);
                *resp.status_mut() =
                    http::StatusCode::from_u16(*status).expect("status must be valid");
                for (name, value) in headers {
                    resp.headers_mut().append(
                        http::HeaderName::from_bytes(name.as_bytes())
                            .expect("header name must be valid"),
                        http::HeaderValue::from_static(value),
                    );
                }
                Ok(resp)
            }
        }
    }
}

struct MockBody {
    chunks: VecDeque<Bytes>,
    then: BodyEnd,
    drained: Arc<Notify>,
    _exchange: Exchange,
}

#[async_trait]
impl ResponseBody for MockBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }

        match self.then {
            BodyEnd::Finish => Ok(None),
            BodyEnd::Fail => Err(Error::response_stream("connection reset")),
            BodyEnd::Hang => {
                self.drained.notify_one();
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }
}
