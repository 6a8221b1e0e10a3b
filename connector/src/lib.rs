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

//! SigV4-signed HTTP connector for Amazon OpenSearch / Elasticsearch clients.
//!
//! A [`SignedConnector`] takes logical search requests, signs each of them
//! for the `es` service and streams the response back, decoding `gzip` and
//! `deflate` bodies on the way.
//!
//! ```no_run
//! use esigv4::{Connection, ConnectorConfig, Host, RequestParams, SignedConnector};
//! use http::Method;
//!
//! # async fn example() -> esigv4_core::Result<()> {
//! let host = Host::new("search-logs-abc.us-east-1.es.amazonaws.com");
//! let conn = SignedConnector::new(host, ConnectorConfig::default().with_region("us-east-1"))?;
//!
//! let resp = conn
//!     .request(RequestParams::new(Method::GET, "/_search").with_query("q", "title:rust"))
//!     .await?;
//! println!("{} {}", resp.status, resp.body);
//! # Ok(())
//! # }
//! ```
//!
//! Credentials come from `ConnectorConfig::amazon` when set, otherwise from
//! the default AWS chain (environment, shared profile files, ECS, EC2
//! instance metadata). They are resolved once per connector; a request is
//! never sent without a signature.

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

mod config;
pub use config::AmazonConfig;
pub use config::ConnectorConfig;
pub use config::Host;

mod endpoint;
pub use endpoint::Endpoint;

mod request;
pub use request::RequestDescriptor;
pub use request::RequestParams;

mod response;
pub use response::ContentEncoding;
pub use response::Response;
pub use response::ResponseAccumulator;

mod transport;
pub use transport::FullBody;
pub use transport::ReqwestTransport;
pub use transport::ResponseBody;
pub use transport::Transport;

mod connector;
pub use connector::AbortHandle;
pub use connector::Connection;
pub use connector::ConnectorBuilder;
pub use connector::InFlight;
pub use connector::SignedConnector;
pub use connector::Stage;

#[cfg(test)]
mod testing;
