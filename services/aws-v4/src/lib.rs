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

//! AWS SigV4 signing and credential loading for esigv4.
//!
//! This crate provides the AWS side of the workspace:
//!
//! - [`Credential`] and [`Config`]
//! - credential providers for static keys, config, env, shared profile
//!   files, ECS container metadata and EC2 IMDSv2, combined by
//!   [`DefaultCredentialProvider`]
//! - [`RequestSigner`], a header-only SigV4 [`SignRequest`](esigv4_core::SignRequest)
//!
//! ## Example
//!
//! ```no_run
//! use esigv4_aws_v4::{DefaultCredentialProvider, RequestSigner};
//! use esigv4_core::{Context, OsEnv, Signer};
//! use esigv4_file_read_tokio::TokioFileRead;
//! use esigv4_http_send_reqwest::ReqwestHttpSend;
//!
//! #[tokio::main]
//! async fn main() -> esigv4_core::Result<()> {
//!     let ctx = Context::new()
//!         .with_file_read(TokioFileRead)
//!         .with_http_send(ReqwestHttpSend::default())
//!         .with_env(OsEnv);
//!
//!     let signer = Signer::new(
//!         ctx,
//!         DefaultCredentialProvider::default(),
//!         RequestSigner::new("es", "us-east-1"),
//!     )?;
//!
//!     let mut parts = http::Request::get("https://search.us-east-1.es.amazonaws.com/_search")
//!         .body(())?
//!         .into_parts()
//!         .0;
//!     signer.sign(&mut parts).await?;
//!     Ok(())
//! }
//! ```

pub mod constants;

mod config;
pub use config::Config;

mod credential;
pub use credential::Credential;

mod provide_credential;
pub use provide_credential::*;

mod sign_request;
pub use sign_request::RequestSigner;
