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

use crate::constants::*;
use crate::Credential;
use async_trait::async_trait;
use bytes::Bytes;
use esigv4_core::time::parse_rfc3339;
use esigv4_core::{Context, Error, ProvideCredential, Result};
use http::header::AUTHORIZATION;
use http::Method;
use log::debug;
use serde::Deserialize;

/// ECSCredentialProvider loads credentials from the container credentials endpoint.
///
/// Only active when `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or
/// `AWS_CONTAINER_CREDENTIALS_FULL_URI` is set.
#[derive(Debug, Default, Clone)]
pub struct ECSCredentialProvider {
    endpoint: Option<String>,
}

impl ECSCredentialProvider {
    /// Create a new `ECSCredentialProvider` instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the endpoint used together with a relative URI.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[async_trait]
impl ProvideCredential for ECSCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let relative_uri = ctx.env_var(AWS_CONTAINER_CREDENTIALS_RELATIVE_URI);
        let full_uri = ctx.env_var(AWS_CONTAINER_CREDENTIALS_FULL_URI);

        let url = match (relative_uri, full_uri) {
            (Some(relative), _) => format!(
                "{}{relative}",
                self.endpoint.as_deref().unwrap_or(ECS_METADATA_ENDPOINT)
            ),
            (None, Some(full)) => full,
            (None, None) => {
                debug!("not running in a container, skip ECS credentials");
                return Ok(None);
            }
        };

        let mut req = http::Request::builder().uri(&url).method(Method::GET);
        if let Some(token) = ctx.env_var(AWS_CONTAINER_AUTHORIZATION_TOKEN) {
            req = req.header(AUTHORIZATION, token);
        }
        let req = req.body(Bytes::new()).map_err(|e| {
            Error::request_invalid("failed to build ECS metadata request")
                .with_source(e)
                .with_context(format!("url: {url}"))
        })?;

        let resp = ctx.http_send_as_string(req).await.map_err(|e| {
            Error::unexpected("failed to reach ECS metadata endpoint")
                .with_source(e)
                .with_context(format!("url: {url}"))
                .set_retryable(true)
        })?;

        if resp.status() != http::StatusCode::OK {
            return Err(super::utils::parse_imds_error(
                "fetch_container_credentials",
                resp.status(),
                resp.body(),
            ));
        }

        let cred: EcsTaskCredentials = serde_json::from_str(resp.body()).map_err(|e| {
            Error::unexpected("failed to parse ECS task credentials").with_source(e)
        })?;

        Ok(Some(Credential {
            access_key_id: cred.access_key_id,
            secret_access_key: cred.secret_access_key,
            session_token: Some(cred.token),
            expires_in: Some(parse_rfc3339(&cred.expiration)?),
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EcsTaskCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: String,
}
