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

use super::utils::parse_imds_error;
use crate::constants::*;
use crate::Credential;
use async_trait::async_trait;
use bytes::Bytes;
use esigv4_core::time::parse_rfc3339;
use esigv4_core::{Context, Error, ProvideCredential, Result};
use http::header::CONTENT_LENGTH;
use http::Method;
use log::debug;
use serde::Deserialize;

/// IMDSv2CredentialProvider loads the instance role credential from EC2
/// instance metadata, using the session-token (v2) flow.
#[derive(Debug, Default, Clone)]
pub struct IMDSv2CredentialProvider {
    endpoint: Option<String>,
    disabled: bool,
}

impl IMDSv2CredentialProvider {
    /// Create a new `IMDSv2CredentialProvider` instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint for the metadata service.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Disable the provider regardless of the environment.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    fn endpoint(&self, ctx: &Context) -> String {
        self.endpoint
            .clone()
            .or_else(|| ctx.env_var(AWS_EC2_METADATA_SERVICE_ENDPOINT))
            .unwrap_or_else(|| EC2_METADATA_ENDPOINT.to_string())
    }

    async fn get(&self, ctx: &Context, operation: &str, url: &str, token: &str) -> Result<String> {
        let req = http::Request::builder()
            .uri(url)
            .method(Method::GET)
            .header("x-aws-ec2-metadata-token", token)
            .body(Bytes::new())
            .map_err(|e| {
                Error::request_invalid("failed to build IMDS request")
                    .with_source(e)
                    .with_context(format!("operation: {operation}"))
            })?;

        let resp = ctx.http_send_as_string(req).await.map_err(|e| {
            Error::unexpected("failed to reach IMDS")
                .with_source(e)
                .with_context(format!("operation: {operation}"))
                .set_retryable(true)
        })?;

        if resp.status() != http::StatusCode::OK {
            return Err(parse_imds_error(operation, resp.status(), resp.body()));
        }
        Ok(resp.into_body())
    }

    async fn load_token(&self, ctx: &Context, endpoint: &str) -> Result<String> {
        let url = format!("{endpoint}/latest/api/token");
        let req = http::Request::builder()
            .uri(&url)
            .method(Method::PUT)
            .header(CONTENT_LENGTH, "0")
            // 21600s (6h) is recommended by AWS.
            .header("x-aws-ec2-metadata-token-ttl-seconds", "21600")
            .body(Bytes::new())
            .map_err(|e| {
                Error::request_invalid("failed to build IMDS token request")
                    .with_source(e)
                    .with_context(format!("url: {url}"))
            })?;

        let resp = ctx.http_send_as_string(req).await.map_err(|e| {
            Error::unexpected("failed to connect to IMDS")
                .with_source(e)
                .with_context(format!("endpoint: {endpoint}"))
                .with_context("hint: check if running on EC2 instance")
                .set_retryable(true)
        })?;

        if resp.status() != http::StatusCode::OK {
            return Err(parse_imds_error(
                "fetch_imds_token",
                resp.status(),
                resp.body(),
            ));
        }
        Ok(resp.into_body())
    }
}

#[async_trait]
impl ProvideCredential for IMDSv2CredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let disabled_env = ctx
            .env_var(AWS_EC2_METADATA_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if self.disabled || disabled_env {
            debug!("instance metadata is disabled, skip IMDS credentials");
            return Ok(None);
        }

        let endpoint = self.endpoint(ctx);
        let token = self.load_token(ctx, &endpoint).await?;

        let profile_name = self
            .get(
                ctx,
                "list_instance_profiles",
                &format!("{endpoint}/latest/meta-data/iam/security-credentials/"),
                &token,
            )
            .await?;
        let profile_name = profile_name.lines().next().unwrap_or_default().trim();
        if profile_name.is_empty() {
            return Err(
                Error::config_invalid("no IAM role attached to EC2 instance")
                    .with_context("hint: attach an IAM role to your EC2 instance"),
            );
        }

        let content = self
            .get(
                ctx,
                "fetch_credentials",
                &format!("{endpoint}/latest/meta-data/iam/security-credentials/{profile_name}"),
                &token,
            )
            .await
            .map_err(|e| e.with_context(format!("profile: {profile_name}")))?;

        let resp: Ec2MetadataIamSecurityCredentials =
            serde_json::from_str(&content).map_err(|e| {
                Error::unexpected("failed to parse IMDS credentials response")
                    .with_source(e)
                    .with_context(format!("profile: {profile_name}"))
            })?;

        match resp.code.as_str() {
            "Success" => {}
            "AssumeRoleUnauthorizedAccess" => {
                return Err(Error::credential_denied(format!(
                    "EC2 instance not authorized to assume role: {}",
                    resp.message
                ))
                .with_context(format!("profile: {profile_name}")));
            }
            code if code.contains("Expired") => {
                return Err(Error::credential_expired(format!(
                    "IMDS credentials expired: {}",
                    resp.message
                ))
                .with_context(format!("profile: {profile_name}")));
            }
            code => {
                return Err(Error::unexpected(format!(
                    "IMDS returned error: [{code}] {}",
                    resp.message
                ))
                .with_context(format!("profile: {profile_name}")));
            }
        }

        Ok(Some(Credential {
            access_key_id: resp.access_key_id,
            secret_access_key: resp.secret_access_key,
            session_token: Some(resp.token),
            expires_in: Some(parse_rfc3339(&resp.expiration)?),
        }))
    }
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Ec2MetadataIamSecurityCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: String,

    code: String,
    message: String,
}
