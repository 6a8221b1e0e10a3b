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

use super::utils::{parse_sts_error, sts_endpoint};
use crate::constants::*;
use crate::{Config, Credential};
use async_trait::async_trait;
use bytes::Bytes;
use esigv4_core::time::parse_rfc3339;
use esigv4_core::utils::Redact;
use esigv4_core::{Context, Error, ProvideCredential, Result};
use http::{Method, StatusCode};
use log::debug;
use percent_encoding::utf8_percent_encode;
use quick_xml::de;
use serde::Deserialize;
use std::fmt::{Debug, Formatter};

/// AssumeRoleWithWebIdentityCredentialProvider exchanges a web identity token
/// file for role credentials through STS, as set up by EKS service accounts.
///
/// Active only when both a role ARN and a token file are known, either set
/// here or taken from `AWS_ROLE_ARN` and `AWS_WEB_IDENTITY_TOKEN_FILE`.
#[derive(Debug, Default, Clone)]
pub struct AssumeRoleWithWebIdentityCredentialProvider {
    role_arn: Option<String>,
    role_session_name: Option<String>,
    web_identity_token_file: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
}

impl AssumeRoleWithWebIdentityCredentialProvider {
    /// Create a provider that reads everything from the environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that signs STS requests for the region in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            region: config.region.clone(),
            ..Default::default()
        }
    }

    /// Set the role ARN.
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Set the token file path.
    pub fn with_web_identity_token_file(mut self, path: impl Into<String>) -> Self {
        self.web_identity_token_file = Some(path.into());
        self
    }

    /// Set the role session name.
    pub fn with_role_session_name(mut self, name: impl Into<String>) -> Self {
        self.role_session_name = Some(name.into());
        self
    }

    /// Send STS requests to this base url instead of the public endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[async_trait]
impl ProvideCredential for AssumeRoleWithWebIdentityCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let role_arn = self.role_arn.clone().or_else(|| ctx.env_var(AWS_ROLE_ARN));
        let token_file = self
            .web_identity_token_file
            .clone()
            .or_else(|| ctx.env_var(AWS_WEB_IDENTITY_TOKEN_FILE));

        let (Some(role_arn), Some(token_file)) = (role_arn, token_file) else {
            debug!("no web identity configured, skip assume role with web identity");
            return Ok(None);
        };

        let token = ctx.file_read_as_string(&token_file).await.map_err(|e| {
            Error::config_invalid("failed to read web identity token file")
                .with_source(e)
                .with_context(format!("file: {token_file}"))
        })?;

        let session_name = self
            .role_session_name
            .clone()
            .or_else(|| ctx.env_var(AWS_ROLE_SESSION_NAME))
            .unwrap_or_else(|| "esigv4".to_string());

        let base = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let region = self.region.clone().or_else(|| ctx.env_var(AWS_REGION));
                let regional = ctx
                    .env_var(AWS_STS_REGIONAL_ENDPOINTS)
                    .is_some_and(|v| v == "regional");
                format!("https://{}", sts_endpoint(region.as_deref(), regional)?)
            }
        };

        let url = format!(
            "{base}/?Action=AssumeRoleWithWebIdentity&Version=2011-06-15&RoleArn={}&RoleSessionName={}&WebIdentityToken={}",
            utf8_percent_encode(&role_arn, &AWS_QUERY_ENCODE_SET),
            utf8_percent_encode(&session_name, &AWS_QUERY_ENCODE_SET),
            utf8_percent_encode(token.trim(), &AWS_QUERY_ENCODE_SET),
        );
        let req = http::Request::builder()
            .method(Method::GET)
            .uri(&url)
            .body(Bytes::new())
            .map_err(|e| {
                Error::request_invalid("failed to build STS AssumeRoleWithWebIdentity request")
                    .with_source(e)
                    .with_context(format!("role_arn: {role_arn}"))
            })?;

        let resp = ctx.http_send_as_string(req).await.map_err(|e| {
            e.with_context("operation: AssumeRoleWithWebIdentity")
                .with_context(format!("role_arn: {role_arn}"))
        })?;
        if resp.status() != StatusCode::OK {
            return Err(
                parse_sts_error("AssumeRoleWithWebIdentity", resp.status(), resp.body())
                    .with_context(format!("role_arn: {role_arn}")),
            );
        }

        let resp: AssumeRoleWithWebIdentityResponse =
            de::from_str(resp.body()).map_err(|e| {
                Error::unexpected("failed to parse STS AssumeRoleWithWebIdentity response")
                    .with_source(e)
                    .with_context(format!("role_arn: {role_arn}"))
            })?;
        let cred = resp.result.credentials;

        Ok(Some(Credential {
            access_key_id: cred.access_key_id,
            secret_access_key: cred.secret_access_key,
            session_token: Some(cred.session_token),
            expires_in: Some(parse_rfc3339(&cred.expiration)?),
        }))
    }
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct AssumeRoleWithWebIdentityResponse {
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: AssumeRoleWithWebIdentityResult,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct AssumeRoleWithWebIdentityResult {
    credentials: StsCredentials,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

impl Debug for StsCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StsCredentials")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("secret_access_key", &Redact::from(&self.secret_access_key))
            .field("session_token", &Redact::from(&self.session_token))
            .field("expiration", &self.expiration)
            .finish()
    }
}
