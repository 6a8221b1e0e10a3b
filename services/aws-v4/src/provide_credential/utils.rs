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

use esigv4_core::{Error, Result};
use http::StatusCode;

/// Turn a non-200 metadata service response into a typed error.
pub fn parse_imds_error(operation: &str, status: StatusCode, body: &str) -> Error {
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::credential_denied(format!("metadata service denied {operation}"))
        }
        StatusCode::NOT_FOUND => {
            Error::config_invalid(format!("metadata service has nothing for {operation}"))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Error::unexpected(format!("metadata service failed {operation}"))
                .set_retryable(true)
        }
        _ => Error::unexpected(format!("metadata service rejected {operation}")),
    };

    err.with_context(format!("status: {status}"))
        .with_context(format!("body: {body}"))
}

/// Turn a non-200 STS response into a typed error.
pub fn parse_sts_error(operation: &str, status: StatusCode, body: &str) -> Error {
    let err = if body.contains("ExpiredToken") {
        Error::credential_expired(format!("web identity token expired for {operation}"))
    } else {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::credential_denied(format!("STS denied {operation}"))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                Error::unexpected(format!("STS failed {operation}")).set_retryable(true)
            }
            _ => Error::unexpected(format!("STS rejected {operation}")),
        }
    };

    err.with_context(format!("status: {status}"))
        .with_context(format!("body: {body}"))
}

/// Host of the STS endpoint.
///
/// The global endpoint is used unless regional endpoints are requested.
pub fn sts_endpoint(region: Option<&str>, use_regional: bool) -> Result<String> {
    match (use_regional, region) {
        (true, Some(region)) if region.starts_with("cn-") => {
            Ok(format!("sts.{region}.amazonaws.com.cn"))
        }
        (true, Some(region)) => Ok(format!("sts.{region}.amazonaws.com")),
        (true, None) => Err(Error::config_invalid(
            "regional STS endpoint requires a region",
        )),
        (false, Some(region)) if region.starts_with("cn-") => {
            Ok("sts.amazonaws.com.cn".to_string())
        }
        (false, _) => Ok("sts.amazonaws.com".to_string()),
    }
}
