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
use esigv4_core::Context;

/// Config carries the knobs that steer credential loading and region selection.
///
/// Explicit key pairs are not part of it, they are handed to the signer as a
/// [`Credential`](crate::Credential) directly.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// `region` will be loaded from:
    ///
    /// - this field if it's `is_some`
    /// - env value: [`AWS_REGION`]
    pub region: Option<String>,
    /// `profile` will be loaded from:
    ///
    /// - this field if it's `is_some`
    /// - env value: [`AWS_PROFILE`]
    /// - default to: `default`
    pub profile: Option<String>,
    /// `config_file` will be loaded from:
    ///
    /// - this field if it's `is_some`
    /// - env value: [`AWS_CONFIG_FILE`]
    /// - default to: `~/.aws/config`
    pub config_file: Option<String>,
    /// `shared_credentials_file` will be loaded from:
    ///
    /// - this field if it's `is_some`
    /// - env value: [`AWS_SHARED_CREDENTIALS_FILE`]
    /// - default to: `~/.aws/credentials`
    pub shared_credentials_file: Option<String>,
    /// `ec2_metadata_disabled` will be loaded from:
    ///
    /// - env value: [`AWS_EC2_METADATA_DISABLED`]
    pub ec2_metadata_disabled: bool,
}

impl Config {
    /// Load config from environment variables.
    pub fn from_env(ctx: &Context) -> Self {
        Self {
            region: ctx.env_var(AWS_REGION).filter(|v| !v.is_empty()),
            profile: ctx.env_var(AWS_PROFILE),
            config_file: ctx.env_var(AWS_CONFIG_FILE),
            shared_credentials_file: ctx.env_var(AWS_SHARED_CREDENTIALS_FILE),
            ec2_metadata_disabled: ctx
                .env_var(AWS_EC2_METADATA_DISABLED)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or_default(),
        }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// The configured region, or [`DEFAULT_REGION`] when none is set.
    pub fn region_or_default(&self) -> &str {
        self.region
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_REGION)
    }
}
