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

use esigv4_aws_v4::Credential;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Host describes the search endpoint a connector talks to.
///
/// `query` and `headers` are sent with every request, under the values a
/// single request supplies itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Host {
    /// `http` or `https`.
    #[serde(alias = "protocol")]
    pub scheme: String,
    /// Endpoint hostname, like `search-logs-abc.us-east-1.es.amazonaws.com`.
    pub host: String,
    /// Port, omitted means the scheme default.
    pub port: Option<u16>,
    /// Path prefix joined in front of every request path.
    pub path: String,
    /// Default query parameters.
    pub query: BTreeMap<String, String>,
    /// Default headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            host: String::new(),
            port: None,
            path: String::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }
}

impl Host {
    /// Build a https host for the given hostname.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the path prefix.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a default query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a default header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Amazon specific settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AmazonConfig {
    /// Region of the search domain.
    ///
    /// Falls back to `AWS_REGION`, then `us-east-1`.
    pub region: Option<String>,
    /// Explicit credentials; skips the provider chain entirely.
    pub credentials: Option<Credential>,
}

/// ConnectorConfig is everything a connector needs besides the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Amazon specific settings.
    #[serde(alias = "amazonConfig")]
    pub amazon: AmazonConfig,
    /// Deadline for one request, from dispatch until the body is complete.
    ///
    /// Deserialized from milliseconds.
    #[serde(deserialize_with = "deserialize_millis", alias = "requestTimeout")]
    pub request_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            amazon: AmazonConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectorConfig {
    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.amazon.region = Some(region.into());
        self
    }

    /// Set explicit credentials.
    pub fn with_credentials(mut self, credentials: Credential) -> Self {
        self.amazon.credentials = Some(credentials);
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
