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

use crate::Host;
use esigv4_core::{Error, Result};
use http::uri::{Authority, Scheme};
use std::fmt::{self, Display};

/// Endpoint is the immutable network address of the search domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    hostname: String,
    port: Option<u16>,
}

impl Endpoint {
    /// Bind an endpoint from host settings.
    pub fn from_host(host: &Host) -> Result<Self> {
        let scheme = match host.scheme.trim().to_ascii_lowercase().as_str() {
            "" | "https" | "https:" => Scheme::HTTPS,
            "http" | "http:" => Scheme::HTTP,
            v => {
                return Err(Error::config_invalid("unsupported endpoint scheme")
                    .with_context(format!("scheme: {v}")))
            }
        };

        let hostname = host.host.trim().to_string();
        if hostname.is_empty() {
            return Err(Error::config_invalid("endpoint hostname is empty"));
        }
        // Validate early so a bad hostname fails construction, not every call.
        let authority = hostname.parse::<Authority>().map_err(|e| {
            Error::config_invalid("endpoint hostname is not a valid authority")
                .with_source(e)
                .with_context(format!("host: {hostname}"))
        })?;
        if authority.host() != authority.as_str() {
            return Err(Error::config_invalid(
                "endpoint hostname must not carry a port or user info, set the port separately",
            )
            .with_context(format!("host: {hostname}")));
        }

        Ok(Self {
            scheme,
            hostname,
            port: host.port,
        })
    }

    /// Scheme of this endpoint.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Hostname without port.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Explicit port if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Value of the `Host` header.
    ///
    /// The port is only rendered when it differs from the scheme default.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if port != self.default_port() => format!("{}:{port}", self.hostname),
            _ => self.hostname.clone(),
        }
    }

    fn default_port(&self) -> u16 {
        if self.scheme == Scheme::HTTP {
            80
        } else {
            443
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host_header())
    }
}
