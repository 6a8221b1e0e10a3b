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

use crate::{Endpoint, Host};
use bytes::Bytes;
use esigv4_aws_v4::constants::{AWS_QUERY_ENCODE_SET, AWS_URI_ENCODE_SET};
use esigv4_core::{Error, Result};
use http::header::{HeaderName, HeaderValue, IntoHeaderName};
use http::{HeaderMap, Method};
use percent_encoding::utf8_percent_encode;

/// RequestParams is what a search client asks the connector to send.
///
/// `path` and `query` are raw, unencoded values; the connector encodes them.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    /// HTTP method.
    pub method: Method,
    /// Request path relative to the host path prefix, like `/logs/_search`.
    pub path: String,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
}

impl RequestParams {
    /// Create params for `method` and `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header, replacing previous values.
    pub fn with_header(mut self, name: impl IntoHeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// RequestDescriptor is a [`RequestParams`] bound to an [`Endpoint`].
///
/// The host path prefix is joined in, default query and headers are merged
/// under the per-call values, and path and query are percent-encoded.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestDescriptor {
    /// Build a descriptor from caller params and host defaults.
    pub fn build(host: &Host, params: RequestParams) -> Result<Self> {
        let RequestParams {
            method,
            path,
            query,
            headers,
            body,
        } = params;

        let mut merged = HeaderMap::with_capacity(host.headers.len() + headers.len());
        for (name, value) in &host.headers {
            merged.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        // Extending with a map replaces every name it carries.
        merged.extend(headers);

        let pairs = host
            .query
            .iter()
            .filter(|(k, _)| !query.iter().any(|(qk, _)| qk == *k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(k, &AWS_QUERY_ENCODE_SET),
                    utf8_percent_encode(v, &AWS_QUERY_ENCODE_SET)
                )
            })
            .collect::<Vec<_>>();

        Ok(Self {
            method,
            path: join_path(&host.path, &path),
            query: (!pairs.is_empty()).then(|| pairs.join("&")),
            headers: merged,
            body: body.unwrap_or_default(),
        })
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Encoded path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encoded query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Merged headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body, empty when none was given.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Path and query as they go on the wire.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// Render into an `http::Request` against `endpoint`.
    pub fn into_request(self, endpoint: &Endpoint) -> Result<http::Request<Bytes>> {
        let uri = format!("{endpoint}{}", self.target());
        let mut req = http::Request::builder()
            .method(self.method)
            .uri(&uri)
            .body(self.body)
            .map_err(|e| {
                Error::request_invalid("request cannot be built")
                    .with_source(e)
                    .with_context(format!("uri: {uri}"))
            })?;
        *req.headers_mut() = self.headers;
        Ok(req)
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    let segments = prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    let mut joined = String::from("/");
    joined.push_str(
        &utf8_percent_encode(&segments.join("/"), &AWS_URI_ENCODE_SET).to_string(),
    );
    // Keep a trailing slash the caller asked for.
    if path.len() > 1 && path.ends_with('/') {
        joined.push('/');
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("", "/", "/"; "root")]
    #[test_case("", "_search", "/_search"; "relative path")]
    #[test_case("/es/", "/logs/_search", "/es/logs/_search"; "prefix")]
    #[test_case("", "/logs*/_doc/a b", "/logs%2A/_doc/a%20b"; "encoded")]
    #[test_case("", "/_nodes/", "/_nodes/"; "trailing slash")]
    #[test_case("", "/caf\u{e9}", "/caf%C3%A9"; "utf8")]
    fn test_join_path(prefix: &str, path: &str, expected: &str) {
        assert_eq!(join_path(prefix, path), expected);
    }

    #[test]
    fn test_merge_defaults() -> Result<()> {
        let host = Host::new("search.example.com")
            .with_query("pretty", "true")
            .with_query("timeout", "5s")
            .with_header("x-opaque-id", "default")
            .with_header("x-team", "search");
        let params = RequestParams::new(Method::GET, "/_search")
            .with_query("timeout", "1s")
            .with_query("q", "title:rust book")
            .with_header("x-opaque-id", HeaderValue::from_static("call"));

        let desc = RequestDescriptor::build(&host, params)?;
        assert_eq!(
            desc.query(),
            Some("pretty=true&timeout=1s&q=title%3Arust%20book")
        );
        assert_eq!(desc.headers()["x-opaque-id"], "call");
        assert_eq!(desc.headers()["x-team"], "search");
        assert!(desc.body().is_empty());
        Ok(())
    }

    #[test]
    fn test_into_request() -> Result<()> {
        let host = Host::new("search.example.com").with_port(9243);
        let endpoint = Endpoint::from_host(&host)?;
        let params = RequestParams::new(Method::POST, "/logs/_doc")
            .with_query("refresh", "wait_for")
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(r#"{"msg":"hello"}"#);

        let req = RequestDescriptor::build(&host, params)?.into_request(&endpoint)?;
        assert_eq!(req.method(), Method::POST);
        assert_eq!(
            req.uri().to_string(),
            "https://search.example.com:9243/logs/_doc?refresh=wait_for"
        );
        assert_eq!(req.headers()[http::header::CONTENT_TYPE], "application/json");
        assert_eq!(req.body().as_ref(), br#"{"msg":"hello"}"#);
        Ok(())
    }

    #[test]
    fn test_invalid_default_header() {
        let host = Host::new("search.example.com").with_header("bad header", "v");
        let err = RequestDescriptor::build(&host, RequestParams::new(Method::GET, "/"))
            .expect_err("invalid header name must be rejected");
        assert_eq!(err.kind(), esigv4_core::ErrorKind::RequestInvalid);
    }
}
