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
use flate2::write::{GzDecoder, ZlibDecoder};
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, StatusCode};
use std::io::Write;

/// Response is the fully received answer of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: StatusCode,
    /// Response headers as received.
    pub headers: HeaderMap,
    /// Decoded body text; invalid UTF-8 is replaced.
    pub body: String,
}

/// Content encodings the connector decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Body is kept as received.
    Identity,
    /// `gzip`
    Gzip,
    /// `deflate`, decoded as zlib.
    Deflate,
}

impl ContentEncoding {
    /// Detect the encoding from `content-encoding`.
    ///
    /// Unknown encodings are treated as identity.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());

        match value.as_deref() {
            Some("gzip") => ContentEncoding::Gzip,
            Some("deflate") => ContentEncoding::Deflate,
            _ => ContentEncoding::Identity,
        }
    }
}

enum Decoder {
    Identity(Vec<u8>),
    Gzip(Box<GzDecoder<Vec<u8>>>),
    Deflate(Box<ZlibDecoder<Vec<u8>>>),
}

/// ResponseAccumulator collects body chunks until the stream ends.
///
/// Chunks are decoded as they arrive; [`ResponseAccumulator::finish`]
/// consumes the accumulator into a [`Response`].
pub struct ResponseAccumulator {
    status: StatusCode,
    headers: HeaderMap,
    encoding: ContentEncoding,
    decoder: Decoder,
    received: usize,
}

impl ResponseAccumulator {
    /// Start accumulating a response with the given head.
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        let encoding = ContentEncoding::from_headers(&headers);
        let decoder = match encoding {
            ContentEncoding::Identity => Decoder::Identity(Vec::new()),
            ContentEncoding::Gzip => Decoder::Gzip(Box::new(GzDecoder::new(Vec::new()))),
            ContentEncoding::Deflate => Decoder::Deflate(Box::new(ZlibDecoder::new(Vec::new()))),
        };

        Self {
            status,
            headers,
            encoding,
            decoder,
            received: 0,
        }
    }

    /// Status code of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Encoding the body is decoded with.
    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Bytes received so far, before decoding.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Append one received chunk.
    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        self.received += chunk.len();
        let res = match &mut self.decoder {
            Decoder::Identity(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            Decoder::Gzip(d) => d.write_all(chunk),
            Decoder::Deflate(d) => d.write_all(chunk),
        };

        res.map_err(|e| self.decode_error(e))
    }

    /// Finish the body and build the response.
    pub fn finish(self) -> Result<Response> {
        let encoding = self.encoding;
        let bytes = match self.decoder {
            Decoder::Identity(buf) => Ok(buf),
            // Nothing to decode, e.g. a HEAD answer that still carries the header.
            _ if self.received == 0 => Ok(Vec::new()),
            Decoder::Gzip(d) => d.finish(),
            Decoder::Deflate(d) => d.finish(),
        }
        .map_err(|e| decode_error(encoding, e))?;

        Ok(Response {
            status: self.status,
            headers: self.headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    fn decode_error(&self, err: std::io::Error) -> Error {
        decode_error(self.encoding, err)
    }
}

fn decode_error(encoding: ContentEncoding, err: std::io::Error) -> Error {
    Error::response_stream("failed to decode response body")
        .with_source(err)
        .with_context(format!("content-encoding: {encoding:?}"))
}
