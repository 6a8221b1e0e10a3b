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

use esigv4::{Connection, ConnectorConfig, Host, RequestParams, SignedConnector, Stage};
use esigv4_aws_v4::Credential;
use esigv4_core::{Context, ErrorKind, Result, StaticEnv};
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{HeaderValue, Method, StatusCode};
use log::debug;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn connector(addr: SocketAddr) -> SignedConnector {
    let ctx = Context::new().with_env(StaticEnv {
        home_dir: None,
        envs: HashMap::from([("AWS_REGION".to_string(), "eu-west-1".to_string())]),
    });
    let cred = Credential::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
        .with_session_token("session-token");

    SignedConnector::builder(
        Host::new(addr.ip().to_string())
            .with_scheme("http")
            .with_port(addr.port()),
    )
    .context(ctx)
    .config(ConnectorConfig::default().with_credentials(cred))
    .build()
    .expect("connector must build")
}

/// Read one request head and its body, returned as text.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0; 1024];
    loop {
        let n = stream.read(&mut chunk).await.expect("read must succeed");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[tokio::test]
async fn test_signed_gzip_exchange() -> Result<()> {
    init_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (seen_tx, seen_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("must accept");
        let request = read_request(&mut stream).await;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"result":"created"}"#)
            .expect("write must succeed");
        let body = enc.finish().expect("finish must succeed");

        let head = format!(
            "HTTP/1.1 201 Created\r\ncontent-type: application/json\r\ncontent-encoding: gzip\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        stream
            .write_all(head.as_bytes())
            .await
            .expect("write must succeed");
        stream.write_all(&body).await.expect("write must succeed");
        let _ = seen_tx.send(request);
    });

    let conn = connector(addr);
    let resp = conn
        .request(
            RequestParams::new(Method::PUT, "/books/_doc/1")
                .with_query("refresh", "true")
                .with_header(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )
                .with_body(r#"{"title":"rust"}"#),
        )
        .await?;

    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.body, r#"{"result":"created"}"#);

    let request = seen_rx.await.expect("server must see the request");
    debug!("server saw: {request}");
    let lower = request.to_ascii_lowercase();
    assert!(lower.starts_with("put /books/_doc/1?refresh=true http/1.1"));
    assert!(lower.contains(&format!("host: {addr}")));
    assert!(lower.contains("presigned-expires: false"));
    assert!(lower.contains("x-amz-security-token: session-token"));
    assert!(request.contains("Credential=AKIDEXAMPLE/"));
    assert!(request.contains("/eu-west-1/es/aws4_request"));
    assert!(request.ends_with(r#"{"title":"rust"}"#));
    Ok(())
}

#[tokio::test]
async fn test_abort_closes_connection() -> Result<()> {
    init_logger();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (closed_tx, closed_rx) = oneshot::channel();
    let (seen_tx, seen_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("must accept");
        read_request(&mut stream).await;
        let _ = seen_tx.send(());

        // Never answer; wait for the client to hang up.
        let mut buf = [0; 64];
        let res = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await;
        let _ = closed_tx.send(matches!(res, Ok(Ok(0)) | Ok(Err(_))));
    });

    let conn = connector(addr);
    let inflight = conn.request(RequestParams::new(Method::GET, "/_search"));
    let handle = inflight.abort_handle();

    seen_rx.await.expect("server must see the request");
    assert_eq!(handle.stage(), Stage::Dispatching);
    handle.abort();

    let err = inflight.await.expect_err("aborted call must fail");
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(closed_rx.await.expect("server must report"));
    Ok(())
}

#[tokio::test]
async fn test_connection_refused() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let err = connector(addr)
        .request(RequestParams::new(Method::GET, "/"))
        .await
        .expect_err("nothing is listening");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
    Ok(())
}
