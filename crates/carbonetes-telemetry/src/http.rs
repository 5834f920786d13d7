//! Minimal HTTP/1 client helpers.
//!
//! Every call opens a fresh connection, bounded by a single timeout that
//! covers connect, handshake, request and body collection.

use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Empty, Full};
use serde::Serialize;
use tracing::debug;

use crate::error::{TelemetryError, TelemetryResult};

const USER_AGENT: &str = "carbonetes/0.1";

/// Split an `http://host:port/path` URL into `(authority, path_and_query)`.
pub fn split_url(url: &str) -> TelemetryResult<(String, String)> {
    let uri: Uri = url
        .parse()
        .map_err(|e| TelemetryError::Parse(format!("invalid url {url}: {e}")))?;
    let authority = uri
        .authority()
        .ok_or_else(|| TelemetryError::Parse(format!("url {url} has no authority")))?;
    let host_port = match authority.port_u16() {
        Some(_) => authority.as_str().to_string(),
        None => format!("{}:80", authority.host()),
    };
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    Ok((host_port, path))
}

/// GET `http://{address}{path}` and return the body as text.
pub async fn get_text(address: &str, path: &str, timeout: Duration) -> TelemetryResult<String> {
    let uri = format!("http://{address}{path}");
    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", address)
        .header("user-agent", USER_AGENT)
        .body(Empty::<Bytes>::new())
        .map_err(|e| TelemetryError::Parse(e.to_string()))?;

    let body = send(address, &uri, req, timeout).await?;
    String::from_utf8(body.to_vec()).map_err(|e| TelemetryError::Parse(e.to_string()))
}

/// POST a JSON body to a full URL, returning the raw response bytes.
pub async fn post_json<T: Serialize + ?Sized>(
    url: &str,
    payload: &T,
    timeout: Duration,
) -> TelemetryResult<Bytes> {
    let (address, path) = split_url(url)?;
    let json = serde_json::to_vec(payload).map_err(|e| TelemetryError::Parse(e.to_string()))?;
    let req = http::Request::builder()
        .method("POST")
        .uri(path.as_str())
        .header("host", address.as_str())
        .header("user-agent", USER_AGENT)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .map_err(|e| TelemetryError::Parse(e.to_string()))?;

    send(&address, url, req, timeout).await
}

async fn send<B>(
    address: &str,
    uri: &str,
    req: http::Request<B>,
    timeout: Duration,
) -> TelemetryResult<Bytes>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| TelemetryError::Connect(format!("{uri}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TelemetryError::Connect(format!("{uri}: handshake: {e}")))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TelemetryError::Connect(format!("{uri}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            debug!(%status, %uri, "non-2xx response");
            return Err(TelemetryError::Status {
                target: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| TelemetryError::Connect(format!("{uri}: body: {e}")))?;
        Ok(body.to_bytes())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "request timed out");
            Err(TelemetryError::Timeout(uri.to_string()))
        }
    }
}
