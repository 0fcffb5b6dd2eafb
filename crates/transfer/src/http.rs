use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use offload_protocol::{
    ATTEMPT_TIMEOUT, DEFAULT_CHUNK_SIZE, DestinationMeta, PayloadDescriptor, TransferReceipt,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    ChunkReader, ProgressCallback, ProgressMeter, TransferClient, TransferError, TransferFuture,
    calculate_file_checksum, validate_descriptor,
};

/// Header carrying the base64-encoded JSON destination metadata.
pub const META_HEADER: &str = "x-offload-meta";
/// Header carrying the hex SHA-256 of the payload.
pub const CHECKSUM_HEADER: &str = "x-content-sha256";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Settings for [`HttpTransferClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the remote store, e.g. `https://media.example.com`.
    pub endpoint: String,
    pub bearer_token: Option<String>,
    /// Bound on a whole attempt, connect through response.
    pub timeout: Duration,
    pub chunk_size: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".into(),
            bearer_token: None,
            timeout: ATTEMPT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: String,
    #[serde(default)]
    metadata: std::collections::BTreeMap<String, String>,
}

/// Uploads payloads with a streamed `PUT {endpoint}/objects/{name}`.
pub struct HttpTransferClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    chunk_size: usize,
}

impl HttpTransferClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, TransferError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = config.bearer_token.as_deref() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    TransferError::InvalidRequest("bearer token is not a valid header value".into())
                })?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(TransferError::from_reqwest)?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            chunk_size: config.chunk_size,
        })
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/objects/{}",
            self.endpoint,
            utf8_percent_encode(name, PATH_SEGMENT)
        )
    }

    async fn send(
        &self,
        payload: &PayloadDescriptor,
        destination: &DestinationMeta,
        on_progress: ProgressCallback,
    ) -> Result<TransferReceipt, TransferError> {
        validate_descriptor(payload, destination)?;

        let meta_json = serde_json::to_vec(destination)
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;
        let meta = base64::engine::general_purpose::STANDARD.encode(meta_json);

        let path = PathBuf::from(&payload.path);
        let size = payload.size;
        let chunk_size = self.chunk_size;
        let (checksum, reader) = tokio::task::spawn_blocking(move || -> Result<_, TransferError> {
            let actual = std::fs::metadata(&path)?.len();
            if actual < size {
                return Err(TransferError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source is {actual} bytes, declared {size}"),
                )));
            }
            let checksum = calculate_file_checksum(&path, size)?;
            let reader = ChunkReader::new(&path, chunk_size, size)?;
            Ok((checksum, reader))
        })
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;

        let meter = Arc::new(ProgressMeter::start(size, on_progress));
        let body = reqwest::Body::wrap_stream(chunk_stream(reader, Arc::clone(&meter)));

        let url = self.object_url(&payload.name);
        debug!(url = %url, size, "starting transfer");

        let resp = self
            .http
            .put(&url)
            .header(CONTENT_LENGTH, size)
            .header(CONTENT_TYPE, payload.media_type.as_str())
            .header(META_HEADER, meta)
            .header(CHECKSUM_HEADER, checksum)
            .body(body)
            .send()
            .await
            .map_err(TransferError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "remote declined transfer");
            return Err(TransferError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(TransferError::from_reqwest)?;
        let object: ObjectResponse = serde_json::from_slice(&bytes)
            .map_err(|e| TransferError::InvalidResponse(e.to_string()))?;

        let sent = meter.snapshot();
        debug!(
            remote_id = %object.id,
            bytes = sent.bytes_sent,
            elapsed_ms = meter.elapsed().as_millis() as u64,
            "transfer accepted"
        );

        Ok(TransferReceipt {
            remote_id: object.id,
            metadata: object.metadata,
        })
    }
}

/// Turns a [`ChunkReader`] into a body stream, reading each chunk on the
/// blocking pool and reporting progress as it is handed to the transport.
fn chunk_stream(
    reader: ChunkReader,
    meter: Arc<ProgressMeter>,
) -> impl futures_util::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    futures_util::stream::unfold(Some(reader), move |state| {
        let meter = Arc::clone(&meter);
        async move {
            let mut reader = state?;
            let joined = tokio::task::spawn_blocking(move || {
                let next = reader.next_chunk();
                (reader, next)
            })
            .await;

            match joined {
                Ok((reader, Ok(Some(chunk)))) => {
                    meter.advance(chunk.size as u64);
                    Some((Ok(chunk.data), Some(reader)))
                }
                Ok((_, Ok(None))) => {
                    meter.report();
                    None
                }
                Ok((_, Err(e))) => Some((Err(std::io::Error::other(e)), None)),
                Err(e) => Some((Err(std::io::Error::other(e)), None)),
            }
        }
    })
}

impl TransferClient for HttpTransferClient {
    fn transfer<'a>(
        &'a self,
        payload: &'a PayloadDescriptor,
        destination: &'a DestinationMeta,
        on_progress: ProgressCallback,
    ) -> TransferFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.send(payload, destination, on_progress))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransferError::Timeout(self.timeout)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use offload_protocol::TransferProgress;
    use std::io::Write;
    use std::sync::Mutex;
    use sha2::Digest;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// Starts a mock HTTP server that reads one full request and replies
    /// with `status` and `body`.
    async fn mock_server(
        status: u16,
        body: &str,
    ) -> (String, tokio::task::JoinHandle<Option<Captured>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.ok()?;
            let mut buf = Vec::new();
            let mut tmp = vec![0u8; 8192];

            let header_end = loop {
                let n = stream.read(&mut tmp).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length")
                        .then(|| v.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);

            let mut req_body = buf[header_end..].to_vec();
            while req_body.len() < content_length {
                let n = stream.read(&mut tmp).await.ok()?;
                if n == 0 {
                    break;
                }
                req_body.extend_from_slice(&tmp[..n]);
            }

            let resp = format!(
                "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes()).await;
            let _ = stream.shutdown().await;

            Some(Captured {
                head,
                body: req_body,
            })
        });

        (url, handle)
    }

    fn write_payload(dir: &TempDir, name: &str, data: &[u8]) -> PayloadDescriptor {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        PayloadDescriptor {
            path: path.to_string_lossy().to_string(),
            name: name.into(),
            media_type: "video/mp4".into(),
            size: data.len() as u64,
        }
    }

    fn client(url: &str, token: Option<&str>) -> HttpTransferClient {
        HttpTransferClient::new(HttpClientConfig {
            endpoint: url.to_string(),
            bearer_token: token.map(String::from),
            timeout: Duration::from_secs(10),
            chunk_size: 4,
        })
        .unwrap()
    }

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |p| s.lock().unwrap().push(p));
        (cb, seen)
    }

    #[tokio::test]
    async fn successful_transfer_returns_receipt() {
        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "clip.mp4", b"0123456789");
        let meta = DestinationMeta::new().with("ownerId", "u1");
        let (url, handle) =
            mock_server(201, r#"{"id":"obj-1","metadata":{"url":"https://cdn/obj-1"}}"#).await;

        let (cb, seen) = recording();
        let receipt = client(&url, Some("secret"))
            .transfer(&payload, &meta, cb)
            .await
            .unwrap();

        assert_eq!(receipt.remote_id, "obj-1");
        assert_eq!(receipt.metadata["url"], "https://cdn/obj-1");

        let captured = handle.await.unwrap().unwrap();
        let head = captured.head.to_lowercase();
        assert!(head.starts_with("put /objects/clip.mp4 "));
        assert!(head.contains("authorization: bearer secret"));
        assert!(head.contains("content-type: video/mp4"));
        assert!(head.contains("content-length: 10"));
        assert!(head.contains("x-content-sha256: "));
        assert_eq!(captured.body, b"0123456789");

        let meta_line = captured
            .head
            .lines()
            .find(|l| l.to_lowercase().starts_with(META_HEADER))
            .unwrap();
        let encoded = meta_line.split_once(':').unwrap().1.trim();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let parsed: DestinationMeta = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(parsed, meta);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0].bytes_sent <= w[1].bytes_sent));
        let last = seen.last().unwrap();
        assert_eq!(last.bytes_sent, 10);
        assert_eq!(last.percentage, 100.0);
    }

    #[tokio::test]
    async fn grown_source_sends_declared_bytes_with_matching_checksum() {
        let dir = TempDir::new().unwrap();
        let mut payload = write_payload(&dir, "grown.mp4", b"0123456789");
        payload.size = 6;
        let (url, handle) = mock_server(201, r#"{"id":"obj-2"}"#).await;

        let (cb, _) = recording();
        client(&url, None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap();

        let captured = handle.await.unwrap().unwrap();
        assert_eq!(captured.body, b"012345");

        let header_sha = captured
            .head
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case(CHECKSUM_HEADER)
                    .then(|| v.trim().to_string())
            })
            .unwrap();
        let body_sha = hex::encode(sha2::Sha256::digest(&captured.body));
        assert_eq!(header_sha, body_sha);
    }

    #[tokio::test]
    async fn name_is_percent_encoded() {
        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "my clip.mp4", b"abc");
        let (url, handle) = mock_server(200, r#"{"id":"x"}"#).await;

        let (cb, _) = recording();
        let receipt = client(&url, None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap();
        assert_eq!(receipt.remote_id, "x");
        assert!(receipt.metadata.is_empty());

        let captured = handle.await.unwrap().unwrap();
        assert!(captured.head.starts_with("PUT /objects/my%20clip.mp4 "));
        assert!(!captured.head.to_lowercase().contains("authorization"));
    }

    #[tokio::test]
    async fn client_error_is_rejected() {
        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "a.mp4", b"abc");
        let (url, handle) = mock_server(422, r#"{"error":"unsupported codec"}"#).await;

        let (cb, _) = recording();
        let err = client(&url, None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Rejected);
        match err {
            TransferError::Remote { status, body } => {
                assert_eq!(status, 422);
                assert!(body.contains("unsupported codec"));
            }
            other => panic!("unexpected error: {other}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn server_error_is_network() {
        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "a.mp4", b"abc");
        let (url, handle) = mock_server(503, "").await;

        let (cb, _) = recording();
        let err = client(&url, None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        handle.abort();
    }

    #[tokio::test]
    async fn connection_refused_is_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "a.mp4", b"abc");
        let (cb, _) = recording();
        let err = client(&format!("http://127.0.0.1:{port}"), None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Connection(_)));
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "a.mp4", b"abc");
        let client = HttpTransferClient::new(HttpClientConfig {
            endpoint: url,
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();

        let (cb, _) = recording();
        let err = client
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout(_)));
        assert_eq!(err.kind(), ErrorKind::Network);
        handle.abort();
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let payload = PayloadDescriptor {
            path: "/nonexistent/offload/a.mp4".into(),
            name: "a.mp4".into(),
            media_type: "video/mp4".into(),
            size: 3,
        };
        let (cb, seen) = recording();
        let err = client("http://127.0.0.1:9", None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut payload = write_payload(&dir, "a.mp4", b"abc");
        payload.size = 100;

        let (cb, _) = recording();
        let err = client("http://127.0.0.1:9", None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn invalid_descriptor_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut payload = write_payload(&dir, "a.mp4", b"abc");
        payload.name = "../a.mp4".into();

        let (cb, _) = recording();
        let err = client("http://127.0.0.1:9", None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDescriptor(_)));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_fatal() {
        let dir = TempDir::new().unwrap();
        let payload = write_payload(&dir, "a.mp4", b"abc");
        let (url, handle) = mock_server(200, "not json").await;

        let (cb, _) = recording();
        let err = client(&url, None)
            .transfer(&payload, &DestinationMeta::new(), cb)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidResponse(_)));
        assert_eq!(err.kind(), ErrorKind::Fatal);
        handle.abort();
    }

    #[test]
    fn invalid_token_is_rejected() {
        let result = HttpTransferClient::new(HttpClientConfig {
            bearer_token: Some("bad\ntoken".into()),
            ..Default::default()
        });
        assert!(matches!(result, Err(TransferError::InvalidRequest(_))));
    }
}
