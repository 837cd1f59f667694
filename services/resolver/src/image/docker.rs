//! Docker Engine transport over the daemon's Unix socket.
//!
//! Only the two endpoints the resolver needs are implemented:
//! - `GET /images/{name}/json` to inspect a local image
//! - `POST /images/create?fromImage=..&tag=..` to pull, which answers with a
//!   stream of newline-delimited JSON progress messages
//!
//! Reference: https://docs.docker.com/engine/api/v1.45/#tag/Image

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::body::{Buf, HttpBody};
use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use imgres_ref::ImageReference;
use serde::Deserialize;
use tracing::debug;

use super::metadata::ImageMetadata;
use super::transport::{
    ImageTransport, PullProgress, PullStream, TransportError, TransportErrorKind,
};

/// Default location of the Docker daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Image store client backed by a local Docker daemon.
pub struct DockerEngineTransport {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerEngineTransport {
    /// Create a transport for the daemon listening on `socket_path`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    async fn send(&self, method: Method, path: &str) -> Result<hyper::Response<Body>, TransportError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(method = %method, path = path, "Request to Docker Engine API");

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json")
            .body(Body::empty())
            .map_err(|e| TransportError::new(TransportErrorKind::ClientConfig, e.to_string()))?;

        self.client
            .request(request)
            .await
            .map_err(|e| self.map_hyper_error(e))
    }

    fn map_hyper_error(&self, err: hyper::Error) -> TransportError {
        if err.is_connect() {
            TransportError::new(
                TransportErrorKind::DaemonUnavailable,
                format!("cannot connect to Docker daemon at {}: {}", self.socket_path, err),
            )
        } else {
            TransportError::interrupted(err.to_string())
        }
    }
}

#[async_trait]
impl ImageTransport for DockerEngineTransport {
    async fn inspect(&self, reference: &ImageReference) -> Result<ImageMetadata, TransportError> {
        let path = format!("/images/{}/json", reference);
        let response = self.send(Method::GET, &path).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body())
            .await
            .map_err(|e| self.map_hyper_error(e))?;

        if !status.is_success() {
            return Err(error_for_status(status, body.chunk()));
        }

        let inspected: InspectResponse = serde_json::from_reader(body.reader()).map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("undecodable inspect response: {e}"),
            )
        })?;

        Ok(ImageMetadata::new(inspected.id, inspected.created))
    }

    async fn pull(
        &self,
        repository: &str,
        tag_or_digest: &str,
    ) -> Result<PullStream, TransportError> {
        let path = format!(
            "/images/create?fromImage={}&tag={}",
            urlencoding::encode(repository),
            urlencoding::encode(tag_or_digest)
        );
        let response = self.send(Method::POST, &path).await?;
        let status = response.status();

        if !status.is_success() {
            let body = hyper::body::aggregate(response.into_body())
                .await
                .map_err(|e| self.map_hyper_error(e))?;
            return Err(error_for_status(status, body.chunk()));
        }

        let decoder = ProgressDecoder::new(response.into_body());
        Ok(Box::pin(futures_util::stream::unfold(
            decoder,
            |mut decoder| async move {
                let event = decoder.next_event().await?;
                Some((event, decoder))
            },
        )))
    }
}

/// Subset of the `GET /images/{name}/json` response.
#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Created")]
    created: DateTime<Utc>,
}

/// Error body returned by the Engine API.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// One line of the `POST /images/create` progress stream.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressMessage {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    progress_detail: Option<ProgressDetail>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ProgressDetail {
    current: Option<u64>,
    total: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Splits the chunked response body into progress messages.
struct ProgressDecoder {
    body: Body,
    buf: Vec<u8>,
    done: bool,
}

impl ProgressDecoder {
    fn new(body: Body) -> Self {
        Self {
            body,
            buf: Vec::new(),
            done: false,
        }
    }

    async fn next_event(&mut self) -> Option<Result<PullProgress, TransportError>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                if let Some(event) = self.decode(&line) {
                    return Some(event);
                }
                continue;
            }

            if self.done {
                if self.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.buf);
                if let Some(event) = self.decode(&line) {
                    return Some(event);
                }
                continue;
            }

            match self.body.data().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.done = true;
                    self.buf.clear();
                    return Some(Err(TransportError::interrupted(format!(
                        "pull stream broke off: {e}"
                    ))));
                }
                None => self.done = true,
            }
        }
    }

    /// Decode one line; `None` for blank or unrecognised lines.
    fn decode(&mut self, line: &[u8]) -> Option<Result<PullProgress, TransportError>> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }

        let message: ProgressMessage = match serde_json::from_slice(line) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable pull progress line");
                return None;
            }
        };

        let error = message
            .error_detail
            .and_then(|detail| detail.message)
            .or(message.error);
        if let Some(error) = error {
            // Nothing after an error line is meaningful.
            self.done = true;
            self.buf.clear();
            return Some(Err(classify_stream_error(error)));
        }

        let (current, total) = message
            .progress_detail
            .map(|detail| (detail.current, detail.total))
            .unwrap_or((None, None));

        Some(Ok(PullProgress {
            status: message.status.unwrap_or_default(),
            id: message.id,
            current,
            total,
        }))
    }
}

/// Errors embedded in the progress stream come from the daemon relaying a
/// registry failure. Server-side and timeout faults are worth retrying; the
/// rest (unknown manifest, denied access) are not.
fn classify_stream_error(message: String) -> TransportError {
    let lower = message.to_ascii_lowercase();
    let transient = [
        "internal server error",
        "502 bad gateway",
        "503 service unavailable",
        "504 gateway timeout",
        "timeout",
        "connection reset",
        "unexpected eof",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    let kind = if transient {
        TransportErrorKind::ServerError
    } else {
        TransportErrorKind::PullFailed
    };
    TransportError::new(kind, message)
}

fn error_for_status(status: StatusCode, body: &[u8]) -> TransportError {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());

    let kind = match status {
        StatusCode::NOT_FOUND => TransportErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportErrorKind::Unauthorized,
        s if s.is_server_error() => TransportErrorKind::ServerError,
        s if s.is_client_error() => TransportErrorKind::ClientConfig,
        _ => TransportErrorKind::Other,
    };

    TransportError::new(kind, format!("Docker Engine API {}: {}", status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn decoder_for(chunks: Vec<&'static str>) -> PullStream {
        let stream = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, std::io::Error>(chunk)),
        );
        let decoder = ProgressDecoder::new(Body::wrap_stream(stream));
        Box::pin(futures_util::stream::unfold(decoder, |mut decoder| async move {
            let event = decoder.next_event().await?;
            Some((event, decoder))
        }))
    }

    #[tokio::test]
    async fn test_progress_lines_split_across_chunks() {
        let mut stream = decoder_for(vec![
            "{\"status\":\"Pulling from library/redis\",\"id\":\"7\"}\n{\"status\":\"Downl",
            "oading\",\"id\":\"a1b2\",\"progressDetail\":{\"current\":10,\"total\":20}}\n",
            "\n{\"status\":\"Status: Downloaded newer image for redis:7\"}",
        ]);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, "Pulling from library/redis");
        assert_eq!(first.id.as_deref(), Some("7"));

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.status, "Downloading");
        assert_eq!(second.current, Some(10));
        assert_eq!(second.total, Some(20));

        let third = stream.next().await.unwrap().unwrap();
        assert!(third.status.starts_with("Status: Downloaded"));

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let mut stream = decoder_for(vec![
            "{\"status\":\"Pulling fs layer\"}\n",
            "{\"errorDetail\":{\"message\":\"manifest for redis:nope not found\"},\"error\":\"manifest for redis:nope not found\"}\n",
            "{\"status\":\"ignored\"}\n",
        ]);

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::PullFailed);
        assert!(err.message().contains("manifest for redis:nope"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_lines_are_skipped() {
        let mut stream = decoder_for(vec!["not json\n{\"status\":\"Done\"}\n"]);
        assert_eq!(stream.next().await.unwrap().unwrap().status, "Done");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_stream_errors_classified() {
        let err = classify_stream_error(
            "received unexpected HTTP status: 500 Internal Server Error".to_string(),
        );
        assert_eq!(err.kind(), TransportErrorKind::ServerError);

        let err = classify_stream_error("net/http: TLS handshake timeout".to_string());
        assert_eq!(err.kind(), TransportErrorKind::ServerError);

        let err = classify_stream_error("pull access denied for nope".to_string());
        assert_eq!(err.kind(), TransportErrorKind::PullFailed);
    }

    #[test]
    fn test_error_for_status() {
        let err = error_for_status(
            StatusCode::NOT_FOUND,
            br#"{"message":"No such image: redis:7"}"#,
        );
        assert!(err.is_not_found());
        assert!(err.message().contains("No such image: redis:7"));

        assert_eq!(
            error_for_status(StatusCode::INTERNAL_SERVER_ERROR, b"oops").kind(),
            TransportErrorKind::ServerError
        );
        assert_eq!(
            error_for_status(StatusCode::UNAUTHORIZED, b"").kind(),
            TransportErrorKind::Unauthorized
        );
        assert_eq!(
            error_for_status(StatusCode::BAD_REQUEST, b"bad").kind(),
            TransportErrorKind::ClientConfig
        );
    }

    #[test]
    fn test_encode_query_value() {
        assert_eq!(urlencoding::encode("library/redis"), "library%2Fredis");
        assert_eq!(
            urlencoding::encode("localhost:5000/app"),
            "localhost%3A5000%2Fapp"
        );
        assert_eq!(urlencoding::encode("7.2-alpine"), "7.2-alpine");
        assert_eq!(
            urlencoding::encode("sha256:abc"),
            "sha256%3Aabc"
        );
    }

    #[test]
    fn test_inspect_response_decodes() {
        let body = r#"{"Id":"sha256:abc","Created":"2024-05-01T10:20:30.123456789Z","RepoTags":["redis:7"]}"#;
        let inspected: InspectResponse = serde_json::from_str(body).unwrap();
        assert_eq!(inspected.id, "sha256:abc");
        assert_eq!(inspected.created.timestamp(), 1714558830);
    }

    #[tokio::test]
    async fn test_missing_socket_is_daemon_unavailable() {
        let transport = DockerEngineTransport::new("/nonexistent/imgres-test/docker.sock");
        assert!(!transport.socket_exists());

        let reference = ImageReference::parse("library/redis:7").unwrap();
        let err = transport.inspect(&reference).await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::DaemonUnavailable);
    }
}
