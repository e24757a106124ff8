//! HTTP client tests against a minimal in-process server.
//!
//! The server answers each connection with one canned reply and records the
//! raw request it received.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use trackwiz_core::client::HttpTrackingService;
use trackwiz_core::error::{Error, RequestError, UploadError};
use trackwiz_core::points::{PointKind, PointSet};
use trackwiz_core::service::{JobStatus, ModelSize, SessionId, TrackingService};

// =============================================================================
// Test server
// =============================================================================

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    body: Vec<u8>,
}

impl Recorded {
    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

fn json(status: u16, body: &str) -> Reply {
    Reply {
        status,
        content_type: "application/json",
        body: body.as_bytes().to_vec(),
    }
}

/// Serve `replies` in order, one per connection.
async fn serve(replies: Vec<Reply>) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&recorded);

    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if let Some(request) = read_request(&mut stream).await {
                sink.lock().unwrap().push(request);
            }
            let head = format!(
                "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                reply.status,
                reply.content_type,
                reply.body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&reply.body).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{addr}"), recorded)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let mut body = buf[header_end..].to_vec();
    if let Some(length) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while body.len() < length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    } else if header("transfer-encoding").is_some_and(|v| v.contains("chunked")) {
        while find(&body, b"0\r\n\r\n").is_none() {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    Some(Recorded { method, path, body })
}

fn client(base: &str) -> HttpTrackingService {
    HttpTrackingService::new(base, Duration::from_secs(5)).expect("client")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn upload_sends_multipart_video() {
    let (base, recorded) = serve(vec![json(
        200,
        r#"{"session_id":"abc","filename":"clip.mp4","message":"ok"}"#,
    )])
    .await;
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("clip.mp4");
    std::fs::write(&video, b"fake-video-bytes").unwrap();

    let receipt = client(&base).upload(&video).await.unwrap();
    assert_eq!(receipt.session_id, SessionId::new("abc"));

    let request = recorded.lock().unwrap()[0].clone();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/upload");
    let body = request.body_text();
    assert!(body.contains(r#"name="video""#));
    assert!(body.contains(r#"filename="clip.mp4""#));
    assert!(body.contains("fake-video-bytes"));
}

#[tokio::test]
async fn upload_rejection_carries_service_message() {
    let (base, _) = serve(vec![json(400, r#"{"error":"Invalid file type"}"#)]).await;
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("clip.mp4");
    std::fs::write(&video, b"x").unwrap();

    let err = client(&base).upload(&video).await.unwrap_err();
    match err {
        Error::Upload(UploadError::Rejected(message)) => {
            assert!(message.contains("400"));
            assert!(message.contains("Invalid file type"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn select_points_posts_coords_and_labels() {
    let (base, recorded) = serve(vec![json(200, r#"{"message":"Selected 2 points"}"#)]).await;
    let mut points = PointSet::new();
    points.add(10, 20, PointKind::Positive);
    points.add(30, 40, PointKind::Negative);

    let ack = client(&base)
        .select_points(&SessionId::new("abc"), &points.selection())
        .await
        .unwrap();
    assert_eq!(ack.message, "Selected 2 points");

    let request = recorded.lock().unwrap()[0].clone();
    assert_eq!(request.path, "/select_points/abc");
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"points": {"coords": [[10, 20], [30, 40]], "labels": [1, 0]}})
    );
}

#[tokio::test]
async fn start_tracking_sends_model_size() {
    let (base, recorded) = serve(vec![json(200, r#"{"message":"Tracking started"}"#)]).await;
    client(&base)
        .start_tracking(&SessionId::new("abc"), ModelSize::BasePlus)
        .await
        .unwrap();

    let request = recorded.lock().unwrap()[0].clone();
    assert_eq!(request.path, "/start_tracking/abc");
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, serde_json::json!({"model_size": "base_plus"}));
}

#[tokio::test]
async fn status_decodes_report() {
    let (base, recorded) = serve(vec![json(
        200,
        r#"{"session_id":"abc","status":"extracting","progress":42,"message":"working","error":null}"#,
    )])
    .await;
    let report = client(&base).status(&SessionId::new("abc")).await.unwrap();
    assert_eq!(report.kind(), JobStatus::Pending);
    assert_eq!(report.progress_percent(), 42);
    assert_eq!(recorded.lock().unwrap()[0].method, "GET");
}

#[tokio::test]
async fn session_id_is_escaped_in_the_request_path() {
    let (base, recorded) = serve(vec![json(200, r#"{"status":"tracking","progress":10}"#)]).await;
    client(&base).status(&SessionId::new("a/b?x")).await.unwrap();
    assert_eq!(recorded.lock().unwrap()[0].path, "/status/a%2Fb%3Fx");
}

#[tokio::test]
async fn completed_report_with_negative_count_decodes() {
    let (base, _) = serve(vec![json(
        200,
        r#"{"status":"completed","progress":100,"tracking_results":{"total_frames":4,"processed_frames":4,"objects_detected":{"0":-6},"demo_mode":true}}"#,
    )])
    .await;
    let report = client(&base).status(&SessionId::new("abc")).await.unwrap();
    assert_eq!(report.kind(), JobStatus::Completed);
    let results = report.tracking_results.unwrap();
    assert_eq!(results.objects_detected.get("0"), Some(&0));
}

#[tokio::test]
async fn frame_urls_are_resolved() {
    let (base, _) = serve(vec![json(
        200,
        r#"{"total_frames":3,"preview_frames":[{"index":0,"filename":"00000.jpg","url":"/frames/abc/00000.jpg"}]}"#,
    )])
    .await;
    let listing = client(&base).frames(&SessionId::new("abc")).await.unwrap();
    assert_eq!(listing.total_frames, 3);
    assert_eq!(
        listing.first_preview().unwrap().url,
        format!("{base}/frames/abc/00000.jpg")
    );
}

#[tokio::test]
async fn error_status_maps_to_request_error() {
    let (base, _) = serve(vec![json(404, r#"{"error":"Session not found"}"#)]).await;
    let err = client(&base)
        .extract_frames(&SessionId::new("zzz"))
        .await
        .unwrap_err();
    match err {
        Error::Request(RequestError::Status {
            endpoint,
            status,
            message,
        }) => {
            assert_eq!(endpoint, "extract_frames");
            assert_eq!(status, 404);
            assert_eq!(message, "Session not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_body_is_kept() {
    let (base, _) = serve(vec![Reply {
        status: 502,
        content_type: "text/plain",
        body: b"upstream down".to_vec(),
    }])
    .await;
    let err = client(&base).cleanup(&SessionId::new("abc")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Request(RequestError::Status { status: 502, ref message, .. }) if message == "upstream down"
    ));
}

#[tokio::test]
async fn download_returns_raw_bytes() {
    let archive = b"PK\x03\x04archive".to_vec();
    let (base, _) = serve(vec![Reply {
        status: 200,
        content_type: "application/zip",
        body: archive.clone(),
    }])
    .await;
    let bytes = client(&base)
        .download_results(&SessionId::new("abc"))
        .await
        .unwrap();
    assert_eq!(bytes, archive);
}

#[tokio::test]
async fn malformed_json_is_a_transport_error() {
    let (base, _) = serve(vec![json(200, "not json")]).await;
    let err = client(&base).status(&SessionId::new("abc")).await.unwrap_err();
    assert!(matches!(err, Error::Request(RequestError::Transport { .. })));
}
