//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::ai::{CategorizationRequest, CategorizationService};
use crate::error::Result;
use crate::models::NewPost;

pub fn http_response(status: &str, headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        headers,
        body.len(),
        body
    )
}

pub fn rss_response(body: &str) -> String {
    http_response("200 OK", "Content-Type: application/rss+xml\r\n", body)
}

/// Serves canned responses by request path until the test ends; unknown
/// paths get a 404. Returns the base URL.
pub async fn spawn_server(routes: Vec<(&'static str, String)>) -> String {
    spawn_recording_server(routes).await.0
}

/// Like `spawn_server`, also keeping every raw request (head and body).
pub async fn spawn_recording_server(
    routes: Vec<(&'static str, String)>,
) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let request = read_request(&mut socket).await;
            let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
            log.lock().unwrap().push(request);
            let response = routes
                .iter()
                .find(|(route, _)| *route == path)
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| http_response("404 Not Found", "", ""));
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{}", addr), seen)
}

/// Reads the request head and, when a Content-Length is given, the body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        let Some(head_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let body_len = text[..head_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= head_end + 4 + body_len {
            break;
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

/// Replays queued responses in order, then answers `[]`. Records every request.
pub struct StubService {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<CategorizationRequest>>,
}

impl StubService {
    pub fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CategorizationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CategorizationService for StubService {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}

pub fn new_post(id: &str, author: &str) -> NewPost {
    NewPost {
        id: id.to_string(),
        author: author.to_string(),
        content: String::new(),
        content_text: format!("post {}", id),
        media_urls: vec![],
        post_url: String::new(),
        published_at: None,
    }
}
