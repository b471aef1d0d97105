//! Loopback HTTP server that replays canned responses, one per connection.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Request line and arrival time of one served request.
#[derive(Debug, Clone)]
pub(crate) struct Hit {
    pub request_line: String,
    pub at: Instant,
}

pub(crate) struct CannedServer {
    listener: Option<TcpListener>,
    base: String,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl CannedServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        Self {
            listener: Some(listener),
            base,
            hits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Answers the next `responses.len()` connections in order, then stops listening.
    pub fn serve(&mut self, responses: Vec<(u16, String)>) {
        let listener = self.listener.take().expect("serve called twice");
        let hits = Arc::clone(&self.hits);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };

                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let request_line = String::from_utf8_lossy(&request)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                hits.lock().unwrap().push(Hit { request_line, at: Instant::now() });

                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }
}
