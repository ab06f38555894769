//! Minimal HTTP/1.1 server answering from canned responses.
//!
//! Every route (`"METHOD /path?query"`) has a queue of `(status, body)`
//! answers consumed in order; unknown or exhausted routes answer 404.
//! Connections are closed after each response.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Routes = HashMap<String, VecDeque<(u16, String)>>;

pub struct StubServer {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    /// Start serving `responses` on an ephemeral localhost port.
    pub async fn start(responses: &[(&str, u16, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut routes = Routes::new();
        for (route, status, body) in responses {
            routes
                .entry(route.to_string())
                .or_default()
                .push_back((*status, body.to_string()));
        }
        let routes = Arc::new(Mutex::new(routes));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let seen = Arc::clone(&seen);
                tokio::spawn(handle(stream, routes, seen));
            }
        });

        Self {
            url: format!("http://{addr}"),
            requests,
        }
    }

    /// Routes requested so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, route: &str) -> usize {
        self.requests().iter().filter(|r| *r == route).count()
    }
}

async fn handle(
    mut stream: TcpStream,
    routes: Arc<Mutex<Routes>>,
    seen: Arc<Mutex<Vec<String>>>,
) {
    let route = read_request(&mut stream).await;
    seen.lock().unwrap().push(route.clone());

    let (status, body) = routes
        .lock()
        .unwrap()
        .get_mut(&route)
        .and_then(VecDeque::pop_front)
        .unwrap_or((404, String::new()));

    let response = format!(
        "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}

/// Read one request and return its `"METHOD target"`.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut parts = head.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    format!("{method} {target}")
}
