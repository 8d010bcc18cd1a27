// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process HTTP/1.1 file server for integration tests.
//!
//! Serves one byte buffer at every path, one request per connection, on a
//! background thread. Behaviour is switched with [`ServerOptions`].

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Answer ranged GETs with 206. When false every GET gets the full body with 200.
    pub honor_range: bool,
    /// Send Content-Length on HEAD responses.
    pub head_length: bool,
    /// Stop honouring ranges after this many GETs.
    pub range_limit: Option<usize>,
    /// Answer everything with 404.
    pub not_found: bool,
    /// Answer every GET with this status line and a short body; HEAD is unaffected.
    pub get_status: Option<&'static str>,
    /// Delay before answering a HEAD.
    pub head_delay_ms: u64,
    /// Delay before answering a GET.
    pub get_delay_ms: u64,
    /// Path announced as the next page in a `Link` header on 200 responses.
    pub link_next: Option<&'static str>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            honor_range: true,
            head_length: true,
            range_limit: None,
            not_found: false,
            get_status: None,
            head_delay_ms: 0,
            get_delay_ms: 0,
            link_next: None,
        }
    }
}

/// One request as seen by the server.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub range: Option<String>,
    pub authorization: Option<String>,
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Seen>>>,
    count: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start(data: Vec<u8>, options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let data = Arc::new(data);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        let (reqs, cnt) = (requests.clone(), count.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let (data, reqs, cnt) = (data.clone(), reqs.clone(), cnt.clone());
                thread::spawn(move || {
                    let _ = handle(stream, addr, &data, options, &reqs, &cnt);
                });
            }
        });

        Self { addr, requests, count }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn request_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.requests.lock().expect("lock").clone()
    }

    /// Ranges of the GET requests, in arrival order.
    pub fn get_ranges(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .filter_map(|r| r.range)
            .collect()
    }
}

fn handle(
    stream: TcpStream,
    addr: SocketAddr,
    data: &[u8],
    options: ServerOptions,
    requests: &Mutex<Vec<Seen>>,
    count: &AtomicUsize,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut range = None;
    let mut authorization = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let value = value.trim().to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "range" => range = Some(value),
                "authorization" => authorization = Some(value),
                _ => {}
            }
        }
    }

    let gets = {
        let mut seen = requests.lock().expect("lock");
        seen.push(Seen {
            method: method.clone(),
            path,
            range: range.clone(),
            authorization,
        });
        seen.iter().filter(|r| r.method == "GET").count()
    };
    count.fetch_add(1, Ordering::SeqCst);
    let honor_range = options.honor_range && options.range_limit.map_or(true, |n| gets <= n);

    let total = data.len() as u64;
    let mut out = stream;

    let delay = if method == "HEAD" { options.head_delay_ms } else { options.get_delay_ms };
    if delay > 0 {
        thread::sleep(Duration::from_millis(delay));
    }

    if options.not_found {
        let body = b"Entry not found";
        let headers = [("Content-Length", body.len().to_string())];
        return respond(&mut out, "404 Not Found", &headers, body, &method);
    }

    if let Some(status) = options.get_status.filter(|_| method == "GET") {
        let body = b"upstream unavailable";
        let headers = [("Content-Length", body.len().to_string())];
        return respond(&mut out, status, &headers, body, &method);
    }

    if method == "HEAD" {
        let headers: Vec<(&str, String)> = if options.head_length {
            vec![("Content-Length", total.to_string())]
        } else {
            Vec::new()
        };
        return respond(&mut out, "200 OK", &headers, &[], &method);
    }

    match range.as_deref().and_then(parse_range).filter(|_| honor_range) {
        Some((start, _)) if start >= total => respond(
            &mut out,
            "416 Range Not Satisfiable",
            &[
                ("Content-Range", format!("bytes */{}", total)),
                ("Content-Length", "0".to_string()),
            ],
            &[],
            &method,
        ),
        Some((start, end)) => {
            let end = end.min(total - 1);
            let body = &data[start as usize..=end as usize];
            respond(
                &mut out,
                "206 Partial Content",
                &[
                    ("Content-Range", format!("bytes {}-{}/{}", start, end, total)),
                    ("Content-Length", body.len().to_string()),
                ],
                body,
                &method,
            )
        }
        None => {
            let mut headers = vec![("Content-Length", total.to_string())];
            if let Some(next) = options.link_next {
                headers.push(("Link", format!("<http://{}{}>; rel=\"next\"", addr, next)));
            }
            respond(&mut out, "200 OK", &headers, data, &method)
        }
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

fn respond(
    out: &mut TcpStream,
    status: &str,
    headers: &[(&str, String)],
    body: &[u8],
    method: &str,
) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes())?;
    if method != "HEAD" {
        out.write_all(body)?;
    }
    out.flush()
}

/// Minimal GGUF v3 writer.
pub struct Gguf {
    entries: Vec<u8>,
    count: u64,
}

impl Gguf {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    fn key(mut self, key: &str, tag: u32) -> Self {
        self.entries.extend_from_slice(&(key.len() as u64).to_le_bytes());
        self.entries.extend_from_slice(key.as_bytes());
        self.entries.extend_from_slice(&tag.to_le_bytes());
        self.count += 1;
        self
    }

    pub fn u32(self, key: &str, value: u32) -> Self {
        let mut this = self.key(key, 4);
        this.entries.extend_from_slice(&value.to_le_bytes());
        this
    }

    pub fn u64(self, key: &str, value: u64) -> Self {
        let mut this = self.key(key, 10);
        this.entries.extend_from_slice(&value.to_le_bytes());
        this
    }

    pub fn string(self, key: &str, value: &str) -> Self {
        let mut this = self.key(key, 8);
        this.entries.extend_from_slice(&(value.len() as u64).to_le_bytes());
        this.entries.extend_from_slice(value.as_bytes());
        this
    }

    /// Array of `n` u8 values, handy for padding the metadata section.
    pub fn u8_array(self, key: &str, n: usize) -> Self {
        let mut this = self.key(key, 9);
        this.entries.extend_from_slice(&0u32.to_le_bytes());
        this.entries.extend_from_slice(&(n as u64).to_le_bytes());
        this.entries.extend(std::iter::repeat(0xAB).take(n));
        this
    }

    /// Header plus metadata, followed by `tail` bytes of fake tensor data.
    pub fn build(self, tail: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x4655_4747u32.to_le_bytes());
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.entries);
        out.extend((0..tail).map(|i| (i % 251) as u8));
        out
    }
}

/// A llama-shaped model: 32 heads, 8 KV heads, 32 layers, 4096 hidden.
pub fn llama_like(tail: usize) -> Vec<u8> {
    Gguf::new()
        .string("general.architecture", "llama")
        .u32("general.file_type", 15)
        .u32("llama.attention.head_count", 32)
        .u32("llama.attention.head_count_kv", 8)
        .u32("llama.block_count", 32)
        .u64("llama.embedding_length", 4096)
        .build(tail)
}
