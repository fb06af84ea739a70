//! Minimal in-process HTTP server for transfer tests.
//!
//! Serves a single byte payload with optional Range support and records
//! the requests it sees. Every response closes the connection so the
//! client reconnects per request; no HTTP library needed.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Default)]
struct Stats {
    get_requests: usize,
    range_starts: Vec<u64>,
}

pub struct TestServer {
    addr: SocketAddr,
    stats: Arc<Mutex<Stats>>,
}

impl TestServer {
    /// Spawn a server thread for `payload`. The thread lives for the rest
    /// of the test process.
    pub fn start(payload: Vec<u8>, support_ranges: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Mutex::new(Stats::default()));

        let thread_stats = Arc::clone(&stats);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = handle(stream, &payload, support_ranges, &thread_stats);
            }
        });

        Self { addr, stats }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn get_request_count(&self) -> usize {
        self.stats.lock().unwrap().get_requests
    }

    pub fn range_starts(&self) -> Vec<u64> {
        self.stats.lock().unwrap().range_starts.clone()
    }

    pub fn min_range_start(&self) -> Option<u64> {
        self.stats.lock().unwrap().range_starts.iter().min().copied()
    }
}

fn handle(
    stream: TcpStream,
    payload: &[u8],
    support_ranges: bool,
    stats: &Arc<Mutex<Stats>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut range: Option<(u64, u64)> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed
            .to_lowercase()
            .strip_prefix("range:")
            .map(|v| v.trim().to_string())
        {
            range = parse_range(&value, payload.len() as u64);
        }
    }

    let method = request_line.split_whitespace().next().unwrap_or("");
    let mut writer = stream;

    if method == "HEAD" {
        let ranges_header = if support_ranges {
            "Accept-Ranges: bytes\r\n"
        } else {
            ""
        };
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n{}Connection: close\r\n\r\n",
            payload.len(),
            ranges_header
        );
        writer.write_all(head.as_bytes())?;
        return Ok(());
    }

    // GET
    stats.lock().unwrap().get_requests += 1;

    if let (true, Some((start, end))) = (support_ranges, range) {
        if start >= payload.len() as u64 {
            writer.write_all(
                b"HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )?;
            return Ok(());
        }
        stats.lock().unwrap().range_starts.push(start);
        let end = end.min(payload.len() as u64 - 1);
        let slice = &payload[start as usize..=end as usize];
        let head = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
            slice.len(),
            start,
            end,
            payload.len()
        );
        writer.write_all(head.as_bytes())?;
        writer.write_all(slice)?;
        return Ok(());
    }

    // Full-body 200, ignoring any Range when unsupported.
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    writer.write_all(head.as_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = match end.trim() {
        "" => total.saturating_sub(1),
        e => e.parse().ok()?,
    };
    Some((start, end))
}
