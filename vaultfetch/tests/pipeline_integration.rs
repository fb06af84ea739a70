//! Integration tests for the full acquisition pipeline.
//!
//! These tests drive download → classification → extraction → layout
//! normalization → verification against a local HTTP fixture, checking
//! the descriptor and manifest files an external caller would observe.
//!
//! Run with: `cargo test --test pipeline_integration`

use std::fs;
use std::io::{BufRead, BufReader, Write as IoWrite};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::thread;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use vaultfetch::config::Settings;
use vaultfetch::pipeline::{Pipeline, PipelineConfig, PipelineOutcome};

// ============================================================================
// Helper Functions
// ============================================================================

/// Serve `payload` over HTTP with Range support, forever.
fn serve(payload: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture");
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let _ = respond(stream, &payload);
        }
    });

    addr
}

fn respond(stream: TcpStream, payload: &[u8]) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut range: Option<(u64, u64)> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim().to_lowercase();
        if trimmed.is_empty() {
            break;
        }
        if let Some(spec) = trimmed.strip_prefix("range:") {
            if let Some(spec) = spec.trim().strip_prefix("bytes=") {
                if let Some((start, end)) = spec.split_once('-') {
                    let start: u64 = start.trim().parse().unwrap_or(0);
                    let end: u64 = end
                        .trim()
                        .parse()
                        .unwrap_or(payload.len() as u64 - 1);
                    range = Some((start, end));
                }
            }
        }
    }

    let method = request_line.split_whitespace().next().unwrap_or("");
    let mut writer = stream;

    if method == "HEAD" {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            payload.len()
        );
        return writer.write_all(head.as_bytes());
    }

    if let Some((start, end)) = range {
        if start >= payload.len() as u64 {
            return writer.write_all(
                b"HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
        let end = end.min(payload.len() as u64 - 1);
        let slice = &payload[start as usize..=end as usize];
        let head = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            slice.len(),
            start,
            end,
            payload.len()
        );
        writer.write_all(head.as_bytes())?;
        return writer.write_all(slice);
    }

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    writer.write_all(head.as_bytes())?;
    writer.write_all(payload)
}

/// Build a zip archive in memory.
fn zip_payload(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn pipeline_config(url: String, target: &str, download_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        url,
        target: target.to_string(),
        download_dir: download_dir.to_path_buf(),
        online: false,
        dlc: false,
        is_vr: false,
        update_flow: false,
        version: "1.0".to_string(),
        size_hint: "1 MB".to_string(),
        catalog_id: None,
        notify_theme: None,
        cookie: None,
        settings: Settings::default(),
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A zip wrapped in a release directory downloads, extracts, flattens,
/// and verifies clean.
#[test]
fn test_full_run_with_wrapper_directory() {
    let payload = zip_payload(&[
        ("My Game/game.exe", b"EXE CONTENT"),
        ("My Game/data/pak01.bin", b"PAK CONTENT"),
        ("My Game/More Games.url", b"[InternetShortcut]"),
        ("My Game/_CommonRedist/vcredist.exe", b"MZ fake"),
    ]);
    let addr = serve(payload);
    let downloads = TempDir::new().unwrap();

    let config = pipeline_config(
        format!("http://{}/release.zip", addr),
        "My Game",
        downloads.path(),
    );
    let outcome = Pipeline::new(config).unwrap().run();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let target_dir = downloads.path().join("My Game");

    // Content flattened to the target root.
    assert_eq!(fs::read(target_dir.join("game.exe")).unwrap(), b"EXE CONTENT");
    assert_eq!(
        fs::read(target_dir.join("data/pak01.bin")).unwrap(),
        b"PAK CONTENT"
    );
    assert!(!target_dir.join("My Game").exists());

    // Junk removed, archive consumed.
    assert!(!target_dir.join("More Games.url").exists());
    assert!(!target_dir.join("_CommonRedist").exists());
    assert!(!target_dir.join("My Game.zip").exists());

    // Descriptor finalized: only identity remains.
    let descriptor = read_json(&target_dir.join("My Game.descriptor.json"));
    assert!(descriptor.get("downloadingData").is_none());
    assert_eq!(descriptor["target"], "My Game");

    // Manifest matches the content files exactly.
    let manifest = read_json(&target_dir.join("filemap.My Game.json"));
    let keys: Vec<&String> = manifest.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["data/pak01.bin", "game.exe"]);
    assert_eq!(manifest["game.exe"]["size"], 11);
}

/// A zip served under a misleading .rar URL is detected and renamed
/// before extraction.
#[test]
fn test_mislabeled_archive_is_corrected() {
    let payload = zip_payload(&[("game.exe", b"EXE")]);
    let addr = serve(payload);
    let downloads = TempDir::new().unwrap();

    let config = pipeline_config(
        format!("http://{}/release.rar", addr),
        "Mislabeled",
        downloads.path(),
    );
    let outcome = Pipeline::new(config).unwrap().run();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let target_dir = downloads.path().join("Mislabeled");
    assert!(target_dir.join("game.exe").exists());
    assert!(!target_dir.join("Mislabeled.rar").exists());
    assert!(!target_dir.join("Mislabeled.zip").exists());
}

/// A flat zip with no wrapper extracts in place and verifies.
#[test]
fn test_flat_archive_run() {
    let payload = zip_payload(&[
        ("game.exe", b"E"),
        ("readme.txt", b"hello"),
    ]);
    let addr = serve(payload);
    let downloads = TempDir::new().unwrap();

    let config = pipeline_config(
        format!("http://{}/flat.zip", addr),
        "Flat Game",
        downloads.path(),
    );
    let outcome = Pipeline::new(config).unwrap().run();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let target_dir = downloads.path().join("Flat Game");
    assert!(target_dir.join("game.exe").exists());
    assert!(target_dir.join("readme.txt").exists());

    let manifest = read_json(&target_dir.join("filemap.Flat Game.json"));
    assert_eq!(manifest.as_object().unwrap().len(), 2);
}

/// An unreachable server degrades the descriptor to the error shape and
/// still returns an outcome (exit 0 at the CLI).
#[test]
fn test_failure_degrades_descriptor() {
    let downloads = TempDir::new().unwrap();

    let config = pipeline_config(
        // Nothing listens here.
        "http://127.0.0.1:9/gone.zip".to_string(),
        "Broken",
        downloads.path(),
    );
    let outcome = Pipeline::new(config).unwrap().run();
    assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

    let descriptor = read_json(&downloads.path().join("Broken/Broken.descriptor.json"));
    assert_eq!(descriptor["downloadingData"]["error"], true);
    assert!(descriptor["downloadingData"]["message"]
        .as_str()
        .unwrap()
        .contains("["));
}
