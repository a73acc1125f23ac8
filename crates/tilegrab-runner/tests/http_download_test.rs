//! End-to-end download over HTTP against a local stub tile server.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tilegrab_runner::{CancellationToken, DownloadJob, DownloadScheduler, JobError, JobStatus};
use tilegrab_tiles::BoundingBox;

/// Serve tiles forever; paths under `/missing/` get a 404.
fn spawn_tile_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let hits = hits_clone.clone();
            thread::spawn(move || serve(stream, &hits));
        }
    });

    (format!("http://{}", addr), hits)
}

fn serve(mut stream: TcpStream, hits: &AtomicUsize) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" => break,
            Ok(_) => {}
        }
    }
    hits.fetch_add(1, Ordering::SeqCst);

    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
    let (status, body) = if path.starts_with("/missing/") {
        ("404 Not Found", Vec::new())
    } else {
        ("200 OK", path.into_bytes())
    };
    let header = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
}

fn bbox() -> BoundingBox {
    BoundingBox::new(-1.0, -1.0, 1.0, 1.0)
}

#[test]
fn test_http_download_and_rerun() {
    let (base, hits) = spawn_tile_server();
    let dir = TempDir::new().unwrap();
    let job = DownloadJob::new(bbox(), vec![2], dir.path())
        .with_url_template(format!("{}/{{z}}/{{x}}/{{y}}.png", base))
        .with_user_agent("tilegrab-test/1.0")
        .with_timeout(Duration::from_secs(5))
        .with_max_workers(2);

    let mut scheduler = DownloadScheduler::http(job.clone(), CancellationToken::new()).unwrap();
    let report = scheduler.run(|_| {}).unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.zoom(2).unwrap().stats.downloaded, 4);
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    let body = std::fs::read(dir.path().join("2").join("1").join("2.png")).unwrap();
    assert_eq!(body, b"/2/1/2.png");

    // Second run is served entirely from disk
    let mut scheduler = DownloadScheduler::http(job, CancellationToken::new()).unwrap();
    let report = scheduler.run(|_| {}).unwrap();
    assert_eq!(report.zoom(2).unwrap().stats.skipped, 4);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[test]
fn test_http_errors_counted() {
    let (base, _hits) = spawn_tile_server();
    let dir = TempDir::new().unwrap();
    let job = DownloadJob::new(bbox(), vec![2], dir.path())
        .with_url_template(format!("{}/missing/{{z}}/{{x}}/{{y}}.png", base))
        .with_max_workers(3);

    let mut scheduler = DownloadScheduler::http(job, CancellationToken::new()).unwrap();
    let report = scheduler.run(|_| {}).unwrap();
    let stats = report.zoom(2).unwrap().stats;
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(stats.failed, 4);
    assert!(!dir.path().join("2").exists());
}

#[test]
fn test_http_bad_template_rejected() {
    let dir = TempDir::new().unwrap();
    let job = DownloadJob::new(bbox(), vec![2], dir.path()).with_url_template("http://127.0.0.1/{z}/{x}.png");
    let err = DownloadScheduler::http(job, CancellationToken::new()).err().unwrap();
    assert!(matches!(err, JobError::Tiles(_)));
}
