use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hf_fast::download::{
    DownloadCoordinator, DownloadTask, FileDownloader, FileEvent, FileRecord, FileSelector,
    ProgressReporter, RepoKind, RepoRef, ResultTally, aggregate_size, fetch_metadata,
};
use hf_fast::network::Transport;
use hf_fast::{Config, FetchError, StopSignal};
use reqwest::Method;
use reqwest::header::HeaderMap;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> Config {
    Config {
        endpoint: server.uri(),
        chunk_size: 64 * 1024,
        ..Config::default()
    }
}

fn record(server: &MockServer, name: &str, size: u64) -> FileRecord {
    FileRecord {
        repo_path: name.to_string(),
        remote_size: size,
        checksum: None,
        source_url: format!("{}/{name}", server.uri()),
    }
}

/// 在阻塞线程里跑一次完整调度，返回汇总与事件序列。
async fn run_all(
    config: Config,
    records: Vec<FileRecord>,
    output_dir: &Path,
    limit: usize,
    stop: StopSignal,
) -> (ResultTally, Vec<FileEvent>) {
    let output_dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let progress = ProgressReporter::hidden().with_callback(Arc::new(move |e: &FileEvent| {
            sink.lock().unwrap().push(e.clone());
        }));
        let transport = Transport::new(&config, stop.clone()).unwrap();
        let coordinator = DownloadCoordinator::new(&transport, &config, progress);
        let tally = coordinator.download_all(&records, &output_dir, None, limit, &stop);
        let events = events.lock().unwrap().clone();
        (tally, events)
    })
    .await
    .unwrap()
}

/// 单文件下载（不经过调度），只返回成败。
async fn download_one(
    config: Config,
    record: FileRecord,
    output_dir: &Path,
    stop: StopSignal,
) -> Result<(), FetchError> {
    let output_dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let transport = Transport::new(&config, stop.clone()).unwrap();
        let downloader = FileDownloader::new(&transport, &config, None);
        let task = DownloadTask::new(record, &output_dir);
        downloader
            .download(&task, &stop, &ProgressReporter::hidden())
            .map(|_| ())
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn downloads_fresh_file_of_known_size() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/a.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let records = vec![record(&server, "a.bin", body.len() as u64)];
    let (tally, events) =
        run_all(test_config(&server), records, dir.path(), 4, StopSignal::new()).await;

    assert_eq!(tally.total, 1);
    assert_eq!(tally.completed, 1);
    assert!(tally.failed.is_empty());
    assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), body);
    assert_eq!(
        events,
        vec![
            FileEvent::Started {
                path: "a.bin".to_string()
            },
            FileEvent::Finished {
                path: "a.bin".to_string(),
                ok: true
            },
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn resumes_partial_file_with_range_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sub/b.bin"))
        .and(header("range", "bytes=5-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 5-9/10")
                .set_body_bytes(b"56789".to_vec()),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sub/b.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("b.bin"), b"01234").unwrap();

    let records = vec![record(&server, "sub/b.bin", 10)];
    let (tally, _) =
        run_all(test_config(&server), records, dir.path(), 2, StopSignal::new()).await;

    assert!(tally.all_succeeded());
    assert_eq!(
        std::fs::read(dir.path().join("sub").join("b.bin")).unwrap(),
        b"0123456789"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn range_not_satisfiable_with_matching_size_counts_as_complete() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/c.bin"))
        .and(header("range", "bytes=10-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */10"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/c.bin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"XXXXXXXXXX".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("c.bin"), b"0123456789").unwrap();

    // 远程大小未知，调度阶段不会跳过，必须由 416 分支判定完整。
    let records = vec![record(&server, "c.bin", 0)];
    let (tally, _) =
        run_all(test_config(&server), records, dir.path(), 1, StopSignal::new()).await;

    assert_eq!(tally.completed, 1);
    assert!(tally.failed.is_empty());
    assert_eq!(std::fs::read(dir.path().join("c.bin")).unwrap(), b"0123456789");
}

#[tokio::test(flavor = "multi_thread")]
async fn range_not_satisfiable_with_oversized_local_file_restarts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/d.bin"))
        .and(header("range", "bytes=15-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */10"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/d.bin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/d.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abcdefghij".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("d.bin"), b"stale-content!!").unwrap();

    let records = vec![record(&server, "d.bin", 10)];
    let (tally, _) =
        run_all(test_config(&server), records, dir.path(), 1, StopSignal::new()).await;

    assert!(tally.all_succeeded());
    assert_eq!(std::fs::read(dir.path().join("d.bin")).unwrap(), b"abcdefghij");
}

#[tokio::test(flavor = "multi_thread")]
async fn ignored_range_rewrites_file_from_start() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/e.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("e.bin"), b"0123").unwrap();

    let records = vec![record(&server, "e.bin", 10)];
    let (tally, _) =
        run_all(test_config(&server), records, dir.path(), 1, StopSignal::new()).await;

    assert!(tally.all_succeeded());
    assert_eq!(std::fs::read(dir.path().join("e.bin")).unwrap(), b"0123456789");
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_files_are_skipped_without_requests() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unused".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("x.bin"), b"12345").unwrap();
    std::fs::write(dir.path().join("y.bin"), b"123").unwrap();

    let records = vec![record(&server, "x.bin", 5), record(&server, "y.bin", 3)];
    let (tally, events) =
        run_all(test_config(&server), records, dir.path(), 4, StopSignal::new()).await;

    assert_eq!(tally.total, 2);
    assert_eq!(tally.completed, 2);
    assert!(tally.failed.is_empty());
    assert!(
        events
            .iter()
            .all(|e| matches!(e, FileEvent::Skipped { .. }))
    );
    assert_eq!(events.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_size_files_are_always_attempted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/notes.txt"))
        .and(header("range", "bytes=5-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 5-10/11")
                .set_body_bytes(b" world".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let records = vec![record(&server, "notes.txt", 0)];
    let (tally, events) =
        run_all(test_config(&server), records, dir.path(), 1, StopSignal::new()).await;

    assert!(tally.all_succeeded());
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, FileEvent::Skipped { .. }))
    );
    assert_eq!(
        std::fs::read(dir.path().join("notes.txt")).unwrap(),
        b"hello world"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_before_scheduling_issues_no_requests() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let stop = StopSignal::new();
    stop.stop();

    let records = vec![record(&server, "a.bin", 4), record(&server, "b.bin", 4)];
    let (tally, events) = run_all(test_config(&server), records, dir.path(), 2, stop).await;

    assert_eq!(tally.total, 2);
    assert_eq!(tally.completed, 0);
    assert!(!tally.all_succeeded());
    assert!(events.is_empty());
    assert!(!dir.path().join("a.bin").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_never_exceeds_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![7u8; 64])
                .set_delay(Duration::from_millis(200)),
        )
        .expect(6)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let records: Vec<FileRecord> = (0..6)
        .map(|i| record(&server, &format!("f{i}.bin"), 64))
        .collect();
    let config = test_config(&server);

    let output_dir = dir.path().to_path_buf();
    let (tally, peak) = tokio::task::spawn_blocking(move || {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let progress = ProgressReporter::hidden().with_callback(Arc::new(move |e: &FileEvent| {
            match e {
                FileEvent::Started { .. } => {
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                }
                FileEvent::Finished { .. } => {
                    a.fetch_sub(1, Ordering::SeqCst);
                }
                FileEvent::Skipped { .. } => {}
            }
        }));
        let stop = StopSignal::new();
        let transport = Transport::new(&config, stop.clone()).unwrap();
        let coordinator = DownloadCoordinator::new(&transport, &config, progress);
        let tally = coordinator.download_all(&records, &output_dir, None, 2, &stop);
        (tally, peak.load(Ordering::SeqCst))
    })
    .await
    .unwrap();

    assert_eq!(tally.completed, 6);
    assert!(peak <= 2, "peak concurrency {peak}");
    assert!(peak >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_file_is_reported_without_stopping_others() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fine".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let records = vec![record(&server, "missing.bin", 10), record(&server, "ok.bin", 4)];
    let (tally, events) =
        run_all(test_config(&server), records, dir.path(), 2, StopSignal::new()).await;

    assert_eq!(tally.completed, 1);
    assert_eq!(tally.failed, vec!["missing.bin".to_string()]);
    assert!(events.contains(&FileEvent::Finished {
        path: "missing.bin".to_string(),
        ok: false
    }));
    assert_eq!(std::fs::read(dir.path().join("ok.bin")).unwrap(), b"fine");
}

#[tokio::test(flavor = "multi_thread")]
async fn response_length_defines_expected_size() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/short.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"1234".to_vec()))
        .mount(&server)
        .await;

    // 最终长度以响应头为准，而不是元数据里的大小。
    let dir = TempDir::new().unwrap();
    let result = download_one(
        test_config(&server),
        record(&server, "short.bin", 8),
        dir.path(),
        StopSignal::new(),
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(std::fs::read(dir.path().join("short.bin")).unwrap(), b"1234");
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_during_stream_keeps_partial_and_resumes() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..32 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
    let total = body.len() as u64;

    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("big.bin");
    let mut config = test_config(&server);
    config.chunk_size = 1024;

    // 目标文件一出现数据就置位停止信号。
    let stop = StopSignal::new();
    let setter = stop.clone();
    let watched = target.clone();
    let watcher = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(30);
        while Instant::now() < deadline {
            if std::fs::metadata(&watched).map(|m| m.len()).unwrap_or(0) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        setter.stop();
    });

    let first = download_one(
        config.clone(),
        record(&server, "big.bin", total),
        dir.path(),
        stop,
    )
    .await;
    watcher.join().unwrap();

    assert!(matches!(first, Err(FetchError::Cancelled)), "{first:?}");
    let partial = std::fs::metadata(&target).unwrap().len();
    assert!(partial > 0 && partial < total, "partial {partial} of {total}");

    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .and(header("range", format!("bytes={partial}-").as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes {partial}-{}/{total}", total - 1).as_str(),
                )
                .set_body_bytes(body[partial as usize..].to_vec()),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let (tally, _) = run_all(
        config,
        vec![record(&server, "big.bin", total)],
        dir.path(),
        1,
        StopSignal::new(),
    )
    .await;

    assert!(tally.all_succeeded());
    let written = std::fs::read(&target).unwrap();
    assert_eq!(written.len() as u64, total);
    assert!(written == body);
}

#[tokio::test(flavor = "multi_thread")]
async fn short_body_against_declared_total_is_discarded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trunc.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-range", "bytes 0-3/10")
                .set_body_bytes(b"1234".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = download_one(
        test_config(&server),
        record(&server, "trunc.bin", 10),
        dir.path(),
        StopSignal::new(),
    )
    .await;

    assert!(
        matches!(
            result,
            Err(FetchError::SizeMismatch {
                expected: 10,
                actual: 4,
                ..
            })
        ),
        "{result:?}"
    );
    assert!(!dir.path().join("trunc.bin").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn follows_redirects_and_rewrites_lfs_hosts() {
    let server = MockServer::start().await;
    let port = server.address().port();

    Mock::given(method("GET"))
        .and(path("/org/demo/resolve/main/model.bin"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("http://localhost:{port}/blobs/abc").as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/resolve/blobs/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.lfs_host_patterns = vec!["localhost".to_string()];
    let url = format!("{}/org/demo/resolve/main/model.bin", server.uri());

    let body = tokio::task::spawn_blocking(move || {
        let transport = Transport::new(&config, StopSignal::new()).unwrap();
        transport.fetch_bytes(&url, &HeaderMap::new())
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(body, b"weights");
}

#[tokio::test(flavor = "multi_thread")]
async fn redirect_loop_is_bounded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .expect(6)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let url = format!("{}/loop", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let transport = Transport::new(&config, StopSignal::new()).unwrap();
        transport.request(Method::GET, &url, &HeaderMap::new()).map(|_| ())
    })
    .await
    .unwrap();

    assert!(matches!(
        result,
        Err(FetchError::TooManyRedirects { limit: 5, .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_is_fetched_and_filtered() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "id": "org/demo",
        "sha": "abc123",
        "siblings": [
            { "rfilename": "config.json", "size": 120 },
            { "rfilename": "model.bin", "size": 2048, "lfs": { "sha256": "ff00", "size": 2048 } },
            { "rfilename": "README.md" },
            { "size": 5 }
        ]
    });
    Mock::given(method("GET"))
        .and(path("/api/models/org/demo/revision/main"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (metadata, records) = tokio::task::spawn_blocking(move || {
        let transport = Transport::new(&config, StopSignal::new()).unwrap();
        let repo = RepoRef::new("org/demo", "main", RepoKind::Model);
        let metadata =
            fetch_metadata(&transport, config.endpoint_base(), &repo, Some("secret")).unwrap();
        let selector = FileSelector::new(&[r"\.(bin|json)$"], &[r"^config"]).unwrap();
        let records = selector.select(&metadata, &repo, config.endpoint_base());
        (metadata, records)
    })
    .await
    .unwrap();

    assert_eq!(metadata.siblings.len(), 4);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repo_path, "model.bin");
    assert_eq!(records[0].remote_size, 2048);
    assert_eq!(records[0].checksum.as_deref(), Some("ff00"));
    assert_eq!(
        records[0].source_url,
        format!("{}/models/org/demo/resolve/main/model.bin", server.uri())
    );
    assert_eq!(aggregate_size(&metadata, &records), 2048);
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_status_error_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let result = tokio::task::spawn_blocking(move || {
        let transport = Transport::new(&config, StopSignal::new()).unwrap();
        let repo = RepoRef::new("org/private", "main", RepoKind::Dataset);
        fetch_metadata(&transport, config.endpoint_base(), &repo, None).map(|_| ())
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(FetchError::Status { status, .. }) if status.as_u16() == 401));
}
