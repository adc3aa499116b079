//! End-to-end crawl runs
//!
//! These tests use wiremock to stand in for the batch query API and run the
//! full pipeline from dump files to the alignment tables.

use hashtag_crawler::config::{parse_config, Config};
use hashtag_crawler::crawler::{run_crawl, Coordinator};
use hashtag_crawler::model::PostId;
use hashtag_crawler::remote::{BatchFetcher, QueryApiFetcher};
use hashtag_crawler::storage::{open_storage, RunStatus, SharedStorage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/v1/public/yql";

const RESOURCES: &str = r#"{"query": {"results": {"resources": [
    {"url": "http://example.com/a",
     "content": "<html><head><title>Alpha</title></head><body>alpha page</body></html>",
     "redirect": {"from": "http://t.co/a"},
     "status": "200", "headers": {"result": {"Content-Type": "text/html"}}},
    {"url": "http://example.com/b", "content": "<html><body>beta</body></html>"}
]}}}"#;

/// Creates a test configuration with a fast scheduler
fn create_test_config(endpoint: &str, dumps: &Path, db_path: &Path, check_persisted: bool) -> Config {
    parse_config(&format!(
        r#"
[scheduler]
tick-period-ms = 10
initial-delay-ms = 0

[crawler]
chunk-size = 10
request-timeout-ms = 2000
shutdown-grace-secs = 20

[cache]
capacity = 100
check-persisted = {check_persisted}

[remote]
endpoint = '{endpoint}'

[input]
directory = '{dumps}'

[output]
database-path = '{db}'
"#,
        check_persisted = check_persisted,
        endpoint = endpoint,
        dumps = dumps.display(),
        db = db_path.display(),
    ))
    .expect("Failed to build test config")
}

fn write_dump(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n")).expect("Failed to write dump");
    path
}

fn fetcher(config: &Config) -> Arc<dyn BatchFetcher> {
    Arc::new(QueryApiFetcher::new(&config.remote, config.crawler.request_timeout()).unwrap())
}

fn alignment_pairs(storage: &SharedStorage, post: u64) -> Vec<(String, String)> {
    storage
        .lock()
        .unwrap()
        .alignments_for_post(&PostId::from(post))
        .unwrap()
        .into_iter()
        .map(|r| (r.hashtag, r.url))
        .collect()
}

#[tokio::test]
async fn test_full_pipeline_against_query_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESOURCES))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dump = write_dump(
        dir.path(),
        "tweets_w_links_n_htags_001.stream",
        &[
            r#"{"id": 1, "urls": ["http://t.co/a", "http://example.com/b"], "hashtags": ["rust"]}"#,
            r#"{"id_str": "2", "entities": {"hashtags": [{"text": "tokio"}], "urls": [{"expanded_url": "http://t.co/a"}]}}"#,
            r#"{"id": 3, "urls": ["http://t.co/a"], "hashtags": ["GameInsight"]}"#,
            r#"{"id": 4, "urls": ["http://t.co/missing"], "hashtags": ["lost"]}"#,
        ],
    );

    let config = create_test_config(
        &format!("{}{}", server.uri(), QUERY_PATH),
        dir.path(),
        &dir.path().join("crawl.db"),
        false,
    );
    let storage = open_storage(&dir.path().join("crawl.db")).unwrap();
    let coordinator =
        Coordinator::new(config.clone(), Arc::clone(&storage), fetcher(&config), "hash").unwrap();

    let summary = coordinator.run(vec![dump]).await.unwrap();

    assert!(summary.drained);
    assert_eq!(summary.producer.posts, 4);
    assert_eq!(summary.producer.spam_posts, 1);
    assert_eq!(summary.producer.candidates, 3);
    assert_eq!(summary.reconciler.alignments, 3);
    assert_eq!(summary.reconciler.dropped_candidates, 1);

    assert_eq!(
        alignment_pairs(&storage, 1),
        vec![
            ("rust".to_string(), "http://example.com/a".to_string()),
            ("rust".to_string(), "http://example.com/b".to_string()),
        ]
    );
    assert_eq!(
        alignment_pairs(&storage, 2),
        vec![("tokio".to_string(), "http://example.com/a".to_string())]
    );
    assert!(alignment_pairs(&storage, 3).is_empty());
    assert!(alignment_pairs(&storage, 4).is_empty());

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_posts().unwrap(), 4);
    assert_eq!(storage.count_webpages().unwrap(), 2);
    assert_eq!(storage.count_unresolved_alignments(Some(false)).unwrap(), 4);
    assert_eq!(storage.count_unresolved_alignments(Some(true)).unwrap(), 1);
    assert_eq!(
        storage.lookup_redirect("http://t.co/a").unwrap().as_deref(),
        Some("http://example.com/a")
    );
    assert_eq!(
        storage.get_latest_run().unwrap().unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_failing_service_drops_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dump = write_dump(
        dir.path(),
        "tweets_w_links_n_htags_001.stream",
        &[r#"{"id": 1, "urls": ["http://t.co/a"], "hashtags": ["rust"]}"#],
    );

    let config = create_test_config(
        &format!("{}{}", server.uri(), QUERY_PATH),
        dir.path(),
        &dir.path().join("crawl.db"),
        false,
    );
    let storage = open_storage(&dir.path().join("crawl.db")).unwrap();
    let coordinator =
        Coordinator::new(config.clone(), Arc::clone(&storage), fetcher(&config), "hash").unwrap();

    let summary = coordinator.run(vec![dump]).await.unwrap();

    assert!(summary.drained);
    assert_eq!(summary.reconciler.failed_batches, 2);
    assert_eq!(summary.reconciler.retried_candidates, 1);
    assert_eq!(summary.reconciler.dropped_candidates, 1);
    assert_eq!(storage.lock().unwrap().count_alignments().unwrap(), 0);
}

#[tokio::test]
async fn test_persisted_redirects_skip_the_remote_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESOURCES))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");
    {
        let storage = open_storage(&db_path).unwrap();
        storage
            .lock()
            .unwrap()
            .record_redirect("http://t.co/a", "http://example.com/a")
            .unwrap();
    }
    write_dump(
        dir.path(),
        "tweets_w_links_n_htags_002.stream",
        &[r#"{"id": 9, "urls": ["http://t.co/a"], "hashtags": ["cached"]}"#],
    );

    let config = create_test_config(
        &format!("{}{}", server.uri(), QUERY_PATH),
        dir.path(),
        &db_path,
        true,
    );
    let summary = run_crawl(config, "hash", None).await.unwrap();

    assert!(summary.drained);
    assert_eq!(summary.reconciler.alignments, 1);

    let storage = open_storage(&db_path).unwrap();
    assert_eq!(
        alignment_pairs(&storage, 9),
        vec![("cached".to_string(), "http://example.com/a".to_string())]
    );
}

#[tokio::test]
async fn test_run_crawl_with_empty_input_directory() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");
    let config = create_test_config("http://127.0.0.1:9/v1/public/yql", dir.path(), &db_path, false);

    let summary = run_crawl(config, "hash", None).await.unwrap();

    assert!(summary.drained);
    assert_eq!(summary.producer.files, 0);
    let storage = open_storage(&db_path).unwrap();
    assert_eq!(
        storage.lock().unwrap().get_latest_run().unwrap().unwrap().status,
        RunStatus::Completed
    );
}
