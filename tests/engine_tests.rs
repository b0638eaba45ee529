//! End-to-end engine scenarios: index, search, delete, re-index, jobs

mod test_helpers;

use local_search::{ChunkingConfig, JobStatus, SearchOptions, WatchEvent};
use test_helpers::{index_file, test_engine, test_engine_with_chunking, write_watched_file};

#[tokio::test]
async fn test_round_trip_index_and_search() {
    let (engine, _tmp) = test_engine_with_chunking(ChunkingConfig {
        chunk_size: 100,
        overlap: 20,
        ..Default::default()
    });

    let content = "alpha bravo charlie ".repeat(500);
    let path = write_watched_file(&engine, "phonetic.txt", &content);
    index_file(&engine, &path).await;

    let stats = engine.vectors().statistics().await.unwrap();
    assert_eq!(stats.total_files, 1);
    assert!(stats.total_chunks >= 100, "got {} chunks", stats.total_chunks);

    let options = SearchOptions {
        min_score: 0.1,
        ..Default::default()
    };
    let response = engine
        .search_service()
        .search("bravo", &options)
        .await;
    assert!(!response.results.is_empty());
    assert!(response.results[0].score > 0.3);
    assert_eq!(response.results[0].file_path, path.display().to_string());
}

#[tokio::test]
async fn test_delete_removes_file_from_results() {
    let (engine, _tmp) = test_engine();

    let path_a = write_watched_file(&engine, "a.txt", &"solar panels and batteries. ".repeat(40));
    let path_b = write_watched_file(&engine, "b.txt", &"medieval castle architecture. ".repeat(40));
    index_file(&engine, &path_a).await;
    index_file(&engine, &path_b).await;

    let response = engine
        .tools()
        .remove_file(&path_a.display().to_string())
        .await
        .unwrap();
    assert!(response.payload["removedChunks"].as_u64().unwrap() > 0);

    let stats = engine.vectors().statistics().await.unwrap();
    assert_eq!(stats.total_files, 1);

    let options = SearchOptions {
        min_score: 0.0,
        ..Default::default()
    };
    let results = engine
        .search_service()
        .search("solar panels batteries", &options)
        .await;
    let a_path = path_a.display().to_string();
    assert!(results.results.iter().all(|r| r.file_path != a_path));
}

#[tokio::test]
async fn test_reindex_replaces_previous_chunks() {
    let (engine, _tmp) = test_engine_with_chunking(ChunkingConfig {
        chunk_size: 80,
        overlap: 10,
        ..Default::default()
    });

    let path = write_watched_file(&engine, "notes.txt", &"first version words here. ".repeat(10));
    index_file(&engine, &path).await;
    let before = engine
        .vectors()
        .get_file_chunks(&path.display().to_string())
        .await
        .unwrap();
    assert!(!before.is_empty());

    // Re-index a longer second version through the watch-change path
    std::fs::write(&path, "second version sentences instead. ".repeat(30)).unwrap();
    let response = engine
        .tools()
        .handle_watch_event(&path, WatchEvent::Change);
    let job_id = response.payload["jobId"].as_str().unwrap().to_string();
    wait_for_terminal(&engine, &job_id).await;

    let after = engine
        .vectors()
        .get_file_chunks(&path.display().to_string())
        .await
        .unwrap();
    assert!(after.len() > before.len());
    for (i, chunk) in after.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert!(chunk.content.contains("second"), "stale chunk survived");
    }
}

#[tokio::test]
async fn test_watch_unlink_deletes() {
    let (engine, _tmp) = test_engine();
    let path = write_watched_file(&engine, "gone.txt", &"temporary content words. ".repeat(20));
    index_file(&engine, &path).await;

    let response = engine.tools().handle_watch_event(&path, WatchEvent::Unlink);
    let job_id = response.payload["jobId"].as_str().unwrap().to_string();
    let job = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let stats = engine.vectors().statistics().await.unwrap();
    assert_eq!(stats.total_files, 0);
}

#[tokio::test]
async fn test_fetch_file_job_lifecycle() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    let body = "the quick brown fox jumps over the lazy dog. ".repeat(23); // ~1 KB
    Mock::given(method("GET"))
        .and(path("/sample.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let (engine, _tmp) = test_engine();
    let response = engine
        .tools()
        .fetch_file(&format!("{}/sample.txt", server.uri()), "sample.txt", None)
        .unwrap();
    let job_id = response.payload["jobId"].as_str().unwrap().to_string();

    let job = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    assert_eq!(job.progress, 100.0);
    assert!(engine.paths().fetched_dir().join("sample.txt").exists());

    let stats = engine.vectors().statistics().await.unwrap();
    assert_eq!(stats.total_files, 1);

    // Fresh terminal jobs survive the 24h policy; aged-out ones are evicted
    assert_eq!(engine.jobs().cleanup(chrono::Duration::hours(24)), 0);
    assert_eq!(engine.jobs().cleanup(chrono::Duration::zero()), 1);
    assert!(engine.jobs().get(&job_id).is_none());
}

#[tokio::test]
async fn test_fetch_file_respects_size_cap() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(3 * 1024 * 1024)))
        .mount(&server)
        .await;

    let (engine, _tmp) = test_engine();
    let options = local_search::FileFetchOptions {
        max_file_size_mb: Some(1),
        ..Default::default()
    };
    let response = engine
        .tools()
        .fetch_file(&format!("{}/big.txt", server.uri()), "big.txt", Some(options))
        .unwrap();
    let job_id = response.payload["jobId"].as_str().unwrap().to_string();

    let job = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("input"));
    assert!(!engine.paths().fetched_dir().join("big.txt").exists());
}

#[tokio::test]
async fn test_flush_all_clears_everything() {
    let (engine, _tmp) = test_engine();
    let path = write_watched_file(&engine, "doomed.txt", &"content to be flushed. ".repeat(20));
    index_file(&engine, &path).await;
    std::fs::write(engine.paths().fetched_dir().join("left.bin"), b"x").unwrap();

    let response = engine.tools().flush_all().await.unwrap();
    assert!(response.summary.contains("Flushed"));

    let stats = engine.vectors().statistics().await.unwrap();
    assert_eq!(stats.total_files, 0);
    assert!(engine.paths().fetched_dir().exists());
    assert!(!engine.paths().fetched_dir().join("left.bin").exists());
}

#[tokio::test]
async fn test_get_file_details_window() {
    let (engine, _tmp) = test_engine_with_chunking(ChunkingConfig {
        chunk_size: 60,
        overlap: 10,
        ..Default::default()
    });
    let path = write_watched_file(&engine, "long.txt", &"many words in this file. ".repeat(60));
    index_file(&engine, &path).await;

    let all = engine
        .tools()
        .get_file_details(&path.display().to_string(), None, None)
        .await;
    let total = all.payload["chunks"].as_array().unwrap().len();
    assert!(total > 8);

    let windowed = engine
        .tools()
        .get_file_details(&path.display().to_string(), Some(4), Some(2))
        .await;
    let window = windowed.payload["chunks"].as_array().unwrap();
    assert_eq!(window.len(), 5);
    assert_eq!(window[0]["chunk_index"].as_u64().unwrap(), 2);
}

#[tokio::test]
async fn test_statistics_tool() {
    let (engine, _tmp) = test_engine();
    let path = write_watched_file(&engine, "counted.txt", &"counting tokens here. ".repeat(30));
    index_file(&engine, &path).await;

    let response = engine.tools().get_statistics().await.unwrap();
    assert_eq!(response.payload["total_files"].as_u64().unwrap(), 1);
    assert!(response.payload["total_tokens"].as_u64().unwrap() > 0);
}

async fn wait_for_terminal(engine: &local_search::SearchEngine, job_id: &str) -> local_search::Job {
    for _ in 0..200 {
        if let Some(job) = engine.jobs().get(job_id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}
