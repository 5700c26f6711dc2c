//! Integration tests for the relay loop against a mock forum.

mod support;

use std::time::Duration;

use forum_file_relay::config::Config;
use forum_file_relay::db::{
    count_delivered_files, count_failed_posts, get_bot_config, get_daily_stats, get_failed_posts,
    get_topic, get_topic_files, upsert_failed_post, NewFailedPost,
};
use forum_file_relay::dedup::DedupStore;
use forum_file_relay::relay::{date_key, local_today, CycleState, TopicOutcome};
use forum_file_relay::settings::{apply_setting, ConfigField};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{
    crawler, listing_html, point_at, scheduler, scheduler_with_config, setup_db, thread_html,
    RecordingSink,
};

const ALPHA: &str = "/forums/topic/1-alpha/";
const BETA: &str = "/forums/topic/2-beta/";

async fn mount_html(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, at: &str, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

/// One thread with two files, both downloadable.
async fn mount_two_file_site(server: &MockServer) {
    mount_html(server, "/", listing_html(&[ALPHA])).await;
    mount_html(
        server,
        ALPHA,
        thread_html(
            "Alpha Thread",
            &[
                ("/files/a.torrent", "www.site.example - Alpha 1.4GB.torrent"),
                ("/files/b.torrent", "Beta 700MB.torrent"),
            ],
        ),
    )
    .await;
    mount_file(server, "/files/a.torrent", b"alpha-bytes").await;
    mount_file(server, "/files/b.torrent", b"beta-bytes").await;
}

#[tokio::test]
async fn test_first_cycle_delivers_and_persists() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    assert_eq!(
        sink.filenames(),
        vec!["Alpha_1.4GB.torrent", "Beta_700MB.torrent"]
    );
    let first = &sink.delivered()[0];
    assert_eq!(first.content, b"alpha-bytes");
    assert!(first.caption.starts_with("Alpha 1.4GB\n\n"));
    assert!(first.caption.contains("1.4GB\n\n#1TamilMV"));
    assert!(!first.has_thumbnail);

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 2);
    assert!(notifications[0].contains("/files/a.torrent"));

    let topic_url = format!("{}{ALPHA}", server.uri());
    let topic = get_topic(db.pool(), &topic_url).await.unwrap().unwrap();
    assert_eq!(topic.title, "Alpha Thread");
    let files = get_topic_files(db.pool(), &topic_url).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| f.normalized_link == "/files/a.torrent"));

    assert!(scheduler.dedup().is_delivered("/files/b.torrent"));
    assert!(scheduler.dedup().is_seen(&topic_url));
    assert_eq!(scheduler.state(), CycleState::Idle);

    let stats = get_daily_stats(db.pool(), &date_key(local_today()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.posts_successful, 2);
    assert_eq!(stats.posts_failed, 0);
    assert_eq!(stats.total_scraped, 2);
    assert!(scheduler.pending_counters().is_empty());
}

#[tokio::test]
async fn test_unchanged_topic_is_not_redelivered() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;
    scheduler.run_cycle().await;

    assert_eq!(sink.delivered().len(), 2);
    let stats = get_daily_stats(db.pool(), &date_key(local_today()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.posts_successful, 2);
    assert_eq!(stats.total_scraped, 4);
}

#[tokio::test]
async fn test_new_file_in_seen_topic_is_delivered() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    server.reset().await;
    mount_html(&server, "/", listing_html(&[ALPHA])).await;
    mount_html(
        &server,
        ALPHA,
        thread_html(
            "Alpha Thread",
            &[
                ("/files/a.torrent", "Alpha 1.4GB.torrent"),
                ("/files/b.torrent", "Beta 700MB.torrent"),
                ("/files/c.torrent", "Gamma 2GB.torrent"),
            ],
        ),
    )
    .await;
    mount_file(&server, "/files/c.torrent", b"gamma-bytes").await;

    scheduler.run_cycle().await;

    assert_eq!(
        sink.filenames(),
        vec![
            "Alpha_1.4GB.torrent",
            "Beta_700MB.torrent",
            "Gamma_2GB.torrent"
        ]
    );
    assert_eq!(count_delivered_files(db.pool()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_rejected_delivery_is_ledgered_and_picked_up_next_cycle() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    sink.reject("Beta_700MB.torrent");
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    assert_eq!(sink.filenames(), vec!["Alpha_1.4GB.torrent"]);
    let failed = get_failed_posts(db.pool()).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].normalized_link, "/files/b.torrent");
    assert!(failed[0].error_message.contains("rejected"));
    assert_eq!(failed[0].retry_count, 0);
    assert!(!scheduler.dedup().is_delivered("/files/b.torrent"));

    sink.accept_all();
    scheduler.run_cycle().await;

    assert_eq!(
        sink.filenames(),
        vec!["Alpha_1.4GB.torrent", "Beta_700MB.torrent"]
    );
    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 0);

    let stats = get_daily_stats(db.pool(), &date_key(local_today()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.posts_successful, 2);
    assert_eq!(stats.posts_failed, 1);
}

#[tokio::test]
async fn test_download_failure_is_ledgered() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_html(&server, "/", listing_html(&[ALPHA])).await;
    mount_html(
        &server,
        ALPHA,
        thread_html("Alpha", &[("/files/gone.torrent", "Gone 1GB.torrent")]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/files/gone.torrent"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    assert!(sink.delivered().is_empty());
    let failed = get_failed_posts(db.pool()).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].size, "1GB");
    assert!(failed[0].error_message.contains("500"));
}

#[tokio::test]
async fn test_bulk_retry_converges_with_dedup() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    sink.reject("Beta_700MB.torrent");
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;
    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 1);

    // A stale entry for a file that is already delivered.
    upsert_failed_post(
        db.pool(),
        &NewFailedPost {
            link: "https://old-mirror.example/files/a.torrent".to_string(),
            normalized_link: "/files/a.torrent".to_string(),
            topic_url: format!("{}{ALPHA}", server.uri()),
            raw_title: "Alpha 1.4GB.torrent".to_string(),
            size: "1.4GB".to_string(),
            error_message: "timeout".to_string(),
        },
    )
    .await
    .unwrap();

    sink.accept_all();
    let report = scheduler.retry_failed().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.already_delivered, 1);

    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 0);
    assert!(scheduler.dedup().is_delivered("/files/b.torrent"));

    scheduler.run_cycle().await;
    assert_eq!(sink.delivered().len(), 2);
    assert_eq!(count_delivered_files(db.pool()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_failed_retry_increments_retry_count() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    sink.reject("Beta_700MB.torrent");
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    let report = scheduler.retry_failed().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.failed, 1);

    let failed = get_failed_posts(db.pool()).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 1);
}

#[tokio::test]
async fn test_history_survives_restart() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut first, _handle) = scheduler(&db, sink.clone()).await;
    first.run_cycle().await;
    drop(first);

    let (mut second, _handle) = scheduler(&db, sink.clone()).await;
    assert_eq!(second.dedup().delivered_count(), 2);
    second.run_cycle().await;

    assert_eq!(sink.delivered().len(), 2);
}

#[tokio::test]
async fn test_topic_limit_caps_threads() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_html(&server, "/", listing_html(&[ALPHA, BETA])).await;
    mount_html(
        &server,
        ALPHA,
        thread_html("Alpha", &[("/files/a.torrent", "Alpha 1GB.torrent")]),
    )
    .await;
    mount_html(
        &server,
        BETA,
        thread_html("Beta", &[("/files/b.torrent", "Beta 1GB.torrent")]),
    )
    .await;
    mount_file(&server, "/files/a.torrent", b"a").await;
    mount_file(&server, "/files/b.torrent", b"b").await;
    point_at(&db, &server.uri()).await;
    apply_setting(&db, ConfigField::TopicLimit, "1", None)
        .await
        .unwrap();

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;
    assert_eq!(sink.filenames(), vec!["Alpha_1GB.torrent"]);

    apply_setting(&db, ConfigField::TopicLimit, "0", None)
        .await
        .unwrap();
    scheduler.run_cycle().await;
    assert_eq!(
        sink.filenames(),
        vec!["Alpha_1GB.torrent", "Beta_1GB.torrent"]
    );
}

#[tokio::test]
async fn test_thumbnail_attached_when_configured() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    Mock::given(method("GET"))
        .and(path("/thumb.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    point_at(&db, &server.uri()).await;
    apply_setting(
        &db,
        ConfigField::ThumbnailUrl,
        &format!("{}/thumb.jpg", server.uri()),
        None,
    )
    .await
    .unwrap();

    let sink = RecordingSink::new();
    sink.reject("Beta_700MB.torrent");
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    // The second cycle re-attempts the rejected file with the cached thumbnail.
    sink.accept_all();
    scheduler.run_cycle().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|d| d.has_thumbnail));
}

#[tokio::test]
async fn test_unreachable_listing_is_an_empty_cycle() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    assert!(sink.delivered().is_empty());
    assert!(get_daily_stats(db.pool(), &date_key(local_today()))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_commands_run_between_cycles() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_html(&server, "/", listing_html(&[])).await;
    point_at(&db, &server.uri()).await;

    for n in 0..2 {
        upsert_failed_post(
            db.pool(),
            &NewFailedPost {
                link: format!("https://www.site.example/files/{n}.torrent"),
                normalized_link: format!("/files/{n}.torrent"),
                topic_url: "https://www.site.example/forums/topic/9-x/".to_string(),
                raw_title: format!("File {n}.torrent"),
                size: "1GB".to_string(),
                error_message: "timeout".to_string(),
            },
        )
        .await
        .unwrap();
    }

    let sink = RecordingSink::new();
    let (scheduler, handle) = scheduler(&db, sink).await;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    let removed = handle
        .remove_failed("https://www.site.example/files/0.torrent")
        .await
        .unwrap();
    assert!(removed);
    assert!(!handle.remove_failed("https://nope.example/x").await.unwrap());
    assert_eq!(handle.clear_failed().await.unwrap(), 1);
    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 0);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert!(handle.clear_failed().await.is_err());
}

#[tokio::test]
async fn test_seen_topic_without_new_files_writes_nothing() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;

    let topic_url = format!("{}{ALPHA}", server.uri());
    let before = get_topic(db.pool(), &topic_url).await.unwrap().unwrap();
    // Timestamps have second precision.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let config = get_bot_config(db.pool()).await.unwrap();
    let topic = crawler(&Config::for_testing())
        .crawl(&server.uri(), None)
        .await
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(
        scheduler.process_topic(&config, &topic).await,
        TopicOutcome::Skipped
    );
    scheduler.run_cycle().await;

    let after = get_topic(db.pool(), &topic_url).await.unwrap().unwrap();
    assert_eq!(after.last_updated, before.last_updated);
    assert_eq!(count_delivered_files(db.pool()).await.unwrap(), 2);
    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 0);
    assert_eq!(sink.delivered().len(), 2);
}

#[tokio::test]
async fn test_shutdown_during_link_forward_keeps_delivery() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_two_file_site(&server).await;
    point_at(&db, &server.uri()).await;

    let sink = RecordingSink::new();
    sink.slow_notify(Duration::from_secs(30));
    let (scheduler, _handle) = scheduler(&db, sink.clone()).await;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.delivered().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("nothing was delivered");
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("relay loop did not stop")
        .unwrap();

    // The accepted file is recorded; the next one is never started.
    assert_eq!(sink.filenames(), vec!["Alpha_1.4GB.torrent"]);
    assert_eq!(count_delivered_files(db.pool()).await.unwrap(), 1);
    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 0);

    let dedup = DedupStore::rehydrate(&db).await.unwrap();
    assert!(dedup.is_delivered("/files/a.torrent"));
    assert!(!dedup.is_delivered("/files/b.torrent"));

    let stats = get_daily_stats(db.pool(), &date_key(local_today()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.posts_successful, 1);
}

#[tokio::test]
async fn test_mirror_change_does_not_redeliver() {
    let (db, _temp) = setup_db().await;
    let original = MockServer::start().await;
    mount_two_file_site(&original).await;
    point_at(&db, &original.uri()).await;

    let sink = RecordingSink::new();
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    scheduler.run_cycle().await;
    assert_eq!(sink.delivered().len(), 2);

    let mirror = MockServer::start().await;
    mount_two_file_site(&mirror).await;
    point_at(&db, &mirror.uri()).await;
    scheduler.run_cycle().await;

    assert_eq!(sink.delivered().len(), 2);
    assert_eq!(count_delivered_files(db.pool()).await.unwrap(), 2);
    assert_eq!(count_failed_posts(db.pool()).await.unwrap(), 0);
    assert!(scheduler
        .dedup()
        .is_seen(&format!("{}{ALPHA}", mirror.uri())));
}

#[tokio::test]
async fn test_retry_counters_flushed_on_shutdown() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_html(&server, "/", listing_html(&[])).await;
    mount_file(&server, "/files/r.torrent", b"retry-bytes").await;
    point_at(&db, &server.uri()).await;
    upsert_failed_post(
        db.pool(),
        &NewFailedPost {
            link: format!("{}/files/r.torrent", server.uri()),
            normalized_link: "/files/r.torrent".to_string(),
            topic_url: format!("{}{ALPHA}", server.uri()),
            raw_title: "Retry 1GB.torrent".to_string(),
            size: "1GB".to_string(),
            error_message: "timeout".to_string(),
        },
    )
    .await
    .unwrap();

    // No second cycle runs before shutdown, so only the shutdown path can flush.
    let config = Config {
        poll_interval: Duration::from_secs(3600),
        ..Config::for_testing()
    };
    let sink = RecordingSink::new();
    let (scheduler, handle) = scheduler_with_config(&db, sink.clone(), &config).await;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    let report = handle.retry_failed().await.unwrap();
    assert_eq!(report.succeeded, 1);
    let today = date_key(local_today());
    assert!(get_daily_stats(db.pool(), &today).await.unwrap().is_none());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("relay loop did not stop")
        .unwrap();

    let stats = get_daily_stats(db.pool(), &today).await.unwrap().unwrap();
    assert_eq!(stats.posts_successful, 1);
    assert_eq!(sink.filenames(), vec!["Retry_1GB.torrent"]);
}

#[tokio::test]
async fn test_bulk_retry_continues_past_store_errors() {
    let (db, _temp) = setup_db().await;
    let server = MockServer::start().await;
    mount_file(&server, "/files/good.torrent", b"good").await;
    mount_file(&server, "/files/bad.torrent", b"bad").await;
    point_at(&db, &server.uri()).await;
    for name in ["good", "bad"] {
        upsert_failed_post(
            db.pool(),
            &NewFailedPost {
                link: format!("{}/files/{name}.torrent", server.uri()),
                normalized_link: format!("/files/{name}.torrent"),
                topic_url: format!("{}{ALPHA}", server.uri()),
                raw_title: format!("{name} 1GB.torrent"),
                size: "1GB".to_string(),
                error_message: "timeout".to_string(),
            },
        )
        .await
        .unwrap();
    }
    sqlx::query(
        "CREATE TRIGGER block_retry_updates BEFORE UPDATE ON failed_posts \
         BEGIN SELECT RAISE(ABORT, 'read only'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let sink = RecordingSink::new();
    sink.reject("bad_1GB.torrent");
    let (mut scheduler, _handle) = scheduler(&db, sink.clone()).await;
    let report = scheduler.retry_failed().await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(sink.filenames(), vec!["good_1GB.torrent"]);

    let failed = get_failed_posts(db.pool()).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 0);
}
