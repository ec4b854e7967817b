use super::*;
use crate::factories::*;
use crate::writer::Writer;

const EPISODE_URL: &str = "http://example.com/episode-0.mp3";

fn episode() -> bytes::Bytes {
    (0..200_000)
        .map(|i| (i % 241) as u8)
        .collect::<Vec<u8>>()
        .into()
}

fn builder(file: bool, connect_timeout_ms: u32) -> Arc<Builder> {
    let mut builder = crate::default_test_builder();
    if file {
        builder.log_store = FileLogStoreFactory::create();
    }
    builder
        .config
        .set_module_config(
            AGGREGATOR_MOD_NAME.into(),
            &AggregatorConfig {
                connect_timeout_ms,
                update_timeout_ms: 2_000,
                retry_interval_ms: 10,
                ..Default::default()
            },
        )
        .unwrap();
    builder.build()
}

struct Feed {
    writer: Writer,
    source: Arc<MemFeedSource>,
}

/// A writer publishing `n` items, the oldest with an enclosure.
async fn feed(
    builder: &Arc<Builder>,
    dir: std::path::PathBuf,
    title: &str,
    n: usize,
) -> Feed {
    let fetcher = MemBlobFetcher::create();
    fetcher.insert(EPISODE_URL, episode());
    let source = MemFeedSource::create(with_enclosure(
        hrss_test_utils::sample_feed(title, n),
    ));
    let writer =
        Writer::create(builder.clone(), dir, source.clone(), fetcher)
            .await
            .unwrap();
    writer.update_feed().await.unwrap();
    Feed { writer, source }
}

fn with_enclosure(mut parsed: ParsedFeed) -> ParsedFeed {
    if let Some(oldest) = parsed.items.last_mut() {
        oldest.enclosure = Some(Enclosure {
            url: EPISODE_URL.into(),
            mime_type: Some("audio/mpeg".into()),
            length: None,
        });
    }
    parsed
}

fn dk(feed: &Feed) -> DiscoveryKey {
    feed.writer.discovery_key().clone()
}

#[tokio::test(flavor = "multi_thread")]
async fn reader_serves_the_writer_feed() {
    hrss_test_utils::enable_tracing();
    let builder = builder(false, 5_000);
    let f = feed(&builder, Default::default(), "Show", 3).await;
    let agg = Aggregator::create(builder.clone(), Default::default()).unwrap();

    agg.add_reader(dk(&f)).await.unwrap();
    assert_eq!(
        vec![(dk(&f), ReaderState::Ready)],
        agg.list_readers().await.unwrap()
    );

    let items = agg
        .get_reader_feed(dk(&f), FeedOpts::default())
        .await
        .unwrap();
    let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(vec!["guid-2", "guid-1", "guid-0"], keys);
    assert_eq!(
        serde_json::json!("Show episode 2"),
        items[0].value["title"]
    );

    let limited = agg
        .get_reader_feed(dk(&f), FeedOpts { limit: Some(1) })
        .await
        .unwrap();
    assert_eq!(1, limited.len());

    let meta = agg.get_reader_metadata(dk(&f)).await.unwrap();
    assert_eq!(Some(serde_json::json!("Show")), meta.title);

    // the enclosure was rewritten to its blob key
    let blob_key = items[2].value["enclosure"]["url"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(blob_key.ends_with(".mp3"), "{blob_key}");

    let content = episode();
    assert_eq!(
        content,
        agg.get_reader_blob(dk(&f), blob_key.clone()).await.unwrap()
    );
    let id = agg
        .get_reader_blob_id(dk(&f), blob_key.clone())
        .await
        .unwrap();
    assert_eq!(content.len() as u64, id.byte_length);
    let part = agg
        .get_reader_blob_range(
            dk(&f),
            id,
            ByteRange {
                start: 70_000,
                end: 70_010,
            },
        )
        .await
        .unwrap();
    assert_eq!(content.slice(70_000..70_010), part);

    let err = agg
        .get_reader_blob(dk(&f), "nope.mp3".into())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    agg.close().await.unwrap();
    assert!(agg.list_readers().await.unwrap().is_empty());
    f.writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn update_reader_pulls_new_items() {
    let builder = builder(false, 5_000);
    let f = feed(&builder, Default::default(), "Show", 1).await;
    let agg = Aggregator::create(builder.clone(), Default::default()).unwrap();
    agg.add_reader(dk(&f)).await.unwrap();

    f.source.set(with_enclosure(hrss_test_utils::sample_feed("Show 2", 3)));
    f.writer.update_feed().await.unwrap();

    // not visible until the reader updates
    assert_eq!(
        1,
        agg.get_reader_feed(dk(&f), FeedOpts::default())
            .await
            .unwrap()
            .len()
    );
    agg.update_reader(dk(&f), UpdateReaderOpts { wait: true })
        .await
        .unwrap();
    let items = agg
        .get_reader_feed(dk(&f), FeedOpts::default())
        .await
        .unwrap();
    assert_eq!(3, items.len());
    assert_eq!(2, items[0].order_index);
    assert_eq!(
        Some(serde_json::json!("Show 2")),
        agg.get_reader_metadata(dk(&f)).await.unwrap().title
    );

    agg.close().await.unwrap();
    f.writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_readers_are_not_found() {
    let builder = builder(false, 5_000);
    let agg = Aggregator::create(builder, Default::default()).unwrap();
    let key = DiscoveryKey::from(bytes::Bytes::from_static(&[9; 32]));

    for err in [
        agg.get_reader_feed(key.clone(), FeedOpts::default())
            .await
            .unwrap_err(),
        agg.get_reader_metadata(key.clone()).await.unwrap_err(),
        agg.get_reader_blob(key.clone(), "x".into())
            .await
            .unwrap_err(),
        agg.update_reader(key.clone(), UpdateReaderOpts::default())
            .await
            .unwrap_err(),
        agg.stop_reader(key.clone()).await.unwrap_err(),
    ] {
        assert!(err.is_not_found(), "{err:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn add_reader_without_peers_fails_to_connect() {
    let builder = builder(false, 100);
    let agg = Aggregator::create(builder, Default::default()).unwrap();
    let key = DiscoveryKey::from(bytes::Bytes::from_static(&[3; 32]));

    let err = agg.add_reader(key.clone()).await.unwrap_err();
    assert!(matches!(err, HrssError::Connection { .. }), "{err:?}");
    assert!(agg.list_readers().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_adds_share_one_reader() {
    let builder = builder(false, 5_000);
    let f = feed(&builder, Default::default(), "Show", 2).await;
    let agg = Aggregator::create(builder.clone(), Default::default()).unwrap();

    let adds = (0..5).map(|_| agg.add_reader(dk(&f)));
    futures::future::try_join_all(adds).await.unwrap();
    assert_eq!(1, agg.list_readers().await.unwrap().len());
    let first = agg.reader(&dk(&f)).unwrap();

    // adding a ready reader is a no-op
    agg.add_reader(dk(&f)).await.unwrap();
    assert!(Arc::ptr_eq(&first, &agg.reader(&dk(&f)).unwrap()));

    agg.stop_reader(dk(&f)).await.unwrap();
    assert!(agg.reader(&dk(&f)).unwrap_err().is_not_found());
    f.writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_during_init_waits_for_it() {
    let builder = builder(false, 5_000);
    let f = feed(&builder, Default::default(), "Show", 2).await;
    let agg = Aggregator::create(builder.clone(), Default::default()).unwrap();

    let (added, stopped) = futures::future::join(agg.add_reader(dk(&f)), async {
        tokio::task::yield_now().await;
        agg.stop_reader(dk(&f)).await
    })
    .await;
    added.unwrap();
    stopped.unwrap();
    assert!(agg.list_readers().await.unwrap().is_empty());
    f.writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn feeds_metadata_is_sorted_by_key() {
    let builder = builder(false, 5_000);
    let a = feed(&builder, Default::default(), "A", 1).await;
    let b = feed(&builder, Default::default(), "B", 1).await;
    let agg = Aggregator::create(builder.clone(), Default::default()).unwrap();
    agg.add_reader(dk(&a)).await.unwrap();
    agg.add_reader(dk(&b)).await.unwrap();

    let all = agg.get_feeds_metadata().await.unwrap();
    assert_eq!(2, all.len());
    assert!(all[0].0 < all[1].0);
    for (key, meta) in all {
        let expect = if key == dk(&a) { "A" } else { "B" };
        assert_eq!(Some(serde_json::json!(expect)), meta.title);
    }

    agg.close().await.unwrap();
    a.writer.close().await.unwrap();
    b.writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn init_restores_stored_readers_offline() {
    let writer_dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let builder = builder(true, 100);

    let f = feed(&builder, writer_dir.path().into(), "Show", 2).await;
    let key = dk(&f);
    {
        let agg =
            Aggregator::create(builder.clone(), root.path().into()).unwrap();
        agg.add_reader(key.clone()).await.unwrap();
        agg.close().await.unwrap();
    }
    f.writer.close().await.unwrap();
    assert!(root.path().join(key.to_string()).is_dir());
    std::fs::create_dir(root.path().join("not a key!")).unwrap();

    let agg = Aggregator::create(builder.clone(), root.path().into()).unwrap();
    agg.init().await.unwrap();
    assert_eq!(
        vec![(key.clone(), ReaderState::Ready)],
        agg.list_readers().await.unwrap()
    );
    let items = agg
        .get_reader_feed(key.clone(), FeedOpts::default())
        .await
        .unwrap();
    assert_eq!(2, items.len());
    agg.close().await.unwrap();
}

#[test]
fn config_defaults() {
    let mut config = Config::default();
    Aggregator::default_config(&mut config).unwrap();
    assert_eq!(
        serde_json::json!({
            "aggregator": {
                "connectTimeoutMs": 20000,
                "updateTimeoutMs": 20000,
                "retryAttempts": 200,
                "retryIntervalMs": 100
            }
        }),
        serde_json::to_value(&config).unwrap()
    );

    // tolerant of partial configs
    let config: Config = serde_json::from_value(serde_json::json!({
        "aggregator": { "connectTimeoutMs": 5 }
    }))
    .unwrap();
    let c: AggregatorConfig =
        config.get_module_config(AGGREGATOR_MOD_NAME).unwrap();
    assert_eq!(5, c.connect_timeout_ms);
    assert_eq!(200, c.retry_attempts);
}
