use super::*;
use crate::test_log;
use futures::TryStreamExt;

fn item(s: &str) -> bytes::Bytes {
    bytes::Bytes::from(serde_json::to_vec(&serde_json::json!({ "title": s })).unwrap())
}

async fn collect(feed: &OrderedFeed, limit: Option<usize>) -> Vec<FeedRecord> {
    feed.feed_stream(FeedStreamOpts { limit })
        .try_collect()
        .await
        .unwrap()
}

#[test]
fn order_strings_are_fixed_width() {
    assert_eq!("000007", order_string(7, 6));
    assert_eq!("000000000123", order_string(123, ORDER_DIGITS));
    assert!(order_string(9, 6) < order_string(10, 6));
    assert_eq!(123, order_number("000000000123").unwrap());
    assert!(order_number("abc").is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_stream_is_reverse_insertion_order() {
    let feed = OrderedFeed::new(test_log().await);
    assert_eq!(0, feed.next_highest().await.unwrap());

    const N: u64 = 12;
    for i in 0..N {
        let key = format!("guid-{i}");
        assert_eq!(i, feed.put_ordered_item(&key, item(&key)).await.unwrap());
    }
    assert_eq!(N, feed.next_highest().await.unwrap());

    let got = collect(&feed, None).await;
    let keys: Vec<_> = got.iter().map(|r| r.key.clone()).collect();
    let expect: Vec<_> = (0..N).rev().map(|i| format!("guid-{i}")).collect();
    assert_eq!(expect, keys);
    let idx: Vec<_> = got.iter().map(|r| r.order_index).collect();
    assert_eq!((0..N).rev().collect::<Vec<_>>(), idx);

    // restartable
    assert_eq!(got, collect(&feed, None).await);

    // limited
    let first3 = collect(&feed, Some(3)).await;
    assert_eq!(3, first3.len());
    assert_eq!("guid-11", first3[0].key);
}

#[tokio::test(flavor = "multi_thread")]
async fn narrow_order_strings_still_sort() {
    let feed = OrderedFeed::with_digits(test_log().await, 2);
    for i in 0..11 {
        feed.put_ordered_item(&format!("k{i}"), item("x"))
            .await
            .unwrap();
    }
    let got = collect(&feed, Some(2)).await;
    assert_eq!(vec![10, 9], got.iter().map(|r| r.order_index).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_puts_get_distinct_indices() {
    let feed = OrderedFeed::new(test_log().await);
    let all = (0..8).map(|i| {
        let feed = feed.clone();
        async move { feed.put_ordered_item(&format!("k{i}"), item("x")).await }
    });
    let mut idx = futures::future::try_join_all(all).await.unwrap();
    idx.sort();
    assert_eq!((0..8).collect::<Vec<u64>>(), idx);
}

#[tokio::test(flavor = "multi_thread")]
async fn dangling_order_entries_are_skipped() {
    let feed = OrderedFeed::new(test_log().await);
    feed.put_ordered_item("a", item("a")).await.unwrap();

    // a crash after the order write but before the item write
    feed.tree()
        .sub(ORDER_NAMESPACE)
        .put(
            &order_string(1, ORDER_DIGITS),
            bytes::Bytes::from_static(b"lost"),
        )
        .await
        .unwrap();

    feed.put_ordered_item("c", item("c")).await.unwrap();

    let got = collect(&feed, None).await;
    let keys: Vec<_> = got.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(vec!["c", "a"], keys);
    assert_eq!(2, got[0].order_index);
    assert!(!feed.has_key("lost").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn has_key_and_unordered_stream() {
    let feed = OrderedFeed::new(test_log().await);
    feed.put_ordered_item("b", item("b")).await.unwrap();
    feed.put_ordered_item("a", item("a")).await.unwrap();

    assert!(feed.has_key("a").await.unwrap());
    assert!(!feed.has_key("z").await.unwrap());
    assert_eq!(Some(item("b")), feed.get("b").await.unwrap());

    let all: Vec<(String, bytes::Bytes)> =
        feed.unordered_feed_stream().try_collect().await.unwrap();
    let keys: Vec<_> = all.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(vec!["a", "b"], keys);
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_cas_writes_once() {
    let feed = OrderedFeed::new(test_log().await);
    let title = serde_json::json!("X");

    assert_eq!(
        None,
        feed.get_metadata_value(MetadataField::Title).await.unwrap()
    );

    let before = feed.tree().log().len();
    let mut writes = 0;
    for _ in 0..5 {
        if feed
            .maybe_update_metadata(MetadataField::Title, &title)
            .await
            .unwrap()
        {
            writes += 1;
        }
    }
    assert_eq!(1, writes);
    assert_eq!(before + 1, feed.tree().log().len());
    assert_eq!(
        Some(title),
        feed.get_metadata_value(MetadataField::Title).await.unwrap()
    );

    // a changed value writes again
    assert!(feed
        .maybe_update_metadata(MetadataField::Title, &serde_json::json!("Y"))
        .await
        .unwrap());
    assert_eq!(before + 2, feed.tree().log().len());
}

#[tokio::test(flavor = "multi_thread")]
async fn get_metadata_covers_every_field() {
    let feed = OrderedFeed::new(test_log().await);
    feed.put_metadata(MetadataField::Title, &serde_json::json!("T"))
        .await
        .unwrap();
    feed.put_metadata(MetadataField::PubDate, &serde_json::json!("Mon"))
        .await
        .unwrap();

    let meta = feed.get_metadata().await.unwrap();
    assert_eq!(Some(serde_json::json!("T")), meta.title);
    assert_eq!(Some(serde_json::json!("Mon")), meta.pub_date);
    assert_eq!(None, meta.description);
    assert_eq!(None, meta.last_build_date);
}

#[test]
fn non_json_values_become_strings() {
    let r = FeedRecord {
        seq: 0,
        key: "k".into(),
        value: bytes::Bytes::from_static(b"plain text"),
        order_index: 0,
    };
    assert_eq!(serde_json::json!("plain text"), r.into_item().value);
}
