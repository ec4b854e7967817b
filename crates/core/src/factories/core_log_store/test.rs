use super::*;
use crate::default_test_builder;

async fn mem_store() -> DynLogStore {
    let builder = Arc::new(default_test_builder());
    builder
        .log_store
        .create(builder.clone(), std::path::PathBuf::new())
        .await
        .unwrap()
}

async fn file_store(dir: &std::path::Path) -> DynLogStore {
    let mut builder = default_test_builder();
    builder.log_store = FileLogStoreFactory::create();
    builder.set_default_config().unwrap();
    let builder = Arc::new(builder);
    builder
        .log_store
        .create(builder.clone(), dir.to_path_buf())
        .await
        .unwrap()
}

fn b(s: &'static str) -> bytes::Bytes {
    bytes::Bytes::from_static(s.as_bytes())
}

#[tokio::test(flavor = "multi_thread")]
async fn append_and_get() {
    let store = mem_store().await;
    let log = store.open_named("a").await.unwrap();
    log.ready().await.unwrap();
    assert!(log.writable());
    assert!(log.is_empty());

    assert_eq!(0, log.append(vec![b("one"), b("two")]).await.unwrap());
    assert_eq!(2, log.append(vec![b("three")]).await.unwrap());
    assert_eq!(3, log.len());
    assert_eq!(11, log.byte_len());
    assert_eq!(Some(b("two")), log.get(1).await.unwrap());
    assert_eq!(None, log.get(3).await.unwrap());

    // same name, same log
    let again = store.open_named("a").await.unwrap();
    assert_eq!(log.key(), again.key());
    assert_eq!(3, again.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn replicas_are_read_only() {
    let store = mem_store().await;
    let log = store.open_key(LogKey::from(b("foreign"))).await.unwrap();
    assert!(!log.writable());
    assert!(log.append(vec![b("x")]).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_log_rejects_appends() {
    let store = mem_store().await;
    let log = store.open_named("a").await.unwrap();
    store.close().await.unwrap();
    assert!(log.append(vec![b("x")]).await.is_err());
    assert!(store.open_named("b").await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn update_pulls_from_remote() {
    let writer = mem_store().await;
    let reader = mem_store().await;

    let w_log = writer.open_named("feed").await.unwrap();
    w_log.append(vec![b("a"), b("b")]).await.unwrap();

    let r_log = reader.open_key(w_log.key()).await.unwrap();

    // no remote yet, nothing to pull
    assert!(!r_log.update(UpdateOpts::default()).await.unwrap());

    reader.replicate(writer.clone());
    assert_eq!(1, reader.remote_count());
    assert!(r_log.update(UpdateOpts::default()).await.unwrap());
    assert_eq!(2, r_log.len());

    // nothing new
    assert!(!r_log.update(UpdateOpts { wait: true }).await.unwrap());

    w_log.append(vec![b("c")]).await.unwrap();
    assert!(r_log.update(UpdateOpts::default()).await.unwrap());
    assert_eq!(Some(b("c")), r_log.get(2).await.unwrap());

    reader.disconnect(writer.id());
    assert_eq!(0, reader.remote_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn update_wait_blocks_until_a_remote_connects() {
    let writer = mem_store().await;
    let reader = mem_store().await;

    let w_log = writer.open_named("feed").await.unwrap();
    w_log.append(vec![b("a")]).await.unwrap();
    let r_log = reader.open_key(w_log.key()).await.unwrap();

    let waiting = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        r_log.update(UpdateOpts { wait: true }),
    )
    .await;
    assert!(waiting.is_err(), "should still be waiting for a peer");

    let task = {
        let r_log = r_log.clone();
        tokio::task::spawn(async move {
            r_log.update(UpdateOpts { wait: true }).await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    reader.replicate(writer.clone());

    assert!(task.await.unwrap().unwrap());
    assert_eq!(1, r_log.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn file_store_persists_names_and_replicated_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let w_dir = tmp.path().join("writer");
    let r_dir = tmp.path().join("reader");

    let key = {
        let writer = file_store(&w_dir).await;
        let log = writer.open_named("feed").await.unwrap();
        log.append(vec![b("a"), b("b")]).await.unwrap();

        let reader = file_store(&r_dir).await;
        let r_log = reader.open_key(log.key()).await.unwrap();
        reader.replicate(writer.clone());
        assert!(r_log.update(UpdateOpts::default()).await.unwrap());

        reader.close().await.unwrap();
        writer.close().await.unwrap();
        log.key()
    };

    // the writer reopens the same named log, still writable
    let writer = file_store(&w_dir).await;
    let log = writer.open_named("feed").await.unwrap();
    assert_eq!(key, log.key());
    assert!(log.writable());
    assert_eq!(2, log.len());

    // the reader replica survived without any peer
    let reader = file_store(&r_dir).await;
    let r_log = reader.open_key(key).await.unwrap();
    assert!(!r_log.writable());
    assert_eq!(Some(b("b")), r_log.get(1).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn file_store_serves_logs_it_has_not_opened() {
    let tmp = tempfile::tempdir().unwrap();

    let key = {
        let writer = file_store(tmp.path()).await;
        let log = writer.open_named("feed").await.unwrap();
        log.append(vec![b("a")]).await.unwrap();
        log.key()
    };

    let writer = file_store(tmp.path()).await;
    assert_eq!(1, writer.serve(key, 0).await.unwrap().len());
}
