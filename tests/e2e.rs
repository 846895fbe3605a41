//! End-to-end guest/host scenarios over an in-memory duplex transport.

use bytes::Bytes;
use kvbridge_guest::{Guest, GuestError, GuestOptions};
use kvbridge_host::{serve, SessionConfig};
use kvbridge_protocol::{BatchOp, IteratorOptions, RangeOptions};
use kvbridge_store::{MemoryStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

fn start_host(store: Arc<MemoryStore>, batch_size: usize) -> (DuplexStream, JoinHandle<()>) {
    let (guest_side, host_side) = tokio::io::duplex(64 * 1024);
    let config = SessionConfig {
        iterator_batch_size: batch_size,
        ..SessionConfig::default()
    };
    let handle = tokio::spawn(async move {
        let _ = serve(store, host_side, config).await;
    });
    (guest_side, handle)
}

async fn connected(retry: bool, batch_size: usize) -> (Guest, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let guest = Guest::new(GuestOptions::new().with_retry(retry));
    let (transport, _) = start_host(store.clone(), batch_size);
    guest.attach(transport).await.unwrap();
    (guest, store)
}

async fn seed(guest: &Guest, entries: &[(&str, &str)]) {
    for (key, value) in entries {
        guest
            .put(key.as_bytes().to_vec(), value.as_bytes().to_vec())
            .await
            .unwrap();
    }
}

async fn wait_detached(guest: &Guest) {
    for _ in 0..500 {
        if !guest.is_attached() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("guest never noticed the disconnect");
}

async fn collect_keys(it: &mut kvbridge_guest::GuestIterator) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Some((key, _value)) = it.next().await.unwrap() {
        out.push(key.expect("keys requested"));
    }
    out
}

#[tokio::test]
async fn test_put_get_del_roundtrip() {
    let (guest, _store) = connected(false, 64).await;

    guest.put(&b"a"[..], &b"1"[..]).await.unwrap();
    assert_eq!(
        guest.get(&b"a"[..]).await.unwrap(),
        Some(Bytes::from_static(b"1"))
    );
    guest.del(&b"a"[..]).await.unwrap();
    assert_eq!(guest.get(&b"a"[..]).await.unwrap(), None);

    guest.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_value_round_trips_as_empty() {
    let (guest, _store) = connected(false, 64).await;

    guest.put(&b"k"[..], Bytes::new()).await.unwrap();
    assert_eq!(guest.get(&b"k"[..]).await.unwrap(), Some(Bytes::new()));
}

#[tokio::test]
async fn test_batch_then_get_many() {
    let (guest, _store) = connected(false, 64).await;

    guest
        .batch(vec![
            BatchOp::put("x", "X"),
            BatchOp::put("y", "Y"),
            BatchOp::del("x"),
        ])
        .await
        .unwrap();

    let values = guest
        .get_many(vec![Bytes::from_static(b"x"), Bytes::from_static(b"y")])
        .await
        .unwrap();
    assert_eq!(values, vec![None, Some(Bytes::from_static(b"Y"))]);
}

#[tokio::test]
async fn test_iterator_over_bounded_range() {
    let (guest, _store) = connected(false, 64).await;
    seed(&guest, &[("b", "1"), ("c", "2"), ("d", "3")]).await;

    let options = IteratorOptions::new()
        .with_range(RangeOptions::new().with_gte("a").with_lt("e"));
    let mut it = guest.iterator(options).await.unwrap();

    let mut entries = Vec::new();
    while let Some((key, value)) = it.next().await.unwrap() {
        entries.push((key.unwrap(), value.unwrap()));
    }
    assert_eq!(
        entries,
        vec![
            (Bytes::from_static(b"b"), Bytes::from_static(b"1")),
            (Bytes::from_static(b"c"), Bytes::from_static(b"2")),
            (Bytes::from_static(b"d"), Bytes::from_static(b"3")),
        ]
    );
    // Exhausted iterators keep yielding end.
    assert!(it.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_batch_size_invariance() {
    let keys = ["a", "b", "c", "d", "e", "f", "g"];
    let mut sequences = Vec::new();
    for batch_size in [1, 2, 64] {
        let (guest, _store) = connected(false, batch_size).await;
        for key in keys {
            guest.put(key.as_bytes().to_vec(), &b"v"[..]).await.unwrap();
        }
        let mut it = guest.iterator(IteratorOptions::default()).await.unwrap();
        sequences.push(collect_keys(&mut it).await);
    }
    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(sequences[1], sequences[2]);
    assert_eq!(sequences[0].len(), keys.len());
}

#[tokio::test]
async fn test_reverse_iteration_and_limit() {
    let (guest, _store) = connected(false, 2).await;
    seed(&guest, &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]).await;

    let options = IteratorOptions::new()
        .with_range(RangeOptions::new().with_reverse(true).with_limit(3));
    let mut it = guest.iterator(options).await.unwrap();
    let keys = collect_keys(&mut it).await;
    assert_eq!(
        keys,
        vec![
            Bytes::from_static(b"d"),
            Bytes::from_static(b"c"),
            Bytes::from_static(b"b")
        ]
    );
}

#[tokio::test]
async fn test_keys_only_and_count_only_iterators() {
    let (guest, _store) = connected(false, 64).await;
    seed(&guest, &[("a", "1"), ("b", "2")]).await;

    let mut it = guest
        .iterator(IteratorOptions::new().with_values(false))
        .await
        .unwrap();
    let entry = it.next().await.unwrap().unwrap();
    assert_eq!(entry.0, Some(Bytes::from_static(b"a")));
    assert_eq!(entry.1, None);
    it.close().await.unwrap();

    // Neither keys nor values: entries still advance the iterator.
    let mut it = guest
        .iterator(IteratorOptions::new().with_keys(false).with_values(false))
        .await
        .unwrap();
    let mut count = 0;
    while let Some(entry) = it.next().await.unwrap() {
        assert_eq!(entry, (None, None));
        count += 1;
    }
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_seek_skips_in_flight_data() {
    let (guest, _store) = connected(false, 2).await;
    seed(
        &guest,
        &[("a", "1"), ("b", "2"), ("c", "3"), ("f", "6"), ("g", "7")],
    )
    .await;

    let mut it = guest.iterator(IteratorOptions::default()).await.unwrap();
    let first = it.next().await.unwrap().unwrap();
    assert_eq!(first.0, Some(Bytes::from_static(b"a")));

    // Data frames for b/c may already be in flight; none of them may
    // surface after the seek.
    it.seek(&b"f"[..]).await.unwrap();
    let entry = it.next().await.unwrap().unwrap();
    assert_eq!(entry.0, Some(Bytes::from_static(b"f")));
    let entry = it.next().await.unwrap().unwrap();
    assert_eq!(entry.0, Some(Bytes::from_static(b"g")));
    assert!(it.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_retry_resumes_iteration_without_duplicates() {
    let store = Arc::new(MemoryStore::new());
    for key in [b"a", b"b", b"c", b"d", b"e", b"f", b"g", b"h", b"i", b"j"] {
        store
            .put(Bytes::copy_from_slice(key), Bytes::from_static(b"v"))
            .unwrap();
    }

    let guest = Guest::new(GuestOptions::new().with_retry(true));
    let (transport, host) = start_host(store.clone(), 2);
    guest.attach(transport).await.unwrap();

    let mut it = guest.iterator(IteratorOptions::default()).await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(it.next().await.unwrap().unwrap().0.unwrap());
    }
    assert_eq!(
        seen,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c")
        ]
    );

    // Kill the transport mid-iteration, then reattach to a fresh host
    // session over the same store.
    host.abort();
    wait_detached(&guest).await;

    let (transport, _host) = start_host(store.clone(), 2);
    guest.attach(transport).await.unwrap();

    let rest = collect_keys(&mut it).await;
    assert_eq!(
        rest,
        vec![
            Bytes::from_static(b"d"),
            Bytes::from_static(b"e"),
            Bytes::from_static(b"f"),
            Bytes::from_static(b"g"),
            Bytes::from_static(b"h"),
            Bytes::from_static(b"i"),
            Bytes::from_static(b"j"),
        ]
    );
}

#[tokio::test]
async fn test_retry_preserves_pending_requests() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(Bytes::from_static(b"k"), Bytes::from_static(b"v"))
        .unwrap();

    let guest = Guest::new(GuestOptions::new().with_retry(true));

    // Issue the request while detached; it must be replayed on attach.
    let pending = {
        let guest = guest.clone();
        tokio::spawn(async move { guest.get(&b"k"[..]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!guest.is_idle());

    let (transport, _host) = start_host(store, 64);
    guest.attach(transport).await.unwrap();

    assert_eq!(
        pending.await.unwrap().unwrap(),
        Some(Bytes::from_static(b"v"))
    );
}

#[tokio::test]
async fn test_disconnect_without_retry_rejects_and_flushes() {
    let guest = Guest::new(GuestOptions::new());
    let (guest_side, host_side) = tokio::io::duplex(4096);
    guest.attach(guest_side).await.unwrap();
    let mut flush = guest.flush_events();

    // No host behind the transport: the gets stay pending until the cut.
    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let guest = guest.clone();
            tokio::spawn(async move { guest.get(format!("k{i}").into_bytes()).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(host_side);

    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            Err(GuestError::ConnectionLost)
        ));
    }
    flush.changed().await.unwrap();
    assert!(guest.is_idle());
}

#[tokio::test]
async fn test_clear_range_over_rpc() {
    let (guest, store) = connected(false, 64).await;
    seed(&guest, &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]).await;

    guest
        .clear(RangeOptions::new().with_gte("b").with_lt("d"))
        .await
        .unwrap();

    assert_eq!(store.len(), 2);
    assert_eq!(guest.get(&b"b"[..]).await.unwrap(), None);
    assert_eq!(
        guest.get(&b"a"[..]).await.unwrap(),
        Some(Bytes::from_static(b"1"))
    );
}

#[tokio::test]
async fn test_iterator_limit_stops_pulls() {
    let (guest, _store) = connected(false, 2).await;
    seed(&guest, &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]).await;

    let options = IteratorOptions::new().with_range(RangeOptions::new().with_limit(2));
    let mut it = guest.iterator(options).await.unwrap();
    let keys = collect_keys(&mut it).await;
    assert_eq!(keys, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
}

#[tokio::test]
async fn test_close_is_idempotent_over_rpc() {
    let (guest, _store) = connected(false, 64).await;
    guest.put(&b"a"[..], &b"1"[..]).await.unwrap();

    guest.close().await.unwrap();
    guest.close().await.unwrap();

    assert!(matches!(
        guest.get(&b"a"[..]).await,
        Err(GuestError::DatabaseNotOpen)
    ));
}

#[tokio::test]
async fn test_get_many_with_no_keys() {
    let (guest, _store) = connected(false, 64).await;
    assert_eq!(guest.get_many(Vec::new()).await.unwrap(), Vec::new());
}
