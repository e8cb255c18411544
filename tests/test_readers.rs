use batchmdb::flags::{DbFlags, EnvFlags, WriteFlags};
use batchmdb::{Client, Error, Lmdb, Options};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn setup_test_db(options: Options) -> (TempDir, Lmdb) {
    let temp_dir = TempDir::new().unwrap();
    let lmdb = Lmdb::open(temp_dir.path(), options).unwrap();
    (temp_dir, lmdb)
}

fn put(client: &Client, key: Vec<u8>, value: Vec<u8>) {
    client
        .update(move |txn| {
            let db = txn.open_db(None, DbFlags::empty())?;
            txn.put(db, &key, &value, WriteFlags::empty())
        })
        .unwrap();
}

fn read(client: &Client, key: &[u8]) -> Option<Vec<u8>> {
    client
        .view(|txn| {
            let db = txn.open_db(None, DbFlags::empty())?;
            Ok::<_, Error>(txn.get(db, key)?.map(<[u8]>::to_vec))
        })
        .unwrap()
}

#[test]
fn test_view_limit_of_one() {
    let (_dir, lmdb) = setup_test_db(Options::default().max_readers(4).max_concurrent_views(1));
    put(&lmdb.client(), b"key".to_vec(), b"value".to_vec());

    let inside = Arc::new(AtomicBool::new(false));
    let (entered, wait_entered) = mpsc::channel();

    let first = {
        let client = lmdb.client();
        let inside = Arc::clone(&inside);
        thread::spawn(move || {
            client
                .view(|_txn| {
                    inside.store(true, Ordering::SeqCst);
                    entered.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    inside.store(false, Ordering::SeqCst);
                    Ok::<_, Error>(())
                })
                .unwrap();
        })
    };

    wait_entered.recv().unwrap();
    let second = lmdb.client();
    let overlapped = second
        .view(|txn| {
            let db = txn.open_db(None, DbFlags::empty())?;
            assert_eq!(txn.get(db, b"key")?, Some(&b"value"[..]));
            Ok::<_, Error>(inside.load(Ordering::SeqCst))
        })
        .unwrap();
    assert!(!overlapped, "second view ran while the first was open");
    first.join().unwrap();
}

#[test]
fn test_clients_share_a_single_reader_entry() {
    let (_dir, lmdb) = setup_test_db(Options::default().max_readers(1));
    put(&lmdb.client(), b"key".to_vec(), b"value".to_vec());

    let inside = Arc::new(AtomicBool::new(false));
    let (entered, wait_entered) = mpsc::channel();

    let first = {
        let client = lmdb.client();
        let inside = Arc::clone(&inside);
        thread::spawn(move || {
            client
                .view(|txn| {
                    let db = txn.open_db(None, DbFlags::empty())?;
                    inside.store(true, Ordering::SeqCst);
                    entered.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    inside.store(false, Ordering::SeqCst);
                    Ok::<_, Error>(txn.get(db, b"key")?.map(<[u8]>::to_vec))
                })
                .unwrap()
        })
    };

    // A second client waits for the entry instead of failing with ReadersFull
    wait_entered.recv().unwrap();
    let second = lmdb.client();
    let overlapped = second
        .view(|txn| {
            let db = txn.open_db(None, DbFlags::empty())?;
            assert_eq!(txn.get(db, b"key")?, Some(&b"value"[..]));
            Ok::<_, Error>(inside.load(Ordering::SeqCst))
        })
        .unwrap();
    assert!(!overlapped, "second view ran while the first was open");
    assert_eq!(first.join().unwrap().as_deref(), Some(&b"value"[..]));

    // Both clients keep working after the first one is gone
    assert_eq!(read(&second, b"key").as_deref(), Some(&b"value"[..]));
    assert_eq!(lmdb.info().unwrap().num_readers, 1);
}

#[test]
fn test_copy_after_view_with_one_reader_entry() {
    let (_dir, lmdb) = setup_test_db(Options::default().max_readers(1));
    let client = lmdb.client();
    put(&client, b"key".to_vec(), b"value".to_vec());
    assert_eq!(read(&client, b"key").as_deref(), Some(&b"value"[..]));

    for compact in [false, true] {
        let target = TempDir::new().unwrap();
        client.copy(target.path(), compact).unwrap();

        let copy = Lmdb::open(target.path(), Options::default()).unwrap();
        assert_eq!(read(&copy.client(), b"key").as_deref(), Some(&b"value"[..]));
        copy.terminate_sync();

        // Views still get the entry back after the copy
        assert_eq!(read(&client, b"key").as_deref(), Some(&b"value"[..]));
    }
}

#[test]
fn test_concurrent_views_are_bounded() {
    const LIMIT: usize = 2;
    let (_dir, lmdb) =
        setup_test_db(Options::default().max_readers(16).max_concurrent_views(LIMIT as u32));
    put(&lmdb.client(), b"key".to_vec(), b"value".to_vec());

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = lmdb.client();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..5 {
                    client
                        .view(|_txn| {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(5));
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, Error>(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= LIMIT, "peak of {} concurrent views", peak);
}

#[test]
fn test_renewed_view_sees_new_commits() {
    let (_dir, lmdb) = setup_test_db(Options::default());
    let writer = lmdb.client();
    let reader = lmdb.client();

    for n in 0..10u32 {
        put(&writer, b"counter".to_vec(), n.to_be_bytes().to_vec());
        assert_eq!(read(&reader, b"counter"), Some(n.to_be_bytes().to_vec()));
    }

    // Renewal reuses the one pooled reader table entry
    let info = lmdb.info().unwrap();
    assert_eq!(info.num_readers, 1);
}

#[test]
fn test_view_error_passes_through() {
    let (_dir, lmdb) = setup_test_db(Options::default());
    let client = lmdb.client();

    #[derive(Debug, PartialEq)]
    enum Lookup {
        Missing,
        Db(Error),
    }

    impl From<Error> for Lookup {
        fn from(err: Error) -> Self {
            Lookup::Db(err)
        }
    }

    let result = client.view(|txn| {
        let db = txn.open_db(None, DbFlags::empty())?;
        txn.get(db, b"absent")?.map(<[u8]>::to_vec).ok_or(Lookup::Missing)
    });
    assert_eq!(result, Err(Lookup::Missing));

    // The slot is usable again after a failed view
    put(&client, b"present".to_vec(), b"yes".to_vec());
    assert_eq!(read(&client, b"present").as_deref(), Some(&b"yes"[..]));
}

#[test]
fn test_slot_survives_resize() {
    let (_dir, lmdb) = setup_test_db(Options::default().map_size(64 * 1024));
    let writer = lmdb.client();
    let reader = lmdb.client();

    put(&writer, b"first".to_vec(), b"1".to_vec());
    assert_eq!(read(&reader, b"first").as_deref(), Some(&b"1"[..]));
    let generation = lmdb.environment().generation();

    // Enough data to force the map to grow
    for n in 0..128u32 {
        put(&writer, n.to_be_bytes().to_vec(), vec![0x5a; 1500]);
    }
    assert!(lmdb.environment().generation() > generation);

    assert_eq!(read(&reader, b"first").as_deref(), Some(&b"1"[..]));
    assert_eq!(read(&reader, &127u32.to_be_bytes()), Some(vec![0x5a; 1500]));
}

#[test]
fn test_panicking_view_releases_its_permit() {
    let (_dir, lmdb) = setup_test_db(Options::default().max_readers(4).max_concurrent_views(1));
    put(&lmdb.client(), b"key".to_vec(), b"value".to_vec());

    let client = lmdb.client();
    let panicked = thread::spawn(move || {
        let _ = client.view(|_txn| -> Result<(), Error> { panic!("view function failed") });
    })
    .join();
    assert!(panicked.is_err());

    // The only permit came back, and so did the resize lock
    let client = lmdb.client();
    assert_eq!(read(&client, b"key").as_deref(), Some(&b"value"[..]));
    put(&client, b"key".to_vec(), b"again".to_vec());
    assert_eq!(read(&client, b"key").as_deref(), Some(&b"again"[..]));
}

#[test]
fn test_copy_can_be_reopened() {
    let (_dir, lmdb) = setup_test_db(Options::default());
    let client = lmdb.client();
    for n in 0..100u32 {
        put(&client, n.to_be_bytes().to_vec(), format!("value_{}", n).into_bytes());
    }

    for compact in [false, true] {
        let target = TempDir::new().unwrap();
        client.copy(target.path(), compact).unwrap();

        let copy = Lmdb::open(target.path(), Options::default()).unwrap();
        let reader = copy.client();
        assert_eq!(
            read(&reader, &42u32.to_be_bytes()).as_deref(),
            Some(&b"value_42"[..])
        );
        let entries = reader
            .view(|txn| {
                let db = txn.open_db(None, DbFlags::empty())?;
                Ok::<_, Error>(txn.db_stat(db)?.entries)
            })
            .unwrap();
        assert_eq!(entries, 100);
        drop(reader);
        copy.terminate_sync();
    }

    // Copying through the database handle works the same way
    let target = TempDir::new().unwrap();
    lmdb.copy(target.path(), true).unwrap();
}

#[test]
fn test_read_only_views_from_many_threads() {
    let dir = TempDir::new().unwrap();
    {
        let lmdb = Lmdb::open(dir.path(), Options::default()).unwrap();
        put(&lmdb.client(), b"shared".to_vec(), b"data".to_vec());
    }

    let lmdb = Lmdb::open(dir.path(), Options::default().flags(EnvFlags::RDONLY)).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = lmdb.client();
            thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(read(&client, b"shared").as_deref(), Some(&b"data"[..]));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_client_outlives_database() {
    let (_dir, lmdb) = setup_test_db(Options::default());
    let client = lmdb.client();
    put(&client, b"key".to_vec(), b"value".to_vec());
    assert!(read(&client, b"key").is_some());

    drop(lmdb);

    let result = client.view(|txn| txn.open_db(None, DbFlags::empty()).map(|_| ()));
    assert_eq!(result, Err(Error::EnvClosed));
    assert_eq!(client.copy("/nonexistent", false), Err(Error::EnvClosed));
    drop(client);
}
