//! Background work: ordering, active count, draining and closed environments

use lode_lmdb::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::time::Duration;

fn open_env(reader_threads: usize) -> (tempfile::TempDir, Environment) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = EnvironmentConfig::new(temp_dir.path())
        .with_sync_mode(SyncMode::NoSync)
        .with_reader_threads(reader_threads);
    let env = Environment::new(config, true).unwrap();
    (temp_dir, env)
}

#[test]
fn test_writable_work_completes_in_submission_order() {
    let (_temp_dir, env) = open_env(4);
    let completed = Arc::new(Mutex::new(Vec::new()));
    let n = 100u32;

    for i in 0..n {
        let completed = Arc::clone(&completed);
        env.submit(
            false,
            move |txn| {
                let mut db = txn.db("log")?;
                let seq = db.count()? as u32;
                db.set(&seq.to_be_bytes(), &i.to_be_bytes())
            },
            move |result| {
                result.unwrap();
                completed.lock().unwrap().push(i);
            },
        );
    }
    env.wait_idle();

    let completed = completed.lock().unwrap().clone();
    assert_eq!(completed, (0..n).collect::<Vec<_>>());

    // Commit order matches too: entry `seq` holds submission `seq`
    let mut values = Vec::new();
    env.db("log")
        .enumerate(None, Include::VALUES, |entry| {
            let bytes: [u8; 4] = entry.value.unwrap().try_into().unwrap();
            values.push(u32::from_be_bytes(bytes));
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(values, (0..n).collect::<Vec<_>>());
}

#[test]
fn test_readonly_work_runs_concurrently() {
    let (_temp_dir, env) = open_env(4);
    env.write(|txn| txn.default_db()?.set(b"K", b"v")).unwrap();

    // All four readers must be inside their transactions at once
    let barrier = Arc::new(Barrier::new(4));
    let (tx, rx) = mpsc::channel();
    for _ in 0..4 {
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        env.submit(
            true,
            move |txn| {
                barrier.wait();
                assert!(txn.default_db()?.exists(b"K")?);
                Ok(())
            },
            move |result| tx.send(result.is_ok()).unwrap(),
        );
    }

    for _ in 0..4 {
        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
    }
}

#[test]
fn test_active_count_tracks_outstanding_work() {
    let (_temp_dir, env) = open_env(1);
    assert_eq!(env.active_count(), 0);

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    for _ in 0..3 {
        let release_rx = Arc::clone(&release_rx);
        env.submit(
            false,
            move |_| {
                release_rx.lock().unwrap().recv().unwrap();
                Ok(())
            },
            |_| {},
        );
    }
    assert_eq!(env.active_count(), 3);

    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    env.wait_idle();
    assert_eq!(env.active_count(), 0);
}

#[test]
fn test_failed_work_aborts_and_reports() {
    let (_temp_dir, env) = open_env(1);
    let (tx, rx) = mpsc::channel();

    env.submit(
        false,
        |txn| {
            txn.default_db()?.set(b"K", b"v")?;
            Err(LodeError::KeyNotFound)
        },
        move |result| tx.send(result).unwrap(),
    );

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(LodeError::KeyNotFound)));
    assert!(!env.default_db().exists(b"K").unwrap());
}

#[test]
fn test_rollback_request_discards_work() {
    let (_temp_dir, env) = open_env(1);
    let (tx, rx) = mpsc::channel();

    env.submit(
        false,
        |txn| {
            txn.default_db()?.set(b"K", b"v")?;
            txn.request_rollback();
            Ok(())
        },
        move |result| tx.send(result).unwrap(),
    );

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());
    assert!(!env.default_db().exists(b"K").unwrap());
}

#[test]
fn test_close_drains_queued_work() {
    let (_temp_dir, mut env) = open_env(2);
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..20u8 {
        let done = Arc::clone(&done);
        env.submit(
            i % 2 == 0,
            move |txn| {
                if !txn.is_readonly() {
                    txn.default_db()?.set(&[i], b"v")?;
                }
                Ok(())
            },
            move |result| {
                result.unwrap();
                done.fetch_add(1, Ordering::SeqCst);
            },
        );
    }

    env.close();
    assert_eq!(done.load(Ordering::SeqCst), 20);
    assert_eq!(env.active_count(), 0);

    env.open().unwrap();
    assert_eq!(env.default_db().count().unwrap(), 10);
}

#[test]
fn test_use_after_close_fails() {
    let (_temp_dir, mut env) = open_env(1);
    env.close();

    assert!(matches!(env.begin(true), Err(LodeError::EnvironmentClosed)));
    assert!(matches!(
        env.default_db().get(b"K"),
        Err(LodeError::EnvironmentClosed)
    ));
    assert!(matches!(
        env.open_database("x", false),
        Err(LodeError::EnvironmentClosed)
    ));

    let (tx, rx) = mpsc::channel();
    env.submit(false, |_| Ok(()), move |result| tx.send(result).unwrap());
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Err(LodeError::EnvironmentClosed)
    ));
}

#[test]
fn test_application_errors_pass_through() {
    let (_temp_dir, env) = open_env(1);
    let (tx, rx) = mpsc::channel();

    env.submit(
        false,
        |txn| {
            txn.default_db()?.set(b"K", b"v")?;
            Err(anyhow::anyhow!("quota exceeded").into())
        },
        move |result| tx.send(result).unwrap(),
    );

    match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
        Err(LodeError::Other(err)) => assert_eq!(err.to_string(), "quota exceeded"),
        other => panic!("expected application error, got {other:?}"),
    }
    assert!(!env.default_db().exists(b"K").unwrap());
}

#[test]
fn test_readonly_work_queues_behind_a_busy_reader_pool() {
    let (_temp_dir, env) = open_env(2);
    let gate = Arc::new(Mutex::new(()));
    let started = Arc::new(AtomicUsize::new(0));

    let held = gate.lock().unwrap();
    for _ in 0..3 {
        let gate = Arc::clone(&gate);
        let started = Arc::clone(&started);
        env.submit(
            true,
            move |_txn| {
                started.fetch_add(1, Ordering::SeqCst);
                drop(gate.lock().unwrap());
                Ok(())
            },
            |_| {},
        );
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while started.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(env.active_count(), 3);

    drop(held);
    env.wait_idle();
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(env.active_count(), 0);
}
