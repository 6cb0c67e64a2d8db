//! Concurrent writers on shared storage roots: lock markers, in-place publication and
//! PHI record updates from independent store instances.

mod common;

use common::*;
use recon_transfer::publish::{read_ready, AtomicPublisher, LockMarker, PublishError};
use recon_transfer::state_machine::{BackoffPolicy, TransferPhase};
use recon_transfer::storage::{LockWait, PhiStore, TaskId};
use std::fs;
use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn concurrent_publishers_never_leave_partial_records() {
    let env = TestEnvironment::new();
    let root = env.roots.outbound.clone();
    let id = TaskId::parse("contended").unwrap();
    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|n| {
            let root = root.clone();
            let id = id.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                AtomicPublisher::new().publish(&root, &id, "contended.task", |sink| {
                    let line = format!("writer = {n}\n");
                    for _ in 0..200 {
                        sink.write_all(line.as_bytes())?;
                    }
                    Ok(())
                })
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().any(|r| r.is_ok()));
    for result in &results {
        if let Err(error) = result {
            assert!(matches!(error, PublishError::LockBusy { .. }), "unexpected {error}");
        }
    }

    // Exactly one writer's complete output
    let text = read_ready(&root, &id, "contended.task").unwrap().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 200);
    assert!(lines.iter().all(|line| *line == lines[0]));
    assert!(!root.join("contended.lock").exists());
}

#[test]
fn readers_skip_records_under_a_lock() {
    let env = TestEnvironment::new();
    let root = env.roots.outbound.clone();
    let id = TaskId::parse("busy").unwrap();
    fs::write(root.join("busy.task"), "half").unwrap();

    let lock = LockMarker::acquire(root.join("busy.lock")).unwrap();
    assert_eq!(read_ready(&root, &id, "busy.task").unwrap(), None);

    let publish = AtomicPublisher::new().publish(&root, &id, "busy.task", |sink| {
        sink.write_all(b"complete")
    });
    assert!(matches!(publish, Err(PublishError::LockBusy { .. })));

    lock.release();
    assert_eq!(
        read_ready(&root, &id, "busy.task").unwrap().as_deref(),
        Some("half")
    );
}

#[test]
fn separate_stores_serialize_record_updates() {
    let env = TestEnvironment::new();
    let id = env.schedule_task("shared-record");
    let wait = LockWait {
        attempts: 2000,
        interval: Duration::from_millis(1),
    };
    let per_writer = 15;

    // Two store instances stand in for two processes sharing the roots
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = PhiStore::new(env.roots.clone(), wait);
            let id = id.clone();
            thread::spawn(move || {
                for _ in 0..per_writer {
                    store
                        .record_failure(
                            &id,
                            TransferPhase::Download,
                            &BackoffPolicy::default(),
                            chrono::Utc::now(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let record = env.store.read(&id).unwrap();
    assert_eq!(record.status.retry_download, 2 * per_writer);
    assert!(!env.roots.phi_lock_path(&id).exists());
}

#[test]
fn busy_lock_wait_gives_up() {
    let env = TestEnvironment::new();
    let id = env.schedule_task("held");
    let _held = LockMarker::acquire(env.roots.phi_lock_path(&id)).unwrap();

    let store = PhiStore::new(
        env.roots.clone(),
        LockWait {
            attempts: 3,
            interval: Duration::from_millis(5),
        },
    );
    let result = store.save_costs(&id, 1.0, "HELD");

    assert!(result.is_err());
    assert_eq!(env.store.read(&id).unwrap().stats.cost, 0.0);
}
