//! Integration tests for the task scheduler

use crossbeam::channel;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use weft_core::{
    BlockingKind, CarrierState, FriendlyLock, HostileLock, JoinError, PinReason, Scheduler,
    SchedulerConfig, SchedulerError, TaskFailure, TaskStatus, WaitKey,
};

fn started(config: SchedulerConfig) -> Scheduler {
    let scheduler = Scheduler::new(config);
    scheduler.start().unwrap();
    scheduler
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_running_never_exceeds_pool_size() {
    let scheduler = started(SchedulerConfig::with_carriers(2));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            scheduler
                .submit(move |cx| async move {
                    cx.sleep(Duration::from_millis(5)).await;
                    let mut sum = 0u64;
                    for n in 0..10_000u64 {
                        sum = sum.wrapping_add(n * i);
                    }
                    cx.sleep(Duration::from_millis(5)).await;
                    Ok::<_, TaskFailure>(sum)
                })
                .unwrap()
        })
        .collect();

    for handle in handles {
        assert!(handle.join().is_ok());
    }

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 20);
    assert!(stats.peak_running >= 1);
    assert!(stats.peak_running <= 2, "peak_running = {}", stats.peak_running);
    assert!(stats.unmounts > 0);
    assert_eq!(stats.pinned_blocks, 0);
}

#[test]
fn test_friendly_lock_releases_carrier_while_blocking() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let lock = Arc::new(FriendlyLock::new(0u32));
    let (locked_tx, locked_rx) = channel::bounded(1);

    let holder = {
        let lock = lock.clone();
        scheduler
            .submit_named("holder", move |cx| async move {
                let mut guard = lock.lock(&cx).await;
                locked_tx.send(()).unwrap();
                cx.sleep(Duration::from_millis(100)).await;
                *guard += 1;
                Ok::<_, TaskFailure>(Instant::now())
            })
            .unwrap()
    };
    locked_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    // Runs on the only carrier while the holder is asleep
    let other = scheduler
        .submit_named("other", |_cx| async { Ok::<_, TaskFailure>(Instant::now()) })
        .unwrap();

    let other_done = other.join().unwrap();
    let holder_done = holder.join().unwrap();
    assert!(other_done < holder_done);
    assert_eq!(*lock.lock_blocking(), 1);
    assert!(scheduler.list_pinning_events(SystemTime::UNIX_EPOCH).is_empty());
}

#[test]
fn test_hostile_lock_pins_carrier_for_whole_call() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let lock = Arc::new(HostileLock::new(()));
    let (locked_tx, locked_rx) = channel::bounded(1);
    let before = SystemTime::now();

    let pinned = {
        let lock = lock.clone();
        scheduler
            .submit_named("pinned", move |cx| async move {
                let guard = lock.lock(&cx);
                assert!(cx.is_pinned());
                locked_tx.send(()).unwrap();
                cx.sleep(Duration::from_millis(100)).await;
                drop(guard);
                Ok::<_, TaskFailure>(Instant::now())
            })
            .unwrap()
    };
    let pinned_id = pinned.id();
    locked_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let other = scheduler
        .submit(|_cx| async { Ok::<_, TaskFailure>(Instant::now()) })
        .unwrap();

    thread::sleep(Duration::from_millis(30));
    assert_eq!(scheduler.carriers()[0].state, CarrierState::Pinned);
    let snapshot = scheduler
        .list_tasks()
        .into_iter()
        .find(|task| task.id == pinned_id)
        .unwrap();
    assert_eq!(snapshot.status, TaskStatus::PinnedBlocked);

    // The block is listed while it is still open
    let open = scheduler.list_pinning_events(before);
    assert_eq!(open.len(), 1);
    assert!(open[0].in_progress);
    assert!(open[0].duration >= Duration::from_millis(20));

    let pinned_done = pinned.join().unwrap();
    let other_done = other.join().unwrap();
    assert!(pinned_done <= other_done);

    let events = scheduler.list_pinning_events(before);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.task_id, pinned_id);
    assert_eq!(event.task_name.as_deref(), Some("pinned"));
    assert_eq!(event.reason, PinReason::BlockingCall(BlockingKind::Timed));
    assert!(event.duration >= Duration::from_millis(100));
    assert!(!event.in_progress);
    assert!(event.location.contains("scheduler_integration.rs"));
    assert_eq!(scheduler.stats().pinned_blocks, 1);
}

#[test]
fn test_cancel_ready_task() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let (busy_tx, busy_rx) = channel::bounded(1);

    // Occupies the only carrier; plain computation never yields
    let busy = scheduler
        .submit(move |_cx| async move {
            busy_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(80));
            Ok::<_, TaskFailure>(())
        })
        .unwrap();
    busy_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let queued = {
        let ran = ran.clone();
        scheduler
            .submit(move |_cx| async move {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    assert_eq!(queued.status(), TaskStatus::Ready);
    assert_eq!(scheduler.stats().queued, 1);

    assert!(scheduler.cancel(queued.id()));
    assert_eq!(scheduler.stats().queued, 0);
    assert_eq!(queued.join(), Err(JoinError::Cancelled));

    assert!(busy.join().is_ok());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(scheduler.stats().cancelled, 1);
}

#[test]
fn test_capacity_exceeded_and_accepted_tasks_complete() {
    let scheduler = Scheduler::new(SchedulerConfig::with_carriers(2).max_run_queue_depth(3));

    let accepted: Vec<_> = (0..3)
        .map(|i| {
            scheduler
                .submit(move |cx| async move {
                    cx.sleep(Duration::from_millis(5)).await;
                    Ok::<_, TaskFailure>(i)
                })
                .unwrap()
        })
        .collect();

    let err = scheduler
        .submit(|_cx| async { Ok::<_, TaskFailure>(99) })
        .unwrap_err();
    assert_eq!(err, SchedulerError::CapacityExceeded { depth: 3 });

    scheduler.start().unwrap();
    let results: Vec<_> = accepted.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![0, 1, 2]);

    let stats = scheduler.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.completed, 3);
}

#[test]
fn test_three_sleepers_on_two_carriers() {
    let scheduler = started(SchedulerConfig::with_carriers(2));

    let start = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            scheduler
                .submit(|cx| async move {
                    cx.sleep(Duration::from_millis(100)).await;
                    Ok::<_, TaskFailure>(cx.id())
                })
                .unwrap()
        })
        .collect();
    let expected: Vec<_> = handles.iter().map(|h| h.id()).collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let elapsed = start.elapsed();

    assert_eq!(ids, expected);
    assert!(elapsed >= Duration::from_millis(100));
    // The sleeps overlap; serialized they would take 300ms
    assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);
}

#[test]
fn test_cancel_pinned_task_when_block_returns() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let lock = Arc::new(HostileLock::new(()));
    let key = WaitKey::resource("disk:flush");
    let resumed = Arc::new(AtomicBool::new(false));

    let pinned = {
        let (lock, key, resumed) = (lock.clone(), key.clone(), resumed.clone());
        scheduler
            .submit(move |cx| async move {
                let _guard = lock.lock(&cx);
                cx.wait_for(key).await;
                resumed.store(true, Ordering::SeqCst);
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    assert!(wait_until(Duration::from_secs(1), || {
        pinned.status() == TaskStatus::PinnedBlocked
    }));

    // Never preempted: still pinned until the blocking call returns
    assert!(pinned.cancel());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pinned.status(), TaskStatus::PinnedBlocked);
    assert_eq!(scheduler.carriers()[0].state, CarrierState::Pinned);

    scheduler.notifier().notify(&key);
    assert_eq!(pinned.join(), Err(JoinError::Cancelled));
    assert!(!resumed.load(Ordering::SeqCst));
    assert!(!lock.is_locked());

    // The carrier is free for the next Task
    let next = scheduler.submit(|_cx| async { Ok::<_, TaskFailure>(7) }).unwrap();
    assert_eq!(next.join(), Ok(7));
    assert_eq!(scheduler.stats().cancelled, 1);
}

#[test]
fn test_shutdown_releases_pinned_carrier() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let lock = Arc::new(HostileLock::new(()));

    let pinned = {
        let lock = lock.clone();
        scheduler
            .submit(move |cx| async move {
                let _guard = lock.lock(&cx);
                cx.wait_for(WaitKey::resource("never-fires")).await;
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    assert!(wait_until(Duration::from_secs(1), || {
        scheduler.carriers()[0].state == CarrierState::Pinned
    }));
    let open = scheduler.list_pinning_events(SystemTime::UNIX_EPOCH);
    assert_eq!(open.len(), 1);
    assert!(open[0].in_progress);

    let start = Instant::now();
    assert!(!scheduler.shutdown_timeout(Duration::from_millis(20)));
    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());

    assert_eq!(pinned.join(), Err(JoinError::Cancelled));
    assert!(!lock.is_locked());
    assert_eq!(scheduler.task_count(), 0);
    let closed = scheduler.list_pinning_events(SystemTime::UNIX_EPOCH);
    assert_eq!(closed.len(), 1);
    assert!(!closed[0].in_progress);
}

#[test]
fn test_cancel_waiting_task() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let key = WaitKey::resource("socket:9:readable");
    let notifier = scheduler.notifier();

    let waiting = {
        let key = key.clone();
        scheduler
            .submit(move |cx| async move {
                cx.wait_for(key).await;
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    assert!(wait_until(Duration::from_secs(1), || {
        waiting.status() == TaskStatus::UnmountedWaiting
    }));
    assert!(notifier.has_waiters(&key));

    assert!(waiting.cancel());
    assert_eq!(waiting.join(), Err(JoinError::Cancelled));
    assert!(!notifier.has_waiters(&key));
    assert_eq!(notifier.notify(&key), 0);
}

#[test]
fn test_cancel_running_task_at_next_blocking_call() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let (running_tx, running_rx) = channel::bounded(1);
    let reached = Arc::new(AtomicBool::new(false));

    let handle = {
        let reached = reached.clone();
        scheduler
            .submit(move |cx| async move {
                running_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                assert!(cx.is_cancelled());
                cx.sleep(Duration::from_millis(10)).await;
                reached.store(true, Ordering::SeqCst);
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    running_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(scheduler.cancel(handle.id()));

    assert_eq!(handle.join(), Err(JoinError::Cancelled));
    assert!(!reached.load(Ordering::SeqCst));
}

#[test]
fn test_notifier_wakes_waiting_task() {
    let scheduler = started(SchedulerConfig::with_carriers(2));
    let notifier = scheduler.notifier();
    let key = WaitKey::resource("socket:7:readable");

    let handle = {
        let key = key.clone();
        scheduler
            .submit(move |cx| async move {
                cx.wait_for(key).await;
                Ok::<_, TaskFailure>("readable")
            })
            .unwrap()
    };

    assert!(wait_until(Duration::from_secs(1), || {
        handle.status() == TaskStatus::UnmountedWaiting
    }));
    assert!(notifier.has_waiters(&key));
    let waiting = scheduler.list_tasks();
    assert_eq!(waiting[0].waiting_on, Some(key.clone()));

    assert_eq!(notifier.notify(&key), 1);
    assert_eq!(handle.join(), Ok("readable"));
}

#[test]
fn test_join_from_inside_task() {
    let scheduler = started(SchedulerConfig::with_carriers(1));

    let inner = scheduler
        .submit(|cx| async move {
            cx.sleep(Duration::from_millis(20)).await;
            Ok::<_, TaskFailure>(20)
        })
        .unwrap();
    let outer = scheduler
        .submit(move |cx| async move {
            let value = cx.join(inner).await?;
            Ok::<_, TaskFailure>(value + 1)
        })
        .unwrap();

    assert_eq!(outer.join(), Ok(21));
}

#[test]
fn test_join_failed_task_propagates_failure() {
    let scheduler = started(SchedulerConfig::with_carriers(2));

    let failing = scheduler
        .submit(|_cx| async { Err::<u32, _>(TaskFailure::error("upstream timeout")) })
        .unwrap();
    let outer = scheduler
        .submit(move |cx| async move {
            let value = cx.join(failing).await?;
            Ok::<_, TaskFailure>(value)
        })
        .unwrap();

    let err = outer.join().unwrap_err();
    assert_eq!(err.failure().unwrap().message(), "upstream timeout");
}

#[test]
fn test_file_io_runs_offloaded() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.txt");

    let handle = scheduler
        .submit(move |cx| async move {
            let write_path = path.clone();
            cx.file_io(move || std::fs::write(write_path, b"hello weft")).await?;
            let thread_name = cx
                .file_io(|| thread::current().name().map(str::to_string))
                .await;
            let body = cx.file_io(move || std::fs::read_to_string(path)).await?;
            Ok::<_, TaskFailure>((body, thread_name))
        })
        .unwrap();

    let (body, thread_name) = handle.join().unwrap();
    assert_eq!(body, "hello weft");
    assert!(thread_name.unwrap().starts_with("weft-io-"));
}

#[test]
fn test_offload_panic_fails_task() {
    let scheduler = started(SchedulerConfig::with_carriers(1));

    let handle = scheduler
        .submit(|cx| async move {
            let n: u32 = cx.network_io(|| panic!("connection reset")).await;
            Ok::<_, TaskFailure>(n)
        })
        .unwrap();

    let err = handle.join().unwrap_err();
    let failure = err.failure().unwrap();
    assert!(failure.is_panic());
    assert_eq!(failure.message(), "connection reset");
}

#[test]
fn test_hostile_lock_contention_recorded() {
    let scheduler = started(SchedulerConfig::with_carriers(2));
    let lock = Arc::new(HostileLock::new(0u32));
    let (locked_tx, locked_rx) = channel::bounded(1);

    let holder = {
        let lock = lock.clone();
        scheduler
            .submit(move |cx| async move {
                let mut guard = lock.lock(&cx);
                locked_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(60));
                *guard += 1;
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    locked_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let contender = {
        let lock = lock.clone();
        scheduler
            .submit_named("contender", move |cx| async move {
                let mut guard = lock.lock(&cx);
                *guard += 1;
                Ok::<_, TaskFailure>(*guard)
            })
            .unwrap()
    };

    holder.join().unwrap();
    assert_eq!(contender.join(), Ok(2));

    let events = scheduler.list_pinning_events(SystemTime::UNIX_EPOCH);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, PinReason::LockContention);
    assert_eq!(events[0].task_name.as_deref(), Some("contender"));
}

#[test]
fn test_friendly_lock_handoff_between_tasks() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let lock = Arc::new(FriendlyLock::new(Vec::new()));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let lock = lock.clone();
            scheduler
                .submit(move |cx| async move {
                    let mut guard = lock.lock(&cx).await;
                    cx.sleep(Duration::from_millis(10)).await;
                    guard.push(i);
                    Ok::<_, TaskFailure>(())
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*lock.lock_blocking(), vec![0, 1, 2]);
    assert!(!lock.is_locked());
    assert!(scheduler.list_pinning_events(SystemTime::UNIX_EPOCH).is_empty());
}

#[test]
fn test_health_check_reports_stalled_carrier() {
    let mut config = SchedulerConfig::with_carriers(1);
    config.pinned_check_interval_ms = 10;
    config.pinned_stall_threshold_ms = 30;
    let scheduler = started(config);
    let lock = Arc::new(HostileLock::new(()));
    let (locked_tx, locked_rx) = channel::bounded(1);

    let pinned = {
        let lock = lock.clone();
        scheduler
            .submit(move |cx| async move {
                let _guard = lock.lock(&cx);
                locked_tx.send(()).unwrap();
                cx.sleep(Duration::from_millis(150)).await;
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
    };
    locked_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let queued = scheduler
        .submit(|_cx| async { Ok::<_, TaskFailure>(()) })
        .unwrap();

    pinned.join().unwrap();
    queued.join().unwrap();
    assert_eq!(scheduler.stats().carrier_stalls, 1);
}

#[test]
fn test_pinning_events_filtered_by_time() {
    let scheduler = started(SchedulerConfig::with_carriers(1));
    let lock = Arc::new(HostileLock::new(()));

    let run_pinned = |lock: Arc<HostileLock<()>>| {
        scheduler
            .submit(move |cx| async move {
                let _guard = lock.lock(&cx);
                cx.sleep(Duration::from_millis(5)).await;
                Ok::<_, TaskFailure>(())
            })
            .unwrap()
            .join()
            .unwrap();
    };

    run_pinned(lock.clone());
    thread::sleep(Duration::from_millis(20));
    let checkpoint = SystemTime::now();
    run_pinned(lock.clone());

    assert_eq!(scheduler.list_pinning_events(SystemTime::UNIX_EPOCH).len(), 2);
    let recent = scheduler.list_pinning_events(checkpoint);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].seq, 1);
}

#[test]
fn test_many_tasks_complete() {
    let scheduler = started(SchedulerConfig::with_carriers(4));
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let counter = counter.clone();
            scheduler
                .submit(move |cx| async move {
                    cx.sleep(Duration::from_millis(1)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TaskFailure>(())
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 200);
    assert!(scheduler.wait_all(Duration::from_secs(1)));
    assert_eq!(scheduler.task_count(), 0);
    assert!(scheduler.shutdown());
}
