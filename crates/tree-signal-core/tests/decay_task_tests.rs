use std::time::Duration;
use tree_signal_core::prelude::*;
use tree_signal_test_utils::*;

#[tokio::test(start_paused = true)]
async fn background_task_prunes_and_stops_cleanly() {
    let mut config = TreeSignalConfig::new();
    config.cleanup.interval_seconds = 1.0;
    let (service, clock) = setup_service_with(config);
    service.submit("a.b", "x", MessageSeverity::Info).unwrap();

    let mut updates = service.subscribe();
    let task = service.start_decay_task();

    clock.set(at(45.0));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(service.is_empty());
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().reason, UpdateReason::Tick);

    let ticks = task.stop().await;
    assert!(ticks >= 2, "ran {ticks} ticks");
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_every_mutation_kind() {
    let (service, _) = setup_service();
    let mut updates = service.subscribe();

    service.submit("a", "x", MessageSeverity::Info).unwrap();
    updates.changed().await.unwrap();
    assert_eq!(updates.borrow_and_update().reason, UpdateReason::Message);

    service.lock("a", true).unwrap();
    updates.changed().await.unwrap();
    assert_eq!(updates.borrow_and_update().reason, UpdateReason::Lock);

    service.delete("a").unwrap();
    updates.changed().await.unwrap();
    let latest = updates.borrow_and_update().clone();
    assert_eq!(latest.reason, UpdateReason::Delete);
    assert!(latest.frames.is_empty());
    assert_eq!(latest.sequence, 3);
}

#[tokio::test(start_paused = true)]
async fn dropping_shutdown_sender_ends_task() {
    let (service, _) = setup_service();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let join = service.spawn_decay_task(Duration::from_millis(500), rx);

    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(tx);
    let ticks = join.await.unwrap();
    assert!(ticks >= 4);
}

#[tokio::test]
async fn concurrent_submitters_and_ticks_agree() {
    let (service, _) = setup_service();
    let mut handles = Vec::new();
    for worker in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let channel = format!("w{worker}.c{}", i % 5);
                service.submit(&channel, "x", MessageSeverity::Info).unwrap();
                if i % 10 == 0 {
                    service.tick();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 8 workers, each with itself plus 5 channels
    assert_eq!(service.len(), 48);
    let layout = service.current_layout();
    assert_eq!(layout.frames.len(), 48);
    assert_tiles_canvas(&layout.frames);
}
