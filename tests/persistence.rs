use std::sync::{Arc, Mutex};

use resync::{
    processor_fn, ActionRecord, EngineConfig, ProcessError, ProcessorRegistry, StorageConfig,
    SyncEngine,
};
use tempfile::TempDir;

fn sled_config(dir: &TempDir, start_online: bool) -> EngineConfig {
    EngineConfig {
        start_online,
        storage: StorageConfig::Sled {
            data_dir: dir
                .path()
                .to_str()
                .expect("data dir path should be valid UTF-8")
                .to_string(),
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn queue_survives_restart_with_retry_state() {
    let tmp = TempDir::new().expect("tempdir");

    {
        let engine = SyncEngine::init(
            sled_config(&tmp, true),
            processor_fn(|record: ActionRecord| async move {
                if record.kind.as_str() == "budget.upsert" {
                    Err(ProcessError::transient("503 from budget service"))
                } else {
                    Ok(())
                }
            }),
        )
        .expect("first engine");

        engine.enqueue("budget.upsert", b"{\"month\":\"2026-10\"}".to_vec()).unwrap();
        engine.enqueue("task.complete", b"{\"task\":1}".to_vec()).unwrap();
        engine.enqueue("task.complete", b"{\"task\":2}".to_vec()).unwrap();

        let result = engine.drain().await;
        assert_eq!(result.synced_count, 2);
        assert_eq!(result.failed_count, 1);

        // enqueued offline after the pass
        engine.set_connectivity(false);
        engine.enqueue("task.undo", b"{\"task\":2}".to_vec()).unwrap();
        engine.dispose().await.expect("dispose");
    }

    let applied = Arc::new(Mutex::new(Vec::new()));
    let a = Arc::clone(&applied);
    let registry = ProcessorRegistry::new()
        .register(
            "budget.upsert",
            processor_fn({
                let a = Arc::clone(&a);
                move |record: ActionRecord| {
                    let a = Arc::clone(&a);
                    async move {
                        a.lock().unwrap().push((record.kind.to_string(), record.retry_count));
                        Ok(())
                    }
                }
            }),
        )
        .register(
            "task.undo",
            processor_fn(move |record: ActionRecord| {
                let a = Arc::clone(&a);
                async move {
                    a.lock().unwrap().push((record.kind.to_string(), record.retry_count));
                    Ok(())
                }
            }),
        );

    let engine = SyncEngine::init(sled_config(&tmp, false), registry).expect("second engine");
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].kind.as_str(), "budget.upsert");
    assert_eq!(snapshot[0].retry_count, 1);
    assert!(snapshot[0].last_error.as_deref().unwrap().contains("503"));
    assert_eq!(snapshot[1].kind.as_str(), "task.undo");
    assert!(snapshot[1].id > snapshot[0].id);

    let handle = engine.set_connectivity(true).expect("drain on reconnect");
    let result = handle.await.expect("drain task");
    assert_eq!(result.synced_count, 2);
    assert_eq!(
        *applied.lock().unwrap(),
        vec![("budget.upsert".to_string(), 1), ("task.undo".to_string(), 0)]
    );

    // ids keep increasing after the queue has been emptied
    let next = engine.enqueue("task.complete", Vec::new()).unwrap();
    assert!(next > snapshot[1].id);
    engine.dispose().await.expect("dispose");
}

#[tokio::test]
async fn dead_letters_are_not_persisted() {
    let tmp = TempDir::new().expect("tempdir");

    {
        let engine = SyncEngine::init(
            sled_config(&tmp, true),
            processor_fn(|_| async { Err(ProcessError::permanent("invalid payload")) }),
        )
        .expect("engine");
        engine.enqueue("task.complete", Vec::new()).unwrap();
        engine.drain().await;
        assert_eq!(engine.dead_letters().len(), 1);
        engine.dispose().await.expect("dispose");
    }

    let engine =
        SyncEngine::init(sled_config(&tmp, true), ProcessorRegistry::new()).expect("engine");
    assert_eq!(engine.size(), 0);
    assert!(engine.dead_letters().is_empty());
    engine.dispose().await.expect("dispose");
}

#[tokio::test]
async fn dispose_then_init_in_a_loop_reopens_the_same_store() {
    let tmp = TempDir::new().expect("tempdir");

    for round in 0..10usize {
        let engine = SyncEngine::init(sled_config(&tmp, false), ProcessorRegistry::new())
            .unwrap_or_else(|e| panic!("init in round {round}: {e}"));
        assert_eq!(engine.size(), round);
        engine.enqueue("task.complete", Vec::new()).unwrap();
        engine.dispose().await.expect("dispose");
    }
}
