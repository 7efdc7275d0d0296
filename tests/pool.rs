//! Execution pool integration tests: ordering, capacity, timeouts, and
//! health-driven recovery, all without real processors.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_engine::pool::{start_pool, BlendedLoad, Priority, UnitKind, WorkKind};
use cadence_engine::{Engine, Error, LoopbackFactory};

use common::{fast_config, HangProcessor, PanicProcessor, Recorder, RecordingProcessor, SharedFactory};

#[tokio::test]
async fn equal_priority_dispatches_in_submission_order() {
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(SharedFactory(Arc::new(RecordingProcessor {
        recorder: Arc::clone(&recorder),
        delay: Duration::from_millis(10),
    })));
    let config = fast_config(vec![(UnitKind::General, 1)], 32);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for seq in 0..5i64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.submit(
                WorkKind::Inference,
                serde_json::json!({ "seq": seq }),
                Priority::Normal,
                None,
            )
            .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }

    assert_eq!(*recorder.order.lock().await, vec![0, 1, 2, 3, 4]);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn critical_task_jumps_queued_normals() {
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(SharedFactory(Arc::new(RecordingProcessor {
        recorder: Arc::clone(&recorder),
        delay: Duration::from_millis(80),
    })));
    let config = fast_config(vec![(UnitKind::General, 1)], 32);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    // Occupy the single unit, then queue five normals behind it
    let mut handles = Vec::new();
    for seq in 0..6i64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.submit(
                WorkKind::Inference,
                serde_json::json!({ "seq": seq }),
                Priority::Normal,
                None,
            )
            .await
        }));
        // First submission gets a head start so it is already assigned
        if seq == 0 {
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let critical = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.submit(
                WorkKind::Inference,
                serde_json::json!({ "seq": 99 }),
                Priority::Critical,
                None,
            )
            .await
        })
    };

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }
    assert!(critical.await.unwrap().unwrap().success);

    let order = recorder.order.lock().await.clone();
    assert_eq!(order[0], 0, "first task was already running");
    let critical_pos = order.iter().position(|&s| s == 99).unwrap();
    assert_eq!(
        critical_pos, 1,
        "critical must run before every queued normal: {order:?}"
    );
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn no_unit_runs_two_tasks_concurrently() {
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(SharedFactory(Arc::new(RecordingProcessor {
        recorder: Arc::clone(&recorder),
        delay: Duration::from_millis(20),
    })));
    let config = fast_config(vec![(UnitKind::General, 2)], 64);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for seq in 0..20i64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.submit(
                WorkKind::EdgeProcessing,
                serde_json::json!({ "seq": seq }),
                Priority::Normal,
                None,
            )
            .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }

    assert!(
        recorder.max_active() <= 2,
        "occupancy exceeded unit count: {}",
        recorder.max_active()
    );
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn two_units_three_tasks_queues_the_third() {
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(SharedFactory(Arc::new(RecordingProcessor {
        recorder: Arc::clone(&recorder),
        delay: Duration::from_millis(200),
    })));
    let config = fast_config(vec![(UnitKind::General, 2)], 32);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for seq in 0..3i64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.submit(
                WorkKind::AudioAnalysis,
                serde_json::json!({ "seq": seq }),
                Priority::Normal,
                None,
            )
            .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(recorder.active(), 2, "both units busy");
    let metrics = pool.metrics().await.unwrap();
    assert_eq!(metrics.queue_depth, 1, "third task held in queue");

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn submissions_beyond_queue_bound_fail_immediately() {
    let factory = Arc::new(SharedFactory(Arc::new(HangProcessor)));
    let config = fast_config(vec![(UnitKind::General, 1)], 2);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    // One task occupies the unit, two fill the queue
    let mut background = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        background.push(tokio::spawn(async move {
            pool.submit(
                WorkKind::Inference,
                serde_json::json!({}),
                Priority::Normal,
                Some(Duration::from_millis(600)),
            )
            .await
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let started = Instant::now();
    let err = pool
        .submit(
            WorkKind::Inference,
            serde_json::json!({}),
            Priority::Normal,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { .. }), "got {err}");
    assert!(
        started.elapsed() < Duration::from_millis(100),
        "rejection must not block"
    );

    for handle in background {
        // The hung tasks resolve by timeout
        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::Timeout { .. })
        ));
    }
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn timeout_resolves_within_one_tick_of_deadline() {
    let factory = Arc::new(SharedFactory(Arc::new(HangProcessor)));
    let config = fast_config(vec![(UnitKind::General, 1)], 8);
    let tick = Duration::from_millis(config.pool.dispatch_interval_ms);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let err = pool
        .submit(
            WorkKind::Inference,
            serde_json::json!({}),
            Priority::Normal,
            Some(timeout),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout { .. }), "got {err}");
    assert!(elapsed >= timeout, "resolved before deadline: {elapsed:?}");
    assert!(
        elapsed <= timeout + tick + Duration::from_millis(100),
        "resolved too long after deadline: {elapsed:?}"
    );
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn dead_unit_is_replaced_and_task_requeued_once() {
    let factory = Arc::new(SharedFactory(Arc::new(PanicProcessor)));
    let config = fast_config(vec![(UnitKind::General, 1)], 8);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    let before: Vec<_> = pool
        .unit_status()
        .await
        .unwrap()
        .iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(before.len(), 1);

    // The unit dies on the first attempt, the replacement dies on the
    // requeued attempt, and the task resolves as failed rather than
    // looping forever
    let result = pool
        .submit(
            WorkKind::Inference,
            serde_json::json!({}),
            Priority::Normal,
            Some(Duration::from_secs(4)),
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("unit failed"));

    let after: Vec<_> = pool
        .unit_status()
        .await
        .unwrap()
        .iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(after.len(), 1, "pool size maintained through replacement");
    assert_ne!(before[0], after[0], "unhealthy unit must be replaced");

    let metrics = pool.metrics().await.unwrap();
    assert_eq!(metrics.failed, 1);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn incompatible_work_never_dispatches() {
    let factory = Arc::new(LoopbackFactory);
    let config = fast_config(vec![(UnitKind::Transcription, 1)], 8);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    // Synthesis work cannot run on a transcription unit; with no general
    // unit available the task waits out its deadline
    let err = pool
        .submit(
            WorkKind::Synthesis,
            serde_json::json!({}),
            Priority::High,
            Some(Duration::from_millis(150)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got {err}");
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn engine_round_trip_with_metrics() {
    let config = fast_config(vec![(UnitKind::General, 2), (UnitKind::AudioDsp, 1)], 16);
    let engine = Engine::start(config, Arc::new(LoopbackFactory)).await.unwrap();

    let result = engine
        .submit(
            WorkKind::NoiseReduction,
            serde_json::json!({ "gain": 0.5 }),
            Priority::High,
            None,
        )
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.payload.unwrap()["gain"], 0.5);
    assert!(result.unit_id.is_some());

    let units = engine.unit_status().await.unwrap();
    assert_eq!(units.len(), 3);

    let metrics = engine.metrics().await.unwrap();
    assert_eq!(metrics.submitted, 1);
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.failed, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_resolves_outstanding_submissions() {
    let factory = Arc::new(SharedFactory(Arc::new(HangProcessor)));
    let config = fast_config(vec![(UnitKind::General, 1)], 8);
    let pool = start_pool(&config, factory, Box::new(BlendedLoad))
        .await
        .unwrap();

    let outstanding = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.submit(
                WorkKind::Inference,
                serde_json::json!({}),
                Priority::Normal,
                None,
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    pool.shutdown().await.unwrap();
    let err = outstanding.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Scheduler(_)), "got {err}");
}
