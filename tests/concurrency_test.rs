//! # 并发与对账测试
//!
//! - 同一模块同一时刻最多一个迁移（Fail / Queue 两种冲突策略）
//! - 外部迁移对账与批量对账
//! - 监听器失败不影响迁移结果

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bundle_core::module::Direction;
use bundle_core::{
    CoreConfig, CoreError, ModuleId, ModuleManager, ModuleManifest, ModuleState,
    PreferenceProviderTable, Requirement, ScriptedScheduler, Transition, TransitionEventKind,
    TransitionScheduler, WorkspaceUnit,
};

// ============================================================================
// 测试辅助
// ============================================================================

async fn manager_with(config: CoreConfig, scheduler: Arc<dyn TransitionScheduler>) -> ModuleManager {
    let manager =
        ModuleManager::from_config(&config, &PreferenceProviderTable::with_builtins(), scheduler)
            .unwrap();
    for name in ["alpha", "beta", "gamma"] {
        manager
            .register_unit(
                WorkspaceUnit::new(name, format!("/ws/{}", name)),
                ModuleManifest::new(name),
            )
            .await
            .unwrap();
    }
    manager
}

fn seeds(name: &str) -> Vec<ModuleId> {
    vec![name.to_string()]
}

async fn install(manager: &ModuleManager, name: &str) {
    let report = manager
        .request_transition(&seeds(name), Transition::Install)
        .await
        .unwrap();
    assert!(report.succeeded());
}

// ============================================================================
// 冲突策略
// ============================================================================

#[tokio::test]
async fn test_conflicting_request_fails_fast() {
    let scheduler = ScriptedScheduler::new().with_delay(Duration::from_millis(200));
    let manager = manager_with(CoreConfig::default(), Arc::new(scheduler)).await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_transition(&seeds("alpha"), Transition::Install)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.state_machine().is_changing("alpha").await);

    let err = manager
        .request_transition(&seeds("alpha"), Transition::Install)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::TransitionInProgress {
            in_flight: Some(Transition::Install),
            ..
        }
    ));

    let report = first.await.unwrap().unwrap();
    assert!(report.succeeded());
    assert_eq!(
        manager.state_machine().state_of("alpha").await.unwrap(),
        ModuleState::Installed
    );
}

#[tokio::test]
async fn test_reconcile_rejected_while_in_flight() {
    let scheduler = ScriptedScheduler::new().with_delay(Duration::from_millis(200));
    let manager = manager_with(CoreConfig::default(), Arc::new(scheduler)).await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_transition(&seeds("beta"), Transition::Install)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = manager
        .reconcile("beta", ModuleState::Uninstalled)
        .await
        .unwrap_err();
    assert!(err.is_rejection());

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_queued_reconcile_applies_after_commit() {
    let config = CoreConfig::builder().queue_on_conflict(true).build();
    let scheduler = ScriptedScheduler::new().with_delay(Duration::from_millis(100));
    let manager = manager_with(config, Arc::new(scheduler)).await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_transition(&seeds("gamma"), Transition::Install)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 排队等待 Install 提交后再执行
    let reconciled = manager
        .reconcile("gamma", ModuleState::Uninstalled)
        .await
        .unwrap()
        .unwrap();
    let report = first.await.unwrap().unwrap();

    let committed = &report.events[0];
    assert_eq!(committed.kind, TransitionEventKind::Committed);
    assert_eq!(reconciled.kind, TransitionEventKind::Reconciled);
    assert_eq!(reconciled.from_state, ModuleState::Installed);
    assert!(reconciled.sequence > committed.sequence);

    let module = manager.registry().lookup("gamma").await.unwrap();
    assert_eq!(module.state, ModuleState::Uninstalled);
    assert_eq!(module.current_transition, Some(Transition::External));
    assert!(!module.state_changing);
}

#[tokio::test]
async fn test_independent_modules_do_not_block() {
    let scheduler = ScriptedScheduler::new().with_delay(Duration::from_millis(50));
    let manager = manager_with(CoreConfig::default(), Arc::new(scheduler)).await;

    let tasks: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|name| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_transition(&seeds(name), Transition::Install)
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().unwrap().succeeded());
    }
    assert_eq!(
        manager
            .registry()
            .find_by_state(ModuleState::Installed)
            .await
            .len(),
        3
    );
}

#[tokio::test]
async fn test_cancelled_transition_rolls_back() {
    let scheduler = ScriptedScheduler::new().with_delay(Duration::from_millis(200));
    let manager = manager_with(CoreConfig::default(), Arc::new(scheduler)).await;

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    manager.notifier().subscribe("recorder", move |event| {
        sink.lock().unwrap().push(event.kind.clone());
        Ok(())
    });

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        manager.request_transition(&seeds("alpha"), Transition::Install),
    )
    .await;
    assert!(timed_out.is_err());

    let module = manager.registry().lookup("alpha").await.unwrap();
    assert_eq!(module.state, ModuleState::Uninstalled);
    assert!(!module.state_changing);
    assert_eq!(module.current_transition, None);
    assert_eq!(*kinds.lock().unwrap(), vec![TransitionEventKind::Aborted]);

    // 迁移锁已释放，模块可以再次迁移或取消注册
    install(&manager, "alpha").await;
    manager.unregister("alpha").await.unwrap();
}

// ============================================================================
// 注册与依赖图
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_keeps_graph_in_sync() {
    for round in 0..10 {
        let manager = ModuleManager::with_defaults();
        for i in 0..20 {
            manager
                .register_external(ModuleManifest::new(format!("x{}", i)))
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for i in 0..20 {
            let remover = manager.clone();
            tasks.push(tokio::spawn(async move {
                remover.unregister(&format!("x{}", i)).await.map(|_| ())
            }));
            let adder = manager.clone();
            tasks.push(tokio::spawn(async move {
                adder
                    .register_external(
                        ModuleManifest::new(format!("z{}", i))
                            .requires(Requirement::new(format!("x{}", i))),
                    )
                    .await
                    .map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let graph = manager.graph_snapshot().await;
        let mut registered: Vec<ModuleId> =
            manager.registry().all().await.iter().map(|m| m.id()).collect();
        registered.sort();
        let mut nodes = graph.all_modules();
        nodes.sort();
        assert_eq!(nodes, registered, "round {}", round);

        for id in &registered {
            assert!(
                graph.neighbors(id, Direction::Providing).is_empty(),
                "round {}: {} still bound to a removed provider",
                round,
                id
            );
        }
    }
}

// ============================================================================
// 对账
// ============================================================================

#[tokio::test]
async fn test_reconcile_batch() {
    let manager = manager_with(
        CoreConfig::default(),
        Arc::new(ScriptedScheduler::new()),
    )
    .await;
    install(&manager, "alpha").await;
    install(&manager, "beta").await;

    let results = manager
        .reconcile_batch(vec![
            ("alpha".to_string(), ModuleState::Resolved),
            ("beta".to_string(), ModuleState::Installed),
            ("missing".to_string(), ModuleState::Active),
        ])
        .await;

    assert_eq!(results.len(), 3);
    let alpha = results[0].as_ref().unwrap().as_ref().unwrap();
    assert_eq!(alpha.to_state, ModuleState::Resolved);
    assert!(alpha.is_committed());
    // 状态一致，无事件
    assert!(results[1].as_ref().unwrap().is_none());
    assert!(matches!(results[2], Err(CoreError::ModuleNotFound(_))));
}

// ============================================================================
// 通知
// ============================================================================

#[tokio::test]
async fn test_listener_failures_do_not_affect_transition() {
    let manager = manager_with(
        CoreConfig::default(),
        Arc::new(ScriptedScheduler::new()),
    )
    .await;

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let notifier = manager.notifier();
    notifier.subscribe("refuses", |_| Err("拒绝处理".to_string()));
    notifier.subscribe("panics", |_| panic!("监听器崩溃"));
    notifier.subscribe("counts", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let report = manager
        .request_transition(&seeds("alpha"), Transition::Install)
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.events.len(), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    let stats = notifier.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn test_unsubscribed_listener_not_called() {
    let manager = manager_with(
        CoreConfig::default(),
        Arc::new(ScriptedScheduler::new()),
    )
    .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = manager.notifier().subscribe("once", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    install(&manager, "alpha").await;
    manager.notifier().unsubscribe(id).unwrap();
    install(&manager, "beta").await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(manager.notifier().unsubscribe(id).is_err());
}
