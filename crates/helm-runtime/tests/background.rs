//! Background agents running real prompts through the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use helm_core::ids::SessionId;
use helm_core::messages::TokenUsage;
use helm_events::sqlite::{ConnectionConfig, new_file, new_in_memory};
use helm_events::{BusEvent, EventBus, MemoryStore};
use helm_llm::testing::{Script, ScriptedProvider, text_reply};
use helm_llm::{FinishReason, ModelInfo, ProviderRegistry, StreamEvent};
use helm_runtime::{BackgroundAgentManager, Orchestrator, RuntimeDeps, RuntimeError, SpawnRequest};
use helm_settings::HelmSettings;
use helm_tasks::{NewTask, TaskStatus, TaskStore};

const TIMEOUT_MS: u64 = 5_000;

fn manager(scripts: Vec<Script>, store: TaskStore, max_concurrent: usize) -> (Arc<BackgroundAgentManager>, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::with_scripts("test", scripts));
    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone(), vec![ModelInfo::new("test", "m", 100_000, 4_000)]);
    let mut settings = HelmSettings::default();
    settings.model.provider_id = "test".into();
    settings.model.model_id = "m".into();
    settings.background.max_concurrent_tasks = max_concurrent;
    settings.background.poll_interval_ms = 5;
    let deps = RuntimeDeps::new(Arc::new(MemoryStore::new()), Arc::new(EventBus::new()), Arc::new(providers));
    let orchestrator = Arc::new(Orchestrator::new(deps, settings));
    (BackgroundAgentManager::new(orchestrator, store), provider)
}

fn memory_store() -> TaskStore {
    TaskStore::open(new_in_memory(&ConnectionConfig::default()).unwrap()).unwrap()
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn cancelling_a_running_task_starts_the_highest_priority_queued_one() {
    let (manager, provider) = manager(
        vec![
            Script::Hang(vec![]),
            Script::Hang(vec![]),
            Script::Respond(text_reply("from d", TokenUsage::default())),
            Script::Hang(vec![]),
        ],
        memory_store(),
        2,
    );
    manager.init().unwrap();
    let parent = SessionId::new();
    let spawn = |name: &str, priority: i64| {
        manager
            .spawn(SpawnRequest::new(parent.clone(), "build", name).with_priority(priority))
            .unwrap()
    };
    let a = spawn("a", 0);
    let b = spawn("b", 0);
    let c = spawn("c", 1);
    let d = spawn("d", 5);

    wait_until(|| provider.request_count() == 2).await;
    assert_eq!(manager.list(Some(TaskStatus::Running)).unwrap().len(), 2);
    assert_eq!(manager.list(Some(TaskStatus::Queued)).unwrap().len(), 2);

    // The freed slot goes to d (priority 5) before c (priority 1).
    assert!(manager.cancel(&a.id).unwrap());
    assert_eq!(manager.await_result(&d.id, TIMEOUT_MS).await.unwrap(), "from d");
    assert_matches!(
        manager.await_result(&a.id, TIMEOUT_MS).await,
        Err(RuntimeError::TaskCancelled { .. })
    );

    // d finishing frees its slot for c.
    wait_until(|| provider.request_count() == 4).await;
    let running: Vec<_> = manager
        .list(Some(TaskStatus::Running))
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(running.len(), 2);
    assert!(running.contains(&b.id) && running.contains(&c.id));
    assert!(manager.list(Some(TaskStatus::Queued)).unwrap().is_empty());

    assert!(manager.cancel(&b.id).unwrap());
    assert!(manager.cancel(&c.id).unwrap());
    assert_matches!(
        manager.await_result(&c.id, TIMEOUT_MS).await,
        Err(RuntimeError::TaskCancelled { .. })
    );
    wait_until(|| manager.scheduler().running_count() == 0).await;
}

#[tokio::test]
async fn token_budget_overrun_is_a_cancellation() {
    let usage = TokenUsage {
        input: 700,
        output: 500,
        ..TokenUsage::default()
    };
    let (manager, _) = manager(vec![Script::Respond(text_reply("too much", usage))], memory_store(), 3);
    manager.init().unwrap();
    let mut rx = manager.orchestrator().bus().subscribe();
    let task = manager
        .spawn(SpawnRequest::new(SessionId::new(), "build", "go").with_token_budget(1_000))
        .unwrap();

    assert_matches!(
        manager.await_result(&task.id, TIMEOUT_MS).await,
        Err(RuntimeError::TaskCancelled { .. })
    );
    let task = manager.get(&task.id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.tokens_used, 1_200);

    let mut progress = None;
    let mut cancelled = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            BusEvent::BackgroundProgress { tokens_used, token_budget, .. } => progress = Some((tokens_used, token_budget)),
            BusEvent::BackgroundCancelled { .. } => cancelled = true,
            BusEvent::BackgroundFailed { .. } => panic!("budget overrun must not fail the task"),
            _ => {}
        }
    }
    assert_eq!(progress, Some((1_200, 1_000)));
    assert!(cancelled);
}

#[tokio::test]
async fn budget_is_enforced_when_the_watcher_lags_behind_the_bus() {
    let mut events = vec![
        StreamEvent::Start,
        StreamEvent::StartStep,
        StreamEvent::TextStart { id: "t0".into() },
    ];
    events.extend((0..2_000).map(|_| StreamEvent::TextDelta {
        id: "t0".into(),
        delta: "x".into(),
    }));
    events.extend([
        StreamEvent::TextEnd { id: "t0".into() },
        StreamEvent::FinishStep {
            usage: TokenUsage {
                input: 700,
                output: 500,
                ..TokenUsage::default()
            },
            finish_reason: FinishReason::Stop,
        },
        StreamEvent::Finish {
            finish_reason: FinishReason::Stop,
        },
    ]);
    let (manager, _) = manager(vec![Script::Respond(events)], memory_store(), 3);
    manager.init().unwrap();
    let task = manager
        .spawn(SpawnRequest::new(SessionId::new(), "build", "go").with_token_budget(1_000))
        .unwrap();

    assert_matches!(
        manager.await_result(&task.id, TIMEOUT_MS).await,
        Err(RuntimeError::TaskCancelled { reason, .. }) if reason.contains("budget")
    );
    let task = manager.get(&task.id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.tokens_used, 1_200);
}

#[tokio::test]
async fn tasks_running_at_restart_are_failed_not_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("helm.db");
    let id = {
        let store = TaskStore::open(new_file(&path, &ConnectionConfig::default()).unwrap()).unwrap();
        let _ = store
            .enqueue(&NewTask {
                parent_session_id: SessionId::new(),
                agent: "build".into(),
                prompt: "long job".into(),
                description: "long job".into(),
                priority: 0,
                token_budget: 1_000,
            })
            .unwrap();
        store.claim_next(1).unwrap().unwrap().id
    };

    let store = TaskStore::open(new_file(&path, &ConnectionConfig::default()).unwrap()).unwrap();
    let (manager, provider) = manager(vec![], store, 3);
    let mut rx = manager.orchestrator().bus().subscribe();
    manager.init().unwrap();

    let task = manager.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("interrupted"));
    assert_matches!(rx.try_recv(), Ok(BusEvent::BackgroundFailed { task_id, .. }) if task_id == id);
    assert_matches!(
        manager.await_result(&id, TIMEOUT_MS).await,
        Err(RuntimeError::TaskFailed { message, .. }) if message.contains("interrupted")
    );
    assert_eq!(provider.request_count(), 0);
    assert_eq!(manager.cleanup().unwrap(), 0);
}

#[tokio::test]
async fn failed_prompts_fail_the_task() {
    let (manager, _) = manager(
        vec![Script::Reject(helm_llm::ProviderError::Auth {
            message: "bad key".into(),
        })],
        memory_store(),
        3,
    );
    manager.init().unwrap();
    let task = manager.spawn(SpawnRequest::new(SessionId::new(), "build", "go")).unwrap();
    assert_matches!(
        manager.await_result(&task.id, TIMEOUT_MS).await,
        Err(RuntimeError::TaskFailed { message, .. }) if message.contains("bad key")
    );
}
