use std::sync::Arc;
use std::time::Duration;

use mjlink_core::{Config, Paths};
use mjlink_scheduler::{
    action_work, task_work, ActionRequest, LogDelivery, QueueSettings, RemoteDelivery, TaskKind,
    TaskQueue, TaskSubmission,
};
use serde_json::json;
use tokio::sync::broadcast;

/// Push `count` synthetic tasks through a queue configured from `tasks.*`.
pub async fn demo(count: usize, work_ms: u64) -> anyhow::Result<()> {
    let config = Config::load_or_default(&Paths::new())?;
    let settings = QueueSettings::from_config(&config.tasks);
    let queue = TaskQueue::new(settings.clone(), Arc::new(LogDelivery));

    println!();
    println!(
        "📋 Task queue demo: {} tasks, concurrency {}, timeout {:?}",
        count, settings.concurrency, settings.timeout
    );
    println!();

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let submission = TaskSubmission {
            id: None,
            user_id: "demo".to_string(),
            kind: TaskKind::Imagine,
            data: json!({ "prompt": format!("demo task {}", i + 1) }),
        };
        let work = task_work(move |progress| async move {
            for stage in ["25%", "50%", "75%"] {
                tokio::time::sleep(Duration::from_millis(work_ms / 4)).await;
                progress.report(json!({ "stage": stage }));
            }
            tokio::time::sleep(Duration::from_millis(work_ms / 4)).await;
            Ok::<_, mjlink_core::Error>(json!({ "stage": "done" }))
        });
        let ack = queue.submit_request(submission, work);
        ids.push(ack.id);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner = tokio::spawn(queue.clone().run_loop(shutdown_rx));

    while !queue.is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let _ = shutdown_tx.send(());
    runner.await?;

    println!();
    println!("✅ {} tasks settled", ids.len());
    Ok(())
}

/// Queue one component click against the live gateway and print every task
/// event until it settles.
pub async fn action(request: ActionRequest) -> anyhow::Result<()> {
    let config = Config::load_or_default(&Paths::new())?;
    let engine = Arc::new(super::connect().await?);
    let (delivery, mut events) = RemoteDelivery::channel();
    let queue = TaskQueue::new(QueueSettings::from_config(&config.tasks), delivery);

    let submission = TaskSubmission {
        id: None,
        user_id: "cli".to_string(),
        kind: request.kind(),
        data: json!({
            "messageId": request.message_id,
            "customId": request.custom_id,
            "flags": request.flags,
            "prompt": request.prompt,
        }),
    };
    let ack = queue.submit_request(submission, action_work(engine.clone(), request));
    println!("📋 Task {} queued", ack.id);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner = tokio::spawn(queue.clone().run_loop(shutdown_rx));

    while let Some(event) = events.recv().await {
        println!("  {} {}", event.status, event.msg);
        if event.status.is_terminal() {
            break;
        }
    }
    let _ = shutdown_tx.send(());
    runner.await?;
    engine.close().await;
    Ok(())
}
