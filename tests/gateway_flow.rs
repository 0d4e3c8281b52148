use std::time::Duration;

use extensions_bridge::{InboundKind, OutboundFrame, OutboundKind, ProtocolError};
use taskpilot::{AgentGateway, AppConfig, AppContext, GatewayError, SimulatedAgent};
use taskpilot_core_types::{ExecutionId, ExecutionStatus, Step, TaskDefinition, UserId, WorkerId};
use taskpilot_registry::WorkerRegistry;
use taskpilot_scheduler::TaskSource;
use taskpilot_state_center::ExecutionSummary;
use tokio::sync::mpsc::UnboundedReceiver;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler.settle_delay_ms = 10;
    config.scheduler.backoff_base_ms = 10;
    config.scheduler.backoff_max_ms = 40;
    config.bridge.max_frame_bytes = 4096;
    config
}

fn next(outbound: &mut UnboundedReceiver<OutboundFrame>) -> OutboundFrame {
    outbound.try_recv().expect("frame queued")
}

fn register(gateway: &AgentGateway, worker: &WorkerId, user: &str) {
    let text = format!(r#"{{"type":"REGISTER","data":{{"userId":"{user}","fingerprint":"fp-1"}}}}"#);
    assert_eq!(
        gateway.handle_text(worker, &text).unwrap(),
        InboundKind::Register
    );
}

async fn finished(app: &AppContext, id: &ExecutionId) -> ExecutionSummary {
    for _ in 0..2_000 {
        if let Some(summary) = app.state_center().execution(id) {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("execution {id} never finished");
}

#[tokio::test(start_paused = true)]
async fn register_is_acknowledged_and_session_recorded() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-1");

    let mut outbound = gateway.connect(worker.clone());
    let hello = next(&mut outbound);
    assert_eq!(hello.kind, OutboundKind::Connected);
    assert_eq!(hello.data["sessionId"], "w-1");

    register(&gateway, &worker, "alice");
    let ack = next(&mut outbound);
    assert_eq!(ack.kind, OutboundKind::Registered);
    assert_eq!(ack.data["status"], "success");

    let session = app.registry().session(&worker).unwrap();
    assert_eq!(session.user_id, UserId::from("alice"));
    assert_eq!(session.fingerprint.as_deref(), Some("fp-1"));
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn register_without_user_falls_back_to_anonymous() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-anon");
    let _outbound = gateway.connect(worker.clone());

    gateway
        .handle_text(&worker, r#"{"type":"REGISTER","data":{}}"#)
        .unwrap();
    let session = app.registry().session(&worker).unwrap();
    assert_eq!(session.user_id, UserId::anonymous());
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_and_page_info_update_the_session() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-2");
    let mut outbound = gateway.connect(worker.clone());
    register(&gateway, &worker, "alice");
    let _ = next(&mut outbound);
    let _ = next(&mut outbound);

    let before = app.registry().session(&worker).unwrap().last_heartbeat;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(
        gateway
            .handle_text(&worker, r#"{"type":"HEARTBEAT","data":{}}"#)
            .unwrap(),
        InboundKind::Heartbeat
    );
    assert_eq!(next(&mut outbound).kind, OutboundKind::HeartbeatAck);
    assert!(app.registry().session(&worker).unwrap().last_heartbeat >= before);

    gateway
        .handle_text(
            &worker,
            r#"{"type":"PAGE_INFO","data":{"url":"https://example.com/a","title":"A"}}"#,
        )
        .unwrap();
    let session = app.registry().session(&worker).unwrap();
    assert_eq!(session.current_url.as_deref(), Some("https://example.com/a"));
    assert_eq!(session.current_title.as_deref(), Some("A"));
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_and_oversized_frames_get_an_error_reply() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-3");
    let mut outbound = gateway.connect(worker.clone());
    let _ = next(&mut outbound);

    let err = gateway.handle_text(&worker, "{not json").unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Protocol(ProtocolError::Malformed(_))
    ));
    assert_eq!(next(&mut outbound).kind, OutboundKind::Error);

    let oversized = format!(
        r#"{{"type":"HEARTBEAT","data":{{"pad":"{}"}}}}"#,
        "x".repeat(5000)
    );
    let err = gateway.handle_text(&worker, &oversized).unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Protocol(ProtocolError::TooLarge { .. })
    ));
    let reply = next(&mut outbound);
    assert_eq!(reply.kind, OutboundKind::Error);
    assert!(reply.data["message"].as_str().unwrap().contains("exceeds"));
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_kind_is_ignored_without_reply() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-4");
    let mut outbound = gateway.connect(worker.clone());
    let _ = next(&mut outbound);

    let err = gateway
        .handle_text(&worker, r#"{"type":"TELEPORT","data":{}}"#)
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Protocol(ProtocolError::UnknownKind(kind)) if kind == "TELEPORT"
    ));
    assert!(outbound.try_recv().is_err());
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn uncorrelated_results_are_dropped() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-5");
    let _outbound = gateway.connect(worker.clone());

    let kind = gateway
        .handle_text(
            &worker,
            r#"{"type":"ACTION_RESULT","data":{"success":true}}"#,
        )
        .unwrap();
    assert_eq!(kind, InboundKind::ActionResult);
    let kind = gateway
        .handle_text(&worker, r#"{"type":"ERROR","data":{"error":"boom"}}"#)
        .unwrap();
    assert_eq!(kind, InboundKind::Error);
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_channel_and_unregisters() {
    let app = AppContext::new(test_config()).unwrap();
    let gateway = app.gateway();
    let worker = WorkerId::from("w-6");
    let _outbound = gateway.connect(worker.clone());
    register(&gateway, &worker, "alice");
    assert!(app.bridge().is_open(&worker));

    gateway.disconnect(&worker);
    assert!(!app.bridge().is_open(&worker));
    assert!(app.registry().session(&worker).is_none());
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn simulated_agent_runs_a_task_through_the_gateway() {
    let app = AppContext::new(test_config()).unwrap();
    let agent = SimulatedAgent::new("sim-1").with_user("bob");
    let worker = agent.worker().clone();
    let handle = agent.spawn(app.gateway());

    let task = TaskDefinition::new(
        "login",
        vec![
            Step::navigate(1, "https://example.com/login"),
            Step::input(2, "#user", "bob"),
            Step::click(3, "#submit"),
        ],
    );
    let id = app
        .scheduler()
        .submit(TaskSource::Inline(task), UserId::from("bob"), 5)
        .await
        .unwrap();

    let summary = finished(&app, &id).await;
    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.worker_id.as_ref(), Some(&worker));
    assert_eq!(summary.succeeded_steps(), 3);
    assert_eq!(
        app.registry().session(&worker).unwrap().current_url.as_deref(),
        Some("https://example.com/login")
    );

    app.gateway().disconnect(&worker);
    assert_eq!(handle.await.unwrap(), 3);
    app.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_step_exhausts_retries_and_fails_the_execution() {
    let app = AppContext::new(test_config()).unwrap();
    let agent = SimulatedAgent::new("sim-2").with_user("carol").failing_step(2);
    let worker = agent.worker().clone();
    let handle = agent.spawn(app.gateway());

    let task = TaskDefinition::new(
        "broken",
        vec![
            Step::navigate(1, "https://example.com"),
            Step::click(2, "#missing"),
            Step::click(3, "#never"),
        ],
    );
    let id = app
        .scheduler()
        .submit(TaskSource::Inline(task), UserId::from("carol"), 5)
        .await
        .unwrap();

    let summary = finished(&app, &id).await;
    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert!(summary
        .error
        .as_deref()
        .unwrap()
        .contains("element not found"));
    assert_eq!(summary.succeeded_steps(), 1);

    app.gateway().disconnect(&worker);
    assert_eq!(handle.await.unwrap(), 4);
    app.shutdown().await;
}
