//! Integration tests for the blocking acknowledgment session.
//!
//! Drives a real [`MessageSession`] through its handle against the mock
//! backend and recording presenter.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use notice_relay::backend::AckBackend;
use notice_relay::config::DeliveryConfig;
use notice_relay::console::{LineAction, TerminalPresenter};
use notice_relay::models::acknowledgment::AckMethod;
use notice_relay::models::message::{MessagePayload, Priority};
use notice_relay::policy::routing::DeliveryRoute;
use notice_relay::workflow::{MessageSession, Presenter, WorkflowState};

use super::test_helpers::{
    director, fast_config, manager, payload, start_session, wait_for_snapshot, wait_presenting,
    wait_until, MockBackend, PresenterEvent,
};

fn is_idle_and_empty(snapshot: &notice_relay::workflow::SessionSnapshot) -> bool {
    snapshot.state == WorkflowState::Idle && snapshot.queue_len() == 0
}

#[tokio::test]
async fn queued_messages_are_presented_most_urgent_first() {
    let backend = MockBackend::with_pending(vec![
        payload(1, Priority::Normal),
        payload(2, Priority::Urgent),
        payload(3, Priority::Low),
        payload(4, Priority::High),
    ]);
    let session = start_session(fast_config(), backend);
    session.handle.set_user(Some(manager("m1"))).expect("alive");
    session.handle.channel_connected().expect("alive");

    for expected in [2, 4, 1, 3] {
        wait_presenting(&session.handle, expected).await;
        session.handle.acknowledge(AckMethod::Button).expect("alive");
    }

    let done = wait_for_snapshot(&session.handle, is_idle_and_empty).await;
    assert_eq!(done.presented_total, 4);
    assert_eq!(session.presenter.presented(), vec![2, 4, 1, 3]);
    assert_eq!(session.backend.acked_ids(), vec![2, 4, 1, 3]);

    session.shutdown().await;
}

#[tokio::test]
async fn push_messages_queue_behind_the_presented_one() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(10, Priority::Low)).expect("alive");
    wait_presenting(h, 10).await;

    h.add_message(payload(11, Priority::Normal)).expect("alive");
    h.add_message(payload(12, Priority::Urgent)).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.current_id, Some(10), "urgent arrival does not preempt");
    assert_eq!(snapshot.queued_ids, vec![12, 11]);

    h.acknowledge(AckMethod::Button).expect("alive");
    wait_presenting(h, 12).await;

    session.shutdown().await;
}

#[tokio::test]
async fn duplicate_delivery_is_presented_once() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(5, Priority::High)).expect("alive");
    h.add_message(payload(5, Priority::High)).expect("alive");
    wait_presenting(h, 5).await;

    h.acknowledge(AckMethod::Button).expect("alive");
    wait_for_snapshot(h, is_idle_and_empty).await;

    // Redelivered after acknowledgment: still ignored this session.
    h.add_message(payload(5, Priority::High)).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, WorkflowState::Idle);
    assert_eq!(snapshot.seen_count, 1);
    assert_eq!(snapshot.presented_total, 1);
    assert_eq!(session.presenter.presented(), vec![5]);

    session.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_is_dropped() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(MessagePayload {
        id: None,
        ..payload(0, Priority::Urgent)
    })
    .expect("alive");

    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, WorkflowState::Idle);
    assert_eq!(snapshot.seen_count, 0);
    assert!(session.presenter.events().is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn administrative_roles_refresh_instead_of_blocking() {
    let backend = MockBackend::with_pending(vec![payload(1, Priority::Urgent)]);
    let session = start_session(fast_config(), backend);
    let h = &session.handle;
    h.set_user(Some(director("d1"))).expect("alive");
    h.channel_connected().expect("alive");

    h.add_message(payload(2, Priority::Urgent)).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");

    assert_eq!(snapshot.route, DeliveryRoute::Refresh);
    assert_eq!(snapshot.state, WorkflowState::Idle);
    assert_eq!(snapshot.queue_len(), 0);
    assert_eq!(snapshot.presented_total, 0);
    assert_eq!(session.presenter.events(), vec![PresenterEvent::Refreshed]);
    assert_eq!(session.backend.fetch_calls(), 0, "no backfill without blocking");

    session.shutdown().await;
}

#[tokio::test]
async fn session_without_user_ignores_messages() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;

    h.add_message(payload(1, Priority::Urgent)).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.route, DeliveryRoute::Ignore);
    assert_eq!(snapshot.seen_count, 0);
    assert!(session.presenter.events().is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn input_while_submitting_is_ignored() {
    let backend = MockBackend::new();
    backend.set_ack_delay(Duration::from_millis(150));
    let session = start_session(fast_config(), backend);
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(1, Priority::Normal)).expect("alive");
    h.add_message(payload(2, Priority::Normal)).expect("alive");
    wait_presenting(h, 1).await;

    h.acknowledge(AckMethod::Button).expect("alive");
    h.acknowledge(AckMethod::Button).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, WorkflowState::Submitting);
    assert_eq!(snapshot.current_id, Some(1));

    wait_presenting(h, 2).await;
    assert_eq!(session.backend.acked_ids(), vec![1]);

    session.shutdown().await;
}

#[tokio::test]
async fn acknowledgment_for_a_stale_message_is_ignored() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");
    h.add_message(payload(3, Priority::Normal)).expect("alive");
    wait_presenting(h, 3).await;

    h.acknowledge_message(99, AckMethod::Button).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, WorkflowState::Presenting);
    assert!(session.backend.acks().is_empty());

    h.acknowledge_message(3, AckMethod::Button).expect("alive");
    wait_for_snapshot(h, is_idle_and_empty).await;
    assert_eq!(session.backend.acked_ids(), vec![3]);

    session.shutdown().await;
}

#[tokio::test]
async fn failed_acknowledgment_is_retried_after_confirmation() {
    let backend = MockBackend::new();
    backend.fail_next_acks(1);
    let session = start_session(fast_config(), backend);
    session.presenter.answer_retries(&[true]);
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(7, Priority::High)).expect("alive");
    wait_presenting(h, 7).await;
    h.acknowledge(AckMethod::Button).expect("alive");

    wait_for_snapshot(h, is_idle_and_empty).await;
    assert_eq!(
        session.backend.acks(),
        vec![(7, AckMethod::Button), (7, AckMethod::Button)]
    );
    assert_eq!(
        session.presenter.events(),
        vec![
            PresenterEvent::Presented(7),
            PresenterEvent::RetryAsked(7),
            PresenterEvent::Dismissed(7),
        ]
    );

    session.shutdown().await;
}

#[tokio::test]
async fn declined_retry_keeps_the_message_blocking() {
    let backend = MockBackend::new();
    backend.fail_next_acks(1);
    let session = start_session(fast_config(), backend);
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(8, Priority::Normal)).expect("alive");
    h.add_message(payload(9, Priority::Urgent)).expect("alive");
    wait_presenting(h, 8).await;
    h.acknowledge(AckMethod::Button).expect("alive");

    let presenter = &session.presenter;
    wait_until(|| presenter.count(&PresenterEvent::RetryAsked(8)) == 1).await;
    let snapshot = wait_for_snapshot(h, |s| s.last_error.is_some()).await;
    assert_eq!(snapshot.state, WorkflowState::Presenting);
    assert_eq!(snapshot.current_id, Some(8), "failure never advances the queue");
    assert_eq!(snapshot.queued_ids, vec![9]);

    // The user acknowledges again by hand.
    h.acknowledge(AckMethod::Button).expect("alive");
    wait_presenting(h, 9).await;
    assert_eq!(session.backend.acked_ids(), vec![8, 8]);

    session.shutdown().await;
}

#[tokio::test]
async fn retry_prompts_stop_at_the_configured_limit() {
    let backend = MockBackend::new();
    backend.fail_next_acks(3);
    let config = DeliveryConfig {
        max_retry_prompts: Some(1),
        ..fast_config()
    };
    let session = start_session(config, backend);
    session.presenter.answer_retries(&[true, true]);
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(4, Priority::Normal)).expect("alive");
    wait_presenting(h, 4).await;
    h.acknowledge(AckMethod::Button).expect("alive");

    // First failure prompts and retries; the second does not prompt.
    let backend = &session.backend;
    wait_until(|| backend.acks().len() == 2).await;
    let snapshot = wait_for_snapshot(h, |s| s.state == WorkflowState::Presenting).await;
    assert_eq!(snapshot.current_id, Some(4));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.presenter.count(&PresenterEvent::RetryAsked(4)), 1);

    // A manual acknowledgment starts a fresh prompt budget.
    h.acknowledge(AckMethod::Button).expect("alive");
    wait_for_snapshot(h, is_idle_and_empty).await;
    assert_eq!(session.presenter.count(&PresenterEvent::RetryAsked(4)), 2);
    assert_eq!(backend.acks().len(), 4);

    session.shutdown().await;
}

#[tokio::test]
async fn identity_change_abandons_the_session() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(1, Priority::Normal)).expect("alive");
    h.add_message(payload(2, Priority::Normal)).expect("alive");
    wait_presenting(h, 1).await;

    h.set_user(Some(manager("m2"))).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, WorkflowState::Idle);
    assert_eq!(snapshot.queue_len(), 0);
    assert_eq!(snapshot.seen_count, 0);
    assert!(session.presenter.events().contains(&PresenterEvent::Dismissed(1)));

    // The new identity may receive the same message again.
    h.add_message(payload(1, Priority::Normal)).expect("alive");
    wait_presenting(h, 1).await;

    session.shutdown().await;
}

#[tokio::test]
async fn in_flight_acknowledgment_from_previous_identity_is_dropped() {
    let backend = MockBackend::new();
    backend.set_ack_delay(Duration::from_millis(100));
    let session = start_session(fast_config(), backend);
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");

    h.add_message(payload(1, Priority::Normal)).expect("alive");
    wait_presenting(h, 1).await;
    h.acknowledge(AckMethod::Button).expect("alive");
    h.set_user(Some(manager("m2"))).expect("alive");
    h.add_message(payload(2, Priority::Normal)).expect("alive");
    wait_presenting(h, 2).await;

    // Let the old acknowledgment land.
    let backend = &session.backend;
    wait_until(|| backend.acks().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, WorkflowState::Presenting);
    assert_eq!(snapshot.current_id, Some(2));

    session.shutdown().await;
}

#[tokio::test]
async fn same_identity_again_keeps_the_session() {
    let session = start_session(fast_config(), MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");
    h.add_message(payload(1, Priority::Normal)).expect("alive");
    wait_presenting(h, 1).await;

    h.set_user(Some(manager("m1"))).expect("alive");
    let snapshot = h.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.current_id, Some(1));
    assert_eq!(snapshot.seen_count, 1);

    session.shutdown().await;
}

#[tokio::test]
async fn post_acknowledgment_delay_holds_the_next_message() {
    let config = DeliveryConfig {
        post_ack_delay_ms: 150,
        ..fast_config()
    };
    let session = start_session(config, MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");
    h.add_message(payload(1, Priority::Normal)).expect("alive");
    h.add_message(payload(2, Priority::Normal)).expect("alive");
    wait_presenting(h, 1).await;

    h.acknowledge(AckMethod::Button).expect("alive");
    let between = wait_for_snapshot(h, |s| s.state == WorkflowState::Idle).await;
    assert_eq!(between.queued_ids, vec![2]);

    wait_presenting(h, 2).await;
    session.shutdown().await;
}

#[tokio::test]
async fn presentation_timer_acknowledges_implicitly() {
    let config = DeliveryConfig {
        auto_acknowledge_seconds: Some(1),
        ..fast_config()
    };
    let session = start_session(config, MockBackend::new());
    let h = &session.handle;
    h.set_user(Some(manager("m1"))).expect("alive");
    h.add_message(payload(6, Priority::Low)).expect("alive");
    wait_presenting(h, 6).await;

    let backend = &session.backend;
    tokio::time::timeout(Duration::from_secs(3), async {
        while backend.acks().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timer fired");
    assert_eq!(backend.acks(), vec![(6, AckMethod::TimerExpired)]);

    session.shutdown().await;
}

#[tokio::test]
async fn cancelled_session_rejects_further_commands() {
    let session = start_session(fast_config(), MockBackend::new());
    let handle = session.handle.clone();
    session.shutdown().await;

    assert!(handle.add_message(payload(1, Priority::Normal)).is_err());
    assert!(handle.snapshot().await.is_err());
}

#[tokio::test]
async fn timer_acknowledgment_clears_a_pending_retry_question() {
    let config = DeliveryConfig {
        auto_acknowledge_seconds: Some(1),
        ..fast_config()
    };
    let backend = MockBackend::new();
    backend.fail_next_acks(1);
    let console = Arc::new(TerminalPresenter::new(Vec::new()));
    let ct = CancellationToken::new();
    let ack_backend: Arc<dyn AckBackend> = backend.clone();
    let surface: Arc<dyn Presenter> = console.clone();
    let (h, task) = MessageSession::spawn(config, ack_backend, surface, ct.clone());

    h.set_user(Some(manager("m1"))).expect("alive");
    h.add_message(payload(1, Priority::Normal)).expect("alive");
    h.add_message(payload(2, Priority::Normal)).expect("alive");
    wait_presenting(&h, 1).await;

    // First attempt fails and the retry question goes up.
    assert_eq!(console.handle_line("").await, LineAction::Acknowledge);
    h.acknowledge(AckMethod::Button).expect("alive");
    tokio::time::timeout(Duration::from_secs(3), async {
        while !console.awaiting_retry_answer().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("retry asked");

    // The presentation timer acknowledges message 1 and message 2 comes up.
    wait_presenting(&h, 2).await;
    assert!(!console.awaiting_retry_answer().await);

    assert_eq!(console.handle_line("").await, LineAction::Acknowledge);
    h.acknowledge(AckMethod::Button).expect("alive");
    wait_until(|| backend.acks().contains(&(2, AckMethod::Button))).await;
    assert_eq!(
        backend.acks()[..2].to_vec(),
        vec![(1, AckMethod::Button), (1, AckMethod::TimerExpired)]
    );

    ct.cancel();
    let _ = task.await;
}
