//! Unit tests for the acknowledgment state machine.

use notice_relay::models::acknowledgment::AckMethod;
use notice_relay::models::message::{MessagePayload, MessageType, Priority};
use notice_relay::workflow::state::{next_state, AckWorkflow, WorkflowEvent, WorkflowState};
use notice_relay::AppError;

fn payload(id: i64, priority: Priority) -> MessagePayload {
    MessagePayload {
        id: Some(id),
        message_type: Some(MessageType::Broadcast),
        body: format!("notice {id}"),
        priority,
        ..MessagePayload::default()
    }
}

#[test]
fn transition_table_allows_only_the_documented_moves() {
    use WorkflowEvent::{Failed, Promote, Submit, Succeeded};
    use WorkflowState::{Idle, Presenting, Submitting};

    assert_eq!(next_state(Idle, Promote), Some(Presenting));
    assert_eq!(next_state(Presenting, Submit), Some(Submitting));
    assert_eq!(next_state(Submitting, Succeeded), Some(Idle));
    assert_eq!(next_state(Submitting, Failed), Some(Presenting));

    assert_eq!(next_state(Idle, Submit), None);
    assert_eq!(next_state(Presenting, Promote), None);
    assert_eq!(next_state(Submitting, Submit), None);
    assert_eq!(next_state(Submitting, Promote), None);
    assert_eq!(next_state(Presenting, Succeeded), None);
}

#[test]
fn promote_takes_the_most_urgent_message() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(1, Priority::Low));
    workflow.admit(payload(2, Priority::Urgent));

    let presented = workflow.try_promote().map(|m| m.id);
    assert_eq!(presented, Some(2));
    assert_eq!(workflow.state(), WorkflowState::Presenting);
    assert_eq!(workflow.inbox().queued_ids(), vec![1]);
}

#[test]
fn at_most_one_message_is_presented() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(1, Priority::Normal));
    workflow.admit(payload(2, Priority::Normal));

    assert!(workflow.try_promote().is_some());
    assert!(workflow.try_promote().is_none());
    assert_eq!(workflow.current_id(), Some(1));
    assert_eq!(workflow.inbox().queue_len(), 1);
}

#[test]
fn promote_on_empty_queue_stays_idle() {
    let mut workflow = AckWorkflow::new();
    assert!(workflow.try_promote().is_none());
    assert_eq!(workflow.state(), WorkflowState::Idle);
}

#[test]
fn successful_submission_returns_to_idle_and_cools_down() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(1, Priority::Normal));
    workflow.admit(payload(2, Priority::Normal));
    workflow.try_promote();

    let request = workflow.begin_submit(AckMethod::Button).expect("submit");
    assert_eq!(request.message_id, 1);
    assert_eq!(request.attempt, 1);
    assert_eq!(workflow.state(), WorkflowState::Submitting);

    let done = workflow.complete_submit(1).expect("complete");
    assert_eq!(done.id, 1);
    assert_eq!(workflow.state(), WorkflowState::Idle);
    assert!(workflow.current().is_none());

    assert!(workflow.is_cooling_down());
    assert!(workflow.try_promote().is_none(), "cooldown blocks promotion");
    workflow.end_cooldown();
    assert_eq!(workflow.try_promote().map(|m| m.id), Some(2));
}

#[test]
fn failed_submission_keeps_the_message_presented() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(4, Priority::High));
    workflow.try_promote();
    workflow.begin_submit(AckMethod::Button).expect("submit");

    let error = AppError::Http("backend returned 500".into());
    workflow.fail_submit(4, &error).expect("fail");

    assert_eq!(workflow.state(), WorkflowState::Presenting);
    assert_eq!(workflow.current_id(), Some(4));
    assert_eq!(workflow.failures(), 1);
    assert_eq!(workflow.last_method(), Some(AckMethod::Button));
    assert!(workflow.last_error().is_some_and(|e| e.contains("500")));

    let retry = workflow.begin_submit(AckMethod::Button).expect("retry");
    assert_eq!(retry.attempt, 2);
}

#[test]
fn second_submit_while_submitting_is_rejected() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(1, Priority::Normal));
    workflow.try_promote();
    workflow.begin_submit(AckMethod::Button).expect("submit");

    let err = workflow
        .begin_submit(AckMethod::Button)
        .expect_err("double submit");
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[test]
fn submit_without_presented_message_is_rejected() {
    let mut workflow = AckWorkflow::new();
    assert!(matches!(
        workflow.begin_submit(AckMethod::TimerExpired),
        Err(AppError::InvalidState(_))
    ));
}

#[test]
fn result_for_another_message_is_rejected() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(1, Priority::Normal));
    workflow.try_promote();
    workflow.begin_submit(AckMethod::Button).expect("submit");

    assert!(workflow.complete_submit(99).is_err());
    assert_eq!(workflow.state(), WorkflowState::Submitting);
}

#[test]
fn reset_clears_queue_seen_ids_and_current() {
    let mut workflow = AckWorkflow::new();
    workflow.admit(payload(1, Priority::Normal));
    workflow.admit(payload(2, Priority::Normal));
    workflow.try_promote();

    let abandoned = workflow.reset();
    assert_eq!(abandoned.map(|m| m.id), Some(1));
    assert_eq!(workflow.state(), WorkflowState::Idle);
    assert_eq!(workflow.inbox().queue_len(), 0);
    assert_eq!(workflow.inbox().seen_count(), 0);
    assert!(workflow.admit(payload(1, Priority::Normal)).is_queued());
}
