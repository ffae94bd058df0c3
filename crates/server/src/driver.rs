//! Activity Driver
//!
//! Each running session is driven by its own tokio task: sleep a jittered
//! interval, take the registry lock, emit one action, repeat. The session
//! record owns this task's `JoinHandle`, so stop/pre-emption/disconnect
//! cancel the pending tick outright; the status check at the top of each
//! tick covers the remaining race with an in-flight tick.

use std::sync::Arc;
use std::time::Duration;

use applywatch_protocol::{
    ActionType, AgentAction, FieldType, ServerMessage, SessionStatus,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::questions;
use crate::responses::ResponseKind;
use crate::session::Session;
use crate::state::{ConnectionId, SessionRegistry};

const ACTION_KINDS: &[ActionType] = &[
    ActionType::Navigation,
    ActionType::QuestionDetection,
    ActionType::FillTextField,
    ActionType::FillSelectField,
    ActionType::FillCheckboxField,
    ActionType::Screenshot,
    ActionType::PageTransition,
];

enum Tick {
    Continue,
    Completed,
    Exit,
}

/// Spawn the driver task for a freshly started session.
pub fn spawn(
    registry: Arc<SessionRegistry>,
    connection_id: ConnectionId,
    session_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = {
                let config = registry.driver_config();
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(config.min_tick_ms..=config.max_tick_ms))
            };
            tokio::time::sleep(delay).await;

            match registry.mutate_session(connection_id, &session_id, tick).await {
                Some(Tick::Continue) => {}
                Some(Tick::Completed) => {
                    info!(
                        component = "driver",
                        event = "driver.completed",
                        session_id = %session_id,
                        "Run reached its action limit"
                    );
                    break;
                }
                Some(Tick::Exit) | None => {
                    debug!(
                        component = "driver",
                        event = "driver.exited",
                        session_id = %session_id,
                        "Session no longer running"
                    );
                    break;
                }
            }
        }
    })
}

/// One tick: emit one action and its side effects. Runs under the registry
/// lock; the returned events are broadcast before the lock is released.
fn tick(session: &mut Session, config: &DriverConfig) -> (Tick, Vec<ServerMessage>) {
    if session.status() != SessionStatus::Running {
        return (Tick::Exit, Vec::new());
    }

    let mut rng = rand::thread_rng();
    let kind = ACTION_KINDS[rng.gen_range(0..ACTION_KINDS.len())];

    let mut action = AgentAction {
        timestamp: session.next_timestamp(),
        action_type: kind,
        page: session.current_page(),
        question_id: None,
        value: None,
        filename: None,
    };
    let mut side_events = Vec::new();

    match kind {
        ActionType::Navigation => {}
        ActionType::QuestionDetection => {
            if session.questions().is_empty() {
                let detected = questions::detect_questions(session.target_url(), &mut rng);
                info!(
                    component = "driver",
                    event = "driver.questions_detected",
                    session_id = %session.session_id(),
                    count = detected.len(),
                    "Detected form questions"
                );
                session.set_questions(detected);
            }
            side_events.push(ServerMessage::QuestionsDetected {
                questions: session.question_snapshot(),
            });
        }
        ActionType::FillTextField | ActionType::FillSelectField | ActionType::FillCheckboxField => {
            let candidates = session.unfilled_matching(fill_targets(kind));
            if let Some(&index) = candidates.choose(&mut rng) {
                let (value, response_type) =
                    ResponseKind::for_question(&session.questions()[index]).response();
                if let Some(question) = session.fill_question(index, value, response_type) {
                    action.question_id = Some(question.question_id.clone());
                    action.value = Some(value.to_string());
                }
                side_events.push(ServerMessage::QuestionsDetected {
                    questions: session.question_snapshot(),
                });
            }
        }
        ActionType::Screenshot => {
            let filename =
                questions::screenshot_filename(session.target_url(), session.screenshots().len());
            session.add_screenshot(filename.clone());
            action.filename = Some(filename.clone());
            side_events.push(ServerMessage::ScreenshotTaken {
                filename,
                session_id: session.session_id().to_string(),
                job_url: session.target_url().to_string(),
            });
        }
        ActionType::PageTransition => {
            let page = session.advance_page();
            action.page = page;
            side_events.push(ServerMessage::PageTransition { page });
        }
    }

    session.record_action(action.clone());

    let mut events = vec![ServerMessage::AgentAction { action }];
    events.extend(side_events);

    if kind == ActionType::PageTransition {
        events.push(ServerMessage::AgentStatus {
            status: SessionStatus::Running,
            current_page: session.current_page(),
            progress: session.progress(config.action_limit),
        });
    }

    if session.actions().len() >= config.action_limit {
        session.mark_completed();
        events.push(ServerMessage::AgentCompleted {
            status: SessionStatus::Completed,
            total_actions: session.actions().len(),
            questions_found: session.questions().len(),
            screenshots_taken: session.screenshots().len(),
        });
        return (Tick::Completed, events);
    }

    (Tick::Continue, events)
}

fn fill_targets(kind: ActionType) -> &'static [FieldType] {
    match kind {
        ActionType::FillTextField => &[
            FieldType::Text,
            FieldType::Email,
            FieldType::Phone,
            FieldType::Textarea,
        ],
        ActionType::FillSelectField => &[FieldType::Select],
        ActionType::FillCheckboxField => &[FieldType::Checkbox],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    const APPCAST_URL: &str = "https://apply.appcast.io/jobs/123/apply";

    fn fast_registry(action_limit: usize) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(DriverConfig {
            min_tick_ms: 1,
            max_tick_ms: 3,
            action_limit,
        }))
    }

    /// Drain broadcast events until `agent_completed` arrives.
    async fn collect_run(mut rx: broadcast::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        loop {
            let msg = timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("run did not complete in time")
                .expect("broadcast channel closed");
            let done = matches!(msg, ServerMessage::AgentCompleted { .. });
            events.push(msg);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn run_completes_after_exactly_the_action_limit() {
        let registry = fast_registry(12);
        let rx = registry.subscribe();
        registry.start_session(1, APPCAST_URL).await;

        let events = collect_run(rx).await;

        let actions = events
            .iter()
            .filter(|e| matches!(e, ServerMessage::AgentAction { .. }))
            .count();
        assert_eq!(actions, 12);

        match events.last() {
            Some(ServerMessage::AgentCompleted {
                status,
                total_actions,
                ..
            }) => {
                assert_eq!(*status, SessionStatus::Completed);
                assert_eq!(*total_actions, 12);
            }
            other => panic!("expected agent_completed last, got {:?}", other),
        }
        assert_eq!(
            registry.session_status(1).await,
            Some(SessionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn action_timestamps_match_emission_order() {
        let registry = fast_registry(15);
        let rx = registry.subscribe();
        registry.start_session(1, APPCAST_URL).await;

        let events = collect_run(rx).await;

        let timestamps: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ServerMessage::AgentAction { action } => Some(action.timestamp),
                _ => None,
            })
            .collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn question_snapshots_are_full_and_never_shrink() {
        let registry = fast_registry(20);
        let rx = registry.subscribe();
        registry.start_session(1, APPCAST_URL).await;

        let events = collect_run(rx).await;

        let snapshots: Vec<&Vec<_>> = events
            .iter()
            .filter_map(|e| match e {
                ServerMessage::QuestionsDetected { questions } => Some(questions),
                _ => None,
            })
            .collect();

        let mut last_len = 0;
        let mut last_filled = 0;
        for snapshot in &snapshots {
            assert!(snapshot.len() >= last_len);
            let filled = snapshot.iter().filter(|q| q.filled).count();
            assert!(filled >= last_filled);
            for question in snapshot.iter() {
                assert_eq!(question.filled, question.response.is_some());
            }
            last_len = snapshot.len();
            last_filled = filled;
        }
    }

    #[tokio::test]
    async fn first_detection_matches_the_board_heuristic() {
        let registry = fast_registry(20);
        let rx = registry.subscribe();
        registry.start_session(1, APPCAST_URL).await;

        let events = collect_run(rx).await;

        let first = events.iter().find_map(|e| match e {
            ServerMessage::QuestionsDetected { questions } => Some(questions),
            _ => None,
        });
        if let Some(questions) = first {
            assert!((18..=33).contains(&questions.len()));
            let first_name = questions
                .iter()
                .find(|q| q.question_id == "first_name")
                .expect("first_name present");
            assert!(!first_name.filled);
        }
        // A 20-action run without a question_detection draw is possible but
        // vanishingly rare; either way the assertions above must hold when
        // a snapshot exists.
    }

    #[tokio::test]
    async fn stop_cancels_the_pending_tick() {
        let registry = Arc::new(SessionRegistry::new(DriverConfig {
            min_tick_ms: 200,
            max_tick_ms: 400,
            action_limit: 25,
        }));
        registry.start_session(1, APPCAST_URL).await;
        registry.stop_session(1).await;

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(registry.session_actions_len(1).await, Some(0));
        assert_eq!(registry.session_status(1).await, Some(SessionStatus::Idle));
    }

    #[tokio::test]
    async fn completion_summary_counts_match_session_state() {
        let registry = fast_registry(10);
        let rx = registry.subscribe();
        registry.start_session(1, APPCAST_URL).await;

        let events = collect_run(rx).await;

        let screenshots = events
            .iter()
            .filter(|e| matches!(e, ServerMessage::ScreenshotTaken { .. }))
            .count();
        match events.last() {
            Some(ServerMessage::AgentCompleted {
                screenshots_taken, ..
            }) => assert_eq!(*screenshots_taken, screenshots),
            other => panic!("expected agent_completed last, got {:?}", other),
        }
    }
}
