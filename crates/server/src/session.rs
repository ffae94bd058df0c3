//! Session management
//!
//! One `Session` per tracked autofill run. The record accumulates the
//! action/question/screenshot state the dashboards observe and owns the
//! `JoinHandle` of its Activity Driver so that stop, pre-emption, and
//! disconnect cancel the pending tick outright.

use std::time::{SystemTime, UNIX_EPOCH};

use applywatch_protocol::{new_id, AgentAction, FieldType, Question, SessionStatus};
use tokio::task::JoinHandle;

use crate::state::ConnectionId;

/// One tracked autofill run
pub struct Session {
    session_id: String,
    /// Owning persistent connection. HTTP-originated start signals never
    /// materialize a session, so in practice this is always set; the field
    /// stays optional to match the published data model.
    connection_id: Option<ConnectionId>,
    target_url: String,
    started_at: String,
    status: SessionStatus,
    actions: Vec<AgentAction>,
    questions: Vec<Question>,
    screenshots: Vec<String>,
    current_page: u32,
    driver: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(connection_id: Option<ConnectionId>, target_url: &str) -> Self {
        Self {
            session_id: new_id(),
            connection_id,
            target_url: target_url.to_string(),
            started_at: unix_timestamp_z(),
            status: SessionStatus::Running,
            actions: Vec::new(),
            questions: Vec::new(),
            screenshots: Vec::new(),
            current_page: 1,
            driver: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[allow(dead_code)]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn actions(&self) -> &[AgentAction] {
        &self.actions
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn screenshots(&self) -> &[String] {
        &self.screenshots
    }

    /// Percent of the bounded action count already emitted, capped at 100.
    pub fn progress(&self, action_limit: usize) -> u8 {
        if action_limit == 0 {
            return 100;
        }
        ((self.actions.len() * 100 / action_limit).min(100)) as u8
    }

    /// Timestamp for the next action: wall clock, clamped so the sequence
    /// never decreases even if the system clock steps backwards.
    pub fn next_timestamp(&self) -> u64 {
        let now = now_ms();
        match self.actions.last() {
            Some(last) => now.max(last.timestamp),
            None => now,
        }
    }

    /// Append an action record. Actions only grow while the run is live.
    pub fn record_action(&mut self, action: AgentAction) {
        if self.status != SessionStatus::Running {
            return;
        }
        self.actions.push(action);
    }

    pub fn advance_page(&mut self) -> u32 {
        self.current_page += 1;
        self.current_page
    }

    /// Install the detected question list. Only meaningful once per run;
    /// repeat detections keep the existing list.
    pub fn set_questions(&mut self, questions: Vec<Question>) {
        if self.questions.is_empty() {
            self.questions = questions;
        }
    }

    /// Full copy of the current question list, for snapshot broadcasts.
    pub fn question_snapshot(&self) -> Vec<Question> {
        self.questions.clone()
    }

    /// Indices of unfilled questions whose field type is in `kinds`.
    pub fn unfilled_matching(&self, kinds: &[FieldType]) -> Vec<usize> {
        self.questions
            .iter()
            .enumerate()
            .filter(|(_, q)| !q.filled && kinds.contains(&q.field_type))
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark a question filled and attach its response. A question fills at
    /// most once per run; refilling is a no-op.
    pub fn fill_question(
        &mut self,
        index: usize,
        value: &str,
        response_type: &str,
    ) -> Option<&Question> {
        let question = self.questions.get_mut(index)?;
        if question.filled {
            return None;
        }
        question.filled = true;
        question.response = Some(value.to_string());
        question.response_type = Some(response_type.to_string());
        Some(&self.questions[index])
    }

    pub fn add_screenshot(&mut self, filename: String) {
        if self.status != SessionStatus::Running {
            return;
        }
        self.screenshots.push(filename);
    }

    pub fn attach_driver(&mut self, handle: JoinHandle<()>) {
        self.driver = Some(handle);
    }

    /// Pre-emption or disconnect: cancel the pending tick and leave the
    /// terminal `stopped` status.
    pub fn mark_stopped(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
        if self.status == SessionStatus::Running {
            self.status = SessionStatus::Stopped;
        }
    }

    /// Operator stop: only a live run transitions to `idle`. Returns whether
    /// a transition happened, so a second stop stays observably silent.
    pub fn mark_idle(&mut self) -> bool {
        if self.status != SessionStatus::Running {
            return false;
        }
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
        self.status = SessionStatus::Idle;
        true
    }

    /// Bounded action count reached. Called from the driver's own tick, so
    /// the handle is dropped rather than aborted.
    pub fn mark_completed(&mut self) {
        self.driver = None;
        if self.status == SessionStatus::Running {
            self.status = SessionStatus::Completed;
        }
    }
}

/// Milliseconds since the unix epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current time as a unix-seconds string, e.g. `1712000000Z`
fn unix_timestamp_z() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}
