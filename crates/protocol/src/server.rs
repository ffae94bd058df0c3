//! Server → Client messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::*;

/// Messages sent from server to client.
///
/// Event payload casing follows the wire contract the dashboard already
/// speaks: run-level summaries (`agent_status`, `agent_completed`,
/// `screenshot_taken`) use camelCase fields, per-field records
/// (`agent_action`, `questions_detected`) use snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Run status summary
    #[serde(rename_all = "camelCase")]
    AgentStatus {
        status: SessionStatus,
        current_page: u32,
        /// Percent of the bounded action count already emitted
        progress: u8,
    },

    /// One autofill action, in emission order
    AgentAction {
        #[serde(flatten)]
        action: AgentAction,
    },

    /// Full snapshot of the detected question list, re-sent on every
    /// mutation so late joiners catch up without replay machinery.
    QuestionsDetected { questions: Vec<Question> },

    #[serde(rename_all = "camelCase")]
    ScreenshotTaken {
        filename: String,
        session_id: String,
        job_url: String,
    },

    PageTransition { page: u32 },

    #[serde(rename_all = "camelCase")]
    AgentCompleted {
        status: SessionStatus,
        total_actions: usize,
        questions_found: usize,
        screenshots_taken: usize,
    },

    AgentError { message: String },

    /// Relay of an HTTP-originated start signal to persistent-channel clients
    StartAgent { job_url: String },

    /// Verbatim relay of an HTTP-originated progress payload
    ProgressUpdate { payload: Value },
}
