//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Stopped,
    Idle,
    Completed,
    Error,
}

impl SessionStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Stopped | SessionStatus::Completed | SessionStatus::Error
        )
    }
}

/// Kind of autofill action emitted by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Navigation,
    QuestionDetection,
    FillTextField,
    FillSelectField,
    FillCheckboxField,
    Screenshot,
    PageTransition,
}

/// Kind of form field a detected question maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Email,
    Phone,
    Textarea,
    Select,
    Checkbox,
    File,
}

/// A detected form field in the target job application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub question_text: String,
    pub field_type: FieldType,
    pub required: bool,
    pub filled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

/// One emitted autofill action record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    /// Milliseconds since the unix epoch, non-decreasing within a run
    pub timestamp: u64,
    pub action_type: ActionType,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}
