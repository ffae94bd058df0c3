//! Detected-question generation
//!
//! The field count a run "detects" scales with the recognized job-board
//! pattern of the target URL: every application form carries the 8 standard
//! contact fields, and the heavier boards add a board-specific bonus drawn
//! per run.

use applywatch_protocol::{FieldType, Question};
use rand::Rng;

/// Job boards with recognized URL patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobBoard {
    Appcast,
    Workday,
    Greenhouse,
    Lever,
    Other,
}

impl JobBoard {
    pub fn detect(url: &str) -> JobBoard {
        let lowered = url.to_ascii_lowercase();
        if lowered.contains("appcast.io") {
            JobBoard::Appcast
        } else if lowered.contains("myworkday") || lowered.contains("workday") {
            JobBoard::Workday
        } else if lowered.contains("greenhouse.io") {
            JobBoard::Greenhouse
        } else if lowered.contains("lever.co") {
            JobBoard::Lever
        } else {
            JobBoard::Other
        }
    }

    /// How many questions the board adds on top of the standard 8.
    fn bonus_count(&self, rng: &mut impl Rng) -> usize {
        match self {
            JobBoard::Appcast => rng.gen_range(10..=25),
            JobBoard::Workday => rng.gen_range(8..=18),
            JobBoard::Greenhouse => rng.gen_range(6..=14),
            JobBoard::Lever => rng.gen_range(4..=10),
            JobBoard::Other => rng.gen_range(0..=4),
        }
    }

    fn screenshot_rotation(&self) -> &'static [&'static str] {
        match self {
            JobBoard::Appcast => &[
                "appcast_form_1.png",
                "appcast_form_2.png",
                "appcast_review.png",
            ],
            JobBoard::Workday => &[
                "workday_profile.png",
                "workday_experience.png",
                "workday_questions.png",
                "workday_review.png",
            ],
            JobBoard::Greenhouse => &["greenhouse_form.png", "greenhouse_review.png"],
            JobBoard::Lever => &["lever_form.png", "lever_review.png"],
            JobBoard::Other => &["application_form.png", "application_review.png"],
        }
    }
}

/// The 8 fields every application form is assumed to carry.
const BASE_QUESTIONS: &[(&str, &str, FieldType, bool)] = &[
    ("first_name", "First name", FieldType::Text, true),
    ("last_name", "Last name", FieldType::Text, true),
    ("email", "Email address", FieldType::Email, true),
    ("phone", "Phone number", FieldType::Phone, true),
    ("linkedin_url", "LinkedIn profile", FieldType::Text, false),
    (
        "years_experience",
        "Years of relevant experience",
        FieldType::Select,
        true,
    ),
    ("cover_letter", "Cover letter", FieldType::Textarea, false),
    (
        "work_authorization",
        "Are you authorized to work in this country?",
        FieldType::Checkbox,
        true,
    ),
];

/// Board-specific extras, cycled (with an index suffix past the first pass)
/// until the bonus count is reached.
const BONUS_TEMPLATES: &[(&str, &str, FieldType, bool)] = &[
    (
        "salary_expectation",
        "Salary expectation",
        FieldType::Text,
        false,
    ),
    ("start_date", "Earliest start date", FieldType::Text, true),
    (
        "referral_source",
        "How did you hear about this role?",
        FieldType::Select,
        false,
    ),
    (
        "relocation",
        "Are you willing to relocate?",
        FieldType::Checkbox,
        false,
    ),
    (
        "remote_preference",
        "Preferred working arrangement",
        FieldType::Select,
        false,
    ),
    ("portfolio_url", "Portfolio or website", FieldType::Text, false),
    (
        "skills_summary",
        "Summarize your relevant skills",
        FieldType::Textarea,
        false,
    ),
    (
        "certifications",
        "Relevant certifications",
        FieldType::Textarea,
        false,
    ),
    (
        "education_level",
        "Highest level of education",
        FieldType::Select,
        true,
    ),
    (
        "references_available",
        "References available on request?",
        FieldType::Checkbox,
        false,
    ),
];

/// Build the detected question list for a target URL.
pub fn detect_questions(url: &str, rng: &mut impl Rng) -> Vec<Question> {
    let board = JobBoard::detect(url);
    let bonus = board.bonus_count(rng);

    let mut questions = Vec::with_capacity(BASE_QUESTIONS.len() + bonus);
    for (id, text, field_type, required) in BASE_QUESTIONS {
        questions.push(make_question(id, text, *field_type, *required));
    }
    for i in 0..bonus {
        let (id, text, field_type, required) = BONUS_TEMPLATES[i % BONUS_TEMPLATES.len()];
        let question_id = if i < BONUS_TEMPLATES.len() {
            id.to_string()
        } else {
            format!("{}_{}", id, i / BONUS_TEMPLATES.len() + 1)
        };
        questions.push(make_question(&question_id, text, field_type, required));
    }
    questions
}

/// Screenshot filename for the n-th capture of a run, from the board's
/// fixed rotation.
pub fn screenshot_filename(url: &str, index: usize) -> String {
    let rotation = JobBoard::detect(url).screenshot_rotation();
    rotation[index % rotation.len()].to_string()
}

fn make_question(id: &str, text: &str, field_type: FieldType, required: bool) -> Question {
    Question {
        question_id: id.to_string(),
        question_text: text.to_string(),
        field_type,
        required,
        filled: false,
        response: None,
        response_type: None,
    }
}
