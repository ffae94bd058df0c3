//! Canned response generation
//!
//! Fill actions resolve a question to a `ResponseKind` tag and dispatch on
//! it for the value. Unknown question ids fall back to a generic answer for
//! their field type, so board-specific extras always get something sensible.

use applywatch_protocol::{FieldType, Question};

/// Which response strategy a question resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    FirstName,
    LastName,
    Email,
    Phone,
    LinkedIn,
    YearsExperience,
    CoverLetter,
    WorkAuthorization,
    SalaryExpectation,
    StartDate,
    EducationLevel,
    GenericSelect,
    GenericCheckbox,
    GenericText,
}

impl ResponseKind {
    /// Resolve a question to its strategy. Indexed bonus ids
    /// (`start_date_2`) resolve like their base id.
    pub fn for_question(question: &Question) -> ResponseKind {
        let base = question
            .question_id
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .trim_end_matches('_');

        match base {
            "first_name" => ResponseKind::FirstName,
            "last_name" => ResponseKind::LastName,
            "email" => ResponseKind::Email,
            "phone" => ResponseKind::Phone,
            "linkedin_url" | "portfolio_url" => ResponseKind::LinkedIn,
            "years_experience" => ResponseKind::YearsExperience,
            "cover_letter" | "skills_summary" => ResponseKind::CoverLetter,
            "work_authorization" => ResponseKind::WorkAuthorization,
            "salary_expectation" => ResponseKind::SalaryExpectation,
            "start_date" => ResponseKind::StartDate,
            "education_level" => ResponseKind::EducationLevel,
            _ => match question.field_type {
                FieldType::Select => ResponseKind::GenericSelect,
                FieldType::Checkbox => ResponseKind::GenericCheckbox,
                _ => ResponseKind::GenericText,
            },
        }
    }

    /// The canned value and its response type.
    pub fn response(&self) -> (&'static str, &'static str) {
        match self {
            ResponseKind::FirstName => ("Alex", "text"),
            ResponseKind::LastName => ("Rivera", "text"),
            ResponseKind::Email => ("alex.rivera@example.com", "email"),
            ResponseKind::Phone => ("(555) 014-2288", "phone"),
            ResponseKind::LinkedIn => ("https://linkedin.com/in/alex-rivera", "text"),
            ResponseKind::YearsExperience => ("5-7 years", "select"),
            ResponseKind::CoverLetter => (
                "I am excited to apply for this role. My background closely \
                 matches the posted requirements and I am available to start \
                 within two weeks.",
                "textarea",
            ),
            ResponseKind::WorkAuthorization => ("true", "checkbox"),
            ResponseKind::SalaryExpectation => ("Negotiable", "text"),
            ResponseKind::StartDate => ("Two weeks from offer", "text"),
            ResponseKind::EducationLevel => ("Bachelor's degree", "select"),
            ResponseKind::GenericSelect => ("Yes", "select"),
            ResponseKind::GenericCheckbox => ("true", "checkbox"),
            ResponseKind::GenericText => ("Prefer not to say", "text"),
        }
    }
}
