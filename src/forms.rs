//! Declarative field checks for the HTML forms.
//!
//! Each submitted form is a `#[derive(FromForm)]` struct whose `validate`
//! method runs a list of [`Rule`]s per field and returns either the cleaned
//! values or a [`FormErrors`] map that templates render next to the fields.
//! Every form also carries a `csrf_token` that must match the token issued
//! to the submitting browser (see `auth::CsrfToken`).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::models::label::LabelForm;
use crate::models::note::NoteForm;

pub const USERNAME_MAX: usize = 64;
pub const NOTE_TITLE_MAX: usize = 16;
pub const NOTE_CONTENT_MAX: usize = 64;
pub const LABEL_NAME_MAX: usize = 32;

const USERNAME_MESSAGE: &str = "Usernames must have only letters, numbers, dots or underscores";
const CSRF_MISSING: &str = "The CSRF token is missing.";
const CSRF_INVALID: &str = "The CSRF token is invalid.";

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.]*$").expect("username regex")
    })
}

/// A single constraint on one field.
pub enum Rule<'a> {
    /// Non-blank after trimming. Stops the remaining rules on failure.
    Required,
    /// Inclusive bounds, counted in characters.
    Length { min: usize, max: usize },
    Regexp { pattern: &'a Regex, message: &'a str },
    /// Must equal the value of another field.
    EqualTo { other: &'a str, message: &'a str },
}

impl Rule<'_> {
    fn check(&self, value: &str) -> Result<(), String> {
        match self {
            Rule::Required => {
                if value.trim().is_empty() {
                    return Err("This field is required.".to_string());
                }
            }
            Rule::Length { min, max } => {
                let len = value.chars().count();
                if len < *min || len > *max {
                    return Err(format!(
                        "Field must be between {} and {} characters long.",
                        min, max
                    ));
                }
            }
            Rule::Regexp { pattern, message } => {
                if !pattern.is_match(value) {
                    return Err(message.to_string());
                }
            }
            Rule::EqualTo { other, message } => {
                if value != *other {
                    return Err(message.to_string());
                }
            }
        }
        Ok(())
    }
}

/// Field name → messages, in field order for stable rendering.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Run `rules` against `value`, recording every failure. `Required`
    /// short-circuits so an empty field reports a single message.
    pub fn check(&mut self, field: &str, value: &str, rules: &[Rule<'_>]) -> bool {
        let mut ok = true;
        for rule in rules {
            if let Err(msg) = rule.check(value) {
                self.add(field, msg);
                ok = false;
                if matches!(rule, Rule::Required) {
                    break;
                }
            }
        }
        ok
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, field: &str) -> bool {
        !self.get(field).is_empty()
    }

    fn check_csrf(&mut self, submitted: &str, expected: &str) {
        if submitted.is_empty() {
            self.add("csrf_token", CSRF_MISSING);
        } else if !auth::csrf_matches(expected, submitted) {
            self.add("csrf_token", CSRF_INVALID);
        }
    }

    fn into_result<T>(self, clean: T) -> Result<T, FormErrors> {
        if self.is_empty() {
            Ok(clean)
        } else {
            Err(self)
        }
    }
}

// ── Forms ──

#[derive(Debug, FromForm, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub remember_me: bool,
    #[field(default = String::new())]
    #[serde(default)]
    pub csrf_token: String,
}

impl LoginForm {
    pub fn validate(&self, csrf: &str) -> Result<(), FormErrors> {
        let mut errors = FormErrors::new();
        errors.check_csrf(&self.csrf_token, csrf);
        errors.check(
            "username",
            &self.username,
            &[Rule::Required, Rule::Length { min: 1, max: USERNAME_MAX }],
        );
        errors.check("password", &self.password, &[Rule::Required]);
        errors.into_result(())
    }
}

#[derive(Debug, FromForm, Deserialize)]
pub struct RegistrationForm {
    pub username: String,
    pub password: String,
    pub password2: String,
    #[field(default = String::new())]
    #[serde(default)]
    pub csrf_token: String,
}

impl RegistrationForm {
    /// Field checks only; username uniqueness needs the database and is
    /// checked by the handler.
    pub fn validate(&self, csrf: &str) -> Result<(), FormErrors> {
        let mut errors = FormErrors::new();
        errors.check_csrf(&self.csrf_token, csrf);
        errors.check(
            "username",
            &self.username,
            &[
                Rule::Required,
                Rule::Length { min: 1, max: USERNAME_MAX },
                Rule::Regexp {
                    pattern: username_pattern(),
                    message: USERNAME_MESSAGE,
                },
            ],
        );
        errors.check(
            "password",
            &self.password,
            &[
                Rule::Required,
                Rule::EqualTo {
                    other: &self.password2,
                    message: "Passwords must match.",
                },
            ],
        );
        errors.check("password2", &self.password2, &[Rule::Required]);
        errors.into_result(())
    }
}

#[derive(Debug, FromForm, Deserialize)]
pub struct PasswordChangeForm {
    pub current_password: String,
    pub password: String,
    pub password2: String,
    #[field(default = String::new())]
    #[serde(default)]
    pub csrf_token: String,
}

impl PasswordChangeForm {
    pub fn validate(&self, csrf: &str) -> Result<(), FormErrors> {
        let mut errors = FormErrors::new();
        errors.check_csrf(&self.csrf_token, csrf);
        errors.check("current_password", &self.current_password, &[Rule::Required]);
        errors.check(
            "password",
            &self.password,
            &[
                Rule::Required,
                Rule::EqualTo {
                    other: &self.password2,
                    message: "Passwords must match.",
                },
            ],
        );
        errors.check("password2", &self.password2, &[Rule::Required]);
        errors.into_result(())
    }
}

#[derive(Debug, FromForm, Deserialize, Serialize)]
pub struct NoteFormData {
    pub title: String,
    pub content: String,
    /// Label id from the select box; empty means "no label".
    pub label: String,
    #[field(default = String::new())]
    #[serde(default)]
    pub csrf_token: String,
}

impl NoteFormData {
    /// `label_choices` are the ids of the submitting user's labels.
    pub fn validate(&self, label_choices: &[i64], csrf: &str) -> Result<NoteForm, FormErrors> {
        let mut errors = FormErrors::new();
        errors.check_csrf(&self.csrf_token, csrf);
        errors.check(
            "title",
            self.title.trim(),
            &[Rule::Required, Rule::Length { min: 1, max: NOTE_TITLE_MAX }],
        );
        errors.check(
            "content",
            self.content.trim(),
            &[Rule::Required, Rule::Length { min: 1, max: NOTE_CONTENT_MAX }],
        );

        let label_id = match self.label.trim() {
            "" => None,
            raw => match raw.parse::<i64>() {
                Ok(id) if label_choices.contains(&id) => Some(id),
                _ => {
                    errors.add("label", "Not a valid choice.");
                    None
                }
            },
        };

        errors.into_result(NoteForm {
            title: self.title.trim().to_string(),
            content: self.content.trim().to_string(),
            label_id,
        })
    }
}

#[derive(Debug, FromForm, Deserialize, Serialize)]
pub struct LabelFormData {
    pub name: String,
    #[field(default = String::new())]
    #[serde(default)]
    pub csrf_token: String,
}

impl LabelFormData {
    pub fn validate(&self, csrf: &str) -> Result<LabelForm, FormErrors> {
        let mut errors = FormErrors::new();
        errors.check_csrf(&self.csrf_token, csrf);
        errors.check(
            "name",
            self.name.trim(),
            &[Rule::Required, Rule::Length { min: 1, max: LABEL_NAME_MAX }],
        );
        errors.into_result(LabelForm {
            name: self.name.trim().to_string(),
        })
    }
}

/// Body of the button-only forms (delete, logout).
#[derive(Debug, FromForm)]
pub struct CsrfForm {
    #[field(default = String::new())]
    pub csrf_token: String,
}

impl CsrfForm {
    pub fn validate(&self, csrf: &str) -> Result<(), FormErrors> {
        let mut errors = FormErrors::new();
        errors.check_csrf(&self.csrf_token, csrf);
        errors.into_result(())
    }
}
