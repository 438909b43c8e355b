//! Input validation for API requests.
//!
//! Every validator takes the raw request value for one field and returns the
//! normalized value or a [`ValidationError`] naming the field and the rule
//! that failed. Validators are pure and idempotent on their own output.
//!
//! Handlers chain validators with `?` so the first failing field wins. The
//! pre-validation endpoint instead runs [`validate_entity`], which collects
//! every error for an entity into a list.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::catalog;
use crate::db::{Role, SeriesPosture};

lazy_static! {
    /// Regex for validating email addresses (already lowercased)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-z0-9._%+-]+@[a-z0-9-]+(\.[a-z0-9-]+)*\.[a-z]{2,}$"
    ).unwrap();

    /// Letters of any script and plain spaces
    static ref NAME_REGEX: Regex = Regex::new(r"^[\p{L} ]+$").unwrap();

    /// Free-form condition after normalization (no whitespace left)
    static ref CONDITION_REGEX: Regex = Regex::new(r"^[\p{L}\p{N}_,.()/-]+$").unwrap();

    static ref SERIES_NAME_REGEX: Regex = Regex::new(r"^[\p{L}\p{N} _.,()-]+$").unwrap();

    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

/// Domains that are almost always a typo of a common mail provider
const SUSPICIOUS_DOMAINS: [&str; 16] = [
    "gmial.com", "gmai.com", "gmali.com", "gamil.com", "gmail.co", "gmail.cm",
    "yahooo.com", "yaho.com", "yahoo.co", "hotmial.com", "hotmai.com", "hotmail.co",
    "outlok.com", "outloo.com", "iclod.com", "icloud.co",
];

/// Conditions accepted without the generic character check
const KNOWN_CONDITIONS: [&str; 20] = [
    "anxiety", "arthritis", "back_pain", "lower_back_pain", "neck_pain", "depression",
    "stress", "insomnia", "osteoarthritis", "rheumatoid_arthritis", "fibromyalgia",
    "sciatica", "scoliosis", "hypertension", "osteoporosis", "migraine", "chronic_fatigue",
    "herniated_disc", "post_surgery_recovery", "general_wellness",
];

/// Characters that satisfy the password special-character rule
pub const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?~`";

const COMMON_PASSWORD_WORDS: [&str; 10] = [
    "password", "123456", "qwerty", "abc123", "letmein", "welcome", "admin", "iloveyou",
    "monkey", "dragon",
];

pub const MAX_POSTURES: usize = 50;
pub const DEFAULT_SESSION_DURATION: i64 = 30;

/// Machine-readable reason a field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Required,
    Length,
    Format,
    SuspiciousDomain,
    Empty,
    MultipleSpaces,
    NotANumber,
    OutOfRange,
    InvalidCharacters,
    MissingLowercase,
    MissingUppercase,
    MissingNumber,
    MissingSpecial,
    WeakPassword,
    InvalidType,
    NotArray,
    EmptyArray,
    TooManyItems,
    InvalidItem,
    MissingRequiredFields,
    InvalidPosture,
    TooShort,
    TooLong,
    InvalidContent,
    InvalidRole,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::Length => "LENGTH",
            Self::Format => "FORMAT",
            Self::SuspiciousDomain => "SUSPICIOUS_DOMAIN",
            Self::Empty => "EMPTY",
            Self::MultipleSpaces => "MULTIPLE_SPACES",
            Self::NotANumber => "NOT_A_NUMBER",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::InvalidCharacters => "INVALID_CHARACTERS",
            Self::MissingLowercase => "MISSING_LOWERCASE",
            Self::MissingUppercase => "MISSING_UPPERCASE",
            Self::MissingNumber => "MISSING_NUMBER",
            Self::MissingSpecial => "MISSING_SPECIAL",
            Self::WeakPassword => "WEAK_PASSWORD",
            Self::InvalidType => "INVALID_TYPE",
            Self::NotArray => "NOT_ARRAY",
            Self::EmptyArray => "EMPTY_ARRAY",
            Self::TooManyItems => "TOO_MANY_ITEMS",
            Self::InvalidItem => "INVALID_ITEM",
            Self::MissingRequiredFields => "MISSING_REQUIRED_FIELDS",
            Self::InvalidPosture => "INVALID_POSTURE",
            Self::TooShort => "TOO_SHORT",
            Self::TooLong => "TOO_LONG",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::InvalidRole => "INVALID_ROLE",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub field: String,
    pub code: ValidationCode,
}

impl ValidationError {
    pub fn new(field: &str, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: field.to_string(),
            code,
        }
    }
}

/// Posture reference as submitted in a series payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostureSelection {
    pub id: i64,
    pub name: String,
    pub duration_minutes: Option<i64>,
}

// -------------------------------------------------------------------------
// Shared helpers
// -------------------------------------------------------------------------

/// Outcome of integer parsing for numeric fields
#[derive(Debug, PartialEq, Eq)]
enum IntegerInput {
    Missing,
    Invalid,
    Value(i64),
}

/// Accepts JSON integers, integral floats and strings holding an integer.
fn parse_integer(raw: Option<&Value>) -> IntegerInput {
    match raw {
        None | Some(Value::Null) => IntegerInput::Missing,
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                IntegerInput::Value(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        IntegerInput::Value(f as i64)
                    }
                    _ => IntegerInput::Invalid,
                }
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                IntegerInput::Missing
            } else {
                trimmed
                    .parse::<i64>()
                    .map(IntegerInput::Value)
                    .unwrap_or(IntegerInput::Invalid)
            }
        }
        Some(_) => IntegerInput::Invalid,
    }
}

fn bounded_integer(
    raw: Option<&Value>,
    field: &str,
    label: &str,
    min: i64,
    max: i64,
) -> Result<i64, ValidationError> {
    let value = match parse_integer(raw) {
        IntegerInput::Missing => {
            return Err(ValidationError::new(field, ValidationCode::Required, format!("{} is required", label)))
        }
        IntegerInput::Invalid => {
            return Err(ValidationError::new(field, ValidationCode::NotANumber, format!("{} must be a whole number", label)))
        }
        IntegerInput::Value(v) => v,
    };

    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            ValidationCode::OutOfRange,
            format!("{} must be between {} and {}", label, min, max),
        ));
    }

    Ok(value)
}

/// Trimmed text, or REQUIRED when absent or blank
fn required_text<'a>(raw: Option<&'a str>, field: &str, label: &str) -> Result<&'a str, ValidationError> {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ValidationError::new(field, ValidationCode::Required, format!("{} is required", label))),
    }
}

fn check_length(value: &str, field: &str, label: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::new(
            field,
            ValidationCode::Length,
            format!("{} must be between {} and {} characters", label, min, max),
        ));
    }
    Ok(())
}

// -------------------------------------------------------------------------
// Field validators
// -------------------------------------------------------------------------

/// Validate an email address; returns it trimmed and lowercased
pub fn validate_email(raw: Option<&str>) -> Result<String, ValidationError> {
    let email = required_text(raw, "email", "Email")?.to_lowercase();

    check_length(&email, "email", "Email", 5, 254)?;

    if !EMAIL_REGEX.is_match(&email) {
        return Err(ValidationError::new("email", ValidationCode::Format, "Invalid email format"));
    }

    let domain = email.rsplit('@').next().unwrap_or_default();
    if SUSPICIOUS_DOMAINS.contains(&domain) {
        return Err(ValidationError::new(
            "email",
            ValidationCode::SuspiciousDomain,
            format!("The domain '{}' looks like a typo", domain),
        ));
    }

    Ok(email)
}

/// Validate a person's name; returns it trimmed
pub fn validate_name(raw: Option<&str>) -> Result<String, ValidationError> {
    let raw = match raw {
        Some(s) if !s.is_empty() => s,
        _ => return Err(ValidationError::new("name", ValidationCode::Required, "Name is required")),
    };

    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::new("name", ValidationCode::Empty, "Name cannot be only spaces"));
    }

    check_length(name, "name", "Name", 2, 50)?;

    if !NAME_REGEX.is_match(name) {
        return Err(ValidationError::new("name", ValidationCode::Format, "Name may only contain letters and spaces"));
    }

    if name.contains("  ") {
        return Err(ValidationError::new(
            "name",
            ValidationCode::MultipleSpaces,
            "Name cannot contain consecutive spaces",
        ));
    }

    Ok(name.to_string())
}

/// Validate a patient's age in years
pub fn validate_age(raw: Option<&Value>) -> Result<i64, ValidationError> {
    bounded_integer(raw, "age", "Age", 1, 120)
}

/// Validate a medical condition; returns it lowercased with whitespace runs
/// replaced by underscores
pub fn validate_medical_condition(raw: Option<&str>) -> Result<String, ValidationError> {
    let trimmed = required_text(raw, "condition", "Condition")?;
    let condition = WHITESPACE_RUN.replace_all(&trimmed.to_lowercase(), "_").into_owned();

    check_length(&condition, "condition", "Condition", 3, 200)?;

    if KNOWN_CONDITIONS.contains(&condition.as_str()) || CONDITION_REGEX.is_match(&condition) {
        Ok(condition)
    } else {
        Err(ValidationError::new(
            "condition",
            ValidationCode::InvalidCharacters,
            "Condition contains invalid characters",
        ))
    }
}

/// Validate password strength; the password is returned unchanged
pub fn validate_password(raw: Option<&str>) -> Result<String, ValidationError> {
    let password = match raw {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ValidationError::new("password", ValidationCode::Required, "Password is required")),
    };

    check_length(password, "password", "Password", 8, 128)?;

    if !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        return Err(ValidationError::new(
            "password",
            ValidationCode::MissingSpecial,
            "Password must contain at least one special character",
        ));
    }
    if !password.chars().any(char::is_lowercase) {
        return Err(ValidationError::new(
            "password",
            ValidationCode::MissingLowercase,
            "Password must contain at least one lowercase letter",
        ));
    }
    if !password.chars().any(char::is_uppercase) {
        return Err(ValidationError::new(
            "password",
            ValidationCode::MissingUppercase,
            "Password must contain at least one uppercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new(
            "password",
            ValidationCode::MissingNumber,
            "Password must contain at least one number",
        ));
    }
    if is_weak_password(password) {
        return Err(ValidationError::new(
            "password",
            ValidationCode::WeakPassword,
            "Password is too common. Please choose a stronger password.",
        ));
    }

    Ok(password.to_string())
}

/// Repeated single character, common words, all digits or all letters
fn is_weak_password(password: &str) -> bool {
    let mut chars = password.chars();
    let all_same = match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    };
    let lower = password.to_lowercase();

    all_same
        || COMMON_PASSWORD_WORDS.iter().any(|w| lower.contains(w))
        || password.chars().all(|c| c.is_ascii_digit())
        || password.chars().all(char::is_alphabetic)
}

/// Validate a therapy series name; returns it trimmed
pub fn validate_series_name(raw: Option<&str>) -> Result<String, ValidationError> {
    let name = required_text(raw, "name", "Series name")?;

    check_length(name, "name", "Series name", 3, 100)?;

    if !SERIES_NAME_REGEX.is_match(name) {
        return Err(ValidationError::new(
            "name",
            ValidationCode::InvalidCharacters,
            "Series name may only contain letters, numbers, spaces and - _ . , ( )",
        ));
    }

    Ok(name.to_string())
}

/// Validate that a therapy type exists in the posture catalog
pub fn validate_therapy_type(raw: Option<&str>) -> Result<String, ValidationError> {
    let therapy_type = match raw {
        Some(t) if !t.is_empty() => t,
        _ => {
            return Err(ValidationError::new(
                "therapyType",
                ValidationCode::Required,
                "Therapy type is required",
            ))
        }
    };

    if !catalog::is_therapy_type(therapy_type) {
        return Err(ValidationError::new(
            "therapyType",
            ValidationCode::InvalidType,
            format!(
                "Invalid therapy type. Must be one of: {}",
                catalog::therapy_type_keys().join(", ")
            ),
        ));
    }

    Ok(therapy_type.to_string())
}

/// Validate the posture list of a series payload
pub fn validate_postures(raw: Option<&Value>) -> Result<Vec<PostureSelection>, ValidationError> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(ValidationError::new(
                "postures",
                ValidationCode::NotArray,
                "Postures must be a list",
            ))
        }
    };

    if items.is_empty() {
        return Err(ValidationError::new(
            "postures",
            ValidationCode::EmptyArray,
            "Select at least one posture",
        ));
    }
    if items.len() > MAX_POSTURES {
        return Err(ValidationError::new(
            "postures",
            ValidationCode::TooManyItems,
            format!("A series can have at most {} postures", MAX_POSTURES),
        ));
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_posture_item(index, item))
        .collect()
}

fn parse_posture_item(index: usize, item: &Value) -> Result<PostureSelection, ValidationError> {
    let invalid = |message: String| ValidationError::new("postures", ValidationCode::InvalidItem, message);

    let object = item
        .as_object()
        .ok_or_else(|| invalid(format!("Posture #{} must be an object", index + 1)))?;

    let (raw_id, name) = match (object.get("id"), object.get("name").and_then(Value::as_str)) {
        (Some(id), Some(name)) if !id.is_null() && !name.trim().is_empty() => (id, name.trim()),
        _ => {
            return Err(ValidationError::new(
                "postures",
                ValidationCode::MissingRequiredFields,
                format!("Posture #{} must have an id and a name", index + 1),
            ))
        }
    };

    let id = match parse_integer(Some(raw_id)) {
        IntegerInput::Value(id) => id,
        _ => return Err(invalid(format!("Posture #{} has an invalid id", index + 1))),
    };

    let raw_duration = object.get("durationMinutes").or_else(|| object.get("duration"));
    let duration_minutes = match parse_integer(raw_duration) {
        IntegerInput::Missing => None,
        IntegerInput::Value(d) if (1..=60).contains(&d) => Some(d),
        _ => {
            return Err(invalid(format!(
                "Posture #{} duration must be between 1 and 60 minutes",
                index + 1
            )))
        }
    };

    Ok(PostureSelection {
        id,
        name: name.to_string(),
        duration_minutes,
    })
}

/// Resolve selections against the catalog entry of `therapy_type`
pub fn resolve_postures(
    therapy_type: &str,
    selections: &[PostureSelection],
) -> Result<Vec<SeriesPosture>, ValidationError> {
    selections
        .iter()
        .map(|selection| {
            let posture = catalog::find_posture(therapy_type, selection.id).ok_or_else(|| {
                ValidationError::new(
                    "postures",
                    ValidationCode::InvalidPosture,
                    format!("Posture {} is not part of the '{}' catalog", selection.id, therapy_type),
                )
            })?;

            Ok(SeriesPosture {
                posture_id: posture.id,
                name: posture.name.clone(),
                sanskrit: Some(posture.sanskrit.clone()),
                duration_minutes: selection.duration_minutes.unwrap_or(posture.duration_hint),
            })
        })
        .collect()
}

/// Validate the number of sessions in a series
pub fn validate_total_sessions(raw: Option<&Value>) -> Result<i64, ValidationError> {
    bounded_integer(raw, "totalSessions", "Total sessions", 1, 100)
}

/// Validate a 0-10 pain score reported under `field`
pub fn validate_pain_level(raw: Option<&Value>, field: &str) -> Result<i64, ValidationError> {
    bounded_integer(raw, field, "Pain level", 0, 10)
}

/// Validate session comments; returns them trimmed
pub fn validate_comments(raw: Option<&str>, min_length: usize) -> Result<String, ValidationError> {
    let comments = required_text(raw, "comments", "Comments")?;
    let len = comments.chars().count();

    if len < min_length {
        return Err(ValidationError::new(
            "comments",
            ValidationCode::TooShort,
            format!("Comments must be at least {} characters", min_length),
        ));
    }
    if len > 1000 {
        return Err(ValidationError::new(
            "comments",
            ValidationCode::TooLong,
            "Comments must be at most 1000 characters",
        ));
    }
    if !comments.chars().any(char::is_alphabetic) {
        return Err(ValidationError::new(
            "comments",
            ValidationCode::InvalidContent,
            "Comments must contain some text",
        ));
    }

    Ok(comments.to_string())
}

/// Validate a session duration in minutes, defaulting to 30 when absent
pub fn validate_duration(raw: Option<&Value>) -> Result<i64, ValidationError> {
    match parse_integer(raw) {
        IntegerInput::Missing => Ok(DEFAULT_SESSION_DURATION),
        IntegerInput::Invalid => Err(ValidationError::new(
            "durationMinutes",
            ValidationCode::NotANumber,
            "Duration must be a whole number of minutes",
        )),
        IntegerInput::Value(d) if !(5..=180).contains(&d) => Err(ValidationError::new(
            "durationMinutes",
            ValidationCode::OutOfRange,
            "Duration must be between 5 and 180 minutes",
        )),
        IntegerInput::Value(d) => Ok(d),
    }
}

/// Validate a user role, defaulting to instructor when absent
pub fn validate_user_role(raw: Option<&str>) -> Result<Role, ValidationError> {
    match raw {
        None | Some("") => Ok(Role::Instructor),
        Some(r) => Role::from_str(r).map_err(|_| {
            ValidationError::new(
                "role",
                ValidationCode::InvalidRole,
                "Invalid role. Must be one of: instructor, patient, admin",
            )
        }),
    }
}

// -------------------------------------------------------------------------
// Collect-all validation
// -------------------------------------------------------------------------

/// Entities accepted by the pre-validation endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Patient,
    Series,
    Session,
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "patient" => Ok(Self::Patient),
            "series" => Ok(Self::Series),
            "session" => Ok(Self::Session),
            _ => Err(format!("Unknown entity: {}", s)),
        }
    }
}

/// Collects errors from independent validators
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error, if any, and hand back the value
    pub fn check<T>(&mut self, result: Result<T, ValidationError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

fn text_field<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

/// Run every validator for `entity` against `body` and return all failures
pub fn validate_entity(
    entity: EntityKind,
    body: &Map<String, Value>,
    comments_min_length: usize,
) -> Vec<ValidationError> {
    let mut report = ValidationReport::new();

    match entity {
        EntityKind::User => {
            report.check(validate_email(text_field(body, "email")));
            report.check(validate_password(text_field(body, "password")));
            report.check(validate_name(text_field(body, "name")));
            report.check(validate_user_role(text_field(body, "role")));
        }
        EntityKind::Patient => {
            report.check(validate_name(text_field(body, "name")));
            report.check(validate_email(text_field(body, "email")));
            report.check(validate_age(body.get("age")));
            if body.get("condition").is_some_and(|c| !c.is_null()) {
                report.check(validate_medical_condition(text_field(body, "condition")));
            }
        }
        EntityKind::Series => {
            report.check(validate_series_name(text_field(body, "name")));
            let therapy_type = report.check(validate_therapy_type(text_field(body, "therapyType")));
            let selections = report.check(validate_postures(body.get("postures")));
            report.check(validate_total_sessions(body.get("totalSessions")));

            if let (Some(therapy_type), Some(selections)) = (therapy_type, selections) {
                report.check(resolve_postures(&therapy_type, &selections));
            }
        }
        EntityKind::Session => {
            report.check(validate_pain_level(body.get("painBefore"), "painBefore"));
            report.check(validate_pain_level(body.get("painAfter"), "painAfter"));
            report.check(validate_comments(text_field(body, "comments"), comments_min_length));
            report.check(validate_duration(body.get("durationMinutes")));
        }
    }

    report.into_errors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code_of<T: std::fmt::Debug>(result: Result<T, ValidationError>) -> ValidationCode {
        result.unwrap_err().code
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email(Some("  Ana@Example.COM ")).unwrap(), "ana@example.com");
        assert!(validate_email(Some("first.last+tag@sub.example.org")).is_ok());

        assert_eq!(code_of(validate_email(None)), ValidationCode::Required);
        assert_eq!(code_of(validate_email(Some("   "))), ValidationCode::Required);
        assert_eq!(code_of(validate_email(Some("a@b"))), ValidationCode::Length);
        assert_eq!(code_of(validate_email(Some("not-an-email"))), ValidationCode::Format);
        assert_eq!(code_of(validate_email(Some("ana@example"))), ValidationCode::Format);
        assert_eq!(code_of(validate_email(Some("ana@gmial.com"))), ValidationCode::SuspiciousDomain);

        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(code_of(validate_email(Some(&long))), ValidationCode::Length);
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name(Some("  María José ")).unwrap(), "María José");
        assert!(validate_name(Some("Søren")).is_ok());

        assert_eq!(code_of(validate_name(None)), ValidationCode::Required);
        assert_eq!(code_of(validate_name(Some(""))), ValidationCode::Required);
        assert_eq!(code_of(validate_name(Some("    "))), ValidationCode::Empty);
        assert_eq!(code_of(validate_name(Some("A"))), ValidationCode::Length);
        assert_eq!(code_of(validate_name(Some(&"a".repeat(51)))), ValidationCode::Length);
        assert_eq!(code_of(validate_name(Some("R2D2"))), ValidationCode::Format);
        assert_eq!(code_of(validate_name(Some("Ana  Maria"))), ValidationCode::MultipleSpaces);
    }

    #[test]
    fn test_validate_age() {
        assert_eq!(validate_age(Some(&json!(35))).unwrap(), 35);
        assert_eq!(validate_age(Some(&json!("42"))).unwrap(), 42);
        assert_eq!(validate_age(Some(&json!(" 7 "))).unwrap(), 7);
        assert_eq!(validate_age(Some(&json!(30.0))).unwrap(), 30);

        assert_eq!(code_of(validate_age(None)), ValidationCode::Required);
        assert_eq!(code_of(validate_age(Some(&Value::Null))), ValidationCode::Required);
        assert_eq!(code_of(validate_age(Some(&json!("")))), ValidationCode::Required);
        assert_eq!(code_of(validate_age(Some(&json!("abc")))), ValidationCode::NotANumber);
        assert_eq!(code_of(validate_age(Some(&json!(12.5)))), ValidationCode::NotANumber);
        assert_eq!(code_of(validate_age(Some(&json!(true)))), ValidationCode::NotANumber);
        assert_eq!(code_of(validate_age(Some(&json!(0)))), ValidationCode::OutOfRange);
        assert_eq!(code_of(validate_age(Some(&json!(121)))), ValidationCode::OutOfRange);
    }

    #[test]
    fn test_age_accepted_iff_integer_in_range() {
        for a in -5..=130 {
            let ok = validate_age(Some(&json!(a))).is_ok();
            assert_eq!(ok, (1..=120).contains(&a), "age {}", a);
            let ok = validate_age(Some(&json!(a.to_string()))).is_ok();
            assert_eq!(ok, (1..=120).contains(&a), "age string {}", a);
        }
    }

    #[test]
    fn test_validate_medical_condition() {
        assert_eq!(validate_medical_condition(Some("  Back Pain ")).unwrap(), "back_pain");
        assert_eq!(
            validate_medical_condition(Some("Chronic knee pain (left)")).unwrap(),
            "chronic_knee_pain_(left)"
        );
        assert_eq!(validate_medical_condition(Some("Anxiety")).unwrap(), "anxiety");

        assert_eq!(code_of(validate_medical_condition(None)), ValidationCode::Required);
        assert_eq!(code_of(validate_medical_condition(Some("ab"))), ValidationCode::Length);
        assert_eq!(
            code_of(validate_medical_condition(Some("pain; DROP TABLE"))),
            ValidationCode::InvalidCharacters
        );
    }

    #[test]
    fn test_validate_password() {
        assert_eq!(validate_password(Some("Str0ng!Pass")).unwrap(), "Str0ng!Pass");

        assert_eq!(code_of(validate_password(None)), ValidationCode::Required);
        assert_eq!(code_of(validate_password(Some("Sh0rt!"))), ValidationCode::Length);
        assert_eq!(code_of(validate_password(Some("NoSpecial123"))), ValidationCode::MissingSpecial);
        assert_eq!(code_of(validate_password(Some("UPPER0NLY!"))), ValidationCode::MissingLowercase);
        assert_eq!(code_of(validate_password(Some("lower0nly!"))), ValidationCode::MissingUppercase);
        assert_eq!(code_of(validate_password(Some("NoDigits!Here"))), ValidationCode::MissingNumber);
        assert_eq!(code_of(validate_password(Some("MyPassword1!"))), ValidationCode::WeakPassword);
        assert_eq!(code_of(validate_password(Some("Qwerty99!x"))), ValidationCode::WeakPassword);
    }

    #[test]
    fn test_missing_special_iff_no_special_char() {
        let samples = [
            "abcdefgh", "ABCDEFGH", "12345678", "Abcdef12", "Abcdef1!", "abc!defg", "ABC#1234",
            "Password1", "Tr1cky_pw", "Plain Text 9", "Ünïcödé99", "x~y~z~w~", "Br3ak{}it",
        ];
        for p in samples {
            let has_special = p.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c));
            let missing_special = matches!(
                validate_password(Some(p)),
                Err(ValidationError { code: ValidationCode::MissingSpecial, .. })
            );
            assert_eq!(missing_special, !has_special, "password {:?}", p);
        }
    }

    #[test]
    fn test_weak_password_patterns() {
        assert!(is_weak_password("aaaaaaaa"));
        assert!(is_weak_password("12345678"));
        assert!(is_weak_password("abcdefgh"));
        assert!(is_weak_password("xxLetMeIn1!"));
        assert!(!is_weak_password("Tr1cky_pw"));
    }

    #[test]
    fn test_validate_series_name() {
        assert_eq!(validate_series_name(Some(" Serie Lumbar (fase 1) ")).unwrap(), "Serie Lumbar (fase 1)");

        assert_eq!(code_of(validate_series_name(Some(""))), ValidationCode::Required);
        assert_eq!(code_of(validate_series_name(Some("ab"))), ValidationCode::Length);
        assert_eq!(code_of(validate_series_name(Some(&"x".repeat(101)))), ValidationCode::Length);
        assert_eq!(code_of(validate_series_name(Some("Calm <script>"))), ValidationCode::InvalidCharacters);
    }

    #[test]
    fn test_validate_therapy_type() {
        assert_eq!(validate_therapy_type(Some("back_pain")).unwrap(), "back_pain");
        assert_eq!(code_of(validate_therapy_type(None)), ValidationCode::Required);
        assert_eq!(code_of(validate_therapy_type(Some("yoga_nidra"))), ValidationCode::InvalidType);
    }

    #[test]
    fn test_validate_postures() {
        let selections = validate_postures(Some(&json!([
            {"id": 1, "name": "Postura del Niño"},
            {"id": "2", "name": "Gato-Vaca", "duration": 8},
        ])))
        .unwrap();
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[0].duration_minutes, None);
        assert_eq!(selections[1].id, 2);
        assert_eq!(selections[1].duration_minutes, Some(8));

        assert_eq!(code_of(validate_postures(None)), ValidationCode::NotArray);
        assert_eq!(code_of(validate_postures(Some(&json!({"id": 1})))), ValidationCode::NotArray);
        assert_eq!(code_of(validate_postures(Some(&json!([])))), ValidationCode::EmptyArray);
        assert_eq!(code_of(validate_postures(Some(&json!([42])))), ValidationCode::InvalidItem);
        assert_eq!(
            code_of(validate_postures(Some(&json!([{"id": 1}])))),
            ValidationCode::MissingRequiredFields
        );
        assert_eq!(
            code_of(validate_postures(Some(&json!([{"id": 1, "name": "x", "duration": 0}])))),
            ValidationCode::InvalidItem
        );

        let many: Vec<Value> = (0..51).map(|i| json!({"id": i, "name": "p"})).collect();
        assert_eq!(code_of(validate_postures(Some(&Value::Array(many)))), ValidationCode::TooManyItems);
    }

    #[test]
    fn test_resolve_postures_against_catalog() {
        let selections = vec![
            PostureSelection { id: 1, name: "Postura del Niño".into(), duration_minutes: None },
            PostureSelection { id: 2, name: "Gato-Vaca".into(), duration_minutes: Some(12) },
        ];
        let postures = resolve_postures("anxiety", &selections).unwrap();
        assert_eq!(postures[0].posture_id, 1);
        assert_eq!(postures[0].duration_minutes, 5);
        assert_eq!(postures[1].duration_minutes, 12);

        // Posture 13 belongs to arthritis
        let foreign = vec![PostureSelection { id: 13, name: "Cobra".into(), duration_minutes: None }];
        assert_eq!(code_of(resolve_postures("anxiety", &foreign)), ValidationCode::InvalidPosture);
    }

    #[test]
    fn test_validate_total_sessions_and_pain() {
        assert_eq!(validate_total_sessions(Some(&json!(10))).unwrap(), 10);
        assert_eq!(code_of(validate_total_sessions(Some(&json!(0)))), ValidationCode::OutOfRange);
        assert_eq!(code_of(validate_total_sessions(Some(&json!(101)))), ValidationCode::OutOfRange);

        assert_eq!(validate_pain_level(Some(&json!(0)), "painBefore").unwrap(), 0);
        assert_eq!(validate_pain_level(Some(&json!("10")), "painAfter").unwrap(), 10);
        let err = validate_pain_level(Some(&json!(11)), "painAfter").unwrap_err();
        assert_eq!(err.code, ValidationCode::OutOfRange);
        assert_eq!(err.field, "painAfter");
        assert_eq!(code_of(validate_pain_level(None, "painBefore")), ValidationCode::Required);
    }

    #[test]
    fn test_validate_comments() {
        assert_eq!(code_of(validate_comments(Some("ok"), 10)), ValidationCode::TooShort);
        assert_eq!(validate_comments(Some("Felt great today"), 10).unwrap(), "Felt great today");
        assert_eq!(validate_comments(Some("ok"), 2).unwrap(), "ok");

        assert_eq!(code_of(validate_comments(None, 10)), ValidationCode::Required);
        assert_eq!(code_of(validate_comments(Some("1234567890!!"), 10)), ValidationCode::InvalidContent);
        assert_eq!(code_of(validate_comments(Some(&"a".repeat(1001)), 10)), ValidationCode::TooLong);
    }

    #[test]
    fn test_validate_duration() {
        assert_eq!(validate_duration(None).unwrap(), 30);
        assert_eq!(validate_duration(Some(&Value::Null)).unwrap(), 30);
        assert_eq!(validate_duration(Some(&json!(45))).unwrap(), 45);
        assert_eq!(code_of(validate_duration(Some(&json!("long")))), ValidationCode::NotANumber);
        assert_eq!(code_of(validate_duration(Some(&json!(4)))), ValidationCode::OutOfRange);
        assert_eq!(code_of(validate_duration(Some(&json!(181)))), ValidationCode::OutOfRange);
    }

    #[test]
    fn test_validate_user_role() {
        assert_eq!(validate_user_role(None).unwrap(), Role::Instructor);
        assert_eq!(validate_user_role(Some("patient")).unwrap(), Role::Patient);
        assert_eq!(validate_user_role(Some("admin")).unwrap(), Role::Admin);
        assert_eq!(code_of(validate_user_role(Some("superuser"))), ValidationCode::InvalidRole);
    }

    #[test]
    fn test_validators_idempotent() {
        let email = validate_email(Some("  Mixed.Case@Example.com")).unwrap();
        assert_eq!(validate_email(Some(&email)).unwrap(), email);

        let name = validate_name(Some("  José Luis ")).unwrap();
        assert_eq!(validate_name(Some(&name)).unwrap(), name);

        let condition = validate_medical_condition(Some(" Lower   Back Pain ")).unwrap();
        assert_eq!(validate_medical_condition(Some(&condition)).unwrap(), condition);

        let series = validate_series_name(Some("  Calma Profunda ")).unwrap();
        assert_eq!(validate_series_name(Some(&series)).unwrap(), series);

        let comments = validate_comments(Some("  Much better today  "), 10).unwrap();
        assert_eq!(validate_comments(Some(&comments), 10).unwrap(), comments);

        let age = validate_age(Some(&json!("64"))).unwrap();
        assert_eq!(validate_age(Some(&json!(age))).unwrap(), age);

        let role = validate_user_role(None).unwrap();
        assert_eq!(validate_user_role(Some(&role.to_string())).unwrap(), role);
    }

    #[test]
    fn test_validate_entity_collects_all_errors() {
        let body = json!({
            "email": "bad",
            "password": "short",
            "name": "X",
            "role": "root",
        });
        let errors = validate_entity(EntityKind::User, body.as_object().unwrap(), 10);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "password", "name", "role"]);

        let body = json!({
            "painBefore": 7,
            "painAfter": 3,
            "comments": "Felt great today",
        });
        assert!(validate_entity(EntityKind::Session, body.as_object().unwrap(), 10).is_empty());
    }

    #[test]
    fn test_validate_entity_series_checks_catalog() {
        let body = json!({
            "name": "Calma",
            "therapyType": "anxiety",
            "postures": [{"id": 25, "name": "Postura del Niño"}],
            "totalSessions": 8,
        });
        let errors = validate_entity(EntityKind::Series, body.as_object().unwrap(), 10);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ValidationCode::InvalidPosture);
    }

    #[test]
    fn test_entity_kind_from_str() {
        assert_eq!(EntityKind::from_str("Patient").unwrap(), EntityKind::Patient);
        assert!(EntityKind::from_str("invoice").is_err());
    }
}
