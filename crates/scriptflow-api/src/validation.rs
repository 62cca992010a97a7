use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::ApiError;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});
static UPPERCASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]").expect("pattern compiles"));
static LOWERCASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z]").expect("pattern compiles"));
static DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]").expect("pattern compiles"));
static SPECIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[!@#$%^&*()_+\-=\[\]{};':"\\|,.<>/?]"#).expect("pattern compiles")
});

const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 100;

const COMMON_WEAK_PASSWORDS: [&str; 8] = [
    "password",
    "12345678",
    "qwerty123",
    "admin123",
    "letmein",
    "welcome123",
    "password123",
    "admin@123",
];

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL.is_match(email)
}

/// Every complexity rule the password breaks; empty when acceptable.
pub fn password_problems(password: &str) -> Vec<String> {
    let mut problems = Vec::new();
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        problems.push(format!(
            "Password must be at least {} characters long",
            PASSWORD_MIN
        ));
    }
    if len > PASSWORD_MAX {
        problems.push(format!(
            "Password must not exceed {} characters",
            PASSWORD_MAX
        ));
    }
    if !UPPERCASE.is_match(password) {
        problems.push("Password must contain at least one uppercase letter".into());
    }
    if !LOWERCASE.is_match(password) {
        problems.push("Password must contain at least one lowercase letter".into());
    }
    if !DIGIT.is_match(password) {
        problems.push("Password must contain at least one number".into());
    }
    if !SPECIAL.is_match(password) {
        problems.push("Password must contain at least one special character".into());
    }
    problems
}

pub fn is_weak_password(password: &str) -> bool {
    let lower = password.to_lowercase();
    COMMON_WEAK_PASSWORDS
        .iter()
        .any(|weak| lower.contains(weak) || weak.contains(lower.as_str()))
}

/// Collects per-field messages into a single validation error.
#[derive(Debug, Default)]
pub struct FieldErrors {
    fields: Map<String, Value>,
}

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let entry = self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(messages) = entry {
            messages.push(Value::String(message.into()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result(self, message: &str) -> Result<(), ApiError> {
        if self.is_empty() {
            return Ok(());
        }
        Err(ApiError::Validation {
            message: message.to_string(),
            details: Some(json!({ "fields": self.fields })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("writer@studio.io"));
        assert!(!is_valid_email("writer@studio"));
        assert!(!is_valid_email("writer studio@x.io"));
    }

    #[test]
    fn password_rules() {
        assert!(password_problems("Sc3ne!Heading").is_empty());
        let problems = password_problems("short");
        assert!(problems.iter().any(|p| p.contains("at least 8")));
        assert!(problems.iter().any(|p| p.contains("uppercase")));
        assert!(problems.iter().any(|p| p.contains("special")));
    }

    #[test]
    fn weak_passwords_are_caught() {
        assert!(is_weak_password("MyPassword123!"));
        assert!(is_weak_password("letmein"));
        assert!(!is_weak_password("Sc3ne!Heading"));
    }

    #[test]
    fn field_errors_group_by_field() {
        let mut errors = FieldErrors::default();
        errors.add("password", "too short");
        errors.add("password", "no digit");
        errors.add("email", "invalid");
        let err = errors.into_result("Invalid registration data").unwrap_err();
        match err {
            ApiError::Validation { details, .. } => {
                let details = details.unwrap();
                assert_eq!(details["fields"]["password"].as_array().unwrap().len(), 2);
                assert_eq!(details["fields"]["email"][0], "invalid");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
