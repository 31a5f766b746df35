//! Input checks shared by the three core services.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CrmError;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("EMAIL is a valid regex pattern")
});

const PHONE_MIN_DIGITS: usize = 10;
const PHONE_MAX_DIGITS: usize = 15;

pub fn required(field: &'static str, value: &str) -> Result<(), CrmError> {
    if value.trim().is_empty() {
        return Err(CrmError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

pub fn email(value: &str) -> Result<(), CrmError> {
    required("email", value)?;
    if !EMAIL.is_match(value) {
        return Err(CrmError::InvalidRequest("email is malformed".to_string()));
    }
    Ok(())
}

/// Empty means "no phone" and yields `None`.
pub fn phone(value: &str) -> Result<Option<&str>, CrmError> {
    if value.is_empty() {
        return Ok(None);
    }
    let digits = value.len();
    if !value.bytes().all(|b| b.is_ascii_digit())
        || !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits)
    {
        return Err(CrmError::InvalidRequest(format!(
            "phone must be {PHONE_MIN_DIGITS} to {PHONE_MAX_DIGITS} digits"
        )));
    }
    Ok(Some(value))
}
