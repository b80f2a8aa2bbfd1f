//! Input validation and phone number normalization.
//!
//! `normalize_phone` is the single number normalization used by the store,
//! the contact directory adapters, ingestion and outbound sends, so the same
//! physical number always compares equal. `normalize_address` wraps it for
//! sender addresses, which may be alphanumeric ("ALERTS").

use crate::error::{Result, ShieldError};

/// Strip every character that is not an ASCII digit or `+`.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect()
}

/// Normalize a sender address. Numbers go through [`normalize_phone`];
/// an address without any digit or `+` (an alphanumeric sender id) is kept
/// as written, trimmed. Empty only when the address is blank.
#[must_use]
pub fn normalize_address(raw: &str) -> String {
    let phone = normalize_phone(raw);
    if phone.is_empty() {
        raw.trim().to_string()
    } else {
        phone
    }
}

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a phone number and return its normalized form
    pub fn validate_phone(phone: &str) -> Result<String> {
        if phone.trim().is_empty() {
            return Err(ShieldError::InvalidInput("Phone number cannot be empty".into()));
        }

        let normalized = normalize_phone(phone);
        let digits = normalized.chars().filter(char::is_ascii_digit).count();

        // Short codes ("7726") are valid SMS senders
        if !(3..=15).contains(&digits) {
            return Err(ShieldError::InvalidInput(format!(
                "Phone number must contain between 3 and 15 digits: {phone}"
            )));
        }

        if normalized.rfind('+').is_some_and(|pos| pos > 0) {
            return Err(ShieldError::InvalidInput(format!(
                "'+' is only allowed as the first character: {phone}"
            )));
        }

        Ok(normalized)
    }

    /// Validate contact name
    pub fn validate_contact_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ShieldError::InvalidInput("Contact name cannot be empty".into()));
        }

        if name.chars().count() > 100 {
            return Err(ShieldError::InvalidInput(
                "Contact name too long (max 100 characters)".into(),
            ));
        }

        if name.contains('\0') || name.contains('\r') || name.contains('\n') {
            return Err(ShieldError::InvalidInput(
                "Contact name contains invalid characters".into(),
            ));
        }

        Ok(())
    }

    /// Validate a message body. Bodies are stored verbatim, so only
    /// emptiness is rejected.
    pub fn validate_body(body: &str) -> Result<()> {
        if body.is_empty() {
            return Err(ShieldError::InvalidInput("Message body cannot be empty".into()));
        }
        Ok(())
    }

    /// Clamp a requested page size into `1..=max`, using `default` for zero
    #[must_use]
    pub fn clamp_page_limit(limit: usize, default: usize, max: usize) -> usize {
        if limit == 0 {
            default.min(max)
        } else {
            limit.min(max)
        }
    }

    /// Sanitize display text (names coming from external directories)
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
