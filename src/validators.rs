//! Input validation and sanitization functions for ordfw
//!
//! This module provides centralized validation for rule labels, interface names and
//! address set names. Functions return `Result<_, String>` so callers can attach the
//! offending field when converting into [`crate::Error::Validation`].

/// Maximum length of a rule name
pub const MAX_NAME_LEN: usize = 64;

/// Maximum length of a free-text description
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Sanitizes a label for safe display and logging.
///
/// Removes control characters, quotes, and shell metacharacters.
/// Limits length to 64 bytes (ASCII characters only).
///
/// # Examples
///
/// ```
/// use ordfw::validators::sanitize_label;
///
/// let safe = sanitize_label("Normal Label");
/// assert_eq!(safe, "Normal Label");
///
/// let unsafe_label = "Test\nNewline\"Quote";
/// let safe = sanitize_label(unsafe_label);
/// assert!(!safe.contains('\n'));
/// assert!(!safe.contains('"'));
/// ```
pub fn sanitize_label(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ':'))
        .take(MAX_NAME_LEN)
        .collect()
}

/// Validates a rule name.
///
/// Names are stored verbatim, so anything [`sanitize_label`] would strip is rejected
/// rather than silently rewritten.
///
/// # Errors
///
/// Returns `Err` if the name exceeds 64 characters or contains characters outside
/// the label alphabet.
pub fn validate_label(input: &str) -> Result<(), String> {
    if input.len() > MAX_NAME_LEN {
        return Err(format!("Name too long (max {MAX_NAME_LEN} characters)"));
    }

    if sanitize_label(input) != input {
        return Err("Name contains invalid characters (use a-z, 0-9, space, - _ . :)".into());
    }

    Ok(())
}

/// Validates a free-text description.
///
/// # Errors
///
/// Returns `Err` if the description is longer than 256 bytes or contains control
/// characters.
pub fn validate_description(input: &str) -> Result<(), String> {
    if input.len() > MAX_DESCRIPTION_LEN {
        return Err(format!(
            "Description too long (max {MAX_DESCRIPTION_LEN} characters)"
        ));
    }

    if input.chars().any(char::is_control) {
        return Err("Description contains control characters".into());
    }

    Ok(())
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// An empty name is accepted here; callers that require an interface use
/// [`validate_egress`].
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Ok(());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(())
}

/// Validates the egress interface of a NAT rule, which is mandatory.
///
/// # Errors
///
/// Returns `Err` if the name is blank or violates [`validate_interface`].
pub fn validate_egress(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Egress interface is required".to_string());
    }
    validate_interface(name)
}

/// Validates the name of an address set.
///
/// Constraints:
/// - 1 to 64 characters
/// - ASCII alphanumerics plus `_`, `-` and `.`
/// - Not "." or ".."
///
/// # Errors
///
/// Returns `Err` describing the first violated constraint.
pub fn validate_set_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Address set name cannot be empty".into());
    }

    if name.len() > 64 {
        return Err("Address set name too long (max 64 chars)".into());
    }

    if name == "." || name == ".." {
        return Err("Invalid address set name".into());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err("Address set name contains invalid characters (use a-z, 0-9, _, -, .)".into());
    }

    Ok(())
}
