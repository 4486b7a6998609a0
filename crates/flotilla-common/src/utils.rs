//! Utility functions for Flotilla
//!
//! Common helper functions used across the codebase.

use std::sync::LazyLock;

/// Stack names double as compose project names on the agents
static STACK_NAME_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-z0-9][a-z0-9_-]*$").expect("Invalid regex pattern"));

/// Validate a stack name
///
/// Stack names must start with a lowercase letter or digit and may then contain
/// lowercase letters, digits, underscores and hyphens.
///
/// # Examples
///
/// ```
/// use flotilla_common::is_valid_stack_name;
///
/// assert!(is_valid_stack_name("web-frontend"));
/// assert!(is_valid_stack_name("app_2"));
/// assert!(!is_valid_stack_name("Web"));
/// assert!(!is_valid_stack_name("-leading"));
/// assert!(!is_valid_stack_name(""));
/// ```
pub fn is_valid_stack_name(name: &str) -> bool {
    STACK_NAME_PATTERN.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_stack_name() {
        assert!(is_valid_stack_name("nginx"));
        assert!(is_valid_stack_name("0day"));
        assert!(!is_valid_stack_name("with space"));
        assert!(!is_valid_stack_name("dots.are.bad"));
    }
}
