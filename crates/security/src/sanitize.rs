//! Paw sanitizing.
//!
//! Paws arrive in agent-controlled beacon bodies and end up in log lines,
//! store keys and result file names.

/// Keep only `[A-Za-z0-9_.-]`.
pub fn sanitize_paw(paw: &str) -> String {
    paw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}
