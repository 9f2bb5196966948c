use ksync_core::error::SyncError;

const MAX_NAME_LEN: usize = 100;
const MAX_REF_LEN: usize = 255;
const FORBIDDEN_REF_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// GitHub owner or repository name.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), SyncError> {
    if value.is_empty() || value.len() > MAX_NAME_LEN {
        return Err(SyncError::validation(
            field,
            format!("must be 1-{MAX_NAME_LEN} characters"),
        ));
    }
    if value == "." || value == ".." {
        return Err(SyncError::validation(field, format!("{value:?} is reserved")));
    }
    if let Some(bad) = value
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')))
    {
        return Err(SyncError::validation(
            field,
            format!("unexpected character {bad:?}"),
        ));
    }
    Ok(())
}

/// Branch name or revision id, checked against the git ref rules that matter
/// for URL safety.
pub fn validate_ref(field: &'static str, value: &str) -> Result<(), SyncError> {
    if value.is_empty() || value.len() > MAX_REF_LEN {
        return Err(SyncError::validation(
            field,
            format!("must be 1-{MAX_REF_LEN} characters"),
        ));
    }
    if value.starts_with('-') || value.starts_with('/') {
        return Err(SyncError::validation(field, "must not start with '-' or '/'"));
    }
    if value.contains("..") {
        return Err(SyncError::validation(field, "must not contain '..'"));
    }
    if let Some(bad) = value
        .chars()
        .find(|ch| ch.is_whitespace() || ch.is_control() || FORBIDDEN_REF_CHARS.contains(ch))
    {
        return Err(SyncError::validation(
            field,
            format!("unexpected character {bad:?}"),
        ));
    }
    Ok(())
}

pub(crate) fn normalize_branch(value: &str) -> &str {
    value.trim().trim_start_matches("refs/heads/")
}
