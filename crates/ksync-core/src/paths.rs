use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Working-copy directory for a repository: a readable name plus a short hash
/// of the URL so two repositories with the same name never share a checkout.
pub fn working_copy_path(root: &Path, name: &str, url: &str) -> PathBuf {
    root.join(format!("{}-{}", sanitize_repo_name(name), url_digest(url)))
}

pub fn url_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().trim_end_matches('/').as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

fn sanitize_repo_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
