pub mod github;
mod github_models;
pub mod http;
pub mod redact;
pub mod validate;
