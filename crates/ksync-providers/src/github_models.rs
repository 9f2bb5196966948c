use ksync_core::clock::parse_rfc3339_secs;
use ksync_core::model::{ChangedPath, HeadRevision, RevisionComparison, RevisionRelation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct CommitItem {
    pub(crate) sha: String,
    pub(crate) commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitDetail {
    #[serde(default)]
    pub(crate) message: String,
    pub(crate) author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitAuthor {
    #[serde(default)]
    pub(crate) name: String,
    pub(crate) date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompareItem {
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) total_commits: u32,
    #[serde(default)]
    pub(crate) files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompareFile {
    pub(crate) filename: String,
    pub(crate) status: String,
    pub(crate) previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RateLimitItem {
    pub(crate) rate: RateInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RateInfo {
    pub(crate) remaining: u32,
    pub(crate) reset: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) message: Option<String>,
}

impl CommitItem {
    pub(crate) fn into_head(self) -> HeadRevision {
        let (author, committed_at) = match self.commit.author {
            Some(author) => (
                author.name,
                author.date.as_deref().and_then(parse_rfc3339_secs),
            ),
            None => (String::new(), None),
        };
        HeadRevision {
            sha: self.sha,
            message: first_line(&self.commit.message).to_string(),
            author,
            committed_at,
        }
    }
}

impl CompareItem {
    pub(crate) fn into_comparison(self, base: &str, head: &str) -> RevisionComparison {
        RevisionComparison {
            base: base.to_string(),
            head: head.to_string(),
            relation: map_relation(&self.status),
            total_commits: self.total_commits,
            files: self.files.into_iter().filter_map(map_file).collect(),
        }
    }
}

pub(crate) fn map_relation(status: &str) -> RevisionRelation {
    match status {
        "ahead" => RevisionRelation::Ahead,
        "identical" => RevisionRelation::Identical,
        "behind" => RevisionRelation::Behind,
        "diverged" => RevisionRelation::Diverged,
        _ => RevisionRelation::Unknown,
    }
}

fn map_file(file: CompareFile) -> Option<ChangedPath> {
    match file.status.as_str() {
        "added" | "copied" => Some(ChangedPath::added(file.filename)),
        "modified" | "changed" => Some(ChangedPath::modified(file.filename)),
        "removed" => Some(ChangedPath::deleted(file.filename)),
        "renamed" => Some(match file.previous_filename {
            Some(previous) => ChangedPath::renamed(previous, file.filename),
            None => ChangedPath::added(file.filename),
        }),
        _ => None,
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default().trim()
}
