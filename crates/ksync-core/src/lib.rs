pub mod changes;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod interrupted;
pub mod journal;
pub mod lockfile;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod provider;
pub mod recovery;
pub mod reindex;
pub mod store;
pub mod watcher;
pub mod working_copy;

