use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the selector grammar, the stores and the resolver.
///
/// The CLI layer branches on the variant to decide what to print; nothing
/// below it writes to stderr or exits the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Selector text that does not match the grammar.
    #[error("{0}")]
    Parse(String),

    /// No satellite or record matches the requested key at all.
    #[error("no record matching {field}={value}")]
    NotFound { field: String, value: String },

    /// The object is known, but the (source, offset, date) combination
    /// yields nothing. Carries the normalized selector string.
    #[error("no data for {request}")]
    NoData { request: String },

    /// Archive insertion collision. Recoverable with `force`.
    #[error("the file {0} already exists")]
    FileExists(PathBuf),

    /// Input text contained zero parseable records.
    #[error("{src} contains no TLE")]
    EmptyInput { src: String },

    #[error("alias '{name}' already exists for '{selector}'")]
    AliasExists { name: String, selector: String },

    #[error("the tag '{tag}' is already taken by {file}")]
    TagExists { tag: String, file: String },

    #[error("invalid CCSDS document: {0}")]
    Ccsds(String),

    #[error("invalid TLE: {0}")]
    Tle(String),

    #[error("{0}")]
    Fetch(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("tag file: {0}")]
    Tags(#[from] serde_yaml::Error),

    #[error("config file: {0}")]
    Config(#[from] toml::de::Error),
}
