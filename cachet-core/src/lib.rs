//! Cachet Core Library
//!
//! This library implements an encrypted append-log secret store: every
//! record is sealed independently with authenticated encryption, mutations
//! are persisted as single-record fragment files, and the engine compacts
//! fragments back into a snapshot file on every unlock.

pub mod api;
pub mod archive;
pub mod crypto;
pub mod engine;
pub mod index;
pub mod record;
pub mod storage;

pub use api::SecretStore;
pub use crypto::{
    derive_user_key, generate_master_key, generate_password, new_nonce, CryptoError, Nonce,
    SecretKey,
};
pub use engine::{Engine, DEFAULT_VALID_TERM};
pub use index::RecordIndex;
pub use record::{format_datetime, Fragment, HistoryEntry, Operation, Record, RecordForm};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// General error type for store operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("title must not be empty")]
    NeedTitle,

    #[error("alias already in use: {0}")]
    AliasConflict(String),

    #[error("wrong user password")]
    BadUserKey,

    #[error("user password is correct but the internal key is broken")]
    InternalKeyError,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store file already exists; refusing to create it again")]
    AlreadyExists,

    #[error("store already holds records; reset before rebuilding")]
    NotEmpty,

    #[error("duplicate history datetime: {0}")]
    DuplicateHistoryDatetime(String),

    #[error("history entry not found: {0}")]
    HistoryNotFound(String),

    #[error("unknown operation code: {0}")]
    UnknownOperation(u8),

    #[error("fragment replay failed at {file}: {source}")]
    FragmentReplay {
        file: String,
        #[source]
        source: Box<Error>,
    },

    #[error("snapshot file is empty")]
    EmptySnapshot,

    #[error("store is locked")]
    StoreLocked,

    #[error("session expired; the store has been locked")]
    SessionExpired,

    #[error("downloaded data does not match the in-memory store")]
    DumpMismatch,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store lock poisoned by a panicking thread")]
    LockPoisoned,

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("could not read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
