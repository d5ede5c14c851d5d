//! Error taxonomy for the replication session core
//!
//! A single `ReplicationError` enum replaces the C original's module-level
//! `(pghx_error, pghx_error_info)` pair with a proper `Result`-carried
//! error. Every variant corresponds one-to-one with an entry in the
//! `pghx_error_type` enum it was distilled from.

use thiserror::Error;

/// Coarse classification of a [`ReplicationError`], for callers that want
/// to `match` on failure category without destructuring the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoError,
    Io,
    OutOfMemory,
    Connection,
    Password,
    Command,
    Query,
    StreamProtocol,
    Replication,
    NoSlot,
    BadPlugin,
    Status,
    Parse,
}

/// Main error type for the replication session core.
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("password required: {0}")]
    Password(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("replication error: {0}")]
    Replication(String),

    #[error("no such replication slot: {0}")]
    NoSlot(String),

    #[error("replication slot uses an unexpected output plugin: {0}")]
    BadPlugin(String),

    #[error("unexpected slot status: {0}")]
    Status(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid C string: {0}")]
    NulError(#[from] std::ffi::NulError),
}

pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicationError::Io(_) => ErrorKind::Io,
            ReplicationError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            ReplicationError::Connection(_) => ErrorKind::Connection,
            ReplicationError::Password(_) => ErrorKind::Password,
            ReplicationError::Command(_) => ErrorKind::Command,
            ReplicationError::Query(_) => ErrorKind::Query,
            ReplicationError::StreamProtocol(_) => ErrorKind::StreamProtocol,
            ReplicationError::Replication(_) => ErrorKind::Replication,
            ReplicationError::NoSlot(_) => ErrorKind::NoSlot,
            ReplicationError::BadPlugin(_) => ErrorKind::BadPlugin,
            ReplicationError::Status(_) => ErrorKind::Status,
            ReplicationError::Parse(_) => ErrorKind::Parse,
            ReplicationError::NulError(_) => ErrorKind::Parse,
        }
    }

    pub fn out_of_memory<S: Into<String>>(msg: S) -> Self {
        Self::OutOfMemory(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    pub fn password<S: Into<String>>(msg: S) -> Self {
        Self::Password(msg.into())
    }

    pub fn command<S: Into<String>>(msg: S) -> Self {
        Self::Command(msg.into())
    }

    pub fn query<S: Into<String>>(msg: S) -> Self {
        Self::Query(msg.into())
    }

    pub fn stream_protocol<S: Into<String>>(msg: S) -> Self {
        Self::StreamProtocol(msg.into())
    }

    pub fn replication<S: Into<String>>(msg: S) -> Self {
        Self::Replication(msg.into())
    }

    pub fn no_slot<S: Into<String>>(msg: S) -> Self {
        Self::NoSlot(msg.into())
    }

    pub fn bad_plugin<S: Into<String>>(msg: S) -> Self {
        Self::BadPlugin(msg.into())
    }

    pub fn status<S: Into<String>>(msg: S) -> Self {
        Self::Status(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }
}
