//! A minimal network-accessible, delta-compressed, content-addressed
//! version-control service for binary blobs.
//!
//! See [`Repository`] for the storage engine and [`server`] for the TCP
//! front-end that exposes it over the wire.

use std::io;

mod delta;
mod digest;
mod objectstore;
mod repository;
mod server;
mod wire;

pub use repository::{FileVersion, Repository};
pub use server::Server;

/// delta codec, object store, repository engine, wire protocol
pub mod internals {
    pub(crate) use super::{objectstore::ObjectStore, Error, Result};
    pub use super::{
        delta::{decode, encode, encode_with_min_match},
        digest::{digest, ContentDigest},
    };
}

/// Errors that can occur during repository manipulation or wire handling.
#[derive(Debug)]
pub enum Error {
    /// A delta's opcodes are malformed or reference bytes outside the base.
    CorruptDelta,
    /// A referenced version hash does not exist for this file.
    VersionNotFound,
    /// The named file has no head on the given branch.
    FileNotInBranch,
    /// The named branch does not exist.
    BranchNotFound,
    /// `restore_file` was called on a head that is not a tombstone.
    FileVersionNotDeleted,
    /// A request frame was malformed or used an unknown opcode.
    ProtocolError,
    /// A hex string did not decode to a valid digest.
    InvalidObject,
    IoError(io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptDelta => write!(f, "corrupt delta"),
            Self::VersionNotFound => write!(f, "version not found"),
            Self::FileNotInBranch => write!(f, "file not in branch"),
            Self::BranchNotFound => write!(f, "branch not found"),
            Self::FileVersionNotDeleted => write!(f, "file version is not a tombstone"),
            Self::ProtocolError => write!(f, "protocol error"),
            Self::InvalidObject => write!(f, "invalid object digest"),
            Self::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

/// `Result<T, Error>`
pub type Result<T> = core::result::Result<T, Error>;
