//! Binary request/response framing over a plain `TcpStream`.
//!
//! Every value on the wire is one of five primitives: a little-endian
//! `u32`, a length-prefixed UTF-8 `string`, a length-prefixed `bytes`, a
//! single `bool` byte, or a `time` (an `i64` little-endian Unix-seconds
//! timestamp). A request begins with a `u32` opcode; a response always
//! begins with `bool success` then `string message`.

use std::io::{Read, Write};

use super::internals::ContentDigest;
use super::repository::FileVersion;
use super::{Error, Result};

pub const OP_SAVE_FILE: u32 = 0;
pub const OP_GET_LATEST: u32 = 1;
pub const OP_GET_VERSION: u32 = 2;
pub const OP_GET_BRANCHES: u32 = 3;
pub const OP_GET_HISTORY: u32 = 4;
pub const OP_DELETE_FILE: u32 = 5;
pub const OP_RESTORE_FILE: u32 = 6;
pub const OP_DELETE_BRANCH: u32 = 7;

fn read_u32(stream: &mut impl Read) -> Result<u32> {
    let mut bytes = [0; 4];
    stream.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn write_u32(stream: &mut impl Write, value: u32) -> Result<()> {
    Ok(stream.write_all(&value.to_le_bytes())?)
}

fn read_bytes(stream: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_u32(stream)? as usize;
    let mut bytes = vec![0; len];
    stream.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn write_bytes(stream: &mut impl Write, bytes: &[u8]) -> Result<()> {
    write_u32(stream, bytes.len() as u32)?;
    Ok(stream.write_all(bytes)?)
}

fn read_string(stream: &mut impl Read) -> Result<String> {
    let bytes = read_bytes(stream)?;
    String::from_utf8(bytes).map_err(|_| Error::ProtocolError)
}

fn write_string(stream: &mut impl Write, s: &str) -> Result<()> {
    write_bytes(stream, s.as_bytes())
}

fn write_bool(stream: &mut impl Write, b: bool) -> Result<()> {
    Ok(stream.write_all(&[b as u8])?)
}

fn write_time(stream: &mut impl Write, value: i64) -> Result<()> {
    Ok(stream.write_all(&value.to_le_bytes())?)
}

/// A decoded client request, tagged by the opcode it arrived with.
pub enum Request {
    SaveFile {
        name: String,
        branch: String,
        author: String,
        message: String,
        content: Vec<u8>,
    },
    GetLatest {
        name: String,
        branch: String,
    },
    GetVersion {
        name: String,
        version: ContentDigest,
    },
    GetBranches,
    GetHistory {
        name: String,
    },
    DeleteFile {
        name: String,
        branch: String,
        author: String,
        message: String,
    },
    RestoreFile {
        name: String,
        branch: String,
        author: String,
        message: String,
    },
    DeleteBranch {
        name: String,
    },
}

impl Request {
    /// Reads one opcode-discriminated request frame off `stream`.
    pub fn read(stream: &mut impl Read) -> Result<Self> {
        let opcode = read_u32(stream)?;

        Ok(match opcode {
            OP_SAVE_FILE => Request::SaveFile {
                name: read_string(stream)?,
                branch: read_string(stream)?,
                author: read_string(stream)?,
                message: read_string(stream)?,
                content: read_bytes(stream)?,
            },
            OP_GET_LATEST => Request::GetLatest {
                name: read_string(stream)?,
                branch: read_string(stream)?,
            },
            OP_GET_VERSION => {
                let name = read_string(stream)?;
                let version = read_string(stream)?;
                let version = ContentDigest::from_hex(&version).ok_or(Error::ProtocolError)?;
                Request::GetVersion { name, version }
            }
            OP_GET_BRANCHES => Request::GetBranches,
            OP_GET_HISTORY => Request::GetHistory {
                name: read_string(stream)?,
            },
            OP_DELETE_FILE => Request::DeleteFile {
                name: read_string(stream)?,
                branch: read_string(stream)?,
                author: read_string(stream)?,
                message: read_string(stream)?,
            },
            OP_RESTORE_FILE => Request::RestoreFile {
                name: read_string(stream)?,
                branch: read_string(stream)?,
                author: read_string(stream)?,
                message: read_string(stream)?,
            },
            OP_DELETE_BRANCH => Request::DeleteBranch {
                name: read_string(stream)?,
            },
            _ => return Err(Error::ProtocolError),
        })
    }
}

/// A response: the fixed `success`/`message` prefix, plus at most one
/// type-dependent payload, selected by the request type.
pub struct Response {
    pub success: bool,
    pub message: String,
    pub payload: Payload,
}

pub enum Payload {
    None,
    Content(Vec<u8>),
    Branches(Vec<String>),
    History(Vec<FileVersion>),
}

impl Response {
    pub fn ok(message: impl Into<String>, payload: Payload) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: Payload::None,
        }
    }

    pub fn write(&self, stream: &mut impl Write) -> Result<()> {
        write_bool(stream, self.success)?;
        write_string(stream, &self.message)?;

        if !self.success {
            return Ok(());
        }

        match &self.payload {
            Payload::None => Ok(()),
            Payload::Content(bytes) => write_bytes(stream, bytes),
            Payload::Branches(names) => {
                write_u32(stream, names.len() as u32)?;
                for name in names {
                    write_string(stream, name)?;
                }
                Ok(())
            }
            Payload::History(versions) => {
                write_u32(stream, versions.len() as u32)?;
                for version in versions {
                    write_string(stream, &version.hash.to_string())?;
                    write_string(
                        stream,
                        &version.parent_hash.map(|h| h.to_string()).unwrap_or_default(),
                    )?;
                    write_time(stream, version.timestamp)?;
                    write_string(stream, &version.author)?;
                    write_string(stream, &version.message)?;
                    write_bool(stream, version.is_delta)?;
                }
                Ok(())
            }
        }
    }
}
