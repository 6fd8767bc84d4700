//! Report protocol between an isolated UDF process and its parent.
//!
//! The child writes exactly one length-prefixed rkyv message to a pipe
//! before exiting. Format: 4-byte length (u32 LE) + rkyv-encoded message.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest diagnostic carried in a report. Keeps every report well under
/// the pipe buffer so the child never blocks on its final write.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Outcome reported by the child process.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ChildReport {
    /// The UDF ran to completion.
    Completed,

    /// The sandbox policy could not be installed; the UDF was not called.
    SandboxRejected {
        /// Diagnostic from the policy.
        message: String,
    },

    /// A UDF callback raised an error (or panicked).
    CallFailed {
        /// Which callback failed (`init`, `dynamic_dataset`, ...).
        callback: String,
        /// Diagnostic text.
        message: String,
    },
}

impl ChildReport {
    /// Build a `CallFailed` report, truncating the message.
    pub fn call_failed(callback: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CallFailed {
            callback: callback.into(),
            message: truncate(message.into()),
        }
    }

    /// Build a `SandboxRejected` report, truncating the message.
    pub fn sandbox_rejected(message: impl Into<String>) -> Self {
        Self::SandboxRejected {
            message: truncate(message.into()),
        }
    }

    /// Exit code the child uses alongside this report.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::CallFailed { .. } => 1,
            Self::SandboxRejected { .. } => 2,
        }
    }

    /// Convert into the parent-side result.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::SandboxRejected { message } => Err(Error::SandboxInitFailed(message)),
            Self::CallFailed { callback, message } => {
                Err(Error::InterpreterCallFailed { callback, message })
            }
        }
    }
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode report: {}", e)))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write report length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write report body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush report pipe: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// Returns `Ok(None)` if the stream ends before any byte is read, which is
/// what the parent sees when the child died without reporting.
///
/// # Safety
///
/// Uses unchecked deserialization. Only safe when reading from the pipe of a
/// child this process forked.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<Option<T>>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| Error::Ipc(format!("Failed to read report: {}", e)))?;
    if buf.is_empty() {
        return Ok(None);
    }

    if buf.len() < 4 {
        return Err(Error::Ipc(format!("Truncated report header: {} bytes", buf.len())));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() - 4 < len {
        return Err(Error::Ipc(format!(
            "Truncated report body: expected {} bytes, got {}",
            len,
            buf.len() - 4
        )));
    }

    // rkyv needs an aligned buffer.
    let mut body = rkyv::util::AlignedVec::<16>::with_capacity(len);
    body.extend_from_slice(&buf[4..4 + len]);

    // SAFETY: the bytes come from our own forked child.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&body) }
        .map_err(|e| Error::Serialization(format!("Failed to decode report: {}", e)))?;

    Ok(Some(message))
}
