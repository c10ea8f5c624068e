//! Shared-object name derivation.
//!
//! A producer session is advertised under `prefix.pid`, optionally qualified
//! by a sandboxing-domain namespace the host resolves; each connection block
//! hangs off that name with the connect token appended. Names are built into
//! a fixed inline buffer: overflow is a formatting error, never a silent
//! truncation.

use core::fmt::{self, Write as _};

use thiserror::Error;

/// Inline capacity of an [`ObjectName`]. Comfortably below the shortest
/// OS limit on shared-object names once the token suffix is added.
pub const NAME_CAPACITY: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("object name exceeds the fixed buffer")]
    Overflow,
    #[error("object name may not contain {0:?}")]
    InvalidCharacter(char),
}

/// A bounded, OS-safe shared-object name.
#[derive(Clone, Copy)]
pub struct ObjectName {
    buf: [u8; NAME_CAPACITY],
    len: usize,
}

impl ObjectName {
    fn new() -> Self {
        Self {
            buf: [0; NAME_CAPACITY],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        // The buffer is only ever filled through `push_str` below, which
        // copies whole UTF-8 strings.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({:?})", self.as_str())
    }
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ObjectName {}

/// `fmt::Write` adapter that records *why* a write failed, since `fmt::Error`
/// carries nothing.
struct NameWriter {
    name: ObjectName,
    error: Option<NameError>,
}

impl NameWriter {
    fn new() -> Self {
        Self {
            name: ObjectName::new(),
            error: None,
        }
    }

    fn finish(self) -> Result<ObjectName, NameError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.name),
        }
    }
}

impl fmt::Write for NameWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            // Path separators and NUL would change where the OS puts the
            // object; refuse rather than mangle.
            if ch == '/' || ch == '\\' || ch == '\0' {
                self.error = Some(NameError::InvalidCharacter(ch));
                return Err(fmt::Error);
            }
        }
        let bytes = s.as_bytes();
        if self.name.len + bytes.len() > NAME_CAPACITY {
            self.error = Some(NameError::Overflow);
            return Err(fmt::Error);
        }
        self.name.buf[self.name.len..self.name.len + bytes.len()].copy_from_slice(bytes);
        self.name.len += bytes.len();
        Ok(())
    }
}

/// Name of a producer session's rendezvous block.
///
/// `namespace` carries a sandboxing-domain qualifier when the producer runs
/// in a container whose named objects live under a per-domain prefix; the
/// caller resolves it, this function only folds it into the name.
pub fn session_name(
    prefix: &str,
    process_id: u32,
    namespace: Option<&str>,
) -> Result<ObjectName, NameError> {
    let mut w = NameWriter::new();
    let result = match namespace {
        Some(ns) => write!(w, "{ns}.{prefix}.{process_id}"),
        None => write!(w, "{prefix}.{process_id}"),
    };
    let _ = result;
    w.finish()
}

/// Name of the connection block a given connect token points at.
pub fn connection_name(session: &ObjectName, token: u64) -> Result<ObjectName, NameError> {
    let mut w = NameWriter::new();
    let _ = write!(w, "{session}.{token}");
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_name_folds_in_pid_and_namespace() {
        let plain = session_name("capture", 4242, None).unwrap();
        assert_eq!(plain.as_str(), "capture.4242");

        let qualified = session_name("capture", 4242, Some("sandbox-7")).unwrap();
        assert_eq!(qualified.as_str(), "sandbox-7.capture.4242");
    }

    #[test]
    fn connection_name_appends_the_token() {
        let session = session_name("capture", 1, None).unwrap();
        let conn = connection_name(&session, 17).unwrap();
        assert_eq!(conn.as_str(), "capture.1.17");
    }

    #[test]
    fn overflow_is_an_error_not_a_truncation() {
        let long = "x".repeat(NAME_CAPACITY);
        assert_eq!(
            session_name(&long, 1, None).unwrap_err(),
            NameError::Overflow
        );

        // Exactly at capacity still fails once the pid suffix lands.
        let nearly = "x".repeat(NAME_CAPACITY - 2);
        assert_eq!(
            session_name(&nearly, 12345, None).unwrap_err(),
            NameError::Overflow
        );
    }

    #[test]
    fn path_separators_are_rejected() {
        assert_eq!(
            session_name("bad/prefix", 1, None).unwrap_err(),
            NameError::InvalidCharacter('/')
        );
        assert_eq!(
            session_name("ok", 1, Some("domain\\sub")).unwrap_err(),
            NameError::InvalidCharacter('\\')
        );
    }
}
