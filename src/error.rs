//! Error types for DRM plane composition

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open DRM device {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what} query failed: {source}")]
    Query {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u32 },

    #[error("no connected display with at least one mode")]
    NoActiveDisplay,

    #[error("dumb buffer allocation {width}x{height}@{bpp} rejected: {source}")]
    Alloc {
        width: u32,
        height: u32,
        bpp: u32,
        #[source]
        source: io::Error,
    },

    #[error("dumb buffer mapping failed: {0}")]
    Map(#[source] io::Error),

    #[error("framebuffer registration failed: {0}")]
    Register(#[source] io::Error),

    #[error("no suitable plane for CRTC {crtc}")]
    NoSuitablePlane { crtc: u32 },

    #[error("binding plane {plane} failed with status {status}")]
    Bind { plane: u32, status: i32 },

    #[error("mode setting failed: {0}")]
    ModeSetting(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session is {state:?}, step needs {expected:?}")]
    InvalidState { state: SessionState, expected: SessionState },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit status for this error kind
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Io(_) => 1,
            Error::DeviceOpen { .. } => 2,
            Error::Query { .. } => 3,
            Error::NotFound { .. } => 4,
            Error::NoActiveDisplay => 5,
            Error::Alloc { .. } => 6,
            Error::Map(_) => 7,
            Error::Register(_) => 8,
            Error::NoSuitablePlane { .. } => 9,
            Error::Bind { .. } => 10,
            Error::ModeSetting(_) => 11,
            Error::Config(_) => 12,
            Error::InvalidState { .. } => 13,
        }
    }

    /// Classify a failed object lookup: `ENOENT` means the object is gone
    pub(crate) fn lookup(kind: &'static str, id: u32, source: io::Error) -> Self {
        if source.raw_os_error() == Some(libc::ENOENT) {
            Error::NotFound { kind, id }
        } else {
            Error::Query { what: kind, source }
        }
    }

    pub(crate) fn bind(plane: u32, source: &io::Error) -> Self {
        Error::Bind {
            plane,
            status: source.raw_os_error().map_or(-1, |errno| -errno),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            Error::Io(io::Error::other("x")),
            Error::DeviceOpen { path: "/dev/null".into(), source: io::Error::other("x") },
            Error::Query { what: "resources", source: io::Error::other("x") },
            Error::NotFound { kind: "plane", id: 1 },
            Error::NoActiveDisplay,
            Error::Alloc { width: 1, height: 1, bpp: 32, source: io::Error::other("x") },
            Error::Map(io::Error::other("x")),
            Error::Register(io::Error::other("x")),
            Error::NoSuitablePlane { crtc: 1 },
            Error::Bind { plane: 1, status: -22 },
            Error::ModeSetting("x".into()),
            Error::Config("x".into()),
            Error::InvalidState {
                state: SessionState::Uninitialized,
                expected: SessionState::DeviceOpen,
            },
        ];
        let mut codes: Vec<u8> = errors.iter().map(Error::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_lookup_classification() {
        let gone = Error::lookup("connector", 7, io::Error::from_raw_os_error(libc::ENOENT));
        assert!(matches!(gone, Error::NotFound { kind: "connector", id: 7 }));

        let other = Error::lookup("connector", 7, io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(other, Error::Query { what: "connector", .. }));
    }

    #[test]
    fn test_bind_status_is_negated_errno() {
        let err = Error::bind(31, &io::Error::from_raw_os_error(libc::EINVAL));
        assert!(matches!(err, Error::Bind { plane: 31, status } if status == -libc::EINVAL));
    }
}
