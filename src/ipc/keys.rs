use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::IpcError;
use crate::source::SourceKind;

/// Token file both sides hand to `ftok`. Must exist.
pub const DEFAULT_KEY_PATH: &str = "/tmp/lsdvis.ipc";

/// `ftok` project ids for one source variant. Each variant gets its own pair
/// so a pipe bridge and a capture bridge can publish side by side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salts {
    pub semaphore: i32,
    pub segment: i32,
}

impl Salts {
    pub fn for_source(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Pipe => Salts {
                semaphore: 321,
                segment: 123,
            },
            SourceKind::Capture => Salts {
                semaphore: 654,
                segment: 456,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelKeys {
    pub semaphore: libc::key_t,
    pub segment: libc::key_t,
}

impl ChannelKeys {
    pub fn derive(path: &Path, salts: Salts) -> Result<Self, IpcError> {
        Ok(Self {
            semaphore: ftok(path, salts.semaphore)?,
            segment: ftok(path, salts.segment)?,
        })
    }
}

fn ftok(path: &Path, salt: i32) -> Result<libc::key_t, IpcError> {
    let key_error = |source: io::Error| IpcError::Key {
        path: path.display().to_string(),
        salt,
        source,
    };

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| key_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let key = unsafe { libc::ftok(c_path.as_ptr(), salt) };
    if key == -1 {
        return Err(key_error(io::Error::last_os_error()));
    }
    Ok(key)
}
