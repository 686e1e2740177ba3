use std::io;
use std::ptr::{self, NonNull};

use super::keys::ChannelKeys;
use crate::audio::frames::{BandVector, BAND_VECTOR_BYTES};
use crate::error::IpcError;

const PERMS: libc::c_int = 0o666;

/// Attachment to a System V semaphore + shared segment pair holding one
/// `BandVector`.
///
/// Dropping detaches the segment. The semaphore and segment themselves belong
/// to whoever created them and are never removed from here.
pub struct IpcChannel {
    semid: libc::c_int,
    shmid: libc::c_int,
    segment: NonNull<u8>,
}

// The mapping is process-wide; the pointer stays valid on any thread until drop.
unsafe impl Send for IpcChannel {}

impl IpcChannel {
    /// Look up resources created by the consumer side. Never creates.
    pub fn open(keys: &ChannelKeys) -> Result<Self, IpcError> {
        // SAFETY: plain syscalls on integer arguments.
        let semid = unsafe { libc::semget(keys.semaphore, 1, PERMS) };
        if semid < 0 {
            return Err(IpcError::Semaphore(io::Error::last_os_error()));
        }

        let shmid = unsafe { libc::shmget(keys.segment, BAND_VECTOR_BYTES, PERMS) };
        if shmid < 0 {
            return Err(IpcError::Segment(io::Error::last_os_error()));
        }

        Self::attach(semid, shmid)
    }

    /// Create the semaphore (initialised to 0) and segment, the way the
    /// visualiser host does before spawning its bridges. Fails if either
    /// already exists.
    pub fn create(keys: &ChannelKeys) -> Result<Self, IpcError> {
        let semid = unsafe {
            libc::semget(keys.semaphore, 1, PERMS | libc::IPC_CREAT | libc::IPC_EXCL)
        };
        if semid < 0 {
            return Err(IpcError::Semaphore(io::Error::last_os_error()));
        }
        if unsafe { libc::semctl(semid, 0, libc::SETVAL, 0) } < 0 {
            let err = io::Error::last_os_error();
            remove_semaphore(semid);
            return Err(IpcError::Semaphore(err));
        }

        let shmid =
            unsafe { libc::shmget(keys.segment, BAND_VECTOR_BYTES, PERMS | libc::IPC_CREAT | libc::IPC_EXCL) };
        if shmid < 0 {
            let err = io::Error::last_os_error();
            remove_semaphore(semid);
            return Err(IpcError::Segment(err));
        }

        Self::attach(semid, shmid).inspect_err(|_| {
            remove_semaphore(semid);
            remove_segment(shmid);
        })
    }

    pub(crate) fn attach(semid: libc::c_int, shmid: libc::c_int) -> Result<Self, IpcError> {
        // SAFETY: a null address lets the kernel pick the mapping.
        let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(IpcError::Attach(io::Error::last_os_error()));
        }
        let segment = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| IpcError::Attach(io::Error::other("shmat returned null")))?;

        Ok(Self {
            semid,
            shmid,
            segment,
        })
    }

    pub fn semaphore_id(&self) -> libc::c_int {
        self.semid
    }

    pub fn segment_id(&self) -> libc::c_int {
        self.shmid
    }

    /// Write `bands` under the semaphore.
    ///
    /// Waits for the count to reach zero and takes it in one atomic step,
    /// overwrites the whole segment, then gives it back. Blocks for as long
    /// as a reader holds the semaphore.
    pub fn publish(&self, bands: &BandVector) -> Result<(), IpcError> {
        let undo = libc::SEM_UNDO as libc::c_short;
        self.semop(&mut [op(0, undo), op(1, undo)], "acquire")?;

        // SAFETY: the segment is BAND_VECTOR_BYTES long and we hold the semaphore.
        unsafe {
            ptr::copy_nonoverlapping(
                bands.as_bytes().as_ptr(),
                self.segment.as_ptr(),
                BAND_VECTOR_BYTES,
            );
        }

        self.semop(&mut [op(-1, undo)], "release")
    }

    /// The consumer's side of the handshake: take without waiting, copy the
    /// segment out, release. Returns `IpcError::Busy` if the semaphore is held.
    pub fn read(&self) -> Result<BandVector, IpcError> {
        let nowait = libc::IPC_NOWAIT as libc::c_short;
        match self.semop(&mut [op(0, nowait), op(1, nowait)], "acquire") {
            Err(IpcError::Handshake { source, .. })
                if source.raw_os_error() == Some(libc::EAGAIN) =>
            {
                return Err(IpcError::Busy)
            }
            other => other?,
        }

        let mut bytes = [0u8; BAND_VECTOR_BYTES];
        // SAFETY: as in publish.
        unsafe {
            ptr::copy_nonoverlapping(self.segment.as_ptr(), bytes.as_mut_ptr(), BAND_VECTOR_BYTES);
        }

        self.semop(&mut [op(-1, nowait)], "release")?;
        BandVector::from_bytes(&bytes).ok_or_else(|| IpcError::Segment(io::ErrorKind::InvalidData.into()))
    }

    fn semop(&self, ops: &mut [libc::sembuf], what: &'static str) -> Result<(), IpcError> {
        // SAFETY: ops points to ops.len() initialised sembufs.
        let rc = unsafe { libc::semop(self.semid, ops.as_mut_ptr(), ops.len()) };
        if rc < 0 {
            return Err(IpcError::Handshake {
                op: what,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        // SAFETY: segment came from shmat and is detached exactly once.
        if unsafe { libc::shmdt(self.segment.as_ptr() as *const libc::c_void) } < 0 {
            log::warn!("shmdt failed: {}", io::Error::last_os_error());
        } else {
            log::debug!("Detached shared segment {}", self.shmid);
        }
    }
}

/// Undo a partial `create`; failures here are logged, the original error wins.
fn remove_semaphore(semid: libc::c_int) {
    if unsafe { libc::semctl(semid, 0, libc::IPC_RMID) } < 0 {
        log::warn!("Failed to remove semaphore {}: {}", semid, io::Error::last_os_error());
    }
}

fn remove_segment(shmid: libc::c_int) {
    if unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) } < 0 {
        log::warn!("Failed to remove shared segment {}: {}", shmid, io::Error::last_os_error());
    }
}

fn op(sem_op: libc::c_short, sem_flg: libc::c_short) -> libc::sembuf {
    libc::sembuf {
        sem_num: 0,
        sem_op,
        sem_flg,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::PrivateChannel;
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn publish_then_read_round_trips() {
        let fixture = PrivateChannel::new();
        let writer = fixture.attach();
        let reader = fixture.attach();

        assert_eq!(reader.read().unwrap(), BandVector::default());
        writer.publish(&BandVector([0.25, 1.5, 3.0])).unwrap();
        assert_eq!(reader.read().unwrap(), BandVector([0.25, 1.5, 3.0]));
        assert_eq!(fixture.semaphore(), 0);
    }

    #[test]
    fn read_reports_busy_while_held() {
        let fixture = PrivateChannel::new();
        let reader = fixture.attach();
        fixture.set_semaphore(1);
        assert!(matches!(reader.read(), Err(IpcError::Busy)));
    }

    #[test]
    fn publish_waits_for_reader_to_release() {
        let fixture = PrivateChannel::new();
        let channel = fixture.attach();
        // a reader is mid-copy and never lets go until we say so
        fixture.set_semaphore(1);

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let result = channel.publish(&BandVector([9.0, 8.0, 7.0]));
            let _ = tx.send(result.is_ok());
            channel
        });

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        fixture.set_semaphore(0);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));

        let channel = handle.join().unwrap();
        assert_eq!(fixture.semaphore(), 0);
        assert_eq!(channel.read().unwrap(), BandVector([9.0, 8.0, 7.0]));
    }

    #[test]
    fn removed_semaphore_fails_the_handshake() {
        let fixture = PrivateChannel::new();
        let channel = fixture.attach();
        unsafe { libc::semctl(fixture.semid, 0, libc::IPC_RMID) };
        let err = channel.publish(&BandVector::default()).unwrap_err();
        assert!(matches!(err, IpcError::Handshake { op: "acquire", .. }));
    }

    #[test]
    fn created_channel_is_found_by_key() {
        use crate::ipc::keys::{ChannelKeys, Salts};
        use crate::source::SourceKind;

        let token = std::env::temp_dir().join(format!("bandpipe-create-{}", std::process::id()));
        std::fs::write(&token, b"").unwrap();
        let keys = ChannelKeys::derive(&token, Salts::for_source(SourceKind::Capture)).unwrap();

        let host = IpcChannel::create(&keys).unwrap();
        let fixture = PrivateChannel {
            semid: host.semaphore_id(),
            shmid: host.segment_id(),
        };
        assert!(matches!(IpcChannel::create(&keys), Err(IpcError::Semaphore(_))));

        let bridge = IpcChannel::open(&keys).unwrap();
        assert_eq!(bridge.semaphore_id(), host.semaphore_id());
        bridge.publish(&BandVector([0.5, 0.5, 0.5])).unwrap();
        assert_eq!(host.read().unwrap(), BandVector([0.5, 0.5, 0.5]));

        drop(bridge);
        drop(host);
        drop(fixture);
        std::fs::remove_file(&token).unwrap();
    }

    #[test]
    fn failed_create_leaves_no_semaphore_behind() {
        use crate::ipc::keys::{ChannelKeys, Salts};
        use crate::source::SourceKind;

        let token = std::env::temp_dir().join(format!("bandpipe-stale-{}", std::process::id()));
        std::fs::write(&token, b"").unwrap();
        let keys = ChannelKeys::derive(&token, Salts::for_source(SourceKind::Pipe)).unwrap();

        // a segment left over from an earlier host
        let stale = unsafe {
            libc::shmget(keys.segment, BAND_VECTOR_BYTES, PERMS | libc::IPC_CREAT | libc::IPC_EXCL)
        };
        assert!(stale >= 0, "shmget: {}", io::Error::last_os_error());

        assert!(matches!(IpcChannel::create(&keys), Err(IpcError::Segment(_))));
        assert!(unsafe { libc::semget(keys.semaphore, 1, PERMS) } < 0);

        remove_segment(stale);
        let host = IpcChannel::create(&keys).unwrap();
        let fixture = PrivateChannel {
            semid: host.semaphore_id(),
            shmid: host.segment_id(),
        };
        assert_eq!(fixture.semaphore(), 0);

        drop(host);
        drop(fixture);
        std::fs::remove_file(&token).unwrap();
    }
}
