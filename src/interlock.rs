//! Single-instance process interlock (spec.md §4.8, last paragraph).
//!
//! Grounded on the ledger CLI's use of this core: a server process wants to
//! refuse to start a second time against the same on-disk database, and
//! wants any peer process launched against the same path to be able to
//! discover the port the first instance is already listening on.
//!
//! The path is hashed with SHA-1 so the lock name and the discovery file
//! name are fixed-size and filesystem/OS-mutex-name safe regardless of the
//! original path's length or characters.

use std::fs;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Computes the hex-encoded SHA-1 digest of `path`'s absolute, canonical
/// form, used both as the OS mutex name and the discovery file suffix.
fn path_digest(path: &Path) -> Result<String> {
    let absolute = path.canonicalize().map_err(Error::Io)?;
    let bytes = absolute.to_string_lossy().into_owned();
    let mut hasher = Sha1::new();
    hasher.update(bytes.as_bytes());
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Path of the discovery file a peer process reads to find the port the
/// holder of the lock is listening on.
pub fn discovery_file(path: &Path) -> Result<std::path::PathBuf> {
    let hex = path_digest(path)?;
    Ok(std::env::temp_dir().join(format!("budget_byte_{}", hex)))
}

/// A held process-wide lock keyed by an on-disk path. Dropping the guard
/// releases the lock and removes the discovery file.
pub struct SingleInstanceGuard {
    discovery_path: std::path::PathBuf,
    // Held only for its `Drop` impl, which releases the OS-level lock.
    #[allow(dead_code)]
    inner: sys::Lock,
}

impl SingleInstanceGuard {
    /// Attempts to acquire the lock for `path`, failing with
    /// [`Error::AlreadyRunning`] if another process already holds it.
    /// On success, writes `port` to the discovery file so peers can find
    /// the listening socket.
    pub fn acquire(path: &Path, port: u16) -> Result<Self> {
        let hex = path_digest(path)?;
        let inner = sys::Lock::try_acquire(&hex)?;
        let discovery_path = std::env::temp_dir().join(format!("budget_byte_{}", hex));
        fs::write(&discovery_path, port.to_string()).map_err(Error::Io)?;
        Ok(SingleInstanceGuard { discovery_path, inner })
    }

    /// Reads back the port written by [`Self::acquire`] for `path`, if a
    /// holder has published one.
    pub fn discover_port(path: &Path) -> Result<Option<u16>> {
        let hex = path_digest(path)?;
        let discovery_path = std::env::temp_dir().join(format!("budget_byte_{}", hex));
        match fs::read_to_string(&discovery_path) {
            Ok(contents) => Ok(contents.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.discovery_path);
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::CString;

    use crate::error::{Error, Result};

    pub(super) struct Lock {
        fd: libc::c_int,
    }

    impl Lock {
        pub(super) fn try_acquire(hex: &str) -> Result<Self> {
            let path = std::env::temp_dir().join(format!("budget_byte_{}.lock", hex));
            let c_path = CString::new(path.to_string_lossy().into_owned())
                .map_err(|e| Error::Handshake(e.to_string()))?;
            let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
            if fd < 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                unsafe { libc::close(fd) };
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(Error::AlreadyRunning);
                }
                return Err(Error::Io(err));
            }
            Ok(Lock { fd })
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            unsafe {
                libc::flock(self.fd, libc::LOCK_UN);
                libc::close(self.fd);
            }
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;

    use windows_sys::Win32::Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, HANDLE};
    use windows_sys::Win32::System::Threading::CreateMutexW;

    use crate::error::{Error, Result};

    pub(super) struct Lock {
        handle: HANDLE,
    }

    impl Lock {
        pub(super) fn try_acquire(hex: &str) -> Result<Self> {
            let name: Vec<u16> = OsStr::new(&format!("Global\\budget_byte_{}", hex))
                .encode_wide()
                .chain(std::iter::once(0))
                .collect();
            let handle = unsafe { CreateMutexW(std::ptr::null(), 1, name.as_ptr()) };
            if handle.is_null() {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            let last_error = unsafe { windows_sys::Win32::Foundation::GetLastError() };
            if last_error == ERROR_ALREADY_EXISTS {
                unsafe { CloseHandle(handle) };
                return Err(Error::AlreadyRunning);
            }
            Ok(Lock { handle })
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            unsafe { CloseHandle(self.handle) };
        }
    }

    unsafe impl Send for Lock {}
    unsafe impl Sync for Lock {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = std::env::temp_dir().join(format!("waveloop-interlock-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("ledger.db");
        File::create(&db_path).unwrap();

        {
            let guard = SingleInstanceGuard::acquire(&db_path, 4242).unwrap();
            assert_eq!(SingleInstanceGuard::discover_port(&db_path).unwrap(), Some(4242));
            drop(guard);
        }
        assert_eq!(SingleInstanceGuard::discover_port(&db_path).unwrap(), None);

        let guard = SingleInstanceGuard::acquire(&db_path, 7777).unwrap();
        assert_eq!(SingleInstanceGuard::discover_port(&db_path).unwrap(), Some(7777));
        drop(guard);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = std::env::temp_dir().join(format!("waveloop-interlock-test2-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("ledger.db");
        File::create(&db_path).unwrap();

        let first = SingleInstanceGuard::acquire(&db_path, 1).unwrap();
        let second = SingleInstanceGuard::acquire(&db_path, 2);
        assert!(matches!(second, Err(Error::AlreadyRunning)));
        drop(first);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
