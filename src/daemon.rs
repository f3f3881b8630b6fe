use crate::error::{LisoError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

static LOCK_FD: AtomicI32 = AtomicI32::new(-1);

/// Detach into the background: fork (parent exits success), start a new
/// session, take an exclusive advisory lock on the lock file, record the
/// pid there, and point stdin/stdout at /dev/null. Only the first instance
/// gets past the lock.
pub fn daemonize(lock_file: &Path) -> Result<()> {
    match unsafe { libc::fork() } {
        -1 => return Err(std::io::Error::last_os_error().into()),
        0 => {} // child carries on
        _ => {
            // parent: hand every descriptor back and report success
            let max_fd = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } as i32;
            for fd in (0..max_fd.max(0)).rev() {
                unsafe {
                    libc::close(fd);
                }
            }
            unsafe { libc::_exit(libc::EXIT_SUCCESS) }
        }
    }

    unsafe {
        libc::setsid();
        libc::umask(0o027);
    }
    let pid = unsafe { libc::getpid() };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o640)
        .open(lock_file)
        .map_err(|e| LisoError::Lock(format!("cannot open {}: {e}", lock_file.display())))?;

    if unsafe { libc::lockf(file.as_raw_fd(), libc::F_TLOCK, 0) } < 0 {
        return Err(LisoError::Lock(format!(
            "cannot lock {}: {}",
            lock_file.display(),
            std::io::Error::last_os_error()
        )));
    }

    writeln!(file, "{pid}")
        .map_err(|e| LisoError::Lock(format!("cannot record pid: {e}")))?;

    println!("Successfully daemonized liso, pid {pid}.");

    // the descriptor must outlive this call or the lock goes with it
    LOCK_FD.store(file.into_raw_fd(), Ordering::SeqCst);

    // stub out stdin/stdout for the daemon's lifetime
    unsafe {
        libc::close(libc::STDIN_FILENO);
        libc::close(libc::STDOUT_FILENO);
        libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY);
        libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
    }

    Ok(())
}

/// Drop the exclusive lock on the way out.
pub fn release_lock() {
    let fd = LOCK_FD.swap(-1, Ordering::SeqCst);
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}
