use std::sync::atomic::{AtomicBool, Ordering};

static TERMINATED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_term(_sig: libc::c_int) {
    TERMINATED.store(true, Ordering::SeqCst);
}

extern "C" fn on_hup(_sig: libc::c_int) {
    // received, deliberately ignored
}

/// Collect every exited child without blocking; any number may have died
/// since the last delivery.
extern "C" fn on_chld(_sig: libc::c_int) {
    let mut status: libc::c_int = 0;
    loop {
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
        if pid <= 0 {
            break;
        }
    }
}

fn handler(f: extern "C" fn(libc::c_int)) -> libc::sighandler_t {
    f as usize as libc::sighandler_t
}

/// Install the process signal disposition: SIGTERM requests a graceful
/// stop, SIGHUP is a no-op, SIGPIPE is ignored (dead peers surface as
/// write errors), SIGCHLD reaps CGI children.
pub fn install() {
    unsafe {
        libc::signal(libc::SIGTERM, handler(on_term));
        libc::signal(libc::SIGHUP, handler(on_hup));
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGCHLD, handler(on_chld));
    }
}

pub fn terminated() -> bool {
    TERMINATED.load(Ordering::SeqCst)
}
