use crate::http::headers::bounded;
use crate::prelude::*;
use std::process::{ChildStderr, ChildStdin, ChildStdout};

/// URI mount that routes a request to the child program.
pub const CGI_PREFIX: &str = "/cgi";
/// Most environment entries handed to the child.
const ENVP_MAX: usize = 64;
/// Widest single `KEY=VALUE` entry.
const ENVSZ: usize = 2048;
/// Stderr drain window per readiness.
pub const ERRSZ: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgiPhase {
    Idle,
    Ready,
    /// Body bytes flow server -> child stdin.
    SrvToCgi,
    /// Child stdout flows back to the client; stdin is already closed.
    CgiToSrv,
    Done,
    Abort,
    Disabled,
}

/// Which way the shared connection buffer is facing while relaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipePhase {
    Recv,
    Send,
}

/// One CGI exchange: the child process and the three pipe ends the server
/// retains. A `None` end is closed. Reaping is not handled here; the
/// SIGCHLD handler collects every exited child.
#[derive(Debug)]
pub struct Cgi {
    pub phase: CgiPhase,
    pub buf_phase: PipePhase,
    pub pid: libc::pid_t,
    pub stdin_w: Option<ChildStdin>,
    pub stdout_r: Option<ChildStdout>,
    pub stderr_r: Option<ChildStderr>,
    /// Body bytes staged for the child, drained on stdin writability.
    pub stdin_buf: Vec<u8>,
    pub in_token: Option<Token>,
    pub out_token: Option<Token>,
    pub err_token: Option<Token>,
}

impl Cgi {
    pub fn new() -> Self {
        Cgi {
            phase: CgiPhase::Idle,
            buf_phase: PipePhase::Recv,
            pid: -1,
            stdin_w: None,
            stdout_r: None,
            stderr_r: None,
            stdin_buf: Vec::new(),
            in_token: None,
            out_token: None,
            err_token: None,
        }
    }

    /// Drop every retained pipe end and return to Idle. Callers deregister
    /// the descriptors from the poller first.
    pub fn reset(&mut self) {
        self.phase = CgiPhase::Idle;
        self.buf_phase = PipePhase::Recv;
        self.pid = -1;
        self.stdin_w = None;
        self.stdout_r = None;
        self.stderr_r = None;
        self.stdin_buf.clear();
        self.in_token = None;
        self.out_token = None;
        self.err_token = None;
    }

    pub fn stdin_fd(&self) -> Option<RawFd> {
        self.stdin_w.as_ref().map(|p| p.as_raw_fd())
    }

    pub fn stdout_fd(&self) -> Option<RawFd> {
        self.stdout_r.as_ref().map(|p| p.as_raw_fd())
    }

    pub fn stderr_fd(&self) -> Option<RawFd> {
        self.stderr_r.as_ref().map(|p| p.as_raw_fd())
    }

    /// Fork the child program with its stdio on fresh pipes and the CGI/1.1
    /// environment. The server-side ends are switched to non-blocking so the
    /// event loop can pump them under readiness.
    pub fn spawn(&mut self, req: &Request, conf: &Config) -> io::Result<()> {
        let mut child = Command::new(&conf.cgi)
            .env_clear()
            .envs(build_env(req))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("cgi stdin pipe missing"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("cgi stdout pipe missing"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("cgi stderr pipe missing"))?;

        set_nonblocking(stdin.as_raw_fd())?;
        set_nonblocking(stdout.as_raw_fd())?;
        set_nonblocking(stderr.as_raw_fd())?;

        self.pid = child.id() as libc::pid_t;
        self.stdin_w = Some(stdin);
        self.stdout_r = Some(stdout);
        self.stderr_r = Some(stderr);
        Ok(())
    }

    /// One stderr window; the caller forwards whatever arrives to the log.
    pub fn read_stderr(&mut self, scratch: &mut [u8]) -> io::Result<usize> {
        match self.stderr_r.as_mut() {
            Some(r) => r.read(scratch),
            None => Ok(0),
        }
    }
}

impl Default for Cgi {
    fn default() -> Self {
        Self::new()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn add(envp: &mut Vec<(String, String)>, key: &str, val: &str) {
    if envp.len() >= ENVP_MAX {
        return;
    }
    let room = ENVSZ.saturating_sub(key.len() + 1);
    envp.push((key.to_string(), bounded(val, room)));
}

/// `Header-Name` -> `HTTP_HEADER_NAME`.
fn meta_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 5);
    out.push_str("HTTP_");
    for c in key.chars() {
        out.push(if c == '-' { '_' } else { c.to_ascii_uppercase() });
    }
    out
}

/// Synthesize the CGI/1.1 environment for one request.
pub fn build_env(req: &Request) -> Vec<(String, String)> {
    let mut envp = Vec::with_capacity(16);

    add(&mut envp, "GATEWAY_INTERFACE", "CGI/1.1");
    add(&mut envp, "PATH_INFO", req.path_info());
    add(&mut envp, "REQUEST_URI", &req.uri);
    add(&mut envp, "REQUEST_METHOD", req.method.as_str());
    if let Some(q) = &req.query {
        add(&mut envp, "QUERY_STRING", q);
    }
    if req.clen > 0 {
        add(&mut envp, "CONTENT_LENGTH", &req.clen.to_string());
    }
    add(&mut envp, "SERVER_NAME", VERSION);
    add(&mut envp, "SERVER_SOFTWARE", VERSION);
    add(&mut envp, "SERVER_PROTOCOL", "HTTP/1.1");
    add(&mut envp, "HTTP_HOST", &req.host);
    add(&mut envp, "SCRIPT_NAME", CGI_PREFIX);
    if req.scheme == Scheme::Https {
        add(&mut envp, "HTTPS", "on");
    }

    for (k, v) in req.hdrs.iter() {
        if k.eq_ignore_ascii_case("Content-Type") {
            add(&mut envp, "CONTENT_TYPE", v);
        } else {
            add(&mut envp, &meta_key(k), v);
        }
    }

    envp
}
