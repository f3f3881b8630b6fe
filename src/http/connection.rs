use crate::cgi::ERRSZ;
use crate::pool::Sched;
use crate::prelude::*;

/// Stop ingesting body bytes once this much is staged for the child's
/// stdin; reading resumes as the pipe drains.
const STDIN_HIWAT: usize = 64 * 1024;

/// What one unit of forward progress amounted to. The pool owns the policy
/// for each variant: protocol errors turn into canned pages on a still
/// healthy socket, Close recycles nothing, Fatal tears the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Progress,
    ProtocolError(u16),
    Close,
    Fatal,
}

/// One client. Owns the socket, the optional TLS session, a single I/O
/// buffer, and the request/response/CGI aggregates. Exactly one of response
/// or CGI drives outgoing data at a time; the other is Disabled.
pub struct Connection {
    pub token: Token,
    pub stream: TcpStream,
    pub tls: Option<TlsSession>,
    pub buf: Buffer,
    pub req: Request,
    pub resp: Response,
    pub cgi: Cgi,
    /// (read, write) interests currently armed for the client socket.
    interests: (bool, bool),
    registered: bool,
    /// Set when a recycle replayed carried-over bytes; tells the pool to
    /// run the gates again without waiting for an event.
    replay: bool,
}

fn raw_recv(
    stream: &mut TcpStream,
    tls: &mut Option<TlsSession>,
    out: &mut [u8],
) -> io::Result<usize> {
    match tls {
        Some(sess) => sess.recv(stream, out),
        None => stream.read(out),
    }
}

fn raw_send(
    stream: &mut TcpStream,
    tls: &mut Option<TlsSession>,
    data: &[u8],
) -> io::Result<usize> {
    match tls {
        Some(sess) => sess.send(stream, data),
        None => stream.write(data),
    }
}

impl Connection {
    pub fn new(stream: TcpStream, token: Token, scheme: Scheme) -> Self {
        Connection {
            token,
            stream,
            tls: None,
            buf: Buffer::new(),
            req: Request::new(scheme),
            resp: Response::new(),
            cgi: Cgi::new(),
            interests: (true, false),
            registered: true,
            replay: false,
        }
    }

    pub fn take_replay(&mut self) -> bool {
        std::mem::take(&mut self.replay)
    }

    /// A TLS session is attached but its handshake has not finished.
    pub fn handshaking(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| !t.accepted)
    }

    /// True once every sent byte actually reached the socket (TLS buffers
    /// records internally; plaintext sockets have nothing pending).
    fn flushed(&mut self) -> bool {
        match &mut self.tls {
            Some(sess) => sess.flush(&mut self.stream).unwrap_or(false),
            None => true,
        }
    }

    /// Reconcile the client socket's interest set. Re-registering also
    /// re-arms edge-triggered delivery, so pending readiness is never lost
    /// across a transition.
    fn set_interests(&mut self, registry: &Registry, read: bool, write: bool) -> io::Result<()> {
        if self.registered && self.interests == (read, write) {
            return Ok(());
        }
        self.apply_interests(registry, read, write)
    }

    /// Re-register the current interest set unchanged, re-arming
    /// edge-triggered delivery for readiness that went unconsumed.
    fn rearm(&mut self, registry: &Registry) {
        if self.registered {
            let (read, write) = self.interests;
            let _ = self.apply_interests(registry, read, write);
        }
    }

    fn apply_interests(&mut self, registry: &Registry, read: bool, write: bool) -> io::Result<()> {
        match (read, write) {
            (false, false) => {
                if self.registered {
                    registry.deregister(&mut self.stream)?;
                    self.registered = false;
                }
            }
            (r, w) => {
                let interest = match (r, w) {
                    (true, true) => Interest::READABLE | Interest::WRITABLE,
                    (true, false) => Interest::READABLE,
                    _ => Interest::WRITABLE,
                };
                if self.registered {
                    registry.reregister(&mut self.stream, self.token, interest)?;
                } else {
                    registry.register(&mut self.stream, self.token, interest)?;
                    self.registered = true;
                }
            }
        }
        self.interests = (read, write);
        Ok(())
    }

    /// Gate 1: the client socket turned readable.
    pub fn on_readable(&mut self, sched: &mut Sched) -> Advance {
        if let Some(tls) = self.tls.as_mut() {
            if !tls.accepted {
                match tls.accept(&mut self.stream) {
                    Handshake::Done => {
                        let _ = self.set_interests(sched.registry, true, false);
                    }
                    Handshake::WouldBlock => {
                        let wants = self.tls.as_ref().is_some_and(|t| t.wants_write());
                        let _ = self.set_interests(sched.registry, true, wants);
                        return Advance::Progress;
                    }
                    Handshake::Failed => {
                        self.tls = None;
                        return Advance::Fatal;
                    }
                }
            }
        }

        if self.req.phase == ReqPhase::Abort {
            return self.drain_discard();
        }

        loop {
            if self.req.phase == ReqPhase::Done {
                break;
            }
            if self.cgi.stdin_buf.len() >= STDIN_HIWAT {
                // backpressure: let the child catch up first
                break;
            }
            if self.buf.spare() == 0 {
                // a header line outgrew the buffer
                return Advance::ProtocolError(HTTP_BAD_REQUEST);
            }
            let prev_end = self.buf.size();
            let res = raw_recv(&mut self.stream, &mut self.tls, self.buf.tail_mut());
            match res {
                Ok(0) => {
                    debug!("[recv] client closed");
                    self.req.phase = ReqPhase::Abort;
                    return Advance::Fatal;
                }
                Ok(n) => {
                    self.buf.grow(n);
                    if let Err(code) = self.ingest(prev_end, sched) {
                        return Advance::ProtocolError(code);
                    }
                    if self.req.phase == ReqPhase::Abort {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[recv] {e}");
                    self.req.phase = ReqPhase::Abort;
                    return Advance::Fatal;
                }
            }
        }
        Advance::Progress
    }

    /// Feed newly arrived bytes to the parser (whole lines only) and keep
    /// the body accounting current.
    fn ingest(&mut self, prev_end: usize, sched: &mut Sched) -> std::result::Result<(), u16> {
        if matches!(self.req.phase, ReqPhase::Start | ReqPhase::Header) {
            // find the last complete line among the new bytes
            let data = self.buf.as_slice();
            let mut stop = None;
            for (i, &b) in data.iter().enumerate().skip(prev_end) {
                if b == b'\n' {
                    stop = Some(i + 1);
                }
            }
            if let Some(stop) = stop {
                if stop > self.buf.pos() {
                    let consumed = {
                        let lines = &self.buf.as_slice()[self.buf.pos()..stop];
                        self.req.parse(lines)?
                    };
                    self.buf.advance(consumed);
                }
            }
        }

        if self.req.phase == ReqPhase::Body {
            match self.req.kind {
                ReqKind::Static => {
                    self.cgi.phase = CgiPhase::Disabled;
                }
                ReqKind::Dynamic => {
                    self.resp.phase = RespPhase::Disabled;
                    self.resp.alive = self.req.alive;
                    if self.cgi.phase == CgiPhase::Idle {
                        self.cgi.phase = CgiPhase::Ready;
                    }
                }
            }
            self.account_body(sched);
        }
        Ok(())
    }

    /// Debit the unread tail against the expected body size. Surplus bytes
    /// past the boundary belong to the next pipelined request and move to
    /// the carry-over buffer.
    fn account_body(&mut self, sched: &mut Sched) {
        let tail = self.buf.remaining() as i64;
        self.req.rsize -= tail;
        if self.req.rsize <= 0 {
            let surplus = (-self.req.rsize) as usize;
            self.req.rsize = 0;
            self.req.phase = ReqPhase::Done;
            if surplus > 0 {
                let keep = self.buf.size() - surplus;
                self.req.carry.reset();
                self.req.carry.fill(&self.buf.as_slice()[keep..]);
                self.buf.truncate(keep);
            }
        }

        match self.req.kind {
            ReqKind::Dynamic => {
                self.cgi.stdin_buf.extend_from_slice(self.buf.unread());
                self.buf.reset();
                // re-arm the stdin pipe if it is already in the interest set
                if let (Some(tok), Some(fd)) = (self.cgi.in_token, self.cgi.stdin_fd()) {
                    let _ = sched
                        .registry
                        .reregister(&mut SourceFd(&fd), tok, Interest::WRITABLE);
                }
            }
            ReqKind::Static => self.buf.reset(),
        }
    }

    /// Keep reading and dropping bytes after an abort, until the client
    /// gives up or the error page finishes flushing.
    fn drain_discard(&mut self) -> Advance {
        let mut scratch = [0u8; 512];
        loop {
            match raw_recv(&mut self.stream, &mut self.tls, &mut scratch) {
                Ok(0) => return Advance::Fatal,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Advance::Fatal,
            }
        }
    }

    /// Gate 3: phase transitions that do not need fresh socket readiness.
    pub fn advance(&mut self, conf: &Config, sched: &mut Sched) -> Advance {
        // static response construction
        if self.req.phase == ReqPhase::Done
            && self.req.kind == ReqKind::Static
            && self.resp.phase == RespPhase::Ready
        {
            if self.resp.resolve(&self.req, conf) {
                self.buf.reset();
                self.resp.write_header(&mut self.buf);
                self.resp.phase = RespPhase::Header;
                debug!("[serve] {} {} -> 200", self.req.method.as_str(), self.req.uri);
            } else {
                debug!("[serve] {} {} -> 404", self.req.method.as_str(), self.req.uri);
                return Advance::ProtocolError(self.resp.status);
            }
        }

        // dynamic child spawn
        if self.req.kind == ReqKind::Dynamic && self.cgi.phase == CgiPhase::Ready {
            match self.cgi.spawn(&self.req, conf) {
                Ok(()) => {
                    self.cgi.phase = CgiPhase::SrvToCgi;
                    if let Err(e) = self.register_cgi_pipes(sched) {
                        error!("[cgi] pipe registration failed: {e}");
                        self.release_cgi(sched.registry, sched.cgi_owners);
                        self.cgi.phase = CgiPhase::Abort;
                        return Advance::ProtocolError(HTTP_INTERNAL_SERVER_ERROR);
                    }
                    info!("[cgi] forked child {}", self.cgi.pid);
                }
                Err(e) => {
                    error!("[cgi] spawn failed: {e}");
                    self.cgi.phase = CgiPhase::Abort;
                    return Advance::ProtocolError(HTTP_INTERNAL_SERVER_ERROR);
                }
            }
        }

        // interest flips once the request is fully ingested
        if self.req.phase == ReqPhase::Done {
            match self.req.kind {
                ReqKind::Static => {
                    if self.resp.phase != RespPhase::Disabled
                        && self.set_interests(sched.registry, false, true).is_err()
                    {
                        return Advance::Fatal;
                    }
                }
                ReqKind::Dynamic => {
                    let write = self.interests.1;
                    if self.set_interests(sched.registry, false, write).is_err() {
                        return Advance::Fatal;
                    }
                    if let Err(e) = self.register_cgi_stdout(sched) {
                        error!("[cgi] stdout registration failed: {e}");
                        self.release_cgi(sched.registry, sched.cgi_owners);
                        self.cgi.phase = CgiPhase::Abort;
                        return Advance::ProtocolError(HTTP_INTERNAL_SERVER_ERROR);
                    }
                }
            }
        }

        if self.cgi.phase == CgiPhase::SrvToCgi {
            return self.pump_stdin(sched);
        }

        Advance::Progress
    }

    fn register_cgi_pipes(&mut self, sched: &mut Sched) -> io::Result<()> {
        if let Some(fd) = self.cgi.stderr_fd() {
            let tok = sched.alloc_pipe(self.token);
            sched
                .registry
                .register(&mut SourceFd(&fd), tok, Interest::READABLE)?;
            self.cgi.err_token = Some(tok);
        }
        if let Some(fd) = self.cgi.stdin_fd() {
            let tok = sched.alloc_pipe(self.token);
            sched
                .registry
                .register(&mut SourceFd(&fd), tok, Interest::WRITABLE)?;
            self.cgi.in_token = Some(tok);
        }
        Ok(())
    }

    /// The stdout pipe joins the read set only once the request is fully
    /// ingested; until then the child may block on its own output.
    fn register_cgi_stdout(&mut self, sched: &mut Sched) -> io::Result<()> {
        if self.cgi.out_token.is_some()
            || !matches!(self.cgi.phase, CgiPhase::SrvToCgi | CgiPhase::CgiToSrv)
        {
            return Ok(());
        }
        if let Some(fd) = self.cgi.stdout_fd() {
            let tok = sched.alloc_pipe(self.token);
            sched
                .registry
                .register(&mut SourceFd(&fd), tok, Interest::READABLE)?;
            self.cgi.out_token = Some(tok);
        }
        Ok(())
    }

    /// Drain staged body bytes into the child's stdin. Once the request is
    /// Done and the stage is empty, the stdin end is dropped so the child
    /// sees EOF, and the exchange turns around to CgiToSrv.
    pub fn pump_stdin(&mut self, sched: &mut Sched) -> Advance {
        while !self.cgi.stdin_buf.is_empty() {
            let res = match self.cgi.stdin_w.as_mut() {
                Some(w) => w.write(&self.cgi.stdin_buf),
                None => break,
            };
            match res {
                Ok(0) => break,
                Ok(n) => {
                    self.cgi.stdin_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[cgi {}] stdin write: {e}", self.cgi.pid);
                    self.release_cgi(sched.registry, sched.cgi_owners);
                    self.cgi.phase = CgiPhase::Abort;
                    return Advance::ProtocolError(HTTP_INTERNAL_SERVER_ERROR);
                }
            }
        }

        if self.req.phase == ReqPhase::Body && self.cgi.stdin_buf.len() < STDIN_HIWAT {
            // room again; re-arm the client read side for more body bytes
            self.rearm(sched.registry);
        }

        if self.req.phase == ReqPhase::Done
            && self.cgi.stdin_buf.is_empty()
            && self.cgi.phase == CgiPhase::SrvToCgi
        {
            if let Some(tok) = self.cgi.in_token.take() {
                if let Some(fd) = self.cgi.stdin_fd() {
                    let _ = sched.registry.deregister(&mut SourceFd(&fd));
                }
                sched.release_pipe(tok);
            }
            self.cgi.stdin_w = None;
            self.cgi.phase = CgiPhase::CgiToSrv;
            self.cgi.buf_phase = PipePhase::Recv;
            trace!("[cgi {}] stdin closed, relaying stdout", self.cgi.pid);
        }

        Advance::Progress
    }

    /// Gate 4, receive half: one window of child stdout into the shared
    /// buffer. EOF promotes the exchange to Done.
    pub fn on_cgi_stdout(&mut self, sched: &mut Sched) -> Advance {
        if self.cgi.phase != CgiPhase::CgiToSrv || self.cgi.buf_phase != PipePhase::Recv {
            return Advance::Progress;
        }
        self.buf.reset();
        let res = {
            let (cgi, buf) = (&mut self.cgi, &mut self.buf);
            match cgi.stdout_r.as_mut() {
                Some(r) => r.read(buf.tail_mut()),
                None => return Advance::Progress,
            }
        };
        match res {
            Ok(0) => {
                self.cgi.phase = CgiPhase::Done;
                self.cgi.buf_phase = PipePhase::Send;
                trace!("[cgi {}] stdout eof", self.cgi.pid);
            }
            Ok(n) => {
                self.buf.grow(n);
                self.cgi.buf_phase = PipePhase::Send;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
            Err(e) => {
                error!("[cgi {}] stdout read: {e}", self.cgi.pid);
                self.release_cgi(sched.registry, sched.cgi_owners);
                self.cgi.phase = CgiPhase::Abort;
                return Advance::ProtocolError(HTTP_INTERNAL_SERVER_ERROR);
            }
        }
        // only now does the client need write readiness; arming it earlier
        // would spin before any CGI bytes exist
        if self.set_interests(sched.registry, false, true).is_err() {
            return Advance::Fatal;
        }
        Advance::Progress
    }

    /// Gate 2: forward whatever the child wrote on stderr to the log,
    /// verbatim, tagged with its pid.
    pub fn on_cgi_stderr(&mut self, sched: &mut Sched) -> Advance {
        let mut scratch = [0u8; ERRSZ];
        loop {
            match self.cgi.read_stderr(&mut scratch) {
                Ok(0) => {
                    if let Some(tok) = self.cgi.err_token.take() {
                        if let Some(fd) = self.cgi.stderr_fd() {
                            let _ = sched.registry.deregister(&mut SourceFd(&fd));
                        }
                        sched.release_pipe(tok);
                    }
                    self.cgi.stderr_r = None;
                    return Advance::Progress;
                }
                Ok(n) => {
                    error!("[cgi {}]", self.cgi.pid);
                    crate::logging::raw(&scratch[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[cgi {}] stderr read: {e}", self.cgi.pid);
                    if let Some(tok) = self.cgi.err_token.take() {
                        if let Some(fd) = self.cgi.stderr_fd() {
                            let _ = sched.registry.deregister(&mut SourceFd(&fd));
                        }
                        sched.release_pipe(tok);
                    }
                    self.cgi.stderr_r = None;
                    return Advance::Progress;
                }
            }
        }
    }

    /// Gate 4, send half: relay the shared buffer to the client, then hand
    /// it back to the receive side, or finish once the child is Done.
    pub fn serve_dynamic(&mut self, sched: &mut Sched) -> Advance {
        if !matches!(self.cgi.phase, CgiPhase::CgiToSrv | CgiPhase::Done)
            || self.cgi.buf_phase != PipePhase::Send
        {
            return Advance::Progress;
        }
        loop {
            if self.buf.remaining() == 0 {
                if self.cgi.phase == CgiPhase::Done {
                    if !self.flushed() {
                        return Advance::Progress;
                    }
                    return self.finish(sched);
                }
                self.cgi.buf_phase = PipePhase::Recv;
                self.buf.reset();
                // re-arm stdout for the next window
                if let (Some(tok), Some(fd)) = (self.cgi.out_token, self.cgi.stdout_fd()) {
                    let _ = sched
                        .registry
                        .reregister(&mut SourceFd(&fd), tok, Interest::READABLE);
                }
                return Advance::Progress;
            }
            match raw_send(&mut self.stream, &mut self.tls, self.buf.unread()) {
                Ok(0) => return Advance::Fatal,
                Ok(n) => self.buf.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[send] {e}");
                    return Advance::Fatal;
                }
            }
        }
    }

    /// Gate 5: static and error responses.
    pub fn serve_static(&mut self, sched: &mut Sched) -> Advance {
        if self.resp.phase == RespPhase::Abort {
            let (resp, req, buf) = (&mut self.resp, &self.req, &mut self.buf);
            resp.prepare_error(req.alive, buf);
            debug!("[serve] error page {}", resp.status);
        }

        if self.resp.phase == RespPhase::Error {
            loop {
                if self.buf.remaining() == 0 {
                    if !self.flushed() {
                        return Advance::Progress;
                    }
                    return self.finish(sched);
                }
                match raw_send(&mut self.stream, &mut self.tls, self.buf.unread()) {
                    Ok(0) => return Advance::Fatal,
                    Ok(n) => self.buf.advance(n),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("[send] error page: {e}");
                        return Advance::Fatal;
                    }
                }
            }
        }

        if self.resp.phase == RespPhase::Header {
            loop {
                if self.buf.remaining() == 0 {
                    self.resp.phase = RespPhase::Body;
                    break;
                }
                match raw_send(&mut self.stream, &mut self.tls, self.buf.unread()) {
                    Ok(0) => return Advance::Fatal,
                    Ok(n) => self.buf.advance(n),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("[send] header: {e}");
                        return Advance::Fatal;
                    }
                }
            }
        }

        if self.resp.phase == RespPhase::Body {
            // HEAD stops after the header, as does a zero-length body
            let body_done = self.req.method == Method::Head
                || self.resp.file.as_ref().is_none_or(|f| f.exhausted());
            if body_done {
                if !self.flushed() {
                    return Advance::Progress;
                }
                return self.finish(sched);
            }
            loop {
                let exhausted = self.resp.file.as_ref().is_none_or(|f| f.exhausted());
                if exhausted {
                    if !self.flushed() {
                        return Advance::Progress;
                    }
                    return self.finish(sched);
                }
                let res = {
                    let chunk = match self.resp.file.as_ref() {
                        Some(f) => f.chunk(BUFSZ),
                        None => &[][..],
                    };
                    raw_send(&mut self.stream, &mut self.tls, chunk)
                };
                match res {
                    Ok(0) => return Advance::Fatal,
                    Ok(n) => {
                        if let Some(f) = self.resp.file.as_mut() {
                            f.advance(n);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Advance::Progress,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("[send] body: {e}");
                        return Advance::Fatal;
                    }
                }
            }
        }

        Advance::Progress
    }

    /// Pool-applied policy for protocol errors: the request switches to
    /// drain-and-discard, the response takes over the reply channel with a
    /// canned page, any CGI exchange is torn down.
    pub fn protocol_error(&mut self, code: u16, sched: &mut Sched) {
        if self.resp.phase == RespPhase::Error {
            return; // a page is already on its way out
        }
        info!("[conn] protocol error {code}");
        self.req.phase = ReqPhase::Abort;
        if !matches!(self.cgi.phase, CgiPhase::Idle | CgiPhase::Disabled) {
            self.release_cgi(sched.registry, sched.cgi_owners);
            self.cgi.phase = CgiPhase::Abort;
        }
        self.resp.status = code;
        self.resp.phase = RespPhase::Abort;
        self.resp.alive = self.req.alive;
        let _ = self.set_interests(sched.registry, true, true);
    }

    /// Gate 6: the response is fully delivered. Close if the peer opted
    /// out of keep-alive; otherwise reset everything in place and replay
    /// any pipelined bytes that already arrived.
    fn finish(&mut self, sched: &mut Sched) -> Advance {
        // the request still holds the authoritative keep-alive answer here;
        // it is reset only after this check
        if !self.req.alive {
            return Advance::Close;
        }

        self.buf.reset();
        self.resp.reset();
        self.release_cgi(sched.registry, sched.cgi_owners);
        self.req.reset();
        if self.set_interests(sched.registry, true, false).is_err() {
            return Advance::Fatal;
        }

        if self.req.carry.size() > 0 {
            std::mem::swap(&mut self.buf, &mut self.req.carry);
            trace!("[conn] replaying {} pipelined bytes", self.buf.size());
            if let Err(code) = self.ingest(0, sched) {
                return Advance::ProtocolError(code);
            }
            self.replay = true;
        }
        Advance::Progress
    }

    /// Deregister and drop every CGI descriptor this connection owns.
    pub fn release_cgi(&mut self, registry: &Registry, owners: &mut HashMap<Token, Token>) {
        let ends = [
            (self.cgi.in_token.take(), self.cgi.stdin_fd()),
            (self.cgi.out_token.take(), self.cgi.stdout_fd()),
            (self.cgi.err_token.take(), self.cgi.stderr_fd()),
        ];
        for (tok, fd) in ends {
            if let Some(tok) = tok {
                if let Some(fd) = fd {
                    let _ = registry.deregister(&mut SourceFd(&fd));
                }
                owners.remove(&tok);
            }
        }
        self.cgi.reset();
    }

    /// Full teardown before removal from the pool.
    pub fn teardown(&mut self, registry: &Registry, owners: &mut HashMap<Token, Token>) {
        if self.registered {
            let _ = registry.deregister(&mut self.stream);
            self.registered = false;
        }
        self.release_cgi(registry, owners);
    }
}
