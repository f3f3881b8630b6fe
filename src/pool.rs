use crate::prelude::*;
use crate::signals;

/// Connection ceiling, leaving descriptor headroom for listeners, the log,
/// the lock file, and three pipe ends per in-flight CGI exchange.
pub const MAX_CONNS: usize = 1014;

const HTTP_LISTENER: Token = Token(0);
const HTTPS_LISTENER: Token = Token(1);
const FIRST_CONN: usize = 2;

/// Interest-set handle passed into connection operations. Tokens increase
/// monotonically and are never reused, so a stale event observed after a
/// removal cannot alias a live connection.
pub struct Sched<'a> {
    pub registry: &'a Registry,
    pub next_token: &'a mut usize,
    /// pipe token -> owning connection token
    pub cgi_owners: &'a mut HashMap<Token, Token>,
}

impl Sched<'_> {
    pub fn alloc_pipe(&mut self, owner: Token) -> Token {
        let tok = Token(*self.next_token);
        *self.next_token += 1;
        self.cgi_owners.insert(tok, owner);
        tok
    }

    pub fn release_pipe(&mut self, tok: Token) {
        self.cgi_owners.remove(&tok);
    }
}

/// The registry of live connections plus the readiness machinery that
/// drives them.
pub struct Pool {
    conf: Config,
    poll: Poll,
    http: TcpListener,
    https: TcpListener,
    tls: TlsContext,
    conns: HashMap<Token, Connection>,
    cgi_owners: HashMap<Token, Token>,
    next_token: usize,
}

impl Pool {
    pub fn new(conf: &Config) -> Result<Pool> {
        let poll = Poll::new()?;
        let mut http = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], conf.http_port)))?;
        let mut https = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], conf.https_port)))?;
        let tls = TlsContext::from_pem(&conf.prv, &conf.crt)?;
        poll.registry()
            .register(&mut http, HTTP_LISTENER, Interest::READABLE)?;
        poll.registry()
            .register(&mut https, HTTPS_LISTENER, Interest::READABLE)?;
        Ok(Pool {
            conf: conf.clone(),
            poll,
            http,
            https,
            tls,
            conns: HashMap::new(),
            cgi_owners: HashMap::new(),
            next_token: FIRST_CONN,
        })
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// Run until SIGTERM. The poll timeout bounds how long a pending
    /// signal flag can go unnoticed.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        info!("[pool] event loop started");
        while !signals::terminated() {
            match self.poll.poll(&mut events, Some(Duration::from_secs(1))) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[pool] poll: {e}");
                    return Err(e.into());
                }
            }
            for event in events.iter() {
                let tok = event.token();
                let (r, w) = (event.is_readable(), event.is_writable());
                if tok == HTTP_LISTENER {
                    self.accept(false);
                } else if tok == HTTPS_LISTENER {
                    self.accept(true);
                } else if self.conns.contains_key(&tok) {
                    self.drive_client(tok, r, w);
                } else {
                    self.drive_cgi(tok, r, w);
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Drain the listener. Accepts beyond the ceiling are closed on the
    /// spot; the kernel already completed the handshake, so closing is the
    /// only way to shed them.
    fn accept(&mut self, https: bool) {
        loop {
            let res = if https {
                self.https.accept()
            } else {
                self.http.accept()
            };
            match res {
                Ok((mut stream, addr)) => {
                    if self.conns.len() >= MAX_CONNS {
                        warn!("[accept] connection limit reached, refusing {addr}");
                        continue;
                    }
                    let tok = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, tok, Interest::READABLE)
                    {
                        error!("[accept] register failed for {addr}: {e}");
                        continue;
                    }
                    let scheme = if https { Scheme::Https } else { Scheme::Http };
                    let mut conn = Connection::new(stream, tok, scheme);
                    if https {
                        match self.tls.new_session() {
                            Ok(sess) => conn.tls = Some(sess),
                            Err(e) => {
                                error!("[accept] tls session for {addr}: {e}");
                                let _ = self.poll.registry().deregister(&mut conn.stream);
                                continue;
                            }
                        }
                    }
                    debug!(
                        "[accept] {} connection from {addr}",
                        if https { "https" } else { "http" }
                    );
                    self.conns.insert(tok, conn);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("[accept] {e}");
                    break;
                }
            }
        }
    }

    /// Apply the connection gates for one client-socket event. The inner
    /// loop re-runs the transition gates when a recycle replayed pipelined
    /// bytes, since no fresh event will arrive for those.
    fn drive_client(&mut self, tok: Token, readable: bool, _writable: bool) {
        let outcome = {
            let mut sched = Sched {
                registry: self.poll.registry(),
                next_token: &mut self.next_token,
                cgi_owners: &mut self.cgi_owners,
            };
            let Some(conn) = self.conns.get_mut(&tok) else {
                return;
            };
            let mut adv = Advance::Progress;
            if readable || conn.handshaking() {
                adv = conn.on_readable(&mut sched);
            }
            loop {
                if adv != Advance::Progress {
                    break;
                }
                adv = conn.advance(&self.conf, &mut sched);
                if adv != Advance::Progress {
                    break;
                }
                if conn.resp.phase == RespPhase::Disabled {
                    adv = conn.serve_dynamic(&mut sched);
                } else if matches!(
                    conn.resp.phase,
                    RespPhase::Abort | RespPhase::Error | RespPhase::Header | RespPhase::Body
                ) {
                    adv = conn.serve_static(&mut sched);
                }
                if adv != Advance::Progress {
                    break;
                }
                if !conn.take_replay() {
                    break;
                }
            }
            adv
        };
        self.settle(tok, outcome);
    }

    /// Route a CGI pipe event to its owning connection.
    fn drive_cgi(&mut self, tok: Token, readable: bool, writable: bool) {
        let Some(&owner) = self.cgi_owners.get(&tok) else {
            return;
        };
        let outcome = {
            let mut sched = Sched {
                registry: self.poll.registry(),
                next_token: &mut self.next_token,
                cgi_owners: &mut self.cgi_owners,
            };
            let Some(conn) = self.conns.get_mut(&owner) else {
                return;
            };
            let mut adv = Advance::Progress;
            if conn.cgi.err_token == Some(tok) {
                if readable {
                    adv = conn.on_cgi_stderr(&mut sched);
                }
            } else if conn.cgi.out_token == Some(tok) {
                if readable {
                    adv = conn.on_cgi_stdout(&mut sched);
                    if adv == Advance::Progress {
                        adv = conn.serve_dynamic(&mut sched);
                    }
                }
            } else if conn.cgi.in_token == Some(tok) && writable {
                adv = conn.pump_stdin(&mut sched);
            }
            adv
        };
        self.settle(owner, outcome);
    }

    /// Loop-scoped policy for the result of a connection operation.
    fn settle(&mut self, tok: Token, adv: Advance) {
        match adv {
            Advance::Progress => {}
            Advance::ProtocolError(code) => {
                let mut sched = Sched {
                    registry: self.poll.registry(),
                    next_token: &mut self.next_token,
                    cgi_owners: &mut self.cgi_owners,
                };
                if let Some(conn) = self.conns.get_mut(&tok) {
                    conn.protocol_error(code, &mut sched);
                }
            }
            Advance::Close => self.remove(tok, false),
            Advance::Fatal => self.remove(tok, true),
        }
    }

    /// Remove a connection and release every descriptor it owns.
    fn remove(&mut self, tok: Token, errored: bool) {
        let Some(mut conn) = self.conns.remove(&tok) else {
            return;
        };
        conn.teardown(self.poll.registry(), &mut self.cgi_owners);
        if errored {
            debug!("[pool] dropped connection, {} remain", self.conns.len());
        } else {
            debug!("[pool] closed connection, {} remain", self.conns.len());
        }
    }

    /// Graceful teardown: every client and pipe descriptor is released,
    /// then the listeners come out of the interest sets.
    fn shutdown(&mut self) {
        info!("[pool] shutting down");
        let toks: Vec<Token> = self.conns.keys().copied().collect();
        for tok in toks {
            self.remove(tok, false);
        }
        let _ = self.poll.registry().deregister(&mut self.http);
        let _ = self.poll.registry().deregister(&mut self.https);
    }
}
