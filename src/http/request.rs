use crate::buffer::Buffer;
use crate::http::headers::{HDR_KEYSZ, HDR_VALSZ, HeaderList, bounded};
use crate::prelude::{HTTP_BAD_REQUEST, HTTP_LENGTH_REQUIRED, HTTP_NOT_IMPLEMENTED};

pub const REQ_URISZ: usize = 2048;
pub const REQ_VERSZ: usize = 32;
pub const REQ_HOSTSZ: usize = 256;

const CGI_PREFIX: &str = "/cgi";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Other,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Other => "OTHER",
        }
    }
}

/// Fixed at connection creation; never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqPhase {
    Start,
    Header,
    Body,
    Done,
    Abort,
}

/// Parsed request head. The payload is never accumulated here; body bytes
/// stream straight to where they are needed and only the remaining count
/// (`rsize`) is tracked.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub scheme: Scheme,
    pub uri: String,
    pub query: Option<String>,
    pub version: String,
    pub host: String,
    /// Content-Length; -1 until a header provides one.
    pub clen: i64,
    /// Cleared by `Connection: close`.
    pub alive: bool,
    /// Body bytes still expected.
    pub rsize: i64,
    pub hdrs: HeaderList,
    pub kind: ReqKind,
    pub phase: ReqPhase,
    /// Bytes that arrived past the body boundary; they open the next
    /// pipelined request after a recycle.
    pub carry: Buffer,
}

// Inline whitespace: every space class except the line feed.
fn issp(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | 0x0b | 0x0c)
}

fn is_ws(c: u8) -> bool {
    issp(c) || c == b'\n'
}

/// Skip inline whitespace, then take the run up to the next whitespace.
fn take_token<'a>(buf: &'a [u8], cur: &mut usize) -> &'a [u8] {
    while *cur < buf.len() && issp(buf[*cur]) {
        *cur += 1;
    }
    let start = *cur;
    while *cur < buf.len() && !is_ws(buf[*cur]) {
        *cur += 1;
    }
    &buf[start..*cur]
}

/// Consume an exact CR LF line terminator (inline whitespace tolerated
/// before it, which is where the CR itself is skipped).
fn eat_crlf(buf: &[u8], cur: &mut usize) -> bool {
    while *cur < buf.len() && issp(buf[*cur]) {
        *cur += 1;
    }
    if *cur < buf.len() && buf[*cur] == b'\n' && *cur > 0 && buf[*cur - 1] == b'\r' {
        *cur += 1;
        true
    } else {
        false
    }
}

fn trimmed(bytes: &[u8], cap: usize) -> String {
    bounded(String::from_utf8_lossy(bytes).trim(), cap)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl Request {
    pub fn new(scheme: Scheme) -> Self {
        Request {
            method: Method::Other,
            scheme,
            uri: String::new(),
            query: None,
            version: String::new(),
            host: String::new(),
            clen: -1,
            alive: true,
            rsize: 0,
            hdrs: HeaderList::new(),
            kind: ReqKind::Static,
            phase: ReqPhase::Start,
            carry: Buffer::new(),
        }
    }

    /// Per-request reset. Scheme and the carry-over buffer survive, the
    /// latter because it already holds the opening bytes of the next request.
    pub fn reset(&mut self) {
        self.method = Method::Other;
        self.uri.clear();
        self.query = None;
        self.version.clear();
        self.host.clear();
        self.clen = -1;
        self.alive = true;
        self.rsize = 0;
        self.hdrs.reset();
        self.kind = ReqKind::Static;
        self.phase = ReqPhase::Start;
    }

    fn fail(&mut self, code: u16) -> std::result::Result<usize, u16> {
        self.phase = ReqPhase::Abort;
        Err(code)
    }

    /// Parse the request line and as many header lines as `buf` holds.
    ///
    /// `buf` must end at a line feed; the connection only ever feeds whole
    /// lines. Returns the number of bytes consumed, or the HTTP status code
    /// describing why parsing aborted. The phase persists across calls, so
    /// a request may be assembled from any number of arrival fragments.
    pub fn parse(&mut self, buf: &[u8]) -> std::result::Result<usize, u16> {
        let mut cur = 0usize;

        if self.phase == ReqPhase::Start {
            let tok = take_token(buf, &mut cur);
            if tok.is_empty() {
                return self.fail(HTTP_BAD_REQUEST);
            }
            self.method = if tok.eq_ignore_ascii_case(b"GET") {
                Method::Get
            } else if tok.eq_ignore_ascii_case(b"HEAD") {
                Method::Head
            } else if tok.eq_ignore_ascii_case(b"POST") {
                Method::Post
            } else {
                return self.fail(HTTP_NOT_IMPLEMENTED);
            };

            let tok = take_token(buf, &mut cur);
            self.uri = trimmed(tok, REQ_URISZ);
            self.migrate_authority();
            if self.uri.starts_with("/cgi/") {
                self.kind = ReqKind::Dynamic;
            }
            if let Some(q) = self.uri.find('?') {
                self.query = Some(self.uri[q + 1..].to_string());
                self.uri.truncate(q);
            }

            let tok = take_token(buf, &mut cur);
            self.version = trimmed(tok, REQ_VERSZ);

            if !eat_crlf(buf, &mut cur) {
                return self.fail(HTTP_BAD_REQUEST);
            }
            self.phase = ReqPhase::Header;
        }

        if self.phase == ReqPhase::Header {
            while cur < buf.len() {
                while cur < buf.len() && issp(buf[cur]) {
                    cur += 1;
                }
                let start = cur;
                while cur < buf.len() && buf[cur] != b'\n' {
                    cur += 1;
                }
                if cur >= buf.len() {
                    // partial line; wait for the rest
                    cur = start;
                    break;
                }

                if cur == start && cur > 0 && buf[cur - 1] == b'\r' {
                    // empty delimiter line closes the header section
                    cur += 1;
                    self.phase = ReqPhase::Body;
                    if self.clen < 0 {
                        if self.method == Method::Post {
                            return self.fail(HTTP_LENGTH_REQUIRED);
                        }
                        self.clen = 0;
                    }
                    self.rsize = self.clen;
                    break;
                }

                let line = &buf[start..cur];
                let colon = match line.iter().position(|&b| b == b':') {
                    None | Some(0) => return self.fail(HTTP_BAD_REQUEST),
                    Some(i) => i,
                };
                let key = trimmed(&line[..colon], HDR_KEYSZ);
                let val = trimmed(&line[colon + 1..], HDR_VALSZ);

                if key.eq_ignore_ascii_case("Host") {
                    self.host = bounded(&val, REQ_HOSTSZ);
                } else if key.eq_ignore_ascii_case("Content-Length") {
                    if !is_digits(&val) {
                        return self.fail(HTTP_BAD_REQUEST);
                    }
                    match val.parse::<i64>() {
                        Ok(n) => self.clen = n,
                        Err(_) => return self.fail(HTTP_BAD_REQUEST),
                    }
                } else if key.eq_ignore_ascii_case("Connection") {
                    if val.eq_ignore_ascii_case("close") {
                        self.alive = false;
                    }
                } else {
                    self.hdrs.push(&key, &val);
                }

                cur += 1; // past the line feed
            }
        }

        Ok(cur)
    }

    /// An absolute-form URI carries its authority into the host field and
    /// keeps only the path.
    fn migrate_authority(&mut self) {
        let rest = if self
            .uri
            .get(..7)
            .is_some_and(|p| p.eq_ignore_ascii_case("http://"))
        {
            7
        } else if self
            .uri
            .get(..8)
            .is_some_and(|p| p.eq_ignore_ascii_case("https://"))
        {
            8
        } else {
            return;
        };
        if let Some(slash) = self.uri[rest..].find('/') {
            self.host = bounded(&self.uri[rest..rest + slash], REQ_HOSTSZ);
            self.uri = self.uri[rest + slash..].to_string();
        }
    }

    /// Strip the `/cgi` mount from the URI; what remains is the path info
    /// handed to the child program.
    pub fn path_info(&self) -> &str {
        self.uri.strip_prefix(CGI_PREFIX).unwrap_or(&self.uri)
    }

    /// Serialize the parsed head back to wire form. Inverse of `parse` for
    /// requests whose fields fit their maximum widths.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.uri.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.clen).as_bytes());
        for (k, v) in self.hdrs.iter() {
            out.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}
