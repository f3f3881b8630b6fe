use crate::buffer::{Buffer, MapBuffer};
use crate::config::Config;
use crate::http::request::Request;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespPhase {
    /// Nothing prepared yet.
    Ready,
    /// Serialized header is in the connection buffer, being sent.
    Header,
    /// Header flushed; the mapped file body is being sent.
    Body,
    /// An error status was decided; the page has not been laid out yet.
    Abort,
    /// Error header+body are in the connection buffer, being sent.
    Error,
    /// A CGI child owns the reply stream; the response path stands down.
    Disabled,
}

#[derive(Debug)]
pub struct Response {
    pub phase: RespPhase,
    pub status: u16,
    pub clen: i64,
    pub alive: bool,
    pub hdrs: HeaderList,
    /// Mapped file body for static responses.
    pub file: Option<MapBuffer>,
}

impl Response {
    pub fn new() -> Self {
        Response {
            phase: RespPhase::Ready,
            status: HTTP_OK,
            clen: 0,
            alive: true,
            hdrs: HeaderList::new(),
            file: None,
        }
    }

    pub fn reset(&mut self) {
        self.phase = RespPhase::Ready;
        self.status = HTTP_OK;
        self.clen = 0;
        self.alive = true;
        self.hdrs.reset();
        self.file = None;
    }

    pub fn reason(code: u16) -> &'static str {
        match code {
            HTTP_OK => "OK",
            HTTP_BAD_REQUEST => "Bad Request",
            HTTP_NOT_FOUND => "Not Found",
            HTTP_LENGTH_REQUIRED => "Length Required",
            HTTP_NOT_IMPLEMENTED => "Not Implemented",
            HTTP_SERVICE_UNAVAILABLE => "Service Temporarily Unavailable",
            _ => "Internal Server Error",
        }
    }

    /// Resolve the request against the document root: open, map, and
    /// describe the target file, falling back to the default index pages
    /// when the target is a directory or unreadable. On total failure the
    /// status is set to 404 and `false` is returned.
    pub fn resolve(&mut self, req: &Request, conf: &Config) -> bool {
        self.alive = req.alive;

        let base = conf.www.join(req.uri.trim_start_matches('/'));
        let mut candidates = vec![base.clone()];
        for index in ["index.html", "index.htm"] {
            candidates.push(base.join(index));
        }

        for path in candidates {
            let Ok(file) = File::open(&path) else {
                continue;
            };
            let Ok(meta) = file.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let len = meta.len() as usize;
            let map = match MapBuffer::map(&file, len) {
                Ok(m) => m,
                Err(e) => {
                    error!("[resolve] mmap failed on {}: {}", path.display(), e);
                    continue;
                }
            };
            self.status = HTTP_OK;
            self.clen = len as i64;
            self.hdrs.push("Content-Type", mime_for(&path));
            if let Ok(mtime) = meta.modified() {
                self.hdrs.push("Last-Modified", &httpdate::fmt_http_date(mtime));
            }
            self.file = Some(map);
            return true;
        }

        self.status = HTTP_NOT_FOUND;
        false
    }

    /// Lay the response header out into `out`: status line, the fixed
    /// server headers, then every stored header in insertion order.
    pub fn write_header(&self, out: &mut Buffer) {
        let mut s = String::with_capacity(256);
        s.push_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            Self::reason(self.status)
        ));
        s.push_str(&format!(
            "Date: {}\r\n",
            httpdate::fmt_http_date(SystemTime::now())
        ));
        s.push_str(&format!("Server: {VERSION}\r\n"));
        s.push_str(&format!(
            "Connection: {}\r\n",
            if self.alive { "keep-alive" } else { "close" }
        ));
        s.push_str(&format!("Content-Length: {}\r\n", self.clen));
        for (k, v) in self.hdrs.iter() {
            s.push_str(&format!("{k}: {v}\r\n"));
        }
        s.push_str("\r\n");
        out.fill(s.as_bytes());
    }

    /// Lay header and canned body end-to-end into `out` and move to the
    /// Error phase. Unknown codes collapse to 500.
    pub fn prepare_error(&mut self, req_alive: bool, out: &mut Buffer) {
        if !matches!(self.status, 400 | 404 | 411 | 500 | 501 | 503) {
            self.status = HTTP_INTERNAL_SERVER_ERROR;
        }
        self.alive = req_alive;
        self.hdrs.reset();
        self.file = None;
        let body = error_body(self.status);
        self.clen = body.len() as i64;
        out.reset();
        self.write_header(out);
        out.fill(body.as_bytes());
        self.phase = RespPhase::Error;
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "text/plain",
    }
}

macro_rules! canned_page {
    ($code:literal, $reason:literal) => {
        concat!(
            "<html>\r\n",
            "<head><title>",
            $code,
            " ",
            $reason,
            "</title></head>\r\n",
            "<body bgcolor=\"white\">\r\n",
            "<center><h1>",
            $code,
            " ",
            $reason,
            "</h1></center>\r\n",
            "<hr><center>Liso/1.0</center>\r\n",
            "</body>\r\n",
            "</html>\r\n"
        )
    };
}

pub fn error_body(code: u16) -> &'static str {
    match code {
        HTTP_BAD_REQUEST => canned_page!("400", "Bad Request"),
        HTTP_NOT_FOUND => canned_page!("404", "Not Found"),
        HTTP_LENGTH_REQUIRED => canned_page!("411", "Length Required"),
        HTTP_NOT_IMPLEMENTED => canned_page!("501", "Not Implemented"),
        HTTP_SERVICE_UNAVAILABLE => canned_page!("503", "Service Temporarily Unavailable"),
        _ => canned_page!("500", "Internal Server Error"),
    }
}
