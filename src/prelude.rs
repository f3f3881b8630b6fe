pub use crate::buffer::{BUFSZ, Buffer, MapBuffer};
pub use crate::cgi::{Cgi, CgiPhase, PipePhase};
pub use crate::config::Config;
pub use crate::error::{LisoError, Result};
pub use crate::http::connection::{Advance, Connection};
pub use crate::http::headers::{HDR_KEYSZ, HDR_VALSZ, HeaderList};
pub use crate::http::request::{Method, ReqKind, ReqPhase, Request, Scheme};
pub use crate::http::response::{RespPhase, Response};
pub use crate::tls::{Handshake, TlsContext, TlsSession};

pub use log::{debug, error, info, trace, warn};
pub use mio::event::Event;
pub use mio::net::{TcpListener, TcpStream};
pub use mio::unix::SourceFd;
pub use mio::{Events, Interest, Poll, Registry, Token};

pub use std::collections::HashMap;
pub use std::fs::{File, OpenOptions};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::os::fd::{AsRawFd, RawFd};
pub use std::path::{Path, PathBuf};
pub use std::process::{Command, Stdio};
pub use std::time::{Duration, SystemTime};

pub const VERSION: &str = "Liso/1.0";

// status codes the server emits
pub const HTTP_OK: u16 = 200;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_LENGTH_REQUIRED: u16 = 411;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_SERVICE_UNAVAILABLE: u16 = 503;
