use liso::buffer::Buffer;
use liso::config::Config;
use liso::http::request::{Request, Scheme};
use liso::http::response::{RespPhase, Response, error_body, mime_for};
use std::fs;
use std::path::{Path, PathBuf};

fn test_config(www: &Path) -> Config {
    Config {
        http_port: 0,
        https_port: 0,
        log: PathBuf::from("liso.log"),
        lock: PathBuf::from("liso.lock"),
        www: www.to_path_buf(),
        cgi: PathBuf::from("/bin/cat"),
        prv: PathBuf::from("key.pem"),
        crt: PathBuf::from("cert.pem"),
    }
}

fn parsed(raw: &[u8]) -> Request {
    let mut r = Request::new(Scheme::Http);
    r.parse(raw).unwrap();
    r
}

fn header_text(resp: &Response) -> String {
    let mut buf = Buffer::new();
    resp.write_header(&mut buf);
    String::from_utf8_lossy(buf.as_slice()).into_owned()
}

#[test]
fn resolves_a_plain_file() {
    let www = tempfile::tempdir().unwrap();
    fs::write(www.path().join("page.html"), "<p>hi</p>").unwrap();

    let req = parsed(b"GET /page.html HTTP/1.1\r\nHost: x\r\n\r\n");
    let mut resp = Response::new();
    assert!(resp.resolve(&req, &test_config(www.path())));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.clen, 9);
    assert_eq!(resp.hdrs.get("Content-Type"), Some("text/html"));
    assert!(resp.hdrs.get("Last-Modified").is_some());
    assert_eq!(resp.file.as_ref().unwrap().unread(), b"<p>hi</p>");
}

#[test]
fn root_uri_falls_back_to_index_html() {
    let www = tempfile::tempdir().unwrap();
    fs::write(www.path().join("index.html"), "hello").unwrap();

    let req = parsed(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    let mut resp = Response::new();
    assert!(resp.resolve(&req, &test_config(www.path())));
    assert_eq!(resp.clen, 5);
    assert_eq!(resp.hdrs.get("Content-Type"), Some("text/html"));

    let header = header_text(&resp);
    assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(header.contains("Content-Length: 5\r\n"));
    assert!(header.contains("Server: Liso/1.0\r\n"));
    assert!(header.contains("Connection: keep-alive\r\n"));
    assert!(header.ends_with("\r\n\r\n"));
}

#[test]
fn directory_uri_tries_index_pages_in_order() {
    let www = tempfile::tempdir().unwrap();
    fs::create_dir(www.path().join("docs")).unwrap();
    fs::write(www.path().join("docs/index.htm"), "older index").unwrap();

    let req = parsed(b"GET /docs HTTP/1.1\r\nHost: x\r\n\r\n");
    let mut resp = Response::new();
    assert!(resp.resolve(&req, &test_config(www.path())));
    assert_eq!(resp.clen, 11);
}

#[test]
fn missing_target_resolves_to_404() {
    let www = tempfile::tempdir().unwrap();

    let req = parsed(b"GET /missing HTTP/1.1\r\nHost: x\r\n\r\n");
    let mut resp = Response::new();
    assert!(!resp.resolve(&req, &test_config(www.path())));
    assert_eq!(resp.status, 404);
    assert!(resp.file.is_none());
}

#[test]
fn content_length_always_matches_the_mapped_file() {
    let www = tempfile::tempdir().unwrap();
    let body = vec![b'x'; 13000];
    fs::write(www.path().join("big.txt"), &body).unwrap();

    let req = parsed(b"GET /big.txt HTTP/1.1\r\nHost: x\r\n\r\n");
    let mut resp = Response::new();
    assert!(resp.resolve(&req, &test_config(www.path())));
    assert_eq!(resp.clen as usize, resp.file.as_ref().unwrap().len());
    assert!(resp.hdrs.get("Content-Type").is_some());
}

#[test]
fn alive_flag_mirrors_the_request() {
    let www = tempfile::tempdir().unwrap();
    fs::write(www.path().join("index.html"), "x").unwrap();

    let req = parsed(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    let mut resp = Response::new();
    resp.resolve(&req, &test_config(www.path()));
    assert!(!resp.alive);
    assert!(header_text(&resp).contains("Connection: close\r\n"));
}

#[test]
fn mime_table_covers_the_known_extensions() {
    assert_eq!(mime_for(Path::new("a.html")), "text/html");
    assert_eq!(mime_for(Path::new("a.HTM")), "text/html");
    assert_eq!(mime_for(Path::new("a.css")), "text/css");
    assert_eq!(mime_for(Path::new("a.js")), "application/javascript");
    assert_eq!(mime_for(Path::new("a.png")), "image/png");
    assert_eq!(mime_for(Path::new("a.jpg")), "image/jpeg");
    assert_eq!(mime_for(Path::new("a.jpeg")), "image/jpeg");
    assert_eq!(mime_for(Path::new("a.gif")), "image/gif");
    assert_eq!(mime_for(Path::new("a.bin")), "text/plain");
    assert_eq!(mime_for(Path::new("noext")), "text/plain");
}

#[test]
fn canned_error_page_is_laid_out_end_to_end() {
    let mut resp = Response::new();
    resp.status = 404;
    resp.phase = RespPhase::Abort;

    let mut buf = Buffer::new();
    resp.prepare_error(true, &mut buf);

    assert_eq!(resp.phase, RespPhase::Error);
    let page = String::from_utf8_lossy(buf.as_slice()).into_owned();
    assert!(page.starts_with("HTTP/1.1 404 Not Found\r\n"));
    let body = error_body(404);
    assert!(page.ends_with(body));
    assert!(page.contains(&format!("Content-Length: {}\r\n", body.len())));
    assert_eq!(resp.clen as usize, body.len());
}

#[test]
fn unknown_error_codes_collapse_to_500() {
    let mut resp = Response::new();
    resp.status = 418;
    resp.phase = RespPhase::Abort;

    let mut buf = Buffer::new();
    resp.prepare_error(false, &mut buf);
    assert_eq!(resp.status, 500);
    let page = String::from_utf8_lossy(buf.as_slice()).into_owned();
    assert!(page.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(page.contains("Connection: close\r\n"));
}

#[test]
fn every_emitted_status_has_a_canned_body() {
    for code in [400u16, 404, 411, 500, 501, 503] {
        let body = error_body(code);
        assert!(body.contains(&code.to_string()));
        assert!(body.starts_with("<html>"));
    }
}

#[test]
fn reason_phrase_matches_the_canned_page_title() {
    for code in [400u16, 404, 411, 500, 501, 503] {
        let body = error_body(code);
        let title = format!("{} {}", code, Response::reason(code));
        assert!(body.contains(&title), "{code}: {title} not in page");
    }
}
