use liso::cgi::build_env;
use liso::http::request::{Request, Scheme};

fn env_of(raw: &[u8], scheme: Scheme) -> Vec<(String, String)> {
    let mut req = Request::new(scheme);
    req.parse(raw).unwrap();
    build_env(&req)
}

fn get<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn baseline_entries_for_a_post() {
    let env = env_of(
        b"POST /cgi/echo HTTP/1.1\r\nHost: cgi.example\r\nContent-Length: 5\r\n\r\n",
        Scheme::Http,
    );
    assert_eq!(get(&env, "GATEWAY_INTERFACE"), Some("CGI/1.1"));
    assert_eq!(get(&env, "PATH_INFO"), Some("/echo"));
    assert_eq!(get(&env, "REQUEST_URI"), Some("/cgi/echo"));
    assert_eq!(get(&env, "REQUEST_METHOD"), Some("POST"));
    assert_eq!(get(&env, "CONTENT_LENGTH"), Some("5"));
    assert_eq!(get(&env, "SERVER_NAME"), Some("Liso/1.0"));
    assert_eq!(get(&env, "SERVER_SOFTWARE"), Some("Liso/1.0"));
    assert_eq!(get(&env, "SERVER_PROTOCOL"), Some("HTTP/1.1"));
    assert_eq!(get(&env, "HTTP_HOST"), Some("cgi.example"));
    assert_eq!(get(&env, "SCRIPT_NAME"), Some("/cgi"));
    // plain http: no HTTPS marker
    assert_eq!(get(&env, "HTTPS"), None);
}

#[test]
fn query_string_only_when_present() {
    let env = env_of(b"GET /cgi/s?a=1&b=2 HTTP/1.1\r\nHost: x\r\n\r\n", Scheme::Http);
    assert_eq!(get(&env, "QUERY_STRING"), Some("a=1&b=2"));

    let env = env_of(b"GET /cgi/s HTTP/1.1\r\nHost: x\r\n\r\n", Scheme::Http);
    assert_eq!(get(&env, "QUERY_STRING"), None);
}

#[test]
fn content_length_only_when_positive() {
    let env = env_of(b"GET /cgi/s HTTP/1.1\r\nHost: x\r\n\r\n", Scheme::Http);
    assert_eq!(get(&env, "CONTENT_LENGTH"), None);
}

#[test]
fn https_scheme_sets_the_marker() {
    let env = env_of(b"GET /cgi/s HTTP/1.1\r\nHost: x\r\n\r\n", Scheme::Https);
    assert_eq!(get(&env, "HTTPS"), Some("on"));
}

#[test]
fn headers_map_to_http_meta_variables() {
    let env = env_of(
        b"GET /cgi/s HTTP/1.1\r\nHost: x\r\nUser-Agent: curl/8\r\nX-Api-Key: k1\r\n\r\n",
        Scheme::Http,
    );
    assert_eq!(get(&env, "HTTP_USER_AGENT"), Some("curl/8"));
    assert_eq!(get(&env, "HTTP_X_API_KEY"), Some("k1"));
}

#[test]
fn content_type_gets_its_own_variable() {
    let env = env_of(
        b"POST /cgi/s HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\nContent-Type: text/plain\r\n\r\n",
        Scheme::Http,
    );
    assert_eq!(get(&env, "CONTENT_TYPE"), Some("text/plain"));
    assert_eq!(get(&env, "HTTP_CONTENT_TYPE"), None);
}

#[test]
fn entry_count_is_capped() {
    let mut raw = b"GET /cgi/s HTTP/1.1\r\nHost: x\r\n".to_vec();
    for i in 0..100 {
        raw.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
    }
    raw.extend_from_slice(b"\r\n");
    let mut req = Request::new(Scheme::Http);
    req.parse(&raw).unwrap();
    let env = build_env(&req);
    assert!(env.len() <= 64);
}
