use crate::error::{LisoError, Result};
use std::path::PathBuf;

/// Runtime configuration, taken verbatim from the eight positional
/// command-line arguments.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub https_port: u16,
    pub log: PathBuf,
    pub lock: PathBuf,
    pub www: PathBuf,
    pub cgi: PathBuf,
    pub prv: PathBuf,
    pub crt: PathBuf,
}

const ARG_CNT: usize = 8;

impl Config {
    pub fn usage(prog: &str) -> String {
        format!(
            "Usage: {prog} <HTTP port> <HTTPS port> <log file> <lock file> \
             <www folder> <CGI script path> <private key file> <certificate file>"
        )
    }

    pub fn from_args(args: &[String]) -> Result<Config> {
        if args.len() != ARG_CNT + 1 {
            let prog = args.first().map(String::as_str).unwrap_or("lisod");
            return Err(LisoError::Usage(Self::usage(prog)));
        }

        let port = |i: usize, what: &'static str| -> Result<u16> {
            args[i].parse().map_err(|_| LisoError::BadArg {
                what,
                value: args[i].clone(),
            })
        };

        Ok(Config {
            http_port: port(1, "HTTP port")?,
            https_port: port(2, "HTTPS port")?,
            log: PathBuf::from(&args[3]),
            lock: PathBuf::from(&args[4]),
            www: PathBuf::from(&args[5]),
            cgi: PathBuf::from(&args[6]),
            prv: PathBuf::from(&args[7]),
            crt: PathBuf::from(&args[8]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_full_argument_vector() {
        let a = args(&[
            "lisod", "8080", "8443", "liso.log", "liso.lock", "www", "cgi/echo.py", "key.pem",
            "cert.pem",
        ]);
        let conf = Config::from_args(&a).unwrap();
        assert_eq!(conf.http_port, 8080);
        assert_eq!(conf.https_port, 8443);
        assert_eq!(conf.www, PathBuf::from("www"));
    }

    #[test]
    fn rejects_wrong_arity() {
        let a = args(&["lisod", "8080"]);
        assert!(matches!(Config::from_args(&a), Err(LisoError::Usage(_))));
    }

    #[test]
    fn rejects_non_numeric_port() {
        let a = args(&[
            "lisod", "http", "8443", "l", "k", "w", "c", "p", "t",
        ]);
        assert!(matches!(
            Config::from_args(&a),
            Err(LisoError::BadArg { what: "HTTP port", .. })
        ));
    }
}
