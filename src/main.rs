use liso::config::Config;
use liso::pool::Pool;
use liso::{daemon, logging, signals};
use std::process::exit;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let conf = match Config::from_args(&args) {
        Ok(conf) => conf,
        Err(e) => {
            println!("{e}");
            exit(1);
        }
    };

    println!("----- Liso Server -----");

    if let Err(e) = daemon::daemonize(&conf.lock) {
        eprintln!("{e}");
        exit(1);
    }

    if let Err(e) = logging::init(&conf.log) {
        eprintln!("{e}");
        daemon::release_lock();
        exit(1);
    }

    signals::install();

    let mut pool = match Pool::new(&conf) {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("[startup] {e}");
            logging::stop();
            daemon::release_lock();
            exit(1);
        }
    };

    log::info!(
        "[startup] listening on port {} (http) and {} (https), serving {}",
        conf.http_port,
        conf.https_port,
        conf.www.display()
    );

    let code = match pool.run() {
        Ok(()) => 0,
        Err(e) => {
            log::error!("[loop] {e}");
            1
        }
    };

    drop(pool);
    log::info!("[shutdown] bye");
    logging::stop();
    daemon::release_lock();
    exit(code);
}
