#![deny(unsafe_code)]

use std::process;

use structopt::StructOpt;

use bolt::conf::{Options, Settings};
use bolt::logger::logger_init;
use bolt::Server;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    //init config
    let settings = match Settings::init(Options::from_args()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("settings init failed, {:?}", e);
            process::exit(2);
        }
    };

    //init log
    let _logger = match logger_init(&settings.log) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("logger init failed, {:?}", e);
            process::exit(2);
        }
    };

    let _ = Settings::logs();

    let server = match Server::new(settings.broker.clone()).start() {
        Ok(server) => server,
        Err(e) => {
            log::error!("start bolt broker failed, {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("waiting for ctrl-c failed, {}", e);
    }
    log::info!("received ctrl-c, stopping");
    tokio::task::spawn_blocking(move || server.shutdown()).await.ok();
}
