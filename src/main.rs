use log::{error, info};
use selpref_lda::Run;
use std::env;
use std::process;

fn main() {

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("entering program...");
    let args: Vec<String> = env::args().collect();
    if let Err(e) = Run::run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}
