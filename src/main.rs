use anyhow::{Context, Result};
use std::io;
use std::process;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("Error: {:#}", e);
        process::exit(1);
    }
}

/// One request on stdin, one response on stdout. Logs go to stderr.
fn run() -> Result<()> {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let served = seispick::worker::serve(stdin, stdout).context("Failed to serve detection request")?;
    log::info!("Worker processed {} traces", served);
    Ok(())
}
