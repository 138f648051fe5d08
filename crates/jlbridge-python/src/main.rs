use std::process;
use std::sync::Arc;

use jlbridge::Handshake;
use jlbridge::transport::{ServerConfig, announce, serve};

fn main() {
    jlbridge_python::init_tracing();

    let config = match ServerConfig::from_env().and_then(|c| c.with_args(std::env::args().skip(1))) {
        Ok(config) => config,
        Err(e) => {
            let _ = announce(&Handshake::Error { msg: e.to_string() });
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("Usage: jlbridge-worker [--host <addr>] [--port <port>] [--bind-attempts <n>]");
            process::exit(2);
        }
    };

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "Worker failed");
        process::exit(1);
    }
}

fn run(config: ServerConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let worker = Arc::new(jlbridge_python::worker());
    runtime.block_on(serve(config, worker))
}
