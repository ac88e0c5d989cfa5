//! `socks5-tap`: an intercepting SOCKS5 proxy with opportunistic
//! HTTP/WebSocket sniffing and an operator freeze toggle.

use std::process::ExitCode;
use std::sync::Arc;

use socks5_tap::config::ServerContext;
use socks5_tap::freeze::Freeze;
use socks5_tap::{listener, logger, terminal};

#[tokio::main]
async fn main() -> ExitCode {
    let ctx = match ServerContext::from_args() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("socks5-tap: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logger::init(if ctx.logfile.is_empty() { None } else { Some(ctx.logfile.as_str()) });

    log::info!("socks5-tap starting on {}:{}", ctx.address, ctx.port);
    if ctx.auth_required() {
        log::info!("USER/PASS auth required");
    } else {
        log::info!("no auth required");
    }

    let ctx = Arc::new(ctx);
    let freeze = Freeze::new();

    let terminal_freeze = freeze.clone();
    std::thread::spawn(move || terminal::run(terminal_freeze));

    tokio::select! {
        res = listener::serve(Arc::clone(&ctx), freeze) => {
            if let Err(e) = res {
                log::error!("listener exited: {}", e);
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal, exiting");
        }
    }

    ExitCode::SUCCESS
}
