//! TCP accept loop: binds the configured address, then spawns one
//! [`crate::tunnel::Tunnel`] task per accepted connection.

use std::sync::Arc;

use socket2::{Domain, Socket as Socket2, Type};
use tokio::net::{lookup_host, TcpListener};

use crate::config::ServerContext;
use crate::errors::{Error, Result};
use crate::freeze::Freeze;
use crate::tunnel::Tunnel;

const BACKLOG: i32 = 1024;

/// Resolve, bind and listen on `ctx.address:ctx.port`, then accept
/// connections until the process is asked to shut down.
pub async fn serve(ctx: Arc<ServerContext>, freeze: Freeze) -> Result<()> {
    let bind_addr = lookup_host((ctx.address.as_str(), ctx.port))
        .await
        .map_err(Error::Fatal)?
        .next()
        .ok_or_else(|| Error::Fatal(std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address resolved")))?;

    let domain = if bind_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let raw = Socket2::new(domain, Type::STREAM, None).map_err(Error::Fatal)?;
    raw.set_reuse_address(true).map_err(Error::Fatal)?;
    raw.set_nonblocking(true).map_err(Error::Fatal)?;
    raw.bind(&bind_addr.into()).map_err(Error::Fatal)?;
    raw.listen(BACKLOG).map_err(Error::Fatal)?;

    let listener = TcpListener::from_std(raw.into()).map_err(Error::Fatal)?;
    log::info!("listening on {}", bind_addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };
        log::info!("accepted connection from {}", peer);

        let ctx = Arc::clone(&ctx);
        let freeze = freeze.clone();
        tokio::spawn(async move {
            Tunnel::new(stream, ctx, freeze).run().await;
            log::info!("tunnel for {} closed", peer);
        });
    }
}
