//! The SOCKS5 tunnel state machine: one tokio task per accepted
//! client connection, owning both sides of the session directly so
//! there is no cross-task back-pointer to manage (see DESIGN.md).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, TcpStream};
use tokio::sync::oneshot;

use crate::buffer::Buffer;
use crate::config::ServerContext;
use crate::extra_error;
use crate::errors::{Error, Result};
use crate::freeze::Freeze;
use crate::sniffer;
use crate::socket::{Role, SockState, Socket};
use crate::socks5::auth::{AuthDone, AuthParser};
use crate::socks5::greeting::GreetingParser;
use crate::socks5::request::{Cmd, RequestParser};
use crate::socks5::{DestAddr, ParseOutcome, ATYP_IPV4, ATYP_IPV6};
use crate::udp;

/// Protocol state of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Open,
    Auth,
    Request,
    Connecting,
    Connected,
    /// A UDP association was negotiated; the TCP leg is kept open only
    /// to detect the client closing it (RFC 1928 §7).
    Associated,
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

pub struct Tunnel {
    client: Option<Socket>,
    remote: Option<Socket>,
    state: TunnelState,

    greeting_parser: GreetingParser,
    auth_parser: AuthParser,
    request_parser: RequestParser,

    ctx: Arc<ServerContext>,
    freeze: Freeze,

    udp_notify: Option<oneshot::Sender<()>>,
}

impl Tunnel {
    pub fn new(stream: TcpStream, ctx: Arc<ServerContext>, freeze: Freeze) -> Self {
        Tunnel {
            client: Some(Socket::new(stream, SockState::Connected, Role::Client)),
            remote: None,
            state: TunnelState::Open,
            greeting_parser: GreetingParser::new(),
            auth_parser: AuthParser::new(),
            request_parser: RequestParser::new(),
            ctx,
            freeze,
            udp_notify: None,
        }
    }

    /// Drive the tunnel to completion: handshake, connect, forward,
    /// teardown. Returns once both sides are gone.
    pub async fn run(mut self) {
        loop {
            if self.client.is_none() && self.remote.is_none() {
                return;
            }

            let client_readable_pending = self
                .client
                .as_ref()
                .map(|s| s.state != SockState::HalfClosed)
                .unwrap_or(false);
            let client_write_pending = self
                .client
                .as_ref()
                .map(|s| s.write_buffer.readable() > 0)
                .unwrap_or(false);
            let remote_readable_pending = self
                .remote
                .as_ref()
                .map(|s| s.state != SockState::HalfClosed)
                .unwrap_or(false);
            let remote_write_pending = self
                .remote
                .as_ref()
                .map(|s| s.write_buffer.readable() > 0)
                .unwrap_or(false);

            tokio::select! {
                res = async { self.client.as_ref().unwrap().stream.readable().await }, if client_readable_pending => {
                    self.on_client_readable(res).await;
                }
                res = async { self.client.as_ref().unwrap().stream.writable().await }, if client_write_pending => {
                    self.on_client_writable(res).await;
                }
                res = async { self.remote.as_ref().unwrap().stream.readable().await }, if remote_readable_pending => {
                    self.on_remote_readable(res).await;
                }
                res = async { self.remote.as_ref().unwrap().stream.writable().await }, if remote_write_pending => {
                    self.on_remote_writable(res).await;
                }
            }
        }
    }

    // ---- readable/writable entry points -------------------------------

    async fn on_client_readable(&mut self, readiness: io::Result<()>) {
        if readiness.is_err() {
            return;
        }
        let outcome = {
            let sock = self.client.as_mut().unwrap();
            try_fill(sock).await
        };
        match outcome {
            FillOutcome::Data => self.dispatch_client().await,
            FillOutcome::Eof => self.half_close(Role::Client),
            FillOutcome::Transient => {}
            FillOutcome::Fatal => self.half_close(Role::Client),
        }
    }

    async fn on_remote_readable(&mut self, readiness: io::Result<()>) {
        if readiness.is_err() {
            return;
        }
        let outcome = {
            let sock = self.remote.as_mut().unwrap();
            try_fill(sock).await
        };
        match outcome {
            FillOutcome::Data => self.forward(false).await,
            FillOutcome::Eof => self.half_close(Role::Remote),
            FillOutcome::Transient => {}
            FillOutcome::Fatal => self.half_close(Role::Remote),
        }
    }

    async fn on_client_writable(&mut self, readiness: io::Result<()>) {
        if readiness.is_err() {
            return;
        }
        self.drain_write(Role::Client).await;
    }

    async fn on_remote_writable(&mut self, readiness: io::Result<()>) {
        if readiness.is_err() {
            return;
        }
        self.drain_write(Role::Remote).await;
    }

    async fn drain_write(&mut self, role: Role) {
        let should_force_close = {
            let sock = match role {
                Role::Client => self.client.as_mut(),
                Role::Remote => self.remote.as_mut(),
            };
            let Some(sock) = sock else { return };
            if sock.write_buffer.readable() > 0 {
                match sock.write_buffer.drain_to(&mut sock.stream).await {
                    Ok(_) => {}
                    Err(e) if is_transient(&e) => {}
                    Err(e) => {
                        log::error!("write error on {} socket: {}", sock.label(), e);
                        self.force_close(role);
                        return;
                    }
                }
            }
            sock.write_buffer.readable() == 0 && sock.state == SockState::HalfClosed
        };
        if should_force_close {
            self.force_close(role);
        }
    }

    // ---- PDU dispatch ---------------------------------------------------

    async fn dispatch_client(&mut self) {
        match self.state {
            TunnelState::Open => self.step_greeting(),
            TunnelState::Auth => self.step_auth(),
            TunnelState::Request => self.step_request().await,
            TunnelState::Connected => self.forward(true).await,
            TunnelState::Associated => {
                // Any data on an associated control connection is
                // ignored; only its closure matters.
            }
            TunnelState::Connecting => unreachable!("client read while awaiting connect"),
        }
    }

    fn step_greeting(&mut self) {
        let auth_required = self.ctx.auth_required();
        let outcome = {
            let buf = &mut self.client.as_mut().unwrap().read_buffer;
            self.greeting_parser.step(buf, auth_required)
        };
        match outcome {
            ParseOutcome::Incomplete => {}
            ParseOutcome::Fatal(reason) => {
                log::warn!("greeting failed: {}", reason);
                self.force_close(Role::Client);
            }
            ParseOutcome::Done(done) => {
                log::info!("SOCKS5 greeting complete, auth_required={}", done.auth_required);
                if let Some(client) = self.client.as_mut() {
                    client.write_buffer.append(&done.reply);
                }
                self.state = if done.auth_required { TunnelState::Auth } else { TunnelState::Request };
            }
        }
    }

    fn step_auth(&mut self) {
        let outcome = {
            let buf = &mut self.client.as_mut().unwrap().read_buffer;
            self.auth_parser.step(buf, self.ctx.username.as_bytes(), self.ctx.password.as_bytes())
        };
        match outcome {
            ParseOutcome::Incomplete => {}
            ParseOutcome::Fatal(reason) => {
                log::warn!("auth failed: {}", reason);
                self.force_close(Role::Client);
            }
            ParseOutcome::Done(AuthDone::Mismatch) => {
                log::warn!("auth mismatch, closing client");
                self.force_close(Role::Client);
            }
            ParseOutcome::Done(AuthDone::Success { reply }) => {
                log::info!("auth succeeded");
                if let Some(client) = self.client.as_mut() {
                    client.write_buffer.append(&reply);
                }
                self.state = TunnelState::Request;
            }
        }
    }

    async fn step_request(&mut self) {
        let outcome = {
            let buf = &mut self.client.as_mut().unwrap().read_buffer;
            self.request_parser.step(buf)
        };
        match outcome {
            ParseOutcome::Incomplete => {}
            ParseOutcome::Fatal(reason) => {
                log::warn!("request failed: {}", reason);
                self.force_close(Role::Client);
            }
            ParseOutcome::Done(done) => match done.cmd {
                Cmd::Connect => {
                    log::info!("request: CONNECT {}:{}", done.addr.host_string(), done.port);
                    self.state = TunnelState::Connecting;
                    if let Err(e) = self.connect_to_remote(done.addr, done.port).await {
                        extra_error!("connect-to-remote failed: {}", e);
                        self.shutdown_tunnel();
                    }
                }
                Cmd::UdpAssociate => {
                    log::info!("request: UDP_ASSOCIATE");
                    if let Err(e) = self.start_udp_associate(done.addr).await {
                        log::error!("udp associate failed: {}", e);
                        self.force_close(Role::Client);
                    }
                }
            },
        }
    }

    // ---- connect / reply -----------------------------------------------

    async fn connect_to_remote(&mut self, addr: DestAddr, port: u16) -> Result<()> {
        let host = addr.host_string();
        log::info!("Resolving {}:{}", host, port);

        let candidates: Vec<SocketAddr> = lookup_host((host.as_str(), port)).await.map_err(Error::Resolve)?.collect();

        for candidate in candidates {
            log::info!("Connecting to remote {}:{} -> {}", host, port, candidate);
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    self.remote = Some(Socket::new(stream, SockState::Connected, Role::Remote));
                    self.state = TunnelState::Connected;
                    log::info!("Remote connection established on {}", candidate);
                    return self.send_connect_reply();
                }
                Err(e) => {
                    log::error!("connect failed to {}: {}", candidate, e);
                }
            }
        }

        Err(Error::ConnectFailed)
    }

    fn send_connect_reply(&mut self) -> Result<()> {
        let local = self.remote.as_ref().unwrap().stream.local_addr()?;

        let mut reply = vec![0x05u8, 0x00, 0x00];
        match local {
            SocketAddr::V4(v4) => {
                reply.push(ATYP_IPV4);
                reply.extend_from_slice(&v4.ip().octets());
                reply.extend_from_slice(&v4.port().to_be_bytes());
            }
            SocketAddr::V6(v6) => {
                reply.push(ATYP_IPV6);
                reply.extend_from_slice(&v6.ip().octets());
                reply.extend_from_slice(&v6.port().to_be_bytes());
            }
        }

        if let Some(client) = self.client.as_mut() {
            client.write_buffer.append(&reply);
        }
        log::info!("Sent SOCKS5 CONNECT success to client");
        Ok(())
    }

    async fn start_udp_associate(&mut self, addr: DestAddr) -> Result<()> {
        let wants_ipv6 = match &addr {
            DestAddr::V4(_) => false,
            DestAddr::V6(_) => true,
            DestAddr::Domain(host) => lookup_host((host.as_str(), 0))
                .await
                .ok()
                .and_then(|mut it| it.next())
                .map(|a| a.is_ipv6())
                .unwrap_or(false),
        };
        let bind_ip = if wants_ipv6 { "[::]:0" } else { "0.0.0.0:0" };
        let udp_socket = tokio::net::UdpSocket::bind(bind_ip).await.map_err(Error::SocketError)?;
        let bound = udp_socket.local_addr().map_err(Error::SocketError)?;

        let mut reply = vec![0x05u8, 0x00, 0x00];
        match bound {
            SocketAddr::V4(v4) => {
                reply.push(ATYP_IPV4);
                reply.extend_from_slice(&v4.ip().octets());
                reply.extend_from_slice(&v4.port().to_be_bytes());
            }
            SocketAddr::V6(v6) => {
                reply.push(ATYP_IPV6);
                reply.extend_from_slice(&v6.ip().octets());
                reply.extend_from_slice(&v6.port().to_be_bytes());
            }
        }
        if let Some(client) = self.client.as_mut() {
            client.write_buffer.append(&reply);
        }

        let (tx, rx) = oneshot::channel();
        self.udp_notify = Some(tx);
        self.state = TunnelState::Associated;

        tokio::spawn(async move {
            if let Err(e) = udp::run_association(udp_socket, rx).await {
                log::error!("udp association ended: {}", e);
            }
        });

        log::info!("UDP associate bound on {}", bound);
        Ok(())
    }

    // ---- forwarding ------------------------------------------------------

    async fn forward(&mut self, from_client: bool) {
        let dest_present = if from_client { self.remote.is_some() } else { self.client.is_some() };
        if !dest_present {
            self.shutdown_tunnel();
            return;
        }

        {
            let source: &Buffer = if from_client {
                &self.client.as_ref().unwrap().read_buffer
            } else {
                &self.remote.as_ref().unwrap().read_buffer
            };
            let data = source.readable_slice();
            if !sniffer::sniff_http(data, from_client) && !sniffer::sniff_websocket(data, from_client) {
                let label = if from_client { "client -> remote" } else { "remote -> client" };
                sniffer::hexdump(label, data);
            }
        }

        if self.freeze.is_frozen() {
            return;
        }

        if from_client {
            let (src, dst) = (self.client.as_mut().unwrap(), self.remote.as_mut().unwrap());
            dst.write_buffer.concat(&src.read_buffer);
            src.read_buffer.clear();
        } else {
            let (src, dst) = (self.remote.as_mut().unwrap(), self.client.as_mut().unwrap());
            dst.write_buffer.concat(&src.read_buffer);
            src.read_buffer.clear();
        }
    }

    // ---- teardown ----------------------------------------------------------

    /// Half-close one side: stop accepting new reads on it, flush any
    /// already-buffered data to the peer, and force_close immediately
    /// if nothing remains to write.
    fn half_close(&mut self, role: Role) {
        if matches!(self.state, TunnelState::Connected) {
            match role {
                Role::Client => {
                    if let (Some(client), Some(remote)) = (self.client.as_mut(), self.remote.as_mut()) {
                        remote.write_buffer.concat(&client.read_buffer);
                        client.read_buffer.clear();
                    }
                }
                Role::Remote => {
                    if let (Some(remote), Some(client)) = (self.remote.as_mut(), self.client.as_mut()) {
                        client.write_buffer.concat(&remote.read_buffer);
                        remote.read_buffer.clear();
                    }
                }
            }
        }

        let should_force_close = match role {
            Role::Client => match self.client.as_mut() {
                Some(c) => {
                    c.state = SockState::HalfClosed;
                    c.write_buffer.readable() == 0
                }
                None => return,
            },
            Role::Remote => match self.remote.as_mut() {
                Some(r) => {
                    r.state = SockState::HalfClosed;
                    r.write_buffer.readable() == 0
                }
                None => return,
            },
        };

        log::info!("half-closing {:?} socket", role);
        if should_force_close {
            self.force_close(role);
        }
    }

    /// Release a side's resources outright. If the tunnel was
    /// `Connected` and the other side still exists, proactively
    /// half-close it too: once one direction is gone, the other
    /// side can never be reached again.
    fn force_close(&mut self, role: Role) {
        match role {
            Role::Client => {
                self.client = None;
                self.udp_notify = None;
            }
            Role::Remote => self.remote = None,
        }
        log::info!("force-closed {:?} socket", role);

        if matches!(self.state, TunnelState::Connected) {
            let (other, other_present) = match role {
                Role::Client => (Role::Remote, self.remote.is_some()),
                Role::Remote => (Role::Client, self.client.is_some()),
            };
            if other_present {
                self.half_close(other);
            }
        }
    }

    fn shutdown_tunnel(&mut self) {
        if self.client.is_some() {
            self.half_close(Role::Client);
        }
        if self.remote.is_some() {
            self.half_close(Role::Remote);
        }
    }
}

enum FillOutcome {
    Data,
    Eof,
    Transient,
    Fatal,
}

async fn try_fill(sock: &mut Socket) -> FillOutcome {
    match sock.read_buffer.fill_from(&mut sock.stream).await {
        Ok(0) => FillOutcome::Eof,
        Ok(_) => FillOutcome::Data,
        Err(e) if is_transient(&e) => FillOutcome::Transient,
        Err(e) => {
            log::warn!("read error on {} socket: {}", sock.label(), e);
            FillOutcome::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerContext;

    fn ctx(username: &str, password: &str) -> Arc<ServerContext> {
        Arc::new(ServerContext {
            address: "127.0.0.1".into(),
            port: 0,
            username: username.into(),
            password: password.into(),
            logfile: "".into(),
        })
    }

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (connect_res, accept_res) = tokio::join!(connect, accept);
        (connect_res.unwrap(), accept_res.unwrap().0)
    }

    #[tokio::test]
    async fn greeting_with_no_credentials_replies_no_auth() {
        let (mut client_side, server_side) = loopback_pair().await;
        let mut tunnel = Tunnel::new(server_side, ctx("", ""), Freeze::new());

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        client_side.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        // Drive one readable + one writable cycle manually.
        tunnel.on_client_readable(Ok(())).await;
        assert_eq!(tunnel.state, TunnelState::Request);
        tunnel.on_client_writable(Ok(())).await;

        let mut reply = [0u8; 2];
        client_side.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn oversized_username_is_rejected_by_config_layer() {
        // Protocol-level ULEN bound is exercised in socks5::auth tests;
        // this just confirms the tunnel wires ctx credentials through.
        let c = ctx("bob", "hunter2");
        assert!(c.auth_required());
    }
}
