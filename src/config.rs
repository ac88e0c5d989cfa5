//! CLI flags and the process-wide server context derived from them.

use clap::Parser;

use crate::errors::{Error, Result};

const MAX_CRED_LEN: usize = 20;

/// A SOCKS5 intercepting proxy.
#[derive(Debug, Parser)]
#[command(name = "socks5-tap", version, about)]
struct Cli {
    /// Address to bind the listening socket to.
    #[arg(short = 'a', long = "address")]
    address: String,

    /// Port to bind the listening socket to.
    #[arg(short = 'p', long = "port")]
    port: u16,

    /// Username for SOCKS5 USER/PASS auth (max 20 bytes). Omit for
    /// anonymous auth.
    #[arg(short = 'u', long = "username", default_value = "")]
    username: String,

    /// Password for SOCKS5 USER/PASS auth (max 20 bytes). Omit for
    /// anonymous auth.
    #[arg(short = 'k', long = "password", default_value = "")]
    password: String,

    /// Append-mode logfile path. Omit (or pass an empty string) to
    /// log to stdout.
    #[arg(short = 'o', long = "logfile", default_value = "")]
    logfile: String,
}

/// Immutable, process-wide configuration shared by every tunnel task.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub logfile: String,
}

impl ServerContext {
    /// True iff both credentials are present, i.e. USER/PASS auth is
    /// required during the greeting.
    pub fn auth_required(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Parse CLI flags into a validated server context.
    ///
    /// `-a`/`-p` are enforced as required by `clap` itself; username
    /// and password length bounds are validated here since `clap`
    /// isn't protocol-aware.
    pub fn from_args() -> Result<Self> {
        let cli = Cli::parse();
        Self::from_cli(cli)
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        if cli.username.len() > MAX_CRED_LEN {
            return Err(Error::Protocol("username exceeds 20 bytes"));
        }
        if cli.password.len() > MAX_CRED_LEN {
            return Err(Error::Protocol("password exceeds 20 bytes"));
        }

        Ok(ServerContext {
            address: cli.address,
            port: cli.port,
            username: cli.username,
            password: cli.password,
            logfile: cli.logfile,
        })
    }
}
