// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The conversational session with one route server.

use crate::telnet::TelnetFilter;
use config::BlockwatchConfig;
use ipnet::Ipv4Net;
use lpm::{PrefixIndex, aggregate};
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const PROMPT_MORE: &str = "--More--";
const PROMPT_SUFFIX: char = '>';
const ROUTE_MARKER: char = '*';

#[derive(Debug, Error)]
pub enum RouteServerError {
    #[error("failed to connect to route server {0}: {1}")]
    Connect(String, std::io::Error),

    #[error("i/o failure on route-server session: {0}")]
    Io(#[from] std::io::Error),

    #[error("route server closed the session before all ASNs were listed")]
    ConnectionLost,
}

/// Convert the prefix column of a route line. Bare addresses become
/// single-host prefixes; those are dropped, because continuation lines
/// repeat the prior network as blanks and occasionally expose a next-hop
/// router address in the network column.
fn parse_route_prefix(spec: &str) -> Option<Ipv4Net> {
    let net = if spec.contains('/') {
        Ipv4Net::from_str(spec).ok()?
    } else {
        Ipv4Net::new(spec.parse::<Ipv4Addr>().ok()?, 32).ok()?
    };
    if net.prefix_len() == 32 {
        debug!("single-host entry ignored: {spec}");
        return None;
    }
    Some(net.trunc())
}

struct Session<'a> {
    cfg: &'a BlockwatchConfig,
    index: PrefixIndex<String>,
    working: Vec<Ipv4Net>,
    asn_idx: usize,
    saw_more: bool,
    countdown: u32,
    exited: bool,
}

impl<'a> Session<'a> {
    fn new(cfg: &'a BlockwatchConfig) -> Self {
        Self {
            cfg,
            index: PrefixIndex::new(),
            working: Vec::new(),
            asn_idx: 0,
            saw_more: false,
            countdown: cfg.prompt_countdown,
            exited: false,
        }
    }

    fn list_command(&self) -> String {
        self.cfg
            .list_command
            .replace("{asn}", &self.cfg.monitored_asns[self.asn_idx])
    }

    async fn handle_line<W>(&mut self, line: &str, wr: &mut W) -> Result<(), RouteServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = tokens.first() else {
            return Ok(());
        };

        // Once at least one page break has been seen, a trailing command
        // prompt marks the end of an ASN listing.
        if self.saw_more && tokens.last().is_some_and(|t| t.ends_with(PROMPT_SUFFIX)) {
            self.advance(wr).await?;
        }

        if first == PROMPT_MORE {
            self.saw_more = true;
            if !self.exited {
                wr.write_all(b" ").await?;
            }
        } else if first.starts_with(ROUTE_MARKER) {
            // the prefix column can be "n.n.n.n/m", "in.n.n.n/m", or a
            // lone "i" when the network repeats from the previous line
            if let Some(&token) = tokens.get(1) {
                if token.len() > 1 {
                    let spec = token.strip_prefix('i').unwrap_or(token);
                    if let Some(net) = parse_route_prefix(spec) {
                        self.working.push(net);
                    }
                }
            }
        }
        Ok(())
    }

    /// Prompt countdown: the blank-line nudges manufacture extra prompts, so
    /// `prompt_countdown` of them are swallowed before the listing is taken
    /// as complete. On expiry the working list is aggregated and installed,
    /// and the command for the next ASN (or `exit`) goes out.
    async fn advance<W>(&mut self, wr: &mut W) -> Result<(), RouteServerError>
    where
        W: AsyncWrite + Unpin,
    {
        if self.exited {
            return Ok(());
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return Ok(());
        }
        self.countdown = self.cfg.prompt_countdown;

        let asn = &self.cfg.monitored_asns[self.asn_idx];
        let collapsed = aggregate(&self.working);
        self.working.clear();
        debug!(
            "as {asn}: {} prefixes after aggregation",
            collapsed.len()
        );
        for prefix in collapsed {
            self.index.insert(prefix, asn.clone());
        }

        self.asn_idx += 1;
        if self.asn_idx >= self.cfg.monitored_asns.len() {
            debug!("all ASNs listed, closing the session");
            wr.write_all(b"exit\r\n").await?;
            self.exited = true;
        } else {
            let command = self.list_command();
            debug!("sending list command: {command}");
            wr.write_all(command.as_bytes()).await?;
            wr.write_all(b"\r\n").await?;
        }
        Ok(())
    }
}

/// Drive a full session over an established byte stream and return the
/// finished index. Split out from the TCP connect so tests can run the
/// protocol over an in-memory pipe.
///
/// # Errors
/// Any I/O error, or the server dropping the session before every monitored
/// ASN was listed. "Closed after `exit`" is the success path.
pub async fn run_session<S>(
    stream: S,
    cfg: &BlockwatchConfig,
) -> Result<PrefixIndex<String>, RouteServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut session = Session::new(cfg);
    let mut filter = TelnetFilter::default();

    // list the first ASN right away
    let command = session.list_command();
    debug!("sending list command: {command}");
    wr.write_all(command.as_bytes()).await?;
    wr.write_all(b"\r\n").await?;

    // hit enter from time to time: keeps the session alive and flushes
    // output stuck in the server's buffers
    let mut nudge = tokio::time::interval(cfg.enter_throttle());
    nudge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut chunk = vec![0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        tokio::select! {
            _ = nudge.tick(), if !session.exited => {
                // a failed nudge means the server already went away
                if wr.write_all(b"\r\n").await.is_err() {
                    break;
                }
            }
            read = rd.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&filter.strip(&chunk[..n]));
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    session
                        .handle_line(line.trim_end_matches(['\r', '\n']), &mut wr)
                        .await?;
                }
            }
        }
    }

    if !session.exited {
        warn!("route server dropped the session, discarding partial index");
        return Err(RouteServerError::ConnectionLost);
    }
    info!(
        "route-server session complete: {} prefixes indexed, tree height {}",
        session.index.len(),
        session.index.height()
    );
    Ok(session.index)
}

/// Connect to `host` and build a fresh prefix index for every monitored ASN.
///
/// # Errors
/// Connection failures and every error of [`run_session`].
pub async fn fetch_prefix_index(
    cfg: &BlockwatchConfig,
    host: &str,
) -> Result<PrefixIndex<String>, RouteServerError> {
    info!("downloading announced prefixes from {host}");
    let stream = TcpStream::connect((host, cfg.route_server_port))
        .await
        .map_err(|e| RouteServerError::Connect(host.to_string(), e))?;
    run_session(stream, cfg).await
}
