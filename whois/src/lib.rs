// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bulk-whois client.
//!
//! Candidate hostile addresses are cross-validated against a bulk-whois
//! service (Team Cymru's by default): one TCP session submits the whole
//! batch framed in `begin`/`end` sentinels, and every `asn | ip | cc | desc`
//! response line is merged back into the hostile-IP registry. The server
//! closing the connection signals the end of the stream; that is the
//! success path, not an error.

#![deny(clippy::all)]

use registry::Registry;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Response lines longer than this are logged and discarded.
const MAX_LINE_LEN: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum WhoisError {
    #[error("failed to connect to whois server {0}: {1}")]
    Connect(String, std::io::Error),

    #[error("i/o failure on whois session: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame a batch of addresses for submission: the `countrycode` directive
/// asks the server to include the cc column the registry expects.
#[must_use]
pub fn build_request(ips: &[Ipv4Addr]) -> String {
    let mut request = String::from("begin\ncountrycode\n");
    for ip in ips {
        request.push_str(&ip.to_string());
        request.push('\n');
    }
    request.push_str("end\n");
    request
}

/// Run one whois roundtrip over an established stream; split out from the
/// TCP connect so tests can drive it over an in-memory pipe. Returns the
/// number of response lines merged into the registry.
///
/// # Errors
/// I/O failures other than the server's end-of-stream close.
pub async fn run_whois<S>(
    stream: S,
    request: &str,
    registry: &Arc<Mutex<Registry>>,
) -> Result<usize, WhoisError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut rd, mut wr) = tokio::io::split(stream);
    wr.write_all(request.as_bytes()).await?;

    let mut merged = 0usize;
    let mut chunk = vec![0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = rd.read(&mut chunk).await?;
        if n == 0 {
            // server closed: end of stream
            break;
        }
        pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            merged += usize::from(handle_line(&raw, registry));
        }
        if pending.len() > MAX_LINE_LEN {
            warn!("whois response line exceeds {MAX_LINE_LEN} bytes, discarded");
            pending.clear();
        }
    }
    debug!("whois stream closed cleanly, {merged} lines merged");
    Ok(merged)
}

fn handle_line(raw: &[u8], registry: &Arc<Mutex<Registry>>) -> bool {
    if raw.len() > MAX_LINE_LEN {
        warn!("whois response line exceeds {MAX_LINE_LEN} bytes, discarded");
        return false;
    }
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return false;
    }
    let Ok(mut registry) = registry.lock() else {
        warn!("registry lock poisoned, whois line dropped");
        return false;
    };
    match registry.merge_whois_line(line) {
        Ok(()) => true,
        Err(e) => {
            warn!("whois line dropped: {e}");
            false
        }
    }
}

/// Submit `request` to the configured bulk-whois service and merge the
/// responses into the registry.
///
/// # Errors
/// Connection failures and every error of [`run_whois`].
pub async fn bulk_whois(
    host: &str,
    port: u16,
    request: &str,
    registry: &Arc<Mutex<Registry>>,
) -> Result<usize, WhoisError> {
    info!("submitting whois batch to {host}:{port}");
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| WhoisError::Connect(host.to_string(), e))?;
    run_whois(stream, request, registry).await
}
