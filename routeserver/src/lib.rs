// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Route-server client: builds the prefix index from a public BGP view.
//!
//! Cisco-style public route servers expose their BGP table over a telnet
//! login. One session lists the announced prefixes of every monitored ASN
//! (`show ip bgp regexp _<ASN>$` by default), pages through the output with
//! the `--More--` sentinel, aggregates each ASN's prefixes and installs them
//! in a fresh [`PrefixIndex`]. The server tearing the session down after our
//! `exit` is the normal end: only then is the index handed back. A session
//! that dies earlier yields an error and the partial build is discarded.

#![deny(clippy::all)]

mod session;
mod telnet;

pub use session::{RouteServerError, fetch_prefix_index, run_session};
