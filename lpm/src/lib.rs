// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Prefix data structures for IP-to-ASN correlation: a range-ordered
//! balanced index over IPv4 prefixes and a prefix aggregator.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub mod aggregate;
pub mod index;

pub use aggregate::aggregate;
pub use index::PrefixIndex;
