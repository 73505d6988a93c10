//! NAT behavior classifications
//!
//! RFC 5780 describes NAT behavior along two independent axes: how outbound
//! flows are mapped to public endpoints, and which inbound sources are let
//! through to a mapped endpoint.

use serde::Serialize;
use std::fmt;

/// NAT mapping behavior (RFC 5780 section 4.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingOutcome {
    /// Mapped address equals the local endpoint, no translation happens
    NoNat,
    /// Same mapping regardless of destination
    EndpointIndependent,
    /// Mapping changes with the destination IP address
    AddressDependent,
    /// Mapping changes with the destination IP address and port
    AddressAndPortDependent,
    /// Server lacks NAT discovery support or the suite failed
    Inconclusive,
}

impl fmt::Display for MappingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNat => write!(f, "endpoint independent (no NAT)"),
            Self::EndpointIndependent => write!(f, "endpoint independent"),
            Self::AddressDependent => write!(f, "address dependent"),
            Self::AddressAndPortDependent => write!(f, "address and port dependent"),
            Self::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// NAT filtering behavior (RFC 5780 section 4.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilteringOutcome {
    /// Any external source may reach the mapped endpoint
    EndpointIndependent,
    /// Only previously contacted IP addresses may reach it
    AddressDependent,
    /// Only previously contacted IP:port pairs may reach it
    AddressAndPortDependent,
    /// Server lacks NAT discovery support or the suite failed
    Inconclusive,
}

impl fmt::Display for FilteringOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointIndependent => write!(f, "endpoint independent"),
            Self::AddressDependent => write!(f, "address dependent"),
            Self::AddressAndPortDependent => write!(f, "address and port dependent"),
            Self::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// Which test suite produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteKind {
    /// NAT mapping behavior test
    Mapping,
    /// NAT filtering behavior test
    Filtering,
}

impl fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapping => write!(f, "mapping"),
            Self::Filtering => write!(f, "filtering"),
        }
    }
}

/// Result of one test suite run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteReport<O> {
    /// Classification (`Inconclusive` when the suite aborted)
    pub outcome: O,
    /// Binding requests sent by the suite
    pub round_trips: usize,
    /// Error that aborted the suite, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl<O> SuiteReport<O> {
    /// A suite that reached a classification
    pub fn completed(outcome: O, round_trips: usize) -> Self {
        Self {
            outcome,
            round_trips,
            failure: None,
        }
    }

    /// A suite aborted by `failure`
    pub fn aborted(outcome: O, round_trips: usize, failure: impl fmt::Display) -> Self {
        Self {
            outcome,
            round_trips,
            failure: Some(failure.to_string()),
        }
    }
}
