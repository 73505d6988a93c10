//! # w3t NAT
//!
//! NAT behavior discovery for the w3t WebRTC troubleshooting toolkit.
//!
//! This crate provides:
//! - A STUN codec (RFC 5389) with the RFC 5780 extensions CHANGE-REQUEST,
//!   OTHER-ADDRESS and RESPONSE-ORIGIN
//! - A UDP probe transport with a background receive task
//! - The RFC 5780 NAT mapping behavior test (section 4.3)
//! - The RFC 5780 NAT filtering behavior test (section 4.4)
//! - A result reporter writing classification lines to an injected logger
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use w3t_nat::{DiscoveryConfig, NatDiscovery, TracingLogger};
//!
//! # async fn example() {
//! let config = DiscoveryConfig::new("stun.example.org:3478");
//! let discovery = NatDiscovery::new(config, Arc::new(TracingLogger::new("nat")));
//!
//! let report = discovery.run().await;
//! println!("mapping: {}", report.mapping.outcome);
//! println!("filtering: {}", report.filtering.outcome);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod filtering;
pub mod logger;
pub mod mapping;
pub mod report;
pub mod stun;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use engine::{Connector, DiscoveryConfig, DiscoveryReport, NatDiscovery, UdpConnector};
pub use error::{NatError, StunError};
pub use logger::{LeveledLogger, MemoryLogger, TracingLogger};
pub use report::{Outcome, ReportLine};
pub use stun::{ReceivedAttributes, StunAttribute, StunMessage, StunMessageClass, TransactionId};
pub use transport::{
    InboundMessage, ProbeSession, ProbeTransport, TransactionIdPolicy, UdpProbeTransport,
};
pub use types::{FilteringOutcome, MappingOutcome, SuiteKind, SuiteReport};

/// Default discovery server (a public STUN server with RFC 5780 support)
pub const DEFAULT_STUN_SERVER: &str = "stun.nextcloud.com:443";
