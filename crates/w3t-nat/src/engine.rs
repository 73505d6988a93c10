//! NAT discovery engine
//!
//! Resolves one discovery server and runs the mapping suite, then the
//! filtering suite, each on its own probe session. A suite that fails is
//! reported as inconclusive and does not stop the other.

use crate::DEFAULT_STUN_SERVER;
use crate::error::{NatError, NatResult};
use crate::filtering;
use crate::logger::LeveledLogger;
use crate::mapping;
use crate::report::{self, Outcome};
use crate::transport::{
    self, DEFAULT_TIMEOUT, ProbeSession, ProbeTransport, TransactionIdPolicy, UdpProbeTransport,
};
use crate::types::{FilteringOutcome, MappingOutcome, SuiteReport};
use async_trait::async_trait;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Discovery engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Discovery server as host:port
    pub server: String,
    /// Local bind address for probe sockets
    pub bind: SocketAddr,
    /// Round-trip timeout
    pub timeout: Duration,
    /// Response matching policy
    pub transaction_ids: TransactionIdPolicy,
}

impl DiscoveryConfig {
    /// Default configuration probing `server`
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_STUN_SERVER.to_string(),
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            timeout: DEFAULT_TIMEOUT,
            transaction_ids: TransactionIdPolicy::default(),
        }
    }
}

/// Opens the probe session for one suite
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport used by the sessions
    type Transport: ProbeTransport;

    /// Resolve `server` and open a session toward it
    async fn connect(
        &self,
        server: &str,
        bind: SocketAddr,
        logger: Arc<dyn LeveledLogger>,
    ) -> NatResult<ProbeSession<Self::Transport>>;
}

/// Connector opening real UDP sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

#[async_trait]
impl Connector for UdpConnector {
    type Transport = UdpProbeTransport;

    async fn connect(
        &self,
        server: &str,
        bind: SocketAddr,
        logger: Arc<dyn LeveledLogger>,
    ) -> NatResult<ProbeSession<UdpProbeTransport>> {
        transport::connect(server, bind, logger).await
    }
}

/// Outcome of a full discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Server that was probed
    pub server: String,
    /// Mapping suite result
    pub mapping: SuiteReport<MappingOutcome>,
    /// Filtering suite result
    pub filtering: SuiteReport<FilteringOutcome>,
}

/// NAT behavior discovery engine
pub struct NatDiscovery<C: Connector = UdpConnector> {
    config: DiscoveryConfig,
    connector: C,
    logger: Arc<dyn LeveledLogger>,
    cancel: CancellationToken,
}

impl NatDiscovery<UdpConnector> {
    /// Engine probing over UDP
    pub fn new(config: DiscoveryConfig, logger: Arc<dyn LeveledLogger>) -> Self {
        Self::with_connector(config, UdpConnector, logger)
    }
}

impl<C: Connector> NatDiscovery<C> {
    /// Engine opening sessions through `connector`
    pub fn with_connector(
        config: DiscoveryConfig,
        connector: C,
        logger: Arc<dyn LeveledLogger>,
    ) -> Self {
        Self {
            config,
            connector,
            logger,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort in-flight round trips
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token aborting in-flight round trips when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Engine configuration
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Connector opening the sessions
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run the mapping suite, then the filtering suite
    pub async fn run(&self) -> DiscoveryReport {
        let mapping = self.run_mapping().await;
        let filtering = self.run_filtering().await;

        DiscoveryReport {
            server: self.config.server.clone(),
            mapping,
            filtering,
        }
    }

    /// Run the mapping suite on a fresh session
    pub async fn run_mapping(&self) -> SuiteReport<MappingOutcome> {
        let result = match self.open_session().await {
            Ok(mut session) => {
                let outcome = mapping::run(&mut session).await;
                let round_trips = session.round_trips();
                session.close();
                (outcome, round_trips)
            }
            Err(e) => (Err(e), 0),
        };
        self.conclude(result)
    }

    /// Run the filtering suite on a fresh session
    pub async fn run_filtering(&self) -> SuiteReport<FilteringOutcome> {
        let result = match self.open_session().await {
            Ok(mut session) => {
                let outcome = filtering::run(&mut session).await;
                let round_trips = session.round_trips();
                session.close();
                (outcome, round_trips)
            }
            Err(e) => (Err(e), 0),
        };
        self.conclude(result)
    }

    async fn open_session(&self) -> NatResult<ProbeSession<C::Transport>> {
        if self.cancel.is_cancelled() {
            return Err(NatError::Cancelled);
        }

        let connect = self
            .connector
            .connect(&self.config.server, self.config.bind, self.logger.clone());
        let session = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(NatError::Cancelled),
            connected = connect => connected,
        }
        .inspect_err(|e| {
            self.logger
                .warn(format_args!("Error creating STUN connection: {e}"));
        })?;

        Ok(session
            .with_timeout(self.config.timeout)
            .with_transaction_ids(self.config.transaction_ids)
            .with_cancellation(self.cancel.clone()))
    }

    fn conclude<O: Outcome>(&self, (result, round_trips): (NatResult<O>, usize)) -> SuiteReport<O> {
        let suite = match result {
            Ok(outcome) => SuiteReport::completed(outcome, round_trips),
            Err(e) => {
                self.logger
                    .warn(format_args!("NAT {} test aborted: {e}", O::KIND));
                SuiteReport::aborted(O::INCONCLUSIVE, round_trips, e)
            }
        };
        report::emit(self.logger.as_ref(), &report::classify(suite.outcome));
        suite
    }
}
