//! UDP Probe Transport
//!
//! A [`ProbeSession`] owns one transport and performs the send-then-wait
//! round trip every NAT test step is built from. Exactly one request is in
//! flight at a time.
//!
//! [`UdpProbeTransport`] is the network implementation: one ephemeral UDP
//! socket, written by the session and read by a background task that decodes
//! inbound datagrams and publishes them on a bounded channel.

use crate::error::{NatError, NatResult};
use crate::logger::LeveledLogger;
use crate::stun::{StunMessage, TransactionId};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default round-trip timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Decoded messages buffered between the receive task and the session
const RESPONSE_QUEUE_DEPTH: usize = 16;

/// Receive buffer size
const MAX_DATAGRAM_SIZE: usize = 2048;

/// How a session matches responses to the outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionIdPolicy {
    /// Discard responses whose transaction ID differs from the outstanding
    /// request and keep waiting until the same deadline
    #[default]
    Strict,
    /// Treat the next message on the stream as the response, whatever its ID
    Lenient,
}

/// A decoded datagram and where it came from
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Decoded STUN message
    pub message: StunMessage,
    /// Source address of the datagram
    pub source: SocketAddr,
}

/// Wire side of a probe session
#[async_trait]
pub trait ProbeTransport: Send {
    /// Local endpoint as seen by the NAT comparison
    fn local_endpoint(&self) -> SocketAddr;

    /// Send an encoded request to `destination`
    async fn send_request(&mut self, request: &StunMessage, destination: SocketAddr)
    -> NatResult<()>;

    /// Next decoded message, or `None` once the response stream is closed
    async fn next_response(&mut self) -> Option<InboundMessage>;
}

/// UDP transport with a background receive task
pub struct UdpProbeTransport {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    responses: mpsc::Receiver<InboundMessage>,
    receiver: JoinHandle<()>,
}

impl UdpProbeTransport {
    /// Bind a socket on `bind` and start the receive task
    ///
    /// When `bind` has an unspecified IP, the local endpoint IP is taken from
    /// the route toward `toward` so it can be compared with mapped addresses.
    ///
    /// # Errors
    ///
    /// Returns `NatError::Socket` if the socket cannot be bound.
    pub async fn bind(
        bind: SocketAddr,
        toward: SocketAddr,
        logger: Arc<dyn LeveledLogger>,
    ) -> NatResult<Self> {
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let bound = socket.local_addr()?;

        let local = if bound.ip().is_unspecified() {
            match route_local_ip(bound.ip(), toward).await {
                Ok(ip) => SocketAddr::new(ip, bound.port()),
                Err(e) => {
                    logger.debug(format_args!("No route toward {toward}: {e}"));
                    bound
                }
            }
        } else {
            bound
        };

        let (tx, responses) = mpsc::channel(RESPONSE_QUEUE_DEPTH);
        let receiver = tokio::spawn(receive_loop(socket.clone(), tx, logger));

        Ok(Self {
            socket,
            local,
            responses,
            receiver,
        })
    }
}

impl Drop for UdpProbeTransport {
    fn drop(&mut self) {
        // The task holds the other socket handle
        self.receiver.abort();
    }
}

#[async_trait]
impl ProbeTransport for UdpProbeTransport {
    fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    async fn send_request(
        &mut self,
        request: &StunMessage,
        destination: SocketAddr,
    ) -> NatResult<()> {
        self.socket.send_to(&request.encode(), destination).await?;
        Ok(())
    }

    async fn next_response(&mut self) -> Option<InboundMessage> {
        self.responses.recv().await
    }
}

/// Source IP the OS would pick toward `toward`. Connecting a UDP socket sends
/// nothing.
async fn route_local_ip(unspecified: IpAddr, toward: SocketAddr) -> io::Result<IpAddr> {
    let probe = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
    probe.connect(toward).await?;
    Ok(probe.local_addr()?.ip())
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<InboundMessage>,
    logger: Arc<dyn LeveledLogger>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                logger.debug(format_args!("Receive loop stopped: {e}"));
                break;
            }
        };

        logger.info(format_args!("Response from {source}: ({len} bytes)"));

        match StunMessage::decode(&buf[..len]) {
            Ok(message) => {
                if tx.send(InboundMessage { message, source }).await.is_err() {
                    // Session dropped
                    break;
                }
            }
            Err(e) => logger.info(format_args!("Error decoding message from {source}: {e}")),
        }
    }
}

/// Resolve `server` (host:port), preferring the address family of `bind`
///
/// # Errors
///
/// Returns `NatError::Resolution` if the name does not resolve to an address
/// of a usable family.
pub async fn resolve(server: &str, bind: SocketAddr) -> NatResult<SocketAddr> {
    let resolution_error = |reason: String| NatError::Resolution {
        target: server.to_string(),
        reason,
    };

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(server)
        .await
        .map_err(|e| resolution_error(e.to_string()))?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4() == bind.is_ipv4())
        .copied()
        .ok_or_else(|| {
            let family = if bind.is_ipv4() { "IPv4" } else { "IPv6" };
            resolution_error(format!("no {family} address"))
        })
}

/// Resolve `server`, bind a UDP socket and open a session toward it
///
/// # Errors
///
/// Returns `NatError::Resolution` or `NatError::Socket`.
pub async fn connect(
    server: &str,
    bind: SocketAddr,
    logger: Arc<dyn LeveledLogger>,
) -> NatResult<ProbeSession<UdpProbeTransport>> {
    logger.info(format_args!("Connecting to STUN server: {server}"));

    let primary = resolve(server, bind).await.inspect_err(|e| {
        logger.warn(format_args!("Error resolving address: {e}"));
    })?;

    let transport = UdpProbeTransport::bind(bind, primary, logger.clone()).await?;
    logger.info(format_args!("Local address: {}", transport.local_endpoint()));
    logger.info(format_args!("Remote address: {primary}"));

    Ok(ProbeSession::new(transport, primary, logger))
}

/// One test suite's probing state
///
/// Owns the transport exclusively; dropping the session closes it.
pub struct ProbeSession<T: ProbeTransport> {
    transport: T,
    primary: SocketAddr,
    other: Option<SocketAddr>,
    timeout: Duration,
    policy: TransactionIdPolicy,
    cancel: CancellationToken,
    logger: Arc<dyn LeveledLogger>,
    round_trips: usize,
}

impl<T: ProbeTransport> ProbeSession<T> {
    /// Create a session probing `primary` over `transport`
    pub fn new(transport: T, primary: SocketAddr, logger: Arc<dyn LeveledLogger>) -> Self {
        Self {
            transport,
            primary,
            other: None,
            timeout: DEFAULT_TIMEOUT,
            policy: TransactionIdPolicy::default(),
            cancel: CancellationToken::new(),
            logger,
            round_trips: 0,
        }
    }

    /// Set the round-trip timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transaction ID matching policy
    #[must_use]
    pub fn with_transaction_ids(mut self, policy: TransactionIdPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort waits when `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Local endpoint of the probe socket
    pub fn local_endpoint(&self) -> SocketAddr {
        self.transport.local_endpoint()
    }

    /// Server endpoint resolved from the server name
    pub fn primary_endpoint(&self) -> SocketAddr {
        self.primary
    }

    /// Server's alternate endpoint, once discovered
    pub fn other_endpoint(&self) -> Option<SocketAddr> {
        self.other
    }

    /// Record the alternate endpoint from a Test I response
    ///
    /// The first recorded value is kept for the rest of the session and
    /// returned.
    pub fn record_other_endpoint(&mut self, addr: SocketAddr) -> SocketAddr {
        match self.other {
            Some(existing) => {
                if existing != addr {
                    self.logger.debug(format_args!(
                        "Ignoring OTHER-ADDRESS {addr}, already using {existing}"
                    ));
                }
                existing
            }
            None => *self.other.insert(addr),
        }
    }

    /// Requests sent so far
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    /// Logger shared with the session
    pub fn logger(&self) -> Arc<dyn LeveledLogger> {
        self.logger.clone()
    }

    /// Send `request` under a fresh transaction ID and wait for the response
    ///
    /// # Errors
    ///
    /// - `NatError::Timeout` when nothing acceptable arrives in time
    /// - `NatError::ChannelClosed` when the receive task has stopped
    /// - `NatError::Cancelled` when the session's token fires
    /// - `NatError::Socket` when sending fails
    pub async fn round_trip(
        &mut self,
        mut request: StunMessage,
        destination: SocketAddr,
    ) -> NatResult<StunMessage> {
        if self.cancel.is_cancelled() {
            return Err(NatError::Cancelled);
        }

        request.transaction_id = TransactionId::random();
        let expected = request.transaction_id;
        self.round_trips += 1;

        self.logger.info(format_args!(
            "Sending to {destination}: ({} bytes)",
            request.encode().len()
        ));
        self.logger.debug(format_args!("{request}"));
        for attr in &request.attributes {
            self.logger.debug(format_args!("\t{attr}"));
        }

        if let Err(e) = self.transport.send_request(&request, destination).await {
            self.logger
                .warn(format_args!("Error sending request to {destination}: {e}"));
            return Err(e);
        }

        let timeout = self.timeout;
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(NatError::Cancelled),
            waited = tokio::time::timeout(timeout, self.await_response(expected)) => {
                waited.unwrap_or(Err(NatError::Timeout(timeout)))
            }
        };

        if let Err(NatError::Timeout(_)) = &result {
            self.logger.info(format_args!(
                "Timed out waiting for response from server {destination}"
            ));
        }

        result
    }

    async fn await_response(&mut self, expected: TransactionId) -> NatResult<StunMessage> {
        loop {
            let inbound = self
                .transport
                .next_response()
                .await
                .ok_or(NatError::ChannelClosed)?;

            match self.policy {
                TransactionIdPolicy::Lenient => return Ok(inbound.message),
                TransactionIdPolicy::Strict if inbound.message.transaction_id == expected => {
                    return Ok(inbound.message);
                }
                TransactionIdPolicy::Strict => self.logger.warn(format_args!(
                    "Discarding stray response from {} (id {}, expected {expected})",
                    inbound.source, inbound.message.transaction_id
                )),
            }
        }
    }

    /// Close the session, stopping its receive task
    pub fn close(self) {
        self.logger.debug(format_args!(
            "Closing probe session to {} after {} round trips",
            self.primary, self.round_trips
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use crate::stun::StunAttribute;

    fn logger() -> Arc<MemoryLogger> {
        Arc::new(MemoryLogger::new())
    }

    async fn server_socket() -> (Arc<UdpSocket>, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (Arc::new(socket), addr)
    }

    async fn read_request(server: &UdpSocket) -> (StunMessage, SocketAddr) {
        let mut buf = [0u8; 1024];
        let (len, from) = server.recv_from(&mut buf).await.unwrap();
        (StunMessage::decode(&buf[..len]).unwrap(), from)
    }

    fn reply_to(request: &StunMessage, mapped: SocketAddr) -> Vec<u8> {
        StunMessage::binding_response(request.transaction_id)
            .with_attribute(StunAttribute::XorMappedAddress(mapped))
            .encode()
    }

    async fn open(server: SocketAddr, logger: Arc<MemoryLogger>) -> ProbeSession<UdpProbeTransport> {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let transport = UdpProbeTransport::bind(bind, server, logger.clone())
            .await
            .unwrap();
        ProbeSession::new(transport, server, logger)
    }

    #[tokio::test]
    async fn test_round_trip_returns_response() {
        let (server, server_addr) = server_socket().await;
        let mut session = open(server_addr, logger()).await;

        let responder = tokio::spawn(async move {
            let (request, from) = read_request(&server).await;
            server.send_to(&reply_to(&request, from), from).await.unwrap();
            from
        });

        let response = session
            .round_trip(StunMessage::binding_request(), server_addr)
            .await
            .unwrap();
        let from = responder.await.unwrap();

        assert_eq!(from, session.local_endpoint());
        assert_eq!(session.round_trips(), 1);
        assert_eq!(
            crate::stun::ReceivedAttributes::from_message(&response).xor_mapped_address,
            Some(from)
        );
    }

    #[tokio::test]
    async fn test_unspecified_bind_learns_route_ip() {
        let (_server, server_addr) = server_socket().await;
        let bind: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let transport = UdpProbeTransport::bind(bind, server_addr, logger())
            .await
            .unwrap();

        let local = transport.local_endpoint();
        assert_eq!(local.ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_receive_loop_running() {
        let (server, server_addr) = server_socket().await;
        let log = logger();
        let mut session = open(server_addr, log.clone()).await;

        tokio::spawn(async move {
            let (request, from) = read_request(&server).await;
            server.send_to(b"definitely not stun", from).await.unwrap();
            server.send_to(&reply_to(&request, from), from).await.unwrap();
        });

        let response = session
            .round_trip(StunMessage::binding_request(), server_addr)
            .await
            .unwrap();

        assert_eq!(response.attributes.len(), 1);
        assert_eq!(log.find("Error decoding message").len(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_timeout() {
        let (_server, server_addr) = server_socket().await;
        let mut session = open(server_addr, logger())
            .await
            .with_timeout(Duration::from_millis(100));

        let result = session
            .round_trip(StunMessage::binding_request(), server_addr)
            .await;

        assert!(matches!(result, Err(NatError::Timeout(d)) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_strict_policy_discards_stray_response() {
        let (server, server_addr) = server_socket().await;
        let log = logger();
        let mut session = open(server_addr, log.clone()).await;

        tokio::spawn(async move {
            let (request, from) = read_request(&server).await;
            let stray = StunMessage::binding_response(TransactionId::from_bytes([7; 12]))
                .encode();
            server.send_to(&stray, from).await.unwrap();
            server.send_to(&reply_to(&request, from), from).await.unwrap();
        });

        let request = StunMessage::binding_request();
        let response = session.round_trip(request, server_addr).await.unwrap();

        assert_ne!(response.transaction_id, TransactionId::from_bytes([7; 12]));
        assert_eq!(log.find("Discarding stray response").len(), 1);
    }

    #[tokio::test]
    async fn test_lenient_policy_accepts_any_response() {
        let (server, server_addr) = server_socket().await;
        let mut session = open(server_addr, logger())
            .await
            .with_transaction_ids(TransactionIdPolicy::Lenient);

        tokio::spawn(async move {
            let (_request, from) = read_request(&server).await;
            let stray = StunMessage::binding_response(TransactionId::from_bytes([7; 12]))
                .encode();
            server.send_to(&stray, from).await.unwrap();
        });

        let response = session
            .round_trip(StunMessage::binding_request(), server_addr)
            .await
            .unwrap();
        assert_eq!(response.transaction_id, TransactionId::from_bytes([7; 12]));
    }

    #[tokio::test]
    async fn test_each_round_trip_uses_fresh_transaction_id() {
        let (server, server_addr) = server_socket().await;
        let mut session = open(server_addr, logger()).await;

        let responder = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..3 {
                let (request, from) = read_request(&server).await;
                ids.push(request.transaction_id);
                server.send_to(&reply_to(&request, from), from).await.unwrap();
            }
            ids
        });

        let request = StunMessage::binding_request();
        for _ in 0..3 {
            session.round_trip(request.clone(), server_addr).await.unwrap();
        }

        let ids = responder.await.unwrap();
        assert_ne!(ids[0], request.transaction_id);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }

    #[tokio::test]
    async fn test_cancelled_round_trip_sends_nothing() {
        let (server, server_addr) = server_socket().await;
        let cancel = CancellationToken::new();
        let mut session = open(server_addr, logger())
            .await
            .with_cancellation(cancel.clone());

        cancel.cancel();
        let result = session
            .round_trip(StunMessage::binding_request(), server_addr)
            .await;
        assert!(matches!(result, Err(NatError::Cancelled)));
        assert_eq!(session.round_trips(), 0);

        let mut buf = [0u8; 64];
        let received =
            tokio::time::timeout(Duration::from_millis(100), server.recv_from(&mut buf)).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_cancel_during_wait() {
        let (server, server_addr) = server_socket().await;
        let cancel = CancellationToken::new();
        let mut session = open(server_addr, logger())
            .await
            .with_cancellation(cancel.clone());

        tokio::spawn(async move {
            read_request(&server).await;
            cancel.cancel();
        });

        let result = session
            .round_trip(StunMessage::binding_request(), server_addr)
            .await;
        assert!(matches!(result, Err(NatError::Cancelled)));
        assert_eq!(session.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_other_endpoint_recorded_once() {
        let (_server, server_addr) = server_socket().await;
        let mut session = open(server_addr, logger()).await;
        assert_eq!(session.other_endpoint(), None);

        let first: SocketAddr = "203.0.113.10:3479".parse().unwrap();
        let second: SocketAddr = "203.0.113.11:3480".parse().unwrap();

        assert_eq!(session.record_other_endpoint(first), first);
        assert_eq!(session.record_other_endpoint(second), first);
        assert_eq!(session.other_endpoint(), Some(first));
    }

    #[tokio::test]
    async fn test_resolve_numeric_address() {
        let bind: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let addr = resolve("127.0.0.1:3478", bind).await.unwrap();
        assert_eq!(addr, "127.0.0.1:3478".parse::<SocketAddr>().unwrap());

        let v6_bind: SocketAddr = "[::]:0".parse().unwrap();
        assert!(matches!(
            resolve("127.0.0.1:3478", v6_bind).await,
            Err(NatError::Resolution { .. })
        ));
        assert!(matches!(
            resolve("missing-port", bind).await,
            Err(NatError::Resolution { .. })
        ));
    }
}
