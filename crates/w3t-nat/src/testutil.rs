//! Scripted transports for exercising the test suites without a network
//!
//! A [`ScriptedTransport`] answers each `next_response` call with the next
//! [`Reply`] in its script and records every request it was asked to send,
//! including sends it was scripted to fail.

use crate::engine::Connector;
use crate::error::{NatError, NatResult};
use crate::logger::LeveledLogger;
use crate::stun::{StunAttribute, StunMessage, TransactionId};
use crate::transport::{InboundMessage, ProbeSession, ProbeTransport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Reply {
    /// Success response to the outstanding request with these attributes
    Respond(Vec<StunAttribute>),
    /// Success response carrying a transaction ID nobody asked for
    Stray(Vec<StunAttribute>),
    /// Never answer; the round trip times out
    Silence,
    /// Close the response stream
    Close,
}

impl Reply {
    /// Response carrying only XOR-MAPPED-ADDRESS
    pub fn mapped(mapped: SocketAddr) -> Self {
        Self::Respond(vec![StunAttribute::XorMappedAddress(mapped)])
    }

    /// Test I response of a server supporting NAT discovery
    pub fn discovery(mapped: SocketAddr, other: SocketAddr) -> Self {
        Self::Respond(vec![
            StunAttribute::XorMappedAddress(mapped),
            StunAttribute::OtherAddress(other),
        ])
    }
}

/// A request handed to the transport
#[derive(Debug, Clone)]
pub struct SentRequest {
    /// Where it was addressed
    pub destination: SocketAddr,
    /// The message as sent
    pub request: StunMessage,
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<Reply>,
    sent: Vec<SentRequest>,
}

/// Inspection handle shared with a [`ScriptedTransport`]
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Requests sent so far, oldest first
    pub fn sent(&self) -> Vec<SentRequest> {
        self.lock().sent.clone()
    }

    /// Replies not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }
}

/// Transport answering from a fixed script
#[derive(Debug)]
pub struct ScriptedTransport {
    local: SocketAddr,
    handle: ScriptHandle,
    sends_before_failure: Option<usize>,
}

impl ScriptedTransport {
    /// Create a transport bound to `local` answering with `replies`
    pub fn new(local: SocketAddr, replies: impl IntoIterator<Item = Reply>) -> Self {
        let handle = ScriptHandle::default();
        handle.lock().replies = replies.into_iter().collect();
        Self {
            local,
            handle,
            sends_before_failure: None,
        }
    }

    /// Fail every send with a socket error
    #[must_use]
    pub fn failing_sends(self) -> Self {
        self.failing_sends_after(0)
    }

    /// Let the first `sends` sends through, then fail the rest with a
    /// socket error
    #[must_use]
    pub fn failing_sends_after(mut self, sends: usize) -> Self {
        self.sends_before_failure = Some(sends);
        self
    }

    /// Handle for inspecting traffic after the transport moves into a session
    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    async fn send_request(
        &mut self,
        request: &StunMessage,
        destination: SocketAddr,
    ) -> NatResult<()> {
        let attempts = {
            let mut state = self.handle.lock();
            state.sent.push(SentRequest {
                destination,
                request: request.clone(),
            });
            state.sent.len()
        };
        match self.sends_before_failure {
            Some(allowed) if attempts > allowed => Err(NatError::Socket(std::io::Error::new(
                std::io::ErrorKind::NetworkUnreachable,
                "scripted send failure",
            ))),
            _ => Ok(()),
        }
    }

    async fn next_response(&mut self) -> Option<InboundMessage> {
        let (reply, last) = {
            let mut state = self.handle.lock();
            let last = state.sent.last().cloned();
            (state.replies.pop_front(), last)
        };
        let last = last?;

        let (transaction_id, attributes) = match reply {
            Some(Reply::Respond(attrs)) => (last.request.transaction_id, attrs),
            Some(Reply::Stray(attrs)) => (TransactionId::random(), attrs),
            Some(Reply::Close) => return None,
            Some(Reply::Silence) | None => std::future::pending().await,
        };

        let mut message = StunMessage::binding_response(transaction_id);
        for attr in attributes {
            message.add_attribute(attr);
        }
        Some(InboundMessage {
            message,
            source: last.destination,
        })
    }
}

/// Connector handing out one scripted session per suite
#[derive(Debug)]
pub struct ScriptedConnector {
    local: SocketAddr,
    primary: SocketAddr,
    scripts: Mutex<VecDeque<Vec<Reply>>>,
    handles: Mutex<Vec<ScriptHandle>>,
    failing_sends: bool,
}

impl ScriptedConnector {
    /// Sessions from `local` to `primary`, the n-th connect using the n-th
    /// script. Connects past the last script fail to resolve.
    pub fn new(
        local: SocketAddr,
        primary: SocketAddr,
        scripts: impl IntoIterator<Item = Vec<Reply>>,
    ) -> Self {
        Self {
            local,
            primary,
            scripts: Mutex::new(scripts.into_iter().collect()),
            handles: Mutex::new(Vec::new()),
            failing_sends: false,
        }
    }

    /// Open sessions whose every send fails with a socket error
    #[must_use]
    pub fn failing_sends(mut self) -> Self {
        self.failing_sends = true;
        self
    }

    /// One handle per session opened so far
    pub fn handles(&self) -> Vec<ScriptHandle> {
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(
        &self,
        server: &str,
        _bind: SocketAddr,
        logger: Arc<dyn LeveledLogger>,
    ) -> NatResult<ProbeSession<ScriptedTransport>> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| NatError::Resolution {
                target: server.to_string(),
                reason: "no scripted session left".to_string(),
            })?;

        let mut transport = ScriptedTransport::new(self.local, script);
        if self.failing_sends {
            transport = transport.failing_sends();
        }
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(transport.handle());

        Ok(ProbeSession::new(transport, self.primary, logger))
    }
}
