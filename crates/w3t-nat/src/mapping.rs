//! NAT mapping behavior test (RFC 5780 section 4.3)
//!
//! Test I binds to the primary endpoint and learns the server's alternate
//! endpoint. Test II repeats from the alternate IP on the primary port, Test
//! III from the full alternate endpoint. Comparing the mapped addresses
//! classifies the NAT.

use crate::error::{NatError, NatResult};
use crate::stun::{ReceivedAttributes, StunMessage};
use crate::transport::{ProbeSession, ProbeTransport};
use crate::types::MappingOutcome;
use std::net::SocketAddr;

/// Run the mapping suite over `session`
///
/// # Errors
///
/// Any round-trip failure aborts the suite, including a timeout.
/// `NatError::MissingAttribute` when a response lacks an attribute the suite
/// needs.
pub async fn run<T: ProbeTransport>(session: &mut ProbeSession<T>) -> NatResult<MappingOutcome> {
    let logger = session.logger();

    logger.info(format_args!("Mapping Test I: Regular binding request"));
    let response = session
        .round_trip(StunMessage::binding_request(), session.primary_endpoint())
        .await?;
    let test1 = ReceivedAttributes::parse_logged(&response, logger.as_ref());

    let Some(mapped1) = test1.xor_mapped_address else {
        logger.warn(format_args!("Error: NAT discovery feature not supported by this server"));
        return Err(NatError::MissingAttribute("XOR-MAPPED-ADDRESS"));
    };
    let Some(other) = test1.other_address else {
        logger.warn(format_args!("Error: NAT discovery feature not supported by this server"));
        return Err(NatError::MissingAttribute("OTHER-ADDRESS"));
    };
    let other = session.record_other_endpoint(other);
    logger.info(format_args!("Received XOR-MAPPED-ADDRESS: {mapped1}"));

    if mapped1 == session.local_endpoint() {
        return Ok(MappingOutcome::NoNat);
    }

    logger.info(format_args!(
        "Mapping Test II: Send binding request to the other address but primary port"
    ));
    let test2_dest = SocketAddr::new(other.ip(), session.primary_endpoint().port());
    let mapped2 = probe_mapped(session, test2_dest).await?;
    if mapped2 == mapped1 {
        return Ok(MappingOutcome::EndpointIndependent);
    }

    logger.info(format_args!("Mapping Test III: Send binding request to the other address"));
    let mapped3 = probe_mapped(session, other).await?;
    if mapped3 == mapped2 {
        Ok(MappingOutcome::AddressDependent)
    } else {
        Ok(MappingOutcome::AddressAndPortDependent)
    }
}

async fn probe_mapped<T: ProbeTransport>(
    session: &mut ProbeSession<T>,
    destination: SocketAddr,
) -> NatResult<SocketAddr> {
    let logger = session.logger();
    let response = session
        .round_trip(StunMessage::binding_request(), destination)
        .await?;
    let mapped = ReceivedAttributes::parse_logged(&response, logger.as_ref())
        .xor_mapped_address
        .ok_or(NatError::MissingAttribute("XOR-MAPPED-ADDRESS"))?;
    logger.info(format_args!("Received XOR-MAPPED-ADDRESS: {mapped}"));
    Ok(mapped)
}
