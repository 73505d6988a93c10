//! NAT filtering behavior test (RFC 5780 section 4.4)
//!
//! Tests II and III ask the server to answer from a different address using
//! CHANGE-REQUEST. Whether those answers get through the NAT classifies its
//! filtering, so a timeout here is a result rather than a failure.

use crate::error::{NatError, NatResult};
use crate::logger::LeveledLogger;
use crate::stun::{ReceivedAttributes, StunMessage};
use crate::transport::{ProbeSession, ProbeTransport};
use crate::types::FilteringOutcome;

/// Run the filtering suite over `session`
///
/// # Errors
///
/// Test I failures, and any non-timeout failure in Tests II and III, abort
/// the suite. `NatError::MissingAttribute` when Test I lacks an attribute
/// the suite needs.
pub async fn run<T: ProbeTransport>(
    session: &mut ProbeSession<T>,
) -> NatResult<FilteringOutcome> {
    let logger = session.logger();
    let primary = session.primary_endpoint();

    logger.info(format_args!("Filtering Test I: Regular binding request"));
    let response = session
        .round_trip(StunMessage::binding_request(), primary)
        .await?;
    let test1 = ReceivedAttributes::parse_logged(&response, logger.as_ref());

    if test1.xor_mapped_address.is_none() || test1.other_address.is_none() {
        logger.warn(format_args!("Error: NAT discovery feature not supported by this server"));
    }
    test1
        .xor_mapped_address
        .ok_or(NatError::MissingAttribute("XOR-MAPPED-ADDRESS"))?;
    let other = test1
        .other_address
        .ok_or(NatError::MissingAttribute("OTHER-ADDRESS"))?;
    let other = session.record_other_endpoint(other);

    logger.info(format_args!(
        "Filtering Test II: Request to change both IP and port"
    ));
    let request = StunMessage::binding_request_with_change(true, true);
    match session.round_trip(request, primary).await {
        Ok(response) => {
            note_origin(&response, primary, logger.as_ref());
            return Ok(FilteringOutcome::EndpointIndependent);
        }
        Err(e) if e.is_timeout() => {
            logger.debug(format_args!("No answer from {other}, trying port change only"));
        }
        Err(e) => return Err(e),
    }

    logger.info(format_args!("Filtering Test III: Request to change port only"));
    let request = StunMessage::binding_request_with_change(false, true);
    match session.round_trip(request, primary).await {
        Ok(response) => {
            note_origin(&response, primary, logger.as_ref());
            Ok(FilteringOutcome::AddressDependent)
        }
        Err(e) if e.is_timeout() => Ok(FilteringOutcome::AddressAndPortDependent),
        Err(e) => Err(e),
    }
}

/// Warn when a change request was answered from the primary endpoint. The
/// classification stands either way.
fn note_origin(
    response: &StunMessage,
    primary: std::net::SocketAddr,
    logger: &dyn LeveledLogger,
) {
    let received = ReceivedAttributes::parse_logged(response, logger);
    if received.response_origin == Some(primary) {
        logger.warn(format_args!(
            "Change request answered from primary address {primary}; server may ignore CHANGE-REQUEST"
        ));
    }
}
