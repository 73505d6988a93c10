//! Property-based tests for the codec and the suite classifiers
//!
//! Uses proptest to check classification rules across arbitrary mapped
//! addresses and codec robustness across arbitrary datagrams.

use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use w3t_nat::stun::{self, StunMessage};
use w3t_nat::testutil::{Reply, ScriptedTransport};
use w3t_nat::{
    FilteringOutcome, MappingOutcome, MemoryLogger, ProbeSession, StunAttribute, TransactionId,
};

const LOCAL: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5)), 51000);
const PRIMARY: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 3478);
const OTHER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)), 3479);

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

fn scripted(replies: Vec<Reply>) -> (ProbeSession<ScriptedTransport>, w3t_nat::testutil::ScriptHandle) {
    let transport = ScriptedTransport::new(LOCAL, replies);
    let handle = transport.handle();
    let session = ProbeSession::new(transport, PRIMARY, Arc::new(MemoryLogger::new()));
    (session, handle)
}

fn public_endpoint() -> impl Strategy<Value = SocketAddr> {
    // A few ports keep collisions between A1, A2 and A3 frequent
    (1u8..=3, 40000u16..40004)
        .prop_map(|(host, port)| SocketAddr::from(([198, 51, 100, host], port)))
}

// ============================================================================
// Suite Classification Properties
// ============================================================================

mod classification_properties {
    use super::*;

    proptest! {
        /// A1 == A2 gives endpoint independent, otherwise A2 == A3 decides
        #[test]
        fn mapping_follows_address_comparisons(
            a1 in public_endpoint(),
            a2 in public_endpoint(),
            a3 in public_endpoint(),
        ) {
            let (mut session, handle) = scripted(vec![
                Reply::discovery(a1, OTHER),
                Reply::mapped(a2),
                Reply::mapped(a3),
            ]);

            let outcome = block_on(w3t_nat::mapping::run(&mut session)).unwrap();

            let (expected, round_trips) = if a1 == a2 {
                (MappingOutcome::EndpointIndependent, 2)
            } else if a2 == a3 {
                (MappingOutcome::AddressDependent, 3)
            } else {
                (MappingOutcome::AddressAndPortDependent, 3)
            };
            prop_assert_eq!(outcome, expected);
            prop_assert_eq!(handle.sent().len(), round_trips);
        }

        /// Mapped address equal to the local endpoint ends the suite at once
        #[test]
        fn no_nat_after_one_round_trip(later in public_endpoint()) {
            let (mut session, handle) = scripted(vec![
                Reply::discovery(LOCAL, OTHER),
                Reply::mapped(later),
            ]);

            let outcome = block_on(w3t_nat::mapping::run(&mut session)).unwrap();

            prop_assert_eq!(outcome, MappingOutcome::NoNat);
            prop_assert_eq!(handle.sent().len(), 1);
        }

        /// Test II answering wins regardless of Test III
        #[test]
        fn filtering_follows_answers(test2_answers: bool, test3_answers: bool) {
            let answer = |answers: bool| if answers { Reply::mapped(LOCAL) } else { Reply::Silence };
            let (mut session, _) = scripted(vec![
                Reply::discovery(LOCAL, OTHER),
                answer(test2_answers),
                answer(test3_answers),
            ]);

            let outcome = block_on(w3t_nat::filtering::run(&mut session)).unwrap();

            let expected = match (test2_answers, test3_answers) {
                (true, _) => FilteringOutcome::EndpointIndependent,
                (false, true) => FilteringOutcome::AddressDependent,
                (false, false) => FilteringOutcome::AddressAndPortDependent,
            };
            prop_assert_eq!(outcome, expected);
        }
    }
}

// ============================================================================
// Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;

    fn any_endpoint() -> impl Strategy<Value = SocketAddr> {
        prop_oneof![
            (any::<[u8; 4]>(), any::<u16>())
                .prop_map(|(ip, port)| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)),
            (any::<[u8; 16]>(), any::<u16>())
                .prop_map(|(ip, port)| SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port)),
        ]
    }

    proptest! {
        /// Decoding arbitrary bytes never panics
        #[test]
        fn decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = StunMessage::decode(&data);
        }

        /// Decoding never panics on a valid header followed by garbage
        #[test]
        fn decode_garbage_attributes(body in prop::collection::vec(any::<u8>(), 0..128)) {
            let mut data = StunMessage::binding_response(TransactionId::random()).encode();
            data[2..4].copy_from_slice(&(body.len() as u16).to_be_bytes());
            data.extend_from_slice(&body);

            if let Ok(message) = StunMessage::decode(&data) {
                prop_assert_eq!(message.class, w3t_nat::StunMessageClass::SuccessResponse);
            }
        }

        /// CHANGE-REQUEST flags land on bits 2 and 1 of the value
        #[test]
        fn change_request_bits(change_ip: bool, change_port: bool) {
            let txn = TransactionId::random();
            let bytes = stun::encode_binding_request(txn, change_ip, change_port);

            let expected_len = if change_ip || change_port { 8 } else { 0 };
            prop_assert_eq!(bytes.len(), stun::HEADER_SIZE + expected_len);
            prop_assert_eq!(&bytes[8..20], txn.as_bytes());

            if expected_len > 0 {
                let flags = u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
                prop_assert_eq!(flags & stun::CHANGE_IP_FLAG != 0, change_ip);
                prop_assert_eq!(flags & stun::CHANGE_PORT_FLAG != 0, change_port);
                prop_assert_eq!(flags & !(stun::CHANGE_IP_FLAG | stun::CHANGE_PORT_FLAG), 0);
            }
        }

        /// Address attributes survive encoding for both families
        #[test]
        fn address_attributes_preserved(mapped in any_endpoint(), other in any_endpoint()) {
            let message = StunMessage::binding_response(TransactionId::random())
                .with_attribute(StunAttribute::XorMappedAddress(mapped))
                .with_attribute(StunAttribute::OtherAddress(other));

            let decoded = StunMessage::decode(&message.encode()).unwrap();
            let received = w3t_nat::ReceivedAttributes::from_message(&decoded);

            prop_assert_eq!(received.xor_mapped_address, Some(mapped));
            prop_assert_eq!(received.other_address, Some(other));
        }
    }
}
