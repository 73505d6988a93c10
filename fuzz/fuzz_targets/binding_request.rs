//! Fuzz target for binding request encoding
//!
//! Every request must decode back to a request carrying the same transaction
//! ID and CHANGE-REQUEST flags.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use w3t_nat::stun::encode_binding_request;
use w3t_nat::{StunMessage, StunMessageClass, TransactionId};

#[derive(Debug, Arbitrary)]
struct RequestInput {
    transaction_id: [u8; 12],
    change_ip: bool,
    change_port: bool,
}

fuzz_target!(|input: RequestInput| {
    let txn = TransactionId::from_bytes(input.transaction_id);
    let bytes = encode_binding_request(txn, input.change_ip, input.change_port);

    let Ok(message) = StunMessage::decode(&bytes) else {
        panic!("encoded request failed to decode");
    };
    assert_eq!(message.class, StunMessageClass::Request);
    assert_eq!(message.transaction_id, txn);

    let expected = (input.change_ip || input.change_port)
        .then_some((input.change_ip, input.change_port));
    assert_eq!(message.change_request(), expected);
});
