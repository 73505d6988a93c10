//! Fuzz target for STUN message decoding
//!
//! The decoder and attribute extraction must handle arbitrary datagrams
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use w3t_nat::{MemoryLogger, ReceivedAttributes, StunMessage};

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = StunMessage::decode(data) {
        let logger = MemoryLogger::new();
        let _ = ReceivedAttributes::parse_logged(&message, &logger);

        // Whatever decoded must encode and decode again
        let reencoded = message.encode();
        assert!(StunMessage::decode(&reencoded).is_ok());
    }
});
