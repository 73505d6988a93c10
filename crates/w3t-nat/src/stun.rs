//! STUN Message Codec (RFC 5389 + RFC 5780 extensions)
//!
//! Encodes binding requests, optionally carrying a CHANGE-REQUEST attribute,
//! and decodes responses. Only the Binding method is supported; that is all
//! NAT behavior discovery needs.
//!
//! # Attributes
//!
//! | Type   | Name               | Notes                                  |
//! |--------|--------------------|----------------------------------------|
//! | 0x0001 | MAPPED-ADDRESS     | plain address                          |
//! | 0x0003 | CHANGE-REQUEST     | RFC 5780, flags 0x04 (IP) / 0x02 (port)|
//! | 0x0020 | XOR-MAPPED-ADDRESS | address XORed with the magic cookie    |
//! | 0x8022 | SOFTWARE           | UTF-8 server description               |
//! | 0x802B | RESPONSE-ORIGIN    | RFC 5780, source of the response       |
//! | 0x802C | OTHER-ADDRESS      | RFC 5780, server's alternate endpoint  |
//!
//! Anything else is preserved as [`StunAttribute::Unknown`].

use crate::error::StunError;
use crate::logger::LeveledLogger;
use rand::RngCore;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// STUN magic cookie (0x2112A442)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Binding method
const METHOD_BINDING: u16 = 0x0001;

/// MAPPED-ADDRESS attribute type
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
/// CHANGE-REQUEST attribute type (RFC 5780)
pub const ATTR_CHANGE_REQUEST: u16 = 0x0003;
/// XOR-MAPPED-ADDRESS attribute type
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// SOFTWARE attribute type
pub const ATTR_SOFTWARE: u16 = 0x8022;
/// RESPONSE-ORIGIN attribute type (RFC 5780)
pub const ATTR_RESPONSE_ORIGIN: u16 = 0x802B;
/// OTHER-ADDRESS attribute type (RFC 5780)
pub const ATTR_OTHER_ADDRESS: u16 = 0x802C;

/// CHANGE-REQUEST "change IP" flag
pub const CHANGE_IP_FLAG: u32 = 0x04;
/// CHANGE-REQUEST "change port" flag
pub const CHANGE_PORT_FLAG: u32 = 0x02;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// 96-bit STUN transaction identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate a random transaction ID
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({self})")
    }
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageClass {
    /// Request message
    Request,
    /// Indication (no response expected)
    Indication,
    /// Success response
    SuccessResponse,
    /// Error response
    ErrorResponse,
}

impl StunMessageClass {
    fn bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::SuccessResponse => 0b10,
            Self::ErrorResponse => 0b11,
        }
    }

    /// Encode the Binding method with this class into a 16-bit message type
    ///
    /// RFC 5389 Section 6 encoding:
    /// ```text
    ///  0                 1
    ///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
    /// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    fn message_type(self) -> u16 {
        let method = METHOD_BINDING;
        let class = self.bits();

        (method & 0x000F)
            | ((class & 0b01) << 4)
            | ((method & 0x0070) << 1)
            | ((class & 0b10) << 7)
            | ((method & 0x0F80) << 2)
    }

    fn from_message_type(msg_type: u16) -> Result<Self, StunError> {
        // The two most significant bits of every STUN message are zero
        if msg_type & 0xC000 != 0 {
            return Err(StunError::InvalidMessageType(msg_type));
        }

        let method = (msg_type & 0x000F) | ((msg_type >> 1) & 0x0070) | ((msg_type >> 2) & 0x0F80);
        if method != METHOD_BINDING {
            return Err(StunError::InvalidMessageType(msg_type));
        }

        let class = ((msg_type >> 4) & 0b01) | ((msg_type >> 7) & 0b10);
        Ok(match class {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        })
    }
}

impl fmt::Display for StunMessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Indication => write!(f, "indication"),
            Self::SuccessResponse => write!(f, "success response"),
            Self::ErrorResponse => write!(f, "error response"),
        }
    }
}

/// STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// MAPPED-ADDRESS (0x0001)
    MappedAddress(SocketAddr),
    /// CHANGE-REQUEST (0x0003)
    ChangeRequest {
        /// Ask the server to answer from its alternate IP
        change_ip: bool,
        /// Ask the server to answer from its alternate port
        change_port: bool,
    },
    /// XOR-MAPPED-ADDRESS (0x0020)
    XorMappedAddress(SocketAddr),
    /// SOFTWARE (0x8022)
    Software(String),
    /// RESPONSE-ORIGIN (0x802B)
    ResponseOrigin(SocketAddr),
    /// OTHER-ADDRESS (0x802C)
    OtherAddress(SocketAddr),
    /// Attribute this codec does not interpret
    Unknown(u16, Vec<u8>),
}

impl StunAttribute {
    /// Attribute type code
    #[must_use]
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => ATTR_MAPPED_ADDRESS,
            Self::ChangeRequest { .. } => ATTR_CHANGE_REQUEST,
            Self::XorMappedAddress(_) => ATTR_XOR_MAPPED_ADDRESS,
            Self::Software(_) => ATTR_SOFTWARE,
            Self::ResponseOrigin(_) => ATTR_RESPONSE_ORIGIN,
            Self::OtherAddress(_) => ATTR_OTHER_ADDRESS,
            Self::Unknown(t, _) => *t,
        }
    }

    /// Encode as type-length-value, padded to a 4-byte boundary. `None` when
    /// the value does not fit the 16-bit length field.
    fn encode(&self, transaction_id: &TransactionId) -> Option<Vec<u8>> {
        let value = self.encode_value(transaction_id);
        let value_len = u16::try_from(value.len()).ok()?;

        let mut bytes = Vec::with_capacity(4 + value.len() + 3);
        bytes.extend_from_slice(&self.attr_type().to_be_bytes());
        bytes.extend_from_slice(&value_len.to_be_bytes());
        bytes.extend_from_slice(&value);

        let padding = (4 - (value.len() % 4)) % 4;
        bytes.extend(std::iter::repeat_n(0, padding));

        Some(bytes)
    }

    fn encode_value(&self, transaction_id: &TransactionId) -> Vec<u8> {
        match self {
            Self::MappedAddress(addr) | Self::ResponseOrigin(addr) | Self::OtherAddress(addr) => {
                encode_address(*addr)
            }
            Self::XorMappedAddress(addr) => {
                encode_address(xor_address(*addr, transaction_id))
            }
            Self::ChangeRequest {
                change_ip,
                change_port,
            } => {
                let mut flags = 0u32;
                if *change_ip {
                    flags |= CHANGE_IP_FLAG;
                }
                if *change_port {
                    flags |= CHANGE_PORT_FLAG;
                }
                flags.to_be_bytes().to_vec()
            }
            Self::Software(s) => s.as_bytes().to_vec(),
            Self::Unknown(_, data) => data.clone(),
        }
    }

    /// Decode an attribute value
    fn decode(attr_type: u16, value: &[u8], transaction_id: &TransactionId) -> Result<Self, StunError> {
        match attr_type {
            ATTR_MAPPED_ADDRESS => Ok(Self::MappedAddress(decode_address(attr_type, value)?)),
            ATTR_RESPONSE_ORIGIN => Ok(Self::ResponseOrigin(decode_address(attr_type, value)?)),
            ATTR_OTHER_ADDRESS => Ok(Self::OtherAddress(decode_address(attr_type, value)?)),
            ATTR_XOR_MAPPED_ADDRESS => {
                let addr = decode_address(attr_type, value)?;
                Ok(Self::XorMappedAddress(xor_address(addr, transaction_id)))
            }
            ATTR_CHANGE_REQUEST => {
                let flags: [u8; 4] = value
                    .try_into()
                    .map_err(|_| StunError::InvalidAttribute(attr_type))?;
                let flags = u32::from_be_bytes(flags);
                Ok(Self::ChangeRequest {
                    change_ip: flags & CHANGE_IP_FLAG != 0,
                    change_port: flags & CHANGE_PORT_FLAG != 0,
                })
            }
            ATTR_SOFTWARE => Ok(Self::Software(String::from_utf8_lossy(value).into_owned())),
            _ => Ok(Self::Unknown(attr_type, value.to_vec())),
        }
    }

    /// Attribute name as written in the RFCs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MappedAddress(_) => "MAPPED-ADDRESS",
            Self::ChangeRequest { .. } => "CHANGE-REQUEST",
            Self::XorMappedAddress(_) => "XOR-MAPPED-ADDRESS",
            Self::Software(_) => "SOFTWARE",
            Self::ResponseOrigin(_) => "RESPONSE-ORIGIN",
            Self::OtherAddress(_) => "OTHER-ADDRESS",
            Self::Unknown(..) => "UNKNOWN",
        }
    }
}

impl fmt::Display for StunAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappedAddress(addr)
            | Self::XorMappedAddress(addr)
            | Self::ResponseOrigin(addr)
            | Self::OtherAddress(addr) => write!(f, "{}: {addr}", self.name()),
            Self::ChangeRequest {
                change_ip,
                change_port,
            } => write!(f, "CHANGE-REQUEST: ip={change_ip} port={change_port}"),
            Self::Software(s) => write!(f, "SOFTWARE: {s}"),
            Self::Unknown(t, data) => write!(f, "0x{t:04X} (l={})", data.len()),
        }
    }
}

/// Plain address value: reserved, family, port, address
fn encode_address(addr: SocketAddr) -> Vec<u8> {
    let mut value = Vec::with_capacity(20);
    value.push(0);
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ip.octets());
        }
    }
    value
}

fn decode_address(attr_type: u16, value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidAttribute(attr_type));
    }

    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = match (value[1], &value[4..]) {
        (FAMILY_IPV4, octets) if octets.len() == 4 => {
            IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        (FAMILY_IPV6, octets) if octets.len() == 16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(octets);
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        _ => return Err(StunError::InvalidAttribute(attr_type)),
    };

    Ok(SocketAddr::new(ip, port))
}

/// XOR an address with the magic cookie (and the transaction ID for IPv6).
/// The operation is its own inverse.
fn xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> SocketAddr {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    let ip = match addr.ip() {
        IpAddr::V4(ip) => {
            let mut octets = ip.octets();
            for (byte, key) in octets.iter_mut().zip(cookie) {
                *byte ^= key;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(ip) => {
            let mut octets = ip.octets();
            let key = cookie.iter().chain(transaction_id.as_bytes());
            for (byte, key) in octets.iter_mut().zip(key) {
                *byte ^= key;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    SocketAddr::new(ip, port)
}

/// STUN Binding message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message class
    pub class: StunMessageClass,
    /// Transaction ID (96 bits)
    pub transaction_id: TransactionId,
    /// Message attributes, in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a Binding request with a fresh transaction ID
    #[must_use]
    pub fn binding_request() -> Self {
        Self {
            class: StunMessageClass::Request,
            transaction_id: TransactionId::random(),
            attributes: Vec::new(),
        }
    }

    /// Create a Binding request carrying CHANGE-REQUEST when either flag is set
    #[must_use]
    pub fn binding_request_with_change(change_ip: bool, change_port: bool) -> Self {
        let mut request = Self::binding_request();
        if change_ip || change_port {
            request.add_attribute(StunAttribute::ChangeRequest {
                change_ip,
                change_port,
            });
        }
        request
    }

    /// Create a Binding success response for `transaction_id`
    #[must_use]
    pub fn binding_response(transaction_id: TransactionId) -> Self {
        Self {
            class: StunMessageClass::SuccessResponse,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute to the message
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Builder form of [`Self::add_attribute`]
    #[must_use]
    pub fn with_attribute(mut self, attr: StunAttribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// CHANGE-REQUEST flags carried by this message, if any
    #[must_use]
    pub fn change_request(&self) -> Option<(bool, bool)> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::ChangeRequest {
                change_ip,
                change_port,
            } => Some((*change_ip, *change_port)),
            _ => None,
        })
    }

    /// Encode message to bytes
    ///
    /// Attributes that would overflow the 16-bit message length are left out.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + 32);

        bytes.extend_from_slice(&self.class.message_type().to_be_bytes());
        // Length placeholder, patched below
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(self.transaction_id.as_bytes());

        // Message length excludes the 20-byte header
        let mut body_len: u16 = 0;
        for attr in &self.attributes {
            let Some(encoded) = attr.encode(&self.transaction_id) else {
                continue;
            };
            let Some(len) = u16::try_from(encoded.len())
                .ok()
                .and_then(|len| body_len.checked_add(len))
            else {
                continue;
            };
            body_len = len;
            bytes.extend_from_slice(&encoded);
        }
        bytes[2..4].copy_from_slice(&body_len.to_be_bytes());

        bytes
    }

    /// Decode message from bytes
    ///
    /// # Errors
    ///
    /// Returns `StunError` if the header is malformed or the declared length
    /// exceeds the datagram. Individually malformed attributes are skipped.
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::MessageTooShort(bytes.len()));
        }

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let body_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        if cookie != MAGIC_COOKIE {
            return Err(StunError::InvalidMagicCookie(cookie));
        }

        let class = StunMessageClass::from_message_type(msg_type)?;

        let available = bytes.len() - HEADER_SIZE;
        if body_len > available {
            return Err(StunError::LengthMismatch {
                declared: body_len,
                available,
            });
        }

        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes[8..HEADER_SIZE]);
        let transaction_id = TransactionId::from_bytes(id);

        let body = &bytes[HEADER_SIZE..HEADER_SIZE + body_len];
        let mut attributes = Vec::new();
        let mut offset = 0;

        while offset + 4 <= body.len() {
            let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
            let attr_len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
            offset += 4;

            if offset + attr_len > body.len() {
                break;
            }

            let value = &body[offset..offset + attr_len];
            if let Ok(attr) = StunAttribute::decode(attr_type, value, &transaction_id) {
                attributes.push(attr);
            }

            offset += attr_len + (4 - (attr_len % 4)) % 4;
        }

        Ok(Self {
            class,
            transaction_id,
            attributes,
        })
    }
}

impl fmt::Display for StunMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Binding {} id={} attrs={}",
            self.class,
            self.transaction_id,
            self.attributes.len()
        )
    }
}

/// Encode a Binding request with an optional CHANGE-REQUEST attribute
#[must_use]
pub fn encode_binding_request(
    transaction_id: TransactionId,
    change_ip: bool,
    change_port: bool,
) -> Vec<u8> {
    let mut request = StunMessage::binding_request_with_change(change_ip, change_port);
    request.transaction_id = transaction_id;
    request.encode()
}

/// The attributes of a response that NAT discovery looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedAttributes {
    /// MAPPED-ADDRESS
    pub mapped_address: Option<SocketAddr>,
    /// XOR-MAPPED-ADDRESS
    pub xor_mapped_address: Option<SocketAddr>,
    /// OTHER-ADDRESS
    pub other_address: Option<SocketAddr>,
    /// RESPONSE-ORIGIN
    pub response_origin: Option<SocketAddr>,
    /// SOFTWARE
    pub software: Option<String>,
}

impl ReceivedAttributes {
    /// Extract the attributes of interest; the first occurrence of each wins
    #[must_use]
    pub fn from_message(message: &StunMessage) -> Self {
        let mut received = Self::default();
        for attr in &message.attributes {
            match attr {
                StunAttribute::MappedAddress(addr) => {
                    received.mapped_address.get_or_insert(*addr);
                }
                StunAttribute::XorMappedAddress(addr) => {
                    received.xor_mapped_address.get_or_insert(*addr);
                }
                StunAttribute::OtherAddress(addr) => {
                    received.other_address.get_or_insert(*addr);
                }
                StunAttribute::ResponseOrigin(addr) => {
                    received.response_origin.get_or_insert(*addr);
                }
                StunAttribute::Software(s) => {
                    received.software.get_or_insert_with(|| s.clone());
                }
                StunAttribute::ChangeRequest { .. } | StunAttribute::Unknown(..) => {}
            }
        }
        received
    }

    /// Extract and write a debug dump of `message` to `logger`
    pub fn parse_logged(message: &StunMessage, logger: &dyn LeveledLogger) -> Self {
        let received = Self::from_message(message);
        logger.debug(format_args!(
            "{message}\n\tMAPPED-ADDRESS:     {}\n\tXOR-MAPPED-ADDRESS: {}\n\tRESPONSE-ORIGIN:    {}\n\tOTHER-ADDRESS:      {}\n\tSOFTWARE:           {}",
            display_opt(received.mapped_address.as_ref()),
            display_opt(received.xor_mapped_address.as_ref()),
            display_opt(received.response_origin.as_ref()),
            display_opt(received.other_address.as_ref()),
            display_opt(received.software.as_ref()),
        ));
        for attr in &message.attributes {
            if matches!(attr, StunAttribute::Unknown(..) | StunAttribute::ChangeRequest { .. }) {
                logger.debug(format_args!("\t{attr}"));
            }
        }
        received
    }
}

fn display_opt<T: fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "<none>".to_string(), ToString::to_string)
}
