//! Fixed-layout wire codec for identity frames.
//!
//! A wire message is an 8-byte little-endian header followed by a 512-byte
//! body of eight 64-byte NUL-padded UTF-8 fields:
//!
//! ```text
//! +------------+------------+-----------+----------+----------------------+
//! | block_len  | template   | schema    | version  | body (512 bytes)     |
//! | u16 LE     | u16 LE     | u16 LE    | u16 LE   | 8 x 64-byte fields   |
//! +------------+------------+-----------+----------+----------------------+
//! ```
//!
//! Frame length is validated before any field access, and decoding borrows
//! the caller's buffer rather than copying. Field values end at the first
//! NUL byte; encoding pads short values with NULs and rejects values longer
//! than the field capacity.

use thiserror::Error;

/// Encoded length of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Capacity of each body field in bytes.
pub const FIELD_LEN: usize = 64;

/// Number of body fields.
pub const FIELD_COUNT: usize = 8;

/// Fixed body length: eight 64-byte fields.
pub const BLOCK_LENGTH: u16 = (FIELD_LEN * FIELD_COUNT) as u16;

/// Template id of the identity message.
pub const TEMPLATE_ID: u16 = 1;

/// Schema id carried by every frame.
pub const SCHEMA_ID: u16 = 1;

/// Schema version carried by every frame.
pub const SCHEMA_VERSION: u16 = 1;

/// Total encoded frame length: header plus body.
pub const FRAME_LEN: usize = HEADER_LEN + BLOCK_LENGTH as usize;

/// `msg` literal for an identity verification request.
pub const MSG_VERIFY_REQUEST: &str = "Identity Verification Request";

/// `msg` literal for an add-user request.
pub const MSG_ADD_USER: &str = "Add User in System";

/// `msg` literal stamped on every reply the engine produces.
pub const MSG_RESPONSE: &str = "Identity Verification Response";

/// Errors produced while decoding a wire frame.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The buffer is shorter than the header, or shorter than the body
    /// length the header promises.
    #[error("buffer too short: have {have} bytes, need {need}")]
    ShortBuffer {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// The header names a template this codec does not understand.
    #[error("unknown template id: {0}")]
    UnknownTemplate(u16),

    /// The header names a schema version newer than this codec.
    #[error("unsupported schema version: {0}")]
    UnsupportedVersion(u16),

    /// A body field is not valid UTF-8 up to its first NUL.
    #[error("field `{0}` is not valid UTF-8")]
    FieldNotUtf8(&'static str),
}

/// Errors produced while encoding a wire frame.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EncodeError {
    /// The output buffer cannot hold a full frame.
    #[error("output buffer too short: have {have} bytes, need {need}")]
    ShortBuffer {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// A field value exceeds its 64-byte capacity.
    #[error("field `{field}` is {len} bytes, capacity is {FIELD_LEN}")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Actual value length in bytes.
        len: usize,
    },
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of body bytes following the header.
    pub block_length: u16,
    /// Message template id.
    pub template_id: u16,
    /// Schema id.
    pub schema_id: u16,
    /// Schema version.
    pub version: u16,
}

impl FrameHeader {
    /// Header every engine-produced frame carries.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            block_length: BLOCK_LENGTH,
            template_id: TEMPLATE_ID,
            schema_id: SCHEMA_ID,
            version: SCHEMA_VERSION,
        }
    }

    /// Reads a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ShortBuffer`] if `buf` holds fewer than
    /// [`HEADER_LEN`] bytes.
    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::ShortBuffer {
                have: buf.len(),
                need: HEADER_LEN,
            });
        }
        Ok(Self {
            block_length: u16::from_le_bytes([buf[0], buf[1]]),
            template_id: u16::from_le_bytes([buf[2], buf[3]]),
            schema_id: u16::from_le_bytes([buf[4], buf[5]]),
            version: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Writes the header into the front of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` holds fewer than [`HEADER_LEN`] bytes; callers size
    /// the buffer with [`FRAME_LEN`].
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.block_length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.template_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.schema_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.version.to_le_bytes());
    }
}

/// Operation an inbound frame requests, derived from `msg` and `verified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Check whether the `(id, name)` pair exists in the store.
    VerifyRequest,
    /// Insert the user if not already present.
    AddUserRequest,
    /// `verified` is already true; no side effect, no reply.
    AlreadyVerified,
    /// Unrecognised `msg` value; no side effect, no reply.
    Unknown,
}

/// Borrowed decode view over one identity frame.
///
/// All accessors return the field value with trailing NUL padding removed.
/// The view holds no heap and is valid for the lifetime of the buffer it
/// was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityFrame<'a> {
    header: FrameHeader,
    msg: &'a str,
    doc_type: &'a str,
    id: &'a str,
    name: &'a str,
    date_of_issue: &'a str,
    date_of_expiry: &'a str,
    address: &'a str,
    verified: bool,
}

impl<'a> IdentityFrame<'a> {
    /// The frame header as decoded.
    #[must_use]
    pub const fn header(&self) -> FrameHeader {
        self.header
    }

    /// Operation discriminator text.
    #[must_use]
    pub const fn msg(&self) -> &'a str {
        self.msg
    }

    /// Document type, e.g. `"passport"`.
    #[must_use]
    pub const fn doc_type(&self) -> &'a str {
        self.doc_type
    }

    /// Identity number, the primary key in the store.
    #[must_use]
    pub const fn id(&self) -> &'a str {
        self.id
    }

    /// Full name, the secondary key in the store.
    #[must_use]
    pub const fn name(&self) -> &'a str {
        self.name
    }

    /// Document issue date as ISO-8601 text.
    #[must_use]
    pub const fn date_of_issue(&self) -> &'a str {
        self.date_of_issue
    }

    /// Document expiry date as ISO-8601 text.
    #[must_use]
    pub const fn date_of_expiry(&self) -> &'a str {
        self.date_of_expiry
    }

    /// Free-text address.
    #[must_use]
    pub const fn address(&self) -> &'a str {
        self.address
    }

    /// Parsed `verified` flag.
    #[must_use]
    pub const fn verified(&self) -> bool {
        self.verified
    }

    /// Classifies the operation this frame requests.
    #[must_use]
    pub fn operation(&self) -> Operation {
        if self.verified {
            return Operation::AlreadyVerified;
        }
        match self.msg {
            MSG_VERIFY_REQUEST => Operation::VerifyRequest,
            MSG_ADD_USER => Operation::AddUserRequest,
            _ => Operation::Unknown,
        }
    }

    /// Body fields for the reply to this frame.
    ///
    /// Copies every field, overwrites `msg` with [`MSG_RESPONSE`] and
    /// `verified` with the business-step result.
    #[must_use]
    pub const fn reply_fields(&self, verified: bool) -> FrameFields<'a> {
        FrameFields {
            msg: MSG_RESPONSE,
            doc_type: self.doc_type,
            id: self.id,
            name: self.name,
            date_of_issue: self.date_of_issue,
            date_of_expiry: self.date_of_expiry,
            address: self.address,
            verified: if verified { "true" } else { "false" },
        }
    }
}

/// Body field values for encoding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFields<'a> {
    /// Operation discriminator text.
    pub msg: &'a str,
    /// Document type.
    pub doc_type: &'a str,
    /// Identity number.
    pub id: &'a str,
    /// Full name.
    pub name: &'a str,
    /// Issue date.
    pub date_of_issue: &'a str,
    /// Expiry date.
    pub date_of_expiry: &'a str,
    /// Address.
    pub address: &'a str,
    /// Boolean literal, `"true"` or `"false"`.
    pub verified: &'a str,
}

/// Field names in wire order, used for error reporting.
const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "msg",
    "type",
    "id",
    "name",
    "date_of_issue",
    "date_of_expiry",
    "address",
    "verified",
];

/// Decodes one identity frame from the front of `buf`.
///
/// Validates the header before touching the body: the buffer must hold the
/// full `HEADER_LEN + block_length` bytes, the template must be
/// [`TEMPLATE_ID`] and the version at most [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns a [`DecodeError`] for short buffers, foreign templates, newer
/// schema versions, or non-UTF-8 field bytes.
pub fn decode(buf: &[u8]) -> Result<IdentityFrame<'_>, DecodeError> {
    let header = FrameHeader::read(buf)?;
    if header.template_id != TEMPLATE_ID {
        return Err(DecodeError::UnknownTemplate(header.template_id));
    }
    if header.version > SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion(header.version));
    }
    let need = HEADER_LEN + header.block_length as usize;
    if buf.len() < need {
        return Err(DecodeError::ShortBuffer {
            have: buf.len(),
            need,
        });
    }

    let body = &buf[HEADER_LEN..need];
    let mut fields = [""; FIELD_COUNT];
    for (i, field) in fields.iter_mut().enumerate() {
        let start = i * FIELD_LEN;
        // Older schema versions may carry fewer fields; missing ones decode
        // as empty.
        if start >= body.len() {
            break;
        }
        let end = (start + FIELD_LEN).min(body.len());
        *field = trim_field(&body[start..end], FIELD_NAMES[i])?;
    }

    let verified = parse_verified(fields[7]);

    Ok(IdentityFrame {
        header,
        msg: fields[0],
        doc_type: fields[1],
        id: fields[2],
        name: fields[3],
        date_of_issue: fields[4],
        date_of_expiry: fields[5],
        address: fields[6],
        verified,
    })
}

/// Encodes one identity frame into the front of `out`.
///
/// Writes the canonical [`FrameHeader::identity`] header followed by the
/// NUL-padded body and returns the number of bytes written, always
/// [`FRAME_LEN`].
///
/// # Errors
///
/// Returns [`EncodeError::ShortBuffer`] if `out` cannot hold a full frame
/// and [`EncodeError::FieldTooLong`] if any field value exceeds 64 bytes.
pub fn encode(fields: &FrameFields<'_>, out: &mut [u8]) -> Result<usize, EncodeError> {
    if out.len() < FRAME_LEN {
        return Err(EncodeError::ShortBuffer {
            have: out.len(),
            need: FRAME_LEN,
        });
    }

    let values = [
        fields.msg,
        fields.doc_type,
        fields.id,
        fields.name,
        fields.date_of_issue,
        fields.date_of_expiry,
        fields.address,
        fields.verified,
    ];
    for (name, value) in FIELD_NAMES.into_iter().zip(values) {
        if value.len() > FIELD_LEN {
            return Err(EncodeError::FieldTooLong {
                field: name,
                len: value.len(),
            });
        }
    }

    FrameHeader::identity().write(out);
    for (i, value) in values.iter().enumerate() {
        let start = HEADER_LEN + i * FIELD_LEN;
        let slot = &mut out[start..start + FIELD_LEN];
        slot[..value.len()].copy_from_slice(value.as_bytes());
        slot[value.len()..].fill(0);
    }
    Ok(FRAME_LEN)
}

/// Reads only the `id` field out of a raw frame, without full decoding.
///
/// Used by key-affinity shard selection on the ingest path, where the rest
/// of the frame is not needed yet. Returns an empty string for buffers too
/// short to carry the field or for non-UTF-8 bytes; such frames still get
/// a shard and fail properly in the worker's decode.
#[must_use]
pub fn peek_id(buf: &[u8]) -> &str {
    const ID_OFFSET: usize = HEADER_LEN + 2 * FIELD_LEN;
    let Some(raw) = buf.get(ID_OFFSET..ID_OFFSET + FIELD_LEN) else {
        return "";
    };
    trim_field(raw, "id").unwrap_or("")
}

/// Trims a field slice at its first NUL and checks UTF-8.
fn trim_field<'a>(raw: &'a [u8], name: &'static str) -> Result<&'a str, DecodeError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).map_err(|_| DecodeError::FieldNotUtf8(name))
}

/// Parses the `verified` field.
///
/// Accepts `"true"`/`"false"` case-insensitively or any integer, where
/// zero is false. Anything else, including an empty field, reads as false:
/// only an explicit positive assertion marks a frame verified.
fn parse_verified(text: &str) -> bool {
    if text.eq_ignore_ascii_case("true") {
        return true;
    }
    text.parse::<i64>().map(|n| n != 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn request_fields<'a>(msg: &'a str, verified: &'a str) -> FrameFields<'a> {
        FrameFields {
            msg,
            doc_type: "passport",
            id: "1231321314124",
            name: "Huzaifa Ahmed",
            date_of_issue: "2020-01-01",
            date_of_expiry: "2030-01-01",
            address: "12 Harbour Road",
            verified,
        }
    }

    #[test]
    fn test_encode_writes_exact_frame_len() {
        let mut buf = [0u8; FRAME_LEN];
        let n = encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        assert_eq!(n, FRAME_LEN);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_LEN], &[0x00, 0x02, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_round_trip() {
        let fields = request_fields(MSG_VERIFY_REQUEST, "false");
        let mut buf = [0u8; FRAME_LEN];
        encode(&fields, &mut buf).unwrap();

        let frame = decode(&buf).unwrap();
        assert_eq!(frame.msg(), MSG_VERIFY_REQUEST);
        assert_eq!(frame.doc_type(), "passport");
        assert_eq!(frame.id(), "1231321314124");
        assert_eq!(frame.name(), "Huzaifa Ahmed");
        assert_eq!(frame.date_of_issue(), "2020-01-01");
        assert_eq!(frame.date_of_expiry(), "2030-01-01");
        assert_eq!(frame.address(), "12 Harbour Road");
        assert!(!frame.verified());
        assert_eq!(frame.header(), FrameHeader::identity());
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(matches!(
            decode(&[0u8; 4]),
            Err(DecodeError::ShortBuffer { have: 4, need: 8 })
        ));

        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        assert!(matches!(
            decode(&buf[..100]),
            Err(DecodeError::ShortBuffer { have: 100, .. })
        ));
    }

    #[test]
    fn test_unknown_template_rejected() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        buf[2..4].copy_from_slice(&7u16.to_le_bytes());
        assert_eq!(decode(&buf), Err(DecodeError::UnknownTemplate(7)));
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        buf[6..8].copy_from_slice(&2u16.to_le_bytes());
        assert_eq!(decode(&buf), Err(DecodeError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_field_too_long_rejected() {
        let long = "x".repeat(FIELD_LEN + 1);
        let mut fields = request_fields(MSG_VERIFY_REQUEST, "false");
        fields.address = &long;
        let mut buf = [0u8; FRAME_LEN];
        assert_eq!(
            encode(&fields, &mut buf),
            Err(EncodeError::FieldTooLong {
                field: "address",
                len: FIELD_LEN + 1,
            })
        );
    }

    #[test]
    fn test_verified_parsing() {
        for (text, expect) in [
            ("true", true),
            ("TRUE", true),
            ("false", false),
            ("False", false),
            ("1", true),
            ("0", false),
            ("", false),
            // Anything unparseable reads as false rather than failing the
            // frame; the request still gets processed.
            ("maybe", false),
            ("yes", false),
        ] {
            let mut buf = [0u8; FRAME_LEN];
            encode(&request_fields(MSG_VERIFY_REQUEST, text), &mut buf).unwrap();
            assert_eq!(decode(&buf).unwrap().verified(), expect, "input {text:?}");
        }
    }

    #[test]
    fn test_operation_classification() {
        let cases = [
            (MSG_VERIFY_REQUEST, "false", Operation::VerifyRequest),
            (MSG_ADD_USER, "false", Operation::AddUserRequest),
            (MSG_VERIFY_REQUEST, "true", Operation::AlreadyVerified),
            (MSG_ADD_USER, "true", Operation::AlreadyVerified),
            ("Renew Document", "false", Operation::Unknown),
        ];
        for (msg, verified, expect) in cases {
            let mut buf = [0u8; FRAME_LEN];
            encode(&request_fields(msg, verified), &mut buf).unwrap();
            assert_eq!(decode(&buf).unwrap().operation(), expect, "msg {msg:?}");
        }
    }

    #[test]
    fn test_reply_fields_shape() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_ADD_USER, "false"), &mut buf).unwrap();
        let frame = decode(&buf).unwrap();

        let reply = frame.reply_fields(true);
        assert_eq!(reply.msg, MSG_RESPONSE);
        assert_eq!(reply.verified, "true");
        assert_eq!(reply.id, frame.id());
        assert_eq!(reply.name, frame.name());
        assert_eq!(reply.doc_type, frame.doc_type());
        assert_eq!(reply.date_of_issue, frame.date_of_issue());
        assert_eq!(reply.date_of_expiry, frame.date_of_expiry());
        assert_eq!(reply.address, frame.address());
    }

    #[test]
    fn test_non_utf8_field_rejected() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        // Corrupt the name field with an invalid UTF-8 sequence.
        let name_start = HEADER_LEN + 3 * FIELD_LEN;
        buf[name_start] = 0xFF;
        buf[name_start + 1] = 0xFE;
        assert_eq!(decode(&buf), Err(DecodeError::FieldNotUtf8("name")));
    }

    #[test]
    fn test_peek_id_matches_decode() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        assert_eq!(peek_id(&buf), decode(&buf).unwrap().id());
        assert_eq!(peek_id(&buf[..10]), "");
    }

    #[test]
    fn test_decode_borrows_without_copying() {
        let mut buf = [0u8; FRAME_LEN];
        encode(&request_fields(MSG_VERIFY_REQUEST, "false"), &mut buf).unwrap();
        let frame = decode(&buf).unwrap();
        let id_ptr = frame.id().as_ptr() as usize;
        let buf_range = buf.as_ptr() as usize..buf.as_ptr() as usize + FRAME_LEN;
        assert!(buf_range.contains(&id_ptr));
    }

    proptest! {
        /// Any frame whose fields fit their slots decodes back to the
        /// exact values that were encoded.
        #[test]
        fn prop_round_trip(
            msg in "[ -~]{0,64}",
            doc_type in "[ -~]{0,64}",
            id in "[ -~]{0,64}",
            name in "[ -~]{0,64}",
            date_of_issue in "[ -~]{0,64}",
            date_of_expiry in "[ -~]{0,64}",
            address in "[ -~]{0,64}",
            verified in any::<bool>(),
        ) {
            let fields = FrameFields {
                msg: &msg,
                doc_type: &doc_type,
                id: &id,
                name: &name,
                date_of_issue: &date_of_issue,
                date_of_expiry: &date_of_expiry,
                address: &address,
                verified: if verified { "true" } else { "false" },
            };
            let mut buf = [0u8; FRAME_LEN];
            encode(&fields, &mut buf).unwrap();

            let frame = decode(&buf).unwrap();
            prop_assert_eq!(frame.msg(), msg.as_str());
            prop_assert_eq!(frame.doc_type(), doc_type.as_str());
            prop_assert_eq!(frame.id(), id.as_str());
            prop_assert_eq!(frame.name(), name.as_str());
            prop_assert_eq!(frame.date_of_issue(), date_of_issue.as_str());
            prop_assert_eq!(frame.date_of_expiry(), date_of_expiry.as_str());
            prop_assert_eq!(frame.address(), address.as_str());
            prop_assert_eq!(frame.verified(), verified);
        }
    }
}
