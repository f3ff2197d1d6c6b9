// SPDX-License-Identifier: Apache-2.0

//! CoRIM/CoMID token data model.
//!
//! Tokens are CBOR maps keyed by integers; the types here mirror the wire
//! structure and (de)serialize through serde visitors. Polymorphic identity
//! positions (class IDs, instances, groups, mkeys, crypto keys) decode
//! well-known tags into typed variants and keep anything else as an
//! extension carrying its full tagged encoding, so re-encoding is exact.

mod comid;
mod corim;
mod cryptokey;
mod environment;
mod extension;
mod measurement;
mod oid;
mod tagid;

pub use self::comid::{Comid, ComidEntity, ComidRole, KeyTriple, LinkedTag, TagIdentity};
pub use self::comid::{TagRel, Triples, ValueTriple};
pub use self::comid::{ROLE_CREATOR, ROLE_MAINTAINER, ROLE_TAG_CREATOR};
pub use self::corim::{CorimEntity, CorimRole, Locator, ProfileId, TagEntry};
pub use self::corim::{UnsignedCorim, Validity};
pub use self::corim::{ROLE_MANIFEST_CREATOR, ROLE_MANIFEST_SIGNER};
pub use self::cryptokey::{hash_alg_id, hash_alg_name, CryptoKey, HashEntry};
pub use self::environment::{Class, ClassId, Environment, GroupId, InstanceId};
pub use self::extension::{ExtensionEntry, ExtensionKind, Extensions};
pub use self::measurement::{parse_version_scheme, version_scheme_name};
pub use self::measurement::{FlagsMap, IntegrityRegisters, Measurement, Mkey, Mval};
pub use self::measurement::{RegisterIndex, SvnValue, Version};
pub use self::oid::{decode_oid, encode_oid};
pub use self::tagid::TagId;

use crate::error::Error;
use crate::raw::RawValue;

/// COSE_Sign1 envelope
pub const TAG_COSE_SIGN1: u64 = 18;
/// unsigned CoRIM
pub const TAG_UNSIGNED_CORIM: u64 = 501;
/// CoMID entry inside a CoRIM's tag list
pub const TAG_COMID: u64 = 506;

/// The outer shape of a submitted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// COSE_Sign1 (tag 18) wrapping an unsigned CoRIM
    Signed,
    /// tag 501 unsigned CoRIM
    Unsigned,
}

/// Classify a token buffer by its leading bytes.
pub fn detect_envelope(buf: &[u8]) -> Result<Envelope, Error> {
    if buf.len() < 3 {
        return Err(Error::TooShort);
    }

    if buf[0] == 0xd2 {
        // tag 18 -> COSE_Sign1 -> signed corim
        Ok(Envelope::Signed)
    } else if buf[..3] == [0xd9, 0x01, 0xf5] {
        // tag 501 -> unsigned corim
        Ok(Envelope::Unsigned)
    } else {
        Err(Error::UnrecognizedFormat)
    }
}

/// Extract the payload of a COSE_Sign1 envelope without verifying the
/// signature. The payload of a signed CoRIM is the unsigned CoRIM token.
pub fn unwrap_cose_sign1(buf: &[u8]) -> Result<Vec<u8>, Error> {
    let raw = RawValue::from_cbor(buf)?;

    let (tag, inner) = raw
        .as_tagged()
        .ok_or_else(|| Error::CborDecode("expected a tagged item".to_string()))?;

    if tag != TAG_COSE_SIGN1 {
        return Err(Error::UnrecognizedFormat);
    }

    let fields = inner
        .as_array()
        .ok_or_else(|| Error::CborDecode("COSE_Sign1 must be an array".to_string()))?;

    if fields.len() != 4 {
        return Err(Error::CborDecode(format!(
            "COSE_Sign1 must have 4 fields, found {}",
            fields.len()
        )));
    }

    fields[2]
        .as_bytes()
        .map(|b| b.to_vec())
        .ok_or_else(|| Error::CborDecode("COSE_Sign1 payload must be a byte string".to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_detection() {
        assert!(matches!(detect_envelope(&[0x01]), Err(Error::TooShort)));
        assert!(matches!(
            detect_envelope(&[0x01, 0x02, 0x03, 0x04]),
            Err(Error::UnrecognizedFormat)
        ));
        assert_eq!(
            detect_envelope(&[0xd2, 0x84, 0x40]).unwrap(),
            Envelope::Signed
        );
        assert_eq!(
            detect_envelope(&[0xd9, 0x01, 0xf5, 0xa2]).unwrap(),
            Envelope::Unsigned
        );
    }

    #[test]
    fn cose_unwrap() {
        // 18([h'a10126', {}, h'deadbeef', h'00'])
        let token = RawValue::tagged(
            TAG_COSE_SIGN1,
            RawValue::Array(vec![
                RawValue::Bytes(vec![0xa1, 0x01, 0x26]),
                RawValue::Map(vec![]),
                RawValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
                RawValue::Bytes(vec![0x00]),
            ]),
        )
        .to_cbor()
        .unwrap();

        let payload = unwrap_cose_sign1(&token).unwrap();
        assert_eq!(payload, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn cose_unwrap_bad() {
        let token = RawValue::tagged(TAG_COSE_SIGN1, RawValue::Array(vec![RawValue::Integer(1)]))
            .to_cbor()
            .unwrap();
        let err = unwrap_cose_sign1(&token).unwrap_err();
        assert!(err.to_string().contains("4 fields"));

        let token = RawValue::Integer(7).to_cbor().unwrap();
        let err = unwrap_cose_sign1(&token).unwrap_err();
        assert!(err.to_string().contains("tagged"));
    }
}
