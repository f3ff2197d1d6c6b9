// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// CoRIM store errors
#[derive(Error, Debug)]
pub enum Error {
    /// the input buffer is too small to contain a CoRIM envelope
    #[error("input too short")]
    TooShort,
    /// the input buffer does not start with a recognized CBOR envelope
    #[error("unrecognized input format")]
    UnrecognizedFormat,
    /// a signed CoRIM was submitted but insecure ingest is not enabled
    #[error("signed CoRIM validation not supported (set insecure config to add unvalidated)")]
    SignatureVerificationDisabled,
    /// a CoRIM tag entry is not a CoMID
    #[error("tag {number} at index {index}; only CoMID tags (506) are supported")]
    UnsupportedTag { number: u64, index: usize },
    /// a token construct this store does not handle
    #[error("{0} not supported")]
    UnsupportedFeature(String),
    /// an error occured while decoding CBOR
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
    /// an error occured while encoding CBOR
    #[error("CBOR encode error: {0}")]
    CborEncode(String),
    /// a malformed identity value (OID, UUID, UEID, mkey, ...)
    #[error("invalid {kind}: {reason}")]
    InvalidIdentifier { kind: String, reason: String },
    /// paired discriminant/payload columns violate the set-together rule
    #[error("{0} must be set together")]
    NullMismatch(String),
    #[error("already in store")]
    AlreadyInStore,
    #[error("already in store (digests match)")]
    AlreadyInStoreDigestsMatch,
    #[error("already in store but digests differ")]
    AlreadyInStoreDigestsDiffer,
    /// the configuration mandates a label and none was provided
    #[error("a label must be specified (required by store configuration)")]
    NoLabel,
    #[error("no matching environments found")]
    NoEnvironmentMatch,
    #[error("no triples matched")]
    NoMatch,
    #[error("manifest with ID {0:?} not found")]
    ManifestNotFound(String),
    /// a structural rule was broken (no triples, no roles, ...)
    #[error("validation error: {0}")]
    Validation(String),
    /// a measurement value entry carries a code point the mapper does not know
    #[error("unexpected code point: {0}")]
    UnexpectedCodepoint(i64),
    /// a measurement value entry carries a code point that belongs in its own table
    #[error("unexpected value entry for code point {0} (should be in its own table)")]
    MisplacedValue(i64),
    /// an update or delete was attempted on a row that was never saved
    #[error("ID not set")]
    IdNotSet,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn invalid<K: Into<String>, R: Into<String>>(kind: K, reason: R) -> Self {
        Error::InvalidIdentifier {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode<E: std::fmt::Display>(err: E) -> Self {
        Error::CborDecode(err.to_string())
    }

    pub(crate) fn encode<E: std::fmt::Display>(err: E) -> Self {
        Error::CborEncode(err.to_string())
    }
}
