//! Streaming modification of X.509 certificate revocation lists.
//!
//! A CA that revokes many certificates ends up with a CRL whose encoded
//! form no longer fits comfortably in memory, yet every new revocation
//! requires producing an updated, re-signed list. This crate rewrites a
//! DER encoded CRL from one stream to another: entries are added and
//! deleted, the CRL number is bumped, the authority key identifier and
//! the update times are refreshed, and the result is signed with the
//! caller's RSA key, all while keeping memory use independent of the
//! number of entries.
//!
//! The main entry point is [`rewrite::CrlRewriter`]. The supporting cast
//! lives in [`entry`] (walking the revoked certificates list), [`sign`]
//! (signature algorithms, the incremental signer, and key identifiers),
//! [`der`] (raw tag and length handling), and [`x509`] (times and serial
//! numbers).

pub mod der;
pub mod entry;
pub mod oid;
pub mod rewrite;
pub mod sign;
pub mod x509;
