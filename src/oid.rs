//! The object identifiers used in this crate.
//!
//! This module collects all the object identifiers used at various places
//! in this crate in one central place. They are public so you can refer to
//! them should that ever become necessary.

use bcder::{ConstOid, Oid};

/// [RFC 4055](https://tools.ietf.org/html/rfc4055) `sha1WithRSAEncryption`
///
/// Identifies the PKCS #1 version 1.5 signature algorithm with SHA-1.
pub const SHA1_WITH_RSA_ENCRYPTION: ConstOid
    = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 5]);

/// [RFC 4055](https://tools.ietf.org/html/rfc4055) `sha256WithRSAEncryption`
///
/// Identifies the PKCS #1 version 1.5 signature algorithm with SHA-256.
pub const SHA256_WITH_RSA_ENCRYPTION: ConstOid
    = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 11]);

/// [RFC 4055](https://tools.ietf.org/html/rfc4055) `sha384WithRSAEncryption`
///
/// Identifies the PKCS #1 version 1.5 signature algorithm with SHA-384.
pub const SHA384_WITH_RSA_ENCRYPTION: ConstOid
    = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 12]);

/// [RFC 4055](https://tools.ietf.org/html/rfc4055) `sha512WithRSAEncryption`
///
/// Identifies the PKCS #1 version 1.5 signature algorithm with SHA-512.
pub const SHA512_WITH_RSA_ENCRYPTION: ConstOid
    = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 13]);

/// [RFC 5280](https://tools.ietf.org/html/rfc5280) `id-ce-cRLNumber`
///
/// Identifies the CRL number extension.
pub const CE_CRL_NUMBER: ConstOid = Oid(&[85, 29, 20]);

/// [RFC 5280](https://tools.ietf.org/html/rfc5280) `id-ce-cRLReasons`
///
/// Identifies the reason code CRL entry extension.
pub const CE_CRL_REASON: ConstOid = Oid(&[85, 29, 21]);

/// [RFC 5280](https://tools.ietf.org/html/rfc5280)
/// `id-ce-authorityKeyIdentifier`
///
/// Identifies the authority key identifier extension.
pub const CE_AUTHORITY_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 35]);
