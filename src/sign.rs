//! Signing support for rewritten CRLs.
//!
//! Everything cryptographic lives here: the restricted set of signature
//! algorithms a CRL may be re-signed with, the incremental signer that the
//! write pass feeds while it streams, and derivation of the authority key
//! identifier from the issuing key.
//!
//! Only the PKCS #1 version 1.5 RSA algorithms are supported. This is not
//! just a matter of OID tables: the rewriter predicts the encoded size of
//! the future signature before any data has been signed, which works for
//! RSA because a signature is always exactly as long as the modulus.

use std::{error, fmt};
use bcder::{decode, encode, Oid, Tag};
use bcder::encode::PrimitiveContent;
use bytes::Bytes;
use openssl::error::ErrorStack;
use openssl::md::{Md, MdRef};
use openssl::md_ctx::MdCtx;
use openssl::pkey::{HasPublic, Id, PKeyRef, Private};
use openssl::sha;
use openssl::x509::X509Ref;
use crate::{der, oid};


//------------ SignatureAlgorithm --------------------------------------------

/// A signature algorithm a CRL can be signed with.
///
/// Besides the digest choice, the value remembers whether the algorithm
/// identifier carried the optional NULL parameter. RFC 4055 wants it
/// present but deployed CRLs exist both ways, and the streaming rewriter
/// must reproduce an identifier of the same encoded length as the one it
/// replaces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SignatureAlgorithm {
    digest: Digest,
    has_parameter: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Digest {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    /// Creates a value from a JCA-style algorithm name.
    ///
    /// The name is matched case-insensitively and must name an RSA
    /// algorithm, e.g. `"SHA256withRSA"`. Identifiers built this way carry
    /// the NULL parameter.
    pub fn from_name(name: &str) -> Result<Self, SignerError> {
        let lower = name.to_lowercase();
        if !lower.contains("rsa") {
            return Err(SignerError::UnsupportedAlgorithm(
                format!("'{}' is not an RSA signature algorithm", name)
            ))
        }
        let digest = if lower.contains("sha256") {
            Digest::Sha256
        }
        else if lower.contains("sha384") {
            Digest::Sha384
        }
        else if lower.contains("sha512") {
            Digest::Sha512
        }
        else if lower.contains("sha1") {
            Digest::Sha1
        }
        else {
            return Err(SignerError::UnsupportedAlgorithm(
                format!("'{}' does not name a supported digest", name)
            ))
        };
        Ok(SignatureAlgorithm { digest, has_parameter: true })
    }

    /// Creates a value from an encoded AlgorithmIdentifier.
    pub fn from_der(encoded: &[u8]) -> Result<Self, SignerError> {
        Self::parse_der(encoded).map_err(|_| {
            SignerError::UnsupportedAlgorithm(
                "unparseable algorithm identifier".into()
            )
        })?.ok_or_else(|| {
            SignerError::UnsupportedAlgorithm(
                "CRL is signed with an algorithm other than RSA".into()
            )
        })
    }

    fn parse_der(encoded: &[u8]) -> Result<Option<Self>, der::Error> {
        let mut source = encoded;
        let tag = der::read_tag(&mut source)?;
        let tag_number = der::read_tag_number(&mut source, tag)?;
        if tag_number != der::SEQUENCE || tag & der::CONSTRUCTED == 0 {
            return Err(der::Error::Malformed(
                "algorithm identifier is not a sequence"
            ))
        }
        der::read_length(&mut source)?;
        let tag = der::read_tag(&mut source)?;
        if tag != 0x06 {
            return Err(der::Error::Malformed(
                "algorithm identifier does not start with an OID"
            ))
        }
        let length = der::read_length(&mut source)?;
        let content = der::read_value(&mut source, length)?;
        let digest = match Self::digest_for_oid(&content) {
            Some(digest) => digest,
            None => return Ok(None),
        };
        let has_parameter = !source.is_empty();
        Ok(Some(SignatureAlgorithm { digest, has_parameter }))
    }

    fn digest_for_oid(content: &[u8]) -> Option<Digest> {
        if content == oid::SHA1_WITH_RSA_ENCRYPTION.0 {
            Some(Digest::Sha1)
        }
        else if content == oid::SHA256_WITH_RSA_ENCRYPTION.0 {
            Some(Digest::Sha256)
        }
        else if content == oid::SHA384_WITH_RSA_ENCRYPTION.0 {
            Some(Digest::Sha384)
        }
        else if content == oid::SHA512_WITH_RSA_ENCRYPTION.0 {
            Some(Digest::Sha512)
        }
        else {
            None
        }
    }

    /// Takes an algorithm identifier from a constructed value.
    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let id = Oid::take_from(cons)?;
            let has_parameter = cons.take_opt_primitive_if(
                Tag::NULL, |_| Ok(())
            )?.is_some();
            let digest = if id == oid::SHA1_WITH_RSA_ENCRYPTION {
                Digest::Sha1
            }
            else if id == oid::SHA256_WITH_RSA_ENCRYPTION {
                Digest::Sha256
            }
            else if id == oid::SHA384_WITH_RSA_ENCRYPTION {
                Digest::Sha384
            }
            else if id == oid::SHA512_WITH_RSA_ENCRYPTION {
                Digest::Sha512
            }
            else {
                return Err(decode::Malformed.into())
            };
            Ok(SignatureAlgorithm { digest, has_parameter })
        })
    }

    /// Returns the complete DER encoding of the algorithm identifier.
    pub fn encoded(self) -> Vec<u8> {
        let Oid(oid_content) = self.oid();
        let mut content_len = 2 + oid_content.len();
        if self.has_parameter {
            content_len += 2;
        }
        let mut encoded = Vec::with_capacity(content_len + 2);
        encoded.push(0x30);
        encoded.push(content_len as u8);
        encoded.push(0x06);
        encoded.push(oid_content.len() as u8);
        encoded.extend_from_slice(oid_content);
        if self.has_parameter {
            encoded.extend_from_slice(&[0x05, 0x00]);
        }
        encoded
    }

    /// Returns a value encoder for the algorithm identifier.
    pub fn encode(self) -> impl encode::Values {
        let parameter = if self.has_parameter {
            Some(().encode())
        }
        else {
            None
        };
        encode::sequence((self.oid().encode(), parameter))
    }

    fn oid(self) -> bcder::ConstOid {
        match self.digest {
            Digest::Sha1 => oid::SHA1_WITH_RSA_ENCRYPTION,
            Digest::Sha256 => oid::SHA256_WITH_RSA_ENCRYPTION,
            Digest::Sha384 => oid::SHA384_WITH_RSA_ENCRYPTION,
            Digest::Sha512 => oid::SHA512_WITH_RSA_ENCRYPTION,
        }
    }

    fn message_digest(self) -> &'static MdRef {
        match self.digest {
            Digest::Sha1 => Md::sha1(),
            Digest::Sha256 => Md::sha256(),
            Digest::Sha384 => Md::sha384(),
            Digest::Sha512 => Md::sha512(),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self.digest {
            Digest::Sha1 => "SHA1withRSA",
            Digest::Sha256 => "SHA256withRSA",
            Digest::Sha384 => "SHA384withRSA",
            Digest::Sha512 => "SHA512withRSA",
        };
        f.write_str(name)
    }
}


//------------ ContentSigner -------------------------------------------------

/// An incremental RSA signer.
///
/// The write pass feeds it the TBS certificate list byte by byte as it
/// streams out, so the data being signed never has to exist in one buffer.
pub struct ContentSigner {
    ctx: MdCtx,
    algorithm: SignatureAlgorithm,
}

impl ContentSigner {
    /// Creates a signer for the given algorithm and key.
    pub fn create(
        algorithm: SignatureAlgorithm,
        key: &PKeyRef<Private>,
    ) -> Result<Self, SignerError> {
        if key.id() != Id::RSA {
            return Err(SignerError::UnsupportedAlgorithm(
                "only RSA private keys are supported".into()
            ))
        }
        let mut ctx = MdCtx::new()?;
        ctx.digest_sign_init(Some(algorithm.message_digest()), key)?;
        Ok(ContentSigner { ctx, algorithm })
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Feeds data into the signature.
    pub fn update(&mut self, data: &[u8]) -> Result<(), SignerError> {
        self.ctx.digest_sign_update(data)?;
        Ok(())
    }

    /// Finishes and returns the raw signature.
    pub fn sign(mut self) -> Result<Vec<u8>, SignerError> {
        let mut signature = Vec::new();
        self.ctx.digest_sign_final_to_vec(&mut signature)?;
        Ok(signature)
    }
}


//------------ Authority key identifiers -------------------------------------

/// Derives the authority key identifier extension value from a CA key.
///
/// This is the RFC 5280 method one identifier: the SHA-1 digest of the
/// PKCS #1 `RSAPublicKey` encoding, wrapped as
/// `AuthorityKeyIdentifier { [0] keyIdentifier }`.
pub fn authority_key_identifier_from_key<T: HasPublic>(
    key: &PKeyRef<T>,
) -> Result<Bytes, SignerError> {
    if key.id() != Id::RSA {
        return Err(SignerError::UnsupportedAlgorithm(
            "only RSA public keys are supported".into()
        ))
    }
    let rsa = key.rsa()?;
    let digest = sha::sha1(&rsa.public_key_to_der_pkcs1()?);
    let mut value = Vec::with_capacity(24);
    value.extend_from_slice(&[0x30, 0x16, 0x80, 0x14]);
    value.extend_from_slice(&digest);
    Ok(value.into())
}

/// Derives the authority key identifier extension value from a CA
/// certificate.
pub fn authority_key_identifier_from_cert(
    cert: &X509Ref,
) -> Result<Bytes, SignerError> {
    let key = cert.public_key()?;
    authority_key_identifier_from_key(&key)
}


//------------ SignerError ---------------------------------------------------

/// An error happened while creating or using a signer.
#[derive(Debug)]
pub enum SignerError {
    /// The algorithm or key is outside what this crate signs with.
    UnsupportedAlgorithm(String),

    /// The underlying crypto library failed.
    Signing(ErrorStack),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SignerError::UnsupportedAlgorithm(ref msg) => {
                write!(f, "unsupported algorithm: {}", msg)
            }
            SignerError::Signing(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for SignerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            SignerError::Signing(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<ErrorStack> for SignerError {
    fn from(err: ErrorStack) -> Self {
        SignerError::Signing(err)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod test {
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::sign::Verifier;
    use openssl::x509::X509;
    use super::*;

    #[test]
    fn algorithm_names() {
        for name in
            &["SHA256withRSA", "sha256WithRSAEncryption", "SHA256WITHRSA"]
        {
            let alg = SignatureAlgorithm::from_name(name).unwrap();
            assert_eq!(alg.to_string(), "SHA256withRSA");
        }
        assert!(SignatureAlgorithm::from_name("SHA1withRSA").is_ok());
        assert!(SignatureAlgorithm::from_name("SHA384withRSA").is_ok());
        assert!(SignatureAlgorithm::from_name("SHA512withRSA").is_ok());
        assert!(matches!(
            SignatureAlgorithm::from_name("SHA256withECDSA"),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            SignatureAlgorithm::from_name("MD5withRSA"),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn der_round_trip() {
        let alg = SignatureAlgorithm::from_name("SHA256withRSA").unwrap();
        let encoded = alg.encoded();
        assert_eq!(encoded.len(), 15);
        assert_eq!(SignatureAlgorithm::from_der(&encoded).unwrap(), alg);
    }

    #[test]
    fn parameter_presence_is_preserved() {
        // sha256WithRSAEncryption without the NULL parameter.
        let bare = [
            0x30, 0x0b, 0x06, 0x09,
            0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b,
        ];
        let alg = SignatureAlgorithm::from_der(&bare).unwrap();
        assert_eq!(alg.encoded(), bare);
        assert_ne!(
            alg,
            SignatureAlgorithm::from_name("SHA256withRSA").unwrap()
        );
    }

    #[test]
    fn rejects_foreign_oid() {
        // ecdsa-with-SHA256.
        let ecdsa = [
            0x30, 0x0a, 0x06, 0x08,
            0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02,
        ];
        assert!(matches!(
            SignatureAlgorithm::from_der(&ecdsa),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn incremental_signature_verifies() {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let alg = SignatureAlgorithm::from_name("SHA256withRSA").unwrap();
        let mut signer = ContentSigner::create(alg, &key).unwrap();
        signer.update(b"hello ").unwrap();
        signer.update(b"world").unwrap();
        let signature = signer.sign().unwrap();
        assert_eq!(signature.len(), 256);

        let mut verifier =
            Verifier::new(MessageDigest::sha256(), &key).unwrap();
        verifier.update(b"hello world").unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn key_identifier_shape() {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let aki = authority_key_identifier_from_key(&key).unwrap();
        assert_eq!(aki.len(), 24);
        assert_eq!(&aki[..4], &[0x30, 0x16, 0x80, 0x14]);
    }

    #[test]
    fn key_identifier_from_cert_matches_key() {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut builder = X509::builder().unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();
        assert_eq!(
            authority_key_identifier_from_cert(&cert).unwrap(),
            authority_key_identifier_from_key(&key).unwrap()
        );
    }
}
