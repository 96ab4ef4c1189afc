//! Rewriting a CRL as it streams through.
//!
//! [`CrlRewriter`] applies a set of edits to a DER encoded certificate
//! revocation list without ever holding the whole list in memory: entries
//! can be added and deleted, the CRL number is incremented, the authority
//! key identifier and both timestamps are refreshed, and the result is
//! re-signed with the caller's key. Memory use stays bounded by the largest
//! single field outside the entry list, no matter how many entries the CRL
//! carries.
//!
//! The work happens in two passes over the input. The pre-scan pass walks
//! the entries to find which ones the caller wants deleted and how many
//! bytes they occupy, and collects the trailing signature algorithm,
//! signature, and extensions. The write pass then streams the list a second
//! time, fixing up every enclosing length with the deltas the pre-scan
//! produced and feeding the signer along the way.
//!
//! The pass structure is encoded in types rather than checked at run time:
//! `pre_scan` turns a [`CrlRewriter`] into a [`ScannedCrlRewriter`], `lock`
//! turns that into a [`LockedCrlRewriter`], and `write` consumes the locked
//! value. Calling the phases out of order is a compile error.
//!
//! ```text
//! CrlRewriter::new(..) --pre_scan--> ScannedCrlRewriter --lock-->
//!     LockedCrlRewriter --write--> done
//! ```

use std::{error, fmt, io};
use std::collections::HashSet;
use std::io::{Read, Write};
use bcder::{decode, encode, BitString, Captured, Mode, OctetString, Oid, Tag};
use bcder::decode::Source;
use bcder::encode::{PrimitiveContent, Values};
use bytes::Bytes;
use log::{debug, warn};
use openssl::pkey::{Id, PKey, Private};
use crate::der::{self, CountingReader};
use crate::entry::{CrlEntry, CrlEntryStream, CrlReason};
use crate::oid;
use crate::sign::{ContentSigner, SignatureAlgorithm, SignerError};
use crate::x509::{Serial, Time};


//------------ CrlRewriter ---------------------------------------------------

/// A CRL rewriter in its configuration phase.
///
/// The type parameter is the reader the final content will be streamed
/// from during the write pass. The pre-scan happens over a separate reader
/// for the same data, handed to [`pre_scan`][Self::pre_scan].
pub struct CrlRewriter<R> {
    source: R,
    key: PKey<Private>,
    aki: Bytes,
    algorithm: Option<SignatureAlgorithm>,
    additions: Vec<Captured>,
}

impl<R: io::Read> CrlRewriter<R> {
    /// Creates a rewriter.
    ///
    /// The `aki` value is the content of the authority key identifier
    /// extension that will replace the one in the source CRL; the
    /// [`crate::sign::authority_key_identifier_from_key`] and
    /// [`crate::sign::authority_key_identifier_from_cert`] functions
    /// derive it.
    /// Fails if `key` is not an RSA key, since the write pass needs to
    /// know the signature size before signing.
    pub fn new(
        source: R,
        key: PKey<Private>,
        aki: Bytes,
    ) -> Result<Self, Error> {
        if key.id() != Id::RSA {
            return Err(SignerError::UnsupportedAlgorithm(
                "only RSA private keys are supported".into()
            ).into())
        }
        Ok(CrlRewriter {
            source, key, aki,
            algorithm: None,
            additions: Vec::new(),
        })
    }

    /// Queues a new revocation to be added to the CRL.
    pub fn add(&mut self, serial: Serial, date: Time, reason: CrlReason) {
        self.additions.push(encode_addition(serial, date, reason))
    }

    /// Overrides the signature algorithm of the rewritten CRL.
    ///
    /// Without an override the algorithm the source CRL names is reused.
    /// Note that the streaming write replaces the algorithm identifier in
    /// place, so an override whose encoding differs in length from the
    /// original's fails the write with [`Error::AlgorithmMismatch`].
    pub fn set_signing_algorithm(&mut self, name: &str) -> Result<(), Error> {
        self.algorithm = Some(SignatureAlgorithm::from_name(name)?);
        Ok(())
    }

    /// Returns whether any additions have been queued.
    pub fn has_changes_queued(&self) -> bool {
        !self.additions.is_empty()
    }

    /// Performs the pre-scan pass without deleting anything.
    ///
    /// `scan_source` must be a second reader over the same encoded CRL the
    /// rewriter was created with.
    pub fn pre_scan<S: io::Read>(
        self,
        scan_source: S,
    ) -> Result<ScannedCrlRewriter<R>, Error> {
        self.pre_scan_with(scan_source, |_| false)
    }

    /// Performs the pre-scan pass.
    ///
    /// Every entry of the source CRL is decoded and offered to
    /// `should_delete`; entries it returns `true` for are dropped from the
    /// rewritten CRL.
    pub fn pre_scan_with<S, F>(
        self,
        scan_source: S,
        mut should_delete: F,
    ) -> Result<ScannedCrlRewriter<R>, Error>
    where S: io::Read, F: FnMut(&CrlEntry) -> bool {
        let mut entries = CrlEntryStream::new(scan_source)?;

        if !entries.has_next() {
            // No entry list. The write pass rebuilds such a CRL wholesale
            // instead of patching it, so nothing else needs scanning.
            debug!("source CRL has no entries, will rebuild instead");
            return Ok(ScannedCrlRewriter {
                source: self.source,
                key: self.key,
                aki: self.aki,
                algorithm: self.algorithm,
                additions: self.additions,
                scan: ScanData::empty(),
            })
        }

        let mut deleted = HashSet::new();
        let mut deleted_length = 0u32;
        let mut entry_count = 0u64;
        while entries.has_next() {
            let entry = entries.next_entry()?;
            entry_count += 1;
            if should_delete(&entry) {
                deleted_length += entry.encoded_len() as u32;
                deleted.insert(entry.serial().clone());
            }
        }

        // What follows the entry list: the crlExtensions block if present,
        // then outside the TBSCertList the signature algorithm and the old
        // signature. Tags tell the three apart.
        let mut source = entries.into_inner();
        let mut scanned_algorithm = None;
        let mut old_signature_length = 0u32;
        let mut old_extensions: Option<Vec<u8>> = None;
        loop {
            let tag = match der::read_tag_opt(&mut source)? {
                Some(tag) => tag,
                None => break,
            };
            let tag_number = der::read_tag_number(&mut source, tag)?;
            let length = der::read_length(&mut source)?;
            let value = der::read_value(&mut source, length)?;
            let mut encoded = Vec::with_capacity(value.len() + 5);
            der::write_tag(&mut encoded, tag)?;
            der::write_length(&mut encoded, length)?;
            encoded.extend_from_slice(&value);

            if tag_number == der::SEQUENCE && scanned_algorithm.is_none() {
                scanned_algorithm =
                    Some(SignatureAlgorithm::from_der(&encoded)?);
            }
            else if tag_number == der::BIT_STRING {
                old_signature_length = encoded.len() as u32;
            }
            else if old_extensions.is_none() {
                old_extensions = Some(encoded);
            }
            else {
                return Err(der::Error::Unsupported(
                    "more than one extensions block after the entry list"
                ).into())
            }
        }
        let scanned_algorithm = match scanned_algorithm {
            Some(algorithm) => algorithm,
            None => {
                return Err(der::Error::Malformed(
                    "CRL has no signature algorithm"
                ).into())
            }
        };

        let (new_extensions, extensions_delta) = match old_extensions {
            Some(old) => {
                let new = update_extensions(&old, &self.aki)?;
                let delta = new.as_slice().len() as i64 - old.len() as i64;
                (Some(new), delta)
            }
            None => {
                warn!(
                    "source CRL carries no extensions; \
                     CRL number and authority key identifier are not updated"
                );
                (None, 0)
            }
        };

        debug!(
            "pre-scan: {} entries, {} to delete ({} bytes), signed with {}",
            entry_count, deleted.len(), deleted_length, scanned_algorithm,
        );
        Ok(ScannedCrlRewriter {
            source: self.source,
            key: self.key,
            aki: self.aki,
            algorithm: self.algorithm,
            additions: self.additions,
            scan: ScanData {
                empty_crl: false,
                deleted,
                deleted_length,
                scanned_algorithm: Some(scanned_algorithm),
                old_signature_length,
                new_extensions,
                extensions_delta,
            },
        })
    }
}


//------------ ScannedCrlRewriter --------------------------------------------

/// A CRL rewriter that has completed its pre-scan pass.
///
/// Additions and the algorithm override can still change; the deletions
/// were fixed by the pre-scan.
pub struct ScannedCrlRewriter<R> {
    source: R,
    key: PKey<Private>,
    aki: Bytes,
    algorithm: Option<SignatureAlgorithm>,
    additions: Vec<Captured>,
    scan: ScanData,
}

impl<R: io::Read> ScannedCrlRewriter<R> {
    /// Queues a new revocation to be added to the CRL.
    pub fn add(&mut self, serial: Serial, date: Time, reason: CrlReason) {
        self.additions.push(encode_addition(serial, date, reason))
    }

    /// Overrides the signature algorithm of the rewritten CRL.
    pub fn set_signing_algorithm(&mut self, name: &str) -> Result<(), Error> {
        self.algorithm = Some(SignatureAlgorithm::from_name(name)?);
        Ok(())
    }

    /// Returns whether the rewrite would change the entry list at all.
    pub fn has_changes_queued(&self) -> bool {
        !self.additions.is_empty() || !self.scan.deleted.is_empty()
    }

    /// Freezes the configuration for writing.
    pub fn lock(self) -> LockedCrlRewriter<R> {
        LockedCrlRewriter {
            source: self.source,
            key: self.key,
            aki: self.aki,
            algorithm: self.algorithm,
            additions: self.additions,
            scan: self.scan,
        }
    }
}


//------------ LockedCrlRewriter ---------------------------------------------

/// A CRL rewriter ready to produce output.
pub struct LockedCrlRewriter<R> {
    source: R,
    key: PKey<Private>,
    aki: Bytes,
    algorithm: Option<SignatureAlgorithm>,
    additions: Vec<Captured>,
    scan: ScanData,
}

impl<R: io::Read> LockedCrlRewriter<R> {
    /// Writes the rewritten CRL to `target`.
    ///
    /// This is the streaming pass: input is consumed and output produced
    /// incrementally, with the signature computed over the bytes as they
    /// go out.
    pub fn write<W: io::Write>(self, target: W) -> Result<(), Error> {
        if self.scan.empty_crl {
            self.write_rebuilt(target)
        }
        else {
            self.write_streamed(target)
        }
    }

    fn write_streamed<W: io::Write>(
        self,
        mut target: W,
    ) -> Result<(), Error> {
        let LockedCrlRewriter {
            source, key, aki: _, algorithm, additions, scan
        } = self;
        let algorithm = match algorithm.or(scan.scanned_algorithm) {
            Some(algorithm) => algorithm,
            None => {
                return Err(der::Error::Malformed(
                    "CRL has no signature algorithm"
                ).into())
            }
        };
        let mut signer = ContentSigner::create(algorithm, &key)?;
        let mut source = CountingReader::new(source);

        // An RSA signature is exactly as long as the modulus, so the
        // encoded length of the signature we have yet to compute is
        // already known: that of a zero-filled BIT STRING of that size.
        let rsa = key.rsa().map_err(SignerError::from)?;
        let modulus_length = rsa.size() as u32;
        let new_signature_length = {
            let mut buf = Vec::with_capacity(8);
            der::write_tag(&mut buf, der::BIT_STRING as u8)?;
            der::write_length(&mut buf, modulus_length + 1)?;
            buf.len() as u32 + modulus_length + 1
        };

        let added_length: u32 = additions.iter()
            .map(|addition| addition.as_slice().len() as u32)
            .sum();

        // Outer headers.
        let outer_tag = der::read_tag(&mut source)?;
        der::read_tag_number(&mut source, outer_tag)?;
        let old_outer_length = der::read_length(&mut source)?;
        let tbs_tag = der::read_tag(&mut source)?;
        der::read_tag_number(&mut source, tbs_tag)?;
        let old_tbs_length = der::read_length(&mut source)?;

        // Replay the TBS fields before the entry list into a buffer,
        // swapping the algorithm identifier and refreshing the times as
        // they pass. The buffer ends with the tag of the entry list; its
        // length header is written separately once the delta is known.
        let now = Time::now();
        let mut header = Vec::new();
        let mut algorithm_replaced = false;
        let old_this_update;
        loop {
            let tag = der::read_tag(&mut source)?;
            let tag_number = der::read_tag_number(&mut source, tag)?;
            if tag_number == der::SEQUENCE && !algorithm_replaced {
                replace_algorithm(&mut source, &mut header, algorithm)?;
                algorithm_replaced = true;
            }
            else if tag_number == der::UTC_TIME
                || tag_number == der::GENERALIZED_TIME
            {
                old_this_update =
                    replace_time(&mut source, &mut header, tag_number, now)?;
                break
            }
            else {
                der::write_tag(&mut header, tag)?;
                let length = der::read_length(&mut source)?;
                der::write_length(&mut header, length)?;
                let value = der::read_value(&mut source, length)?;
                header.extend_from_slice(&value);
            }
        }
        let tag = der::read_tag(&mut source)?;
        let tag_number = der::read_tag_number(&mut source, tag)?;
        if tag_number == der::UTC_TIME || tag_number == der::GENERALIZED_TIME {
            shift_next_update(
                &mut source, &mut header, tag_number, now, old_this_update
            )?;
            let tag = der::read_tag(&mut source)?;
            let tag_number = der::read_tag_number(&mut source, tag)?;
            if tag_number != der::SEQUENCE {
                return Err(der::Error::Malformed(
                    "expected the revokedCertificates sequence"
                ).into())
            }
            der::write_tag(&mut header, tag)?;
        }
        else if tag_number == der::SEQUENCE {
            der::write_tag(&mut header, tag)?;
        }
        else {
            return Err(der::Error::Malformed(
                "expected the revokedCertificates sequence"
            ).into())
        }

        // The length deltas ripple outwards: the entry list's content
        // change may resize its length header, both feed into the TBS
        // content change, and so on for the outermost sequence.
        let old_entries_length = der::read_length(&mut source)?;
        let entries_delta =
            i64::from(added_length) - i64::from(scan.deleted_length);
        let new_entries_length = apply_delta(old_entries_length, entries_delta)?;
        let entries_header_delta = der::length_header_size_delta(
            old_entries_length, new_entries_length
        );
        let tbs_delta = entries_delta
            + i64::from(entries_header_delta)
            + scan.extensions_delta;
        let new_tbs_length = apply_delta(old_tbs_length, tbs_delta)?;
        let tbs_header_delta = der::length_header_size_delta(
            old_tbs_length, new_tbs_length
        );
        let signature_delta = i64::from(new_signature_length)
            - i64::from(scan.old_signature_length);
        let outer_delta =
            tbs_delta + i64::from(tbs_header_delta) + signature_delta;
        let new_outer_length = apply_delta(old_outer_length, outer_delta)?;

        // The outer header is not part of the signed data.
        der::write_tag(&mut target, outer_tag)?;
        der::write_length(&mut target, new_outer_length)?;

        {
            let mut signed = SignedTarget {
                target: &mut target,
                signer: &mut signer,
            };
            der::write_tag(&mut signed, tbs_tag)?;
            der::write_length(&mut signed, new_tbs_length)?;
            signed.write_all(&header)?;
            der::write_length(&mut signed, new_entries_length)?;

            let entries_start = source.bytes_read();
            while source.bytes_read() - entries_start
                < u64::from(old_entries_length)
            {
                let tag = der::read_tag(&mut source)?;
                der::read_tag_number(&mut source, tag)?;
                let length = der::read_length(&mut source)?;
                let value = der::read_value(&mut source, length)?;
                if !scan.deleted.is_empty()
                    && scan.deleted.contains(&leading_serial(&value)?)
                {
                    continue
                }
                der::write_tag(&mut signed, tag)?;
                der::write_length(&mut signed, length)?;
                signed.write_all(&value)?;
            }
            if source.bytes_read() - entries_start
                != u64::from(old_entries_length)
            {
                return Err(der::Error::Malformed(
                    "entry list runs past its declared length"
                ).into())
            }

            for addition in &additions {
                signed.write_all(addition.as_ref())?;
            }
            if let Some(ref extensions) = scan.new_extensions {
                signed.write_all(extensions.as_ref())?;
            }
        }

        // Outside the TBSCertList again: the echoed algorithm identifier
        // and the fresh signature, both unsigned.
        target.write_all(&algorithm.encoded())?;
        let signature = signer.sign()?;
        der::write_tag(&mut target, der::BIT_STRING as u8)?;
        der::write_length(&mut target, signature.len() as u32 + 1)?;
        target.write_all(&[0])?;
        target.write_all(&signature)?;
        Ok(())
    }

    /// Rewrites a CRL that has no entry list.
    ///
    /// With no entries there is nothing worth streaming around, and the
    /// source may lack the very fields the streaming pass patches in
    /// place. The CRL is simply decoded and a fresh one built from its
    /// fields and the queued additions.
    fn write_rebuilt<W: io::Write>(self, mut target: W) -> Result<(), Error> {
        let LockedCrlRewriter {
            mut source, key, aki, algorithm, additions, scan: _
        } = self;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        let (old_algorithm, issuer, old_this_update, old_next_update,
             old_extensions) =
            Mode::Der.decode(data.as_slice(), |cons| {
                cons.take_sequence(|cons| {
                    let fields = cons.take_sequence(|cons| {
                        cons.take_opt_primitive_if(
                            Tag::INTEGER, |prim| prim.take_u8()
                        )?;
                        let algorithm = SignatureAlgorithm::take_from(cons)?;
                        let issuer = cons.capture_one()?;
                        let this_update = Time::take_from(cons)?;
                        let next_update = Time::take_opt_from(cons)?;
                        // The entry list may also be present but empty.
                        cons.take_opt_sequence(|cons| {
                            cons.capture_all()?;
                            Ok(())
                        })?;
                        let extensions = cons.capture_all()?;
                        Ok((
                            algorithm, issuer, this_update, next_update,
                            extensions,
                        ))
                    })?;
                    cons.capture_all()?;
                    Ok(fields)
                })
            }).map_err(der::Error::from)?;

        let algorithm = algorithm.unwrap_or(old_algorithm);
        let this_update = Time::now();
        let next_update = old_next_update
            .map(|next| this_update + (next - old_this_update));

        let mut tbs = Captured::builder(Mode::Der);
        tbs.extend(1u8.encode()); // version v2
        tbs.extend(algorithm.encode());
        tbs.extend(&issuer);
        tbs.extend(this_update.encode());
        if let Some(next_update) = next_update {
            tbs.extend(next_update.encode());
        }
        if !additions.is_empty() {
            let mut entries = Captured::builder(Mode::Der);
            for addition in &additions {
                entries.extend(addition);
            }
            tbs.extend(encode::sequence(&entries.freeze()));
        }
        if !old_extensions.as_slice().is_empty() {
            tbs.extend(&update_extensions(old_extensions.as_ref(), &aki)?);
        }
        let tbs = Captured::from_values(
            Mode::Der, encode::sequence(&tbs.freeze())
        );

        let mut signer = ContentSigner::create(algorithm, &key)?;
        signer.update(tbs.as_ref())?;
        let signature = signer.sign()?;

        encode::sequence((
            &tbs,
            algorithm.encode(),
            BitString::new(0, signature.into()).encode(),
        )).write_encoded(Mode::Der, &mut target)?;
        Ok(())
    }
}


//------------ ScanData ------------------------------------------------------

/// What the pre-scan pass learned about the source CRL.
struct ScanData {
    /// The source CRL has no revokedCertificates list at all.
    empty_crl: bool,

    /// Serials of the entries to drop.
    deleted: HashSet<Serial>,

    /// Total encoded size of the dropped entries.
    deleted_length: u32,

    /// The algorithm named by the CRL's own signatureAlgorithm field.
    scanned_algorithm: Option<SignatureAlgorithm>,

    /// The encoded size of the old signature BIT STRING, header included.
    old_signature_length: u32,

    /// The rewritten crlExtensions block, ready to emit.
    new_extensions: Option<Captured>,

    /// Size difference between the new and old extensions blocks.
    extensions_delta: i64,
}

impl ScanData {
    fn empty() -> Self {
        ScanData {
            empty_crl: true,
            deleted: HashSet::new(),
            deleted_length: 0,
            scanned_algorithm: None,
            old_signature_length: 0,
            new_extensions: None,
            extensions_delta: 0,
        }
    }
}


//------------ SignedTarget --------------------------------------------------

/// A writer that feeds everything it writes into a signer as well.
struct SignedTarget<'a, W> {
    target: &'a mut W,
    signer: &'a mut ContentSigner,
}

impl<'a, W: io::Write> io::Write for SignedTarget<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.target.write_all(buf)?;
        self.signer.update(buf).map_err(|err| {
            io::Error::new(io::ErrorKind::Other, err.to_string())
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.target.flush()
    }
}


//------------ Helpers -------------------------------------------------------

/// Encodes a queued addition as a complete CRL entry.
fn encode_addition(serial: Serial, date: Time, reason: CrlReason) -> Captured {
    // The reason code extension value is an ENUMERATED wrapped into the
    // extension's OCTET STRING.
    let reason_value = Bytes::from(vec![0x0a, 0x01, reason.code()]);
    Captured::from_values(Mode::Der, encode::sequence((
        serial.encode(),
        date.encode(),
        encode::sequence(encode::sequence((
            oid::CE_CRL_REASON.encode(),
            OctetString::new(reason_value).encode(),
        ))),
    )))
}

/// Extracts the serial number from the content of an encoded entry.
fn leading_serial(value: &[u8]) -> Result<Serial, Error> {
    let mut source = value;
    let tag = der::read_tag(&mut source)?;
    let tag_number = der::read_tag_number(&mut source, tag)?;
    if tag_number != der::INTEGER {
        return Err(der::Error::Malformed(
            "CRL entry does not start with a serial number"
        ).into())
    }
    let length = der::read_length(&mut source)?;
    let content = der::read_value(&mut source, length)?;
    Ok(Serial::from_integer_content(&content))
}

/// Replaces the algorithm identifier whose tag was just consumed.
///
/// The replacement happens before the lengths further out are known, so
/// it must not change the encoded size.
fn replace_algorithm<R: io::Read, W: io::Write>(
    source: &mut R,
    target: &mut W,
    algorithm: SignatureAlgorithm,
) -> Result<(), Error> {
    let old_length = der::read_length(source)?;
    der::skip_value(source, old_length)?;
    let encoded = algorithm.encoded();
    if encoded.len() as u32 != old_length + 2 {
        return Err(Error::AlgorithmMismatch(
            "signature algorithm encoding differs in length \
             from the original"
        ))
    }
    target.write_all(&encoded)?;
    Ok(())
}

/// Replaces a time value whose tag was just consumed, returning the old one.
fn replace_time<R: io::Read, W: io::Write>(
    source: &mut R,
    target: &mut W,
    tag_number: u32,
    new_time: Time,
) -> Result<Time, Error> {
    let old_length = der::read_length(source)?;
    let old_content = der::read_value(source, old_length)?;
    let old_time = parse_time(tag_number, &old_content)?;
    write_time(target, tag_number, new_time, old_length)?;
    Ok(old_time)
}

/// Replaces the nextUpdate time, preserving its distance from thisUpdate.
fn shift_next_update<R: io::Read, W: io::Write>(
    source: &mut R,
    target: &mut W,
    tag_number: u32,
    now: Time,
    old_this_update: Time,
) -> Result<(), Error> {
    let old_length = der::read_length(source)?;
    let old_content = der::read_value(source, old_length)?;
    let old_next_update = parse_time(tag_number, &old_content)?;
    let new_next_update = now + (old_next_update - old_this_update);
    write_time(target, tag_number, new_next_update, old_length)
}

fn parse_time(tag_number: u32, content: &[u8]) -> Result<Time, Error> {
    match tag_number {
        der::UTC_TIME => Ok(Time::from_utc_content(content)?),
        _ => Ok(Time::from_generalized_content(content)?),
    }
}

fn write_time<W: io::Write>(
    target: &mut W,
    tag_number: u32,
    time: Time,
    old_length: u32,
) -> Result<(), Error> {
    let content = match tag_number {
        der::UTC_TIME => time.utc_content().to_vec(),
        _ => time.generalized_content().to_vec(),
    };
    if content.len() as u32 != old_length {
        return Err(Error::AlgorithmMismatch(
            "replacement time encoding differs in length from the original"
        ))
    }
    der::write_tag(target, tag_number as u8)?;
    der::write_length(target, old_length)?;
    target.write_all(&content)?;
    Ok(())
}

fn apply_delta(length: u32, delta: i64) -> Result<u32, Error> {
    let result = i64::from(length) + delta;
    if result < 0 || result > i64::from(u32::max_value()) {
        return Err(der::Error::Malformed(
            "length adjustment out of range"
        ).into())
    }
    Ok(result as u32)
}

/// Produces the rewritten crlExtensions block.
///
/// The CRL number is incremented by one, the authority key identifier's
/// value is replaced with `aki`, and every other extension passes through
/// with its criticality and order intact.
fn update_extensions(old: &[u8], aki: &Bytes) -> Result<Captured, Error> {
    let extensions = Mode::Der.decode(old, |cons| {
        cons.take_constructed_if(Tag::CTX_0, |cons| {
            cons.take_sequence(|cons| {
                let mut extensions = Captured::builder(Mode::Der);
                while let Some(()) = cons.take_opt_sequence(|cons| {
                    let id = Oid::take_from(cons)?;
                    let critical = cons.take_opt_bool()?;
                    let value = OctetString::take_from(cons)?;
                    if id == oid::CE_CRL_NUMBER {
                        let number = increment_integer(&value.to_bytes())
                            .map_err(|_| decode::Error::Malformed)?;
                        extensions.extend(encode::sequence((
                            oid::CE_CRL_NUMBER.encode(),
                            OctetString::new(number.into()).encode(),
                        )));
                    }
                    else if id == oid::CE_AUTHORITY_KEY_IDENTIFIER {
                        extensions.extend(encode::sequence((
                            oid::CE_AUTHORITY_KEY_IDENTIFIER.encode(),
                            OctetString::new(aki.clone()).encode(),
                        )));
                    }
                    else {
                        let critical = if critical == Some(true) {
                            Some(true.encode())
                        }
                        else {
                            None
                        };
                        extensions.extend(encode::sequence((
                            id.encode(),
                            critical,
                            value.encode(),
                        )));
                    }
                    Ok(())
                })? { }
                Ok(extensions.freeze())
            })
        })
    }).map_err(der::Error::from)?;
    Ok(Captured::from_values(
        Mode::Der,
        encode::sequence_as(Tag::CTX_0, encode::sequence(&extensions)),
    ))
}

/// Adds one to an encoded INTEGER, returning the new encoding.
fn increment_integer(encoded: &[u8]) -> Result<Vec<u8>, der::Error> {
    let mut source = encoded;
    let tag = der::read_tag(&mut source)?;
    if der::read_tag_number(&mut source, tag)? != der::INTEGER {
        return Err(der::Error::Malformed("CRL number is not an INTEGER"))
    }
    let length = der::read_length(&mut source)?;
    let mut content = der::read_value(&mut source, length)?;

    let mut index = content.len();
    loop {
        if index == 0 {
            content.insert(0, 1);
            break
        }
        index -= 1;
        if content[index] == 0xff {
            content[index] = 0;
        }
        else {
            content[index] += 1;
            break
        }
    }
    if content[0] & 0x80 != 0 {
        // Keep the value positive.
        content.insert(0, 0);
    }

    let mut result = Vec::with_capacity(content.len() + 2);
    der::write_tag(&mut result, der::INTEGER as u8)?;
    der::write_length(&mut result, content.len() as u32)?;
    result.extend_from_slice(&content);
    Ok(result)
}


//------------ Error ---------------------------------------------------------

/// An error happened while rewriting a CRL.
#[derive(Debug)]
pub enum Error {
    /// The source CRL could not be parsed.
    Der(der::Error),

    /// Signing failed or was attempted with unsupported material.
    Signer(SignerError),

    /// A field that is replaced in place would change its encoded size.
    AlgorithmMismatch(&'static str),

    /// Writing the output failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Der(ref err) => err.fmt(f),
            Error::Signer(ref err) => err.fmt(f),
            Error::AlgorithmMismatch(msg) => {
                write!(f, "cannot replace in place: {}", msg)
            }
            Error::Io(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Der(ref err) => Some(err),
            Error::Signer(ref err) => Some(err),
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Der(err)
    }
}

impl From<SignerError> for Error {
    fn from(err: SignerError) -> Self {
        Error::Signer(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn increments_integers() {
        fn run(encoded: &[u8]) -> Vec<u8> {
            increment_integer(encoded).unwrap()
        }
        assert_eq!(run(&[0x02, 0x01, 0x00]), [0x02, 0x01, 0x01]);
        assert_eq!(run(&[0x02, 0x01, 0x09]), [0x02, 0x01, 0x0a]);
        assert_eq!(run(&[0x02, 0x01, 0x7f]), [0x02, 0x02, 0x00, 0x80]);
        assert_eq!(run(&[0x02, 0x01, 0xff]), [0x02, 0x02, 0x01, 0x00]);
        assert_eq!(
            run(&[0x02, 0x02, 0x00, 0xff]), [0x02, 0x02, 0x01, 0x00]
        );
        assert_eq!(
            run(&[0x02, 0x02, 0x01, 0x00]), [0x02, 0x02, 0x01, 0x01]
        );
        assert!(increment_integer(&[0x04, 0x01, 0x00]).is_err());
    }

    #[test]
    fn updates_extension_block() {
        let aki = Bytes::from_static(
            &[0x30, 0x16, 0x80, 0x14,
              0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
              0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa]
        );
        let old = Captured::from_values(
            Mode::Der,
            encode::sequence_as(Tag::CTX_0, encode::sequence((
                encode::sequence((
                    oid::CE_CRL_NUMBER.encode(),
                    OctetString::new(
                        Bytes::from_static(&[0x02, 0x01, 0x07])
                    ).encode(),
                )),
                encode::sequence((
                    Oid(Bytes::from_static(&[85, 29, 28])).encode(),
                    true.encode(),
                    OctetString::new(
                        Bytes::from_static(&[0x05, 0x00])
                    ).encode(),
                )),
            ))),
        );
        let new = update_extensions(old.as_ref(), &aki).unwrap();

        let mut number = None;
        let mut issuing_dp = None;
        Mode::Der.decode(new.as_ref(), |cons| {
            cons.take_constructed_if(Tag::CTX_0, |cons| {
                cons.take_sequence(|cons| {
                    while let Some(()) = cons.take_opt_sequence(|cons| {
                        let id = Oid::take_from(cons)?;
                        let critical = cons.take_opt_bool()?;
                        let value = OctetString::take_from(cons)?;
                        if id == oid::CE_CRL_NUMBER {
                            number = Some(value.to_bytes());
                        }
                        else if id != oid::CE_AUTHORITY_KEY_IDENTIFIER {
                            issuing_dp = Some((critical, value.to_bytes()));
                        }
                        Ok(())
                    })? { }
                    Ok(())
                })
            })
        }).unwrap();

        assert_eq!(number.unwrap().as_ref(), &[0x02, 0x01, 0x08]);
        let (critical, value) = issuing_dp.unwrap();
        assert_eq!(critical, Some(true));
        assert_eq!(value.as_ref(), &[0x05, 0x00]);
    }

    #[test]
    fn addition_encoding_shape() {
        let date = Time::from_utc_content(b"240317090559Z").unwrap();
        let addition = encode_addition(
            Serial::from(0x42), date, CrlReason::KeyCompromise
        );
        let encoded = addition.as_slice();
        // SEQUENCE { INTEGER 0x42, UTCTime, SEQUENCE { reason ext } }
        assert_eq!(encoded[0], 0x30);
        assert_eq!(&encoded[2..5], &[0x02, 0x01, 0x42]);
        assert_eq!(encoded[5], 0x17);
        // The reason extension value is ENUMERATED 1 in an OCTET STRING.
        let tail = &encoded[encoded.len() - 5..];
        assert_eq!(tail, &[0x04, 0x03, 0x0a, 0x01, 0x01]);
    }

    #[test]
    fn serial_extraction_from_entry_content() {
        let serial = leading_serial(
            &[0x02, 0x02, 0x04, 0xd2, 0x17, 0x0d]
        ).unwrap();
        assert_eq!(serial, Serial::from(1234));
        assert!(leading_serial(&[0x30, 0x00]).is_err());
    }
}
