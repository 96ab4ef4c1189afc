//! Iterating over the entries of an encoded CRL.
//!
//! [`CrlEntryStream`] walks the `revokedCertificates` list of a DER encoded
//! certificate revocation list directly off an `io::Read`, holding no more
//! than one entry in memory at a time. Decoding of the individual entries
//! is pluggable through the [`EntryDecoder`] trait so that deployments with
//! private entry extensions can still make deletion decisions; the
//! [`DefaultEntryDecoder`] handles the RFC 5280 shape.

use std::io;
use bcder::{Mode, Tag};
use bytes::Bytes;
use crate::der::{self, CountingReader};
use crate::x509::{Serial, Time};


//------------ CrlReason -----------------------------------------------------

/// The reason a certificate was revoked.
///
/// The values are the RFC 5280 reason codes. Value 7 is unassigned there
/// and has no variant here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrlReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl CrlReason {
    /// Returns the value of the reason in the reason code extension.
    pub fn code(self) -> u8 {
        match self {
            CrlReason::Unspecified => 0,
            CrlReason::KeyCompromise => 1,
            CrlReason::CaCompromise => 2,
            CrlReason::AffiliationChanged => 3,
            CrlReason::Superseded => 4,
            CrlReason::CessationOfOperation => 5,
            CrlReason::CertificateHold => 6,
            CrlReason::RemoveFromCrl => 8,
            CrlReason::PrivilegeWithdrawn => 9,
            CrlReason::AaCompromise => 10,
        }
    }
}


//------------ CrlEntry ------------------------------------------------------

/// An entry in the revoked certificates list.
#[derive(Clone, Debug)]
pub struct CrlEntry {
    /// The serial number of the revoked certificate.
    serial: Serial,

    /// The time of revocation.
    revocation_date: Time,

    /// The raw crlEntryExtensions, if present.
    extensions: Option<Bytes>,

    /// The size of the entry's complete encoding, header included.
    encoded_len: usize,
}

impl CrlEntry {
    pub fn new(
        serial: Serial,
        revocation_date: Time,
        extensions: Option<Bytes>,
    ) -> Self {
        CrlEntry { serial, revocation_date, extensions, encoded_len: 0 }
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    pub fn revocation_date(&self) -> Time {
        self.revocation_date
    }

    pub fn extensions(&self) -> Option<&Bytes> {
        self.extensions.as_ref()
    }

    /// Returns the size of the entry's encoding within the CRL.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}


//------------ EntryDecoder --------------------------------------------------

/// A decoder for individual CRL entries.
///
/// Implementations receive the complete DER encoding of one entry and
/// produce a [`CrlEntry`] from it.
pub trait EntryDecoder {
    fn decode_entry(&self, der: Bytes) -> Result<CrlEntry, der::Error>;
}


//------------ DefaultEntryDecoder -------------------------------------------

/// The decoder for entries following the plain RFC 5280 grammar.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEntryDecoder;

impl EntryDecoder for DefaultEntryDecoder {
    fn decode_entry(&self, der: Bytes) -> Result<CrlEntry, der::Error> {
        Mode::Der.decode(der.as_ref(), |cons| {
            cons.take_sequence(|cons| {
                let serial = cons.take_primitive_if(Tag::INTEGER, |prim| {
                    prim.take_all().map(
                        |content| Serial::from_integer_content(content.as_ref())
                    )
                })?;
                let revocation_date = Time::take_from(cons)?;
                let extensions = cons.capture_all()?.into_bytes();
                let extensions = if extensions.is_empty() {
                    None
                }
                else {
                    Some(extensions)
                };
                Ok(CrlEntry::new(serial, revocation_date, extensions))
            })
        }).map_err(Into::into)
    }
}


//------------ CrlEntryStream ------------------------------------------------

/// A streaming reader over the entries of an encoded CRL.
///
/// Construction consumes everything up to and including the header of the
/// `revokedCertificates` list. After that, entries can be pulled one at a
/// time; once `has_next` turns false the underlying stream sits exactly at
/// the first byte after the list and can be reclaimed with `into_inner`.
pub struct CrlEntryStream<R, D = DefaultEntryDecoder> {
    source: CountingReader<R>,

    /// The content length of the revokedCertificates list.
    budget: u32,

    /// The stream position right after the list's header.
    entries_start: u64,

    decoder: D,
}

impl<R: io::Read> CrlEntryStream<R> {
    pub fn new(source: R) -> Result<Self, der::Error> {
        Self::with_decoder(source, DefaultEntryDecoder)
    }
}

impl<R: io::Read, D: EntryDecoder> CrlEntryStream<R, D> {
    pub fn with_decoder(source: R, decoder: D) -> Result<Self, der::Error> {
        let mut source = CountingReader::new(source);

        // CertificateList and TBSCertList headers.
        let tag = der::read_tag(&mut source)?;
        der::read_tag_number(&mut source, tag)?;
        der::read_length(&mut source)?;
        let tag = der::read_tag(&mut source)?;
        der::read_tag_number(&mut source, tag)?;
        let tbs_length = der::read_length(&mut source)?;
        let tbs_start = source.bytes_read();

        // Version, signature, and issuer precede thisUpdate. None of them
        // is a time, so skipping values until one appears lands right
        // behind thisUpdate whether or not the optional version is there.
        loop {
            let tag = der::read_tag(&mut source)?;
            let tag_number = der::read_tag_number(&mut source, tag)?;
            let length = der::read_length(&mut source)?;
            der::skip_value(&mut source, length)?;
            if tag_number == der::UTC_TIME
                || tag_number == der::GENERALIZED_TIME
            {
                break
            }
        }

        let budget = Self::read_list_header(
            &mut source, tbs_start, u64::from(tbs_length)
        )?;
        let entries_start = source.bytes_read();
        Ok(CrlEntryStream { source, budget, entries_start, decoder })
    }

    /// Positions the stream behind the revokedCertificates header.
    ///
    /// The list is optional and so is the nextUpdate time before it, so
    /// what follows thisUpdate is decided by the next tag and by how much
    /// of the TBSCertList is left. Returns the list's content length, zero
    /// if it is absent.
    fn read_list_header(
        source: &mut CountingReader<R>,
        tbs_start: u64,
        tbs_length: u64,
    ) -> Result<u32, der::Error> {
        if source.bytes_read() - tbs_start >= tbs_length {
            return Ok(0)
        }
        let tag = der::read_tag(source)?;
        let mut tag_number = der::read_tag_number(source, tag)?;
        if tag_number == der::UTC_TIME || tag_number == der::GENERALIZED_TIME {
            let length = der::read_length(source)?;
            der::skip_value(source, length)?;
            if source.bytes_read() - tbs_start >= tbs_length {
                return Ok(0)
            }
            let tag = der::read_tag(source)?;
            tag_number = der::read_tag_number(source, tag)?;
        }
        if tag_number == der::SEQUENCE {
            der::read_length(source)
        }
        else {
            // Only the crlExtensions block remains.
            Ok(0)
        }
    }

    /// Returns whether another entry follows.
    pub fn has_next(&self) -> bool {
        self.consumed() < u64::from(self.budget)
    }

    /// Reads and decodes the next entry.
    pub fn next_entry(&mut self) -> Result<CrlEntry, der::Error> {
        let tag = der::read_tag(&mut self.source)?;
        let tag_number = der::read_tag_number(&mut self.source, tag)?;
        if tag_number != der::SEQUENCE {
            return Err(der::Error::Malformed(
                "CRL entry is not a sequence"
            ))
        }
        let length = der::read_length(&mut self.source)?;
        if u64::from(length) > self.remaining() {
            return Err(der::Error::Truncated)
        }
        let value = der::read_value(&mut self.source, length)?;

        // Hand the decoder a self-contained encoding of the entry.
        let mut encoded = Vec::with_capacity(value.len() + 5);
        der::write_tag(&mut encoded, tag)?;
        der::write_length(&mut encoded, length)?;
        encoded.extend_from_slice(&value);
        let encoded_len = encoded.len();
        let mut entry = self.decoder.decode_entry(encoded.into())?;
        entry.encoded_len = encoded_len;
        Ok(entry)
    }

    /// Unwraps the stream, returning the underlying reader.
    ///
    /// The reader sits at the first byte after the last consumed entry.
    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }

    fn consumed(&self) -> u64 {
        self.source.bytes_read() - self.entries_start
    }

    fn remaining(&self) -> u64 {
        u64::from(self.budget).saturating_sub(self.consumed())
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod test {
    use bcder::{Captured, OctetString};
    use bcder::encode::{self, PrimitiveContent, Values};
    use crate::oid;
    use super::*;

    fn entry_values(serial: u64, with_reason: bool) -> Captured {
        let date = Time::from_utc_content(b"240317090559Z").unwrap();
        let extensions = if with_reason {
            Some(encode::sequence(encode::sequence((
                oid::CE_CRL_REASON.encode(),
                OctetString::new(
                    Bytes::from_static(&[0x0a, 0x01, 0x01])
                ).encode(),
            ))))
        }
        else {
            None
        };
        Captured::from_values(Mode::Der, encode::sequence((
            Serial::from(serial).encode(),
            date.encode(),
            extensions,
        )))
    }

    fn fake_crl(entries: &[Captured], with_list: bool) -> Vec<u8> {
        let mut list = Captured::builder(Mode::Der);
        for entry in entries {
            list.extend(entry);
        }
        let list = list.freeze();
        let this_update = Time::from_utc_content(b"240317090559Z").unwrap();
        let revoked = if with_list {
            Some(encode::sequence(&list))
        }
        else {
            None
        };
        let tbs = encode::sequence((
            (
                1u8.encode(),
                encode::sequence((
                    oid::SHA256_WITH_RSA_ENCRYPTION.encode(),
                    ().encode(),
                )),
                encode::sequence(Captured::empty(Mode::Der)),
            ),
            (
                this_update.encode(),
                revoked,
                encode::sequence_as(
                    Tag::CTX_0,
                    encode::sequence(Captured::empty(Mode::Der)),
                ),
            ),
        ));
        let crl = encode::sequence((
            tbs,
            encode::sequence((
                oid::SHA256_WITH_RSA_ENCRYPTION.encode(),
                ().encode(),
            )),
            b"\x00fake".as_ref().encode_as(Tag::BIT_STRING),
        ));
        let mut target = Vec::new();
        crl.write_encoded(Mode::Der, &mut target).unwrap();
        target
    }

    #[test]
    fn reads_all_entries() {
        let data = fake_crl(
            &[entry_values(12, false), entry_values(0x4321, true)],
            true,
        );
        let mut stream = CrlEntryStream::new(data.as_slice()).unwrap();

        assert!(stream.has_next());
        let entry = stream.next_entry().unwrap();
        assert_eq!(entry.serial(), &Serial::from(12));
        assert!(entry.extensions().is_none());
        assert!(entry.encoded_len() > 0);

        assert!(stream.has_next());
        let entry = stream.next_entry().unwrap();
        assert_eq!(entry.serial(), &Serial::from(0x4321));
        assert!(entry.extensions().is_some());

        assert!(!stream.has_next());
    }

    #[test]
    fn empty_list_has_no_entries() {
        let data = fake_crl(&[], true);
        let stream = CrlEntryStream::new(data.as_slice()).unwrap();
        assert!(!stream.has_next());
    }

    #[test]
    fn absent_list_has_no_entries() {
        let data = fake_crl(&[], false);
        let stream = CrlEntryStream::new(data.as_slice()).unwrap();
        assert!(!stream.has_next());
    }

    #[test]
    fn entry_sizes_sum_to_list_length() {
        let entries = [entry_values(1, true), entry_values(2, false)];
        let expected: usize = entries.iter()
            .map(|entry| entry.as_slice().len())
            .sum();
        let data = fake_crl(&entries, true);
        let mut stream = CrlEntryStream::new(data.as_slice()).unwrap();
        let mut total = 0;
        while stream.has_next() {
            total += stream.next_entry().unwrap().encoded_len();
        }
        assert_eq!(total, expected);
    }

    #[test]
    fn truncated_entry_is_reported() {
        let data = fake_crl(&[entry_values(7, false)], true);
        // Cut the stream in the middle of the entry.
        let mut stream = CrlEntryStream::new(&data[..data.len() - 40]).unwrap();
        assert!(stream.has_next());
        assert!(matches!(
            stream.next_entry(),
            Err(der::Error::Truncated)
        ));
    }
}
