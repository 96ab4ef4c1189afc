//! Low-level DER tag and length handling over byte streams.
//!
//! The rest of the crate uses [bcder] wherever a value is materialized in
//! memory anyway. This module exists for the places where that is exactly
//! what must not happen: walking a CRL that is larger than we are willing
//! to buffer. It provides just enough of X.690 to do that, namely reading
//! and writing identifier and length octets over plain `io::Read` and
//! `io::Write`, plus a byte-counting reader so callers can track their
//! position inside nested definite-length values.
//!
//! Only definite lengths are supported. The indefinite form is not allowed
//! in DER, and the high-tag-number form does not appear in the CRL grammar,
//! so both are rejected as unsupported rather than parsed.
//!
//! [bcder]: https://crates.io/crates/bcder

use std::{error, fmt, io};
use std::io::Read;
use bcder::decode;


//------------ Tag and class constants ---------------------------------------

/// The bit flagging a constructed value in the identifier octet.
pub const CONSTRUCTED: u8 = 0x20;

/// The tag number of the universal INTEGER type.
pub const INTEGER: u32 = 0x02;

/// The tag number of the universal BIT STRING type.
pub const BIT_STRING: u32 = 0x03;

/// The tag number of the universal SEQUENCE type.
pub const SEQUENCE: u32 = 0x10;

/// The tag number of the universal UTCTime type.
pub const UTC_TIME: u32 = 0x17;

/// The tag number of the universal GeneralizedTime type.
pub const GENERALIZED_TIME: u32 = 0x18;


//------------ Reading -------------------------------------------------------

/// Reads the next identifier octet from `source`.
///
/// Fails with [`Error::Malformed`] if the stream ends before the octet or
/// if the octet is `0x00`, the first half of an end-of-contents marker,
/// which only appears with indefinite lengths and thus never in DER.
pub fn read_tag<R: io::Read>(source: &mut R) -> Result<u8, Error> {
    match read_byte(source)? {
        Some(0) => {
            Err(Error::Malformed("end-of-contents octet is not allowed in DER"))
        }
        Some(tag) => Ok(tag),
        None => Err(Error::Malformed("unexpected end of stream")),
    }
}

/// Reads the next identifier octet, allowing the stream to end first.
///
/// Returns `Ok(None)` upon a clean end of stream. This is how the walk over
/// the values trailing the TBS certificate list terminates.
pub fn read_tag_opt<R: io::Read>(source: &mut R) -> Result<Option<u8>, Error> {
    match read_byte(source)? {
        Some(0) => {
            Err(Error::Malformed("end-of-contents octet is not allowed in DER"))
        }
        other => Ok(other),
    }
}

/// Extracts the tag number from an identifier octet.
///
/// If the octet announces the high-tag-number form, the continuation
/// octets are consumed from `source` so that the stream is left at a value
/// boundary, and the form is rejected. The CRL grammar only contains
/// universal and low context tags.
pub fn read_tag_number<R: io::Read>(
    source: &mut R,
    tag: u8,
) -> Result<u32, Error> {
    let number = u32::from(tag & 0x1f);
    if number == 0x1f {
        while let Some(octet) = read_byte(source)? {
            if octet & 0x80 == 0 {
                break
            }
        }
        return Err(Error::Unsupported("high-tag-number form"))
    }
    Ok(number)
}

/// Reads a definite length from `source`.
///
/// Fails with [`Error::Unsupported`] for the indefinite-length marker and
/// for long-form lengths of more than four octets.
pub fn read_length<R: io::Read>(source: &mut R) -> Result<u32, Error> {
    let first = match read_byte(source)? {
        Some(octet) => octet,
        None => return Err(Error::Truncated),
    };
    if first == 0x80 {
        return Err(Error::Unsupported("indefinite length"))
    }
    if first & 0x80 == 0 {
        return Ok(u32::from(first))
    }
    let count = usize::from(first & 0x7f);
    if count > 4 {
        return Err(Error::Unsupported("length of more than four octets"))
    }
    let mut length = 0u32;
    for _ in 0..count {
        let octet = match read_byte(source)? {
            Some(octet) => octet,
            None => return Err(Error::Truncated),
        };
        length = length << 8 | u32::from(octet);
    }
    Ok(length)
}

/// Reads `length` content octets into a fresh buffer.
pub fn read_value<R: io::Read>(
    source: &mut R,
    length: u32,
) -> Result<Vec<u8>, Error> {
    let mut value = vec![0u8; length as usize];
    match source.read_exact(&mut value) {
        Ok(()) => Ok(value),
        Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::Truncated)
        }
        Err(err) => Err(Error::Io(err)),
    }
}

/// Discards `length` content octets from `source`.
pub fn skip_value<R: io::Read>(
    source: &mut R,
    length: u32,
) -> Result<(), Error> {
    let copied = io::copy(
        &mut source.by_ref().take(u64::from(length)),
        &mut io::sink(),
    ).map_err(Error::Io)?;
    if copied < u64::from(length) {
        Err(Error::Truncated)
    }
    else {
        Ok(())
    }
}

fn read_byte<R: io::Read>(source: &mut R) -> Result<Option<u8>, Error> {
    let mut buf = [0u8; 1];
    match source.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf[0])),
        Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(Error::Io(err)),
    }
}


//------------ Writing -------------------------------------------------------

/// Writes a single identifier octet.
///
/// The high-tag-number form cannot be expressed in one octet and is
/// rejected, matching what `read_tag_number` accepts.
pub fn write_tag<W: io::Write>(target: &mut W, tag: u8) -> Result<(), Error> {
    if tag & 0x1f == 0x1f {
        return Err(Error::Unsupported("high-tag-number form"))
    }
    target.write_all(&[tag]).map_err(Error::Io)
}

/// Writes `length` in the shortest definite form.
pub fn write_length<W: io::Write>(
    target: &mut W,
    length: u32,
) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(5);
    encode_length(length, &mut buf);
    target.write_all(&buf).map_err(Error::Io)
}

/// Returns how many bytes a length header grows or shrinks by.
///
/// When a value's content length changes, the length octets themselves may
/// change size, which in turn changes the content length of every enclosing
/// value. This derives the difference by encoding both lengths rather than
/// by reasoning about boundaries.
pub fn length_header_size_delta(before: u32, after: u32) -> i32 {
    let mut old = Vec::with_capacity(5);
    let mut new = Vec::with_capacity(5);
    encode_length(before, &mut old);
    encode_length(after, &mut new);
    new.len() as i32 - old.len() as i32
}

fn encode_length(length: u32, target: &mut Vec<u8>) {
    if length < 0x80 {
        target.push(length as u8);
        return
    }
    let octets = length.to_be_bytes();
    let mut skip = 0;
    while skip < 3 && octets[skip] == 0 {
        skip += 1
    }
    target.push(0x80 | (4 - skip) as u8);
    target.extend_from_slice(&octets[skip..]);
}


//------------ CountingReader ------------------------------------------------

/// A reader that keeps track of how many bytes have been consumed.
///
/// DER values nested inside a definite-length value are bounded by their
/// parent's length rather than by any terminator, so a walk over a stream
/// needs to know its own position to decide when a list of values ends.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        CountingReader { inner, count: 0 }
    }

    /// Returns the number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Unwraps the reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read> io::Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let res = self.inner.read(buf)?;
        self.count += res as u64;
        Ok(res)
    }
}


//------------ Error ---------------------------------------------------------

/// An error happened while reading or writing raw DER.
#[derive(Debug)]
pub enum Error {
    /// The data read does not conform to the DER encoding rules.
    Malformed(&'static str),

    /// The data uses an encoding form this crate does not process.
    Unsupported(&'static str),

    /// The stream ended in the middle of a value.
    Truncated,

    /// The underlying stream failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Malformed(msg) => {
                write!(f, "malformed DER: {}", msg)
            }
            Error::Unsupported(msg) => {
                write!(f, "unsupported DER encoding: {}", msg)
            }
            Error::Truncated => {
                write!(f, "stream ended inside a DER value")
            }
            Error::Io(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<decode::Error> for Error {
    fn from(err: decode::Error) -> Self {
        match err {
            decode::Error::Unimplemented => {
                Error::Unsupported("unimplemented construct")
            }
            _ => Error::Malformed("invalid DER encoding"),
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(length: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_length(&mut buf, length).unwrap();
        buf
    }

    #[test]
    fn length_forms() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(0x7f), [0x7f]);
        assert_eq!(encoded(0x80), [0x81, 0x80]);
        assert_eq!(encoded(0xff), [0x81, 0xff]);
        assert_eq!(encoded(0x100), [0x82, 0x01, 0x00]);
        assert_eq!(encoded(0xffff), [0x82, 0xff, 0xff]);
        assert_eq!(encoded(0x0001_0000), [0x83, 0x01, 0x00, 0x00]);
        assert_eq!(encoded(0xffff_ffff), [0x84, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn length_round_trip() {
        for &length in
            &[0, 1, 0x7f, 0x80, 0xff, 0x100, 0xffff, 0x0001_0000, 0x00ab_cdef]
        {
            let buf = encoded(length);
            assert_eq!(read_length(&mut buf.as_slice()).unwrap(), length);
        }
    }

    #[test]
    fn header_size_delta() {
        assert_eq!(length_header_size_delta(0x20, 0x30), 0);
        assert_eq!(length_header_size_delta(0x7f, 0x80), 1);
        assert_eq!(length_header_size_delta(0x80, 0x7f), -1);
        assert_eq!(length_header_size_delta(0xff, 0x100), 1);
        assert_eq!(length_header_size_delta(0x100, 0x80), -1);
        assert_eq!(length_header_size_delta(0xffff, 0x0001_0000), 1);
        assert_eq!(length_header_size_delta(0x42, 0x42), 0);
    }

    #[test]
    fn delta_is_antisymmetric() {
        for &(a, b) in &[(0x10, 0x90), (0x7f, 0x80), (0xff, 0x101), (1, 2)] {
            assert_eq!(
                length_header_size_delta(a, b),
                -length_header_size_delta(b, a)
            );
        }
    }

    #[test]
    fn rejects_indefinite_length() {
        assert!(matches!(
            read_length(&mut [0x80u8].as_slice()),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_overlong_length() {
        assert!(matches!(
            read_length(&mut [0x85u8, 1, 1, 1, 1, 1].as_slice()),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_end_of_contents_tag() {
        assert!(matches!(
            read_tag(&mut [0x00u8, 0x00].as_slice()),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn rejects_high_tag_numbers() {
        let mut source: &[u8] = &[0x81, 0x03, 0x02, 0x01, 0x00];
        assert!(matches!(
            read_tag_number(&mut source, 0x1f),
            Err(Error::Unsupported(_))
        ));
        // Both continuation octets must have been consumed.
        assert_eq!(source, &[0x02, 0x01, 0x00]);
    }

    #[test]
    fn truncated_length_and_value() {
        assert!(matches!(
            read_length(&mut [0x82u8, 0x01].as_slice()),
            Err(Error::Truncated)
        ));
        assert!(matches!(
            read_value(&mut [0x01u8, 0x02].as_slice(), 4),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn counting_reader_counts() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = CountingReader::new(data.as_slice());
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.bytes_read(), 3);
        reader.read_exact(&mut buf[..2]).unwrap();
        assert_eq!(reader.bytes_read(), 5);
    }

    #[test]
    fn optional_tag_at_end_of_stream() {
        assert!(read_tag_opt(&mut [].as_slice()).unwrap().is_none());
        assert_eq!(
            read_tag_opt(&mut [0x30u8].as_slice()).unwrap(),
            Some(0x30)
        );
    }
}
