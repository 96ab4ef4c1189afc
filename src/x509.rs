//! Scalar types shared by X.509 structures.
//!
//! This module provides [`Time`], the point in time used by the various
//! validity fields, and [`Serial`], a certificate serial number of
//! arbitrary precision.

use std::{fmt, io, ops, str};
use bcder::{decode, encode, Mode, Tag};
use bcder::decode::Source;
use bcder::encode::PrimitiveContent;
use bytes::Bytes;
use chrono::{Datelike, DateTime, Duration, LocalResult, TimeZone, Timelike, Utc};
use crate::der;


//------------ Time ----------------------------------------------------------

/// A point in time, as expressed in X.509 validity fields.
///
/// DER time values only carry whole seconds, so construction truncates any
/// sub-second part. This makes a value written out and read back compare
/// equal to the original.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Time(DateTime<Utc>);

impl Time {
    pub fn new(time: DateTime<Utc>) -> Self {
        match Utc.timestamp_opt(time.timestamp(), 0) {
            LocalResult::Single(time) => Time(time),
            _ => Time(time),
        }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Creates a value from the content octets of a UTCTime.
    ///
    /// Two-digit years of 50 and up fall into the twentieth century, the
    /// rest into the twenty-first, as RFC 5280 prescribes.
    pub fn from_utc_content(content: &[u8]) -> Result<Self, der::Error> {
        if content.len() != 13 || content[12] != b'Z' {
            return Err(der::Error::Malformed("invalid UTCTime"))
        }
        let year = decimal(&content[0..2])? as i32;
        let year = if year >= 50 { year + 1900 } else { year + 2000 };
        Self::from_parts(
            year,
            decimal(&content[2..4])?,
            decimal(&content[4..6])?,
            decimal(&content[6..8])?,
            decimal(&content[8..10])?,
            decimal(&content[10..12])?,
        )
    }

    /// Creates a value from the content octets of a GeneralizedTime.
    pub fn from_generalized_content(
        content: &[u8]
    ) -> Result<Self, der::Error> {
        if content.len() != 15 || content[14] != b'Z' {
            return Err(der::Error::Malformed("invalid GeneralizedTime"))
        }
        Self::from_parts(
            decimal(&content[0..4])? as i32,
            decimal(&content[4..6])?,
            decimal(&content[6..8])?,
            decimal(&content[8..10])?,
            decimal(&content[10..12])?,
            decimal(&content[12..14])?,
        )
    }

    fn from_parts(
        year: i32, month: u32, day: u32,
        hour: u32, minute: u32, second: u32,
    ) -> Result<Self, der::Error> {
        match Utc.with_ymd_and_hms(year, month, day, hour, minute, second) {
            LocalResult::Single(time) => Ok(Time(time)),
            _ => Err(der::Error::Malformed("invalid time value")),
        }
    }

    pub fn take_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Self, S::Err> {
        cons.take_primitive(|tag, prim| {
            if tag == Tag::UTC_TIME {
                let mut content = [0u8; 13];
                for octet in &mut content {
                    *octet = prim.take_u8()?;
                }
                Self::from_utc_content(&content)
                    .map_err(|_| decode::Malformed.into())
            }
            else if tag == Tag::GENERALIZED_TIME {
                let mut content = [0u8; 15];
                for octet in &mut content {
                    *octet = prim.take_u8()?;
                }
                Self::from_generalized_content(&content)
                    .map_err(|_| decode::Malformed.into())
            }
            else {
                Err(decode::Malformed.into())
            }
        })
    }

    pub fn take_opt_from<S: decode::Source>(
        cons: &mut decode::Constructed<S>
    ) -> Result<Option<Self>, S::Err> {
        let res = cons.take_opt_primitive_if(Tag::UTC_TIME, |prim| {
            let mut content = [0u8; 13];
            for octet in &mut content {
                *octet = prim.take_u8()?;
            }
            Self::from_utc_content(&content)
                .map_err(|_| decode::Malformed.into())
        })?;
        if let Some(res) = res {
            return Ok(Some(res))
        }
        cons.take_opt_primitive_if(Tag::GENERALIZED_TIME, |prim| {
            let mut content = [0u8; 15];
            for octet in &mut content {
                *octet = prim.take_u8()?;
            }
            Self::from_generalized_content(&content)
                .map_err(|_| decode::Malformed.into())
        })
    }

    /// Returns the content octets of the UTCTime encoding.
    ///
    /// The year is reduced to its last two digits, so this is only
    /// meaningful for years between 1950 and 2049.
    pub fn utc_content(&self) -> [u8; 13] {
        let mut content = [0u8; 13];
        let formatted = format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            self.0.year().rem_euclid(100), self.0.month(), self.0.day(),
            self.0.hour(), self.0.minute(), self.0.second(),
        );
        content.copy_from_slice(formatted.as_bytes());
        content
    }

    /// Returns the content octets of the GeneralizedTime encoding.
    pub fn generalized_content(&self) -> [u8; 15] {
        let mut content = [0u8; 15];
        let formatted = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}Z",
            self.0.year(), self.0.month(), self.0.day(),
            self.0.hour(), self.0.minute(), self.0.second(),
        );
        content.copy_from_slice(formatted.as_bytes());
        content
    }

    /// Returns a value encoder for the time.
    ///
    /// RFC 5280 requires UTCTime for dates through 2049 and GeneralizedTime
    /// from 2050 on.
    pub fn encode(self) -> TimeEncoder {
        if self.0.year() >= 1950 && self.0.year() < 2050 {
            TimeEncoder::Utc(self.utc_content())
        }
        else {
            TimeEncoder::Generalized(self.generalized_content())
        }
    }
}

impl ops::Add<Duration> for Time {
    type Output = Time;

    fn add(self, duration: Duration) -> Time {
        Time::new(self.0 + duration)
    }
}

impl ops::Sub for Time {
    type Output = Duration;

    fn sub(self, other: Time) -> Duration {
        self.0 - other.0
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn decimal(digits: &[u8]) -> Result<u32, der::Error> {
    str::from_utf8(digits).ok().and_then(|s| s.parse().ok())
        .ok_or(der::Error::Malformed("invalid digits in time value"))
}


//------------ TimeEncoder ---------------------------------------------------

/// A value encoder for a [`Time`] in its RFC 5280 mandated form.
pub enum TimeEncoder {
    Utc([u8; 13]),
    Generalized([u8; 15]),
}

impl encode::Values for TimeEncoder {
    fn encoded_len(&self, _: Mode) -> usize {
        match *self {
            TimeEncoder::Utc(_) => 15,
            TimeEncoder::Generalized(_) => 17,
        }
    }

    fn write_encoded<W: io::Write>(
        &self,
        _: Mode,
        target: &mut W
    ) -> Result<(), io::Error> {
        match *self {
            TimeEncoder::Utc(ref content) => {
                target.write_all(&[0x17, 13])?;
                target.write_all(content)
            }
            TimeEncoder::Generalized(ref content) => {
                target.write_all(&[0x18, 15])?;
                target.write_all(content)
            }
        }
    }
}


//------------ Serial --------------------------------------------------------

/// A certificate serial number.
///
/// Serial numbers are unsigned integers of up to twenty octets, so this
/// type keeps the minimal big-endian INTEGER content octets rather than
/// converting to a native integer.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Serial(Bytes);

impl Serial {
    /// Creates a value from the content octets of a DER INTEGER.
    pub fn from_integer_content(content: &[u8]) -> Self {
        Serial(Bytes::copy_from_slice(content))
    }

    /// Returns the content octets.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<u64> for Serial {
    fn from(value: u64) -> Self {
        let octets = value.to_be_bytes();
        let mut skip = 0;
        while skip < 7 && octets[skip] == 0 {
            skip += 1
        }
        let mut content = Vec::with_capacity(9);
        if octets[skip] & 0x80 != 0 {
            content.push(0)
        }
        content.extend_from_slice(&octets[skip..]);
        Serial(content.into())
    }
}

impl PrimitiveContent for Serial {
    const TAG: Tag = Tag::INTEGER;

    fn encoded_len(&self, _: Mode) -> usize {
        self.0.len()
    }

    fn write_encoded<W: io::Write>(
        &self,
        _: Mode,
        target: &mut W
    ) -> Result<(), io::Error> {
        target.write_all(self.0.as_ref())
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for octet in self.0.as_ref() {
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn time(
        year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32
    ) -> Time {
        Time::from_parts(year, month, day, hour, minute, second).unwrap()
    }

    #[test]
    fn utc_content_round_trip() {
        let t = time(2024, 3, 17, 9, 5, 59);
        assert_eq!(&t.utc_content(), b"240317090559Z");
        assert_eq!(Time::from_utc_content(&t.utc_content()).unwrap(), t);
    }

    #[test]
    fn generalized_content_round_trip() {
        let t = time(2052, 12, 1, 23, 59, 0);
        assert_eq!(&t.generalized_content(), b"20521201235900Z");
        assert_eq!(
            Time::from_generalized_content(&t.generalized_content()).unwrap(),
            t
        );
    }

    #[test]
    fn utc_year_window() {
        assert_eq!(
            Time::from_utc_content(b"500101000000Z").unwrap(),
            time(1950, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            Time::from_utc_content(b"491231235959Z").unwrap(),
            time(2049, 12, 31, 23, 59, 59)
        );
    }

    #[test]
    fn encoder_picks_form_by_year() {
        assert!(matches!(
            time(2024, 1, 1, 0, 0, 0).encode(), TimeEncoder::Utc(_)
        ));
        assert!(matches!(
            time(2050, 1, 1, 0, 0, 0).encode(), TimeEncoder::Generalized(_)
        ));
        assert!(matches!(
            time(1949, 1, 1, 0, 0, 0).encode(), TimeEncoder::Generalized(_)
        ));
    }

    #[test]
    fn rejects_bad_time_content() {
        assert!(Time::from_utc_content(b"240317090559").is_err());
        assert!(Time::from_utc_content(b"2403170905591Z").is_err());
        assert!(Time::from_utc_content(b"24031709055aZ").is_err());
        assert!(Time::from_utc_content(b"241317090559Z").is_err());
        assert!(Time::from_generalized_content(b"240317090559Z").is_err());
    }

    #[test]
    fn interval_arithmetic() {
        let this = time(2024, 3, 17, 9, 0, 0);
        let next = time(2024, 4, 16, 9, 0, 0);
        assert_eq!(next - this, Duration::days(30));
        assert_eq!(this + Duration::days(30), next);
    }

    #[test]
    fn serial_minimal_encoding() {
        assert_eq!(Serial::from(0).as_slice(), &[0x00]);
        assert_eq!(Serial::from(1).as_slice(), &[0x01]);
        assert_eq!(Serial::from(127).as_slice(), &[0x7f]);
        assert_eq!(Serial::from(128).as_slice(), &[0x00, 0x80]);
        assert_eq!(Serial::from(0x1234).as_slice(), &[0x12, 0x34]);
        assert_eq!(
            Serial::from(0x8000_0000_0000_0000).as_slice(),
            &[0x00, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn serial_display() {
        assert_eq!(Serial::from(0xabcd).to_string(), "00abcd");
    }
}
