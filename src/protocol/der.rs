//! Kerberos conventions on top of `der-parser`'s ASN.1 layer.
//!
//! Tag, length and primitive encodings come from `asn1-rs` (re-exported by
//! `der-parser`). This module adds what RFC 4120 layers over them: EXPLICIT
//! `[n]` fields inside SEQUENCEs, `[APPLICATION n]` message wrappers, 32-bit
//! KerberosFlags and whole-second KerberosTime.

use crate::core::error::{KdcError, KdcResult};
use crate::core::time::KerberosTime;
use chrono::{Datelike, NaiveDate, Timelike};
use der_parser::asn1_rs::{
    ASN1DateTime, ASN1TimeZone, Any, BitString, Class, FromDer, GeneralString, GeneralizedTime,
    Header, Length, OctetString, SerializeError, Tag, ToDer,
};
use std::fmt::Display;

/// Latest time GeneralizedTime can carry with a four-digit year.
const LATEST: KerberosTime = KerberosTime::from_unix(253_402_300_799);

fn malformed(e: impl Display) -> KdcError {
    KdcError::protocol(format!("malformed DER: {e}"))
}

fn unencodable(e: SerializeError) -> KdcError {
    KdcError::protocol(format!("DER encoding failed: {e}"))
}

fn constructed(class: Class, tag: Tag, content: &[u8]) -> KdcResult<Vec<u8>> {
    let header = Header::new(class, true, tag, Length::Definite(content.len()));
    Any::new(header, content).to_der_vec().map_err(unencodable)
}

// ============================================================================
// Encoding
// ============================================================================

pub fn integer(value: i64) -> KdcResult<Vec<u8>> {
    value.to_der_vec().map_err(unencodable)
}

pub fn octets(value: &[u8]) -> KdcResult<Vec<u8>> {
    OctetString::new(value).to_der_vec().map_err(unencodable)
}

pub fn general_string(value: &str) -> KdcResult<Vec<u8>> {
    GeneralString::new(value).to_der_vec().map_err(unencodable)
}

/// KerberosTime, clamped to the years GeneralizedTime can express.
pub fn time(value: KerberosTime) -> KdcResult<Vec<u8>> {
    let dt = value
        .clamp(KerberosTime::EPOCH, LATEST)
        .to_datetime()
        .ok_or_else(|| malformed(format!("time {} out of range", value.unix_secs())))?;
    let year = u32::try_from(dt.year()).map_err(malformed)?;
    GeneralizedTime::new(ASN1DateTime::new(
        year,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        None,
        ASN1TimeZone::Z,
    ))
    .to_der_vec()
    .map_err(unencodable)
}

/// KerberosFlags: a 32-bit BIT STRING, bit 0 in the most significant position.
pub fn flags(bits: u32) -> KdcResult<Vec<u8>> {
    BitString::new(0, &bits.to_be_bytes())
        .to_der_vec()
        .map_err(unencodable)
}

pub fn sequence_of(items: impl IntoIterator<Item = KdcResult<Vec<u8>>>) -> KdcResult<Vec<u8>> {
    let mut content = Vec::new();
    for item in items {
        content.extend(item?);
    }
    constructed(Class::Universal, Tag::Sequence, &content)
}

/// Builds a SEQUENCE of EXPLICIT `[n]` fields in ascending tag order.
///
/// The first failed field is kept and reported by `finish`.
pub struct SeqBuilder {
    content: KdcResult<Vec<u8>>,
}

impl SeqBuilder {
    pub fn new() -> Self {
        Self {
            content: Ok(Vec::new()),
        }
    }

    pub fn field(mut self, n: u32, value: KdcResult<Vec<u8>>) -> Self {
        self.content = self.content.and_then(|mut content| {
            content.extend(constructed(Class::ContextSpecific, Tag(n), &value?)?);
            Ok(content)
        });
        self
    }

    pub fn opt(self, n: u32, value: Option<KdcResult<Vec<u8>>>) -> Self {
        match value {
            Some(v) => self.field(n, v),
            None => self,
        }
    }

    pub fn finish(self) -> KdcResult<Vec<u8>> {
        constructed(Class::Universal, Tag::Sequence, &self.content?)
    }

    /// Finish wrapped in `[APPLICATION n]`.
    pub fn finish_app(self, n: u32) -> KdcResult<Vec<u8>> {
        constructed(Class::Application, Tag(n), &self.finish()?)
    }
}

impl Default for SeqBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// One decoded element.
#[derive(Debug, Clone)]
pub struct Tlv<'a> {
    any: Any<'a>,
    /// Complete encoding, header included.
    pub raw: &'a [u8],
}

/// Read the first element of `input`, returning it and the remaining bytes.
pub fn read(input: &[u8]) -> KdcResult<(Tlv<'_>, &[u8])> {
    let (rest, any) = Any::from_der(input).map_err(malformed)?;
    let raw = &input[..input.len() - rest.len()];
    Ok((Tlv { any, raw }, rest))
}

fn exactly_one(input: &[u8]) -> KdcResult<Tlv<'_>> {
    let (tlv, rest) = read(input)?;
    if !rest.is_empty() {
        return Err(malformed(format!("{} trailing bytes", rest.len())));
    }
    Ok(tlv)
}

/// Parse `input` as exactly one SEQUENCE.
pub fn parse_sequence(input: &[u8]) -> KdcResult<Tlv<'_>> {
    let tlv = exactly_one(input)?;
    tlv.expect_sequence()?;
    Ok(tlv)
}

/// Parse `input` as exactly one `[APPLICATION n] SEQUENCE`, returning the SEQUENCE.
pub fn parse_application(input: &[u8], n: u32) -> KdcResult<Tlv<'_>> {
    exactly_one(input)?.unwrap_app(n)
}

impl<'a> Tlv<'a> {
    /// The APPLICATION tag number, if this is an APPLICATION wrapper.
    pub fn application(&self) -> Option<u32> {
        (self.any.class() == Class::Application && self.any.header.is_constructed())
            .then_some(self.any.tag().0)
    }

    fn expect_sequence(&self) -> KdcResult<()> {
        if self.any.class() != Class::Universal || self.any.tag() != Tag::Sequence {
            return Err(malformed(format!(
                "expected SEQUENCE, found {:?} tag {}",
                self.any.class(),
                self.any.tag().0
            )));
        }
        Ok(())
    }

    /// Unwrap `[APPLICATION n]` to its inner SEQUENCE.
    pub fn unwrap_app(&self, n: u32) -> KdcResult<Tlv<'a>> {
        if self.application() != Some(n) {
            return Err(malformed(format!(
                "expected [APPLICATION {n}], found {:?} tag {}",
                self.any.class(),
                self.any.tag().0
            )));
        }
        parse_sequence(self.any.data)
    }

    pub fn integer(&self) -> KdcResult<i64> {
        i64::try_from(&self.any).map_err(malformed)
    }

    pub fn i32(&self) -> KdcResult<i32> {
        i32::try_from(self.integer()?).map_err(malformed)
    }

    /// UInt32. Negative values in the i32 range are accepted, since some
    /// encoders send nonces as signed.
    pub fn u32(&self) -> KdcResult<u32> {
        let value = self.integer()?;
        match i32::try_from(value) {
            Ok(v) if v < 0 => Ok(v as u32),
            _ => u32::try_from(value).map_err(malformed),
        }
    }

    pub fn octets(&self) -> KdcResult<&'a [u8]> {
        <&'a [u8]>::try_from(self.any.clone()).map_err(malformed)
    }

    pub fn string(&self) -> KdcResult<String> {
        GeneralString::try_from(&self.any)
            .map(|s| s.string())
            .map_err(malformed)
    }

    pub fn time(&self) -> KdcResult<KerberosTime> {
        let GeneralizedTime(t) = GeneralizedTime::try_from(&self.any).map_err(malformed)?;
        let naive = i32::try_from(t.year)
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, t.month.into(), t.day.into()))
            .and_then(|date| date.and_hms_opt(t.hour.into(), t.minute.into(), t.second.into()))
            .ok_or_else(|| malformed(format!("invalid GeneralizedTime {t:?}")))?;
        let offset = match t.tz {
            ASN1TimeZone::Offset(h, m) => i64::from(h) * 3600 + i64::from(m) * 60,
            ASN1TimeZone::Z | ASN1TimeZone::Undefined => 0,
        };
        Ok(KerberosTime::from_unix(naive.and_utc().timestamp() - offset))
    }

    /// KerberosFlags; bits past the first 32 are ignored.
    pub fn flags(&self) -> KdcResult<u32> {
        let bits = BitString::try_from(&self.any).map_err(malformed)?;
        let mut word = [0u8; 4];
        for (dst, src) in word.iter_mut().zip(bits.data.iter()) {
            *dst = *src;
        }
        Ok(u32::from_be_bytes(word))
    }

    /// Elements of a SEQUENCE OF.
    pub fn elements(&self) -> KdcResult<Vec<Tlv<'a>>> {
        self.expect_sequence()?;
        let mut out = Vec::new();
        let mut rest = self.any.data;
        while !rest.is_empty() {
            let (tlv, next) = read(rest)?;
            out.push(tlv);
            rest = next;
        }
        Ok(out)
    }

    /// EXPLICIT `[n]` fields of a SEQUENCE, unwrapped.
    pub fn fields(&self) -> KdcResult<SeqFields<'a>> {
        let mut fields = Vec::new();
        for element in self.elements()? {
            let any = &element.any;
            if any.class() != Class::ContextSpecific || !any.header.is_constructed() {
                return Err(malformed(format!(
                    "expected [n] field, found {:?} tag {}",
                    any.class(),
                    any.tag().0
                )));
            }
            fields.push((any.tag().0, exactly_one(any.data)?));
        }
        Ok(SeqFields { fields })
    }
}

/// Fields of a SEQUENCE by context tag number.
#[derive(Debug)]
pub struct SeqFields<'a> {
    fields: Vec<(u32, Tlv<'a>)>,
}

impl<'a> SeqFields<'a> {
    pub fn opt(&self, n: u32) -> Option<Tlv<'a>> {
        self.fields
            .iter()
            .find(|(tag, _)| *tag == n)
            .map(|(_, tlv)| tlv.clone())
    }

    pub fn req(&self, n: u32) -> KdcResult<Tlv<'a>> {
        self.opt(n)
            .ok_or_else(|| malformed(format!("missing required field [{n}]")))
    }
}
