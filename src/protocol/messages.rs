//! Kerberos v5 messages (RFC 4120 section 5).
//!
//! Each type has an `encode` producing its complete DER encoding and a
//! `decode` accepting one, both built on [`der`](super::der). Only the
//! fields the AS and TGS exchanges use are modelled; optional fields this KDC never reads (addresses, authorization
//! data, additional tickets) are skipped on decode and omitted on encode.

use super::der::{self, SeqBuilder, Tlv};
use crate::core::error::{KdcError, KdcResult};
use crate::core::time::KerberosTime;
use crate::crypto::{EncryptionKey, EncryptionType};

/// Protocol version number.
pub const PVNO: i64 = 5;

/// Message type numbers, also used as APPLICATION tag numbers.
pub mod msg_type {
    pub const AS_REQ: u8 = 10;
    pub const AS_REP: u8 = 11;
    pub const TGS_REQ: u8 = 12;
    pub const TGS_REP: u8 = 13;
    pub const AP_REQ: u8 = 14;
    pub const KRB_ERROR: u8 = 30;
}

const APP_TICKET: u32 = 1;
const APP_AUTHENTICATOR: u32 = 2;
const APP_ENC_TICKET_PART: u32 = 3;
const APP_ENC_AS_REP_PART: u32 = 25;
const APP_ENC_TGS_REP_PART: u32 = 26;

/// Principal name types.
pub mod name_type {
    pub const NT_PRINCIPAL: i32 = 1;
    pub const NT_SRV_INST: i32 = 2;
}

/// Pre-authentication data types.
pub mod pa_type {
    pub const PA_TGS_REQ: i32 = 1;
    pub const PA_ENC_TIMESTAMP: i32 = 2;
    pub const PA_ETYPE_INFO2: i32 = 19;
}

/// KRB-ERROR codes.
pub mod error_code {
    pub const KDC_ERR_C_PRINCIPAL_UNKNOWN: i32 = 6;
    pub const KDC_ERR_S_PRINCIPAL_UNKNOWN: i32 = 7;
    pub const KDC_ERR_NEVER_VALID: i32 = 11;
    pub const KDC_ERR_BADOPTION: i32 = 13;
    pub const KDC_ERR_ETYPE_NOSUPP: i32 = 14;
    pub const KDC_ERR_PADATA_TYPE_NOSUPP: i32 = 16;
    pub const KDC_ERR_PREAUTH_FAILED: i32 = 24;
    pub const KDC_ERR_PREAUTH_REQUIRED: i32 = 25;
    pub const KRB_AP_ERR_BAD_INTEGRITY: i32 = 31;
    pub const KRB_AP_ERR_TKT_EXPIRED: i32 = 32;
    pub const KRB_AP_ERR_SKEW: i32 = 37;
    pub const KRB_AP_ERR_MODIFIED: i32 = 41;
    pub const KRB_AP_ERR_INAPP_CKSUM: i32 = 50;
    pub const KRB_ERR_GENERIC: i32 = 60;
    pub const KDC_ERR_WRONG_REALM: i32 = 68;
}

/// KerberosFlags (KDCOptions, TicketFlags, APOptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KerberosFlags(pub u32);

impl KerberosFlags {
    pub const FORWARDABLE: u32 = 1;
    pub const FORWARDED: u32 = 2;
    pub const PROXIABLE: u32 = 3;
    pub const RENEWABLE: u32 = 8;
    pub const INITIAL: u32 = 9;
    pub const PRE_AUTHENT: u32 = 10;
    /// KDCOptions only.
    pub const RENEWABLE_OK: u32 = 27;

    pub fn contains(self, bit: u32) -> bool {
        bit < 32 && self.0 & (0x8000_0000 >> bit) != 0
    }

    pub fn set(&mut self, bit: u32) {
        if bit < 32 {
            self.0 |= 0x8000_0000 >> bit;
        }
    }

    pub fn with(mut self, bit: u32) -> Self {
        self.set(bit);
        self
    }
}

/// PrincipalName without realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalName {
    pub name_type: i32,
    pub components: Vec<String>,
}

impl PrincipalName {
    pub fn new(name_type: i32, components: Vec<String>) -> Self {
        Self {
            name_type,
            components,
        }
    }

    /// Parse `a/b` into components; `NT_SRV_INST` when there is an instance.
    pub fn parse(name: &str) -> Self {
        let components: Vec<String> = name.split('/').map(str::to_string).collect();
        let name_type = if components.len() > 1 {
            name_type::NT_SRV_INST
        } else {
            name_type::NT_PRINCIPAL
        };
        Self::new(name_type, components)
    }

    /// `krbtgt/REALM`.
    pub fn krbtgt(realm: &str) -> Self {
        Self::new(
            name_type::NT_SRV_INST,
            vec!["krbtgt".to_string(), realm.to_string()],
        )
    }

    pub fn is_krbtgt(&self) -> bool {
        self.components.first().map(String::as_str) == Some("krbtgt")
    }

    /// `name@REALM`.
    pub fn with_realm(&self, realm: &str) -> String {
        format!("{self}@{realm}")
    }

    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(self.name_type.into()))
            .field(
                1,
                der::sequence_of(self.components.iter().map(|c| der::general_string(c))),
            )
            .finish()
    }

    pub fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.fields()?;
        let components = f
            .req(1)?
            .elements()?
            .into_iter()
            .map(|c| c.string())
            .collect::<KdcResult<Vec<_>>>()?;
        Ok(Self::new(f.req(0)?.i32()?, components))
    }
}

impl std::fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

/// EncryptedData.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub etype: i32,
    pub kvno: Option<u32>,
    pub cipher: Vec<u8>,
}

impl EncryptedData {
    /// Encrypt `plaintext` with `key`.
    pub fn seal(key: &EncryptionKey, usage: u32, kvno: Option<u32>, plaintext: &[u8]) -> KdcResult<Self> {
        Ok(Self {
            etype: key.etype().id(),
            kvno,
            cipher: key.encrypt(usage, plaintext)?,
        })
    }

    /// Decrypt with `key`, which must match the etype.
    pub fn open(&self, key: &EncryptionKey, usage: u32) -> KdcResult<Vec<u8>> {
        if key.etype().id() != self.etype {
            return Err(KdcError::crypto(format!(
                "encrypted with etype {}, key is {}",
                self.etype,
                key.etype()
            )));
        }
        key.decrypt(usage, &self.cipher)
    }

    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(self.etype.into()))
            .opt(1, self.kvno.map(|k| der::integer(k.into())))
            .field(2, der::octets(&self.cipher))
            .finish()
    }

    pub fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.fields()?;
        Ok(Self {
            etype: f.req(0)?.i32()?,
            kvno: f.opt(1).map(|t| t.u32()).transpose()?,
            cipher: f.req(2)?.octets()?.to_vec(),
        })
    }
}

/// DER `EncryptionKey`.
pub fn encode_key(key: &EncryptionKey) -> KdcResult<Vec<u8>> {
    SeqBuilder::new()
        .field(0, der::integer(key.etype().id().into()))
        .field(1, der::octets(key.bytes()))
        .finish()
}

/// Decode a DER `EncryptionKey`.
pub fn decode_key(tlv: Tlv<'_>) -> KdcResult<EncryptionKey> {
    let f = tlv.fields()?;
    let id = f.req(0)?.i32()?;
    let etype = EncryptionType::from_id(id).ok_or(KdcError::UnsupportedCipher { etype: id })?;
    Ok(EncryptionKey::new(etype, f.req(1)?.octets()?.to_vec()))
}

/// PA-DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaData {
    pub padata_type: i32,
    pub value: Vec<u8>,
}

impl PaData {
    pub fn new(padata_type: i32, value: Vec<u8>) -> Self {
        Self { padata_type, value }
    }

    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(1, der::integer(self.padata_type.into()))
            .field(2, der::octets(&self.value))
            .finish()
    }

    pub fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.fields()?;
        Ok(Self::new(f.req(1)?.i32()?, f.req(2)?.octets()?.to_vec()))
    }
}

fn encode_padata(padata: &[PaData]) -> Option<KdcResult<Vec<u8>>> {
    if padata.is_empty() {
        None
    } else {
        Some(der::sequence_of(padata.iter().map(PaData::encode)))
    }
}

fn decode_padata(tlv: Option<Tlv<'_>>) -> KdcResult<Vec<PaData>> {
    match tlv {
        Some(t) => t.elements()?.into_iter().map(PaData::decode).collect(),
        None => Ok(Vec::new()),
    }
}

/// METHOD-DATA, carried in KRB-ERROR e-data.
pub fn encode_method_data(padata: &[PaData]) -> KdcResult<Vec<u8>> {
    der::sequence_of(padata.iter().map(PaData::encode))
}

pub fn decode_method_data(bytes: &[u8]) -> KdcResult<Vec<PaData>> {
    decode_padata(Some(der::parse_sequence(bytes)?))
}

/// PA-ENC-TS-ENC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaEncTsEnc {
    pub timestamp: KerberosTime,
    pub usec: Option<u32>,
}

impl PaEncTsEnc {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::time(self.timestamp))
            .opt(1, self.usec.map(|u| der::integer(u.into())))
            .finish()
    }

    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let f = der::parse_sequence(bytes)?.fields()?;
        Ok(Self {
            timestamp: f.req(0)?.time()?,
            usec: f.opt(1).map(|t| t.u32()).transpose()?,
        })
    }
}

/// One ETYPE-INFO2 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtypeInfo2Entry {
    pub etype: i32,
    pub salt: Option<String>,
}

pub fn encode_etype_info2(entries: &[EtypeInfo2Entry]) -> KdcResult<Vec<u8>> {
    der::sequence_of(entries.iter().map(|e| {
        SeqBuilder::new()
            .field(0, der::integer(e.etype.into()))
            .opt(1, e.salt.as_deref().map(der::general_string))
            .finish()
    }))
}

pub fn decode_etype_info2(bytes: &[u8]) -> KdcResult<Vec<EtypeInfo2Entry>> {
    der::parse_sequence(bytes)?
        .elements()?
        .into_iter()
        .map(|e| {
            let f = e.fields()?;
            Ok(EtypeInfo2Entry {
                etype: f.req(0)?.i32()?,
                salt: f.opt(1).map(|t| t.string()).transpose()?,
            })
        })
        .collect()
}

/// KDC-REQ-BODY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReqBody {
    pub kdc_options: KerberosFlags,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: Option<PrincipalName>,
    pub from: Option<KerberosTime>,
    pub till: KerberosTime,
    pub rtime: Option<KerberosTime>,
    pub nonce: u32,
    pub etype: Vec<i32>,
}

impl KdcReqBody {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::flags(self.kdc_options.0))
            .opt(1, self.cname.as_ref().map(PrincipalName::encode))
            .field(2, der::general_string(&self.realm))
            .opt(3, self.sname.as_ref().map(PrincipalName::encode))
            .opt(4, self.from.map(der::time))
            .field(5, der::time(self.till))
            .opt(6, self.rtime.map(der::time))
            .field(7, der::integer(self.nonce.into()))
            .field(
                8,
                der::sequence_of(self.etype.iter().map(|e| der::integer((*e).into()))),
            )
            .finish()
    }

    pub fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.fields()?;
        Ok(Self {
            kdc_options: KerberosFlags(f.req(0)?.flags()?),
            cname: f.opt(1).map(PrincipalName::decode).transpose()?,
            realm: f.req(2)?.string()?,
            sname: f.opt(3).map(PrincipalName::decode).transpose()?,
            from: f.opt(4).map(|t| t.time()).transpose()?,
            till: f.req(5)?.time()?,
            rtime: f.opt(6).map(|t| t.time()).transpose()?,
            nonce: f.req(7)?.u32()?,
            etype: f
                .req(8)?
                .elements()?
                .into_iter()
                .map(|e| e.i32())
                .collect::<KdcResult<_>>()?,
        })
    }
}

/// AS-REQ or TGS-REQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReq {
    pub msg_type: u8,
    pub padata: Vec<PaData>,
    pub body: KdcReqBody,
    /// Body bytes as received, for checksum verification.
    pub raw_body: Vec<u8>,
}

impl KdcReq {
    pub fn new(msg_type: u8, padata: Vec<PaData>, body: KdcReqBody) -> KdcResult<Self> {
        let raw_body = body.encode()?;
        Ok(Self {
            msg_type,
            padata,
            body,
            raw_body,
        })
    }

    pub fn padata(&self, padata_type: i32) -> Option<&PaData> {
        self.padata.iter().find(|p| p.padata_type == padata_type)
    }

    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(1, der::integer(PVNO))
            .field(2, der::integer(self.msg_type.into()))
            .opt(3, encode_padata(&self.padata))
            .field(4, Ok(self.raw_body.clone()))
            .finish_app(self.msg_type.into())
    }

    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let (outer, rest) = der::read(bytes)?;
        if !rest.is_empty() {
            return Err(KdcError::protocol("trailing data after request"));
        }
        let msg_type = match outer.application() {
            Some(t) if t == u32::from(msg_type::AS_REQ) => msg_type::AS_REQ,
            Some(t) if t == u32::from(msg_type::TGS_REQ) => msg_type::TGS_REQ,
            other => {
                return Err(KdcError::protocol(format!(
                    "unexpected message tag {other:?}"
                )))
            }
        };
        let f = outer.unwrap_app(msg_type.into())?.fields()?;
        check_pvno(f.req(1)?)?;
        if f.req(2)?.integer()? != i64::from(msg_type) {
            return Err(KdcError::protocol("msg-type does not match tag"));
        }
        let body_tlv = f.req(4)?;
        let raw_body = body_tlv.raw.to_vec();
        Ok(Self {
            msg_type,
            padata: decode_padata(f.opt(3))?,
            body: KdcReqBody::decode(body_tlv)?,
            raw_body,
        })
    }
}

fn check_pvno(tlv: Tlv<'_>) -> KdcResult<()> {
    match tlv.integer()? {
        PVNO => Ok(()),
        other => Err(KdcError::protocol(format!("unsupported pvno {other}"))),
    }
}

/// Ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub realm: String,
    pub sname: PrincipalName,
    pub enc_part: EncryptedData,
}

impl Ticket {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(PVNO))
            .field(1, der::general_string(&self.realm))
            .field(2, self.sname.encode())
            .field(3, self.enc_part.encode())
            .finish_app(APP_TICKET)
    }

    pub fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.unwrap_app(APP_TICKET)?.fields()?;
        check_pvno(f.req(0)?)?;
        Ok(Self {
            realm: f.req(1)?.string()?,
            sname: PrincipalName::decode(f.req(2)?)?,
            enc_part: EncryptedData::decode(f.req(3)?)?,
        })
    }
}

/// EncTicketPart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTicketPart {
    pub flags: KerberosFlags,
    pub key: EncryptionKey,
    pub crealm: String,
    pub cname: PrincipalName,
    pub authtime: KerberosTime,
    pub starttime: Option<KerberosTime>,
    pub endtime: KerberosTime,
    pub renew_till: Option<KerberosTime>,
}

impl EncTicketPart {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        // Empty transited encoding: no realms traversed.
        let transited = SeqBuilder::new()
            .field(0, der::integer(1))
            .field(1, der::octets(&[]))
            .finish();
        SeqBuilder::new()
            .field(0, der::flags(self.flags.0))
            .field(1, encode_key(&self.key))
            .field(2, der::general_string(&self.crealm))
            .field(3, self.cname.encode())
            .field(4, transited)
            .field(5, der::time(self.authtime))
            .opt(6, self.starttime.map(der::time))
            .field(7, der::time(self.endtime))
            .opt(8, self.renew_till.map(der::time))
            .finish_app(APP_ENC_TICKET_PART)
    }

    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let f = der::parse_application(bytes, APP_ENC_TICKET_PART)?.fields()?;
        Ok(Self {
            flags: KerberosFlags(f.req(0)?.flags()?),
            key: decode_key(f.req(1)?)?,
            crealm: f.req(2)?.string()?,
            cname: PrincipalName::decode(f.req(3)?)?,
            authtime: f.req(5)?.time()?,
            starttime: f.opt(6).map(|t| t.time()).transpose()?,
            endtime: f.req(7)?.time()?,
            renew_till: f.opt(8).map(|t| t.time()).transpose()?,
        })
    }
}

/// AS-REP or TGS-REP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcRep {
    pub msg_type: u8,
    pub padata: Vec<PaData>,
    pub crealm: String,
    pub cname: PrincipalName,
    pub ticket: Ticket,
    pub enc_part: EncryptedData,
}

impl KdcRep {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(PVNO))
            .field(1, der::integer(self.msg_type.into()))
            .opt(2, encode_padata(&self.padata))
            .field(3, der::general_string(&self.crealm))
            .field(4, self.cname.encode())
            .field(5, self.ticket.encode())
            .field(6, self.enc_part.encode())
            .finish_app(self.msg_type.into())
    }

    pub fn decode(tlv: Tlv<'_>, msg_type: u8) -> KdcResult<Self> {
        let f = tlv.unwrap_app(msg_type.into())?.fields()?;
        check_pvno(f.req(0)?)?;
        Ok(Self {
            msg_type,
            padata: decode_padata(f.opt(2))?,
            crealm: f.req(3)?.string()?,
            cname: PrincipalName::decode(f.req(4)?)?,
            ticket: Ticket::decode(f.req(5)?)?,
            enc_part: EncryptedData::decode(f.req(6)?)?,
        })
    }
}

/// EncASRepPart / EncTGSRepPart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncKdcRepPart {
    pub key: EncryptionKey,
    pub last_req: Vec<(i32, KerberosTime)>,
    pub nonce: u32,
    pub flags: KerberosFlags,
    pub authtime: KerberosTime,
    pub starttime: Option<KerberosTime>,
    pub endtime: KerberosTime,
    pub renew_till: Option<KerberosTime>,
    pub srealm: String,
    pub sname: PrincipalName,
}

impl EncKdcRepPart {
    /// Encode as EncASRepPart (`as_rep`) or EncTGSRepPart.
    pub fn encode(&self, as_rep: bool) -> KdcResult<Vec<u8>> {
        let last_req = der::sequence_of(self.last_req.iter().map(|(ty, t)| {
            SeqBuilder::new()
                .field(0, der::integer((*ty).into()))
                .field(1, der::time(*t))
                .finish()
        }));
        let app = if as_rep {
            APP_ENC_AS_REP_PART
        } else {
            APP_ENC_TGS_REP_PART
        };
        SeqBuilder::new()
            .field(0, encode_key(&self.key))
            .field(1, last_req)
            .field(2, der::integer(self.nonce.into()))
            .field(4, der::flags(self.flags.0))
            .field(5, der::time(self.authtime))
            .opt(6, self.starttime.map(der::time))
            .field(7, der::time(self.endtime))
            .opt(8, self.renew_till.map(der::time))
            .field(9, der::general_string(&self.srealm))
            .field(10, self.sname.encode())
            .finish_app(app)
    }

    /// Decode either application tag; some KDCs send EncTGSRepPart in AS-REP.
    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let (outer, _) = der::read(bytes)?;
        let app = if outer.application() == Some(APP_ENC_AS_REP_PART) {
            APP_ENC_AS_REP_PART
        } else {
            APP_ENC_TGS_REP_PART
        };
        let f = outer.unwrap_app(app)?.fields()?;
        let last_req = f
            .req(1)?
            .elements()?
            .into_iter()
            .map(|e| {
                let lr = e.fields()?;
                Ok((lr.req(0)?.i32()?, lr.req(1)?.time()?))
            })
            .collect::<KdcResult<Vec<_>>>()?;
        Ok(Self {
            key: decode_key(f.req(0)?)?,
            last_req,
            nonce: f.req(2)?.u32()?,
            flags: KerberosFlags(f.req(4)?.flags()?),
            authtime: f.req(5)?.time()?,
            starttime: f.opt(6).map(|t| t.time()).transpose()?,
            endtime: f.req(7)?.time()?,
            renew_till: f.opt(8).map(|t| t.time()).transpose()?,
            srealm: f.req(9)?.string()?,
            sname: PrincipalName::decode(f.req(10)?)?,
        })
    }
}

/// Checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub cksumtype: i32,
    pub checksum: Vec<u8>,
}

impl Checksum {
    fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(self.cksumtype.into()))
            .field(1, der::octets(&self.checksum))
            .finish()
    }

    fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.fields()?;
        Ok(Self {
            cksumtype: f.req(0)?.i32()?,
            checksum: f.req(1)?.octets()?.to_vec(),
        })
    }
}

/// Authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticator {
    pub crealm: String,
    pub cname: PrincipalName,
    pub cksum: Option<Checksum>,
    pub cusec: u32,
    pub ctime: KerberosTime,
    pub subkey: Option<EncryptionKey>,
    pub seq_number: Option<u32>,
}

impl Authenticator {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(PVNO))
            .field(1, der::general_string(&self.crealm))
            .field(2, self.cname.encode())
            .opt(3, self.cksum.as_ref().map(Checksum::encode))
            .field(4, der::integer(self.cusec.into()))
            .field(5, der::time(self.ctime))
            .opt(6, self.subkey.as_ref().map(encode_key))
            .opt(7, self.seq_number.map(|s| der::integer(s.into())))
            .finish_app(APP_AUTHENTICATOR)
    }

    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let f = der::parse_application(bytes, APP_AUTHENTICATOR)?.fields()?;
        check_pvno(f.req(0)?)?;
        Ok(Self {
            crealm: f.req(1)?.string()?,
            cname: PrincipalName::decode(f.req(2)?)?,
            cksum: f.opt(3).map(Checksum::decode).transpose()?,
            cusec: f.req(4)?.u32()?,
            ctime: f.req(5)?.time()?,
            subkey: f.opt(6).map(decode_key).transpose()?,
            seq_number: f.opt(7).map(|t| t.u32()).transpose()?,
        })
    }
}

/// AP-REQ, carried as PA-TGS-REQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReq {
    pub ap_options: KerberosFlags,
    pub ticket: Ticket,
    pub authenticator: EncryptedData,
}

impl ApReq {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(PVNO))
            .field(1, der::integer(msg_type::AP_REQ.into()))
            .field(2, der::flags(self.ap_options.0))
            .field(3, self.ticket.encode())
            .field(4, self.authenticator.encode())
            .finish_app(msg_type::AP_REQ.into())
    }

    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let f = der::parse_application(bytes, msg_type::AP_REQ.into())?.fields()?;
        check_pvno(f.req(0)?)?;
        Ok(Self {
            ap_options: KerberosFlags(f.req(2)?.flags()?),
            ticket: Ticket::decode(f.req(3)?)?,
            authenticator: EncryptedData::decode(f.req(4)?)?,
        })
    }
}

/// KRB-ERROR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrbError {
    pub stime: KerberosTime,
    pub susec: u32,
    pub error_code: i32,
    pub crealm: Option<String>,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: PrincipalName,
    pub e_text: Option<String>,
    pub e_data: Option<Vec<u8>>,
}

impl KrbError {
    pub fn encode(&self) -> KdcResult<Vec<u8>> {
        SeqBuilder::new()
            .field(0, der::integer(PVNO))
            .field(1, der::integer(msg_type::KRB_ERROR.into()))
            .field(4, der::time(self.stime))
            .field(5, der::integer(self.susec.into()))
            .field(6, der::integer(self.error_code.into()))
            .opt(7, self.crealm.as_deref().map(der::general_string))
            .opt(8, self.cname.as_ref().map(PrincipalName::encode))
            .field(9, der::general_string(&self.realm))
            .field(10, self.sname.encode())
            .opt(11, self.e_text.as_deref().map(der::general_string))
            .opt(12, self.e_data.as_deref().map(der::octets))
            .finish_app(msg_type::KRB_ERROR.into())
    }

    pub fn decode(tlv: Tlv<'_>) -> KdcResult<Self> {
        let f = tlv.unwrap_app(msg_type::KRB_ERROR.into())?.fields()?;
        check_pvno(f.req(0)?)?;
        Ok(Self {
            stime: f.req(4)?.time()?,
            susec: f.req(5)?.u32()?,
            error_code: f.req(6)?.i32()?,
            crealm: f.opt(7).map(|t| t.string()).transpose()?,
            cname: f.opt(8).map(PrincipalName::decode).transpose()?,
            realm: f.req(9)?.string()?,
            sname: PrincipalName::decode(f.req(10)?)?,
            e_text: f.opt(11).map(|t| t.string()).transpose()?,
            e_data: f.opt(12).map(|t| t.octets().map(<[u8]>::to_vec)).transpose()?,
        })
    }

    pub fn into_error(self) -> KdcError {
        KdcError::KdcReply {
            code: self.error_code,
            text: self.e_text.unwrap_or_default(),
        }
    }
}

/// A KDC reply as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdcResponse {
    Rep(KdcRep),
    Error(KrbError),
}

impl KdcResponse {
    pub fn decode(bytes: &[u8]) -> KdcResult<Self> {
        let (outer, _) = der::read(bytes)?;
        match outer.application() {
            Some(t) if t == u32::from(msg_type::AS_REP) => {
                KdcRep::decode(outer, msg_type::AS_REP).map(Self::Rep)
            }
            Some(t) if t == u32::from(msg_type::TGS_REP) => {
                KdcRep::decode(outer, msg_type::TGS_REP).map(Self::Rep)
            }
            Some(t) if t == u32::from(msg_type::KRB_ERROR) => {
                KrbError::decode(outer).map(Self::Error)
            }
            other => Err(KdcError::protocol(format!(
                "unexpected reply tag {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> KdcReqBody {
        KdcReqBody {
            kdc_options: KerberosFlags::default().with(KerberosFlags::FORWARDABLE),
            cname: Some(PrincipalName::parse("alice")),
            realm: "EXAMPLE.COM".into(),
            sname: Some(PrincipalName::krbtgt("EXAMPLE.COM")),
            from: None,
            till: KerberosTime::EPOCH,
            rtime: None,
            nonce: 0xDEAD_BEEF,
            etype: vec![18, 17, 23],
        }
    }

    #[test]
    fn as_req_decodes_and_keeps_raw_body() {
        let req = KdcReq::new(
            msg_type::AS_REQ,
            vec![PaData::new(pa_type::PA_ENC_TIMESTAMP, vec![1, 2, 3])],
            body(),
        )
        .unwrap();
        let decoded = KdcReq::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.body.nonce, 0xDEAD_BEEF);
        assert!(decoded.padata(pa_type::PA_ENC_TIMESTAMP).is_some());
        assert!(decoded.padata(pa_type::PA_TGS_REQ).is_none());
    }

    #[test]
    fn encoded_request_is_plain_der() {
        let encoded = KdcReq::new(msg_type::AS_REQ, vec![], body())
            .and_then(|req| req.encode())
            .unwrap();
        let (rest, obj) = der_parser::der::parse_der(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(obj.header.tag().0, u32::from(msg_type::AS_REQ));
    }

    #[test]
    fn wrong_pvno_is_rejected() {
        let mut encoded = KdcReq::new(msg_type::AS_REQ, vec![], body())
            .and_then(|req| req.encode())
            .unwrap();
        // [APP 10] len, SEQ len, [1] len, INTEGER 1 5
        let pos = encoded
            .windows(3)
            .position(|w| w == [0x02, 0x01, 0x05])
            .unwrap();
        encoded[pos + 2] = 4;
        assert!(KdcReq::decode(&encoded).is_err());
    }

    #[test]
    fn flags_bits() {
        let mut f = KerberosFlags::default();
        f.set(KerberosFlags::RENEWABLE);
        assert!(f.contains(KerberosFlags::RENEWABLE));
        assert!(!f.contains(KerberosFlags::FORWARDABLE));
        assert_eq!(f.0, 0x0080_0000);
    }

    #[test]
    fn principal_display() {
        let p = PrincipalName::parse("HTTP/localhost");
        assert_eq!(p.name_type, name_type::NT_SRV_INST);
        assert_eq!(p.with_realm("EXAMPLE.COM"), "HTTP/localhost@EXAMPLE.COM");
        assert!(PrincipalName::krbtgt("X").is_krbtgt());
    }

    #[test]
    fn krb_error_reply() {
        let err = KrbError {
            stime: KerberosTime::from_unix(1_700_000_000),
            susec: 0,
            error_code: error_code::KDC_ERR_PREAUTH_REQUIRED,
            crealm: None,
            cname: None,
            realm: "EXAMPLE.COM".into(),
            sname: PrincipalName::krbtgt("EXAMPLE.COM"),
            e_text: Some("pre-authentication required".into()),
            e_data: Some(encode_method_data(&[PaData::new(
                pa_type::PA_ETYPE_INFO2,
                encode_etype_info2(&[EtypeInfo2Entry {
                    etype: 18,
                    salt: Some("EXAMPLE.COMalice".into()),
                }])
                .unwrap(),
            )])
            .unwrap()),
        };
        let decoded = match KdcResponse::decode(&err.encode().unwrap()).unwrap() {
            KdcResponse::Error(e) => e,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decoded, err);
        let hints = decode_method_data(decoded.e_data.as_deref().unwrap()).unwrap();
        let info = decode_etype_info2(&hints[0].value).unwrap();
        assert_eq!(info[0].salt.as_deref(), Some("EXAMPLE.COMalice"));
    }
}
