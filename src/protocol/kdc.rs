//! AS and TGS exchange handling.
//!
//! [`KdcService::handle`] takes one decoded-from-the-wire request and always
//! produces one reply: an AS-REP, a TGS-REP, or a KRB-ERROR. It never fails
//! and never panics on malformed input.

use super::messages::{
    encode_etype_info2, encode_method_data, error_code, msg_type, pa_type, ApReq, Authenticator,
    EncKdcRepPart, EncTicketPart, EncryptedData, EtypeInfo2Entry, KdcRep, KdcReq, KerberosFlags,
    KrbError, PaData, PaEncTsEnc, PrincipalName, Ticket,
};
use crate::core::config::KdcConfig;
use crate::core::error::KdcResult;
use crate::core::time::KerberosTime;
use crate::crypto::{self, EncryptionKey, EncryptionType, KeySet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Allowed clock difference between client and KDC.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

const KRB_AP_ERR_BADMATCH: i32 = 36;
const LR_TYPE_NONE: i32 = 0;
const TICKET_ETYPES: [i32; 2] = [18, 17];

/// Principal key lookup used by the KDC.
pub trait PrincipalStore: Send + Sync {
    /// Keys of `principal` (`name@REALM`), or `None` when unknown.
    fn find_principal(&self, principal: &str) -> KdcResult<Option<KeySet>>;
}

/// Ticket issuance policy.
#[derive(Debug, Clone)]
pub struct KdcPolicy {
    pub realm: String,
    pub max_ticket_lifetime: Duration,
    pub max_renewable_lifetime: Duration,
    pub preauth_required: bool,
    pub body_checksum_verified: bool,
    pub clock_skew: Duration,
}

impl KdcPolicy {
    pub fn from_config(config: &KdcConfig) -> Self {
        Self {
            realm: config.realm().to_string(),
            max_ticket_lifetime: config.max_ticket_lifetime(),
            max_renewable_lifetime: config.max_renewable_lifetime(),
            preauth_required: config.preauth_required(),
            body_checksum_verified: config.body_checksum_verified(),
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

/// A request rejected with a KRB-ERROR.
#[derive(Debug)]
struct Rejection {
    code: i32,
    text: String,
    e_data: Option<Vec<u8>>,
}

impl Rejection {
    fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            e_data: None,
        }
    }
}

type Outcome<T> = Result<T, Rejection>;

/// Validity window computed for a new ticket.
struct Times {
    authtime: KerberosTime,
    starttime: KerberosTime,
    endtime: KerberosTime,
    renew_till: Option<KerberosTime>,
}

/// Kerberos ticket-issuance service.
pub struct KdcService {
    policy: KdcPolicy,
    store: Arc<dyn PrincipalStore>,
}

impl KdcService {
    pub fn new(policy: KdcPolicy, store: Arc<dyn PrincipalStore>) -> Self {
        Self { policy, store }
    }

    pub fn policy(&self) -> &KdcPolicy {
        &self.policy
    }

    /// Answer one request.
    pub fn handle(&self, request: &[u8]) -> Vec<u8> {
        self.handle_at(request, KerberosTime::now())
    }

    /// Answer one request as of `now`.
    pub fn handle_at(&self, request: &[u8], now: KerberosTime) -> Vec<u8> {
        let req = match KdcReq::decode(request) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "undecodable request");
                return self.error_reply(
                    now,
                    None,
                    Rejection::new(error_code::KRB_ERR_GENERIC, e.to_string()),
                );
            }
        };

        let outcome = match req.msg_type {
            msg_type::AS_REQ => self.as_exchange(&req, now),
            _ => self.tgs_exchange(&req, now),
        };

        match outcome {
            Ok(reply) => reply,
            Err(rejection) => {
                debug!(
                    code = rejection.code,
                    reason = %rejection.text,
                    msg_type = req.msg_type,
                    "request rejected"
                );
                self.error_reply(now, Some(&req), rejection)
            }
        }
    }

    fn lookup(&self, principal: &str) -> Outcome<Option<KeySet>> {
        self.store.find_principal(principal).map_err(|e| {
            warn!(principal, error = %e, "principal lookup failed");
            Rejection::new(error_code::KRB_ERR_GENERIC, "principal lookup failed")
        })
    }

    fn as_exchange(&self, req: &KdcReq, now: KerberosTime) -> Outcome<Vec<u8>> {
        let body = &req.body;
        if body.realm != self.policy.realm {
            return Err(Rejection::new(error_code::KDC_ERR_WRONG_REALM, "wrong realm"));
        }
        let cname = body
            .cname
            .as_ref()
            .ok_or_else(|| Rejection::new(error_code::KDC_ERR_BADOPTION, "missing cname"))?;
        let sname = body
            .sname
            .as_ref()
            .ok_or_else(|| Rejection::new(error_code::KDC_ERR_BADOPTION, "missing sname"))?;

        let client = cname.with_realm(&self.policy.realm);
        let client_keys = self.lookup(&client)?.ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_C_PRINCIPAL_UNKNOWN, "client not found")
        })?;
        let server = sname.with_realm(&self.policy.realm);
        let server_keys = self.lookup(&server)?.ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_S_PRINCIPAL_UNKNOWN, "server not found")
        })?;

        let reply_key = client_keys.negotiate(&body.etype).ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_ETYPE_NOSUPP, "no common encryption type")
        })?;
        let ticket_key = server_keys.negotiate(&TICKET_ETYPES).ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_ETYPE_NOSUPP, "server has no usable key")
        })?;

        let etype_info = encode_etype_info2(&[EtypeInfo2Entry {
            etype: reply_key.etype().id(),
            salt: Some(String::from_utf8_lossy(&crypto::salt_for(&client)).into_owned()),
        }])
        .map_err(encoding_failure)?;

        let preauthenticated = match req.padata(pa_type::PA_ENC_TIMESTAMP) {
            Some(pa) => {
                self.verify_timestamp(&client_keys, &pa.value, now)?;
                true
            }
            None if self.policy.preauth_required => {
                let hints = encode_method_data(&[
                    PaData::new(pa_type::PA_ETYPE_INFO2, etype_info),
                    PaData::new(pa_type::PA_ENC_TIMESTAMP, Vec::new()),
                ])
                .map_err(encoding_failure)?;
                return Err(Rejection {
                    code: error_code::KDC_ERR_PREAUTH_REQUIRED,
                    text: "pre-authentication required".to_string(),
                    e_data: Some(hints),
                });
            }
            None => false,
        };

        let times = self.ticket_times(req, now, None)?;
        let mut flags = KerberosFlags::default().with(KerberosFlags::INITIAL);
        if preauthenticated {
            flags.set(KerberosFlags::PRE_AUTHENT);
        }
        for bit in [KerberosFlags::FORWARDABLE, KerberosFlags::PROXIABLE] {
            if body.kdc_options.contains(bit) {
                flags.set(bit);
            }
        }
        if times.renew_till.is_some() {
            flags.set(KerberosFlags::RENEWABLE);
        }

        let session_key = new_session_key(reply_key.etype())?;
        let ticket = self.seal_ticket(
            sname,
            ticket_key,
            server_keys.kvno(),
            EncTicketPart {
                flags,
                key: session_key.clone(),
                crealm: self.policy.realm.clone(),
                cname: cname.clone(),
                authtime: times.authtime,
                starttime: Some(times.starttime),
                endtime: times.endtime,
                renew_till: times.renew_till,
            },
        )?;

        let enc_part = EncKdcRepPart {
            key: session_key,
            last_req: vec![(LR_TYPE_NONE, now)],
            nonce: body.nonce,
            flags,
            authtime: times.authtime,
            starttime: Some(times.starttime),
            endtime: times.endtime,
            renew_till: times.renew_till,
            srealm: self.policy.realm.clone(),
            sname: sname.clone(),
        };
        let enc_part = EncryptedData::seal(
            reply_key,
            crypto::USAGE_AS_REP,
            Some(client_keys.kvno().into()),
            &enc_part.encode(true).map_err(encoding_failure)?,
        )
        .map_err(crypto_failure)?;

        info!(
            client = %client,
            server = %server,
            etype = %reply_key.etype(),
            endtime = %times.endtime,
            preauthenticated,
            "issued initial ticket"
        );

        Ok(KdcRep {
            msg_type: msg_type::AS_REP,
            padata: vec![PaData::new(pa_type::PA_ETYPE_INFO2, etype_info)],
            crealm: self.policy.realm.clone(),
            cname: cname.clone(),
            ticket,
            enc_part,
        }
        .encode()
        .map_err(encoding_failure)?)
    }

    fn verify_timestamp(&self, keys: &KeySet, value: &[u8], now: KerberosTime) -> Outcome<()> {
        let failed = |text: &str| Rejection::new(error_code::KDC_ERR_PREAUTH_FAILED, text);

        let der =
            super::der::parse_sequence(value).map_err(|_| failed("malformed PA-ENC-TIMESTAMP"))?;
        let encrypted = EncryptedData::decode(der).map_err(|_| failed("malformed PA-ENC-TIMESTAMP"))?;
        let key = EncryptionType::from_id(encrypted.etype)
            .and_then(|etype| keys.get(etype))
            .ok_or_else(|| failed("no key for pre-authentication etype"))?;
        let plain = encrypted
            .open(key, crypto::USAGE_PA_ENC_TIMESTAMP)
            .map_err(|_| failed("pre-authentication decrypt failed"))?;
        let ts = PaEncTsEnc::decode(&plain).map_err(|_| failed("malformed timestamp"))?;

        if ts.timestamp.abs_diff(now) > self.policy.clock_skew {
            return Err(Rejection::new(error_code::KRB_AP_ERR_SKEW, "clock skew too great"));
        }
        Ok(())
    }

    fn tgs_exchange(&self, req: &KdcReq, now: KerberosTime) -> Outcome<Vec<u8>> {
        let body = &req.body;
        let pa = req.padata(pa_type::PA_TGS_REQ).ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_PADATA_TYPE_NOSUPP, "missing PA-TGS-REQ")
        })?;
        let ap_req = ApReq::decode(&pa.value)
            .map_err(|e| Rejection::new(error_code::KRB_ERR_GENERIC, e.to_string()))?;

        let (tgt, tgt_cipher_key) = self.open_tgt(&ap_req.ticket)?;
        if tgt.endtime < now {
            return Err(Rejection::new(
                error_code::KRB_AP_ERR_TKT_EXPIRED,
                "ticket-granting ticket expired",
            ));
        }
        debug!(etype = %tgt_cipher_key, "decrypted ticket-granting ticket");

        let plain = ap_req
            .authenticator
            .open(&tgt.key, crypto::USAGE_TGS_REQ_AUTH)
            .map_err(|_| {
                Rejection::new(error_code::KRB_AP_ERR_BAD_INTEGRITY, "authenticator decrypt failed")
            })?;
        let authenticator = Authenticator::decode(&plain)
            .map_err(|e| Rejection::new(error_code::KRB_ERR_GENERIC, e.to_string()))?;
        if authenticator.cname != tgt.cname || authenticator.crealm != tgt.crealm {
            return Err(Rejection::new(
                KRB_AP_ERR_BADMATCH,
                "authenticator does not match ticket",
            ));
        }
        if authenticator.ctime.abs_diff(now) > self.policy.clock_skew {
            return Err(Rejection::new(error_code::KRB_AP_ERR_SKEW, "clock skew too great"));
        }

        if self.policy.body_checksum_verified {
            let cksum = authenticator.cksum.as_ref().ok_or_else(|| {
                Rejection::new(error_code::KRB_AP_ERR_INAPP_CKSUM, "missing body checksum")
            })?;
            tgt.key
                .verify_checksum(
                    crypto::USAGE_TGS_REQ_AUTH_CKSUM,
                    &req.raw_body,
                    cksum.cksumtype,
                    &cksum.checksum,
                )
                .map_err(|_| {
                    Rejection::new(error_code::KRB_AP_ERR_MODIFIED, "body checksum mismatch")
                })?;
        }

        let sname = body
            .sname
            .as_ref()
            .ok_or_else(|| Rejection::new(error_code::KDC_ERR_BADOPTION, "missing sname"))?;
        let server = sname.with_realm(&self.policy.realm);
        let server_keys = self.lookup(&server)?.ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_S_PRINCIPAL_UNKNOWN, "server not found")
        })?;
        let ticket_key = server_keys.negotiate(&TICKET_ETYPES).ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_ETYPE_NOSUPP, "server has no usable key")
        })?;

        let session_etype = body
            .etype
            .iter()
            .filter_map(|id| EncryptionType::from_id(*id))
            .find(|etype| etype.supports_encryption())
            .unwrap_or(tgt.key.etype());

        let times = self.ticket_times(req, now, Some(&tgt))?;
        let mut flags = KerberosFlags::default();
        if tgt.flags.contains(KerberosFlags::PRE_AUTHENT) {
            flags.set(KerberosFlags::PRE_AUTHENT);
        }
        for bit in [KerberosFlags::FORWARDABLE, KerberosFlags::PROXIABLE] {
            if body.kdc_options.contains(bit) && tgt.flags.contains(bit) {
                flags.set(bit);
            }
        }
        if times.renew_till.is_some() {
            flags.set(KerberosFlags::RENEWABLE);
        }

        let session_key = new_session_key(session_etype)?;
        let ticket = self.seal_ticket(
            sname,
            ticket_key,
            server_keys.kvno(),
            EncTicketPart {
                flags,
                key: session_key.clone(),
                crealm: tgt.crealm.clone(),
                cname: tgt.cname.clone(),
                authtime: tgt.authtime,
                starttime: Some(times.starttime),
                endtime: times.endtime,
                renew_till: times.renew_till,
            },
        )?;

        let enc_part = EncKdcRepPart {
            key: session_key,
            last_req: vec![(LR_TYPE_NONE, now)],
            nonce: body.nonce,
            flags,
            authtime: tgt.authtime,
            starttime: Some(times.starttime),
            endtime: times.endtime,
            renew_till: times.renew_till,
            srealm: self.policy.realm.clone(),
            sname: sname.clone(),
        };
        let (reply_key, usage) = match &authenticator.subkey {
            Some(subkey) => (subkey, crypto::USAGE_TGS_REP_SUBKEY),
            None => (&tgt.key, crypto::USAGE_TGS_REP_SESSION),
        };
        let enc_part = enc_part.encode(false).map_err(encoding_failure)?;
        let enc_part =
            EncryptedData::seal(reply_key, usage, None, &enc_part).map_err(crypto_failure)?;

        info!(
            client = %tgt.cname.with_realm(&tgt.crealm),
            server = %server,
            endtime = %times.endtime,
            "issued service ticket"
        );

        Ok(KdcRep {
            msg_type: msg_type::TGS_REP,
            padata: Vec::new(),
            crealm: tgt.crealm,
            cname: tgt.cname,
            ticket,
            enc_part,
        }
        .encode()
        .map_err(encoding_failure)?)
    }

    /// Decrypt a ticket-granting ticket with the krbtgt key.
    fn open_tgt(&self, ticket: &Ticket) -> Outcome<(EncTicketPart, EncryptionType)> {
        if !ticket.sname.is_krbtgt() || ticket.realm != self.policy.realm {
            return Err(Rejection::new(
                error_code::KRB_AP_ERR_MODIFIED,
                "ticket is not a local ticket-granting ticket",
            ));
        }
        let tgs = ticket.sname.with_realm(&ticket.realm);
        let keys = self.lookup(&tgs)?.ok_or_else(|| {
            Rejection::new(error_code::KDC_ERR_S_PRINCIPAL_UNKNOWN, "krbtgt not found")
        })?;
        let key = EncryptionType::from_id(ticket.enc_part.etype)
            .and_then(|etype| keys.get(etype))
            .ok_or_else(|| {
                Rejection::new(error_code::KDC_ERR_ETYPE_NOSUPP, "no key for ticket etype")
            })?;
        let plain = ticket
            .enc_part
            .open(key, crypto::USAGE_TICKET)
            .map_err(|_| {
                Rejection::new(error_code::KRB_AP_ERR_BAD_INTEGRITY, "ticket decrypt failed")
            })?;
        let part = EncTicketPart::decode(&plain)
            .map_err(|e| Rejection::new(error_code::KRB_ERR_GENERIC, e.to_string()))?;
        Ok((part, key.etype()))
    }

    fn seal_ticket(
        &self,
        sname: &PrincipalName,
        key: &EncryptionKey,
        kvno: u8,
        part: EncTicketPart,
    ) -> Outcome<Ticket> {
        let enc_part = EncryptedData::seal(
            key,
            crypto::USAGE_TICKET,
            Some(kvno.into()),
            &part.encode().map_err(encoding_failure)?,
        )
        .map_err(crypto_failure)?;
        Ok(Ticket {
            realm: self.policy.realm.clone(),
            sname: sname.clone(),
            enc_part,
        })
    }

    /// Apply lifetime ceilings to the requested window.
    ///
    /// `till` of zero asks for the maximum. Requests beyond a ceiling are
    /// capped, never rejected. A TGS reply is further bounded by the
    /// presented `tgt`: it ends no later than the TGT and is renewable only
    /// when the TGT is, up to the TGT's `renew_till`.
    fn ticket_times(
        &self,
        req: &KdcReq,
        now: KerberosTime,
        tgt: Option<&EncTicketPart>,
    ) -> Outcome<Times> {
        let body = &req.body;
        let max_end = now.add(self.policy.max_ticket_lifetime);
        let mut endtime = if body.till == KerberosTime::EPOCH || body.till > max_end {
            max_end
        } else {
            body.till
        };
        if let Some(tgt) = tgt {
            endtime = endtime.min(tgt.endtime);
        }
        if endtime <= now {
            return Err(Rejection::new(
                error_code::KDC_ERR_NEVER_VALID,
                "requested end time is in the past",
            ));
        }

        // None for AS; Some(None) when the presented TGT is not renewable.
        let renew_limit = tgt.map(|tgt| {
            tgt.renew_till
                .filter(|_| tgt.flags.contains(KerberosFlags::RENEWABLE))
        });
        let options = body.kdc_options;
        let wants_renewable = renew_limit != Some(None)
            && (options.contains(KerberosFlags::RENEWABLE)
                || (options.contains(KerberosFlags::RENEWABLE_OK)
                    && (body.till == KerberosTime::EPOCH || body.till > endtime)));
        let renew_till = if wants_renewable {
            let max_renew = now.add(self.policy.max_renewable_lifetime);
            let requested = match body.rtime {
                Some(t) if t != KerberosTime::EPOCH => t,
                _ if options.contains(KerberosFlags::RENEWABLE) => max_renew,
                _ => body.till,
            };
            let mut renew = if requested == KerberosTime::EPOCH {
                max_renew
            } else {
                requested.min(max_renew)
            };
            if let Some(Some(limit)) = renew_limit {
                renew = renew.min(limit);
            }
            Some(renew.max(endtime))
        } else {
            None
        };

        Ok(Times {
            authtime: now,
            starttime: now,
            endtime,
            renew_till,
        })
    }

    fn error_reply(&self, now: KerberosTime, req: Option<&KdcReq>, rejection: Rejection) -> Vec<u8> {
        let body = req.map(|r| &r.body);
        KrbError {
            stime: now,
            susec: 0,
            error_code: rejection.code,
            crealm: body.and_then(|b| b.cname.as_ref()).map(|_| self.policy.realm.clone()),
            cname: body.and_then(|b| b.cname.clone()),
            realm: self.policy.realm.clone(),
            sname: body
                .and_then(|b| b.sname.clone())
                .unwrap_or_else(|| PrincipalName::krbtgt(&self.policy.realm)),
            e_text: Some(rejection.text),
            e_data: rejection.e_data,
        }
        .encode()
        .unwrap_or_else(|e| {
            warn!(error = %e, code = rejection.code, "cannot encode error reply");
            Vec::new()
        })
    }
}

fn new_session_key(etype: EncryptionType) -> Outcome<EncryptionKey> {
    EncryptionKey::random(etype).map_err(crypto_failure)
}

fn crypto_failure(e: crate::core::error::KdcError) -> Rejection {
    warn!(error = %e, "crypto failure while building reply");
    Rejection::new(error_code::KRB_ERR_GENERIC, "internal crypto failure")
}

fn encoding_failure(e: crate::core::error::KdcError) -> Rejection {
    warn!(error = %e, "cannot encode reply");
    Rejection::new(error_code::KRB_ERR_GENERIC, "internal encoding failure")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key_set, DEFAULT_ENCTYPES};
    use crate::protocol::messages::{KdcReqBody, KdcResponse};
    use std::collections::HashMap;

    struct MapStore(HashMap<String, KeySet>);

    impl PrincipalStore for MapStore {
        fn find_principal(&self, principal: &str) -> KdcResult<Option<KeySet>> {
            Ok(self.0.get(principal).cloned())
        }
    }

    const REALM: &str = "EXAMPLE.COM";

    fn service(preauth_required: bool) -> KdcService {
        let mut keys = HashMap::new();
        for (name, pw) in [("alice", "alice-pw"), ("krbtgt/EXAMPLE.COM", "secret")] {
            let principal = format!("{name}@{REALM}");
            keys.insert(
                principal.clone(),
                derive_key_set(&principal, pw, &DEFAULT_ENCTYPES).unwrap(),
            );
        }
        let policy = KdcPolicy {
            realm: REALM.into(),
            max_ticket_lifetime: Duration::from_secs(3600),
            max_renewable_lifetime: Duration::from_secs(7200),
            preauth_required,
            body_checksum_verified: false,
            clock_skew: DEFAULT_CLOCK_SKEW,
        };
        KdcService::new(policy, Arc::new(MapStore(keys)))
    }

    fn as_req(cname: &str, till: KerberosTime, options: KerberosFlags) -> KdcReq {
        KdcReq::new(
            msg_type::AS_REQ,
            vec![],
            KdcReqBody {
                kdc_options: options,
                cname: Some(PrincipalName::parse(cname)),
                realm: REALM.into(),
                sname: Some(PrincipalName::krbtgt(REALM)),
                from: None,
                till,
                rtime: None,
                nonce: 42,
                etype: vec![18, 17],
            },
        )
        .unwrap()
    }

    fn expect_error(reply: &[u8]) -> KrbError {
        match KdcResponse::decode(reply).unwrap() {
            KdcResponse::Error(e) => e,
            KdcResponse::Rep(r) => panic!("expected error, got {:?}", r.msg_type),
        }
    }

    #[test]
    fn as_exchange_caps_lifetime() {
        let kdc = service(false);
        let now = KerberosTime::from_unix(1_700_000_000);
        let far = now.add(Duration::from_secs(86_400 * 30));
        let reply = kdc.handle_at(&as_req("alice", far, KerberosFlags::default()).encode().unwrap(), now);

        let rep = match KdcResponse::decode(&reply).unwrap() {
            KdcResponse::Rep(rep) => rep,
            KdcResponse::Error(e) => panic!("unexpected error {}", e.error_code),
        };
        let key = crypto::derive_key(EncryptionType::Aes256CtsHmacSha196, "alice@EXAMPLE.COM", "alice-pw")
            .unwrap();
        let part = EncKdcRepPart::decode(&rep.enc_part.open(&key, crypto::USAGE_AS_REP).unwrap())
            .unwrap();
        assert_eq!(part.nonce, 42);
        assert_eq!(part.endtime, now.add(Duration::from_secs(3600)));
        assert!(part.flags.contains(KerberosFlags::INITIAL));
        assert!(!part.flags.contains(KerberosFlags::PRE_AUTHENT));
        assert!(part.renew_till.is_none());
    }

    #[test]
    fn unknown_client() {
        let kdc = service(false);
        let reply = kdc.handle(&as_req("mallory", KerberosTime::EPOCH, KerberosFlags::default()).encode().unwrap());
        assert_eq!(
            expect_error(&reply).error_code,
            error_code::KDC_ERR_C_PRINCIPAL_UNKNOWN
        );
    }

    #[test]
    fn preauth_required_returns_hints() {
        let kdc = service(true);
        let reply = kdc.handle(&as_req("alice", KerberosTime::EPOCH, KerberosFlags::default()).encode().unwrap());
        let err = expect_error(&reply);
        assert_eq!(err.error_code, error_code::KDC_ERR_PREAUTH_REQUIRED);
        assert!(err.e_data.is_some());
    }

    #[test]
    fn renewable_is_capped() {
        let kdc = service(false);
        let now = KerberosTime::from_unix(1_700_000_000);
        let mut req = as_req(
            "alice",
            KerberosTime::EPOCH,
            KerberosFlags::default().with(KerberosFlags::RENEWABLE),
        );
        req.body.rtime = Some(now.add(Duration::from_secs(86_400 * 365)));
        let req = KdcReq::new(req.msg_type, req.padata, req.body).unwrap();
        let reply = kdc.handle_at(&req.encode().unwrap(), now);
        let rep = match KdcResponse::decode(&reply).unwrap() {
            KdcResponse::Rep(rep) => rep,
            KdcResponse::Error(e) => panic!("unexpected error {}", e.error_code),
        };
        let key = crypto::derive_key(EncryptionType::Aes256CtsHmacSha196, "alice@EXAMPLE.COM", "alice-pw")
            .unwrap();
        let part = EncKdcRepPart::decode(&rep.enc_part.open(&key, crypto::USAGE_AS_REP).unwrap())
            .unwrap();
        assert_eq!(part.renew_till, Some(now.add(Duration::from_secs(7200))));
        assert!(part.flags.contains(KerberosFlags::RENEWABLE));
    }

    fn tgt_part(flags: KerberosFlags, endtime: KerberosTime, renew_till: Option<KerberosTime>) -> EncTicketPart {
        EncTicketPart {
            flags,
            key: EncryptionKey::random(EncryptionType::Aes256CtsHmacSha196).unwrap(),
            crealm: REALM.into(),
            cname: PrincipalName::parse("alice"),
            authtime: endtime,
            starttime: None,
            endtime,
            renew_till,
        }
    }

    fn tgs_req(options: KerberosFlags, rtime: Option<KerberosTime>) -> KdcReq {
        let mut req = as_req("alice", KerberosTime::EPOCH, options);
        req.body.cname = None;
        req.body.sname = Some(PrincipalName::parse("HTTP/localhost"));
        req.body.rtime = rtime;
        KdcReq::new(msg_type::TGS_REQ, vec![], req.body).unwrap()
    }

    #[test]
    fn service_ticket_not_renewable_from_plain_tgt() {
        let kdc = service(false);
        let now = KerberosTime::from_unix(1_700_000_000);
        let tgt = tgt_part(KerberosFlags::default(), now.add(Duration::from_secs(1800)), None);
        let req = tgs_req(
            KerberosFlags::default().with(KerberosFlags::RENEWABLE),
            Some(now.add(Duration::from_secs(7200))),
        );

        let times = kdc.ticket_times(&req, now, Some(&tgt)).unwrap();
        assert_eq!(times.endtime, tgt.endtime);
        assert!(times.renew_till.is_none());
    }

    #[test]
    fn service_ticket_renewal_bounded_by_tgt() {
        let kdc = service(false);
        let now = KerberosTime::from_unix(1_700_000_000);
        let tgt_renew = now.add(Duration::from_secs(2400));
        let tgt = tgt_part(
            KerberosFlags::default().with(KerberosFlags::RENEWABLE),
            now.add(Duration::from_secs(1800)),
            Some(tgt_renew),
        );
        let req = tgs_req(
            KerberosFlags::default().with(KerberosFlags::RENEWABLE),
            Some(now.add(Duration::from_secs(7200))),
        );

        let times = kdc.ticket_times(&req, now, Some(&tgt)).unwrap();
        assert_eq!(times.renew_till, Some(tgt_renew));

        // Renewable flag set but no renew_till is not a renewable window.
        let odd = tgt_part(
            KerberosFlags::default().with(KerberosFlags::RENEWABLE),
            now.add(Duration::from_secs(1800)),
            None,
        );
        assert!(kdc.ticket_times(&req, now, Some(&odd)).unwrap().renew_till.is_none());
    }

    #[test]
    fn garbage_gets_generic_error() {
        let kdc = service(false);
        let err = expect_error(&kdc.handle(b"\x30\x03\x02\x01"));
        assert_eq!(err.error_code, error_code::KRB_ERR_GENERIC);
        assert_eq!(err.realm, REALM);
    }
}
