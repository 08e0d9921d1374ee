//! Minimal in-process Kerberos client.
//!
//! Enough of the client side of the AS and TGS exchanges to obtain tickets
//! from the KDC named in a `krb5.conf`. Intended for verifying a running
//! MiniKdc from the same process.

use super::ambient::active_client_config;
use super::krb5conf::Krb5Conf;
use crate::core::config::Transport;
use crate::core::error::{KdcError, KdcResult};
use crate::core::time::KerberosTime;
use crate::crypto::{self, EncryptionKey, EncryptionType};
use crate::protocol::messages::{
    decode_etype_info2, decode_method_data, error_code, msg_type, pa_type, ApReq,
    Authenticator, Checksum, EncKdcRepPart, EncryptedData, KdcRep, KdcReq, KdcReqBody,
    KdcResponse, KerberosFlags, PaData, PaEncTsEnc, PrincipalName, Ticket,
};
use crate::protocol::{DecodeResult, FrameCodec, RecordMarkCodec};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

/// Default per-KDC request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for a ticket request.
#[derive(Debug, Clone, Default)]
pub struct TicketOptions {
    /// Requested lifetime; `None` asks for the KDC maximum.
    pub lifetime: Option<Duration>,
    /// Requested renewable lifetime.
    pub renewable: Option<Duration>,
    pub forwardable: bool,
    /// Send PA-ENC-TIMESTAMP up front instead of waiting to be asked.
    pub preauth: bool,
}

/// A ticket and the session key that goes with it.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client: PrincipalName,
    pub realm: String,
    pub server: PrincipalName,
    pub ticket: Ticket,
    pub session_key: EncryptionKey,
    pub flags: KerberosFlags,
    pub authtime: KerberosTime,
    pub starttime: Option<KerberosTime>,
    pub endtime: KerberosTime,
    pub renew_till: Option<KerberosTime>,
}

impl Credentials {
    pub fn client_principal(&self) -> String {
        self.client.with_realm(&self.realm)
    }

    pub fn server_principal(&self) -> String {
        self.server.with_realm(&self.realm)
    }

    /// Ticket lifetime as granted.
    pub fn lifetime(&self) -> Duration {
        self.endtime
            .abs_diff(self.starttime.unwrap_or(self.authtime))
    }
}

/// Client bound to one realm's KDCs.
#[derive(Debug, Clone)]
pub struct KdcClient {
    realm: String,
    kdcs: Vec<String>,
    udp_preference_limit: u32,
    timeout: Duration,
    etypes: Vec<EncryptionType>,
}

impl KdcClient {
    /// Client for the default realm of `conf`.
    pub fn from_conf(conf: &Krb5Conf) -> KdcResult<Self> {
        let kdcs = conf.kdcs(&conf.default_realm).to_vec();
        if kdcs.is_empty() {
            return Err(KdcError::protocol(format!(
                "no KDC configured for realm {}",
                conf.default_realm
            )));
        }
        Ok(Self {
            realm: conf.default_realm.clone(),
            kdcs,
            udp_preference_limit: conf.udp_preference_limit,
            timeout: DEFAULT_TIMEOUT,
            etypes: vec![
                EncryptionType::Aes256CtsHmacSha196,
                EncryptionType::Aes128CtsHmacSha196,
            ],
        })
    }

    /// Client for the configuration published to this process.
    pub fn from_active() -> KdcResult<Self> {
        let conf = active_client_config()
            .ok_or_else(|| KdcError::protocol("no client configuration is active"))?;
        Self::from_conf(&conf)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Encryption types to offer, most preferred first.
    pub fn with_etypes(mut self, etypes: Vec<EncryptionType>) -> Self {
        self.etypes = etypes;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Obtain a ticket-granting ticket with a password.
    pub async fn request_tgt(&self, principal: &str, password: &str) -> KdcResult<Credentials> {
        self.request_tgt_with(principal, password, &TicketOptions::default())
            .await
    }

    pub async fn request_tgt_with(
        &self,
        principal: &str,
        password: &str,
        options: &TicketOptions,
    ) -> KdcResult<Credentials> {
        let cname = PrincipalName::parse(self.strip_realm(principal));
        let full_name = cname.with_realm(&self.realm);
        let sname = PrincipalName::krbtgt(&self.realm);
        let body = self.request_body(Some(cname.clone()), sname, options);

        let mut padata = Vec::new();
        if options.preauth {
            let etype = self.etypes.first().copied().ok_or_else(|| {
                KdcError::protocol("no encryption types configured")
            })?;
            padata.push(encrypted_timestamp(etype, &full_name, password)?);
        }

        let response = self
            .exchange(&KdcReq::new(msg_type::AS_REQ, padata.clone(), body.clone())?)
            .await?;
        let rep = match response {
            KdcResponse::Rep(rep) => rep,
            KdcResponse::Error(err)
                if err.error_code == error_code::KDC_ERR_PREAUTH_REQUIRED && padata.is_empty() =>
            {
                let etype = preauth_etype(err.e_data.as_deref())?
                    .unwrap_or(EncryptionType::Aes256CtsHmacSha196);
                debug!(principal = %full_name, etype = %etype, "retrying with pre-authentication");
                let padata = vec![encrypted_timestamp(etype, &full_name, password)?];
                match self
                    .exchange(&KdcReq::new(msg_type::AS_REQ, padata, body.clone())?)
                    .await?
                {
                    KdcResponse::Rep(rep) => rep,
                    KdcResponse::Error(err) => return Err(err.into_error()),
                }
            }
            KdcResponse::Error(err) => return Err(err.into_error()),
        };

        let etype = EncryptionType::from_id(rep.enc_part.etype)
            .ok_or(KdcError::UnsupportedCipher { etype: rep.enc_part.etype })?;
        let reply_key = crypto::derive_key(etype, &full_name, password)?;
        let part = EncKdcRepPart::decode(&rep.enc_part.open(&reply_key, crypto::USAGE_AS_REP)?)?;
        self.credentials(rep, part, body.nonce)
    }

    /// Obtain a ticket for `service` using a ticket-granting ticket.
    pub async fn request_service_ticket(
        &self,
        tgt: &Credentials,
        service: &str,
    ) -> KdcResult<Credentials> {
        let sname = PrincipalName::parse(self.strip_realm(service));
        let body = self.request_body(None, sname, &TicketOptions::default());
        let raw_body = body.encode()?;

        let (cksumtype, checksum) = tgt
            .session_key
            .checksum(crypto::USAGE_TGS_REQ_AUTH_CKSUM, &raw_body)?;
        let authenticator = Authenticator {
            crealm: tgt.realm.clone(),
            cname: tgt.client.clone(),
            cksum: Some(Checksum {
                cksumtype,
                checksum,
            }),
            cusec: chrono::Utc::now().timestamp_subsec_micros() % 1_000_000,
            ctime: KerberosTime::now(),
            subkey: None,
            seq_number: None,
        };
        let ap_req = ApReq {
            ap_options: KerberosFlags::default(),
            ticket: tgt.ticket.clone(),
            authenticator: EncryptedData::seal(
                &tgt.session_key,
                crypto::USAGE_TGS_REQ_AUTH,
                None,
                &authenticator.encode()?,
            )?,
        };
        let padata = vec![PaData::new(pa_type::PA_TGS_REQ, ap_req.encode()?)];

        let rep = match self
            .exchange(&KdcReq::new(msg_type::TGS_REQ, padata, body.clone())?)
            .await?
        {
            KdcResponse::Rep(rep) => rep,
            KdcResponse::Error(err) => return Err(err.into_error()),
        };
        let part = EncKdcRepPart::decode(
            &rep.enc_part
                .open(&tgt.session_key, crypto::USAGE_TGS_REP_SESSION)?,
        )?;
        self.credentials(rep, part, body.nonce)
    }

    fn strip_realm<'a>(&self, principal: &'a str) -> &'a str {
        principal
            .strip_suffix(&format!("@{}", self.realm))
            .unwrap_or(principal)
    }

    fn request_body(
        &self,
        cname: Option<PrincipalName>,
        sname: PrincipalName,
        options: &TicketOptions,
    ) -> KdcReqBody {
        let now = KerberosTime::now();
        let mut kdc_options = KerberosFlags::default();
        if options.forwardable {
            kdc_options.set(KerberosFlags::FORWARDABLE);
        }
        if options.renewable.is_some() {
            kdc_options.set(KerberosFlags::RENEWABLE);
        }
        KdcReqBody {
            kdc_options,
            cname,
            realm: self.realm.clone(),
            sname: Some(sname),
            from: None,
            till: options
                .lifetime
                .map(|d| now.add(d))
                .unwrap_or(KerberosTime::EPOCH),
            rtime: options.renewable.map(|d| now.add(d)),
            nonce: rand::random::<u32>() & 0x7fff_ffff,
            etype: self.etypes.iter().map(|e| e.id()).collect(),
        }
    }

    fn credentials(&self, rep: KdcRep, part: EncKdcRepPart, nonce: u32) -> KdcResult<Credentials> {
        if part.nonce != nonce {
            return Err(KdcError::protocol("reply nonce does not match request"));
        }
        Ok(Credentials {
            client: rep.cname,
            realm: rep.crealm,
            server: part.sname,
            ticket: rep.ticket,
            session_key: part.key,
            flags: part.flags,
            authtime: part.authtime,
            starttime: part.starttime,
            endtime: part.endtime,
            renew_till: part.renew_till,
        })
    }

    /// Send a request to each configured KDC in turn until one answers.
    async fn exchange(&self, req: &KdcReq) -> KdcResult<KdcResponse> {
        let request = req.encode()?;
        let transport = if self.udp_preference_limit as usize > request.len() {
            Transport::Udp
        } else {
            Transport::Tcp
        };

        let mut last_err = None;
        for kdc in &self.kdcs {
            let attempt = match transport {
                Transport::Tcp => self.send_tcp(kdc, &request).await,
                Transport::Udp => self.send_udp(kdc, &request).await,
            };
            match attempt {
                Ok(reply) => return KdcResponse::decode(&reply),
                Err(e) => {
                    debug!(kdc = %kdc, transport = %transport, error = %e, "KDC unreachable");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| KdcError::protocol("no KDC configured")))
    }

    async fn send_tcp(&self, kdc: &str, request: &[u8]) -> KdcResult<Vec<u8>> {
        let codec = RecordMarkCodec::default();
        let io = async {
            let mut stream = TcpStream::connect(kdc).await?;
            stream.write_all(&codec.encode(request)).await?;
            let mut buffer = BytesMut::with_capacity(4096);
            loop {
                match codec.decode(&mut buffer) {
                    DecodeResult::Complete(frame) => return Ok(frame.to_vec()),
                    DecodeResult::Invalid(reason) => return Err(KdcError::protocol(reason)),
                    DecodeResult::Incomplete => {}
                }
                if stream.read_buf(&mut buffer).await? == 0 {
                    return Err(KdcError::protocol("connection closed before reply"));
                }
            }
        };
        tokio::time::timeout(self.timeout, io)
            .await
            .map_err(|_| KdcError::protocol(format!("timed out waiting for {kdc}")))?
    }

    async fn send_udp(&self, kdc: &str, request: &[u8]) -> KdcResult<Vec<u8>> {
        let io = async {
            let target = tokio::net::lookup_host(kdc)
                .await?
                .next()
                .ok_or_else(|| KdcError::protocol(format!("cannot resolve {kdc}")))?;
            let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(target).await?;
            socket.send(request).await?;
            let mut buf = vec![0u8; crate::net::udp::MAX_DATAGRAM];
            let len = socket.recv(&mut buf).await?;
            buf.truncate(len);
            Ok(buf)
        };
        tokio::time::timeout(self.timeout, io)
            .await
            .map_err(|_| KdcError::protocol(format!("timed out waiting for {kdc}")))?
    }
}

/// PA-ENC-TIMESTAMP for `principal` with a key of `etype`.
fn encrypted_timestamp(
    etype: EncryptionType,
    principal: &str,
    password: &str,
) -> KdcResult<PaData> {
    let key = crypto::derive_key(etype, principal, password)?;
    let ts = PaEncTsEnc {
        timestamp: KerberosTime::now(),
        usec: Some(chrono::Utc::now().timestamp_subsec_micros() % 1_000_000),
    };
    let sealed = EncryptedData::seal(&key, crypto::USAGE_PA_ENC_TIMESTAMP, None, &ts.encode()?)?;
    Ok(PaData::new(pa_type::PA_ENC_TIMESTAMP, sealed.encode()?))
}

/// First usable etype advertised in a PREAUTH_REQUIRED error's hints.
fn preauth_etype(e_data: Option<&[u8]>) -> KdcResult<Option<EncryptionType>> {
    let Some(bytes) = e_data else {
        return Ok(None);
    };
    for pa in decode_method_data(bytes)? {
        if pa.padata_type == pa_type::PA_ETYPE_INFO2 {
            return Ok(decode_etype_info2(&pa.value)?
                .into_iter()
                .filter_map(|e| EncryptionType::from_id(e.etype))
                .find(|e| e.supports_encryption()));
        }
    }
    Ok(None)
}
