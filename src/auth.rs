//! NTLM authentication for SMB2.
//!
//! Implements the NTLM challenge/response flow wrapped in SPNEGO.
//! The three-leg handshake is:
//!   1. Client sends NEGOTIATE_MESSAGE
//!   2. Server sends CHALLENGE_MESSAGE with random 8-byte challenge
//!   3. Client sends AUTHENTICATE_MESSAGE with its response
//!
//! Only NTLMv2 responses are accepted. A configured account must prove
//! its password: the NTProofStr is checked against NTOWFv2 and the session
//! base key becomes the signing key. Names that match no account fall back
//! to guest when guest access is allowed.
//!
//! References:
//! - [MS-NLMP] NT LAN Manager Authentication Protocol
//! - [MS-SPNG] SPNEGO Extension

use std::time::SystemTime;

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;
use tracing::{debug, warn};

use crate::clock::filetime;
use crate::config::UserConfig;
use crate::signing::SESSION_KEY_LEN;
use crate::smb2::status::NtStatus;
use crate::smb2::{get_bytes, get_u16, get_u32, string_to_utf16le, utf16le_to_string};

/// NTLMSSP signature: `NTLMSSP\0`
const NTLMSSP_SIG: &[u8; 8] = b"NTLMSSP\0";

/// OID 1.3.6.1.4.1.311.2.2.10 (NTLMSSP), DER encoded.
const NTLMSSP_OID: &[u8] = &[
    0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a,
];

/// OID 1.3.6.1.5.5.2 (SPNEGO), DER encoded.
const SPNEGO_OID: &[u8] = &[0x06, 0x06, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];

type HmacMd5 = Hmac<Md5>;

/// Length of the NTProofStr that leads an NTLMv2 response.
const NT_PROOF_LEN: usize = 16;

/// Fixed part of an NTLMv2 client blob, before its AV pairs.
const NTLMV2_BLOB_HEADER_LEN: usize = 28;

/// UNICODE | REQUEST_TARGET | NTLM | TARGET_TYPE_SERVER | TARGET_INFO
const CHALLENGE_FLAGS: u32 = 0x0000_0001 | 0x0000_0004 | 0x0000_0200 | 0x0002_0000 | 0x0080_0000;

/// Authentication progress of one pending session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for the first NEGOTIATE_MESSAGE from the client.
    AwaitingNegotiate,
    /// Server challenge has been sent; waiting for AUTHENTICATE_MESSAGE.
    ChallengeSent { server_challenge: [u8; 8] },
}

/// What the authenticator needs to know about the server.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub users: &'a [UserConfig],
    /// Unknown or anonymous users become guests instead of failing.
    pub allow_guest: bool,
    pub server_name: &'a str,
    pub now: SystemTime,
}

/// Result of feeding one security buffer through the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send this token with STATUS_MORE_PROCESSING_REQUIRED.
    Challenge(Vec<u8>),
    /// Authentication finished; send `token` with STATUS_SUCCESS.
    Complete(AuthOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub username: String,
    pub is_guest: bool,
    /// Guests get no signing key.
    pub session_key: Option<[u8; SESSION_KEY_LEN]>,
    pub token: Vec<u8>,
}

/// Process a SESSION_SETUP security buffer through the NTLM state machine.
pub fn process_auth(
    state: &mut AuthState,
    security_buffer: &[u8],
    ctx: &AuthContext<'_>,
) -> Result<AuthStep, NtStatus> {
    // Strip SPNEGO wrapping to find the raw NTLMSSP token
    let ntlm_token = unwrap_spnego(security_buffer);
    debug!(
        input_len = security_buffer.len(),
        ntlm_len = ntlm_token.len(),
        state = ?state,
        "NTLM: processing security buffer"
    );

    match state {
        AuthState::AwaitingNegotiate => {
            if ntlm_message_type(ntlm_token) != Some(1) {
                warn!("Expected NTLM NEGOTIATE_MESSAGE, got something else");
                return Err(NtStatus::LogonFailure);
            }
            let mut server_challenge = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut server_challenge);

            let challenge_msg = build_challenge_message(&server_challenge, ctx.server_name, ctx.now);
            *state = AuthState::ChallengeSent { server_challenge };
            debug!("NTLM: sending challenge");
            Ok(AuthStep::Challenge(wrap_spnego_challenge(&challenge_msg)))
        }
        AuthState::ChallengeSent { server_challenge } => {
            let Some(msg) = parse_authenticate_message(ntlm_token) else {
                warn!("NTLM: failed to parse AUTHENTICATE_MESSAGE");
                return Err(NtStatus::LogonFailure);
            };

            let account = ctx
                .users
                .iter()
                .find(|u| !msg.username.is_empty() && u.username.eq_ignore_ascii_case(&msg.username));

            let outcome = match account {
                Some(user) => {
                    let Some(session_key) = verify_ntlmv2(
                        &user.password,
                        &msg.username,
                        &msg.domain,
                        server_challenge,
                        &msg.nt_response,
                    ) else {
                        warn!(user = %msg.username, "NTLM: bad password");
                        return Err(NtStatus::LogonFailure);
                    };
                    debug!(user = %msg.username, "NTLM: authenticated");
                    AuthOutcome {
                        username: user.username.clone(),
                        is_guest: false,
                        session_key: Some(session_key),
                        token: wrap_spnego_accept(),
                    }
                }
                None if ctx.allow_guest => {
                    debug!(user = %msg.username, "NTLM: guest access");
                    AuthOutcome {
                        username: msg.username.clone(),
                        is_guest: true,
                        session_key: None,
                        token: wrap_spnego_accept(),
                    }
                }
                None => {
                    warn!(user = %msg.username, "NTLM: unknown user");
                    return Err(NtStatus::LogonFailure);
                }
            };
            Ok(AuthStep::Complete(outcome))
        }
    }
}

// ---- NTLMv2 (MS-NLMP 3.3.2) ----

fn hmac_md5(key: &[u8]) -> HmacMd5 {
    <HmacMd5 as Mac>::new_from_slice(key).unwrap_or_else(|_| unreachable!("HMAC-MD5 takes any key length"))
}

fn to_key(mac: HmacMd5) -> [u8; SESSION_KEY_LEN] {
    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&mac.finalize().into_bytes());
    key
}

/// NTOWFv2: HMAC-MD5 keyed by the NT hash over UPPER(user) + domain.
fn ntowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    let nt_hash = Md4::digest(string_to_utf16le(password));
    let mut mac = hmac_md5(&nt_hash);
    mac.update(&string_to_utf16le(&username.to_uppercase()));
    mac.update(&string_to_utf16le(domain));
    to_key(mac)
}

/// Check an NTLMv2 response and return the session base key.
///
/// `None` when the response is not NTLMv2 or the proof does not match.
fn verify_ntlmv2(
    password: &str,
    username: &str,
    domain: &str,
    server_challenge: &[u8; 8],
    nt_response: &[u8],
) -> Option<[u8; SESSION_KEY_LEN]> {
    if nt_response.len() < NT_PROOF_LEN + NTLMV2_BLOB_HEADER_LEN {
        return None;
    }
    let (proof, blob) = nt_response.split_at(NT_PROOF_LEN);
    let response_key = ntowf_v2(password, username, domain);

    let mut mac = hmac_md5(&response_key);
    mac.update(server_challenge);
    mac.update(blob);
    mac.verify_slice(proof).ok()?;

    let mut mac = hmac_md5(&response_key);
    mac.update(proof);
    Some(to_key(mac))
}

// ---- SPNEGO helpers (minimal ASN.1) ----

/// Build the initial SPNEGO NegTokenInit advertising NTLMSSP support.
/// Sent in the NEGOTIATE response SecurityBuffer.
pub fn build_spnego_init() -> Vec<u8> {
    let mech_types = der_wrap(0x30, NTLMSSP_OID);
    let mech_types_ctx = der_wrap(0xa0, &mech_types);
    let neg_token_init = der_wrap(0x30, &mech_types_ctx);
    let choice = der_wrap(0xa0, &neg_token_init);

    let mut inner = SPNEGO_OID.to_vec();
    inner.extend_from_slice(&choice);
    der_wrap(0x60, &inner)
}

/// Return the raw NTLMSSP bytes inside a (possibly SPNEGO-wrapped) token.
fn unwrap_spnego(data: &[u8]) -> &[u8] {
    match data.windows(NTLMSSP_SIG.len()).position(|w| w == NTLMSSP_SIG) {
        Some(pos) => &data[pos..],
        None => data,
    }
}

/// Wrap an NTLM challenge message in a SPNEGO NegTokenResp with
/// negState accept-incomplete and supportedMech NTLMSSP.
fn wrap_spnego_challenge(ntlm_msg: &[u8]) -> Vec<u8> {
    let neg_state: &[u8] = &[0xa0, 0x03, 0x0a, 0x01, 0x01];
    let supported_mech = der_wrap(0xa1, NTLMSSP_OID);
    let response_token = der_wrap(0xa2, &der_wrap(0x04, ntlm_msg));

    let mut seq = neg_state.to_vec();
    seq.extend_from_slice(&supported_mech);
    seq.extend_from_slice(&response_token);
    der_wrap(0xa1, &der_wrap(0x30, &seq))
}

/// Final SPNEGO NegTokenResp with negState accept-completed.
fn wrap_spnego_accept() -> Vec<u8> {
    let neg_state: &[u8] = &[0xa0, 0x03, 0x0a, 0x01, 0x00];
    der_wrap(0xa1, &der_wrap(0x30, neg_state))
}

fn der_wrap(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    push_der_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

/// Push a DER length encoding into a buffer.
fn push_der_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else if len < 0x100 {
        buf.push(0x81);
        buf.push(len as u8);
    } else {
        buf.push(0x82);
        buf.push((len >> 8) as u8);
        buf.push(len as u8);
    }
}

// ---- NTLM message construction / parsing ----

fn ntlm_message_type(data: &[u8]) -> Option<u32> {
    if get_bytes(data, 0, 8, "NTLMSSP signature").ok()? != NTLMSSP_SIG {
        return None;
    }
    get_u32(data, 8, "MessageType").ok()
}

fn push_av_pair(buf: &mut Vec<u8>, id: u16, value: &[u8]) {
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(value);
}

/// Build an NTLM CHALLENGE_MESSAGE (type 2).
/// MS-NLMP 2.2.1.2
///
/// TargetInfo carries the NetBIOS and DNS names, a timestamp and the
/// terminating MsvAvEOL; some clients refuse to answer without them.
fn build_challenge_message(server_challenge: &[u8; 8], server_name: &str, now: SystemTime) -> Vec<u8> {
    let netbios_name = server_name.to_uppercase();
    let dns_name = format!("{}.local", server_name.to_lowercase());
    let target_name = string_to_utf16le(&netbios_name);

    let mut target_info = Vec::new();
    push_av_pair(&mut target_info, 2, &target_name); // MsvAvNbDomainName
    push_av_pair(&mut target_info, 1, &target_name); // MsvAvNbComputerName
    push_av_pair(&mut target_info, 4, &string_to_utf16le(&dns_name)); // MsvAvDnsDomainName
    push_av_pair(&mut target_info, 3, &string_to_utf16le(&dns_name)); // MsvAvDnsComputerName
    push_av_pair(&mut target_info, 7, &filetime(now).to_le_bytes()); // MsvAvTimestamp
    push_av_pair(&mut target_info, 0, &[]); // MsvAvEOL

    let payload_offset = 56u32;
    let target_name_offset = payload_offset;
    let target_info_offset = payload_offset + target_name.len() as u32;
    let target_name_len = target_name.len() as u16;
    let target_info_len = target_info.len() as u16;

    let mut msg = Vec::with_capacity(56 + target_name.len() + target_info.len());
    msg.extend_from_slice(NTLMSSP_SIG);
    msg.extend_from_slice(&2u32.to_le_bytes()); // MessageType
    msg.extend_from_slice(&target_name_len.to_le_bytes());
    msg.extend_from_slice(&target_name_len.to_le_bytes());
    msg.extend_from_slice(&target_name_offset.to_le_bytes());
    msg.extend_from_slice(&CHALLENGE_FLAGS.to_le_bytes());
    msg.extend_from_slice(server_challenge);
    msg.extend_from_slice(&[0u8; 8]); // Reserved
    msg.extend_from_slice(&target_info_len.to_le_bytes());
    msg.extend_from_slice(&target_info_len.to_le_bytes());
    msg.extend_from_slice(&target_info_offset.to_le_bytes());
    msg.extend_from_slice(&[0u8; 8]); // Version
    msg.extend_from_slice(&target_name);
    msg.extend_from_slice(&target_info);
    msg
}

#[derive(Debug)]
struct AuthenticateMessage {
    username: String,
    domain: String,
    nt_response: Vec<u8>,
}

/// Read a (len, maxlen, offset) security buffer descriptor at `at`.
fn ntlm_field<'a>(data: &'a [u8], at: usize, what: &'static str) -> Option<&'a [u8]> {
    let len = get_u16(data, at, what).ok()? as usize;
    let offset = get_u32(data, at + 4, what).ok()? as usize;
    get_bytes(data, offset, len, what).ok()
}

/// Parse an NTLM AUTHENTICATE_MESSAGE (type 3).
/// MS-NLMP 2.2.1.3
fn parse_authenticate_message(data: &[u8]) -> Option<AuthenticateMessage> {
    if ntlm_message_type(data)? != 3 {
        return None;
    }
    let nt_response = ntlm_field(data, 20, "NtChallengeResponse")?.to_vec();
    let domain = utf16le_to_string(ntlm_field(data, 28, "DomainName")?);
    let username = utf16le_to_string(ntlm_field(data, 36, "UserName")?);
    Some(AuthenticateMessage {
        username,
        domain,
        nt_response,
    })
}

// ---- Client-side tokens ----
//
// Used by test clients that drive the engine over the wire.

/// An NTLM NEGOTIATE_MESSAGE (type 1) requesting Unicode and NTLM.
pub fn build_negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(NTLMSSP_SIG);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&(0x0000_0001u32 | 0x0000_0004 | 0x0000_0200).to_le_bytes());
    msg.extend_from_slice(&[0u8; 16]); // empty domain and workstation fields
    msg
}

/// An NTLM AUTHENTICATE_MESSAGE (type 3) for `username`, carrying
/// `nt_response` as the NT challenge response.
pub fn build_authenticate_message(username: &str, domain: &str, nt_response: &[u8]) -> Vec<u8> {
    let domain = string_to_utf16le(domain);
    let user = string_to_utf16le(username);
    let workstation = string_to_utf16le("CLIENT");
    let header_len = 72u32;

    let fields: [&[u8]; 6] = [&[], nt_response, &domain, &user, &workstation, &[]];
    let mut msg = Vec::new();
    msg.extend_from_slice(NTLMSSP_SIG);
    msg.extend_from_slice(&3u32.to_le_bytes());
    let mut offset = header_len;
    for field in fields {
        msg.extend_from_slice(&(field.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(field.len() as u16).to_le_bytes());
        msg.extend_from_slice(&offset.to_le_bytes());
        offset += field.len() as u32;
    }
    msg.extend_from_slice(&0x0000_0201u32.to_le_bytes()); // NegotiateFlags
    msg.extend_from_slice(&[0u8; 8]); // Version
    for field in fields {
        msg.extend_from_slice(field);
    }
    msg
}

/// The client half of NTLMv2: the NtChallengeResponse (NTProofStr plus
/// client blob) for `server_challenge`, and the session base key both ends
/// derive from it.
pub fn build_ntlmv2_response(
    password: &str,
    username: &str,
    domain: &str,
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
) -> (Vec<u8>, [u8; SESSION_KEY_LEN]) {
    let mut blob = Vec::with_capacity(NTLMV2_BLOB_HEADER_LEN + 8);
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]); // RespType, HiRespType, reserved
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    push_av_pair(&mut blob, 0, &[]); // MsvAvEOL
    blob.extend_from_slice(&[0u8; 4]);

    let response_key = ntowf_v2(password, username, domain);
    let mut mac = hmac_md5(&response_key);
    mac.update(server_challenge);
    mac.update(&blob);
    let proof = to_key(mac);

    let mut mac = hmac_md5(&response_key);
    mac.update(&proof);
    let session_key = to_key(mac);

    let mut response = proof.to_vec();
    response.extend_from_slice(&blob);
    (response, session_key)
}

/// Pull the server challenge out of a (possibly SPNEGO-wrapped)
/// CHALLENGE_MESSAGE.
pub fn parse_challenge(token: &[u8]) -> Option<[u8; 8]> {
    let msg = unwrap_spnego(token);
    if ntlm_message_type(msg)? != 2 {
        return None;
    }
    let mut challenge = [0u8; 8];
    challenge.copy_from_slice(get_bytes(msg, 24, 8, "ServerChallenge").ok()?);
    Some(challenge)
}
