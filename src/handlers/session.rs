//! NEGOTIATE, SESSION_SETUP, LOGOFF, ECHO and CANCEL.

use tracing::{debug, info, warn};

use crate::auth::{build_spnego_init, process_auth, AuthContext, AuthStep};
use crate::clock::filetime;
use crate::dispatch::{HandlerResult, Request, Response};
use crate::smb2::echo::{decode_cancel, decode_echo, encode_echo};
use crate::smb2::negotiate::{
    NegotiateRequest, NegotiateResponse, CAP_LARGE_MTU, DIALECT_SMB2_0_2, DIALECT_SMB2_1,
    SECURITY_SIGNING_ENABLED, SECURITY_SIGNING_REQUIRED,
};
use crate::smb2::session::{
    decode_logoff, encode_logoff, SessionSetupRequest, SessionSetupResponse, SESSION_FLAG_IS_GUEST,
};
use crate::smb2::status::NtStatus;
use crate::state::{ConnectionState, Session, SessionState};

/// Dialects in order of preference.
const SUPPORTED_DIALECTS: [u16; 2] = [DIALECT_SMB2_1, DIALECT_SMB2_0_2];

/// SMB 2.0.2 caps read, write and transact sizes at 64 KiB.
const SMB2_0_2_MAX_IO: u32 = 64 * 1024;

pub async fn negotiate(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = NegotiateRequest::decode(&req.body)?;
    if conn.dialect.is_some() {
        warn!("Second NEGOTIATE on one connection");
        return Err(NtStatus::InvalidParameter.into());
    }

    let Some(dialect) = SUPPORTED_DIALECTS
        .into_iter()
        .find(|d| request.dialects.contains(d))
    else {
        warn!(offered = ?request.dialects, "No common dialect");
        return Err(NtStatus::NotSupported.into());
    };

    let engine = conn.engine.clone();
    conn.dialect = Some(dialect);
    if request.security_mode & SECURITY_SIGNING_REQUIRED != 0 {
        conn.signing_required = true;
    }

    let mut security_mode = SECURITY_SIGNING_ENABLED;
    if engine.config.signing_required {
        security_mode |= SECURITY_SIGNING_REQUIRED;
    }
    let (capabilities, io_cap) = if dialect == DIALECT_SMB2_1 {
        (CAP_LARGE_MTU, u32::MAX)
    } else {
        (0, SMB2_0_2_MAX_IO)
    };

    let resp = NegotiateResponse {
        security_mode,
        dialect,
        server_guid: engine.server_guid,
        capabilities,
        max_transact_size: engine.config.max_transact_size.min(io_cap),
        max_read_size: engine.config.max_read_size.min(io_cap),
        max_write_size: engine.config.max_write_size.min(io_cap),
        system_time: filetime(engine.clock.now()),
        server_start_time: filetime(engine.start_time),
        security_buffer: build_spnego_init(),
    };

    info!(
        dialect = format_args!("0x{:04x}", dialect),
        signing_required = conn.signing_required,
        "Negotiated"
    );
    Ok(Response::ok(resp.encode()))
}

pub async fn session_setup(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = SessionSetupRequest::decode(&req.body)?;
    let engine = conn.engine.clone();

    let session_id = match req.header.session_id {
        0 => {
            if conn.live_sessions() >= engine.config.max_sessions_per_connection {
                warn!(
                    limit = engine.config.max_sessions_per_connection,
                    "Session limit reached"
                );
                return Err(NtStatus::InsufficientResources.into());
            }
            let id = engine.ids.session_id()?;
            conn.sessions.insert(id, Session::new_pending(id));
            debug!(session_id = id, "Session pending");
            id
        }
        id => id,
    };

    let Some(session) = conn.sessions.get_mut(&session_id) else {
        return Err(NtStatus::SessionExpired.into());
    };
    let auth_state = match &mut session.state {
        SessionState::Pending(state) => state,
        SessionState::Valid => {
            warn!(session_id, "Re-authentication of an established session");
            return Err(NtStatus::InvalidParameter.into());
        }
        SessionState::Invalidated => return Err(NtStatus::SessionExpired.into()),
    };

    let ctx = AuthContext {
        users: &engine.config.users,
        allow_guest: engine.allow_guest(),
        server_name: &engine.config.server_name,
        now: engine.clock.now(),
    };

    match process_auth(auth_state, &request.security_buffer, &ctx) {
        Ok(AuthStep::Challenge(token)) => {
            let resp = SessionSetupResponse {
                session_flags: 0,
                security_buffer: token,
            };
            Ok(Response::with_status(NtStatus::MoreProcessingRequired, resp.encode()).session_id(session_id))
        }
        Ok(AuthStep::Complete(outcome)) => {
            let client_requires = u16::from(request.security_mode) & SECURITY_SIGNING_REQUIRED != 0;
            session.state = SessionState::Valid;
            session.is_guest = outcome.is_guest;
            session.signing_required = outcome.session_key.is_some()
                && (engine.config.signing_required || client_requires);
            session.signing_key = outcome.session_key;
            session.username = outcome.username;
            info!(
                user = %session.username,
                session_id,
                guest = session.is_guest,
                "Session established"
            );

            let resp = SessionSetupResponse {
                session_flags: if outcome.is_guest { SESSION_FLAG_IS_GUEST } else { 0 },
                security_buffer: outcome.token,
            };
            Ok(Response::ok(resp.encode()).session_id(session_id))
        }
        Err(status) => {
            conn.sessions.remove(&session_id);
            warn!(session_id, status = %status, "Authentication failed");
            Err(status.into())
        }
    }
}

pub async fn logoff(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    decode_logoff(&req.body)?;
    let session_id = req.header.session_id;
    match conn.sessions.get_mut(&session_id) {
        Some(session) if session.state == SessionState::Valid => {
            // The reply is signed with the key the session held.
            let key = session.signing_key;
            session.invalidate().await;
            info!(session_id, "Logged off");
            Ok(Response::ok(encode_logoff()).signing_key(key))
        }
        Some(session) if session.state == SessionState::Invalidated => {
            Err(NtStatus::UserSessionDeleted.into())
        }
        _ => Err(NtStatus::SessionExpired.into()),
    }
}

pub async fn echo(_conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    decode_echo(&req.body)?;
    Ok(Response::ok(encode_echo()))
}

/// Requests complete before the next one is read, so there is never
/// anything to cancel.
pub async fn cancel(_conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    decode_cancel(&req.body)?;
    debug!(target_message_id = req.header.message_id, "Cancel: nothing pending");
    Ok(Response::no_reply())
}
