//! TREE_CONNECT and TREE_DISCONNECT.

use tracing::{debug, info};

use crate::dispatch::{HandlerResult, Request, Response};
use crate::smb2::status::NtStatus;
use crate::smb2::tree::{
    decode_tree_disconnect, encode_tree_disconnect, TreeConnectRequest, TreeConnectResponse,
    MAXIMAL_ACCESS_FULL, MAXIMAL_ACCESS_READ, SHARE_TYPE_DISK,
};
use crate::state::{ConnectionState, TreeConnection};

/// The IPC share is never served.
const IPC_SHARE: &str = "IPC$";

pub async fn tree_connect(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = TreeConnectRequest::decode(&req.body)?;
    let engine = conn.engine.clone();
    let session = conn.validate_session(req.header.session_id)?;

    let name = request.share_name();
    let share = match engine.share(name) {
        Some(share) if !name.eq_ignore_ascii_case(IPC_SHARE) => share,
        _ => {
            debug!(share = name, "Unknown share");
            return Err(NtStatus::BadNetworkName.into());
        }
    };
    if session.is_guest && !share.guest_ok {
        debug!(share = %share.name, "Guest refused");
        return Err(NtStatus::AccessDenied.into());
    }

    let tree_id = engine.ids.tree_id()?;
    session.trees.insert(
        tree_id,
        TreeConnection::new(tree_id, share.name.clone(), share.store.clone(), share.read_only),
    );
    info!(share = %share.name, tree_id, read_only = share.read_only, "Tree connected");

    let resp = TreeConnectResponse {
        share_type: SHARE_TYPE_DISK,
        share_flags: 0,
        capabilities: 0,
        maximal_access: if share.read_only {
            MAXIMAL_ACCESS_READ
        } else {
            MAXIMAL_ACCESS_FULL
        },
    };
    Ok(Response::ok(resp.encode()).tree_id(tree_id))
}

pub async fn tree_disconnect(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    decode_tree_disconnect(&req.body)?;
    let tree_id = req.header.tree_id;
    let session = conn.validate_session(req.header.session_id)?;
    let mut tree = session
        .trees
        .remove(&tree_id)
        .ok_or(NtStatus::NetworkNameDeleted)?;
    tree.close_all().await;
    info!(share = %tree.share_name, tree_id, "Tree disconnected");
    Ok(Response::ok(encode_tree_disconnect()))
}
