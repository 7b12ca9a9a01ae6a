use alloy::{primitives::hex, sol_types::SolInterface};

use crate::sol_types::{
    IAccessControl::IAccessControlErrors, IInitializable::IInitializableErrors,
};

/// Revert string used by `EIP173Proxy` when a non-owner calls an owner-only entry point.
pub const PROXY_NOT_AUTHORIZED: &str = "NOT_AUTHORIZED";

/// Decode revert data returned by one of the vault or proxy contracts into a readable reason.
///
/// Custom errors of the access-control and initializer modules are rendered with their
/// arguments, `Error(string)` and `Panic(uint256)` payloads with their message. Unknown payloads
/// are returned as hex.
pub fn decode_revert(data: &[u8]) -> String {
    if let Ok(err) = IAccessControlErrors::abi_decode(data, true) {
        return match err {
            IAccessControlErrors::AccessControlUnauthorizedAccount(e) => format!(
                "AccessControlUnauthorizedAccount(account: {:#x}, neededRole: {})",
                e.account, e.neededRole
            ),
            IAccessControlErrors::AccessControlBadConfirmation(_) => {
                "AccessControlBadConfirmation()".to_string()
            },
        };
    }
    if let Ok(err) = IInitializableErrors::abi_decode(data, true) {
        return match err {
            IInitializableErrors::InvalidInitialization(_) => "InvalidInitialization()".to_string(),
            IInitializableErrors::NotInitializing(_) => "NotInitializing()".to_string(),
        };
    }
    alloy::sol_types::decode_revert_reason(data).unwrap_or_else(|| hex::encode_prefixed(data))
}

/// Whether the revert reason is the proxy's ownership check.
pub fn is_proxy_not_authorized(reason: &str) -> bool {
    reason.contains(PROXY_NOT_AUTHORIZED)
}

/// Whether the revert reason is an `AccessControl` membership check.
///
/// Matches both decoded revert data and raw node messages that embed the error name.
pub fn is_access_control_unauthorized(reason: &str) -> bool {
    reason.contains("AccessControlUnauthorizedAccount")
}
