// Node licensing: key material, trust authority client, verification

pub mod api;
pub mod config;
pub mod keyring;
pub mod keys;
pub mod manager;
pub mod storage;
pub mod types;

pub use api::{TrustAuthority, UCenterClient};
pub use keyring::ServerKeyring;
pub use keys::NodeKey;
pub use manager::{check_ucenter_info, check_verify_info, verify, verify_at};
pub use storage::VerifyOverrides;
pub use types::*;
