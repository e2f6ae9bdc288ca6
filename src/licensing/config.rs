use std::time::Duration;

/// Timeout for trust authority requests.
pub const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the reporter re-reads config while waiting for a license.
pub const LICENSE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Trust authority endpoints, relative to `UCenter.ServerAddress`.
pub mod endpoints {
    fn join(server: &str, path: &str) -> String {
        format!("{}/{}", server.trim_end_matches('/'), path)
    }

    pub fn request_license(server: &str) -> String {
        join(server, "license/request")
    }

    pub fn pubkey_map(server: &str) -> String {
        join(server, "license/pubkeys")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_tolerate_trailing_slash() {
        assert_eq!(
            endpoints::request_license("https://uc.example/"),
            "https://uc.example/license/request"
        );
        assert_eq!(
            endpoints::pubkey_map("https://uc.example"),
            "https://uc.example/license/pubkeys"
        );
    }
}
