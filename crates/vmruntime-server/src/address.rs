//! Caller address classification.
//!
//! Addresses are classified by their leading dotted octets, so a value
//! that is not a dotted IPv4 address simply falls in no class.

use vmruntime_core::RemoteAddr;
use vmruntime_middleware::Request;

pub use vmruntime_middleware::context::REAL_IP_HEADER;

const LOCAL_NETWORKS: [&str; 2] = ["127.0", "172.17"];
const TRUSTED_NETWORKS: [&str; 2] = ["169.254", "192.168"];
const TRUSTED_HOST: &str = "10.0.2.2";
const HEALTH_CHECK_NETWORKS: [&str; 4] = ["130.211.0", "130.211.1", "130.211.2", "130.211.3"];

/// Returns the caller address: `X-Google-Real-IP` when present, else the
/// peer address, else an empty string.
pub fn remote_address(request: &Request) -> String {
    request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<RemoteAddr>()
                .map(RemoteAddr::ip_string)
        })
        .unwrap_or_default()
}

fn in_networks(networks: &[&str], octets: usize, address: &str) -> bool {
    let network = address.split('.').take(octets).collect::<Vec<_>>().join(".");
    networks.contains(&network.as_str())
}

/// Loopback or container bridge.
pub fn is_local(address: &str) -> bool {
    in_networks(&LOCAL_NETWORKS, 2, address)
}

/// Local, link-local, private LAN or the VM host.
pub fn is_trusted(address: &str) -> bool {
    address == TRUSTED_HOST || in_networks(&TRUSTED_NETWORKS, 2, address) || is_local(address)
}

/// Trusted, or one of the platform health checker ranges.
pub fn is_health_checker(address: &str) -> bool {
    is_trusted(address) || in_networks(&HEALTH_CHECK_NETWORKS, 3, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    #[test]
    fn test_local() {
        assert!(is_local("127.0.0.1"));
        assert!(is_local("172.17.0.5"));
        assert!(!is_local("172.18.0.5"));
        assert!(!is_local("10.0.2.2"));
        assert!(!is_local(""));
    }

    #[test]
    fn test_trusted() {
        assert!(is_trusted("10.0.2.2"));
        assert!(!is_trusted("10.0.2.3"));
        assert!(is_trusted("169.254.1.1"));
        assert!(is_trusted("192.168.10.4"));
        assert!(is_trusted("127.0.0.1"));
        assert!(!is_trusted("8.8.8.8"));
    }

    #[test]
    fn test_health_checker() {
        assert!(is_health_checker("130.211.0.9"));
        assert!(is_health_checker("130.211.3.200"));
        assert!(!is_health_checker("130.211.4.1"));
        assert!(is_health_checker("192.168.0.1"));
        assert!(!is_health_checker("1.2.3.4"));
    }

    #[test]
    fn test_remote_address_prefers_header() {
        let mut request = http::Request::builder()
            .uri("/")
            .header("X-Google-Real-IP", "130.211.1.1")
            .body(Full::new(Bytes::new()))
            .unwrap();
        request
            .extensions_mut()
            .insert(RemoteAddr("127.0.0.1:4000".parse().unwrap()));
        assert_eq!(remote_address(&request), "130.211.1.1");

        request.headers_mut().remove(REAL_IP_HEADER);
        assert_eq!(remote_address(&request), "127.0.0.1");
    }

    #[test]
    fn test_remote_address_unknown() {
        let request = http::Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert_eq!(remote_address(&request), "");
    }

    proptest::proptest! {
        #[test]
        fn prop_classes_are_nested(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let address = format!("{a}.{b}.{c}.{d}");
            if is_local(&address) {
                proptest::prop_assert!(is_trusted(&address));
            }
            if is_trusted(&address) {
                proptest::prop_assert!(is_health_checker(&address));
            }
        }

        #[test]
        fn prop_arbitrary_text_never_panics(address in ".*") {
            let _ = is_health_checker(&address);
        }
    }
}
