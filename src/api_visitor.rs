use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use tracing::debug;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct VisitorTimezone {
    pub ip: String,
    pub timezone: Option<String>,
    pub detected: bool,
}

/// GET /api/visitor/timezone
///
/// Best-effort IANA timezone for the caller, as a fallback for clients
/// whose Intl API fails. Lookup failures return a null timezone, never an
/// error status.
pub async fn visitor_timezone(
    State(state): State<AppState>,
    headers: HeaderMap,
    addr: Option<ConnectInfo<SocketAddr>>,
) -> Json<VisitorTimezone> {
    let ip = client_ip(&headers, addr);
    let timezone = if is_private(&ip) {
        None
    } else {
        detect_timezone(&state.http, &ip).await
    };

    Json(VisitorTimezone { detected: timezone.is_some(), ip, timezone })
}

/// Prefer proxy-forwarded addresses over the direct connection.
fn client_ip(headers: &HeaderMap, addr: Option<ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        return real_ip.to_string();
    }

    match addr {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Loopback and RFC 1918 addresses cannot be geolocated.
fn is_private(ip: &str) -> bool {
    ip == "unknown"
        || ip == "::1"
        || ip.starts_with("127.")
        || ip.starts_with("192.168.")
        || ip.starts_with("10.")
}

async fn detect_timezone(client: &reqwest::Client, ip: &str) -> Option<String> {
    // ipapi.co first, geojs.io as fallback; the client carries a 2s timeout
    match query_ipapi(client, ip).await {
        Some(timezone) => Some(timezone),
        None => {
            debug!("ipapi.co lookup failed for {}, trying geojs.io", ip);
            query_geojs(client, ip).await
        }
    }
}

async fn query_ipapi(client: &reqwest::Client, ip: &str) -> Option<String> {
    let response = client
        .get(format!("https://ipapi.co/{}/timezone/", ip))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let timezone = response.text().await.ok()?.trim().to_string();
    if timezone.is_empty() || timezone.starts_with("Undefined") {
        return None;
    }
    Some(timezone)
}

async fn query_geojs(client: &reqwest::Client, ip: &str) -> Option<String> {
    let response = client
        .get(format!("https://get.geojs.io/v1/ip/timezone/{}.json", ip))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body: serde_json::Value = response.json().await.ok()?;
    body.get("timezone")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("X-Real-IP", "198.51.100.2".parse().unwrap());

        assert_eq!(client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "198.51.100.2");

        let headers = HeaderMap::new();
        let addr: SocketAddr = "203.0.113.9:4444".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(ConnectInfo(addr))), "203.0.113.9");
        assert_eq!(client_ip(&headers, None), "unknown");
    }

    #[test]
    fn test_private_addresses_skip_lookup() {
        assert!(is_private("unknown"));
        assert!(is_private("127.0.0.1"));
        assert!(is_private("::1"));
        assert!(is_private("192.168.1.20"));
        assert!(is_private("10.4.2.1"));
        assert!(!is_private("203.0.113.7"));
    }
}
