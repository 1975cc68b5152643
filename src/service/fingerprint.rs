use crate::error::app_error::AppError;
use crate::models::device::{DeviceClass, DeviceFingerprint, GeoLocation};
use std::net::IpAddr;
use woothee::parser::Parser;

const UNKNOWN: &str = "unknown";
const MAX_DEVICE_TOKEN_LEN: usize = 256;

/// Read-only view over request headers.
pub trait HeaderLookup {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for rocket::http::HeaderMap<'_> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get_one(name)
    }
}

fn non_empty<'a>(headers: &'a impl HeaderLookup, name: &str) -> Option<&'a str> {
    headers.header(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Peers whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Vec<IpAddr>);

impl TrustedProxies {
    pub fn parse(entries: &[String]) -> Result<Self, AppError> {
        entries
            .iter()
            .map(|entry| {
                entry
                    .trim()
                    .parse::<IpAddr>()
                    .map_err(|_| AppError::Internal(format!("Invalid trusted proxy address: {}", entry)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

/// Rightmost `X-Forwarded-For` hop that is not one of our proxies. Hops left of it are client-written.
fn forwarded_client(headers: &impl HeaderLookup, trusted: &TrustedProxies) -> Option<IpAddr> {
    for hop in non_empty(headers, "X-Forwarded-For")?.rsplit(',') {
        let ip = hop.trim().parse::<IpAddr>().ok()?;
        if !trusted.contains(&ip) {
            return Some(ip);
        }
    }
    None
}

/// Client address. Forwarding headers count only when the peer is a trusted proxy or unknown
/// (in-process clients); otherwise the socket peer is the client.
pub fn resolve_ip(headers: &impl HeaderLookup, remote: Option<IpAddr>, trusted: &TrustedProxies) -> String {
    let behind_proxy = remote.is_none_or(|peer| trusted.contains(&peer));
    let resolved = if behind_proxy {
        forwarded_client(headers, trusted)
            .or_else(|| non_empty(headers, "X-Real-IP").and_then(|v| v.parse::<IpAddr>().ok()))
            .or(remote)
    } else {
        remote
    };

    resolved.map(|ip| ip.to_string()).unwrap_or_else(|| UNKNOWN.to_string())
}

fn known(value: &str) -> Option<&str> {
    (!value.is_empty() && value != "UNKNOWN").then_some(value)
}

fn device_class(category: &str, user_agent: &str) -> DeviceClass {
    // woothee has no tablet category; iPads and Android devices without "Mobile" are tablets
    if user_agent.contains("iPad") || (user_agent.contains("Android") && !user_agent.contains("Mobile")) {
        return DeviceClass::Tablet;
    }
    match category {
        "pc" => DeviceClass::Desktop,
        "smartphone" | "mobilephone" => DeviceClass::Mobile,
        "crawler" => DeviceClass::Bot,
        _ => DeviceClass::Unknown,
    }
}

fn parse_coordinate(headers: &impl HeaderLookup, name: &str) -> Option<f64> {
    non_empty(headers, name).and_then(|v| v.parse::<f64>().ok()).filter(|v| v.is_finite())
}

/// Location supplied by the edge proxy, if any.
pub fn resolve_location(headers: &impl HeaderLookup) -> Option<GeoLocation> {
    let country_code = non_empty(headers, "CF-IPCountry")
        .or_else(|| non_empty(headers, "X-Geo-Country"))
        // Cloudflare uses XX for unknown and T1 for Tor
        .filter(|c| !matches!(*c, "XX" | "T1"))?
        .to_ascii_uppercase();

    let owned = |name: &str| non_empty(headers, name).map(str::to_string);

    Some(GeoLocation {
        country_code,
        country: owned("X-Geo-Country-Name"),
        city: owned("X-Geo-City"),
        region: owned("X-Geo-Region"),
        latitude: parse_coordinate(headers, "X-Geo-Latitude"),
        longitude: parse_coordinate(headers, "X-Geo-Longitude"),
        timezone: owned("X-Geo-Timezone").filter(|tz| tz.parse::<chrono_tz::Tz>().is_ok()),
    })
}

/// Builds the fingerprint of the current request. Pure function of the headers and peer address.
pub fn resolve_fingerprint(headers: &impl HeaderLookup, remote: Option<IpAddr>, trusted: &TrustedProxies) -> DeviceFingerprint {
    let user_agent = non_empty(headers, "User-Agent").unwrap_or_default().to_string();

    let mut fingerprint = DeviceFingerprint {
        ip_address: resolve_ip(headers, remote, trusted),
        browser: UNKNOWN.to_string(),
        browser_version: UNKNOWN.to_string(),
        os: UNKNOWN.to_string(),
        device_class: DeviceClass::Unknown,
        device_token: non_empty(headers, "X-Device-Fingerprint")
            .filter(|t| t.len() <= MAX_DEVICE_TOKEN_LEN)
            .map(str::to_string),
        location: resolve_location(headers),
        user_agent: String::new(),
    };

    if let Some(result) = Parser::new().parse(&user_agent) {
        if let Some(name) = known(result.name) {
            fingerprint.browser = name.to_string();
        }
        if let Some(version) = known(result.version) {
            fingerprint.browser_version = version.to_string();
        }
        if let Some(os) = known(result.os) {
            fingerprint.os = os.to_string();
        }
        fingerprint.device_class = device_class(result.category, &user_agent);
    }

    fingerprint.user_agent = user_agent;
    fingerprint
}
