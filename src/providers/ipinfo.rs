use std::net::{IpAddr, Ipv4Addr};

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{fetch_json, trim_base, ProviderError};

const SERVICE: &str = "IPInfo";

#[derive(Debug, Default, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    postal: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Coordinates {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub country: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub postal: Option<String>,
    pub timezone: Option<String>,
    pub coordinates: Coordinates,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub isp: Option<String>,
    pub organization: Option<String>,
    pub asn: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoReport {
    pub target: String,
    #[serde(rename = "resolvedIP")]
    pub resolved_ip: Ipv4Addr,
    pub location: Location,
    pub network: Network,
    pub is_hosting: bool,
    pub accuracy: &'static str,
    pub data_source: &'static str,
}

impl GeoReport {
    fn private(target: &str, ip: Ipv4Addr) -> Self {
        Self {
            target: target.to_string(),
            resolved_ip: ip,
            location: Location {
                country: None,
                country_name: Some("Private Network".to_string()),
                region: None,
                city: None,
                postal: None,
                timezone: None,
                coordinates: Coordinates {
                    latitude: None,
                    longitude: None,
                },
            },
            network: Network {
                isp: Some("Private Network".to_string()),
                organization: Some("Private Network".to_string()),
                asn: None,
                hostname: (target != ip.to_string()).then(|| target.to_string()),
            },
            is_hosting: false,
            accuracy: "Local network",
            data_source: "Local analysis",
        }
    }

    fn from_response(target: &str, ip: Ipv4Addr, info: IpInfoResponse) -> Self {
        let (latitude, longitude) = info.loc.as_deref().map(parse_loc).unwrap_or((None, None));
        let asn = info
            .org
            .as_deref()
            .and_then(|org| org.split_whitespace().next())
            .filter(|token| token.starts_with("AS"))
            .map(str::to_string);
        let is_hosting = info
            .org
            .as_deref()
            .map(|org| org.to_lowercase().contains("hosting"))
            .unwrap_or(false);
        let country_name = info
            .country
            .as_deref()
            .map(|code| country_name(code).unwrap_or(code).to_string());

        Self {
            target: target.to_string(),
            resolved_ip: ip,
            location: Location {
                country: info.country,
                country_name,
                region: info.region,
                city: info.city,
                postal: info.postal,
                timezone: info.timezone,
                coordinates: Coordinates {
                    latitude,
                    longitude,
                },
            },
            network: Network {
                isp: info.org.clone(),
                organization: info.org,
                asn,
                hostname: info.hostname,
            },
            is_hosting,
            accuracy: "City level",
            data_source: "IPInfo.io",
        }
    }
}

#[derive(Clone)]
pub struct IpInfoProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl IpInfoProvider {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            token,
        }
    }

    pub async fn lookup(&self, target: &str) -> Result<GeoReport, ProviderError> {
        let ip = resolve_ipv4(target).await?;
        if is_non_routable(ip) {
            return Ok(GeoReport::private(target, ip));
        }

        let mut request = self
            .client
            .get(format!("{}/{}/json", self.base_url, ip))
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let info: IpInfoResponse = fetch_json(SERVICE, request).await?;
        Ok(GeoReport::from_response(target, ip, info))
    }
}

async fn resolve_ipv4(target: &str) -> Result<Ipv4Addr, ProviderError> {
    if let Ok(ip) = target.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    if target.parse::<IpAddr>().is_ok() {
        return Err(ProviderError::InvalidTarget(format!(
            "{target} is not an IPv4 address"
        )));
    }
    let addrs = tokio::net::lookup_host((target, 0))
        .await
        .map_err(|_| ProviderError::Resolve(target.to_string()))?;
    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ProviderError::Resolve(target.to_string()))
}

fn is_non_routable(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn parse_loc(loc: &str) -> (Option<f64>, Option<f64>) {
    let mut parts = loc.split(',').map(|part| part.trim().parse::<f64>().ok());
    let latitude = parts.next().flatten();
    let longitude = parts.next().flatten();
    (latitude, longitude)
}

fn country_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "US" => "United States",
        "CA" => "Canada",
        "GB" => "United Kingdom",
        "DE" => "Germany",
        "FR" => "France",
        "ES" => "Spain",
        "IT" => "Italy",
        "NL" => "Netherlands",
        "JP" => "Japan",
        "CN" => "China",
        "IN" => "India",
        "BR" => "Brazil",
        "RU" => "Russia",
        "AU" => "Australia",
        _ => return None,
    };
    Some(name)
}
