use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{fetch_json, trim_base, ProviderError};

const SERVICE: &str = "Veriphone";
const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: String,
    #[serde(default)]
    phone_valid: bool,
    #[serde(default)]
    phone_type: Option<String>,
    #[serde(default)]
    phone_region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country_prefix: Option<String>,
    #[serde(default)]
    international_number: Option<String>,
    #[serde(default)]
    local_number: Option<String>,
    #[serde(default)]
    carrier: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhoneLocation {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub prefix: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PhoneFormats {
    pub national: Option<String>,
    pub international: Option<String>,
    pub e164: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhoneReport {
    pub phone: String,
    pub is_valid: bool,
    pub carrier: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_mobile: bool,
    pub is_voip: bool,
    pub location: PhoneLocation,
    pub formatted: PhoneFormats,
    pub data_source: &'static str,
}

#[derive(Clone)]
pub struct VeriphoneProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl VeriphoneProvider {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            api_key,
        }
    }

    pub async fn lookup(&self, phone: &str) -> Result<PhoneReport, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey(SERVICE))?;
        let phone = normalize_e164(phone)?;

        let request = self
            .client
            .get(format!("{}/v2/verify", self.base_url))
            .query(&[("phone", phone.as_str()), ("key", api_key)]);
        let response: VerifyResponse = fetch_json(SERVICE, request).await?;
        if response.status != "success" {
            return Err(ProviderError::InvalidTarget(format!(
                "{SERVICE} could not verify {phone}"
            )));
        }
        Ok(build_report(phone, response))
    }
}

/// Reduces a free-form number to E.164. A leading `00` counts as `+`, ten
/// bare digits are read as a North American number, and anything else is
/// taken to already carry its country code.
pub fn normalize_e164(raw: &str) -> Result<String, ProviderError> {
    let raw = raw.trim();
    let explicit = raw.starts_with('+');
    let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let dialled_out = !explicit && digits.starts_with("00");
    if dialled_out {
        digits.drain(..2);
    }
    let stray = raw
        .chars()
        .skip(usize::from(explicit))
        .any(|c| !(c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')')));
    if stray || !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
        return Err(ProviderError::InvalidTarget(format!(
            "'{raw}' is not a phone number"
        )));
    }

    Ok(if !explicit && !dialled_out && digits.len() == 10 {
        format!("+1{digits}")
    } else {
        format!("+{digits}")
    })
}

fn build_report(phone: String, response: VerifyResponse) -> PhoneReport {
    let kind = response.phone_type.map(|kind| kind.to_lowercase());
    PhoneReport {
        is_valid: response.phone_valid,
        carrier: response.carrier.filter(|carrier| !carrier.is_empty()),
        is_mobile: kind.as_deref() == Some("mobile"),
        is_voip: kind.as_deref() == Some("voip"),
        kind,
        location: PhoneLocation {
            country: response.country,
            country_code: response.country_code,
            prefix: response.country_prefix.map(|prefix| format!("+{prefix}")),
            region: response.phone_region,
        },
        formatted: PhoneFormats {
            national: response.local_number,
            international: response.international_number,
            e164: phone.clone(),
        },
        phone,
        data_source: SERVICE,
    }
}
