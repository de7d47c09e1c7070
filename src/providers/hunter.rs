use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{fetch_json, trim_base, ProviderError};

const SERVICE: &str = "Hunter.io";
const EMAIL_LIMIT: usize = 10;
const EMPLOYEE_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct DomainSearchResponse {
    data: DomainSearchData,
}

#[derive(Debug, Deserialize)]
struct DomainSearchData {
    #[serde(default)]
    organization: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    emails: Vec<ApiEmail>,
}

#[derive(Debug, Deserialize)]
struct ApiSource {
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiVerification {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEmail {
    value: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<u32>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    sources: Vec<ApiSource>,
    #[serde(default)]
    verification: Option<ApiVerification>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailFinding {
    pub email: String,
    pub verified: bool,
    pub confidence: Option<u32>,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Employee {
    pub name: Option<String>,
    pub position: Option<String>,
    pub email: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailReport {
    pub domain: String,
    pub organization: Option<String>,
    pub emails: Vec<EmailFinding>,
    pub patterns: Vec<String>,
    pub total_found: usize,
    pub employees: Vec<Employee>,
    pub data_source: &'static str,
}

#[derive(Clone)]
pub struct HunterProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HunterProvider {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            api_key,
        }
    }

    pub async fn lookup(&self, domain: &str) -> Result<EmailReport, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey(SERVICE))?;
        let domain = normalize_domain(domain)?;

        let limit = EMAIL_LIMIT.to_string();
        let request = self
            .client
            .get(format!("{}/v2/domain-search", self.base_url))
            .query(&[
                ("domain", domain.as_str()),
                ("api_key", api_key),
                ("limit", limit.as_str()),
            ]);
        let response: DomainSearchResponse = fetch_json(SERVICE, request).await?;
        Ok(build_report(domain, response.data))
    }
}

fn normalize_domain(domain: &str) -> Result<String, ProviderError> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let valid = domain.contains('.')
        && !domain.starts_with('.')
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'));
    if valid {
        Ok(domain)
    } else {
        Err(ProviderError::InvalidTarget(format!(
            "'{domain}' is not a domain name"
        )))
    }
}

fn build_report(domain: String, data: DomainSearchData) -> EmailReport {
    let total_found = data.emails.len();
    let employees = data
        .emails
        .iter()
        .take(EMPLOYEE_LIMIT)
        .map(|email| Employee {
            name: full_name(email.first_name.as_deref(), email.last_name.as_deref()),
            position: email.position.clone(),
            email: email.value.clone(),
        })
        .collect();
    let emails = data
        .emails
        .into_iter()
        .take(EMAIL_LIMIT)
        .map(|email| EmailFinding {
            verified: email
                .verification
                .as_ref()
                .and_then(|verification| verification.result.as_deref())
                == Some("deliverable"),
            confidence: email.confidence,
            source: email
                .sources
                .into_iter()
                .find_map(|source| source.domain),
            kind: email.kind,
            email: email.value,
        })
        .collect();

    EmailReport {
        organization: data.organization,
        patterns: data
            .pattern
            .map(|pattern| vec![format!("{pattern}@{domain}")])
            .unwrap_or_default(),
        domain,
        emails,
        total_found,
        employees,
        data_source: SERVICE,
    }
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(name), None) | (None, Some(name)) => Some(name.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_validates_domains() {
        assert_eq!(normalize_domain(" Example.COM. ").unwrap(), "example.com");
        assert!(normalize_domain("localhost").is_err());
        assert!(normalize_domain("https://example.com").is_err());
    }

    #[test]
    fn builds_report_from_domain_search() {
        let data: DomainSearchData = serde_json::from_value(serde_json::json!({
            "organization": "Example Inc",
            "pattern": "{first}.{last}",
            "emails": [
                {
                    "value": "jane.doe@example.com",
                    "type": "personal",
                    "confidence": 94,
                    "first_name": "Jane",
                    "last_name": "Doe",
                    "position": "CTO",
                    "sources": [{"domain": "blog.example.com"}],
                    "verification": {"result": "deliverable"}
                },
                {
                    "value": "info@example.com",
                    "type": "generic"
                }
            ]
        }))
        .unwrap();

        let report = build_report("example.com".to_string(), data);
        assert_eq!(report.total_found, 2);
        assert_eq!(report.patterns, vec!["{first}.{last}@example.com"]);
        assert!(report.emails[0].verified);
        assert_eq!(report.emails[0].source.as_deref(), Some("blog.example.com"));
        assert!(!report.emails[1].verified);
        assert_eq!(report.employees[0].name.as_deref(), Some("Jane Doe"));
        assert!(report.employees[1].name.is_none());
    }
}
