use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EMBEDDED_CATALOG: &str = include_str!("../configs/tools.yaml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read tool catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tool catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("tool catalog is empty")]
    Empty,
    #[error("tool catalog contains an entry without an id")]
    MissingId,
    #[error("duplicate tool id '{0}'")]
    DuplicateId(String),
    #[error("tool '{0}' has neither a CLI flag nor a provider")]
    Unrunnable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Network,
    Domain,
    Social,
    File,
    Misc,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Network => "network",
            ToolCategory::Domain => "domain",
            ToolCategory::Social => "social",
            ToolCategory::File => "file",
            ToolCategory::Misc => "misc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

/// Public API that can answer a tool without spawning the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Ipinfo,
    Hunter,
    Moralis,
    Veriphone,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Github => "github",
            ProviderKind::Ipinfo => "ipinfo",
            ProviderKind::Hunter => "hunter",
            ProviderKind::Moralis => "moralis",
            ProviderKind::Veriphone => "veriphone",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsintTool {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    pub category: ToolCategory,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_params: Vec<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Rough duration in seconds, shown to clients before a scan starts.
    pub estimated_time: u64,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

impl OsintTool {
    pub fn matches(&self, filter: &ToolFilter) -> bool {
        if let Some(search) = non_empty(&filter.search) {
            let needle = search.to_lowercase();
            if !self.name.to_lowercase().contains(&needle)
                && !self.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(category) = non_empty(&filter.category) {
            if self.category.as_str() != category {
                return false;
            }
        }
        if let Some(risk) = non_empty(&filter.risk) {
            if self.risk_level.as_str() != risk {
                return false;
            }
        }
        true
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub risk: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tools: Vec<OsintTool>,
}

#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<OsintTool>,
}

impl ToolCatalog {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::new(file.tools)
    }

    pub fn from_embedded() -> Result<Self, CatalogError> {
        Self::from_yaml_str(EMBEDDED_CATALOG)
    }

    pub fn new(tools: Vec<OsintTool>) -> Result<Self, CatalogError> {
        if tools.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for tool in &tools {
            if tool.id.trim().is_empty() {
                return Err(CatalogError::MissingId);
            }
            if !seen.insert(tool.id.as_str()) {
                return Err(CatalogError::DuplicateId(tool.id.clone()));
            }
            if tool.flag.is_none() && tool.provider.is_none() {
                return Err(CatalogError::Unrunnable(tool.id.clone()));
            }
        }
        Ok(Self { tools })
    }

    pub fn all(&self) -> &[OsintTool] {
        &self.tools
    }

    pub fn get(&self, id: &str) -> Option<&OsintTool> {
        self.tools.iter().find(|tool| tool.id == id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn filter(&self, filter: &ToolFilter) -> Vec<OsintTool> {
        self.tools
            .iter()
            .filter(|tool| tool.matches(filter))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(search: Option<&str>, category: Option<&str>, risk: Option<&str>) -> ToolFilter {
        ToolFilter {
            search: search.map(str::to_string),
            category: category.map(str::to_string),
            risk: risk.map(str::to_string),
        }
    }

    #[test]
    fn embedded_catalog_lists_cli_and_api_tools() {
        let catalog = ToolCatalog::from_embedded().expect("catalog");
        assert_eq!(catalog.len(), 18);

        let whois = catalog.get("whois").expect("whois");
        assert_eq!(whois.flag.as_deref(), Some("-w"));
        assert_eq!(whois.category, ToolCategory::Domain);

        let github = catalog.get("github-recon").expect("github-recon");
        assert!(github.flag.is_none());
        assert_eq!(github.provider, Some(ProviderKind::Github));

        let ip = catalog.get("ip-lookup").expect("ip-lookup");
        assert_eq!(ip.flag.as_deref(), Some("-p"));
        assert_eq!(ip.provider, Some(ProviderKind::Ipinfo));
    }

    #[test]
    fn search_is_case_insensitive_over_name_and_description() {
        let catalog = ToolCatalog::from_embedded().expect("catalog");
        let by_name = catalog.filter(&filter(Some("WHOIS"), None, None));
        assert!(by_name.iter().any(|tool| tool.id == "whois"));

        let by_description = catalog.filter(&filter(Some("exif metadata"), None, None));
        assert_eq!(by_description.len(), 1);
        assert_eq!(by_description[0].id, "exif-metadata");

        // ids are not part of the searchable text
        assert!(catalog.filter(&filter(Some("exif-metadata"), None, None)).is_empty());
    }

    #[test]
    fn filters_combine_and_ignore_blank_values() {
        let catalog = ToolCatalog::from_embedded().expect("catalog");
        let high_network = catalog.filter(&filter(None, Some("network"), Some("high")));
        assert_eq!(high_network.len(), 1);
        assert_eq!(high_network[0].id, "port-scanner");

        let blank = catalog.filter(&filter(Some(""), Some("  "), None));
        assert_eq!(blank.len(), catalog.len());

        let unknown = catalog.filter(&filter(None, Some("satellite"), None));
        assert!(unknown.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = r#"
tools:
  - id: whois
    name: Whois
    description: one
    flag: "-w"
    category: domain
    estimatedTime: 1
    riskLevel: low
  - id: whois
    name: Whois again
    description: two
    flag: "-w"
    category: domain
    estimatedTime: 1
    riskLevel: low
"#;
        let err = ToolCatalog::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateId(id) if id == "whois"));
    }

    #[test]
    fn rejects_tools_without_a_way_to_run() {
        let yaml = r#"
tools:
  - id: ghost
    name: Ghost
    description: nothing to run
    category: misc
    estimatedTime: 1
    riskLevel: low
"#;
        let err = ToolCatalog::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, CatalogError::Unrunnable(id) if id == "ghost"));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let catalog = ToolCatalog::from_embedded().expect("catalog");
        let value = serde_json::to_value(catalog.get("port-scanner").expect("tool")).unwrap();
        assert_eq!(value["riskLevel"], "high");
        assert_eq!(value["estimatedTime"], 120);
        assert_eq!(value["requiredParams"][0], "host");
        assert_eq!(value["optionalParams"][0], "ports");
        assert!(value.get("provider").is_none());
    }
}
