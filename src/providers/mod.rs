//! Lookups against public intelligence APIs.

use anyhow::Context;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::catalog::ProviderKind;
use crate::config::ProviderSettings;

pub mod github;
pub mod hunter;
pub mod ipinfo;
pub mod moralis;
pub mod veriphone;

pub use github::GitHubProvider;
pub use hunter::HunterProvider;
pub use ipinfo::IpInfoProvider;
pub use moralis::MoralisProvider;
pub use veriphone::VeriphoneProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unable to reach {service}: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },
    #[error("unexpected response from {service}: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{0} API key is not configured")]
    MissingApiKey(&'static str),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("failed to encode provider result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sends `request` and decodes a successful JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    service: &'static str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { service, source })?;
    let status = response.status();
    if !status.is_success() {
        debug!(service, %status, "provider returned an error status");
        return Err(ProviderError::Status {
            service,
            status: status.as_u16(),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|source| ProviderError::Decode { service, source })
}

pub(crate) fn http_client(settings: &ProviderSettings) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(settings.timeout)
        .user_agent(concat!("reconboard/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build provider HTTP client")
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[derive(Clone)]
pub struct Providers {
    github: GitHubProvider,
    ipinfo: IpInfoProvider,
    hunter: HunterProvider,
    moralis: MoralisProvider,
    veriphone: VeriphoneProvider,
}

impl Providers {
    pub fn new(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let client = http_client(settings)?;
        Ok(Self {
            github: GitHubProvider::new(
                client.clone(),
                &settings.github_url,
                settings.github_token.clone(),
            ),
            ipinfo: IpInfoProvider::new(
                client.clone(),
                &settings.ipinfo_url,
                settings.ipinfo_token.clone(),
            ),
            hunter: HunterProvider::new(
                client.clone(),
                &settings.hunter_url,
                settings.hunter_api_key.clone(),
            ),
            moralis: MoralisProvider::new(
                client.clone(),
                &settings.moralis_url,
                settings.moralis_api_key.clone(),
            ),
            veriphone: VeriphoneProvider::new(
                client,
                &settings.veriphone_url,
                settings.veriphone_api_key.clone(),
            ),
        })
    }

    pub async fn lookup(&self, kind: ProviderKind, target: &str) -> Result<Value, ProviderError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ProviderError::InvalidTarget("target is empty".to_string()));
        }
        debug!(provider = %kind, target, "provider lookup");
        let value = match kind {
            ProviderKind::Github => serde_json::to_value(self.github.lookup(target).await?)?,
            ProviderKind::Ipinfo => serde_json::to_value(self.ipinfo.lookup(target).await?)?,
            ProviderKind::Hunter => serde_json::to_value(self.hunter.lookup(target).await?)?,
            ProviderKind::Moralis => serde_json::to_value(self.moralis.lookup(target).await?)?,
            ProviderKind::Veriphone => {
                serde_json::to_value(self.veriphone.lookup(target).await?)?
            }
        };
        Ok(value)
    }
}
