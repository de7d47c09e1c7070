use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{fetch_json, trim_base, ProviderError};

const SERVICE: &str = "Moralis";
const CHAIN: &str = "eth";
const TOKEN_LIMIT: usize = 10;
const TRANSACTION_FETCH: usize = 10;
const TRANSACTION_LIMIT: usize = 5;
const ETH_DECIMALS: u32 = 18;

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    balance: Option<String>,
}

/// Moralis sends decimals as either a number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Decimals {
    Number(u32),
    Text(String),
}

impl Decimals {
    fn value(&self) -> Option<u32> {
        match self {
            Decimals::Number(value) => Some(*value),
            Decimals::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiToken {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    balance: Option<String>,
    #[serde(default)]
    token_address: Option<String>,
    #[serde(default)]
    decimals: Option<Decimals>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    result: Vec<ApiTransaction>,
}

#[derive(Debug, Deserialize)]
struct ApiTransaction {
    hash: String,
    #[serde(default)]
    from_address: Option<String>,
    #[serde(default)]
    to_address: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    block_timestamp: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenHolding {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub balance: String,
    pub contract_address: Option<String>,
    pub decimals: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: String,
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub direction: Direction,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletReport {
    pub address: String,
    pub network: &'static str,
    pub symbol: &'static str,
    pub balance: String,
    pub tokens: Vec<TokenHolding>,
    pub recent_transactions: Vec<Transaction>,
    pub transactions_fetched: usize,
    pub first_seen: Option<String>,
    pub last_activity: Option<String>,
    pub data_source: &'static str,
}

#[derive(Clone)]
pub struct MoralisProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl MoralisProvider {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            api_key,
        }
    }

    pub async fn lookup(&self, address: &str) -> Result<WalletReport, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey(SERVICE))?;
        let address = address.trim();
        if !is_eth_address(address) {
            return Err(ProviderError::InvalidTarget(format!(
                "'{address}' is not an Ethereum address"
            )));
        }

        let limit = TRANSACTION_FETCH.to_string();
        let balance_path = format!("{address}/balance");
        let tokens_path = format!("{address}/erc20");
        let transaction_query = [("limit", limit.as_str())];
        let (balance, tokens, transactions) = tokio::try_join!(
            self.get::<BalanceResponse>(api_key, &balance_path, &[]),
            self.get::<Vec<ApiToken>>(api_key, &tokens_path, &[]),
            self.get::<TransactionsResponse>(api_key, address, &transaction_query),
        )?;

        Ok(build_report(address, balance, tokens, transactions.result))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        api_key: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let request = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .header("X-API-Key", api_key)
            .header(ACCEPT, "application/json")
            .query(&[("chain", CHAIN)])
            .query(query);
        fetch_json(SERVICE, request).await
    }
}

fn build_report(
    address: &str,
    balance: BalanceResponse,
    tokens: Vec<ApiToken>,
    transactions: Vec<ApiTransaction>,
) -> WalletReport {
    // newest first
    let last_activity = transactions.first().and_then(|tx| tx.block_timestamp.clone());
    let first_seen = transactions.last().and_then(|tx| tx.block_timestamp.clone());
    let transactions_fetched = transactions.len();

    WalletReport {
        address: address.to_string(),
        network: "Ethereum",
        symbol: "ETH",
        balance: format_units(balance.balance.as_deref().unwrap_or("0"), ETH_DECIMALS),
        tokens: tokens
            .into_iter()
            .take(TOKEN_LIMIT)
            .map(|token| {
                let decimals = token
                    .decimals
                    .as_ref()
                    .and_then(Decimals::value)
                    .unwrap_or(ETH_DECIMALS);
                TokenHolding {
                    name: token.name,
                    symbol: token.symbol,
                    balance: format_units(token.balance.as_deref().unwrap_or("0"), decimals),
                    contract_address: token.token_address,
                    decimals,
                }
            })
            .collect(),
        recent_transactions: transactions
            .into_iter()
            .take(TRANSACTION_LIMIT)
            .map(|tx| {
                let direction = match &tx.to_address {
                    Some(to) if to.eq_ignore_ascii_case(address) => Direction::Received,
                    _ => Direction::Sent,
                };
                Transaction {
                    value: format_units(tx.value.as_deref().unwrap_or("0"), ETH_DECIMALS),
                    hash: tx.hash,
                    from: tx.from_address,
                    to: tx.to_address,
                    timestamp: tx.block_timestamp,
                    direction,
                }
            })
            .collect(),
        transactions_fetched,
        first_seen,
        last_activity,
        data_source: "Moralis API",
    }
}

pub fn is_eth_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Renders an integer amount of base units with six decimals, rounding half up.
pub fn format_units(raw: &str, decimals: u32) -> String {
    const SCALE: u128 = 1_000_000;
    let Ok(value) = raw.trim().parse::<u128>() else {
        return "0.000000".to_string();
    };
    let micros = if decimals >= 6 {
        match 10u128.checked_pow(decimals - 6) {
            Some(divisor) => {
                let quotient = value / divisor;
                let remainder = value % divisor;
                if remainder >= divisor - remainder {
                    quotient + 1
                } else {
                    quotient
                }
            }
            None => 0,
        }
    } else {
        value.saturating_mul(10u128.pow(6 - decimals))
    };
    format!("{}.{:06}", micros / SCALE, micros % SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe";

    #[test]
    fn validates_addresses() {
        assert!(is_eth_address(ADDRESS));
        assert!(!is_eth_address("0x1234"));
        assert!(!is_eth_address("de0B295669a9FD93d5F28D9Ec85E40f4cb697BAe00"));
        assert!(!is_eth_address("0xZZ0B295669a9FD93d5F28D9Ec85E40f4cb697BAe"));
    }

    #[test]
    fn formats_wei_and_token_units() {
        assert_eq!(format_units("1500000000000000000", 18), "1.500000");
        assert_eq!(format_units("1", 18), "0.000000");
        assert_eq!(format_units("999999500000000000", 18), "1.000000");
        assert_eq!(format_units("1234567", 6), "1.234567");
        assert_eq!(format_units("42", 0), "42.000000");
        assert_eq!(format_units("not-a-number", 18), "0.000000");
    }

    #[test]
    fn classifies_transaction_direction() {
        let transactions = vec![
            ApiTransaction {
                hash: "0xaaa".to_string(),
                from_address: Some("0x1111111111111111111111111111111111111111".to_string()),
                to_address: Some(ADDRESS.to_lowercase()),
                value: Some("2000000000000000000".to_string()),
                block_timestamp: Some("2024-05-02T10:00:00.000Z".to_string()),
            },
            ApiTransaction {
                hash: "0xbbb".to_string(),
                from_address: Some(ADDRESS.to_string()),
                to_address: None,
                value: None,
                block_timestamp: Some("2024-05-01T10:00:00.000Z".to_string()),
            },
        ];
        let report = build_report(
            ADDRESS,
            BalanceResponse {
                balance: Some("250000000000000000".to_string()),
            },
            Vec::new(),
            transactions,
        );

        assert_eq!(report.balance, "0.250000");
        assert_eq!(report.recent_transactions[0].direction, Direction::Received);
        assert_eq!(report.recent_transactions[0].value, "2.000000");
        assert_eq!(report.recent_transactions[1].direction, Direction::Sent);
        assert_eq!(report.first_seen.as_deref(), Some("2024-05-01T10:00:00.000Z"));
        assert_eq!(report.last_activity.as_deref(), Some("2024-05-02T10:00:00.000Z"));
    }
}
