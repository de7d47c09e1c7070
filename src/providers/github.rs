use std::collections::BTreeMap;

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{fetch_json, trim_base, ProviderError};

const SERVICE: &str = "GitHub";
const DATA_SOURCE: &str = "GitHub API";
const LIST_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    blog: Option<String>,
    #[serde(default)]
    twitter_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    html_url: String,
    #[serde(rename = "type", default)]
    account_type: Option<String>,
    #[serde(default)]
    public_repos: u64,
    #[serde(default)]
    public_gists: u64,
    #[serde(default)]
    followers: u64,
    #[serde(default)]
    following: u64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLicense {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    html_url: String,
    owner: ApiOwner,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    watchers_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    license: Option<ApiLicense>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    pushed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiContributor {
    login: String,
    #[serde(default)]
    contributions: u64,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    #[serde(default)]
    author: Option<ApiCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
    html_url: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub login: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub twitter_username: Option<String>,
    pub email: Option<String>,
    pub profile_url: String,
    pub account_type: Option<String>,
    pub public_repos: u64,
    pub public_gists: u64,
    pub followers: u64,
    pub following: u64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySummary {
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub description: Option<String>,
    pub url: String,
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
    pub open_issues: u64,
    pub size_kb: u64,
    pub language: Option<String>,
    pub license: Option<String>,
    pub topics: Vec<String>,
    pub homepage: Option<String>,
    pub private: bool,
    pub fork: bool,
    pub archived: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub login: String,
    pub contributions: u64,
    pub profile_url: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LanguageShare {
    pub name: String,
    pub percentage: f64,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub url: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserReport {
    pub profile: UserProfile,
    pub repositories: Vec<RepositorySummary>,
    pub data_source: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryReport {
    pub repository: RepositorySummary,
    pub contributors: Vec<Contributor>,
    pub languages: Vec<LanguageShare>,
    pub recent_commits: Vec<CommitSummary>,
    pub forks: Vec<RepositorySummary>,
    pub data_source: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GitHubReport {
    User(UserReport),
    Repository(RepositoryReport),
}

#[derive(Clone)]
pub struct GitHubProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubProvider {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            token,
        }
    }

    /// `owner/repo` profiles a repository; anything else is treated as a username.
    pub async fn lookup(&self, target: &str) -> Result<GitHubReport, ProviderError> {
        match parse_target(target)? {
            GitHubTarget::User(login) => self.user(login).await.map(GitHubReport::User),
            GitHubTarget::Repository(owner, repo) => self
                .repository(owner, repo)
                .await
                .map(GitHubReport::Repository),
        }
    }

    async fn user(&self, login: &str) -> Result<UserReport, ProviderError> {
        let user_path = format!("users/{login}");
        let repos_path = format!("users/{login}/repos?sort=updated&per_page={LIST_LIMIT}");
        let (user, repos) = tokio::try_join!(
            self.get::<ApiUser>(&user_path),
            self.get::<Vec<ApiRepo>>(&repos_path),
        )?;

        Ok(UserReport {
            profile: UserProfile::from(user),
            repositories: repos
                .into_iter()
                .take(LIST_LIMIT)
                .map(RepositorySummary::from)
                .collect(),
            data_source: DATA_SOURCE,
        })
    }

    async fn repository(&self, owner: &str, repo: &str) -> Result<RepositoryReport, ProviderError> {
        let base = format!("repos/{owner}/{repo}");
        let contributors_path = format!("{base}/contributors?per_page={LIST_LIMIT}");
        let languages_path = format!("{base}/languages");
        let commits_path = format!("{base}/commits?per_page={LIST_LIMIT}");
        let forks_path = format!("{base}/forks?sort=stargazers&per_page={LIST_LIMIT}");
        let (repository, contributors, languages, commits, forks) = tokio::try_join!(
            self.get::<ApiRepo>(&base),
            self.get::<Vec<ApiContributor>>(&contributors_path),
            self.get::<BTreeMap<String, u64>>(&languages_path),
            self.get::<Vec<ApiCommit>>(&commits_path),
            self.get::<Vec<ApiRepo>>(&forks_path),
        )?;

        Ok(RepositoryReport {
            repository: RepositorySummary::from(repository),
            contributors: contributors
                .into_iter()
                .take(LIST_LIMIT)
                .map(|contributor| Contributor {
                    login: contributor.login,
                    contributions: contributor.contributions,
                    profile_url: contributor.html_url,
                })
                .collect(),
            languages: language_breakdown(&languages),
            recent_commits: commits
                .into_iter()
                .take(LIST_LIMIT)
                .map(CommitSummary::from)
                .collect(),
            forks: forks
                .into_iter()
                .take(LIST_LIMIT)
                .map(RepositorySummary::from)
                .collect(),
            data_source: DATA_SOURCE,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        fetch_json(SERVICE, request).await
    }
}

#[derive(Debug, PartialEq)]
enum GitHubTarget<'a> {
    User(&'a str),
    Repository(&'a str, &'a str),
}

fn parse_target(target: &str) -> Result<GitHubTarget<'_>, ProviderError> {
    let target = target.trim();
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match target.split_once('/') {
        Some((owner, repo)) if valid(owner) && valid(repo) => {
            Ok(GitHubTarget::Repository(owner, repo))
        }
        None if valid(target) => Ok(GitHubTarget::User(target)),
        _ => Err(ProviderError::InvalidTarget(format!(
            "'{target}' is not a GitHub username or owner/repo"
        ))),
    }
}

/// Share of each language in bytes, one decimal, largest first.
pub fn language_breakdown(bytes: &BTreeMap<String, u64>) -> Vec<LanguageShare> {
    let total: u64 = bytes.values().sum();
    if total == 0 {
        return Vec::new();
    }
    let mut shares: Vec<LanguageShare> = bytes
        .iter()
        .map(|(name, count)| LanguageShare {
            name: name.clone(),
            percentage: (*count as f64 * 1000.0 / total as f64).round() / 10.0,
        })
        .collect();
    shares.sort_by(|a, b| {
        b.percentage
            .total_cmp(&a.percentage)
            .then_with(|| a.name.cmp(&b.name))
    });
    shares
}

impl From<ApiUser> for UserProfile {
    fn from(user: ApiUser) -> Self {
        Self {
            login: user.login,
            name: user.name,
            bio: user.bio,
            avatar_url: user.avatar_url,
            location: user.location,
            company: user.company,
            blog: user.blog.filter(|blog| !blog.is_empty()),
            twitter_username: user.twitter_username,
            email: user.email,
            profile_url: user.html_url,
            account_type: user.account_type,
            public_repos: user.public_repos,
            public_gists: user.public_gists,
            followers: user.followers,
            following: user.following,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<ApiRepo> for RepositorySummary {
    fn from(repo: ApiRepo) -> Self {
        Self {
            name: repo.name,
            full_name: repo.full_name,
            owner: repo.owner.login,
            description: repo.description,
            url: repo.html_url,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            watchers: repo.watchers_count,
            open_issues: repo.open_issues_count,
            size_kb: repo.size,
            language: repo.language,
            license: repo.license.and_then(|license| license.name),
            topics: repo.topics,
            homepage: repo.homepage.filter(|homepage| !homepage.is_empty()),
            private: repo.private,
            fork: repo.fork,
            archived: repo.archived,
            created_at: repo.created_at,
            updated_at: repo.updated_at,
            pushed_at: repo.pushed_at,
        }
    }
}

impl From<ApiCommit> for CommitSummary {
    fn from(commit: ApiCommit) -> Self {
        let (author, date) = match commit.commit.author {
            Some(author) => (author.name, author.date),
            None => (None, None),
        };
        Self {
            sha: commit.sha.chars().take(7).collect(),
            message: commit
                .commit
                .message
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
            author,
            date,
            url: commit.html_url,
        }
    }
}
