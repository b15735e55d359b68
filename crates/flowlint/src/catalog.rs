//! Remote catalog collaborators: repository metadata and security
//! advisories.
//!
//! The core only consumes the traits; the GitHub-backed implementation
//! lives here too, built on synchronous reqwest so rules stay free of
//! async plumbing. Lookups block the calling worker; failures are never
//! fatal — the rule logs and proceeds as if the check were inconclusive.

use anyhow::{anyhow, Result};
use moka::sync::Cache;
use reqwest::blocking;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

/// Repository metadata lookups.
pub trait RepoCatalog: Send + Sync {
    fn branch_exists(&self, owner: &str, repo: &str, name: &str) -> Result<bool>;

    fn tag_exists(&self, owner: &str, repo: &str, name: &str) -> Result<bool>;

    fn resolve_ref_to_sha(&self, owner: &str, repo: &str, git_ref: &str)
        -> Result<Option<String>>;

    /// Tags pointing at `sha`; callers treat the longest name as the
    /// canonical one.
    fn tags_for_sha(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<String>>;
}

/// Security advisory lookups.
pub trait AdvisoryCatalog: Send + Sync {
    fn advisories_for(&self, ecosystem: &str, slug: &str) -> Result<Vec<Advisory>>;
}

/// One published advisory affecting an action.
#[derive(Debug, Clone)]
pub struct Advisory {
    pub ghsa_id: String,
    pub severity: String,
    pub summary: String,
    pub vulnerable_range: String,
    pub first_patched_version: Option<String>,
    pub url: String,
}

/// A GitHub-API-backed implementation of both catalogs, with in-memory
/// caches keyed by repository.
pub struct GitHubCatalog {
    api_base: String,
    http: blocking::Client,
    branch_cache: Cache<(String, String), Vec<String>>,
    tag_cache: Cache<(String, String), Vec<Tag>>,
    ref_cache: Cache<String, Option<String>>,
    advisory_cache: Cache<String, Vec<Advisory>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Branch {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Tag {
    name: String,
    commit: CommitRef,
}

#[derive(Debug, Clone, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RawAdvisory {
    ghsa_id: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    vulnerabilities: Vec<RawVulnerability>,
}

#[derive(Debug, Deserialize)]
struct RawVulnerability {
    #[serde(default)]
    vulnerable_version_range: Option<String>,
    #[serde(default)]
    first_patched_version: Option<RawPatchedVersion>,
}

#[derive(Debug, Deserialize)]
struct RawPatchedVersion {
    identifier: String,
}

impl GitHubCatalog {
    pub fn new(token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, "flowlint".parse().expect("static header"));
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| anyhow!("invalid characters in GitHub token"))?,
        );
        headers.insert(
            "X-GitHub-Api-Version",
            "2022-11-28".parse().expect("static header"),
        );
        headers.insert(
            ACCEPT,
            "application/vnd.github+json".parse().expect("static header"),
        );

        Ok(Self {
            api_base: "https://api.github.com".to_string(),
            http: blocking::Client::builder().default_headers(headers).build()?,
            branch_cache: Cache::new(1000),
            tag_cache: Cache::new(1000),
            ref_cache: Cache::new(10000),
            advisory_cache: Cache::new(1000),
        })
    }

    fn paginate<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let mut out = vec![];
        let url = format!("{base}/{endpoint}", base = self.api_base);

        let mut page = 1;
        loop {
            let response = self
                .http
                .get(&url)
                .query(&[("page", page), ("per_page", 100)])
                .send()?
                .error_for_status()?;
            let items = response.json::<Vec<T>>()?;
            if items.is_empty() {
                break;
            }
            out.extend(items);
            page += 1;
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    fn branches(&self, owner: &str, repo: &str) -> Result<Vec<String>> {
        self.branch_cache
            .try_get_with((owner.to_string(), repo.to_string()), || {
                self.paginate::<Branch>(&format!("repos/{owner}/{repo}/branches"))
                    .map(|branches| branches.into_iter().map(|b| b.name).collect())
            })
            .map_err(|err| anyhow!("branch listing failed: {err}"))
    }

    #[instrument(skip(self))]
    fn tags(&self, owner: &str, repo: &str) -> Result<Vec<Tag>> {
        self.tag_cache
            .try_get_with((owner.to_string(), repo.to_string()), || {
                self.paginate::<Tag>(&format!("repos/{owner}/{repo}/tags"))
            })
            .map_err(|err| anyhow!("tag listing failed: {err}"))
    }
}

impl RepoCatalog for GitHubCatalog {
    fn branch_exists(&self, owner: &str, repo: &str, name: &str) -> Result<bool> {
        Ok(self.branches(owner, repo)?.iter().any(|b| b == name))
    }

    fn tag_exists(&self, owner: &str, repo: &str, name: &str) -> Result<bool> {
        Ok(self.tags(owner, repo)?.iter().any(|t| t.name == name))
    }

    #[instrument(skip(self))]
    fn resolve_ref_to_sha(&self, owner: &str, repo: &str, git_ref: &str)
        -> Result<Option<String>> {
        let key = format!("{owner}/{repo}@{git_ref}");
        self.ref_cache
            .try_get_with(key, || -> Result<Option<String>> {
                let url = format!(
                    "{base}/repos/{owner}/{repo}/commits/{git_ref}",
                    base = self.api_base
                );
                let response = self.http.get(&url).send()?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                let commit = response.error_for_status()?.json::<Commit>()?;
                Ok(Some(commit.sha))
            })
            .map_err(|err| anyhow!("ref resolution failed: {err}"))
    }

    fn tags_for_sha(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<String>> {
        Ok(self
            .tags(owner, repo)?
            .into_iter()
            .filter(|tag| tag.commit.sha == sha)
            .map(|tag| tag.name)
            .collect())
    }
}

impl AdvisoryCatalog for GitHubCatalog {
    #[instrument(skip(self))]
    fn advisories_for(&self, ecosystem: &str, slug: &str) -> Result<Vec<Advisory>> {
        let key = format!("{ecosystem}:{slug}");
        self.advisory_cache
            .try_get_with(key, || -> Result<Vec<Advisory>> {
                let url = format!("{base}/advisories", base = self.api_base);
                let raw = self
                    .http
                    .get(&url)
                    .query(&[("ecosystem", ecosystem), ("affects", slug)])
                    .send()?
                    .error_for_status()?
                    .json::<Vec<RawAdvisory>>()?;

                let mut advisories = Vec::new();
                for advisory in raw {
                    for vulnerability in advisory.vulnerabilities {
                        advisories.push(Advisory {
                            ghsa_id: advisory.ghsa_id.clone(),
                            severity: advisory.severity.clone(),
                            summary: advisory.summary.clone(),
                            vulnerable_range: vulnerability
                                .vulnerable_version_range
                                .unwrap_or_default(),
                            first_patched_version: vulnerability
                                .first_patched_version
                                .map(|p| p.identifier),
                            url: advisory.html_url.clone(),
                        });
                    }
                }
                Ok(advisories)
            })
            .map_err(|err| anyhow!("advisory lookup failed: {err}"))
    }
}

/// Picks the longest tag name, the convention for canonicalizing a SHA
/// back into a human-readable version.
pub fn longest_tag(tags: &[String]) -> Option<&str> {
    tags.iter()
        .max_by_key(|name| name.len())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_tag() {
        let tags = vec!["v1".to_string(), "v1.2.3".to_string(), "v1.2".to_string()];
        assert_eq!(longest_tag(&tags), Some("v1.2.3"));
        assert_eq!(longest_tag(&[]), None);
    }
}
