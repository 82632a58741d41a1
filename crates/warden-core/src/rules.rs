//! Rule store contract.
//!
//! The policy engine only reads rules. Writes (seeding, administration)
//! happen against the concrete store. [`MemoryRuleStore`] is a complete
//! in-process implementation used by tests and by embedders that do not
//! want SQLite.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// How a block or redirect rule matches a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Literal string prefix of the normalized URL.
    UrlPrefix,
    /// Exact `host[:port]`.
    Hostname,
    /// Registrable domain, covering every subdomain.
    Domain,
}

impl RuleScope {
    /// Evaluation order: most specific first.
    pub const ORDER: [RuleScope; 3] = [RuleScope::UrlPrefix, RuleScope::Hostname, RuleScope::Domain];

    /// Value stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::UrlPrefix => "url_prefix",
            RuleScope::Hostname => "hostname",
            RuleScope::Domain => "domain",
        }
    }

    /// Message for a block by this scope.
    pub fn block_message(&self) -> &'static str {
        match self {
            RuleScope::UrlPrefix => "Blocked by URL prefix",
            RuleScope::Hostname => "Blocked by exact hostname",
            RuleScope::Domain => "Blocked by domain (includes subdomains)",
        }
    }

    /// Message for a redirect by this scope.
    pub fn redirect_message(&self) -> &'static str {
        match self {
            RuleScope::UrlPrefix => "Redirected by URL prefix",
            RuleScope::Hostname => "Redirected by exact hostname",
            RuleScope::Domain => "Redirected by domain (includes subdomains)",
        }
    }
}

impl FromStr for RuleScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url_prefix" => Ok(RuleScope::UrlPrefix),
            "hostname" => Ok(RuleScope::Hostname),
            "domain" => Ok(RuleScope::Domain),
            other => Err(format!("unknown rule type: {other}")),
        }
    }
}

/// Action attached to a content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryAction {
    /// Traffic in this category passes.
    Allowed,
    /// Traffic in this category is blocked.
    Blocked,
}

impl CategoryAction {
    /// Value stored in the `action` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryAction::Allowed => "allowed",
            CategoryAction::Blocked => "blocked",
        }
    }
}

impl FromStr for CategoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowed" => Ok(CategoryAction::Allowed),
            "blocked" => Ok(CategoryAction::Blocked),
            other => Err(format!("unknown category action: {other}")),
        }
    }
}

/// Policy for one content category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    /// Category identifier as reported by the classifier.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// What to do with traffic in this category.
    pub action: CategoryAction,
}

/// Read contract over the persisted rule tables.
///
/// Subjects are pre-derived by the caller: the normalized URL for
/// [`RuleScope::UrlPrefix`], `host[:port]` for [`RuleScope::Hostname`] and
/// the registrable domain for [`RuleScope::Domain`].
pub trait RuleStore: Send + Sync {
    /// Returns true if a block rule of `scope` matches `subject`.
    fn match_blocked(&self, scope: RuleScope, subject: &str) -> StoreResult<bool>;

    /// Returns the proxy of the first redirect rule of `scope` matching `subject`.
    fn match_redirect(&self, scope: RuleScope, subject: &str) -> StoreResult<Option<String>>;

    /// Returns true if `hostname` (no port) is exempt from decryption.
    fn is_tls_excluded(&self, hostname: &str) -> StoreResult<bool>;

    /// Returns the descriptor of a blocked SHA-256, if any.
    fn blocked_file(&self, sha256: &str) -> StoreResult<Option<String>>;

    /// Returns true if the MIME type is blocked.
    fn is_mime_blocked(&self, mime: &str) -> StoreResult<bool>;

    /// Returns the policy for a category.
    fn category_policy(&self, category_id: u32) -> StoreResult<Option<CategoryPolicy>>;
}

fn scope_matches(scope: RuleScope, value: &str, subject: &str) -> bool {
    match scope {
        RuleScope::UrlPrefix => subject.starts_with(value),
        RuleScope::Hostname | RuleScope::Domain => subject == value,
    }
}

#[derive(Default)]
struct MemoryRules {
    blocked: Vec<(RuleScope, String)>,
    redirects: Vec<(RuleScope, String, String)>,
    tls_excluded: HashSet<String>,
    files: HashMap<String, String>,
    mimes: HashSet<String>,
    categories: HashMap<u32, CategoryPolicy>,
}

/// In-memory [`RuleStore`].
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<MemoryRules>,
}

impl MemoryRuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block rule.
    pub fn block(self, scope: RuleScope, value: impl Into<String>) -> Self {
        self.rules.write().blocked.push((scope, value.into()));
        self
    }

    /// Adds a redirect rule.
    pub fn redirect(self, scope: RuleScope, value: impl Into<String>, proxy: impl Into<String>) -> Self {
        self.rules
            .write()
            .redirects
            .push((scope, value.into(), proxy.into()));
        self
    }

    /// Exempts a hostname from decryption.
    pub fn exclude_tls(self, hostname: impl Into<String>) -> Self {
        self.rules.write().tls_excluded.insert(hostname.into());
        self
    }

    /// Blocks a file hash.
    pub fn block_file(self, sha256: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.rules
            .write()
            .files
            .insert(sha256.into().to_ascii_lowercase(), descriptor.into());
        self
    }

    /// Blocks a MIME type.
    pub fn block_mime(self, mime: impl Into<String>) -> Self {
        self.rules.write().mimes.insert(mime.into());
        self
    }

    /// Sets a category policy.
    pub fn category(self, id: u32, name: impl Into<String>, action: CategoryAction) -> Self {
        self.rules.write().categories.insert(
            id,
            CategoryPolicy {
                id,
                name: name.into(),
                action,
            },
        );
        self
    }
}

impl RuleStore for MemoryRuleStore {
    fn match_blocked(&self, scope: RuleScope, subject: &str) -> StoreResult<bool> {
        Ok(self
            .rules
            .read()
            .blocked
            .iter()
            .any(|(s, value)| *s == scope && scope_matches(scope, value, subject)))
    }

    fn match_redirect(&self, scope: RuleScope, subject: &str) -> StoreResult<Option<String>> {
        Ok(self
            .rules
            .read()
            .redirects
            .iter()
            .find(|(s, value, _)| *s == scope && scope_matches(scope, value, subject))
            .map(|(_, _, proxy)| proxy.clone()))
    }

    fn is_tls_excluded(&self, hostname: &str) -> StoreResult<bool> {
        Ok(self.rules.read().tls_excluded.contains(hostname))
    }

    fn blocked_file(&self, sha256: &str) -> StoreResult<Option<String>> {
        Ok(self
            .rules
            .read()
            .files
            .get(&sha256.to_ascii_lowercase())
            .cloned())
    }

    fn is_mime_blocked(&self, mime: &str) -> StoreResult<bool> {
        Ok(self.rules.read().mimes.contains(mime))
    }

    fn category_policy(&self, category_id: u32) -> StoreResult<Option<CategoryPolicy>> {
        Ok(self.rules.read().categories.get(&category_id).cloned())
    }
}
