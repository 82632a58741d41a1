//! Decisions produced by the policy engine.
//!
//! A [`Decision`] is what happens to the traffic; a [`Verdict`] pairs it with
//! the [`VerdictSource`] that produced it so every outcome can be audited.
//! [`DecisionResponse`] is the JSON shape used by the Decision API and by
//! the proxy's remote client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::RuleScope;

/// Message returned for an allowed check.
pub const MSG_ALLOWED: &str = "Access granted";
/// Message returned when a host is exempt from decryption.
pub const MSG_TLS_EXCLUDED: &str = "Host excluded from TLS interception";
/// Message returned for a domain flagged by the threat feed.
pub const MSG_IOC: &str = "Domain is an IOC (Indicator of Compromise)";
/// Message returned for a locally blocked file hash.
pub const MSG_HASH_BLOCKED: &str = "Blocked file hash (database)";
/// Message returned for a file hash flagged by the threat feed.
pub const MSG_HASH_MALICIOUS: &str = "Malicious file hash detected in OTX";
/// Message returned for a blocked MIME type.
pub const MSG_MIME_BLOCKED: &str = "Blocked MIME type";

/// Kind of failure carried by [`Decision::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required field was absent.
    MissingField,
    /// More than one hostname was supplied.
    MultipleHostsUnsupported,
    /// The subject failed syntax validation.
    InvalidFormat,
    /// Missing, expired or invalid bearer token.
    Unauthorized,
    /// Authenticated but lacking the required role.
    Forbidden,
    /// A collaborator the decision depends on could not be reached.
    UpstreamUnavailable,
    /// An unrecognized verdict was received.
    DecisionConflict,
}

impl ErrorKind {
    /// Client-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::MissingField => "Missing URL",
            ErrorKind::MultipleHostsUnsupported => "Multiple hostnames not allowed",
            ErrorKind::InvalidFormat => "Invalid hostname format",
            ErrorKind::Unauthorized => "Authentication required",
            ErrorKind::Forbidden => "Insufficient permissions",
            ErrorKind::UpstreamUnavailable => "Proxy error",
            ErrorKind::DecisionConflict => "Unexpected decision",
        }
    }

    /// HTTP status code this kind maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::MissingField
            | ErrorKind::MultipleHostsUnsupported
            | ErrorKind::InvalidFormat => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::UpstreamUnavailable | ErrorKind::DecisionConflict => 500,
        }
    }

    /// Returns true for malformed client input.
    pub fn is_malformed_input(&self) -> bool {
        self.http_status() == 400
    }

    /// Maps a client-facing message back to its kind.
    pub fn from_message(message: &str) -> Option<Self> {
        [
            ErrorKind::MissingField,
            ErrorKind::MultipleHostsUnsupported,
            ErrorKind::InvalidFormat,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::UpstreamUnavailable,
            ErrorKind::DecisionConflict,
        ]
        .into_iter()
        .find(|kind| kind.message() == message)
    }
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Let the traffic through.
    Allow,
    /// Refuse the traffic.
    Block {
        /// Human-readable reason.
        reason: String,
        /// Extra evidence (threat feed details).
        details: Option<Value>,
    },
    /// Route the request through an alternate upstream proxy.
    Redirect {
        /// Proxy URI, e.g. `http://localhost:8081`.
        proxy: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Do not decrypt this connection.
    ExcludeTls,
    /// The check could not be completed.
    Error {
        /// What went wrong.
        kind: ErrorKind,
    },
}

impl Decision {
    /// Block with a reason and no details.
    pub fn block(reason: impl Into<String>) -> Self {
        Decision::Block {
            reason: reason.into(),
            details: None,
        }
    }

    /// Error of the given kind.
    pub fn error(kind: ErrorKind) -> Self {
        Decision::Error { kind }
    }

    /// Wire status string.
    pub fn status_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allowed",
            Decision::Block { .. } => "blocked",
            Decision::Redirect { .. } => "redirected",
            Decision::ExcludeTls => "exclude-tls",
            Decision::Error { .. } => "error",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Decision::Allow => MSG_ALLOWED,
            Decision::Block { reason, .. } => reason,
            Decision::Redirect { reason, .. } => reason,
            Decision::ExcludeTls => MSG_TLS_EXCLUDED,
            Decision::Error { kind } => kind.message(),
        }
    }

    /// Returns true if this is [`Decision::Allow`].
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Returns true if this is a [`Decision::Block`].
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block { .. })
    }
}

/// Which stage of a check produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictSource {
    /// A local block rule of the given scope.
    BlockRule(RuleScope),
    /// A local redirect rule of the given scope.
    RedirectRule(RuleScope),
    /// The TLS exclusion list.
    TlsExclusion,
    /// The domain reputation feed.
    Reputation,
    /// Category classification plus the category policy.
    Category,
    /// The local hash block list.
    HashRule,
    /// The file hash reputation feed.
    HashReputation,
    /// The local MIME block list.
    MimeRule,
    /// Nothing matched.
    Default,
    /// Input validation rejected the subject.
    Validation,
    /// A remote Decision API answered.
    Remote,
}

impl VerdictSource {
    /// Short identifier used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::BlockRule(RuleScope::UrlPrefix) => "block:url_prefix",
            VerdictSource::BlockRule(RuleScope::Hostname) => "block:hostname",
            VerdictSource::BlockRule(RuleScope::Domain) => "block:domain",
            VerdictSource::RedirectRule(RuleScope::UrlPrefix) => "redirect:url_prefix",
            VerdictSource::RedirectRule(RuleScope::Hostname) => "redirect:hostname",
            VerdictSource::RedirectRule(RuleScope::Domain) => "redirect:domain",
            VerdictSource::TlsExclusion => "tls_exclusion",
            VerdictSource::Reputation => "reputation",
            VerdictSource::Category => "category",
            VerdictSource::HashRule => "hash_rule",
            VerdictSource::HashReputation => "hash_reputation",
            VerdictSource::MimeRule => "mime_rule",
            VerdictSource::Default => "default",
            VerdictSource::Validation => "validation",
            VerdictSource::Remote => "remote",
        }
    }
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// The decision.
    pub decision: Decision,
    /// The stage that produced it.
    pub source: VerdictSource,
}

impl Verdict {
    /// Creates a verdict.
    pub fn new(decision: Decision, source: VerdictSource) -> Self {
        Self { decision, source }
    }

    /// Default allow.
    pub fn allow() -> Self {
        Self::new(Decision::Allow, VerdictSource::Default)
    }

    /// Validation failure.
    pub fn invalid(kind: ErrorKind) -> Self {
        Self::new(Decision::error(kind), VerdictSource::Validation)
    }
}

/// Which check was run; used for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Handshake-level host check.
    Host,
    /// Request-level URL check.
    Url,
    /// Body hash check.
    Hash,
    /// Sniffed content type check.
    Mime,
}

impl CheckKind {
    /// Short identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Host => "host",
            CheckKind::Url => "url",
            CheckKind::Hash => "hash",
            CheckKind::Mime => "mime",
        }
    }
}

/// JSON body of a Decision API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    /// `allowed`, `blocked`, `redirected`, `exclude-tls` or `error`.
    pub status: String,
    /// Human-readable message.
    pub message: String,
    /// Redirect target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Threat feed evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&Decision> for DecisionResponse {
    fn from(decision: &Decision) -> Self {
        let (proxy, details) = match decision {
            Decision::Redirect { proxy, .. } => (Some(proxy.clone()), None),
            Decision::Block { details, .. } => (None, details.clone()),
            _ => (None, None),
        };
        Self {
            status: decision.status_str().to_string(),
            message: decision.message().to_string(),
            proxy,
            details,
        }
    }
}

impl DecisionResponse {
    /// Converts a wire response back into a decision.
    ///
    /// Unknown statuses and redirects without a proxy become
    /// [`ErrorKind::DecisionConflict`].
    pub fn into_decision(self) -> Decision {
        match self.status.as_str() {
            "allowed" => Decision::Allow,
            "blocked" => Decision::Block {
                reason: self.message,
                details: self.details,
            },
            "redirected" => match self.proxy {
                Some(proxy) if !proxy.is_empty() => Decision::Redirect {
                    proxy,
                    reason: self.message,
                },
                _ => Decision::error(ErrorKind::DecisionConflict),
            },
            "exclude-tls" => Decision::ExcludeTls,
            "error" => Decision::error(
                ErrorKind::from_message(&self.message).unwrap_or(ErrorKind::UpstreamUnavailable),
            ),
            _ => Decision::error(ErrorKind::DecisionConflict),
        }
    }
}
