//! Maps free-text exchange headers onto the semantic roles the pipeline
//! needs. Resolution is a pure function of the header list and an ordered
//! rule table, so it can be exercised without touching any data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Date,
    SuspendedFlag,
    ClosePrice,
    OpenPrice,
}

impl ColumnRole {
    /// Resolution order. Close is bound before open so an ambiguous header
    /// can never end up serving both roles.
    pub const RESOLUTION_ORDER: [ColumnRole; 4] = [
        ColumnRole::Date,
        ColumnRole::SuspendedFlag,
        ColumnRole::ClosePrice,
        ColumnRole::OpenPrice,
    ];
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ColumnRole::Date => "DATE",
            ColumnRole::SuspendedFlag => "SUSPENDED_FLAG",
            ColumnRole::ClosePrice => "CLOSE_PRICE",
            ColumnRole::OpenPrice => "OPEN_PRICE",
        };
        f.write_str(label)
    }
}

/// Trimmed, uppercased header with inner whitespace runs collapsed.
pub fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeaderMatcher {
    Exact { name: String },
    Contains { needle: String },
}

impl HeaderMatcher {
    pub fn exact(name: &str) -> Self {
        HeaderMatcher::Exact {
            name: normalize_header(name),
        }
    }

    pub fn contains(needle: &str) -> Self {
        HeaderMatcher::Contains {
            needle: normalize_header(needle),
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        match self {
            HeaderMatcher::Exact { name } => normalized == name,
            HeaderMatcher::Contains { needle } => normalized.contains(needle.as_str()),
        }
    }
}

/// Rejects a header that contains `contains` unless it also contains
/// `unless_contains`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderGuard {
    pub contains: String,
    #[serde(default)]
    pub unless_contains: Option<String>,
}

impl HeaderGuard {
    fn rejects(&self, normalized: &str) -> bool {
        if !normalized.contains(self.contains.as_str()) {
            return false;
        }
        match &self.unless_contains {
            Some(escape) => !normalized.contains(escape.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: ColumnRole,
    /// Lower values are tried first.
    pub priority: u16,
    pub matcher: HeaderMatcher,
    #[serde(default)]
    pub guard: Option<HeaderGuard>,
}

impl RoleRule {
    fn accepts(&self, normalized: &str) -> bool {
        self.matcher.matches(normalized)
            && !self
                .guard
                .as_ref()
                .is_some_and(|guard| guard.rejects(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverTable {
    pub rules: Vec<RoleRule>,
}

const CLOSE_EXACT: &[&str] = &["CLOSING PRICE", "CLOSING SESSION PRICE"];
const CLOSE_ALIASES: &[&str] = &[
    "CLOSING PRICE",
    "CLOSING SESSION PRICE",
    "CLOSE",
    "CLOSING",
    "CLOSE PRICE",
    "LAST",
    "LAST PRICE",
    "SETTLEMENT",
    "SETTLEMENT PRICE",
];
const OPEN_EXACT: &[&str] = &["OPENING PRICE", "OPENING SESSION PRICE"];
const OPEN_ALIASES: &[&str] = &[
    "OPENING PRICE",
    "OPENING SESSION PRICE",
    "OPEN",
    "OPENING",
    "OPEN PRICE",
    "FIRST",
    "FIRST PRICE",
];
const DATE_EXACT: &[&str] = &["TRADE DATE", "TRADING DATE", "DATE"];
const DATE_ALIASES: &[&str] = &["TRADE DATE", "DATE"];
const SUSPENDED_EXACT: &[&str] = &["SUSPENDED"];
const SUSPENDED_ALIASES: &[&str] = &["SUSPENDED", "SUSPEND"];

/// Substring matches start here so exact literals always win.
const ALIAS_PRIORITY_BASE: u16 = 100;

fn push_role_rules(
    rules: &mut Vec<RoleRule>,
    role: ColumnRole,
    exact: &[&str],
    aliases: &[&str],
    guard: Option<HeaderGuard>,
) {
    for (idx, name) in exact.iter().enumerate() {
        rules.push(RoleRule {
            role,
            priority: idx as u16,
            matcher: HeaderMatcher::exact(name),
            guard: None,
        });
    }
    for (idx, needle) in aliases.iter().enumerate() {
        rules.push(RoleRule {
            role,
            priority: ALIAS_PRIORITY_BASE + idx as u16,
            matcher: HeaderMatcher::contains(needle),
            guard: guard.clone(),
        });
    }
}

impl Default for ResolverTable {
    fn default() -> Self {
        let mut rules = Vec::new();
        push_role_rules(&mut rules, ColumnRole::Date, DATE_EXACT, DATE_ALIASES, None);
        push_role_rules(
            &mut rules,
            ColumnRole::SuspendedFlag,
            SUSPENDED_EXACT,
            SUSPENDED_ALIASES,
            None,
        );
        // "GROSS SETTLEMENT" is a flag column, not a price.
        push_role_rules(
            &mut rules,
            ColumnRole::ClosePrice,
            CLOSE_EXACT,
            CLOSE_ALIASES,
            Some(HeaderGuard {
                contains: "SETTLEMENT".to_string(),
                unless_contains: Some("CLOSING".to_string()),
            }),
        );
        push_role_rules(&mut rules, ColumnRole::OpenPrice, OPEN_EXACT, OPEN_ALIASES, None);
        Self { rules }
    }
}

impl ResolverTable {
    fn rules_for(&self, role: ColumnRole) -> Vec<&RoleRule> {
        let mut rules: Vec<&RoleRule> = self.rules.iter().filter(|r| r.role == role).collect();
        // Stable: equal priorities keep their table order.
        rules.sort_by_key(|rule| rule.priority);
        rules
    }

    /// Bind each role to at most one header. For every rule in priority
    /// order, headers are scanned left to right and the first acceptable,
    /// still-unbound header wins.
    pub fn resolve<S: AsRef<str>>(&self, headers: &[S], numeric_keywords: &[String]) -> ResolvedColumns {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        let mut resolved = ResolvedColumns::default();

        for role in ColumnRole::RESOLUTION_ORDER {
            'rules: for rule in self.rules_for(role) {
                for (idx, norm) in normalized.iter().enumerate() {
                    let header = headers[idx].as_ref();
                    if resolved.is_bound(header) {
                        continue;
                    }
                    if rule.accepts(norm) {
                        resolved.bind(role, header.to_string());
                        break 'rules;
                    }
                }
            }
        }

        resolved.numeric = headers
            .iter()
            .zip(normalized.iter())
            .filter(|(_, norm)| {
                numeric_keywords
                    .iter()
                    .any(|keyword| norm.contains(keyword.to_uppercase().as_str()))
            })
            .map(|(header, _)| header.as_ref().to_string())
            .collect();

        resolved
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedColumns {
    pub date: Option<String>,
    pub suspended: Option<String>,
    pub close: Option<String>,
    pub open: Option<String>,
    /// Every header carrying a numeric keyword, in header order.
    pub numeric: Vec<String>,
}

impl ResolvedColumns {
    pub fn get(&self, role: ColumnRole) -> Option<&str> {
        match role {
            ColumnRole::Date => self.date.as_deref(),
            ColumnRole::SuspendedFlag => self.suspended.as_deref(),
            ColumnRole::ClosePrice => self.close.as_deref(),
            ColumnRole::OpenPrice => self.open.as_deref(),
        }
    }

    fn bind(&mut self, role: ColumnRole, header: String) {
        let slot = match role {
            ColumnRole::Date => &mut self.date,
            ColumnRole::SuspendedFlag => &mut self.suspended,
            ColumnRole::ClosePrice => &mut self.close,
            ColumnRole::OpenPrice => &mut self.open,
        };
        *slot = Some(header);
    }

    fn is_bound(&self, header: &str) -> bool {
        ColumnRole::RESOLUTION_ORDER
            .iter()
            .any(|role| self.get(*role) == Some(header))
    }

    pub fn is_numeric(&self, header: &str) -> bool {
        self.numeric.iter().any(|h| h == header)
    }

    /// Fail on a missing date or close binding; open is optional.
    pub fn require(&self) -> Result<RequiredColumns> {
        let date = self
            .date
            .clone()
            .ok_or(PipelineError::MissingColumn {
                role: ColumnRole::Date,
            })?;
        let close = self
            .close
            .clone()
            .ok_or(PipelineError::MissingColumn {
                role: ColumnRole::ClosePrice,
            })?;
        Ok(RequiredColumns {
            date,
            close,
            open: self.open.clone(),
            suspended: self.suspended.clone(),
        })
    }
}

/// Bindings after the mandatory roles were confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredColumns {
    pub date: String,
    pub close: String,
    /// `None` switches the feature engine to its close-only return formula.
    pub open: Option<String>,
    pub suspended: Option<String>,
}
