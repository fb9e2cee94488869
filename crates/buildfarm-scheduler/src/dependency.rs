//! Build-dependency checking.
//!
//! Expressions follow the Debian source relationship syntax:
//! `libfoo (>= 2.0), libbar | libbaz [amd64 i386], debhelper-compat (= 13)`.
//! Each comma separated term is satisfied when any of its `|` alternatives
//! applicable to the target architecture has a candidate binary whose
//! version fulfils the relation.

use buildfarm_core::catalog::Catalog;
use buildfarm_core::{Archive, DebVersion};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::SchedulerResult;

/// Score added for every dependency that cannot be satisfied yet.
pub const MISSING_DEPENDENCY_SCORE: i64 = 10;
/// Score added for every dependency already satisfied.
pub const SATISFIED_DEPENDENCY_SCORE: i64 = -5;

static ALTERNATIVE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9][A-Za-z0-9+.\-]*)(?::[A-Za-z0-9\-]+)?\s*(?:\(\s*(?P<op><<|<=|>=|>>|=|<|>)\s*(?P<version>[^\s()]+)\s*\))?\s*(?:\[(?P<arches>[^\]]*)\])?\s*(?:<[^>]*>\s*)*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("unparsable dependency term '{0}'")]
    InvalidTerm(String),

    #[error("invalid version in dependency term '{term}': {message}")]
    InvalidVersion { term: String, message: String },
}

/// Version relation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    StrictlyEarlier,
    EarlierOrEqual,
    Exactly,
    LaterOrEqual,
    StrictlyLater,
}

impl Relation {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "<<" => Some(Relation::StrictlyEarlier),
            "<=" | "<" => Some(Relation::EarlierOrEqual),
            "=" => Some(Relation::Exactly),
            ">=" | ">" => Some(Relation::LaterOrEqual),
            ">>" => Some(Relation::StrictlyLater),
            _ => None,
        }
    }

    /// Whether `candidate` stands in this relation to `required`.
    pub fn holds(self, candidate: &DebVersion, required: &DebVersion) -> bool {
        use std::cmp::Ordering::*;
        let ord = candidate.cmp(required);
        match self {
            Relation::StrictlyEarlier => ord == Less,
            Relation::EarlierOrEqual => ord != Greater,
            Relation::Exactly => ord == Equal,
            Relation::LaterOrEqual => ord != Less,
            Relation::StrictlyLater => ord == Greater,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relation::StrictlyEarlier => "<<",
            Relation::EarlierOrEqual => "<=",
            Relation::Exactly => "=",
            Relation::LaterOrEqual => ">=",
            Relation::StrictlyLater => ">>",
        })
    }
}

/// One package alternative of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub name: String,
    /// Relation and the version as written.
    pub constraint: Option<(Relation, String)>,
    arches: Option<ArchRestriction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArchRestriction {
    negated: bool,
    arches: Vec<String>,
}

impl ArchRestriction {
    fn parse(list: &str) -> Option<Self> {
        let items: Vec<&str> = list.split_whitespace().collect();
        if items.is_empty() {
            return None;
        }
        let negated = items[0].starts_with('!');
        Some(Self {
            negated,
            arches: items
                .iter()
                .map(|a| a.trim_start_matches('!').to_string())
                .collect(),
        })
    }

    fn applies_to(&self, arch_tag: &str) -> bool {
        let listed = self
            .arches
            .iter()
            .any(|a| a == arch_tag || a == "any" || a == &format!("any-{}", arch_tag));
        listed != self.negated
    }
}

impl Alternative {
    pub fn applies_to(&self, arch_tag: &str) -> bool {
        self.arches
            .as_ref()
            .map(|r| r.applies_to(arch_tag))
            .unwrap_or(true)
    }

    fn is_satisfied_by(&self, candidate: Option<&DebVersion>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        match &self.constraint {
            None => true,
            // Versions were validated at parse time.
            Some((relation, version)) => DebVersion::parse(version)
                .map(|required| relation.holds(candidate, &required))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((relation, version)) => write!(f, "{} ({} {})", self.name, relation, version),
            None => f.write_str(&self.name),
        }
    }
}

/// A comma separated term: one or more alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub alternatives: Vec<Alternative>,
}

/// Parse a dependency expression. Empty input yields no terms.
pub fn parse_dependencies(expression: &str) -> Result<Vec<Term>, DependencyError> {
    let mut terms = Vec::new();
    for raw_term in expression.split(',') {
        let raw_term = raw_term.trim();
        if raw_term.is_empty() {
            continue;
        }
        let alternatives = raw_term
            .split('|')
            .map(|alt| parse_alternative(alt.trim(), raw_term))
            .collect::<Result<Vec<_>, _>>()?;
        terms.push(Term { alternatives });
    }
    Ok(terms)
}

fn parse_alternative(raw: &str, term: &str) -> Result<Alternative, DependencyError> {
    let caps = ALTERNATIVE_REGEX
        .captures(raw)
        .ok_or_else(|| DependencyError::InvalidTerm(term.to_string()))?;

    let constraint = match (caps.name("op"), caps.name("version")) {
        (Some(op), Some(version)) => {
            let relation = Relation::parse(op.as_str())
                .ok_or_else(|| DependencyError::InvalidTerm(term.to_string()))?;
            DebVersion::parse(version.as_str()).map_err(|e| DependencyError::InvalidVersion {
                term: term.to_string(),
                message: e.to_string(),
            })?;
            Some((relation, version.as_str().to_string()))
        }
        _ => None,
    };

    Ok(Alternative {
        name: caps["name"].to_string(),
        constraint,
        arches: caps.name("arches").and_then(|m| ArchRestriction::parse(m.as_str())),
    })
}

/// Outcome of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyCheck {
    /// Score contribution: +10 per missing term, -5 per satisfied term.
    pub score_delta: i64,
    /// The terms still missing, rebuilt as an expression.
    pub remaining: String,
    pub satisfied: usize,
    pub missing: usize,
}

impl DependencyCheck {
    pub fn is_satisfied(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Evaluate an expression for `arch_tag`, looking candidates up with `find`.
pub fn evaluate<F>(expression: &str, arch_tag: &str, mut find: F) -> Result<DependencyCheck, DependencyError>
where
    F: FnMut(&str) -> Option<DebVersion>,
{
    let terms = parse_dependencies(expression)?;
    let mut check = DependencyCheck::default();
    let mut remaining = Vec::new();

    for term in terms {
        let applicable: Vec<&Alternative> = term
            .alternatives
            .iter()
            .filter(|alt| alt.applies_to(arch_tag))
            .collect();
        if applicable.is_empty() {
            continue;
        }

        let satisfied = applicable
            .iter()
            .any(|alt| alt.is_satisfied_by(find(&alt.name).as_ref()));

        if satisfied {
            check.satisfied += 1;
            check.score_delta += SATISFIED_DEPENDENCY_SCORE;
        } else {
            check.missing += 1;
            check.score_delta += MISSING_DEPENDENCY_SCORE;
            remaining.push(
                applicable
                    .iter()
                    .map(|alt| alt.to_string())
                    .collect::<Vec<_>>()
                    .join(" | "),
            );
        }
    }

    check.remaining = remaining.join(", ");
    Ok(check)
}

/// Evaluate an expression against the binaries visible to `archive`.
///
/// Candidates are looked up once per package name, in the archive's search
/// path order. Parse failures surface as [`crate::SchedulerError::Dependency`].
pub async fn check_dependencies(
    catalog: &dyn Catalog,
    archive: &Archive,
    arch_tag: &str,
    expression: &str,
) -> SchedulerResult<DependencyCheck> {
    let terms = parse_dependencies(expression)?;
    let search_path = archive.search_path();

    let mut candidates: HashMap<String, Option<DebVersion>> = HashMap::new();
    for alt in terms.iter().flat_map(|t| t.alternatives.iter()) {
        if candidates.contains_key(&alt.name) || !alt.applies_to(arch_tag) {
            continue;
        }
        let version = catalog
            .find_binary(&alt.name, &search_path)
            .await?
            .and_then(|b| DebVersion::parse(&b.version).ok());
        candidates.insert(alt.name.clone(), version);
    }

    Ok(evaluate(expression, arch_tag, |name| {
        candidates.get(name).cloned().flatten()
    })?)
}
