//! Correlation rule documents and their validation.

use crate::CorrelationError;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which related events a field refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Event,
    Child,
    Source,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Type,
    Module,
    Data,
}

/// A field path such as `data` or `entity.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct FieldRef {
    pub scope: Scope,
    pub attr: Attr,
}

impl FromStr for FieldRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let (scope, attr) = match s.split_once('.') {
            None => (Scope::Event, s),
            Some(("child", a)) => (Scope::Child, a),
            Some(("source", a)) => (Scope::Source, a),
            Some(("entity", a)) => (Scope::Entity, a),
            Some(_) => return Err(format!("invalid field: {s}")),
        };
        let attr = match attr {
            "type" => Attr::Type,
            "module" => Attr::Module,
            "data" => Attr::Data,
            _ => return Err(format!("invalid field: {s}")),
        };
        Ok(FieldRef { scope, attr })
    }
}

impl TryFrom<String> for FieldRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attr = match self.attr {
            Attr::Type => "type",
            Attr::Module => "module",
            Attr::Data => "data",
        };
        match self.scope {
            Scope::Event => write!(f, "{attr}"),
            Scope::Child => write!(f, "child.{attr}"),
            Scope::Source => write!(f, "source.{attr}"),
            Scope::Entity => write!(f, "entity.{attr}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<String> {
        match self {
            OneOrMany::One(v) => vec![v.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchRule {
    pub method: MatchMethod,
    pub field: FieldRef,
    pub value: OneOrMany,
}

/// One `not ` prefixed or plain pattern.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    pub negated: bool,
    pub text: String,
    pub regex: Option<Regex>,
}

impl MatchRule {
    pub(crate) fn patterns(&self) -> Result<Vec<Pattern>, CorrelationError> {
        self.value
            .values()
            .into_iter()
            .map(|v| {
                let (negated, text) = match v.strip_prefix("not ") {
                    Some(rest) => (true, rest.trim_start().to_string()),
                    None => (false, v),
                };
                let regex = match self.method {
                    MatchMethod::Regex => Some(
                        RegexBuilder::new(&text)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| CorrelationError::Syntax(format!("bad pattern {text:?}: {e}")))?,
                    ),
                    MatchMethod::Exact => None,
                };
                Ok(Pattern { negated, text, regex })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Collection {
    pub collect: Vec<MatchRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Aggregation {
    pub field: FieldRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    Threshold,
    Outlier,
    FirstCollectionOnly,
    MatchAllToFirstCollection,
    BothCollections,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubMatch {
    Subnet,
    Exact,
    Contains,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Analysis {
    pub method: AnalysisMethod,
    pub field: Option<FieldRef>,
    pub minimum: Option<u64>,
    pub maximum: Option<u64>,
    #[serde(default)]
    pub count_unique_only: bool,
    #[serde(default)]
    pub must_be_unique: bool,
    pub maximum_percent: Option<f64>,
    pub noisy_percent: Option<f64>,
    pub match_method: Option<SubMatch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Meta {
    pub name: String,
    pub description: String,
    pub risk: String,
    pub author: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Headline {
    Text(String),
    Object { text: String },
}

impl Headline {
    pub fn text(&self) -> &str {
        match self {
            Headline::Text(t) | Headline::Object { text: t } => t,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    pub version: Option<u32>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub meta: Meta,
    pub collections: Vec<Collection>,
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub analysis: Vec<Analysis>,
    pub headline: Headline,
    /// The document the rule was parsed from, stored with each result.
    #[serde(skip)]
    pub raw_yaml: String,
}

fn enabled_default() -> bool {
    true
}

impl Rule {
    /// Parse and validate one YAML rule.
    pub fn parse(yaml: &str) -> Result<Self, CorrelationError> {
        let mut rule: Rule =
            serde_yaml::from_str(yaml).map_err(|e| CorrelationError::Syntax(format!("malformed rule: {e}")))?;
        rule.raw_yaml = yaml.to_string();
        rule.meta.name = rule.meta.name.trim().to_string();
        rule.meta.description = rule.meta.description.trim().to_string();
        rule.meta.risk = rule.meta.risk.trim().to_string();
        rule.validate()?;
        Ok(rule)
    }

    fn invalid(&self, msg: impl fmt::Display) -> CorrelationError {
        CorrelationError::Syntax(format!("rule {}: {msg}", self.id))
    }

    /// Checks that serde cannot express.
    pub fn validate(&self) -> Result<(), CorrelationError> {
        if self.id.trim().is_empty() {
            return Err(CorrelationError::Syntax("rule has no id".into()));
        }
        if self.meta.name.is_empty() || self.meta.description.is_empty() || self.meta.risk.is_empty() {
            return Err(self.invalid("meta needs name, description and risk"));
        }
        if self.headline.text().trim().is_empty() {
            return Err(self.invalid("headline is empty"));
        }
        if self.collections.is_empty() {
            return Err(self.invalid("no collections"));
        }
        for (i, c) in self.collections.iter().enumerate() {
            let Some(first) = c.collect.first() else {
                return Err(self.invalid(format!("collection {i} is empty")));
            };
            if first.field.scope != Scope::Event {
                return Err(self.invalid("the first match rule must use type, module or data"));
            }
            if first.field.attr != Attr::Type && first.method != MatchMethod::Exact {
                return Err(self.invalid("the first match rule only supports regex on type"));
            }
            for m in &c.collect {
                if m.value.values().is_empty() {
                    return Err(self.invalid(format!("collection {i} has a match rule with no value")));
                }
                m.patterns()?;
            }
        }
        for a in &self.analysis {
            match a.method {
                AnalysisMethod::Threshold if a.field.is_none() => {
                    return Err(self.invalid("threshold analysis needs a field"));
                }
                AnalysisMethod::Outlier if a.maximum_percent.is_none() => {
                    return Err(self.invalid("outlier analysis needs maximum_percent"));
                }
                AnalysisMethod::FirstCollectionOnly if a.field.is_none() => {
                    return Err(self.invalid("first_collection_only analysis needs a field"));
                }
                AnalysisMethod::MatchAllToFirstCollection if a.field.is_none() || a.match_method.is_none() => {
                    return Err(self.invalid("match_all_to_first_collection needs field and match_method"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Which related events the rule needs fetched: children, sources, entities.
    pub(crate) fn scope(&self) -> (bool, bool, bool) {
        let fields = self
            .collections
            .iter()
            .flat_map(|c| c.collect.iter().map(|m| m.field))
            .chain(self.aggregation.iter().map(|a| a.field))
            .chain(self.analysis.iter().filter_map(|a| a.field));
        let (mut children, mut sources, mut entities) = (false, false, false);
        for f in fields {
            match f.scope {
                Scope::Child => children = true,
                Scope::Source => sources = true,
                Scope::Entity => entities = true,
                Scope::Event => {}
            }
        }
        (children, sources, entities)
    }
}

const BUNDLED: &[(&str, &str)] = &[
    ("error_message_found", include_str!("../rules/error_message_found.yaml")),
    ("internal_host", include_str!("../rules/internal_host.yaml")),
    ("multiple_malicious", include_str!("../rules/multiple_malicious.yaml")),
    ("open_port_version", include_str!("../rules/open_port_version.yaml")),
];

/// Rules shipped with the binary.
pub fn bundled_rules() -> Result<Vec<Rule>, CorrelationError> {
    BUNDLED.iter().map(|(_, yaml)| Rule::parse(yaml)).collect()
}

/// Every `*.yaml` file in `dir`, sorted by file name. Disabled rules are
/// dropped.
pub fn load_rules(dir: &Path) -> Result<Vec<Rule>, CorrelationError> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| CorrelationError::Syntax(format!("{}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|x| x == "yaml" || x == "yml"))
        .collect();
    paths.sort();
    let mut rules = Vec::new();
    for p in paths {
        let yaml = std::fs::read_to_string(&p)
            .map_err(|e| CorrelationError::Syntax(format!("{}: {e}", p.display())))?;
        let rule = Rule::parse(&yaml).map_err(|e| CorrelationError::Syntax(format!("{}: {e}", p.display())))?;
        if rule.enabled {
            rules.push(rule);
        } else {
            tracing::debug!(rule = %rule.id, "skipping disabled rule");
        }
    }
    Ok(rules)
}
