//! Runs rules against a finished scan and stores what they find.

use crate::rule::{Analysis, AnalysisMethod, Attr, FieldRef, MatchMethod, MatchRule, Pattern, Rule, Scope, SubMatch};
use crate::CorrelationError;
use ipnet::IpNet;
use regex::Regex;
use results_sqlite::{Db, EventQuery, NewCorrelation, ResultRow};
use sha2::{Digest, Sha256};
use spiderfoot_core::ScanStatus;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::OnceLock;

const CHUNK: usize = 5000;
const THRESHOLD_MAX: u64 = 999_999_999;

/// One collected event with the related events the rule asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub event_type: String,
    pub data: String,
    pub module: String,
    pub id: String,
    pub kind: String,
    pub source: Vec<Item>,
    pub child: Vec<Item>,
    pub entity: Vec<Item>,
    pub collection: usize,
}

impl Item {
    fn from_row(row: &ResultRow, kind: &str) -> Self {
        Item {
            event_type: row.event_type.clone(),
            data: row.data.clone(),
            module: row.module.clone(),
            id: row.hash.clone(),
            kind: kind.to_string(),
            source: Vec::new(),
            child: Vec::new(),
            entity: Vec::new(),
            collection: 0,
        }
    }

    fn attr(&self, attr: Attr) -> &str {
        match attr {
            Attr::Type => &self.event_type,
            Attr::Module => &self.module,
            Attr::Data => &self.data,
        }
    }

    fn related(&self, scope: Scope) -> &[Item] {
        match scope {
            Scope::Child => &self.child,
            Scope::Source => &self.source,
            Scope::Entity => &self.entity,
            Scope::Event => std::slice::from_ref(self),
        }
    }

    fn related_mut(&mut self, scope: Scope) -> Option<&mut Vec<Item>> {
        match scope {
            Scope::Child => Some(&mut self.child),
            Scope::Source => Some(&mut self.source),
            Scope::Entity => Some(&mut self.entity),
            Scope::Event => None,
        }
    }

    /// Every value the field takes on this item.
    pub fn extract(&self, field: FieldRef) -> Vec<String> {
        self.related(field.scope).iter().map(|i| i.attr(field.attr).to_string()).collect()
    }

    fn keep(&self, field: FieldRef, patterns: &[Pattern]) -> bool {
        self.related(field.scope).iter().any(|i| value_passes(i.attr(field.attr), patterns))
    }
}

/// Plain patterns accept on any match; `not` patterns reject on a match.
/// The last pattern decides what an unmatched value gets.
fn value_passes(value: &str, patterns: &[Pattern]) -> bool {
    let mut fallback = false;
    for p in patterns {
        let hit = match &p.regex {
            Some(re) => re.is_match(value),
            None => value == p.text,
        };
        fallback = p.negated;
        if hit {
            return !p.negated;
        }
    }
    fallback
}

pub type Buckets = BTreeMap<String, Vec<Item>>;

/// Runs a rule set over one scan.
pub struct Correlator<'a> {
    db: &'a Db,
    scan_id: String,
    rules: Vec<Rule>,
    kinds: HashMap<String, String>,
}

impl<'a> Correlator<'a> {
    pub fn new(db: &'a Db, scan_id: &str, rules: Vec<Rule>) -> Result<Self, CorrelationError> {
        let kinds = db.event_types()?.into_iter().map(|t| (t.event, t.kind)).collect();
        Ok(Correlator { db, scan_id: scan_id.to_string(), rules, kinds })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Apply every enabled rule. Returns the number of correlations that
    /// were new; rerunning on the same scan creates none.
    pub fn run(&self) -> Result<usize, CorrelationError> {
        let status = self
            .db
            .scan_status(&self.scan_id)?
            .ok_or_else(|| CorrelationError::InvalidScan(self.scan_id.clone()))?;
        if matches!(status, ScanStatus::Starting | ScanStatus::Started | ScanStatus::Running) {
            return Err(CorrelationError::ScanRunning { scan_id: self.scan_id.clone(), status });
        }

        let mut created = 0;
        for rule in self.rules.iter().filter(|r| r.enabled) {
            tracing::debug!(rule = %rule.id, scan_id = %self.scan_id, "processing correlation rule");
            let buckets = self.process_rule(rule)?;
            if buckets.is_empty() {
                tracing::debug!(rule = %rule.id, "no results");
                continue;
            }
            tracing::info!(rule = %rule.id, results = buckets.len(), "correlation rule matched");
            for items in buckets.values() {
                if self.create_correlation(rule, items)? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    /// Collect, aggregate and analyse; surviving buckets are the results.
    pub fn process_rule(&self, rule: &Rule) -> Result<Buckets, CorrelationError> {
        let (children, sources, entities) = rule.scope();
        let mut items = Vec::new();
        for (index, c) in rule.collections.iter().enumerate() {
            items.extend(self.collect(&c.collect, children, sources, entities, index)?);
        }
        if items.is_empty() {
            return Ok(Buckets::new());
        }
        let mut buckets = match &rule.aggregation {
            Some(a) => aggregate(a.field, items),
            None => Buckets::from([("default".to_string(), items)]),
        };
        for a in &rule.analysis {
            analyze(a, &mut buckets);
        }
        buckets.retain(|_, v| !v.is_empty());
        Ok(buckets)
    }

    fn collect(
        &self,
        rules: &[MatchRule],
        children: bool,
        sources: bool,
        entities: bool,
        index: usize,
    ) -> Result<Vec<Item>, CorrelationError> {
        let Some((first, rest)) = rules.split_first() else { return Ok(Vec::new()) };
        let mut items = self.collect_from_db(first, children, sources || entities, entities)?;
        for m in rest {
            let patterns = m.patterns()?;
            items.retain(|i| i.keep(m.field, &patterns));
        }
        for i in &mut items {
            stamp(i, index);
        }
        Ok(items)
    }

    fn kind(&self, event_type: &str) -> &str {
        self.kinds.get(event_type).map(String::as_str).unwrap_or("")
    }

    fn item(&self, row: &ResultRow) -> Item {
        Item::from_row(row, self.kind(&row.event_type))
    }

    fn query(&self, q: EventQuery) -> Result<Vec<ResultRow>, CorrelationError> {
        Ok(self.db.scan_result_events(&self.scan_id, &q)?)
    }

    /// Rows for the given hashes, queried in chunks.
    fn rows_by_hash(&self, hashes: &[String]) -> Result<HashMap<String, ResultRow>, CorrelationError> {
        let mut out = HashMap::new();
        for chunk in hashes.chunks(CHUNK) {
            for row in self.query(EventQuery { hashes: chunk.to_vec(), ..Default::default() })? {
                out.insert(row.hash.clone(), row);
            }
        }
        Ok(out)
    }

    fn collect_from_db(
        &self,
        m: &MatchRule,
        children: bool,
        sources: bool,
        entities: bool,
    ) -> Result<Vec<Item>, CorrelationError> {
        let values = m.value.values();
        let mut q = EventQuery::default();
        match (m.field.attr, m.method) {
            (Attr::Type, MatchMethod::Regex) => {
                let res = values
                    .iter()
                    .map(|v| Regex::new(v).map_err(|e| CorrelationError::Syntax(format!("bad pattern {v:?}: {e}"))))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut types: Vec<String> =
                    self.kinds.keys().filter(|t| res.iter().any(|r| r.is_match(t))).cloned().collect();
                types.sort();
                if types.is_empty() {
                    return Ok(Vec::new());
                }
                q.types = types;
            }
            (Attr::Type, MatchMethod::Exact) => {
                if let Some(bad) = values.iter().find(|v| !self.kinds.contains_key(v.as_str())) {
                    return Err(CorrelationError::Syntax(format!("invalid type specified: {bad}")));
                }
                q.types = values;
            }
            (Attr::Module, _) => q.modules = values,
            (Attr::Data, _) => q.values = values,
        }

        let rows = self.query(q)?;
        let mut items: Vec<Item> = rows.iter().map(|r| self.item(r)).collect();

        if sources {
            let wanted: Vec<String> = rows.iter().map(|r| r.source_hash.clone()).collect::<BTreeSet<_>>().into_iter().collect();
            let parents = self.rows_by_hash(&wanted)?;
            for (item, row) in items.iter_mut().zip(&rows) {
                if row.hash != row.source_hash {
                    if let Some(p) = parents.get(&row.source_hash) {
                        item.source.push(self.item(p));
                    }
                }
            }
        }
        if children {
            let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            let mut by_parent: HashMap<String, Vec<Item>> = HashMap::new();
            for chunk in ids.chunks(CHUNK) {
                for row in self.query(EventQuery { source_hashes: chunk.to_vec(), ..Default::default() })? {
                    if row.hash != row.source_hash {
                        by_parent.entry(row.source_hash.clone()).or_default().push(self.item(&row));
                    }
                }
            }
            for item in &mut items {
                item.child = by_parent.remove(&item.id).unwrap_or_default();
            }
        }
        if entities {
            self.enrich_entities(&mut items)?;
        }
        Ok(items)
    }

    /// The nearest ENTITY or INTERNAL ancestors of each item, walking up
    /// through descriptors and data.
    fn enrich_entities(&self, items: &mut [Item]) -> Result<(), CorrelationError> {
        // hash still lacking an entity -> index of the item it belongs to
        let mut missing: Vec<(String, usize)> = Vec::new();
        for (idx, item) in items.iter_mut().enumerate() {
            let sources = item.source.clone();
            for s in sources {
                if is_entity(&s.kind) {
                    item.entity.push(s);
                } else {
                    missing.push((s.id, idx));
                }
            }
        }
        let mut visited: BTreeSet<String> = BTreeSet::new();
        while !missing.is_empty() {
            let wanted: Vec<String> = missing.iter().map(|(h, _)| h.clone()).collect::<BTreeSet<_>>().into_iter().collect();
            let rows = self.rows_by_hash(&wanted)?;
            let parent_hashes: Vec<String> = rows.values().map(|r| r.source_hash.clone()).collect::<BTreeSet<_>>().into_iter().collect();
            let parents = self.rows_by_hash(&parent_hashes)?;
            let mut next = Vec::new();
            for (hash, idx) in missing {
                if !visited.insert(format!("{hash}:{idx}")) {
                    continue;
                }
                let Some(row) = rows.get(&hash) else { continue };
                if row.hash == row.source_hash {
                    continue;
                }
                let Some(parent) = parents.get(&row.source_hash) else { continue };
                let kind = self.kind(&parent.event_type);
                if is_entity(kind) {
                    items[idx].entity.push(self.item(parent));
                } else {
                    next.push((parent.hash.clone(), idx));
                }
            }
            missing = next;
        }
        Ok(())
    }

    /// Headline with `{field}` placeholders filled from the first item.
    pub fn title(&self, rule: &Rule, items: &[Item]) -> String {
        static FIELD: OnceLock<Option<Regex>> = OnceLock::new();
        let mut title = rule.headline.text().to_string();
        let Some(re) = FIELD.get_or_init(|| Regex::new(r"\{([a-z.]+)\}").ok()) else { return title };
        let Some(first) = items.first() else { return title };
        let names: Vec<String> = re.captures_iter(&title.clone()).map(|c| c[1].to_string()).collect();
        for name in names {
            let value = name.parse::<FieldRef>().ok().and_then(|f| first.extract(f).into_iter().next());
            match value {
                Some(v) => {
                    let line = v.replace('\r', "");
                    let line = line.split('\n').next().unwrap_or_default();
                    title = title.replace(&format!("{{{name}}}"), line);
                }
                None => tracing::error!(rule = %rule.id, field = %name, "headline field not available"),
            }
        }
        title
    }

    fn create_correlation(&self, rule: &Rule, items: &[Item]) -> Result<bool, CorrelationError> {
        let title = self.title(rule, items);
        let hashes: Vec<String> = items.iter().map(|i| i.id.clone()).collect::<BTreeSet<_>>().into_iter().collect();
        let id = correlation_id(&self.scan_id, &rule.id, &title, &hashes);
        tracing::info!(rule = %rule.id, "new correlation: {title}");
        let created = self.db.correlation_result_create(&NewCorrelation {
            id,
            scan_id: self.scan_id.clone(),
            rule_id: rule.id.clone(),
            rule_name: rule.meta.name.clone(),
            rule_descr: rule.meta.description.clone(),
            rule_risk: rule.meta.risk.clone(),
            rule_logic: rule.raw_yaml.clone(),
            title,
            event_hashes: hashes,
        })?;
        Ok(created)
    }
}

fn is_entity(kind: &str) -> bool {
    kind == "ENTITY" || kind == "INTERNAL"
}

fn stamp(item: &mut Item, index: usize) {
    item.collection = index;
    for i in item.source.iter_mut().chain(item.child.iter_mut()).chain(item.entity.iter_mut()) {
        i.collection = index;
    }
}

/// Stable across reruns so that stored results are not duplicated.
pub fn correlation_id(scan_id: &str, rule_id: &str, title: &str, hashes: &[String]) -> String {
    let mut h = Sha256::new();
    for part in [scan_id, rule_id, title].into_iter().chain(hashes.iter().map(String::as_str)) {
        h.update(part.as_bytes());
        h.update([0u8]);
    }
    hex::encode(h.finalize())
}

/// Bucket items by each value of `field`. For related-event fields the
/// copy in each bucket keeps only the related events with that value.
pub fn aggregate(field: FieldRef, items: Vec<Item>) -> Buckets {
    let mut out = Buckets::new();
    for item in items {
        for value in item.extract(field).into_iter().collect::<BTreeSet<_>>() {
            let mut copy = item.clone();
            if let Some(related) = copy.related_mut(field.scope) {
                related.retain(|r| r.attr(field.attr) == value);
            }
            out.entry(value).or_default().push(copy);
        }
    }
    out
}

pub fn analyze(a: &Analysis, buckets: &mut Buckets) {
    match a.method {
        AnalysisMethod::Threshold => threshold(a, buckets),
        AnalysisMethod::Outlier => outlier(a, buckets),
        AnalysisMethod::FirstCollectionOnly => first_collection_only(a, buckets),
        AnalysisMethod::MatchAllToFirstCollection => match_all_to_first_collection(a, buckets),
        AnalysisMethod::BothCollections => {
            tracing::debug!("both_collections analysis has no effect");
        }
    }
}

fn threshold(a: &Analysis, buckets: &mut Buckets) {
    let Some(field) = a.field else { return };
    let (min, max) = (a.minimum.unwrap_or(0), a.maximum.unwrap_or(THRESHOLD_MAX));
    buckets.retain(|_, items| {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for v in items.iter().flat_map(|i| i.extract(field)) {
            *counts.entry(v).or_default() += 1;
        }
        if a.count_unique_only {
            let uniques = counts.len() as u64;
            uniques >= min && uniques <= max
        } else {
            counts.values().all(|&c| c >= min && c <= max)
        }
    });
}

fn outlier(a: &Analysis, buckets: &mut Buckets) {
    if buckets.is_empty() {
        return;
    }
    let total: usize = buckets.values().map(Vec::len).sum();
    if total == 0 {
        buckets.clear();
        return;
    }
    let total = total as f64;
    let avg = total / buckets.len() as f64;
    let avg_pct = avg / total * 100.0;
    if avg_pct < a.noisy_percent.unwrap_or(10.0) {
        tracing::debug!(avg_pct, "not correlating, data is too noisy");
        buckets.clear();
        return;
    }
    let max_pct = a.maximum_percent.unwrap_or(100.0);
    buckets.retain(|_, items| items.len() as f64 / total * 100.0 <= max_pct);
}

fn first_collection_only(a: &Analysis, buckets: &mut Buckets) {
    let Some(field) = a.field else { return };
    let first: BTreeSet<String> = buckets
        .values()
        .flatten()
        .filter(|i| i.collection == 0)
        .flat_map(|i| i.extract(field))
        .collect();
    buckets.retain(|_, items| {
        !items
            .iter()
            .any(|i| i.collection > 0 && i.extract(field).iter().any(|v| first.contains(v)))
    });
    buckets.retain(|_, items| items.iter().all(|i| i.collection == 0));
}

fn match_all_to_first_collection(a: &Analysis, buckets: &mut Buckets) {
    let (Some(field), Some(how)) = (a.field, a.match_method) else { return };
    let reference: BTreeSet<String> = buckets
        .values()
        .flatten()
        .filter(|i| i.collection == 0)
        .flat_map(|i| i.extract(field))
        .collect();
    let matches = |values: Vec<String>| -> bool {
        values.iter().any(|v| match how {
            SubMatch::Exact => reference.contains(v),
            SubMatch::Contains => reference.iter().any(|r| r.contains(v.as_str())),
            SubMatch::Subnet => {
                let Ok(ip) = v.parse::<IpAddr>() else { return false };
                reference.iter().any(|r| {
                    r.parse::<IpNet>()
                        .or_else(|_| r.parse::<IpAddr>().map(IpNet::from))
                        .is_ok_and(|net| net.contains(&ip))
                })
            }
        })
    };
    buckets.retain(|_, items| {
        items.retain(|i| i.collection == 0 || matches(i.extract(field)));
        items.iter().any(|i| i.collection > 0)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(t: &str, data: &str, module: &str, collection: usize) -> Item {
        Item {
            event_type: t.into(),
            data: data.into(),
            module: module.into(),
            id: format!("{t}:{data}:{module}"),
            kind: "DATA".into(),
            source: Vec::new(),
            child: Vec::new(),
            entity: Vec::new(),
            collection,
        }
    }

    fn analysis(yaml: &str) -> Analysis {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn patterns(method: &str, values: &str) -> Vec<Pattern> {
        let m: MatchRule = serde_yaml::from_str(&format!("method: {method}\nfield: data\nvalue: {values}")).unwrap();
        m.patterns().unwrap()
    }

    #[test]
    fn negated_patterns() {
        let p = patterns("exact", "[\"not a\", \"not b\"]");
        assert!(!value_passes("a", &p));
        assert!(value_passes("c", &p));
        let p = patterns("regex", "[\"^ERR\"]");
        assert!(value_passes("error: x", &p));
        assert!(!value_passes("ok", &p));
    }

    #[test]
    fn aggregation_splits_related_events() {
        let mut a = item("MALICIOUS_IPADDR", "bad", "m1", 0);
        a.entity = vec![item("IP_ADDRESS", "1.1.1.1", "x", 0), item("IP_ADDRESS", "2.2.2.2", "x", 0)];
        let buckets = aggregate("entity.data".parse().unwrap(), vec![a]);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets["1.1.1.1"][0].entity.len(), 1);
        assert_eq!(buckets["2.2.2.2"][0].entity[0].data, "2.2.2.2");
    }

    #[test]
    fn threshold_on_unique_values() {
        let mut buckets = Buckets::from([
            ("one".to_string(), vec![item("T", "x", "m1", 0), item("T", "x", "m1", 0)]),
            ("two".to_string(), vec![item("T", "y", "m1", 0), item("T", "y", "m2", 0)]),
        ]);
        threshold(&analysis("method: threshold\nfield: module\ncount_unique_only: true\nminimum: 2"), &mut buckets);
        assert_eq!(buckets.keys().collect::<Vec<_>>(), vec!["two"]);

        let mut buckets = Buckets::from([
            ("a".to_string(), vec![item("T", "x", "m", 0), item("T", "x", "m", 0), item("T", "x", "m", 0)]),
            ("b".to_string(), vec![item("T", "y", "m", 0)]),
        ]);
        threshold(&analysis("method: threshold\nfield: data\nminimum: 2\nmaximum: 3"), &mut buckets);
        assert_eq!(buckets.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn outliers_survive() {
        let mut buckets = Buckets::new();
        buckets.insert("common".into(), (0..8).map(|n| item("T", &n.to_string(), "m", 0)).collect());
        buckets.insert("rare".into(), vec![item("T", "r", "m", 0)]);
        buckets.insert("rarer".into(), vec![item("T", "q", "m", 0)]);
        outlier(&analysis("method: outlier\nmaximum_percent: 20"), &mut buckets);
        assert_eq!(buckets.keys().collect::<Vec<_>>(), vec!["rare", "rarer"]);

        let mut noisy = Buckets::new();
        for n in 0..20 {
            noisy.insert(n.to_string(), vec![item("T", "v", "m", 0)]);
        }
        outlier(&analysis("method: outlier\nmaximum_percent: 50"), &mut noisy);
        assert!(noisy.is_empty());
    }

    #[test]
    fn first_collection_only_drops_shared_values() {
        let mut buckets = Buckets::from([
            ("a".to_string(), vec![item("T", "a", "m", 0)]),
            ("b".to_string(), vec![item("T", "b", "m", 0), item("U", "b", "m", 1)]),
        ]);
        first_collection_only(&analysis("method: first_collection_only\nfield: data"), &mut buckets);
        assert_eq!(buckets.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn match_all_to_first_collection_by_subnet() {
        let mut buckets = Buckets::from([
            (
                "k".to_string(),
                vec![item("NETBLOCK_OWNER", "10.0.0.0/8", "m", 0), item("IP_ADDRESS", "10.1.2.3", "m", 1)],
            ),
            ("l".to_string(), vec![item("IP_ADDRESS", "192.0.2.1", "m", 1)]),
        ]);
        match_all_to_first_collection(
            &analysis("method: match_all_to_first_collection\nfield: data\nmatch_method: subnet"),
            &mut buckets,
        );
        assert_eq!(buckets.keys().collect::<Vec<_>>(), vec!["k"]);
        assert_eq!(buckets["k"].len(), 2);
    }

    #[test]
    fn ids_are_stable() {
        let h = vec!["a".to_string(), "b".to_string()];
        assert_eq!(correlation_id("S", "r", "t", &h), correlation_id("S", "r", "t", &h));
        assert_ne!(correlation_id("S", "r", "t", &h), correlation_id("S2", "r", "t", &h));
    }
}
