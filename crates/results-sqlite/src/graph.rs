//! Entity graph over stored events. Non-entity events are collapsed so
//! each entity links to its nearest entity ancestor.

use crate::models::ResultRow;
use rand::Rng;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};

fn is_node(kind: &str) -> bool {
    kind == "ENTITY" || kind == "INTERNAL"
}

/// `(child, parent)` hash pairs between entity/internal events.
pub fn build_graph_data(rows: &[ResultRow]) -> BTreeSet<(String, String)> {
    let entities: HashSet<&str> = rows
        .iter()
        .filter(|r| is_node(&r.event_kind))
        .map(|r| r.hash.as_str())
        .collect();
    let parents: HashMap<&str, &str> = rows.iter().map(|r| (r.hash.as_str(), r.source_hash.as_str())).collect();

    let mut mapping = BTreeSet::new();
    for &entity in &entities {
        let mut visited = HashSet::new();
        for parent in nearest_entity_parents(entity, &entities, &parents, &mut visited) {
            mapping.insert((entity.to_string(), parent.to_string()));
        }
    }
    mapping
}

fn nearest_entity_parents<'a>(
    item: &'a str,
    entities: &HashSet<&'a str>,
    parents: &HashMap<&'a str, &'a str>,
    visited: &mut HashSet<&'a str>,
) -> Vec<&'a str> {
    let Some(&parent) = parents.get(item) else {
        return Vec::new();
    };
    if parent == item || !visited.insert(parent) {
        return Vec::new();
    }
    if entities.contains(parent) {
        vec![parent]
    } else {
        nearest_entity_parents(parent, entities, parents, visited)
    }
}

struct Node<'a> {
    id: &'a str,
    label: &'a str,
    is_root: bool,
}

fn graph_nodes<'a>(roots: &[String], rows: &'a [ResultRow], mapping: &BTreeSet<(String, String)>) -> (Vec<Node<'a>>, Vec<(String, String)>) {
    let by_hash: HashMap<&str, &ResultRow> = rows.iter().map(|r| (r.hash.as_str(), r)).collect();
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for (child, parent) in mapping {
        for id in [child, parent] {
            let Some(row) = by_hash.get(id.as_str()) else { continue };
            if row.event_type == "ROOT" || !seen.insert(id.clone()) {
                continue;
            }
            nodes.push(Node {
                id: row.hash.as_str(),
                label: row.data.as_str(),
                is_root: roots.iter().any(|r| r == &row.data),
            });
        }
        let touches_root = [child, parent]
            .iter()
            .any(|h| by_hash.get(h.as_str()).map_or(true, |r| r.event_type == "ROOT"));
        if !touches_root {
            edges.push((parent.clone(), child.clone()));
        }
    }
    (nodes, edges)
}

/// `{nodes: [...], edges: [...]}` suitable for sigma-style viewers.
pub fn graph_json(roots: &[String], rows: &[ResultRow]) -> serde_json::Value {
    let mapping = build_graph_data(rows);
    let (nodes, edges) = graph_nodes(roots, rows, &mapping);
    let mut rng = rand::thread_rng();
    let nodes: Vec<_> = nodes
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "label": n.label,
                "x": rng.gen_range(0..1000),
                "y": rng.gen_range(0..1000),
                "size": 1,
                "color": if n.is_root { "#f00" } else { "#000" },
            })
        })
        .collect();
    let edges: Vec<_> = edges
        .iter()
        .enumerate()
        .map(|(i, (src, dst))| json!({ "id": i.to_string(), "source": src, "target": dst }))
        .collect();
    json!({ "nodes": nodes, "edges": edges })
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// GEXF 1.2 document.
pub fn graph_gexf(roots: &[String], title: &str, rows: &[ResultRow]) -> String {
    let mapping = build_graph_data(rows);
    let (nodes, edges) = graph_nodes(roots, rows, &mapping);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<gexf xmlns=\"http://www.gexf.net/1.2draft\" xmlns:viz=\"http://www.gexf.net/1.2draft/viz\" version=\"1.2\">\n");
    out.push_str(&format!(
        "  <meta><creator>SpiderFoot</creator><description>{}</description></meta>\n",
        xml_escape(title)
    ));
    out.push_str("  <graph defaultedgetype=\"directed\" mode=\"static\">\n    <nodes>\n");
    for n in &nodes {
        let (r, g, b) = if n.is_root { (255, 0, 0) } else { (0, 0, 0) };
        out.push_str(&format!(
            "      <node id=\"{}\" label=\"{}\"><viz:color r=\"{r}\" g=\"{g}\" b=\"{b}\"/></node>\n",
            xml_escape(n.id),
            xml_escape(n.label)
        ));
    }
    out.push_str("    </nodes>\n    <edges>\n");
    for (i, (src, dst)) in edges.iter().enumerate() {
        out.push_str(&format!(
            "      <edge id=\"{i}\" source=\"{}\" target=\"{}\"/>\n",
            xml_escape(src),
            xml_escape(dst)
        ));
    }
    out.push_str("    </edges>\n  </graph>\n</gexf>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(hash: &str, parent: &str, t: &str, kind: &str, data: &str) -> ResultRow {
        ResultRow {
            generated: 0.0,
            data: data.into(),
            source_data: String::new(),
            module: "m".into(),
            event_type: t.into(),
            confidence: 100,
            visibility: 100,
            risk: 0,
            hash: hash.into(),
            source_hash: parent.into(),
            event_descr: String::new(),
            event_kind: kind.into(),
            scan_id: "S".into(),
            false_positive: false,
            parent_false_positive: false,
        }
    }

    fn sample() -> Vec<ResultRow> {
        vec![
            row("ROOT", "ROOT", "ROOT", "INTERNAL", "example.com"),
            row("a", "ROOT", "INTERNET_NAME", "ENTITY", "example.com"),
            row("b", "a", "RAW_DNS_RECORDS", "DATA", "dns blob"),
            row("c", "b", "IP_ADDRESS", "ENTITY", "1.2.3.4"),
        ]
    }

    #[test]
    fn collapses_non_entity_parents() {
        let m = build_graph_data(&sample());
        assert!(m.contains(&("c".to_string(), "a".to_string())));
        assert!(m.contains(&("a".to_string(), "ROOT".to_string())));
        assert!(!m.iter().any(|(c, _)| c == "b"));
    }

    #[test]
    fn json_skips_root_edges() {
        let v = graph_json(&["example.com".to_string()], &sample());
        let edges = v["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["source"], "a");
        assert_eq!(edges[0]["target"], "c");
        let nodes = v["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().any(|n| n["label"] == "example.com" && n["color"] == "#f00"));
    }

    #[test]
    fn gexf_escapes_labels() {
        let mut rows = sample();
        rows[3].data = "<x&y>".into();
        let xml = graph_gexf(&[], "scan & co", &rows);
        assert!(xml.contains("label=\"&lt;x&amp;y&gt;\""));
        assert!(xml.contains("scan &amp; co"));
    }
}
