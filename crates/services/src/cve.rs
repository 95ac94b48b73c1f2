use serde_json::Value;

pub(crate) const SOURCES: [&str; 2] = ["circl", "nist"];
/// Cached CVE documents are effectively permanent.
pub(crate) const CACHE_HOURS: u64 = 86_400;

pub(crate) fn source_url(source: &str, cve: &str) -> String {
    match source {
        "circl" => format!("https://cve.circl.lu/api/cve/{cve}"),
        _ => format!("https://services.nvd.nist.gov/rest/json/cve/1.0/{cve}"),
    }
}

pub fn rating(score: f64) -> &'static str {
    if score < 4.0 {
        "LOW"
    } else if score < 7.0 {
        "MEDIUM"
    } else if score < 9.0 {
        "HIGH"
    } else {
        "CRITICAL"
    }
}

/// `(score, description)` from a source's JSON document.
pub(crate) fn parse(source: &str, body: &str) -> Option<(f64, String)> {
    let v: Value = serde_json::from_str(body).ok()?;
    match source {
        "circl" => {
            let score = as_score(v.get("cvss")?)?;
            let descr = v.get("summary")?.as_str()?.trim();
            (!descr.is_empty()).then(|| (score, descr.to_string()))
        }
        _ => {
            let item = v.pointer("/result/CVE_Items/0")?;
            let score = item
                .pointer("/impact/baseMetricV3/cvssV3/baseScore")
                .or_else(|| item.pointer("/impact/baseMetricV2/cvssV2/baseScore"))
                .and_then(as_score)?;
            let descr = item.pointer("/cve/description/description_data/0/value")?.as_str()?;
            Some((score, descr.to_string()))
        }
    }
}

fn as_score(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{score:.1}")
    } else {
        score.to_string()
    }
}

pub(crate) fn describe(cve: &str, score: f64, descr: &str) -> (String, String) {
    (
        format!("VULNERABILITY_CVE_{}", rating(score)),
        format!(
            "{cve}\n<SFURL>https://nvd.nist.gov/vuln/detail/{cve}</SFURL>\nScore: {}\nDescription: {descr}",
            format_score(score)
        ),
    )
}

pub(crate) fn unknown(cve: &str) -> (String, String) {
    ("VULNERABILITY_GENERAL".to_string(), format!("{cve}\nScore: Unknown\nDescription: Unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratings() {
        assert_eq!(rating(0.0), "LOW");
        assert_eq!(rating(3.9), "LOW");
        assert_eq!(rating(4.0), "MEDIUM");
        assert_eq!(rating(7.5), "HIGH");
        assert_eq!(rating(9.0), "CRITICAL");
    }

    #[test]
    fn parses_circl() {
        let body = r#"{"id":"CVE-2021-44228","cvss":"9.3","summary":"Log4Shell"}"#;
        assert_eq!(parse("circl", body), Some((9.3, "Log4Shell".to_string())));
        assert_eq!(parse("circl", r#"{"cvss":null,"summary":"x"}"#), None);
    }

    #[test]
    fn parses_nist_preferring_v3() {
        let body = r#"{"result":{"CVE_Items":[{"cve":{"description":{"description_data":[{"value":"bad"}]}},
            "impact":{"baseMetricV3":{"cvssV3":{"baseScore":10}},"baseMetricV2":{"cvssV2":{"baseScore":5.0}}}}]}}"#;
        assert_eq!(parse("nist", body), Some((10.0, "bad".to_string())));
    }

    #[test]
    fn describes_found_and_unknown() {
        let (t, d) = describe("CVE-1", 10.0, "desc");
        assert_eq!(t, "VULNERABILITY_CVE_CRITICAL");
        assert_eq!(d, "CVE-1\n<SFURL>https://nvd.nist.gov/vuln/detail/CVE-1</SFURL>\nScore: 10.0\nDescription: desc");
        assert_eq!(unknown("CVE-1").1, "CVE-1\nScore: Unknown\nDescription: Unknown");
    }
}
