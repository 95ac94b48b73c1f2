use crate::proxy::ProxyConfig;
use crate::ServicesError;
use reqwest::{redirect::Policy, Client, Method};
use spiderfoot_core::ratelimiter::RateLimiter;
use spiderfoot_core::{FetchRequest, FetchResponse};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// One client pair per route: certificate checks on and off.
struct Clients {
    strict: Client,
    lax: Client,
}

impl Clients {
    fn build(proxy: Option<&ProxyConfig>, user_agent: &str) -> Result<Self, ServicesError> {
        let make = |verify: bool| -> Result<Client, ServicesError> {
            let mut b = Client::builder()
                .redirect(Policy::limited(MAX_REDIRECTS))
                .user_agent(user_agent)
                .danger_accept_invalid_certs(!verify)
                .brotli(true)
                .gzip(true)
                .deflate(true);
            if let Some(p) = proxy {
                b = b.proxy(reqwest::Proxy::all(p.url())?);
            } else {
                b = b.no_proxy();
            }
            Ok(b.build()?)
        };
        Ok(Clients { strict: make(true)?, lax: make(false)? })
    }

    fn pick(&self, verify: bool) -> &Client {
        if verify {
            &self.strict
        } else {
            &self.lax
        }
    }
}

pub(crate) struct Http {
    direct: Clients,
    proxied: Option<(ProxyConfig, Clients)>,
    limiter: Option<RateLimiter>,
    max_timeout: Duration,
}

impl Http {
    /// Must be called inside the runtime that will drive requests.
    pub(crate) fn new(
        proxy: Option<ProxyConfig>,
        user_agent: &str,
        max_timeout: Duration,
        qps: u32,
    ) -> Result<Self, ServicesError> {
        let direct = Clients::build(None, user_agent)?;
        let proxied = match proxy {
            Some(p) => {
                let clients = Clients::build(Some(&p), user_agent)?;
                Some((p, clients))
            }
            None => None,
        };
        Ok(Http { direct, proxied, limiter: RateLimiter::per_second(qps), max_timeout })
    }

    fn client_for(&self, host: &str, verify: bool) -> &Client {
        match &self.proxied {
            Some((p, clients)) if !p.bypass(host) => clients.pick(verify),
            _ => self.direct.pick(verify),
        }
    }

    pub(crate) async fn fetch(&self, req: &FetchRequest) -> FetchResponse {
        let first = self.fetch_once(req).await;
        // Follow a meta-style Refresh header once.
        match first.headers.get("refresh").and_then(|v| refresh_target(v)) {
            Some(next) if first.code != "-1" => {
                let next = match Url::parse(&first.real_url).and_then(|base| base.join(&next)) {
                    Ok(u) => u.to_string(),
                    Err(_) => next,
                };
                tracing::debug!(from = %req.url, to = %next, "following refresh header");
                let follow = FetchRequest { url: next, ..req.clone() };
                self.fetch_once(&follow).await
            }
            _ => first,
        }
    }

    async fn fetch_once(&self, req: &FetchRequest) -> FetchResponse {
        let url = match Url::parse(req.url.trim()) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            Ok(u) => return FetchResponse::failed(&req.url, format!("unsupported scheme: {}", u.scheme())),
            Err(e) => return FetchResponse::failed(&req.url, format!("invalid URL: {e}")),
        };
        let host = url.host_str().unwrap_or_default().to_string();

        if let Some(l) = &self.limiter {
            l.acquire().await;
        }

        let timeout = req.timeout.map_or(self.max_timeout, |t| t.min(self.max_timeout));
        let method = if req.head_only {
            Method::HEAD
        } else if req.post_data.is_some() {
            Method::POST
        } else {
            Method::GET
        };
        let mut rb = self.client_for(&host, req.verify).request(method, url).timeout(timeout);
        if let Some(ua) = &req.user_agent {
            rb = rb.header(reqwest::header::USER_AGENT, ua);
        }
        for (k, v) in &req.headers {
            rb = rb.header(k.as_str(), v.as_str());
        }
        if !req.cookies.is_empty() {
            let cookie = req.cookies.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("; ");
            rb = rb.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(body) = &req.post_data {
            if !req.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                rb = rb.header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            }
            rb = rb.body(body.clone());
        }

        let resp = match rb.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url = %req.url, "fetch failed: {e}");
                return FetchResponse::failed(&req.url, e.to_string());
            }
        };

        let status = resp.status();
        let real_url = resp.url().to_string();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_lowercase(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let too_big = matches!((req.size_limit, resp.content_length()), (Some(limit), Some(len)) if len > limit);

        let content = if req.head_only || too_big {
            None
        } else {
            match resp.bytes().await {
                Ok(b) => Some(String::from_utf8_lossy(&b).into_owned()),
                Err(e) => {
                    tracing::debug!(url = %req.url, "reading body failed: {e}");
                    None
                }
            }
        };

        FetchResponse {
            code: status.as_u16().to_string(),
            status: status.canonical_reason().unwrap_or_default().to_string(),
            content,
            headers,
            real_url,
        }
    }
}

/// `5; url=/next` -> `/next`
fn refresh_target(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find(";url=").or_else(|| lower.find("; url="))?;
    let rest = &value[idx..];
    let eq = rest.find('=')?;
    let target = rest[eq + 1..].trim().trim_matches(|c| c == '"' || c == '\'');
    (!target.is_empty()).then(|| target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_refresh_targets() {
        assert_eq!(refresh_target("0;url=https://x.com/"), Some("https://x.com/".into()));
        assert_eq!(refresh_target("5; URL='/next'"), Some("/next".into()));
        assert_eq!(refresh_target("5"), None);
        assert_eq!(refresh_target("0;url="), None);
    }
}
