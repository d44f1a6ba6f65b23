use crate::config::ScanConfig;
use crate::scan::shell::CommandRunner;
use crate::scan::{Prober, ServerProbe};
use crate::types::Scheme;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

/// Written by curl after the body so body and status split from one stream
pub const STATUS_MARKER: &str = "\n__GARSON_STATUS__:";

const REACHABLE_STATUS: RangeInclusive<u16> = 100..=599;
const MAX_REDIRECTS: usize = 10;
const PROBE_HOST: &str = "127.0.0.1";

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
});

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+").expect("whitespace pattern is valid")
});

const HTML_ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&nbsp;", " "),
];

pub fn decode_html_entities(text: &str) -> String {
    HTML_ENTITIES
        .iter()
        .fold(text.to_string(), |decoded, (entity, replacement)| decoded.replace(entity, replacement))
}

/// Text of the first `<title>` element, entity-decoded and whitespace-collapsed
pub fn extract_title(html: &str) -> Option<String> {
    let raw = TITLE_RE.captures(html)?.get(1)?.as_str();
    let decoded = decode_html_entities(raw);
    let flattened = WHITESPACE_RE.replace_all(&decoded, " ");
    let title = flattened.trim();
    if title.is_empty() { None } else { Some(title.to_string()) }
}

/// Split curl output into body and status code at the first status marker
pub fn split_status_marker(output: &str) -> Option<(&str, u16)> {
    let (body, status_text) = output.split_once(STATUS_MARKER)?;
    let status: u16 = status_text.trim().parse().ok()?;
    REACHABLE_STATUS.contains(&status).then_some((body, status))
}

fn probe_url(scheme: Scheme, port: u16) -> String {
    format!("{}://{}:{}", scheme, PROBE_HOST, port)
}

/// Probes with curl: plain HTTP first, then HTTPS without certificate checks
pub struct CurlProber {
    runner: Arc<dyn CommandRunner>,
    curl_path: PathBuf,
    max_time: String,
    range: String,
}

impl CurlProber {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &ScanConfig) -> Self {
        let max_time = config.max_time_arg();
        let range = config.range_arg();
        log::debug!("[scan::http] CurlProber::new: curl={} max_time={} range={}",
            config.curl_path.display(), max_time, range);
        Self {
            runner,
            curl_path: config.curl_path.clone(),
            max_time,
            range,
        }
    }

    fn curl_args(&self, scheme: Scheme, port: u16) -> Vec<String> {
        let mut args: Vec<String> = [
            "-sS",
            "-L",
            "--max-time", self.max_time.as_str(),
            "--range", self.range.as_str(),
            "-o", "-",
            "-w", "\n__GARSON_STATUS__:%{http_code}",
        ]
        .iter()
        .map(|a| a.to_string())
        .collect();
        if scheme == Scheme::Https {
            args.push("-k".to_string());
        }
        args.push(probe_url(scheme, port));
        args
    }

    async fn attempt(&self, scheme: Scheme, port: u16) -> Option<ServerProbe> {
        let output = self.runner.run(&self.curl_path, &self.curl_args(scheme, port)).await;
        // curl's exit status is ignored: a timeout mid-body still reports a real status
        let Some((body, status)) = split_status_marker(&output.stdout) else {
            log::trace!("[scan::http] no_response: port={} scheme={} curl_status={}", port, scheme, output.status);
            return None;
        };
        log::trace!("[scan::http] response: port={} scheme={} status={} body_len={}", port, scheme, status, body.len());
        Some(ServerProbe {
            scheme,
            page_title: extract_title(body),
        })
    }
}

#[async_trait]
impl Prober for CurlProber {
    async fn probe(&self, port: u16) -> Option<ServerProbe> {
        if let Some(probe) = self.attempt(Scheme::Http, port).await {
            return Some(probe);
        }
        self.attempt(Scheme::Https, port).await
    }
}

/// Probes in-process with reqwest, following the same rules as [`CurlProber`]
#[derive(Debug, Clone)]
pub struct NativeProber {
    http: Client,
    https_insecure: Client,
    body_limit: usize,
    range: String,
}

impl NativeProber {
    pub fn new(config: &ScanConfig) -> eyre::Result<Self> {
        log::debug!("[scan::http] NativeProber::new: timeout={}ms body_limit={}",
            config.probe_timeout.as_millis(), config.body_limit);
        Ok(Self {
            http: Self::client(config.probe_timeout, false)?,
            https_insecure: Self::client(config.probe_timeout, true)?,
            body_limit: config.body_limit,
            range: format!("bytes={}", config.range_arg()),
        })
    }

    fn client(timeout: Duration, accept_invalid_certs: bool) -> eyre::Result<Client> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("garcon/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .no_proxy()
            .build()?;
        Ok(client)
    }

    async fn attempt(&self, scheme: Scheme, port: u16) -> Option<ServerProbe> {
        let client = match scheme {
            Scheme::Http => &self.http,
            Scheme::Https => &self.https_insecure,
        };
        let start = Instant::now();
        let mut response = match client
            .get(probe_url(scheme, port))
            .header(reqwest::header::RANGE, &self.range)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::trace!("[scan::http] no_response: port={} scheme={} error={}", port, scheme, e);
                return None;
            }
        };

        let status = response.status().as_u16();
        if !REACHABLE_STATUS.contains(&status) {
            return None;
        }

        let mut body = Vec::new();
        while body.len() < self.body_limit {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                // keep whatever arrived before the timeout
                Err(_) => break,
            }
        }
        body.truncate(self.body_limit);

        log::trace!("[scan::http] response: port={} scheme={} status={} body_len={} duration={}ms",
            port, scheme, status, body.len(), start.elapsed().as_millis());

        Some(ServerProbe {
            scheme,
            page_title: extract_title(&String::from_utf8_lossy(&body)),
        })
    }
}

#[async_trait]
impl Prober for NativeProber {
    async fn probe(&self, port: u16) -> Option<ServerProbe> {
        if let Some(probe) = self.attempt(Scheme::Http, port).await {
            return Some(probe);
        }
        self.attempt(Scheme::Https, port).await
    }
}
