//! Web probes. `web80`/`webssl` are HEAD reachability checks; `webcontent`
//! renders the page in a headless browser and compares it against the
//! expected copy with a trigram similarity ratio.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions};

use super::{
    cache, run_blocking, with_deadline, Outcome, ProbeContext, ProbeError, WEB_CONTENT_TIMEOUT,
    WEB_TIMEOUT,
};
use crate::config::ServiceConfig;

/// Minimum similarity between the rendered and expected page.
const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Settle time after the page root becomes visible, for async data loads.
const RENDER_SETTLE: Duration = Duration::from_secs(1);

fn check_status(status: u16) -> Result<(), ProbeError> {
    if (200..=400).contains(&status) {
        Ok(())
    } else {
        Err(ProbeError::Http(format!("unexpected status code {status}")))
    }
}

async fn head(url: &str) -> Result<(), ProbeError> {
    let client = reqwest::Client::builder()
        .timeout(WEB_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|err| ProbeError::Http(err.to_string()))?;
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|err| ProbeError::Unreachable(err.to_string()))?;
    check_status(response.status().as_u16())
}

/// `web80`: HEAD over plain HTTP, success iff the status is in [200, 400].
pub(super) async fn http_head(
    _ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    with_deadline(WEB_TIMEOUT, async {
        head(&format!("http://{addr}:{}", svc.port)).await?;
        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}

/// `webssl`: HEAD over HTTPS. A response implies the TLS handshake finished;
/// certificates are not validated.
pub(super) async fn https_head(
    _ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    with_deadline(WEB_TIMEOUT, async {
        head(&format!("https://{addr}:{}", svc.port)).await?;
        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}

/// `webcontent`: TCP reachability gate, then a full headless render compared
/// against the pre-loaded expected page.
pub(super) async fn content(
    _ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let file = svc
        .query_file
        .as_ref()
        .ok_or(ProbeError::MissingField("query_file"))?;
    let expected = cache::expected_page(file)?;

    let target: SocketAddr = format!("{addr}:{}", svc.port)
        .parse()
        .map_err(|_| ProbeError::Unreachable(format!("invalid target {addr}:{}", svc.port)))?;
    with_deadline(WEB_TIMEOUT, async {
        tokio::net::TcpStream::connect(target)
            .await
            .map_err(|err| ProbeError::Unreachable(err.to_string()))?;
        Ok(())
    })
    .await?;

    let url = if svc.port == 443 {
        format!("https://{addr}")
    } else {
        format!("http://{addr}:{}", svc.port)
    };
    let rendered = run_blocking(WEB_CONTENT_TIMEOUT, move || render(&url)).await?;

    let ratio = similarity(&expected, &rendered);
    if ratio < SIMILARITY_THRESHOLD {
        return Err(ProbeError::ContentMismatch(format!(
            "rendered page similarity {ratio:.3} below {SIMILARITY_THRESHOLD}"
        )));
    }
    Ok(Outcome {
        award: svc.award,
        up: true,
    })
}

fn render(url: &str) -> Result<String, ProbeError> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(WEB_CONTENT_TIMEOUT)
        .build()
        .map_err(|err| ProbeError::Render(err.to_string()))?;
    let browser = Browser::new(options).map_err(|err| ProbeError::Render(err.to_string()))?;
    let tab = browser
        .new_tab()
        .map_err(|err| ProbeError::Render(err.to_string()))?;

    tab.navigate_to(url)
        .map_err(|err| ProbeError::Render(format!("navigation failed: {err}")))?;
    tab.wait_for_element("#root")
        .map_err(|err| ProbeError::Render(format!("page root never appeared: {err}")))?;
    std::thread::sleep(RENDER_SETTLE);

    tab.get_content()
        .map_err(|err| ProbeError::Render(format!("could not read page: {err}")))
}

/// Character-trigram Jaccard similarity in [0, 1]. Robust to small localized
/// edits but punishing once real content diverges; a prefix-boosted metric
/// would score a defaced page too close to the original markup shell.
pub(crate) fn similarity(expected: &str, rendered: &str) -> f64 {
    if expected == rendered {
        return 1.0;
    }
    let a = trigrams(expected);
    let b = trigrams(rendered);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

fn trigrams(text: &str) -> HashSet<&[u8]> {
    text.as_bytes().windows(3).collect()
}
