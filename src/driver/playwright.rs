//! Playwright-backed browser driver.
//!
//! Each session is a `node` child process running an embedded bridge script
//! that owns one browser, one context and one page. Commands and replies are
//! newline-delimited JSON over stdin/stdout:
//!
//! ```text
//! -> {"id": 3, "cmd": "click", "selector": "#login", "timeout": 5000}
//! <- {"id": 3, "ok": true, "value": null}
//! <- {"id": 4, "ok": false, "kind": "notFound", "error": "..."}
//! ```

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::backend::{BrowserDriver, BrowserFactory};
use super::types::{
    CapturedRequest, DriverError, DriverResult, PageState, SettleOutcome, WaitPolicy,
};

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const pw = require('playwright');

const cfg = JSON.parse(process.argv[1] || '{}');
let browser, context, page, tracePath = null;
const requests = [];

const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

const outline = async () => page.evaluate(() => {
  const pick = (el) => {
    if (el.id && document.querySelectorAll('#' + CSS.escape(el.id)).length === 1) {
      return '#' + CSS.escape(el.id);
    }
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1) {
      let i = 1;
      let s = node.previousElementSibling;
      while (s) { if (s.tagName === node.tagName) i++; s = s.previousElementSibling; }
      parts.unshift(node.tagName.toLowerCase() === 'html' ? 'html' : `${node.tagName.toLowerCase()}:nth-of-type(${i})`);
      node = node.parentElement;
    }
    return parts.join(' > ');
  };
  const items = Array.from(document.querySelectorAll(
    'a, button, input, select, textarea, [role="button"], [role="link"], [onclick]'
  )).slice(0, 200);
  const lines = items.map((el) => {
    const label = (el.getAttribute('aria-label') || el.getAttribute('placeholder') ||
      el.getAttribute('name') || el.innerText || el.value || '').toString().trim().slice(0, 80);
    return `${pick(el)} [${el.tagName.toLowerCase()}] ${label}`;
  });
  const text = (document.body ? document.body.innerText : '').slice(0, 4000);
  return `title: ${document.title}\ntext: ${text}\n${lines.join('\n')}`;
});

const withLocator = async (msg, fn) => {
  const locator = page.locator(msg.selector).first();
  try {
    return await fn(locator);
  } catch (e) {
    if ((await page.locator(msg.selector).count().catch(() => 0)) === 0) {
      const err = new Error(`selector not found: ${msg.selector}`);
      err.kind = 'notFound';
      throw err;
    }
    throw e;
  }
};

const handlers = {
  navigate: (m) => page.goto(m.url, { waitUntil: m.waitUntil, timeout: m.timeout }).then(() => null),
  exists: async (m) => (await page.locator(m.selector).count()) > 0,
  click: (m) => withLocator(m, (l) => l.click({ timeout: m.timeout })),
  fill: (m) => withLocator(m, (l) => l.fill(m.value, { timeout: m.timeout })),
  type: (m) => withLocator(m, (l) => l.pressSequentially(m.value, { timeout: m.timeout })),
  select: (m) => withLocator(m, (l) => l.selectOption(m.value, { timeout: m.timeout })).then(() => null),
  check: (m) => withLocator(m, (l) => l.setChecked(m.checked, { timeout: m.timeout })),
  hover: (m) => withLocator(m, (l) => l.hover({ timeout: m.timeout })),
  press: (m) => withLocator(m, (l) => l.press(m.key, { timeout: m.timeout })),
  url: async () => page.url(),
  title: async () => page.title(),
  text: async () => page.evaluate(() => (document.body ? document.body.innerText : '')),
  snapshot: async (m) => ({
    url: page.url(),
    title: await page.title(),
    outline: await outline(),
    screenshot: m.screenshot ? (await page.screenshot()).toString('base64') : null,
  }),
  networkIdle: async (m) => {
    try {
      await page.waitForLoadState('networkidle', { timeout: m.timeout });
      return 'idle';
    } catch (e) {
      return 'timedOut';
    }
  },
  evaluate: (m) => page.evaluate(m.script),
  traceStart: async (m) => {
    await context.tracing.start({ screenshots: true, snapshots: true });
    tracePath = m.path;
    return null;
  },
  traceStop: async () => {
    if (!tracePath) return null;
    const path = tracePath;
    tracePath = null;
    await context.tracing.stop({ path });
    return path;
  },
  requests: async () => requests.splice(0, requests.length),
  close: async () => {
    await browser.close();
    return null;
  },
};

(async () => {
  const engine = pw[cfg.browser || 'chromium'];
  browser = await engine.launch({ headless: cfg.headless !== false });
  context = await browser.newContext({ viewport: { width: cfg.width || 1280, height: cfg.height || 720 } });
  page = await context.newPage();
  page.on('request', (req) => {
    let body = null;
    try { body = req.postDataJSON(); } catch (e) { body = null; }
    requests.push({ url: req.url(), method: req.method(), body });
  });
  send({ id: 0, ok: true, value: 'ready' });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let msg;
    try { msg = JSON.parse(line); } catch (e) { continue; }
    const handler = handlers[msg.cmd];
    if (!handler) {
      send({ id: msg.id, ok: false, kind: 'browser', error: `unknown command ${msg.cmd}` });
      continue;
    }
    try {
      const value = await handler(msg);
      send({ id: msg.id, ok: true, value: value === undefined ? null : value });
    } catch (e) {
      const kind = e.kind || (e.name === 'TimeoutError' ? 'timeout' : (msg.cmd === 'navigate' ? 'navigation' : 'browser'));
      send({ id: msg.id, ok: false, kind, error: String(e && e.message ? e.message : e) });
    }
    if (msg.cmd === 'close') break;
  }
  process.exit(0);
})().catch((e) => {
  send({ id: 0, ok: false, kind: 'browser', error: String(e && e.message ? e.message : e) });
  process.exit(1);
});
"#;

/// Browser engine to launch
#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    /// Parse a browser name as given on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Some(Browser::Chromium),
            "firefox" => Some(Browser::Firefox),
            "webkit" | "safari" => Some(Browser::Webkit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright sessions
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// `node` executable
    pub node: String,
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Per-primitive timeout for selector operations
    pub action_timeout: Duration,
    /// Attach a screenshot to page snapshots sent to the planner
    pub screenshots: bool,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            action_timeout: Duration::from_secs(5),
            screenshots: false,
        }
    }
}

struct Bridge {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// One Playwright browser session
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
    bridge: Mutex<Bridge>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl PlaywrightDriver {
    /// Spawn the bridge and wait for the browser to come up
    pub async fn launch(config: PlaywrightConfig) -> DriverResult<Self> {
        let bridge_config = json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "width": config.viewport_width,
            "height": config.viewport_height,
        });

        let mut child = Command::new(&config.node)
            .arg("-e")
            .arg(BRIDGE_SCRIPT)
            .arg(bridge_config.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Browser("failed to capture bridge stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Browser("failed to capture bridge stdout".to_string()))?;

        let mut bridge = Bridge {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        // First line is the ready handshake (id 0)
        let ready = read_reply(&mut bridge.stdout, 0).await?;
        reply_value(ready, "launch", Duration::ZERO)?;
        tracing::debug!("playwright bridge ready ({})", config.browser.as_str());

        Ok(Self {
            config,
            bridge: Mutex::new(bridge),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    async fn call(&self, cmd: &str, mut args: Value, timeout: Duration) -> DriverResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Value::Object(map) = &mut args {
            map.insert("id".to_string(), json!(id));
            map.insert("cmd".to_string(), json!(cmd));
        }

        let mut bridge = self.bridge.lock().await;
        let mut line = args.to_string();
        line.push('\n');
        bridge.stdin.write_all(line.as_bytes()).await?;
        bridge.stdin.flush().await?;

        // Bridge-side timeouts are authoritative; this bound only catches a hung process
        let bound = timeout + Duration::from_secs(10);
        let reply = tokio::time::timeout(bound, read_reply(&mut bridge.stdout, id))
            .await
            .map_err(|_| DriverError::Timeout {
                operation: cmd.to_string(),
                timeout: bound,
            })??;
        reply_value(reply, cmd, timeout)
    }

    async fn selector_call(&self, cmd: &str, selector: &str, extra: Value) -> DriverResult<()> {
        let timeout = self.config.action_timeout;
        let mut args = json!({
            "selector": selector,
            "timeout": timeout.as_millis() as u64,
        });
        if let (Value::Object(map), Value::Object(extra)) = (&mut args, extra) {
            map.extend(extra);
        }
        self.call(cmd, args, timeout).await.map_err(|e| match e {
            DriverError::Browser(msg) if msg.contains("selector not found") => {
                DriverError::SelectorNotFound(selector.to_string())
            }
            other => other,
        })?;
        Ok(())
    }

    fn quick(&self) -> Duration {
        self.config.action_timeout
    }
}

async fn read_reply(stdout: &mut Lines<BufReader<ChildStdout>>, id: u64) -> DriverResult<Value> {
    loop {
        let Some(line) = stdout.next_line().await? else {
            return Err(DriverError::Browser("playwright bridge exited".to_string()));
        };
        let Ok(reply) = serde_json::from_str::<Value>(&line) else {
            tracing::debug!("bridge: {}", line);
            continue;
        };
        if reply.get("id").and_then(Value::as_u64) == Some(id) {
            return Ok(reply);
        }
        tracing::debug!("discarding stale bridge reply: {}", line);
    }
}

fn reply_value(reply: Value, cmd: &str, timeout: Duration) -> DriverResult<Value> {
    if reply.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(reply.get("value").cloned().unwrap_or(Value::Null));
    }
    let message = reply
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown bridge error")
        .to_string();
    Err(match reply.get("kind").and_then(Value::as_str) {
        Some("notFound") => DriverError::Browser(message),
        Some("timeout") => DriverError::Timeout {
            operation: format!("{}: {}", cmd, message),
            timeout,
        },
        Some("navigation") => DriverError::Navigation(message),
        _ => DriverError::Browser(message),
    })
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn navigate(&self, url: &str, policy: WaitPolicy, timeout: Duration) -> DriverResult<()> {
        self.call(
            "navigate",
            json!({
                "url": url,
                "waitUntil": policy.as_str(),
                "timeout": timeout.as_millis() as u64,
            }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        let value = self
            .call("exists", json!({ "selector": selector }), self.quick())
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        self.selector_call("click", selector, json!({})).await
    }

    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()> {
        self.selector_call("fill", selector, json!({ "value": value })).await
    }

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()> {
        self.selector_call("type", selector, json!({ "value": text })).await
    }

    async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()> {
        self.selector_call("select", selector, json!({ "value": value })).await
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> DriverResult<()> {
        self.selector_call("check", selector, json!({ "checked": checked })).await
    }

    async fn hover(&self, selector: &str) -> DriverResult<()> {
        self.selector_call("hover", selector, json!({})).await
    }

    async fn press(&self, selector: &str, key: &str) -> DriverResult<()> {
        self.selector_call("press", selector, json!({ "key": key })).await
    }

    async fn current_url(&self) -> DriverResult<String> {
        let value = self.call("url", json!({}), self.quick()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> DriverResult<String> {
        let value = self.call("title", json!({}), self.quick()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_text(&self) -> DriverResult<String> {
        let value = self.call("text", json!({}), self.quick()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_state(&self) -> DriverResult<PageState> {
        let value = self
            .call(
                "snapshot",
                json!({ "screenshot": self.config.screenshots }),
                self.quick(),
            )
            .await?;
        let screenshot = match value.get("screenshot").and_then(Value::as_str) {
            Some(encoded) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| DriverError::Browser(format!("bad screenshot payload: {}", e)))?,
            ),
            None => None,
        };
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(PageState {
            url: text("url"),
            title: text("title"),
            outline: text("outline"),
            screenshot,
        })
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> DriverResult<SettleOutcome> {
        let value = self
            .call(
                "networkIdle",
                json!({ "timeout": timeout.as_millis() as u64 }),
                timeout,
            )
            .await?;
        Ok(match value.as_str() {
            Some("idle") => SettleOutcome::Idle,
            _ => SettleOutcome::TimedOut,
        })
    }

    async fn evaluate(&self, script: &str) -> DriverResult<Value> {
        self.call("evaluate", json!({ "script": script }), self.quick())
            .await
    }

    async fn start_trace(&self, path: &Path) -> DriverResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.call(
            "traceStart",
            json!({ "path": path.to_string_lossy() }),
            self.quick(),
        )
        .await?;
        Ok(())
    }

    async fn stop_trace(&self) -> DriverResult<Option<PathBuf>> {
        let value = self
            .call("traceStop", json!({}), Duration::from_secs(30))
            .await?;
        Ok(value.as_str().map(PathBuf::from))
    }

    async fn drain_requests(&self) -> DriverResult<Vec<CapturedRequest>> {
        let value = self.call("requests", json!({}), self.quick()).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.call("close", json!({}), self.quick()).await;
        self.closed.store(true, Ordering::SeqCst);

        let mut bridge = self.bridge.lock().await;
        if tokio::time::timeout(Duration::from_secs(5), bridge.child.wait())
            .await
            .is_err()
        {
            tracing::warn!("playwright bridge did not exit, killing it");
            bridge.child.kill().await?;
        }
        result.map(|_| ())
    }
}

/// Launches one [`PlaywrightDriver`] per case
#[derive(Debug, Clone, Default)]
pub struct PlaywrightFactory {
    config: PlaywrightConfig,
}

impl PlaywrightFactory {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserFactory for PlaywrightFactory {
    async fn launch(&self, case_id: &str) -> DriverResult<Arc<dyn BrowserDriver>> {
        tracing::debug!("launching {} for {}", self.config.browser.as_str(), case_id);
        let driver = PlaywrightDriver::launch(self.config.clone()).await?;
        Ok(Arc::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_value_ok() {
        let value = reply_value(json!({"id": 1, "ok": true, "value": "idle"}), "networkIdle", Duration::ZERO);
        assert_eq!(value.unwrap(), json!("idle"));
    }

    #[test]
    fn test_reply_value_error_kinds() {
        let timeout = reply_value(
            json!({"id": 2, "ok": false, "kind": "timeout", "error": "30000ms exceeded"}),
            "navigate",
            Duration::from_secs(30),
        );
        assert!(timeout.unwrap_err().is_timeout());

        let navigation = reply_value(
            json!({"id": 3, "ok": false, "kind": "navigation", "error": "net::ERR_NAME_NOT_RESOLVED"}),
            "navigate",
            Duration::ZERO,
        );
        assert!(matches!(navigation, Err(DriverError::Navigation(_))));
    }

    #[test]
    fn test_bridge_handles_every_command() {
        for cmd in [
            "navigate", "exists", "click", "fill", "type", "select", "check", "hover", "press",
            "url", "title", "text", "snapshot", "networkIdle", "evaluate", "traceStart",
            "traceStop", "requests", "close",
        ] {
            assert!(BRIDGE_SCRIPT.contains(&format!("  {}:", cmd)), "missing handler {}", cmd);
        }
    }
}
