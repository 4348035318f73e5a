//! Playwright browser automation
//!
//! Each step is rendered into a small Node script and run with `node`.
//! Cookies and local storage survive between steps through a Playwright
//! storage-state file kept in a per-page session directory, and the page
//! URL is carried over so a step resumes where the previous one stopped.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::retry::with_timeout;
use crate::scenario::{Step, WaitState};

/// Line prefix the generated scripts use to report back
const RESULT_MARKER: &str = "__E2E_RESULT__";

/// What the harness needs from a browser
#[async_trait]
pub trait PageController: Send + Sync {
    /// Execute one step. An `Err` means the step failed.
    async fn run_step(&self, step: &Step) -> E2eResult<()>;

    /// Drop cookies, local storage and the current location
    async fn clear_browser_state(&self) -> E2eResult<()>;

    /// Open `url`, relative to the application root
    async fn navigate(&self, url: &str) -> E2eResult<()> {
        self.run_step(&Step::Navigate {
            url: url.to_string(),
            wait_for_selector: None,
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    /// Budget for a single step script, browser launch included
    pub step_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ScriptReport {
    success: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Playwright-backed [`PageController`]
pub struct PlaywrightPage {
    config: PlaywrightConfig,
    session: TempDir,
    current_url: Mutex<Option<String>>,
    report_line: Regex,
}

impl PlaywrightPage {
    /// Verify Playwright is installed and open a fresh session
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed().await?;
        Self::new(config)
    }

    /// Open a session without probing for Playwright
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        let report_line = Regex::new(&format!(r"(?m)^{}(.*)$", RESULT_MARKER))
            .map_err(|e| E2eError::Playwright(e.to_string()))?;

        Ok(Self {
            config,
            session: tempfile::Builder::new().prefix("taskdeck-e2e-").tempdir()?,
            current_url: Mutex::new(None),
            report_line,
        })
    }

    async fn check_playwright_installed() -> E2eResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    fn storage_state_path(&self) -> PathBuf {
        self.session.path().join("storage-state.json")
    }

    pub fn current_url(&self) -> Option<String> {
        self.current_url.lock().clone()
    }

    /// Render the Node script for one step
    pub fn build_script(&self, step: &Step) -> String {
        let state_path = self.storage_state_path();
        let state_path = js(&state_path.to_string_lossy());
        let resume = match (step, self.current_url()) {
            (Step::Navigate { .. }, _) | (_, None) => String::new(),
            (_, Some(url)) => format!("    await page.goto({});\n", js(&url)),
        };

        format!(
            r#"
const fs = require('fs');
const {{ {browser} }} = require('playwright');
const {{ expect }} = require('@playwright/test');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const statePath = {state_path};
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }},
    storageState: fs.existsSync(statePath) ? statePath : undefined,
  }});
  const page = await context.newPage();
  const baseUrl = {base_url};

  try {{
{resume}    // {name}
{body}
    await context.storageState({{ path: statePath }});
    console.log('{marker}' + JSON.stringify({{ success: true, url: page.url() }}));
  }} catch (error) {{
    console.log('{marker}' + JSON.stringify({{ success: false, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            base_url = js(&self.config.base_url),
            name = step.name().replace('\n', " "),
            body = step_to_js(step),
            marker = RESULT_MARKER,
        )
    }

    async fn run_script(&self, script: &str) -> E2eResult<ScriptReport> {
        let script_path = self.session.path().join("step.js");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running Playwright script: {}", script_path.display());

        let output = Command::new("node")
            .arg(&script_path)
            .current_dir(self.session.path())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = self
            .report_line
            .captures_iter(&stdout)
            .last()
            .and_then(|caps| serde_json::from_str::<ScriptReport>(&caps[1]).ok());

        match report {
            Some(report) => Ok(report),
            None => Err(E2eError::Playwright(format!(
                "Script produced no result (exit {}):\nstdout: {}\nstderr: {}",
                output.status,
                stdout,
                String::from_utf8_lossy(&output.stderr)
            ))),
        }
    }
}

#[async_trait]
impl PageController for PlaywrightPage {
    async fn run_step(&self, step: &Step) -> E2eResult<()> {
        match step {
            Step::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                return Ok(());
            }
            Step::Log { message } => {
                info!("[TEST LOG] {}", message);
                return Ok(());
            }
            _ => {}
        }

        let script = self.build_script(step);
        let report =
            with_timeout(self.config.step_timeout, &step.name(), self.run_script(&script)).await?;

        if !report.success {
            return Err(E2eError::StepFailed {
                step: step.name(),
                reason: report.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        if let Some(url) = report.url {
            *self.current_url.lock() = Some(url);
        }
        Ok(())
    }

    async fn clear_browser_state(&self) -> E2eResult<()> {
        *self.current_url.lock() = None;
        match tokio::fs::remove_file(self.storage_state_path()).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// JavaScript string literal
fn js(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn locator(selector: &str) -> String {
    format!("page.locator({})", js(selector))
}

/// Convert a step to JavaScript statements
fn step_to_js(step: &Step) -> String {
    match step {
        Step::Navigate { url, wait_for_selector } => {
            let mut code = format!("    await page.goto(new URL({}, baseUrl).href);", js(url));
            if let Some(selector) = wait_for_selector {
                code.push_str(&format!("\n    await page.waitForSelector({});", js(selector)));
            }
            code
        }
        Step::Click { selector, timeout_ms } => {
            format!(
                "    await {}.click({{ timeout: {} }});",
                locator(selector),
                timeout_ms.unwrap_or(5000)
            )
        }
        Step::Fill { selector, value } => {
            format!("    await {}.fill({});", locator(selector), js(value))
        }
        Step::Press { selector, key } => match selector {
            Some(selector) => format!("    await {}.press({});", locator(selector), js(key)),
            None => format!("    await page.keyboard.press({});", js(key)),
        },
        Step::Wait { selector, timeout_ms, state } => {
            let state = match state {
                WaitState::Visible => "visible",
                WaitState::Hidden => "hidden",
                WaitState::Attached => "attached",
                WaitState::Detached => "detached",
            };
            format!(
                "    await page.waitForSelector({}, {{ state: '{}', timeout: {} }});",
                js(selector),
                state,
                timeout_ms
            )
        }
        Step::Assert { selector, visible, text, text_contains, count } => {
            let target = locator(selector);
            let mut assertions = Vec::new();

            match visible {
                Some(true) => {
                    assertions.push(format!("    await expect({}).toBeVisible();", target))
                }
                Some(false) => {
                    assertions.push(format!("    await expect({}).toBeHidden();", target))
                }
                None => {}
            }
            if let Some(text) = text {
                assertions.push(format!("    await expect({}).toHaveText({});", target, js(text)));
            }
            if let Some(fragment) = text_contains {
                assertions.push(format!(
                    "    await expect({}).toContainText({});",
                    target,
                    js(fragment)
                ));
            }
            if let Some(count) = count {
                assertions.push(format!("    await expect({}).toHaveCount({});", target, count));
            }
            if assertions.is_empty() {
                assertions.push(format!("    await expect({}.first()).toBeAttached();", target));
            }

            assertions.join("\n")
        }
        Step::Select { selector, value } => {
            format!("    await {}.selectOption({});", locator(selector), js(value))
        }
        Step::Check { selector } => format!("    await {}.check();", locator(selector)),
        Step::Uncheck { selector } => format!("    await {}.uncheck();", locator(selector)),
        Step::Sleep { ms } => format!("    await page.waitForTimeout({});", ms),
        Step::Log { message } => {
            format!("    console.log({});", js(&format!("[TEST] {}", message)))
        }
    }
}
