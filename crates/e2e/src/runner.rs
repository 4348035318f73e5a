//! Scenario runner: seeds data, drives the browser, always cleans up

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::breaker::{BreakerRegistry, CircuitState};
use crate::cleanup::CleanupReport;
use crate::client::{ApiClient, ResourceApi};
use crate::config::HarnessConfig;
use crate::context::{with_auto_cleanup, IsolatedContext};
use crate::error::{E2eError, E2eResult};
use crate::playwright::PageController;
use crate::retry::{retry_if, with_graceful_degradation, RetryPolicy};
use crate::scenario::{Bindings, Scenario, SeedEntity, Step};

/// Breaker guarding every browser step
pub const BROWSER_BREAKER: &str = "browser";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub name: String,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    pub cleanup: CleanupReport,
}

impl ScenarioResult {
    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Skipped,
            duration_ms: 0,
            steps: Vec::new(),
            error: None,
            cleanup: CleanupReport::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
    pub breakers: Vec<BreakerSnapshot>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Check the API is reachable and log in when credentials are configured.
///
/// An unreachable API only warns: purely browser-driven scenarios can
/// still run. A rejected login is an error.
pub async fn global_setup(client: &ApiClient, config: &HarnessConfig) -> E2eResult<()> {
    info!("Running global setup against {}", client.api_base());

    let reachable = with_graceful_degradation(
        async { client.get_users().await.map(|users| Some(users.len())) },
        None,
    )
    .await;
    match reachable {
        Some(count) => info!("API is available ({} users)", count),
        None => warn!("API might not be available; data seeding will fail"),
    }

    if let Some(credentials) = &config.credentials {
        client.login(&credentials.username, &credentials.password).await?;
        info!("Logged in as {}", credentials.username);
    }

    Ok(())
}

/// Runs scenarios one at a time, each in its own [`IsolatedContext`]
pub struct ScenarioRunner {
    api: Arc<dyn ResourceApi>,
    page: Arc<dyn PageController>,
    retry: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
    output_dir: PathBuf,
}

impl ScenarioRunner {
    pub fn new(
        api: Arc<dyn ResourceApi>,
        page: Arc<dyn PageController>,
        config: &HarnessConfig,
    ) -> Self {
        Self {
            api,
            page,
            retry: config.retry_policy(),
            breakers: Arc::new(BreakerRegistry::new(config.breaker_config())),
            output_dir: config.output_dir.clone(),
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(scenarios.len());

        info!("Running {} scenario(s)...", scenarios.len());

        for scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            match result.outcome {
                Outcome::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
                Outcome::Failed => error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                Outcome::Skipped => info!("- {} (skipped)", result.name),
            }
            results.push(result);
        }

        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let (passed, failed, skipped) = (
            count(Outcome::Passed),
            count(Outcome::Failed),
            count(Outcome::Skipped),
        );
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        let breakers = self
            .breakers
            .names()
            .into_iter()
            .map(|name| {
                let breaker = self.breakers.get(&name);
                BreakerSnapshot {
                    state: breaker.state(),
                    failure_count: breaker.failure_count(),
                    name,
                }
            })
            .collect();

        SuiteResult {
            total: scenarios.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
            breakers,
        }
    }

    /// Run one scenario. Failures are captured in the result; cleanup runs
    /// whatever happens and never changes the outcome.
    ///
    /// Breakers start closed for every scenario so an earlier failure cannot
    /// reject a later scenario's steps.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        if scenario.skip {
            return ScenarioResult::skipped(&scenario.name);
        }
        self.breakers.reset_all();

        let span = info_span!("scenario", name = %scenario.name);
        async {
            let start = Instant::now();
            let policy = scenario
                .retry
                .as_ref()
                .map(|r| r.policy())
                .unwrap_or(self.retry);

            let ((steps, error), cleanup) =
                with_auto_cleanup(self.api.clone(), self.page.clone(), |ctx| async move {
                    let mut steps = Vec::new();
                    let error = self
                        .execute(&ctx, scenario, &policy, &mut steps)
                        .await
                        .err()
                        .map(|e| e.to_string());
                    (steps, error)
                })
                .await;

            if !cleanup.is_clean() {
                warn!("{} entities could not be cleaned up", cleanup.failures.len());
            }

            ScenarioResult {
                name: scenario.name.clone(),
                outcome: if error.is_none() {
                    Outcome::Passed
                } else {
                    Outcome::Failed
                },
                duration_ms: start.elapsed().as_millis() as u64,
                steps,
                error,
                cleanup,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        ctx: &IsolatedContext,
        scenario: &Scenario,
        policy: &RetryPolicy,
        results: &mut Vec<StepResult>,
    ) -> E2eResult<()> {
        let mut bindings = Bindings::new()?;

        for seed in &scenario.seed {
            let seed = bindings.apply(seed)?;
            let created = seed_entity(ctx, &seed).await?;
            if let Some(alias) = seed.alias() {
                bindings.bind(alias, created);
            }
        }
        debug!("Seeded {} entities", ctx.registry().len());

        for step in &scenario.steps {
            let step = step.interpolate(&bindings)?;
            let (result, outcome) = self.run_step(ctx.page().as_ref(), &step, policy).await;
            results.push(result);

            if let Err(e) = outcome {
                return Err(match e {
                    E2eError::StepFailed { .. } => e,
                    other => E2eError::StepFailed {
                        step: step.name(),
                        reason: other.to_string(),
                    },
                });
            }
        }

        Ok(())
    }

    /// One step through the retry policy and the browser breaker. An open
    /// breaker is not retried.
    async fn run_step(
        &self,
        page: &dyn PageController,
        step: &Step,
        policy: &RetryPolicy,
    ) -> (StepResult, E2eResult<()>) {
        let start = Instant::now();
        let breaker = self.breakers.get(BROWSER_BREAKER);
        let mut attempts = 0;

        let outcome = retry_if(
            policy,
            || {
                attempts += 1;
                breaker.execute(|| page.run_step(step))
            },
            |e: &E2eError| !matches!(e, E2eError::CircuitOpen(_)),
        )
        .await;

        let result = StepResult {
            name: step.name(),
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };
        (result, outcome)
    }

    /// Write results to `test-results.json` in the output directory
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.output_dir, results)
    }
}

pub fn write_results(output_dir: &Path, results: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

async fn seed_entity(ctx: &IsolatedContext, seed: &SeedEntity) -> E2eResult<Value> {
    match seed {
        SeedEntity::User {
            email,
            first_name,
            last_name,
            ..
        } => {
            let mut factory = ctx.users();
            if let Some(email) = email {
                factory = factory.with_email(email);
            }
            if let Some(first_name) = first_name {
                factory = factory.with_first_name(first_name);
            }
            if let Some(last_name) = last_name {
                factory = factory.with_last_name(last_name);
            }
            factory.create().await
        }
        SeedEntity::Status { name, slug, .. } => {
            let mut factory = ctx.statuses();
            if let Some(name) = name {
                factory = factory.with_name(name);
            }
            if let Some(slug) = slug {
                factory = factory.with_slug(slug);
            }
            factory.create().await
        }
        SeedEntity::Label { name, .. } => {
            let mut factory = ctx.labels();
            if let Some(name) = name {
                factory = factory.with_name(name);
            }
            factory.create().await
        }
        SeedEntity::Task {
            title,
            content,
            assignee,
            status,
            labels,
            ..
        } => {
            let mut factory = ctx.tasks();
            if let Some(title) = title {
                factory = factory.with_title(title);
            }
            if let Some(content) = content {
                factory = factory.with_content(content);
            }
            if let Some(email) = assignee {
                factory = factory.with_assignee(email).await?;
            }
            if let Some(slug) = status {
                factory = factory.with_status(slug).await?;
            }
            if !labels.is_empty() {
                factory = factory.with_labels(labels.as_slice()).await?;
            }
            factory.create().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryApi, RecordingPage};
    use taskdeck_common::EntityKind;

    fn config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.retry.max_retries = 3;
        config.retry.delay_ms = 10;
        config.breaker.failure_threshold = 2;
        config
    }

    fn runner(api: &Arc<InMemoryApi>, page: &Arc<RecordingPage>) -> ScenarioRunner {
        ScenarioRunner::new(api.clone(), page.clone(), &config())
    }

    const SEEDED: &str = r#"
name: edit-task
seed:
  - kind: user
    as: owner
    email: owner@example.com
  - kind: status
    slug: todo
  - kind: label
    name: bug
  - kind: task
    as: task
    title: Existing
    assignee: ${owner.email}
    status: todo
    labels: [bug]
steps:
  - action: navigate
    url: /tasks/${task.id}/edit
  - action: fill
    selector: '[name="title"]'
    value: Renamed by ${owner.email}
"#;

    #[tokio::test(start_paused = true)]
    async fn test_seeded_scenario_passes_and_cleans_up() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());

        let scenario = Scenario::from_yaml(SEEDED).unwrap();
        let result = runner(&api, &page).run_scenario(&scenario).await;

        assert_eq!(result.outcome, Outcome::Passed, "{:?}", result.error);
        assert_eq!(result.cleanup.attempted, 4);
        assert!(result.cleanup.is_clean());
        for kind in EntityKind::ALL {
            assert!(api.records(kind).is_empty(), "{} left behind", kind);
        }

        let steps = page.steps();
        assert_eq!(
            steps[0],
            Step::Navigate {
                url: "/tasks/4/edit".into(),
                wait_for_selector: None
            }
        );
        assert!(matches!(&steps[1], Step::Fill { value, .. } if value == "Renamed by owner@example.com"));
        assert_eq!(page.clears(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_step_is_retried() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());
        page.fail_step("click:#save", 1);

        let scenario = Scenario::from_yaml(
            "name: flaky\nsteps:\n  - action: click\n    selector: '#save'\n",
        )
        .unwrap();
        let result = runner(&api, &page).run_scenario(&scenario).await;

        assert_eq!(result.outcome, Outcome::Passed);
        assert_eq!(result.steps[0].attempts, 2);
        assert!(result.steps[0].error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_stops_retries() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());
        page.fail_step("click:#save", u32::MAX);

        let scenario = Scenario::from_yaml(
            "name: broken\nsteps:\n  - action: click\n    selector: '#save'\n  - action: log\n    message: unreachable\n",
        )
        .unwrap();
        let runner = runner(&api, &page);
        let result = runner.run_scenario(&scenario).await;

        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.steps.len(), 1);
        // Two real failures open the breaker; the third attempt is rejected.
        assert_eq!(result.steps[0].attempts, 3);
        assert_eq!(page.steps().len(), 2);
        assert!(result.error.unwrap().contains("Circuit breaker is OPEN"));
        assert_eq!(runner.breakers().get(BROWSER_BREAKER).state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_scenarios_do_not_trip_later_ones() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());
        page.fail_step("click:#broken", u32::MAX);

        let broken = |name: &str| {
            Scenario::from_yaml(&format!(
                "name: {}\nsteps:\n  - action: click\n    selector: '#broken'\n",
                name
            ))
            .unwrap()
        };
        let scenarios = vec![
            broken("a"),
            broken("b"),
            Scenario::from_yaml("name: healthy\nsteps:\n  - action: click\n    selector: '#ok'\n")
                .unwrap(),
        ];
        let suite = runner(&api, &page).run_all(&scenarios).await;

        assert_eq!((suite.passed, suite.failed), (1, 2));
        assert_eq!(suite.results[2].outcome, Outcome::Passed, "{:?}", suite.results[2].error);
        // Each broken scenario reaches the page until its own breaker opens
        let broken_clicks = page
            .steps()
            .iter()
            .filter(|s| matches!(s, Step::Click { selector, .. } if selector == "#broken"))
            .count();
        assert_eq!(broken_clicks, 4);
        assert_eq!(suite.breakers[0].state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_error_is_reported_once() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());
        page.fail_step("click:#broken", u32::MAX);

        let scenario = Scenario::from_yaml(
            "name: once\nretry:\n  max_retries: 1\nsteps:\n  - action: click\n    selector: '#broken'\n",
        )
        .unwrap();
        let result = runner(&api, &page).run_scenario(&scenario).await;

        assert_eq!(
            result.error.as_deref(),
            Some("Step failed: click:#broken - injected failure")
        );
        assert_eq!(
            result.steps[0].error.as_deref(),
            Some("Step failed: click:#broken - injected failure")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_failure_fails_scenario_but_cleans_up() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());

        let scenario = Scenario::from_yaml(
            r#"
name: bad-seed
seed:
  - kind: label
    name: ok
  - kind: task
    status: missing
steps:
  - action: navigate
    url: /
"#,
        )
        .unwrap();
        let result = runner(&api, &page).run_scenario(&scenario).await;

        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.error.unwrap().contains("missing"));
        assert!(page.steps().is_empty());
        assert_eq!(result.cleanup.attempted, 1);
        assert!(api.records(EntityKind::Label).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_does_not_fail_scenario() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());
        // The first created entity gets id 1
        api.fail_delete(EntityKind::Label, 1.into());

        let scenario = Scenario::from_yaml(
            "name: sticky\nseed:\n  - kind: label\nsteps:\n  - action: log\n    message: hi\n",
        )
        .unwrap();
        let result = runner(&api, &page).run_scenario(&scenario).await;

        assert_eq!(result.outcome, Outcome::Passed);
        assert_eq!(result.cleanup.failures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suite_counts_and_results_file() {
        let api = Arc::new(InMemoryApi::new());
        let page = Arc::new(RecordingPage::new());
        page.fail_step("click:#missing", u32::MAX);

        let scenarios = vec![
            Scenario::from_yaml("name: ok\nsteps: []\n").unwrap(),
            Scenario::from_yaml("name: later\nskip: true\nsteps: []\n").unwrap(),
            Scenario::from_yaml(
                "name: bad\nretry:\n  max_retries: 0\nsteps:\n  - action: click\n    selector: '#missing'\n",
            )
            .unwrap(),
        ];
        let runner = runner(&api, &page);
        let suite = runner.run_all(&scenarios).await;

        assert_eq!((suite.total, suite.passed, suite.failed, suite.skipped), (3, 1, 1, 1));
        assert!(!suite.success());
        assert_eq!(suite.results[2].steps[0].attempts, 1);
        assert_eq!(suite.breakers.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = write_results(dir.path(), &suite).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["results"][1]["outcome"], "skipped");
        assert_eq!(written["failed"], 1);
    }
}
