//! Declarative YAML scenarios
//!
//! A scenario seeds its own data through the factories, then drives the
//! browser. Strings in steps may reference seeded records as
//! `${alias.field}`, e.g. `${owner.email}`.

use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::config::RetrySettings;
use crate::error::{E2eError, E2eResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Reported as skipped without touching the API or the browser
    #[serde(default)]
    pub skip: bool,

    /// Entities to create before the first step, in order
    #[serde(default)]
    pub seed: Vec<SeedEntity>,

    pub steps: Vec<Step>,

    /// Per-step retry override for this scenario
    #[serde(default)]
    pub retry: Option<RetrySettings>,
}

/// One entity created through the factories before the steps run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedEntity {
    User {
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        first_name: Option<String>,
        #[serde(default)]
        last_name: Option<String>,
    },
    Status {
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        slug: Option<String>,
    },
    Label {
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Task {
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        content: Option<String>,
        /// Assignee email
        #[serde(default)]
        assignee: Option<String>,
        /// Status slug
        #[serde(default)]
        status: Option<String>,
        /// Label names
        #[serde(default)]
        labels: Vec<String>,
    },
}

impl SeedEntity {
    pub fn alias(&self) -> Option<&str> {
        match self {
            SeedEntity::User { alias, .. }
            | SeedEntity::Status { alias, .. }
            | SeedEntity::Label { alias, .. }
            | SeedEntity::Task { alias, .. } => alias.as_deref(),
        }
    }
}

/// A single browser step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to base)
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Fill {
        selector: String,
        value: String,
    },

    /// Press a key, on an element or the page
    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        count: Option<usize>,
    },

    /// Select an option from a dropdown
    Select {
        selector: String,
        value: String,
    },

    Check {
        selector: String,
    },

    Uncheck {
        selector: String,
    },

    /// Fixed pause (use sparingly)
    Sleep {
        ms: u64,
    },

    Log {
        message: String,
    },
}

fn default_wait_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl Step {
    /// Short label used in logs and results
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::Click { selector, .. } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Press { key, .. } => format!("press:{}", key),
            Step::Wait { selector, .. } => format!("wait:{}", selector),
            Step::Assert { selector, .. } => format!("assert:{}", selector),
            Step::Select { selector, .. } => format!("select:{}", selector),
            Step::Check { selector } => format!("check:{}", selector),
            Step::Uncheck { selector } => format!("uncheck:{}", selector),
            Step::Sleep { ms } => format!("sleep:{}ms", ms),
            Step::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }

    /// Replace `${alias.field}` references with values from `bindings`
    pub fn interpolate(&self, bindings: &Bindings) -> E2eResult<Step> {
        bindings.apply(self)
    }
}

/// Seeded records by alias
#[derive(Debug)]
pub struct Bindings {
    records: HashMap<String, Value>,
    reference: Regex,
}

impl Bindings {
    pub fn new() -> E2eResult<Self> {
        let reference = Regex::new(r"\$\{([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)\}")
            .map_err(|e| E2eError::ScenarioParse(e.to_string()))?;
        Ok(Self {
            records: HashMap::new(),
            reference,
        })
    }

    pub fn bind(&mut self, alias: impl Into<String>, record: Value) {
        self.records.insert(alias.into(), record);
    }

    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.records.get(alias)
    }

    /// Copy of `item` with every string field interpolated
    pub fn apply<T: Serialize + DeserializeOwned>(&self, item: &T) -> E2eResult<T> {
        let mut value = serde_json::to_value(item)?;
        self.substitute(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }

    fn resolve(&self, alias: &str, field: &str) -> E2eResult<String> {
        let value = self
            .records
            .get(alias)
            .and_then(|record| record.get(field))
            .ok_or_else(|| {
                E2eError::ScenarioParse(format!("Unresolved reference ${{{}.{}}}", alias, field))
            })?;

        Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn substitute(&self, value: &mut Value) -> E2eResult<()> {
        match value {
            Value::String(s) if s.contains("${") => {
                let mut failure = None;
                let replaced = self.reference.replace_all(s, |caps: &Captures| {
                    self.resolve(&caps[1], &caps[2]).unwrap_or_else(|e| {
                        failure.get_or_insert(e);
                        String::new()
                    })
                });
                if let Some(e) = failure {
                    return Err(e);
                }
                *s = replaced.into_owned();
                Ok(())
            }
            Value::Array(items) => items.iter_mut().try_for_each(|item| self.substitute(item)),
            Value::Object(map) => map.values_mut().try_for_each(|item| self.substitute(item)),
            _ => Ok(()),
        }
    }
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load every `.yaml`/`.yml` under `dir`, sorted by path. A missing or
    /// unreadable directory is an error, not an empty suite.
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::Config(format!(
                "scenario directory {} does not exist",
                dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry.map_err(|e| {
                E2eError::Config(format!("reading scenarios in {}: {}", dir.display(), e))
            })?;
            let is_yaml = entry
                .path()
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if is_yaml {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
