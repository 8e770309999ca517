//! Task configuration
//!
//! Options are statically declared here. Runner flags are produced from an
//! explicit mapping table, never by inspecting arbitrary option names.

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Ports picked when no explicit port is configured
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 42240..=42339;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default number of attempts per configuration file, the first included
pub const DEFAULT_RETRIES: u32 = 2;

pub const MAX_RETRIES: u32 = 10;

/// Browser argument replaced with the path of the bundled PhantomJS bridge
pub const BRIDGE_PLACEHOLDER: &str = "{bridge}";

/// Option names owned by the orchestrator. Always stripped from runner flags.
pub const INTERNAL_FLAGS: &[&str] = &[
    "browser",
    "config",
    "dryRunFor",
    "port",
    "server",
    "serverHandlerPrefix",
    "canFail",
];

/// Runner flags that may be passed through `runner_flags` without a typed option
pub const PASSTHROUGH_FLAGS: &[&str] = &[
    "basePath",
    "browserTimeout",
    "raiseOnFailure",
    "requiredBrowsers",
];

/// Mapping from a typed option to the runner flag it is forwarded as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagMapping {
    pub option: &'static str,
    pub flag: &'static str,
}

/// Typed options forwarded to the runner, in forwarding order
pub const FORWARDED_FLAGS: &[FlagMapping] = &[
    FlagMapping { option: "tests", flag: "tests" },
    FlagMapping { option: "verbose", flag: "verbose" },
    FlagMapping { option: "capture_console", flag: "captureConsole" },
    FlagMapping { option: "preload_files", flag: "preloadFiles" },
    FlagMapping { option: "plugins", flag: "plugins" },
    FlagMapping { option: "runner_mode", flag: "runnerMode" },
    FlagMapping { option: "test_output", flag: "testOutput" },
];

/// Whether `name` may be forwarded to the runner
pub fn is_allowed_runner_flag(name: &str) -> bool {
    !INTERNAL_FLAGS.contains(&name)
        && (PASSTHROUGH_FLAGS.contains(&name) || FORWARDED_FLAGS.iter().any(|m| m.flag == name))
}

/// A program plus leading arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Leading arguments followed by `extra`
    pub fn args_with(&self, extra: impl IntoIterator<Item = String>) -> Vec<String> {
        self.args.iter().cloned().chain(extra).collect()
    }
}

fn default_server_command() -> CommandSpec {
    CommandSpec::new("java", &["-jar", "lib/JsTestDriver.jar"])
}

fn default_browser_command() -> CommandSpec {
    CommandSpec::new("phantomjs", &[BRIDGE_PLACEHOLDER])
}

fn default_runner_command() -> CommandSpec {
    CommandSpec::new("java", &["-jar", "lib/JsTestDriver.jar"])
}

/// Options for one task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Test selector passed as `--tests`
    pub tests: String,

    /// Verbose output, also forwarded to the runner
    pub verbose: bool,

    pub capture_console: bool,

    pub preload_files: Vec<String>,

    pub plugins: Vec<String>,

    pub runner_mode: Option<String>,

    /// Output directory for runner results
    pub test_output: Option<PathBuf>,

    /// Pass `--reset` to the runner
    pub reset: bool,

    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,

    /// Total attempts per configuration file, the first included
    pub retries: u32,

    /// Server port (None = random in DEFAULT_PORT_RANGE)
    pub port: Option<u16>,

    /// Extra runner flags by name, filtered through the allow-list
    pub runner_flags: BTreeMap<String, String>,

    pub server: CommandSpec,

    pub browser: CommandSpec,

    pub runner: CommandSpec,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            tests: "all".to_string(),
            verbose: false,
            capture_console: false,
            preload_files: Vec::new(),
            plugins: Vec::new(),
            runner_mode: None,
            test_output: None,
            reset: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            port: None,
            runner_flags: BTreeMap::new(),
            server: default_server_command(),
            browser: default_browser_command(),
            runner: default_runner_command(),
        }
    }
}

impl TaskOptions {
    /// Validate the options and strip runner flags that must not be forwarded
    pub fn validate(mut self) -> Result<Self> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be greater than 0".into()));
        }
        if !(1..=MAX_RETRIES).contains(&self.retries) {
            return Err(Error::InvalidConfig(format!(
                "retries must be between 1 and {}, got {}",
                MAX_RETRIES, self.retries
            )));
        }
        if self.port == Some(0) {
            return Err(Error::InvalidConfig("port must be non-zero".into()));
        }
        for (name, cmd) in [
            ("server", &self.server),
            ("browser", &self.browser),
            ("runner", &self.runner),
        ] {
            if cmd.program.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{} program is empty", name)));
            }
        }

        self.runner_flags.retain(|name, _| {
            let allowed = is_allowed_runner_flag(name);
            if !allowed {
                warn!(flag = %name, "'{}' is not a valid runner option and will not be forwarded", name);
            }
            allowed
        });

        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The configured port, or a random one from the default range
    pub fn resolve_port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| rand::thread_rng().gen_range(DEFAULT_PORT_RANGE))
    }

    fn typed_flag_value(&self, option: &str) -> Option<Option<String>> {
        // Some(None) = bare flag, Some(Some(v)) = flag with value, None = not set
        match option {
            "tests" => Some(Some(self.tests.clone())).filter(|_| !self.tests.is_empty()),
            "verbose" => self.verbose.then_some(None),
            "capture_console" => self.capture_console.then_some(None),
            "preload_files" => {
                (!self.preload_files.is_empty()).then(|| Some(self.preload_files.join(",")))
            }
            "plugins" => (!self.plugins.is_empty()).then(|| Some(self.plugins.join(","))),
            "runner_mode" => self.runner_mode.clone().map(Some),
            "test_output" => self
                .test_output
                .as_ref()
                .map(|p| Some(p.to_string_lossy().to_string())),
            _ => None,
        }
    }

    /// Flags forwarded to the runner, typed options first, then extra flags.
    ///
    /// An extra flag with the same name as a typed one replaces its value.
    pub fn runner_args(&self) -> Vec<String> {
        let mut flags: Vec<(String, Option<String>)> = FORWARDED_FLAGS
            .iter()
            .filter_map(|m| {
                self.typed_flag_value(m.option)
                    .map(|value| (m.flag.to_string(), value))
            })
            .collect();

        for (name, value) in &self.runner_flags {
            if !is_allowed_runner_flag(name) {
                debug!(flag = %name, "skipping runner flag outside the allow-list");
                continue;
            }
            match flags.iter_mut().find(|(flag, _)| flag == name) {
                Some(existing) => existing.1 = Some(value.clone()),
                None => flags.push((name.clone(), Some(value.clone()))),
            }
        }

        flags
            .into_iter()
            .flat_map(|(flag, value)| std::iter::once(format!("--{}", flag)).chain(value))
            .collect()
    }
}

/// On-disk configuration: task options plus the configuration files to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub options: TaskOptions,

    #[serde(deserialize_with = "one_or_many")]
    pub files: Vec<PathBuf>,
}

impl HarnessConfig {
    /// Load configuration from file, defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Accept `files = "a.conf"` as well as `files = ["a.conf", "b.conf"]`
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}
