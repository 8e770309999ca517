//! Command line arguments and how they layer over the configuration file

use clap::Parser;
use jstd_common::{HarnessConfig, Result, TaskMode};
use std::path::PathBuf;

/// jstd-phantom - run JsTestDriver suites in a headless PhantomJS capture
#[derive(Parser, Debug)]
#[command(name = "jstd-phantom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "jstd-phantom.toml", env = "JSTD_PHANTOM_CONFIG")]
    pub config: PathBuf,

    /// Pipeline to run: full, server, browser or run
    #[arg(short, long, default_value = "full")]
    pub mode: TaskMode,

    /// Server port (random in 42240-42339 when unset)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Total attempts per configuration file
    #[arg(long)]
    pub retries: Option<u32>,

    /// Tests to run
    #[arg(long)]
    pub tests: Option<String>,

    /// Directory for runner output and jstd-results.json
    #[arg(long)]
    pub test_output: Option<PathBuf>,

    /// Forward child output and log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not pass --reset to the runner
    #[arg(long)]
    pub no_reset: bool,

    /// Extra runner flag, repeatable
    #[arg(long = "runner-opt", value_name = "NAME=VALUE", value_parser = parse_runner_opt)]
    pub runner_opts: Vec<(String, String)>,

    /// JsTestDriver configuration files to run
    pub files: Vec<PathBuf>,
}

impl Cli {
    /// Load the configuration file and apply the command line over it
    pub fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::load(&self.config)?;
        self.apply(&mut config);
        Ok(config)
    }

    /// Command line values win over file values
    pub fn apply(&self, config: &mut HarnessConfig) {
        let options = &mut config.options;

        if let Some(port) = self.port {
            options.port = Some(port);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            options.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            options.retries = retries;
        }
        if let Some(tests) = &self.tests {
            options.tests = tests.clone();
        }
        if let Some(dir) = &self.test_output {
            options.test_output = Some(dir.clone());
        }
        if self.verbose {
            options.verbose = true;
        }
        if self.no_reset {
            options.reset = false;
        }
        for (name, value) in &self.runner_opts {
            options.runner_flags.insert(name.clone(), value.clone());
        }

        if !self.files.is_empty() {
            config.files = self.files.clone();
        }
    }
}

fn parse_runner_opt(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing flag name in '{}'", s));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("jstd-phantom").chain(args.iter().copied())).unwrap()
    }

    #[test_case("basePath=/srv", ("basePath", "/srv") ; "plain")]
    #[test_case("requiredBrowsers=a=b", ("requiredBrowsers", "a=b") ; "value keeps equals")]
    #[test_case("raiseOnFailure=", ("raiseOnFailure", "") ; "empty value")]
    fn test_parse_runner_opt(input: &str, expected: (&str, &str)) {
        let (name, value) = parse_runner_opt(input).unwrap();
        assert_eq!((name.as_str(), value.as_str()), expected);
    }

    #[test_case("basePath" ; "no equals")]
    #[test_case("=value" ; "no name")]
    fn test_parse_runner_opt_rejects(input: &str) {
        assert!(parse_runner_opt(input).is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.mode, TaskMode::Full);
        assert!(cli.files.is_empty());
        assert!(!cli.no_reset);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jstd-phantom.toml");
        std::fs::write(
            &path,
            "files = [\"from-file.conf\"]\n\n[options]\ntimeout_ms = 5000\nretries = 3\ntests = \"Suite\"\n",
        )
        .unwrap();

        let config_arg = path.to_string_lossy().to_string();
        let cli = parse(&[
            "--config",
            &config_arg,
            "--mode",
            "run",
            "--retries",
            "5",
            "--no-reset",
            "--runner-opt",
            "basePath=/srv",
            "a.conf",
            "b.conf",
        ]);
        let config = cli.load_config().unwrap();

        assert_eq!(cli.mode, TaskMode::Run);
        assert_eq!(config.options.timeout_ms, 5000);
        assert_eq!(config.options.retries, 5);
        assert_eq!(config.options.tests, "Suite");
        assert!(!config.options.reset);
        assert_eq!(config.options.runner_flags.get("basePath").map(String::as_str), Some("/srv"));
        assert_eq!(config.files, vec![PathBuf::from("a.conf"), PathBuf::from("b.conf")]);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml").to_string_lossy().to_string();
        let cli = parse(&["--config", &missing, "x.conf"]);
        let config = cli.load_config().unwrap();

        assert!(config.options.reset);
        assert_eq!(config.files, vec![PathBuf::from("x.conf")]);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = Cli::try_parse_from(["jstd-phantom", "--mode", "headless"]);
        assert!(err.is_err());
    }
}
