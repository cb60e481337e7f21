//! Engine configuration
//!
//! Loaded once at start-up. Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `za.toml` in the working directory, or the file given with `--config`
//! 3. `ZA_*` environment variables, nested with `__`
//!    (e.g. `ZA_CALLTABLE__GC_INTERVAL=10`)
//!
//! A `.env` file is read into the environment before the sources are merged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Running an interactive loop rather than a script
    pub interactive: bool,
    /// In interactive mode, retry a failed statement as a shell command
    pub shell_fallback: bool,
    /// Return errors to the caller instead of exiting
    pub error_suppression: bool,
    /// Enables ASSERT
    pub test_mode: bool,
    /// Replace `{name}` in string arguments with globals
    pub interpolation: bool,
    /// Regex selecting which TEST groups are reported; empty selects all
    pub test_group_filter: String,
    /// Overrides the ASSERT policy of every TEST section
    pub test_assert_override: Option<AssertPolicy>,
    pub calltable: CallTableConfig,
    pub limits: LimitsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interactive: false,
            shell_fallback: true,
            error_suppression: false,
            test_mode: false,
            interpolation: true,
            test_group_filter: String::new(),
            test_assert_override: None,
            calltable: CallTableConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// What a failed ASSERT inside a TEST section does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertPolicy {
    /// Stop with an assertion error
    #[default]
    Fail,
    /// Count the failure and carry on
    Continue,
}

/// Call table sizing and slot reuse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallTableConfig {
    pub initial_capacity: usize,
    /// Growth ceiling; allocating beyond it is fatal
    pub max_capacity: usize,
    /// Sweep for reusable slots every N allocations
    pub gc_interval: u64,
    /// Reuse delay for slots of finished synchronous calls
    pub call_shyness: u32,
    /// Reuse delay for finished async tasks that have not been awaited
    pub async_shyness: u32,
    /// Reuse delay applied when an await collects a result
    pub await_shyness: u32,
}

impl Default for CallTableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1000,
            max_capacity: 48000,
            gc_interval: 100,
            call_shyness: 0,
            async_shyness: 100,
            await_shyness: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_loop_depth: usize,
    pub max_case_depth: usize,
    /// Maximum statements in one function body
    pub max_function_len: usize,
    /// Deepest allowed chain of nested calls
    pub max_call_depth: usize,
    /// Stack reserved for the main program thread and each async task, in MiB
    pub engine_stack_mb: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_loop_depth: 8,
            max_case_depth: 8,
            max_function_len: 32767,
            max_call_depth: 4000,
            engine_stack_mb: 256,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default search path and environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `path` instead of `za.toml` when given
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::with_name(p).required(true),
            None => config::File::with_name("za").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("ZA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let cfg: EngineConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let ct = &self.calltable;
        if ct.initial_capacity < 2 {
            anyhow::bail!("calltable.initial_capacity must be at least 2");
        }
        if ct.max_capacity < ct.initial_capacity {
            anyhow::bail!("calltable.max_capacity must not be below calltable.initial_capacity");
        }
        if ct.gc_interval == 0 {
            anyhow::bail!("calltable.gc_interval must be positive");
        }
        if self.limits.max_call_depth == 0 {
            anyhow::bail!("limits.max_call_depth must be positive");
        }
        if self.limits.engine_stack_mb == 0 {
            anyhow::bail!("limits.engine_stack_mb must be positive");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}
