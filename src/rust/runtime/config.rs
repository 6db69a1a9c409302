// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    assert::AssertAction,
    fail::Fail,
    interval::TimeInterval,
    limits,
};
use ::std::{
    fs,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    // Stack budget given to threads created without an explicit size.
    pub const DEFAULT_STACK_SIZE: &str = "default_stack_size";
    // Smallest stack budget a thread may ask for.
    pub const MIN_STACK_SIZE: &str = "min_stack_size";
    // Dynamic priority countdown per base priority, Lowest first.
    pub const PRIORITY_AGING: &str = "priority_aging";
    // Laps over the run list before blocking in the idle wait.
    pub const IDLE_PASSES: &str = "idle_passes";
    // Idle sleep when nothing could wake the scheduler.
    pub const IDLE_FALLBACK_MS: &str = "idle_fallback_ms";
    // Exit the OS process once process termination has been requested and finalized.
    pub const EXIT_ON_TERMINATE: &str = "exit_on_terminate";
    // Action applied on a failed scheduler assertion.
    pub const ASSERT_ACTION: &str = "assert_action";
}

/// Prefix of environment variables that override configuration file options.
const ENV_PREFIX: &str = "SCHED_";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduler configuration file.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Typed scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub default_stack_size: usize,
    pub min_stack_size: usize,
    pub priority_aging: [i32; limits::NUM_PRIORITIES],
    pub idle_passes: usize,
    pub idle_fallback: TimeInterval,
    pub exit_on_terminate: bool,
    pub assert_action: AssertAction,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let config_s: String = match fs::read_to_string(config_path) {
            Ok(s) => s,
            Err(e) => {
                let cause: String = format!("cannot read configuration file (path={:?}): {}", config_path, e);
                error!("new(): {}", cause);
                return Err(Fail::new(e.raw_os_error().unwrap_or(libc::EIO), &cause));
            },
        };
        Self::from_str(&config_s)
    }

    fn get_scheduler_config(&self) -> Result<Option<&Yaml>, Fail> {
        match self.0.index(scheduler_config::SECTION_NAME) {
            Yaml::BadValue => Ok(None),
            section => match section {
                Yaml::Hash(_) => Ok(Some(section)),
                _ => {
                    let cause: String = format!("parameter \"{}\" has unexpected type", scheduler_config::SECTION_NAME);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
        }
    }

    /// Reads the default stack size from the environment first and then the configuration file.
    pub fn default_stack_size(&self) -> Result<Option<usize>, Fail> {
        self.get_int_option(scheduler_config::DEFAULT_STACK_SIZE)
    }

    /// Reads the minimum stack size from the environment first and then the configuration file.
    pub fn min_stack_size(&self) -> Result<Option<usize>, Fail> {
        self.get_int_option(scheduler_config::MIN_STACK_SIZE)
    }

    /// Reads the priority aging table. This cannot be passed in as an environment variable.
    pub fn priority_aging(&self) -> Result<Option<[i32; limits::NUM_PRIORITIES]>, Fail> {
        let Some(section) = self.get_scheduler_config()? else {
            return Ok(None);
        };
        let entries: &Vec<Yaml> = match section.index(scheduler_config::PRIORITY_AGING) {
            Yaml::BadValue => return Ok(None),
            Yaml::Array(entries) => entries,
            _ => {
                let cause: String = format!("parameter {} has unexpected type", scheduler_config::PRIORITY_AGING);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        if entries.len() != limits::NUM_PRIORITIES {
            let cause: String = format!(
                "parameter {} must have {} entries (found {})",
                scheduler_config::PRIORITY_AGING,
                limits::NUM_PRIORITIES,
                entries.len()
            );
            error!("priority_aging(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let mut table: [i32; limits::NUM_PRIORITIES] = [0; limits::NUM_PRIORITIES];
        for (slot, entry) in table.iter_mut().zip(entries.iter()) {
            *slot = match entry.as_i64().map(i32::try_from) {
                Some(Ok(value)) => value,
                _ => {
                    let cause: String = format!("parameter \"{}\" is out of range", scheduler_config::PRIORITY_AGING);
                    return Err(Fail::new(libc::ERANGE, &cause));
                },
            };
        }
        Ok(Some(table))
    }

    pub fn idle_passes(&self) -> Result<Option<usize>, Fail> {
        self.get_int_option(scheduler_config::IDLE_PASSES)
    }

    pub fn idle_fallback(&self) -> Result<Option<TimeInterval>, Fail> {
        Ok(self
            .get_int_option::<i64>(scheduler_config::IDLE_FALLBACK_MS)?
            .map(TimeInterval::from_millis))
    }

    pub fn exit_on_terminate(&self) -> Result<Option<bool>, Fail> {
        if let Some(value) = Self::get_typed_env_option(scheduler_config::EXIT_ON_TERMINATE)? {
            return Ok(Some(value));
        }
        self.get_typed_option(scheduler_config::EXIT_ON_TERMINATE, &Yaml::as_bool)
    }

    pub fn assert_action(&self) -> Result<Option<AssertAction>, Fail> {
        if let Some(value) = Self::get_typed_env_option(scheduler_config::ASSERT_ACTION)? {
            return Ok(Some(value));
        }
        match self.get_typed_option(scheduler_config::ASSERT_ACTION, &Yaml::as_str)? {
            Some(value) => Ok(Some(AssertAction::from_str(value)?)),
            None => Ok(None),
        }
    }

    /// Index the scheduler section to find the value at `index`. A missing section or option is not an error.
    fn get_typed_option<'a, T, Fn>(&'a self, index: &str, receiver: Fn) -> Result<Option<T>, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let Some(section) = self.get_scheduler_config()? else {
            return Ok(None);
        };
        match section.index(index) {
            Yaml::BadValue => Ok(None),
            option => match receiver(option) {
                Some(value) => Ok(Some(value)),
                None => {
                    let cause: String = format!("parameter {} has unexpected type", index);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        let name: String = format!("{}{}", ENV_PREFIX, index.to_uppercase());
        if let Ok(var) = ::std::env::var(&name) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let cause: String = format!("parameter {} has unexpected type", name);
                return Err(Fail::new(libc::EINVAL, &cause));
            }
        }
        Ok(None)
    }

    /// Reads an integer option from the environment first and then the configuration file, verifying that the
    /// destination type may hold the value.
    fn get_int_option<T: TryFrom<i64> + FromStr>(&self, index: &str) -> Result<Option<T>, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(Some(value));
        }
        match self.get_typed_option(index, &Yaml::as_i64)? {
            Some(val) => match T::try_from(val) {
                Ok(val) => Ok(Some(val)),
                _ => {
                    let cause: String = format!("parameter \"{}\" is out of range", index);
                    Err(Fail::new(libc::ERANGE, &cause))
                },
            },
            None => Ok(None),
        }
    }
}

impl SchedulerConfig {
    /// Builds scheduler settings from a configuration file. Options that are absent keep their default value.
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        let defaults: SchedulerConfig = SchedulerConfig::default();
        let settings: SchedulerConfig = SchedulerConfig {
            default_stack_size: config.default_stack_size()?.unwrap_or(defaults.default_stack_size),
            min_stack_size: config.min_stack_size()?.unwrap_or(defaults.min_stack_size),
            priority_aging: config.priority_aging()?.unwrap_or(defaults.priority_aging),
            idle_passes: config.idle_passes()?.unwrap_or(defaults.idle_passes),
            idle_fallback: config.idle_fallback()?.unwrap_or(defaults.idle_fallback),
            exit_on_terminate: config.exit_on_terminate()?.unwrap_or(defaults.exit_on_terminate),
            assert_action: config.assert_action()?.unwrap_or(defaults.assert_action),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks cross-option constraints.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.default_stack_size < self.min_stack_size {
            let cause: String = format!(
                "default stack size is below the minimum (default={:?}, min={:?})",
                self.default_stack_size, self.min_stack_size
            );
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if self.priority_aging[limits::NUM_PRIORITIES - 1] != 0 {
            let cause: String = format!("highest priority must not age (aging={:?})", self.priority_aging);
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Config {
    type Err = Fail;

    /// Parses a configuration from YAML text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                error!("from_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &config[..] {
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_stack_size: limits::DEFAULT_STACK_SIZE,
            min_stack_size: limits::MIN_STACK_SIZE,
            priority_aging: limits::DEFAULT_PRIORITY_AGING,
            idle_passes: limits::DEFAULT_IDLE_PASSES,
            idle_fallback: TimeInterval::from_millis(limits::DEFAULT_IDLE_FALLBACK_MS),
            exit_on_terminate: true,
            assert_action: AssertAction::Ignore,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
