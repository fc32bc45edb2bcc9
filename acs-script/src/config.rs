use std::str::FromStr;

use acs_nls::{Encoding, LanguageId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INSTRUCTION_LIMIT: u32 = 500_000;
pub const DEFAULT_STACK_CAPACITY: usize = 4096;
pub const DEFAULT_SCRIPT_LOCALS: usize = 20;

/// Which side of a networked session this VM runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetRole {
    /// Runs scripts and broadcasts their side effects.
    #[default]
    Authoritative,
    /// Never runs scripts; only applies replicated side effects.
    Replica,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Instructions one instance may execute in a single dispatch before it is killed.
    pub instruction_limit: u32,
    /// Slots in the shared operand stack.
    pub stack_capacity: usize,
    /// Minimum number of script-level locals given to every instance.
    pub script_locals: usize,
    /// Preferred string table language.
    pub locale: LanguageId,
    /// Byte encoding of string literals in loaded modules.
    pub encoding: Encoding,
    pub role: NetRole,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            stack_capacity: DEFAULT_STACK_CAPACITY,
            script_locals: DEFAULT_SCRIPT_LOCALS,
            locale: LanguageId::ENGLISH,
            encoding: Encoding::default(),
            role: NetRole::default(),
        }
    }
}

impl VmConfig {
    pub fn builder() -> VmConfigBuilder {
        VmConfigBuilder::default()
    }

    /// Defaults overridden by `ACS_VM_INSTRUCTION_LIMIT`, `ACS_VM_STACK_CAPACITY` and
    /// `ACS_VM_LOCALE`. Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut builder = VmConfigBuilder::default();
        if let Some(v) = env_value::<u32>("ACS_VM_INSTRUCTION_LIMIT") {
            builder = builder.with_instruction_limit(v);
        }
        if let Some(v) = env_value::<usize>("ACS_VM_STACK_CAPACITY") {
            builder = builder.with_stack_capacity(v);
        }
        if let Some(v) = env_value::<LanguageId>("ACS_VM_LOCALE") {
            builder = builder.with_locale(v);
        }
        builder.get()
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl VmConfigBuilder {
    pub fn new(config: VmConfig) -> Self {
        Self { config }
    }

    pub fn with_instruction_limit(mut self, limit: u32) -> Self {
        self.config.instruction_limit = limit.max(1);
        self
    }

    pub fn with_stack_capacity(mut self, slots: usize) -> Self {
        self.config.stack_capacity = slots.max(16);
        self
    }

    pub fn with_script_locals(mut self, count: usize) -> Self {
        self.config.script_locals = count;
        self
    }

    pub fn with_locale(mut self, locale: LanguageId) -> Self {
        self.config.locale = locale;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    pub fn with_role(mut self, role: NetRole) -> Self {
        self.config.role = role;
        self
    }

    pub fn get(self) -> VmConfig {
        self.config
    }
}
