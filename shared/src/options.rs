use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityLevel {
    /// fsync the journal write-ahead path before acknowledging a commit.
    Strong,
    /// Acknowledge as soon as the write has been handed to the OS.
    Weak,
}

/// The charset chosen as the final fallback of the encoding-detection precedence
/// (spec step 5) when nothing else matched. windows-1251 is the default, tuned for
/// Cyrillic-biased corpora; an embedder targeting a different locale can override it.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackCharset {
    Windows1251,
    Latin1,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Options {
    /// Root directory under which every task's journal database lives, e.g. `<home>/.nts`.
    pub state_root: PathBuf,
    pub durability_level: DurabilityLevel,
    pub fallback_charset: FallbackCharset,

    /// Safe File I/O retry policy (spec §4.1): five attempts, doubling backoff from this base.
    pub io_retry_attempts: usize,
    pub io_retry_base_delay_ms: u64,

    /// Bytes scanned from the head of a file when checking for NUL bytes (binary rejection).
    pub binary_sniff_window_bytes: usize,

    /// Charset-detector confidence thresholds used by the encoding precedence (spec step 2/4).
    pub charset_high_confidence_percent: u8,
    pub charset_low_confidence_percent: u8,

    pub use_debug_logging: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            state_root: default_state_root(),
            durability_level: DurabilityLevel::Strong,
            fallback_charset: FallbackCharset::Windows1251,
            io_retry_attempts: 5,
            io_retry_base_delay_ms: 50,
            binary_sniff_window_bytes: 8192,
            charset_high_confidence_percent: 50,
            charset_low_confidence_percent: 10,
            use_debug_logging: false,
        }
    }
}

fn default_state_root() -> PathBuf {
    dirs_home().join(".nts")
}

/// Minimal stand-in for a `dirs`-style home lookup: `HOME` on unix, `USERPROFILE` on windows,
/// falling back to the current directory if neither is set.
fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn start_options_builder() -> OptionsBuilder {
    OptionsBuilder { options: Options::default() }
}

pub fn start_options_builder_from(options: &Options) -> OptionsBuilder {
    OptionsBuilder { options: options.clone() }
}

pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn state_root(&mut self, path: impl Into<PathBuf>) -> &mut OptionsBuilder {
        self.options.state_root = path.into();
        self
    }

    pub fn durability_level(&mut self, level: DurabilityLevel) -> &mut OptionsBuilder {
        self.options.durability_level = level;
        self
    }

    pub fn fallback_charset(&mut self, charset: FallbackCharset) -> &mut OptionsBuilder {
        self.options.fallback_charset = charset;
        self
    }

    pub fn io_retry_attempts(&mut self, value: usize) -> &mut OptionsBuilder {
        self.options.io_retry_attempts = value;
        self
    }

    pub fn io_retry_base_delay_ms(&mut self, value: u64) -> &mut OptionsBuilder {
        self.options.io_retry_base_delay_ms = value;
        self
    }

    pub fn binary_sniff_window_bytes(&mut self, value: usize) -> &mut OptionsBuilder {
        self.options.binary_sniff_window_bytes = value;
        self
    }

    pub fn use_debug_logging(&mut self, value: bool) -> &mut OptionsBuilder {
        self.options.use_debug_logging = value;
        self
    }

    pub fn build(&self) -> Options {
        self.options.clone()
    }

    pub fn build_arc(&self) -> Arc<Options> {
        Arc::new(self.options.clone())
    }
}
