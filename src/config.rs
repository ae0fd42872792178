//! Fault-campaign configuration for hosts.
//!
//! The library core never reads the environment; hosts that want to drive
//! injection campaigns from outside (e.g. an inference pipeline deciding
//! per-operator whether to inject) load a [`CampaignConfig`] here.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`SASIM_FI_MODE`, ...)
//! 2. Project-local config file (`./sasim.toml`)
//! 3. User config file (`~/.config/sasim/config.toml`)
//! 4. Built-in defaults (no fault armed)
//!
//! # Config File Format
//!
//! ```toml
//! # sasim.toml
//! fi_mode = "transient"
//! fi_place = "everywhere"
//! fi_bits = "mantissa"
//! fi_corruption = "flip"
//!
//! # Inject into every N-th dispatched operator.
//! fi_op_count = 100
//!
//! # Seed for the simulator RNG (omit for entropy seeding).
//! seed = 7
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::device::port::SystolicPort;
use crate::fault::{CsimPlace, FaultCsim, FiBits, FiCorruption, FiMode};
use crate::sim::SystolicArraySim;

/// Global cached configuration.
static CONFIG: OnceLock<CampaignConfig> = OnceLock::new();

/// Fault-campaign configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CampaignConfig {
    /// Fault mode to arm; absent or `none` arms nothing.
    pub fi_mode: Option<FiMode>,

    /// Target site; defaults to `everywhere` when a fault is armed.
    pub fi_place: Option<CsimPlace>,

    /// Bit range; defaults to `everywhere` when a fault is armed.
    pub fi_bits: Option<FiBits>,

    /// Corruption type; defaults to `flip` when a fault is armed.
    pub fi_corruption: Option<FiCorruption>,

    /// Inject into every N-th dispatched operator (host-interpreted).
    pub fi_op_count: Option<u64>,

    /// Seed for the simulator RNG; absent means entropy seeding.
    pub seed: Option<u64>,
}

impl CampaignConfig {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `sasim.toml`
    /// 3. User config `~/.config/sasim/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static CampaignConfig {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded campaign configuration: {:?}", config);
            config
        })
    }

    /// Whether a fault is armed at all.
    pub fn fault_armed(&self) -> bool {
        matches!(self.fi_mode, Some(mode) if mode != FiMode::None)
    }

    /// Arm the configured C-model fault on a simulator. Returns the
    /// concrete fault chosen, or `None` if no fault is configured.
    ///
    /// Dispatch jobs first: a transient fault draws its firing point from
    /// the queued work.
    pub fn arm_csim<P: SystolicPort>(
        &self,
        sim: &mut SystolicArraySim<P>,
    ) -> crate::Result<Option<FaultCsim>> {
        if !self.fault_armed() {
            return Ok(None);
        }
        let mode = self.fi_mode.unwrap_or(FiMode::None);
        let place = self.fi_place.unwrap_or(CsimPlace::Everywhere);
        let bits = self.fi_bits.unwrap_or(FiBits::Everywhere);
        let corruption = self.fi_corruption.unwrap_or(FiCorruption::Flip);
        sim.fi_set_csim(place, bits, corruption, mode).map(Some)
    }

    /// Load user configuration from `~/.config/sasim/config.toml`.
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("sasim").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from `./sasim.toml`.
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("sasim.toml"))
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are `Some` in the other config.
    fn merge(&mut self, other: Self) {
        if other.fi_mode.is_some() {
            self.fi_mode = other.fi_mode;
        }
        if other.fi_place.is_some() {
            self.fi_place = other.fi_place;
        }
        if other.fi_bits.is_some() {
            self.fi_bits = other.fi_bits;
        }
        if other.fi_corruption.is_some() {
            self.fi_corruption = other.fi_corruption;
        }
        if other.fi_op_count.is_some() {
            self.fi_op_count = other.fi_op_count;
        }
        if other.seed.is_some() {
            self.seed = other.seed;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.fi_mode = env_parse("SASIM_FI_MODE").or(self.fi_mode);
        self.fi_place = env_parse("SASIM_FI_PLACE").or(self.fi_place);
        self.fi_bits = env_parse("SASIM_FI_BITS").or(self.fi_bits);
        self.fi_corruption = env_parse("SASIM_FI_CORRUPTION").or(self.fi_corruption);
        self.fi_op_count = env_parse("SASIM_FI_OP_COUNT").or(self.fi_op_count);
        self.seed = env_parse("SASIM_SEED").or(self.seed);
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sasim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# sasim fault-campaign configuration
# Place this file at ~/.config/sasim/config.toml or ./sasim.toml

# Fault mode: "none", "transient" or "permanent"
fi_mode = "transient"

# Target site: "everywhere", "inputs", "multipliers", "acc-adders", "column-adders"
fi_place = "everywhere"

# Bit range: "everywhere" or "mantissa"
fi_bits = "everywhere"

# Corruption: "flip", "stuck-high", "stuck-low"
fi_corruption = "flip"

# Inject into every N-th dispatched operator
# fi_op_count = 100

# RNG seed (omit for entropy seeding)
# seed = 7
"#
        .to_string()
    }
}

/// Parse an environment variable, warning on malformed values.
fn env_parse<T: FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => {
            log::info!("Using {name} from environment: {raw}");
            Some(value)
        }
        Err(e) => {
            log::warn!("Ignoring {name}={raw}: {e}");
            None
        }
    }
}
