use std::path::PathBuf;

use serde::Deserialize;

/// Which campaigns to run.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TargetSelector {
    Http,
    Session,
    #[default]
    Both,
}

impl TargetSelector {
    pub fn includes_http(&self) -> bool {
        matches!(self, TargetSelector::Http | TargetSelector::Both)
    }

    pub fn includes_session(&self) -> bool {
        matches!(self, TargetSelector::Session | TargetSelector::Both)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    #[serde(default)]
    pub target: TargetSelector,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Per-campaign RNG seed; a fixed value reproduces a campaign exactly.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

pub fn default_iterations() -> u64 {
    100
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            target: TargetSelector::default(),
            iterations: default_iterations(),
            output_dir: default_output_dir(),
            rng_seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    #[serde(default = "default_http_url")]
    pub url: String,
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_http_energy")]
    pub energy: u32,
    #[serde(default = "default_http_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_http_url() -> String {
    "http://127.0.0.1:8000/datatb/product/add/".to_string()
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_http_energy() -> u32 {
    10
}

fn default_http_pacing_ms() -> u64 {
    200
}

fn default_sample_rate() -> f64 {
    0.1
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            url: default_http_url(),
            seed_path: None,
            timeout_ms: default_http_timeout_ms(),
            energy: default_http_energy(),
            pacing_ms: default_http_pacing_ms(),
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_energy_base")]
    pub energy_base: u32,
    #[serde(default = "default_bonus_cap")]
    pub bonus_cap: u32,
    #[serde(default = "default_jitter")]
    pub jitter: u32,
    #[serde(default)]
    pub pacing_ms: u64,
}

fn default_device() -> String {
    "Smart Lock [Group 2]".to_string()
}

fn default_backoff_ms() -> u64 {
    1500
}

fn default_energy_base() -> u32 {
    5
}

fn default_bonus_cap() -> u32 {
    7
}

fn default_jitter() -> u32 {
    3
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            device: default_device(),
            seed_path: None,
            backoff_ms: default_backoff_ms(),
            energy_base: default_energy_base(),
            bonus_cap: default_bonus_cap(),
            jitter: default_jitter(),
            pacing_ms: 0,
        }
    }
}

/// Coverage collection is an external collaborator's concern: the toggle is
/// forwarded, it changes nothing in the core pipeline.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverageSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_coverage_source")]
    pub source: Vec<PathBuf>,
}

fn default_coverage_source() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            source: default_coverage_source(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LatchkeyConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub coverage: CoverageSettings,
}

impl LatchkeyConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: LatchkeyConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: LatchkeyConfig = toml::from_str("").unwrap();
        assert_eq!(config.campaign.target, TargetSelector::Both);
        assert_eq!(config.campaign.iterations, 100);
        assert_eq!(config.http.energy, 10);
        assert_eq!(config.session.energy_base, 5);
        assert_eq!(config.session.bonus_cap, 7);
        assert_eq!(config.session.backoff_ms, 1500);
        assert!(!config.coverage.enabled);
    }

    #[test]
    fn kebab_case_sections_parse() {
        let config: LatchkeyConfig = toml::from_str(
            r#"
            [campaign]
            target = "session"
            iterations = 20
            rng-seed = 7

            [session]
            device = "Bench Lock"
            backoff-ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.campaign.target, TargetSelector::Session);
        assert!(config.campaign.target.includes_session());
        assert!(!config.campaign.target.includes_http());
        assert_eq!(config.campaign.rng_seed, Some(7));
        assert_eq!(config.session.device, "Bench Lock");
        assert_eq!(config.session.backoff_ms, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<LatchkeyConfig, _> = toml::from_str(
            r#"
            [campaign]
            iterrations = 5
            "#,
        );
        assert!(result.is_err());
    }
}
