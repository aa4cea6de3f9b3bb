use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::capture::CaptureSettings;
use crate::ingest::{SourceSettings, SourceSpec};
use crate::pipeline::AnalysisSettings;
use crate::remote::ModelSettings;

const DEFAULT_TICK_MS: u64 = 33;
pub const SCRIPTED_BACKEND: &str = "scripted";
pub const REMOTE_BACKEND: &str = "remote";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ShieldConfigFile {
    video: Option<VideoConfigFile>,
    capture: Option<CaptureConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    models: Option<ModelsConfigFile>,
    tick_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VideoConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    reconnect_backoff_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    error_backoff_ms: Option<u64>,
    join_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnalysisConfigFile {
    min_detection_confidence: Option<f32>,
    max_detections: Option<usize>,
    crowd_threshold: Option<usize>,
    loiter_secs: Option<u64>,
    enrich_min_confidence: Option<f32>,
    refresh_min_confidence: Option<f32>,
    refresh_interval: Option<u64>,
    untracked_interval: Option<u64>,
    track_ttl_secs: Option<u64>,
    slow_enrichment_warn_ms: Option<u64>,
    suspicious_confidence: Option<f32>,
    strict_confidence: Option<f32>,
    critical_labels: Option<Vec<String>>,
    suspicious_labels: Option<Vec<String>>,
    flagged_plate_markers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelsConfigFile {
    backend: Option<String>,
    detector_url: Option<String>,
    identity_url: Option<String>,
    plate_url: Option<String>,
    detector_tracking: Option<bool>,
    request_timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct ShieldConfig {
    pub source: SourceSettings,
    pub capture: CaptureSettings,
    pub analysis: AnalysisSettings,
    pub models: ModelSettings,
    /// Detector backend name: `scripted` or `remote`.
    pub detector_backend: String,
    /// Serving loop cadence.
    pub tick: Duration,
}

impl ShieldConfig {
    /// Defaults, then the file named by `SHIELD_CONFIG`, then `SHIELD_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_nonempty("SHIELD_CONFIG");
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ShieldConfigFile) -> Self {
        let video = file.video.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let analysis = file.analysis.unwrap_or_default();
        let models = file.models.unwrap_or_default();

        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            id: video.source.unwrap_or(source_defaults.id),
            reconnect_backoff: millis_or(video.reconnect_backoff_ms, source_defaults.reconnect_backoff),
            poll_interval: millis_or(video.poll_interval_ms, source_defaults.poll_interval),
            request_timeout: millis_or(video.request_timeout_ms, source_defaults.request_timeout),
            width: video.width.unwrap_or(source_defaults.width),
            height: video.height.unwrap_or(source_defaults.height),
            target_fps: video.target_fps.unwrap_or(source_defaults.target_fps),
        };

        let capture_defaults = CaptureSettings::default();
        let capture = CaptureSettings {
            error_backoff: millis_or(capture.error_backoff_ms, capture_defaults.error_backoff),
            join_timeout: millis_or(capture.join_timeout_ms, capture_defaults.join_timeout),
        };

        let defaults = AnalysisSettings::default();
        let mut policy = defaults.policy.clone();
        if let Some(labels) = analysis.critical_labels {
            policy.critical_labels = labels;
        }
        if let Some(labels) = analysis.suspicious_labels {
            policy.suspicious_labels = labels;
        }
        if let Some(markers) = analysis.flagged_plate_markers {
            policy.flagged_plate_markers = markers;
        }
        policy.suspicious_confidence = analysis
            .suspicious_confidence
            .unwrap_or(policy.suspicious_confidence);
        policy.strict_confidence = analysis.strict_confidence.unwrap_or(policy.strict_confidence);

        let track_ttl = match analysis.track_ttl_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.track_ttl,
        };
        let analysis = AnalysisSettings {
            min_detection_confidence: analysis
                .min_detection_confidence
                .unwrap_or(defaults.min_detection_confidence),
            max_detections: analysis.max_detections.unwrap_or(defaults.max_detections),
            crowd_threshold: analysis.crowd_threshold.unwrap_or(defaults.crowd_threshold),
            loiter_threshold: analysis
                .loiter_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.loiter_threshold),
            enrich_min_confidence: analysis
                .enrich_min_confidence
                .unwrap_or(defaults.enrich_min_confidence),
            refresh_min_confidence: analysis
                .refresh_min_confidence
                .unwrap_or(defaults.refresh_min_confidence),
            refresh_interval: analysis.refresh_interval.unwrap_or(defaults.refresh_interval),
            untracked_interval: analysis
                .untracked_interval
                .unwrap_or(defaults.untracked_interval),
            track_ttl,
            slow_enrichment_warn: millis_or(
                analysis.slow_enrichment_warn_ms,
                defaults.slow_enrichment_warn,
            ),
            policy,
        };

        let model_defaults = ModelSettings::default();
        let detector_backend = models.backend;
        let models = ModelSettings {
            detector_url: models.detector_url,
            identity_url: models.identity_url,
            plate_url: models.plate_url,
            detector_tracking: models
                .detector_tracking
                .unwrap_or(model_defaults.detector_tracking),
            request_timeout: millis_or(models.request_timeout_ms, model_defaults.request_timeout),
            jpeg_quality: models.jpeg_quality.unwrap_or(model_defaults.jpeg_quality),
        };
        let detector_backend = detector_backend.unwrap_or_else(|| default_backend(&models));

        Self {
            source,
            capture,
            analysis,
            models,
            detector_backend,
            tick: Duration::from_millis(file.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_nonempty("SHIELD_VIDEO_SOURCE") {
            self.source.id = source;
        }
        if let Some(url) = env_nonempty("SHIELD_DETECTOR_URL") {
            self.models.detector_url = Some(url);
            // An explicit endpoint switches the daemon to the remote detector.
            self.detector_backend = REMOTE_BACKEND.to_string();
        }
        if let Some(url) = env_nonempty("SHIELD_IDENTITY_URL") {
            self.models.identity_url = Some(url);
        }
        if let Some(url) = env_nonempty("SHIELD_PLATE_URL") {
            self.models.plate_url = Some(url);
        }
        if let Some(threshold) = env_parse::<usize>("SHIELD_CROWD_THRESHOLD")? {
            self.analysis.crowd_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("SHIELD_LOITER_SECS")? {
            self.analysis.loiter_threshold = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("SHIELD_TICK_MS")? {
            self.tick = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        SourceSpec::parse(&self.source.id)
            .with_context(|| format!("invalid video source {:?}", self.source.id))?;

        let analysis = &self.analysis;
        for (name, value) in [
            ("min_detection_confidence", analysis.min_detection_confidence),
            ("enrich_min_confidence", analysis.enrich_min_confidence),
            ("refresh_min_confidence", analysis.refresh_min_confidence),
            ("suspicious_confidence", analysis.policy.suspicious_confidence),
            ("strict_confidence", analysis.policy.strict_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if analysis.crowd_threshold == 0 {
            bail!("crowd threshold must be greater than zero");
        }
        if analysis.max_detections == 0 {
            bail!("max_detections must be greater than zero");
        }
        if analysis.refresh_interval == 0 || analysis.untracked_interval == 0 {
            bail!("enrichment intervals must be greater than zero");
        }
        if self.tick.is_zero() {
            bail!("tick must be greater than zero");
        }
        if !(1..=100).contains(&self.models.jpeg_quality) {
            bail!("jpeg_quality must be within 1..=100");
        }

        for (name, url) in [
            ("detector_url", &self.models.detector_url),
            ("identity_url", &self.models.identity_url),
            ("plate_url", &self.models.plate_url),
        ] {
            if let Some(url) = url {
                validate_http_url(name, url)?;
            }
        }

        self.detector_backend = self.detector_backend.trim().to_lowercase();
        match self.detector_backend.as_str() {
            SCRIPTED_BACKEND => {}
            REMOTE_BACKEND => {
                if self.models.detector_url.is_none() {
                    bail!("detector backend 'remote' requires models.detector_url");
                }
            }
            other => bail!("unknown detector backend '{}'", other),
        }
        Ok(())
    }
}

fn default_backend(models: &ModelSettings) -> String {
    if models.detector_url.is_some() {
        REMOTE_BACKEND.to_string()
    } else {
        SCRIPTED_BACKEND.to_string()
    }
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("{} is not a valid URL", name))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(anyhow!("{} must use http or https, got {}", name, scheme)),
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_nonempty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer, got {:?}", key, raw)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ShieldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.detector_backend, SCRIPTED_BACKEND);
        assert_eq!(cfg.source.id, "stub://front_camera");
        assert_eq!(cfg.analysis.crowd_threshold, 5);
        assert_eq!(cfg.tick, Duration::from_millis(33));
    }

    #[test]
    fn zero_ttl_disables_eviction() {
        let file: ShieldConfigFile =
            serde_json::from_str(r#"{"analysis":{"track_ttl_secs":0}}"#).unwrap();
        assert_eq!(ShieldConfig::from_file(file).analysis.track_ttl, None);
    }

    #[test]
    fn detector_url_selects_remote_backend() {
        let file: ShieldConfigFile =
            serde_json::from_str(r#"{"models":{"detector_url":"http://127.0.0.1:9000/detect"}}"#)
                .unwrap();
        let mut cfg = ShieldConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.detector_backend, REMOTE_BACKEND);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.analysis.enrich_min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.analysis.untracked_interval = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.analysis.max_detections = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.analysis.min_detection_confidence = -0.1;
        assert!(cfg.validate().is_err());

        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.models.plate_url = Some("ftp://plates".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = ShieldConfig::from_file(ShieldConfigFile::default());
        cfg.detector_backend = REMOTE_BACKEND.to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<ShieldConfigFile>(r#"{"videos":{}}"#).is_err());
    }
}
