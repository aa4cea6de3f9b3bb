use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use shield_vision::config::ShieldConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SHIELD_CONFIG",
        "SHIELD_VIDEO_SOURCE",
        "SHIELD_DETECTOR_URL",
        "SHIELD_IDENTITY_URL",
        "SHIELD_PLATE_URL",
        "SHIELD_CROWD_THRESHOLD",
        "SHIELD_LOITER_SECS",
        "SHIELD_TICK_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "video": {
            "source": "http://10.0.0.5/snapshot.jpg",
            "poll_interval_ms": 250,
            "request_timeout_ms": 1500
        },
        "capture": {
            "error_backoff_ms": 500,
            "join_timeout_ms": 1000
        },
        "analysis": {
            "crowd_threshold": 8,
            "loiter_secs": 20,
            "track_ttl_secs": 120,
            "min_detection_confidence": 0.4,
            "max_detections": 10,
            "critical_labels": ["gun", "machete"]
        },
        "models": {
            "identity_url": "http://127.0.0.1:9101/identify",
            "jpeg_quality": 70
        },
        "tick_ms": 50
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SHIELD_CONFIG", file.path());
    std::env::set_var("SHIELD_CROWD_THRESHOLD", "6");
    std::env::set_var("SHIELD_TICK_MS", "40");
    std::env::set_var("SHIELD_DETECTOR_URL", "http://127.0.0.1:9100/detect");

    let cfg = ShieldConfig::load().expect("load config");

    assert_eq!(cfg.source.id, "http://10.0.0.5/snapshot.jpg");
    assert_eq!(cfg.source.poll_interval, Duration::from_millis(250));
    assert_eq!(cfg.source.request_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.capture.error_backoff, Duration::from_millis(500));
    assert_eq!(cfg.capture.join_timeout, Duration::from_secs(1));
    assert_eq!(cfg.analysis.crowd_threshold, 6);
    assert_eq!(cfg.analysis.loiter_threshold, Duration::from_secs(20));
    assert_eq!(cfg.analysis.track_ttl, Some(Duration::from_secs(120)));
    assert_eq!(cfg.analysis.min_detection_confidence, 0.4);
    assert_eq!(cfg.analysis.max_detections, 10);
    assert_eq!(cfg.analysis.policy.critical_labels, vec!["gun", "machete"]);
    assert_eq!(
        cfg.models.identity_url.as_deref(),
        Some("http://127.0.0.1:9101/identify")
    );
    assert_eq!(
        cfg.models.detector_url.as_deref(),
        Some("http://127.0.0.1:9100/detect")
    );
    assert_eq!(cfg.models.jpeg_quality, 70);
    assert_eq!(cfg.detector_backend, "remote");
    assert_eq!(cfg.tick, Duration::from_millis(40));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
tick_ms = 100

[video]
source = "stub://lobby"
width = 320
height = 240

[analysis]
loiter_secs = 5
track_ttl_secs = 0
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SHIELD_CONFIG", file.path());
    std::env::set_var("SHIELD_VIDEO_SOURCE", "stub://garage");

    let cfg = ShieldConfig::load().expect("load config");
    assert_eq!(cfg.source.id, "stub://garage");
    assert_eq!(cfg.source.width, 320);
    assert_eq!(cfg.analysis.loiter_threshold, Duration::from_secs(5));
    assert_eq!(cfg.analysis.track_ttl, None);
    assert_eq!(cfg.detector_backend, "scripted");
    assert_eq!(cfg.tick, Duration::from_millis(100));

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ShieldConfig::load().expect("load defaults");
    assert_eq!(cfg.source.id, "stub://front_camera");
    assert_eq!(cfg.analysis.crowd_threshold, 5);
    assert_eq!(cfg.analysis.loiter_threshold, Duration::from_secs(10));
    assert_eq!(cfg.analysis.refresh_interval, 30);
    assert_eq!(cfg.analysis.untracked_interval, 5);
    assert_eq!(cfg.analysis.min_detection_confidence, 0.5);
    assert_eq!(cfg.analysis.max_detections, 20);
    assert_eq!(cfg.analysis.track_ttl, Some(Duration::from_secs(300)));
    assert!(cfg.models.detector_url.is_none());
    assert_eq!(cfg.detector_backend, "scripted");

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHIELD_LOITER_SECS", "ten");
    assert!(ShieldConfig::load().is_err());
    clear_env();

    std::env::set_var("SHIELD_CROWD_THRESHOLD", "0");
    assert!(ShieldConfig::load().is_err());
    clear_env();

    std::env::set_var("SHIELD_VIDEO_SOURCE", "carrier-pigeon://roof");
    assert!(ShieldConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("SHIELD_CONFIG", file.path());

    let err = ShieldConfig::load().expect_err("malformed config must fail");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
