use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use video_grounding::config::BatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GROUNDING_CONFIG",
        "GROUNDING_WORKERS",
        "GROUNDING_VIDEO_TIMEOUT_SECS",
        "GROUNDING_DETECT_TIMEOUT_MS",
        "GROUNDING_REFINE_TIMEOUT_SECS",
        "GROUNDING_DETECTOR",
        "GROUNDING_DETECTOR_ENDPOINT",
        "GROUNDING_TRACKER",
        "GROUNDING_REFINER_URL",
        "GROUNDING_REFINER_MODEL",
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
        "workers": 4,
        "timeouts": {
            "video_secs": 120,
            "detect_ms": 2500,
            "refine_secs": 30
        },
        "detector": {
            "backend": "cpu",
            "endpoint": "http://127.0.0.1:8500/detect"
        },
        "tracker": {
            "search_radius": 16,
            "max_mad": 25.5
        },
        "refiner": {
            "model": "glm-4v-plus",
            "max_tokens": 32
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("GROUNDING_CONFIG", file.path());
    std::env::set_var("GROUNDING_WORKERS", "2");
    std::env::set_var("GROUNDING_REFINER_URL", "http://localhost:9000/v4");

    let cfg = BatchConfig::load().expect("load config");

    assert_eq!(cfg.workers, 2);
    assert_eq!(cfg.video_timeout, Duration::from_secs(120));
    assert_eq!(cfg.detect_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.refine_timeout, Duration::from_secs(30));
    assert_eq!(cfg.detector.backend, "cpu");
    assert_eq!(
        cfg.detector.endpoint.as_deref(),
        Some("http://127.0.0.1:8500/detect")
    );
    assert_eq!(cfg.tracker.backend, "template");
    assert_eq!(cfg.tracker.search_radius, 16);
    assert_eq!(cfg.tracker.max_mad, 25.5);
    assert_eq!(cfg.refiner.url, "http://localhost:9000/v4");
    assert_eq!(cfg.refiner.model, "glm-4v-plus");
    assert_eq!(cfg.refiner.max_tokens, 32);

    let options = cfg.batch_options();
    assert_eq!(options.workers, 2);
    assert_eq!(options.video_timeout, Duration::from_secs(120));
    assert_eq!(cfg.tracker_config().search_radius, 16);
    assert_eq!(cfg.detector_settings().request_timeout, Duration::from_millis(2500));

    clear_env();
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BatchConfig::load().expect("load defaults");
    assert_eq!(cfg.workers, 1);
    assert_eq!(cfg.video_timeout, Duration::from_secs(300));
    assert_eq!(cfg.detect_timeout, Duration::from_secs(10));
    assert_eq!(cfg.refine_timeout, Duration::from_secs(60));
    assert_eq!(cfg.detector.backend, "cpu");
    assert_eq!(cfg.detector.endpoint, None);
    assert_eq!(cfg.tracker.backend, "template");
    assert_eq!(cfg.refiner.max_tokens, 20);

    let caps = cfg.capabilities(None).expect("builtin capabilities");
    assert_eq!(caps.refiner.name(), "passthrough");
    assert_eq!((caps.detector)().expect("detector").name(), "cpu");
    assert_eq!((caps.tracker)().expect("tracker").name(), "template");
    assert!(caps.visualizer.is_none());
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GROUNDING_WORKERS", "0");
    assert!(BatchConfig::load().is_err());

    std::env::set_var("GROUNDING_WORKERS", "many");
    let err = BatchConfig::load().expect_err("non-numeric workers");
    assert!(err.to_string().contains("GROUNDING_WORKERS"));
    std::env::remove_var("GROUNDING_WORKERS");

    std::env::set_var("GROUNDING_DETECT_TIMEOUT_MS", "0");
    assert!(BatchConfig::load().is_err());
    std::env::remove_var("GROUNDING_DETECT_TIMEOUT_MS");

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"tracker": {"max_mad": -1.0}}"#)
        .expect("write config");
    std::env::set_var("GROUNDING_CONFIG", file.path());
    assert!(BatchConfig::load().is_err());

    std::env::set_var("GROUNDING_CONFIG", "/nonexistent/grounding.json");
    assert!(BatchConfig::load().is_err());

    clear_env();
}

#[test]
fn unknown_backend_fails_capabilities() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GROUNDING_TRACKER", "kcf");
    let cfg = BatchConfig::load().expect("load config");
    assert_eq!(cfg.tracker.backend, "kcf");
    assert!(cfg.capabilities(None).is_err());

    clear_env();
}
