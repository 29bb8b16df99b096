use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use live_detect_overlay::config::OverlayConfig;
use live_detect_overlay::detect::ExecutionStrategy;
use live_detect_overlay::inference::ChannelOrder;
use live_detect_overlay::layout::{BoxPolicy, FitMode, RegionMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OVERLAY_CONFIG",
        "OVERLAY_MODEL",
        "OVERLAY_DEVICE",
        "OVERLAY_THRESHOLD",
        "OVERLAY_FIT",
        "OVERLAY_ASPECT",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "model": {
                "path": "models/teeth.onnx",
                "input_size": 1088,
                "max_detections": 100,
                "channel_order": "rgb",
                "backends": ["portable"]
            },
            "camera": {
                "device": "/dev/video2",
                "width": 1920,
                "height": 1080,
                "target_fps": 15
            },
            "display": {
                "viewport_width": 720,
                "viewport_height": 1280,
                "fit": "stretch",
                "region": "full",
                "box_policy": "clip"
            },
            "detection": {
                "threshold": 0.5,
                "smoothing_alpha": 0.5,
                "labels": ["tooth", "gap"]
            }
        }"#,
    );

    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_DEVICE", "stub://front");
    std::env::set_var("OVERLAY_THRESHOLD", "0.65");
    std::env::set_var("OVERLAY_FIT", "letterbox");
    std::env::set_var("OVERLAY_ASPECT", "16:9");

    let cfg = OverlayConfig::load().expect("load config");

    assert_eq!(cfg.model.path, "models/teeth.onnx");
    assert_eq!(cfg.model.input_size, 1088);
    assert_eq!(cfg.model.max_detections, 100);
    assert_eq!(cfg.model.channel_order, ChannelOrder::Rgb);
    assert_eq!(cfg.model.backends, vec![ExecutionStrategy::Portable]);
    assert_eq!(cfg.camera.device.as_deref(), Some("stub://front"));
    assert_eq!((cfg.camera.width, cfg.camera.height), (1920, 1080));
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.display.viewport_width, 720);
    assert_eq!(cfg.display.fit, FitMode::Letterbox);
    assert_eq!(cfg.display.aspect.as_deref(), Some("16:9"));
    assert_eq!(cfg.display.region, RegionMode::Full);
    assert_eq!(cfg.display.box_policy, BoxPolicy::Clip);
    assert!((cfg.detection.threshold - 0.65).abs() < 1e-6);
    assert_eq!(cfg.detection.labels, vec!["tooth", "gap"]);

    let session = cfg.session_config();
    assert_eq!(session.viewport_height, 1280);
    assert_eq!(session.labels.len(), 2);
    let request = cfg.device_request();
    assert_eq!(request.target_fps, 15);
    assert_eq!(cfg.channel_config().input_size, 1088);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".toml",
        r#"
        [model]
        path = "stub://bright"

        [display]
        fit = "cover"
        region = "centered-square"

        [detection]
        threshold = 0.25
        "#,
    );
    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_ASPECT", "source");

    let cfg = OverlayConfig::load().expect("load config");
    assert!(cfg.model_location().is_stub());
    assert_eq!(cfg.model.input_size, 640);
    assert_eq!(cfg.display.region, RegionMode::CenteredSquare);
    assert!(cfg.display.aspect.is_none());
    assert!((cfg.detection.threshold - 0.25).abs() < 1e-6);
    assert_eq!(cfg.layout_engine().expect("layout").policy_name(), "cover");

    clear_env();
}

#[test]
fn rejects_bad_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("OVERLAY_THRESHOLD", "high");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_THRESHOLD", "1.2");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_FIT", "zoom");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_ASPECT", "0:3");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    let file = write_config(".json", r#"{"display": {"fit": "cover", "zoom": 2}}"#);
    std::env::set_var("OVERLAY_CONFIG", file.path());
    assert!(OverlayConfig::load().is_err());
    clear_env();
}

#[test]
fn defaults_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = OverlayConfig::load().expect("defaults load");
    assert_eq!(cfg.model.path, "best.onnx");
    assert_eq!(cfg.display.fit, FitMode::Cover);
    assert_eq!(cfg.display.aspect.as_deref(), Some("4:3"));
    assert_eq!(cfg.camera.target_fps, 30);
    assert!((cfg.detection.threshold - 0.3).abs() < 1e-6);
}
