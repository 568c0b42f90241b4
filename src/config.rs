//! Application configuration

use crate::capture::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which output surface the canvases render into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum RendererKind {
    #[default]
    Software,
    Gpu,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the analysis/detection backend the proxy forwards to
    pub backend_url: String,
    /// Address the local proxy listens on
    pub proxy_addr: String,
    /// Milliseconds between detection captures
    pub detect_interval_ms: u64,
    /// JPEG quality for detection frames (1-100)
    pub jpeg_quality: u8,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub viewer_height: u32,
    /// Directory of frames played back instead of the webcam
    pub camera_dir: Option<PathBuf>,
    /// Which system webcam to open when no frame directory is set
    pub camera_index: u32,
    pub camera_fps: u32,
    /// Image drawn faintly over the detection canvas
    pub logo_overlay: Option<PathBuf>,
    pub renderer: RendererKind,
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default())
            .join("Brandcam")
            .join("logs");

        Self {
            backend_url: "http://localhost:8080".to_string(),
            proxy_addr: "127.0.0.1:3000".to_string(),
            detect_interval_ms: 2000,
            jpeg_quality: 92,
            canvas_width: 640,
            canvas_height: 480,
            viewer_height: 500,
            camera_dir: None,
            camera_index: 0,
            camera_fps: 30,
            logo_overlay: None,
            renderer: RendererKind::default(),
            log_dir,
        }
    }
}

impl Config {
    /// Load config from file or create default, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::config_path());
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_from(path: &std::path::Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse config {path:?}: {e}"),
                },
                Err(e) => tracing::warn!("Failed to read config {path:?}: {e}"),
            }
        }

        Self::default()
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("BACKEND_URL").filter(|v| !v.is_empty()) {
            self.backend_url = url;
        }
        if let Some(addr) = var("BRANDCAM_PROXY_ADDR").filter(|v| !v.is_empty()) {
            self.proxy_addr = addr;
        }
        if let Some(dir) = var("BRANDCAM_CAMERA_DIR").filter(|v| !v.is_empty()) {
            self.camera_dir = Some(PathBuf::from(dir));
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, config_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, contents)?;

        Ok(())
    }

    /// URL the client side uses to reach the local proxy
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.proxy_addr)
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_millis(self.detect_interval_ms.max(1))
    }

    /// Capture settings for the detection canvas
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: self.detect_interval(),
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
        }
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default())
            .join("Brandcam")
            .join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = Config::default();
        assert_eq!(config.backend_url, "http://localhost:8080");
        assert_eq!(config.detect_interval(), Duration::from_millis(2000));
        assert_eq!(config.proxy_url(), "http://127.0.0.1:3000");
    }

    #[test]
    fn env_overrides_backend_and_camera() {
        let vars: HashMap<&str, &str> = [
            ("BACKEND_URL", "http://backend:9000"),
            ("BRANDCAM_CAMERA_DIR", "/tmp/frames"),
            ("BRANDCAM_PROXY_ADDR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.backend_url, "http://backend:9000");
        assert_eq!(config.camera_dir, Some(PathBuf::from("/tmp/frames")));
        assert_eq!(config.proxy_addr, "127.0.0.1:3000");
    }

    #[test]
    fn save_then_load_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.detect_interval_ms = 500;
        config.renderer = RendererKind::Gpu;
        config.camera_index = 2;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn malformed_or_partial_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());

        std::fs::write(&path, r#"{ "jpeg_quality": 70 }"#).unwrap();
        let partial = Config::load_from(&path);
        assert_eq!(partial.jpeg_quality, 70);
        assert_eq!(partial.backend_url, Config::default().backend_url);
    }
}
