use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::analysis::AnalysisParams;

/// All session settings, loaded from INI file or defaults.
/// Every field here is saveable/loadable.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    // ── Runtime ──
    pub poll_interval_ms: u64,  // control-thread tick
    pub flush_interval_ms: u64, // console flush cadence
    pub marker_refresh_ms: u64, // min interval between marker redraws

    // ── Navigation ──
    pub scroll_fraction: f64, // fraction of the visible width per scroll click
    pub click_threshold_px: f64,

    // ── Analysis ──
    pub load_downsampling: usize,
    pub split_seconds: f64,
    pub frame_ms: f64,
    pub frame_step_ms: f64,
    pub bands: usize,
    pub min_motif_frames: usize,

    // ── Display ──
    pub vmin: f32,
    pub vmax: f32,

    // ── Window ──
    pub window_width: i32,
    pub window_height: i32,
    pub console_height: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Runtime
            poll_interval_ms: 16,
            flush_interval_ms: 50,
            marker_refresh_ms: 50,

            // Navigation
            scroll_fraction: 0.25,
            click_threshold_px: 5.0,

            // Analysis
            load_downsampling: 1,
            split_seconds: 600.0,
            frame_ms: 20.0,
            frame_step_ms: 10.0,
            bands: 16,
            min_motif_frames: 5,

            // Display
            vmin: -90.0,
            vmax: -20.0,

            // Window
            window_width: 1200,
            window_height: 800,
            console_height: 160,
        }
    }
}

impl Settings {
    pub const FILE_NAME: &'static str = "session.ini";

    /// Load settings from INI file, or create it with defaults if it doesn't exist.
    pub fn load_or_create(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => Self::from_ini(&content),
                Err(e) => {
                    log::warn!("Could not read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            }
        } else {
            let settings = Self::default();
            settings.save(path);
            settings
        }
    }

    /// Save current settings to INI file.
    pub fn save(&self, path: &Path) {
        if let Err(e) = fs::write(path, self.to_ini()) {
            log::warn!("Could not save {}: {}", path.display(), e);
        }
    }

    pub fn from_ini(content: &str) -> Self {
        let mut settings = Self::default();
        settings.parse_ini(content);
        settings
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn analysis_params(&self) -> AnalysisParams {
        AnalysisParams {
            downsampling: self.load_downsampling.max(1),
            split_seconds: self.split_seconds,
            frame_ms: self.frame_ms,
            frame_step_ms: self.frame_step_ms,
            bands: self.bands.max(1),
            min_motif_frames: self.min_motif_frames.max(1),
        }
    }

    fn to_ini(&self) -> String {
        let mut s = String::new();
        s.push_str("# songscope Settings\n");
        s.push_str("# Edit values below. Delete this file to reset to defaults.\n\n");

        s.push_str("[Runtime]\n");
        s.push_str(&format!("poll_interval_ms = {}\n", self.poll_interval_ms));
        s.push_str(&format!("flush_interval_ms = {}\n", self.flush_interval_ms));
        s.push_str(&format!("marker_refresh_ms = {}\n", self.marker_refresh_ms));
        s.push('\n');

        s.push_str("[Navigation]\n");
        s.push_str("# scroll_fraction: share of the visible width moved by Back/Forward\n");
        s.push_str(&format!("scroll_fraction = {}\n", self.scroll_fraction));
        s.push_str("# drags shorter than this (pixels, both axes) count as a click\n");
        s.push_str(&format!("click_threshold_px = {}\n", self.click_threshold_px));
        s.push('\n');

        s.push_str("[Analysis]\n");
        s.push_str(&format!("load_downsampling = {}\n", self.load_downsampling));
        s.push_str("# long files are split into records of at most this many seconds\n");
        s.push_str(&format!("split_seconds = {}\n", self.split_seconds));
        s.push_str(&format!("frame_ms = {}\n", self.frame_ms));
        s.push_str(&format!("frame_step_ms = {}\n", self.frame_step_ms));
        s.push_str(&format!("bands = {}\n", self.bands));
        s.push_str(&format!("min_motif_frames = {}\n", self.min_motif_frames));
        s.push('\n');

        s.push_str("[Display]\n");
        s.push_str(&format!("vmin = {}\n", self.vmin));
        s.push_str(&format!("vmax = {}\n", self.vmax));
        s.push('\n');

        s.push_str("[Window]\n");
        s.push_str(&format!("window_width = {}\n", self.window_width));
        s.push_str(&format!("window_height = {}\n", self.window_height));
        s.push_str(&format!("console_height = {}\n", self.console_height));

        s
    }

    fn parse_ini(&mut self, content: &str) {
        let map = parse_ini_to_map(content);

        // Runtime
        read_value(&map, "poll_interval_ms", &mut self.poll_interval_ms);
        read_value(&map, "flush_interval_ms", &mut self.flush_interval_ms);
        read_value(&map, "marker_refresh_ms", &mut self.marker_refresh_ms);

        // Navigation
        read_value(&map, "scroll_fraction", &mut self.scroll_fraction);
        read_value(&map, "click_threshold_px", &mut self.click_threshold_px);
        if !(self.scroll_fraction > 0.0 && self.scroll_fraction <= 1.0) {
            log::warn!("scroll_fraction must be in (0, 1], using 0.25");
            self.scroll_fraction = 0.25;
        }

        // Analysis
        read_value(&map, "load_downsampling", &mut self.load_downsampling);
        read_value(&map, "split_seconds", &mut self.split_seconds);
        read_value(&map, "frame_ms", &mut self.frame_ms);
        read_value(&map, "frame_step_ms", &mut self.frame_step_ms);
        read_value(&map, "bands", &mut self.bands);
        read_value(&map, "min_motif_frames", &mut self.min_motif_frames);

        // Display
        read_value(&map, "vmin", &mut self.vmin);
        read_value(&map, "vmax", &mut self.vmax);

        // Window
        read_value(&map, "window_width", &mut self.window_width);
        read_value(&map, "window_height", &mut self.window_height);
        read_value(&map, "console_height", &mut self.console_height);
    }
}

fn read_value<T: FromStr>(map: &HashMap<String, String>, key: &str, field: &mut T) {
    if let Some(v) = map.get(key) {
        match v.parse() {
            Ok(n) => *field = n,
            Err(_) => log::warn!("Ignoring bad value for {}: {:?}", key, v),
        }
    }
}

fn parse_ini_to_map(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            map.insert(key.trim().to_string(), val.trim().to_string());
        }
    }
    map
}

// ============================================================================
// UNIT TESTS
// ============================================================================
