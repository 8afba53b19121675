//! Configuration for the hxm window manager
//!
//! Loads configuration from a TOML file at `~/.config/hxm/hxm.toml`, falling
//! back to `/etc/hxm/hxm.toml`. Auto-generates a default config file on first
//! run if neither exists.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wm::keyboard::KeyBinding;
use crate::wm::rules::Rule;

const SYSTEM_CONFIG: &str = "/etc/hxm/hxm.toml";

/// Errors produced while parsing keybind and rule strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing ':' in keybind {0:?}")]
    MissingColon(String),
    #[error("unknown modifier {0:?}")]
    UnknownModifier(String),
    #[error("unknown keysym {0:?}")]
    UnknownKeysym(String),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("action {0:?} needs an argument")]
    MissingArgument(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("missing '->' in rule {0:?}")]
    MissingArrow(String),
    #[error("malformed pair {0:?}, expected key:value")]
    MalformedPair(String),
    #[error("unknown rule key {0:?}")]
    UnknownRuleKey(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub theme: ThemeConfig,
    /// Number of virtual desktops (at least 1)
    pub desktop_count: u32,
    /// Published as `_NET_DESKTOP_NAMES`; missing names default to "1".."n"
    pub desktop_names: Vec<String>,
    /// Raise a client when it receives focus
    pub focus_raise: bool,
    /// Fullscreen clients cover the workarea instead of the whole screen
    pub fullscreen_use_workarea: bool,
    /// Shell command run by the `terminal` action
    pub terminal: String,
    /// Drop the built-in keybinds before adding `keybinds`
    pub clear_keybinds: bool,
    /// Entries of the form `Mod4+Shift+1: move_to_workspace 0`
    pub keybinds: Vec<String>,
    /// Entries of the form `class:Firefox, type:dialog -> desktop:1, placement:center`
    pub rules: Vec<String>,
    /// Items of the root window menu
    pub root_menu: Vec<MenuEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: ThemeConfig::default(),
            desktop_count: 4,
            desktop_names: Vec::new(),
            focus_raise: true,
            fullscreen_use_workarea: false,
            terminal: "st || xterm || x-terminal-emulator".to_string(),
            clear_keybinds: false,
            keybinds: Vec::new(),
            rules: Vec::new(),
            root_menu: default_root_menu(),
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let system_path = Path::new(SYSTEM_CONFIG);
        if system_path.exists() {
            return Self::load_from(system_path);
        }

        info!("Config file not found at {:?}, using defaults", config_path);
        if let Err(e) = Self::save_default(&config_path) {
            warn!("Failed to create default config file: {}", e);
        }
        Ok(Self::default())
    }

    /// Load and validate one file. Used by reload so a broken file keeps the
    /// running configuration.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate();

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the user config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("hxm");

        Ok(config_dir.join("hxm.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let toml_string = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    fn validate(&mut self) {
        if self.desktop_count == 0 {
            warn!("desktop_count must be at least 1, using 1");
            self.desktop_count = 1;
        }
        if self.theme.title_height == 0 && self.theme.border_width == 0 {
            debug!("Frames are invisible: title_height and border_width are both 0");
        }
    }

    /// Name of desktop `index`, "1".."n" when not configured.
    pub fn desktop_name(&self, index: u32) -> String {
        self.desktop_names
            .get(index as usize)
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| (index + 1).to_string())
    }

    /// Built-in keybinds (unless cleared) followed by the configured ones.
    /// Malformed entries are logged and skipped.
    pub fn key_bindings(&self) -> Vec<KeyBinding> {
        let mut lines: Vec<String> = Vec::new();
        if !self.clear_keybinds {
            lines.extend(default_keybinds());
        }
        lines.extend(self.keybinds.iter().cloned());

        lines
            .iter()
            .filter_map(|line| match line.parse::<KeyBinding>() {
                Ok(binding) => Some(binding),
                Err(e) => {
                    warn!("Ignoring keybind {:?}: {}", line, e);
                    None
                }
            })
            .collect()
    }

    /// Parsed application rules; malformed entries are logged and skipped.
    pub fn app_rules(&self) -> Vec<Rule> {
        self.rules
            .iter()
            .filter_map(|line| match line.parse::<Rule>() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Ignoring rule {:?}: {}", line, e);
                    None
                }
            })
            .collect()
    }
}

/// Frame and menu theme
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Focused titlebar background (hex: 0xRRGGBB)
    pub active_bg: u32,
    /// Focused title text (hex: 0xRRGGBB)
    pub active_fg: u32,
    /// Focused border (hex: 0xRRGGBB)
    pub active_border: u32,
    /// Unfocused titlebar background (hex: 0xRRGGBB)
    pub inactive_bg: u32,
    /// Unfocused title text (hex: 0xRRGGBB)
    pub inactive_fg: u32,
    /// Unfocused border (hex: 0xRRGGBB)
    pub inactive_border: u32,
    pub menu_bg: u32,
    pub menu_fg: u32,
    pub menu_sel_bg: u32,
    pub menu_sel_fg: u32,
    /// Border width in pixels
    pub border_width: u32,
    /// Titlebar height in pixels
    pub title_height: u32,
    /// Core X font used for titles and menus
    pub font_name: String,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            active_bg: 0x4c597d,
            active_fg: 0xffffff,
            active_border: 0x7a8aa2,
            inactive_bg: 0x333333,
            inactive_fg: 0x888888,
            inactive_border: 0x444444,
            menu_bg: 0x333333,
            menu_fg: 0xcccccc,
            menu_sel_bg: 0x4c597d,
            menu_sel_fg: 0xffffff,
            border_width: 2,
            title_height: 20,
            font_name: "fixed".to_string(),
        }
    }
}

/// One root menu item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub label: String,
    /// `exec <command>`, `reload`, `restart` or `exit`
    pub action: String,
}

fn default_root_menu() -> Vec<MenuEntry> {
    let entry = |label: &str, action: &str| MenuEntry { label: label.to_string(), action: action.to_string() };
    vec![
        entry("Terminal", "terminal"),
        entry("Reload", "reload"),
        entry("Restart", "restart"),
        entry("Exit", "exit"),
    ]
}

fn default_keybinds() -> Vec<String> {
    let mut binds: Vec<String> = [
        "Mod1+F4: close",
        "Mod1+Tab: focus_next",
        "Mod1+Shift+Tab: focus_prev",
        "Mod4+Return: terminal",
        "Mod4+d: exec dmenu_run",
        "Mod4+s: toggle_sticky",
        "Mod4+Left: workspace_prev",
        "Mod4+Right: workspace_next",
        "Mod1+F7: move",
        "Mod1+F8: resize",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for n in 1..=9 {
        binds.push(format!("Mod4+{}: workspace {}", n, n - 1));
        binds.push(format!("Mod4+Shift+{}: move_to_workspace {}", n, n - 1));
    }
    binds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::keyboard::Action;

    #[test]
    fn defaults_match_builtin_theme() {
        let config = Config::default();
        assert_eq!(config.theme.border_width, 2);
        assert_eq!(config.theme.title_height, 20);
        assert_eq!(config.theme.active_bg, 0x4c597d);
        assert_eq!(config.desktop_count, 4);
        assert!(config.focus_raise);
        assert!(!config.fullscreen_use_workarea);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            desktop_count = 6
            keybinds = ["Mod4+q: close"]

            [theme]
            title_height = 24
            "#,
        )
        .unwrap();
        assert_eq!(config.desktop_count, 6);
        assert_eq!(config.theme.title_height, 24);
        assert_eq!(config.theme.border_width, 2);
        assert_eq!(config.theme.font_name, "fixed");
    }

    #[test]
    fn clear_keybinds_drops_builtins() {
        let mut config = Config::default();
        let builtin = config.key_bindings().len();
        assert!(builtin >= 28);

        config.keybinds = vec!["Mod4+q: close".to_string(), "Mod4+nosuchkey: close".to_string()];
        assert_eq!(config.key_bindings().len(), builtin + 1);

        config.clear_keybinds = true;
        let bindings = config.key_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].action, Action::Close);
    }

    #[test]
    fn desktop_names_fall_back_to_numbers() {
        let mut config = Config::default();
        config.desktop_names = vec!["web".to_string(), String::new()];
        assert_eq!(config.desktop_name(0), "web");
        assert_eq!(config.desktop_name(1), "2");
        assert_eq!(config.desktop_name(3), "4");
    }

    #[test]
    fn zero_desktops_is_corrected() {
        let mut config = Config { desktop_count: 0, ..Default::default() };
        config.validate();
        assert_eq!(config.desktop_count, 1);
    }

    #[test]
    fn bad_rules_are_skipped() {
        let config = Config {
            rules: vec!["class:xterm -> desktop:2".to_string(), "nonsense".to_string()],
            ..Default::default()
        };
        assert_eq!(config.app_rules().len(), 1);
    }
}
