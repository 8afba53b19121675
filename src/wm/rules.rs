//! Application rules
//!
//! A rule matches clients by class, instance, title substring, window type
//! and transient-ness, and overrides their desktop, layer, focus-on-map and
//! placement. Rules are applied in order when a client finishes management;
//! later matches override earlier ones.

use std::str::FromStr;

use crate::config::ConfigError;
use crate::wm::client::{Client, ClientInfo};
use crate::wm::client_flags::{Layer, Placement, WindowType};

/// Desktop assignment made by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDesktop {
    Sticky,
    Index(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    pub class: Option<String>,
    pub instance: Option<String>,
    /// Substring of the title
    pub title: Option<String>,
    pub window_type: Option<WindowType>,
    pub transient: Option<bool>,

    pub desktop: Option<RuleDesktop>,
    pub layer: Option<Layer>,
    pub focus: Option<bool>,
    pub placement: Option<Placement>,
}

impl Rule {
    pub fn matches(&self, client: &Client, info: &ClientInfo) -> bool {
        if self.class.as_deref().is_some_and(|c| c != info.wm_class) {
            return false;
        }
        if self.instance.as_deref().is_some_and(|i| i != info.wm_instance) {
            return false;
        }
        if self.title.as_deref().is_some_and(|t| !info.title.contains(t)) {
            return false;
        }
        if self.window_type.is_some_and(|t| t != client.window_type) {
            return false;
        }
        if self.transient.is_some_and(|t| t != client.transient_for.is_valid()) {
            return false;
        }
        true
    }

    /// Apply the overrides to `client`. A fullscreen client keeps its layer
    /// until it leaves fullscreen.
    pub fn apply(&self, client: &mut Client) {
        match self.desktop {
            Some(RuleDesktop::Sticky) => {
                client.desktop = -1;
                client.sticky = true;
            }
            Some(RuleDesktop::Index(n)) => {
                client.desktop = n as i32;
                client.sticky = false;
            }
            None => {}
        }
        if let Some(layer) = self.layer {
            client.base_layer = layer;
            if !client.is_fullscreen() {
                client.layer = client.layer_from_state();
            }
        }
        if let Some(focus) = self.focus {
            client.focus_override = Some(focus);
        }
        if let Some(placement) = self.placement {
            client.placement = placement;
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true") || value == "1"
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
}

/// Split `a:b, c:d` into trimmed, lowercased keys and trimmed values.
fn pairs(part: &str) -> Result<Vec<(String, &str)>, ConfigError> {
    part.split(',')
        .map(str::trim)
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let (k, v) = kv.split_once(':').ok_or_else(|| ConfigError::MalformedPair(kv.to_string()))?;
            Ok((k.trim().to_ascii_lowercase(), v.trim()))
        })
        .collect()
}

impl FromStr for Rule {
    type Err = ConfigError;

    /// `class:Gimp, type:dialog -> desktop:2, placement:center`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (matchers, actions) = s.split_once("->").ok_or_else(|| ConfigError::MissingArrow(s.to_string()))?;
        let mut rule = Rule::default();

        for (key, value) in pairs(matchers)? {
            match key.as_str() {
                "class" => rule.class = Some(value.to_string()),
                "instance" => rule.instance = Some(value.to_string()),
                "title" => rule.title = Some(value.to_string()),
                "type" => {
                    let t = WindowType::from_name(&value.to_ascii_lowercase()).ok_or_else(|| invalid(&key, value))?;
                    rule.window_type = Some(t);
                }
                "transient" => rule.transient = Some(parse_bool(value)),
                _ => return Err(ConfigError::UnknownRuleKey(key.clone())),
            }
        }

        for (key, value) in pairs(actions)? {
            match key.as_str() {
                "desktop" => {
                    rule.desktop = Some(if value.eq_ignore_ascii_case("sticky") {
                        RuleDesktop::Sticky
                    } else {
                        RuleDesktop::Index(value.parse().map_err(|_| invalid(&key, value))?)
                    });
                }
                "layer" => {
                    let layer = Layer::from_name(&value.to_ascii_lowercase()).ok_or_else(|| invalid(&key, value))?;
                    rule.layer = Some(layer);
                }
                "focus" => rule.focus = Some(parse_bool(value)),
                "placement" => {
                    rule.placement = Some(match value.to_ascii_lowercase().as_str() {
                        "center" => Placement::Center,
                        "mouse" => Placement::Mouse,
                        "default" => Placement::Default,
                        _ => return Err(invalid(&key, value)),
                    });
                }
                _ => return Err(ConfigError::UnknownRuleKey(key.clone())),
            }
        }

        Ok(rule)
    }
}
