use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::common::collections::{HashMap, HashSet};

const MAX_WORKSPACES: usize = 32;

pub fn config_file() -> PathBuf { dirs::home_dir().unwrap().join(".strata.toml") }

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub workspaces: WorkspaceSettings,
}

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config from {}", path.display()))?;
        let mut config: Config = toml::from_str(&buf)
            .with_context(|| format!("Could not parse config at {}", path.display()))?;
        let issues = config.validate();
        if !issues.is_empty() {
            let fixes = config.auto_fix();
            for issue in &issues {
                tracing::warn!("Config: {issue}");
            }
            tracing::warn!("Config: applied {fixes} automatic fixes");
            let remaining = config.validate();
            if !remaining.is_empty() {
                bail!("Config has unfixable issues: {}", remaining.join("; "));
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.settings.validate();
        issues.extend(self.workspaces.validate());
        issues
    }

    pub fn auto_fix(&mut self) -> usize { self.settings.auto_fix() + self.workspaces.auto_fix() }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Duration of the window-move animation macOS performs, in seconds.
    /// Watcher restarts and focus re-assertion are scheduled just past it.
    #[serde(default = "default_animation_duration")]
    pub animation_duration: f64,
    /// How long focus must rest on a window of another workspace before the
    /// manager follows it there.
    #[serde(default = "default_focus_debounce_ms")]
    pub focus_debounce_ms: u64,
    /// Delay before a newly created window assigned to an inactive workspace
    /// is parked off-screen.
    #[serde(default = "default_park_delay_ms")]
    pub park_delay_ms: u64,
    /// Per-application accessibility messaging timeout for batched moves.
    #[serde(default = "default_ax_timeout_ms")]
    pub ax_timeout_ms: u64,
    #[serde(default)]
    pub layout: LayoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            animation_duration: default_animation_duration(),
            focus_debounce_ms: default_focus_debounce_ms(),
            park_delay_ms: default_park_delay_ms(),
            ax_timeout_ms: default_ax_timeout_ms(),
            layout: LayoutSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.animation_duration < 0.0 {
            issues.push(format!(
                "animation_duration must be non-negative, got {}",
                self.animation_duration
            ));
        }
        if self.ax_timeout_ms == 0 {
            issues.push("ax_timeout_ms must be positive".to_string());
        }
        issues.extend(self.layout.validate());
        issues
    }

    pub fn auto_fix(&mut self) -> usize {
        let mut fixes = 0;
        if self.animation_duration < 0.0 {
            self.animation_duration = default_animation_duration();
            fixes += 1;
        }
        if self.ax_timeout_ms == 0 {
            self.ax_timeout_ms = default_ax_timeout_ms();
            fixes += 1;
        }
        fixes += self.layout.auto_fix();
        fixes
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct LayoutSettings {
    #[serde(default)]
    pub gaps: GapSettings,
    /// Screen area reserved for a status bar that is not ours.
    #[serde(default)]
    pub external_bar: ExternalBar,
    /// Keep the focused column's left neighbor on screen when both fit.
    #[serde(default = "yes")]
    pub sticky_pairs: bool,
    /// Flush the last column against the right canvas edge when focused.
    #[serde(default)]
    pub right_anchor_last: bool,
}

impl LayoutSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.gaps.validate();
        if self.external_bar.top < 0.0 || self.external_bar.bottom < 0.0 {
            issues.push("external_bar offsets must be non-negative".to_string());
        }
        issues
    }

    pub fn auto_fix(&mut self) -> usize {
        let mut fixes = self.gaps.auto_fix();
        if self.external_bar.top < 0.0 {
            self.external_bar.top = 0.0;
            fixes += 1;
        }
        if self.external_bar.bottom < 0.0 {
            self.external_bar.bottom = 0.0;
            fixes += 1;
        }
        fixes
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default, Copy)]
#[serde(deny_unknown_fields)]
pub struct ExternalBar {
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub bottom: f64,
}

/// Gap configuration for window spacing.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct GapSettings {
    /// Space between windows and the screen edges.
    #[serde(default)]
    pub outer: OuterGaps,
    /// Space between adjacent windows.
    #[serde(default)]
    pub inner: InnerGaps,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default, Copy)]
#[serde(deny_unknown_fields)]
pub struct OuterGaps {
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub bottom: f64,
    #[serde(default)]
    pub right: f64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default, Copy)]
#[serde(deny_unknown_fields)]
pub struct InnerGaps {
    /// Horizontal gap between columns.
    #[serde(default)]
    pub horizontal: f64,
    /// Vertical gap between rows of a column.
    #[serde(default)]
    pub vertical: f64,
}

impl GapSettings {
    pub fn uniform(gap: f64) -> GapSettings {
        GapSettings {
            outer: OuterGaps {
                top: gap,
                left: gap,
                bottom: gap,
                right: gap,
            },
            inner: InnerGaps { horizontal: gap, vertical: gap },
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for (name, value) in [
            ("outer.top", self.outer.top),
            ("outer.left", self.outer.left),
            ("outer.bottom", self.outer.bottom),
            ("outer.right", self.outer.right),
            ("inner.horizontal", self.inner.horizontal),
            ("inner.vertical", self.inner.vertical),
        ] {
            if value < 0.0 {
                issues.push(format!("{name} gap must be non-negative, got {value}"));
            }
        }
        issues
    }

    pub fn auto_fix(&mut self) -> usize {
        let mut fixes = 0;
        for value in [
            &mut self.outer.top,
            &mut self.outer.left,
            &mut self.outer.bottom,
            &mut self.outer.right,
            &mut self.inner.horizontal,
            &mut self.inner.vertical,
        ] {
            if *value < 0.0 {
                *value = 0.0;
                fixes += 1;
            }
        }
        fixes
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSettings {
    /// Workspace names in switching order. The first is active at startup.
    #[serde(default = "default_workspace_names")]
    pub names: Vec<String>,
    /// Name of the workspace whose members float instead of tiling.
    #[serde(default)]
    pub scratch: Option<String>,
    /// App title -> workspace name.
    #[serde(default)]
    pub app_rules: HashMap<String, String>,
    /// Window-title patterns -> workspace name; checked before app rules.
    #[serde(default)]
    pub title_rules: Vec<TitleRule>,
    /// category -> workspace name -> target.
    #[serde(default)]
    pub jump_targets: HashMap<String, HashMap<String, JumpTarget>>,
    /// Switching to the current workspace (or jumping to the focused target)
    /// bounces back to the previous jump point.
    #[serde(default)]
    pub toggle_back: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            names: default_workspace_names(),
            scratch: None,
            app_rules: HashMap::default(),
            title_rules: Vec::new(),
            jump_targets: HashMap::default(),
            toggle_back: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TitleRule {
    pub pattern: String,
    pub workspace: String,
}

/// A jump target is either a bare app title (single-process apps) or a
/// detailed form with a title pattern and an optional launch command.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(untagged)]
pub enum JumpTarget {
    App(String),
    Detailed {
        app: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        launch: Option<Vec<String>>,
    },
}

impl JumpTarget {
    pub fn app(&self) -> &str {
        match self {
            JumpTarget::App(app) => app,
            JumpTarget::Detailed { app, .. } => app,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            JumpTarget::App(_) => None,
            JumpTarget::Detailed { title, .. } => title.as_deref(),
        }
    }

    pub fn launch(&self) -> Option<&[String]> {
        match self {
            JumpTarget::App(_) => None,
            JumpTarget::Detailed { launch, .. } => launch.as_deref(),
        }
    }
}

impl WorkspaceSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.names.is_empty() {
            issues.push("at least one workspace name is required".to_string());
        }
        if self.names.len() > MAX_WORKSPACES {
            issues.push(format!("no more than {MAX_WORKSPACES} workspaces are supported"));
        }

        let mut seen = HashSet::default();
        for name in &self.names {
            if !seen.insert(name) {
                issues.push(format!("duplicate workspace name '{name}'"));
            }
        }

        if let Some(scratch) = &self.scratch {
            if !self.names.iter().any(|n| n == scratch) {
                issues.push(format!("scratch workspace '{scratch}' is not in the names list"));
            }
        }

        for (app, workspace) in &self.app_rules {
            if !self.names.iter().any(|n| n == workspace) {
                issues.push(format!(
                    "app rule for '{app}' references unknown workspace '{workspace}'"
                ));
            }
        }

        for (index, rule) in self.title_rules.iter().enumerate() {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                issues.push(format!("title rule {index} has invalid pattern: {e}"));
            }
            if !self.names.iter().any(|n| n == &rule.workspace) {
                issues.push(format!(
                    "title rule {index} references unknown workspace '{}'",
                    rule.workspace
                ));
            }
        }

        for (category, targets) in &self.jump_targets {
            for (workspace, target) in targets {
                if !self.names.iter().any(|n| n == workspace) {
                    issues.push(format!(
                        "jump target {category}/{workspace} references an unknown workspace"
                    ));
                }
                if let Some(title) = target.title() {
                    if let Err(e) = regex::Regex::new(title) {
                        issues.push(format!(
                            "jump target {category}/{workspace} has invalid title pattern: {e}"
                        ));
                    }
                }
            }
        }

        issues
    }

    pub fn auto_fix(&mut self) -> usize {
        let mut fixes = 0;

        if self.names.is_empty() {
            self.names = default_workspace_names();
            fixes += 1;
        }
        if self.names.len() > MAX_WORKSPACES {
            self.names.truncate(MAX_WORKSPACES);
            fixes += 1;
        }

        let mut seen = HashSet::default();
        let before = self.names.len();
        self.names.retain(|name| seen.insert(name.clone()));
        fixes += before - self.names.len();

        if let Some(scratch) = &self.scratch {
            if !self.names.iter().any(|n| n == scratch) {
                self.scratch = None;
                fixes += 1;
            }
        }

        let names = self.names.clone();
        let before = self.app_rules.len();
        self.app_rules.retain(|_, workspace| names.iter().any(|n| n == workspace));
        fixes += before - self.app_rules.len();

        let before = self.title_rules.len();
        self.title_rules.retain(|rule| {
            regex::Regex::new(&rule.pattern).is_ok() && names.iter().any(|n| n == &rule.workspace)
        });
        fixes += before - self.title_rules.len();

        for targets in self.jump_targets.values_mut() {
            let before = targets.len();
            targets.retain(|workspace, target| {
                names.iter().any(|n| n == workspace)
                    && target.title().map_or(true, |t| regex::Regex::new(t).is_ok())
            });
            fixes += before - targets.len();
        }

        fixes
    }

    pub fn is_scratch(&self, name: &str) -> bool { self.scratch.as_deref() == Some(name) }
}

fn yes() -> bool { true }

fn default_animation_duration() -> f64 { 0.2 }

fn default_focus_debounce_ms() -> u64 { 300 }

fn default_park_delay_ms() -> u64 { 100 }

fn default_ax_timeout_ms() -> u64 { 100 }

fn default_workspace_names() -> Vec<String> { vec!["main".to_string()] }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Vec::<String>::new());
    }

    #[test]
    fn parses_full_workspace_config() {
        let toml = r#"
            [settings]
            animation_duration = 0.25

            [settings.layout]
            sticky_pairs = true
            right_anchor_last = true

            [settings.layout.gaps.outer]
            top = 8
            left = 8
            bottom = 8
            right = 8

            [settings.layout.gaps.inner]
            horizontal = 8
            vertical = 8

            [settings.layout.external_bar]
            top = 40

            [workspaces]
            names = ["personal", "work", "scratch"]
            scratch = "scratch"
            toggle_back = true

            [workspaces.app_rules]
            Slack = "work"

            [[workspaces.title_rules]]
            pattern = ".*DevTools.*"
            workspace = "work"

            [workspaces.jump_targets.terminal]
            personal = "WezTerm"
            work = { app = "WezTerm", title = "work$", launch = ["wezterm", "start"] }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.validate(), Vec::<String>::new());
        assert_eq!(config.workspaces.names.len(), 3);
        assert!(config.workspaces.is_scratch("scratch"));
        let terminal = &config.workspaces.jump_targets["terminal"];
        assert_eq!(terminal["personal"].app(), "WezTerm");
        assert_eq!(terminal["work"].title(), Some("work$"));
        assert_eq!(terminal["work"].launch().unwrap().len(), 2);
    }

    #[test]
    fn auto_fix_drops_bad_rules() {
        let mut config = Config::default();
        config.workspaces.names = vec!["a".into(), "a".into(), "b".into()];
        config.workspaces.app_rules.insert("Mail".into(), "nope".into());
        config.workspaces.title_rules.push(TitleRule {
            pattern: "(".into(),
            workspace: "b".into(),
        });
        assert!(!config.validate().is_empty());
        let fixes = config.auto_fix();
        assert!(fixes >= 3);
        assert_eq!(config.validate(), Vec::<String>::new());
        assert_eq!(config.workspaces.names, vec!["a".to_string(), "b".to_string()]);
        assert!(config.workspaces.app_rules.is_empty());
        assert!(config.workspaces.title_rules.is_empty());
    }

    #[test]
    fn negative_gaps_are_fixed() {
        let mut config = Config::default();
        config.settings.layout.gaps.outer.top = -4.0;
        config.settings.layout.gaps.inner.horizontal = -1.0;
        assert_eq!(config.auto_fix(), 2);
        assert_eq!(config.settings.layout.gaps.outer.top, 0.0);
    }
}
