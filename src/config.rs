//! Engine configuration.
//!
//! Every selector, element id and constant the engine depends on lives here
//! so a host UI that renames its markup can be followed without a rebuild.
//! Defaults reproduce the stock chat UI. Configuration is read from TOML on
//! native targets and from the same shape as JSON in the browser.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AugmentError;

/// Height in pixels above which a code block is collapsed.
pub const DEFAULT_COLLAPSE_THRESHOLD_PX: f64 = 400.0;

/// Top-level configuration for [`AugmentEngine`](crate::engine::AugmentEngine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub route: RouteConfig,
    pub code_blocks: CodeBlockConfig,
    pub editor: EditorConfig,
    pub scripts: DependencyManifest,
}

impl AugmentConfig {
    /// Parse a TOML document. Missing tables and keys fall back to defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, AugmentError> {
        let cfg: AugmentConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON document (browser entry point).
    pub fn from_json_str(s: &str) -> Result<Self, AugmentError> {
        let cfg: AugmentConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render as TOML, e.g. to seed a config file.
    pub fn to_toml_string(&self) -> Result<String, AugmentError> {
        toml::to_string_pretty(self).map_err(|e| AugmentError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AugmentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AugmentError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> Result<(), AugmentError> {
        let t = self.code_blocks.collapse_threshold_px;
        if !t.is_finite() || t <= 0.0 {
            return Err(AugmentError::Config(format!(
                "code_blocks.collapse_threshold_px must be a positive number, got {t}"
            )));
        }
        if self.route.suppressed_fragment.is_empty() {
            return Err(AugmentError::Config(
                "route.suppressed_fragment must not be empty".into(),
            ));
        }
        for (name, value) in [
            ("code_blocks.block_selector", &self.code_blocks.block_selector),
            ("editor.chat_input_selector", &self.editor.chat_input_selector),
            ("editor.anchor_selector", &self.editor.anchor_selector),
            ("editor.button_id", &self.editor.button_id),
            ("editor.modal_id", &self.editor.modal_id),
        ] {
            if value.trim().is_empty() {
                return Err(AugmentError::Config(format!("{name} must not be empty")));
            }
        }
        if self.scripts.renderer.url.is_empty() || self.scripts.highlighter.url.is_empty() {
            return Err(AugmentError::Config(
                "scripts.renderer.url and scripts.highlighter.url are required".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// A location containing this fragment suppresses code-block augmentation.
    pub suppressed_fragment: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            suppressed_fragment: "/functions".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Code blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeBlockConfig {
    pub block_selector: String,
    pub scroller_selector: String,
    /// Wrapper around one rendered message; its parent is scrolled into view
    /// when a block re-collapses.
    pub message_wrapper_selector: String,
    pub control_class: String,
    pub collapse_threshold_px: f64,
}

impl Default for CodeBlockConfig {
    fn default() -> Self {
        Self {
            block_selector: ".cm-editor".into(),
            scroller_selector: ".cm-scroller".into(),
            message_wrapper_selector: ".relative.my-2".into(),
            control_class: "code-expand-btn".into(),
            collapse_threshold_px: DEFAULT_COLLAPSE_THRESHOLD_PX,
        }
    }
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub chat_input_selector: String,
    /// Voice-input button; the trigger is inserted before its `.flex` container.
    pub anchor_selector: String,
    pub anchor_container_selector: String,
    pub button_id: String,
    pub modal_id: String,
    /// Class on the modal root while it is shown.
    pub active_class: String,
    /// Class the host puts on an empty chat input.
    pub host_empty_class: String,
    /// Placeholder paragraph the host renders inside an empty chat input.
    pub host_placeholder_selector: String,
    pub host_placeholder_class: String,
    /// Shown when the editor is opened without its renderer.
    pub not_ready_message: String,
    /// Shown once when a required dependency fails to load.
    pub load_failed_message: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            chat_input_selector: "#chat-input".into(),
            anchor_selector: "#voice-input-button".into(),
            anchor_container_selector: ".flex".into(),
            button_id: "custom-markdown-edit-btn".into(),
            modal_id: "markdown-editor-modal".into(),
            active_class: "active".into(),
            host_empty_class: "is-editor-empty".into(),
            host_placeholder_selector: "p.is-empty".into(),
            host_placeholder_class: "is-empty".into(),
            not_ready_message: "编辑器依赖未能加载，请检查网络连接或控制台错误。".into(),
            load_failed_message: "Markdown 编辑器依赖加载失败，请刷新页面重试。".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// One script resource, optionally tied to the window global it defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub url: String,
    /// When this global already exists on `window` the load is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
}

impl ScriptSpec {
    pub fn new(url: impl Into<String>, global: Option<&str>) -> Self {
        Self {
            url: url.into(),
            global: global.map(str::to_string),
        }
    }
}

/// Scripts the editor needs: a required renderer and highlighter plus
/// optional highlighter language packs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyManifest {
    pub languages: Vec<String>,
    pub renderer: ScriptSpec,
    pub highlighter: ScriptSpec,
}

impl Default for DependencyManifest {
    fn default() -> Self {
        Self {
            renderer: ScriptSpec::new("/static/markdown-it.min.js", Some("markdownit")),
            highlighter: ScriptSpec::new("/static/highlight.min.js", Some("hljs")),
            languages: vec![
                "/static/go.min.js".into(),
                "/static/rust.min.js".into(),
                "/static/typescript.min.js".into(),
                "/static/python.min.js".into(),
            ],
        }
    }
}
