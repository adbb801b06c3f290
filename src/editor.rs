//! # Stage: Markdown Editor Controller
//!
//! ## Responsibility
//! Owns the singleton editor modal: a scratch textarea with a live preview
//! whose text is committed back into the host's chat input on apply.
//!
//! ## Guarantees
//! - At most one modal element exists; it is looked up by id before creation
//! - The host input is only mutated by [`MarkdownEditorController::apply`]
//! - Renderer failures keep the previous preview and never propagate
//! - Escape and Ctrl/Cmd+Enter only act while the modal is open
//! - The backdrop closes the modal only when both `mousedown` and `mouseup`
//!   land on the backdrop itself
//!
//! ## NOT Responsible For
//! - Loading the renderer (that is the script loader)
//! - Injecting the trigger button (that is the injection watcher)
//!
//! ```text
//! closed ──open──► open
//! open ──Escape | backdrop | close button──► closed   (draft discarded)
//! open ──apply | Ctrl/Cmd+Enter──► closed             (draft committed)
//! ```

use std::fmt;

use tracing::{debug, error, info};

use crate::config::EditorConfig;
use crate::dom::HostDom;
use crate::error::AugmentError;
use crate::render::MarkdownRenderer;

const CONTAINER_CLASS: &str = "editor-container";
const INPUT_CLASS: &str = "editor-input";
const PREVIEW_CLASS: &str = "markdown-preview";
const CLOSE_CLASS: &str = "close-btn";
const APPLY_CLASS: &str = "apply-btn";

const TITLE: &str = "Markdown编辑器";
const CLOSE_TITLE: &str = "关闭 (Esc)";
const APPLY_TITLE: &str = "应用更改 (Ctrl+Enter)";
const APPLY_LABEL: &str = "应用";
const PLACEHOLDER: &str = "在这里输入 Markdown 内容...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Closed,
    Open,
}

impl fmt::Display for EditorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditorState::Closed => write!(f, "closed"),
            EditorState::Open => write!(f, "open"),
        }
    }
}

/// Draft text and open/closed state of the one editor session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorSession {
    pub draft: String,
    pub state: EditorState,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self {
            draft: String::new(),
            state: EditorState::Closed,
        }
    }
}

impl EditorSession {
    pub fn is_open(&self) -> bool {
        self.state == EditorState::Open
    }
}

/// A key press as seen by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
}

impl KeyInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: false,
            meta: false,
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

/// Editor-owned element a click landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorTarget {
    Trigger,
    CloseButton,
    ApplyButton,
}

pub struct MarkdownEditorController {
    config: EditorConfig,
    session: EditorSession,
    backdrop_armed: bool,
}

impl MarkdownEditorController {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            config,
            session: EditorSession::default(),
            backdrop_armed: false,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn session(&self) -> &EditorSession {
        &self.session
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    // -- modal construction ------------------------------------------------

    /// Find the modal by id or build it once.
    pub fn ensure_modal<D: HostDom>(&self, dom: &mut D) -> Result<D::Node, AugmentError> {
        if let Some(existing) = dom.element_by_id(&self.config.modal_id) {
            return Ok(existing);
        }
        let body = dom.body().ok_or_else(|| AugmentError::host_missing("body"))?;

        let modal = dom
            .create_element("div")
            .ok_or_else(|| AugmentError::Dom("editor modal".into()))?;
        dom.set_attribute(&modal, "id", &self.config.modal_id);

        let container = child(dom, &modal, "div", CONTAINER_CLASS)?;
        let header = child(dom, &container, "div", "editor-header")?;
        let title = child(dom, &header, "div", "editor-title")?;
        dom.set_inner_text(&title, TITLE);
        let close = child(dom, &header, "button", CLOSE_CLASS)?;
        dom.set_attribute(&close, "title", CLOSE_TITLE);
        dom.set_inner_html(&close, "&times;");

        let editor_body = child(dom, &container, "div", "editor-body")?;
        let input = child(dom, &editor_body, "textarea", INPUT_CLASS)?;
        dom.set_attribute(&input, "placeholder", PLACEHOLDER);
        let pane = child(dom, &editor_body, "div", "preview-pane")?;
        child(dom, &pane, "div", PREVIEW_CLASS)?;

        let footer = child(dom, &container, "div", "editor-footer")?;
        let apply = child(dom, &footer, "button", APPLY_CLASS)?;
        dom.set_attribute(&apply, "title", APPLY_TITLE);
        dom.set_inner_text(&apply, APPLY_LABEL);

        dom.append_child(&body, &modal);
        debug!(id = %self.config.modal_id, "editor modal created");
        Ok(modal)
    }

    fn modal<D: HostDom>(&self, dom: &D) -> Option<D::Node> {
        dom.element_by_id(&self.config.modal_id)
    }

    fn part<D: HostDom>(&self, dom: &D, class: &str) -> Option<D::Node> {
        let modal = self.modal(dom)?;
        dom.query_within(&modal, &format!(".{class}")).into_iter().next()
    }

    fn host_input<D: HostDom>(&self, dom: &D) -> Result<D::Node, AugmentError> {
        dom.query(&self.config.chat_input_selector)
            .ok_or_else(|| AugmentError::host_missing(&self.config.chat_input_selector))
    }

    // -- transitions -------------------------------------------------------

    /// `closed → open`. Fails loudly when the renderer is missing or the host
    /// input cannot be found.
    pub fn open<D: HostDom>(
        &mut self,
        dom: &mut D,
        renderer: Option<&dyn MarkdownRenderer>,
    ) -> Result<(), AugmentError> {
        let Some(renderer) = renderer else {
            error!("markdown editor dependencies not ready");
            dom.alert(&self.config.not_ready_message);
            return Err(AugmentError::DependenciesNotReady);
        };
        let host = self.host_input(dom).map_err(|e| {
            error!(error = %e, "chat input not found when opening editor");
            e
        })?;

        let modal = self.ensure_modal(dom)?;
        let draft = dom.inner_text(&host).trim().to_string();
        if let Some(input) = self.part(dom, INPUT_CLASS) {
            dom.set_value(&input, &draft);
        }
        self.session.draft = draft;
        self.render_preview(dom, renderer);
        dom.add_class(&modal, &self.config.active_class);
        if let Some(input) = self.part(dom, INPUT_CLASS) {
            dom.focus(&input);
        }
        self.session.state = EditorState::Open;
        debug!("editor opened");
        Ok(())
    }

    /// `open → closed` without touching the host input.
    pub fn close<D: HostDom>(&mut self, dom: &mut D) {
        if let Some(modal) = self.modal(dom) {
            dom.remove_class(&modal, &self.config.active_class);
        }
        self.session.state = EditorState::Closed;
        self.session.draft.clear();
        self.backdrop_armed = false;
    }

    /// Open when closed, close when open.
    pub fn toggle<D: HostDom>(
        &mut self,
        dom: &mut D,
        renderer: Option<&dyn MarkdownRenderer>,
    ) -> Result<EditorState, AugmentError> {
        if self.is_open() {
            self.close(dom);
        } else {
            self.open(dom, renderer)?;
        }
        Ok(self.session.state)
    }

    /// Commit the draft into the host input and close.
    ///
    /// If the host input vanished since the editor opened, nothing is
    /// written and the modal stays open so the draft survives.
    pub fn apply<D: HostDom>(&mut self, dom: &mut D) -> Result<(), AugmentError> {
        if !self.is_open() {
            return Ok(());
        }
        let text = self
            .part(dom, INPUT_CLASS)
            .map(|input| dom.value(&input))
            .unwrap_or_else(|| self.session.draft.clone());
        let host = self.host_input(dom).map_err(|e| {
            error!(error = %e, "chat input disappeared before apply");
            e
        })?;

        dom.set_inner_text(&host, &text);
        if !text.trim().is_empty() {
            dom.remove_class(&host, &self.config.host_empty_class);
            for placeholder in dom.query_within(&host, &self.config.host_placeholder_selector) {
                dom.remove_class(&placeholder, &self.config.host_placeholder_class);
            }
        }
        dom.dispatch_input(&host);
        self.close(dom);
        dom.focus(&host);
        info!(chars = text.chars().count(), "editor draft applied");
        Ok(())
    }

    // -- events ------------------------------------------------------------

    /// Draft textarea changed: re-render the preview.
    pub fn on_input<D: HostDom>(&mut self, dom: &mut D, renderer: Option<&dyn MarkdownRenderer>) {
        if let Some(input) = self.part(dom, INPUT_CLASS) {
            self.session.draft = dom.value(&input);
        }
        if let Some(renderer) = renderer {
            self.render_preview(dom, renderer);
        }
    }

    fn render_preview<D: HostDom>(&self, dom: &mut D, renderer: &dyn MarkdownRenderer) {
        let Some(preview) = self.part(dom, PREVIEW_CLASS) else {
            return;
        };
        match renderer.render(&self.session.draft) {
            Ok(html) => dom.set_inner_html(&preview, &html),
            Err(e) => debug!(error = %e, "preview render failed, keeping previous preview"),
        }
    }

    /// `true` when `node` is the editor's draft textarea.
    pub fn is_draft_input<D: HostDom>(&self, dom: &D, node: &D::Node) -> bool {
        self.part(dom, INPUT_CLASS).as_ref() == Some(node)
    }

    pub fn on_mouse_down<D: HostDom>(&mut self, dom: &D, target: &D::Node) {
        self.backdrop_armed = self.modal(dom).as_ref() == Some(target);
    }

    /// Returns `true` when the release closed the modal.
    pub fn on_mouse_up<D: HostDom>(&mut self, dom: &mut D, target: &D::Node) -> bool {
        let armed = std::mem::take(&mut self.backdrop_armed);
        if armed && self.is_open() && self.modal(dom).as_ref() == Some(target) {
            self.close(dom);
            return true;
        }
        false
    }

    /// Keyboard shortcuts. Returns `true` when the key was consumed and the
    /// page's default action should be prevented.
    pub fn on_key<D: HostDom>(&mut self, dom: &mut D, key: &KeyInput) -> Result<bool, AugmentError> {
        if !self.is_open() {
            return Ok(false);
        }
        if key.key == "Escape" {
            self.close(dom);
            return Ok(true);
        }
        if key.key == "Enter" && (key.ctrl || key.meta) {
            self.apply(dom)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Classify a click target against the editor's own controls.
    pub fn target_of<D: HostDom>(&self, dom: &D, target: &D::Node) -> Option<EditorTarget> {
        let trigger = format!("#{}", self.config.button_id);
        if dom.closest(target, &trigger).is_some() {
            return Some(EditorTarget::Trigger);
        }
        let modal = format!("#{}", self.config.modal_id);
        dom.closest(target, &modal)?;
        if dom.closest(target, &format!(".{CLOSE_CLASS}")).is_some() {
            return Some(EditorTarget::CloseButton);
        }
        if dom.closest(target, &format!(".{APPLY_CLASS}")).is_some() {
            return Some(EditorTarget::ApplyButton);
        }
        None
    }
}

fn child<D: HostDom>(
    dom: &mut D,
    parent: &D::Node,
    tag: &str,
    class: &str,
) -> Result<D::Node, AugmentError> {
    let node = dom
        .create_element(tag)
        .ok_or_else(|| AugmentError::Dom(format!("<{tag} class=\"{class}\">")))?;
    dom.add_class(&node, class);
    dom.append_child(parent, &node);
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::memory::{DomEffect, MemoryDom, NodeId};
    use crate::error::RenderError;
    use crate::render::CmarkRenderer;

    struct Page {
        dom: MemoryDom,
        input: NodeId,
        editor: MarkdownEditorController,
    }

    fn page(text: &str) -> Page {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let input = dom.add(body, "div#chat-input.is-editor-empty");
        dom.set_text(input, text);
        Page {
            dom,
            input,
            editor: MarkdownEditorController::new(EditorConfig::default()),
        }
    }

    fn textarea(p: &Page) -> NodeId {
        p.dom.query("textarea.editor-input").unwrap()
    }

    fn preview(p: &Page) -> NodeId {
        p.dom.query("div.markdown-preview").unwrap()
    }

    #[test]
    fn open_builds_modal_once_and_seeds_draft() {
        let mut p = page("  hello  ");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        assert!(p.editor.is_open());
        assert_eq!(p.editor.session().draft, "hello");
        assert_eq!(p.dom.value(&textarea(&p)), "hello");
        assert!(p.dom.inner_html(preview(&p)).contains("<p>hello</p>"));

        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        assert_eq!(p.dom.count("#markdown-editor-modal"), 1);
        let modal = p.dom.element_by_id("markdown-editor-modal").unwrap();
        assert!(p.dom.has_class(&modal, "active"));
    }

    #[test]
    fn open_without_renderer_alerts() {
        let mut p = page("x");
        let err = p.editor.open(&mut p.dom, None).unwrap_err();
        assert_eq!(err, AugmentError::DependenciesNotReady);
        assert_eq!(p.dom.alerts().len(), 1);
        assert!(!p.editor.is_open());
    }

    #[test]
    fn open_without_host_input_fails() {
        let mut dom = MemoryDom::new();
        let mut editor = MarkdownEditorController::new(EditorConfig::default());
        let err = editor.open(&mut dom, Some(&CmarkRenderer)).unwrap_err();
        assert!(matches!(err, AugmentError::HostElementMissing { .. }));
        assert_eq!(dom.count("#markdown-editor-modal"), 0);
    }

    #[test]
    fn apply_commits_text_and_notifies_host() {
        let mut p = page("");
        p.dom.add(p.input, "p.is-empty");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        let ta = textarea(&p);
        p.dom.set_value(&ta, "# Hi");
        p.editor.on_input(&mut p.dom, Some(&CmarkRenderer));
        assert!(p.dom.inner_html(preview(&p)).contains("<h1>Hi</h1>"));

        p.editor.apply(&mut p.dom).unwrap();
        assert_eq!(p.dom.inner_text(&p.input), "# Hi");
        assert!(!p.dom.has_class(&p.input, "is-editor-empty"));
        assert_eq!(p.dom.input_events_on(p.input), 1);
        assert!(!p.editor.is_open());
        assert_eq!(p.dom.effects().last(), Some(&DomEffect::Focused(p.input)));
    }

    #[test]
    fn apply_with_blank_draft_keeps_empty_marker() {
        let mut p = page("");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        p.editor.apply(&mut p.dom).unwrap();
        assert!(p.dom.has_class(&p.input, "is-editor-empty"));
        assert_eq!(p.dom.input_events_on(p.input), 1);
    }

    #[test]
    fn close_discards_draft() {
        let mut p = page("original");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        let ta = textarea(&p);
        p.dom.set_value(&ta, "changed");
        p.editor.on_input(&mut p.dom, Some(&CmarkRenderer));
        p.editor.close(&mut p.dom);
        assert_eq!(p.dom.inner_text(&p.input), "original");
        assert_eq!(p.dom.input_events_on(p.input), 0);
        assert_eq!(p.editor.session().draft, "");
    }

    #[test]
    fn apply_keeps_modal_open_when_host_input_vanished() {
        let mut p = page("x");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        p.dom.remove(p.input);
        let err = p.editor.apply(&mut p.dom).unwrap_err();
        assert!(matches!(err, AugmentError::HostElementMissing { .. }));
        assert!(p.editor.is_open());
    }

    #[test]
    fn render_failure_keeps_previous_preview() {
        let mut p = page("ok");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        let pane = preview(&p);
        let before = p.dom.inner_html(pane).to_string();
        let broken = |_: &str| -> Result<String, RenderError> { Err(RenderError("boom".into())) };
        let ta = textarea(&p);
        p.dom.set_value(&ta, "changed");
        p.editor.on_input(&mut p.dom, Some(&broken));
        assert_eq!(p.dom.inner_html(pane), before);
        assert_eq!(p.editor.session().draft, "changed");
    }

    #[test]
    fn escape_only_acts_while_open() {
        let mut p = page("keep");
        let esc = KeyInput::new("Escape");
        assert_eq!(p.editor.on_key(&mut p.dom, &esc), Ok(false));
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        assert_eq!(p.editor.on_key(&mut p.dom, &esc), Ok(true));
        assert!(!p.editor.is_open());
        assert_eq!(p.dom.inner_text(&p.input), "keep");
    }

    #[test]
    fn ctrl_or_cmd_enter_applies() {
        for key in [KeyInput::new("Enter").with_ctrl(), KeyInput::new("Enter").with_meta()] {
            let mut p = page("");
            p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
            let ta = textarea(&p);
            p.dom.set_value(&ta, "text");
            assert_eq!(p.editor.on_key(&mut p.dom, &key), Ok(true));
            assert_eq!(p.dom.inner_text(&p.input), "text");
        }
        let mut p = page("");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        assert_eq!(p.editor.on_key(&mut p.dom, &KeyInput::new("Enter")), Ok(false));
        assert!(p.editor.is_open());
    }

    #[test]
    fn backdrop_requires_press_and_release_on_backdrop() {
        let mut p = page("");
        p.editor.open(&mut p.dom, Some(&CmarkRenderer)).unwrap();
        let modal = p.dom.element_by_id("markdown-editor-modal").unwrap();
        let ta = textarea(&p);

        // Drag from inside the editor released on the backdrop.
        p.editor.on_mouse_down(&p.dom, &ta);
        assert!(!p.editor.on_mouse_up(&mut p.dom, &modal));
        assert!(p.editor.is_open());

        // Press on the backdrop released inside the editor.
        p.editor.on_mouse_down(&p.dom, &modal);
        assert!(!p.editor.on_mouse_up(&mut p.dom, &ta));
        assert!(p.editor.is_open());

        p.editor.on_mouse_down(&p.dom, &modal);
        assert!(p.editor.on_mouse_up(&mut p.dom, &modal));
        assert!(!p.editor.is_open());
    }

    #[test]
    fn click_targets_are_classified() {
        let mut p = page("");
        p.editor.ensure_modal(&mut p.dom).unwrap();
        let close = p.dom.query(".close-btn").unwrap();
        let apply = p.dom.query(".apply-btn").unwrap();
        let body = p.dom.body_id();
        let trigger = p.dom.add(body, "button#custom-markdown-edit-btn");
        let icon = p.dom.add(trigger, "svg");
        assert_eq!(p.editor.target_of(&p.dom, &close), Some(EditorTarget::CloseButton));
        assert_eq!(p.editor.target_of(&p.dom, &apply), Some(EditorTarget::ApplyButton));
        assert_eq!(p.editor.target_of(&p.dom, &icon), Some(EditorTarget::Trigger));
        assert_eq!(p.editor.target_of(&p.dom, &p.input), None);
    }

    #[test]
    fn toggle_flips_state() {
        let mut p = page("");
        assert_eq!(p.editor.toggle(&mut p.dom, Some(&CmarkRenderer)), Ok(EditorState::Open));
        assert_eq!(p.editor.toggle(&mut p.dom, Some(&CmarkRenderer)), Ok(EditorState::Closed));
    }
}
