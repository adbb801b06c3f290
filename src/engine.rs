//! # Stage: Augment Engine
//!
//! ## Responsibility
//! Owns every component plus the host DOM and routes page events to them.
//! This is the only place that knows how the components relate: the route
//! gate drives the code-block observer, dependency readiness enables the
//! trigger injection, and clicks are dispatched by target.
//!
//! ## Guarantees
//! - Route state is recomputed before any observer decision for the same
//!   navigation
//! - Code-block work never runs on the suppressed route; injection and the
//!   editor are never gated by route
//! - Events delivered before [`AugmentEngine::start`] or after
//!   [`AugmentEngine::stop`] are ignored
//! - No event handler panics or propagates an error to the caller; failures
//!   are logged and the affected feature degrades
//!
//! ## NOT Responsible For
//! - Wiring browser listeners (see the `browser` module)
//! - Loading scripts (see [`ScriptLoader`](crate::script_loader::ScriptLoader))

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::code_blocks::{CodeBlockAugmenter, ScanReport};
use crate::config::AugmentConfig;
use crate::dom::{BlockState, HostDom, ObserverKind};
use crate::editor::{EditorTarget, KeyInput, MarkdownEditorController};
use crate::error::AugmentError;
use crate::injection::{InjectionOutcome, InjectionWatcher};
use crate::render::MarkdownRenderer;
use crate::route::{RouteGate, RouteTransition};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Readiness of the editor's third-party scripts.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyState {
    Pending,
    Ready,
    Failed(String),
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyState::Pending => write!(f, "pending"),
            DependencyState::Ready => write!(f, "ready"),
            DependencyState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Idle => write!(f, "idle"),
            Lifecycle::Running => write!(f, "running"),
            Lifecycle::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything the page can tell the engine. `N` is the host's node handle.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent<N> {
    /// One structural-observer batch: the nodes added, in delivery order.
    Mutations { kind: ObserverKind, added: Vec<N> },
    /// Size-observer notification for registered blocks.
    Resized { targets: Vec<N> },
    /// `pushState` or `popstate` moved the page to `location`.
    Navigated { location: String },
    /// The frame requested through `HostDom::request_animation_frame`.
    AnimationFrame,
    KeyDown(KeyInput),
    MouseDown { target: N },
    MouseUp { target: N },
    Click { target: N },
    Input { target: N },
}

/// What the browser listener should do with the original event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub prevent_default: bool,
}

impl EventOutcome {
    fn consumed() -> Self {
        Self {
            prevent_default: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct AugmentEngine<D: HostDom> {
    dom: D,
    config: AugmentConfig,
    route: RouteGate,
    code_blocks: CodeBlockAugmenter,
    editor: MarkdownEditorController,
    injection: InjectionWatcher,
    dependencies: DependencyState,
    lifecycle: Lifecycle,
    renderer: Option<Box<dyn MarkdownRenderer>>,
}

impl<D: HostDom> AugmentEngine<D> {
    pub fn new(dom: D, config: AugmentConfig) -> Self {
        Self {
            route: RouteGate::new(config.route.suppressed_fragment.clone()),
            code_blocks: CodeBlockAugmenter::new(config.code_blocks.clone()),
            editor: MarkdownEditorController::new(config.editor.clone()),
            injection: InjectionWatcher::new(config.editor.clone()),
            dependencies: DependencyState::Pending,
            lifecycle: Lifecycle::Idle,
            renderer: None,
            dom,
            config,
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn dom(&self) -> &D {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    pub fn route(&self) -> &RouteGate {
        &self.route
    }

    pub fn code_blocks(&self) -> &CodeBlockAugmenter {
        &self.code_blocks
    }

    pub fn editor(&self) -> &MarkdownEditorController {
        &self.editor
    }

    pub fn injection(&self) -> &InjectionWatcher {
        &self.injection
    }

    pub fn dependency_state(&self) -> &DependencyState {
        &self.dependencies
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    // -- lifecycle ---------------------------------------------------------

    /// Begin augmenting the page currently at `location`.
    ///
    /// The code-block observer connects (with one initial scan) only when
    /// the route allows it. Injection starts here if dependencies are
    /// already ready, otherwise in [`dependencies_ready`](Self::dependencies_ready).
    pub fn start(&mut self, location: &str) {
        if self.lifecycle == Lifecycle::Running {
            return;
        }
        self.lifecycle = Lifecycle::Running;
        self.route.navigate(location);
        if self.route.is_suppressed() {
            debug!(location, "starting on suppressed route");
        } else {
            self.code_blocks.connect(&mut self.dom);
            self.code_blocks.rescan(&mut self.dom);
        }
        if self.dependencies == DependencyState::Ready {
            self.enable_editor();
        }
        info!(location, suppressed = self.route.is_suppressed(), "augment engine started");
    }

    /// Tear down every observer and close the editor. Controls and the
    /// trigger button already in the page stay where they are.
    pub fn stop(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            return;
        }
        self.code_blocks.shutdown(&mut self.dom);
        self.injection.disconnect(&mut self.dom);
        if self.editor.is_open() {
            self.editor.close(&mut self.dom);
        }
        self.lifecycle = Lifecycle::Stopped;
        info!("augment engine stopped");
    }

    /// The renderer and highlighter are loaded: enable the editor.
    pub fn dependencies_ready<R>(&mut self, renderer: R)
    where
        R: MarkdownRenderer + 'static,
    {
        self.renderer = Some(Box::new(renderer));
        self.dependencies = DependencyState::Ready;
        if self.lifecycle == Lifecycle::Running {
            self.enable_editor();
        }
    }

    /// A required script failed. The editor stays disabled until reload.
    /// Recoverable errors are logged and leave the state unchanged.
    pub fn dependencies_failed(&mut self, err: &AugmentError) {
        if err.is_recoverable() {
            warn!(error = %err, "editor dependency degraded");
            return;
        }
        if matches!(self.dependencies, DependencyState::Failed(_)) {
            return;
        }
        error!(error = %err, "markdown editor disabled");
        self.dom.alert(&self.config.editor.load_failed_message);
        self.dependencies = DependencyState::Failed(err.to_string());
    }

    fn enable_editor(&mut self) {
        self.injection.connect(&mut self.dom);
        self.injection.reconcile(&mut self.dom);
    }

    // -- events ------------------------------------------------------------

    pub fn handle(&mut self, event: PageEvent<D::Node>) -> EventOutcome {
        if self.lifecycle != Lifecycle::Running {
            return EventOutcome::default();
        }
        match event {
            PageEvent::Mutations { kind, added } => {
                self.on_mutations(kind, &added);
                EventOutcome::default()
            }
            PageEvent::Resized { targets } => {
                if !self.route.is_suppressed() {
                    for block in &targets {
                        self.code_blocks.measure(&mut self.dom, block);
                    }
                }
                EventOutcome::default()
            }
            PageEvent::Navigated { location } => {
                self.navigate(&location);
                EventOutcome::default()
            }
            PageEvent::AnimationFrame => {
                if !self.route.is_suppressed() {
                    if let Some(report) = self.code_blocks.on_animation_frame(&mut self.dom) {
                        log_scan("frame rescan", report);
                    }
                }
                EventOutcome::default()
            }
            PageEvent::KeyDown(key) => match self.editor.on_key(&mut self.dom, &key) {
                Ok(true) => EventOutcome::consumed(),
                Ok(false) => EventOutcome::default(),
                Err(e) => {
                    warn!(error = %e, key = %key.key, "editor shortcut failed");
                    EventOutcome::consumed()
                }
            },
            PageEvent::MouseDown { target } => {
                self.editor.on_mouse_down(&self.dom, &target);
                EventOutcome::default()
            }
            PageEvent::MouseUp { target } => {
                self.editor.on_mouse_up(&mut self.dom, &target);
                EventOutcome::default()
            }
            PageEvent::Click { target } => self.on_click(&target),
            PageEvent::Input { target } => {
                if self.editor.is_open() && self.editor.is_draft_input(&self.dom, &target) {
                    self.editor.on_input(&mut self.dom, self.renderer.as_deref());
                }
                EventOutcome::default()
            }
        }
    }

    /// Recompute the route, then reconcile the code-block observer.
    ///
    /// Every navigation that lands on an allowed route rescans, not only the
    /// one leaving the suppressed route.
    pub fn navigate(&mut self, location: &str) -> RouteTransition {
        let transition = self.route.navigate(location);
        if transition.lands_allowed() {
            self.code_blocks.connect(&mut self.dom);
            let report = self.code_blocks.rescan(&mut self.dom);
            log_scan("navigation rescan", report);
        } else {
            self.code_blocks.disconnect(&mut self.dom);
        }
        debug!(location, %transition, "navigated");
        transition
    }

    fn on_mutations(&mut self, kind: ObserverKind, added: &[D::Node]) {
        match kind {
            ObserverKind::CodeBlocks => {
                if self.route.is_suppressed() || !self.code_blocks.is_observing() {
                    return;
                }
                let report = self.code_blocks.on_added(&mut self.dom, added);
                if report.registered > 0 {
                    log_scan("mutation batch", report);
                }
            }
            ObserverKind::Injection => {
                if self.dependencies != DependencyState::Ready {
                    return;
                }
                if self.injection.reconcile(&mut self.dom) == InjectionOutcome::Injected {
                    debug!("trigger re-injected after host re-render");
                }
            }
        }
    }

    fn on_click(&mut self, target: &D::Node) -> EventOutcome {
        match self.editor.target_of(&self.dom, target) {
            Some(EditorTarget::Trigger) => {
                if let Err(e) = self.editor.toggle(&mut self.dom, self.renderer.as_deref()) {
                    debug!(error = %e, "editor toggle failed");
                }
                return EventOutcome::consumed();
            }
            Some(EditorTarget::CloseButton) => {
                self.editor.close(&mut self.dom);
                return EventOutcome::consumed();
            }
            Some(EditorTarget::ApplyButton) => {
                if let Err(e) = self.editor.apply(&mut self.dom) {
                    debug!(error = %e, "apply aborted");
                }
                return EventOutcome::consumed();
            }
            None => {}
        }

        let selector = format!(".{}", self.config.code_blocks.control_class);
        if let Some(control) = self.dom.closest(target, &selector) {
            if let Some(state) = self.code_blocks.toggle(&mut self.dom, &control) {
                debug!(%state, "code block control clicked");
            }
        }
        EventOutcome::default()
    }

    /// Current collapse state of `block`, if it has one.
    pub fn block_state(&self, block: &D::Node) -> Option<BlockState> {
        BlockState::read(&self.dom, block)
    }
}

fn log_scan(what: &str, report: ScanReport) {
    debug!(
        registered = report.registered,
        collapsed = report.collapsed,
        "{what}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::memory::MemoryDom;
    use crate::error::LoadFailure;
    use crate::render::CmarkRenderer;

    fn engine() -> AugmentEngine<MemoryDom> {
        AugmentEngine::new(MemoryDom::new(), AugmentConfig::default())
    }

    #[test]
    fn events_before_start_are_ignored() {
        let mut e = engine();
        let out = e.handle(PageEvent::KeyDown(KeyInput::new("Escape")));
        assert_eq!(out, EventOutcome::default());
        assert_eq!(e.lifecycle(), Lifecycle::Idle);
    }

    #[test]
    fn start_on_suppressed_route_leaves_code_observer_off() {
        let mut e = engine();
        e.start("/workspace/functions");
        assert!(!e.dom().observer_active(ObserverKind::CodeBlocks));
        assert_eq!(e.code_blocks().rescans(), 0);
    }

    #[test]
    fn start_is_idempotent() {
        let mut e = engine();
        e.start("/");
        e.start("/");
        assert_eq!(e.dom().observer_connects(ObserverKind::CodeBlocks), 1);
        assert_eq!(e.code_blocks().rescans(), 1);
    }

    #[test]
    fn injection_waits_for_dependencies() {
        let mut e = engine();
        e.start("/");
        assert!(!e.dom().observer_active(ObserverKind::Injection));
        e.dependencies_ready(CmarkRenderer);
        assert!(e.dom().observer_active(ObserverKind::Injection));
        assert_eq!(e.dependency_state(), &DependencyState::Ready);
    }

    #[test]
    fn ready_before_start_enables_on_start() {
        let mut e = engine();
        e.dependencies_ready(CmarkRenderer);
        assert!(!e.dom().observer_active(ObserverKind::Injection));
        e.start("/");
        assert!(e.dom().observer_active(ObserverKind::Injection));
    }

    #[test]
    fn dependency_failure_alerts_once() {
        let mut e = engine();
        e.start("/");
        let err = AugmentError::DependencyLoad(LoadFailure::new("/md.js", "404"));
        e.dependencies_failed(&err);
        e.dependencies_failed(&err);
        assert_eq!(e.dom().alerts().len(), 1);
        assert!(matches!(e.dependency_state(), DependencyState::Failed(_)));
        assert!(!e.dom().observer_active(ObserverKind::Injection));
    }

    #[test]
    fn optional_failure_does_not_disable_editor() {
        let mut e = engine();
        e.start("/");
        let err = AugmentError::OptionalDependency(LoadFailure::new("/go.min.js", "404"));
        e.dependencies_failed(&err);
        assert!(e.dom().alerts().is_empty());
        assert_eq!(e.dependency_state(), &DependencyState::Pending);
    }

    #[test]
    fn stop_disconnects_everything() {
        let mut e = engine();
        e.dependencies_ready(CmarkRenderer);
        e.start("/");
        e.stop();
        assert_eq!(e.lifecycle(), Lifecycle::Stopped);
        assert!(!e.dom().observer_active(ObserverKind::CodeBlocks));
        assert!(!e.dom().observer_active(ObserverKind::Injection));
    }

    #[test]
    fn display_impls() {
        assert_eq!(Lifecycle::Running.to_string(), "running");
        assert_eq!(DependencyState::Failed("x".into()).to_string(), "failed: x");
    }
}
