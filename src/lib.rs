//! # chat-augment
//!
//! Augments a hosted single-page chat UI it does not own with two features:
//!
//! 1. **Collapsible code blocks**: code editors taller than a threshold get
//!    a fixed height and one expand/collapse control.
//! 2. **Markdown editor**: a modal scratch editor with live preview whose
//!    text is written back into the host's chat input on apply.
//!
//! Everything is driven by one [`AugmentEngine`] that talks to the page only
//! through the [`HostDom`] trait. The `wasm` feature wires it to a real
//! browser page; [`dom::memory::MemoryDom`] runs it headless.
//!
//! ```text
//! ScriptLoader ──ready──► AugmentEngine ◄── PageEvent (mutations, resize,
//!                          │                 navigation, keys, clicks)
//!        ┌─────────────────┼───────────────┬───────────────────┐
//!    RouteGate   CodeBlockAugmenter   InjectionWatcher   MarkdownEditorController
//! ```
//!
//! Native builds also ship a typed client for the backend's credit API
//! ([`api::CreditClient`]) and the `chat-augment` CLI around it.

pub mod code_blocks;
pub mod config;
pub mod dom;
pub mod editor;
pub mod engine;
pub mod error;
pub mod injection;
pub mod render;
pub mod route;
pub mod script_loader;

#[cfg(not(target_arch = "wasm32"))]
pub mod api;
#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub mod browser;

pub use code_blocks::{CodeBlockAugmenter, ScanReport};
pub use config::{AugmentConfig, DependencyManifest, ScriptSpec};
pub use dom::{BlockState, HostDom, ObserverKind};
pub use editor::{EditorSession, EditorState, KeyInput, MarkdownEditorController};
pub use engine::{AugmentEngine, DependencyState, EventOutcome, Lifecycle, PageEvent};
pub use error::{AugmentError, LoadFailure, RenderError};
pub use injection::{InjectionOutcome, InjectionWatcher};
pub use render::{CmarkRenderer, MarkdownRenderer};
pub use route::{RouteGate, RouteTransition};
pub use script_loader::{ScriptHost, ScriptLoader, ScriptState};
