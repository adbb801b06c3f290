//! # Stage: Browser Binding
//!
//! ## Responsibility
//! Wires [`AugmentEngine`] to the live page: implements [`HostDom`] over
//! `web-sys`, turns observer callbacks, navigation and delegated document
//! events into [`PageEvent`]s, inserts the editor's scripts and builds the
//! markdown-it renderer once they have loaded.
//!
//! ## Guarantees
//! - The engine sits in one `Rc<RefCell<_>>`; every callback holds only a
//!   `Weak` and uses `try_borrow_mut`, so a re-entrant event (the synthetic
//!   `input` fired by apply) is skipped rather than panicking
//! - [`stop`] removes every listener, disconnects every observer and puts
//!   the page's own `history.pushState` back
//! - Failures inside callbacks are logged and never thrown back into the page
//!
//! ## NOT Responsible For
//! - Any decision about what an event means (that is the engine)

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use js_sys::{Array, Function, Object, Reflect, WeakSet};
use tracing::{debug, error, info, trace, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    Document, Element, Event, EventInit, EventTarget, History, HtmlElement, HtmlScriptElement,
    HtmlTextAreaElement, KeyboardEvent, MutationObserver, MutationObserverInit, MutationRecord,
    ResizeObserver, ResizeObserverEntry, ScrollBehavior, ScrollIntoViewOptions,
    ScrollLogicalPosition, Window,
};

use crate::config::{AugmentConfig, DependencyManifest, ScriptSpec};
use crate::dom::{HostDom, ObserverKind};
use crate::editor::KeyInput;
use crate::engine::{AugmentEngine, EventOutcome, PageEvent};
use crate::error::{AugmentError, LoadFailure, RenderError};
use crate::render::{escape_html, MarkdownRenderer};
use crate::script_loader::{ScriptHost, ScriptLoader};

/// Global the page may define before this module loads to override
/// [`AugmentConfig`] defaults.
const CONFIG_GLOBAL: &str = "chatAugmentConfig";

type EngineCell = RefCell<AugmentEngine<WebDom>>;

fn js_detail(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| value.dyn_ref::<js_sys::Error>().map(|e| String::from(e.message())))
        .unwrap_or_else(|| format!("{value:?}"))
}

fn dom_err(what: &str) -> impl Fn(JsValue) -> AugmentError + '_ {
    move |e| AugmentError::Dom(format!("{what}: {}", js_detail(&e)))
}

/// Deliver `event` to the engine if it is still alive and not mid-event.
fn dispatch(engine: &Weak<EngineCell>, event: PageEvent<Element>) -> EventOutcome {
    let Some(engine) = engine.upgrade() else {
        return EventOutcome::default();
    };
    let Ok(mut engine) = engine.try_borrow_mut() else {
        trace!("re-entrant page event skipped");
        return EventOutcome::default();
    };
    engine.handle(event)
}

fn current_location(window: &Window) -> String {
    window.location().href().unwrap_or_default()
}

fn event_element(event: &Event) -> Option<Element> {
    event.target().and_then(|t| t.dyn_into::<Element>().ok())
}

// ---------------------------------------------------------------------------
// WebDom
// ---------------------------------------------------------------------------

struct ObserverCallbacks {
    code_blocks: Closure<dyn FnMut(Array, MutationObserver)>,
    injection: Closure<dyn FnMut(Array, MutationObserver)>,
    resize: Closure<dyn FnMut(Array, ResizeObserver)>,
    frame: Closure<dyn FnMut(f64)>,
}

impl ObserverCallbacks {
    fn new(engine: Weak<EngineCell>) -> Self {
        let structural = |kind: ObserverKind, engine: Weak<EngineCell>| {
            Closure::<dyn FnMut(Array, MutationObserver)>::wrap(Box::new(
                move |records: Array, _observer: MutationObserver| {
                    let added = added_elements(&records);
                    dispatch(&engine, PageEvent::Mutations { kind, added });
                },
            ))
        };

        let on_resize = engine.clone();
        let resize = Closure::<dyn FnMut(Array, ResizeObserver)>::wrap(Box::new(
            move |entries: Array, _observer: ResizeObserver| {
                let targets = entries
                    .iter()
                    .filter_map(|e| e.dyn_into::<ResizeObserverEntry>().ok())
                    .map(|e| e.target())
                    .collect();
                dispatch(&on_resize, PageEvent::Resized { targets });
            },
        ));

        let on_frame = engine.clone();
        let frame = Closure::<dyn FnMut(f64)>::wrap(Box::new(move |_ts: f64| {
            dispatch(&on_frame, PageEvent::AnimationFrame);
        }));

        Self {
            code_blocks: structural(ObserverKind::CodeBlocks, engine.clone()),
            injection: structural(ObserverKind::Injection, engine),
            resize,
            frame,
        }
    }
}

/// Element nodes added by one mutation batch, in delivery order.
fn added_elements(records: &Array) -> Vec<Element> {
    let mut out = Vec::new();
    for record in records.iter() {
        let Ok(record) = record.dyn_into::<MutationRecord>() else {
            continue;
        };
        let nodes = record.added_nodes();
        for i in 0..nodes.length() {
            if let Some(el) = nodes.item(i).and_then(|n| n.dyn_into::<Element>().ok()) {
                out.push(el);
            }
        }
    }
    out
}

/// [`HostDom`] over the real document.
pub struct WebDom {
    window: Window,
    document: Document,
    tracked: WeakSet,
    code_observer: Option<MutationObserver>,
    injection_observer: Option<MutationObserver>,
    resize_observer: Option<ResizeObserver>,
    callbacks: ObserverCallbacks,
}

impl WebDom {
    fn new(window: Window, document: Document, engine: Weak<EngineCell>) -> Self {
        Self {
            window,
            document,
            tracked: WeakSet::new(),
            code_observer: None,
            injection_observer: None,
            resize_observer: None,
            callbacks: ObserverCallbacks::new(engine),
        }
    }

    fn collect(list: web_sys::NodeList) -> Vec<Element> {
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|n| n.dyn_into::<Element>().ok())
            .collect()
    }

    fn connect_structural(&self, kind: ObserverKind) -> Result<MutationObserver, AugmentError> {
        let callback = match kind {
            ObserverKind::CodeBlocks => &self.callbacks.code_blocks,
            ObserverKind::Injection => &self.callbacks.injection,
        };
        let body = self
            .document
            .body()
            .ok_or_else(|| AugmentError::host_missing("body"))?;
        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())
            .map_err(dom_err("MutationObserver"))?;
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        observer
            .observe_with_options(&body, &init)
            .map_err(dom_err("MutationObserver.observe"))?;
        Ok(observer)
    }

    fn resize_observer(&mut self) -> Option<&ResizeObserver> {
        if self.resize_observer.is_none() {
            match ResizeObserver::new(self.callbacks.resize.as_ref().unchecked_ref()) {
                Ok(observer) => self.resize_observer = Some(observer),
                Err(e) => warn!(error = %js_detail(&e), "ResizeObserver unavailable"),
            }
        }
        self.resize_observer.as_ref()
    }
}

impl HostDom for WebDom {
    type Node = Element;

    fn query(&self, selector: &str) -> Option<Element> {
        self.document.query_selector(selector).ok().flatten()
    }

    fn query_all(&self, selector: &str) -> Vec<Element> {
        self.document
            .query_selector_all(selector)
            .map(Self::collect)
            .unwrap_or_default()
    }

    fn query_within(&self, root: &Element, selector: &str) -> Vec<Element> {
        root.query_selector_all(selector)
            .map(Self::collect)
            .unwrap_or_default()
    }

    fn element_by_id(&self, id: &str) -> Option<Element> {
        self.document.get_element_by_id(id)
    }

    fn matches(&self, node: &Element, selector: &str) -> bool {
        node.matches(selector).unwrap_or(false)
    }

    fn closest(&self, node: &Element, selector: &str) -> Option<Element> {
        node.closest(selector).ok().flatten()
    }

    fn parent(&self, node: &Element) -> Option<Element> {
        node.parent_element()
    }

    fn body(&self) -> Option<Element> {
        self.document.body().map(Element::from)
    }

    fn create_element(&mut self, tag: &str) -> Option<Element> {
        self.document.create_element(tag).ok()
    }

    fn append_child(&mut self, parent: &Element, child: &Element) {
        if let Err(e) = parent.append_child(child) {
            warn!(error = %js_detail(&e), "appendChild rejected");
        }
    }

    fn insert_before(&mut self, parent: &Element, child: &Element, reference: &Element) {
        let reference: &web_sys::Node = reference;
        if let Err(e) = parent.insert_before(child, Some(reference)) {
            warn!(error = %js_detail(&e), "insertBefore rejected");
        }
    }

    fn attribute(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    fn set_attribute(&mut self, node: &Element, name: &str, value: &str) {
        if let Err(e) = node.set_attribute(name, value) {
            warn!(name, error = %js_detail(&e), "setAttribute rejected");
        }
    }

    fn has_class(&self, node: &Element, class: &str) -> bool {
        node.class_list().contains(class)
    }

    fn add_class(&mut self, node: &Element, class: &str) {
        let _ = node.class_list().add_1(class);
    }

    fn remove_class(&mut self, node: &Element, class: &str) {
        let _ = node.class_list().remove_1(class);
    }

    fn inner_text(&self, node: &Element) -> String {
        match node.dyn_ref::<HtmlElement>() {
            Some(html) => html.inner_text(),
            None => node.text_content().unwrap_or_default(),
        }
    }

    fn set_inner_text(&mut self, node: &Element, text: &str) {
        match node.dyn_ref::<HtmlElement>() {
            Some(html) => html.set_inner_text(text),
            None => node.set_text_content(Some(text)),
        }
    }

    fn set_inner_html(&mut self, node: &Element, html: &str) {
        node.set_inner_html(html);
    }

    fn value(&self, node: &Element) -> String {
        match node.dyn_ref::<HtmlTextAreaElement>() {
            Some(area) => area.value(),
            None => node.get_attribute("value").unwrap_or_default(),
        }
    }

    fn set_value(&mut self, node: &Element, value: &str) {
        match node.dyn_ref::<HtmlTextAreaElement>() {
            Some(area) => area.set_value(value),
            None => self.set_attribute(node, "value", value),
        }
    }

    fn scroll_height(&self, node: &Element) -> f64 {
        f64::from(node.scroll_height())
    }

    fn set_height_px(&mut self, node: &Element, px: f64) {
        let Some(html) = node.dyn_ref::<HtmlElement>() else {
            return;
        };
        if let Err(e) = html.style().set_property("height", &format!("{px}px")) {
            warn!(error = %js_detail(&e), "could not set block height");
        }
    }

    fn scroll_into_view_top(&mut self, node: &Element) {
        let options = ScrollIntoViewOptions::new();
        options.set_behavior(ScrollBehavior::Smooth);
        options.set_block(ScrollLogicalPosition::Start);
        node.scroll_into_view_with_scroll_into_view_options(&options);
    }

    fn focus(&mut self, node: &Element) {
        if let Some(html) = node.dyn_ref::<HtmlElement>() {
            let _ = html.focus();
        }
    }

    fn dispatch_input(&mut self, node: &Element) {
        let init = EventInit::new();
        init.set_bubbles(true);
        init.set_cancelable(true);
        match Event::new_with_event_init_dict("input", &init) {
            Ok(event) => {
                let _ = node.dispatch_event(&event);
            }
            Err(e) => warn!(error = %js_detail(&e), "could not build input event"),
        }
    }

    fn alert(&mut self, message: &str) {
        let _ = self.window.alert_with_message(message);
    }

    fn track(&mut self, node: &Element) -> bool {
        let key: &Object = node.as_ref();
        if self.tracked.has(key) {
            return false;
        }
        self.tracked.add(key);
        true
    }

    fn is_tracked(&self, node: &Element) -> bool {
        self.tracked.has(node.as_ref())
    }

    fn untrack_all(&mut self) {
        self.tracked = WeakSet::new();
    }

    fn observe_size(&mut self, node: &Element) {
        if let Some(observer) = self.resize_observer() {
            observer.observe(node);
        }
    }

    fn unobserve_all_sizes(&mut self) {
        if let Some(observer) = &self.resize_observer {
            observer.disconnect();
        }
    }

    fn set_observer(&mut self, kind: ObserverKind, active: bool) {
        let connected = match kind {
            ObserverKind::CodeBlocks => self.code_observer.is_some(),
            ObserverKind::Injection => self.injection_observer.is_some(),
        };
        if active == connected {
            return;
        }
        if !active {
            let observer = match kind {
                ObserverKind::CodeBlocks => self.code_observer.take(),
                ObserverKind::Injection => self.injection_observer.take(),
            };
            if let Some(observer) = observer {
                observer.disconnect();
            }
            debug!(%kind, "observer disconnected");
            return;
        }
        match self.connect_structural(kind) {
            Ok(observer) => {
                match kind {
                    ObserverKind::CodeBlocks => self.code_observer = Some(observer),
                    ObserverKind::Injection => self.injection_observer = Some(observer),
                }
                debug!(%kind, "observer connected");
            }
            Err(e) => warn!(%kind, error = %e, "could not connect observer"),
        }
    }

    fn request_animation_frame(&mut self) {
        let callback: &Function = self.callbacks.frame.as_ref().unchecked_ref();
        if let Err(e) = self.window.request_animation_frame(callback) {
            warn!(error = %js_detail(&e), "requestAnimationFrame rejected");
        }
    }
}

impl Drop for WebDom {
    fn drop(&mut self) {
        for observer in [self.code_observer.take(), self.injection_observer.take()]
            .into_iter()
            .flatten()
        {
            observer.disconnect();
        }
        if let Some(observer) = self.resize_observer.take() {
            observer.disconnect();
        }
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// [`ScriptHost`] that appends `<script>` elements to the document head.
pub struct WebScriptHost {
    window: Window,
    document: Document,
}

impl WebScriptHost {
    pub fn new(window: Window, document: Document) -> Self {
        Self { window, document }
    }

    fn insert(&self, url: &str) -> Result<js_sys::Promise, JsValue> {
        let script: HtmlScriptElement = self.document.create_element("script")?.dyn_into()?;
        script.set_src(url);
        let settled = js_sys::Promise::new(&mut |resolve, reject| {
            script.set_onload(Some(&resolve));
            script.set_onerror(Some(&reject));
        });
        match self.document.head() {
            Some(head) => head.append_child(&script)?,
            None => self
                .document
                .body()
                .ok_or_else(|| JsValue::from_str("document has no head or body"))?
                .append_child(&script)?,
        };
        Ok(settled)
    }
}

impl ScriptHost for WebScriptHost {
    fn has_script(&self, url: &str) -> bool {
        let selector = format!("script[src=\"{}\"]", url.replace('"', "\\\""));
        matches!(self.document.query_selector(&selector), Ok(Some(_)))
    }

    fn has_global(&self, name: &str) -> bool {
        Reflect::get(&self.window, &JsValue::from_str(name))
            .map(|v| !v.is_undefined() && !v.is_null())
            .unwrap_or(false)
    }

    fn insert_script(&self, url: &str) -> LocalBoxFuture<'static, Result<(), String>> {
        match self.insert(url) {
            Ok(settled) => async move {
                JsFuture::from(settled)
                    .await
                    .map(|_| ())
                    .map_err(|_| "script error event".to_string())
            }
            .boxed_local(),
            Err(e) => future::ready(Err(js_detail(&e))).boxed_local(),
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

fn call_method(target: &JsValue, name: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let method: Function = Reflect::get(target, &JsValue::from_str(name))?.dyn_into()?;
    let args: Array = args.iter().collect();
    Reflect::apply(&method, target, &args)
}

fn highlighted_value(result: Result<JsValue, JsValue>) -> Option<String> {
    let result = result.ok()?;
    Reflect::get(&result, &JsValue::from_str("value"))
        .ok()?
        .as_string()
}

/// highlight.js markup for `code`, trying the named grammar first and
/// auto-detection second.
fn highlight(hljs: &JsValue, code: &str, lang: &str) -> Option<String> {
    if hljs.is_undefined() || hljs.is_null() {
        return None;
    }
    if !lang.is_empty() {
        let known = call_method(hljs, "getLanguage", &[lang.into()])
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if known {
            let options = Object::new();
            let _ = Reflect::set(&options, &"language".into(), &lang.into());
            let _ = Reflect::set(&options, &"ignoreIllegals".into(), &JsValue::TRUE);
            let result = call_method(hljs, "highlight", &[code.into(), options.into()]);
            if let Some(html) = highlighted_value(result) {
                return Some(html);
            }
        }
    }
    highlighted_value(call_method(hljs, "highlightAuto", &[code.into()]))
}

/// The page's markdown-it instance with highlight.js wired into fences.
pub struct MarkdownItRenderer {
    md: JsValue,
    _highlight: Closure<dyn Fn(String, String) -> String>,
}

impl MarkdownItRenderer {
    pub fn from_window(window: &Window, manifest: &DependencyManifest) -> Result<Self, AugmentError> {
        let unusable = |spec: &ScriptSpec, detail: &str| {
            AugmentError::DependencyLoad(LoadFailure::new(spec.url.clone(), detail))
        };
        let factory_name = manifest.renderer.global.as_deref().unwrap_or("markdownit");
        let factory: Function = Reflect::get(window, &factory_name.into())
            .ok()
            .and_then(|v| v.dyn_into().ok())
            .ok_or_else(|| unusable(&manifest.renderer, "renderer global is not callable"))?;
        let hljs_name = manifest.highlighter.global.as_deref().unwrap_or("hljs");
        let hljs = Reflect::get(window, &hljs_name.into()).unwrap_or(JsValue::UNDEFINED);

        let fence = Closure::<dyn Fn(String, String) -> String>::wrap(Box::new(
            move |code: String, lang: String| {
                let body = highlight(&hljs, &code, &lang).unwrap_or_else(|| escape_html(&code));
                format!("<pre class=\"hljs\"><code>{body}</code></pre>")
            },
        ));

        let options = Object::new();
        for flag in ["html", "linkify", "typographer"] {
            let _ = Reflect::set(&options, &flag.into(), &JsValue::TRUE);
        }
        let _ = Reflect::set(&options, &"highlight".into(), fence.as_ref());
        let md = factory
            .call1(&JsValue::NULL, &options)
            .map_err(|e| unusable(&manifest.renderer, &js_detail(&e)))?;

        Ok(Self {
            md,
            _highlight: fence,
        })
    }
}

impl MarkdownRenderer for MarkdownItRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        call_method(&self.md, "render", &[source.into()])
            .map_err(|e| RenderError(js_detail(&e)))?
            .as_string()
            .ok_or_else(|| RenderError("markdown-it returned a non-string".into()))
    }
}

// ---------------------------------------------------------------------------
// Page hooks
// ---------------------------------------------------------------------------

/// An event listener that unregisters itself when dropped.
struct Listener {
    target: EventTarget,
    name: &'static str,
    callback: Closure<dyn FnMut(Event)>,
}

impl Listener {
    fn attach<F>(target: &EventTarget, name: &'static str, handler: F) -> Result<Self, AugmentError>
    where
        F: FnMut(Event) + 'static,
    {
        let callback = Closure::<dyn FnMut(Event)>::wrap(Box::new(handler));
        target
            .add_event_listener_with_callback(name, callback.as_ref().unchecked_ref())
            .map_err(dom_err(name))?;
        Ok(Self {
            target: target.clone(),
            name,
            callback,
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.name, self.callback.as_ref().unchecked_ref());
    }
}

/// Replaces `history.pushState` with a wrapper that calls the page's own
/// function and then reports the navigation.
struct PushStateHook {
    history: History,
    original: Function,
    _wrapper: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>,
}

impl PushStateHook {
    fn install(window: &Window, engine: Weak<EngineCell>) -> Result<Self, AugmentError> {
        let history = window.history().map_err(dom_err("history"))?;
        let original: Function = Reflect::get(&history, &"pushState".into())
            .ok()
            .and_then(|v| v.dyn_into().ok())
            .ok_or_else(|| AugmentError::Dom("history.pushState is not a function".into()))?;

        let (target, inner, win) = (history.clone(), original.clone(), window.clone());
        let wrapper = Closure::<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>::wrap(
            Box::new(move |state: JsValue, title: JsValue, url: JsValue| {
                let result = inner.call3(&target, &state, &title, &url)?;
                let location = current_location(&win);
                dispatch(&engine, PageEvent::Navigated { location });
                Ok(result)
            }),
        );
        Reflect::set(&history, &"pushState".into(), wrapper.as_ref())
            .map_err(dom_err("history.pushState"))?;

        Ok(Self {
            history,
            original,
            _wrapper: wrapper,
        })
    }
}

impl Drop for PushStateHook {
    fn drop(&mut self) {
        if Reflect::set(&self.history, &"pushState".into(), &self.original).is_err() {
            warn!("could not restore history.pushState");
        }
    }
}

fn page_listeners(
    window: &Window,
    document: &Document,
    engine: &Weak<EngineCell>,
) -> Result<Vec<Listener>, AugmentError> {
    let mut listeners = Vec::new();

    let (weak, win) = (engine.clone(), window.clone());
    listeners.push(Listener::attach(window, "popstate", move |_| {
        let location = current_location(&win);
        dispatch(&weak, PageEvent::Navigated { location });
    })?);

    listeners.push(Listener::attach(window, "error", |event| {
        let message = event
            .dyn_ref::<web_sys::ErrorEvent>()
            .map(|e| e.message())
            .unwrap_or_default();
        error!(message = %message, "page error");
    })?);
    listeners.push(Listener::attach(window, "unhandledrejection", |event| {
        let reason = event
            .dyn_ref::<web_sys::PromiseRejectionEvent>()
            .map(|e| js_detail(&e.reason()))
            .unwrap_or_default();
        error!(reason = %reason, "unhandled promise rejection");
    })?);

    let weak = engine.clone();
    listeners.push(Listener::attach(document, "keydown", move |event| {
        let Some(key) = event.dyn_ref::<KeyboardEvent>() else {
            return;
        };
        let mut input = KeyInput::new(key.key());
        if key.ctrl_key() {
            input = input.with_ctrl();
        }
        if key.meta_key() {
            input = input.with_meta();
        }
        if dispatch(&weak, PageEvent::KeyDown(input)).prevent_default {
            event.prevent_default();
        }
    })?);

    type Targeted = fn(Element) -> PageEvent<Element>;
    let targeted: [(&'static str, Targeted); 4] = [
        ("click", |target| PageEvent::Click { target }),
        ("input", |target| PageEvent::Input { target }),
        ("mousedown", |target| PageEvent::MouseDown { target }),
        ("mouseup", |target| PageEvent::MouseUp { target }),
    ];
    for (name, build) in targeted {
        let weak = engine.clone();
        listeners.push(Listener::attach(document, name, move |event| {
            let Some(target) = event_element(&event) else {
                return;
            };
            if dispatch(&weak, build(target)).prevent_default {
                event.prevent_default();
            }
        })?);
    }

    Ok(listeners)
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

// Fields drop in order: listeners, then the pushState wrapper, then the engine.
struct Runtime {
    _listeners: Vec<Listener>,
    _push_state: Option<PushStateHook>,
    engine: Rc<EngineCell>,
}

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

fn page_config(window: &Window) -> Result<AugmentConfig, AugmentError> {
    let raw = Reflect::get(window, &CONFIG_GLOBAL.into()).unwrap_or(JsValue::UNDEFINED);
    if raw.is_undefined() || raw.is_null() {
        return Ok(AugmentConfig::default());
    }
    let json: String = js_sys::JSON::stringify(&raw)
        .map_err(|e| AugmentError::Config(js_detail(&e)))?
        .into();
    AugmentConfig::from_json_str(&json)
}

async fn load_dependencies(
    window: Window,
    document: Document,
    manifest: DependencyManifest,
    engine: Weak<EngineCell>,
) {
    let loader = ScriptLoader::new(WebScriptHost::new(window.clone(), document));
    let outcome = match loader.load_dependencies(&manifest).await {
        Ok(()) => MarkdownItRenderer::from_window(&window, &manifest),
        Err(e) => Err(e),
    };
    let Some(engine) = engine.upgrade() else {
        debug!("engine stopped before dependencies settled");
        return;
    };
    let Ok(mut engine) = engine.try_borrow_mut() else {
        warn!("engine busy when dependencies settled");
        return;
    };
    match outcome {
        Ok(renderer) => engine.dependencies_ready(renderer),
        Err(e) => engine.dependencies_failed(&e),
    }
}

fn boot(config: AugmentConfig) -> Result<(), AugmentError> {
    let window = web_sys::window().ok_or_else(|| AugmentError::Dom("no window".into()))?;
    let document = window
        .document()
        .ok_or_else(|| AugmentError::Dom("no document".into()))?;
    let manifest = config.scripts.clone();

    let engine: Rc<EngineCell> = Rc::new_cyclic(|weak| {
        let dom = WebDom::new(window.clone(), document.clone(), weak.clone());
        RefCell::new(AugmentEngine::new(dom, config))
    });
    let weak = Rc::downgrade(&engine);

    let push_state = match PushStateHook::install(&window, weak.clone()) {
        Ok(hook) => Some(hook),
        Err(e) => {
            warn!(error = %e, "navigation via pushState will not be tracked");
            None
        }
    };
    let listeners = page_listeners(&window, &document, &weak)?;

    engine.borrow_mut().start(&current_location(&window));
    RUNTIME.with(|slot| {
        *slot.borrow_mut() = Some(Runtime {
            _listeners: listeners,
            _push_state: push_state,
            engine,
        });
    });

    wasm_bindgen_futures::spawn_local(load_dependencies(window, document, manifest, weak));
    Ok(())
}

fn shutdown() {
    let runtime = RUNTIME.with(|slot| slot.borrow_mut().take());
    let Some(runtime) = runtime else {
        return;
    };
    match runtime.engine.try_borrow_mut() {
        Ok(mut engine) => engine.stop(),
        Err(_) => warn!("engine busy during stop; observers released on drop"),
    }
    drop(runtime);
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    tracing_wasm::set_as_global_default();

    let Some(window) = web_sys::window() else {
        return;
    };
    let config = page_config(&window).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring page configuration");
        AugmentConfig::default()
    });
    match boot(config) {
        Ok(()) => info!("chat augment attached"),
        Err(e) => error!(error = %e, "chat augment failed to start"),
    }
}

/// Restart against a new configuration given as JSON.
#[wasm_bindgen]
pub fn configure(json: &str) -> Result<(), JsValue> {
    let config = AugmentConfig::from_json_str(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    shutdown();
    boot(config).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Detach from the page: observers, listeners and the pushState wrapper.
#[wasm_bindgen]
pub fn stop() {
    shutdown();
    info!("chat augment detached");
}
