//! In-memory [`HostDom`] used by tests and headless runs.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Layout is not
//! computed: scroll heights are whatever the caller sets with
//! [`MemoryDom::set_scroll_height`]. Side effects the browser would perform
//! (focus, alerts, synthetic events, scrolling) are recorded as
//! [`DomEffect`]s so callers can assert on them.

use std::collections::{BTreeMap, HashMap};

use super::{HostDom, ObserverKind};

/// Arena index of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A side effect the engine asked the page to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum DomEffect {
    InputDispatched(NodeId),
    Focused(NodeId),
    Alert(String),
    ScrolledIntoView(NodeId),
}

#[derive(Debug, Clone, Default)]
struct NodeData {
    tag: String,
    attributes: BTreeMap<String, String>,
    classes: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
    html: String,
    value: String,
    scroll_height: f64,
    height_px: Option<f64>,
    tracked: bool,
    size_observed: bool,
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// A compound simple selector: `tag#id.class.class`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn parse(s: &str) -> Self {
        let mut out = Compound::default();
        let mut kind = 't';
        let mut buf = String::new();
        let flush = |kind: char, buf: &mut String, out: &mut Compound| {
            if buf.is_empty() {
                return;
            }
            let part = std::mem::take(buf);
            match kind {
                '#' => out.id = Some(part),
                '.' => out.classes.push(part),
                _ => out.tag = Some(part.to_ascii_lowercase()),
            }
        };
        for c in s.trim().chars() {
            if c == '#' || c == '.' {
                flush(kind, &mut buf, &mut out);
                kind = c;
            } else {
                buf.push(c);
            }
        }
        flush(kind, &mut buf, &mut out);
        out
    }

    fn matches(&self, node: &NodeData) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && *tag != node.tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attributes.get("id") != Some(id) {
                return false;
            }
        }
        self.classes.iter().all(|c| node.classes.contains(c))
    }
}

/// Comma-separated list of compound selectors.
fn parse_selector(s: &str) -> Vec<Compound> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Compound::parse)
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryDom
// ---------------------------------------------------------------------------

/// Arena-backed document with `<html>`, `<head>` and `<body>`.
#[derive(Debug, Clone)]
pub struct MemoryDom {
    nodes: Vec<NodeData>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    effects: Vec<DomEffect>,
    observers: HashMap<ObserverKind, bool>,
    connects: HashMap<ObserverKind, usize>,
    frame_requests: usize,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let mut dom = MemoryDom {
            nodes: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            effects: Vec::new(),
            observers: HashMap::new(),
            connects: HashMap::new(),
            frame_requests: 0,
        };
        dom.root = dom.alloc("html");
        dom.head = dom.alloc("head");
        dom.body = dom.alloc("body");
        let (root, head, body) = (dom.root, dom.head, dom.body);
        dom.attach(root, head, None);
        dom.attach(root, body, None);
        dom
    }

    fn alloc(&mut self, tag: &str) -> NodeId {
        self.nodes.push(NodeData {
            tag: tag.to_ascii_lowercase(),
            ..NodeData::default()
        });
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0]
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        self.detach(child);
        let children = &mut self.node_mut(parent).children;
        let at = before
            .and_then(|r| children.iter().position(|c| *c == r))
            .unwrap_or(children.len());
        children.insert(at, child);
        self.node_mut(child).parent = Some(parent);
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.node(child).parent {
            self.node_mut(parent).children.retain(|c| *c != child);
            self.node_mut(child).parent = None;
        }
    }

    fn clear_children(&mut self, node: NodeId) {
        let children = std::mem::take(&mut self.node_mut(node).children);
        for c in children {
            self.node_mut(c).parent = None;
        }
    }

    /// Preorder descendants of `root`, excluding `root`.
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(root).children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }

    fn matches_list(&self, node: NodeId, selectors: &[Compound]) -> bool {
        let data = self.node(node);
        selectors.iter().any(|s| s.matches(data))
    }

    // -- test helpers ------------------------------------------------------

    pub fn head_id(&self) -> NodeId {
        self.head
    }

    pub fn body_id(&self) -> NodeId {
        self.body
    }

    /// Create an element from a compound selector (`div#id.a.b`) and append
    /// it to `parent`.
    pub fn add(&mut self, parent: NodeId, spec: &str) -> NodeId {
        let c = Compound::parse(spec);
        let node = self.alloc(c.tag.as_deref().unwrap_or("div"));
        if let Some(id) = c.id {
            self.node_mut(node).attributes.insert("id".into(), id);
        }
        self.node_mut(node).classes = c.classes;
        self.attach(parent, node, None);
        node
    }

    /// Detach `node` (and its subtree) from the document.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    /// `true` when `node` is reachable from the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == self.root {
                return true;
            }
            cur = self.node(n).parent;
        }
        false
    }

    pub fn set_scroll_height(&mut self, node: NodeId, px: f64) {
        self.node_mut(node).scroll_height = px;
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        self.node_mut(node).text = text.to_string();
    }

    /// Fixed height set through [`HostDom::set_height_px`], if any.
    pub fn height_px(&self, node: NodeId) -> Option<f64> {
        self.node(node).height_px
    }

    pub fn inner_html(&self, node: NodeId) -> &str {
        &self.node(node).html
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.node(node).tag
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    pub fn is_size_observed(&self, node: NodeId) -> bool {
        self.node(node).size_observed
    }

    pub fn effects(&self) -> &[DomEffect] {
        &self.effects
    }

    pub fn take_effects(&mut self) -> Vec<DomEffect> {
        std::mem::take(&mut self.effects)
    }

    pub fn alerts(&self) -> Vec<&str> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                DomEffect::Alert(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn input_events_on(&self, node: NodeId) -> usize {
        self.effects
            .iter()
            .filter(|e| **e == DomEffect::InputDispatched(node))
            .count()
    }

    pub fn observer_active(&self, kind: ObserverKind) -> bool {
        self.observers.get(&kind).copied().unwrap_or(false)
    }

    /// Number of inactive→active transitions for `kind`.
    pub fn observer_connects(&self, kind: ObserverKind) -> usize {
        self.connects.get(&kind).copied().unwrap_or(0)
    }

    pub fn frame_requests(&self) -> usize {
        self.frame_requests
    }

    /// Number of connected elements matching `selector`.
    pub fn count(&self, selector: &str) -> usize {
        self.query_all(selector).len()
    }
}

impl HostDom for MemoryDom {
    type Node = NodeId;

    fn query(&self, selector: &str) -> Option<NodeId> {
        let sel = parse_selector(selector);
        self.descendants(self.root)
            .into_iter()
            .find(|n| self.matches_list(*n, &sel))
    }

    fn query_all(&self, selector: &str) -> Vec<NodeId> {
        self.query_within(&self.root, selector)
    }

    fn query_within(&self, root: &NodeId, selector: &str) -> Vec<NodeId> {
        let sel = parse_selector(selector);
        self.descendants(*root)
            .into_iter()
            .filter(|n| self.matches_list(*n, &sel))
            .collect()
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|n| self.node(*n).attributes.get("id").map(String::as_str) == Some(id))
    }

    fn matches(&self, node: &NodeId, selector: &str) -> bool {
        self.matches_list(*node, &parse_selector(selector))
    }

    fn closest(&self, node: &NodeId, selector: &str) -> Option<NodeId> {
        let sel = parse_selector(selector);
        let mut cur = Some(*node);
        while let Some(n) = cur {
            if self.matches_list(n, &sel) {
                return Some(n);
            }
            cur = self.node(n).parent;
        }
        None
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.node(*node).parent
    }

    fn body(&self) -> Option<NodeId> {
        Some(self.body)
    }

    fn create_element(&mut self, tag: &str) -> Option<NodeId> {
        Some(self.alloc(tag))
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) {
        self.attach(*parent, *child, None);
    }

    fn insert_before(&mut self, parent: &NodeId, child: &NodeId, reference: &NodeId) {
        self.attach(*parent, *child, Some(*reference));
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        let data = self.node(*node);
        if name == "class" {
            return (!data.classes.is_empty()).then(|| data.classes.join(" "));
        }
        data.attributes.get(name).cloned()
    }

    fn set_attribute(&mut self, node: &NodeId, name: &str, value: &str) {
        let data = self.node_mut(*node);
        if name == "class" {
            data.classes = value.split_whitespace().map(str::to_string).collect();
        } else {
            data.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn has_class(&self, node: &NodeId, class: &str) -> bool {
        self.node(*node).classes.iter().any(|c| c == class)
    }

    fn add_class(&mut self, node: &NodeId, class: &str) {
        let data = self.node_mut(*node);
        if !data.classes.iter().any(|c| c == class) {
            data.classes.push(class.to_string());
        }
    }

    fn remove_class(&mut self, node: &NodeId, class: &str) {
        self.node_mut(*node).classes.retain(|c| c != class);
    }

    fn inner_text(&self, node: &NodeId) -> String {
        let mut out = self.node(*node).text.clone();
        for d in self.descendants(*node) {
            out.push_str(&self.node(d).text);
        }
        out
    }

    fn set_inner_text(&mut self, node: &NodeId, text: &str) {
        self.clear_children(*node);
        let data = self.node_mut(*node);
        data.html.clear();
        data.text = text.to_string();
    }

    fn set_inner_html(&mut self, node: &NodeId, html: &str) {
        self.clear_children(*node);
        let data = self.node_mut(*node);
        data.text.clear();
        data.html = html.to_string();
    }

    fn value(&self, node: &NodeId) -> String {
        self.node(*node).value.clone()
    }

    fn set_value(&mut self, node: &NodeId, value: &str) {
        self.node_mut(*node).value = value.to_string();
    }

    fn scroll_height(&self, node: &NodeId) -> f64 {
        self.node(*node).scroll_height
    }

    fn set_height_px(&mut self, node: &NodeId, px: f64) {
        self.node_mut(*node).height_px = Some(px);
    }

    fn scroll_into_view_top(&mut self, node: &NodeId) {
        self.effects.push(DomEffect::ScrolledIntoView(*node));
    }

    fn focus(&mut self, node: &NodeId) {
        self.effects.push(DomEffect::Focused(*node));
    }

    fn dispatch_input(&mut self, node: &NodeId) {
        self.effects.push(DomEffect::InputDispatched(*node));
    }

    fn alert(&mut self, message: &str) {
        self.effects.push(DomEffect::Alert(message.to_string()));
    }

    fn track(&mut self, node: &NodeId) -> bool {
        let data = self.node_mut(*node);
        !std::mem::replace(&mut data.tracked, true)
    }

    fn is_tracked(&self, node: &NodeId) -> bool {
        self.node(*node).tracked
    }

    fn untrack_all(&mut self) {
        for n in &mut self.nodes {
            n.tracked = false;
        }
    }

    fn observe_size(&mut self, node: &NodeId) {
        self.node_mut(*node).size_observed = true;
    }

    fn unobserve_all_sizes(&mut self) {
        for n in &mut self.nodes {
            n.size_observed = false;
        }
    }

    fn set_observer(&mut self, kind: ObserverKind, active: bool) {
        let was = self.observers.insert(kind, active).unwrap_or(false);
        if active && !was {
            *self.connects.entry(kind).or_insert(0) += 1;
        }
    }

    fn request_animation_frame(&mut self) {
        self.frame_requests += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_has_head_and_body() {
        let dom = MemoryDom::new();
        assert_eq!(dom.query("head"), Some(dom.head_id()));
        assert_eq!(dom.query("body"), Some(dom.body_id()));
    }

    #[test]
    fn add_parses_tag_id_and_classes() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let n = dom.add(body, "button#go.btn.primary");
        assert_eq!(dom.tag(n), "button");
        assert_eq!(dom.attribute(&n, "id").as_deref(), Some("go"));
        assert!(dom.has_class(&n, "btn"));
        assert!(dom.has_class(&n, "primary"));
        assert_eq!(dom.attribute(&n, "class").as_deref(), Some("btn primary"));
    }

    #[test]
    fn compound_selector_requires_every_part() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let wrap = dom.add(body, "div.relative.my-2");
        let other = dom.add(body, "div.relative");
        assert!(dom.matches(&wrap, ".relative.my-2"));
        assert!(!dom.matches(&other, ".relative.my-2"));
        assert!(dom.matches(&other, "div.relative"));
        assert!(!dom.matches(&other, "p.relative"));
    }

    #[test]
    fn selector_list_matches_any() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        dom.add(body, "p.a");
        dom.add(body, "span.b");
        assert_eq!(dom.count(".a, .b"), 2);
    }

    #[test]
    fn query_is_document_order() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let outer = dom.add(body, "div.x");
        let inner = dom.add(outer, "div.x");
        let after = dom.add(body, "div.x");
        assert_eq!(dom.query_all(".x"), vec![outer, inner, after]);
        assert_eq!(dom.query_within(&outer, ".x"), vec![inner]);
    }

    #[test]
    fn detached_nodes_are_not_found() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let n = dom.add(body, "div#gone");
        dom.remove(n);
        assert_eq!(dom.element_by_id("gone"), None);
        assert!(!dom.is_connected(n));
        let loose = dom.create_element("div").unwrap();
        dom.set_attribute(&loose, "id", "loose");
        assert_eq!(dom.element_by_id("loose"), None);
    }

    #[test]
    fn closest_is_inclusive() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let block = dom.add(body, "div.cm-editor");
        let btn = dom.add(block, "button.code-expand-btn");
        assert_eq!(dom.closest(&btn, ".cm-editor"), Some(block));
        assert_eq!(dom.closest(&block, ".cm-editor"), Some(block));
        assert_eq!(dom.closest(&btn, ".missing"), None);
    }

    #[test]
    fn insert_before_places_child_ahead_of_reference() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let a = dom.add(body, "div#a");
        let b = dom.create_element("div").unwrap();
        dom.insert_before(&body, &b, &a);
        assert_eq!(dom.children(body), &[b, a]);
    }

    #[test]
    fn inner_text_concatenates_descendants_and_setter_replaces_them() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let input = dom.add(body, "div#chat-input");
        let p = dom.add(input, "p.is-empty");
        dom.set_text(p, "hello");
        assert_eq!(dom.inner_text(&input), "hello");
        dom.set_inner_text(&input, "# Hi");
        assert_eq!(dom.inner_text(&input), "# Hi");
        assert!(dom.children(input).is_empty());
    }

    #[test]
    fn track_reports_first_insertion_only() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let n = dom.add(body, "div");
        assert!(dom.track(&n));
        assert!(!dom.track(&n));
        assert!(dom.is_tracked(&n));
    }

    #[test]
    fn untrack_all_allows_tracking_again() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let n = dom.add(body, "div");
        dom.track(&n);
        dom.untrack_all();
        assert!(!dom.is_tracked(&n));
        assert!(dom.track(&n));
    }

    #[test]
    fn observer_connect_counter_counts_transitions() {
        let mut dom = MemoryDom::new();
        dom.set_observer(ObserverKind::CodeBlocks, true);
        dom.set_observer(ObserverKind::CodeBlocks, true);
        dom.set_observer(ObserverKind::CodeBlocks, false);
        dom.set_observer(ObserverKind::CodeBlocks, true);
        assert_eq!(dom.observer_connects(ObserverKind::CodeBlocks), 2);
        assert!(dom.observer_active(ObserverKind::CodeBlocks));
        assert!(!dom.observer_active(ObserverKind::Injection));
    }

    #[test]
    fn effects_are_recorded_in_order() {
        let mut dom = MemoryDom::new();
        let body = dom.body_id();
        let n = dom.add(body, "div");
        dom.dispatch_input(&n);
        dom.focus(&n);
        dom.alert("hi");
        assert_eq!(
            dom.take_effects(),
            vec![
                DomEffect::InputDispatched(n),
                DomEffect::Focused(n),
                DomEffect::Alert("hi".into())
            ]
        );
        assert!(dom.effects().is_empty());
    }
}
