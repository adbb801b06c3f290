//! # Host DOM seam
//!
//! ## Responsibility
//! Every read and write the engine performs on the host page goes through
//! [`HostDom`]. The browser binding implements it over `web-sys`; the
//! [`memory::MemoryDom`] implementation backs tests and headless runs.
//!
//! ## Guarantees
//! - Node handles are cheap clones compared by identity
//! - Membership tracking ([`HostDom::track`]) never keeps a node alive: the
//!   browser uses a `WeakSet`, the in-memory DOM a flag on the node itself
//! - Observer connection is explicit per [`ObserverKind`], so the engine can
//!   gate code-block observation without touching editor injection
//!
//! ## NOT Responsible For
//! - Deciding what to do with events (that is the engine)
//! - Caching host elements (callers re-query every time)

pub mod memory;

use std::fmt;

/// The two structural observers the engine drives independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    /// Watches for new code-editor nodes; gated by the route.
    CodeBlocks,
    /// Watches for the chat toolbar; never gated.
    Injection,
}

impl fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverKind::CodeBlocks => write!(f, "code_blocks"),
            ObserverKind::Injection => write!(f, "injection"),
        }
    }
}

/// Operations the engine needs from a page it does not own.
///
/// Selectors are CSS selectors. Implementations must support at least
/// compound simple selectors (`tag#id.class.class`).
pub trait HostDom {
    /// Handle to one element. Equality is node identity.
    type Node: Clone + PartialEq + fmt::Debug;

    // -- lookup ------------------------------------------------------------

    fn query(&self, selector: &str) -> Option<Self::Node>;
    fn query_all(&self, selector: &str) -> Vec<Self::Node>;
    /// Descendants of `root` (excluding `root`) matching `selector`.
    fn query_within(&self, root: &Self::Node, selector: &str) -> Vec<Self::Node>;
    fn element_by_id(&self, id: &str) -> Option<Self::Node>;
    fn matches(&self, node: &Self::Node, selector: &str) -> bool;
    /// Nearest inclusive ancestor matching `selector`.
    fn closest(&self, node: &Self::Node, selector: &str) -> Option<Self::Node>;
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
    fn body(&self) -> Option<Self::Node>;

    // -- tree --------------------------------------------------------------

    /// `None` when the page refuses to create the element.
    fn create_element(&mut self, tag: &str) -> Option<Self::Node>;
    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node);
    fn insert_before(&mut self, parent: &Self::Node, child: &Self::Node, reference: &Self::Node);

    // -- attributes --------------------------------------------------------

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str);
    fn has_class(&self, node: &Self::Node, class: &str) -> bool;
    fn add_class(&mut self, node: &Self::Node, class: &str);
    fn remove_class(&mut self, node: &Self::Node, class: &str);

    // -- content -----------------------------------------------------------

    fn inner_text(&self, node: &Self::Node) -> String;
    fn set_inner_text(&mut self, node: &Self::Node, text: &str);
    fn set_inner_html(&mut self, node: &Self::Node, html: &str);
    /// Form-control value (the editor textarea).
    fn value(&self, node: &Self::Node) -> String;
    fn set_value(&mut self, node: &Self::Node, value: &str);

    // -- geometry ----------------------------------------------------------

    fn scroll_height(&self, node: &Self::Node) -> f64;
    fn set_height_px(&mut self, node: &Self::Node, px: f64);
    /// Smooth scroll so the node's top edge aligns with the viewport top.
    fn scroll_into_view_top(&mut self, node: &Self::Node);

    // -- interaction -------------------------------------------------------

    fn focus(&mut self, node: &Self::Node);
    /// Dispatch a bubbling, cancelable `input` event on the node.
    fn dispatch_input(&mut self, node: &Self::Node);
    fn alert(&mut self, message: &str);

    // -- observation plumbing ----------------------------------------------

    /// Add `node` to the weak membership set. Returns `false` if it was
    /// already a member.
    fn track(&mut self, node: &Self::Node) -> bool;
    fn is_tracked(&self, node: &Self::Node) -> bool;
    /// Empty the membership set.
    fn untrack_all(&mut self);
    /// Start size observation of `node`.
    fn observe_size(&mut self, node: &Self::Node);
    /// Stop size observation of every node.
    fn unobserve_all_sizes(&mut self);
    /// Connect or disconnect a structural observer on the document body.
    fn set_observer(&mut self, kind: ObserverKind, active: bool);
    /// Ask for one [`PageEvent::AnimationFrame`](crate::engine::PageEvent)
    /// before the next paint.
    fn request_animation_frame(&mut self);
}

/// Block state stored on the block and its control as `data-code-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Collapsed,
    Expanded,
}

impl BlockState {
    pub const ATTRIBUTE: &'static str = "data-code-state";

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockState::Collapsed => "collapsed",
            BlockState::Expanded => "expanded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collapsed" => Some(BlockState::Collapsed),
            "expanded" => Some(BlockState::Expanded),
            _ => None,
        }
    }

    pub fn read<D: HostDom>(dom: &D, node: &D::Node) -> Option<Self> {
        dom.attribute(node, Self::ATTRIBUTE)
            .as_deref()
            .and_then(Self::parse)
    }

    pub fn write<D: HostDom>(self, dom: &mut D, node: &D::Node) {
        dom.set_attribute(node, Self::ATTRIBUTE, self.as_str());
    }

    pub fn toggled(self) -> Self {
        match self {
            BlockState::Collapsed => BlockState::Expanded,
            BlockState::Expanded => BlockState::Collapsed,
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
