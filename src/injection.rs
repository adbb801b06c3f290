//! Trigger-button injection.
//!
//! The host re-renders its toolbar whenever it likes, so injection is a
//! reconcile step run on startup and after every structural mutation batch:
//! if both anchors exist and the trigger does not, insert it. Running it any
//! number of times leaves exactly one trigger in the document.

use std::fmt;

use tracing::{debug, info, warn};

use crate::config::EditorConfig;
use crate::dom::HostDom;

const BUTTON_CLASS: &str = "markdown-edit-btn";
const BUTTON_TITLE: &str = "Markdown 编辑 (打开/关闭)";
const BUTTON_ICON: &str = concat!(
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20" viewBox="0 0 24 24" "#,
    r#"fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" "#,
    r#"stroke-linejoin="round"><path d="M12 20h9"></path>"#,
    r#"<path d="M16.5 3.5a2.121 2.121 0 0 1 3 3L7 19l-4 1 1-4L16.5 3.5z"></path></svg>"#,
);

/// Result of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The trigger was inserted by this pass.
    Injected,
    /// A trigger is already in the document.
    Present,
    /// The chat input or voice button has not rendered yet.
    AnchorsMissing,
    /// The voice button has no usable container to insert beside.
    NoContainer,
    /// The page refused to create the button.
    Rejected,
}

impl fmt::Display for InjectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InjectionOutcome::Injected => "injected",
            InjectionOutcome::Present => "present",
            InjectionOutcome::AnchorsMissing => "anchors_missing",
            InjectionOutcome::NoContainer => "no_container",
            InjectionOutcome::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

pub struct InjectionWatcher {
    config: EditorConfig,
    injections: u64,
}

impl InjectionWatcher {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            config,
            injections: 0,
        }
    }

    /// How many times a trigger has been inserted, including re-injections
    /// after the host dropped its toolbar.
    pub fn injections(&self) -> u64 {
        self.injections
    }

    pub fn connect<D: HostDom>(&self, dom: &mut D) {
        dom.set_observer(crate::dom::ObserverKind::Injection, true);
    }

    pub fn disconnect<D: HostDom>(&self, dom: &mut D) {
        dom.set_observer(crate::dom::ObserverKind::Injection, false);
    }

    pub fn reconcile<D: HostDom>(&mut self, dom: &mut D) -> InjectionOutcome {
        if dom.element_by_id(&self.config.button_id).is_some() {
            return InjectionOutcome::Present;
        }
        let input = dom.query(&self.config.chat_input_selector);
        let Some(anchor) = dom.query(&self.config.anchor_selector) else {
            return InjectionOutcome::AnchorsMissing;
        };
        if input.is_none() {
            debug!(selector = %self.config.chat_input_selector, "chat input not rendered yet");
            return InjectionOutcome::AnchorsMissing;
        }

        let container = dom.closest(&anchor, &self.config.anchor_container_selector);
        let Some((container, parent)) =
            container.and_then(|c| dom.parent(&c).map(|p| (c, p)))
        else {
            warn!(
                anchor = %self.config.anchor_selector,
                container = %self.config.anchor_container_selector,
                "no container for markdown trigger"
            );
            return InjectionOutcome::NoContainer;
        };

        let Some(button) = dom.create_element("button") else {
            warn!("could not create markdown trigger");
            return InjectionOutcome::Rejected;
        };
        dom.set_attribute(&button, "id", &self.config.button_id);
        dom.add_class(&button, BUTTON_CLASS);
        dom.set_attribute(&button, "type", "button");
        dom.set_attribute(&button, "title", BUTTON_TITLE);
        dom.set_inner_html(&button, BUTTON_ICON);
        dom.insert_before(&parent, &button, &container);

        self.injections += 1;
        info!(id = %self.config.button_id, count = self.injections, "markdown trigger injected");
        InjectionOutcome::Injected
    }
}
