//! # Stage: Code Block Augmenter
//!
//! ## Responsibility
//! Gives every code-editor element taller than the collapse threshold a
//! fixed-height presentation and a single toggle control.
//!
//! ## Guarantees
//! - A block is registered for size observation at most once
//! - A block gets at most one control, and only when its scroll height
//!   exceeds the threshold at the time it is measured
//! - Bursts of structural mutations schedule one re-scan per animation frame
//! - Nothing is registered or measured while disconnected; the engine
//!   disconnects on the suppressed route
//!
//! ## NOT Responsible For
//! - Deciding the route (that is [`RouteGate`](crate::route::RouteGate))
//! - Un-collapsing blocks that later shrink below the threshold
//!
//! Per block:
//!
//! ```text
//! unobserved ──register──► observed(expanded)
//! observed(expanded) ──height > threshold, no control──► observed(collapsed)
//! collapsed ◄──toggle──► expanded
//! ```

use tracing::{debug, trace, warn};

use crate::config::CodeBlockConfig;
use crate::dom::{BlockState, HostDom, ObserverKind};

/// Result of handling one mutation burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Blocks newly registered in this pass.
    pub registered: usize,
    /// Blocks that gained a control in this pass.
    pub collapsed: usize,
}

impl ScanReport {
    fn absorb(&mut self, other: ScanReport) {
        self.registered += other.registered;
        self.collapsed += other.collapsed;
    }
}

#[derive(Debug, Clone)]
pub struct CodeBlockAugmenter {
    config: CodeBlockConfig,
    observing: bool,
    frame_pending: bool,
    rescans: usize,
}

impl CodeBlockAugmenter {
    pub fn new(config: CodeBlockConfig) -> Self {
        Self {
            config,
            observing: false,
            frame_pending: false,
            rescans: 0,
        }
    }

    pub fn config(&self) -> &CodeBlockConfig {
        &self.config
    }

    /// `true` while the structural observer is connected.
    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Number of full re-scans performed so far.
    pub fn rescans(&self) -> usize {
        self.rescans
    }

    // -- observer lifecycle ------------------------------------------------

    /// Connect the structural observer if it is not already connected.
    pub fn connect<D: HostDom>(&mut self, dom: &mut D) {
        if !self.observing {
            dom.set_observer(ObserverKind::CodeBlocks, true);
            self.observing = true;
            debug!("code block observer connected");
        }
    }

    /// Disconnect the structural observer and drop any scheduled re-scan.
    /// Existing controls stay in place.
    pub fn disconnect<D: HostDom>(&mut self, dom: &mut D) {
        self.frame_pending = false;
        if self.observing {
            dom.set_observer(ObserverKind::CodeBlocks, false);
            self.observing = false;
            debug!("code block observer disconnected");
        }
    }

    /// Tear down every observation, including per-block size observers,
    /// and forget which blocks were registered so a later start observes
    /// them again.
    pub fn shutdown<D: HostDom>(&mut self, dom: &mut D) {
        self.disconnect(dom);
        dom.unobserve_all_sizes();
        dom.untrack_all();
    }

    // -- scanning ----------------------------------------------------------

    /// Register every new block in the document and re-measure the ones
    /// already registered, so growth missed while disconnected is applied.
    pub fn rescan<D: HostDom>(&mut self, dom: &mut D) -> ScanReport {
        self.rescans += 1;
        let mut report = ScanReport::default();
        for block in dom.query_all(&self.config.block_selector) {
            if dom.is_tracked(&block) {
                report.collapsed += usize::from(self.measure(dom, &block));
            } else {
                report.absorb(self.register(dom, &block));
            }
        }
        trace!(registered = report.registered, collapsed = report.collapsed, "rescan");
        report
    }

    /// Idempotently start observing `block` and measure it once.
    pub fn register<D: HostDom>(&mut self, dom: &mut D, block: &D::Node) -> ScanReport {
        if !dom.track(block) {
            return ScanReport::default();
        }
        dom.observe_size(block);
        let collapsed = self.measure(dom, block);
        ScanReport {
            registered: 1,
            collapsed: usize::from(collapsed),
        }
    }

    /// Handle nodes added in one mutation batch. Schedules at most one
    /// re-scan for the next animation frame when any block was found.
    pub fn on_added<D: HostDom>(&mut self, dom: &mut D, added: &[D::Node]) -> ScanReport {
        let mut report = ScanReport::default();
        let mut found = false;
        for node in added {
            if dom.matches(node, &self.config.block_selector) {
                found = true;
                report.absorb(self.register(dom, node));
            } else {
                for block in dom.query_within(node, &self.config.block_selector) {
                    found = true;
                    report.absorb(self.register(dom, &block));
                }
            }
        }
        if found && !self.frame_pending {
            self.frame_pending = true;
            dom.request_animation_frame();
        }
        report
    }

    /// Run the re-scan scheduled by [`on_added`](Self::on_added), if any.
    pub fn on_animation_frame<D: HostDom>(&mut self, dom: &mut D) -> Option<ScanReport> {
        if !std::mem::take(&mut self.frame_pending) {
            return None;
        }
        Some(self.rescan(dom))
    }

    /// Size-observer callback for one block. Returns `true` when the block
    /// was collapsed by this call.
    pub fn measure<D: HostDom>(&mut self, dom: &mut D, block: &D::Node) -> bool {
        if !dom.matches(block, &self.config.block_selector) {
            return false;
        }
        if self.control_of(dom, block).is_some() {
            return false;
        }
        let height = dom.scroll_height(block);
        if height <= self.config.collapse_threshold_px {
            return false;
        }

        let Some(control) = dom.create_element("button") else {
            warn!("could not create code block control");
            return false;
        };
        dom.add_class(&control, &self.config.control_class);
        dom.set_attribute(&control, "type", "button");
        BlockState::Collapsed.write(dom, &control);
        BlockState::Collapsed.write(dom, block);
        dom.append_child(block, &control);
        dom.set_height_px(block, self.config.collapse_threshold_px);
        debug!(height, "collapsed code block");
        true
    }

    // -- toggling ----------------------------------------------------------

    /// Handle activation of a control. Returns the new state, or `None` when
    /// `control` does not belong to a collapsible block.
    pub fn toggle<D: HostDom>(&mut self, dom: &mut D, control: &D::Node) -> Option<BlockState> {
        let block = dom.closest(control, &self.config.block_selector)?;
        let state = BlockState::read(dom, &block)?;

        let next = state.toggled();
        match next {
            BlockState::Expanded => {
                let height = dom
                    .query_within(&block, &self.config.scroller_selector)
                    .first()
                    .map(|s| dom.scroll_height(s))
                    .unwrap_or_else(|| dom.scroll_height(&block));
                dom.set_height_px(&block, height);
            }
            BlockState::Collapsed => {
                dom.set_height_px(&block, self.config.collapse_threshold_px);
                if let Some(target) = self.scroll_target(dom, &block) {
                    dom.scroll_into_view_top(&target);
                }
            }
        }
        next.write(dom, &block);
        next.write(dom, control);
        debug!(state = %next, "toggled code block");
        Some(next)
    }

    /// `true` when `node` is a toggle control this augmenter created.
    pub fn is_control<D: HostDom>(&self, dom: &D, node: &D::Node) -> bool {
        dom.has_class(node, &self.config.control_class)
    }

    fn control_of<D: HostDom>(&self, dom: &D, block: &D::Node) -> Option<D::Node> {
        let selector = format!(".{}", self.config.control_class);
        dom.query_within(block, &selector).into_iter().next()
    }

    /// Parent of the enclosing message wrapper, falling back to the block's
    /// own parent.
    fn scroll_target<D: HostDom>(&self, dom: &D, block: &D::Node) -> Option<D::Node> {
        dom.closest(block, &self.config.message_wrapper_selector)
            .and_then(|wrapper| dom.parent(&wrapper))
            .or_else(|| dom.parent(block))
    }
}
