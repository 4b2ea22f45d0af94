//! View-tree mutation interceptor.
//!
//! Watches child-list mutations streamed from the host's rendered tree and
//! reports only the removal of structurally critical nodes: the root
//! container, anything carrying the critical marker attribute, or a known
//! app-container class. All other churn (re-renders, list updates) is
//! ignored so benign mutations never touch the buffer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::CaptureBuffer;
use crate::report::{ErrorReport, ReportKind};

/// Identity of one node in the rendered tree, as emitted by the host.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: HashMap<String, String>,
}

/// Child-list mutation events the host streams into the watcher.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    NodeRemoved(NodeInfo),
    NodeAdded(NodeInfo),
}

/// Predicate configuration for "is this element structurally critical".
#[derive(Debug, Clone)]
pub struct MutationCriteria {
    pub root_id: String,
    pub critical_attribute: String,
    pub container_classes: Vec<String>,
}

impl Default for MutationCriteria {
    fn default() -> Self {
        Self {
            root_id: "root".into(),
            critical_attribute: "data-critical".into(),
            container_classes: vec!["app-container".into(), "main-content".into()],
        }
    }
}

pub struct MutationWatcher {
    buffer: Arc<CaptureBuffer>,
    criteria: MutationCriteria,
}

impl MutationWatcher {
    pub fn new(buffer: Arc<CaptureBuffer>, criteria: MutationCriteria) -> Arc<Self> {
        Arc::new(Self { buffer, criteria })
    }

    /// Narrow structural predicate. Deliberately strict: false negatives are
    /// cheaper than flooding the buffer on every re-render.
    pub fn is_critical(&self, node: &NodeInfo) -> bool {
        if node.id.as_deref() == Some(self.criteria.root_id.as_str()) {
            return true;
        }
        if node.attributes.contains_key(&self.criteria.critical_attribute) {
            return true;
        }
        node.classes
            .iter()
            .any(|c| self.criteria.container_classes.iter().any(|k| k == c))
    }

    /// Feed one mutation event. Only critical removals produce a report.
    pub fn observe(&self, event: &MutationEvent) {
        let MutationEvent::NodeRemoved(node) = event else {
            return;
        };
        if !self.is_critical(node) {
            return;
        }

        let identity = node
            .id
            .as_deref()
            .map(|id| format!("#{id}"))
            .unwrap_or_else(|| node.tag.clone());
        let report = ErrorReport::new(
            ReportKind::DomMutation,
            format!("Critical element removed from view tree: {identity}"),
        )
        .with_context("tag", node.tag.clone())
        .with_context("id", node.id.clone().unwrap_or_default())
        .with_context("classes", node.classes.join(" "));
        self.buffer.capture(report);
    }

    /// Drain events from `rx` until the host drops the sender. Dropping the
    /// sender is the teardown contract; stopping twice is naturally a no-op.
    pub fn start(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<MutationEvent>) -> JoinHandle<()> {
        let watcher = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                watcher.observe(&event);
            }
            tracing::debug!("Mutation watcher channel closed, observer exiting");
        })
    }
}
