//! Logging utilities and the hierarchical node log
//!
//! The graph owns a [`LogTree`]; every node receives a [`NodeLog`] handle for
//! its own scope at registration. Entries are buffered per scope and also
//! forwarded to the `log` facade immediately, so drivers that only configure
//! `env_logger` still see everything. Buffered entries are extracted by the
//! tree owner *before* nodes are destroyed; handles never reach across scopes.

pub use log::{debug, error, info, trace, warn};
use log::Level;
use std::cell::RefCell;
use std::rc::Rc;

/// Initialize the logging system for driver binaries
pub fn init() {
    env_logger::init();
}

/// One buffered log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity of the record
    pub level: Level,
    /// Dotted scope path, e.g. `graph.frame_sync`
    pub scope: String,
    /// Message text
    pub message: String,
}

struct ScopeBuffer {
    path: String,
    entries: Vec<LogEntry>,
    error_count: u32,
}

/// Handle to a single log scope, held by the node that owns the scope
#[derive(Clone)]
pub struct NodeLog {
    scope: Rc<RefCell<ScopeBuffer>>,
}

impl NodeLog {
    fn record(&self, level: Level, message: String) {
        let mut scope = self.scope.borrow_mut();
        log::log!(target: "graph", level, "[{}] {}", scope.path, message);
        if level == Level::Error {
            scope.error_count += 1;
        }
        let path = scope.path.clone();
        scope.entries.push(LogEntry {
            level,
            scope: path,
            message,
        });
    }

    /// Record a debug-level entry
    pub fn debug(&self, message: impl Into<String>) {
        self.record(Level::Debug, message.into());
    }

    /// Record an info-level entry
    pub fn info(&self, message: impl Into<String>) {
        self.record(Level::Info, message.into());
    }

    /// Record a warning
    pub fn warn(&self, message: impl Into<String>) {
        self.record(Level::Warn, message.into());
    }

    /// Record an error
    pub fn error(&self, message: impl Into<String>) {
        self.record(Level::Error, message.into());
    }

    /// Dotted path of this scope
    pub fn path(&self) -> String {
        self.scope.borrow().path.clone()
    }

    /// Number of error-level entries recorded in this scope
    pub fn error_count(&self) -> u32 {
        self.scope.borrow().error_count
    }
}

/// Single-owner tree of log scopes
///
/// The tree owner (the render graph) creates child scopes and is the only
/// party allowed to extract buffered entries. Extraction runs before node
/// destruction, so no scope ever outlives its owner.
pub struct LogTree {
    root_path: String,
    scopes: Vec<Rc<RefCell<ScopeBuffer>>>,
}

impl LogTree {
    /// Create a tree rooted at `root_path`
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            scopes: Vec::new(),
        }
    }

    /// Create a child scope and return the handle for its owner
    pub fn child(&mut self, name: &str) -> NodeLog {
        let scope = Rc::new(RefCell::new(ScopeBuffer {
            path: format!("{}.{}", self.root_path, name),
            entries: Vec::new(),
            error_count: 0,
        }));
        self.scopes.push(Rc::clone(&scope));
        NodeLog { scope }
    }

    /// Drain every buffered entry, in scope-creation order
    pub fn extract(&mut self) -> Vec<LogEntry> {
        let mut out = Vec::new();
        for scope in &self.scopes {
            out.append(&mut scope.borrow_mut().entries);
        }
        out
    }

    /// Total error-level entries across all scopes
    pub fn error_count(&self) -> u32 {
        self.scopes
            .iter()
            .map(|scope| scope.borrow().error_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_scopes_are_prefixed() {
        let mut tree = LogTree::new("graph");
        let log = tree.child("frame_sync");

        assert_eq!(log.path(), "graph.frame_sync");
    }

    #[test]
    fn test_extract_drains_in_creation_order() {
        let mut tree = LogTree::new("graph");
        let first = tree.child("a");
        let second = tree.child("b");

        second.info("from b");
        first.warn("from a");

        let entries = tree.extract();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].scope, "graph.a");
        assert_eq!(entries[1].scope, "graph.b");
        assert!(tree.extract().is_empty());
    }

    #[test]
    fn test_error_count_accumulates() {
        let mut tree = LogTree::new("graph");
        let log = tree.child("node");

        log.error("first");
        log.error("second");
        log.info("not an error");

        assert_eq!(log.error_count(), 2);
        assert_eq!(tree.error_count(), 2);
    }
}
