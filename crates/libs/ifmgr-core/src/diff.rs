use std::sync::Arc;

use crate::schema::{Kind, Schema, SchemaNode};
use crate::tree::Node;

/// Per-node comparison outcome between a candidate and a running tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    Unchanged,
    Changed,
    Added,
    Deleted,
}

/// A node of the derived comparison tree.
#[derive(Debug)]
pub struct DiffNode {
    name: String,
    status: DiffStatus,
    kind: Option<Kind>,
    children: Vec<DiffNode>,
}

impl DiffNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DiffStatus {
        self.status
    }

    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    pub fn added(&self) -> bool {
        self.status == DiffStatus::Added
    }

    pub fn deleted(&self) -> bool {
        self.status == DiffStatus::Deleted
    }

    pub fn changed(&self) -> bool {
        self.status == DiffStatus::Changed
    }

    pub fn child(&self, name: &str) -> Option<&DiffNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn build(
    name: &str,
    candidate: Option<&Arc<Node>>,
    running: Option<&Arc<Node>>,
    schema: Option<&Arc<SchemaNode>>,
) -> DiffNode {
    let kind = schema.map(|s| s.kind());
    let mut children = Vec::new();

    let mut names: Vec<&str> = Vec::new();
    if let Some(candidate) = candidate {
        for child in candidate.children() {
            names.push(child.name());
        }
    }
    if let Some(running) = running {
        for child in running.children() {
            if !names.contains(&child.name()) {
                names.push(child.name());
            }
        }
    }

    for child_name in names {
        let child_schema = schema.and_then(|s| s.schema_child(child_name));
        children.push(build(
            child_name,
            candidate.and_then(|c| c.child(child_name)),
            running.and_then(|r| r.child(child_name)),
            child_schema.as_ref(),
        ));
    }

    let status = match (candidate, running) {
        (Some(_), None) => DiffStatus::Added,
        (None, Some(_)) => DiffStatus::Deleted,
        _ => {
            if children.iter().any(|c| c.status != DiffStatus::Unchanged) {
                DiffStatus::Changed
            } else {
                DiffStatus::Unchanged
            }
        }
    };

    DiffNode {
        name: name.to_string(),
        status,
        kind,
        children,
    }
}

/// Comparison of a candidate tree against a running tree, annotated with
/// schema kinds along the way.
#[derive(Debug)]
pub struct Diff {
    root: DiffNode,
}

impl Diff {
    pub fn new(
        candidate: Option<&Arc<Node>>,
        running: Option<&Arc<Node>>,
        schema: &Schema,
    ) -> Diff {
        Diff {
            root: build("root", candidate, running, Some(schema.root())),
        }
    }

    pub fn root(&self) -> &DiffNode {
        &self.root
    }

    pub fn has_changes(&self) -> bool {
        self.root.status != DiffStatus::Unchanged
    }

    /// Walk to `path`, returning the node there and its parent.
    pub fn descendant_with_parent(&self, path: &[String]) -> Option<(&DiffNode, Option<&DiffNode>)> {
        let mut parent: Option<&DiffNode> = None;
        let mut node = &self.root;
        for elem in path {
            let next = node.child(elem)?;
            parent = Some(node);
            node = next;
        }
        Some((node, parent))
    }

    /// Human-oriented rendering of the changed paths, one per line, with
    /// `+`/`-`/`~` markers.
    pub fn to_log_string(&self) -> String {
        let mut lines = Vec::new();
        let mut path = Vec::new();
        collect_lines(&self.root, &mut path, &mut lines);
        if lines.is_empty() {
            "none".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn collect_lines(node: &DiffNode, path: &mut Vec<String>, lines: &mut Vec<String>) {
    match node.status {
        DiffStatus::Unchanged => return,
        // one line covers the whole added/deleted subtree
        DiffStatus::Added | DiffStatus::Deleted if !path.is_empty() => {
            let marker = if node.added() { '+' } else { '-' };
            lines.push(format!("{} {}", marker, path.join(" ")));
            return;
        }
        _ => {}
    }

    for child in &node.children {
        path.push(child.name.clone());
        collect_lines(child, path, lines);
        path.pop();
    }
}
