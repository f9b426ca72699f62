use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::MgmtError;
use crate::schema::{Kind, Schema, SchemaNode};

/// One node of a configuration tree.
///
/// Values are modelled the way the management plane models them: a leaf
/// `description test` is a node `description` with a single child node
/// `test`. Trees are immutable once built and shared via `Arc`; two trees
/// are "the same" only under pointer equality.
#[derive(Debug, PartialEq, Eq)]
pub struct Node {
    name: String,
    children: Vec<Arc<Node>>,
}

impl Node {
    pub fn new(name: impl Into<String>, children: Vec<Arc<Node>>) -> Arc<Node> {
        Arc::new(Node {
            name: name.into(),
            children,
        })
    }

    pub fn leaf(name: impl Into<String>) -> Arc<Node> {
        Node::new(name, Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Arc<Node>] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Arc<Node>> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.iter().map(|c| c.name.clone()).collect()
    }
}

/// Pointer identity over possibly-empty trees. Two empty trees are the
/// same tree.
pub fn same_tree(a: &Option<Arc<Node>>, b: &Option<Arc<Node>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Split a `/`-separated path string into elements.
pub fn makepath(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|elem| !elem.is_empty())
        .map(|elem| elem.to_string())
        .collect()
}

/// Walk a tree along `path`.
pub fn node_at<'a>(tree: &'a Arc<Node>, path: &[String]) -> Option<&'a Arc<Node>> {
    let mut node = tree;
    for elem in path {
        node = node.child(elem)?;
    }
    Some(node)
}

/// Find `interfaces/<type>/<name>` in `tree` and wrap the found subtree
/// in a fresh synthetic root holding only the path down to it.
///
/// The result is a new tree root, never a node of the input: the commit
/// collaborator expects a fully rooted path.
pub fn commit_root(name: &str, tree: &Option<Arc<Node>>) -> Option<Arc<Node>> {
    let tree = tree.as_ref()?;
    let intf_tree = tree.child("interfaces")?;
    for intf_type in intf_tree.children() {
        for intf in intf_type.children() {
            if intf.name() == name {
                let ty = Node::new(intf_type.name(), vec![intf.clone()]);
                let interfaces = Node::new("interfaces", vec![ty]);
                return Some(Node::new("root", vec![interfaces]));
            }
        }
    }
    None
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn decode_value(name: &str, value: &Value, schema: Option<&Arc<SchemaNode>>) -> Arc<Node> {
    let mut children = Vec::new();
    match value {
        Value::Object(members) => {
            for (key, member) in members {
                let child_schema = schema.and_then(|s| s.schema_child(key));
                children.push(decode_value(key, member, child_schema.as_ref()));
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Some(text) = scalar_to_string(item) {
                    children.push(Node::leaf(text));
                }
            }
        }
        Value::Null => {}
        other => {
            if let Some(text) = scalar_to_string(other) {
                children.push(Node::leaf(text));
            }
        }
    }
    Node::new(name, children)
}

/// Decode a JSON configuration document into a tree, consulting the
/// schema for structure but performing no semantic validation.
pub fn from_json(schema: &Schema, input: &str) -> Result<Arc<Node>, MgmtError> {
    let value: Value = serde_json::from_str(input)
        .map_err(|err| MgmtError::operation_failed(format!("config parse: {}", err)))?;
    if !value.is_object() {
        return Err(MgmtError::operation_failed(
            "config parse: top level must be an object",
        ));
    }
    Ok(decode_value("root", &value, Some(schema.root())))
}

/// Options honored by the JSON encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncodeOpts {
    pub include_defaults: bool,
    pub hide_secrets: bool,
}

const SECRET_MASK: &str = "********";

fn leaf_value(node: &Node, schema: Option<&Arc<SchemaNode>>, opts: &EncodeOpts) -> Value {
    let masked = opts.hide_secrets && schema.map(|s| s.secret()).unwrap_or(false);
    match node.children().first() {
        Some(_) if masked => Value::String(SECRET_MASK.to_string()),
        Some(value) => Value::String(value.name().to_string()),
        None => Value::Null,
    }
}

fn leaf_list_value(node: &Node, schema: Option<&Arc<SchemaNode>>, opts: &EncodeOpts) -> Value {
    let masked = opts.hide_secrets && schema.map(|s| s.secret()).unwrap_or(false);
    Value::Array(
        node.children()
            .iter()
            .map(|value| {
                if masked {
                    Value::String(SECRET_MASK.to_string())
                } else {
                    Value::String(value.name().to_string())
                }
            })
            .collect(),
    )
}

fn render(node: &Arc<Node>, schema: Option<&Arc<SchemaNode>>, opts: &EncodeOpts) -> Value {
    match schema.map(|s| s.kind()) {
        Some(Kind::Leaf) => leaf_value(node, schema, opts),
        Some(Kind::LeafList) => leaf_list_value(node, schema, opts),
        Some(Kind::LeafValue) => Value::Null,
        _ => {
            let mut members = Map::new();
            for child in node.children() {
                let child_schema = schema.and_then(|s| s.schema_child(child.name()));
                members.insert(
                    child.name().to_string(),
                    render(child, child_schema.as_ref(), opts),
                );
            }
            if opts.include_defaults {
                if let Some(schema) = schema {
                    for decl in schema.children() {
                        if decl.kind() == Kind::Leaf
                            && !members.contains_key(decl.name())
                            && decl.default_value().is_some()
                        {
                            members.insert(
                                decl.name().to_string(),
                                Value::String(decl.default_value().unwrap_or_default().to_string()),
                            );
                        }
                    }
                }
            }
            Value::Object(members)
        }
    }
}

/// Encode a subtree as JSON. Empty trees encode as `{}`.
///
/// Non-leaf nodes encode as the object of their children; leaf and
/// leaf-list nodes encode as `{ "<name>": <value> }` so the result stays
/// a document.
pub fn encode_json(
    node: Option<&Arc<Node>>,
    schema: Option<&Arc<SchemaNode>>,
    opts: &EncodeOpts,
) -> String {
    let Some(node) = node else {
        return "{}".to_string();
    };
    let value = match schema.map(|s| s.kind()) {
        Some(Kind::Leaf) | Some(Kind::LeafList) => {
            json!({ node.name(): render(node, schema, opts) })
        }
        _ => render(node, schema, opts),
    };
    value.to_string()
}
