use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::MgmtError;

/// Node categories the core cares about when interpreting a
/// configuration tree.
///
/// `ListEntry` and `LeafValue` never appear in a schema descriptor file;
/// they are the synthetic schemas handed out when descending into a list
/// or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Container,
    List,
    ListEntry,
    Leaf,
    LeafList,
    LeafValue,
}

/// One node of the compiled schema descriptor. Immutable once built.
#[derive(Debug)]
pub struct SchemaNode {
    name: String,
    kind: Kind,
    secret: bool,
    default: Option<String>,
    children: BTreeMap<String, Arc<SchemaNode>>,
    // synthetic child handed out by schema_child for List/Leaf/LeafList
    element: Option<Arc<SchemaNode>>,
}

impl SchemaNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn secret(&self) -> bool {
        self.secret
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &Arc<SchemaNode>> {
        self.children.values()
    }

    /// Schema for the child named `name`, if the schema permits one.
    ///
    /// Lists admit any entry name (entries are keyed by value); leaves and
    /// leaf-lists admit any value node.
    pub fn schema_child(&self, name: &str) -> Option<Arc<SchemaNode>> {
        match self.kind {
            Kind::Container | Kind::ListEntry => self.children.get(name).cloned(),
            Kind::List | Kind::Leaf | Kind::LeafList => self.element.clone(),
            Kind::LeafValue => None,
        }
    }
}

/// Raw deserialized form of a schema descriptor file.
#[derive(Debug, Deserialize)]
struct RawSchemaNode {
    name: String,
    kind: String,
    #[serde(default)]
    secret: bool,
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    children: Vec<RawSchemaNode>,
}

fn build(raw: RawSchemaNode) -> Result<Arc<SchemaNode>, MgmtError> {
    let kind = match raw.kind.as_str() {
        "container" => Kind::Container,
        "list" => Kind::List,
        "leaf" => Kind::Leaf,
        "leaf-list" => Kind::LeafList,
        other => {
            return Err(MgmtError::operation_failed(format!(
                "unsupported schema node kind {:?}",
                other
            ))
            .with_path(raw.name))
        }
    };

    let mut children = BTreeMap::new();
    for child in raw.children {
        let built = build(child)?;
        children.insert(built.name.clone(), built);
    }

    let element = match kind {
        Kind::List => Some(Arc::new(SchemaNode {
            name: String::new(),
            kind: Kind::ListEntry,
            secret: false,
            default: None,
            children: std::mem::take(&mut children),
            element: None,
        })),
        Kind::Leaf | Kind::LeafList => Some(Arc::new(SchemaNode {
            name: String::new(),
            kind: Kind::LeafValue,
            secret: raw.secret,
            default: None,
            children: BTreeMap::new(),
            element: None,
        })),
        _ => None,
    };

    Ok(Arc::new(SchemaNode {
        name: raw.name,
        kind,
        secret: raw.secret,
        default: raw.default,
        children,
        element,
    }))
}

/// An immutable compiled schema tree.
///
/// Readers treat it as opaque; the only operations are descent and the
/// per-node attributes above.
#[derive(Debug, Clone)]
pub struct Schema {
    root: Arc<SchemaNode>,
}

impl Schema {
    /// A schema with no declared nodes. Tree decoding falls back to
    /// structural interpretation under it.
    pub fn empty() -> Self {
        Schema {
            root: Arc::new(SchemaNode {
                name: "root".to_string(),
                kind: Kind::Container,
                secret: false,
                default: None,
                children: BTreeMap::new(),
                element: None,
            }),
        }
    }

    /// Parse a JSON schema descriptor. The top level is a list of root
    /// node descriptors.
    pub fn from_json(input: &str) -> Result<Self, MgmtError> {
        let raw: Vec<RawSchemaNode> = serde_json::from_str(input)
            .map_err(|err| MgmtError::operation_failed(format!("schema parse: {}", err)))?;
        let mut children = BTreeMap::new();
        for node in raw {
            let built = build(node)?;
            children.insert(built.name.clone(), built);
        }
        Ok(Schema {
            root: Arc::new(SchemaNode {
                name: "root".to_string(),
                kind: Kind::Container,
                secret: false,
                default: None,
                children,
                element: None,
            }),
        })
    }

    pub fn root(&self) -> &Arc<SchemaNode> {
        &self.root
    }

    /// Walk the schema along `path`, returning the node reached.
    pub fn descend(&self, path: &[String]) -> Option<Arc<SchemaNode>> {
        let mut node = self.root.clone();
        for elem in path {
            node = node.schema_child(elem)?;
        }
        Some(node)
    }

    /// Walk the schema along `path`, reporting the first unknown element
    /// with the path prefix leading to it.
    pub fn validate_path(&self, path: &[String]) -> Result<(), MgmtError> {
        let mut node = self.root.clone();
        for (i, elem) in path.iter().enumerate() {
            node = node
                .schema_child(elem)
                .ok_or_else(|| MgmtError::unknown_element(elem).with_path(path[..i].join("/")))?;
        }
        Ok(())
    }
}

/// Process-wide lock-free holder of the currently compiled schema.
///
/// Updated by bootstrap, read by everything else; readers take one
/// consistent snapshot per operation.
#[derive(Clone)]
pub struct SchemaStore {
    inner: Arc<ArcSwap<Schema>>,
}

impl SchemaStore {
    pub fn new(schema: Schema) -> Self {
        SchemaStore {
            inner: Arc::new(ArcSwap::from_pointee(schema)),
        }
    }

    pub fn load(&self) -> Arc<Schema> {
        self.inner.load_full()
    }

    pub fn store(&self, schema: Schema) {
        self.inner.store(Arc::new(schema));
    }
}

impl Default for SchemaStore {
    fn default() -> Self {
        SchemaStore::new(Schema::empty())
    }
}
