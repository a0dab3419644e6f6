//! Relationship graph.
//!
//! Record types are nodes; named, directed foreign-key relationships are
//! edges. Nodes and edges live in flat arenas with handle identity
//! ([`NodeId`] / [`EdgeId`]), so cyclic shapes (self-joins, mutual joins)
//! never form reference cycles, and traversal carries an explicit
//! visited-edge set to guarantee termination.
//!
//! The graph is built once at startup from `joins_to` declarations and is
//! read-only afterwards.

use std::collections::{HashMap, HashSet, VecDeque};

use heck::{ToLowerCamelCase, ToSnakeCase};

use crate::dialect::JoinDescriptor;
use crate::error::ComposeResult;
use crate::schema::Schema;

/// Handle to a node in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Handle to an edge in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(usize);

/// Resolved options of a registered edge.
///
/// `name` labels the child→parent direction, `as_name` the parent→child
/// direction; `via` is the foreign-key column on the child row referencing
/// the parent's primary key.
#[derive(Debug, Clone)]
pub struct EdgeOptions {
    pub name: String,
    pub as_name: String,
    pub via: String,
    pub multiple: bool,
}

/// Caller-supplied options for `joins_to`; omitted fields are derived.
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub name: Option<String>,
    pub as_name: Option<String>,
    pub via: Option<String>,
    pub multiple: bool,
}

impl JoinOptions {
    /// One-to-many relationship with derived names.
    pub fn multiple() -> Self {
        Self {
            multiple: true,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn as_name(mut self, as_name: &str) -> Self {
        self.as_name = Some(as_name.to_string());
        self
    }

    pub fn via(mut self, via: &str) -> Self {
        self.via = Some(via.to_string());
        self
    }
}

#[derive(Debug)]
struct Node {
    table: String,
    /// Incident edges, both directions.
    edges: Vec<EdgeId>,
}

#[derive(Debug)]
struct Edge {
    parent: NodeId,
    child: NodeId,
    options: EdgeOptions,
}

/// One traversal step of a path: the edge taken and whether it was walked
/// parent→child (`forward`).
#[derive(Debug, Clone, Copy)]
pub struct PathHop {
    pub edge: EdgeId,
    pub forward: bool,
}

/// An ordered node/edge/node/... walk from a start node to a target node.
#[derive(Debug, Clone)]
pub struct RelationshipPath {
    pub start: NodeId,
    pub hops: Vec<PathHop>,
}

impl RelationshipPath {
    /// The node the path ends on.
    pub fn terminal(&self, graph: &RelationshipGraph) -> NodeId {
        let mut node = self.start;
        for hop in &self.hops {
            node = graph.far_node(hop);
        }
        node
    }

    /// Overall cardinality: true when any hop is a one-to-many traversal in
    /// the forward direction.
    pub fn multiple(&self, graph: &RelationshipGraph) -> bool {
        self.hops
            .iter()
            .any(|hop| hop.forward && graph.edges[hop.edge.0].options.multiple)
    }

    /// Resolve the path into join descriptors ready for SQL emission.
    ///
    /// Aliases are `{table}__j{n}` with `n` starting at `alias_start`, so
    /// repeated joins to one physical table stay distinct.
    pub fn join_steps(
        &self,
        graph: &RelationshipGraph,
        schema: &Schema,
        base_alias: &str,
        alias_start: usize,
    ) -> ComposeResult<Vec<JoinDescriptor>> {
        let mut steps = Vec::with_capacity(self.hops.len());
        let mut near_node = self.start;
        let mut near_alias = base_alias.to_string();
        for (i, hop) in self.hops.iter().enumerate() {
            let edge = &graph.edges[hop.edge.0];
            let far_node = graph.far_node(hop);
            let far_table = graph.nodes[far_node.0].table.clone();
            let alias = format!("{}__j{}", far_table, alias_start + i);
            let step = if hop.forward {
                // Parent→child: the child row's `via` column references the
                // parent's primary key.
                let parent_pk = schema.table(&graph.nodes[near_node.0].table)?.primary_key_name();
                JoinDescriptor {
                    table: far_table,
                    alias: alias.clone(),
                    column: edge.options.via.clone(),
                    from_alias: near_alias.clone(),
                    from_column: parent_pk.to_string(),
                    multiple: edge.options.multiple,
                    filters: Vec::new(),
                }
            } else {
                let parent_pk = schema.table(&graph.nodes[far_node.0].table)?.primary_key_name();
                JoinDescriptor {
                    table: far_table,
                    alias: alias.clone(),
                    column: parent_pk.to_string(),
                    from_alias: near_alias.clone(),
                    from_column: edge.options.via.clone(),
                    multiple: false,
                    filters: Vec::new(),
                }
            };
            steps.push(step);
            near_node = far_node;
            near_alias = alias;
        }
        Ok(steps)
    }
}

/// The relationship graph: flat node/edge arenas plus a table-name index.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    by_table: HashMap<String, NodeId>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the node for a record type; the same type always yields
    /// the same handle.
    pub fn of(&mut self, table: &str) -> NodeId {
        if let Some(&id) = self.by_table.get(table) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            table: table.to_string(),
            edges: Vec::new(),
        });
        self.by_table.insert(table.to_string(), id);
        id
    }

    /// Look up an existing node.
    pub fn node(&self, table: &str) -> Option<NodeId> {
        self.by_table.get(table).copied()
    }

    /// Table name of a node.
    pub fn table_name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].table
    }

    /// Resolved options of an edge.
    pub fn edge_options(&self, edge: EdgeId) -> &EdgeOptions {
        &self.edges[edge.0].options
    }

    /// Declare that `child` rows carry a foreign key to `parent` rows.
    ///
    /// Derivation of omitted options: `name` is the parent type's singular
    /// camel name; `as_name` is the child type's camel name, pluralized when
    /// `multiple`; `via` is `{snake(name)}_id`. An existing edge between the
    /// same two nodes with the same resolved `name` is reused.
    pub fn joins_to(&mut self, child: NodeId, parent: NodeId, opts: JoinOptions) -> EdgeId {
        let parent_table = self.nodes[parent.0].table.clone();
        let child_table = self.nodes[child.0].table.clone();
        let name = opts
            .name
            .unwrap_or_else(|| singularize(&parent_table).to_lower_camel_case());
        let as_name = opts.as_name.unwrap_or_else(|| {
            let singular = singularize(&child_table);
            if opts.multiple {
                pluralize(&singular).to_lower_camel_case()
            } else {
                singular.to_lower_camel_case()
            }
        });
        let via = opts
            .via
            .unwrap_or_else(|| format!("{}_id", name.to_snake_case()));

        for &eid in &self.nodes[child.0].edges {
            let e = &self.edges[eid.0];
            if e.parent == parent && e.child == child && e.options.name == name {
                return eid;
            }
        }

        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            parent,
            child,
            options: EdgeOptions {
                name,
                as_name,
                via,
                multiple: opts.multiple,
            },
        });
        self.nodes[child.0].edges.push(id);
        if parent != child {
            self.nodes[parent.0].edges.push(id);
        }
        id
    }

    /// Resolve a single relationship name from `start` into a path.
    ///
    /// Breadth-first over incident edges: walking child→parent matches the
    /// edge's `name`, walking parent→child matches its `as_name`. The
    /// visited-edge set guarantees termination on cyclic graphs. Returns
    /// `None` when nothing matches; nested names (`a__b__c`) are split by
    /// the caller, one `find` per hop.
    pub fn find(&self, start: NodeId, name: &str) -> Option<RelationshipPath> {
        let mut visited: HashSet<EdgeId> = HashSet::new();
        let mut queue: VecDeque<(NodeId, Vec<PathHop>)> = VecDeque::new();
        queue.push_back((start, Vec::new()));

        while let Some((node, path)) = queue.pop_front() {
            for &eid in &self.nodes[node.0].edges {
                if !visited.insert(eid) {
                    continue;
                }
                let edge = &self.edges[eid.0];
                if edge.parent == node {
                    let mut next = path.clone();
                    next.push(PathHop {
                        edge: eid,
                        forward: true,
                    });
                    if edge.options.as_name == name {
                        return Some(RelationshipPath { start, hops: next });
                    }
                    queue.push_back((edge.child, next));
                }
                if edge.child == node {
                    let mut next = path.clone();
                    next.push(PathHop {
                        edge: eid,
                        forward: false,
                    });
                    if edge.options.name == name {
                        return Some(RelationshipPath { start, hops: next });
                    }
                    queue.push_back((edge.parent, next));
                }
            }
        }
        None
    }

    fn far_node(&self, hop: &PathHop) -> NodeId {
        let edge = &self.edges[hop.edge.0];
        if hop.forward { edge.child } else { edge.parent }
    }
}

const IRREGULAR: &[(&str, &str)] = &[
    ("child", "children"),
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("goose", "geese"),
    ("mouse", "mice"),
    ("foot", "feet"),
    ("tooth", "teeth"),
];

fn singularize(word: &str) -> String {
    for (singular, plural) in IRREGULAR {
        if word == *plural {
            return (*singular).to_string();
        }
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["ses", "xes", "zes", "ches", "shes"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            return format!("{stem}{}", &suffix[..suffix.len() - 2]);
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

fn pluralize(word: &str) -> String {
    for (singular, plural) in IRREGULAR {
        if word == *singular {
            return (*plural).to_string();
        }
    }
    let bytes = word.as_bytes();
    if bytes.len() >= 2 && bytes[bytes.len() - 1] == b'y' {
        let before = bytes[bytes.len() - 2] as char;
        if !matches!(before, 'a' | 'e' | 'i' | 'o' | 'u') {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }
    format!("{word}s")
}
