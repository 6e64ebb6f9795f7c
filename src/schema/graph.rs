//! Relationship graph for FK-aware operations.
//!
//! Provides:
//! - Dependency graph construction from schema references
//! - Strongly-connected component decomposition (iterative Tarjan)
//! - Cycle classification for deferrable-constraint handling
//!
//! Everything here is a pure function of the schema model and is usable
//! without a database connection.

use super::{ReferenceId, Schema, TableId};
use ahash::AHashMap;

/// A dependency edge: `child` holds a foreign key referencing `parent`,
/// so `child` must be loaded after `parent` unless the edge is deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    pub reference: ReferenceId,
    /// Node index of the referencing table
    pub child: usize,
    /// Node index of the referenced table
    pub parent: usize,
    pub deferrable: bool,
}

impl GraphEdge {
    pub fn is_self_reference(&self) -> bool {
        self.child == self.parent
    }
}

/// A strongly-connected component of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Node indices, ascending
    pub nodes: Vec<usize>,
    /// More than one table, or a single table referencing itself
    pub cyclic: bool,
}

/// Dependency graph over a set of tables.
///
/// Node order is the order the tables were given in, which callers use as
/// the stable tie-break for ordering.
#[derive(Debug)]
pub struct SchemaGraph {
    nodes: Vec<TableId>,
    edges: Vec<GraphEdge>,
}

impl SchemaGraph {
    /// Build a dependency graph over every table in the schema
    pub fn from_schema(schema: &Schema) -> Self {
        let tables: Vec<TableId> = schema.iter().map(|t| t.id).collect();
        Self::for_tables(schema, &tables)
    }

    /// Build a dependency graph restricted to `tables`; references touching
    /// any other table are ignored.
    pub fn for_tables(schema: &Schema, tables: &[TableId]) -> Self {
        let mut index = AHashMap::with_capacity(tables.len());
        let mut nodes = Vec::with_capacity(tables.len());
        for &id in tables {
            if !index.contains_key(&id) {
                index.insert(id, nodes.len());
                nodes.push(id);
            }
        }

        let edges = schema
            .references
            .iter()
            .filter_map(|r| {
                let child = *index.get(&r.table)?;
                let parent = *index.get(&r.referenced_table)?;
                Some(GraphEdge {
                    reference: r.id,
                    child,
                    parent,
                    deferrable: r.deferrable,
                })
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn table(&self, node: usize) -> TableId {
        self.nodes[node]
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Decompose the graph into strongly-connected components.
    ///
    /// Components come out in reverse topological order of the child → parent
    /// edges, i.e. referenced tables before the tables that reference them.
    pub fn components(&self) -> Vec<Component> {
        let mut adjacency = vec![Vec::new(); self.nodes.len()];
        let mut self_loop = vec![false; self.nodes.len()];
        for edge in &self.edges {
            adjacency[edge.child].push(edge.parent);
            if edge.is_self_reference() {
                self_loop[edge.child] = true;
            }
        }

        strongly_connected_components(&adjacency)
            .into_iter()
            .map(|mut nodes| {
                nodes.sort_unstable();
                let cyclic = nodes.len() > 1 || self_loop[nodes[0]];
                Component { nodes, cyclic }
            })
            .collect()
    }
}

const UNVISITED: usize = usize::MAX;

/// Tarjan's strongly-connected components algorithm over an adjacency list.
///
/// Uses an explicit call stack, so deep dependency chains cannot overflow
/// the thread stack.
pub fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut sccs = Vec::new();
    let mut counter = 0usize;

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }

        // (node, next successor position)
        let mut call: Vec<(usize, usize)> = vec![(start, 0)];
        index[start] = counter;
        lowlink[start] = counter;
        counter += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = counter;
                    lowlink[w] = counter;
                    counter += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }

            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                sccs.push(component);
            }
        }
    }

    sccs
}
