//! Load ordering for restore.
//!
//! A table depends on every table its non-deferred foreign keys reference.
//! Strongly-connected components of that graph are cycles; a cycle spanning
//! several tables can only be loaded when every foreign key inside it is
//! deferrable, and those keys are then checked at commit instead.
//!
//! A table referencing only itself needs no deferral: each table is loaded
//! by a single COPY statement and immediate constraints are checked at the
//! end of the statement.

use crate::error::{Result, SliceError};
use crate::manifest::Manifest;
use crate::schema::{Schema, SchemaGraph, TableId};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Tables that must be loaded in one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct LoadUnit {
    /// Tables in load order
    pub tables: Vec<String>,
    /// Constraints deferred to the unit's commit
    pub deferred: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct LoadPlan {
    /// Every table of the slice, each after the tables it depends on
    pub order: Vec<String>,
    /// `schema.constraint` labels of the cycle-breaking constraints
    pub deferred: Vec<String>,
    pub units: Vec<LoadUnit>,
    /// Unit indexes per phase. Units of one phase are independent; a phase
    /// starts once every unit of the previous phases has committed.
    pub phases: Vec<Vec<usize>>,
}

impl LoadPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Compute the load plan of a slice's tables.
///
/// Ties are broken by manifest order, so the same manifest always yields
/// the same plan.
pub fn plan(schema: &Schema, manifest: &Manifest) -> Result<LoadPlan> {
    let mut tables: Vec<TableId> = Vec::with_capacity(manifest.tables.len());
    for entry in &manifest.tables {
        let id = schema.get_table_id(&entry.table).ok_or_else(|| {
            SliceError::Manifest(format!("table {} is not in the schema", entry.table))
        })?;
        tables.push(id);
    }
    plan_tables(schema, &tables)
}

/// Compute the load plan of the given tables, in preference order
pub fn plan_tables(schema: &Schema, tables: &[TableId]) -> Result<LoadPlan> {
    let graph = SchemaGraph::for_tables(schema, tables);
    let components = graph.components();

    let mut component_of = vec![0usize; graph.len()];
    for (c, component) in components.iter().enumerate() {
        for &node in &component.nodes {
            component_of[node] = c;
        }
    }

    // Every edge inside a multi-table cycle must be deferrable
    let mut unbreakable_tables = BTreeSet::new();
    let mut unbreakable_edges = Vec::new();
    let mut deferred_edge = vec![false; graph.edges().len()];
    for (i, edge) in graph.edges().iter().enumerate() {
        if edge.is_self_reference() || component_of[edge.child] != component_of[edge.parent] {
            continue;
        }
        if edge.deferrable {
            deferred_edge[i] = true;
        } else {
            for &node in &components[component_of[edge.child]].nodes {
                unbreakable_tables.insert(schema.table_name(graph.table(node)));
            }
            unbreakable_edges.push(schema.reference_label(edge.reference));
        }
    }
    if !unbreakable_edges.is_empty() {
        return Err(SliceError::UnbreakableCycle {
            tables: unbreakable_tables.into_iter().collect(),
            edges: unbreakable_edges,
        });
    }

    // Kahn's algorithm over the remaining edges, lowest node index first
    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, edge) in graph.edges().iter().enumerate() {
        if deferred_edge[i] || edge.is_self_reference() {
            continue;
        }
        in_degree[edge.child] += 1;
        children[edge.parent].push(edge.child);
    }
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &child in &children[node] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }
    if order.len() != n {
        let tables = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| schema.table_name(graph.table(i)))
            .collect();
        return Err(SliceError::UnbreakableCycle {
            tables,
            edges: Vec::new(),
        });
    }

    // Phase of each component: one past the latest phase it depends on.
    // Components come out referenced-first, so one pass suffices.
    let mut component_phase = vec![0usize; components.len()];
    for c in 0..components.len() {
        let mut phase = 0;
        for edge in graph.edges() {
            if component_of[edge.child] == c && component_of[edge.parent] != c {
                phase = phase.max(component_phase[component_of[edge.parent]] + 1);
            }
        }
        component_phase[c] = phase;
    }

    // Units are components, numbered by their first table in load order
    let mut unit_of_component = vec![usize::MAX; components.len()];
    let mut units: Vec<LoadUnit> = Vec::new();
    let mut unit_phase: Vec<usize> = Vec::new();
    for &node in &order {
        let c = component_of[node];
        if unit_of_component[c] == usize::MAX {
            unit_of_component[c] = units.len();
            units.push(LoadUnit::default());
            unit_phase.push(component_phase[c]);
        }
        units[unit_of_component[c]]
            .tables
            .push(schema.table_name(graph.table(node)));
    }

    let mut deferred = Vec::new();
    for (i, edge) in graph.edges().iter().enumerate() {
        if deferred_edge[i] {
            let label = schema.reference_label(edge.reference);
            units[unit_of_component[component_of[edge.child]]]
                .deferred
                .push(label.clone());
            deferred.push(label);
        }
    }

    let phase_count = unit_phase.iter().map(|p| p + 1).max().unwrap_or(0);
    let mut phases = vec![Vec::new(); phase_count];
    for (unit, &phase) in unit_phase.iter().enumerate() {
        phases[phase].push(unit);
    }

    let order: Vec<String> = order
        .into_iter()
        .map(|node| schema.table_name(graph.table(node)))
        .collect();
    debug!(
        "Load order: {} ({} deferred constraints, {} phases)",
        order.join(", "),
        deferred.len(),
        phases.len()
    );

    Ok(LoadPlan {
        order,
        deferred,
        units,
        phases,
    })
}
