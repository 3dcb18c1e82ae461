//! Dependency ordering of tables within one database.
//!
//! Tables are nodes in an arena indexed by discovery position; a foreign key
//! from `child` to `parent` is an edge `parent -> child`. Kahn's algorithm
//! with a FIFO queue seeded in discovery order yields an order in which every
//! table follows the tables it references, and dependency-free tables keep
//! their discovery order.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::error::{ReplicateError, Result};

struct TableNode<'a> {
    name: &'a str,
    /// Indices of tables that reference this one.
    dependents: Vec<usize>,
    /// Number of distinct tables this one references.
    in_degree: usize,
}

/// Order `tables` so that referenced tables come first.
///
/// `references` maps a table to the names it references. A reference may be
/// qualified (`db.table`); it counts only when it names `database`. Self
/// references and references to tables outside `tables` are ignored.
///
/// Fails with [`ReplicateError::DependencyCycle`] listing the tables that
/// could not be placed.
pub fn order_tables(
    database: &str,
    tables: &[String],
    references: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut nodes: Vec<TableNode<'_>> = tables
        .iter()
        .map(|name| TableNode {
            name: name.as_str(),
            dependents: Vec::new(),
            in_degree: 0,
        })
        .collect();

    let index: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    for (child, name) in tables.iter().enumerate() {
        let Some(refs) = references.get(name) else {
            continue;
        };
        let mut parents: Vec<usize> = refs
            .iter()
            .filter_map(|r| local_name(database, r))
            .filter_map(|r| index.get(r).copied())
            .filter(|&parent| parent != child)
            .collect();
        parents.sort_unstable();
        parents.dedup();

        for parent in parents {
            nodes[parent].dependents.push(child);
            nodes[child].in_degree += 1;
        }
    }

    let mut queue: VecDeque<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.in_degree == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(nodes.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(nodes[idx].name.to_string());
        for pos in 0..nodes[idx].dependents.len() {
            let dependent = nodes[idx].dependents[pos];
            nodes[dependent].in_degree -= 1;
            if nodes[dependent].in_degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if ordered.len() < nodes.len() {
        let stuck: Vec<String> = nodes
            .iter()
            .filter(|node| node.in_degree > 0)
            .map(|node| node.name.to_string())
            .collect();
        return Err(ReplicateError::DependencyCycle {
            database: database.to_string(),
            tables: stuck,
        });
    }

    debug!("Dependency order for {}: {}", database, ordered.join(", "));
    Ok(ordered)
}

/// Strip a `database.` qualifier naming `database`; `None` for another database.
fn local_name<'a>(database: &str, reference: &'a str) -> Option<&'a str> {
    match reference.split_once('.') {
        Some((db, table)) if db == database => Some(table),
        Some(_) => None,
        None => Some(reference),
    }
}
