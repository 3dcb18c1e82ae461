//! Structure diffing.
//!
//! Columns are matched by name only. A column present on both sides is left
//! alone even when its type, nullability or default differ.
//!
//! The differ is pure: constraint descriptors for columns being dropped are
//! read from the target by the caller and passed in.

use std::collections::BTreeMap;

use crate::core::catalog::TableSnapshot;
use crate::core::schema::{ColumnDescriptor, ConstraintDescriptor, ReconciliationOp, TableStructure};
use crate::ddl;

/// Source columns the target lacks, in source order.
pub fn missing_columns<'a>(
    source: &'a TableStructure,
    target: &TableStructure,
) -> Vec<&'a ColumnDescriptor> {
    source
        .columns
        .iter()
        .filter(|c| !target.has_column(&c.name))
        .collect()
}

/// Target columns the source lacks, in target order.
pub fn extra_columns<'a>(
    source: &TableStructure,
    target: &'a TableStructure,
) -> Vec<&'a ColumnDescriptor> {
    target
        .columns
        .iter()
        .filter(|c| !source.has_column(&c.name))
        .collect()
}

/// Operations that bring the target's copy of `source` in line with it.
///
/// `target` is `None` when the table does not exist on the target; the
/// result is then a single `CreateTable` replaying the source's CREATE text.
///
/// `target_constraints` maps each keyed extra column to the target's
/// constraint descriptors for it. Operations come out in apply order:
/// constraint drops, column drops, column adds, constraint adds. A composite
/// constraint touched through several columns appears once.
pub fn diff_table(
    source: &TableSnapshot,
    target: Option<&TableStructure>,
    target_constraints: &BTreeMap<String, Vec<ConstraintDescriptor>>,
) -> Vec<ReconciliationOp> {
    let Some(target) = target else {
        return vec![ReconciliationOp::CreateTable {
            table: source.name.clone(),
            ddl: source.create_statement.clone(),
        }];
    };

    let table = &source.name;
    let missing = missing_columns(&source.structure, target);
    let extra = extra_columns(&source.structure, target);

    let mut ops = Vec::new();

    let dropped_constraints = extra
        .iter()
        .filter(|c| c.key.is_keyed())
        .filter_map(|c| target_constraints.get(&c.name))
        .flatten();
    for group in ddl::group_constraints(dropped_constraints) {
        if let Some(syntax) = ddl::drop_constraint(&group[0]) {
            ops.push(ReconciliationOp::DropConstraint {
                table: table.clone(),
                syntax,
            });
        }
    }

    for column in &extra {
        ops.push(ReconciliationOp::DropColumn {
            table: table.clone(),
            column: column.name.clone(),
        });
    }

    for column in &missing {
        ops.push(ReconciliationOp::AddColumn {
            table: table.clone(),
            definition: ddl::column_definition(column),
        });
    }

    // Constraints go last: they may span columns added above
    let added_constraints = missing
        .iter()
        .filter(|c| c.key.is_keyed())
        .flat_map(|c| source.constraints_for(&c.name));
    for group in ddl::group_constraints(added_constraints) {
        if let Some(syntax) = ddl::add_constraint(&group) {
            ops.push(ReconciliationOp::AddConstraint {
                table: table.clone(),
                syntax,
            });
        }
    }

    ops
}
