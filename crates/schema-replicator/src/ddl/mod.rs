//! DDL synthesis from structured metadata.
//!
//! Produces the clause text that follows `ALTER TABLE <table>`. Column
//! definitions quote their column name; constraint identifiers are emitted as
//! the server reported them. The table prefix is quoted by the dialect when
//! the operation is applied.

use tracing::warn;

use crate::core::schema::{ColumnDescriptor, ConstraintDescriptor, ConstraintType};

/// Marker MySQL 8 puts in `Extra` when the default is an expression.
const DEFAULT_GENERATED: &str = "DEFAULT_GENERATED";

/// Column definition: `{name} {dataType} {default} {nullability} {extra}`.
///
/// The name is backtick-quoted so reserved words such as `order` survive.
/// Empty parts are omitted rather than leaving double spaces.
pub fn column_definition(column: &ColumnDescriptor) -> String {
    let expression_default = column
        .extra
        .split_whitespace()
        .any(|word| word.eq_ignore_ascii_case(DEFAULT_GENERATED));

    let mut parts: Vec<String> = vec![quote_name(&column.name), column.data_type.clone()];

    if let Some(value) = &column.default_value {
        if expression_default {
            parts.push(format!("DEFAULT {}", default_expression(value)));
        } else {
            parts.push(format!("DEFAULT '{}'", value.replace('\'', "''")));
        }
    }

    if !column.nullable {
        parts.push("NOT NULL".to_string());
    }

    let extra = column
        .extra
        .split_whitespace()
        .filter(|word| !word.eq_ignore_ascii_case(DEFAULT_GENERATED))
        .collect::<Vec<_>>()
        .join(" ");
    if !extra.is_empty() {
        parts.push(extra);
    }

    parts.join(" ")
}

fn quote_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Expression defaults must be parenthesized, except the temporal
/// functions MySQL accepts bare (`CURRENT_TIMESTAMP`, `NOW(3)`, ...).
fn default_expression(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('(') || is_bare_temporal_default(value) {
        value.to_string()
    } else {
        format!("({})", value)
    }
}

fn is_bare_temporal_default(value: &str) -> bool {
    const BARE: &[&str] = &["CURRENT_TIMESTAMP", "NOW", "LOCALTIME", "LOCALTIMESTAMP"];

    let upper = value.to_ascii_uppercase();
    let (base, args) = match upper.find('(') {
        Some(idx) => (&upper[..idx], Some(&upper[idx..])),
        None => (upper.as_str(), None),
    };
    let precision_ok = match args {
        None => true,
        Some(args) => args
            .strip_prefix('(')
            .and_then(|a| a.strip_suffix(')'))
            .is_some_and(|inner| inner.trim().chars().all(|c| c.is_ascii_digit())),
    };
    BARE.contains(&base.trim()) && precision_ok
}

/// `ADD ...` clause for one constraint.
///
/// `group` holds every descriptor sharing the constraint's identity, in
/// ordinal order. Returns `None` for an empty group or a constraint type
/// that has no synthesis rule.
pub fn add_constraint(group: &[ConstraintDescriptor]) -> Option<String> {
    let first = group.first()?;
    let columns = join_columns(group, |c| Some(c.column.as_str()));

    match &first.constraint_type {
        ConstraintType::ForeignKey => {
            let referenced_table = first.referenced_table.as_deref()?;
            let referenced_columns = join_columns(group, |c| c.referenced_column.as_deref());

            let mut clause = format!(
                "ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
                first.name, columns, referenced_table, referenced_columns
            );
            if let Some(on_delete) = &first.on_delete {
                clause.push_str(&format!(" ON DELETE {}", on_delete));
            }
            if let Some(on_update) = &first.on_update {
                clause.push_str(&format!(" ON UPDATE {}", on_update));
            }
            Some(clause)
        }
        ConstraintType::PrimaryKey => Some(format!("ADD PRIMARY KEY ({})", columns)),
        ConstraintType::Unique => Some(format!(
            "ADD CONSTRAINT {} UNIQUE ({})",
            first.name, columns
        )),
        ConstraintType::Other(kind) => {
            warn!(
                "Skipping {} constraint {} on {}: no synthesis rule",
                kind, first.name, first.table
            );
            None
        }
    }
}

/// `DROP ...` clause for one constraint.
pub fn drop_constraint(constraint: &ConstraintDescriptor) -> Option<String> {
    match &constraint.constraint_type {
        ConstraintType::ForeignKey => Some(format!("DROP FOREIGN KEY {}", constraint.name)),
        ConstraintType::PrimaryKey => Some("DROP PRIMARY KEY".to_string()),
        ConstraintType::Unique => Some(format!("DROP INDEX {}", constraint.name)),
        ConstraintType::Other(kind) => {
            warn!(
                "Skipping drop of {} constraint {} on {}: no synthesis rule",
                kind, constraint.name, constraint.table
            );
            None
        }
    }
}

/// Group descriptors by constraint identity.
///
/// Groups appear in first-seen order and keep each column at most once.
pub fn group_constraints<'a>(
    descriptors: impl IntoIterator<Item = &'a ConstraintDescriptor>,
) -> Vec<Vec<ConstraintDescriptor>> {
    let mut groups: Vec<Vec<ConstraintDescriptor>> = Vec::new();

    for descriptor in descriptors {
        match groups
            .iter_mut()
            .find(|g| g[0].identity() == descriptor.identity())
        {
            Some(group) => {
                if !group.iter().any(|d| d.column == descriptor.column) {
                    group.push(descriptor.clone());
                }
            }
            None => groups.push(vec![descriptor.clone()]),
        }
    }

    groups
}

fn join_columns<'a>(
    group: &'a [ConstraintDescriptor],
    pick: impl Fn(&'a ConstraintDescriptor) -> Option<&'a str>,
) -> String {
    group.iter().filter_map(pick).collect::<Vec<_>>().join(", ")
}
