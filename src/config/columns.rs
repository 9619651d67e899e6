//! Column definition parsing.
//!
//! One column definition is `name:type[:attr...]` where the type is a
//! builtin scalar, an explicit `Target.column` reference, or one of the
//! `fk(...)` / `set(...)` calls. Attributes are bare flags (`pk`, `au`) or
//! `u(group)` unique-group membership.

use super::expr::{ExprParser, Tree};
use super::{ConfigError, Result};

/// Builtin scalar column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int,
    Text,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(ScalarType::Int),
            "string" => Some(ScalarType::Text),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Int => "int",
            ScalarType::Text => "string",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            ScalarType::Int => "INTEGER",
            ScalarType::Text => "TEXT",
        }
    }
}

/// Declared type of one column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// `name:int`, `name:string`.
    Scalar(ScalarType),
    /// `name:Target.column` - single foreign key to an explicit column.
    Reference { table: String, column: String },
    /// `name:fk(group, Target.column)` - one leg of a composite named key.
    CompositeLeg {
        group: String,
        table: String,
        column: String,
    },
    /// `name:fk(Target)` - auto-named key mirroring the target primary key.
    /// Registered under the declared column name; local columns are
    /// synthesized in the resolution phase, so this emits no column yet.
    DeferredFk { target: String },
    /// `name:set(Target)` - many-to-many relation, emits no column.
    SetRelation { target: String },
}

/// One parsed column definition. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique_groups: Vec<String>,
}

/// Parser configured for column definitions: `.` binds tighter than `:`
/// which binds tighter than `,`.
pub fn column_parser() -> ExprParser {
    ExprParser::new(
        &[' ', '\t', '\n', '\r'],
        &[("(", ")")],
        &[(".", 0), (":", 1), (",", 2)],
    )
}

/// Parse a comma-joined list of column definitions.
pub fn parse_column_list(defs: &str) -> Result<Vec<ColumnSpec>> {
    let tree = column_parser().parse(defs)?;
    tree.items_of(",")
        .into_iter()
        .map(|item| parse_column(item, defs))
        .collect()
}

fn malformed(defs: &str) -> ConfigError {
    ConfigError::MalformedColumn(defs.to_string())
}

fn parse_column(item: &Tree, defs: &str) -> Result<ColumnSpec> {
    let parts = item.items_of(":");
    if parts.len() < 2 {
        return Err(malformed(defs));
    }
    let name = parts[0]
        .as_atom()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| malformed(defs))?
        .to_string();
    let ty = parse_type(&name, parts[1], defs)?;

    let mut spec = ColumnSpec {
        name,
        ty,
        primary_key: false,
        auto_increment: false,
        unique_groups: Vec::new(),
    };
    for attr in &parts[2..] {
        parse_attribute(attr, &mut spec)?;
    }
    Ok(spec)
}

fn parse_type(name: &str, node: &Tree, defs: &str) -> Result<ColumnType> {
    match node {
        Tree::Atom(ty) => ScalarType::from_name(ty)
            .map(ColumnType::Scalar)
            .ok_or_else(|| ConfigError::UnknownType(ty.clone())),
        Tree::List { sep, items } if sep == "." && items.len() == 2 => {
            let table = items[0].as_atom().ok_or_else(|| malformed(defs))?;
            let column = items[1].as_atom().ok_or_else(|| malformed(defs))?;
            Ok(ColumnType::Reference {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
        Tree::Call {
            name: call, args, ..
        } => parse_type_call(name, call, args.as_deref(), defs),
        _ => Err(malformed(defs)),
    }
}

fn parse_type_call(
    name: &str,
    call: &str,
    args: Option<&Tree>,
    defs: &str,
) -> Result<ColumnType> {
    let args = args.ok_or_else(|| malformed(defs))?;
    let items = args.items_of(",");
    match call {
        "fk" => match items.as_slice() {
            [target] => {
                let target = target.as_atom().ok_or_else(|| malformed(defs))?;
                Ok(ColumnType::DeferredFk {
                    target: target.to_string(),
                })
            }
            [alias, second] => {
                let alias = alias.as_atom().ok_or_else(|| malformed(defs))?;
                match second {
                    Tree::Atom(target) => {
                        // The alias names the key; it is also the registry
                        // key, so it has to be the declared column name.
                        if alias != name {
                            return Err(malformed(defs));
                        }
                        Ok(ColumnType::DeferredFk {
                            target: target.clone(),
                        })
                    }
                    Tree::List { sep, items } if sep == "." && items.len() == 2 => {
                        let table = items[0].as_atom().ok_or_else(|| malformed(defs))?;
                        let column = items[1].as_atom().ok_or_else(|| malformed(defs))?;
                        Ok(ColumnType::CompositeLeg {
                            group: alias.to_string(),
                            table: table.to_string(),
                            column: column.to_string(),
                        })
                    }
                    _ => Err(malformed(defs)),
                }
            }
            _ => Err(malformed(defs)),
        },
        "set" => {
            let target = items
                .first()
                .filter(|_| items.len() == 1)
                .and_then(|t| t.as_atom())
                .ok_or_else(|| malformed(defs))?;
            Ok(ColumnType::SetRelation {
                target: target.to_string(),
            })
        }
        other => Err(ConfigError::UnknownType(other.to_string())),
    }
}

fn parse_attribute(attr: &Tree, spec: &mut ColumnSpec) -> Result<()> {
    match attr {
        Tree::Atom(flag) => match flag.as_str() {
            "pk" => spec.primary_key = true,
            "au" => spec.auto_increment = true,
            other => return Err(ConfigError::UnknownAttribute(other.to_string())),
        },
        Tree::Call { name, args, .. } if name == "u" => {
            let group = args
                .as_deref()
                .and_then(|a| a.as_atom())
                .ok_or_else(|| ConfigError::UnknownAttribute("u()".to_string()))?;
            spec.unique_groups.push(group.to_string());
        }
        Tree::Call { name, .. } => {
            return Err(ConfigError::UnknownAttribute(name.clone()));
        }
        _ => return Err(ConfigError::UnknownAttribute(format!("{attr:?}"))),
    }
    Ok(())
}
