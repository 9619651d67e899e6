//! Relational schema synthesis from parsed column definitions.
//!
//! The build is two-phase: `add_table` only collects parsed drafts, and
//! `finish` walks them in declaration order resolving set relations,
//! deferred foreign keys and unique groups against the complete table set.
//! Forward references between tables are legal for exactly this reason; a
//! reference to a table that is never declared fails in `finish`, not while
//! parsing.

use std::collections::{HashMap, HashSet};

use super::columns::{parse_column_list, ColumnSpec, ColumnType, ScalarType};
use super::{ConfigError, Result};

/// A fully resolved column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ScalarType,
    pub auto_increment: bool,
}

/// A named foreign key; local and target column lists always have the same
/// length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub local: Vec<String>,
    pub target_table: String,
    pub target: Vec<String>,
}

/// A named unique constraint over resolved columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// A declared many-to-many relation, materialized as a join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySet {
    pub name: String,
    pub source: String,
    pub target: String,
    pub join_table: String,
}

/// One resolved table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique: Vec<UniqueConstraint>,
    pub sets: Vec<EntrySet>,
    /// Field names as declared in the DSL: columns, deferred foreign keys
    /// and set relations, in declaration order. Synthesized columns are not
    /// fields.
    pub declared_fields: Vec<String>,
    /// Original `fields = ...` text; `None` for generated join tables.
    pub fields_src: Option<String>,
}

/// How a field name resolves during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind<'a> {
    Column(&'a Column),
    Key(&'a ForeignKey),
    Set(&'a EntrySet),
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|f| f.name == name)
    }

    pub fn set(&self, name: &str) -> Option<&EntrySet> {
        self.sets.iter().find(|s| s.name == name)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// The single primary-key column, when the key is not composite.
    pub fn single_primary_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Resolve a field name the way the dispatcher does: set relations
    /// first, then plain columns, then foreign keys.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind<'_>> {
        if let Some(set) = self.set(name) {
            return Some(FieldKind::Set(set));
        }
        if let Some(col) = self.column(name) {
            return Some(FieldKind::Column(col));
        }
        self.foreign_key(name).map(FieldKind::Key)
    }

    /// Scalar type a raw value for `field` converts through, when the
    /// field carries exactly one column.
    pub fn field_scalar(&self, field: &str) -> Option<ScalarType> {
        match self.field_kind(field)? {
            FieldKind::Column(c) => Some(c.ty),
            FieldKind::Key(k) => match k.local.as_slice() {
                [only] => self.column(only).map(|c| c.ty),
                _ => None,
            },
            FieldKind::Set(_) => None,
        }
    }

    /// Declared fields minus primary-key columns: the set a choice template
    /// has to cover.
    pub fn template_fields(&self) -> Vec<&str> {
        self.declared_fields
            .iter()
            .map(|f| f.as_str())
            .filter(|f| !self.is_primary_key(f))
            .collect()
    }
}

/// Immutable resolved schema: ordered tables plus a name index.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    tables: Vec<TableSchema>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.index.get(name).map(|&i| &self.tables[i])
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    /// Tables that came from the DSL, in declaration order (join tables
    /// excluded).
    pub fn declared_tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter().filter(|t| t.fields_src.is_some())
    }
}

/// Unresolved intermediate model collected by `add_table`.
struct TableDraft {
    name: String,
    specs: Vec<ColumnSpec>,
    fields_src: String,
}

/// Phase-one collector for table declarations.
#[derive(Default)]
pub struct SchemaBuilder {
    drafts: Vec<TableDraft>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register one table declaration.
    pub fn add_table(&mut self, name: &str, defs: &str) -> Result<()> {
        if self.drafts.iter().any(|d| d.name == name) {
            return Err(ConfigError::DuplicateTable(name.to_string()));
        }
        let specs = parse_column_list(defs)?;
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateColumn {
                    table: name.to_string(),
                    column: spec.name.clone(),
                });
            }
        }
        self.drafts.push(TableDraft {
            name: name.to_string(),
            specs,
            fields_src: defs.to_string(),
        });
        Ok(())
    }

    /// Resolve every draft into an immutable schema.
    pub fn finish(self) -> Result<Schema> {
        let drafts = self.drafts;
        let mut tables = Vec::with_capacity(drafts.len());

        // Base pass: concrete columns, primary keys, immediate foreign keys.
        for draft in &drafts {
            tables.push(build_base_table(draft, &drafts)?);
        }
        let mut index: HashMap<String, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        // Step 1: materialize join tables for declared set relations.
        for (ti, draft) in drafts.iter().enumerate() {
            for spec in &draft.specs {
                if let ColumnType::SetRelation { target } = &spec.ty {
                    let join = build_join_table(&tables, &index, ti, &spec.name, target)?;
                    tables[ti].sets.push(EntrySet {
                        name: spec.name.clone(),
                        source: draft.name.clone(),
                        target: target.clone(),
                        join_table: join.name.clone(),
                    });
                    index.insert(join.name.clone(), tables.len());
                    tables.push(join);
                }
            }
        }

        // Step 2: append synthesized columns for deferred auto-named keys.
        for (ti, draft) in drafts.iter().enumerate() {
            for spec in &draft.specs {
                if let ColumnType::DeferredFk { target } = &spec.ty {
                    let Some(&target_idx) = index.get(target) else {
                        return Err(ConfigError::UnknownTargetTable {
                            table: draft.name.clone(),
                            target: target.clone(),
                        });
                    };
                    let (cols, fk) = mirror_primary_key(&spec.name, &tables[target_idx]);
                    tables[ti].columns.extend(cols);
                    tables[ti].foreign_keys.push(fk);
                }
            }
        }

        // Step 3: resolve named unique groups, possibly through deferred
        // keys registered above.
        for (ti, draft) in drafts.iter().enumerate() {
            for constraint in resolve_unique_groups(draft, &tables[ti])? {
                tables[ti].unique.push(constraint);
            }
        }

        // Every foreign key must point at real columns once everything is
        // in place.
        for table in &tables {
            for fk in &table.foreign_keys {
                let Some(&target_idx) = index.get(&fk.target_table) else {
                    return Err(ConfigError::UnknownTargetTable {
                        table: table.name.clone(),
                        target: fk.target_table.clone(),
                    });
                };
                let target = &tables[target_idx];
                for col in &fk.target {
                    if target.column(col).is_none() {
                        return Err(ConfigError::UnknownTargetColumn {
                            table: fk.target_table.clone(),
                            column: col.clone(),
                        });
                    }
                }
            }
        }

        Ok(Schema { tables, index })
    }
}

/// Scalar type a draft column resolves to, chasing one level of explicit
/// reference.
fn spec_scalar(spec: &ColumnSpec, drafts: &[TableDraft], table: &str) -> Result<ScalarType> {
    match &spec.ty {
        ColumnType::Scalar(ty) => Ok(*ty),
        ColumnType::Reference {
            table: target,
            column,
        }
        | ColumnType::CompositeLeg {
            table: target,
            column,
            ..
        } => {
            let draft = drafts
                .iter()
                .find(|d| &d.name == target)
                .ok_or_else(|| ConfigError::UnknownTargetTable {
                    table: table.to_string(),
                    target: target.clone(),
                })?;
            match draft.specs.iter().find(|s| &s.name == column) {
                Some(s) => match s.ty {
                    ColumnType::Scalar(ty) => Ok(ty),
                    // A reference chain ends at the first non-scalar.
                    _ => Err(ConfigError::UnknownTargetColumn {
                        table: target.clone(),
                        column: column.clone(),
                    }),
                },
                // The synthesized primary key is referencable too.
                None if column == SYNTHESIZED_PK
                    && !draft.specs.iter().any(|s| s.primary_key) =>
                {
                    Ok(ScalarType::Int)
                }
                None => Err(ConfigError::UnknownTargetColumn {
                    table: target.clone(),
                    column: column.clone(),
                }),
            }
        }
        ColumnType::DeferredFk { .. } | ColumnType::SetRelation { .. } => {
            unreachable!("deferred specs never reach scalar resolution")
        }
    }
}

const SYNTHESIZED_PK: &str = "id";

fn build_base_table(draft: &TableDraft, drafts: &[TableDraft]) -> Result<TableSchema> {
    let mut columns = Vec::new();
    let mut primary_key = Vec::new();
    let mut foreign_keys: Vec<ForeignKey> = Vec::new();
    let mut declared_fields = Vec::new();

    for spec in &draft.specs {
        declared_fields.push(spec.name.clone());
        match &spec.ty {
            ColumnType::Scalar(_) | ColumnType::Reference { .. } | ColumnType::CompositeLeg { .. } => {
                let ty = spec_scalar(spec, drafts, &draft.name)?;
                columns.push(Column {
                    name: spec.name.clone(),
                    ty,
                    auto_increment: spec.auto_increment,
                });
                if spec.primary_key {
                    primary_key.push(spec.name.clone());
                }
            }
            // Deferred: columns arrive in the resolution passes.
            ColumnType::DeferredFk { .. } | ColumnType::SetRelation { .. } => {}
        }
        match &spec.ty {
            ColumnType::Reference { table, column } => {
                foreign_keys.push(ForeignKey {
                    name: format!("fk_{}", spec.name),
                    local: vec![spec.name.clone()],
                    target_table: table.clone(),
                    target: vec![column.clone()],
                });
            }
            ColumnType::CompositeLeg {
                group,
                table,
                column,
            } => match foreign_keys.iter_mut().find(|f| &f.name == group) {
                Some(fk) => {
                    if &fk.target_table != table {
                        return Err(ConfigError::CompositeFkTargetMismatch {
                            table: draft.name.clone(),
                            fk: group.clone(),
                            first: fk.target_table.clone(),
                            second: table.clone(),
                        });
                    }
                    fk.local.push(spec.name.clone());
                    fk.target.push(column.clone());
                }
                None => foreign_keys.push(ForeignKey {
                    name: group.clone(),
                    local: vec![spec.name.clone()],
                    target_table: table.clone(),
                    target: vec![column.clone()],
                }),
            },
            _ => {}
        }
    }

    if primary_key.is_empty() {
        columns.insert(
            0,
            Column {
                name: SYNTHESIZED_PK.to_string(),
                ty: ScalarType::Int,
                auto_increment: true,
            },
        );
        primary_key.push(SYNTHESIZED_PK.to_string());
    }

    Ok(TableSchema {
        name: draft.name.clone(),
        columns,
        primary_key,
        foreign_keys,
        unique: Vec::new(),
        sets: Vec::new(),
        declared_fields,
        fields_src: Some(draft.fields_src.clone()),
    })
}

/// Columns and constraint mirroring the target table's primary key, named
/// `{prefix}_{pkColumn}`.
fn mirror_primary_key(prefix: &str, target: &TableSchema) -> (Vec<Column>, ForeignKey) {
    let mut cols = Vec::new();
    let mut local = Vec::new();
    for pk in &target.primary_key {
        let ty = target
            .column(pk)
            .map(|c| c.ty)
            .unwrap_or(ScalarType::Int);
        let name = format!("{prefix}_{pk}");
        local.push(name.clone());
        cols.push(Column {
            name,
            ty,
            auto_increment: false,
        });
    }
    let fk = ForeignKey {
        name: prefix.to_string(),
        local,
        target_table: target.name.clone(),
        target: target.primary_key.clone(),
    };
    (cols, fk)
}

fn build_join_table(
    tables: &[TableSchema],
    index: &HashMap<String, usize>,
    source_idx: usize,
    set_name: &str,
    target: &str,
) -> Result<TableSchema> {
    let source = &tables[source_idx];
    let Some(&target_idx) = index.get(target) else {
        return Err(ConfigError::UnknownTargetTable {
            table: source.name.clone(),
            target: target.to_string(),
        });
    };
    let target = &tables[target_idx];

    // Link replacement addresses each side through one key column, so
    // composite-keyed endpoints are rejected here rather than at resync.
    for endpoint in [source, target] {
        if endpoint.single_primary_key().is_none() {
            return Err(ConfigError::CompositeSetEndpoint {
                table: source.name.clone(),
                set: set_name.to_string(),
                endpoint: endpoint.name.clone(),
            });
        }
    }

    let (mut columns, source_fk) = mirror_primary_key(&source.name, source);
    let (target_cols, target_fk) = mirror_primary_key(&target.name, target);
    columns.extend(target_cols);

    let primary_key: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    Ok(TableSchema {
        name: format!("{}_{}", source.name, set_name),
        columns,
        primary_key,
        foreign_keys: vec![
            ForeignKey {
                name: format!("fk_{}", source.name),
                ..source_fk
            },
            ForeignKey {
                name: format!("fk_{}", target.name),
                ..target_fk
            },
        ],
        unique: Vec::new(),
        sets: Vec::new(),
        declared_fields: Vec::new(),
        fields_src: None,
    })
}

/// Named unique groups in first-appearance order, members resolved through
/// deferred keys where the member is not a literal column.
fn resolve_unique_groups(draft: &TableDraft, table: &TableSchema) -> Result<Vec<UniqueConstraint>> {
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    for spec in &draft.specs {
        for group in &spec.unique_groups {
            if !members.contains_key(group) {
                order.push(group.clone());
            }
            members.entry(group.clone()).or_default().push(spec.name.clone());
        }
    }

    let mut constraints = Vec::new();
    for group in order {
        let mut columns = Vec::new();
        for member in &members[&group] {
            if table.column(member).is_some() {
                columns.push(member.clone());
            } else if let Some(fk) = table.foreign_key(member) {
                columns.extend(fk.local.iter().cloned());
            } else {
                return Err(ConfigError::UnresolvedUniqueMember {
                    table: table.name.clone(),
                    group,
                    member: member.clone(),
                });
            }
        }
        constraints.push(UniqueConstraint {
            name: group,
            columns,
        });
    }
    Ok(constraints)
}
