//! The per-image dispatch state machine and target resynchronization.

use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::debug;

use super::{EngineError, Result};
use crate::config::choices::ChoiceTemplate;
use crate::config::columns::ScalarType;
use crate::config::schema::{EntrySet, FieldKind, TableSchema};
use crate::config::Config;
use crate::models::{DetectionRun, RunConstraints, Value};
use crate::repository::{images, rows, StoreError};

/// Fragment texts grouped by referenced field name, first-seen order.
type Grouped = Vec<(String, Vec<String>)>;

/// Run the state machine for one image inside the caller's transaction:
/// group its fragments, match a template, resolve the target row, commit
/// the (target, target id) pair and resync every affected target.
pub(super) fn dispatch_image(
    conn: &Connection,
    config: &Config,
    run: &DetectionRun,
    image_id: i64,
) -> Result<()> {
    let image = images::get_image(conn, image_id)?.ok_or_else(|| {
        StoreError::Corrupt(format!("dispatch of unknown image {image_id}"))
    })?;

    // Both the old and the new target need a resync afterwards.
    let mut pending: BTreeSet<(String, i64)> = BTreeSet::new();
    if let (Some(target), Some(target_id)) = (&image.target, image.target_id) {
        pending.insert((target.clone(), target_id));
    }

    let texts = images::fragment_texts(conn, image_id)?;
    let grouped = group_fragments(texts.iter().map(String::as_str));
    let matched = if image.ignored {
        None
    } else {
        match_template(config, run, &grouped)
    };

    let new_target = match matched {
        Some(choice) => {
            let target_id = resolve_target(conn, config, run, choice, &grouped)?;
            pending.insert((choice.table.clone(), target_id));
            Some((choice.table.as_str(), target_id))
        }
        None => None,
    };
    debug!(image = image_id, target = ?new_target, "dispatched");
    images::set_image_target(conn, image_id, new_target)?;

    resync_targets(conn, config, run, &pending)
}

/// Split each decoded text into (field, value) on its separator and group
/// the values per field. A text with no separator or more than one does
/// not take part in matching; it stays stored for manual correction.
fn group_fragments<'a>(texts: impl IntoIterator<Item = &'a str>) -> Grouped {
    let mut grouped: Grouped = Vec::new();
    for text in texts {
        let Some((field, value)) = text.split_once(':') else {
            continue;
        };
        if value.contains(':') {
            continue;
        }
        match grouped.iter_mut().find(|(f, _)| f == field) {
            Some((_, values)) => values.push(value.to_string()),
            None => grouped.push((field.to_string(), vec![value.to_string()])),
        }
    }
    grouped
}

/// The first entry, in the run's constraint table order, whose template
/// arities all accept the observed per-field counts. Constrained tables
/// without a template are not candidates.
fn match_template<'c>(
    config: &'c Config,
    run: &DetectionRun,
    grouped: &Grouped,
) -> Option<&'c ChoiceTemplate> {
    let count = |field: &str| {
        grouped
            .iter()
            .find(|(f, _)| f == field)
            .map_or(0, |(_, values)| values.len())
    };
    run.constraints.table_order().find_map(|table| {
        let choice = config.choice_for_table(table)?;
        choice
            .fields
            .iter()
            .all(|(field, arity)| arity.contains(count(field)))
            .then_some(choice)
    })
}

/// Find the target row through the table's unique constraints, or insert
/// a fresh one. Set relations are left to the resync that follows.
fn resolve_target(
    conn: &Connection,
    config: &Config,
    run: &DetectionRun,
    choice: &ChoiceTemplate,
    grouped: &Grouped,
) -> Result<i64> {
    let table = config.schema.table(&choice.table).ok_or_else(|| {
        StoreError::Corrupt(format!("template targets unknown table {}", choice.table))
    })?;
    let (values, _) = field_map(table, &run.constraints, grouped, true)?;
    if let Some(id) = rows::find_unique(conn, table, &values)? {
        return Ok(id);
    }
    Ok(rows::insert_row(conn, table, &values)?)
}

/// Re-derive every pending target row from the union of the fragments of
/// all non-ignored images in this run still pointing at it.
fn resync_targets(
    conn: &Connection,
    config: &Config,
    run: &DetectionRun,
    pending: &BTreeSet<(String, i64)>,
) -> Result<()> {
    for (target, target_id) in pending {
        let table = config.schema.table(target).ok_or_else(|| {
            StoreError::Corrupt(format!("resync of unknown table {target}"))
        })?;

        // Union of decoded texts, deduplicated across images.
        let mut texts: BTreeSet<String> = BTreeSet::new();
        for image_id in images::images_pointing_at(conn, run.id, target, *target_id)? {
            texts.extend(images::fragment_texts(conn, image_id)?);
        }
        let grouped = group_fragments(texts.iter().map(String::as_str));

        let (values, sets) = field_map(table, &run.constraints, &grouped, false)?;
        rows::update_row(conn, table, *target_id, &values)?;
        // Referenced set relations are fully replaced, never diffed.
        for (set, ids) in sets {
            rows::replace_set_links(conn, &config.schema, set, *target_id, &ids)?;
        }
        debug!(table = %target, id = target_id, "resynced target");
    }
    Ok(())
}

/// Build the candidate column/value map for one target table: the run's
/// stored defaults for that table, overlaid with the observed fragment
/// values. Set relations are split off for the caller.
///
/// With `strict` set, a single-valued field observed more than once is an
/// error; otherwise it keeps its default, matching resync semantics.
fn field_map<'t>(
    table: &'t TableSchema,
    constraints: &RunConstraints,
    grouped: &Grouped,
    strict: bool,
) -> Result<(Vec<(String, Value)>, Vec<(&'t EntrySet, Vec<i64>)>)> {
    let mut values: Vec<(String, Value)> = Vec::new();
    let mut defaults: Vec<(String, Value)> =
        constraints.defaults_for(&table.name).into_iter().collect();
    defaults.sort_by(|a, b| a.0.cmp(&b.0));
    for (field, value) in defaults {
        let column = column_for(table, &field)?;
        put(&mut values, &column, value);
    }

    let mut sets: Vec<(&EntrySet, Vec<i64>)> = Vec::new();
    for (field, observed) in grouped {
        if let Some(FieldKind::Set(set)) = table.field_kind(field) {
            let mut ids = Vec::with_capacity(observed.len());
            for raw in observed {
                let id = Value::convert(raw, ScalarType::Int)
                    .and_then(|v| v.as_int())
                    .ok_or_else(|| EngineError::InvalidFragmentValue {
                        table: table.name.clone(),
                        field: field.clone(),
                        value: raw.clone(),
                        ty: ScalarType::Int.name(),
                    })?;
                ids.push(id);
            }
            sets.push((set, ids));
            continue;
        }

        let column = column_for(table, field)?;
        match observed.as_slice() {
            [raw] => {
                let ty = table
                    .column(&column)
                    .map(|c| c.ty)
                    .ok_or_else(|| StoreError::Corrupt(format!(
                        "{}.{column} resolved to no column",
                        table.name
                    )))?;
                let value =
                    Value::convert(raw, ty).ok_or_else(|| EngineError::InvalidFragmentValue {
                        table: table.name.clone(),
                        field: field.clone(),
                        value: raw.clone(),
                        ty: ty.name(),
                    })?;
                put(&mut values, &column, value);
            }
            _ if strict => {
                return Err(EngineError::AmbiguousFieldValue {
                    table: table.name.clone(),
                    field: field.clone(),
                    count: observed.len(),
                })
            }
            _ => {}
        }
    }
    Ok((values, sets))
}

/// The storage column a single-valued field name lands in: the column
/// itself, or a foreign key's first local column.
fn column_for(table: &TableSchema, field: &str) -> Result<String> {
    match table.field_kind(field) {
        Some(FieldKind::Column(column)) => Ok(column.name.clone()),
        Some(FieldKind::Key(fk)) => fk.local.first().cloned().ok_or_else(|| {
            StoreError::Corrupt(format!("foreign key {field} on {} has no columns", table.name))
                .into()
        }),
        _ => Err(EngineError::UnknownFieldReference {
            table: table.name.clone(),
            field: field.to_string(),
        }),
    }
}

fn put(values: &mut Vec<(String, Value)>, column: &str, value: Value) {
    match values.iter_mut().find(|(name, _)| name == column) {
        Some(slot) => slot.1 = value,
        None => values.push((column.to_string(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionRun;
    use chrono::Utc;

    const SAMPLE: &str = "\
[[Tables]]
[Player]
fields = name:string:u(u1)

[[QRChoices]]
[Duo]
fields = Player:set(Player), table_no:int
template = Player:2,table_no:0..1

[Solo]
fields = Player:fk(Player), table_no:int
template = Player:1,table_no:0..1
";

    fn run_over(tables: &[&str]) -> DetectionRun {
        DetectionRun {
            id: 1,
            constraints: RunConstraints(
                tables.iter().map(|t| (t.to_string(), vec![])).collect(),
            ),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn grouping_drops_unsplittable_texts() {
        let grouped = group_fragments(["Player:1", "Player:2", "loose", "a:b:c", "Table:9"]);
        assert_eq!(
            grouped,
            vec![
                ("Player".to_string(), vec!["1".to_string(), "2".to_string()]),
                ("Table".to_string(), vec!["9".to_string()]),
            ]
        );
    }

    #[test]
    fn first_satisfied_entry_in_run_order_wins() {
        let config = Config::parse(SAMPLE).unwrap();
        let one = group_fragments(["Player:3"]);
        let two = group_fragments(["Player:3", "Player:5"]);

        let run = run_over(&["Duo", "Solo"]);
        assert_eq!(match_template(&config, &run, &two).unwrap().entry, "Duo");
        assert_eq!(match_template(&config, &run, &one).unwrap().entry, "Solo");
        assert!(match_template(&config, &run, &group_fragments([])).is_none());

        // Same templates, opposite run order: a single fragment still only
        // fits Solo, but order decides nothing else here.
        let run = run_over(&["Solo", "Duo"]);
        assert_eq!(match_template(&config, &run, &one).unwrap().entry, "Solo");
    }

    #[test]
    fn unconstrained_tables_are_not_candidates() {
        let config = Config::parse(SAMPLE).unwrap();
        let run = run_over(&["Player"]);
        assert!(match_template(&config, &run, &group_fragments(["Player:1"])).is_none());
    }

    #[test]
    fn field_map_overlays_defaults_and_splits_sets() {
        let config = Config::parse(SAMPLE).unwrap();
        let table = config.schema.table("Duo").unwrap();
        let constraints = RunConstraints(vec![(
            "Duo".to_string(),
            vec![("table_no".to_string(), Value::Int(4))],
        )]);

        let grouped = group_fragments(["Player:1", "Player:2"]);
        let (values, sets) = field_map(table, &constraints, &grouped, true).unwrap();
        assert_eq!(values, vec![("table_no".to_string(), Value::Int(4))]);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].0.name, "Player");
        assert_eq!(sets[0].1, vec![1, 2]);

        let grouped = group_fragments(["Player:1", "Player:2", "table_no:9"]);
        let (values, _) = field_map(table, &constraints, &grouped, true).unwrap();
        assert_eq!(values, vec![("table_no".to_string(), Value::Int(9))]);
    }

    #[test]
    fn field_map_routes_foreign_keys_to_their_column() {
        let config = Config::parse(SAMPLE).unwrap();
        let table = config.schema.table("Solo").unwrap();
        let constraints = RunConstraints(vec![]);

        let grouped = group_fragments(["Player:7"]);
        let (values, sets) = field_map(table, &constraints, &grouped, true).unwrap();
        assert!(sets.is_empty());
        assert_eq!(values, vec![("Player_id".to_string(), Value::Int(7))]);
    }

    #[test]
    fn strict_field_map_rejects_repeated_single_valued_fields() {
        let config = Config::parse(SAMPLE).unwrap();
        let table = config.schema.table("Solo").unwrap();
        let constraints = RunConstraints(vec![]);
        let grouped = group_fragments(["table_no:1", "table_no:2"]);

        let err = field_map(table, &constraints, &grouped, true).unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousFieldValue { count: 2, .. }));
        // Lenient mode keeps the default untouched instead.
        let (values, _) = field_map(table, &constraints, &grouped, false).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn unknown_field_reference_is_fatal() {
        let config = Config::parse(SAMPLE).unwrap();
        let table = config.schema.table("Solo").unwrap();
        let grouped = group_fragments(["Ghost:1"]);
        let err = field_map(table, &RunConstraints(vec![]), &grouped, true).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFieldReference { .. }));
    }
}
