//! Generic row operations against schema-declared tables.
//!
//! Everything here is driven by a [`TableSchema`] rather than hand-written
//! SQL per table, since the table set is only known at runtime.

use rusqlite::{Connection, ToSql};
use tracing::debug;

use super::{Result, StoreError};
use crate::config::schema::{EntrySet, Schema, TableSchema};
use crate::models::Value;

/// Insert one row and return its rowid.
pub fn insert_row(
    conn: &Connection,
    table: &TableSchema,
    values: &[(String, Value)],
) -> Result<i64> {
    let columns = values
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO \"{}\" ({columns}) VALUES ({placeholders})",
        table.name
    );
    let params: Vec<&dyn ToSql> = values.iter().map(|(_, v)| v as &dyn ToSql).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite the given columns of the row with primary key `id`.
pub fn update_row(
    conn: &Connection,
    table: &TableSchema,
    id: i64,
    values: &[(String, Value)],
) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let pk = table
        .single_primary_key()
        .ok_or_else(|| StoreError::Corrupt(format!("{} has no single primary key", table.name)))?;
    let assignments = values
        .iter()
        .map(|(name, _)| format!("\"{name}\" = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE \"{}\" SET {assignments} WHERE \"{pk}\" = ?",
        table.name
    );
    let mut params: Vec<&dyn ToSql> = values.iter().map(|(_, v)| v as &dyn ToSql).collect();
    params.push(&id);
    conn.execute(&sql, params.as_slice())?;
    Ok(())
}

/// Look a row up through the table's unique constraints, in declared order.
///
/// Each constraint whose columns are all present in `values` is tried in
/// turn; the first one that matches a row wins. A constraint matching more
/// than one row is a consistency fault, never resolved silently.
pub fn find_unique(
    conn: &Connection,
    table: &TableSchema,
    values: &[(String, Value)],
) -> Result<Option<i64>> {
    let pk = table
        .single_primary_key()
        .ok_or_else(|| StoreError::Corrupt(format!("{} has no single primary key", table.name)))?;
    let get = |name: &str| values.iter().find(|(n, _)| n == name).map(|(_, v)| v);

    for unique in &table.unique {
        let Some(bound) = unique
            .columns
            .iter()
            .map(|c| get(c).map(|v| (c.as_str(), v)))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let predicate = bound
            .iter()
            .map(|(c, v)| match v {
                Value::Null => format!("\"{c}\" IS NULL"),
                _ => format!("\"{c}\" = ?"),
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT \"{pk}\" FROM \"{}\" WHERE {predicate} LIMIT 2",
            table.name
        );
        let params: Vec<&dyn ToSql> = bound
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Null))
            .map(|(_, v)| *v as &dyn ToSql)
            .collect();
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params.as_slice(), |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        match ids.as_slice() {
            [] => continue,
            [id] => {
                debug!(table = %table.name, constraint = %unique.name, id, "unique hit");
                return Ok(Some(*id));
            }
            _ => {
                return Err(StoreError::ConsistencyFault(format!(
                    "constraint {} on {} matches {} rows",
                    unique.name,
                    table.name,
                    ids.len()
                )))
            }
        }
    }
    Ok(None)
}

/// Replace the join-table links of one source row with exactly `targets`.
///
/// The resync is a full delete followed by reinsertion, so stale links from
/// earlier dispatches disappear and the operation is idempotent.
pub fn replace_set_links(
    conn: &Connection,
    schema: &Schema,
    set: &EntrySet,
    source_id: i64,
    targets: &[i64],
) -> Result<()> {
    let join = schema
        .table(&set.join_table)
        .ok_or_else(|| StoreError::Corrupt(format!("missing join table {}", set.join_table)))?;
    let source_fk = join_leg(join, &set.source)?;
    let target_fk = join_leg(join, &set.target)?;

    conn.execute(
        &format!(
            "DELETE FROM \"{}\" WHERE \"{source_fk}\" = ?",
            join.name
        ),
        [source_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO \"{}\" (\"{source_fk}\", \"{target_fk}\") VALUES (?, ?)",
        join.name
    ))?;
    for target in targets {
        stmt.execute([source_id, *target])?;
    }
    Ok(())
}

/// The single local column of the join table's foreign key toward `table`.
fn join_leg(join: &TableSchema, table: &str) -> Result<String> {
    let fk = join
        .foreign_key(&format!("fk_{table}"))
        .ok_or_else(|| StoreError::Corrupt(format!("{} has no leg toward {table}", join.name)))?;
    match fk.local.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(StoreError::Corrupt(format!(
            "composite leg toward {table} in {}",
            join.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repository::database::Database;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
[[Tables]]
[Game]
fields = name:string:u(u1), year:int

[[QRChoices]]
[Vote]
fields = Game:set(Game), voter:string:u(v1)
template = Game:1..N,voter:1
";

    fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::create(
            &dir.path().join("rows.db"),
            Config::parse(SAMPLE).unwrap(),
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn insert_and_find_through_unique() {
        let (_dir, db) = setup();
        let conn = db.connect().unwrap();
        let table = db.config().schema.table("Game").unwrap();

        let id = insert_row(
            &conn,
            table,
            &[
                ("name".into(), Value::Text("chess".into())),
                ("year".into(), Value::Int(1475)),
            ],
        )
        .unwrap();

        let found = find_unique(&conn, table, &[("name".into(), Value::Text("chess".into()))])
            .unwrap();
        assert_eq!(found, Some(id));
        let missing =
            find_unique(&conn, table, &[("name".into(), Value::Text("go".into()))]).unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn find_unique_skips_constraints_with_unbound_columns() {
        let (_dir, db) = setup();
        let conn = db.connect().unwrap();
        let table = db.config().schema.table("Game").unwrap();
        // No unique constraint mentions `year` alone, so nothing is tried.
        let found = find_unique(&conn, table, &[("year".into(), Value::Int(1475))]).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn update_row_overwrites_columns() {
        let (_dir, db) = setup();
        let conn = db.connect().unwrap();
        let table = db.config().schema.table("Game").unwrap();
        let id = insert_row(&conn, table, &[("name".into(), Value::Text("go".into()))]).unwrap();
        update_row(&conn, table, id, &[("year".into(), Value::Int(-2300))]).unwrap();
        let year: i64 = conn
            .query_row("SELECT year FROM Game WHERE id = ?", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(year, -2300);
    }

    #[test]
    fn replace_set_links_is_a_full_resync() {
        let (_dir, db) = setup();
        let conn = db.connect().unwrap();
        let schema = &db.config().schema;
        let games = schema.table("Game").unwrap();
        let votes = schema.table("Vote").unwrap();
        let set = votes.set("Game").unwrap();

        let g1 = insert_row(&conn, games, &[("name".into(), Value::Text("a".into()))]).unwrap();
        let g2 = insert_row(&conn, games, &[("name".into(), Value::Text("b".into()))]).unwrap();
        let vote =
            insert_row(&conn, votes, &[("voter".into(), Value::Text("kim".into()))]).unwrap();

        replace_set_links(&conn, schema, set, vote, &[g1, g2]).unwrap();
        replace_set_links(&conn, schema, set, vote, &[g2]).unwrap();

        let linked: Vec<i64> = conn
            .prepare("SELECT Game_id FROM Vote_Game WHERE Vote_id = ?")
            .unwrap()
            .query_map([vote], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(linked, vec![g2]);
    }
}
