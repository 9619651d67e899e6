//! Database lifecycle: schema DDL, internal tables and the persisted
//! configuration.
//!
//! The compiled DSL text is stored in `qrc_meta` under the `config` key, so
//! an existing database can be reopened and its schema reconstructed
//! without the original configuration file.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{Result, StoreError};
use crate::config::schema::TableSchema;
use crate::config::Config;

/// Key of the persisted configuration in `qrc_meta`.
const CONFIG_KEY: &str = "config";

/// A qrchoice database: path plus the compiled configuration it was
/// created with.
pub struct Database {
    db_path: PathBuf,
    config: Config,
}

impl Database {
    /// Create (or reopen) a database for a compiled configuration,
    /// creating every declared table, join table and internal table.
    pub fn create(path: &Path, config: Config) -> Result<Self> {
        let db = Self {
            db_path: path.to_path_buf(),
            config,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Reopen an existing database, reconstructing the configuration from
    /// the store alone.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = super::connect(path)?;
        let text: Option<String> = conn
            .query_row(
                "SELECT value FROM qrc_meta WHERE key = ?",
                params![CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let Some(text) = text else {
            return Err(StoreError::Corrupt(format!(
                "{} holds no stored configuration",
                path.display()
            )));
        };
        let config = Config::parse(&text)?;
        debug!("reloaded configuration from {}", path.display());
        Ok(Self {
            db_path: path.to_path_buf(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    /// Initialize internal tables, the declared schema and the persisted
    /// configuration.
    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS qrc_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS qrc_run (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                constraint_data TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS qrc_image (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES qrc_run(id),
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                target TEXT,
                target_id INTEGER,
                ignored INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (run_id, name)
            );

            CREATE TABLE IF NOT EXISTS qrc_fragment (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id INTEGER NOT NULL REFERENCES qrc_image(id),
                data TEXT,
                bounds TEXT NOT NULL
            );
            "#,
        )?;

        for table in self.config.schema.tables() {
            conn.execute_batch(&table_ddl(table))?;
        }

        conn.execute(
            "INSERT INTO qrc_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CONFIG_KEY, self.config.to_dsl()],
        )?;
        info!(
            "initialized {} with {} table(s)",
            self.db_path.display(),
            self.config.schema.tables().count()
        );
        Ok(())
    }
}

/// `CREATE TABLE` statement for one resolved table.
pub fn table_ddl(table: &TableSchema) -> String {
    let mut parts: Vec<String> = Vec::new();

    // SQLite wants AUTOINCREMENT inline on a single-column integer key.
    let inline_pk = table
        .single_primary_key()
        .filter(|pk| table.column(pk).is_some_and(|c| c.auto_increment));

    for col in &table.columns {
        let mut def = format!("\"{}\" {}", col.name, col.ty.sql());
        if inline_pk == Some(col.name.as_str()) {
            def.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        parts.push(def);
    }
    if inline_pk.is_none() && !table.primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", quoted(&table.primary_key)));
    }
    for unique in &table.unique {
        parts.push(format!(
            "CONSTRAINT \"{}\" UNIQUE ({})",
            unique.name,
            quoted(&unique.columns)
        ));
    }
    for fk in &table.foreign_keys {
        parts.push(format!(
            "CONSTRAINT \"{}\" FOREIGN KEY ({}) REFERENCES \"{}\" ({})",
            fk.name,
            quoted(&fk.local),
            fk.target_table,
            quoted(&fk.target)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n);",
        table.name,
        parts.join(",\n    ")
    )
}

fn quoted(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
[[Tables]]
[Game]
fields = name:string:u(u1)

[[QRChoices]]
[Vote]
fields = Game:fk(Game):u(g1), voter:string:u(g1)
template = Game:1,voter:0..1
";

    #[test]
    fn ddl_for_synthesized_pk_is_inline() {
        let config = Config::parse(SAMPLE).unwrap();
        let ddl = table_ddl(config.schema.table("Game").unwrap());
        assert!(ddl.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(ddl.contains("CONSTRAINT \"u1\" UNIQUE (\"name\")"));
    }

    #[test]
    fn ddl_for_join_table_uses_composite_pk() {
        let config = Config::parse(
            "[[QRChoices]]\n[Vote]\nfields = Choice:set(Choice), voter:string\ntemplate = Choice:1..N,voter:1\n\n[[Tables]]\n[Choice]\nfields = label:string\n",
        )
        .unwrap();
        let ddl = table_ddl(config.schema.table("Vote_Choice").unwrap());
        assert!(ddl.contains("PRIMARY KEY (\"Vote_id\", \"Choice_id\")"));
        assert!(ddl.contains("CONSTRAINT \"fk_Vote\" FOREIGN KEY (\"Vote_id\") REFERENCES \"Vote\" (\"id\")"));
        assert!(ddl.contains("CONSTRAINT \"fk_Choice\" FOREIGN KEY (\"Choice_id\") REFERENCES \"Choice\" (\"id\")"));
    }

    #[test]
    fn create_then_open_round_trips_the_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("qrchoice.db");
        let config = Config::parse(SAMPLE).unwrap();
        Database::create(&path, config.clone()).unwrap();

        let reopened = Database::open(&path).unwrap();
        assert_eq!(*reopened.config(), config);
    }

    #[test]
    fn open_without_config_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.db");
        let conn = super::super::connect(&path).unwrap();
        conn.execute_batch("CREATE TABLE qrc_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);")
            .unwrap();
        drop(conn);
        assert!(matches!(
            Database::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }
}
