//! Schema inspection command.

use std::path::Path;

use crate::cli::helpers::open_database;
use crate::repository::database::table_ddl;

/// Print the schema stored in the database, as DSL or as SQL DDL.
pub fn cmd_schema(database: &Path, ddl: bool) -> anyhow::Result<()> {
    let db = open_database(database)?;
    if ddl {
        for table in db.config().schema.tables() {
            println!("{}", table_ddl(table));
        }
    } else {
        print!("{}", db.config().to_dsl());
    }
    Ok(())
}
