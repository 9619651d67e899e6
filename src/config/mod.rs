//! The schema DSL compiler.
//!
//! A configuration file declares relational tables and choice templates in
//! a compact sectioned format:
//!
//! ```text
//! [[Tables]]
//! [Game]
//! fields = name:string:u(u1)
//!
//! [[QRChoices]]
//! [Vote]
//! fields = Game:fk(Game):u(g1), voter:string:u(g1), Choice:set(Choice)
//! template = Game:1,voter:0..1,Choice:1..N
//! ```
//!
//! `parse` compiles this into an immutable [`Config`]; `to_dsl` serializes
//! it back to the same textual form so the schema can be persisted next to
//! the data store and reconstructed without the original file.

pub mod choices;
pub mod columns;
pub mod expr;
pub mod schema;

use regex::Regex;
use thiserror::Error;

use choices::{compile_template, ChoiceTemplate};
use schema::{Schema, SchemaBuilder};

/// Errors raised while compiling the schema DSL. All of them are fatal;
/// the compiler never recovers from a malformed input.
#[derive(Debug, Error)]
pub enum ConfigError {
    // Parser-level syntax errors.
    #[error("literal {literal:?} after a closed group in {at:?}")]
    LetterAfterGroup { literal: char, at: String },
    #[error("adjacent groups with no delimiter between them in {at:?}")]
    AdjacentGroups { at: String },
    #[error("delimiter {delim:?} with nothing on one side in {at:?}")]
    DanglingDelimiter { delim: String, at: String },
    #[error("closing {found:?} does not match any open group")]
    MismatchedCloser { found: String },
    #[error("input ended with {depth} unclosed group(s)")]
    UnclosedGroup { depth: usize },
    #[error("unknown section [[{0}]]")]
    UnknownSection(String),
    #[error("unknown key {key:?} in [{entry}]")]
    UnknownKey { entry: String, key: String },
    #[error("missing key {key:?} in [{entry}]")]
    MissingKey { entry: String, key: String },
    #[error("line outside any section or not `key = value`: {0:?}")]
    MalformedLine(String),

    // Schema compilation errors.
    #[error("unknown column type {0:?}")]
    UnknownType(String),
    #[error("unknown column attribute {0:?}")]
    UnknownAttribute(String),
    #[error("malformed column definition in {0:?}")]
    MalformedColumn(String),
    #[error("duplicate table {0:?}")]
    DuplicateTable(String),
    #[error("duplicate column {column:?} on table {table}")]
    DuplicateColumn { table: String, column: String },
    #[error("foreign key {fk:?} on {table}: legs target both {first} and {second}")]
    CompositeFkTargetMismatch {
        table: String,
        fk: String,
        first: String,
        second: String,
    },
    #[error("{table}: reference to undeclared table {target:?}")]
    UnknownTargetTable { table: String, target: String },
    #[error("set relation {set:?} on {table}: endpoint {endpoint} has a composite primary key")]
    CompositeSetEndpoint {
        table: String,
        set: String,
        endpoint: String,
    },
    #[error("table {table} has no column {column:?}")]
    UnknownTargetColumn { table: String, column: String },
    #[error("unique group {group:?} on {table}: member {member:?} is neither a column nor a foreign key")]
    UnresolvedUniqueMember {
        table: String,
        group: String,
        member: String,
    },

    // Template compilation errors.
    #[error("malformed arity {0:?}: expected `<int>`, `n|N|*` or `<int>..<int|n|N|*>`")]
    MalformedArity(String),
    #[error("malformed template {0:?}: expected `field:arity,...`")]
    MalformedTemplate(String),
    #[error("entry {entry}: missing fields [{missing}]; not expecting fields [{unexpected}]")]
    TemplateFieldMismatch {
        entry: String,
        missing: String,
        unexpected: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A compiled configuration: the resolved schema plus the choice templates
/// in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub schema: Schema,
    choices: Vec<ChoiceTemplate>,
}

/// Raw declarations in file order, before resolution.
#[derive(Default)]
struct Declarations {
    tables: Vec<(String, String)>,
    choices: Vec<(String, String, String)>,
}

impl Config {
    /// Compile a configuration file.
    pub fn parse(text: &str) -> Result<Config> {
        let decls = collect_declarations(text)?;

        let mut builder = SchemaBuilder::new();
        for (name, fields) in &decls.tables {
            builder.add_table(name, fields)?;
        }
        for (name, fields, _) in &decls.choices {
            builder.add_table(name, fields)?;
        }
        let schema = builder.finish()?;

        let mut choices = Vec::with_capacity(decls.choices.len());
        for (name, _, template) in &decls.choices {
            let table = schema
                .table(name)
                .expect("choice entries register their table");
            choices.push(compile_template(table, name, template)?);
        }

        Ok(Config { schema, choices })
    }

    /// The compiled choice templates, in declaration order.
    pub fn choices(&self) -> &[ChoiceTemplate] {
        &self.choices
    }

    pub fn choice(&self, entry: &str) -> Option<&ChoiceTemplate> {
        self.choices.iter().find(|c| c.entry == entry)
    }

    /// The template whose entry table is `table`, if any.
    pub fn choice_for_table(&self, table: &str) -> Option<&ChoiceTemplate> {
        self.choices.iter().find(|c| c.table == table)
    }

    /// Serialize back to the textual DSL form.
    ///
    /// The original `fields`/`template` strings are preserved, so
    /// `parse(to_dsl(parse(s))) == parse(s)`.
    pub fn to_dsl(&self) -> String {
        let mut out = String::from("[[Tables]]\n");
        for table in self.schema.declared_tables() {
            if self.choice(&table.name).is_some() {
                continue;
            }
            let fields = table.fields_src.as_deref().unwrap_or_default();
            out.push_str(&format!("[{}]\nfields = {}\n\n", table.name, fields));
        }
        if !self.choices.is_empty() {
            out.push_str("[[QRChoices]]\n");
            for choice in &self.choices {
                let table = self
                    .schema
                    .table(&choice.table)
                    .expect("choice tables exist");
                let fields = table.fields_src.as_deref().unwrap_or_default();
                out.push_str(&format!(
                    "[{}]\nfields = {}\ntemplate = {}\n\n",
                    choice.entry, fields, choice.template_src
                ));
            }
        }
        out
    }
}

/// Split a file into `[[Section]]` blocks of `[subsection]` key-value
/// groups and collect the table and choice declarations in file order.
fn collect_declarations(text: &str) -> Result<Declarations> {
    let section_re = Regex::new(r"^\[\[(\w+)\]\]\s*$").expect("valid regex");
    let subsection_re = Regex::new(r"^\[(\w+)\]\s*$").expect("valid regex");

    let mut decls = Declarations::default();
    let mut section: Option<String> = None;
    let mut subsection: Option<String> = None;
    // Accumulated values for the open subsection; repeated keys join with
    // commas.
    let mut fields: Vec<String> = Vec::new();
    let mut template: Vec<String> = Vec::new();

    let mut close_subsection = |section: &str,
                                name: Option<String>,
                                fields: &mut Vec<String>,
                                template: &mut Vec<String>,
                                decls: &mut Declarations|
     -> Result<()> {
        let Some(name) = name else { return Ok(()) };
        if fields.is_empty() {
            return Err(ConfigError::MissingKey {
                entry: name,
                key: "fields".to_string(),
            });
        }
        let joined_fields = fields.drain(..).collect::<Vec<_>>().join(",");
        match section {
            "tables" => {
                if !template.is_empty() {
                    return Err(ConfigError::UnknownKey {
                        entry: name,
                        key: "template".to_string(),
                    });
                }
                decls.tables.push((name, joined_fields));
            }
            "qrchoices" => {
                if template.is_empty() {
                    return Err(ConfigError::MissingKey {
                        entry: name,
                        key: "template".to_string(),
                    });
                }
                let joined = template.drain(..).collect::<Vec<_>>().join(",");
                decls.choices.push((name, joined_fields, joined));
            }
            _ => unreachable!("section validated on entry"),
        }
        Ok(())
    };

    for line in text.lines() {
        if let Some(m) = section_re.captures(line) {
            if let Some(sec) = section.as_deref() {
                close_subsection(sec, subsection.take(), &mut fields, &mut template, &mut decls)?;
            }
            let name = m[1].to_lowercase();
            if name != "tables" && name != "qrchoices" {
                return Err(ConfigError::UnknownSection(m[1].to_string()));
            }
            section = Some(name);
            continue;
        }
        if let Some(m) = subsection_re.captures(line) {
            let Some(sec) = section.as_deref() else {
                return Err(ConfigError::MalformedLine(line.to_string()));
            };
            close_subsection(sec, subsection.take(), &mut fields, &mut template, &mut decls)?;
            subsection = Some(m[1].to_string());
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MalformedLine(line.to_string()));
        };
        let (key, value) = (key.trim(), value.trim());
        let Some(sub) = subsection.as_deref() else {
            return Err(ConfigError::MalformedLine(line.to_string()));
        };
        match key {
            "fields" => fields.push(value.to_string()),
            "template" if section.as_deref() == Some("qrchoices") => {
                template.push(value.to_string())
            }
            other => {
                return Err(ConfigError::UnknownKey {
                    entry: sub.to_string(),
                    key: other.to_string(),
                })
            }
        }
    }
    if let Some(sec) = section.as_deref() {
        close_subsection(sec, subsection.take(), &mut fields, &mut template, &mut decls)?;
    }
    Ok(decls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[[Tables]]
[Game]
fields = name:string:u(u1)

[Choice]
fields = label:string:u(u1)

[[QRChoices]]
[Vote]
fields = Game:fk(Game):u(g1), voter:string:u(g1), Choice:set(Choice)
template = Game:1,voter:0..1,Choice:1..N
";

    #[test]
    fn parses_sections_and_entries() {
        let config = Config::parse(SAMPLE).unwrap();
        assert!(config.schema.table("Game").is_some());
        assert!(config.schema.table("Vote").is_some());
        assert!(config.schema.table("Vote_Choice").is_some());
        let vote = config.choice("Vote").unwrap();
        assert_eq!(vote.table, "Vote");
        assert_eq!(vote.fields.len(), 3);
        assert_eq!(config.choice_for_table("Vote").unwrap().entry, "Vote");
    }

    #[test]
    fn round_trip_is_stable() {
        let config = Config::parse(SAMPLE).unwrap();
        let reparsed = Config::parse(&config.to_dsl()).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn unknown_section_is_fatal() {
        let err = Config::parse("[[Bogus]]\n[A]\nfields = a:int\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSection(s) if s == "Bogus"));
    }

    #[test]
    fn unknown_key_is_fatal() {
        let err =
            Config::parse("[[Tables]]\n[A]\nfields = a:int\ncolor = red\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { key, .. } if key == "color"));
    }

    #[test]
    fn template_outside_choices_is_fatal() {
        let err =
            Config::parse("[[Tables]]\n[A]\nfields = a:int\ntemplate = a:1\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { key, .. } if key == "template"));
    }

    #[test]
    fn missing_template_is_fatal() {
        let err = Config::parse("[[QRChoices]]\n[A]\nfields = a:int\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { key, .. } if key == "template"));
    }

    #[test]
    fn key_errors_name_the_entry() {
        let err = Config::parse("[[Tables]]\n[Game]\n").unwrap_err();
        assert!(matches!(
            &err,
            ConfigError::MissingKey { entry, key } if entry == "Game" && key == "fields"
        ));
        assert_eq!(err.to_string(), "missing key \"fields\" in [Game]");
    }

    #[test]
    fn repeated_keys_concatenate() {
        let text = "\
[[QRChoices]]
[Vote]
fields = a:int
fields = b:string
template = a:1
template = b:1
";
        let config = Config::parse(text).unwrap();
        let vote = config.choice("Vote").unwrap();
        assert_eq!(vote.fields.len(), 2);
        assert!(config.schema.table("Vote").unwrap().column("b").is_some());
    }
}
