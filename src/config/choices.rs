//! Choice templates: the vocabulary the dispatch engine matches against.
//!
//! A template is a comma-joined list of `field:arity` pairs over one
//! declared table. Arities are inclusive ranges; the upper bound may be
//! unbounded (`n`, `N` or `*`).

use super::expr::ExprParser;
use super::schema::TableSchema;
use super::{ConfigError, Result};

/// Inclusive arity range; `max == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: u32,
    pub max: Option<u32>,
}

impl Arity {
    pub fn contains(&self, count: usize) -> bool {
        let count = count as u64;
        u64::from(self.min) <= count
            && self.max.map_or(true, |max| count <= u64::from(max))
    }
}

fn is_unbounded(s: &str) -> bool {
    matches!(s, "n" | "N" | "*")
}

/// Parse one arity spec: `3`, `1..3`, `n`/`N`/`*`, `2..*`.
pub fn parse_arity(spec: &str) -> Result<Arity> {
    let malformed = || ConfigError::MalformedArity(spec.to_string());
    let spec = spec.trim();
    if let Some((lo, hi)) = spec.split_once("..") {
        if hi.contains("..") {
            return Err(malformed());
        }
        let min = lo.trim().parse().map_err(|_| malformed())?;
        let hi = hi.trim();
        let max = if is_unbounded(hi) {
            None
        } else {
            Some(hi.parse().map_err(|_| malformed())?)
        };
        Ok(Arity { min, max })
    } else if is_unbounded(spec) {
        Ok(Arity { min: 0, max: None })
    } else {
        let exact: u32 = spec.parse().map_err(|_| malformed())?;
        Ok(Arity {
            min: exact,
            max: Some(exact),
        })
    }
}

/// One compiled choice template, keyed by entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceTemplate {
    pub entry: String,
    pub table: String,
    pub fields: Vec<(String, Arity)>,
    /// Original `template = ...` text for round-trip serialization.
    pub template_src: String,
}

/// Parser for template strings: `:` binds tighter than `,`.
fn template_parser() -> ExprParser {
    ExprParser::new(&[' ', '\t', '\n', '\r'], &[], &[(":", 0), (",", 1)])
}

/// Compile a template string against its already-created table.
///
/// The template's field names have to cover the table's declared fields
/// exactly (primary-key columns excluded, they are store-assigned); any
/// symmetric difference is fatal and reports both sets.
pub fn compile_template(table: &TableSchema, entry: &str, template: &str) -> Result<ChoiceTemplate> {
    let tree = template_parser().parse(template)?;
    let mut fields = Vec::new();
    for item in tree.items_of(",") {
        let parts = item.items_of(":");
        let (name, arity) = match parts.as_slice() {
            [name, arity] => match (name.as_atom(), arity.as_atom()) {
                (Some(n), Some(a)) if !n.is_empty() => (n.to_string(), parse_arity(a)?),
                _ => return Err(ConfigError::MalformedTemplate(template.to_string())),
            },
            _ => return Err(ConfigError::MalformedTemplate(template.to_string())),
        };
        fields.push((name, arity));
    }

    let declared = table.template_fields();
    let missing: Vec<&str> = declared
        .iter()
        .copied()
        .filter(|f| !fields.iter().any(|(name, _)| name == f))
        .collect();
    let unexpected: Vec<&str> = fields
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| !declared.contains(name))
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ConfigError::TemplateFieldMismatch {
            entry: entry.to_string(),
            missing: missing.join(","),
            unexpected: unexpected.join(","),
        });
    }

    Ok(ChoiceTemplate {
        entry: entry.to_string(),
        table: table.name.to_string(),
        fields,
        template_src: template.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SchemaBuilder;

    #[test]
    fn exact_arity() {
        assert_eq!(parse_arity("3").unwrap(), Arity { min: 3, max: Some(3) });
    }

    #[test]
    fn bounded_range() {
        assert_eq!(parse_arity("1..3").unwrap(), Arity { min: 1, max: Some(3) });
    }

    #[test]
    fn unbounded_shorthands() {
        for s in ["n", "N", "*"] {
            assert_eq!(parse_arity(s).unwrap(), Arity { min: 0, max: None });
        }
    }

    #[test]
    fn half_open_range() {
        assert_eq!(parse_arity("2..*").unwrap(), Arity { min: 2, max: None });
        assert_eq!(parse_arity("2..N").unwrap(), Arity { min: 2, max: None });
    }

    #[test]
    fn malformed_arities() {
        for s in ["1..2..3", "x", "", "..", "1..", "-1"] {
            assert!(parse_arity(s).is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn arity_containment() {
        let a = parse_arity("1..3").unwrap();
        assert!(!a.contains(0));
        assert!(a.contains(1));
        assert!(a.contains(3));
        assert!(!a.contains(4));
        assert!(parse_arity("*").unwrap().contains(1000));
    }

    fn table(fields: &str) -> crate::config::schema::Schema {
        let mut b = SchemaBuilder::new();
        b.add_table("Vote", fields).unwrap();
        b.add_table("Game", "name:string").unwrap();
        b.finish().unwrap()
    }

    #[test]
    fn compile_against_table() {
        let schema = table("Game:fk(Game), voter:string");
        let t = compile_template(schema.table("Vote").unwrap(), "Vote", "Game:1,voter:0..1")
            .unwrap();
        assert_eq!(t.table, "Vote");
        assert_eq!(t.fields.len(), 2);
        assert_eq!(t.fields[0].0, "Game");
        assert_eq!(t.fields[0].1, Arity { min: 1, max: Some(1) });
    }

    #[test]
    fn field_mismatch_reports_both_sets() {
        let schema = table("Game:fk(Game), voter:string");
        let err = compile_template(schema.table("Vote").unwrap(), "Vote", "Game:1,extra:1")
            .unwrap_err();
        match err {
            ConfigError::TemplateFieldMismatch {
                missing,
                unexpected,
                ..
            } => {
                assert_eq!(missing, "voter");
                assert_eq!(unexpected, "extra");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn synthesized_pk_is_not_required() {
        let schema = table("voter:string");
        assert!(compile_template(schema.table("Vote").unwrap(), "Vote", "voter:1").is_ok());
    }
}
