//! Generic expression parser for the inline mini-languages.
//!
//! Column definitions and choice templates are short expressions with nested
//! delimiters, named calls and prioritized list separators. This module
//! parses them into a small generic tree; the column and template compilers
//! interpret that tree.

use super::{ConfigError, Result};

/// Parse tree produced by [`ExprParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tree {
    /// A bare literal, e.g. `owner` or `3`.
    Atom(String),
    /// Items joined by one list delimiter, e.g. `a,b,c`.
    List { sep: String, items: Vec<Tree> },
    /// A delimited group with no leading name, e.g. `(a,b)`.
    Group {
        open: String,
        close: String,
        inner: Option<Box<Tree>>,
    },
    /// A named call, e.g. `fk(a, b.c)`.
    Call {
        name: String,
        open: String,
        close: String,
        args: Option<Box<Tree>>,
    },
}

impl Tree {
    /// The atom's text, if this node is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Tree::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// View this node as the items of a list with the given separator.
    ///
    /// A non-list node is a one-element list; lists with another separator
    /// yield themselves as the single item.
    pub fn items_of(&self, sep: &str) -> Vec<&Tree> {
        match self {
            Tree::List { sep: s, items } if s == sep => items.iter().collect(),
            other => vec![other],
        }
    }
}

/// One nesting level under construction.
struct Frame {
    /// Expected closer and call name for group frames; `None` for top level.
    opener: Option<(String, String, Option<String>)>,
    items: Vec<Tree>,
    ops: Vec<(String, u8)>,
}

impl Frame {
    fn top() -> Self {
        Frame {
            opener: None,
            items: Vec::new(),
            ops: Vec::new(),
        }
    }
}

/// Shift-reduce parser over configurable token sets.
///
/// Each list delimiter carries a priority; a lower priority binds tighter.
/// With `.` < `:` < `,` the input `a.b:c,d:e` parses as
/// `List(",", [List(":", [List(".", [a, b]), c]), List(":", [d, e])])`.
pub struct ExprParser {
    ignored: Vec<char>,
    groups: Vec<(String, String)>,
    delimiters: Vec<(String, u8)>,
}

impl ExprParser {
    pub fn new(
        ignored: &[char],
        groups: &[(&str, &str)],
        delimiters: &[(&str, u8)],
    ) -> Self {
        ExprParser {
            ignored: ignored.to_vec(),
            groups: groups
                .iter()
                .map(|(o, c)| (o.to_string(), c.to_string()))
                .collect(),
            delimiters: delimiters
                .iter()
                .map(|(d, p)| (d.to_string(), *p))
                .collect(),
        }
    }

    /// Longest-match lookup of `rest` against one token set.
    fn match_token<'a, I>(rest: &str, tokens: I) -> Option<&'a str>
    where
        I: Iterator<Item = &'a str>,
    {
        tokens
            .filter(|t| !t.is_empty() && rest.starts_with(*t))
            .max_by_key(|t| t.len())
    }

    /// Fold trailing delimiter runs with a priority below `limit` into lists.
    fn reduce(frame: &mut Frame, limit: u8) {
        while let Some(&(_, top)) = frame.ops.last() {
            if top >= limit {
                break;
            }
            let run = frame
                .ops
                .iter()
                .rev()
                .take_while(|(_, p)| *p == top)
                .count();
            let sep = frame.ops.last().expect("non-empty ops").0.clone();
            frame.ops.truncate(frame.ops.len() - run);
            let items = frame.items.split_off(frame.items.len() - (run + 1));
            frame.items.push(Tree::List { sep, items });
        }
    }

    /// Parse `text` into a tree.
    ///
    /// Pure and deterministic; every malformed shape is an error, never a
    /// silent recovery.
    pub fn parse(&self, text: &str) -> Result<Tree> {
        let mut frames: Vec<Frame> = vec![Frame::top()];
        let mut buf: Option<String> = None;
        // Set after a group or call closes: its output cannot be
        // concatenated with further literals.
        let mut sealed = false;
        let mut rest = text;

        while !rest.is_empty() {
            let c = rest.chars().next().expect("non-empty input");

            if self.ignored.contains(&c) {
                rest = &rest[c.len_utf8()..];
                continue;
            }

            if let Some(close) =
                Self::match_token(rest, self.groups.iter().map(|(_, c)| c.as_str()))
            {
                let mut frame = frames.pop().expect("frame stack never empty");
                let Some((open, expected, name)) = frame.opener.take() else {
                    return Err(ConfigError::MismatchedCloser {
                        found: close.to_string(),
                    });
                };
                if expected != close {
                    return Err(ConfigError::MismatchedCloser {
                        found: close.to_string(),
                    });
                }
                if let Some(b) = buf.take() {
                    frame.items.push(Tree::Atom(b));
                } else if !frame.ops.is_empty() && frame.items.len() == frame.ops.len() {
                    return Err(ConfigError::DanglingDelimiter {
                        delim: frame.ops.last().expect("non-empty ops").0.clone(),
                        at: text.to_string(),
                    });
                }
                Self::reduce(&mut frame, u8::MAX);
                let inner = frame.items.pop().map(Box::new);
                let node = match name {
                    Some(name) => Tree::Call {
                        name,
                        open,
                        close: close.to_string(),
                        args: inner,
                    },
                    None => Tree::Group {
                        open,
                        close: close.to_string(),
                        inner,
                    },
                };
                let parent = frames.last_mut().expect("top frame remains");
                // Each pending item must be followed by a delimiter before
                // the next one arrives.
                if parent.items.len() > parent.ops.len() {
                    return Err(ConfigError::AdjacentGroups {
                        at: text.to_string(),
                    });
                }
                parent.items.push(node);
                sealed = true;
                rest = &rest[close.len()..];
                continue;
            }

            if let Some(open) =
                Self::match_token(rest, self.groups.iter().map(|(o, _)| o.as_str()))
            {
                let close = self
                    .groups
                    .iter()
                    .find(|(o, _)| o == open)
                    .map(|(_, c)| c.clone())
                    .expect("open token comes from the group set");
                let name = buf.take();
                frames.push(Frame {
                    opener: Some((open.to_string(), close, name)),
                    items: Vec::new(),
                    ops: Vec::new(),
                });
                sealed = false;
                rest = &rest[open.len()..];
                continue;
            }

            if let Some(delim) =
                Self::match_token(rest, self.delimiters.iter().map(|(d, _)| d.as_str()))
            {
                let priority = self
                    .delimiters
                    .iter()
                    .find(|(d, _)| d == delim)
                    .map(|(_, p)| *p)
                    .expect("delimiter comes from the delimiter set");
                let frame = frames.last_mut().expect("frame stack never empty");
                if let Some(b) = buf.take() {
                    frame.items.push(Tree::Atom(b));
                } else if frame.items.len() == frame.ops.len() {
                    return Err(ConfigError::DanglingDelimiter {
                        delim: delim.to_string(),
                        at: text.to_string(),
                    });
                }
                Self::reduce(frame, priority);
                frame.ops.push((delim.to_string(), priority));
                sealed = false;
                rest = &rest[delim.len()..];
                continue;
            }

            if sealed {
                return Err(ConfigError::LetterAfterGroup {
                    literal: c,
                    at: text.to_string(),
                });
            }
            buf.get_or_insert_with(String::new).push(c);
            rest = &rest[c.len_utf8()..];
        }

        if frames.len() > 1 {
            return Err(ConfigError::UnclosedGroup {
                depth: frames.len() - 1,
            });
        }
        let mut frame = frames.pop().expect("top frame remains");
        if let Some(b) = buf.take() {
            frame.items.push(Tree::Atom(b));
        } else if !frame.ops.is_empty() && frame.items.len() == frame.ops.len() {
            return Err(ConfigError::DanglingDelimiter {
                delim: frame.ops.last().expect("non-empty ops").0.clone(),
                at: text.to_string(),
            });
        }
        Self::reduce(&mut frame, u8::MAX);
        Ok(frame
            .items
            .pop()
            .unwrap_or_else(|| Tree::Atom(String::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ExprParser {
        ExprParser::new(&[' ', '\t'], &[("(", ")")], &[(".", 0), (":", 1), (",", 2)])
    }

    fn atom(s: &str) -> Tree {
        Tree::Atom(s.to_string())
    }

    fn list(sep: &str, items: Vec<Tree>) -> Tree {
        Tree::List {
            sep: sep.to_string(),
            items,
        }
    }

    #[test]
    fn bare_atom() {
        assert_eq!(parser().parse("abc").unwrap(), atom("abc"));
    }

    #[test]
    fn empty_input_is_empty_atom() {
        assert_eq!(parser().parse("").unwrap(), atom(""));
        assert_eq!(parser().parse("   ").unwrap(), atom(""));
    }

    #[test]
    fn whitespace_is_ignored_inside_atoms() {
        assert_eq!(parser().parse(" a b ").unwrap(), atom("ab"));
    }

    #[test]
    fn priority_folding() {
        // The reference shape: a.b:c,d:e with . < : < ,
        let got = parser().parse("a.b:c,d:e").unwrap();
        let want = list(
            ",",
            vec![
                list(
                    ":",
                    vec![list(".", vec![atom("a"), atom("b")]), atom("c")],
                ),
                list(":", vec![atom("d"), atom("e")]),
            ],
        );
        assert_eq!(got, want);
    }

    #[test]
    fn equal_delimiters_accumulate() {
        assert_eq!(
            parser().parse("a,b,c").unwrap(),
            list(",", vec![atom("a"), atom("b"), atom("c")])
        );
    }

    #[test]
    fn call_with_args() {
        let got = parser().parse("fk(g, T.c)").unwrap();
        let want = Tree::Call {
            name: "fk".to_string(),
            open: "(".to_string(),
            close: ")".to_string(),
            args: Some(Box::new(list(
                ",",
                vec![atom("g"), list(".", vec![atom("T"), atom("c")])],
            ))),
        };
        assert_eq!(got, want);
    }

    #[test]
    fn empty_call() {
        let got = parser().parse("f()").unwrap();
        assert_eq!(
            got,
            Tree::Call {
                name: "f".to_string(),
                open: "(".to_string(),
                close: ")".to_string(),
                args: None,
            }
        );
    }

    #[test]
    fn anonymous_group() {
        let got = parser().parse("(a,b)").unwrap();
        assert_eq!(
            got,
            Tree::Group {
                open: "(".to_string(),
                close: ")".to_string(),
                inner: Some(Box::new(list(",", vec![atom("a"), atom("b")]))),
            }
        );
    }

    #[test]
    fn group_in_list_position() {
        let got = parser().parse("a:u(g),b:int").unwrap();
        let want = list(
            ",",
            vec![
                list(
                    ":",
                    vec![
                        atom("a"),
                        Tree::Call {
                            name: "u".to_string(),
                            open: "(".to_string(),
                            close: ")".to_string(),
                            args: Some(Box::new(atom("g"))),
                        },
                    ],
                ),
                list(":", vec![atom("b"), atom("int")]),
            ],
        );
        assert_eq!(got, want);
    }

    #[test]
    fn letter_after_group_is_an_error() {
        let err = parser().parse("f(a)x").unwrap_err();
        assert!(matches!(err, ConfigError::LetterAfterGroup { literal: 'x', .. }));
    }

    #[test]
    fn adjacent_groups_are_an_error() {
        // The first group must not be silently discarded.
        let err = parser().parse("(a)(b)").unwrap_err();
        assert!(matches!(err, ConfigError::AdjacentGroups { .. }));
        let err = parser().parse("f((a)(b))").unwrap_err();
        assert!(matches!(err, ConfigError::AdjacentGroups { .. }));
        let err = parser().parse("f(a)(b)").unwrap_err();
        assert!(matches!(err, ConfigError::AdjacentGroups { .. }));
    }

    #[test]
    fn dangling_delimiters_are_an_error() {
        for text in [",a", "a,,b", "a,", "a.b:", "f(,a)", "f(a,)"] {
            let err = parser().parse(text).unwrap_err();
            assert!(
                matches!(err, ConfigError::DanglingDelimiter { .. }),
                "{text} parsed without error"
            );
        }
    }

    #[test]
    fn unclosed_group_is_an_error() {
        let err = parser().parse("f(a").unwrap_err();
        assert!(matches!(err, ConfigError::UnclosedGroup { depth: 1 }));
    }

    #[test]
    fn stray_closer_is_an_error() {
        let err = parser().parse("a)").unwrap_err();
        assert!(matches!(err, ConfigError::MismatchedCloser { .. }));
    }

    #[test]
    fn nested_calls() {
        let got = parser().parse("a(b(c))").unwrap();
        let inner = Tree::Call {
            name: "b".to_string(),
            open: "(".to_string(),
            close: ")".to_string(),
            args: Some(Box::new(atom("c"))),
        };
        assert_eq!(
            got,
            Tree::Call {
                name: "a".to_string(),
                open: "(".to_string(),
                close: ")".to_string(),
                args: Some(Box::new(inner)),
            }
        );
    }
}
