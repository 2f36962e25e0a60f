//! Rule text: `head(X0,X1):-body(X0,?),other(?,c)`.
//!
//! Variables print as `X<n>`, empty slots as `?`. Constants print bare when
//! they cannot be mistaken for a variable or for punctuation, otherwise as a
//! JSON string literal.

use std::fmt;

use regex::Regex;

use super::model::{Argument, Literal, Rule};
use crate::error::RuleError;
use crate::kb::KnowledgeBase;

/// Display adapter resolving relation and constant names through a KB.
pub struct RuleText<'a> {
    rule: &'a Rule,
    kb: &'a KnowledgeBase,
}

impl Rule {
    /// Renders the rule with names from `kb`.
    #[must_use]
    pub fn display<'a>(&'a self, kb: &'a KnowledgeBase) -> RuleText<'a> {
        RuleText { rule: self, kb }
    }
}

fn bare_constant(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn write_literal(f: &mut fmt::Formatter<'_>, lit: &Literal, kb: &KnowledgeBase) -> fmt::Result {
    match kb.relation(lit.relation) {
        Some(rel) => f.write_str(rel.name())?,
        None => write!(f, "#{}", lit.relation)?,
    }
    f.write_str("(")?;
    for (i, arg) in lit.args.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        match arg {
            Argument::Empty => f.write_str("?")?,
            Argument::Variable(v) => write!(f, "X{v}")?,
            Argument::Constant(c) => match kb.dictionary().name(*c) {
                Some(name) if bare_constant(name) => f.write_str(name)?,
                Some(name) => {
                    let quoted = serde_json::to_string(name).map_err(|_| fmt::Error)?;
                    f.write_str(&quoted)?;
                }
                None => write!(f, "#{c}")?,
            },
        }
    }
    f.write_str(")")
}

impl fmt::Display for RuleText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_literal(f, self.rule.head(), self.kb)?;
        f.write_str(":-")?;
        for (i, lit) in self.rule.body().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write_literal(f, lit, self.kb)?;
        }
        Ok(())
    }
}

const LITERAL_PATTERN: &str = r#"([^\s(),:"]+)\(((?:"(?:[^"\\]|\\.)*"|[^()"])*)\)"#;
const ARG_PATTERN: &str = r#""(?:[^"\\]|\\.)*"|[^,]+"#;
const VARIABLE_PATTERN: &str = r"^[A-Z][A-Za-z0-9_]*$";

/// Parses rule text against a KB's relations and constants.
#[derive(Debug, Clone)]
pub struct RuleParser {
    literal: Regex,
    arg: Regex,
    variable: Regex,
}

impl RuleParser {
    /// Compiles the parser.
    ///
    /// # Errors
    /// Never fails in practice; the patterns are fixed.
    pub fn new() -> Result<Self, RuleError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| RuleError::parse(pattern, format!("bad pattern: {e}")))
        };
        Ok(Self {
            literal: compile(LITERAL_PATTERN)?,
            arg: compile(ARG_PATTERN)?,
            variable: compile(VARIABLE_PATTERN)?,
        })
    }

    /// Parses one rule.
    ///
    /// Variable names are arbitrary identifiers starting with an upper-case
    /// letter; they are renumbered by first occurrence.
    ///
    /// # Errors
    /// Returns [`RuleError::Parse`] on malformed text, unknown relations,
    /// unknown constants or arity mismatches.
    pub fn parse(&self, text: &str, kb: &KnowledgeBase) -> Result<Rule, RuleError> {
        let mut names: Vec<String> = Vec::new();
        let mut literals = Vec::new();
        let mut cursor = 0usize;

        for (idx, caps) in self.literal.captures_iter(text).enumerate() {
            let (Some(whole), Some(name), Some(args)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                return Err(RuleError::parse(text, "malformed literal"));
            };
            let gap = text[cursor..whole.start()].trim();
            let expected = match idx {
                0 => "",
                1 => ":-",
                _ => ",",
            };
            if gap != expected {
                return Err(RuleError::parse(text, format!("expected '{expected}' before '{}'", name.as_str())));
            }
            cursor = whole.end();
            if idx == 0 {
                let rest = text[cursor..].trim_start();
                if !rest.starts_with(":-") {
                    return Err(RuleError::parse(text, "missing ':-' after the head"));
                }
            }
            literals.push(self.parse_literal(text, name.as_str(), args.as_str(), kb, &mut names)?);
        }

        let tail = text[cursor..].trim();
        let tail_ok = match literals.len() {
            0 => false,
            1 => tail == ":-",
            _ => tail.is_empty(),
        };
        if !tail_ok {
            return Err(RuleError::parse(text, format!("unexpected trailing text '{tail}'")));
        }
        Rule::from_literals(literals)
    }

    fn parse_literal(
        &self,
        text: &str,
        relation: &str,
        args: &str,
        kb: &KnowledgeBase,
        names: &mut Vec<String>,
    ) -> Result<Literal, RuleError> {
        let rel = kb
            .relation_by_name(relation)
            .ok_or_else(|| RuleError::parse(text, format!("unknown relation '{relation}'")))?;
        let mut parsed = Vec::new();
        for token in self.arg.find_iter(args) {
            let token = token.as_str().trim();
            let arg = if token == "?" {
                Argument::Empty
            } else if self.variable.is_match(token) {
                let idx = names.iter().position(|n| n == token).unwrap_or_else(|| {
                    names.push(token.to_string());
                    names.len() - 1
                });
                #[allow(clippy::cast_possible_truncation)]
                Argument::Variable(idx as u32)
            } else {
                let name: String = if token.starts_with('"') {
                    serde_json::from_str(token)
                        .map_err(|e| RuleError::parse(text, format!("bad constant {token}: {e}")))?
                } else {
                    token.to_string()
                };
                let id = kb
                    .dictionary()
                    .id(&name)
                    .ok_or_else(|| RuleError::parse(text, format!("unknown constant '{name}'")))?;
                Argument::Constant(id)
            };
            parsed.push(arg);
        }
        if parsed.len() != rel.arity() {
            return Err(RuleError::parse(
                text,
                format!("'{relation}' expects {} arguments, got {}", rel.arity(), parsed.len()),
            ));
        }
        Ok(Literal {
            relation: rel.id(),
            args: parsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("t");
        kb.add_records("parent", &[vec!["ann", "Bob"]]).unwrap();
        kb.add_records("grandparent", &[vec!["ann", "Bob"]]).unwrap();
        kb
    }

    #[test]
    fn test_parse_and_display() {
        let kb = kb();
        let parser = RuleParser::new().unwrap();
        let rule = parser
            .parse("grandparent(X,Z) :- parent(X,Y), parent(Y,Z)", &kb)
            .unwrap();
        assert_eq!(rule.length(), 3);
        assert_eq!(
            rule.display(&kb).to_string(),
            "grandparent(X0,X1):-parent(X0,X2),parent(X2,X1)"
        );
    }

    #[test]
    fn test_constants_and_empty_slots() {
        let kb = kb();
        let parser = RuleParser::new().unwrap();
        let rule = parser.parse(r#"parent(X,"Bob"):-grandparent(X,?)"#, &kb).unwrap();
        let text = rule.display(&kb).to_string();
        assert_eq!(text, r#"parent(X0,"Bob"):-grandparent(X0,?)"#);
        assert_eq!(parser.parse(&text, &kb).unwrap(), rule);

        let rule = parser.parse("parent(ann,?):-", &kb).unwrap();
        assert!(rule.body().is_empty());
        assert_eq!(rule.display(&kb).to_string(), "parent(ann,?):-");
    }

    #[test]
    fn test_parse_errors() {
        let kb = kb();
        let parser = RuleParser::new().unwrap();
        assert!(parser.parse("nope(X,Y):-parent(X,Y)", &kb).is_err());
        assert!(parser.parse("parent(X,Y):-parent(X)", &kb).is_err());
        assert!(parser.parse("parent(X,Y) parent(Y,X)", &kb).is_err());
        assert!(parser.parse("parent(X,zed):-parent(X,?)", &kb).is_err());
        assert!(parser.parse("parent(X,Y):-parent(Y,X) junk", &kb).is_err());
    }
}
