// SPDX-License-Identifier: Apache-2.0

//! SQL Analyzer
//!
//! Token-level statement classification. This is not a grammar: it looks
//! at the leading keyword, top-level clause keywords and the names that
//! follow table-introducing keywords. String literals and comments come out
//! of the tokenizer as their own tokens, so keywords inside them are never
//! mistaken for clauses. Anything the tokenizer rejects, and anything
//! carrying a MySQL executable comment, classifies as OTHER at CRITICAL.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlgate_core::RiskTier;
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::risk::tier_for;

/// Verb of a schema-changing statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DdlVerb {
    Create,
    Alter,
    Drop,
    Truncate,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl(DdlVerb),
    Metadata,
    Other,
}

impl OperationKind {
    /// Maps a leading keyword (upper case) to its kind
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" => Self::Ddl(DdlVerb::Create),
            "ALTER" => Self::Ddl(DdlVerb::Alter),
            "DROP" => Self::Ddl(DdlVerb::Drop),
            "TRUNCATE" => Self::Ddl(DdlVerb::Truncate),
            "RENAME" => Self::Ddl(DdlVerb::Rename),
            "SHOW" | "DESC" | "DESCRIBE" | "EXPLAIN" | "HELP" => Self::Metadata,
            _ => Self::Other,
        }
    }
}

/// Result of classifying one input text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: OperationKind,
    /// Upper-cased statement verb (the one after a `WITH` clause), empty when there is none
    pub keyword: String,
    pub has_where: bool,
    pub has_limit: bool,
    /// Most severe tier among the statements
    pub tier: RiskTier,
    /// Every tier present, each with the verb of the first statement carrying it
    pub tiers: BTreeMap<RiskTier, String>,
    /// Tables named in the statement, schema-qualified as written, first occurrence order
    pub tables: Vec<String>,
    pub statement_count: usize,
}

impl Classification {
    /// Text that cannot be read reliably; rated at the top tier
    fn unrecognized(keyword: String) -> Self {
        Self {
            kind: OperationKind::Other,
            tiers: BTreeMap::from([(RiskTier::Critical, keyword.clone())]),
            keyword,
            has_where: false,
            has_limit: false,
            tier: RiskTier::Critical,
            tables: Vec::new(),
            statement_count: 1,
        }
    }

    pub fn is_multi_statement(&self) -> bool {
        self.statement_count > 1
    }
}

/// Words after which a table name follows
const TABLE_INTRODUCERS: &[&str] = &["FROM", "JOIN", "INTO", "TABLE"];

/// Modifiers that may sit between an introducer and the table name
const NAME_MODIFIERS: &[&str] = &[
    "IF",
    "NOT",
    "EXISTS",
    "TABLE",
    "LOW_PRIORITY",
    "HIGH_PRIORITY",
    "DELAYED",
    "IGNORE",
    "QUICK",
    "ONLY",
];

/// Classifies a statement text; never fails
///
/// Several `;`-separated statements are classified one by one and the most
/// severe one is reported, with the table lists and tier sets merged.
pub fn classify(sql: &str) -> Classification {
    // The server executes the body of `/*! ... */`, so it is never inert
    if sql.contains("/*!") {
        return Classification::unrecognized(leading_word(sql));
    }

    let dialect = MySqlDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return Classification::unrecognized(leading_word(sql)),
    };

    let mut worst: Option<Classification> = None;
    let mut tables: Vec<String> = Vec::new();
    let mut tiers: BTreeMap<RiskTier, String> = BTreeMap::new();
    let mut count = 0;

    for statement in split_statements(&tokens) {
        count += 1;
        let current = classify_statement(&statement);
        for table in &current.tables {
            push_unique(&mut tables, table.clone());
        }
        tiers
            .entry(current.tier)
            .or_insert_with(|| current.keyword.clone());
        worst = match worst {
            Some(prev) if prev.tier >= current.tier => Some(prev),
            _ => Some(current),
        };
    }

    match worst {
        Some(mut classification) => {
            classification.tables = tables;
            classification.tiers = tiers;
            classification.statement_count = count;
            classification
        }
        None => Classification {
            statement_count: 0,
            ..Classification::unrecognized(String::new())
        },
    }
}

fn leading_word(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Splits the token stream on `;`, dropping whitespace and empty statements
fn split_statements(tokens: &[Token]) -> Vec<Vec<&Token>> {
    let mut statements = Vec::new();
    let mut current: Vec<&Token> = Vec::new();

    for token in tokens {
        match token {
            Token::SemiColon => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => current.push(token),
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

fn classify_statement(tokens: &[&Token]) -> Classification {
    let leading = tokens
        .iter()
        .enumerate()
        .find_map(|(idx, t)| match t {
            Token::Word(w) if w.quote_style.is_none() => Some((w.value.to_ascii_uppercase(), Some(idx))),
            Token::LParen => None,
            _ => Some((String::new(), None)),
        });
    let (keyword, verb_at) = match leading {
        Some((word, _)) if word == "WITH" => {
            main_verb(tokens).map_or((word, None), |(verb, idx)| (verb, Some(idx)))
        }
        Some(found) => found,
        None => (String::new(), None),
    };

    let kind = OperationKind::from_keyword(&keyword);

    let mut has_where = false;
    let mut has_limit = false;
    let mut depth: usize = 0;
    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(w) if depth == 0 && w.quote_style.is_none() => {
                if w.value.eq_ignore_ascii_case("WHERE") {
                    has_where = true;
                } else if w.value.eq_ignore_ascii_case("LIMIT") {
                    has_limit = true;
                }
            }
            _ => {}
        }
    }

    let tier = tier_for(kind, has_where);
    Classification {
        kind,
        tier,
        tiers: BTreeMap::from([(tier, keyword.clone())]),
        tables: extract_tables(tokens, kind, verb_at),
        keyword,
        has_where,
        has_limit,
        statement_count: 1,
    }
}

/// Verb of the statement a `WITH` clause leads into
///
/// CTE bodies sit inside parentheses, so the first top-level DML word is the
/// statement's own verb.
fn main_verb(tokens: &[&Token]) -> Option<(String, usize)> {
    let mut depth: usize = 0;
    for (idx, token) in tokens.iter().enumerate().skip(1) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(w) if depth == 0 && w.quote_style.is_none() => {
                let upper = w.value.to_ascii_uppercase();
                if matches!(upper.as_str(), "SELECT" | "INSERT" | "UPDATE" | "DELETE") {
                    return Some((upper, idx));
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_tables(tokens: &[&Token], kind: OperationKind, verb_at: Option<usize>) -> Vec<String> {
    let mut tables = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        let Token::Word(w) = token else { continue };
        if w.quote_style.is_some() {
            continue;
        }
        let upper = w.value.to_ascii_uppercase();
        let introduces = TABLE_INTRODUCERS.contains(&upper.as_str())
            || (Some(idx) == verb_at
                && matches!(kind, OperationKind::Update | OperationKind::Ddl(DdlVerb::Truncate)));
        if !introduces {
            continue;
        }

        let mut pos = idx + 1;
        while let Some(Token::Word(m)) = tokens.get(pos) {
            if m.quote_style.is_none() && NAME_MODIFIERS.contains(&m.value.to_ascii_uppercase().as_str()) {
                pos += 1;
            } else {
                break;
            }
        }

        if let Some(name) = qualified_name(tokens, pos) {
            push_unique(&mut tables, name);
        }
    }
    tables
}

/// Reads `name` or `schema.name` starting at `pos`
fn qualified_name(tokens: &[&Token], pos: usize) -> Option<String> {
    let Some(Token::Word(first)) = tokens.get(pos) else {
        return None;
    };
    match (tokens.get(pos + 1), tokens.get(pos + 2)) {
        (Some(Token::Period), Some(Token::Word(second))) => {
            Some(format!("{}.{}", first.value, second.value))
        }
        _ => Some(first.value.clone()),
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
