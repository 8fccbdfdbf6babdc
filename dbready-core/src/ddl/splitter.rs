//! Splits DDL source text into independently executable statements.
//!
//! The scanner walks the text line by line and tracks whether it is inside a
//! single-quoted string, a quoted identifier, a dollar-quoted body or a
//! (nestable) block comment. A statement ends at a line whose last code
//! character is `;` while none of those are open, so `DO $$ ... $$;` blocks
//! and function bodies stay whole.
//!
//! Comments are removed outside literals; string and dollar-quoted contents
//! are passed through untouched.

use serde::Serialize;

/// Longest statement prefix kept for log and report previews.
const PREVIEW_LEN: usize = 200;

/// One executable statement extracted from a DDL source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlStatement {
    /// 1-based position within the source
    pub index: usize,
    pub sql: String,
}

impl DdlStatement {
    /// First line of the statement, truncated for display.
    pub fn preview(&self) -> String {
        let first_line = self.sql.lines().next().unwrap_or_default();
        first_line.chars().take(PREVIEW_LEN).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ScanState {
    Normal,
    /// Inside a string literal; `escape` is set for `E'...'` strings, where
    /// a backslash escapes the next character
    SingleQuote { escape: bool },
    DoubleQuote,
    /// Inside a dollar-quoted body; holds the full delimiter, e.g. `$body$`
    Dollar(String),
    /// Inside a block comment at the given nesting depth
    BlockComment(u32),
}

/// Splits `text` into statements.
///
/// # Example
/// ```rust
/// use dbready_core::ddl::split_statements;
///
/// let statements = split_statements(
///     "CREATE TABLE a (id int); -- first\nDO $$ BEGIN PERFORM 1; END $$;\n",
/// );
/// assert_eq!(statements.len(), 2);
/// assert_eq!(statements[0].sql, "CREATE TABLE a (id int);");
/// ```
pub fn split_statements(text: &str) -> Vec<DdlStatement> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::Normal;

    for line in text.split('\n') {
        let started_in_literal = matches!(
            state,
            ScanState::SingleQuote { .. } | ScanState::DoubleQuote | ScanState::Dollar(_)
        );

        let code = scan_line(line, &mut state);

        if started_in_literal {
            // Literal content keeps its exact layout
            current.push_str(code.trim_end_matches('\r'));
            current.push('\n');
        } else {
            let trimmed = code.trim();
            if trimmed.is_empty() {
                continue;
            }
            current.push_str(trimmed);
            current.push('\n');
        }

        if state == ScanState::Normal && code.trim_end().ends_with(';') {
            push_statement(&mut statements, &current);
            current.clear();
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<DdlStatement>, buffer: &str) {
    let sql = buffer.trim();
    if sql.trim_matches(|c: char| c == ';' || c.is_whitespace()).is_empty() {
        return;
    }
    statements.push(DdlStatement {
        index: statements.len() + 1,
        sql: sql.to_string(),
    });
}

/// Scans one line, updating `state`, and returns the line with comments
/// outside literals removed.
pub(super) fn scan_line(line: &str, state: &mut ScanState) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            ScanState::Normal => match (c, next) {
                ('-', Some('-')) => break,
                ('/', Some('*')) => {
                    *state = ScanState::BlockComment(1);
                    i += 2;
                    continue;
                }
                ('\'', _) => {
                    *state = ScanState::SingleQuote {
                        escape: has_escape_prefix(&chars, i),
                    };
                    out.push(c);
                }
                ('"', _) => {
                    *state = ScanState::DoubleQuote;
                    out.push(c);
                }
                ('$', _) if !follows_identifier(&chars, i) => {
                    if let Some(tag) = dollar_tag_at(&chars, i) {
                        i += tag.chars().count();
                        out.push_str(&tag);
                        *state = ScanState::Dollar(tag);
                        continue;
                    }
                    out.push(c);
                }
                _ => out.push(c),
            },
            ScanState::SingleQuote { escape } => {
                out.push(c);
                if *escape && c == '\\' {
                    if let Some(escaped) = next {
                        out.push(escaped);
                        i += 2;
                        continue;
                    }
                } else if c == '\'' {
                    if next == Some('\'') {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    *state = ScanState::Normal;
                }
            }
            ScanState::DoubleQuote => {
                out.push(c);
                if c == '"' {
                    *state = ScanState::Normal;
                }
            }
            ScanState::Dollar(tag) => {
                if starts_with_at(&chars, i, tag) {
                    let len = tag.chars().count();
                    out.push_str(tag);
                    i += len;
                    *state = ScanState::Normal;
                    continue;
                }
                out.push(c);
            }
            ScanState::BlockComment(depth) => match (c, next) {
                ('/', Some('*')) => {
                    *depth += 1;
                    i += 2;
                    continue;
                }
                ('*', Some('/')) => {
                    *depth -= 1;
                    if *depth == 0 {
                        *state = ScanState::Normal;
                        // Keep tokens on either side of the comment apart
                        out.push(' ');
                    }
                    i += 2;
                    continue;
                }
                _ => {}
            },
        }

        i += 1;
    }

    out
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether the quote at `i` opens an `E'...'` escape string.
fn has_escape_prefix(chars: &[char], i: usize) -> bool {
    i > 0
        && matches!(chars[i - 1], 'E' | 'e')
        && (i < 2 || !is_identifier_char(chars[i - 2]))
}

/// `$` directly after an identifier character is part of the identifier.
fn follows_identifier(chars: &[char], i: usize) -> bool {
    i > 0 && is_identifier_char(chars[i - 1])
}

/// Returns `$$` or `$tag$` starting at `i`, if present.
///
/// Tags follow identifier rules, so positional parameters like `$1` are not
/// delimiters.
fn dollar_tag_at(chars: &[char], i: usize) -> Option<String> {
    let mut j = i + 1;
    match chars.get(j) {
        Some('$') => return Some("$$".to_string()),
        Some(&c) if c.is_alphabetic() || c == '_' => {}
        _ => return None,
    }

    while let Some(&c) = chars.get(j) {
        if c == '$' {
            return Some(chars[i..=j].iter().collect());
        }
        if !is_identifier_char(c) {
            return None;
        }
        j += 1;
    }
    None
}

fn starts_with_at(chars: &[char], i: usize, pattern: &str) -> bool {
    let mut idx = i;
    for p in pattern.chars() {
        if chars.get(idx) != Some(&p) {
            return false;
        }
        idx += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_of(text: &str) -> Vec<String> {
        split_statements(text).into_iter().map(|s| s.sql).collect()
    }

    #[test]
    fn test_simple_statements_and_indices() {
        let statements = split_statements("CREATE TABLE a (id int);\n\nCREATE TABLE b (id int);\n");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].index, 1);
        assert_eq!(statements[1].index, 2);
        assert_eq!(statements[1].sql, "CREATE TABLE b (id int);");
    }

    #[test]
    fn test_do_block_is_one_statement() {
        let text = "DO $$\nBEGIN\n  PERFORM 1;\n  PERFORM 2;\nEND $$;\n";
        let statements = sql_of(text);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("DO $$"));
        assert!(statements[0].contains("PERFORM 2;"));
        assert!(statements[0].ends_with("END $$;"));
    }

    #[test]
    fn test_tagged_dollar_body_with_nested_plain_dollars() {
        let text = "CREATE FUNCTION f() RETURNS void AS $fn$\nBEGIN\n  EXECUTE $$SELECT 1;$$;\nEND;\n$fn$ LANGUAGE plpgsql;\nSELECT 2;";
        let statements = sql_of(text);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("EXECUTE $$SELECT 1;$$;"));
        assert_eq!(statements[1], "SELECT 2;");
    }

    #[test]
    fn test_positional_parameters_are_not_tags() {
        let text = "PREPARE lookup (int) AS\nSELECT * FROM t WHERE id = $1;\nSELECT 3;";
        assert_eq!(
            sql_of(text),
            vec![
                "PREPARE lookup (int) AS\nSELECT * FROM t WHERE id = $1;".to_string(),
                "SELECT 3;".to_string()
            ]
        );
    }

    #[test]
    fn test_line_comments_stripped_outside_literals() {
        let text = "-- header\nCREATE TABLE t ( -- trailing\n  note text DEFAULT '-- kept' -- gone\n);";
        let statements = sql_of(text);
        assert_eq!(
            statements,
            vec!["CREATE TABLE t (\nnote text DEFAULT '-- kept'\n);".to_string()]
        );
    }

    #[test]
    fn test_dollar_body_comments_untouched() {
        let text = "DO $$\nBEGIN\n  -- inside body\n  PERFORM 1;\nEND $$;";
        let statements = sql_of(text);
        assert!(statements[0].contains("  -- inside body"));
    }

    #[test]
    fn test_block_comments_including_nested() {
        let text = "/* file header\n   /* nested */ still comment;\n*/\nCREATE TABLE t (id int /* inline */);";
        assert_eq!(sql_of(text), vec!["CREATE TABLE t (id int  );".to_string()]);
    }

    #[test]
    fn test_comment_only_statements_dropped() {
        let text = "-- just a comment\n/* and another */\n;\n";
        assert!(split_statements(text).is_empty());
    }

    #[test]
    fn test_trailing_content_without_semicolon() {
        let statements = sql_of("SELECT 1;\nSELECT 2");
        assert_eq!(statements, vec!["SELECT 1;".to_string(), "SELECT 2".to_string()]);
    }

    #[test]
    fn test_semicolon_inside_string_spanning_lines() {
        let text = "INSERT INTO t VALUES ('a;\nb;');\nSELECT 1;";
        let statements = sql_of(text);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO t VALUES ('a;\nb;');");
    }

    #[test]
    fn test_escaped_quotes_and_quoted_identifiers() {
        let text = "COMMENT ON TABLE \"odd;name\" IS 'it''s; fine';\nSELECT 1;";
        let statements = sql_of(text);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "COMMENT ON TABLE \"odd;name\" IS 'it''s; fine';");
    }

    #[test]
    fn test_escape_string_backslash_quote() {
        let text = "COMMENT ON TABLE t IS E'it\\'s fine';\nCREATE TABLE a (id int);\nCREATE TABLE b (id int);";
        let statements = sql_of(text);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "COMMENT ON TABLE t IS E'it\\'s fine';");
        assert_eq!(statements[2], "CREATE TABLE b (id int);");
    }

    #[test]
    fn test_backslash_is_literal_in_standard_strings() {
        // Without the E prefix a trailing backslash does not escape the quote
        let text = "INSERT INTO paths VALUES ('C:\\dir\\');\nSELECT 1;";
        let statements = sql_of(text);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO paths VALUES ('C:\\dir\\');");

        // An identifier ending in e is not an escape prefix
        let text = "SELECT type'x\\';\nSELECT 2;";
        assert_eq!(sql_of(text).len(), 2);
    }

    #[test]
    fn test_multiple_statements_on_one_line_stay_together() {
        let statements = sql_of("SELECT 1; SELECT 2;\nSELECT 3;");
        assert_eq!(statements, vec!["SELECT 1; SELECT 2;".to_string(), "SELECT 3;".to_string()]);
    }

    #[test]
    fn test_preview_truncates_first_line() {
        let statement = DdlStatement {
            index: 1,
            sql: format!("SELECT '{}';\nSELECT 2;", "x".repeat(500)),
        };
        assert_eq!(statement.preview().chars().count(), PREVIEW_LEN);
    }
}
