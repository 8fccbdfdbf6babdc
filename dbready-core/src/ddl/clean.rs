//! Source text normalization applied before splitting.

use super::splitter::{ScanState, scan_line};

/// Byte-order mark some editors prepend to SQL files.
const BOM: char = '\u{feff}';

/// Strips a leading BOM and drops lines that begin with a stray `*/`.
///
/// A `*/` line is stray when no block comment is open at that point; such
/// lines are left behind when a comment's opener is edited out. Closers of
/// real comments are kept.
pub fn clean_ddl(content: &str) -> String {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    let mut state = ScanState::Normal;
    let mut kept = Vec::new();

    for line in content.split('\n') {
        if state == ScanState::Normal && line.trim().starts_with("*/") {
            tracing::warn!("Removed orphaned comment closer: {}", line.trim());
            continue;
        }
        scan_line(line, &mut state);
        kept.push(line);
    }

    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bom() {
        assert_eq!(clean_ddl("\u{feff}CREATE TABLE t (id int);"), "CREATE TABLE t (id int);");
    }

    #[test]
    fn test_drops_orphaned_closers() {
        let cleaned = clean_ddl("  */\nCREATE TABLE t (id int);\n*/ trailing\nSELECT 1;");
        assert_eq!(cleaned, "CREATE TABLE t (id int);\nSELECT 1;");
    }

    #[test]
    fn test_keeps_closers_of_open_comments() {
        let content = "/*\n header\n*/\nSELECT 1;\n";
        assert_eq!(clean_ddl(content), content);
    }

    #[test]
    fn test_closer_inside_dollar_body_is_content() {
        let content = "DO $$\n*/ odd but quoted\n$$;";
        assert_eq!(clean_ddl(content), content);
    }
}
