//! Splitting SQL scripts into statements.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    DollarBlock,
    LineComment,
    BlockComment,
}

/// Splits a script on `;`.
///
/// Separators inside string literals, quoted identifiers, `$$` blocks and
/// comments (`--`, `/* */`, and `//` at the start of a token) are ignored. Fragments that hold nothing but whitespace and
/// comments are dropped; the rest are returned trimmed, in order.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = State::Normal;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match state {
            State::Normal => match (c, next) {
                (';', _) => {
                    flush(&mut statements, &mut current, &mut has_code);
                    continue;
                }
                ('\'', _) => {
                    state = State::SingleQuote;
                    has_code = true;
                }
                ('"', _) => {
                    state = State::DoubleQuote;
                    has_code = true;
                }
                ('$', Some('$')) => {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::DollarBlock;
                    has_code = true;
                    continue;
                }
                ('-', Some('-')) => state = State::LineComment,
                // Only at the start of a token, so `file:///x` is kept.
                ('/', Some('/'))
                    if current.chars().next_back().map_or(true, char::is_whitespace) =>
                {
                    state = State::LineComment;
                }
                ('/', Some('*')) => {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::BlockComment;
                    continue;
                }
                _ if !c.is_whitespace() => has_code = true,
                _ => {}
            },
            State::SingleQuote => match (c, next) {
                ('\\', Some(_)) | ('\'', Some('\'')) => {
                    current.push(c);
                    current.extend(chars.next());
                    continue;
                }
                ('\'', _) => state = State::Normal,
                _ => {}
            },
            State::DoubleQuote => {
                if c == '"' {
                    state = State::Normal;
                }
            }
            State::DollarBlock => {
                if c == '$' && next == Some('$') {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::Normal;
                    continue;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    current.push(c);
                    current.extend(chars.next());
                    state = State::Normal;
                    continue;
                }
            }
        }
        current.push(c);
    }

    flush(&mut statements, &mut current, &mut has_code);
    statements
}

fn flush(statements: &mut Vec<String>, current: &mut String, has_code: &mut bool) {
    if *has_code {
        statements.push(current.trim().to_string());
    }
    current.clear();
    *has_code = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_drops_empty_and_comment_only_fragments() {
        let parts = split_statements("INSERT INTO t VALUES (1); -- comment\n; SELECT 1;");
        assert_eq!(parts, vec!["INSERT INTO t VALUES (1)", "SELECT 1"]);
    }

    #[test]
    fn test_semicolon_in_string_literal() {
        let parts = split_statements("INSERT INTO t VALUES ('a;b'); SELECT 'it''s;';");
        assert_eq!(
            parts,
            vec!["INSERT INTO t VALUES ('a;b')", "SELECT 'it''s;'"]
        );
    }

    #[test]
    fn test_backslash_escape_in_string() {
        let parts = split_statements(r"SELECT 'a\';b'; SELECT 2");
        assert_eq!(parts, vec![r"SELECT 'a\';b'", "SELECT 2"]);
    }

    #[test]
    fn test_dollar_block_is_kept_whole() {
        let sql = "CREATE PROCEDURE p() RETURNS STRING LANGUAGE SQL AS $$\nBEGIN\n  RETURN 'x';\nEND;\n$$;\nCALL p();";
        let parts = split_statements(sql);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("CREATE PROCEDURE"));
        assert!(parts[0].ends_with("$$"));
        assert_eq!(parts[1], "CALL p()");
    }

    #[test]
    fn test_comments_with_separators() {
        let sql = "/* setup; part one */\nCREATE TABLE a (x INT); // trailing; note\nCREATE TABLE b (y INT)";
        let parts = split_statements(sql);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("CREATE TABLE a (x INT)"));
        assert!(parts[1].ends_with("CREATE TABLE b (y INT)"));
    }

    #[test]
    fn test_double_slash_inside_token_is_not_a_comment() {
        let sql = "PUT file:///data/orders.csv @FILE_STAGE;\nLIST @FILE_STAGE;";
        let parts = split_statements(sql);
        assert_eq!(
            parts,
            vec!["PUT file:///data/orders.csv @FILE_STAGE", "LIST @FILE_STAGE"]
        );
    }

    #[test]
    fn test_quoted_identifier() {
        let parts = split_statements(r#"SELECT "weird;col" FROM t; SELECT 1"#);
        assert_eq!(parts, vec![r#"SELECT "weird;col" FROM t"#, "SELECT 1"]);
    }

    #[test]
    fn test_function_names_with_dollar() {
        let parts = split_statements("SELECT SYSTEM$PIPE_STATUS('P'); SELECT 1");
        assert_eq!(parts, vec!["SELECT SYSTEM$PIPE_STATUS('P')", "SELECT 1"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_statements("").is_empty());
        assert!(split_statements(" ;\n; -- only a comment").is_empty());
    }
}
