//! Shell-like tokenizer for command lines.
//!
//! Space-separated, with `"…"` and `'…'` preserving spaces, `\` escaping the
//! next character, and quotes closing only on their own kind.

/// Split a command line into tokens.
///
/// An unterminated quote runs to the end of the line; a trailing `\` is kept
/// literally. Empty quoted strings produce empty tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in line.chars() {
        if escaped {
            current.push(ch);
            in_token = true;
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                in_token = true;
            }
            '"' | '\'' => match quote {
                Some(q) if q == ch => quote = None,
                Some(_) => current.push(ch),
                None => {
                    quote = Some(ch);
                    in_token = true;
                }
            },
            c if c.is_whitespace() && quote.is_none() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if escaped {
        current.push('\\');
        in_token = true;
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}
