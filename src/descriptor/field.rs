/// How a descriptor field stores and renders its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Single value, overwritten on every set.
    Scalar,
    /// Elements joined with `,`.
    CommaList,
    /// Elements wrapped in `()` and joined with ` && `.
    AndExpr,
    /// Elements joined with `;`, the whole value wrapped once in double quotes.
    QuotedSemicolon,
}

impl FieldRule {
    /// Look up the rule for a lower-cased field name.
    pub fn for_field(field: &str) -> Self {
        match field {
            "transfer_input_files"
            | "transfer_output_files"
            | "dont_encrypt_input_files"
            | "dont_encrypt_output_files"
            | "encrypt_input_files"
            | "encrypt_output_files" => FieldRule::CommaList,
            "requirements" | "periodic_hold" | "periodic_release" | "periodic_remove"
            | "on_exit_hold" | "on_exit_remove" => FieldRule::AndExpr,
            "environment" => FieldRule::QuotedSemicolon,
            _ => FieldRule::Scalar,
        }
    }

    fn format_item(self, item: &str) -> String {
        match self {
            FieldRule::AndExpr => format!("({})", item),
            _ => item.to_string(),
        }
    }

    fn separator(self) -> &'static str {
        match self {
            FieldRule::Scalar => "",
            FieldRule::CommaList => ",",
            FieldRule::AndExpr => " && ",
            FieldRule::QuotedSemicolon => ";",
        }
    }

    /// Split a rendered value back into its elements.
    pub fn split(self, rendered: &str) -> Vec<String> {
        let rendered = rendered.trim();
        match self {
            FieldRule::Scalar => vec![rendered.to_string()],
            FieldRule::CommaList => rendered
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            FieldRule::AndExpr => split_top_level_and(rendered)
                .into_iter()
                .map(|clause| strip_parens(&clause).to_string())
                .collect(),
            FieldRule::QuotedSemicolon => {
                let inner = rendered
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(rendered);
                inner
                    .split(';')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }
        }
    }
}

/// Value held by one descriptor field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scalar(String),
    List { rule: FieldRule, items: Vec<String> },
}

impl FieldValue {
    pub fn empty(rule: FieldRule) -> Self {
        match rule {
            FieldRule::Scalar => FieldValue::Scalar(String::new()),
            rule => FieldValue::List {
                rule,
                items: Vec::new(),
            },
        }
    }

    pub fn append(&mut self, item: &str) {
        match self {
            FieldValue::Scalar(value) => *value = item.to_string(),
            FieldValue::List { items, .. } => items.push(item.to_string()),
        }
    }

    pub fn clear(&mut self) {
        match self {
            FieldValue::Scalar(value) => value.clear(),
            FieldValue::List { items, .. } => items.clear(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Scalar(value) => value.is_empty(),
            FieldValue::List { items, .. } => items.is_empty(),
        }
    }

    pub fn items(&self) -> Vec<&str> {
        match self {
            FieldValue::Scalar(value) => vec![value.as_str()],
            FieldValue::List { items, .. } => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn format(&self) -> String {
        match self {
            FieldValue::Scalar(value) => value.clone(),
            FieldValue::List { rule, items } => {
                let joined = items
                    .iter()
                    .map(|item| rule.format_item(item))
                    .collect::<Vec<_>>()
                    .join(rule.separator());
                if *rule == FieldRule::QuotedSemicolon {
                    format!("\"{}\"", joined)
                } else {
                    joined
                }
            }
        }
    }
}

/// Split on `&&` that are not nested inside parentheses or string literals.
fn split_top_level_and(expr: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth = depth.saturating_sub(1),
            '&' if !in_string && depth == 0 && chars.peek() == Some(&'&') => {
                chars.next();
                clauses.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        clauses.push(current.trim().to_string());
    }
    clauses
}

/// Remove one pair of parentheses if they enclose the whole clause.
fn strip_parens(clause: &str) -> &str {
    let Some(inner) = clause.strip_prefix('(').and_then(|s| s.strip_suffix(')')) else {
        return clause;
    };
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    // "(a) && (b)" style: the outer parens are not a matching pair
                    return clause;
                }
            }
            _ => {}
        }
    }
    inner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_lookup() {
        assert_eq!(
            FieldRule::for_field("transfer_input_files"),
            FieldRule::CommaList
        );
        assert_eq!(FieldRule::for_field("requirements"), FieldRule::AndExpr);
        assert_eq!(FieldRule::for_field("periodic_remove"), FieldRule::AndExpr);
        assert_eq!(
            FieldRule::for_field("environment"),
            FieldRule::QuotedSemicolon
        );
        assert_eq!(FieldRule::for_field("request_memory"), FieldRule::Scalar);
    }

    #[test]
    fn and_expr_wraps_each_clause() {
        let mut value = FieldValue::empty(FieldRule::AndExpr);
        value.append("(A)");
        value.append("GPUMEM >= 8000");
        assert_eq!(value.format(), "((A)) && (GPUMEM >= 8000)");
    }

    #[test]
    fn quoted_semicolon_quotes_once() {
        let mut value = FieldValue::empty(FieldRule::QuotedSemicolon);
        value.append("A=1");
        value.append("B=2");
        assert_eq!(value.format(), "\"A=1;B=2\"");
        assert_eq!(FieldRule::QuotedSemicolon.split(&value.format()), vec!["A=1", "B=2"]);
    }

    #[test]
    fn clear_empties_list() {
        let mut value = FieldValue::empty(FieldRule::CommaList);
        value.append("a");
        value.clear();
        assert!(value.is_empty());
        assert_eq!(value.format(), "");
    }

    #[test]
    fn split_and_expr_respects_nesting() {
        let clauses = FieldRule::AndExpr.split("((A) && (B)) && (GPUMEM >= 8000)");
        assert_eq!(clauses, vec!["(A) && (B)", "GPUMEM >= 8000"]);
    }

    #[test]
    fn strip_parens_keeps_unmatched_outer_pair() {
        assert_eq!(strip_parens("(a) || (b)"), "(a) || (b)");
        assert_eq!(strip_parens("(a || b)"), "a || b");
        assert_eq!(strip_parens("a"), "a");
    }
}
