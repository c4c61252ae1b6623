//! ERB-style template parser.
//!
//! Parses templates with syntax like:
//! - `<%= expr %>` - Output, escaped when autoescape is on
//! - `<%- expr %>` - Raw/unescaped output
//! - `<%# note %>` - Comment, dropped at parse time
//! - `<% if/elsif/else/for/end %>` - Control flow
//! - `<%= yield %>` - Main view insertion point inside a layout
//! - `<%= render 'controller:action', data %>` - Partial action rendering

use serde_json::Value;

/// Pre-compiled expression for fast evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String literal: "hello"
    StringLit(String),
    /// Integer literal: 42
    IntLit(i64),
    /// Float literal: 3.14
    FloatLit(f64),
    /// Boolean literal: true/false
    BoolLit(bool),
    /// Null literal
    Null,
    /// Object or array literal written as JSON: {"title": "Hi"}
    Json(Value),
    /// Simple variable lookup: name
    Var(String),
    /// Field access: expr.field
    Field(Box<Expr>, String),
    /// Index access: expr[key]
    Index(Box<Expr>, Box<Expr>),
    /// Comparison: expr op expr
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    /// Logical AND: expr && expr
    And(Box<Expr>, Box<Expr>),
    /// Logical OR: expr || expr
    Or(Box<Expr>, Box<Expr>),
    /// Logical NOT: !expr
    Not(Box<Expr>),
    /// Built-in property: expr.length
    Method(Box<Expr>, String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq, // ==
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Raw HTML/text content
    Literal(String),
    /// Output expression: `<%= expr %>` or `<%- expr %>` (raw)
    Output {
        expr: Expr,
        escaped: bool,
        line: usize,
    },
    /// If conditional block; `elsif` nests as an If in the else branch
    If {
        condition: Expr,
        body: Vec<TemplateNode>,
        else_body: Option<Vec<TemplateNode>>,
        line: usize,
    },
    /// For loop block
    For {
        var: String,
        index_var: Option<String>,
        iterable: Expr,
        body: Vec<TemplateNode>,
        line: usize,
    },
    /// Layout content insertion point
    Yield,
    /// Run `controller:action` and inline its rendered view
    Partial {
        target: String,
        data: Option<Expr>,
        line: usize,
    },
}

impl TemplateNode {
    pub fn line(&self) -> Option<usize> {
        match self {
            TemplateNode::Output { line, .. }
            | TemplateNode::If { line, .. }
            | TemplateNode::For { line, .. }
            | TemplateNode::Partial { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Literal(String),
    OutputEscaped(String), // <%= ... %>
    OutputRaw(String),     // <%- ... %>
    Code(String),          // <% ... %>
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    line: usize,
}

/// Parse an ERB-style template into an AST.
pub fn parse_template(source: &str) -> Result<Vec<TemplateNode>, String> {
    let tokens = tokenize(source)?;
    let mut parser = BlockParser { tokens: &tokens, pos: 0 };
    let (nodes, terminator) = parser.parse_block()?;
    match terminator {
        None => Ok(nodes),
        Some((code, line)) => Err(format!(
            "Unexpected '{}' outside of block at line {}",
            code, line
        )),
    }
}

/// Tokenize the template source into a sequence of tokens.
fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut current_literal = String::new();
    let mut line = 1;
    let mut literal_line = 1;

    while let Some(c) = chars.next() {
        if c == '<' && chars.peek() == Some(&'%') {
            chars.next(); // consume '%'

            if !current_literal.is_empty() {
                tokens.push(Token {
                    kind: TokenKind::Literal(std::mem::take(&mut current_literal)),
                    line: literal_line,
                });
            }

            let tag_line = line;
            let marker = chars.peek().copied();
            if matches!(marker, Some('=') | Some('-') | Some('#')) {
                chars.next();
            }

            let mut tag_content = String::new();
            loop {
                match chars.next() {
                    Some('%') if chars.peek() == Some(&'>') => {
                        chars.next(); // consume '>'
                        break;
                    }
                    Some(ch) => {
                        if ch == '\n' {
                            line += 1;
                        }
                        tag_content.push(ch);
                    }
                    None => return Err(format!("Unclosed template tag at line {}", tag_line)),
                }
            }

            let tag_content = tag_content.trim().to_string();
            let kind = match marker {
                Some('#') => None,
                Some('-') => Some(TokenKind::OutputRaw(tag_content)),
                Some('=') => Some(TokenKind::OutputEscaped(tag_content)),
                _ => Some(TokenKind::Code(tag_content)),
            };
            if let Some(kind) = kind {
                tokens.push(Token {
                    kind,
                    line: tag_line,
                });
            }
            literal_line = line;
        } else {
            if current_literal.is_empty() {
                literal_line = line;
            }
            if c == '\n' {
                line += 1;
            }
            current_literal.push(c);
        }
    }

    if !current_literal.is_empty() {
        tokens.push(Token {
            kind: TokenKind::Literal(current_literal),
            line: literal_line,
        });
    }

    Ok(tokens)
}

/// Walks the token stream, building nested blocks.
struct BlockParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl BlockParser<'_> {
    /// Parse nodes until the stream ends or a block keyword (`end`, `else`,
    /// `elsif ...`) is reached. The keyword is consumed and returned so the
    /// enclosing block can decide what to do with it.
    fn parse_block(&mut self) -> Result<(Vec<TemplateNode>, Option<(String, usize)>), String> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            let line = token.line;
            match &token.kind {
                TokenKind::Literal(s) => nodes.push(TemplateNode::Literal(s.clone())),
                TokenKind::OutputEscaped(expr) => nodes.push(output_node(expr, true, line)?),
                TokenKind::OutputRaw(expr) => nodes.push(output_node(expr, false, line)?),
                TokenKind::Code(code) => {
                    let code = code.trim();
                    if code == "end" || code == "else" || code.starts_with("elsif ") {
                        return Ok((nodes, Some((code.to_string(), line))));
                    } else if let Some(condition) = code.strip_prefix("if ") {
                        nodes.push(self.parse_if(compile_expr(condition), line)?);
                    } else if let Some(statement) = code.strip_prefix("for ") {
                        let (var, index_var, iterable) = parse_for_statement(statement)?;
                        let (body, terminator) = self.parse_block()?;
                        match terminator {
                            Some((ref t, _)) if t == "end" => {}
                            Some((t, l)) => {
                                return Err(format!("Unexpected '{}' inside for block at line {}", t, l))
                            }
                            None => {
                                return Err(format!(
                                    "Unclosed for block - missing 'end' (opened at line {})",
                                    line
                                ))
                            }
                        }
                        nodes.push(TemplateNode::For {
                            var,
                            index_var,
                            iterable,
                            body,
                            line,
                        });
                    }
                    // Any other code tag has no effect on output.
                }
            }
        }

        Ok((nodes, None))
    }

    /// Parse the remainder of an if block whose `if` token was just consumed.
    fn parse_if(&mut self, condition: Expr, line: usize) -> Result<TemplateNode, String> {
        let (body, terminator) = self.parse_block()?;
        let else_body = match terminator {
            Some((ref t, _)) if t == "end" => None,
            Some((ref t, _)) if t == "else" => {
                let (else_nodes, closing) = self.parse_block()?;
                match closing {
                    Some((ref t, _)) if t == "end" => Some(else_nodes),
                    Some((t, l)) => {
                        return Err(format!("Unexpected '{}' after else at line {}", t, l))
                    }
                    None => {
                        return Err(format!(
                            "Unclosed if block - missing 'end' (opened at line {})",
                            line
                        ))
                    }
                }
            }
            Some((t, l)) => {
                // elsif shares the closing `end` with the outer if
                let condition = compile_expr(t.trim_start_matches("elsif ").trim());
                Some(vec![self.parse_if(condition, l)?])
            }
            None => {
                return Err(format!(
                    "Unclosed if block - missing 'end' (opened at line {})",
                    line
                ))
            }
        };

        Ok(TemplateNode::If {
            condition,
            body,
            else_body,
            line,
        })
    }
}

fn output_node(expr: &str, escaped: bool, line: usize) -> Result<TemplateNode, String> {
    if expr == "yield" {
        Ok(TemplateNode::Yield)
    } else if expr.starts_with("render ") || expr.starts_with("render(") {
        parse_partial_call(expr, line)
    } else {
        Ok(TemplateNode::Output {
            expr: compile_expr(expr),
            escaped,
            line,
        })
    }
}

/// Parse a for statement like "item in items", "item, i in items" or "(item in items)"
fn parse_for_statement(s: &str) -> Result<(String, Option<String>, Expr), String> {
    let s = s
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();

    let Some(pos) = s.find(" in ") else {
        return Err(format!(
            "Invalid for statement: expected 'var in iterable', got '{}'",
            s
        ));
    };

    let vars = s[..pos].trim();
    let iterable_str = s[pos + 4..].trim();

    let (var, index_var) = match vars.split_once(',') {
        Some((var, index)) => (var.trim().to_string(), Some(index.trim().to_string())),
        None => (vars.to_string(), None),
    };

    if var.is_empty() {
        return Err("Missing loop variable in for statement".to_string());
    }
    if iterable_str.is_empty() {
        return Err("Missing iterable in for statement".to_string());
    }

    Ok((var, index_var, compile_expr(iterable_str)))
}

/// Parse a partial call like "render 'users:card'" or "render('users:card', {"id": 1})"
fn parse_partial_call(expr: &str, line: usize) -> Result<TemplateNode, String> {
    let expr = expr.trim();

    let args = if let Some(inner) = expr.strip_prefix("render(") {
        inner.strip_suffix(')').unwrap_or(inner).trim()
    } else if let Some(rest) = expr.strip_prefix("render ") {
        rest.trim()
    } else {
        return Err(format!("Invalid render call: {}", expr));
    };

    // The target never contains a comma, so the first one splits off the data.
    let (target, data) = match args.split_once(',') {
        Some((target, data)) => (target, Some(data.trim())),
        None => (args, None),
    };

    let target = target
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_string();
    if target.is_empty() {
        return Err(format!("render tag is missing its target at line {}", line));
    }

    let data = match data {
        Some(d) if d.starts_with('{') => Some(Expr::Json(
            serde_json::from_str(d)
                .map_err(|e| format!("Invalid data for render '{}' at line {}: {}", target, line, e))?,
        )),
        Some(d) if !d.is_empty() => Some(compile_expr(d)),
        _ => None,
    };

    Ok(TemplateNode::Partial { target, data, line })
}

/// Compile an expression string into a pre-compiled Expr AST.
pub fn compile_expr(expr: &str) -> Expr {
    let expr = strip_outer_parens(expr.trim());

    if is_quoted(expr) {
        return Expr::StringLit(expr[1..expr.len() - 1].to_string());
    }

    if let Ok(n) = expr.parse::<i64>() {
        return Expr::IntLit(n);
    }

    if let Ok(n) = expr.parse::<f64>() {
        return Expr::FloatLit(n);
    }

    match expr {
        "true" => return Expr::BoolLit(true),
        "false" => return Expr::BoolLit(false),
        "null" | "nil" => return Expr::Null,
        _ => {}
    }

    if expr.starts_with('{') || expr.starts_with('[') {
        if let Ok(value) = serde_json::from_str(expr) {
            return Expr::Json(value);
        }
    }

    // Logical operators bind looser than comparisons, so split on them first.
    if let Some(pos) = find_operator(expr, " || ") {
        let left = compile_expr(&expr[..pos]);
        let right = compile_expr(&expr[pos + 4..]);
        return Expr::Or(Box::new(left), Box::new(right));
    }
    if let Some(pos) = find_operator(expr, " && ") {
        let left = compile_expr(&expr[..pos]);
        let right = compile_expr(&expr[pos + 4..]);
        return Expr::And(Box::new(left), Box::new(right));
    }

    for (op_str, op) in [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some(pos) = find_operator(expr, op_str) {
            let left = compile_expr(&expr[..pos]);
            let right = compile_expr(&expr[pos + op_str.len()..]);
            return Expr::Compare(Box::new(left), op, Box::new(right));
        }
    }

    if let Some(inner) = expr.strip_prefix('!') {
        return Expr::Not(Box::new(compile_expr(inner)));
    }

    compile_variable_access(expr)
}

fn is_quoted(expr: &str) -> bool {
    expr.len() >= 2
        && ((expr.starts_with('"') && expr.ends_with('"'))
            || (expr.starts_with('\'') && expr.ends_with('\'')))
        && find_operator(&expr[1..expr.len() - 1], &expr[..1]).is_none()
}

/// Remove parentheses that wrap the whole expression: `(a && b)` -> `a && b`.
fn strip_outer_parens(expr: &str) -> &str {
    let mut expr = expr;
    while expr.starts_with('(') && find_matching_bracket(expr) == Some(expr.len() - 1) {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

/// Find an operator position, respecting bracket/quote nesting
fn find_operator(expr: &str, op: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut string_char = ' ';
    let bytes = expr.as_bytes();
    let op_bytes = op.as_bytes();

    for (i, c) in expr.char_indices() {
        if in_string {
            if c == string_char && (i == 0 || bytes[i - 1] != b'\\') {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' | '\'' if op_bytes[0] != c as u8 => {
                in_string = true;
                string_char = c;
            }
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            _ => {
                if depth == 0
                    && i + op_bytes.len() <= bytes.len()
                    && &bytes[i..i + op_bytes.len()] == op_bytes
                {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Compile variable access like `user`, `user["name"]`, or `user.name`
fn compile_variable_access(expr: &str) -> Expr {
    let expr = expr.trim();

    if let Some(bracket_pos) = find_first_bracket(expr) {
        let base = &expr[..bracket_pos];
        let rest = &expr[bracket_pos..];

        if let Some(close_pos) = find_matching_bracket(rest) {
            if base.is_empty() {
                return Expr::Var(expr.to_string());
            }
            let key = compile_expr(&rest[1..close_pos]);
            let indexed = Expr::Index(Box::new(compile_variable_access(base)), Box::new(key));
            return continue_access(indexed, &rest[close_pos + 1..]);
        }
    }

    if let Some((base, field)) = expr.split_once('.') {
        return compile_chained_access(Expr::Var(base.to_string()), field);
    }

    Expr::Var(expr.to_string())
}

/// Find the first bracket that's not inside quotes
fn find_first_bracket(expr: &str) -> Option<usize> {
    let mut in_string = false;
    let mut string_char = ' ';

    for (i, c) in expr.char_indices() {
        if in_string {
            if c == string_char {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = true;
                string_char = c;
            }
            '[' => return Some(i),
            '.' => return None,
            _ => {}
        }
    }
    None
}

/// Find matching closing bracket for the bracket that opens `s`
fn find_matching_bracket(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut string_char = ' ';

    for (i, c) in s.char_indices() {
        if in_string {
            if c == string_char {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                in_string = true;
                string_char = c;
            }
            '[' | '(' => depth += 1,
            ']' | ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Compile chained field/method access after a dot
fn compile_chained_access(base: Expr, field: &str) -> Expr {
    let split_at = field.find(['.', '[']).unwrap_or(field.len());
    let (current_field, rest) = field.split_at(split_at);

    let current = match current_field {
        "length" | "len" | "size" => Expr::Method(Box::new(base), current_field.to_string()),
        _ => Expr::Field(Box::new(base), current_field.to_string()),
    };

    continue_access(current, rest)
}

/// Continue compiling `.field` or `[key]` access after an already-compiled base.
fn continue_access(base: Expr, rest: &str) -> Expr {
    if let Some(field) = rest.strip_prefix('.') {
        return compile_chained_access(base, field);
    }
    if rest.starts_with('[') {
        if let Some(close_pos) = find_matching_bracket(rest) {
            let key = compile_expr(&rest[1..close_pos]);
            let indexed = Expr::Index(Box::new(base), Box::new(key));
            return continue_access(indexed, &rest[close_pos + 1..]);
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(
            kinds("Hello <%= name %>!"),
            vec![
                TokenKind::Literal("Hello ".to_string()),
                TokenKind::OutputEscaped("name".to_string()),
                TokenKind::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_raw_and_comment() {
        assert_eq!(
            kinds("<%# note %><%- raw_html %>"),
            vec![TokenKind::OutputRaw("raw_html".to_string())]
        );
    }

    #[test]
    fn test_tokenize_tracks_lines() {
        let tokens = tokenize("a\nb\n<%= c %>\n<% end %>").unwrap();
        assert_eq!(tokens[1].line, 3);
        assert_eq!(tokens[3].line, 4);
    }

    #[test]
    fn test_unclosed_tag() {
        let err = tokenize("<%= name").unwrap_err();
        assert!(err.contains("Unclosed template tag"));
    }

    #[test]
    fn test_parse_output() {
        let nodes = parse_template("<%= name %>").unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::Output {
                expr: Expr::Var("name".to_string()),
                escaped: true,
                line: 1,
            }]
        );
    }

    #[test]
    fn test_parse_if_elsif_else() {
        let nodes =
            parse_template("<% if a %>A<% elsif b %>B<% else %>C<% end %>").unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::If {
                condition: Expr::Var("a".to_string()),
                body: vec![TemplateNode::Literal("A".to_string())],
                else_body: Some(vec![TemplateNode::If {
                    condition: Expr::Var("b".to_string()),
                    body: vec![TemplateNode::Literal("B".to_string())],
                    else_body: Some(vec![TemplateNode::Literal("C".to_string())]),
                    line: 1,
                }]),
                line: 1,
            }]
        );
    }

    #[test]
    fn test_parse_for_with_index() {
        let nodes = parse_template("<% for item, i in items %><%= item %><% end %>").unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::For {
                var: "item".to_string(),
                index_var: Some("i".to_string()),
                iterable: Expr::Var("items".to_string()),
                body: vec![TemplateNode::Output {
                    expr: Expr::Var("item".to_string()),
                    escaped: true,
                    line: 1,
                }],
                line: 1,
            }]
        );
    }

    #[test]
    fn test_unclosed_if() {
        let err = parse_template("<% if a %>A").unwrap_err();
        assert!(err.contains("missing 'end'"));
    }

    #[test]
    fn test_stray_end() {
        let err = parse_template("A<% end %>").unwrap_err();
        assert!(err.contains("Unexpected 'end' outside of block"));
    }

    #[test]
    fn test_parse_yield() {
        assert_eq!(parse_template("<%= yield %>").unwrap(), vec![TemplateNode::Yield]);
    }

    #[test]
    fn test_parse_partial_bare_controller() {
        let nodes = parse_template("<%= render 'sidebar' %>").unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::Partial {
                target: "sidebar".to_string(),
                data: None,
                line: 1,
            }]
        );
    }

    #[test]
    fn test_parse_partial_with_json_data() {
        let nodes = parse_template(r#"<%- render("users:card", {"id": 7, "tags": ["a", "b"]}) %>"#)
            .unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::Partial {
                target: "users:card".to_string(),
                data: Some(Expr::Json(json!({"id": 7, "tags": ["a", "b"]}))),
                line: 1,
            }]
        );
    }

    #[test]
    fn test_parse_partial_with_expression_data() {
        let nodes = parse_template("<%= render 'users:card', user %>").unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::Partial {
                target: "users:card".to_string(),
                data: Some(Expr::Var("user".to_string())),
                line: 1,
            }]
        );
    }

    #[test]
    fn test_compile_access_chain() {
        assert_eq!(
            compile_expr("user.posts[0][\"title\"].length"),
            Expr::Method(
                Box::new(Expr::Index(
                    Box::new(Expr::Index(
                        Box::new(Expr::Field(
                            Box::new(Expr::Var("user".to_string())),
                            "posts".to_string()
                        )),
                        Box::new(Expr::IntLit(0)),
                    )),
                    Box::new(Expr::StringLit("title".to_string())),
                )),
                "length".to_string()
            )
        );
    }

    #[test]
    fn test_compile_operators() {
        assert_eq!(
            compile_expr("!(a == 'x && y') || b"),
            Expr::Or(
                Box::new(Expr::Not(Box::new(Expr::Compare(
                    Box::new(Expr::Var("a".to_string())),
                    CompareOp::Eq,
                    Box::new(Expr::StringLit("x && y".to_string())),
                )))),
                Box::new(Expr::Var("b".to_string())),
            )
        );
    }
}
