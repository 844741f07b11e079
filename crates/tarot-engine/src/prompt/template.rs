//! Minimal prompt template engine: `{{ var }}` substitution with dotted
//! paths, `{% if %}`/`{% else %}`/`{% endif %}` conditionals, and
//! `{% for x in xs %}`/`{% endfor %}` loops. Block tags trim the newline
//! that follows them and any leading indentation before them, so templates
//! can be laid out readably without leaking whitespace into prompts.

use serde_json::Value;

use crate::error::EngineError;

#[derive(Debug, Clone)]
enum Token {
    Text(String),
    Var(String),
    Tag(String),
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Var(String),
    If {
        path: String,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
    For {
        var: String,
        path: String,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, EngineError> {
        let tokens = lex(source)?;
        let mut pos = 0;
        let nodes = parse_nodes(&tokens, &mut pos, &[])?;
        Ok(Self { nodes })
    }

    /// Render against a JSON object context. Missing variables render as
    /// empty strings.
    pub fn render(&self, context: &Value) -> String {
        let mut output = String::new();
        let mut scopes: Vec<(String, Value)> = Vec::new();
        render_nodes(&self.nodes, context, &mut scopes, &mut output);
        output
    }
}

fn lex(source: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut rest = source;
    let mut trim_leading_newline = false;

    loop {
        let next_var = rest.find("{{");
        let next_tag = rest.find("{%");
        let (idx, is_tag) = match (next_var, next_tag) {
            (None, None) => {
                if !rest.is_empty() {
                    tokens.push(Token::Text(consume_text(rest, trim_leading_newline)));
                }
                break;
            }
            (Some(v), None) => (v, false),
            (None, Some(t)) => (t, true),
            (Some(v), Some(t)) => {
                if t < v {
                    (t, true)
                } else {
                    (v, false)
                }
            }
        };

        if idx > 0 || trim_leading_newline {
            let mut text = consume_text(&rest[..idx], trim_leading_newline);
            if is_tag {
                // lstrip: drop indentation on the line the tag sits on.
                if let Some(last_newline) = text.rfind('\n') {
                    if text[last_newline + 1..].chars().all(|c| c == ' ' || c == '\t') {
                        text.truncate(last_newline + 1);
                    }
                } else if text.chars().all(|c| c == ' ' || c == '\t') {
                    text.clear();
                }
            }
            if !text.is_empty() {
                tokens.push(Token::Text(text));
            }
        }
        trim_leading_newline = false;

        let close = if is_tag { "%}" } else { "}}" };
        let end = rest[idx + 2..]
            .find(close)
            .ok_or_else(|| EngineError::Template(format!("unclosed {} tag", if is_tag { "{%" } else { "{{" })))?
            + idx
            + 2;
        let inner = rest[idx + 2..end].trim().to_string();
        if is_tag {
            tokens.push(Token::Tag(inner));
            trim_leading_newline = true;
        } else {
            tokens.push(Token::Var(inner));
        }
        rest = &rest[end + 2..];
    }

    Ok(tokens)
}

fn consume_text(text: &str, trim_leading_newline: bool) -> String {
    if trim_leading_newline {
        text.strip_prefix('\n')
            .or_else(|| text.strip_prefix("\r\n"))
            .unwrap_or(text)
            .to_string()
    } else {
        text.to_string()
    }
}

fn parse_nodes(
    tokens: &[Token],
    pos: &mut usize,
    terminators: &[&str],
) -> Result<Vec<Node>, EngineError> {
    let mut nodes = Vec::new();
    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::Text(text) => {
                nodes.push(Node::Text(text.clone()));
                *pos += 1;
            }
            Token::Var(path) => {
                nodes.push(Node::Var(path.clone()));
                *pos += 1;
            }
            Token::Tag(tag) => {
                let keyword = tag.split_whitespace().next().unwrap_or_default();
                if terminators.contains(&keyword) {
                    return Ok(nodes);
                }
                match keyword {
                    "if" => {
                        let path = tag
                            .strip_prefix("if")
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .ok_or_else(|| {
                                EngineError::Template("if tag requires a variable".into())
                            })?
                            .to_string();
                        *pos += 1;
                        let then_branch = parse_nodes(tokens, pos, &["else", "endif"])?;
                        let mut else_branch = Vec::new();
                        if let Some(Token::Tag(t)) = tokens.get(*pos) {
                            if t.trim() == "else" {
                                *pos += 1;
                                else_branch = parse_nodes(tokens, pos, &["endif"])?;
                            }
                        }
                        match tokens.get(*pos) {
                            Some(Token::Tag(t)) if t.trim() == "endif" => *pos += 1,
                            _ => return Err(EngineError::Template("missing endif".into())),
                        }
                        nodes.push(Node::If {
                            path,
                            then_branch,
                            else_branch,
                        });
                    }
                    "for" => {
                        let parts: Vec<&str> = tag.split_whitespace().collect();
                        if parts.len() != 4 || parts[2] != "in" {
                            return Err(EngineError::Template(format!(
                                "malformed for tag: '{tag}'"
                            )));
                        }
                        let var = parts[1].to_string();
                        let path = parts[3].to_string();
                        *pos += 1;
                        let body = parse_nodes(tokens, pos, &["endfor"])?;
                        match tokens.get(*pos) {
                            Some(Token::Tag(t)) if t.trim() == "endfor" => *pos += 1,
                            _ => return Err(EngineError::Template("missing endfor".into())),
                        }
                        nodes.push(Node::For { var, path, body });
                    }
                    other => {
                        return Err(EngineError::Template(format!("unknown tag: '{other}'")));
                    }
                }
            }
        }
    }
    if terminators.is_empty() {
        Ok(nodes)
    } else {
        Err(EngineError::Template(format!(
            "unterminated block, expected one of: {}",
            terminators.join(", ")
        )))
    }
}

fn render_nodes(
    nodes: &[Node],
    context: &Value,
    scopes: &mut Vec<(String, Value)>,
    output: &mut String,
) {
    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Var(path) => {
                if let Some(value) = resolve(path, context, scopes) {
                    output.push_str(&stringify(&value));
                }
            }
            Node::If {
                path,
                then_branch,
                else_branch,
            } => {
                let truthy = resolve(path, context, scopes)
                    .map(|v| is_truthy(&v))
                    .unwrap_or(false);
                let branch = if truthy { then_branch } else { else_branch };
                render_nodes(branch, context, scopes, output);
            }
            Node::For { var, path, body } => {
                let items = resolve(path, context, scopes)
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                for item in items {
                    scopes.push((var.clone(), item));
                    render_nodes(body, context, scopes, output);
                    scopes.pop();
                }
            }
        }
    }
}

fn resolve(path: &str, context: &Value, scopes: &[(String, Value)]) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;

    let mut current = scopes
        .iter()
        .rev()
        .find(|(name, _)| name == first)
        .map(|(_, value)| value.clone())
        .or_else(|| context.get(first).cloned())?;

    for segment in segments {
        current = current.get(segment)?.clone();
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
    }
}
