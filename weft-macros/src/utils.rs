use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Loop options accepted by the attribute macros.
const OPTIONS: &[&str] = &["context_quota", "linear_scan_threshold", "event_capacity"];

/// Parses `key = value` pairs from the attribute arguments into builder
/// calls, e.g. `context_quota = 4` becomes `.context_quota(4)`.
///
/// Returns an error message for unknown keys.
pub(crate) fn builder_calls(attr: TokenStream) -> Result<String, String> {
    let attr = attr.to_string();
    let mut calls = String::new();

    for part in attr.split(',') {
        let part = part.trim();

        if part.is_empty() {
            continue;
        }

        let Some((key, value)) = part.split_once('=') else {
            return Err(format!("expected `key = value`, found `{part}`"));
        };

        let (key, value) = (key.trim(), value.trim());

        if !OPTIONS.contains(&key) {
            return Err(format!("unknown loop option `{key}`"));
        }

        calls.push_str(&format!(".{key}({value})"));
    }

    Ok(calls)
}

/// Position of the function body: the last brace-delimited group.
pub(crate) fn body_position(tokens: &[TokenTree]) -> Option<usize> {
    tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
}

/// Removes the `async` keyword in front of `fn`.
pub(crate) fn strip_async(tokens: &mut Vec<TokenTree>) {
    if let Some(pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        tokens.remove(pos);
    }
}

/// Empties the parameter list and returns the name of the first parameter,
/// which receives a handle to the loop.
pub(crate) fn take_loop_binding(tokens: &mut [TokenTree]) -> Option<String> {
    let fn_pos = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "fn"))?;

    let params_pos = tokens[fn_pos..]
        .iter()
        .position(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Parenthesis))?
        + fn_pos;

    let TokenTree::Group(params) = &tokens[params_pos] else {
        return None;
    };

    let binding = params.stream().into_iter().find_map(|t| match t {
        TokenTree::Ident(id) if id.to_string() != "mut" => Some(id.to_string()),
        _ => None,
    });

    let mut empty = Group::new(Delimiter::Parenthesis, TokenStream::new());
    empty.set_span(params.span());
    tokens[params_pos] = TokenTree::Group(empty);

    binding
}

/// Builds a `compile_error!` invocation carrying `message`.
pub(crate) fn compile_error(message: &str) -> TokenStream {
    format!("compile_error!({message:?});")
        .parse()
        .unwrap_or_default()
}
