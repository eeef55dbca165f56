//! Attribute macros for `weft`.
//!
//! `#[weft::main]` and `#[weft::test]` turn an `async fn` into a regular
//! function that creates a loop and runs the body with
//! [`Loop::block_on`](../weft/struct.Loop.html#method.block_on). The first
//! parameter, if any, names the loop handle inside the body:
//!
//! ```rust,ignore
//! #[weft::main(context_quota = 4)]
//! async fn main(lp: weft::Loop) -> weft::Result<()> {
//!     lp.wait(std::time::Duration::from_millis(10)).await
//! }
//! ```

mod utils;

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Rewrites the function body to run inside a fresh loop.
fn expand(attr: TokenStream, item: TokenStream) -> Result<Vec<TokenTree>, String> {
    let calls = utils::builder_calls(attr)?;
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    let binding = utils::take_loop_binding(&mut tokens);
    utils::strip_async(&mut tokens);

    let pos = utils::body_position(&tokens).ok_or("expected a function body")?;

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => return Err("expected a function body".into()),
    };

    let bind = binding
        .map(|name| format!("let {name} = __weft_loop.clone();"))
        .unwrap_or_default();

    let new_block = format!(
        "{{
            let __weft_loop = ::weft::LoopBuilder::new(){calls}
                .build()
                .expect(\"failed to create the weft loop\");
            {bind}
            __weft_loop
                .block_on(async move {{ {block} }})
                .expect(\"weft loop torn down\")
        }}"
    );

    let stream = new_block
        .parse::<TokenStream>()
        .map_err(|err| err.to_string())?;

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, stream));

    Ok(tokens)
}

/// Marks the async entry point of a program.
///
/// Accepts the loop options `context_quota`, `linear_scan_threshold` and
/// `event_capacity` as `key = value` pairs.
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    match expand(attr, item) {
        Ok(tokens) => tokens.into_iter().collect(),
        Err(msg) => utils::compile_error(&format!("weft::main: {msg}")),
    }
}

/// Marks an async test run on its own loop.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let tokens = match expand(attr, item) {
        Ok(tokens) => tokens,
        Err(msg) => return utils::compile_error(&format!("weft::test: {msg}")),
    };

    let mut result: Vec<TokenTree> = "#[test]"
        .parse::<TokenStream>()
        .unwrap_or_default()
        .into_iter()
        .collect();
    result.extend(tokens);

    result.into_iter().collect()
}
