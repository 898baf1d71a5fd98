use proc_macro::TokenStream;

mod progress;

/// Wraps an `async fn` returning `Result` in a spinner-backed tracing span.
///
/// Arguments:
/// - `message = <expr>`: text shown while the function runs.
/// - `finished = <expr>`: finish text when the function returns `Ok`.
/// - `failed = <expr>` (optional): finish text when the function returns `Err`.
/// - `level = "<level>"` (optional, default `"info"`): span level.
///
/// The function must not carry its own `#[instrument]`; the generated span
/// skips all arguments and records `progress = true`.
#[proc_macro_attribute]
pub fn progress(attr: TokenStream, item: TokenStream) -> TokenStream {
    progress::expand(attr, item)
}
