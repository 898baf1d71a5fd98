use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Expr, Ident, ItemFn, LitStr, ReturnType, Token, Type};

struct ProgressArgs {
    message: Expr,
    finished: Expr,
    failed: Option<Expr>,
    level: LitStr,
}

impl Parse for ProgressArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut message = None;
        let mut finished = None;
        let mut failed = None;
        let mut level = None;

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match key.to_string().as_str() {
                "message" => message = Some(input.parse::<Expr>()?),
                "finished" => finished = Some(input.parse::<Expr>()?),
                "failed" => failed = Some(input.parse::<Expr>()?),
                "level" => level = Some(input.parse::<LitStr>()?),
                other => {
                    return Err(syn::Error::new(
                        key.span(),
                        format!("unknown `progress` argument `{other}`"),
                    ));
                }
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(Self {
            message: message.ok_or_else(|| input.error("missing `message` argument"))?,
            finished: finished.ok_or_else(|| input.error("missing `finished` argument"))?,
            failed,
            level: level.unwrap_or_else(|| LitStr::new("info", proc_macro2::Span::call_site())),
        })
    }
}

pub fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match syn::parse::<ProgressArgs>(attr) {
        Ok(args) => args,
        Err(error) => return error.to_compile_error().into(),
    };
    let mut func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(error) => return error.to_compile_error().into(),
    };

    let output = match check_signature(&func) {
        Ok(output) => output,
        Err(error) => return error.to_compile_error().into(),
    };
    let ProgressArgs {
        message,
        finished,
        failed,
        level,
    } = args;

    let finish = match failed {
        Some(failed) => quote! {
            let __progress_finish: ::std::string::String = if __progress_outcome.is_ok() {
                ::std::string::ToString::to_string(&(#finished))
            } else {
                ::std::string::ToString::to_string(&(#failed))
            };
            __progress_span.pb_set_finish_message(&__progress_finish);
        },
        None => quote! {
            if __progress_outcome.is_ok() {
                let __progress_finish = ::std::string::ToString::to_string(&(#finished));
                __progress_span.pb_set_finish_message(&__progress_finish);
            }
        },
    };

    let body = &func.block;
    func.block = syn::parse_quote!({
        use tracing_indicatif::span_ext::IndicatifSpanExt as _;
        let __progress_span = tracing::Span::current();
        let __progress_message = ::std::string::ToString::to_string(&(#message));
        __progress_span.pb_set_message(&__progress_message);
        let __progress_outcome: #output = async #body.await;
        #finish
        __progress_outcome
    });
    func.attrs.push(syn::parse_quote!(
        #[tracing::instrument(skip_all, level = #level, fields(progress = true))]
    ));

    quote!(#func).into()
}

/// Validates the annotated function and returns its declared output type.
fn check_signature(func: &ItemFn) -> syn::Result<Box<Type>> {
    if func.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            func.sig.fn_token,
            "`#[progress]` only supports async functions",
        ));
    }
    if let Some(attr) = func.attrs.iter().find(|attr| is_instrument(attr)) {
        return Err(syn::Error::new_spanned(
            attr,
            "`#[progress]` generates its own span; pass `level = ..` instead of `#[instrument]`",
        ));
    }
    match &func.sig.output {
        ReturnType::Type(_, output) => Ok(output.clone()),
        ReturnType::Default => Err(syn::Error::new_spanned(
            &func.sig,
            "`#[progress]` functions must return a `Result`",
        )),
    }
}

fn is_instrument(attr: &syn::Attribute) -> bool {
    attr.path()
        .segments
        .last()
        .is_some_and(|segment| segment.ident == "instrument")
}
