//! Procedural macros for testkit-rendezvous
//!
//! This crate provides the `#[testkit_rendezvous::test]` attribute macro,
//! which runs an async test on Tokio and hands it a fresh `Coordinator`.
//!
//! # Example
//!
//! ```rust,ignore
//! use testkit_rendezvous::prelude::*;
//!
//! #[testkit_rendezvous::test]
//! async fn my_test(coordinator: Coordinator) {
//!     let add = coordinator.call_site("Add");
//!     let caller = tokio::spawn(async move { add.invoke_async(values![2, 3]).await });
//!     let call = coordinator.method("Add").expect_exactly(values![2, 3]).await.unwrap();
//!     call.inject_return(values![5]).unwrap();
//!     assert_eq!(caller.await.unwrap(), values![5]);
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, FnArg, Ident, ItemFn, Lit, Pat, Token, Type,
};

/// Configuration options for the test macro.
#[derive(Default)]
struct TestConfig {
    /// Deadline for ordered expectations, in milliseconds
    timeout_ms: Option<u64>,
    /// Whether methods match eventually by default (default: false)
    eventually: bool,
    /// Flavor for tokio runtime ("current_thread" or "multi_thread")
    flavor: Option<String>,
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "timeout_ms" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Int(i) = lit {
                        config.timeout_ms = Some(i.base10_parse()?);
                    }
                }
                "eventually" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Bool(b) = lit {
                        config.eventually = b.value();
                    }
                }
                "flavor" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Str(s) = lit {
                        config.flavor = Some(s.value());
                    }
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// Parameters the macro knows how to inject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Injected {
    Coordinator,
    Targets,
}

/// Determines which injectable type, if any, a parameter asks for.
fn injected_kind(arg: &FnArg) -> Option<Injected> {
    if let FnArg::Typed(pat_type) = arg {
        if let Type::Path(type_path) = &*pat_type.ty {
            if let Some(segment) = type_path.path.segments.last() {
                if segment.ident == "Coordinator" {
                    return Some(Injected::Coordinator);
                }
                if segment.ident == "TargetController" {
                    return Some(Injected::Targets);
                }
            }
        }
    }
    None
}

/// Extracts the parameter name from a function argument.
fn get_param_name(arg: &FnArg) -> Option<&Pat> {
    if let FnArg::Typed(pat_type) = arg {
        Some(&pat_type.pat)
    } else {
        None
    }
}

/// Test attribute macro for interactive call interception.
///
/// Runs the async test function on Tokio. A `Coordinator` backed by a
/// `PanicReporter` is created for the test, so every reported failure fails
/// it.
///
/// # Injection
///
/// Parameters typed `Coordinator` or `TargetController` receive the test's
/// coordinator and its target controller:
///
/// ```rust,ignore
/// #[testkit_rendezvous::test]
/// async fn test_outcome(coordinator: Coordinator, targets: TargetController) {
///     let execution = targets.start(|_: Vec<Value>| values![1], vec![]).unwrap();
///     execution.expect_return(values![1]).await.unwrap();
/// }
/// ```
///
/// # Configuration Options
///
/// - `timeout_ms = 500` - Deadline for ordered expectations
/// - `eventually = true` - Match calls in any order by default
/// - `flavor = "multi_thread"` - Tokio runtime flavor
///
/// ```rust,ignore
/// #[testkit_rendezvous::test(eventually = true, flavor = "multi_thread")]
/// async fn test_any_order(coordinator: Coordinator) {
///     assert_eq!(coordinator.config().mode, MatchMode::Eventual);
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(config, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: TestConfig, input: ItemFn) -> syn::Result<TokenStream2> {
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;
    let output = &input.sig.output;

    // Check if function is async
    if input.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "test function must be async",
        ));
    }

    let mut bindings = Vec::new();
    for arg in &input.sig.inputs {
        let kind = injected_kind(arg).ok_or_else(|| {
            syn::Error::new_spanned(
                arg,
                "only `Coordinator` and `TargetController` parameters can be injected",
            )
        })?;
        let param = get_param_name(arg)
            .ok_or_else(|| syn::Error::new_spanned(arg, "test function cannot take `self`"))?;
        bindings.push(match kind {
            Injected::Coordinator => quote! { let #param = __rendezvous_coordinator.clone(); },
            Injected::Targets => quote! { let #param = __rendezvous_coordinator.targets(); },
        });
    }

    let timeout = match config.timeout_ms {
        Some(ms) => quote! { .timeout(::std::time::Duration::from_millis(#ms)) },
        None => quote! {},
    };
    let mode = if config.eventually {
        quote! { .eventually() }
    } else {
        quote! {}
    };

    let flavor_attr = match config.flavor.as_deref().unwrap_or("current_thread") {
        "multi_thread" => quote! { #[::tokio::test(flavor = "multi_thread")] },
        "current_thread" => quote! { #[::tokio::test] },
        other => {
            return Err(syn::Error::new(
                proc_macro2::Span::call_site(),
                format!("unsupported flavor: {other}. Use \"current_thread\" or \"multi_thread\""),
            ));
        }
    };

    Ok(quote! {
        #flavor_attr
        #(#attrs)*
        #vis async fn #name() #output {
            let __rendezvous_coordinator = ::testkit_rendezvous::Coordinator::with_config(
                ::testkit_rendezvous::PanicReporter,
                ::testkit_rendezvous::Config::new() #timeout #mode,
            )
            .expect("coordinator requires a Tokio runtime");
            #(#bindings)*
            #body
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{expand_test, TestConfig};

    #[::core::prelude::v1::test]
    fn test_config_parse_empty() {
        let config: TestConfig = syn::parse_str("").unwrap();
        assert!(config.timeout_ms.is_none());
        assert!(!config.eventually);
        assert!(config.flavor.is_none());
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_multiple() {
        let config: TestConfig =
            syn::parse_str("timeout_ms = 250, eventually = true, flavor = \"multi_thread\"")
                .unwrap();
        assert_eq!(config.timeout_ms, Some(250));
        assert!(config.eventually);
        assert_eq!(config.flavor, Some("multi_thread".to_string()));
    }

    #[::core::prelude::v1::test]
    fn test_config_rejects_unknown_option() {
        assert!(syn::parse_str::<TestConfig>("start_paused = true").is_err());
    }

    #[::core::prelude::v1::test]
    fn test_expand_rejects_unknown_parameter() {
        let input = syn::parse_str("async fn t(x: u32) {}").unwrap();
        let err = expand_test(TestConfig::default(), input).unwrap_err();
        assert!(err.to_string().contains("can be injected"));
    }

    #[::core::prelude::v1::test]
    fn test_expand_rejects_sync_fn() {
        let input = syn::parse_str("fn t() {}").unwrap();
        assert!(expand_test(TestConfig::default(), input).is_err());
    }
}
