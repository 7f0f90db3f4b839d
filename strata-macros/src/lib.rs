//! Procedural macros for strata-metrics.
//!
//! This crate provides the `#[strata_metrics::test]` attribute macro for
//! writing tests against a fresh, isolated set of shared registries.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, Meta};

/// Configuration parsed from the macro attributes.
#[derive(Default)]
struct TestConfig {
    app_name: Option<String>,
    tags: Option<String>,
    prometheus_enabled: Option<bool>,
    percentile_precision: Option<u8>,
}

impl TestConfig {
    fn parse(attrs: &[Meta]) -> syn::Result<Self> {
        let mut config = Self::default();

        for meta in attrs {
            let Meta::NameValue(nv) = meta else {
                return Err(syn::Error::new_spanned(
                    meta,
                    "expected `key = value` format",
                ));
            };
            let ident = nv
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?;
            let syn::Expr::Lit(syn::ExprLit { lit, .. }) = &nv.value else {
                return Err(syn::Error::new_spanned(&nv.value, "expected literal"));
            };

            match (ident.to_string().as_str(), lit) {
                ("app_name", syn::Lit::Str(s)) => config.app_name = Some(s.value()),
                ("tags", syn::Lit::Str(s)) => config.tags = Some(s.value()),
                ("prometheus_enabled", syn::Lit::Bool(b)) => {
                    config.prometheus_enabled = Some(b.value)
                }
                ("percentile_precision", syn::Lit::Int(i)) => {
                    config.percentile_precision = Some(i.base10_parse::<u8>()?)
                }
                ("app_name" | "tags", _) => {
                    return Err(syn::Error::new_spanned(lit, "expected string literal"))
                }
                ("prometheus_enabled", _) => {
                    return Err(syn::Error::new_spanned(lit, "expected boolean literal"))
                }
                ("percentile_precision", _) => {
                    return Err(syn::Error::new_spanned(lit, "expected integer literal"))
                }
                _ => {
                    return Err(syn::Error::new_spanned(
                        ident,
                        format!(
                            "unknown attribute `{}`, expected `app_name`, `tags`, `prometheus_enabled` or `percentile_precision`",
                            ident
                        ),
                    ))
                }
            }
        }

        Ok(config)
    }
}

/// A test attribute macro that hands the test its own `SharedMetricRegistries`.
///
/// The test function takes exactly one parameter, which receives registries
/// built from the attributes. Registries are never shared between tests.
///
/// # Attributes
///
/// - `app_name = "..."` - Application name, exported as the `_app` tag
/// - `tags = "..."` - Global tags, e.g. `"env=test,region=eu"`
/// - `prometheus_enabled = bool` - Enable the Prometheus backend (default: true)
/// - `percentile_precision = N` - Significant digits kept by percentile histograms
///
/// # Examples
///
/// ```ignore
/// #[strata_metrics::test]
/// fn test_counter(registries: strata_metrics::SharedMetricRegistries) {
///     let hits = registries.application().counter("hits").unwrap();
///     hits.inc();
///     assert_eq!(hits.count(), 1);
/// }
///
/// #[strata_metrics::test(app_name = "orders", tags = "env=test")]
/// fn test_tagged(registries: strata_metrics::SharedMetricRegistries) {
///     // Test code here
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Parse attributes
    let attr_parser = syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated;
    let attrs = match syn::parse::Parser::parse(attr_parser, attr) {
        Ok(attrs) => attrs,
        Err(e) => return e.to_compile_error().into(),
    };

    let config = match TestConfig::parse(&attrs.into_iter().collect::<Vec<_>>()) {
        Ok(c) => c,
        Err(e) => return e.to_compile_error().into(),
    };

    match generate_test(input, config) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn generate_test(input: ItemFn, config: TestConfig) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if let Some(asyncness) = sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "test function must not be async",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "test function must not be generic",
        ));
    }
    if sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "test function must take exactly one `SharedMetricRegistries` parameter",
        ));
    }
    if let Some(FnArg::Receiver(receiver)) = sig.inputs.first() {
        return Err(syn::Error::new_spanned(
            receiver,
            "test function must not take `self`",
        ));
    }

    let fn_name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;

    let app_name = config.app_name.map(|name| quote! { .app_name(#name) });
    let tags = config.tags.map(|tags| quote! { .global_tags(#tags) });
    let prometheus = config
        .prometheus_enabled
        .map(|enabled| quote! { .prometheus_enabled(#enabled) });
    let precision = config
        .percentile_precision
        .map(|digits| quote! { .percentile_precision(#digits) });

    // The outer test takes no parameters
    let mut new_sig = sig.clone();
    new_sig.inputs = syn::punctuated::Punctuated::new();

    let tokens = quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis #new_sig {
            fn #fn_name(#inputs) #output #block

            let __strata_registries = ::strata_metrics::MetricsBuilder::new()
                #app_name
                #tags
                #prometheus
                #precision
                .build()
                .expect("failed to create test registries");

            #fn_name(__strata_registries)
        }
    };

    Ok(tokens)
}
