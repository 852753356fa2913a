//! `#[tokio_timeout_test]` runs an async test on its own current-thread
//! runtime, inside a dedicated thread watched by a wall-clock deadline.
//!
//! ```ignore
//! #[tokio_timeout_test(secs = 10)]
//! async fn talks_to_bridge() { /* ... */ }
//!
//! // Virtual clock: `tokio::time::advance` and sleeps cost no real time.
//! #[tokio_timeout_test(secs = 5, paused)]
//! async fn decays_after_silence() { /* ... */ }
//! ```
//!
//! The deadline is enforced with real time only, so a paused test may move
//! its virtual clock arbitrarily far without tripping it. Paused tests need
//! tokio's `test-util` feature in the calling crate.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

struct TestArgs {
    secs: u64,
    paused: bool,
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = TestArgs {
        secs: DEFAULT_TIMEOUT_SECS,
        paused: false,
    };
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("secs") {
            let lit: LitInt = meta.value()?.parse()?;
            args.secs = lit.base10_parse()?;
            if args.secs == 0 {
                return Err(meta.error("timeout must be greater than zero"));
            }
            Ok(())
        } else if meta.path.is_ident("paused") {
            args.paused = true;
            Ok(())
        } else {
            Err(meta.error("expected `secs = N` or `paused`"))
        }
    });
    parse_macro_input!(attr with parser);

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let secs = args.secs;
    let build_runtime = if args.paused {
        quote! {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
        }
    } else {
        quote! {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = #build_runtime.expect("failed to build Tokio runtime");
                    runtime.block_on(async move #block);
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(deadline) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s wall-clock deadline", #secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

/// Drops `#[test]` and `#[tokio::test]` so the expansion is not registered twice.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
