extern crate proc_macro;
#[macro_use]
extern crate quote;
extern crate syn;
extern crate uuid;

use proc_macro::TokenStream;

use syn::{parse_macro_input, LitStr};

/// Turns a GUID string literal into a `::uuid::Uuid` constructed from raw
/// bytes, so partition type tables do not parse strings at runtime.
///
/// A malformed literal is reported as a compile error on the literal itself.
#[proc_macro]
pub fn uuid(ts: TokenStream) -> TokenStream {
    let s = parse_macro_input!(ts as LitStr);

    let uuid = match uuid::Uuid::parse_str(&s.value()) {
        Ok(uuid) => uuid,
        Err(e) => {
            return syn::Error::new(s.span(), format!("invalid GUID literal: {}", e))
                .to_compile_error()
                .into()
        }
    };
    let bytes = uuid.as_bytes().iter();

    let t = quote! {
        ::uuid::Uuid::from_bytes([#(#bytes),*])
    };

    t.into()
}
