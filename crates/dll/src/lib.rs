use syn::ItemFn;
use quote::{format_ident, quote};
use proc_macro::TokenStream;

/// Runs the annotated `fn() -> bool` once, when the shared library is loaded.
///
/// On ELF targets the function is registered in `.init_array`; on Windows it
/// runs from `DllMain` on process attach.
#[proc_macro_attribute]
pub fn entrypoint(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input_fn: ItemFn = syn::parse_macro_input!(input as ItemFn);
    let input_fn_ident = input_fn.sig.ident.clone();
    let init_ident = format_ident!("__{}_INIT", input_fn_ident.to_string().to_uppercase());

    TokenStream::from(quote! {
        #input_fn

        #[cfg(not(windows))]
        #[used]
        #[link_section = ".init_array"]
        static #init_ident: extern "C" fn() = {
            extern "C" fn init() {
                if !#input_fn_ident() {
                    ::log::warn!("{} did not initialise", stringify!(#input_fn_ident));
                }
            }
            init
        };

        #[cfg(windows)]
        #[no_mangle]
        pub extern "stdcall" fn DllMain(_base: usize, reason: u32) -> bool {
            match reason {
                1 => { #input_fn_ident() }
                _ => true,
            }
        }
    })
}
