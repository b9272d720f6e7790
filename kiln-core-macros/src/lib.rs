mod attribute_helpers;
mod injectable_impl;

use proc_macro::TokenStream;
use proc_macro_error2::proc_macro_error;

/// Derives `Component` and `Injectable` for a struct.
///
/// Every field is a required constructor parameter unless marked otherwise:
///
/// ```ignore
/// #[derive(Injectable)]
/// #[injectable(close = "shutdown")]    // optional: teardown method, returns () or anyhow::Result<()>
/// struct UserService {
///     repository: Arc<UserRepository>, // resolved as a pool singleton
///     #[inject(provided)]
///     environment: Arc<Environment>,   // must have been put into the pool
///     #[inject(default)]
///     hits: AtomicU64,                 // Default::default(), not a parameter
///     name: String,                    // typeless: construction fails, naming `name`
/// }
/// ```
#[proc_macro_error]
#[proc_macro_derive(Injectable, attributes(injectable, inject))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    injectable_impl::derive_injectable_impl(input)
}
