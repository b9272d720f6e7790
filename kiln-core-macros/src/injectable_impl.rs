use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use proc_macro_error2::abort;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

use crate::attribute_helpers::{get_close_method, get_field_kind, FieldKind};

pub(crate) fn derive_injectable_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => abort!(
            name,
            "#[derive(Injectable)] only supports structs";
            help = "wrap the enum in a struct, or implement Injectable by hand"
        ),
    };

    let close_method = get_close_method(&input.attrs)?;

    let mut params = Vec::new();
    let mut inits = Vec::new();

    match fields {
        Fields::Named(named) => {
            for field in &named.named {
                let Some(ident) = field.ident.as_ref() else {
                    continue;
                };
                let param = ident.to_string();
                let ty = &field.ty;

                match get_field_kind(field)? {
                    FieldKind::Resolved(inner) => {
                        params.push(quote! {
                            ::kiln_core::Parameter::typed(
                                #param,
                                ::kiln_core::Dependency::resolved::<#inner>(),
                            )
                        });
                        inits.push(quote! { #ident: __args.resolve::<#inner>(#param)? });
                    }
                    FieldKind::Provided(inner) => {
                        params.push(quote! {
                            ::kiln_core::Parameter::typed(
                                #param,
                                ::kiln_core::Dependency::provided::<#inner>(),
                            )
                        });
                        inits.push(quote! { #ident: __args.provided::<#inner>(#param)? });
                    }
                    FieldKind::Default => {
                        inits.push(quote! { #ident: ::core::default::Default::default() });
                    }
                    FieldKind::Typeless => {
                        params.push(quote! { ::kiln_core::Parameter::typeless(#param) });
                        inits.push(quote! { #ident: __args.typeless::<#ty>(#param)? });
                    }
                }
            }
        }
        Fields::Unit => {}
        Fields::Unnamed(_) => abort!(
            name,
            "#[derive(Injectable)] needs named fields so parameters can be reported by name"
        ),
    }

    let construct_body = match fields {
        Fields::Unit => quote! { Self },
        _ => quote! { Self { #(#inits),* } },
    };

    let close_impl = close_method.map(|method| {
        quote! {
            fn close(&self) -> ::kiln_core::anyhow::Result<()> {
                ::kiln_core::IntoResult::into_result(self.#method())
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::kiln_core::Component for #name #ty_generics #where_clause {
            #close_impl
        }

        impl #impl_generics ::kiln_core::Injectable for #name #ty_generics #where_clause {
            fn constructor_spec() -> ::kiln_core::ConstructorSpec {
                ::kiln_core::ConstructorSpec::new()
                    #(.with(#params))*
            }

            #[allow(unused_variables)]
            fn construct(
                __args: &::kiln_core::Arguments<'_>,
            ) -> ::kiln_core::PoolResult<Self> {
                ::core::result::Result::Ok(#construct_body)
            }
        }
    })
}
