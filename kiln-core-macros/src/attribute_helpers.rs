use syn::{Attribute, Field, Ident, LitStr, Type};

/// How a field gets its value at construction time.
pub(crate) enum FieldKind<'a> {
    /// `Arc<T>`: resolved through the pool.
    Resolved(&'a Type),
    /// `#[inject(provided)] Arc<T>`: must already be in the pool.
    Provided(&'a Type),
    /// `#[inject(default)]`: `Default::default()`.
    Default,
    /// Anything else. The pool refuses to build the type.
    Typeless,
}

/// Reads `#[injectable(close = "method")]`.
pub(crate) fn get_close_method(attrs: &[Attribute]) -> syn::Result<Option<Ident>> {
    let mut close = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("injectable")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("close") {
                let method: LitStr = meta.value()?.parse()?;
                close = Some(method.parse::<Ident>()?);
                Ok(())
            } else {
                Err(meta.error("expected `close = \"method\"`"))
            }
        })?;
    }
    Ok(close)
}

pub(crate) fn get_field_kind(field: &Field) -> syn::Result<FieldKind<'_>> {
    let mut provided = false;
    let mut default = false;

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("inject")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("provided") {
                provided = true;
                Ok(())
            } else if meta.path.is_ident("default") {
                default = true;
                Ok(())
            } else {
                Err(meta.error("expected `provided` or `default`"))
            }
        })?;
    }

    match (provided, default) {
        (true, true) => Err(syn::Error::new_spanned(
            field,
            "a field cannot be both `provided` and `default`",
        )),
        (false, true) => Ok(FieldKind::Default),
        (true, false) => match extract_arc_type(&field.ty) {
            Some(inner) => Ok(FieldKind::Provided(inner)),
            None => Err(syn::Error::new_spanned(
                &field.ty,
                "#[inject(provided)] requires an `Arc<T>` field",
            )),
        },
        (false, false) => Ok(match extract_arc_type(&field.ty) {
            Some(inner) => FieldKind::Resolved(inner),
            None => FieldKind::Typeless,
        }),
    }
}

/// `T` of an `Arc<T>` field type.
fn extract_arc_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Arc" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner_ty)) = args.args.first() {
                        return Some(inner_ty);
                    }
                }
            }
        }
    }
    None
}
