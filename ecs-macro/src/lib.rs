use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, Ident, Type, parse_macro_input};

/// Hooks that may be named in `#[component(...)]`, with their flag names.
const HOOKS: &[(&str, &str)] = &[
    ("awake", "AWAKE"),
    ("start", "START"),
    ("update", "UPDATE"),
    ("late_update", "LATE_UPDATE"),
    ("shut", "SHUT"),
    ("dispose", "DISPOSE"),
];

/// Derive the `Component` trait for a struct embedding a `ComponentCore`.
///
/// The core field is found by type name, or marked explicitly with
/// `#[component(core)]` when it is behind an alias. Each hook listed in the
/// struct-level `#[component(...)]` attribute is added to the generated
/// `lifecycle()` flags and forwarded to an inherent `on_<hook>` method.
///
/// ```ignore
/// #[derive(Default, Component)]
/// #[component(awake, update)]
/// struct Health {
///     core: ComponentCore,
///     hp: Cell<i32>,
/// }
///
/// impl Health {
///     fn on_awake(&self) {
///         self.hp.set(100);
///     }
///
///     fn on_update(&self) {
///         self.hp.set(self.hp.get() - 1);
///     }
/// }
/// ```
#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let core = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let field = find_core_field(fields.named.iter(), name)?;
                let ident = field.ident.as_ref().map(|id| quote! { #id });
                quote! { #ident }
            }
            Fields::Unnamed(fields) => {
                let field = find_core_field(fields.unnamed.iter(), name)?;
                let position = fields
                    .unnamed
                    .iter()
                    .position(|f| std::ptr::eq(f, field))
                    .unwrap_or_default();
                let idx = syn::Index::from(position);
                quote! { #idx }
            }
            Fields::Unit => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Component derive: a unit struct has no ComponentCore field",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Component can only be derived for structs",
            ));
        }
    };

    let hooks = declared_hooks(input)?;
    let flags = hooks.iter().map(|(_, flag)| {
        let flag = format_ident!("{}", flag);
        quote! { ::strand_ecs::Lifecycle::#flag }
    });
    let forwards = hooks.iter().map(|(hook, _)| {
        let target = format_ident!("on_{}", hook);
        quote! {
            fn #hook(&self) {
                self.#target()
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::strand_ecs::Component for #name #ty_generics #where_clause {
            fn core(&self) -> &::strand_ecs::ComponentCore {
                &self.#core
            }

            fn lifecycle(&self) -> ::strand_ecs::Lifecycle {
                ::strand_ecs::Lifecycle::empty() #(| #flags)*
            }

            #(#forwards)*
        }
    })
}

/// Picks the field marked `#[component(core)]`, or else the only field whose
/// type ends in `ComponentCore`.
fn find_core_field<'a>(fields: impl Iterator<Item = &'a Field> + Clone, name: &Ident) -> syn::Result<&'a Field> {
    for field in fields.clone() {
        if has_core_marker(field)? {
            return Ok(field);
        }
    }
    let mut matching = fields.filter(|f| extract_last_segment(&f.ty) == "ComponentCore");
    match (matching.next(), matching.next()) {
        (Some(field), None) => Ok(field),
        (Some(_), Some(second)) => Err(syn::Error::new_spanned(
            second,
            "Component derive: several ComponentCore fields, mark one with #[component(core)]",
        )),
        (None, _) => Err(syn::Error::new_spanned(
            name,
            "Component derive: no ComponentCore field found",
        )),
    }
}

fn has_core_marker(field: &Field) -> syn::Result<bool> {
    let mut marked = false;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("component")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("core") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error("expected `core`"))
            }
        })?;
    }
    Ok(marked)
}

/// Hooks listed on the struct, in declaration order, without duplicates.
fn declared_hooks(input: &DeriveInput) -> syn::Result<Vec<(Ident, &'static str)>> {
    let mut hooks: Vec<(Ident, &'static str)> = Vec::new();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("component")) {
        attr.parse_nested_meta(|meta| {
            let Some(ident) = meta.path.get_ident() else {
                return Err(meta.error("expected a lifecycle hook name"));
            };
            let Some((_, flag)) = HOOKS.iter().find(|(hook, _)| ident == hook) else {
                return Err(meta.error(format!(
                    "unknown hook `{}`, expected one of: awake, start, update, late_update, shut, dispose",
                    ident
                )));
            };
            if !hooks.iter().any(|(seen, _)| seen == ident) {
                hooks.push((ident.clone(), *flag));
            }
            Ok(())
        })?;
    }
    Ok(hooks)
}

/// Extract the last segment name from a type path (e.g. `strand_ecs::ComponentCore` → `"ComponentCore"`).
fn extract_last_segment(ty: &Type) -> String {
    match ty {
        Type::Path(type_path) => {
            if let Some(segment) = type_path.path.segments.last() {
                segment.ident.to_string()
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}
