//! Procedural macros for the tideflow orchestration engine.
//!
//! # Envelope Derive Macro
//!
//! Implements `tideflow::Envelope` for message structs and enums.
//!
//! ## Usage
//!
//! ```ignore
//! #[derive(Envelope)]
//! #[envelope(entity = workflow_id)]  // default entity field
//! enum WorkflowMessage {
//!     WorkflowDispatched { message_id: MessageId, workflow_id: WorkflowId, .. },
//!     #[envelope(entity = "global")]  // constant entity for this variant
//!     Broadcast { message_id: MessageId },
//! }
//!
//! #[derive(Envelope)]
//! enum TaskExecutorMessage {
//!     ExecuteTaskAttempt(ExecuteTaskAttempt),  // delegates to the inner message
//! }
//! ```
//!
//! Every struct and every named-field variant must have a `message_id` field.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Fields, FieldsNamed, Ident, LitStr, Variant, parse_macro_input,
    spanned::Spanned,
};

/// Where the entity id of a message comes from.
#[derive(Clone)]
enum Entity {
    Field(Ident),
    Constant(LitStr),
}

/// Derives `Envelope` for a struct or an enum.
///
/// Use `#[envelope(entity = field)]` on the type to set the default entity
/// field, and optionally on individual variants to override it.
#[proc_macro_derive(Envelope, attributes(envelope))]
pub fn derive_envelope(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_envelope_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_envelope_impl(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let default_entity = get_entity_attr(&input.attrs)?;

    let (message_id, entity_id, kind) = match &input.data {
        Data::Struct(data) => {
            let Fields::Named(fields) = &data.fields else {
                return Err(syn::Error::new(
                    input.span(),
                    "Envelope can only be derived for structs with named fields",
                ));
            };
            let Some(entity) = default_entity else {
                return Err(syn::Error::new(
                    input.span(),
                    "Envelope structs need an #[envelope(entity = field)] attribute",
                ));
            };
            check_fields(name, fields, &entity, input.span())?;
            let entity_expr = entity_expr(&entity, quote!(self.));
            let kind = name.to_string();
            (
                quote!(self.message_id),
                entity_expr,
                quote!(#kind),
            )
        }
        Data::Enum(data) => {
            let mut message_id_arms = Vec::new();
            let mut entity_arms = Vec::new();
            let mut kind_arms = Vec::new();

            for variant in &data.variants {
                let (message_id, entity, kind) = generate_arms(name, variant, &default_entity)?;
                message_id_arms.push(message_id);
                entity_arms.push(entity);
                kind_arms.push(kind);
            }

            (
                quote!(match self { #(#message_id_arms)* }),
                quote!(match self { #(#entity_arms)* }),
                quote!(match self { #(#kind_arms)* }),
            )
        }
        Data::Union(_) => {
            return Err(syn::Error::new(
                input.span(),
                "Envelope cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl ::tideflow::Envelope for #name {
            fn message_id(&self) -> ::tideflow::id::MessageId {
                #message_id
            }

            fn entity_id(&self) -> ::std::string::String {
                #entity_id
            }

            fn kind(&self) -> &'static str {
                #kind
            }
        }
    })
}

/// Extract `#[envelope(entity = field)]` or `#[envelope(entity = "constant")]`.
fn get_entity_attr(attrs: &[Attribute]) -> syn::Result<Option<Entity>> {
    let mut entity = None;
    for attr in attrs {
        if !attr.path().is_ident("envelope") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("entity") {
                let value = meta.value()?;
                if value.peek(LitStr) {
                    entity = Some(Entity::Constant(value.parse()?));
                } else {
                    entity = Some(Entity::Field(value.parse()?));
                }
                Ok(())
            } else {
                Err(meta.error("unsupported envelope attribute, expected `entity`"))
            }
        })?;
    }
    Ok(entity)
}

fn entity_expr(entity: &Entity, prefix: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    match entity {
        Entity::Field(field) => quote!(::std::string::ToString::to_string(&#prefix #field)),
        Entity::Constant(value) => quote!(::std::string::String::from(#value)),
    }
}

/// Verify `message_id` and the entity field exist.
fn check_fields(
    owner: &Ident,
    fields: &FieldsNamed,
    entity: &Entity,
    span: proc_macro2::Span,
) -> syn::Result<()> {
    let has = |wanted: &str| {
        fields
            .named
            .iter()
            .any(|f| f.ident.as_ref().is_some_and(|i| i == wanted))
    };

    if !has("message_id") {
        return Err(syn::Error::new(
            span,
            format!("`{owner}` has no `message_id` field"),
        ));
    }

    if let Entity::Field(field) = entity {
        if !has(&field.to_string()) {
            return Err(syn::Error::new(
                span,
                format!(
                    "Field `{}` not found in `{}`. Available fields: {}",
                    field,
                    owner,
                    fields
                        .named
                        .iter()
                        .filter_map(|f| f.ident.as_ref())
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
    }

    Ok(())
}

/// Generate the three match arms for one variant.
fn generate_arms(
    enum_name: &Ident,
    variant: &Variant,
    default_entity: &Option<Entity>,
) -> syn::Result<(
    proc_macro2::TokenStream,
    proc_macro2::TokenStream,
    proc_macro2::TokenStream,
)> {
    let variant_name = &variant.ident;
    let kind = variant_name.to_string();

    match &variant.fields {
        Fields::Named(fields) => {
            let entity = match get_entity_attr(&variant.attrs)? {
                Some(entity) => entity,
                None => default_entity.clone().ok_or_else(|| {
                    syn::Error::new(
                        variant.span(),
                        format!(
                            "Variant `{variant_name}` has no #[envelope(entity = field)] attribute \
                             and no default is set on the enum."
                        ),
                    )
                })?,
            };
            check_fields(variant_name, fields, &entity, variant.span())?;

            let entity_arm = match &entity {
                Entity::Field(field) => quote! {
                    #enum_name::#variant_name { #field, .. } => {
                        ::std::string::ToString::to_string(#field)
                    }
                },
                Entity::Constant(value) => quote! {
                    #enum_name::#variant_name { .. } => ::std::string::String::from(#value),
                },
            };

            Ok((
                quote!(#enum_name::#variant_name { message_id, .. } => *message_id,),
                entity_arm,
                quote!(#enum_name::#variant_name { .. } => #kind,),
            ))
        }
        Fields::Unnamed(fields) if fields.unnamed.len() == 1 => Ok((
            quote!(#enum_name::#variant_name(inner) => ::tideflow::Envelope::message_id(inner),),
            quote!(#enum_name::#variant_name(inner) => ::tideflow::Envelope::entity_id(inner),),
            quote!(#enum_name::#variant_name(inner) => ::tideflow::Envelope::kind(inner),),
        )),
        Fields::Unnamed(_) => Err(syn::Error::new(
            variant.span(),
            "Envelope derive supports tuple variants with exactly one field only",
        )),
        Fields::Unit => Err(syn::Error::new(
            variant.span(),
            "Envelope derive does not support unit variants. All variants must carry a message id.",
        )),
    }
}
