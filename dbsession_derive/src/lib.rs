use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned,
};

/// Derives `dbsession::PersistentObject` for a struct with named fields.
///
/// Struct attribute: `#[persistent(entity = "Name")]` (defaults to the struct name).
///
/// Field attributes:
/// - `#[persistent(id)]` marks the `Option<String>` identity field (required, exactly one).
/// - `#[persistent(revision)]` marks an `i64` optimistic-lock revision.
/// - `#[persistent(column = "...")]` overrides the column name.
/// - `#[persistent(no_state)]` stores the field but leaves it out of dirty checking.
#[proc_macro_derive(PersistentObject, attributes(persistent))]
pub fn derive_persistent_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_persistent_object(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_persistent_object(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "PersistentObject does not support generic structs",
        ));
    }

    let entity_options = parse_entity_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "PersistentObject can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "PersistentObject requires named fields",
            ));
        }
    };

    let mut fields = Vec::<PersistentField>::new();
    for field in named_fields.named {
        let span = field.span();
        let ident = field.ident.clone().ok_or_else(|| {
            syn::Error::new(span, "PersistentObject requires named fields")
        })?;
        let options = parse_field_options(&field.attrs)?;
        let column = options
            .column_name
            .clone()
            .unwrap_or_else(|| ident.to_string());
        fields.push(PersistentField {
            ident,
            ty: field.ty,
            column,
            options,
            span,
        });
    }

    let id_fields = fields
        .iter()
        .filter(|field| field.options.role == FieldRole::Id)
        .collect::<Vec<_>>();
    let id_field = match id_fields.as_slice() {
        [single] => *single,
        [] => {
            return Err(syn::Error::new(
                struct_name.span(),
                "PersistentObject requires one field marked #[persistent(id)]",
            ));
        }
        [_, second, ..] => {
            return Err(syn::Error::new(
                second.span,
                "Only one field may be marked #[persistent(id)]",
            ));
        }
    };

    let revision_fields = fields
        .iter()
        .filter(|field| field.options.role == FieldRole::Revision)
        .collect::<Vec<_>>();
    if revision_fields.len() > 1 {
        return Err(syn::Error::new(
            revision_fields[1].span,
            "Only one field may be marked #[persistent(revision)]",
        ));
    }
    let revision_field = revision_fields.first().copied();

    let entity_name = entity_options
        .entity_name
        .unwrap_or_else(|| struct_name.to_string());
    let id_ident = &id_field.ident;
    let id_column = &id_field.column;

    let (revision_column_tokens, revision_methods) = match revision_field {
        Some(field) => {
            let ident = &field.ident;
            let column = &field.column;
            (
                quote! { ::core::option::Option::Some(#column) },
                quote! {
                    fn revision(&self) -> ::core::option::Option<i64> {
                        ::core::option::Option::Some(self.#ident)
                    }

                    fn set_revision(&mut self, revision: i64) {
                        self.#ident = revision;
                    }
                },
            )
        }
        None => (quote! { ::core::option::Option::None }, quote! {}),
    };

    let state_fields = fields
        .iter()
        .filter(|field| field.options.role == FieldRole::State && field.options.in_state)
        .collect::<Vec<_>>();
    let state_idents = state_fields.iter().map(|field| &field.ident);
    let state_columns = state_fields.iter().map(|field| &field.column);

    let row_idents = fields.iter().map(|field| &field.ident).collect::<Vec<_>>();
    let row_columns = fields.iter().map(|field| &field.column).collect::<Vec<_>>();
    let row_types = fields.iter().map(|field| &field.ty).collect::<Vec<_>>();

    Ok(quote! {
        impl ::dbsession::PersistentObject for #struct_name {
            const ENTITY_TYPE: &'static str = #entity_name;
            const ID_COLUMN: &'static str = #id_column;
            const REVISION_COLUMN: ::core::option::Option<&'static str> = #revision_column_tokens;

            fn id(&self) -> ::core::option::Option<&str> {
                self.#id_ident.as_deref()
            }

            fn set_id(&mut self, id: ::std::string::String) {
                self.#id_ident = ::core::option::Option::Some(id);
            }

            #revision_methods

            fn persistent_state(&self) -> ::dbsession::PersistentState {
                let mut state = ::dbsession::PersistentState::new();
                #(
                    state.insert(#state_columns, ::dbsession::ColumnValue::to_value(&self.#state_idents));
                )*
                state
            }

            fn to_row(&self) -> ::dbsession::Row {
                let mut row = ::dbsession::Row::new();
                #(
                    row.insert(
                        ::std::string::String::from(#row_columns),
                        ::dbsession::ColumnValue::to_value(&self.#row_idents),
                    );
                )*
                row
            }

            fn from_row(row: &::dbsession::Row) -> ::dbsession::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(
                        #row_idents: <#row_types as ::dbsession::ColumnValue>::from_column(
                            row.get(#row_columns),
                            #row_columns,
                        )?,
                    )*
                })
            }
        }
    })
}

struct EntityOptions {
    entity_name: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldRole {
    Id,
    Revision,
    State,
}

#[derive(Clone)]
struct FieldOptions {
    role: FieldRole,
    in_state: bool,
    column_name: Option<String>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            role: FieldRole::State,
            in_state: true,
            column_name: None,
        }
    }
}

struct PersistentField {
    ident: Ident,
    ty: Type,
    column: String,
    options: FieldOptions,
    span: proc_macro2::Span,
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions { entity_name: None };

    for attr in attrs {
        if !attr.path().is_ident("persistent") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("entity") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                if lit.value().trim().is_empty() {
                    return Err(meta.error("entity name cannot be empty"));
                }
                options.entity_name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported persistent attribute. Supported: entity = \"...\""))
        })?;
    }

    Ok(options)
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut parsed = FieldOptions::default();
    let mut seen = false;

    for attr in attrs {
        if !attr.path().is_ident("persistent") {
            continue;
        }

        if seen {
            return Err(syn::Error::new(
                attr.span(),
                "Duplicate #[persistent(...)] attribute on field",
            ));
        }
        seen = true;

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                parsed.role = FieldRole::Id;
                return Ok(());
            }

            if meta.path.is_ident("revision") {
                parsed.role = FieldRole::Revision;
                return Ok(());
            }

            if meta.path.is_ident("no_state") {
                parsed.in_state = false;
                return Ok(());
            }

            if meta.path.is_ident("column") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                parsed.column_name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[persistent(...)] option. Supported: id, revision, no_state, column = \"...\"",
            ))
        })?;

        if parsed.role != FieldRole::State && !parsed.in_state {
            return Err(syn::Error::new(
                attr.span(),
                "#[persistent(no_state)] only applies to regular state fields",
            ));
        }
    }

    Ok(parsed)
}
