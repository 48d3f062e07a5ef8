//! Proc macro for binding Rust structs to HDF5 compound datatypes.
//!
//! `#[derive(H5Type)]` implements `hdf5kit_format::record::H5Type` for a
//! struct with named fields. Members appear in field declaration order,
//! packed with no padding; every field type must itself implement `H5Type`,
//! so nested derived structs become nested compounds.
//!
//! A field can be stored under a different member name with
//! `#[h5(name = "...")]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr};

/// Derive `H5Type` for a struct with named fields.
///
/// # Supported field types
/// Anything implementing `H5Type`: primitive integers and floats, `bool`,
/// `String` (variable-length string), `Vec<T>` (variable-length sequence),
/// `[T; N]` and other derived structs.
#[proc_macro_derive(H5Type, attributes(h5))]
pub fn derive_h5type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match impl_h5type(&input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn impl_h5type(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "H5Type can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "H5Type can only be derived for structs",
            ));
        }
    };
    if fields.is_empty() {
        return Err(syn::Error::new_spanned(
            name,
            "H5Type needs at least one field",
        ));
    }

    let mut datatype_members = Vec::new();
    let mut value_members = Vec::new();
    let mut field_inits = Vec::new();

    for field in fields.iter() {
        let Some(ident) = field.ident.as_ref() else {
            return Err(syn::Error::new_spanned(field, "unnamed field"));
        };
        let member = member_name(field)?.unwrap_or_else(|| ident.to_string());
        let ty = &field.ty;

        datatype_members.push(quote! {
            (#member, <#ty as ::hdf5kit_format::record::H5Type>::datatype())
        });
        value_members.push(quote! {
            ::hdf5kit_format::record::member(
                #member,
                <#ty as ::hdf5kit_format::record::H5Type>::to_value(&self.#ident),
            )
        });
        field_inits.push(quote! {
            #ident: ::hdf5kit_format::record::field::<#ty>(value, #member)?
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::hdf5kit_format::record::H5Type for #name #ty_generics #where_clause {
            fn datatype() -> ::hdf5kit_format::datatype::Datatype {
                ::hdf5kit_format::record::packed_compound([#(#datatype_members),*])
            }

            fn to_value(&self) -> ::hdf5kit_format::value::Value {
                ::hdf5kit_format::value::Value::Compound(
                    ::core::iter::IntoIterator::into_iter([#(#value_members),*]).collect(),
                )
            }

            fn from_value(
                value: &::hdf5kit_format::value::Value,
            ) -> ::core::result::Result<Self, ::hdf5kit_format::error::FormatError> {
                ::core::result::Result::Ok(Self {
                    #(#field_inits),*
                })
            }
        }
    })
}

/// Member name from `#[h5(name = "...")]`, if present.
fn member_name(field: &syn::Field) -> syn::Result<Option<String>> {
    let mut name = None;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("h5")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("member name must not be empty"));
                }
                name = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("unsupported h5 attribute; expected `name = \"...\"`"))
            }
        })?;
    }
    Ok(name)
}
