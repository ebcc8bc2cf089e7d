//! `#[derive(Model)]`: the compile-time replacement for reflection-based tag
//! parsing (design note §9). Reads `#[dynamorm(...)]` container and field
//! attributes and emits a `Model` implementation whose `build_descriptor()`
//! constructs exactly the `Descriptor` a hand-written `DescriptorBuilder`
//! chain would, plus `into_attrs`/`from_attrs` marshaling.
//!
//! Field attribute vocabulary (spec §4.1): `pk`, `sk`, `global_index =
//! "name:pk"` / `global_index = "name:sk"` (repeatable), `local_index =
//! "name"`, `attr = "dbname"`, `set`, `json`, `version`, `ttl`, `created_at`,
//! `updated_at`, `encrypted`, `skip`.

use darling::FromDeriveInput;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Meta, Token};

/// Container-level `#[dynamorm(table = "...")]` attribute, parsed with
/// darling the way `pmcp_macros::tool::ToolArgs` parses its attribute
/// arguments.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(dynamorm))]
struct ContainerArgs {
    #[darling(default)]
    table: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum RoleTag {
    Pk,
    Sk,
    Version,
    Ttl,
    CreatedAt,
    UpdatedAt,
    Encrypted,
    Skip,
    Plain,
}

struct FieldPlan {
    ident: syn::Ident,
    dbname: String,
    role: RoleTag,
    is_set: bool,
    is_json: bool,
    is_option: bool,
    global_indexes: Vec<(String, String)>,
    local_indexes: Vec<String>,
}

fn is_option_type(ty: &syn::Type) -> bool {
    if let syn::Type::Path(p) = ty {
        if let Some(seg) = p.path.segments.last() {
            return seg.ident == "Option";
        }
    }
    false
}

fn parse_field(field: &syn::Field) -> FieldPlan {
    let ident = field.ident.clone().expect("Model fields must be named");
    let mut dbname = ident.to_string();
    let mut role = RoleTag::Plain;
    let mut is_set = false;
    let mut is_json = false;
    let mut global_indexes = Vec::new();
    let mut local_indexes = Vec::new();

    for attr in &field.attrs {
        if !attr.path().is_ident("dynamorm") {
            continue;
        }
        let metas = attr
            .parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)
            .expect("malformed #[dynamorm(...)] attribute");
        for meta in metas {
            match &meta {
                Meta::Path(p) if p.is_ident("pk") => role = RoleTag::Pk,
                Meta::Path(p) if p.is_ident("sk") => role = RoleTag::Sk,
                Meta::Path(p) if p.is_ident("version") => role = RoleTag::Version,
                Meta::Path(p) if p.is_ident("ttl") => role = RoleTag::Ttl,
                Meta::Path(p) if p.is_ident("created_at") => role = RoleTag::CreatedAt,
                Meta::Path(p) if p.is_ident("updated_at") => role = RoleTag::UpdatedAt,
                Meta::Path(p) if p.is_ident("encrypted") => role = RoleTag::Encrypted,
                Meta::Path(p) if p.is_ident("skip") => role = RoleTag::Skip,
                Meta::Path(p) if p.is_ident("set") => is_set = true,
                Meta::Path(p) if p.is_ident("json") => is_json = true,
                Meta::NameValue(nv) if nv.path.is_ident("attr") => {
                    dbname = lit_str(&nv.value);
                }
                Meta::NameValue(nv) if nv.path.is_ident("global_index") => {
                    let spec = lit_str(&nv.value);
                    let (name, kind) = spec
                        .split_once(':')
                        .unwrap_or_else(|| panic!("global_index must be \"name:pk\" or \"name:sk\", got {spec:?}"));
                    global_indexes.push((name.to_string(), kind.to_string()));
                }
                Meta::NameValue(nv) if nv.path.is_ident("local_index") => {
                    local_indexes.push(lit_str(&nv.value));
                }
                other => panic!("unrecognized #[dynamorm(...)] entry: {other:?}"),
            }
        }
    }

    FieldPlan {
        is_option: is_option_type(&field.ty),
        ident,
        dbname,
        role,
        is_set,
        is_json,
        global_indexes,
        local_indexes,
    }
}

fn lit_str(expr: &syn::Expr) -> String {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Str(s), ..
    }) = expr
    {
        s.value()
    } else {
        panic!("expected a string literal")
    }
}

/// Derives `dynamorm_core::Model` for a struct of named fields.
#[proc_macro_derive(Model, attributes(dynamorm))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let container = ContainerArgs::from_derive_input(&input).expect("invalid #[dynamorm(...)] container attribute");
    let struct_name = &input.ident;
    let type_name_str = struct_name.to_string();
    let table_name = container.table.unwrap_or_else(|| type_name_str.to_lowercase());

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named.named.iter().map(parse_field).collect::<Vec<_>>(),
            _ => panic!("#[derive(Model)] requires named fields"),
        },
        _ => panic!("#[derive(Model)] only supports structs"),
    };

    let descriptor_fields: Vec<_> = fields
        .iter()
        .map(|f| {
            let dbname = &f.dbname;
            let field_name_str = f.ident.to_string();
            let role_tokens = role_to_descriptor_tokens(&f.role);
            let is_set = f.is_set;
            let is_json = f.is_json;
            quote! {
                .field(dynamorm_core::FieldDescriptor {
                    in_memory_name: #field_name_str,
                    dbname: #dbname.to_string(),
                    role: #role_tokens,
                    is_set: #is_set,
                    is_json_blob: #is_json,
                    omit_if_empty: #is_set,
                })
            }
        })
        .collect();

    // Merge pk/sk halves declared on separate fields of the same named index.
    let mut merged_globals: std::collections::BTreeMap<String, (Option<String>, Option<String>)> =
        std::collections::BTreeMap::new();
    for f in &fields {
        let field_name_str = f.ident.to_string();
        for (name, kind) in &f.global_indexes {
            let entry = merged_globals.entry(name.clone()).or_default();
            match kind.as_str() {
                "pk" => entry.0 = Some(field_name_str.clone()),
                "sk" => entry.1 = Some(field_name_str.clone()),
                other => panic!("global_index role must be \"pk\" or \"sk\", got {other:?}"),
            }
        }
    }
    let global_index_tokens: Vec<_> = merged_globals
        .iter()
        .map(|(name, (pk, sk))| {
            let pk = pk.clone().unwrap_or_else(|| panic!("global_index {name:?} has no pk field"));
            let sk_tokens = match sk {
                Some(s) => quote! { Some(#s) },
                None => quote! { None },
            };
            quote! {
                .global_index(dynamorm_core::GlobalIndex {
                    name: #name.to_string(),
                    pk_field: #pk,
                    sk_field: #sk_tokens,
                })
            }
        })
        .collect();

    let local_index_tokens: Vec<_> = fields
        .iter()
        .flat_map(|f| {
            let field_name_str = f.ident.to_string();
            f.local_indexes.iter().map(move |name| {
                quote! {
                    .local_index(dynamorm_core::LocalIndex {
                        name: #name.to_string(),
                        sk_field: #field_name_str,
                    })
                }
            })
        })
        .collect();

    let into_attrs_body: Vec<_> = fields
        .iter()
        .filter(|f| f.role != RoleTag::Skip)
        .map(|f| field_into_attrs(f))
        .collect();

    let from_attrs_body: Vec<_> = fields.iter().map(field_from_attrs).collect();
    let from_attrs_idents: Vec<_> = fields.iter().map(|f| f.ident.clone()).collect();

    let expanded = quote! {
        impl dynamorm_core::Model for #struct_name {
            const TYPE_NAME: &'static str = #type_name_str;

            fn build_descriptor() -> dynamorm_core::Result<dynamorm_core::Descriptor> {
                dynamorm_core::DescriptorBuilder::new(Self::TYPE_NAME, #table_name)
                    #(#descriptor_fields)*
                    #(#global_index_tokens)*
                    #(#local_index_tokens)*
                    .build()
            }

            fn into_attrs(self) -> std::collections::BTreeMap<String, dynamorm_core::AttrValue> {
                let mut map = std::collections::BTreeMap::new();
                #(#into_attrs_body)*
                map
            }

            fn from_attrs(
                attrs: &std::collections::BTreeMap<String, dynamorm_core::AttrValue>,
            ) -> dynamorm_core::Result<Self> {
                #(#from_attrs_body)*
                Ok(Self {
                    #(#from_attrs_idents),*
                })
            }
        }
    };

    expanded.into()
}

fn role_to_descriptor_tokens(role: &RoleTag) -> proc_macro2::TokenStream {
    match role {
        RoleTag::Pk => quote! { dynamorm_core::Role::Pk },
        RoleTag::Sk => quote! { dynamorm_core::Role::Sk },
        RoleTag::Version => quote! { dynamorm_core::Role::Version },
        RoleTag::Ttl => quote! { dynamorm_core::Role::Ttl },
        RoleTag::CreatedAt => quote! { dynamorm_core::Role::CreatedAt },
        RoleTag::UpdatedAt => quote! { dynamorm_core::Role::UpdatedAt },
        RoleTag::Encrypted => quote! { dynamorm_core::Role::Encrypted },
        RoleTag::Skip => quote! { dynamorm_core::Role::Ignored },
        RoleTag::Plain => quote! { dynamorm_core::Role::Plain },
    }
}

fn field_into_attrs(f: &FieldPlan) -> proc_macro2::TokenStream {
    let ident = &f.ident;
    let dbname = &f.dbname;
    let to_av = if f.is_json {
        quote! { dynamorm_core::attr_value::json_to_attr_value(&self.#ident).expect("json-tagged field must serialize") }
    } else if f.is_set {
        quote! { dynamorm_core::attr_value::set_to_attr_value_ss(&self.#ident) }
    } else {
        quote! { dynamorm_core::ToAttrValue::to_attr_value(&self.#ident) }
    };
    quote! {
        {
            let value = #to_av;
            if !value.is_empty_for_omission() {
                map.insert(#dbname.to_string(), value);
            }
        }
    }
}

fn field_from_attrs(f: &FieldPlan) -> proc_macro2::TokenStream {
    let ident = &f.ident;
    let dbname = &f.dbname;
    let from_av = if f.is_json {
        quote! { dynamorm_core::attr_value::json_from_attr_value(raw)? }
    } else if f.is_set {
        quote! { dynamorm_core::attr_value::set_from_attr_value_ss(raw)? }
    } else {
        quote! { dynamorm_core::FromAttrValue::from_attr_value(raw)? }
    };

    if f.role == RoleTag::Skip {
        return quote! {
            let #ident = Default::default();
        };
    }

    if f.is_option {
        quote! {
            let #ident = {
                let null = dynamorm_core::AttrValue::Null;
                let raw = attrs.get(#dbname).unwrap_or(&null);
                #from_av
            };
        }
    } else {
        quote! {
            let #ident = {
                let raw = attrs.get(#dbname).ok_or_else(|| dynamorm_core::CoreError::Conversion {
                    field: #dbname.to_string(),
                    reason: "missing attribute".to_string(),
                })?;
                #from_av
            };
        }
    }
}
