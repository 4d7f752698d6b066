use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, Pat, Type, parse_macro_input};

/// Derive a `TemplateFilter` implementation from a function.
///
/// The first parameter receives the filtered value. An optional second
/// parameter receives the argument written after `:`; declare it as
/// `Option<T>` to make the argument optional.
///
/// The generated struct is named after the function in PascalCase with a
/// `Filter` suffix.
///
/// # Attribute syntax
///
/// ```ignore
/// #[template_filter(name = "cut", is_safe = true)]
/// ```
///
/// `name` defaults to the function name; `is_safe` defaults to `false`.
///
/// # Supported parameter types
/// - `Value`: accepts any value, no validation
/// - `String`: any value, converted with `to_output_string`
/// - `f64`: validates the value is a number, passes the inner f64
/// - `bool`: validates the value is a bool, passes the inner bool
/// - `Vec<Value>`: validates the value is an array, passes the inner Vec
///
/// # Example
/// ```ignore
/// #[template_filter(name = "cut")]
/// fn cut(text: String, needle: String) -> Result<Value, EvalError> {
///     Ok(Value::String(text.replace(&needle, "")))
/// }
/// ```
#[proc_macro_attribute]
pub fn template_filter(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as FilterArgs);
    let input_fn = parse_macro_input!(item as ItemFn);

    match expand_filter(args, &input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_filter(args: FilterArgs, input_fn: &ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    let fn_name = &input_fn.sig.ident;
    let struct_name = format_ident!("{}Filter", to_pascal_case(&fn_name.to_string()));
    let filter_name = args.name.unwrap_or_else(|| fn_name.to_string());
    let is_safe = args.is_safe;

    let mut params = Vec::new();
    for fn_arg in &input_fn.sig.inputs {
        match fn_arg {
            FnArg::Typed(pat_type) => match &*pat_type.pat {
                Pat::Ident(ident) => params.push((ident.ident.clone(), (*pat_type.ty).clone())),
                other => {
                    return Err(syn::Error::new_spanned(other, "expected a plain parameter name"));
                }
            },
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(receiver, "filters cannot take `self`"));
            }
        }
    }

    if params.is_empty() || params.len() > 2 {
        return Err(syn::Error::new_spanned(
            &input_fn.sig,
            "a filter takes the value and at most one argument",
        ));
    }

    let mut param_names = Vec::new();
    let mut param_types = Vec::new();

    let (value_name, value_ty) = &params[0];
    let (value_extraction, value_rust_type) =
        generate_conversion(quote! { value }, value_ty)?;
    let value_extraction = quote! { let #value_name = #value_extraction; };
    param_names.push(value_name.clone());
    param_types.push(value_rust_type);

    let (arg_extraction, arg_spec) = match params.get(1) {
        None => (
            quote! { let _ = arg; },
            quote! { bobbin::registry::ArgSpec::None },
        ),
        Some((arg_name, arg_ty)) => {
            let arg_name_str = arg_name.to_string();
            if let Some(inner) = option_inner(arg_ty) {
                let (conversion, rust_type) = generate_conversion(quote! { v }, inner)?;
                param_names.push(arg_name.clone());
                param_types.push(quote! { Option<#rust_type> });
                (
                    quote! {
                        let #arg_name = match arg {
                            Some(v) => Some(#conversion),
                            None => None,
                        };
                    },
                    quote! { bobbin::registry::ArgSpec::Optional },
                )
            } else {
                let (conversion, rust_type) = generate_conversion(quote! { v }, arg_ty)?;
                param_names.push(arg_name.clone());
                param_types.push(rust_type);
                (
                    quote! {
                        let #arg_name = match arg {
                            Some(v) => #conversion,
                            None => return Err(bobbin::EvalError::new(
                                bobbin::EvalErrorKind::TypeError,
                                format!("missing required filter argument: {}", #arg_name_str),
                            )),
                        };
                    },
                    quote! { bobbin::registry::ArgSpec::Required },
                )
            }
        }
    };

    let fn_body = &input_fn.block;

    Ok(quote! {
        pub struct #struct_name;

        impl #struct_name {
            fn execute(#(#param_names: #param_types),*) -> Result<bobbin::Value, bobbin::EvalError> {
                #fn_body
            }
        }

        impl bobbin::registry::TemplateFilter for #struct_name {
            fn apply(
                &self,
                value: bobbin::Value,
                arg: Option<bobbin::Value>,
            ) -> Result<bobbin::Value, bobbin::EvalError> {
                #value_extraction
                #arg_extraction
                Self::execute(#(#param_names),*)
            }

            fn signature(&self) -> bobbin::registry::FilterSignature {
                bobbin::registry::FilterSignature {
                    name: #filter_name.to_string(),
                    arg: #arg_spec,
                    is_safe: #is_safe,
                }
            }
        }
    })
}

/// Conversion from a `bobbin::Value` expression to the parameter type.
///
/// Returns (conversion_expr, rust_type_token)
fn generate_conversion(
    source: proc_macro2::TokenStream,
    ty: &Type,
) -> syn::Result<(proc_macro2::TokenStream, proc_macro2::TokenStream)> {
    let type_str = quote!(#ty).to_string().replace(' ', "");

    let converted = match type_str.as_str() {
        "Value" => (quote! { #source }, quote! { bobbin::Value }),
        "String" => (quote! { #source.to_output_string() }, quote! { String }),
        "f64" => (
            quote! {
                match #source {
                    bobbin::Value::Number(n) => n,
                    other => return Err(bobbin::EvalError::type_error("number", other.type_name())),
                }
            },
            quote! { f64 },
        ),
        "bool" => (
            quote! {
                match #source {
                    bobbin::Value::Bool(b) => b,
                    other => return Err(bobbin::EvalError::type_error("bool", other.type_name())),
                }
            },
            quote! { bool },
        ),
        "Vec<Value>" => (
            quote! {
                match #source {
                    bobbin::Value::Array(items) => items,
                    other => return Err(bobbin::EvalError::type_error("array", other.type_name())),
                }
            },
            quote! { Vec<bobbin::Value> },
        ),
        _ => {
            return Err(syn::Error::new_spanned(
                ty,
                "unsupported filter parameter type, expected Value, String, f64, bool or Vec<Value>",
            ));
        }
    };

    Ok(converted)
}

/// `T` for a parameter declared as `Option<T>`.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

// -- Attribute arg parsing -----------------------------------------------

#[derive(Default)]
struct FilterArgs {
    name: Option<String>,
    is_safe: bool,
}

impl syn::parse::Parse for FilterArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut args = FilterArgs::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            input.parse::<syn::Token![=]>()?;

            match ident.to_string().as_str() {
                "name" => {
                    let lit: syn::LitStr = input.parse()?;
                    args.name = Some(lit.value());
                }
                "is_safe" => {
                    let lit: syn::LitBool = input.parse()?;
                    args.is_safe = lit.value;
                }
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unexpected key `{other}`, expected `name` or `is_safe`"),
                    ));
                }
            }

            if input.is_empty() {
                break;
            }
            input.parse::<syn::Token![,]>()?;
        }

        Ok(args)
    }
}
