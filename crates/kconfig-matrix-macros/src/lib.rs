use proc_macro::TokenStream;

use quote::quote;
use syn::{
    Attribute, Expr, ExprArray, ExprLit, ItemStruct, Lit, Meta, Token, parse::Parser,
    spanned::Spanned,
};

#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Rule(attr: TokenStream, item: TokenStream) -> TokenStream {
    match rule_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn expr_array_strings(expr: &Expr) -> syn::Result<Vec<String>> {
    let Expr::Array(ExprArray { elems, .. }) = expr else {
        return Err(syn::Error::new(expr.span(), "expected array literal"));
    };
    let mut out = Vec::new();
    for e in elems {
        let s = lit_str(e)?;
        if out.contains(&s) {
            return Err(syn::Error::new(e.span(), format!("duplicate entry '{s}'")));
        }
        out.push(s);
    }
    Ok(out)
}

fn drop_our_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            let Meta::Path(p) = &a.meta else {
                return true;
            };
            let Some(ident) = p.get_ident() else {
                return true;
            };
            ident != "Rule"
        })
        .cloned()
        .collect()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// Collects every `${name}` reference. `$$` is a literal dollar; anything else
// after a `$` is rejected so templates stay in the braced form.
fn template_vars(template: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            continue;
        }
        match chars.next() {
            Some('$') => {}
            Some('{') => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) if is_ident_char(ch) => name.push(ch),
                        Some(ch) => {
                            return Err(format!("invalid character '{ch}' in variable reference"));
                        }
                        None => return Err("unterminated '${' in template".into()),
                    }
                }
                if name.is_empty() {
                    return Err("empty variable reference '${}'".into());
                }
                out.push(name);
            }
            Some(other) => {
                return Err(format!(
                    "unsupported '${other}' in template (use ${{name}} or $$)"
                ));
            }
            None => return Err("trailing '$' in template".into()),
        }
    }
    Ok(out)
}

fn check_template(
    expr: &Expr,
    template: &str,
    tools: &[String],
    args: &[String],
) -> syn::Result<()> {
    let vars = template_vars(template).map_err(|e| syn::Error::new(expr.span(), e))?;
    for v in vars {
        let known = v == "in" || v == "out" || tools.contains(&v) || args.contains(&v);
        if !known {
            return Err(syn::Error::new(
                expr.span(),
                format!("template references '${{{v}}}' which is not in, out, a tool or an arg"),
            ));
        }
    }
    Ok(())
}

fn rule_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let metas = parser.parse(attr)?;

    let mut name: Option<String> = None;
    let mut command: Option<(String, Expr)> = None;
    let mut description: Option<(String, Expr)> = None;
    let mut tools: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    for m in metas {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        let v = &nv.value;
        match key.as_str() {
            "name" => name = Some(lit_str(v)?),
            "command" => command = Some((lit_str(v)?, v.clone())),
            "description" => description = Some((lit_str(v)?, v.clone())),
            "tools" => tools = expr_array_strings(v)?,
            "args" => args = expr_array_strings(v)?,
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Rule attribute key '{other}'"),
                ));
            }
        }
    }

    let name = name.ok_or_else(|| syn::Error::new(struct_ident.span(), "Rule: missing name"))?;
    if name.is_empty() || !name.chars().all(|c| is_ident_char(c) || c == '.' || c == '-') {
        return Err(syn::Error::new(
            struct_ident.span(),
            format!("Rule: invalid name '{name}'"),
        ));
    }
    let (command, command_expr) =
        command.ok_or_else(|| syn::Error::new(struct_ident.span(), "Rule: missing command"))?;
    let (description, description_expr) = description
        .ok_or_else(|| syn::Error::new(struct_ident.span(), "Rule: missing description"))?;

    for a in &args {
        if tools.contains(a) {
            return Err(syn::Error::new(
                struct_ident.span(),
                format!("Rule: '{a}' is declared as both a tool and an arg"),
            ));
        }
    }
    check_template(&command_expr, &command, &tools, &args)?;
    check_template(&description_expr, &description, &tools, &args)?;

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const NAME: &'static str = #name;
            pub const COMMAND: &'static str = #command;
            pub const DESCRIPTION: &'static str = #description;
            pub const TOOLS: &'static [&'static str] = &[#(#tools),*];
            pub const ARGS: &'static [&'static str] = &[#(#args),*];
        }

        impl crate::rules::StaticRule for #struct_ident {
            fn def() -> crate::rules::RuleDef {
                crate::rules::RuleDef {
                    name: Self::NAME,
                    command: Self::COMMAND,
                    description: Self::DESCRIPTION,
                    tools: Self::TOOLS,
                    args: Self::ARGS,
                }
            }
        }
    };

    Ok(expanded.into())
}
