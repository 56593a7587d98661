use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

/// How a single field participates in the wire format: an inline
/// value written straight through the primitive codec, or a
/// [`Link<T>`]/`Option<Link<T>>` reference that goes through the
/// identity-tracked `write_value`/`read_value` path.
enum FieldKind {
	Inline,
	Link(Type),
	OptionLink(Type),
}

struct FieldPlan {
	ident: syn::Ident,
	name: String,
	ty: Type,
	transient: bool,
	constructor_recreated: bool,
	kind: FieldKind,
}

/// `#[derive(GraphValue)]`: struct-only. Parses the struct, panics on
/// an unsupported shape at expansion time, and emits one `impl` block
/// pair covering [`GraphObject`] (field-index dispatch for read/write/
/// construct) and [`GraphValue`] (blank construction, the memoized
/// static type descriptor).
pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let DeriveInput { ident, data, .. } = syn::parse(tokens).unwrap();

	let fields = match data {
		Data::Struct(data) => match data.fields {
			Fields::Named(named) => named.named,
			Fields::Unnamed(_) => panic!("#[derive(GraphValue)] requires named fields, not a tuple struct"),
			Fields::Unit => syn::punctuated::Punctuated::new(),
		},
		Data::Enum(_) => panic!("#[derive(GraphValue)] does not support enums"),
		Data::Union(_) => panic!("#[derive(GraphValue)] does not support unions"),
	};

	let plans: Vec<FieldPlan> = fields
		.into_iter()
		.map(|field| {
			let ident = field.ident.expect("named field");
			let name = ident.to_string();
			let (transient, constructor_recreated) = parse_field_attrs(&field.attrs);
			let kind = classify(&field.ty);
			FieldPlan { ident, name, ty: field.ty, transient, constructor_recreated, kind }
		})
		.collect();

	let struct_name = ident.to_string();

	let mut write_arms = Vec::with_capacity(plans.len());
	let mut read_arms = Vec::with_capacity(plans.len());
	let mut construct_arms = Vec::with_capacity(plans.len());
	let mut blank_inits = Vec::with_capacity(plans.len());
	let mut field_descriptors = Vec::with_capacity(plans.len());

	for (index, plan) in plans.iter().enumerate() {
		let field_ident = &plan.ident;
		let name_lit = &plan.name;
		let transient_call = plan.transient.then(|| quote!(.transient()));
		let constructor_call = plan.constructor_recreated.then(|| quote!(.constructor_recreated()));

		match &plan.kind {
			FieldKind::Inline => {
				let ty = &plan.ty;
				write_arms.push(quote! { #index => writer.write_primitive(&self.#field_ident), });
				read_arms.push(quote! {
					#index => {
						self.#field_ident = reader.read_primitive()?;
						Ok(())
					}
				});
				construct_arms.push(quote! {
					#index => {
						self.#field_ident = ::std::default::Default::default();
						Ok(())
					}
				});
				blank_inits.push(quote! { #field_ident: ::std::default::Default::default() });
				field_descriptors.push(quote! {
					::graphwire::descriptor::FieldDescriptor::new(
						#struct_name,
						#name_lit,
						::graphwire::descriptor::TypeRef::of(&<#ty as ::graphwire::object::GraphValue>::static_type_descriptor()),
					)
					#transient_call
					#constructor_call
				});
			}
			FieldKind::Link(inner) => {
				write_arms.push(quote! { #index => writer.write_value(Some(self.#field_ident.handle())), });
				read_arms.push(quote! {
					#index => {
						let handle = reader
							.read_value()?
							.ok_or(::graphwire::error::WireError::StreamCorrupted("non-nullable reference field was null"))?;
						self.#field_ident = ::graphwire::object::Link::from_handle(handle);
						Ok(())
					}
				});
				construct_arms.push(quote! {
					#index => {
						self.#field_ident = ::graphwire::object::Link::new(<#inner as ::graphwire::object::GraphValue>::new_blank());
						Ok(())
					}
				});
				blank_inits.push(quote! {
					#field_ident: ::graphwire::object::Link::new(<#inner as ::graphwire::object::GraphValue>::new_blank())
				});
				field_descriptors.push(quote! {
					::graphwire::descriptor::FieldDescriptor::new(
						#struct_name,
						#name_lit,
						::graphwire::descriptor::TypeRef::of(&<#inner as ::graphwire::object::GraphValue>::static_type_descriptor()),
					)
					.by_reference()
					#transient_call
					#constructor_call
				});
			}
			FieldKind::OptionLink(inner) => {
				write_arms.push(quote! {
					#index => writer.write_value(self.#field_ident.as_ref().map(|link| link.handle())),
				});
				read_arms.push(quote! {
					#index => {
						self.#field_ident = match reader.read_value()? {
							Some(handle) => Some(::graphwire::object::Link::from_handle(handle)),
							None => None,
						};
						Ok(())
					}
				});
				construct_arms.push(quote! {
					#index => {
						self.#field_ident = None;
						Ok(())
					}
				});
				blank_inits.push(quote! { #field_ident: None });
				field_descriptors.push(quote! {
					::graphwire::descriptor::FieldDescriptor::new(
						#struct_name,
						#name_lit,
						::graphwire::descriptor::TypeRef::of(&<#inner as ::graphwire::object::GraphValue>::static_type_descriptor()),
					)
					.by_reference()
					#transient_call
					#constructor_call
				});
			}
		}
	}

	quote! {
		impl ::graphwire::object::GraphObject for #ident {
			fn dyn_type_descriptor(&self) -> ::std::sync::Arc<::graphwire::descriptor::TypeDescriptor> {
				<Self as ::graphwire::object::GraphValue>::static_type_descriptor()
			}

			fn write_field(&self, field_index: usize, writer: &mut ::graphwire::writer::ObjectWriter<'_>) -> ::graphwire::error::Result<()> {
				match field_index {
					#(#write_arms)*
					other => ::std::unreachable!("{} has no field at index {}", #struct_name, other),
				}
			}

			fn read_field(&mut self, field_index: usize, reader: &mut ::graphwire::reader::ObjectReader<'_>) -> ::graphwire::error::Result<()> {
				match field_index {
					#(#read_arms)*
					other => ::std::unreachable!("{} has no field at index {}", #struct_name, other),
				}
			}

			fn construct_field(&mut self, field_index: usize) -> ::graphwire::error::Result<()> {
				match field_index {
					#(#construct_arms)*
					other => ::std::unreachable!("{} has no field at index {}", #struct_name, other),
				}
			}

			fn as_any(&self) -> &dyn ::std::any::Any {
				self
			}

			fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
				self
			}
		}

		impl ::graphwire::object::GraphValue for #ident {
			fn new_blank() -> Self {
				Self { #(#blank_inits),* }
			}

			fn static_type_descriptor() -> ::std::sync::Arc<::graphwire::descriptor::TypeDescriptor> {
				::graphwire::cache::TypeCache::global().get_or_insert(::std::sync::Arc::new(::graphwire::descriptor::TypeDescriptor {
					full_name: #struct_name.to_string(),
					assembly: ::graphwire::derive_support::crate_assembly(
						::std::env!("CARGO_PKG_NAME"),
						::std::env!("CARGO_PKG_VERSION"),
					),
					generic_args: ::std::vec![],
					base_type: ::std::option::Option::None,
					fields: ::std::vec![ #(#field_descriptors),* ],
					kind: ::graphwire::descriptor::TypeDescriptorKind::UserObject,
				}))
			}
		}
	}
}

fn parse_field_attrs(attrs: &[Attribute]) -> (bool, bool) {
	let mut transient = false;
	let mut constructor_recreated = false;
	for attr in attrs {
		if !attr.path().is_ident("graphwire") {
			continue;
		}
		let _ = attr.parse_nested_meta(|meta| {
			if meta.path.is_ident("transient") {
				transient = true;
			} else if meta.path.is_ident("constructor_recreated") {
				transient = true;
				constructor_recreated = true;
			}
			Ok(())
		});
	}
	(transient, constructor_recreated)
}

/// Recognises `Link<T>` and `Option<Link<T>>` syntactically, by last
/// path segment, rather than resolving full trait bounds at
/// macro-expansion time.
fn classify(ty: &Type) -> FieldKind {
	if let Some(inner) = single_generic_arg(ty, "Link") {
		return FieldKind::Link(inner);
	}
	if let Some(option_inner) = single_generic_arg(ty, "Option") {
		if let Some(link_inner) = single_generic_arg(&option_inner, "Link") {
			return FieldKind::OptionLink(link_inner);
		}
	}
	FieldKind::Inline
}

fn single_generic_arg(ty: &Type, segment_name: &str) -> Option<Type> {
	let Type::Path(path) = ty else { return None };
	let segment = path.path.segments.last()?;
	if segment.ident != segment_name {
		return None;
	}
	let PathArguments::AngleBracketed(args) = &segment.arguments else { return None };
	match args.args.first()? {
		GenericArgument::Type(inner) => Some(inner.clone()),
		_ => None,
	}
}
