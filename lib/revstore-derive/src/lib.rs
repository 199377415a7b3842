use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Lit, parse_macro_input};

/// Derive macro for Stored - generates a versioned repository over a
/// document executor.
///
/// This macro supports two modes:
///
/// ## Individual Repository Mode
/// Applied to a repository struct with `item_type` and `collection`, generates:
/// - `COLLECTION` constant and `new(executor) -> Self` constructor
/// - `document_store()` returning a `DocumentStore` over a clone of the executor
/// - `ensure_indexes()` declaring the built-in and configured indexes
/// - `VersionedRepository<T>` implementation
///
/// The struct must have exactly one field, `executor`, whose type implements
/// `DocumentExecutor + Clone`. The item type must implement
/// `Serialize + DeserializeOwned + Send + Sync`.
///
/// Attributes:
/// - `item_type`: The type stored by the repository (required)
/// - `collection`: The collection holding every version and metadata row (required)
/// - `indexes`: `;`-separated index keys; a key may list several
///   comma-separated fields for a compound index
/// - `unique_indexes`: same format, declared unique
///
/// Example:
/// ```text
/// #[derive(Stored)]
/// #[stored(item_type = Article, collection = "articles", indexes = "author;author,slug")]
/// pub struct ArticleRepository {
///     executor: PgPool,
/// }
/// ```
///
/// ## Combined Repository Mode
/// Applied to a struct of repositories with `executor`, generates:
/// - `new(executor) -> Self` building every sub-repository
/// - `RepositoryConnection` implementation: `connect` goes through the
///   executor, `initialize` runs each sub-repository's `ensure_indexes`
///
/// Attributes:
/// - `executor`: The executor type every sub-repository is built over (required)
///
/// Example:
/// ```text
/// #[derive(Stored)]
/// #[stored(executor = PgPool)]
/// pub struct CmsRepository {
///     pub articles: ArticleRepository,
///     pub authors: AuthorRepository,
/// }
/// ```
#[proc_macro_derive(Stored, attributes(stored))]
pub fn derive_stored(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct StoredArgs {
    item_type: Option<syn::Type>,
    collection: Option<String>,
    indexes: Vec<String>,
    unique_indexes: Vec<String>,
    executor: Option<syn::Type>,
}

fn parse_string(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    match meta.input.parse::<Lit>()? {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

fn split_keys(keys: &str) -> Vec<String> {
    keys.split(';')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_args(input: &DeriveInput) -> syn::Result<StoredArgs> {
    let stored_attr = input
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("stored"))
        .ok_or_else(|| {
            syn::Error::new_spanned(&input.ident, "No #[stored(...)] attribute found")
        })?;

    let mut args = StoredArgs::default();
    stored_attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("item_type") {
            meta.input.parse::<syn::Token![=]>()?;
            args.item_type = Some(meta.input.parse()?);
        } else if meta.path.is_ident("collection") {
            args.collection = Some(parse_string(&meta)?);
        } else if meta.path.is_ident("indexes") {
            args.indexes.extend(split_keys(&parse_string(&meta)?));
        } else if meta.path.is_ident("unique_indexes") {
            args.unique_indexes.extend(split_keys(&parse_string(&meta)?));
        } else if meta.path.is_ident("executor") {
            meta.input.parse::<syn::Token![=]>()?;
            args.executor = Some(meta.input.parse()?);
        } else {
            return Err(meta.error("unknown #[stored(...)] argument"));
        }
        Ok(())
    })?;
    Ok(args)
}

fn named_fields(
    input: &DeriveInput,
) -> syn::Result<&syn::punctuated::Punctuated<syn::Field, syn::Token![,]>> {
    match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(fields) => Ok(&fields.named),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                "Stored can only be derived for structs with named fields",
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            "Stored can only be derived for structs",
        )),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let args = parse_args(input)?;

    // Check which mode we're in
    if let Some(executor) = &args.executor {
        return generate_combined_repository(input, executor);
    }

    let item_type = args
        .item_type
        .as_ref()
        .ok_or_else(|| syn::Error::new_spanned(&input.ident, "Missing item_type in #[stored(...)]"))?;
    let collection = args
        .collection
        .as_deref()
        .ok_or_else(|| syn::Error::new_spanned(&input.ident, "Missing collection in #[stored(...)]"))?;
    generate_individual_repository(input, item_type, collection, &args)
}

fn generate_combined_repository(
    input: &DeriveInput,
    executor: &syn::Type,
) -> syn::Result<TokenStream2> {
    let repo_name = &input.ident;
    let fields = named_fields(input)?;
    if fields.is_empty() {
        return Err(syn::Error::new_spanned(
            repo_name,
            "Combined repository must have at least one field",
        ));
    }

    let field_names: Vec<_> = fields.iter().filter_map(|f| f.ident.as_ref()).collect();
    let field_types: Vec<_> = fields.iter().map(|f| &f.ty).collect();

    Ok(quote! {
        impl #repo_name {
            /// Build every sub-repository over the given executor.
            pub fn new(executor: #executor) -> Self {
                Self {
                    #(#field_names: <#field_types>::new(::core::clone::Clone::clone(&executor))),*
                }
            }
        }

        #[::revstore::async_trait]
        impl ::revstore::RepositoryConnection for #repo_name {
            async fn connect(
                config: impl Into<::revstore::ConnectionConfig> + Send,
            ) -> Result<Self, ::revstore::StoreError> {
                let executor =
                    <#executor as ::revstore::RepositoryConnection>::connect(config).await?;
                Ok(Self::new(executor))
            }

            async fn initialize(&self) -> Result<(), ::revstore::StoreError> {
                #(self.#field_names.ensure_indexes().await?;)*
                Ok(())
            }
        }
    })
}

fn generate_individual_repository(
    input: &DeriveInput,
    item_type: &syn::Type,
    collection: &str,
    args: &StoredArgs,
) -> syn::Result<TokenStream2> {
    let repo_name = &input.ident;
    let executor = named_fields(input)?
        .iter()
        .find(|f| f.ident.as_ref().is_some_and(|ident| ident == "executor"))
        .map(|f| &f.ty)
        .ok_or_else(|| {
            syn::Error::new_spanned(repo_name, "Repository struct needs an `executor` field")
        })?;
    let indexes = &args.indexes;
    let unique_indexes = &args.unique_indexes;

    Ok(quote! {
        impl #repo_name {
            /// The collection holding every version and metadata row.
            pub const COLLECTION: &'static str = #collection;

            /// Create a new repository over the given executor.
            pub fn new(executor: #executor) -> Self {
                Self { executor }
            }

            pub fn document_store(&self) -> ::revstore::DocumentStore<#executor> {
                ::revstore::DocumentStore::new(
                    ::core::clone::Clone::clone(&self.executor),
                    Self::COLLECTION,
                )
            }

            /// Declare the built-in and configured indexes.
            pub async fn ensure_indexes(&self) -> Result<Vec<String>, ::revstore::StoreError> {
                self.document_store()
                    .create_indexes(&[#(#indexes),*], &[#(#unique_indexes),*])
                    .await
            }
        }

        #[::revstore::async_trait]
        impl ::revstore::VersionedRepository<#item_type> for #repo_name {
            async fn load(
                &self,
                id: &str,
                query: &::revstore::VersionQuery,
            ) -> Result<Option<::revstore::VersionedValue<#item_type>>, ::revstore::StoreError> {
                self.document_store().load(id, query).await
            }

            async fn load_all(
                &self,
                ids: &[String],
                query: &::revstore::VersionQuery,
            ) -> Result<Vec<::revstore::VersionedValue<#item_type>>, ::revstore::StoreError> {
                self.document_store().load_all(ids, query).await
            }

            async fn history(
                &self,
                id: &str,
            ) -> Result<Vec<::revstore::VersionedValue<#item_type>>, ::revstore::StoreError> {
                self.document_store().history(id).await
            }

            async fn save(
                &self,
                id: &str,
                payload: #item_type,
                dest: Option<::revstore::VersionOrRef>,
            ) -> Result<::revstore::VersionedValue<#item_type>, ::revstore::StoreError> {
                self.document_store().save_one(id, payload, dest).await
            }

            async fn update_ref(
                &self,
                id: &str,
                reference: &::revstore::Ref,
                dest: Option<::revstore::VersionOrRef>,
            ) -> Result<(), ::revstore::StoreError> {
                self.document_store().update_ref(id, reference, dest).await
            }

            async fn is_archived(&self, id: &str) -> Result<bool, ::revstore::StoreError> {
                self.document_store().is_archived(id).await
            }

            async fn archive(&self, id: &str, archived: bool) -> Result<(), ::revstore::StoreError> {
                self.document_store().archive_one(id, archived).await
            }

            async fn remove(&self, id: &str) -> Result<(), ::revstore::StoreError> {
                self.document_store().remove_one(id).await.map(|_| ())
            }

            async fn remove_all(&self, ids: &[String]) -> Result<(), ::revstore::StoreError> {
                self.document_store().remove_all(ids).await.map(|_| ())
            }
        }
    })
}
