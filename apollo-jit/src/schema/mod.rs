//! GraphQL schemas and the resolvers registered against them.

pub mod resolver;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use apollo_compiler::Name;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Implementers;
use apollo_compiler::validation::Valid;
use futures::future::BoxFuture;
use serde_json_bytes::Value;
use sha2::Digest;
use sha2::Sha256;

use self::resolver::AsyncResolverFn;
use self::resolver::FieldError;
use self::resolver::FieldResolver;
use self::resolver::ResolveInfo;
use self::resolver::ResolvedValue;
use self::resolver::ScalarSerializerFn;
use self::resolver::SourceValue;
use self::resolver::SyncResolverFn;
use self::resolver::TypeResolverFn;
use crate::error::SchemaError;

const BUILT_IN_SCALARS: &[&str] = &["Int", "Float", "String", "Boolean", "ID"];

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// SHA-256 of the schema SDL, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaHash(Arc<String>);

impl SchemaHash {
    pub(crate) fn new(sdl: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sdl);
        let hash = format!("{:x}", hasher.finalize());
        Self(Arc::new(hash))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one [`Schema`] instance.
///
/// Two schemas built from the same SDL get different ids: their resolvers may differ, and a
/// compiled plan is only valid for the instance it was compiled against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaId {
    hash: SchemaHash,
    instance: u64,
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.hash, self.instance)
    }
}

/// A validated schema together with its resolvers. Immutable once built.
pub struct Schema {
    pub(crate) definitions: Valid<apollo_compiler::Schema>,
    raw_sdl: Arc<String>,
    id: SchemaId,
    resolvers: HashMap<Name, HashMap<Name, FieldResolver>>,
    type_resolvers: HashMap<Name, Arc<TypeResolverFn>>,
    serializers: HashMap<Name, Arc<ScalarSerializerFn>>,
    possible_types: HashMap<Name, Vec<Name>>,
    implementers: apollo_compiler::collections::HashMap<Name, Implementers>,
}

impl Schema {
    /// Parse and validate a schema that only relies on property reads.
    pub fn parse(sdl: &str) -> Result<Self, SchemaError> {
        Self::builder(sdl).build()
    }

    /// Start registering resolvers against an SDL document.
    pub fn builder(sdl: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            sdl: sdl.into(),
            resolvers: Vec::new(),
            type_resolvers: Vec::new(),
            serializers: Vec::new(),
        }
    }

    /// The validated type system.
    pub fn definitions(&self) -> &Valid<apollo_compiler::Schema> {
        &self.definitions
    }

    /// The SDL this schema was built from.
    pub fn raw_sdl(&self) -> &Arc<String> {
        &self.raw_sdl
    }

    /// Identity used by plan caches.
    pub fn id(&self) -> &SchemaId {
        &self.id
    }

    /// Hash of the SDL.
    pub fn hash(&self) -> &SchemaHash {
        &self.id.hash
    }

    /// The resolver for `type_name.field_name`, falling back to the interfaces the type
    /// implements.
    pub(crate) fn field_resolver(&self, type_name: &str, field_name: &str) -> Option<&FieldResolver> {
        if let Some(resolver) = self
            .resolvers
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
        {
            return Some(resolver);
        }
        let object = self.definitions.get_object(type_name)?;
        object.implements_interfaces.iter().find_map(|interface| {
            self.resolvers
                .get(interface.name.as_str())
                .and_then(|fields| fields.get(field_name))
        })
    }

    pub(crate) fn type_resolver(&self, abstract_type: &str) -> Option<&Arc<TypeResolverFn>> {
        self.type_resolvers.get(abstract_type)
    }

    pub(crate) fn serializer(&self, scalar: &str) -> Option<&Arc<ScalarSerializerFn>> {
        self.serializers.get(scalar)
    }

    /// Object types an interface or union can resolve to, in schema order.
    pub(crate) fn possible_types(&self, abstract_type: &str) -> &[Name] {
        self.possible_types
            .get(abstract_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn implementers(&self) -> &apollo_compiler::collections::HashMap<Name, Implementers> {
        &self.implementers
    }

    /// Whether a fragment with type condition `type_condition` applies to `object_type`.
    pub(crate) fn fragment_applies(&self, type_condition: &str, object_type: &str) -> bool {
        type_condition == object_type || self.definitions.is_subtype(type_condition, object_type)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("id", &self.id)
            .field("resolvers", &self.resolvers)
            .finish_non_exhaustive()
    }
}

/// Registers resolvers, type resolvers and scalar serializers, then validates everything at
/// once in [`SchemaBuilder::build`].
#[must_use]
pub struct SchemaBuilder {
    sdl: String,
    resolvers: Vec<(String, String, FieldResolver)>,
    type_resolvers: Vec<(String, Arc<TypeResolverFn>)>,
    serializers: Vec<(String, Arc<ScalarSerializerFn>)>,
}

impl SchemaBuilder {
    /// Register a resolver that returns without suspending.
    pub fn resolver<F>(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: F,
    ) -> Self
    where
        F: Fn(&ResolveInfo<'_>) -> Result<ResolvedValue, FieldError> + Send + Sync + 'static,
    {
        let resolver: Arc<SyncResolverFn> = Arc::new(resolver);
        self.resolvers.push((
            type_name.into(),
            field_name.into(),
            FieldResolver::Sync(resolver),
        ));
        self
    }

    /// Register a resolver that may suspend.
    pub fn async_resolver<F>(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: F,
    ) -> Self
    where
        F: for<'a> Fn(ResolveInfo<'a>) -> BoxFuture<'a, Result<ResolvedValue, FieldError>>
            + Send
            + Sync
            + 'static,
    {
        let resolver: Arc<AsyncResolverFn> = Arc::new(resolver);
        self.resolvers.push((
            type_name.into(),
            field_name.into(),
            FieldResolver::Async(resolver),
        ));
        self
    }

    /// Register how values of an interface or union are mapped to their object type.
    ///
    /// Without one, the value's [`ObjectValue::type_name`](resolver::ObjectValue::type_name) or
    /// JSON `__typename` is used.
    pub fn type_resolver<F>(mut self, abstract_type: impl Into<String>, resolver: F) -> Self
    where
        F: for<'a> Fn(SourceValue<'a>) -> Option<String> + Send + Sync + 'static,
    {
        self.type_resolvers
            .push((abstract_type.into(), Arc::new(resolver)));
        self
    }

    /// Register the result serializer of a custom scalar.
    pub fn scalar_serializer<F>(mut self, scalar: impl Into<String>, serializer: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, FieldError> + Send + Sync + 'static,
    {
        self.serializers.push((scalar.into(), Arc::new(serializer)));
        self
    }

    /// Validate the SDL and every registration.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let definitions =
            apollo_compiler::Schema::parse_and_validate(self.sdl.as_str(), "schema.graphql")
                .map_err(|errors| SchemaError::Invalid(errors.into()))?;

        let mut resolvers: HashMap<Name, HashMap<Name, FieldResolver>> = HashMap::new();
        for (type_name, field_name, resolver) in self.resolvers {
            let has_field = match definitions.types.get(type_name.as_str()) {
                Some(ExtendedType::Object(object)) => {
                    object.fields.contains_key(field_name.as_str())
                }
                Some(ExtendedType::Interface(interface)) => {
                    interface.fields.contains_key(field_name.as_str())
                }
                _ => false,
            };
            let (Some(type_key), Some(field_key), true) = (
                known_name(&definitions, &type_name),
                Name::new(&field_name).ok(),
                has_field,
            ) else {
                return Err(SchemaError::UnknownField {
                    type_name,
                    field_name,
                });
            };
            resolvers
                .entry(type_key)
                .or_default()
                .insert(field_key, resolver);
        }

        let mut type_resolvers = HashMap::new();
        for (type_name, resolver) in self.type_resolvers {
            match definitions.types.get(type_name.as_str()) {
                Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                    if let Some(name) = known_name(&definitions, &type_name) {
                        type_resolvers.insert(name, resolver);
                    }
                }
                _ => return Err(SchemaError::NotAbstract(type_name)),
            }
        }

        let mut serializers = HashMap::new();
        for (scalar, serializer) in self.serializers {
            match definitions.types.get(scalar.as_str()) {
                Some(ExtendedType::Scalar(_)) if !BUILT_IN_SCALARS.contains(&scalar.as_str()) => {
                    if let Some(name) = known_name(&definitions, &scalar) {
                        serializers.insert(name, serializer);
                    }
                }
                _ => return Err(SchemaError::NotCustomScalar(scalar)),
            }
        }

        let possible_types = compute_possible_types(&definitions);
        let implementers = definitions.implementers_map();
        let id = SchemaId {
            hash: SchemaHash::new(&self.sdl),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        };
        tracing::debug!(
            schema.id = %id,
            resolvers = resolvers.values().map(HashMap::len).sum::<usize>(),
            "built schema"
        );
        Ok(Schema {
            definitions,
            raw_sdl: Arc::new(self.sdl),
            id,
            resolvers,
            type_resolvers,
            serializers,
            possible_types,
            implementers,
        })
    }
}

fn known_name(definitions: &apollo_compiler::Schema, type_name: &str) -> Option<Name> {
    definitions
        .types
        .get_key_value(type_name)
        .map(|(name, _)| name.clone())
}

fn compute_possible_types(definitions: &apollo_compiler::Schema) -> HashMap<Name, Vec<Name>> {
    let mut possible_types = HashMap::new();
    for (name, ty) in &definitions.types {
        let members = match ty {
            ExtendedType::Union(union_) => union_
                .members
                .iter()
                .map(|member| member.name.clone())
                .collect(),
            ExtendedType::Interface(_) => definitions
                .types
                .iter()
                .filter(|(candidate, candidate_ty)| {
                    candidate_ty.is_object() && definitions.is_subtype(name, candidate)
                })
                .map(|(candidate, _)| candidate.clone())
                .collect(),
            _ => continue,
        };
        possible_types.insert(name.clone(), members);
    }
    possible_types
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    const SDL: &str = r#"
        type Query {
            hero: Character
            search: [SearchResult!]!
        }
        interface Character {
            name: String!
        }
        type Human implements Character {
            name: String!
            height: Float
        }
        type Droid implements Character {
            name: String!
            primaryFunction: String
        }
        union SearchResult = Droid | Human
        scalar Date
    "#;

    #[test]
    fn resolvers_fall_back_to_interfaces() {
        let schema = Schema::builder(SDL)
            .resolver("Character", "name", |_| Ok(ResolvedValue::leaf("anonymous")))
            .resolver("Droid", "name", |_| Ok(ResolvedValue::leaf("R2-D2")))
            .build()
            .unwrap();
        assert!(schema.field_resolver("Droid", "name").is_some());
        assert!(schema.field_resolver("Human", "name").is_some());
        assert!(schema.field_resolver("Human", "height").is_none());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let error = Schema::builder(SDL)
            .resolver("Query", "villain", |_| Ok(ResolvedValue::null()))
            .build()
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "resolver registered for unknown field 'Query.villain'"
        );
    }

    #[test]
    fn type_resolver_requires_abstract_type() {
        let error = Schema::builder(SDL)
            .type_resolver("Human", |_| None)
            .build()
            .unwrap_err();
        assert!(matches!(error, SchemaError::NotAbstract(name) if name == "Human"));
    }

    #[test]
    fn serializer_requires_custom_scalar() {
        assert!(
            Schema::builder(SDL)
                .scalar_serializer("Date", |value| Ok(value.clone()))
                .build()
                .is_ok()
        );
        let error = Schema::builder(SDL)
            .scalar_serializer("Int", |_| Ok(json!(0)))
            .build()
            .unwrap_err();
        assert!(matches!(error, SchemaError::NotCustomScalar(name) if name == "Int"));
    }

    #[test]
    fn possible_types_follow_schema_order() {
        let schema = Schema::parse(SDL).unwrap();
        let names = |abstract_type| {
            schema
                .possible_types(abstract_type)
                .iter()
                .map(Name::as_str)
                .collect::<Vec<_>>()
        };
        assert_eq!(names("SearchResult"), ["Droid", "Human"]);
        assert_eq!(names("Character"), ["Human", "Droid"]);
        assert!(schema.possible_types("Human").is_empty());
        assert!(schema.fragment_applies("Character", "Droid"));
        assert!(!schema.fragment_applies("Droid", "Human"));
    }

    #[test]
    fn identical_sdl_gives_distinct_instances() {
        let first = Schema::parse(SDL).unwrap();
        let second = Schema::parse(SDL).unwrap();
        assert_eq!(first.hash(), second.hash());
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn invalid_sdl_is_reported() {
        let error = Schema::parse("type Query { a: Missing }").unwrap_err();
        assert!(matches!(error, SchemaError::Invalid(_)));
    }
}
