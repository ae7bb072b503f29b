//! Builds a [`Plan`] from a validated operation.
//!
//! Field collection follows the `CollectFields` algorithm of the GraphQL specification: fields
//! sharing a response key are merged, fragments are expanded when their type condition applies
//! to the concrete parent type, and `@skip`/`@include` conditions accumulate along the way.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::introspection;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;

use super::AbstractDispatchTable;
use super::Children;
use super::ConditionSet;
use super::ExecutionNode;
use super::Inclusion;
use super::Introspection;
use super::LeafKind;
use super::OperationKind;
use super::Plan;
use super::RECURSION_LIMIT;
use super::Resolution;
use super::Shape;
use super::ShapeKind;
use super::arguments::ArgumentBinder;
use super::arguments::Arguments;
use super::directives::fold_conditions;
use super::variables::bind_variables;
use crate::error::CompilationError;
use crate::json_ext::Object;
use crate::sanitizer::sanitize_enum_value;
use crate::sanitizer::sanitize_identifier;
use crate::schema::Schema;

/// One occurrence of a response key in a selection set, with the conditions under which it
/// was selected.
struct FieldOccurrence<'a> {
    field: &'a Node<Field>,
    conditions: ConditionSet,
}

pub(crate) struct PlanBuilder<'a> {
    schema: &'a Schema,
    document: &'a Valid<ExecutableDocument>,
    binder: ArgumentBinder<'a>,
}

impl<'a> PlanBuilder<'a> {
    pub(crate) fn new(schema: &'a Schema, document: &'a Valid<ExecutableDocument>) -> Self {
        Self {
            schema,
            document,
            binder: ArgumentBinder::new(&schema.definitions),
        }
    }

    pub(crate) fn build(&self, operation: &'a Node<Operation>) -> Result<Plan, CompilationError> {
        let kind = match operation.operation_type {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => {
                return Err(CompilationError::UnsupportedOperation {
                    kind: "subscription".to_string(),
                });
            }
        };
        if let Some(name) = &operation.name {
            sanitize_identifier(name)?;
        }
        let root_type = operation.selection_set.ty.clone();
        sanitize_identifier(&root_type)?;

        let (variables, input_types) =
            bind_variables(&self.schema.definitions, operation, &self.document.sources)?;
        let selection =
            self.build_selection(&root_type, &[(&operation.selection_set, Vec::new())], 0)?;
        let is_async = selection.iter().any(|node| node.is_async);
        let introspection = if selection
            .iter()
            .any(|node| matches!(node.resolution, Resolution::Introspection))
        {
            introspection::check_max_depth(self.document, operation)
                .map_err(|error| CompilationError::Introspection(error.message().to_string()))?;
            Some(Introspection {
                document: self.document.clone(),
                operation: operation.clone(),
            })
        } else {
            None
        };

        Ok(Plan {
            kind,
            operation_name: operation.name.as_ref().map(|name| name.to_string()),
            root_type,
            selection,
            variables,
            input_types,
            introspection,
            is_async,
        })
    }

    /// Collects and compiles the fields of `selection_sets` for one concrete object type.
    fn build_selection(
        &self,
        object_type: &Name,
        selection_sets: &[(&'a SelectionSet, ConditionSet)],
        depth: usize,
    ) -> Result<Vec<ExecutionNode>, CompilationError> {
        let mut fields = IndexMap::new();
        for (selection_set, conditions) in selection_sets {
            self.collect_fields(object_type, *selection_set, conditions, depth, &mut fields)?;
        }
        fields
            .into_iter()
            .map(|(response_key, occurrences)| {
                self.build_node(object_type, &response_key, occurrences, depth)
            })
            .collect()
    }

    fn collect_fields(
        &self,
        object_type: &Name,
        selection_set: &'a SelectionSet,
        conditions: &ConditionSet,
        depth: usize,
        fields: &mut IndexMap<Name, Vec<FieldOccurrence<'a>>>,
    ) -> Result<(), CompilationError> {
        if depth > RECURSION_LIMIT {
            return Err(CompilationError::RecursionLimitExceeded {
                limit: RECURSION_LIMIT,
            });
        }
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    let Some(conditions) = fold_conditions(&field.directives, conditions)? else {
                        continue;
                    };
                    fields
                        .entry(field.response_key().clone())
                        .or_default()
                        .push(FieldOccurrence { field, conditions });
                }
                Selection::FragmentSpread(spread) => {
                    sanitize_identifier(&spread.fragment_name)?;
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name) else {
                        continue;
                    };
                    if !self
                        .schema
                        .fragment_applies(fragment.type_condition(), object_type)
                    {
                        continue;
                    }
                    let Some(conditions) = fold_conditions(&spread.directives, conditions)? else {
                        continue;
                    };
                    self.collect_fields(
                        object_type,
                        &fragment.selection_set,
                        &conditions,
                        depth + 1,
                        fields,
                    )?;
                }
                Selection::InlineFragment(inline) => {
                    if let Some(type_condition) = &inline.type_condition {
                        if !self.schema.fragment_applies(type_condition, object_type) {
                            continue;
                        }
                    }
                    let Some(conditions) = fold_conditions(&inline.directives, conditions)? else {
                        continue;
                    };
                    self.collect_fields(
                        object_type,
                        &inline.selection_set,
                        &conditions,
                        depth + 1,
                        fields,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn build_node(
        &self,
        object_type: &Name,
        response_key: &Name,
        occurrences: Vec<FieldOccurrence<'a>>,
        depth: usize,
    ) -> Result<ExecutionNode, CompilationError> {
        let Some(field) = occurrences.first().map(|occurrence| occurrence.field) else {
            return Err(CompilationError::Internal(format!(
                "no selection for response key '{response_key}'"
            )));
        };
        sanitize_identifier(response_key)?;
        sanitize_identifier(&field.name)?;
        sanitize_identifier(object_type)?;

        let mut condition_sets: Vec<ConditionSet> = Vec::new();
        for occurrence in &occurrences {
            if !condition_sets.contains(&occurrence.conditions) {
                condition_sets.push(occurrence.conditions.clone());
            }
        }
        let inclusion = if condition_sets.iter().any(Vec::is_empty) {
            Inclusion::Always
        } else {
            Inclusion::Conditional(condition_sets.clone())
        };
        let location = field
            .line_column_range(&self.document.sources)
            .map(|range| range.start.into());

        match field.name.as_str() {
            "__typename" => {
                return Ok(ExecutionNode {
                    response_key: ByteString::from(response_key.as_str()),
                    field_name: field.name.clone(),
                    parent_type: object_type.clone(),
                    shape: Shape {
                        nullable: false,
                        kind: ShapeKind::Leaf(LeafKind::String),
                    },
                    resolution: Resolution::Typename,
                    children: Children::None,
                    inclusion,
                    arguments: Arguments::Static(Object::new()),
                    location,
                    is_async: false,
                    children_async: false,
                });
            }
            "__schema" | "__type" => {
                // Arguments and sub-selections are evaluated by apollo-compiler
                let ty = &field.definition.ty;
                return Ok(ExecutionNode {
                    response_key: ByteString::from(response_key.as_str()),
                    field_name: field.name.clone(),
                    parent_type: object_type.clone(),
                    shape: Shape {
                        nullable: !ty.is_non_null(),
                        kind: ShapeKind::Composite(ty.inner_named_type().clone()),
                    },
                    resolution: Resolution::Introspection,
                    children: Children::None,
                    inclusion,
                    arguments: Arguments::Static(Object::new()),
                    location,
                    is_async: false,
                    children_async: false,
                });
            }
            _ => {}
        }

        // Interface fields may be narrowed by the implementing type
        let definition: &FieldDefinition = match self
            .schema
            .definitions
            .type_field(object_type, &field.name)
        {
            Ok(definition) => definition,
            Err(_) => &field.definition,
        };
        let resolution = match self.schema.field_resolver(object_type, &field.name) {
            Some(resolver) => Resolution::Resolver(resolver.clone()),
            None => Resolution::Property,
        };
        let arguments = self.binder.bind(&definition.arguments, &field.arguments)?;
        let shape = self.shape(&definition.ty)?;

        // A single condition set is already checked on this field
        let sub_selections: Vec<_> = occurrences
            .iter()
            .map(|occurrence| {
                let conditions = if condition_sets.len() > 1 {
                    occurrence.conditions.clone()
                } else {
                    Vec::new()
                };
                (&occurrence.field.selection_set, conditions)
            })
            .collect();
        let named_type = definition.ty.inner_named_type();
        let children = match self.schema.definitions.types.get(named_type) {
            Some(ExtendedType::Object(_)) => Children::Object(self.build_selection(
                named_type,
                &sub_selections,
                depth + 1,
            )?),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => Children::Abstract(
                self.dispatch_table(named_type, &sub_selections, depth + 1)?,
            ),
            _ => Children::None,
        };

        let children_async = children.nodes().any(|node| node.is_async);
        let is_async = children_async
            || matches!(&resolution, Resolution::Resolver(resolver) if resolver.is_async());
        Ok(ExecutionNode {
            response_key: ByteString::from(response_key.as_str()),
            field_name: field.name.clone(),
            parent_type: object_type.clone(),
            shape,
            resolution,
            children,
            inclusion,
            arguments,
            location,
            is_async,
            children_async,
        })
    }

    fn dispatch_table(
        &self,
        abstract_type: &Name,
        selection_sets: &[(&'a SelectionSet, ConditionSet)],
        depth: usize,
    ) -> Result<AbstractDispatchTable, CompilationError> {
        sanitize_identifier(abstract_type)?;
        let mut by_type = IndexMap::new();
        for object_type in self.schema.possible_types(abstract_type) {
            sanitize_identifier(object_type)?;
            by_type.insert(
                object_type.clone(),
                self.build_selection(object_type, selection_sets, depth)?,
            );
        }
        Ok(AbstractDispatchTable {
            abstract_type: abstract_type.clone(),
            type_resolver: self.schema.type_resolver(abstract_type).cloned(),
            by_type,
        })
    }

    fn shape(&self, ty: &Type) -> Result<Shape, CompilationError> {
        let kind = match ty {
            Type::List(item) | Type::NonNullList(item) => {
                ShapeKind::List(Box::new(self.shape(item)?))
            }
            Type::Named(name) | Type::NonNullNamed(name) => {
                sanitize_identifier(name)?;
                match self.schema.definitions.types.get(name) {
                    Some(ExtendedType::Scalar(_)) => ShapeKind::Leaf(match name.as_str() {
                        "Int" => LeafKind::Int,
                        "Float" => LeafKind::Float,
                        "String" => LeafKind::String,
                        "Boolean" => LeafKind::Boolean,
                        "ID" => LeafKind::Id,
                        _ => LeafKind::Custom {
                            name: name.clone(),
                            serializer: self.schema.serializer(name).cloned(),
                        },
                    }),
                    Some(ExtendedType::Enum(enum_type)) => {
                        for value in enum_type.values.keys() {
                            sanitize_enum_value(value)?;
                        }
                        ShapeKind::Leaf(LeafKind::Enum {
                            name: name.clone(),
                            values: enum_type.values.keys().cloned().collect(),
                        })
                    }
                    Some(_) => ShapeKind::Composite(name.clone()),
                    None => {
                        return Err(CompilationError::Internal(format!(
                            "unknown type '{name}'"
                        )));
                    }
                }
            }
        };
        Ok(Shape {
            nullable: !ty.is_non_null(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::plan::Condition;
    use crate::schema::resolver::ResolvedValue;

    const SDL: &str = r#"
        type Query {
            hero: Character
            items: [Item!]!
            thing(id: ID!): Thing
        }
        type Mutation {
            rename(name: String!): Thing
        }
        type Subscription {
            ticks: Int
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
        type Item {
            id: ID!
            name: String
            price: Float
        }
        type Thing {
            a: String
            b: String
            kind: Kind
        }
        enum Kind { PLAIN SHINY }
    "#;

    fn schema() -> Schema {
        Schema::builder(SDL)
            .async_resolver("Query", "items", |_| {
                Box::pin(async { Ok(ResolvedValue::list([])) })
            })
            .build()
            .unwrap()
    }

    fn build(schema: &Schema, query: &str) -> Result<Plan, CompilationError> {
        let document =
            ExecutableDocument::parse_and_validate(&schema.definitions, query, "query.graphql")
                .unwrap();
        let operation = document.operations.get(None).unwrap();
        PlanBuilder::new(schema, &document).build(operation)
    }

    fn keys(nodes: &[ExecutionNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.response_key.as_str()).collect()
    }

    fn object_children(node: &ExecutionNode) -> &[ExecutionNode] {
        match &node.children {
            Children::Object(nodes) => nodes,
            _ => panic!("expected object children on {}", node.field_name),
        }
    }

    #[test]
    fn fields_and_fragments_are_merged() {
        let schema = schema();
        let plan = build(
            &schema,
            "{ items { name } items { id ...F } } fragment F on Item { name price }",
        )
        .unwrap();
        assert_eq!(keys(&plan.selection), ["items"]);
        let items = &plan.selection[0];
        assert_eq!(keys(object_children(items)), ["name", "id", "price"]);
        assert_eq!(items.shape.to_string(), "[Item!]!");
        assert!(items.is_async);
        assert!(!items.children_async);
        assert!(plan.is_async);
    }

    #[test]
    fn abstract_fields_dispatch_per_possible_type() {
        let schema = schema();
        let plan = build(
            &schema,
            "{ hero { name ... on Droid { primaryFunction } __typename } }",
        )
        .unwrap();
        let Children::Abstract(table) = &plan.selection[0].children else {
            panic!("expected a dispatch table");
        };
        assert_eq!(table.abstract_type.as_str(), "Character");
        assert_eq!(
            table.by_type.keys().map(Name::as_str).collect::<Vec<_>>(),
            ["Human", "Droid"]
        );
        assert_eq!(keys(&table.by_type["Human"]), ["name", "__typename"]);
        assert_eq!(
            keys(&table.by_type["Droid"]),
            ["name", "primaryFunction", "__typename"]
        );
        assert!(matches!(
            table.by_type["Droid"][2].resolution,
            Resolution::Typename
        ));
        assert_eq!(table.by_type["Droid"][2].parent_type.as_str(), "Droid");
        assert!(!plan.is_async);
    }

    #[test]
    fn literal_conditions_are_folded() {
        let schema = schema();
        let plan = build(
            &schema,
            "{ thing(id: 1) { a @skip(if: true) b @include(if: true) } }",
        )
        .unwrap();
        let thing = &plan.selection[0];
        assert_eq!(keys(object_children(thing)), ["b"]);
        assert_eq!(object_children(thing)[0].inclusion, Inclusion::Always);
    }

    #[test]
    fn sub_selections_keep_their_occurrence_conditions() {
        let schema = schema();
        let plan = build(
            &schema,
            "query($x: Boolean!) { thing(id: 1) @include(if: $x) { a } thing(id: 1) { b } }",
        )
        .unwrap();
        let thing = &plan.selection[0];
        assert_eq!(thing.inclusion, Inclusion::Always);
        let children = object_children(thing);
        assert_eq!(
            children[0].inclusion,
            Inclusion::Conditional(vec![vec![Condition::Include(Name::new("x").unwrap())]])
        );
        assert_eq!(children[1].inclusion, Inclusion::Always);

        let plan = build(
            &schema,
            "query($x: Boolean!) { thing(id: 1) @include(if: $x) { a } }",
        )
        .unwrap();
        assert_eq!(object_children(&plan.selection[0])[0].inclusion, Inclusion::Always);
    }

    #[test]
    fn output_enums_are_leaves() {
        let schema = schema();
        let plan = build(&schema, "{ thing(id: 1) { kind } }").unwrap();
        let kind = &object_children(&plan.selection[0])[0];
        assert!(matches!(
            &kind.shape.kind,
            ShapeKind::Leaf(LeafKind::Enum { values, .. }) if values.len() == 2
        ));
    }

    #[test]
    fn mutations_use_the_mutation_root() {
        let schema = schema();
        let plan = build(&schema, "mutation Rename { rename(name: \"x\") { a } }").unwrap();
        assert_eq!(plan.kind, OperationKind::Mutation);
        assert_eq!(plan.root_type.as_str(), "Mutation");
        assert_eq!(plan.operation_name.as_deref(), Some("Rename"));
    }

    #[test]
    fn declined_operations() {
        let schema = schema();
        assert!(matches!(
            build(&schema, "subscription { ticks }"),
            Err(CompilationError::UnsupportedOperation { kind }) if kind == "subscription"
        ));
    }

    #[test]
    fn introspection_root_fields_keep_the_document() {
        let schema = schema();
        let plan = build(
            &schema,
            "{ __schema { queryType { name } } kind: __type(name: \"Kind\") { name } items { id } }",
        )
        .unwrap();
        let resolutions: Vec<_> = plan
            .selection
            .iter()
            .map(|node| {
                (
                    node.response_key.as_str(),
                    matches!(node.resolution, Resolution::Introspection),
                    node.shape.nullable,
                )
            })
            .collect();
        assert_eq!(
            resolutions,
            [("__schema", true, false), ("kind", true, true), ("items", false, false)]
        );
        assert!(plan.introspection.is_some());
        assert!(build(&schema, "{ items { id } }").unwrap().introspection.is_none());
    }

    #[test]
    fn keyword_like_names_compile() {
        let schema = schema();
        let plan = build(&schema, "{ thing(id: 1) { match: a type: b } }").unwrap();
        assert_eq!(keys(object_children(&plan.selection[0])), ["match", "type"]);
    }
}
