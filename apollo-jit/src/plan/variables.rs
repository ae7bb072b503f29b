//! Operation variables: their declared input types and per-request coercion.

use std::collections::HashMap;
use std::fmt;

use apollo_compiler::Name;
use apollo_compiler::executable::Operation;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;
use indexmap::IndexSet;
use serde_json_bytes::Value;

use super::arguments::ArgumentBinder;
use crate::error::CompilationError;
use crate::graphql::Error;
use crate::graphql::Location;
use crate::json_ext::Object;
use crate::sanitizer::sanitize_identifier;

/// A variable declared by the operation.
pub(crate) struct VariableBinding {
    pub(crate) name: Name,
    pub(crate) shape: InputShape,
    pub(crate) default: Option<Value>,
    pub(crate) location: Option<Location>,
}

/// Precompiled input type of a variable or input object field.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum InputShape {
    NonNull(Box<InputShape>),
    List(Box<InputShape>),
    Scalar(Name),
    Enum(Name),
    /// Fields are looked up by name in [`InputTypes`], which allows recursive input types.
    Object(Name),
}

impl InputShape {
    pub(crate) fn is_non_null(&self) -> bool {
        matches!(self, InputShape::NonNull(_))
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputShape::NonNull(inner) => write!(f, "{inner}!"),
            InputShape::List(item) => write!(f, "[{item}]"),
            InputShape::Scalar(name) | InputShape::Enum(name) | InputShape::Object(name) => {
                f.write_str(name)
            }
        }
    }
}

struct InputFieldShape {
    name: Name,
    shape: InputShape,
    default: Option<Value>,
}

/// Input objects and enums reachable from the variables of one operation.
#[derive(Default)]
pub(crate) struct InputTypes {
    objects: HashMap<Name, Vec<InputFieldShape>>,
    enums: HashMap<Name, IndexSet<Name>>,
}

/// Precompiles the variable definitions of `operation`.
pub(crate) fn bind_variables(
    schema: &apollo_compiler::Schema,
    operation: &Operation,
    sources: &SourceMap,
) -> Result<(Vec<VariableBinding>, InputTypes), CompilationError> {
    let binder = ArgumentBinder::new(schema);
    let mut types = InputTypes::default();
    let mut bindings = Vec::with_capacity(operation.variables.len());
    for definition in &operation.variables {
        sanitize_identifier(&definition.name)?;
        let shape = types.register(schema, &binder, &definition.ty)?;
        let default = definition
            .default_value
            .as_ref()
            .map(|default| binder.literal(&definition.ty, default))
            .transpose()?;
        bindings.push(VariableBinding {
            name: definition.name.clone(),
            shape,
            default,
            location: definition
                .line_column_range(sources)
                .map(|range| range.start.into()),
        });
    }
    Ok((bindings, types))
}

impl InputTypes {
    fn register(
        &mut self,
        schema: &apollo_compiler::Schema,
        binder: &ArgumentBinder<'_>,
        ty: &Type,
    ) -> Result<InputShape, CompilationError> {
        let shape = match ty {
            Type::Named(name) | Type::NonNullNamed(name) => {
                self.register_named(schema, binder, name)?
            }
            Type::List(item) | Type::NonNullList(item) => {
                InputShape::List(Box::new(self.register(schema, binder, item)?))
            }
        };
        Ok(if ty.is_non_null() {
            InputShape::NonNull(Box::new(shape))
        } else {
            shape
        })
    }

    fn register_named(
        &mut self,
        schema: &apollo_compiler::Schema,
        binder: &ArgumentBinder<'_>,
        name: &Name,
    ) -> Result<InputShape, CompilationError> {
        sanitize_identifier(name)?;
        match schema.types.get(name) {
            Some(ExtendedType::Enum(enum_type)) => {
                self.enums
                    .entry(name.clone())
                    .or_insert_with(|| enum_type.values.keys().cloned().collect());
                Ok(InputShape::Enum(name.clone()))
            }
            Some(ExtendedType::InputObject(input_object)) => {
                if !self.objects.contains_key(name) {
                    // Registered before its fields so self references terminate
                    self.objects.insert(name.clone(), Vec::new());
                    let mut fields = Vec::with_capacity(input_object.fields.len());
                    for (field_name, field) in &input_object.fields {
                        sanitize_identifier(field_name)?;
                        fields.push(InputFieldShape {
                            name: field_name.clone(),
                            shape: self.register(schema, binder, &field.ty)?,
                            default: field
                                .default_value
                                .as_ref()
                                .map(|default| binder.literal(&field.ty, default))
                                .transpose()?,
                        });
                    }
                    self.objects.insert(name.clone(), fields);
                }
                Ok(InputShape::Object(name.clone()))
            }
            _ => Ok(InputShape::Scalar(name.clone())),
        }
    }

    /// Input coercion of one provided value; the error is the reason the value was rejected.
    fn coerce(&self, shape: &InputShape, value: &Value) -> Result<Value, String> {
        match shape {
            InputShape::NonNull(inner) => {
                if value.is_null() {
                    Err(format!(
                        "Expected non-nullable type \"{shape}\" not to be null."
                    ))
                } else {
                    self.coerce(inner, value)
                }
            }
            _ if value.is_null() => Ok(Value::Null),
            InputShape::List(item) => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|value| self.coerce(item, value))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Ok(Value::Array(vec![self.coerce(item, value)?])),
            },
            InputShape::Scalar(name) => coerce_scalar(name, value),
            InputShape::Enum(name) => match value.as_str() {
                Some(member)
                    if self
                        .enums
                        .get(name)
                        .is_some_and(|values| values.contains(member)) =>
                {
                    Ok(value.clone())
                }
                _ => Err(format!("Value does not exist in \"{name}\" enum.")),
            },
            InputShape::Object(name) => {
                let Some(provided) = value.as_object() else {
                    return Err(format!("Expected type \"{name}\" to be an object."));
                };
                let fields = self
                    .objects
                    .get(name)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                if let Some(unknown) = provided
                    .keys()
                    .find(|key| !fields.iter().any(|field| field.name.as_str() == key.as_str()))
                {
                    return Err(format!(
                        "Field \"{}\" is not defined by type \"{name}\".",
                        unknown.as_str()
                    ));
                }
                let mut coerced = Object::with_capacity(fields.len());
                for field in fields {
                    match provided.get(field.name.as_str()) {
                        Some(value) => {
                            coerced
                                .insert(field.name.as_str(), self.coerce(&field.shape, value)?);
                        }
                        None => match &field.default {
                            Some(default) => {
                                coerced.insert(field.name.as_str(), default.clone());
                            }
                            None if field.shape.is_non_null() => {
                                return Err(format!(
                                    "Field \"{}\" of required type \"{}\" was not provided.",
                                    field.name, field.shape
                                ));
                            }
                            None => {}
                        },
                    }
                }
                Ok(Value::Object(coerced))
            }
        }
    }
}

fn coerce_scalar(name: &str, value: &Value) -> Result<Value, String> {
    match name {
        "Int" => {
            let int = value
                .as_i64()
                .or_else(|| {
                    value
                        .as_f64()
                        .filter(|float| float.fract() == 0.0)
                        .map(|float| float as i64)
                })
                .ok_or_else(|| format!("Int cannot represent non-integer value: {value}"))?;
            if i32::try_from(int).is_err() {
                return Err(format!(
                    "Int cannot represent non 32-bit signed integer value: {value}"
                ));
            }
            Ok(Value::Number(int.into()))
        }
        "Float" => value
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("Float cannot represent non numeric value: {value}")),
        "String" => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(format!("String cannot represent a non string value: {value}")),
        },
        "Boolean" => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        },
        "ID" => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Ok(Value::String(number.to_string().into()))
            }
            _ => Err(format!("ID cannot represent value: {value}")),
        },
        // Custom scalars accept any JSON value
        _ => Ok(value.clone()),
    }
}

/// Coerces the variables of a request. Every invalid variable is reported.
pub(crate) fn coerce_variables(
    bindings: &[VariableBinding],
    types: &InputTypes,
    provided: &Object,
) -> Result<Object, Vec<Error>> {
    let mut coerced = Object::with_capacity(bindings.len());
    let mut errors = Vec::new();
    for binding in bindings {
        let name = binding.name.as_str();
        let message = match provided.get(name) {
            None => match &binding.default {
                Some(default) => {
                    coerced.insert(name, default.clone());
                    continue;
                }
                None if binding.shape.is_non_null() => format!(
                    "Variable \"${name}\" of required type \"{}\" was not provided.",
                    binding.shape
                ),
                None => continue,
            },
            Some(Value::Null) if binding.shape.is_non_null() => format!(
                "Variable \"${name}\" of non-null type \"{}\" must not be null.",
                binding.shape
            ),
            Some(value) => match types.coerce(&binding.shape, value) {
                Ok(value) => {
                    coerced.insert(name, value);
                    continue;
                }
                Err(reason) => {
                    format!("Variable \"${name}\" got invalid value {value}; {reason}")
                }
            },
        };
        errors.push(
            Error::builder()
                .message(message)
                .locations(binding.location.into_iter().collect::<Vec<_>>())
                .build(),
        );
    }
    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    const SDL: &str = r#"
        type Query {
            search(filter: Filter, limit: Int, id: ID): [String]
        }
        input Filter {
            term: String!
            kind: Kind = BOOK
            and: [Filter!]
        }
        enum Kind { BOOK MOVIE }
    "#;

    fn coerce(query: &str, variables: serde_json_bytes::Value) -> Result<Object, Vec<Error>> {
        let schema = apollo_compiler::Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
        let document =
            ExecutableDocument::parse_and_validate(&schema, query, "query.graphql").unwrap();
        let operation = document.operations.get(None).unwrap();
        let (bindings, types) = bind_variables(&schema, operation, &document.sources).unwrap();
        coerce_variables(&bindings, &types, variables.as_object().unwrap())
    }

    fn messages(errors: Vec<Error>) -> Vec<String> {
        errors.into_iter().map(|error| error.message).collect()
    }

    #[test]
    fn recursive_input_objects_are_coerced() {
        let coerced = coerce(
            "query($filter: Filter) { search(filter: $filter) }",
            json!({"filter": {"term": "dune", "and": {"term": "herbert", "kind": "MOVIE"}}}),
        )
        .unwrap();
        assert_eq!(
            Value::Object(coerced),
            json!({"filter": {
                "term": "dune",
                "kind": "BOOK",
                "and": [{"term": "herbert", "kind": "MOVIE"}],
            }})
        );
    }

    #[test]
    fn defaults_and_ids() {
        let coerced = coerce(
            "query($limit: Int = 5, $id: ID) { search(limit: $limit, id: $id) }",
            json!({"id": 7}),
        )
        .unwrap();
        assert_eq!(Value::Object(coerced), json!({"limit": 5, "id": "7"}));
    }

    #[test]
    fn every_invalid_variable_is_reported() {
        let errors = coerce(
            "query($filter: Filter!, $limit: Int, $id: ID) { search(filter: $filter, limit: $limit, id: $id) }",
            json!({"limit": 4294967296_i64, "id": true}),
        )
        .unwrap_err();
        assert_eq!(
            messages(errors),
            [
                "Variable \"$filter\" of required type \"Filter!\" was not provided.",
                "Variable \"$limit\" got invalid value 4294967296; Int cannot represent non 32-bit signed integer value: 4294967296",
                "Variable \"$id\" got invalid value true; ID cannot represent value: true",
            ]
        );
    }

    #[test]
    fn input_object_errors() {
        let query = "query($filter: Filter) { search(filter: $filter) }";
        assert_eq!(
            messages(coerce(query, json!({"filter": {"term": "a", "year": 1965}})).unwrap_err()),
            ["Variable \"$filter\" got invalid value {\"term\":\"a\",\"year\":1965}; Field \"year\" is not defined by type \"Filter\"."]
        );
        assert_eq!(
            messages(coerce(query, json!({"filter": {"kind": "BOOK"}})).unwrap_err()),
            ["Variable \"$filter\" got invalid value {\"kind\":\"BOOK\"}; Field \"term\" of required type \"String!\" was not provided."]
        );
        assert_eq!(
            messages(coerce(query, json!({"filter": {"term": "a", "kind": "SONG"}})).unwrap_err()),
            ["Variable \"$filter\" got invalid value {\"term\":\"a\",\"kind\":\"SONG\"}; Value does not exist in \"Kind\" enum."]
        );
    }

    #[test]
    fn explicit_null_for_non_null_variable() {
        let errors = coerce(
            "query($filter: Filter!) { search(filter: $filter) }",
            json!({"filter": null}),
        )
        .unwrap_err();
        assert_eq!(
            messages(errors),
            ["Variable \"$filter\" of non-null type \"Filter!\" must not be null."]
        );
    }

    #[test]
    fn shapes_display_like_graphql_types() {
        let shape = InputShape::NonNull(Box::new(InputShape::List(Box::new(
            InputShape::NonNull(Box::new(InputShape::Scalar(Name::new("ID").unwrap()))),
        ))));
        assert_eq!(shape.to_string(), "[ID!]!");
    }
}
