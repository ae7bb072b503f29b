//! Field argument bindings.
//!
//! Literal arguments are coerced once at compile time. Arguments that reference variables are
//! kept as a small tree of bindings, resolved against the coerced variables of each request.

use std::borrow::Cow;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::InputValueDefinition;
use apollo_compiler::schema::Type;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::error::CompilationError;
use crate::json_ext::Object;
use crate::sanitizer::sanitize_enum_value;
use crate::sanitizer::sanitize_identifier;

pub(crate) enum Arguments {
    Static(Object),
    Dynamic(Vec<ArgumentBinding>),
}

pub(crate) struct ArgumentBinding {
    pub(crate) name: ByteString,
    pub(crate) value: ValueBinding,
    /// Used when `value` is a variable the request did not provide.
    pub(crate) default: Option<Value>,
}

pub(crate) enum ValueBinding {
    Constant(Value),
    Variable(Name),
    List(Vec<ValueBinding>),
    Object(Vec<ArgumentBinding>),
}

impl Arguments {
    pub(crate) fn resolve(&self, variables: &Object) -> Cow<'_, Object> {
        match self {
            Arguments::Static(arguments) => Cow::Borrowed(arguments),
            Arguments::Dynamic(bindings) => Cow::Owned(resolve_bindings(bindings, variables)),
        }
    }

    /// How each argument is supplied.
    pub(crate) fn sources(&self) -> Vec<(&str, ArgumentSource<'_>)> {
        match self {
            Arguments::Static(arguments) => arguments
                .keys()
                .map(|key| (key.as_str(), ArgumentSource::Constant))
                .collect(),
            Arguments::Dynamic(bindings) => bindings
                .iter()
                .map(|binding| {
                    let source = match &binding.value {
                        ValueBinding::Constant(_) => ArgumentSource::Constant,
                        ValueBinding::Variable(name) => ArgumentSource::Variable(name),
                        ValueBinding::List(_) | ValueBinding::Object(_) => ArgumentSource::Input,
                    };
                    (binding.name.as_str(), source)
                })
                .collect(),
        }
    }
}

pub(crate) enum ArgumentSource<'a> {
    Constant,
    Variable(&'a Name),
    /// A list or input object literal with variables inside.
    Input,
}

fn resolve_bindings(bindings: &[ArgumentBinding], variables: &Object) -> Object {
    let mut object = Object::with_capacity(bindings.len());
    for binding in bindings {
        match binding.value.resolve(variables) {
            Some(value) => {
                object.insert(binding.name.clone(), value);
            }
            None => {
                if let Some(default) = &binding.default {
                    object.insert(binding.name.clone(), default.clone());
                }
            }
        }
    }
    object
}

impl ValueBinding {
    /// `None` when the value is an absent variable.
    fn resolve(&self, variables: &Object) -> Option<Value> {
        match self {
            ValueBinding::Constant(value) => Some(value.clone()),
            ValueBinding::Variable(name) => variables.get(name.as_str()).cloned(),
            ValueBinding::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            ValueBinding::Object(fields) => Some(Value::Object(resolve_bindings(fields, variables))),
        }
    }

    fn constant(&self) -> Option<&Value> {
        match self {
            ValueBinding::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Collapses lists and objects without variables into a single constant.
    fn fold(self) -> Self {
        match self {
            ValueBinding::List(items) if items.iter().all(|item| item.constant().is_some()) => {
                ValueBinding::Constant(Value::Array(
                    items
                        .into_iter()
                        .filter_map(|item| match item {
                            ValueBinding::Constant(value) => Some(value),
                            _ => None,
                        })
                        .collect(),
                ))
            }
            ValueBinding::Object(fields)
                if fields.iter().all(|field| field.value.constant().is_some()) =>
            {
                ValueBinding::Constant(Value::Object(
                    fields
                        .into_iter()
                        .filter_map(|field| match field.value {
                            ValueBinding::Constant(value) => Some((field.name, value)),
                            _ => None,
                        })
                        .collect(),
                ))
            }
            other => other,
        }
    }
}

/// Coerces argument literals against their input types.
pub(crate) struct ArgumentBinder<'s> {
    schema: &'s apollo_compiler::Schema,
}

impl<'s> ArgumentBinder<'s> {
    pub(crate) fn new(schema: &'s apollo_compiler::Schema) -> Self {
        Self { schema }
    }

    /// Binds the provided arguments of a field, filling in defaults of omitted ones.
    pub(crate) fn bind(
        &self,
        definitions: &[Node<InputValueDefinition>],
        provided: &[Node<ast::Argument>],
    ) -> Result<Arguments, CompilationError> {
        let bindings = self.bind_fields(
            definitions
                .iter()
                .map(|definition| (&definition.name, &**definition)),
            |name| {
                provided
                    .iter()
                    .find(|argument| argument.name == *name)
                    .map(|argument| &*argument.value)
            },
        )?;
        Ok(match ValueBinding::Object(bindings).fold() {
            ValueBinding::Constant(Value::Object(arguments)) => Arguments::Static(arguments),
            ValueBinding::Object(bindings) => Arguments::Dynamic(bindings),
            _ => Arguments::Static(Object::new()),
        })
    }

    fn bind_fields<'d>(
        &self,
        definitions: impl Iterator<Item = (&'d Name, &'d InputValueDefinition)>,
        provided: impl Fn(&Name) -> Option<&'d ast::Value>,
    ) -> Result<Vec<ArgumentBinding>, CompilationError> {
        let mut bindings = Vec::new();
        for (name, definition) in definitions {
            let value = provided(name);
            // Declared but unused arguments never reach the plan
            if value.is_none() && definition.default_value.is_none() {
                continue;
            }
            sanitize_identifier(name)?;
            let default = definition
                .default_value
                .as_ref()
                .map(|default| self.literal(&definition.ty, default))
                .transpose()?;
            match value {
                Some(value) => bindings.push(ArgumentBinding {
                    name: ByteString::from(name.as_str()),
                    value: self.bind_value(&definition.ty, value)?,
                    default,
                }),
                None => {
                    if let Some(default) = default {
                        bindings.push(ArgumentBinding {
                            name: ByteString::from(name.as_str()),
                            value: ValueBinding::Constant(default),
                            default: None,
                        });
                    }
                }
            }
        }
        Ok(bindings)
    }

    /// Coerces a literal that cannot contain variables, such as a default value.
    pub(crate) fn literal(&self, ty: &Type, value: &ast::Value) -> Result<Value, CompilationError> {
        match self.bind_value(ty, value)? {
            ValueBinding::Constant(value) => Ok(value),
            _ => Err(CompilationError::Internal(
                "variable reference in a constant value".to_string(),
            )),
        }
    }

    fn bind_value(&self, ty: &Type, value: &ast::Value) -> Result<ValueBinding, CompilationError> {
        let binding = match value {
            ast::Value::Variable(name) => {
                sanitize_identifier(name)?;
                ValueBinding::Variable(name.clone())
            }
            ast::Value::Null => ValueBinding::Constant(Value::Null),
            ast::Value::List(items) => ValueBinding::List(
                items
                    .iter()
                    .map(|item| self.bind_value(ty.item_type(), item))
                    .collect::<Result<_, _>>()?,
            ),
            // Input coercion wraps a single value into a list
            _ if ty.is_list() => {
                ValueBinding::List(vec![self.bind_value(ty.item_type(), value)?])
            }
            ast::Value::Object(fields) => match self.schema.types.get(ty.inner_named_type()) {
                Some(ExtendedType::InputObject(input_object)) => {
                    ValueBinding::Object(self.bind_fields(
                        input_object.fields.iter().map(input_field),
                        |name| {
                            fields
                                .iter()
                                .find(|(field_name, _)| field_name == name)
                                .map(|(_, value)| &**value)
                        },
                    )?)
                }
                // A custom scalar spelled as an object literal
                _ => ValueBinding::Object(
                    fields
                        .iter()
                        .map(|(name, value)| {
                            Ok(ArgumentBinding {
                                name: ByteString::from(name.as_str()),
                                value: self.bind_value(ty, value)?,
                                default: None,
                            })
                        })
                        .collect::<Result<_, CompilationError>>()?,
                ),
            },
            ast::Value::Enum(name) => {
                sanitize_enum_value(name)?;
                ValueBinding::Constant(Value::String(name.as_str().into()))
            }
            ast::Value::String(string) => ValueBinding::Constant(Value::String(string.as_str().into())),
            ast::Value::Boolean(boolean) => ValueBinding::Constant(Value::Bool(*boolean)),
            ast::Value::Int(int) => ValueBinding::Constant(match ty.inner_named_type().as_str() {
                "Float" => float(int.try_to_f64().ok()),
                "ID" => Value::String(int.as_str().into()),
                _ => match int.as_str().parse::<i64>() {
                    Ok(int) => Value::Number(int.into()),
                    Err(_) => float(int.try_to_f64().ok()),
                },
            }),
            ast::Value::Float(value) => ValueBinding::Constant(float(value.try_to_f64().ok())),
        };
        Ok(binding.fold())
    }
}

fn input_field<'d>(
    (name, definition): (&'d Name, &'d Component<InputValueDefinition>),
) -> (&'d Name, &'d InputValueDefinition) {
    (name, definition)
}

fn float(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::executable::Selection;
    use serde_json_bytes::json;

    use super::*;
    use crate::sanitizer::SanitizeError;

    const SDL: &str = r#"
        type Query {
            items(first: Int = 10, filter: Filter, ids: [ID!], ratio: Float): [String]
        }
        input Filter {
            name: String
            kind: Kind = BOOK
        }
        enum Kind { BOOK MOVIE }
    "#;

    fn bind(query: &str) -> Arguments {
        let schema = apollo_compiler::Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
        let document =
            ExecutableDocument::parse_and_validate(&schema, query, "query.graphql").unwrap();
        let operation = document.operations.get(None).unwrap();
        let Selection::Field(field) = &operation.selection_set.selections[0] else {
            panic!("expected a field");
        };
        ArgumentBinder::new(&schema)
            .bind(&field.definition.arguments, &field.arguments)
            .unwrap()
    }

    #[test]
    fn literals_are_coerced_at_compile_time() {
        let Arguments::Static(arguments) =
            bind(r#"{ items(filter: { name: "dune" }, ids: 7, ratio: 1) }"#)
        else {
            panic!("expected static arguments");
        };
        assert_eq!(
            Value::Object(arguments),
            json!({
                "first": 10,
                "filter": {"name": "dune", "kind": "BOOK"},
                "ids": ["7"],
                "ratio": 1.0,
            })
        );
    }

    #[test]
    fn variables_are_resolved_per_request() {
        let arguments = bind(
            r#"query($first: Int, $name: String) { items(first: $first, filter: { name: $name }) }"#,
        );
        assert!(matches!(arguments, Arguments::Dynamic(_)));

        let variables = json!({"first": 3, "name": "dune"});
        assert_eq!(
            Value::Object(arguments.resolve(variables.as_object().unwrap()).into_owned()),
            json!({"first": 3, "filter": {"name": "dune", "kind": "BOOK"}})
        );

        // Absent variables fall back to the argument default, or are left out
        assert_eq!(
            Value::Object(arguments.resolve(&Object::new()).into_owned()),
            json!({"first": 10, "filter": {"kind": "BOOK"}})
        );
    }

    #[test]
    fn enum_literals_cannot_spell_literals() {
        let schema = apollo_compiler::Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
        let binder = ArgumentBinder::new(&schema);
        let ty = Type::Named(Name::new("Kind").unwrap());
        assert_eq!(
            binder
                .literal(&ty, &ast::Value::Enum(Name::new("BOOK").unwrap()))
                .unwrap(),
            json!("BOOK")
        );
        assert!(matches!(
            binder.literal(&ty, &ast::Value::Enum(Name::new("null").unwrap())),
            Err(CompilationError::Sanitization(SanitizeError::ReservedKeyword(name))) if name == "null"
        ));
    }
}
