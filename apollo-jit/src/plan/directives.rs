//! `@skip`/`@include` conditions and `@defer`/`@stream` detection.

use apollo_compiler::ast;

use super::Condition;
use super::ConditionSet;
use crate::error::CompilationError;
use crate::sanitizer::sanitize_identifier;

const INCREMENTAL_DIRECTIVES: &[&str] = &["defer", "stream"];

/// Finds the first `@defer` or `@stream` anywhere in the document.
///
/// Runs on the unvalidated AST so the fallback signal wins over validation errors in schemas
/// that do not declare these directives.
pub(crate) fn find_incremental_directive(document: &ast::Document) -> Option<&'static str> {
    document.definitions.iter().find_map(|definition| match definition {
        ast::Definition::OperationDefinition(operation) => {
            incremental_in(&operation.directives).or_else(|| in_selections(&operation.selection_set))
        }
        ast::Definition::FragmentDefinition(fragment) => {
            incremental_in(&fragment.directives).or_else(|| in_selections(&fragment.selection_set))
        }
        _ => None,
    })
}

fn in_selections(selections: &[ast::Selection]) -> Option<&'static str> {
    selections.iter().find_map(|selection| match selection {
        ast::Selection::Field(field) => {
            incremental_in(&field.directives).or_else(|| in_selections(&field.selection_set))
        }
        ast::Selection::FragmentSpread(spread) => incremental_in(&spread.directives),
        ast::Selection::InlineFragment(inline) => {
            incremental_in(&inline.directives).or_else(|| in_selections(&inline.selection_set))
        }
    })
}

fn incremental_in(directives: &ast::DirectiveList) -> Option<&'static str> {
    INCREMENTAL_DIRECTIVES
        .iter()
        .copied()
        .find(|name| directives.get(name).is_some())
}

/// Adds the `@skip`/`@include` conditions of `directives` to `inherited`.
///
/// Returns `None` when a literal argument statically excludes the selection. Literal
/// conditions that always hold are dropped.
pub(crate) fn fold_conditions(
    directives: &ast::DirectiveList,
    inherited: &ConditionSet,
) -> Result<Option<ConditionSet>, CompilationError> {
    let mut conditions = inherited.clone();
    for (directive_name, skip) in [("skip", true), ("include", false)] {
        let Some(directive) = directives.get(directive_name) else {
            continue;
        };
        match directive
            .specified_argument_by_name("if")
            .map(|value| &**value)
        {
            Some(ast::Value::Boolean(value)) => {
                if *value == skip {
                    return Ok(None);
                }
            }
            Some(ast::Value::Variable(variable)) => {
                sanitize_identifier(variable)?;
                let condition = if skip {
                    Condition::Skip(variable.clone())
                } else {
                    Condition::Include(variable.clone())
                };
                if !conditions.contains(&condition) {
                    conditions.push(condition);
                }
            }
            // Rejected by validation
            _ => {}
        }
    }
    Ok(Some(conditions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(query: &str) -> Option<&'static str> {
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        find_incremental_directive(&document)
    }

    #[test]
    fn finds_defer_in_nested_fragments() {
        assert_eq!(detect("{ a { b } }"), None);
        assert_eq!(detect("{ a { ... @defer { b } } }"), Some("defer"));
        assert_eq!(detect("{ a { ...F } } fragment F on A { ...G @defer }"), Some("defer"));
        assert_eq!(
            detect("{ a { ...F } } fragment F on A { b { ... on B { c @stream } } }"),
            Some("stream")
        );
    }

    #[test]
    fn finds_directives_on_operations() {
        assert_eq!(detect("query Q @defer { a }"), Some("defer"));
    }
}
