//! Human readable listing of a compiled plan.
//!
//! Only sanitized identifiers and fixed keywords end up in the listing; argument and default
//! values are never printed.

use std::fmt;

use super::Children;
use super::Condition;
use super::ConditionSet;
use super::ExecutionNode;
use super::Inclusion;
use super::Plan;
use super::Resolution;
use super::arguments::ArgumentSource;
use crate::schema::resolver::FieldResolver;

const INDENT: &str = "  ";

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.kind,
            self.operation_name.as_deref().unwrap_or("<anonymous>")
        )?;
        if !self.variables.is_empty() {
            f.write_str("(")?;
            for (index, variable) in self.variables.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "${}: {}", variable.name, variable.shape)?;
            }
            f.write_str(")")?;
        }
        writeln!(f, " on {} {{", self.root_type)?;
        write_nodes(f, &self.selection, 1)?;
        f.write_str("}")
    }
}

fn write_nodes(f: &mut fmt::Formatter<'_>, nodes: &[ExecutionNode], depth: usize) -> fmt::Result {
    for node in nodes {
        write_node(f, node, depth)?;
    }
    Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &ExecutionNode, depth: usize) -> fmt::Result {
    let indent = INDENT.repeat(depth);
    write!(f, "{indent}{}: ", node.response_key.as_str())?;
    match &node.resolution {
        Resolution::Typename => write!(f, "typename({})", node.parent_type)?,
        Resolution::Introspection => write!(f, "introspect({})", node.field_name)?,
        resolution => {
            let operation = match resolution {
                Resolution::Resolver(FieldResolver::Async(_)) => "await resolve",
                Resolution::Resolver(FieldResolver::Sync(_)) => "resolve",
                _ => "read",
            };
            write!(f, "{operation}({}.{}", node.parent_type, node.field_name)?;
            for (name, source) in node.arguments.sources() {
                match source {
                    ArgumentSource::Constant => write!(f, ", {name}: const")?,
                    ArgumentSource::Variable(variable) => write!(f, ", {name}: ${variable}")?,
                    ArgumentSource::Input => write!(f, ", {name}: input")?,
                }
            }
            f.write_str(")")?;
        }
    }
    write!(f, " -> {}", node.shape)?;
    if let Inclusion::Conditional(sets) = &node.inclusion {
        f.write_str(" if ")?;
        write_condition_sets(f, sets)?;
    }

    match &node.children {
        Children::None => writeln!(f),
        Children::Object(children) => {
            writeln!(f, " {{")?;
            write_nodes(f, children, depth + 1)?;
            writeln!(f, "{indent}}}")
        }
        Children::Abstract(table) => {
            writeln!(f, " {{")?;
            for (object_type, children) in &table.by_type {
                if children.is_empty() {
                    writeln!(f, "{indent}{INDENT}... on {object_type} {{}}")?;
                } else {
                    writeln!(f, "{indent}{INDENT}... on {object_type} {{")?;
                    write_nodes(f, children, depth + 2)?;
                    writeln!(f, "{indent}{INDENT}}}")?;
                }
            }
            writeln!(f, "{indent}}}")
        }
    }
}

fn write_condition_sets(f: &mut fmt::Formatter<'_>, sets: &[ConditionSet]) -> fmt::Result {
    for (index, set) in sets.iter().enumerate() {
        if index > 0 {
            f.write_str(" || ")?;
        }
        let grouped = sets.len() > 1 && set.len() > 1;
        if grouped {
            f.write_str("(")?;
        }
        for (index, condition) in set.iter().enumerate() {
            if index > 0 {
                f.write_str(" && ")?;
            }
            match condition {
                Condition::Skip(variable) => write!(f, "!${variable}")?,
                Condition::Include(variable) => write!(f, "${variable}")?,
            }
        }
        if grouped {
            f.write_str(")")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;

    use crate::plan::builder::PlanBuilder;
    use crate::schema::Schema;
    use crate::schema::resolver::ResolvedValue;

    const SDL: &str = r#"
        type Query {
            items(first: Int = 10, after: String): [Item!]!
            hero: Character
            search(filter: Filter): [String]
        }
        type Item {
            id: ID!
            title: String
            price: Float
        }
        interface Character {
            name: String!
        }
        type Human implements Character {
            name: String!
        }
        type Droid implements Character {
            name: String!
            primaryFunction: String
        }
        input Filter {
            term: String
        }
    "#;

    fn listing(query: &str) -> String {
        let schema = Schema::builder(SDL)
            .async_resolver("Query", "items", |_| {
                Box::pin(async { Ok(ResolvedValue::list([])) })
            })
            .resolver("Droid", "primaryFunction", |_| Ok(ResolvedValue::null()))
            .build()
            .unwrap();
        let document =
            ExecutableDocument::parse_and_validate(&schema.definitions, query, "query.graphql")
                .unwrap();
        let operation = document.operations.get(None).unwrap();
        PlanBuilder::new(&schema, &document)
            .build(operation)
            .unwrap()
            .to_string()
    }

    #[test]
    fn listing_shows_resolution_and_conditions() {
        insta::assert_snapshot!(
            listing(
                r#"
                query GetItems($after: String, $withPrice: Boolean!, $brief: Boolean!) {
                    items(after: $after) {
                        id
                        name: title
                        price @include(if: $withPrice) @skip(if: $brief)
                    }
                    hero {
                        ... on Droid { primaryFunction }
                        __typename
                    }
                }
                "#
            ),
            @r###"
        query GetItems($after: String, $withPrice: Boolean!, $brief: Boolean!) on Query {
          items: await resolve(Query.items, first: const, after: $after) -> [Item!]! {
            id: read(Item.id) -> ID!
            name: read(Item.title) -> String
            price: read(Item.price) -> Float if !$brief && $withPrice
          }
          hero: read(Query.hero) -> Character {
            ... on Human {
              __typename: typename(Human) -> String!
            }
            ... on Droid {
              primaryFunction: resolve(Droid.primaryFunction) -> String
              __typename: typename(Droid) -> String!
            }
          }
        }
        "###
        );
    }

    #[test]
    fn listing_of_anonymous_operation() {
        insta::assert_snapshot!(
            listing(
                r#"
                query($term: String, $a: Boolean!, $b: Boolean!) {
                    search(filter: { term: $term })
                    hero @include(if: $a) { name }
                    hero @include(if: $b) @skip(if: $a) { name }
                }
                "#
            ),
            @r###"
        query <anonymous>($term: String, $a: Boolean!, $b: Boolean!) on Query {
          search: read(Query.search, filter: input) -> [String]
          hero: read(Query.hero) -> Character if $a || (!$a && $b) {
            ... on Human {
              name: read(Human.name) -> String! if $a || (!$a && $b)
            }
            ... on Droid {
              name: read(Droid.name) -> String! if $a || (!$a && $b)
            }
          }
        }
        "###
        );
    }
}
