//! Distills a finished execution into the set of resource identifiers it
//! depends on.
//!
//! Three identifier shapes come out of the extraction walk:
//!
//! * `Query.post`: schema coordinates of the operation's root fields,
//! * `Query.post(id:"1")`: the same coordinates with canonicalized argument
//!   values appended, emitted whenever the selection passes arguments,
//! * `Post:1`: object identifiers, emitted for every selected id field whose
//!   parent type declares it as non-null `ID`.
//!
//! Registered collector callbacks can add arbitrary identifier strings on top.

use std::collections::BTreeSet;

use apollo_compiler::ast;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;

use crate::json_ext::canonical_json_string;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::store::CollectorMap;

/// Walk the executed operation in parallel with its `data` and produce the
/// identifier set the next invalidation cycle matches against.
///
/// The walk is pure: it only reads the completed response, so partial or
/// null-propagated data simply contributes fewer identifiers.
#[allow(clippy::too_many_arguments)]
pub(crate) fn extract_resource_identifiers(
    schema: &Valid<Schema>,
    document: &Valid<ExecutableDocument>,
    operation: &Operation,
    variables: &Object,
    root_value: &Value,
    collectors: &CollectorMap,
    id_field_name: &str,
    data: Option<&Value>,
) -> BTreeSet<String> {
    let root_type = schema
        .root_operation(operation.operation_type)
        .map(|name| name.as_str())
        .unwrap_or("Query");

    let mut extractor = IdentifierExtractor {
        schema,
        document,
        variables,
        root_value,
        collectors,
        id_field_name,
        identifiers: BTreeSet::new(),
    };
    let data = match data {
        Some(Value::Object(object)) => Some(object),
        _ => None,
    };
    extractor.visit_selection_set(&operation.selection_set, root_type, data, 0);
    extractor.identifiers
}

struct IdentifierExtractor<'a> {
    schema: &'a Valid<Schema>,
    document: &'a Valid<ExecutableDocument>,
    variables: &'a Object,
    root_value: &'a Value,
    collectors: &'a CollectorMap,
    id_field_name: &'a str,
    identifiers: BTreeSet<String>,
}

impl IdentifierExtractor<'_> {
    fn visit_selection_set(
        &mut self,
        selection_set: &SelectionSet,
        parent_type: &str,
        data: Option<&Object>,
        depth: usize,
    ) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if self.is_skipped(&field.directives) {
                        continue;
                    }
                    self.visit_field(field, parent_type, data, depth);
                }
                Selection::FragmentSpread(fragment_spread) => {
                    if self.is_skipped(&fragment_spread.directives) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&fragment_spread.fragment_name)
                    else {
                        tracing::warn!(
                            fragment = fragment_spread.fragment_name.as_str(),
                            "fragment spread not found in the document"
                        );
                        continue;
                    };
                    self.visit_selection_set(
                        &fragment.selection_set,
                        fragment.selection_set.ty.as_str(),
                        data,
                        depth,
                    );
                }
                Selection::InlineFragment(inline_fragment) => {
                    if self.is_skipped(&inline_fragment.directives) {
                        continue;
                    }
                    let fragment_type = inline_fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str())
                        .unwrap_or(parent_type);
                    self.visit_selection_set(
                        &inline_fragment.selection_set,
                        fragment_type,
                        data,
                        depth,
                    );
                }
            }
        }
    }

    fn visit_field(
        &mut self,
        field: &Node<Field>,
        parent_type: &str,
        data: Option<&Object>,
        depth: usize,
    ) {
        let coordinate = format!("{parent_type}.{}", field.name);

        // Only the operation's root fields are tracked as schema coordinates;
        // everything below them is tracked through object identifiers.
        if depth == 0 {
            if !field.arguments.is_empty() {
                self.identifiers
                    .insert(self.coordinate_with_arguments(&coordinate, field));
            }
            self.identifiers.insert(coordinate.clone());
        }

        if let Some(collect) = self.collectors.get(&coordinate) {
            let arguments = self.resolved_arguments(field);
            for identifier in collect(self.root_value, &arguments) {
                if identifier.is_empty() {
                    tracing::warn!(
                        coordinate = coordinate.as_str(),
                        "ignoring empty resource identifier returned by collector"
                    );
                    continue;
                }
                self.identifiers.insert(identifier);
            }
        }

        let value = data.and_then(|object| object.get(field.response_key().as_str()));

        if field.name == self.id_field_name {
            if let Some(id) = value.and_then(scalar_identifier_value) {
                let concrete_type = data
                    .and_then(|object| object.get("__typename"))
                    .and_then(Value::as_str)
                    .unwrap_or(parent_type);
                if self.type_has_non_null_id(concrete_type) {
                    self.identifiers.insert(format!("{concrete_type}:{id}"));
                }
            }
        }

        match value {
            Some(Value::Object(children)) => {
                self.visit_selection_set(
                    &field.selection_set,
                    field.selection_set.ty.as_str(),
                    Some(children),
                    depth + 1,
                );
            }
            Some(Value::Array(items)) => {
                self.visit_list(field, items, depth);
            }
            // A null or missing object contributes nothing below its own
            // coordinate.
            _ => {}
        }
    }

    fn visit_list(&mut self, field: &Node<Field>, items: &[Value], depth: usize) {
        for item in items {
            match item {
                Value::Object(children) => {
                    self.visit_selection_set(
                        &field.selection_set,
                        field.selection_set.ty.as_str(),
                        Some(children),
                        depth + 1,
                    );
                }
                Value::Array(nested) => self.visit_list(field, nested, depth),
                _ => {}
            }
        }
    }

    /// `Type.field(arg:json,...)` with argument names in lexicographic order
    /// and values rendered as canonical JSON, variables resolved.
    fn coordinate_with_arguments(&self, coordinate: &str, field: &Field) -> String {
        let mut arguments: Vec<(&str, Value)> = field
            .arguments
            .iter()
            .map(|argument| {
                (
                    argument.name.as_str(),
                    self.ast_value_to_json(&argument.value),
                )
            })
            .collect();
        arguments.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut out = String::from(coordinate);
        out.push('(');
        for (i, (name, value)) in arguments.iter().enumerate() {
            if i != 0 {
                out.push(',');
            }
            out.push_str(name);
            out.push(':');
            out.push_str(&canonical_json_string(value));
        }
        out.push(')');
        out
    }

    fn resolved_arguments(&self, field: &Field) -> Object {
        let mut arguments = Object::new();
        for argument in &field.arguments {
            arguments.insert(
                argument.name.as_str(),
                self.ast_value_to_json(&argument.value),
            );
        }
        arguments
    }

    fn ast_value_to_json(&self, value: &ast::Value) -> Value {
        match value {
            ast::Value::Null => Value::Null,
            ast::Value::Boolean(b) => Value::Bool(*b),
            ast::Value::Enum(name) => Value::String(name.as_str().into()),
            ast::Value::String(s) => Value::String(s.as_str().into()),
            ast::Value::Int(i) => i
                .try_to_i32()
                .map(|i| Value::Number(i.into()))
                .unwrap_or(Value::Null),
            ast::Value::Float(f) => f
                .try_to_f64()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ast::Value::Variable(name) => self
                .variables
                .get(name.as_str())
                .cloned()
                .unwrap_or(Value::Null),
            ast::Value::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.ast_value_to_json(item))
                    .collect(),
            ),
            ast::Value::Object(fields) => {
                let mut object = Object::new();
                for (name, item) in fields {
                    object.insert(name.as_str(), self.ast_value_to_json(item));
                }
                Value::Object(object)
            }
        }
    }

    fn type_has_non_null_id(&self, type_name: &str) -> bool {
        let fields = match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(object)) => &object.fields,
            Some(ExtendedType::Interface(interface)) => &interface.fields,
            _ => return false,
        };
        fields.get(self.id_field_name).is_some_and(|definition| {
            matches!(&definition.ty, ast::Type::NonNullNamed(name) if name == "ID")
        })
    }

    fn is_skipped(&self, directives: &ast::DirectiveList) -> bool {
        if let Some(skip) = directives.get("skip") {
            if self.condition(skip).unwrap_or(false) {
                return true;
            }
        }
        if let Some(include) = directives.get("include") {
            if !self.condition(include).unwrap_or(true) {
                return true;
            }
        }
        false
    }

    /// The value of a `@skip`/`@include` condition.
    ///
    /// Validation has already checked that the variable exists and is a
    /// boolean, so a missing binding simply leaves the condition undecided.
    fn condition(&self, directive: &Node<ast::Directive>) -> Option<bool> {
        match directive
            .arguments
            .iter()
            .find(|argument| argument.name == "if")?
            .value
            .as_ref()
        {
            ast::Value::Boolean(b) => Some(*b),
            ast::Value::Variable(name) => self
                .variables
                .get(name.as_str())
                .and_then(Value::as_bool),
            _ => None,
        }
    }
}

fn scalar_identifier_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.as_str().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use apollo_compiler::ExecutableDocument;
    use serde_json_bytes::json;

    use super::*;

    const SCHEMA: &str = r#"
        directive @live(if: Boolean = true) on QUERY

        type Query {
            foo: String
            post(id: ID): Post
            posts: [Post!]
            ping(id: ID!): String
            node(id: ID!): Node
        }

        interface Node {
            id: ID!
        }

        type Post implements Node {
            id: ID!
            title: String!
            author: Author
        }

        type Author implements Node {
            id: ID!
            name: String!
        }
    "#;

    struct Extraction {
        schema: Arc<Valid<Schema>>,
        document: Valid<ExecutableDocument>,
        variables: Object,
        collectors: CollectorMap,
        id_field_name: String,
    }

    impl Extraction {
        fn new(query: &str) -> Self {
            let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
            let document =
                ExecutableDocument::parse_and_validate(&schema, query, "query.graphql").unwrap();
            Self {
                schema: Arc::new(schema),
                document,
                variables: Object::new(),
                collectors: HashMap::new(),
                id_field_name: "id".to_string(),
            }
        }

        fn variables(mut self, variables: Value) -> Self {
            self.variables = match variables {
                Value::Object(object) => object,
                _ => panic!("variables must be an object"),
            };
            self
        }

        fn run(&self, data: Value) -> Vec<String> {
            let operation = crate::live::operation_for(&self.document, None).unwrap();
            extract_resource_identifiers(
                &self.schema,
                &self.document,
                operation,
                &self.variables,
                &Value::Null,
                &self.collectors,
                &self.id_field_name,
                Some(&data),
            )
            .into_iter()
            .collect()
        }
    }

    #[test]
    fn root_field_coordinates() {
        let extraction = Extraction::new("query @live { foo }");
        assert_eq!(extraction.run(json!({"foo": "queried"})), vec!["Query.foo"]);
    }

    #[test]
    fn arguments_are_canonicalized_and_sorted() {
        let extraction = Extraction::new(r#"query @live { ping(id: "1") }"#);
        assert_eq!(
            extraction.run(json!({"ping": "pong"})),
            vec!["Query.ping", r#"Query.ping(id:"1")"#]
        );

        // variables resolve into the canonical form
        let extraction = Extraction::new("query ($id: ID!) @live { post(id: $id) { id title } }")
            .variables(json!({"id": "1"}));
        assert_eq!(
            extraction.run(json!({"post": {"id": "1", "title": "lel"}})),
            vec!["Post:1", "Query.post", r#"Query.post(id:"1")"#]
        );
    }

    #[test]
    fn object_identifiers_follow_aliases() {
        let extraction =
            Extraction::new(r#"query @live { p: post(id: "1") { postId: id title } }"#);
        assert_eq!(
            extraction.run(json!({"p": {"postId": "1", "title": "lel"}})),
            vec!["Post:1", "Query.post", r#"Query.post(id:"1")"#]
        );
    }

    #[test]
    fn nested_objects_and_lists_contribute_ids_only() {
        let extraction =
            Extraction::new("query @live { posts { id title author { id name } } }");
        assert_eq!(
            extraction.run(json!({
                "posts": [
                    {"id": "1", "title": "a", "author": {"id": "7", "name": "ada"}},
                    {"id": "2", "title": "b", "author": null},
                ]
            })),
            vec!["Author:7", "Post:1", "Post:2", "Query.posts"]
        );
    }

    #[test]
    fn null_objects_contribute_only_their_coordinate() {
        let extraction = Extraction::new(r#"query @live { post(id: "404") { id title } }"#);
        assert_eq!(
            extraction.run(json!({"post": null})),
            vec!["Query.post", r#"Query.post(id:"404")"#]
        );
    }

    #[test]
    fn fragments_recurse_with_their_type_condition() {
        let extraction = Extraction::new(
            r#"
            query @live {
                ...rootFields
                node(id: "1") {
                    ... on Post { id }
                }
            }
            fragment rootFields on Query { foo }
            "#,
        );
        assert_eq!(
            extraction.run(json!({
                "foo": "queried",
                "node": {"id": "1"},
            })),
            vec![
                "Post:1",
                "Query.foo",
                "Query.node",
                r#"Query.node(id:"1")"#,
            ]
        );
    }

    #[test]
    fn typename_resolves_the_concrete_type() {
        let extraction = Extraction::new(r#"query @live { node(id: "7") { __typename id } }"#);
        assert_eq!(
            extraction.run(json!({"node": {"__typename": "Author", "id": "7"}})),
            vec!["Author:7", "Query.node", r#"Query.node(id:"7")"#]
        );
    }

    #[test]
    fn skipped_fields_contribute_nothing() {
        let extraction = Extraction::new(
            "query ($withFoo: Boolean!, $skipPost: Boolean!) @live {
                foo @include(if: $withFoo)
                post @skip(if: $skipPost) { id }
                posts @skip(if: false) { id }
            }",
        )
        .variables(json!({"withFoo": false, "skipPost": true}));
        assert_eq!(
            extraction.run(json!({"posts": [{"id": "3"}]})),
            vec!["Post:3", "Query.posts"]
        );
    }

    #[test]
    fn collectors_add_untrusted_identifiers() {
        let mut extraction = Extraction::new(r#"query @live { ping(id: "1") }"#);
        let collect: Arc<crate::store::CollectResourceIdentifiersFn> =
            Arc::new(|_root_value, arguments| {
                vec![
                    arguments
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    String::new(),
                ]
            });
        extraction.collectors.insert("Query.ping".to_string(), collect);
        assert_eq!(
            extraction.run(json!({"ping": "pong"})),
            vec!["1", "Query.ping", r#"Query.ping(id:"1")"#]
        );
    }

    #[test]
    fn id_field_name_is_configurable() {
        const SCHEMA: &str = r#"
            directive @live(if: Boolean = true) on QUERY
            type Query { post(id: ID): Post }
            type Post { whateverIWant: ID! title: String! }
        "#;
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            r#"query @live { post(id: "1") { whateverIWant title } }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = crate::live::operation_for(&document, None).unwrap();

        let identifiers = extract_resource_identifiers(
            &schema,
            &document,
            operation,
            &Object::new(),
            &Value::Null,
            &HashMap::new(),
            "whateverIWant",
            Some(&json!({"post": {"whateverIWant": "1", "title": "lel"}})),
        );
        assert_eq!(
            identifiers.into_iter().collect::<Vec<_>>(),
            vec!["Post:1", "Query.post", r#"Query.post(id:"1")"#]
        );
    }

    #[test]
    fn extraction_survives_missing_data() {
        let extraction = Extraction::new("query @live { foo post { id } }");
        let operation = crate::live::operation_for(&extraction.document, None).unwrap();
        let identifiers = extract_resource_identifiers(
            &extraction.schema,
            &extraction.document,
            operation,
            &extraction.variables,
            &Value::Null,
            &extraction.collectors,
            "id",
            None,
        );
        assert_eq!(
            identifiers.into_iter().collect::<Vec<_>>(),
            vec!["Query.foo", "Query.post"]
        );
    }
}
