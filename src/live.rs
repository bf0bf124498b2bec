//! The `@live` directive and document inspection helpers.

use std::collections::HashSet;

use apollo_compiler::ast;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;

use crate::error::OperationLookupError;
use crate::graphql;
use crate::json_ext::Object;

/// Name of the live query directive.
pub const LIVE_DIRECTIVE_NAME: &str = "live";

/// Definition of the `@live` directive, ready to be spliced into a schema's
/// SDL so that documents using the directive validate.
pub const LIVE_DIRECTIVE_SDL: &str = "directive @live(if: Boolean = true) on QUERY";

/// Reports whether the selected operation executes as a live query.
///
/// Only query operations can be live. An explicit `if` argument on the
/// directive (literal or variable) can opt out at request time.
pub fn is_live_operation(
    document: &ExecutableDocument,
    operation_name: Option<&str>,
    variables: &Object,
) -> Result<bool, OperationLookupError> {
    operation_for(document, operation_name).map(|operation| live_directive_enabled(operation, variables))
}

/// Select the operation the request targets, mirroring the engine's own
/// operation selection rules.
pub(crate) fn operation_for<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a Node<Operation>, OperationLookupError> {
    match operation_name {
        Some(name) => document
            .operations
            .named
            .iter()
            .find(|(operation, _)| operation.as_str() == name)
            .map(|(_, operation)| operation)
            .ok_or_else(|| OperationLookupError::UnknownOperation(name.to_string())),
        None => {
            let mut operations = document
                .operations
                .anonymous
                .iter()
                .chain(document.operations.named.values());
            match (operations.next(), operations.next()) {
                (Some(operation), None) => Ok(operation),
                (None, _) => Err(OperationLookupError::NoOperations),
                (Some(_), Some(_)) => Err(OperationLookupError::MissingOperationName),
            }
        }
    }
}

pub(crate) fn live_directive_enabled(operation: &Operation, variables: &Object) -> bool {
    if operation.operation_type != ast::OperationType::Query {
        return false;
    }
    let Some(directive) = operation.directives.get(LIVE_DIRECTIVE_NAME) else {
        return false;
    };
    match directive
        .arguments
        .iter()
        .find(|argument| argument.name == "if")
        .map(|argument| argument.value.as_ref())
    {
        None => true,
        Some(ast::Value::Boolean(enabled)) => *enabled,
        Some(ast::Value::Variable(variable)) => variables
            .get(variable.as_str())
            .and_then(|value| value.as_bool())
            .unwrap_or(true),
        Some(_) => true,
    }
}

/// Validate that no live operation of the document also uses `@defer` or
/// `@stream`.
///
/// Incremental delivery cannot be replayed on a live query sequence; running
/// this check at validation time keeps such documents from reaching the
/// scheduler, where they would surface as an in-band execution error instead.
pub fn no_live_mixed_with_defer_stream(document: &ExecutableDocument) -> Vec<graphql::Error> {
    let mut errors = Vec::new();
    let operations = document
        .operations
        .anonymous
        .iter()
        .chain(document.operations.named.values());

    for operation in operations {
        if operation.directives.get(LIVE_DIRECTIVE_NAME).is_none() {
            continue;
        }
        let mut visited_fragments = HashSet::new();
        if selection_uses_defer_or_stream(document, &operation.selection_set, &mut visited_fragments)
        {
            errors.push(
                graphql::Error::builder()
                    .message("cannot mix \"@live\" with \"@defer\" or \"@stream\"")
                    .extension_code("GRAPHQL_VALIDATION_FAILED")
                    .build(),
            );
        }
    }

    errors
}

fn selection_uses_defer_or_stream(
    document: &ExecutableDocument,
    selection_set: &SelectionSet,
    visited_fragments: &mut HashSet<Name>,
) -> bool {
    selection_set.selections.iter().any(|selection| match selection {
        Selection::Field(field) => {
            field.directives.get("stream").is_some()
                || selection_uses_defer_or_stream(document, &field.selection_set, visited_fragments)
        }
        Selection::InlineFragment(inline_fragment) => {
            inline_fragment.directives.get("defer").is_some()
                || selection_uses_defer_or_stream(
                    document,
                    &inline_fragment.selection_set,
                    visited_fragments,
                )
        }
        Selection::FragmentSpread(fragment_spread) => {
            if fragment_spread.directives.get("defer").is_some() {
                return true;
            }
            if !visited_fragments.insert(fragment_spread.fragment_name.clone()) {
                return false;
            }
            document
                .fragments
                .get(&fragment_spread.fragment_name)
                .is_some_and(|fragment| {
                    selection_uses_defer_or_stream(
                        document,
                        &fragment.selection_set,
                        visited_fragments,
                    )
                })
        }
    })
}
