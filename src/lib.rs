//! An in-process live query store layered on top of a GraphQL execution
//! engine.
//!
//! A GraphQL document may carry a `@live` directive on its query operation.
//! Executing such a document through a [`LiveQueryStore`] does not produce a
//! single result: it produces a long-lived stream of results, re-computed
//! whenever one of the *resource identifiers* the previous result depends on
//! is invalidated.
//!
//! Identifiers are plain strings. The store derives them from each finished
//! execution: schema coordinates like `Query.post` (with canonicalized
//! arguments, `Query.post(id:"1")`) for the operation's root fields, and
//! object identifiers like `Post:1` for every selected non-null `ID` field.
//! Registered collectors can add arbitrary ones on top. Mutating code then
//! drives updates by name: `store.invalidate(["Post:1"]).await`.
//!
//! The store coalesces overlapping invalidations per live query, never runs
//! more than one execution per query at a time, and frees all bookkeeping
//! when the consumer drops its stream.

#[macro_use]
mod json_ext;

pub mod error;
pub mod execution;
pub mod graphql;
mod identifiers;
pub mod live;
mod store;

pub use store::CollectResourceIdentifiersFn;
pub use store::ExecuteResponse;
pub use store::LiveQueryStore;
pub use store::LiveQueryStream;
