//! The shipped catalog: builtin/admin/root scopes plus bundled services.

pub mod admin;
pub mod builtin;
pub mod expenses;
pub mod root;

use std::sync::Arc;

use crate::router::context::{Handler, HandlerContext, HandlerFuture};
use crate::schema::loader::SchemaError;
use crate::schema::ServiceLoader;

/// Wrap a handler function into the registry's callable shape.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(HandlerContext) -> HandlerFuture + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Assemble the full default catalog the binary boots with.
pub fn default_loader() -> Result<ServiceLoader, SchemaError> {
    let builder = ServiceLoader::builder()
        .builtin_scope(builtin::scope())
        .admin_scope(admin::scope())
        .root_scope(root::scope())
        .service(expenses::definition());
    let builder = builtin::register(builder);
    let builder = admin::register(builder);
    let builder = root::register(builder);
    let builder = expenses::register(builder);
    builder.build()
}
