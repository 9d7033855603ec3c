mod assert;
mod namespace;

pub use namespace::{HandlerName, short_typename};
