//! Small shared helpers: tracing-target path macros and the TLS
//! verifier for self-signed cast devices.

pub mod rustls;

/// Re-export of the `#[named]` attribute, which makes a local
/// `function_name!()` macro available inside the annotated function.
/// The path macros below build on it.
pub use function_name::named;

/// Full path of the surrounding free function
/// (`module::path::function`), for use as a tracing target.
///
/// The function must be annotated with `#[named]`.
#[macro_export]
macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!())
    };
}

/// Full path of the surrounding method
/// (`module::path::Type::method`), for use as a tracing target.
///
/// The method must be annotated with `#[named]`.
#[macro_export]
macro_rules! method_path {
    ($type_name:literal) => {
        concat!(module_path!(), "::", $type_name, "::", function_name!())
    };
}
