//! Objective-C runtime metadata: the object model and the walker that
//! builds it from an image's `__objc_*` sections.

use thiserror::Error;

mod model;
mod property;
mod raw;
mod walker;

pub use model::{
    Category, ClassRef, ClassRoFlags, Diagnostic, DiagnosticKind, ImageIdentity, ImageInfo,
    ImageInfoFlags, Ivar, ListPolicy, Method, MethodScope, ObjCClass, ObjectModel, Property,
    PropertyFlags, Protocol,
};
pub use property::parse_property;
pub use walker::walk;

/// A top level list that cannot be walked at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} (at {address:#x})")]
pub struct WalkError {
    pub reason: String,
    pub address: u64,
}

/// Strips the linker prefixes from a bound class or protocol symbol.
pub fn symbol_name(symbol: &str) -> &str {
    const PREFIXES: [&str; 4] = [
        "_OBJC_CLASS_$_",
        "_OBJC_METACLASS_$_",
        "__OBJC_PROTOCOL_$_",
        "_OBJC_PROTOCOL_$_",
    ];
    PREFIXES
        .iter()
        .find_map(|prefix| symbol.strip_prefix(prefix))
        .unwrap_or(symbol)
}
