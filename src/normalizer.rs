//! Maps Python-surface naming conventions to language-neutral CMM roles.
//!
//! Runs after the extractor and before persistence; the extractor and this
//! module must agree on the same role table so round-trip tests can assert
//! equality between a freshly-extracted entity and one reloaded from the store.

use crate::model::{EntityKind, MethodKind, Role, Visibility};

/// Detect visibility from a Python naming convention.
///
/// Dunder names (`__x__`) are public language-level magic. Any other leading
/// underscore marks the entity private. Everything else is public.
pub fn detect_visibility(name: &str) -> Visibility {
    if is_dunder(name) {
        Visibility::Public
    } else if name.starts_with('_') {
        Visibility::Private
    } else {
        Visibility::Public
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Map a function name and its owning kind to an abstract role.
pub fn detect_role(name: &str, kind: EntityKind) -> Role {
    match kind {
        EntityKind::Class => Role::Class,
        EntityKind::Function => dunder_role(name).unwrap_or(Role::Method),
        EntityKind::Module => Role::Method,
    }
}

fn dunder_role(name: &str) -> Option<Role> {
    match name {
        "__init__" | "__new__" => Some(Role::Constructor),
        "__str__" | "__repr__" => Some(Role::Display),
        "__eq__" | "__ne__" | "__hash__" => Some(Role::Equality),
        "__lt__" | "__le__" | "__gt__" | "__ge__" => Some(Role::Comparison),
        "__len__" | "__getitem__" | "__setitem__" | "__delitem__" | "__iter__"
        | "__contains__" => Some(Role::Collection),
        "__enter__" | "__exit__" => Some(Role::Context),
        "__call__" => Some(Role::Callable),
        "__del__" => Some(Role::Destructor),
        _ => None,
    }
}

/// Default method kind for a freshly-created function entity, before the
/// extractor's decorator pre-pass can override it to `class` or `static`.
pub fn default_method_kind() -> MethodKind {
    MethodKind::Instance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dunder_is_public() {
        assert_eq!(detect_visibility("__init__"), Visibility::Public);
        assert_eq!(detect_visibility("__eq__"), Visibility::Public);
    }

    #[test]
    fn single_underscore_is_private() {
        assert_eq!(detect_visibility("_helper"), Visibility::Private);
    }

    #[test]
    fn plain_name_is_public() {
        assert_eq!(detect_visibility("run"), Visibility::Public);
    }

    #[test]
    fn double_underscore_without_closing_pair_is_private() {
        // "__mangled" starts with __ but does not end with __: treated as private.
        assert_eq!(detect_visibility("__mangled"), Visibility::Private);
    }

    #[test]
    fn role_table_covers_constructor_and_equality() {
        assert_eq!(
            detect_role("__init__", EntityKind::Function),
            Role::Constructor
        );
        assert_eq!(detect_role("__eq__", EntityKind::Function), Role::Equality);
        assert_eq!(detect_role("add", EntityKind::Function), Role::Method);
        assert_eq!(detect_role("Calculator", EntityKind::Class), Role::Class);
    }
}
