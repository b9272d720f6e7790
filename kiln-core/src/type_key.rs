use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Registry key of a pooled type.
///
/// The string form is the fully-qualified type name (module path plus simple
/// name). Equality and hashing use the `TypeId`, so two distinct types never
/// share a slot even if their printed names collide.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of `T`.
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully-qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, e.g. `Greeter` for `app::Greeter`.
    pub fn simple_name(&self) -> &'static str {
        simple_name(self.name)
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Strips the module path from a type name, keeping generic arguments intact.
pub fn simple_name(type_name: &str) -> &str {
    let base_end = type_name.find('<').unwrap_or(type_name.len());
    match type_name[..base_end].rfind("::") {
        Some(idx) => &type_name[idx + 2..],
        None => type_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    mod first {
        pub struct Service;
    }

    mod second {
        pub struct Service;
    }

    #[test]
    fn test_same_type_same_key() {
        assert_eq!(TypeKey::of::<first::Service>(), TypeKey::of::<first::Service>());
    }

    #[test]
    fn test_same_simple_name_different_keys() {
        let a = TypeKey::of::<first::Service>();
        let b = TypeKey::of::<second::Service>();
        assert_ne!(a, b);
        assert_eq!(a.simple_name(), b.simple_name());

        let mut slots = HashMap::new();
        slots.insert(a, 1);
        slots.insert(b, 2);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_name_is_fully_qualified() {
        let key = TypeKey::of::<first::Service>();
        assert!(key.name().ends_with("type_key::tests::first::Service"));
        assert_eq!(key.to_string(), key.name());
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("app::views::Greeter"), "Greeter");
        assert_eq!(simple_name("Greeter"), "Greeter");
        assert_eq!(
            simple_name("alloc::vec::Vec<app::Item>"),
            "Vec<app::Item>"
        );
    }
}
