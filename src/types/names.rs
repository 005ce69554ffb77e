//! The generated-name scheme.
//!
//! Lowered output refers to classes and methods through deterministic flat
//! identifiers so that the emitted free functions, vtable structs, and
//! global instances cannot collide with user names. The scheme is a stable
//! contract: downstream tools may link against these names.

use crate::common::multiphase::Identifier;

/// Every generated identifier starts with this prefix, which is why user
/// identifiers starting with it are rejected.
pub const LANGUAGE_PREFIX: &str = "__declass__";

/// The first field of every lowered class struct.
pub const VTABLE_FIELD: &str = "__vtable";

/// The receiver parameter of every lowered method.
pub const THIS: &str = "this";

/// Inside a method, `base` denotes `this` downcast to the base class.
pub const BASE: &str = "base";

/// The function every translated program must define; vtable setup is
/// injected at its head.
pub const ENTRY: &str = "main";

/// Whether declaring `name` would collide with the generated-name scheme or
/// the method-body pseudo-identifiers.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(LANGUAGE_PREFIX) || name == THIS || name == BASE || name == VTABLE_FIELD
}

/// `__declass__C__f`, or `__declass__C__virtual__f` for methods that occupy
/// a vtable slot.
pub fn method(class: &Identifier, method: &Identifier, is_virtual: bool) -> Identifier {
    let infix = if is_virtual { "__virtual__" } else { "__" };
    Identifier::from(format!("{}{}{}{}", LANGUAGE_PREFIX, class, infix, method))
}

/// `__declass__C__vtable__`, the struct holding `C`'s slots.
pub fn vtable(class: &Identifier) -> Identifier {
    Identifier::from(format!("{}{}__vtable__", LANGUAGE_PREFIX, class))
}

/// `__declass__C__vtable__f`, the function-pointer typedef for slot `f`.
pub fn vtable_slot(vtable: &Identifier, slot: &Identifier) -> Identifier {
    Identifier::from(format!("{}{}", vtable, slot))
}

/// `__declass__C__vtable__instance`, the global vtable value.
pub fn vtable_instance(vtable: &Identifier) -> Identifier {
    Identifier::from(format!("{}instance", vtable))
}

/// `__declass__C__vtable__init`, the function filling the global instance.
pub fn vtable_init(vtable: &Identifier) -> Identifier {
    Identifier::from(format!("{}init", vtable))
}

/// `__declass__make_C`, the implicit constructor.
pub fn constructor(complex: &Identifier) -> Identifier {
    Identifier::from(format!("{}make_{}", LANGUAGE_PREFIX, complex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names() {
        assert!(is_reserved("__declass__anything"));
        assert!(is_reserved("this"));
        assert!(is_reserved("base"));
        assert!(is_reserved("__vtable"));
        assert!(!is_reserved("thisisfine"));
        assert!(!is_reserved("basement"));
        assert!(!is_reserved("__declared"));
    }

    #[test]
    fn scheme() {
        let class = Identifier::from("C");
        let f = Identifier::from("f");
        assert_eq!(method(&class, &f, false).as_str(), "__declass__C__f");
        assert_eq!(method(&class, &f, true).as_str(), "__declass__C__virtual__f");

        let vt = vtable(&class);
        assert_eq!(vt.as_str(), "__declass__C__vtable__");
        assert_eq!(vtable_slot(&vt, &f).as_str(), "__declass__C__vtable__f");
        assert_eq!(vtable_instance(&vt).as_str(), "__declass__C__vtable__instance");
        assert_eq!(vtable_init(&vt).as_str(), "__declass__C__vtable__init");
        assert_eq!(constructor(&class).as_str(), "__declass__make_C");
    }
}
