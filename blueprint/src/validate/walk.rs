//! Structural walk for stage-2 validation

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::FieldPath;
use crate::responses::RequestError;

/// Depth-first walk over a decoded structure.
///
/// Leaves are no-ops. Aggregates recurse into their children and then apply
/// their own [`super::CustomValidate`] rule, so a parent's rule sees its
/// children already validated. `None` options are skipped entirely — the
/// nil-pointer rule.
///
/// Struct impls are generated by [`validate_fields!`](crate::validate_fields);
/// fields left out of the listing are skipped.
pub trait ValidateDeep {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>);
}

macro_rules! leaf {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ValidateDeep for $ty {
                fn walk(&self, _path: &FieldPath, _errors: &mut Vec<RequestError>) {}
            }
        )*
    };
}

leaf!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    serde_json::Value,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
    chrono::NaiveDate,
    chrono::NaiveDateTime,
);

impl<T: ValidateDeep> ValidateDeep for Option<T> {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        if let Some(inner) = self {
            inner.walk(path, errors);
        }
    }
}

impl<T: ValidateDeep> ValidateDeep for Box<T> {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        (**self).walk(path, errors);
    }
}

impl<T: ValidateDeep> ValidateDeep for Arc<T> {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        (**self).walk(path, errors);
    }
}

impl<T: ValidateDeep> ValidateDeep for Vec<T> {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        for (index, item) in self.iter().enumerate() {
            item.walk(&path.indexed(index), errors);
        }
    }
}

impl<T: ValidateDeep, const N: usize> ValidateDeep for [T; N] {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        for (index, item) in self.iter().enumerate() {
            item.walk(&path.indexed(index), errors);
        }
    }
}

impl<T: ValidateDeep> ValidateDeep for HashMap<String, T> {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        // Sorted for deterministic error ordering
        let mut keys: Vec<&String> = self.keys().collect();
        keys.sort_unstable();
        for key in keys {
            self[key].walk(&path.keyed(key), errors);
        }
    }
}

impl<T: ValidateDeep> ValidateDeep for BTreeMap<String, T> {
    fn walk(&self, path: &FieldPath, errors: &mut Vec<RequestError>) {
        for (key, value) in self {
            value.walk(&path.keyed(key), errors);
        }
    }
}

/// Derive [`ValidateDeep`] for a struct from its (field, JSON name) pairs.
///
/// Append `with rules` to also invoke the type's
/// [`CustomValidate`](crate::validate::CustomValidate) rule after the
/// children are walked:
///
/// ```rust,ignore
/// validate_fields!(Order { id => "id", items => "items" } with rules);
/// ```
#[macro_export]
macro_rules! validate_fields {
    ($ty:ty { $($field:ident => $name:literal),* $(,)? }) => {
        impl $crate::validate::ValidateDeep for $ty {
            fn walk(
                &self,
                path: &$crate::validate::FieldPath,
                errors: &mut Vec<$crate::responses::RequestError>,
            ) {
                $(
                    $crate::validate::ValidateDeep::walk(
                        &self.$field,
                        &path.child($name),
                        errors,
                    );
                )*
            }
        }
    };
    ($ty:ty { $($field:ident => $name:literal),* $(,)? } with rules) => {
        impl $crate::validate::ValidateDeep for $ty {
            fn walk(
                &self,
                path: &$crate::validate::FieldPath,
                errors: &mut Vec<$crate::responses::RequestError>,
            ) {
                $(
                    $crate::validate::ValidateDeep::walk(
                        &self.$field,
                        &path.child($name),
                        errors,
                    );
                )*
                $crate::validate::apply_rules(self, path, errors);
            }
        }
    };
}
