// SPDX-License-Identifier: Apache-2.0
//! Field slots: per-instance storage behind a schema declaration.
use crate::error::ModelError;
use crate::schema::FieldDef;
use crate::value::Value;

/// Mutable state of one declared field on one model instance.
///
/// The declaration (`def`) is copied out of the schema at construction so
/// open models can declare additional slots without touching the shared
/// schema. `explicit` distinguishes values written by callers from applied
/// defaults; `error` records the last non-strict type failure.
#[derive(Debug)]
pub(crate) struct FieldSlot {
    pub(crate) def: FieldDef,
    pub(crate) value: Value,
    pub(crate) error: Option<ModelError>,
    pub(crate) explicit: bool,
}

impl FieldSlot {
    pub(crate) fn new(def: FieldDef) -> Self {
        Self {
            def,
            value: Value::Null,
            error: None,
            explicit: false,
        }
    }
}

/// Introspection snapshot of one field, as returned by
/// [`Model::field_info`](crate::Model::field_info).
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// The field's declaration.
    pub def: FieldDef,
    /// `true` while the field still holds its default (never explicitly set).
    pub is_default: bool,
    /// Last recorded non-strict type error, if any.
    pub error: Option<ModelError>,
}
