//! The canonical extraction record and its absent marker.
//!
//! [`FieldValue::Absent`] is the canonical absent marker: it means "the field
//! was not reported", which is different from `Found("")` ("the field was
//! reported with an empty value"). Serialised JSON uses `null` for the former
//! and `""` for the latter.

use crate::schema::ReceiptField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value, or the explicit absent marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum FieldValue {
    #[default]
    Absent,
    Found(String),
}

impl FieldValue {
    pub fn found(value: impl Into<String>) -> Self {
        FieldValue::Found(value.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            FieldValue::Absent => None,
            FieldValue::Found(s) => Some(s),
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(v: Option<String>) -> Self {
        v.map_or(FieldValue::Absent, FieldValue::Found)
    }
}

impl From<FieldValue> for Option<String> {
    fn from(v: FieldValue) -> Self {
        match v {
            FieldValue::Absent => None,
            FieldValue::Found(s) => Some(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Absent => f.write_str("—"),
            FieldValue::Found(s) => f.write_str(s),
        }
    }
}

/// Raw key → value mapping produced by the normalizer, before reconciliation.
///
/// Keys are whatever the model used (JSON strategy) or canonical keys (label
/// strategy); the reconciler resolves them.
pub type CandidateFields = BTreeMap<String, FieldValue>;

/// Canonical, immutable extraction result.
///
/// Built once per extraction by [`crate::pipeline::reconcile::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    amount: FieldValue,
    deposit_id: FieldValue,
    tracking_code: FieldValue,
    reference_number: FieldValue,
    bank_name: FieldValue,
    date: FieldValue,
    time: FieldValue,
}

impl ReceiptRecord {
    /// Return a copy of the record with `field` set to `value`.
    pub fn with(mut self, field: ReceiptField, value: FieldValue) -> Self {
        *self.slot_mut(field) = value;
        self
    }

    pub fn get(&self, field: ReceiptField) -> &FieldValue {
        match field {
            ReceiptField::Amount => &self.amount,
            ReceiptField::DepositId => &self.deposit_id,
            ReceiptField::TrackingCode => &self.tracking_code,
            ReceiptField::ReferenceNumber => &self.reference_number,
            ReceiptField::BankName => &self.bank_name,
            ReceiptField::Date => &self.date,
            ReceiptField::Time => &self.time,
        }
    }

    fn slot_mut(&mut self, field: ReceiptField) -> &mut FieldValue {
        match field {
            ReceiptField::Amount => &mut self.amount,
            ReceiptField::DepositId => &mut self.deposit_id,
            ReceiptField::TrackingCode => &mut self.tracking_code,
            ReceiptField::ReferenceNumber => &mut self.reference_number,
            ReceiptField::BankName => &mut self.bank_name,
            ReceiptField::Date => &mut self.date,
            ReceiptField::Time => &mut self.time,
        }
    }

    pub fn amount(&self) -> &FieldValue {
        &self.amount
    }

    pub fn deposit_id(&self) -> &FieldValue {
        &self.deposit_id
    }

    pub fn tracking_code(&self) -> &FieldValue {
        &self.tracking_code
    }

    pub fn reference_number(&self) -> &FieldValue {
        &self.reference_number
    }

    pub fn bank_name(&self) -> &FieldValue {
        &self.bank_name
    }

    pub fn date(&self) -> &FieldValue {
        &self.date
    }

    pub fn time(&self) -> &FieldValue {
        &self.time
    }

    /// Iterate `(field, value)` pairs in record order.
    pub fn iter(&self) -> impl Iterator<Item = (ReceiptField, &FieldValue)> + '_ {
        ReceiptField::ALL.into_iter().map(move |f| (f, self.get(f)))
    }

    /// True when every field carries the absent marker.
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, v)| v.is_absent())
    }

    /// The record as a candidate mapping keyed by canonical keys.
    pub fn to_candidates(&self) -> CandidateFields {
        self.iter()
            .map(|(f, v)| (f.key().to_string(), v.clone()))
            .collect()
    }
}
