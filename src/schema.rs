//! Field catalogue and field-schema modes.
//!
//! A single [`ReceiptField`] enum is the source of truth for every name a
//! field goes by: the canonical camelCase key of [`crate::record::ReceiptRecord`],
//! the `LABEL` used in line-format replies, the aliases a model is known to
//! emit in JSON, and the label patterns the line scanner accepts. The prompt
//! builder, the normalizer and the reconciler all read from here, so adding an
//! alias is a one-line change.
//!
//! [`FieldSchema`] collapses the source's many near-duplicate pipeline
//! variants (literal vs. presence-only deposit id, bank detection on/off,
//! JSON vs. line replies) into one value passed through the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One semantic field of a bank-transfer receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptField {
    Amount,
    DepositId,
    TrackingCode,
    ReferenceNumber,
    BankName,
    Date,
    Time,
}

impl ReceiptField {
    /// Every field, in record order.
    pub const ALL: [ReceiptField; 7] = [
        ReceiptField::Amount,
        ReceiptField::DepositId,
        ReceiptField::TrackingCode,
        ReceiptField::ReferenceNumber,
        ReceiptField::BankName,
        ReceiptField::Date,
        ReceiptField::Time,
    ];

    /// Canonical camelCase key, as serialised in `ReceiptRecord`.
    pub fn key(self) -> &'static str {
        match self {
            ReceiptField::Amount => "amount",
            ReceiptField::DepositId => "depositId",
            ReceiptField::TrackingCode => "trackingCode",
            ReceiptField::ReferenceNumber => "referenceNumber",
            ReceiptField::BankName => "bankName",
            ReceiptField::Date => "date",
            ReceiptField::Time => "time",
        }
    }

    /// Upper-case label used by the `LABEL: value` reply format.
    pub fn label(self) -> &'static str {
        match self {
            ReceiptField::Amount => "AMOUNT",
            ReceiptField::DepositId => "DEPOSIT_ID",
            ReceiptField::TrackingCode => "TRACKING",
            ReceiptField::ReferenceNumber => "REFERENCE",
            ReceiptField::BankName => "BANK",
            ReceiptField::Date => "DATE",
            ReceiptField::Time => "TIME",
        }
    }

    /// Field description embedded in the instruction text.
    pub fn describe(self) -> &'static str {
        match self {
            ReceiptField::Amount => "transaction amount; digits only, remove thousands separators",
            ReceiptField::DepositId => "deposit identifier (شناسه واریز)",
            ReceiptField::TrackingCode => {
                "short tracking number (look for: کد پیگیری, شماره پیگیری)"
            }
            ReceiptField::ReferenceNumber => {
                "long reference / follow-up number (look for: شماره رهگیری, شماره ارجاع, شماره مرجع)"
            }
            ReceiptField::BankName => "bank name as printed, in Persian",
            ReceiptField::Date => "transaction date exactly as printed, e.g. 1403/02/01 (do not convert calendars)",
            ReceiptField::Time => "transaction time exactly as printed, e.g. 14:30",
        }
    }

    /// Whether the field carries a digit string that must never be reformatted.
    pub fn is_digit_field(self) -> bool {
        matches!(
            self,
            ReceiptField::Amount
                | ReceiptField::DepositId
                | ReceiptField::TrackingCode
                | ReceiptField::ReferenceNumber
        )
    }

    /// Known key spellings, already passed through [`normalize_key`].
    fn aliases(self) -> &'static [&'static str] {
        match self {
            ReceiptField::Amount => &[
                "amount",
                "transactionamount",
                "sum",
                "total",
                "مبلغ",
            ],
            ReceiptField::DepositId => &[
                "depositid",
                "deposit",
                "depositidentifier",
                "depositcode",
                "paymentid",
                "شناسهواریز",
            ],
            ReceiptField::TrackingCode => &[
                "trackingcode",
                "tracking",
                "trackingnumber",
                "trackingno",
                "traceno",
                "tracenumber",
                "کدپیگیری",
                "شمارهپیگیری",
            ],
            ReceiptField::ReferenceNumber => &[
                "referencenumber",
                "reference",
                "referenceid",
                "referenceno",
                "refno",
                "rrn",
                "followupnumber",
                "شمارهرهگیری",
                "شمارهارجاع",
                "شمارهمرجع",
            ],
            ReceiptField::BankName => &[
                "bankname",
                "bank",
                "sourcebank",
                "issuerbank",
                "بانک",
                "نامبانک",
            ],
            ReceiptField::Date => &["date", "transactiondate", "تاریخ"],
            ReceiptField::Time => &["time", "transactiontime", "ساعت", "زمان"],
        }
    }

    /// Label alternatives for the line scanner (regex fragments, matched
    /// case-insensitively).
    pub(crate) fn label_patterns(self) -> &'static [&'static str] {
        match self {
            ReceiptField::Amount => &[r"amount", r"مبلغ"],
            ReceiptField::DepositId => &[
                r"deposit[ _]?id(?:entifier)?",
                r"deposit",
                r"شناسه\s*واریز",
            ],
            ReceiptField::TrackingCode => &[
                r"tracking(?:[ _]?(?:code|number|no))?",
                r"کد\s*پیگیری",
                r"شماره\s*پیگیری",
            ],
            ReceiptField::ReferenceNumber => &[
                r"reference(?:[ _]?(?:number|no|id))?",
                r"ref[ _]?no",
                r"شماره\s*رهگیری",
                r"شماره\s*ارجاع",
                r"شماره\s*مرجع",
            ],
            ReceiptField::BankName => &[r"bank(?:[ _]?name)?", r"نام\s*بانک", r"بانک"],
            ReceiptField::Date => &[r"date", r"تاریخ"],
            ReceiptField::Time => &[r"time", r"ساعت"],
        }
    }

    /// Resolve a model-supplied key to a field, tolerant of case, separators
    /// and known alternate spellings.
    pub fn from_key(key: &str) -> Option<ReceiptField> {
        let norm = normalize_key(key);
        ReceiptField::ALL
            .into_iter()
            .find(|f| f.aliases().contains(&norm.as_str()))
    }
}

impl fmt::Display for ReceiptField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Key under which the normalizer files identifiers whose role is unclear.
pub const AMBIGUOUS_IDENTIFIER_KEY: &str = "identifier";

const AMBIGUOUS_ALIASES: &[&str] = &[
    "identifier",
    "identifiers",
    "id",
    "ids",
    "numbers",
    "referenceortracking",
    "trackingorreference",
];

/// Whether `key` names an identifier without saying which one.
pub fn is_ambiguous_identifier_key(key: &str) -> bool {
    AMBIGUOUS_ALIASES.contains(&normalize_key(key).as_str())
}

/// Lower-case and drop whitespace, `_`, `-` and `.` so `tracking_code`,
/// `Tracking Code` and `trackingCode` compare equal.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '.' | '\u{200C}'))
        .flat_map(char::to_lowercase)
        .collect()
}

// ── Schema modes ─────────────────────────────────────────────────────────

/// How the deposit identifier is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositMode {
    /// Literal digits as printed (default).
    #[default]
    Value,
    /// Reduced disclosure: only whether a deposit id is printed at all.
    Presence,
}

/// Whether the model is asked to identify the bank.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankMode {
    #[default]
    Extract,
    /// Bank identification intentionally off; `bankName` is always this value.
    Disabled { placeholder: String },
}

/// Reply shape the instruction asks for.
///
/// The normalizer accepts either shape regardless; this only controls the
/// output-format contract written into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Labels,
}

/// The two fixed tokens used by [`DepositMode::Presence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceTokens {
    pub present: String,
    pub absent: String,
}

impl Default for PresenceTokens {
    fn default() -> Self {
        Self {
            present: "present".to_string(),
            absent: "absent".to_string(),
        }
    }
}

/// Field-schema configuration shared by the prompt builder and reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub deposit_mode: DepositMode,
    pub bank_mode: BankMode,
    pub output_format: OutputFormat,
    /// Ask for, and enforce, the longer-is-reference identifier rule.
    pub identifier_tie_break: bool,
    pub presence_tokens: PresenceTokens,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            deposit_mode: DepositMode::default(),
            bank_mode: BankMode::default(),
            output_format: OutputFormat::default(),
            identifier_tie_break: true,
            presence_tokens: PresenceTokens::default(),
        }
    }
}

impl FieldSchema {
    /// Fields the model is asked to read.
    pub fn requested_fields(&self) -> Vec<ReceiptField> {
        ReceiptField::ALL
            .into_iter()
            .filter(|f| {
                !(matches!(f, ReceiptField::BankName)
                    && matches!(self.bank_mode, BankMode::Disabled { .. }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_key_accepts_source_spellings() {
        assert_eq!(ReceiptField::from_key("amount"), Some(ReceiptField::Amount));
        assert_eq!(
            ReceiptField::from_key("tracking_code"),
            Some(ReceiptField::TrackingCode)
        );
        assert_eq!(
            ReceiptField::from_key("TrackingCode"),
            Some(ReceiptField::TrackingCode)
        );
        assert_eq!(
            ReceiptField::from_key("Reference Number"),
            Some(ReceiptField::ReferenceNumber)
        );
        assert_eq!(
            ReceiptField::from_key("source_bank"),
            Some(ReceiptField::BankName)
        );
        assert_eq!(
            ReceiptField::from_key("شناسه واریز"),
            Some(ReceiptField::DepositId)
        );
        assert_eq!(ReceiptField::from_key("dest_card"), None);
    }

    #[test]
    fn canonical_keys_round_trip() {
        for f in ReceiptField::ALL {
            assert_eq!(ReceiptField::from_key(f.key()), Some(f));
        }
    }

    #[test]
    fn ambiguous_keys() {
        assert!(is_ambiguous_identifier_key("IDs"));
        assert!(is_ambiguous_identifier_key("reference_or_tracking"));
        assert!(!is_ambiguous_identifier_key("trackingCode"));
    }

    #[test]
    fn disabled_bank_is_not_requested() {
        let schema = FieldSchema {
            bank_mode: BankMode::Disabled {
                placeholder: "n/a".into(),
            },
            ..FieldSchema::default()
        };
        let fields = schema.requested_fields();
        assert!(!fields.contains(&ReceiptField::BankName));
        assert_eq!(fields.len(), 6);
    }
}
