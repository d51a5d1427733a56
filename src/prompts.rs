//! Instruction text for VLM-based receipt extraction.
//!
//! The instruction is a configuration surface, but four parts of it are
//! mandatory for acceptable digit fidelity and are always emitted:
//!
//! 1. the exact target field list,
//! 2. the character-by-character accuracy contract,
//! 3. the identifier tie-break rule (when enabled in the schema),
//! 4. exactly one output-shape contract: JSON object *or* `LABEL: value` lines.
//!
//! Callers can override the whole text via
//! [`crate::config::ExtractionConfig::system_prompt`].

use crate::schema::{DepositMode, FieldSchema, OutputFormat, ReceiptField};
use std::fmt::Write as _;

/// User-turn text sent alongside the image.
pub const DEFAULT_USER_PROMPT: &str = "Extract data from this receipt image strictly.";

const PREAMBLE: &str = r#"You are a strict data-entry expert specializing in Iranian bank-transfer receipts.
Your goal is to extract data with 100% character-by-character accuracy."#;

const ACCURACY_RULES: &str = r#"ACCURACY RULES:
1. NUMBERS: Never change, round, or truncate numbers. Read every numeric string character by character and copy every digit exactly as printed.
2. ZEROS: Never drop leading or trailing zeros ('05' stays '05').
3. LONG IDS: For reference and tracking numbers, count the digits twice before answering.
4. DIGITS: Keep Persian digits as Persian digits; do not transliterate or reformat them.
5. NEVER GUESS: If a field is not printed on the receipt, report it as missing."#;

const TIE_BREAK_RULE: &str = r#"IDENTIFIERS:
If the receipt shows two identifying numbers and it is unclear which is which, put the LONGER digit string in the reference field and the SHORTER one in the tracking field. If only one identifying number is printed, put it in the reference field and report tracking as missing."#;

/// Build the instruction text for `schema`.
pub fn build_instruction(schema: &FieldSchema) -> String {
    let fields = schema.requested_fields();
    let mut out = String::with_capacity(2048);
    out.push_str(PREAMBLE);
    out.push_str("\n\n");
    out.push_str(ACCURACY_RULES);
    out.push_str("\n\n");

    if schema.identifier_tie_break {
        out.push_str(TIE_BREAK_RULE);
        out.push_str("\n\n");
    }

    out.push_str("FIELDS:\n");
    for field in &fields {
        let name = match schema.output_format {
            OutputFormat::Json => field.key(),
            OutputFormat::Labels => field.label(),
        };
        let _ = writeln!(out, "- {name}: {}", describe(*field, schema));
    }
    out.push('\n');

    match schema.output_format {
        OutputFormat::Json => {
            out.push_str("OUTPUT FORMAT:\nReturn ONLY one raw JSON object with exactly these keys: ");
            let keys: Vec<String> = fields.iter().map(|f| format!("\"{}\"", f.key())).collect();
            out.push_str(&keys.join(", "));
            out.push_str(
                ".\nEvery value is a string, or null when the field is missing. \
Do not wrap the JSON in markdown fences and do not add commentary.",
            );
        }
        OutputFormat::Labels => {
            out.push_str("OUTPUT FORMAT:\nReturn ONLY these lines, one per field, in this order:\n");
            for field in &fields {
                let _ = writeln!(out, "{}: <value>", field.label());
            }
            out.push_str(
                "Write NONE as the value when the field is missing. \
Do not return JSON, markdown, or commentary.",
            );
        }
    }

    out
}

fn describe(field: ReceiptField, schema: &FieldSchema) -> String {
    match (field, schema.deposit_mode) {
        (ReceiptField::DepositId, DepositMode::Presence) => {
            "\"true\" if a deposit identifier (شناسه واریز) is printed, otherwise \"false\"".to_string()
        }
        _ => field.describe().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BankMode;

    #[test]
    fn json_prompt_lists_fields_and_contract() {
        let p = build_instruction(&FieldSchema::default());
        for f in ReceiptField::ALL {
            assert!(p.contains(f.key()), "missing {f} in prompt");
        }
        assert!(p.contains("character by character"));
        assert!(p.contains("JSON object"));
        assert!(!p.contains("<value>"));
        assert!(p.contains("LONGER digit string"));
    }

    #[test]
    fn label_prompt_uses_labels_only() {
        let schema = FieldSchema {
            output_format: OutputFormat::Labels,
            ..FieldSchema::default()
        };
        let p = build_instruction(&schema);
        assert!(p.contains("TRACKING: <value>"));
        assert!(p.contains("Do not return JSON"));
        assert!(!p.contains("raw JSON object"));
    }

    #[test]
    fn tie_break_is_optional() {
        let schema = FieldSchema {
            identifier_tie_break: false,
            ..FieldSchema::default()
        };
        assert!(!build_instruction(&schema).contains("LONGER digit string"));
    }

    #[test]
    fn disabled_bank_is_omitted() {
        let schema = FieldSchema {
            bank_mode: BankMode::Disabled {
                placeholder: "n/a".into(),
            },
            ..FieldSchema::default()
        };
        assert!(!build_instruction(&schema).contains("bankName"));
    }

    #[test]
    fn presence_mode_asks_for_boolean() {
        let schema = FieldSchema {
            deposit_mode: DepositMode::Presence,
            ..FieldSchema::default()
        };
        assert!(build_instruction(&schema).contains("\"true\" if a deposit identifier"));
    }
}
