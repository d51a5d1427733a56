//! Field reconciliation: candidate mapping → canonical [`ReceiptRecord`].
//!
//! Rules, in order:
//!
//! 1. keys are resolved through the alias table of [`ReceiptField`]
//!    (case-, separator- and spelling-tolerant); unknown keys are ignored
//! 2. digit fields lose thousands separators and the spaces inside one
//!    grouped number; separate numbers are never merged and the value is
//!    never parsed as a number
//! 3. identifiers filed under an ambiguous key go through the tie-break:
//!    longest digit string → `referenceNumber`, next → `trackingCode`,
//!    a lone identifier → `referenceNumber` only
//! 4. presence mode collapses `depositId` to one of two fixed tokens
//! 5. disabled bank identification pins `bankName` to its placeholder
//!
//! Anything not reported stays [`FieldValue::Absent`]. The function is pure,
//! so reconciling the same mapping twice yields identical records.

use crate::record::{CandidateFields, FieldValue, ReceiptRecord};
use crate::schema::{
    is_ambiguous_identifier_key, normalize_key, BankMode, DepositMode, FieldSchema,
    PresenceTokens, ReceiptField,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Build the canonical record from a candidate mapping.
pub fn reconcile(candidates: &CandidateFields, schema: &FieldSchema) -> ReceiptRecord {
    let mut slots: BTreeMap<ReceiptField, (FieldValue, bool)> = BTreeMap::new();
    let mut pool: Vec<String> = Vec::new();

    for (key, value) in candidates {
        if let Some(field) = ReceiptField::from_key(key) {
            let canonical = normalize_key(key) == normalize_key(field.key());
            let replace = match slots.get(&field) {
                None => true,
                Some((current, current_canonical)) => {
                    (current.is_absent() && !value.is_absent())
                        || (canonical && !current_canonical && !value.is_absent())
                }
            };
            if replace {
                slots.insert(field, (value.clone(), canonical));
            }
        } else if is_ambiguous_identifier_key(key) {
            if let FieldValue::Found(v) = value {
                pool.extend(split_identifiers(v));
            }
        } else {
            debug!("Ignoring unrecognised key '{}'", key);
        }
    }

    let mut take = |field: ReceiptField| -> FieldValue {
        let value = slots.remove(&field).map(|(v, _)| v).unwrap_or_default();
        match value {
            FieldValue::Found(s) if field.is_digit_field() => FieldValue::Found(clean_digits(&s)),
            FieldValue::Found(s) => FieldValue::Found(s.trim().to_string()),
            FieldValue::Absent => FieldValue::Absent,
        }
    };

    let amount = take(ReceiptField::Amount);
    let deposit = take(ReceiptField::DepositId);
    let mut tracking = take(ReceiptField::TrackingCode);
    let mut reference = take(ReceiptField::ReferenceNumber);
    let bank = take(ReceiptField::BankName);
    let date = take(ReceiptField::Date);
    let time = take(ReceiptField::Time);

    if schema.identifier_tie_break && !pool.is_empty() {
        (tracking, reference) = tie_break(tracking, reference, pool);
    }

    let deposit = match schema.deposit_mode {
        DepositMode::Value => deposit,
        DepositMode::Presence => collapse_presence(deposit, &schema.presence_tokens),
    };

    let bank = match &schema.bank_mode {
        BankMode::Extract => bank,
        BankMode::Disabled { placeholder } => FieldValue::Found(placeholder.clone()),
    };

    ReceiptRecord::default()
        .with(ReceiptField::Amount, amount)
        .with(ReceiptField::DepositId, deposit)
        .with(ReceiptField::TrackingCode, tracking)
        .with(ReceiptField::ReferenceNumber, reference)
        .with(ReceiptField::BankName, bank)
        .with(ReceiptField::Date, date)
        .with(ReceiptField::Time, time)
}

// ── Digit strings ────────────────────────────────────────────────────────

/// ASCII, Persian (U+06F0–06F9) and Arabic-Indic (U+0660–0669) digits.
pub fn is_digit(c: char) -> bool {
    c.is_ascii_digit() || ('\u{06F0}'..='\u{06F9}').contains(&c) || ('\u{0660}'..='\u{0669}').contains(&c)
}

fn is_thousands_separator(c: char) -> bool {
    matches!(c, ',' | '\u{066C}' | '\u{060C}' | '\'')
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| is_digit(*c)).count()
}

/// True when the whitespace-separated tokens read as one grouped number
/// (`1 500 000`, `5451 0188 65`) rather than several separate numbers.
fn is_grouped_number(tokens: &[&str]) -> bool {
    let groups: Vec<usize> = tokens
        .iter()
        .map(|t| digit_count(t))
        .filter(|n| *n > 0)
        .collect();
    groups.len() < 2 || groups.iter().all(|n| *n <= MAX_GROUP_DIGITS)
}

/// Longest digit group still treated as part of a spaced-out number.
const MAX_GROUP_DIGITS: usize = 4;

/// Drop a thousands separator only where it sits between a digit and
/// exactly three more digits, so `5451018865,1403...` is not glued.
fn strip_thousands_separators(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let mut out = String::with_capacity(token.len());
    for (i, &c) in chars.iter().enumerate() {
        if is_thousands_separator(c) && i > 0 && is_digit(chars[i - 1]) {
            let group = chars[i + 1..].iter().take_while(|c| is_digit(**c)).count();
            if group == 3 {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Remove thousands separators and the spaces inside one grouped number.
/// When exactly one digit run remains, return just that run (drops `#`,
/// currency words and the like); otherwise return the cleaned text so no
/// digit is lost and separate numbers are never merged.
pub fn clean_digits(value: &str) -> String {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let glue = is_grouped_number(&tokens);

    let mut cleaned = String::with_capacity(value.len());
    for token in tokens {
        let token = strip_thousands_separators(token);
        if let Some(prev) = cleaned.chars().last() {
            let joins_digits = is_digit(prev) && token.chars().next().is_some_and(is_digit);
            if !(glue && joins_digits) {
                cleaned.push(' ');
            }
        }
        cleaned.push_str(&token);
    }

    let mut runs = cleaned
        .split(|c: char| !is_digit(c))
        .filter(|run| !run.is_empty());
    match (runs.next(), runs.next()) {
        (Some(only), None) => only.to_string(),
        _ => cleaned,
    }
}

/// Split an ambiguous identifier value into individual digit strings.
/// Whitespace separates identifiers too unless it only groups one number.
fn split_identifiers(value: &str) -> Vec<String> {
    value
        .split([',', ';', '|', '/', '\n'])
        .flat_map(|piece| {
            let tokens: Vec<&str> = piece.split_whitespace().collect();
            if is_grouped_number(&tokens) {
                vec![clean_digits(piece)]
            } else {
                tokens.into_iter().map(clean_digits).collect()
            }
        })
        .filter(|s| digit_count(s) > 0)
        .collect()
}

// ── Identifier tie-break ─────────────────────────────────────────────────

/// Assign identifiers by length when their roles are unclear.
fn tie_break(
    tracking: FieldValue,
    reference: FieldValue,
    pool: Vec<String>,
) -> (FieldValue, FieldValue) {
    let mut ids: Vec<String> = Vec::new();
    for id in reference
        .as_deref()
        .into_iter()
        .chain(tracking.as_deref())
        .map(str::to_string)
        .chain(pool)
    {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    // Stable: equal lengths keep order of appearance.
    ids.sort_by_key(|id| std::cmp::Reverse(digit_count(id)));

    match ids.len() {
        0 => (tracking, reference),
        1 => {
            debug!("Tie-break: single identifier assigned to referenceNumber");
            (FieldValue::Absent, FieldValue::Found(ids.swap_remove(0)))
        }
        n => {
            if n > 2 {
                debug!("Tie-break: {} identifiers, keeping the two longest", n);
            }
            let mut it = ids.into_iter();
            let longest = it.next().unwrap_or_default();
            let next = it.next().unwrap_or_default();
            debug!(
                "Tie-break: {}-digit → referenceNumber, {}-digit → trackingCode",
                digit_count(&longest),
                digit_count(&next)
            );
            (FieldValue::Found(next), FieldValue::Found(longest))
        }
    }
}

// ── Presence mode ────────────────────────────────────────────────────────

fn collapse_presence(value: FieldValue, tokens: &PresenceTokens) -> FieldValue {
    let FieldValue::Found(s) = value else {
        return FieldValue::Absent;
    };
    let v = s.trim().to_lowercase();
    let present = if v == tokens.present.to_lowercase() {
        true
    } else if v.is_empty() || v == tokens.absent.to_lowercase() {
        false
    } else {
        !matches!(
            v.as_str(),
            "false" | "no" | "absent" | "not present" | "ندارد" | "خیر" | "نیست"
        )
    };
    FieldValue::Found(if present {
        tokens.present.clone()
    } else {
        tokens.absent.clone()
    })
}
