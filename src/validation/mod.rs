use std::fmt;

use crate::domain::{Currency, PaymentReferences, Recipient, Settlement};

pub const RECIPIENT_NAME_MAX_LEN: usize = 120;
pub const PIX_KEY_MAX_LEN: usize = 77;
pub const CHAIN_ADDRESS_HEX_LEN: usize = 40;
pub const REFERENCE_MAX_LEN: usize = 64;
pub const DESCRIPTION_MAX_LEN: usize = 280;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// `0x` followed by 40 hex digits.
pub fn validate_chain_address(field: &'static str, address: &str) -> ValidationResult {
    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| ValidationError::new(field, "must start with '0x'"))?;

    if digits.len() != CHAIN_ADDRESS_HEX_LEN {
        return Err(ValidationError::new(
            field,
            format!("must have exactly {} hex digits after '0x'", CHAIN_ADDRESS_HEX_LEN),
        ));
    }

    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(ValidationError::new(field, "must contain only hex digits"));
    }

    Ok(())
}

pub fn validate_pix_key(field: &'static str, key: &str) -> ValidationResult {
    validate_required(field, key)?;
    validate_max_len(field, key, PIX_KEY_MAX_LEN)
}

fn optional_reference(
    field: &'static str,
    value: &Option<String>,
    max_len: usize,
) -> Result<Option<String>, ValidationError> {
    match value.as_deref().map(sanitize_string) {
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => {
            validate_max_len(field, &value, max_len)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Sanitizes and checks the recipient and references of an outbound payment.
/// The destination format depends on how `currency` settles.
pub fn normalize_payment(
    currency: Currency,
    recipient: &Recipient,
    references: &PaymentReferences,
) -> Result<(Recipient, PaymentReferences), ValidationError> {
    let name = sanitize_string(&recipient.name);
    validate_required("recipient_name", &name)?;
    validate_max_len("recipient_name", &name, RECIPIENT_NAME_MAX_LEN)?;

    let account = sanitize_string(&recipient.account);
    match currency.settlement() {
        Settlement::Instant => validate_pix_key("recipient_account", &account)?,
        Settlement::Chain(_) => validate_chain_address("recipient_account", &account)?,
    }

    let references = PaymentReferences {
        invoice_number: optional_reference("invoice_number", &references.invoice_number, REFERENCE_MAX_LEN)?,
        shipment_number: optional_reference("shipment_number", &references.shipment_number, REFERENCE_MAX_LEN)?,
        description: optional_reference("description", &references.description, DESCRIPTION_MAX_LEN)?,
    };

    Ok((Recipient { name, account }, references))
}
