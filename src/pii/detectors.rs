//! Per-type PII detectors.
//!
//! Each detector combines a value pattern (strong signal, >= 0.9) with
//! field-name heuristics (weaker, 0.7-0.8). Brazilian document numbers
//! (CPF, CNPJ) validate their checksum digits before claiming the
//! strong signal.

use crate::error::{ComplianceError, Result};
use regex::Regex;

use super::{PiiDetector, PiiType, Sensitivity, Signal};

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ComplianceError::Pii {
        message: format!("invalid detector pattern: {e}"),
    })
}

fn field_matches(field: &str, names: &[&str]) -> bool {
    let lower = field.to_lowercase();
    names.iter().any(|n| lower.contains(n))
}

/// Brazilian CPF (individual taxpayer registry).
pub struct CpfDetector {
    pattern: Regex,
}

impl CpfDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(r"^\d{3}\.?\d{3}\.?\d{3}-?\d{2}$")?,
        })
    }
}

impl PiiDetector for CpfDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::Cpf
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Restricted
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if self.pattern.is_match(value.trim()) && cpf_checksum_valid(value) {
            return Some(Signal::new(0.98, "checksum"));
        }
        if field_matches(field, &["cpf"]) {
            return Some(Signal::new(0.8, "field_name"));
        }
        None
    }
}

/// Validate the two CPF verifier digits.
///
/// Strips formatting first; an 11-digit run of a single repeated digit
/// passes the arithmetic but is a known-invalid document, so it is
/// rejected up front.
pub fn cpf_checksum_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    let check = |take: usize, start_weight: u32| -> u32 {
        let sum: u32 = digits[..take]
            .iter()
            .enumerate()
            .map(|(i, &d)| d * (start_weight - i as u32))
            .sum();
        let d = (sum * 10) % 11;
        if d == 10 {
            0
        } else {
            d
        }
    };

    check(9, 10) == digits[9] && check(10, 11) == digits[10]
}

/// Brazilian CNPJ (company registry).
pub struct CnpjDetector {
    pattern: Regex,
}

impl CnpjDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(r"^\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}$")?,
        })
    }
}

impl PiiDetector for CnpjDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::Cnpj
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Confidential
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if self.pattern.is_match(value.trim()) && cnpj_checksum_valid(value) {
            return Some(Signal::new(0.98, "checksum"));
        }
        if field_matches(field, &["cnpj"]) {
            return Some(Signal::new(0.8, "field_name"));
        }
        None
    }
}

/// Validate the two CNPJ verifier digits (weighted mod-11).
pub fn cnpj_checksum_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 14 {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    const W1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const W2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let check = |weights: &[u32]| -> u32 {
        let sum: u32 = digits
            .iter()
            .zip(weights.iter())
            .map(|(&d, &w)| d * w)
            .sum();
        let rem = sum % 11;
        if rem < 2 {
            0
        } else {
            11 - rem
        }
    };

    check(&W1) == digits[12] && check(&W2) == digits[13]
}

pub struct EmailDetector {
    pattern: Regex,
}

impl EmailDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")?,
        })
    }
}

impl PiiDetector for EmailDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::Email
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Confidential
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if self.pattern.is_match(value.trim()) {
            return Some(Signal::new(0.95, "pattern"));
        }
        if field_matches(field, &["email", "e_mail", "mail"]) {
            return Some(Signal::new(0.7, "field_name"));
        }
        None
    }
}

pub struct CreditCardDetector {
    pattern: Regex,
}

impl CreditCardDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(r"^\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{1,7}$")?,
        })
    }
}

impl PiiDetector for CreditCardDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::CreditCard
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Restricted
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if self.pattern.is_match(value.trim()) && luhn_valid(value) {
            return Some(Signal::new(0.95, "luhn"));
        }
        if field_matches(field, &["card", "credit_card", "pan"]) {
            return Some(Signal::new(0.75, "field_name"));
        }
        None
    }
}

/// Luhn check over the digit characters of the value (13-19 digits).
pub fn luhn_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

pub struct PhoneDetector {
    pattern: Regex,
}

impl PhoneDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(r"^\+?[1-9]?[\d\s\-()]{7,15}$")?,
        })
    }
}

impl PiiDetector for PhoneDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::Phone
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Confidential
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if self.pattern.is_match(value.trim()) {
            return Some(Signal::new(0.8, "pattern"));
        }
        if field_matches(field, &["phone", "telephone", "telefone", "mobile", "celular"]) {
            return Some(Signal::new(0.7, "field_name"));
        }
        None
    }
}

pub struct IpAddressDetector {
    pattern: Regex,
}

impl IpAddressDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(
                r"^((25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)$",
            )?,
        })
    }
}

impl PiiDetector for IpAddressDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::IpAddress
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Internal
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if self.pattern.is_match(value.trim()) {
            return Some(Signal::new(0.9, "pattern"));
        }
        if field_matches(field, &["ip_address", "ip_addr", "client_ip"]) {
            return Some(Signal::new(0.7, "field_name"));
        }
        None
    }
}

/// Personal names have no usable value pattern; this detector relies on
/// field naming alone.
pub struct NameDetector;

impl NameDetector {
    pub fn new() -> Self {
        Self
    }
}

impl PiiDetector for NameDetector {
    fn pii_type(&self) -> PiiType {
        PiiType::Name
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Confidential
    }

    fn detect(&self, field: &str, value: &str) -> Option<Signal> {
        if value.trim().is_empty() {
            return None;
        }
        if field_matches(field, &["full_name", "first_name", "last_name", "surname", "nome"]) {
            return Some(Signal::new(0.7, "field_name"));
        }
        let lower = field.to_lowercase();
        if lower == "name" || lower.ends_with("_name") {
            return Some(Signal::new(0.7, "field_name"));
        }
        None
    }
}
