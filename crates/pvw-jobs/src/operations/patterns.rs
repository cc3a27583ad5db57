//! Value patterns shared by the quality and compliance operations.

use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)https?://[^\s/$.?#][^\s]*$").unwrap());

/// Requires separators or a leading `+` so plain integers don't match.
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\+\d{1,3}[\s.-]?)?\(?\d{2,4}\)?[\s.-]\d{3,4}[\s.-]?\d{3,4}$").unwrap()
});

static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$").unwrap());

static CARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}([\s-]?\d{4}){2}[\s-]?\d{1,7}$").unwrap());

pub fn is_email(v: &str) -> bool {
    EMAIL.is_match(v.trim())
}

pub fn is_url(v: &str) -> bool {
    URL.is_match(v.trim())
}

pub fn is_ssn(v: &str) -> bool {
    SSN.is_match(v.trim())
}

pub fn is_phone(v: &str) -> bool {
    let v = v.trim();
    !is_ssn(v) && PHONE.is_match(v)
}

/// 13-19 digit card number passing the Luhn check.
pub fn is_credit_card(v: &str) -> bool {
    let v = v.trim();
    if !CARD.is_match(v) {
        return false;
    }
    let digits: Vec<u32> = v.chars().filter_map(|c| c.to_digit(10)).collect();
    (13..=19).contains(&digits.len()) && luhn_valid(&digits)
}

pub fn is_ip_address(v: &str) -> bool {
    v.trim().parse::<IpAddr>().is_ok()
}

fn luhn_valid(digits: &[u32]) -> bool {
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

/// Lowercase alphanumeric tokens of a column name (`Customer_Email` ->
/// `["customer", "email"]`, `ipAddress` -> `["ip", "address"]`).
pub fn name_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
