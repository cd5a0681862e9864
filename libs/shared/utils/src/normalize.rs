//! Canonical forms for contact data and free text.
//!
//! Identity matching compares the outputs of these functions only, so any
//! value written to a patient row has passed through here first.

const HONORIFICS: [&str; 3] = ["様", "さん", "殿"];

/// Fold full-width ASCII, ideographic space and dash/tilde variants to ASCII.
pub fn fold_width(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            '\u{3000}' => ' ',
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => '-',
            '\u{301C}' => '~',
            _ => c,
        })
        .collect()
}

/// Digits only; a `+81` country prefix becomes the domestic leading `0`.
pub fn normalize_phone(raw: &str) -> String {
    let folded = fold_width(raw);
    let trimmed = folded.trim();

    let (international, rest) = match trimmed.strip_prefix("+81") {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();

    if international {
        let national = digits.trim_start_matches('0');
        format!("0{}", national)
    } else {
        digits
    }
}

pub fn normalize_email(raw: &str) -> String {
    fold_width(raw).trim().to_lowercase()
}

/// Drops trailing honorifics (`様`, `さん`, `殿`) and surrounding whitespace.
pub fn strip_honorific(name: &str) -> String {
    let mut current = name.trim();
    loop {
        let stripped = HONORIFICS
            .iter()
            .find_map(|suffix| current.strip_suffix(suffix))
            .map(str::trim_end);
        match stripped {
            Some(rest) if rest != current => current = rest,
            _ => break,
        }
    }
    current.to_string()
}
