//! Phone number canonicalisation.
//!
//! Anywhere a phone number is stored, compared, or looked up in the global
//! opt-out table, it first passes through [`normalize`].

/// Canonicalise a user-supplied phone number towards E.164.
///
/// Strips every non-digit character; a bare ten-digit national number gets the
/// US country code prepended. The function is deliberately non-total: junk
/// input yields a junk `+...` string rather than an error, and validating the
/// result is the caller's responsibility.
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 10 {
        format!("+1{digits}")
    } else {
        format!("+{digits}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::national_ten_digit("(415) 555-1212", "+14155551212")]
    #[case::dotted("415.555.1212", "+14155551212")]
    #[case::already_e164("+14155551212", "+14155551212")]
    #[case::eleven_digits("14155551212", "+14155551212")]
    #[case::international("+44 20 7946 0958", "+442079460958")]
    fn normalizes_common_shapes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize(raw), expected);
    }

    #[rstest]
    fn junk_input_does_not_fail() {
        assert_eq!(normalize("call me"), "+");
        assert_eq!(normalize("x1y2"), "+12");
    }
}
