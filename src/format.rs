//! Compact display formatting for the dashboard stat cards.
//!
//! Pure functions of their numeric input; the host UI decides where the
//! strings go. Rounding is half-away-from-zero to match the card labels
//! the desktop shell has always shown.

/// Currency suffix used across the dashboard.
pub const CURRENCY_SUFFIX: &str = "EGP";

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Compact currency string: millions with one decimal, thousands with
/// none, small amounts as a plain integer.
pub fn format_currency(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        format!("{:.1}M {CURRENCY_SUFFIX}", round_to(amount / 1_000_000.0, 1))
    } else if amount >= 1_000.0 {
        format!("{:.0}K {CURRENCY_SUFFIX}", round_to(amount / 1_000.0, 0))
    } else {
        format!("{:.0} {CURRENCY_SUFFIX}", round_to(amount, 0))
    }
}

/// Currency with an explicit sign, for net figures. Zero stays bare.
pub fn format_signed_currency(amount: f64) -> String {
    if amount > 0.0 {
        format!("+ {}", format_currency(amount))
    } else if amount < 0.0 {
        format!("- {}", format_currency(-amount))
    } else {
        format_currency(0.0)
    }
}

/// Whole-number percentage.
pub fn format_percent(value: f64) -> String {
    format!("{:.0}%", round_to(value, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millions_get_one_decimal() {
        assert_eq!(format_currency(1_250_000.0), "1.3M EGP");
        assert_eq!(format_currency(1_000_000.0), "1.0M EGP");
        assert_eq!(format_currency(12_340_000.0), "12.3M EGP");
    }

    #[test]
    fn thousands_get_no_decimals() {
        assert_eq!(format_currency(850_000.0), "850K EGP");
        assert_eq!(format_currency(1_500.0), "2K EGP");
        assert_eq!(format_currency(1_000.0), "1K EGP");
    }

    #[test]
    fn small_amounts_are_plain_integers() {
        assert_eq!(format_currency(850.0), "850 EGP");
        assert_eq!(format_currency(0.0), "0 EGP");
        assert_eq!(format_currency(999.4), "999 EGP");
    }

    #[test]
    fn negative_amounts_fall_through_to_the_integer_tier() {
        assert_eq!(format_currency(-500.0), "-500 EGP");
    }

    #[test]
    fn signed_currency_prefixes_net_figures() {
        assert_eq!(format_signed_currency(2_500.0), "+ 3K EGP");
        assert_eq!(format_signed_currency(-850.0), "- 850 EGP");
        assert_eq!(format_signed_currency(0.0), "0 EGP");
    }

    #[test]
    fn percent_is_whole_number() {
        assert_eq!(format_percent(75.0), "75%");
        assert_eq!(format_percent(74.5), "75%");
        assert_eq!(format_percent(0.0), "0%");
    }
}
