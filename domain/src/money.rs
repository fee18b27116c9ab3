//! USD display formatting for amounts.

/// Format an amount the way the UI shows it: dollar sign, two decimal
/// places, thousands grouping. `123.45` → `"$123.45"`, `1234.5` →
/// `"$1,234.50"`. Amounts are positive by validation; negatives are
/// rendered with a leading minus for robustness.
pub fn format_usd(amount: f64) -> String {
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = cents / 100;
    let rem = cents % 100;

    let digits = dollars.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if negative {
        format!("-${}.{:02}", grouped, rem)
    } else {
        format!("${}.{:02}", grouped, rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_plain_amounts() {
        assert_eq!(format_usd(123.45), "$123.45");
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(7.0), "$7.00");
    }

    #[test]
    fn rounds_to_cents() {
        assert_eq!(format_usd(1.006), "$1.01");
        assert_eq!(format_usd(2.999), "$3.00");
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(format_usd(1234.5), "$1,234.50");
        assert_eq!(format_usd(1_000_000.0), "$1,000,000.00");
        assert_eq!(format_usd(999.99), "$999.99");
    }
}
