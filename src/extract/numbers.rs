//! Spelling out numbers so they survive digit stripping as words.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 4] = [
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Longer digit runs are read digit by digit (account numbers, phone numbers, ...).
const MAX_CARDINAL_DIGITS: usize = 15;

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \$\s?(?P<dollars>\d{1,3}(?:,\d{3})+|\d+)(?:\.(?P<cents>\d{1,2}))?
        | (?P<pnum>\d+(?:\.\d+)?)\s?%
        | (?P<whole>\d+)\.(?P<frac>\d+)
        | (?P<grouped>\d{1,3}(?:,\d{3})+)
        | (?P<int>\d+)
        ",
    )
    .expect("number pattern is valid")
});

/// Spells out a cardinal number.
///
/// # Examples
///
/// ```
/// use craml::extract::number_to_words;
///
/// assert_eq!(number_to_words(0), "zero");
/// assert_eq!(number_to_words(42), "forty two");
/// assert_eq!(number_to_words(1_205), "one thousand two hundred five");
/// ```
pub fn number_to_words(n: u64) -> String {
    if n < 20 {
        return ONES[n as usize].to_string();
    }
    if n < 100 {
        let tens = TENS[(n / 10) as usize];
        return match n % 10 {
            0 => tens.to_string(),
            rest => format!("{tens} {}", ONES[rest as usize]),
        };
    }
    if n < 1_000 {
        let head = format!("{} hundred", ONES[(n / 100) as usize]);
        return match n % 100 {
            0 => head,
            rest => format!("{head} {}", number_to_words(rest)),
        };
    }
    for (scale, name) in SCALES {
        if n >= scale {
            let head = format!("{} {name}", number_to_words(n / scale));
            return match n % scale {
                0 => head,
                rest => format!("{head} {}", number_to_words(rest)),
            };
        }
    }
    unreachable!("every n >= 1000 is covered by a scale")
}

/// Reads a four-digit year the way it is spoken: 1999 → "nineteen ninety nine",
/// 2005 → "two thousand five", 1905 → "nineteen oh five".
pub fn year_to_words(year: u64) -> String {
    if (2000..=2009).contains(&year) {
        return number_to_words(year);
    }
    let (high, low) = (year / 100, year % 100);
    match low {
        0 => format!("{} hundred", number_to_words(high)),
        1..=9 => format!("{} oh {}", number_to_words(high), number_to_words(low)),
        _ => format!("{} {}", number_to_words(high), number_to_words(low)),
    }
}

fn digits_to_words(digits: &str) -> String {
    digits
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| ONES[d as usize])
        .collect::<Vec<_>>()
        .join(" ")
}

fn cardinal(digits: &str) -> String {
    let digits: String = digits.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > MAX_CARDINAL_DIGITS {
        return digits_to_words(&digits);
    }
    digits
        .parse::<u64>()
        .map(number_to_words)
        .unwrap_or_else(|_| digits_to_words(&digits))
}

fn plural(count: &str, one: &str, many: &str) -> String {
    let words = cardinal(count);
    if words == "one" {
        format!("{words} {one}")
    } else {
        format!("{words} {many}")
    }
}

fn decimal(whole: &str, frac: &str) -> String {
    format!("{} point {}", cardinal(whole), digits_to_words(frac))
}

fn is_year(digits: &str) -> bool {
    digits.len() == 4
        && digits
            .parse::<u64>()
            .is_ok_and(|y| (1100..=2099).contains(&y))
}

fn verbalize(caps: &Captures<'_>) -> String {
    let words = if let Some(dollars) = caps.name("dollars") {
        let mut words = plural(dollars.as_str(), "dollar", "dollars");
        if let Some(cents) = caps.name("cents") {
            // ".5" means fifty cents
            let cents = format!("{:0<2}", cents.as_str());
            if cents != "00" {
                words.push(' ');
                words.push_str(&plural(&cents, "cent", "cents"));
            }
        }
        words
    } else if let Some(pnum) = caps.name("pnum") {
        let value = match pnum.as_str().split_once('.') {
            Some((whole, frac)) => decimal(whole, frac),
            None => cardinal(pnum.as_str()),
        };
        format!("{value} percent")
    } else if let (Some(whole), Some(frac)) = (caps.name("whole"), caps.name("frac")) {
        decimal(whole.as_str(), frac.as_str())
    } else if let Some(grouped) = caps.name("grouped") {
        cardinal(grouped.as_str())
    } else if let Some(int) = caps.name("int") {
        if is_year(int.as_str()) {
            year_to_words(int.as_str().parse().unwrap_or_default())
        } else {
            cardinal(int.as_str())
        }
    } else {
        String::new()
    };
    format!(" {words} ")
}

/// Replaces every number in `text` with words, handling currency, percentages, decimals,
/// thousands separators and years.
pub fn spell_out_numbers(text: &str) -> String {
    NUMBER.replace_all(text, verbalize).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn cardinals() {
        assert_eq!(number_to_words(100), "one hundred");
        assert_eq!(number_to_words(1_000_000), "one million");
        assert_eq!(
            number_to_words(3_000_017),
            "three million seventeen"
        );
    }

    #[test]
    fn years() {
        assert_eq!(year_to_words(1999), "nineteen ninety nine");
        assert_eq!(year_to_words(2005), "two thousand five");
        assert_eq!(year_to_words(2021), "twenty twenty one");
        assert_eq!(year_to_words(1900), "nineteen hundred");
        assert_eq!(year_to_words(1905), "nineteen oh five");
    }

    #[test]
    fn currency() {
        assert_eq!(
            squash(&spell_out_numbers("paid $5.25 today")),
            "paid five dollars twenty five cents today"
        );
        assert_eq!(squash(&spell_out_numbers("$1")), "one dollar");
        assert_eq!(
            squash(&spell_out_numbers("$1,200.5")),
            "one thousand two hundred dollars fifty cents"
        );
    }

    #[test]
    fn percent_decimal_and_grouping() {
        assert_eq!(squash(&spell_out_numbers("up 12%")), "up twelve percent");
        assert_eq!(squash(&spell_out_numbers("3.14")), "three point one four");
        assert_eq!(squash(&spell_out_numbers("10,000 units")), "ten thousand units");
    }

    #[test]
    fn years_only_in_range() {
        assert_eq!(squash(&spell_out_numbers("in 1987")), "in nineteen eighty seven");
        assert_eq!(squash(&spell_out_numbers("3000 items")), "three thousand items");
    }

    #[test]
    fn long_digit_runs_read_digit_by_digit() {
        assert_eq!(
            squash(&spell_out_numbers("1234567890123456")),
            "one two three four five six seven eight nine zero one two three four five six"
        );
    }
}
