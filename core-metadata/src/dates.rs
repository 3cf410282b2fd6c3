//! Decade facets from free-form `date` values
//!
//! Recognized forms, tried left to right at each position:
//! - centuries: `19th century`, `5th c. BC`
//! - ranges: `1920-1935`, `1920/05 - 1931`, `500-400 BC`
//! - uncertain years: `199?`, `199-`, `1995?`
//! - years: 3 or 4 digits (`1920s` included) with an optional era suffix, or 1 or 2 digits
//!   with a mandatory suffix (`45 BC`)
//!
//! Years before the common era are negative; decades floor toward negative
//! infinity, so 45 BC falls in the `-50` decade.

use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::LazyLock;

const SUFFIX: &str = r"B\.C\.E\.|BCE|B\.C\.|BC|A\.D\.|AD|C\.E\.|CE";

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?x)
        (?P<century>\b(?:1st|2nd|3rd|(?:[4-9]|1[0-9]|20)th)\s+[cC](?:entury|\.)?(?:\s+(?P<csuffix>{s}))?)
        |
        (?P<range>\b(?P<r1>[1-9]\d{{2,3}})(?:[-/](?:0[1-9]|1[0-2]))?(?:\s+(?P<r1suffix>{s}))?
            \s*[-/]\s*
            (?P<r2>[1-9]\d{{2,3}})\b(?:[-/](?:0[1-9]|1[0-2])\b)?(?:\s+(?P<r2suffix>{s}))?)
        |
        (?P<uncertain>\b[1-9]\d{{1,3}})[-*?]
        |
        \b(?P<year>[1-9]\d{{2,3}})(?:s|'s)?\b(?:\s+(?P<ysuffix>{s}))?
        |
        (?P<short>\b[1-9]\d?)\s+(?P<ssuffix>{s})
        ",
        s = SUFFIX
    );
    Regex::new(&pattern).expect("date pattern is a valid regex")
});

/// A year or an inclusive span of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum YearSpan {
    Year(i32),
    Range(i32, i32),
}

fn is_bce(suffix: Option<&str>) -> bool {
    suffix.is_some_and(|s| s.starts_with('B'))
}

fn signed(digits: &str, suffix: Option<&str>) -> Option<i32> {
    let year: i32 = digits.parse().ok()?;
    Some(if is_bce(suffix) { -year } else { year })
}

fn span_from(caps: &Captures<'_>) -> Option<YearSpan> {
    let text = |name: &str| caps.name(name).map(|m| m.as_str());

    if let Some(century) = text("century") {
        let ordinal: i32 = century
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok()?;
        return Some(if is_bce(text("csuffix")) {
            YearSpan::Range(-100 * ordinal, -100 * ordinal + 99)
        } else {
            YearSpan::Range(100 * (ordinal - 1), 100 * (ordinal - 1) + 99)
        });
    }

    if text("range").is_some() {
        let first_suffix = text("r1suffix");
        let mut start = signed(text("r1")?, first_suffix)?;
        let end = signed(text("r2")?, text("r2suffix"))?;
        // "500-400 BC": the era applies to both ends.
        if first_suffix.is_none() && end <= 0 {
            start = -start;
        }
        return Some(YearSpan::Range(start, end));
    }

    if let Some(uncertain) = text("uncertain") {
        let year: i32 = uncertain.parse().ok()?;
        return Some(if uncertain.len() == 4 {
            YearSpan::Year(year)
        } else {
            YearSpan::Year(year * 10)
        });
    }

    if let Some(year) = text("year") {
        return signed(year, text("ysuffix")).map(YearSpan::Year);
    }

    if let Some(short) = text("short") {
        return signed(short, text("ssuffix")).map(YearSpan::Year);
    }

    None
}

fn decade_of(year: i32) -> i32 {
    year.div_euclid(10) * 10
}

/// Every year and year range mentioned in `value`.
fn spans(value: &str) -> Vec<YearSpan> {
    DATE_PATTERN
        .captures_iter(value)
        .filter_map(|caps| span_from(&caps))
        .collect()
}

/// Decades covered by the given date strings, ascending.
pub fn decades<'a, I>(values: I) -> BTreeSet<i32>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut decades = BTreeSet::new();
    for value in values {
        for span in spans(value) {
            match span {
                YearSpan::Year(year) => {
                    decades.insert(decade_of(year));
                }
                YearSpan::Range(start, end) if start <= end => {
                    decades.extend((decade_of(start)..=end).step_by(10));
                }
                YearSpan::Range(_, _) => {}
            }
        }
    }
    decades
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decades_of(value: &str) -> Vec<i32> {
        decades([value]).into_iter().collect()
    }

    #[test]
    fn test_plain_years() {
        assert_eq!(decades_of("1923"), vec![1920]);
        assert_eq!(decades_of("circa 1887, reprinted 1901"), vec![1880, 1900]);
        assert_eq!(decades_of("1923-05-12"), vec![1920]);
        assert_eq!(decades_of("950 AD"), vec![950]);
        assert_eq!(decades_of("the 1920s"), vec![1920]);
    }

    #[test]
    fn test_era_suffixes() {
        assert_eq!(decades_of("45 BC"), vec![-50]);
        assert_eq!(decades_of("300 BCE"), vec![-300]);
        assert!(decades_of("45").is_empty());
    }

    #[test]
    fn test_ranges() {
        assert_eq!(decades_of("1920-1945"), vec![1920, 1930, 1940]);
        assert_eq!(decades_of("1918 / 1921"), vec![1910, 1920]);
        assert_eq!(decades_of("500-480 BC"), vec![-500, -490, -480]);
        assert!(decades_of("1950-1940").is_empty());
    }

    #[test]
    fn test_centuries() {
        let nineteenth = decades_of("19th century");
        assert_eq!(nineteenth.first(), Some(&1800));
        assert_eq!(nineteenth.last(), Some(&1890));
        assert_eq!(nineteenth.len(), 10);

        let bc = decades_of("5th c. BC");
        assert_eq!(bc.first(), Some(&-500));
        assert_eq!(bc.last(), Some(&-410));
    }

    #[test]
    fn test_uncertain_years() {
        assert_eq!(decades_of("199?"), vec![1990]);
        assert_eq!(decades_of("1995?"), vec![1990]);
        assert_eq!(decades_of("186-"), vec![1860]);
    }

    #[test]
    fn test_multiple_values_merge() {
        let all: Vec<i32> = decades(["1901", "1925", "1901"]).into_iter().collect();
        assert_eq!(all, vec![1900, 1920]);
        assert!(decades(["undated", "n.d."]).is_empty());
    }
}
