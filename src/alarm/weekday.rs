//! Weekday name maps used to decode the Shortcut's "Repeat Days" lines.
//!
//! The Clock app reports repeat days in the phone's UI language, so the
//! bridge ships maps for the supported languages and lets the user extend
//! them with a JSON object.

use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Locale option value that picks the best matching locale per event.
pub const AUTO_LOCALE: &str = "auto";

const EN: &[(&str, u8)] = &[
    ("monday", 0),
    ("mon", 0),
    ("tuesday", 1),
    ("tue", 1),
    ("wednesday", 2),
    ("wed", 2),
    ("thursday", 3),
    ("thu", 3),
    ("friday", 4),
    ("fri", 4),
    ("saturday", 5),
    ("sat", 5),
    ("sunday", 6),
    ("sun", 6),
];

const PL: &[(&str, u8)] = &[
    ("poniedzialek", 0),
    ("pon", 0),
    ("poniedziałek", 0),
    ("wtorek", 1),
    ("wt", 1),
    ("sroda", 2),
    ("środa", 2),
    ("sr", 2),
    ("czwartek", 3),
    ("czw", 3),
    ("piatek", 4),
    ("piątek", 4),
    ("pt", 4),
    ("sobota", 5),
    ("sob", 5),
    ("niedziela", 6),
    ("nd", 6),
    ("nie", 6),
];

const BUILTIN: &[(&str, &[(&str, u8)])] = &[("en", EN), ("pl", PL)];

/// Fold a weekday name into its lookup key.
///
/// Applies NFKD, strips combining marks, removes spaces and hyphens and
/// lowercases, so "Środa", "sroda" and "ŚRODA" all meet on the same key.
pub fn normalize_day_key(value: &str) -> String {
    value
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .filter(|ch| *ch != ' ' && *ch != '-')
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Ordered collection of locale → (normalized day name → weekday index).
///
/// Order matters: the first locale is the default and wins detection ties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeekdayMaps {
    locales: Vec<(String, HashMap<String, u8>)>,
}

impl WeekdayMaps {
    /// Built-in maps with normalized keys.
    pub fn builtin() -> Self {
        let locales = BUILTIN
            .iter()
            .map(|(locale, days)| {
                let mapping = days
                    .iter()
                    .map(|(name, index)| (normalize_day_key(name), *index))
                    .collect();
                (locale.to_string(), mapping)
            })
            .collect();
        Self { locales }
    }

    pub fn get(&self, locale: &str) -> Option<&HashMap<String, u8>> {
        self.locales
            .iter()
            .find(|(name, _)| name == locale)
            .map(|(_, mapping)| mapping)
    }

    pub fn contains(&self, locale: &str) -> bool {
        self.get(locale).is_some()
    }

    pub fn default_locale(&self) -> &str {
        self.locales
            .first()
            .map(|(name, _)| name.as_str())
            .unwrap_or("en")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashMap<String, u8>)> {
        self.locales
            .iter()
            .map(|(name, mapping)| (name.as_str(), mapping))
    }

    pub fn locale_names(&self) -> impl Iterator<Item = &str> {
        self.locales.iter().map(|(name, _)| name.as_str())
    }

    fn entry_mut(&mut self, locale: &str) -> &mut HashMap<String, u8> {
        let position = match self.locales.iter().position(|(name, _)| name == locale) {
            Some(position) => position,
            None => {
                self.locales.push((locale.to_string(), HashMap::new()));
                self.locales.len() - 1
            }
        };
        &mut self.locales[position].1
    }
}

/// Build the weekday maps from the built-ins plus an optional JSON override.
///
/// Every problem in the override is reported; valid entries are still
/// applied, and the built-ins are returned untouched when the JSON itself is
/// unusable.
pub fn build_weekday_maps(custom_map_json: &str) -> (WeekdayMaps, Vec<String>) {
    let mut maps = WeekdayMaps::builtin();
    if custom_map_json.trim().is_empty() {
        return (maps, Vec::new());
    }

    let mut errors = Vec::new();
    let parsed: serde_json::Value = match serde_json::from_str(custom_map_json) {
        Ok(parsed) => parsed,
        Err(err) => {
            errors.push(format!("Invalid custom map JSON: {err}"));
            return (maps, errors);
        }
    };
    let Some(parsed) = parsed.as_object() else {
        errors.push("Custom map must be a JSON object".to_string());
        return (maps, errors);
    };

    for (locale, mapping) in parsed {
        let Some(mapping) = mapping.as_object() else {
            errors.push(format!("Custom map for locale '{locale}' must be an object"));
            continue;
        };
        let mut additions = Vec::new();
        for (day_name, index) in mapping {
            let Some(weekday_index) = weekday_index_from_json(index) else {
                errors.push(format!(
                    "Custom map value for '{day_name}' in locale '{locale}' is not an integer: {index}"
                ));
                continue;
            };
            if !(0..=6).contains(&weekday_index) {
                errors.push(format!(
                    "Custom map value for '{day_name}' in locale '{locale}' must be between 0 and 6"
                ));
                continue;
            }
            additions.push((normalize_day_key(day_name), weekday_index as u8));
        }
        maps.entry_mut(locale).extend(additions);
    }
    (maps, errors)
}

fn weekday_index_from_json(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f.trunc() as i64)),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        serde_json::Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

/// Pick the locale used to decode a set of repeat day lines.
pub fn detect_weekday_locale(
    weekday_lines: &[String],
    locale_option: &str,
    maps: &WeekdayMaps,
) -> String {
    let default_locale = maps.default_locale().to_string();
    if locale_option != AUTO_LOCALE {
        return if maps.contains(locale_option) {
            locale_option.to_string()
        } else {
            default_locale
        };
    }
    if weekday_lines.is_empty() {
        return default_locale;
    }

    let normalized_lines: Vec<String> = weekday_lines
        .iter()
        .map(|line| normalize_day_key(line))
        .collect();
    let mut best: Option<(&str, usize)> = None;
    for (locale, mapping) in maps.iter() {
        let score = normalized_lines
            .iter()
            .filter(|line| mapping.contains_key(line.as_str()))
            .count();
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((locale, score));
        }
    }
    best.map(|(locale, _)| locale.to_string())
        .unwrap_or(default_locale)
}

/// Split a "Repeat Days" value into trimmed, non-empty lines.
pub fn repeat_day_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decoded repeat days of one alarm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepeatDays {
    pub localized: Vec<String>,
    pub normalized: Vec<u8>,
    pub locale: String,
}

/// Decode the repeat day lines of one alarm.
///
/// Lines are resolved with the detected locale first and then every other
/// locale; duplicates keep their first occurrence and unknown lines are
/// reported in `errors`.
pub fn normalize_repeat_days(
    raw: &str,
    alarm_key: &str,
    locale_option: &str,
    maps: &WeekdayMaps,
    errors: &mut Vec<String>,
) -> RepeatDays {
    let lines = repeat_day_lines(raw);
    let locale = detect_weekday_locale(&lines, locale_option, maps);
    let mut days = RepeatDays {
        locale,
        ..Default::default()
    };
    if lines.is_empty() {
        return days;
    }

    let primary = maps.get(&days.locale);
    let fallbacks = maps
        .iter()
        .filter(|(name, _)| *name != days.locale)
        .map(|(_, mapping)| mapping);
    let candidates: Vec<&HashMap<String, u8>> = primary.into_iter().chain(fallbacks).collect();

    for line in lines {
        let key = normalize_day_key(&line);
        match candidates.iter().find_map(|mapping| mapping.get(&key)) {
            Some(&weekday_index) => {
                if !days.normalized.contains(&weekday_index) {
                    days.normalized.push(weekday_index);
                    days.localized.push(line);
                }
            }
            None => errors.push(format!(
                "Alarm {alarm_key}: could not map repeat day '{line}' with locale '{}'",
                days.locale
            )),
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_day_key_strips_diacritics() {
        assert_eq!(normalize_day_key("Środa"), "sroda");
        assert_eq!(normalize_day_key(" Piątek "), "piatek");
        assert_eq!(normalize_day_key("Mon-day"), "monday");
        assert_eq!(normalize_day_key("Poniedziałek"), "poniedziałek");
    }

    #[test]
    fn test_normalize_repeat_days_polish() {
        let (maps, map_errors) = build_weekday_maps("");
        assert!(map_errors.is_empty());
        let mut errors = Vec::new();
        let days = normalize_repeat_days(
            "Wtorek\nPoniedziałek\nŚroda\nCzwartek\nPiątek",
            "1",
            AUTO_LOCALE,
            &maps,
            &mut errors,
        );
        assert_eq!(days.locale, "pl");
        assert_eq!(days.normalized, vec![1, 0, 2, 3, 4]);
        assert_eq!(
            days.localized,
            vec!["Wtorek", "Poniedziałek", "Środa", "Czwartek", "Piątek"]
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_normalize_repeat_days_english() {
        let (maps, _) = build_weekday_maps("");
        let mut errors = Vec::new();
        let days = normalize_repeat_days("Monday\nSunday", "1", AUTO_LOCALE, &maps, &mut errors);
        assert_eq!(days.locale, "en");
        assert_eq!(days.normalized, vec![0, 6]);
        assert_eq!(days.localized, vec!["Monday", "Sunday"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_duplicates_and_unknown_lines() {
        let (maps, _) = build_weekday_maps("");
        let mut errors = Vec::new();
        let days = normalize_repeat_days(
            "Monday\nMon\nFunday\n\n  ",
            "7",
            AUTO_LOCALE,
            &maps,
            &mut errors,
        );
        assert_eq!(days.normalized, vec![0]);
        assert_eq!(days.localized, vec!["Monday"]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Alarm 7: could not map repeat day 'Funday'"));
    }

    #[test]
    fn test_fallback_to_other_locale() {
        let (maps, _) = build_weekday_maps("");
        let mut errors = Vec::new();
        let days = normalize_repeat_days("Wtorek", "1", "en", &maps, &mut errors);
        assert_eq!(days.locale, "en");
        assert_eq!(days.normalized, vec![1]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_detect_locale_explicit_and_unknown() {
        let maps = WeekdayMaps::builtin();
        assert_eq!(detect_weekday_locale(&[], "pl", &maps), "pl");
        assert_eq!(detect_weekday_locale(&[], "de", &maps), "en");
        assert_eq!(detect_weekday_locale(&[], AUTO_LOCALE, &maps), "en");
        // Nothing matches: the first locale wins the tie.
        let lines = vec!["Lundi".to_string()];
        assert_eq!(detect_weekday_locale(&lines, AUTO_LOCALE, &maps), "en");
    }

    #[test]
    fn test_custom_map_extends_and_adds_locale() {
        let (maps, errors) =
            build_weekday_maps(r#"{"de": {"Montag": 0, "Dienstag": "1"}, "en": {"Mo": 0}}"#);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(maps.locale_names().collect::<Vec<_>>(), vec!["en", "pl", "de"]);
        assert_eq!(maps.get("de").unwrap().get("montag"), Some(&0));
        assert_eq!(maps.get("de").unwrap().get("dienstag"), Some(&1));
        assert_eq!(maps.get("en").unwrap().get("mo"), Some(&0));
        assert_eq!(maps.get("en").unwrap().get("monday"), Some(&0));
    }

    #[test]
    fn test_custom_map_errors() {
        let (maps, errors) = build_weekday_maps("not json");
        assert_eq!(maps, WeekdayMaps::builtin());
        assert!(errors[0].starts_with("Invalid custom map JSON"));

        let (_, errors) = build_weekday_maps("[1, 2]");
        assert_eq!(errors, vec!["Custom map must be a JSON object"]);

        let (maps, errors) =
            build_weekday_maps(r#"{"fr": "lundi", "de": {"Montag": 9, "Dienstag": "x", "Mittwoch": 2}}"#);
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("locale 'fr' must be an object")));
        assert!(errors.iter().any(|e| e.contains("must be between 0 and 6")));
        assert!(errors.iter().any(|e| e.contains("is not an integer")));
        assert_eq!(maps.get("de").unwrap().get("mittwoch"), Some(&2));
    }
}
