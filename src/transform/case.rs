/// Capitalization class of a matched piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseClass {
    /// Nothing to learn from (empty, or no letters at all).
    Unknown,
    Lower,
    Upper,
    Title,
    /// camelCase, PascalCase and anything else that mixes cases.
    Mixed,
}

impl CaseClass {
    pub fn of(example: &str) -> Self {
        if !example.chars().any(char::is_alphabetic) {
            return Self::Unknown;
        }

        let mut all_lower = true;
        let mut all_upper = true;
        for ch in example.chars().filter(|ch| ch.is_alphabetic()) {
            all_lower &= ch.is_lowercase();
            all_upper &= ch.is_uppercase();
        }

        if all_lower {
            return Self::Lower;
        }
        if all_upper {
            return Self::Upper;
        }

        let mut chars = example.chars();
        let first_upper = chars.next().is_some_and(char::is_uppercase);
        let rest_lower = chars
            .filter(|ch| ch.is_alphabetic())
            .all(char::is_lowercase);
        if first_upper && rest_lower {
            Self::Title
        } else {
            Self::Mixed
        }
    }
}

/// Re-cases `target` so it follows the capitalization of `example`.
///
/// Checks run in a fixed order and the first one that applies wins:
/// all-lowercase, all-uppercase, Title case, and finally a first-letter-only
/// adjustment for mixed casing such as `gitHub` or `GitHub`.
pub fn match_case(example: &str, target: &str) -> String {
    if example.is_empty() || target.is_empty() {
        return target.to_string();
    }

    match CaseClass::of(example) {
        CaseClass::Lower => target.to_lowercase(),
        CaseClass::Upper => target.to_uppercase(),
        CaseClass::Title if target.chars().any(char::is_alphabetic) => title_case(target),
        _ => match_first_letter(example, target),
    }
}

fn title_case(target: &str) -> String {
    let mut chars = target.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let mut result = String::with_capacity(target.len());
    result.extend(first.to_uppercase());
    result.push_str(&chars.as_str().to_lowercase());
    result
}

fn match_first_letter(example: &str, target: &str) -> String {
    let Some(lead) = example.chars().next().filter(|ch| ch.is_alphabetic()) else {
        return target.to_string();
    };

    let mut chars = target.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let mut result = String::with_capacity(target.len());
    if lead.is_uppercase() {
        result.extend(first.to_uppercase());
    } else {
        result.extend(first.to_lowercase());
    }
    result.push_str(chars.as_str());
    result
}
