//! Edit distance and string similarity between two generations.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::Serialize;

use crate::models::eval::CompareOptions;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub edit_distance: usize,
    /// In `[0, 1]`; `1.0` for identical strings.
    pub similarity: f64,
}

/// Compares `a` and `b` after applying `options`.
pub fn compare(a: &str, b: &str, options: CompareOptions) -> Comparison {
    let a = normalize(a, options);
    let b = normalize(b, options);
    Comparison {
        edit_distance: levenshtein(&a, &b),
        similarity: similarity(&a, &b),
    }
}

pub fn normalize(text: &str, options: CompareOptions) -> Cow<'_, str> {
    if !options.ignore_case && !options.collapse_whitespace {
        return Cow::Borrowed(text);
    }
    let mut out = if options.collapse_whitespace {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        text.to_string()
    };
    if options.ignore_case {
        out = out.to_lowercase();
    }
    Cow::Owned(out)
}

/// Levenshtein distance over Unicode code points, two-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            let deletion = previous[j + 1] + 1;
            let insertion = current[j] + 1;
            current[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Dice coefficient over character bigrams, whitespace ignored.
///
/// Identical strings score `1.0`; strings sharing no bigram score `0.0`.
/// Symmetric in its arguments.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = b.chars().filter(|c| !c.is_whitespace()).collect();

    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut bigrams: HashMap<(char, char), usize> = HashMap::new();
    for pair in a.windows(2) {
        *bigrams.entry((pair[0], pair[1])).or_insert(0) += 1;
    }

    let mut intersection = 0usize;
    for pair in b.windows(2) {
        if let Some(count) = bigrams.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    (2.0 * intersection as f64) / ((a.len() - 1) + (b.len() - 1)) as f64
}
