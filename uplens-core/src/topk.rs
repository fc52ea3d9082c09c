//! Shared top-K bucketing
//!
//! Every distribution surface (models, languages) funnels through the
//! same routine: keep the K largest categories, fold the rest into a
//! single labelled bucket. Having one implementation keeps the store
//! path and the direct-scan path byte-identical in shape.

use std::collections::HashMap;

/// Default number of named categories before folding into the other bucket.
pub const DEFAULT_TOP_K: usize = 4;

/// Label used for the folded model bucket.
pub const OTHER_MODELS_LABEL: &str = "Other models";

/// Label used for the folded language bucket.
pub const OTHER_LANGUAGES_LABEL: &str = "Other";

/// A named total, the unit top-K bucketing operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCount {
    pub name: String,
    pub count: i64,
}

/// Accumulate `(name, count)` pairs into totals, preserving first-seen
/// insertion order so equal totals tie-break deterministically.
pub fn accumulate<I>(pairs: I) -> Vec<NamedCount>
where
    I: IntoIterator<Item = (String, i64)>,
{
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, i64> = HashMap::new();

    for (name, count) in pairs {
        if !totals.contains_key(&name) {
            order.push(name.clone());
        }
        *totals.entry(name).or_insert(0) += count;
    }

    order
        .into_iter()
        .map(|name| {
            let count = totals[&name];
            NamedCount { name, count }
        })
        .collect()
}

/// Fold accumulated totals into at most `k` named entries plus one
/// `other_label` bucket carrying the remainder.
///
/// Sorting is descending by count and stable, so ties keep the order
/// `accumulate` produced. The other bucket is appended whenever more
/// than `k` categories exist, even if its total is zero; the sum of all
/// returned counts always equals the input sum.
pub fn bucket_top_k(mut totals: Vec<NamedCount>, k: usize, other_label: &str) -> Vec<NamedCount> {
    totals.sort_by(|a, b| b.count.cmp(&a.count));

    if totals.len() <= k {
        return totals;
    }

    let rest = totals.split_off(k);
    let other_total: i64 = rest.iter().map(|n| n.count).sum();
    totals.push(NamedCount {
        name: other_label.to_string(),
        count: other_total,
    });
    totals
}

/// Names of the top `k` categories, in descending-count order.
pub fn top_names(totals: &[NamedCount], k: usize) -> Vec<String> {
    let mut sorted: Vec<&NamedCount> = totals.iter().collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count));
    sorted.into_iter().take(k).map(|n| n.name.clone()).collect()
}

/// Map a raw category name onto its display bucket: itself when it made
/// the top-K cut, `other_label` otherwise.
pub fn bucket_for<'a>(name: &'a str, top: &[String], other_label: &'a str) -> &'a str {
    if top.iter().any(|t| t == name) {
        name
    } else {
        other_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, i64)]) -> Vec<NamedCount> {
        pairs
            .iter()
            .map(|(name, count)| NamedCount {
                name: name.to_string(),
                count: *count,
            })
            .collect()
    }

    #[test]
    fn test_accumulate_sums_and_preserves_order() {
        let totals = accumulate(vec![
            ("b".to_string(), 1),
            ("a".to_string(), 2),
            ("b".to_string(), 3),
        ]);
        assert_eq!(totals, counts(&[("b", 4), ("a", 2)]));
    }

    #[test]
    fn test_bucket_top_k_folds_remainder() {
        let totals = counts(&[("m1", 100), ("m2", 80), ("m3", 60), ("m4", 40), ("m5", 10), ("m6", 5)]);
        let bucketed = bucket_top_k(totals, 4, OTHER_MODELS_LABEL);

        assert_eq!(bucketed.len(), 5);
        assert_eq!(bucketed[0].name, "m1");
        assert_eq!(bucketed[4].name, OTHER_MODELS_LABEL);
        assert_eq!(bucketed[4].count, 15);

        let sum: i64 = bucketed.iter().map(|n| n.count).sum();
        assert_eq!(sum, 295);
    }

    #[test]
    fn test_bucket_top_k_no_fold_when_at_or_under_k() {
        let totals = counts(&[("m1", 100), ("m2", 80)]);
        let bucketed = bucket_top_k(totals, 4, OTHER_MODELS_LABEL);
        assert_eq!(bucketed.len(), 2);
        assert!(bucketed.iter().all(|n| n.name != OTHER_MODELS_LABEL));
    }

    #[test]
    fn test_bucket_top_k_appends_zero_other_bucket() {
        // More than k categories but the tail is all zeros: the bucket
        // still appears so chart series stay aligned
        let totals = counts(&[("m1", 10), ("m2", 8), ("m3", 6), ("m4", 4), ("m5", 0)]);
        let bucketed = bucket_top_k(totals, 4, OTHER_MODELS_LABEL);
        assert_eq!(bucketed.len(), 5);
        assert_eq!(bucketed[4].name, OTHER_MODELS_LABEL);
        assert_eq!(bucketed[4].count, 0);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let totals = counts(&[("x", 5), ("y", 5), ("z", 5)]);
        let bucketed = bucket_top_k(totals, 2, "Other");
        assert_eq!(bucketed[0].name, "x");
        assert_eq!(bucketed[1].name, "y");
        assert_eq!(bucketed[2].name, "Other");
        assert_eq!(bucketed[2].count, 5);
    }

    #[test]
    fn test_top_names_and_bucket_for() {
        let totals = counts(&[("rust", 50), ("go", 30), ("python", 20), ("lua", 5), ("perl", 1)]);
        let top = top_names(&totals, 4);
        assert_eq!(top, vec!["rust", "go", "python", "lua"]);

        assert_eq!(bucket_for("rust", &top, OTHER_LANGUAGES_LABEL), "rust");
        assert_eq!(bucket_for("perl", &top, OTHER_LANGUAGES_LABEL), "Other");
    }
}
