// 🔍 Deduplication Filter - drop import candidates that were imported before
//
// Only persisted state counts: two identical candidates inside one batch are
// both kept. The persistence layer's unique index catches them on commit.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::NewRecord;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// Candidates whose reference is not stored yet, in input order.
    pub fresh: Vec<NewRecord>,
    /// How many candidates were dropped as already imported.
    pub already_imported: usize,
}

/// Keep candidates whose external reference is absent from persisted state.
///
/// `lookup` receives every distinct reference in the batch and returns the
/// ones already stored for the owner. It is not called when the batch has no
/// references. Candidates without a reference are always kept.
pub fn filter_already_imported<F>(candidates: Vec<NewRecord>, lookup: F) -> Result<DedupOutcome>
where
    F: FnOnce(&[String]) -> Result<Vec<String>>,
{
    let mut seen = HashSet::new();
    let references: Vec<String> = candidates
        .iter()
        .filter_map(|c| c.external_reference.clone())
        .filter(|r| seen.insert(r.clone()))
        .collect();

    if references.is_empty() {
        return Ok(DedupOutcome {
            fresh: candidates,
            already_imported: 0,
        });
    }

    let existing: HashSet<String> = lookup(&references)?.into_iter().collect();

    let total = candidates.len();
    let fresh: Vec<NewRecord> = candidates
        .into_iter()
        .filter(|c| match &c.external_reference {
            Some(reference) => !existing.contains(reference),
            None => true,
        })
        .collect();

    Ok(DedupOutcome {
        already_imported: total - fresh.len(),
        fresh,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::cell::Cell;

    fn candidate(reference: Option<&str>) -> NewRecord {
        NewRecord {
            description: format!("candidate {reference:?}"),
            value: Decimal::new(-1000, 2),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            wallet_id: 1,
            category_id: 1,
            external_reference: reference.map(str::to_string),
        }
    }

    fn stored<'a>(existing: &'a [&'a str]) -> impl Fn(&[String]) -> Result<Vec<String>> + 'a {
        move |refs: &[String]| {
            Ok(refs
                .iter()
                .filter(|r| existing.contains(&r.as_str()))
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_output_is_candidates_minus_existing() {
        let candidates = vec![candidate(Some("a")), candidate(Some("b")), candidate(Some("c"))];
        let outcome = filter_already_imported(candidates, stored(&["b"])).unwrap();

        let refs: Vec<_> = outcome
            .fresh
            .iter()
            .map(|c| c.external_reference.clone().unwrap())
            .collect();
        assert_eq!(refs, vec!["a", "c"]);
        assert_eq!(outcome.already_imported, 1);
    }

    #[test]
    fn test_empty_iff_every_reference_exists() {
        let candidates = vec![candidate(Some("a")), candidate(Some("b"))];
        let outcome = filter_already_imported(candidates.clone(), stored(&["a", "b"])).unwrap();
        assert!(outcome.fresh.is_empty());
        assert_eq!(outcome.already_imported, 2);

        let outcome = filter_already_imported(candidates, stored(&["a"])).unwrap();
        assert!(!outcome.fresh.is_empty());
    }

    #[test]
    fn test_duplicates_within_batch_are_kept() {
        let candidates = vec![candidate(Some("same")), candidate(Some("same"))];
        let outcome = filter_already_imported(candidates, stored(&[])).unwrap();
        assert_eq!(outcome.fresh.len(), 2);
        assert_eq!(outcome.already_imported, 0);
    }

    #[test]
    fn test_duplicates_within_batch_dropped_together_when_stored() {
        let candidates = vec![candidate(Some("same")), candidate(Some("same"))];
        let outcome = filter_already_imported(candidates, stored(&["same"])).unwrap();
        assert!(outcome.fresh.is_empty());
        assert_eq!(outcome.already_imported, 2);
    }

    #[test]
    fn test_candidates_without_reference_skip_lookup() {
        let calls = Cell::new(0);
        let candidates = vec![candidate(None), candidate(None)];
        let outcome = filter_already_imported(candidates, |_| {
            calls.set(calls.get() + 1);
            Ok(Vec::new())
        })
        .unwrap();
        assert_eq!(outcome.fresh.len(), 2);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_lookup_sees_distinct_references() {
        let candidates = vec![candidate(Some("x")), candidate(Some("x")), candidate(Some("y"))];
        filter_already_imported(candidates, |refs| {
            assert_eq!(refs, &["x".to_string(), "y".to_string()]);
            Ok(Vec::new())
        })
        .unwrap();
    }

    #[test]
    fn test_lookup_error_propagates() {
        let result = filter_already_imported(vec![candidate(Some("a"))], |_| {
            Err(crate::error::FinanceError::Internal("down".into()))
        });
        assert!(result.is_err());
    }
}
