//! Repeatable-field index allocation.
//!
//! A `Multiple` field stores an ordered sequence of child-kinded values.
//! Forms submit rows keyed by arbitrary indices — sparse, reordered, too few,
//! too many. This module expands a definition into concrete [`FieldInstance`]s
//! and reconciles a submitted row set into a dense `0..k-1` sequence under
//! the definition's `[min_len, max_len]` bounds.

use indexmap::IndexMap;
use serde_json::Value;

use crate::types::{FieldDef, FieldInstance, FieldKind};

/// One dense row produced by [`reconcile_rows`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// The submitted key this row came from, `None` for padding rows.
    pub key: Option<String>,
    /// The raw submitted value (or the row default for padding rows).
    pub value: Value,
    /// Whether this row was synthesized to satisfy `min_len`.
    pub padded: bool,
}

/// The dense row plan for one multiple-field submission.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowPlan {
    pub rows: Vec<Row>,
    /// Human-readable warnings (min-length padding), not rejections.
    pub warnings: Vec<String>,
}

/// Expand a field definition into its concrete instances.
///
/// A leaf definition yields exactly one instance. A `Multiple` definition
/// yields `clamp(current_len, min_len, max_len)` instances (`max_len == 0`
/// means unbounded), slugged `parent_slug + "_" + index`.
pub fn instances(def: &FieldDef, current_len: usize) -> Vec<FieldInstance> {
    let FieldKind::Multiple {
        child,
        min_len,
        max_len,
    } = &def.kind
    else {
        return vec![FieldInstance {
            slug: def.slug.clone(),
            display_name: def.display_name.clone(),
            kind: def.kind.clone(),
            parent_slug: None,
            index: None,
        }];
    };

    let mut n = current_len.max(*min_len);
    if *max_len != 0 {
        n = n.min(*max_len);
    }

    (0..n)
        .map(|i| FieldInstance {
            slug: format!("{}_{}", def.slug, i),
            display_name: format!("{} {}", def.display_name, i + 1),
            kind: (**child).clone(),
            parent_slug: Some(def.slug.clone()),
            index: Some(i),
        })
        .collect()
}

/// Reconcile a submitted row set into a dense plan.
///
/// Rows are reindexed `0..k-1` in the input's insertion order (never a
/// numeric sort — this matches how forms serialize rows). Oversized sets
/// are truncated by dropping the highest indices; undersized non-empty sets
/// are padded to `min_len` with default-valued rows, each carrying a
/// warning. An entirely empty submission collapses to an empty plan: the
/// user's intent to clear all rows is honored over `min_len`.
pub fn reconcile_rows(def: &FieldDef, submitted: &IndexMap<String, Value>) -> RowPlan {
    let FieldKind::Multiple {
        min_len, max_len, ..
    } = &def.kind
    else {
        return RowPlan::default();
    };

    let mut plan = RowPlan::default();
    if submitted.is_empty() {
        return plan;
    }

    for (key, value) in submitted {
        if *max_len != 0 && plan.rows.len() >= *max_len {
            break;
        }
        plan.rows.push(Row {
            key: Some(key.clone()),
            value: value.clone(),
            padded: false,
        });
    }

    while plan.rows.len() < *min_len {
        plan.warnings.push(format!(
            "{}: at least {} entries are required, added entry {}",
            def.display_name,
            min_len,
            plan.rows.len() + 1
        ));
        plan.rows.push(Row {
            key: None,
            value: def.row_default(),
            padded: true,
        });
    }

    plan
}

/// Split an instance slug of the form `parent_slug + "_" + index`.
///
/// Returns `None` when the slug has no numeric suffix. The caller still has
/// to check that the parent names a real `Multiple` field — `user_2` is a
/// perfectly valid leaf slug.
pub fn parse_instance_slug(slug: &str) -> Option<(&str, usize)> {
    let (parent, index) = slug.rsplit_once('_')?;
    if parent.is_empty() || index.is_empty() {
        return None;
    }
    let index: usize = index.parse().ok()?;
    Some((parent, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    fn multi(min_len: usize, max_len: usize) -> FieldDef {
        FieldDef {
            id: Ulid::new(),
            slug: "phones".into(),
            display_name: "Phones".into(),
            description: None,
            kind: FieldKind::Multiple {
                child: Box::new(FieldKind::Text),
                min_len,
                max_len,
            },
            default: None,
            allowed_user_types: vec![],
            score: 0,
        }
    }

    fn rows(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn leaf_expands_to_single_instance() {
        let def = FieldDef {
            kind: FieldKind::Color,
            slug: "accent".into(),
            display_name: "Accent".into(),
            ..multi(0, 0)
        };
        let insts = instances(&def, 5);
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].slug, "accent");
        assert_eq!(insts[0].parent_slug, None);
    }

    #[test]
    fn multiple_expands_with_indexed_slugs() {
        let insts = instances(&multi(0, 0), 3);
        assert_eq!(insts.len(), 3);
        assert_eq!(insts[0].slug, "phones_0");
        assert_eq!(insts[2].slug, "phones_2");
        assert_eq!(insts[1].parent_slug.as_deref(), Some("phones"));
        assert_eq!(insts[1].index, Some(1));
        assert_eq!(insts[1].kind, FieldKind::Text);
    }

    #[test]
    fn instances_clamped_by_bounds() {
        assert_eq!(instances(&multi(2, 0), 0).len(), 2);
        assert_eq!(instances(&multi(2, 4), 9).len(), 4);
        assert_eq!(instances(&multi(0, 0), 0).len(), 0);
    }

    #[test]
    fn rows_reindexed_by_insertion_order_not_numeric_sort() {
        let plan = reconcile_rows(
            &multi(0, 0),
            &rows(&[("10", json!("a")), ("2", json!("b")), ("abc", json!("c"))]),
        );
        let values: Vec<_> = plan.rows.iter().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(plan.rows[0].key.as_deref(), Some("10"));
    }

    #[test]
    fn oversized_set_drops_highest_indices() {
        let plan = reconcile_rows(
            &multi(0, 2),
            &rows(&[("0", json!("a")), ("1", json!("b")), ("2", json!("c"))]),
        );
        assert_eq!(plan.rows.len(), 2);
        assert_eq!(plan.rows[1].value, json!("b"));
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn undersized_set_padded_with_warnings() {
        let plan = reconcile_rows(&multi(3, 0), &rows(&[("0", json!("a"))]));
        assert_eq!(plan.rows.len(), 3);
        assert!(plan.rows[1].padded && plan.rows[2].padded);
        assert_eq!(plan.warnings.len(), 2);
        assert!(plan.warnings[0].contains("at least 3"));
    }

    #[test]
    fn empty_submission_collapses_to_empty_even_below_min() {
        // Explicit intent to clear all rows wins over min_len.
        let plan = reconcile_rows(&multi(2, 5), &IndexMap::new());
        assert!(plan.rows.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn bounds_hold_for_all_valid_ranges() {
        for min_len in 0..4 {
            for max_len in [0usize, 4, 5, 8] {
                if max_len != 0 && min_len > max_len {
                    continue;
                }
                for submitted_n in 1..10 {
                    let submitted: IndexMap<String, Value> = (0..submitted_n)
                        .map(|i| (format!("k{i}"), json!(i)))
                        .collect();
                    let plan = reconcile_rows(&multi(min_len, max_len), &submitted);
                    assert!(plan.rows.len() >= min_len, "min violated");
                    if max_len != 0 {
                        assert!(plan.rows.len() <= max_len, "max violated");
                    }
                }
            }
        }
    }

    #[test]
    fn instance_slug_parsing() {
        assert_eq!(parse_instance_slug("phones_2"), Some(("phones", 2)));
        assert_eq!(parse_instance_slug("a_b_10"), Some(("a_b", 10)));
        assert_eq!(parse_instance_slug("phones"), None);
        assert_eq!(parse_instance_slug("phones_x"), None);
        assert_eq!(parse_instance_slug("_3"), None);
    }
}
