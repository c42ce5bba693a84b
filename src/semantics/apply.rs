use crate::semantics::is_null_marked;
use crate::semantics::UpdateOperation;
use crate::semantics::Value;
use crate::semantics::ValueList;
use crate::semantics::ValuesMap;
use crate::semantics::NULL_MARKER;

pub(super) type ListUpdateFn = fn(&mut ValueList, &UpdateArgs) -> bool;

/// The operands of an update, independent of which field or record it targets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateArgs {
    pub new_values: ValueList,
    /// Only read by SUBSTITUTE.
    pub old_values: ValueList,
    /// Only read by SET.
    pub argument: usize,
    /// Only read by the whole-record kinds.
    pub user_json: ValuesMap,
}

impl UpdateArgs {
    pub fn with_values(new_values: ValueList) -> Self {
        UpdateArgs {
            new_values,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum UpdateError {
    #[error("Field '{0}' does not exist")]
    FieldNotFound(String),
}

/// Applies a single-field operation to `list` and returns the resulting list plus whether a
/// change occurred. REMOVE_FIELD and the whole-record kinds act one level up, so they leave the
/// list untouched here.
pub fn update_values_list(
    mut list: ValueList,
    operation: UpdateOperation,
    args: &UpdateArgs,
) -> (ValueList, bool) {
    let spec = operation.effective().spec();
    match spec.list_update {
        Some(update) => {
            if spec.skip_read {
                list.clear();
            }
            let changed = update(&mut list, args);
            (list, changed)
        }
        None => (list, false),
    }
}

/// Applies `operation` to `field` of a values map.
///
/// Non-upsert operations on an absent field fail with `FieldNotFound` (CREATE is the exception,
/// it exists to add fields). Upsert kinds create the field empty and then behave as their base.
pub fn update_values_map(
    map: &mut ValuesMap,
    field: &str,
    operation: UpdateOperation,
    args: &UpdateArgs,
) -> Result<bool, UpdateError> {
    if !operation.spec().single_field {
        for (key, values) in args.user_json.iter() {
            map.insert(key.clone(), values.clone());
        }
        return Ok(true);
    }

    if operation == UpdateOperation::RemoveField {
        return match map.remove(field) {
            Some(_) => Ok(true),
            None => Err(UpdateError::FieldNotFound(field.to_string())),
        };
    }

    let existing = match map.remove(field) {
        Some(list) => list,
        None if operation.may_create_field() => ValueList::new(),
        None => return Err(UpdateError::FieldNotFound(field.to_string())),
    };
    let (list, changed) = update_values_list(existing, operation, args);
    map.insert(field.to_string(), list);

    Ok(changed)
}

pub(super) fn replace_all(list: &mut ValueList, args: &UpdateArgs) -> bool {
    *list = args.new_values.clone();
    true
}

pub(super) fn clear(list: &mut ValueList, _args: &UpdateArgs) -> bool {
    list.clear();
    true
}

pub(super) fn replace_singleton(list: &mut ValueList, args: &UpdateArgs) -> bool {
    list.clear();
    if let Some(first) = args.new_values.first() {
        list.push(first.clone());
    }
    true
}

pub(super) fn append_with_duplication(list: &mut ValueList, args: &UpdateArgs) -> bool {
    if is_null_marked(list) {
        list.clear();
    }
    list.extend(args.new_values.iter().cloned());
    !args.new_values.is_empty()
}

/// Set union. The first occurrence of each value keeps its position so every replica ends up
/// with the same order.
pub(super) fn append_as_set(list: &mut ValueList, args: &UpdateArgs) -> bool {
    let before = list.clone();
    if is_null_marked(list) {
        list.clear();
    }
    list.extend(args.new_values.iter().cloned());
    dedup_keep_first(list);
    *list != before
}

pub(super) fn remove(list: &mut ValueList, args: &UpdateArgs) -> bool {
    if is_null_marked(list) {
        list.clear();
        return false;
    }
    let before = list.len();
    list.retain(|value| !args.new_values.contains(value));
    list.len() != before
}

pub(super) fn substitute(list: &mut ValueList, args: &UpdateArgs) -> bool {
    if is_null_marked(list) {
        return false;
    }
    let mut changed = false;
    for (old, new) in args.old_values.iter().zip(args.new_values.iter()) {
        for value in list.iter_mut().filter(|value| *value == old) {
            *value = new.clone();
            changed = true;
        }
    }
    changed
}

pub(super) fn set_indexed(list: &mut ValueList, args: &UpdateArgs) -> bool {
    if is_null_marked(list) {
        list.clear();
        return false;
    }
    match (list.get_mut(args.argument), args.new_values.first()) {
        (Some(slot), Some(new)) => {
            *slot = new.clone();
            true
        }
        _ => false,
    }
}

pub(super) fn set_field_null(list: &mut ValueList, _args: &UpdateArgs) -> bool {
    if is_null_marked(list) {
        return false;
    }
    list.clear();
    list.push(Value::from(NULL_MARKER));
    true
}

fn dedup_keep_first(list: &mut ValueList) {
    let mut seen = std::collections::HashSet::with_capacity(list.len());
    list.retain(|value| seen.insert(value.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[&str]) -> ValueList {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn apply(list: &[&str], op: UpdateOperation, args: UpdateArgs) -> (ValueList, bool) {
        update_values_list(values(list), op, &args)
    }

    #[test]
    fn substitute_is_pairwise() {
        let args = UpdateArgs {
            new_values: values(&["x", "y"]),
            old_values: values(&["a", "b"]),
            ..Default::default()
        };
        assert_eq!(
            apply(&["a", "b", "a"], UpdateOperation::Substitute, args),
            (values(&["x", "y", "x"]), true)
        );
    }

    #[test]
    fn substitute_stops_at_shorter_list_and_ignores_null_marked() {
        let args = UpdateArgs {
            new_values: values(&["x"]),
            old_values: values(&["a", "b"]),
            ..Default::default()
        };
        assert_eq!(
            apply(&["a", "b"], UpdateOperation::Substitute, args.clone()),
            (values(&["x", "b"]), true)
        );
        assert_eq!(
            apply(&[NULL_MARKER, "a"], UpdateOperation::Substitute, args),
            (values(&[NULL_MARKER, "a"]), false)
        );
    }

    #[test]
    fn set_out_of_range_is_silent_noop() {
        let args = UpdateArgs {
            new_values: values(&["z"]),
            argument: 5,
            ..Default::default()
        };
        assert_eq!(
            apply(&["a", "b", "c"], UpdateOperation::Set, args.clone()),
            (values(&["a", "b", "c"]), false)
        );

        let in_range = UpdateArgs { argument: 1, ..args };
        assert_eq!(
            apply(&["a", "b", "c"], UpdateOperation::Set, in_range.clone()),
            (values(&["a", "z", "c"]), true)
        );
        assert_eq!(
            apply(&[NULL_MARKER], UpdateOperation::Set, in_range),
            (values(&[]), false)
        );
    }

    #[test]
    fn append_is_idempotent_and_order_stable() {
        let args = UpdateArgs::with_values(values(&["b", "c", "c"]));
        let (once, changed) = apply(&["a", "b"], UpdateOperation::Append, args.clone());
        assert_eq!(once, values(&["a", "b", "c"]));
        assert!(changed);

        let (twice, changed) = update_values_list(once.clone(), UpdateOperation::Append, &args);
        assert_eq!(twice, once);
        assert!(!changed);
    }

    #[test]
    fn appends_drop_null_marker_first() {
        let args = UpdateArgs::with_values(values(&["v", "v"]));
        assert_eq!(
            apply(&[NULL_MARKER], UpdateOperation::Append, args.clone()).0,
            values(&["v"])
        );
        assert_eq!(
            apply(&[NULL_MARKER], UpdateOperation::AppendWithDuplication, args).0,
            values(&["v", "v"])
        );
    }

    #[test]
    fn clear_then_append_yields_only_new_value() {
        for start in [vec![], vec!["a", "b"], vec![NULL_MARKER]].iter() {
            let (cleared, changed) = apply(start, UpdateOperation::Clear, UpdateArgs::default());
            assert!(changed);
            let (list, _) = update_values_list(
                cleared,
                UpdateOperation::Append,
                &UpdateArgs::with_values(values(&["v"])),
            );
            assert_eq!(list, values(&["v"]));
        }
    }

    #[test]
    fn remove_on_null_marked_clears_but_reports_unchanged() {
        let args = UpdateArgs::with_values(values(&["a"]));
        assert_eq!(
            apply(&[NULL_MARKER, "a"], UpdateOperation::Remove, args.clone()),
            (values(&[]), false)
        );
        assert_eq!(
            apply(&["a", "b", "a"], UpdateOperation::Remove, args.clone()),
            (values(&["b"]), true)
        );
        assert_eq!(
            apply(&["b"], UpdateOperation::Remove, args),
            (values(&["b"]), false)
        );
    }

    #[test]
    fn replace_kinds() {
        let args = UpdateArgs::with_values(values(&["x", "y"]));
        assert_eq!(
            apply(&["a"], UpdateOperation::ReplaceAll, args.clone()).0,
            values(&["x", "y"])
        );
        assert_eq!(
            apply(&["a"], UpdateOperation::ReplaceSingleton, args).0,
            values(&["x"])
        );
        assert_eq!(
            apply(&["a"], UpdateOperation::ReplaceSingleton, UpdateArgs::default()),
            (values(&[]), true)
        );
    }

    #[test]
    fn set_field_null_only_once() {
        let (nulled, changed) = apply(&["a"], UpdateOperation::SetFieldNull, UpdateArgs::default());
        assert_eq!((nulled.clone(), changed), (values(&[NULL_MARKER]), true));
        let (again, changed) = update_values_list(nulled, UpdateOperation::SetFieldNull, &UpdateArgs::default());
        assert_eq!((again, changed), (values(&[NULL_MARKER]), false));
    }

    #[test]
    fn map_rejects_missing_field_unless_upsert() {
        let mut map = ValuesMap::new();
        let args = UpdateArgs::with_values(values(&["v"]));

        assert_eq!(
            update_values_map(&mut map, "f", UpdateOperation::Append, &args),
            Err(UpdateError::FieldNotFound("f".to_string()))
        );
        assert_eq!(
            update_values_map(&mut map, "f", UpdateOperation::ReplaceAll, &args),
            Err(UpdateError::FieldNotFound("f".to_string()))
        );
        assert!(map.is_empty());

        assert_eq!(update_values_map(&mut map, "f", UpdateOperation::AppendOrCreate, &args), Ok(true));
        assert_eq!(update_values_map(&mut map, "g", UpdateOperation::Create, &args), Ok(true));
        assert_eq!(map.get("f"), Some(&values(&["v"])));

        assert_eq!(update_values_map(&mut map, "g", UpdateOperation::RemoveField, &args), Ok(true));
        assert_eq!(
            update_values_map(&mut map, "g", UpdateOperation::RemoveField, &args),
            Err(UpdateError::FieldNotFound("g".to_string()))
        );
    }

    #[test]
    fn user_json_replace_keeps_unmentioned_fields() {
        let mut map = ValuesMap::new();
        map.insert("keep".to_string(), values(&["1"]));
        map.insert("swap".to_string(), values(&["2"]));

        let mut user_json = ValuesMap::new();
        user_json.insert("swap".to_string(), values(&["3"]));
        user_json.insert("new".to_string(), values(&["4"]));
        let args = UpdateArgs {
            user_json,
            ..Default::default()
        };

        assert_eq!(update_values_map(&mut map, "", UpdateOperation::UserJsonReplace, &args), Ok(true));
        assert_eq!(map.get("keep"), Some(&values(&["1"])));
        assert_eq!(map.get("swap"), Some(&values(&["3"])));
        assert_eq!(map.get("new"), Some(&values(&["4"])));
    }

    #[test]
    fn replaying_a_log_is_deterministic() {
        let log = vec![
            ("f", UpdateOperation::Create, UpdateArgs::with_values(values(&["a"]))),
            ("f", UpdateOperation::Append, UpdateArgs::with_values(values(&["b", "a"]))),
            ("f", UpdateOperation::Substitute, UpdateArgs {
                new_values: values(&["c"]),
                old_values: values(&["a"]),
                ..Default::default()
            }),
            ("g", UpdateOperation::ReplaceAllOrCreate, UpdateArgs::with_values(values(&["x"]))),
            ("g", UpdateOperation::SetFieldNull, UpdateArgs::default()),
        ];
        let run = || {
            let mut map = ValuesMap::new();
            for (field, op, args) in log.iter() {
                let _ = update_values_map(&mut map, field, *op, args);
            }
            map
        };
        let first = run();
        assert_eq!(first, run());
        assert_eq!(first.get("f"), Some(&values(&["c", "b"])));
        assert_eq!(first.get("g"), Some(&values(&[NULL_MARKER])));
    }
}
