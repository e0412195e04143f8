//! Replaying changes onto a local list.

use super::change::{Change, ChangePayload, ChangeReason};
use crate::error::{BridgeError, Result};

/// Apply a change to a local copy of a collection.
///
/// Indices are trusted when they point at the expected item; otherwise the
/// item is located by value. A change that cannot be applied means the
/// replica diverged from its source.
pub fn apply_change<T: PartialEq>(items: &mut Vec<T>, change: Change<T>) -> Result<()> {
    let reason = change.reason();

    match (reason, change.into_payload()) {
        (ChangeReason::Add, ChangePayload::Item(item)) => {
            match item.current_index {
                Some(index) if index <= items.len() => items.insert(index, item.current),
                _ => items.push(item.current),
            }
            Ok(())
        }

        (ChangeReason::AddRange, ChangePayload::Range(range)) => {
            match range.index {
                Some(index) if index <= items.len() => {
                    let tail = items.split_off(index);
                    items.extend(range.items);
                    items.extend(tail);
                }
                _ => items.extend(range.items),
            }
            Ok(())
        }

        (ChangeReason::Remove, ChangePayload::Item(item)) => {
            let index = locate(items, &item.current, item.current_index)
                .ok_or_else(|| missing(reason))?;
            items.remove(index);
            Ok(())
        }

        (ChangeReason::RemoveRange, ChangePayload::Range(range)) => {
            for removed in &range.items {
                let index = locate(items, removed, None).ok_or_else(|| missing(reason))?;
                items.remove(index);
            }
            Ok(())
        }

        (ChangeReason::Replace, ChangePayload::Item(item)) => {
            let previous = item
                .previous
                .ok_or_else(|| BridgeError::ProtocolViolation("`Replace` without previous".into()))?;
            let index =
                locate(items, &previous, item.current_index).ok_or_else(|| missing(reason))?;
            items[index] = item.current;
            Ok(())
        }

        (ChangeReason::Moved, ChangePayload::Item(item)) => {
            let (to, from) = match (item.current_index, item.previous_index) {
                (Some(to), Some(from)) => (to, from),
                _ => {
                    return Err(BridgeError::ProtocolViolation(
                        "`Moved` without indices".into(),
                    ))
                }
            };
            if from >= items.len() || items[from] != item.current {
                return Err(missing(reason));
            }
            let moved = items.remove(from);
            if to > items.len() {
                return Err(BridgeError::IndexOutOfRange {
                    index: to,
                    len: items.len(),
                });
            }
            items.insert(to, moved);
            Ok(())
        }

        (ChangeReason::Refresh, _) => Ok(()),

        (ChangeReason::Clear, _) => {
            items.clear();
            Ok(())
        }

        (reason, _) => Err(BridgeError::ProtocolViolation(format!(
            "`{}` change with mismatched payload",
            reason
        ))),
    }
}

fn locate<T: PartialEq>(items: &[T], item: &T, hint: Option<usize>) -> Option<usize> {
    match hint {
        Some(index) if items.get(index) == Some(item) => Some(index),
        _ => items.iter().position(|candidate| candidate == item),
    }
}

fn missing(reason: ChangeReason) -> BridgeError {
    BridgeError::OutOfSync(format!("`{}` refers to an item the replica does not hold", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let mut items = vec![];
        apply_change(&mut items, Change::add("a", 0)).unwrap();
        apply_change(&mut items, Change::add("b", 1)).unwrap();
        apply_change(&mut items, Change::remove("a", 0)).unwrap();
        assert_eq!(items, vec!["b"]);
    }

    #[test]
    fn test_add_range_at_index() {
        let mut items = vec![1, 4];
        apply_change(&mut items, Change::add_range(vec![2, 3], 1).unwrap()).unwrap();
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_move() {
        let mut items = vec!["a", "b", "c"];
        apply_change(&mut items, Change::moved("a", 2, 0).unwrap()).unwrap();
        assert_eq!(items, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_replace_with_stale_index_falls_back_to_search() {
        let mut items = vec!["a", "b"];
        apply_change(&mut items, Change::replace("z", "b", 0)).unwrap();
        assert_eq!(items, vec!["a", "z"]);
    }

    #[test]
    fn test_remove_unknown_item_is_out_of_sync() {
        let mut items = vec!["a"];
        let result = apply_change(&mut items, Change::remove("x", 0));
        assert!(matches!(result, Err(BridgeError::OutOfSync(_))));
        assert_eq!(items, vec!["a"]);
    }

    #[test]
    fn test_clear_and_refresh() {
        let mut items = vec![1, 2];
        apply_change(&mut items, Change::refresh(1, 0)).unwrap();
        assert_eq!(items, vec![1, 2]);
        apply_change(&mut items, Change::clear()).unwrap();
        assert!(items.is_empty());
    }
}
