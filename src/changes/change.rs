//! Change records and their wire shape.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a collection changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    Add,
    AddRange,
    Replace,
    Remove,
    RemoveRange,
    Refresh,
    Moved,
    Clear,
}

/// Which payload a reason carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeShape {
    Item,
    Range,
}

impl ChangeReason {
    /// Payload shape this reason requires.
    pub fn shape(self) -> ChangeShape {
        match self {
            ChangeReason::Add
            | ChangeReason::Remove
            | ChangeReason::Replace
            | ChangeReason::Moved
            | ChangeReason::Refresh => ChangeShape::Item,
            ChangeReason::AddRange | ChangeReason::RemoveRange | ChangeReason::Clear => {
                ChangeShape::Range
            }
        }
    }

    /// Wire name of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeReason::Add => "Add",
            ChangeReason::AddRange => "AddRange",
            ChangeReason::Replace => "Replace",
            ChangeReason::Remove => "Remove",
            ChangeReason::RemoveRange => "RemoveRange",
            ChangeReason::Refresh => "Refresh",
            ChangeReason::Moved => "Moved",
            ChangeReason::Clear => "Clear",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to a single item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ItemChange<T> {
    pub current: T,

    /// Only set for `Replace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,

    /// Set for `Moved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_index: Option<usize>,
}

/// A change spanning several items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct RangeChange<T> {
    pub items: Vec<T>,

    /// Starting index of an insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangePayload<T> {
    Item(ItemChange<T>),
    Range(RangeChange<T>),
}

/// One mutation of an ordered collection.
///
/// Constructed only through validating constructors, so a `Change` always
/// carries the payload shape its reason requires. On the wire it takes the
/// form of [`WireChange`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireChange<T>", into = "WireChange<T>")]
#[serde(bound(
    serialize = "T: Serialize + Clone",
    deserialize = "T: Deserialize<'de>"
))]
pub struct Change<T> {
    reason: ChangeReason,
    payload: ChangePayload<T>,
}

impl<T> Change<T> {
    /// Item inserted at `index`.
    pub fn add(item: T, index: usize) -> Self {
        Self::item_unchecked(ChangeReason::Add, item, None, Some(index), None)
    }

    /// Item removed from `index`.
    pub fn remove(item: T, index: usize) -> Self {
        Self::item_unchecked(ChangeReason::Remove, item, None, Some(index), None)
    }

    /// `previous` replaced by `current` in place.
    pub fn replace(current: T, previous: T, index: usize) -> Self {
        Self::item_unchecked(
            ChangeReason::Replace,
            current,
            Some(previous),
            Some(index),
            Some(index),
        )
    }

    /// `None` when the indices are equal: such a move is never emitted.
    pub fn moved(item: T, current_index: usize, previous_index: usize) -> Option<Self> {
        (current_index != previous_index).then(|| {
            Self::item_unchecked(
                ChangeReason::Moved,
                item,
                None,
                Some(current_index),
                Some(previous_index),
            )
        })
    }

    /// Item re-announced without moving.
    pub fn refresh(item: T, index: usize) -> Self {
        Self::item_unchecked(ChangeReason::Refresh, item, None, Some(index), None)
    }

    /// `None` for an empty range.
    pub fn add_range(items: Vec<T>, index: usize) -> Option<Self> {
        (!items.is_empty()).then(|| Self {
            reason: ChangeReason::AddRange,
            payload: ChangePayload::Range(RangeChange {
                items,
                index: Some(index),
            }),
        })
    }

    /// `None` for an empty range.
    pub fn remove_range(items: Vec<T>) -> Option<Self> {
        (!items.is_empty()).then(|| Self {
            reason: ChangeReason::RemoveRange,
            payload: ChangePayload::Range(RangeChange { items, index: None }),
        })
    }

    /// A clear carries an empty range as its marker.
    pub fn clear() -> Self {
        Self {
            reason: ChangeReason::Clear,
            payload: ChangePayload::Range(RangeChange {
                items: Vec::new(),
                index: None,
            }),
        }
    }

    /// Build an item change, checking it against the protocol rules.
    pub fn item(reason: ChangeReason, change: ItemChange<T>) -> Result<Self> {
        let change = Self {
            reason,
            payload: ChangePayload::Item(change),
        };
        change.validate()?;
        Ok(change)
    }

    /// Build a range change, checking it against the protocol rules.
    pub fn range(reason: ChangeReason, change: RangeChange<T>) -> Result<Self> {
        let change = Self {
            reason,
            payload: ChangePayload::Range(change),
        };
        change.validate()?;
        Ok(change)
    }

    fn item_unchecked(
        reason: ChangeReason,
        current: T,
        previous: Option<T>,
        current_index: Option<usize>,
        previous_index: Option<usize>,
    ) -> Self {
        Self {
            reason,
            payload: ChangePayload::Item(ItemChange {
                current,
                previous,
                current_index,
                previous_index,
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        let violation = |detail: &str| {
            Err(BridgeError::ProtocolViolation(format!(
                "`{}` change {}",
                self.reason, detail
            )))
        };

        match (&self.payload, self.reason.shape()) {
            (ChangePayload::Item(_), ChangeShape::Range) => return violation("requires a range payload"),
            (ChangePayload::Range(_), ChangeShape::Item) => return violation("requires an item payload"),
            _ => {}
        }

        match (&self.payload, self.reason) {
            (ChangePayload::Item(item), ChangeReason::Replace) if item.previous.is_none() => {
                violation("has no previous item")
            }
            (ChangePayload::Item(item), ChangeReason::Add | ChangeReason::Remove)
                if item.previous.is_some() =>
            {
                violation("must not carry a previous item")
            }
            (ChangePayload::Item(item), ChangeReason::Moved) => {
                match (item.current_index, item.previous_index) {
                    (Some(current), Some(previous)) if current != previous => Ok(()),
                    (Some(_), Some(_)) => violation("moves an item onto its own index"),
                    _ => violation("lacks its indices"),
                }
            }
            (ChangePayload::Range(range), ChangeReason::AddRange) if range.items.is_empty() => {
                violation("is empty")
            }
            _ => Ok(()),
        }
    }

    /// Get the change reason.
    pub fn reason(&self) -> ChangeReason {
        self.reason
    }

    /// Get the payload.
    pub fn payload(&self) -> &ChangePayload<T> {
        &self.payload
    }

    pub fn into_payload(self) -> ChangePayload<T> {
        self.payload
    }

    /// Item payload, if this is an item change.
    pub fn as_item(&self) -> Option<&ItemChange<T>> {
        match &self.payload {
            ChangePayload::Item(item) => Some(item),
            ChangePayload::Range(_) => None,
        }
    }

    /// Range payload, if this is a range change.
    pub fn as_range(&self) -> Option<&RangeChange<T>> {
        match &self.payload {
            ChangePayload::Range(range) => Some(range),
            ChangePayload::Item(_) => None,
        }
    }

    /// Number of items the change carries (previous values excluded).
    pub fn len(&self) -> usize {
        match &self.payload {
            ChangePayload::Item(_) => 1,
            ChangePayload::Range(range) => range.items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert every carried item, keeping reason and indices.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Change<U> {
        let payload = match self.payload {
            ChangePayload::Item(item) => ChangePayload::Item(ItemChange {
                current: f(item.current),
                previous: item.previous.map(&mut f),
                current_index: item.current_index,
                previous_index: item.previous_index,
            }),
            ChangePayload::Range(range) => ChangePayload::Range(RangeChange {
                items: range.items.into_iter().map(f).collect(),
                index: range.index,
            }),
        };
        Change {
            reason: self.reason,
            payload,
        }
    }
}

/// Wire form of a [`Change`]:
/// `{ reason, item?: { current, previous?, currentIndex?, previousIndex? }, range?: { items, index? } }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct WireChange<T> {
    pub reason: ChangeReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemChange<T>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeChange<T>>,
}

impl<T> From<Change<T>> for WireChange<T> {
    fn from(change: Change<T>) -> Self {
        match change.payload {
            ChangePayload::Item(item) => WireChange {
                reason: change.reason,
                item: Some(item),
                range: None,
            },
            ChangePayload::Range(range) => WireChange {
                reason: change.reason,
                item: None,
                range: Some(range),
            },
        }
    }
}

impl<T> TryFrom<WireChange<T>> for Change<T> {
    type Error = BridgeError;

    fn try_from(wire: WireChange<T>) -> Result<Self> {
        match (wire.reason.shape(), wire.item, wire.range) {
            (ChangeShape::Item, Some(item), None) => Change::item(wire.reason, item),
            (ChangeShape::Range, None, Some(range)) => Change::range(wire.reason, range),
            (_, Some(_), Some(_)) => Err(BridgeError::ProtocolViolation(format!(
                "`{}` change carries both item and range payloads",
                wire.reason
            ))),
            (ChangeShape::Item, _, _) => Err(BridgeError::ProtocolViolation(format!(
                "`{}` change without `item` payload",
                wire.reason
            ))),
            (ChangeShape::Range, _, _) => Err(BridgeError::ProtocolViolation(format!(
                "`{}` change without `range.items` payload",
                wire.reason
            ))),
        }
    }
}
