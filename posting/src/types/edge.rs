//! Mutation requests.
//!
//! A `DirectedEdge` is the input that produces postings. It is never stored.

use crate::types::{Op, Posting, Target, Uid, Value};

/// Maximum attribute name length, bounded by the `u16` length prefix in keys.
pub const MAX_ATTRIBUTE_LENGTH: usize = u16::MAX as usize;

/// Check that `attribute` fits the `u16` length prefix of a key.
///
/// # Errors
///
/// Returns a description if the name is empty or too long.
pub fn validate_attribute(attribute: &str) -> Result<(), String> {
    if attribute.is_empty() {
        return Err("attribute was empty".into());
    }
    if attribute.len() > MAX_ATTRIBUTE_LENGTH {
        return Err(format!(
            "attribute too long. Max: {MAX_ATTRIBUTE_LENGTH}, got: {}",
            attribute.len()
        ));
    }
    Ok(())
}

/// A mutation request against one (attribute, entity) pair.
///
/// # Invariants (checked by `validate`)
///
/// - `attribute` is non-empty and at most `MAX_ATTRIBUTE_LENGTH` bytes
/// - `entity` is a valid entity uid
/// - a uid target is a valid entity uid
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedEdge {
    pub attribute: String,
    pub entity: Uid,
    pub target: Target,
    pub op: Op,
    pub label: Option<String>,
    /// Explicit logical timestamp. The engine assigns one when absent.
    pub timestamp: Option<u64>,
}

impl DirectedEdge {
    /// Edge that sets a scalar value.
    #[must_use]
    pub fn set_value(attribute: &str, entity: u64, value: Value) -> Self {
        Self::new(attribute, entity, Target::Value(value), Op::Set)
    }

    /// Edge that deletes a scalar value.
    #[must_use]
    pub fn delete_value(attribute: &str, entity: u64, value: Value) -> Self {
        Self::new(attribute, entity, Target::Value(value), Op::Delete)
    }

    /// Edge that links `entity` to `target`.
    #[must_use]
    pub fn set_uid(attribute: &str, entity: u64, target: u64) -> Self {
        Self::new(attribute, entity, Target::Uid(Uid(target)), Op::Set)
    }

    /// Edge that unlinks `entity` from `target`.
    #[must_use]
    pub fn delete_uid(attribute: &str, entity: u64, target: u64) -> Self {
        Self::new(attribute, entity, Target::Uid(Uid(target)), Op::Delete)
    }

    fn new(attribute: &str, entity: u64, target: Target, op: Op) -> Self {
        Self {
            attribute: attribute.to_owned(),
            entity: Uid(entity),
            target,
            op,
            label: None,
            timestamp: None,
        }
    }

    /// Attach a label.
    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    /// Attach an explicit logical timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Check the request shape.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        validate_attribute(&self.attribute).map_err(|e| format!("edge {e}"))?;
        if !self.entity.is_entity() {
            return Err(format!("edge entity {} is not a valid uid", self.entity.0));
        }
        if let Target::Uid(target) = self.target {
            if !target.is_entity() {
                return Err(format!("edge target {} is not a valid uid", target.0));
            }
        }
        Ok(())
    }

    /// The posting this edge produces, stamped with `commit_ts`.
    #[must_use]
    pub fn to_posting(&self, commit_ts: u64) -> Posting {
        Posting {
            target: self.target.clone(),
            op: self.op,
            commit_ts,
            label: self.label.clone(),
        }
    }
}
