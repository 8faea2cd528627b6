//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, build a new one. `EmailAddress` and `OrderReference` are the
/// value objects of this workspace.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
