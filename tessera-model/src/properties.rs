use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Immutable data attached to an entity.
///
/// Properties are plain values: equality is structural and a modification
/// always produces a new value. The serde bounds let repositories persist
/// them under the collection's descriptor.
///
/// Implemented automatically for every type meeting the bounds.
pub trait Properties:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Properties for T where
    T: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}
