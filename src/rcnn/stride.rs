use std::fmt;

use serde::{Deserialize, Serialize};

/// Feature pyramid levels emitted by the network, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureStride {
    S32,
    S16,
    S8,
}

impl FeatureStride {
    /// All strides in the order the network emits them.
    pub const ALL: [FeatureStride; 3] = [FeatureStride::S32, FeatureStride::S16, FeatureStride::S8];

    pub fn value(self) -> usize {
        match self {
            FeatureStride::S32 => 32,
            FeatureStride::S16 => 16,
            FeatureStride::S8 => 8,
        }
    }
}

impl fmt::Display for FeatureStride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stride{}", self.value())
    }
}

/// Fixed `{stride -> T}` map with one slot per pyramid level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrideMap<T> {
    pub stride32: T,
    pub stride16: T,
    pub stride8: T,
}

impl<T> StrideMap<T> {
    pub fn new(stride32: T, stride16: T, stride8: T) -> Self {
        StrideMap {
            stride32,
            stride16,
            stride8,
        }
    }

    /// Builds the map by calling `f` once per stride, in output order.
    pub fn from_fn(mut f: impl FnMut(FeatureStride) -> T) -> Self {
        StrideMap {
            stride32: f(FeatureStride::S32),
            stride16: f(FeatureStride::S16),
            stride8: f(FeatureStride::S8),
        }
    }

    /// Fallible `from_fn`; stops at the first error.
    pub fn try_from_fn<E>(mut f: impl FnMut(FeatureStride) -> Result<T, E>) -> Result<Self, E> {
        Ok(StrideMap {
            stride32: f(FeatureStride::S32)?,
            stride16: f(FeatureStride::S16)?,
            stride8: f(FeatureStride::S8)?,
        })
    }

    pub fn get(&self, stride: FeatureStride) -> &T {
        match stride {
            FeatureStride::S32 => &self.stride32,
            FeatureStride::S16 => &self.stride16,
            FeatureStride::S8 => &self.stride8,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureStride, &T)> {
        FeatureStride::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}
