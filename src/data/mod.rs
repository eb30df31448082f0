//! Authoritative particle storage: flat field records, lazy transform
//! caches, format schemas.
//!
//! A [`ParticleData`] is an insertion-ordered arena of [`Particle`]
//! records keyed by stable, never-reused ids. Field names (including
//! format-specific aliases) resolve through the arena's [`FieldSchema`];
//! the nine canonical fields (`pos_x/y/z`, `shift_x/y/z`, `ang_1/2/3`)
//! must exist in every schema and drive the derived origin, translation
//! and rotation transforms.

mod particle;
mod particle_data;
mod schema;

pub use particle::Particle;
pub use particle_data::ParticleData;
pub use schema::{CanonicalField, FieldSchema, SchemaBuilder};

use serde::{Deserialize, Serialize};

/// Stable identity of a particle within its owning [`ParticleData`].
///
/// Ids are handed out by a per-arena monotonic counter and never reused,
/// so a deleted particle's id stays dangling rather than aliasing a new
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleId(pub(crate) u64);

impl ParticleId {
    /// The raw id value (for diagnostics and error payloads).
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ParticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
