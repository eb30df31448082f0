//! A single oriented point-cloud record.

use std::cell::Cell;
use std::rc::Rc;

use glam::DVec3;

use super::schema::{CanonicalField, FieldSchema};
use super::ParticleId;
use crate::error::TomopickError;
use crate::place::Place;

/// One particle: position, orientation and format-specific metadata for a
/// picked location in a tomogram.
///
/// Field storage is a flat numeric record; the derived `origin`,
/// `translation` and `rotation` transforms are computed lazily from named
/// field subsets and cached until an overlapping field is written. The
/// composed [`Particle::full_transform`] is
/// `origin * translation * rotation`.
///
/// Particles are created through their owning
/// [`ParticleData`](super::ParticleData), never directly.
#[derive(Debug, Clone)]
pub struct Particle {
    id: ParticleId,
    schema: Rc<FieldSchema>,
    values: Vec<f64>,
    pixelsize_ori: f64,
    pixelsize_tra: f64,
    origin_cache: Cell<Option<Place>>,
    translation_cache: Cell<Option<Place>>,
    rotation_cache: Cell<Option<Place>>,
    transform_cache: Cell<Option<Place>>,
}

impl Particle {
    pub(super) fn new(
        id: ParticleId,
        schema: Rc<FieldSchema>,
        pixelsize_ori: f64,
        pixelsize_tra: f64,
    ) -> Self {
        let values = vec![0.0; schema.len()];
        Self {
            id,
            schema,
            values,
            pixelsize_ori,
            pixelsize_tra,
            origin_cache: Cell::new(None),
            translation_cache: Cell::new(None),
            rotation_cache: Cell::new(None),
            transform_cache: Cell::new(None),
        }
    }

    /// This particle's stable id.
    #[must_use]
    pub fn id(&self) -> ParticleId {
        self.id
    }

    pub(super) fn set_id(&mut self, id: ParticleId) {
        self.id = id;
    }

    /// The schema this particle's record follows.
    #[must_use]
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub(super) fn rebind_schema(&mut self, schema: Rc<FieldSchema>) {
        self.values.resize(schema.len(), 0.0);
        self.schema = schema;
    }

    /// All resolvable attribute names: main fields, then aliases.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.schema
            .field_names()
            .iter()
            .map(String::as_str)
            .chain(self.schema.aliases().iter().map(|(a, _)| a.as_str()))
    }

    /// Raw field values in slot order (no pixel-size scaling applied).
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    // -- Field access --

    /// Get a field value by name or alias.
    pub fn get(&self, name: &str) -> Result<f64, TomopickError> {
        self.schema
            .slot(name)
            .map(|slot| self.values[slot])
            .ok_or_else(|| TomopickError::UnknownAttribute(name.to_owned()))
    }

    /// Set a field value by name or alias, invalidating only the caches
    /// derived from that field.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), TomopickError> {
        let slot = self
            .schema
            .slot(name)
            .ok_or_else(|| TomopickError::UnknownAttribute(name.to_owned()))?;
        self.set_slot(slot, value);
        Ok(())
    }

    pub(super) fn set_slot(&mut self, slot: usize, value: f64) {
        self.values[slot] = value;
        if self.schema.is_position_slot(slot) {
            self.origin_cache.set(None);
            self.transform_cache.set(None);
        } else if self.schema.is_shift_slot(slot) {
            self.translation_cache.set(None);
            self.transform_cache.set(None);
        } else if self.schema.is_angle_slot(slot) {
            self.rotation_cache.set(None);
            self.transform_cache.set(None);
        }
    }

    fn canonical_value(&self, field: CanonicalField) -> f64 {
        self.values[self.schema.canonical_slot(field)]
    }

    fn set_canonical(&mut self, field: CanonicalField, value: f64) {
        self.set_slot(self.schema.canonical_slot(field), value);
    }

    // -- Pixel sizes (managed by the owning arena) --

    /// Pixel size applied to the stored position fields at read time.
    #[must_use]
    pub fn pixelsize_ori(&self) -> f64 {
        self.pixelsize_ori
    }

    /// Pixel size applied to the stored shift fields at read time.
    #[must_use]
    pub fn pixelsize_tra(&self) -> f64 {
        self.pixelsize_tra
    }

    pub(super) fn set_pixelsize_ori(&mut self, value: f64) {
        self.pixelsize_ori = value;
        self.origin_cache.set(None);
        self.transform_cache.set(None);
    }

    pub(super) fn set_pixelsize_tra(&mut self, value: f64) {
        self.pixelsize_tra = value;
        self.translation_cache.set(None);
        self.transform_cache.set(None);
    }

    // -- Derived transforms --

    /// World-space position: origin plus shift.
    #[must_use]
    pub fn coord(&self) -> DVec3 {
        self.origin_coord() + self.translation_coord()
    }

    /// World-space origin coordinate (stored positions times pixel size).
    #[must_use]
    pub fn origin_coord(&self) -> DVec3 {
        self.origin().translation()
    }

    /// World-space shift coordinate.
    #[must_use]
    pub fn translation_coord(&self) -> DVec3 {
        self.translation().translation()
    }

    /// The origin transform: placement of the particle in tomogram space,
    /// applied last in the composition.
    #[must_use]
    pub fn origin(&self) -> Place {
        if let Some(place) = self.origin_cache.get() {
            return place;
        }
        let place = Place::from_translation(
            DVec3::new(
                self.canonical_value(CanonicalField::PosX),
                self.canonical_value(CanonicalField::PosY),
                self.canonical_value(CanonicalField::PosZ),
            ) * self.pixelsize_ori,
        );
        self.origin_cache.set(Some(place));
        place
    }

    /// Set the origin from a world-space coordinate.
    pub fn set_origin(&mut self, coord: DVec3) {
        self.set_canonical(CanonicalField::PosX, coord.x / self.pixelsize_ori);
        self.set_canonical(CanonicalField::PosY, coord.y / self.pixelsize_ori);
        self.set_canonical(CanonicalField::PosZ, coord.z / self.pixelsize_ori);
    }

    /// Set the origin from a transform; only its translational part is
    /// used.
    pub fn set_origin_place(&mut self, place: &Place) {
        self.set_origin(place.translation());
    }

    /// The shift transform: refinement offset applied after rotation.
    #[must_use]
    pub fn translation(&self) -> Place {
        if let Some(place) = self.translation_cache.get() {
            return place;
        }
        let place = Place::from_translation(
            DVec3::new(
                self.canonical_value(CanonicalField::ShiftX),
                self.canonical_value(CanonicalField::ShiftY),
                self.canonical_value(CanonicalField::ShiftZ),
            ) * self.pixelsize_tra,
        );
        self.translation_cache.set(Some(place));
        place
    }

    /// Set the shift from a world-space offset.
    pub fn set_translation(&mut self, offset: DVec3) {
        self.set_canonical(CanonicalField::ShiftX, offset.x / self.pixelsize_tra);
        self.set_canonical(CanonicalField::ShiftY, offset.y / self.pixelsize_tra);
        self.set_canonical(CanonicalField::ShiftZ, offset.z / self.pixelsize_tra);
    }

    /// Set the shift from a transform; only its translational part is
    /// used.
    pub fn set_translation_place(&mut self, place: &Place) {
        self.set_translation(place.translation());
    }

    /// The rotation transform, built from the three angle fields via the
    /// format's Euler convention.
    #[must_use]
    pub fn rotation(&self) -> Place {
        if let Some(place) = self.rotation_cache.get() {
            return place;
        }
        let place = self.schema.euler().as_place([
            self.canonical_value(CanonicalField::Ang1),
            self.canonical_value(CanonicalField::Ang2),
            self.canonical_value(CanonicalField::Ang3),
        ]);
        self.rotation_cache.set(Some(place));
        place
    }

    /// Set the rotation from a transform; only its rotational part is
    /// used, and the stored shift/position fields are untouched.
    pub fn set_rotation(&mut self, place: &Place) {
        let angles = self.schema.euler().rot_from_matrix(&place.rotation());
        self.set_canonical(CanonicalField::Ang1, angles[0]);
        self.set_canonical(CanonicalField::Ang2, angles[1]);
        self.set_canonical(CanonicalField::Ang3, angles[2]);
    }

    /// The composed transform moving an object from the global origin to
    /// this particle's position and orientation.
    ///
    /// Sub-transforms that were not invalidated since the last call are
    /// not recomputed.
    #[must_use]
    pub fn full_transform(&self) -> Place {
        if let Some(place) = self.transform_cache.get() {
            return place;
        }
        let place = self.origin() * self.translation() * self.rotation();
        self.transform_cache.set(Some(place));
        place
    }

    // -- Cache observability (for the owning module's tests) --

    #[cfg(test)]
    pub(super) fn cache_state(&self) -> [bool; 4] {
        [
            self.origin_cache.get().is_some(),
            self.translation_cache.get().is_some(),
            self.rotation_cache.get().is_some(),
            self.transform_cache.get().is_some(),
        ]
    }
}
