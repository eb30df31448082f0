//! The particle arena: creation, deletion, snapshots, pixel sizes.

use std::rc::Rc;

use log::info;
use rustc_hash::FxHashMap;

use super::particle::Particle;
use super::schema::{CanonicalField, FieldSchema};
use super::ParticleId;
use crate::error::TomopickError;
use crate::place::Place;

/// Insertion-ordered collection of [`Particle`] records keyed by stable
/// identity.
///
/// Owns the two pixel-size scalars applied uniformly to every contained
/// particle's origin/shift interpretation, and a frozen copy of the
/// particles as read from file for "reset to original".
#[derive(Debug)]
pub struct ParticleData {
    schema: Rc<FieldSchema>,
    particles: Vec<Particle>,
    index: FxHashMap<ParticleId, usize>,
    /// Frozen copies as read from file, in file order. Empty for lists
    /// that were not loaded from a file.
    originals: Vec<Particle>,
    original_index: FxHashMap<ParticleId, usize>,
    pixelsize_ori: f64,
    pixelsize_tra: f64,
    next_id: u64,
}

impl ParticleData {
    /// An empty arena for the given schema.
    ///
    /// Fails with [`TomopickError::InvalidConfig`] when either pixel size
    /// is not positive.
    pub fn new(
        schema: FieldSchema,
        pixelsize_ori: f64,
        pixelsize_tra: f64,
    ) -> Result<Self, TomopickError> {
        check_pixelsize(pixelsize_ori)?;
        check_pixelsize(pixelsize_tra)?;
        Ok(Self {
            schema: Rc::new(schema),
            particles: Vec::new(),
            index: FxHashMap::default(),
            originals: Vec::new(),
            original_index: FxHashMap::default(),
            pixelsize_ori,
            pixelsize_tra,
            next_id: 0,
        })
    }

    /// Convert another arena into this schema's format.
    ///
    /// Only the nine canonical fields are carried over. Positions and
    /// shifts copy raw values; rotation goes through the matrix and is
    /// re-derived with the target format's own angle convention — angle
    /// values are never copied across conventions.
    pub fn from_particle_data(
        other: &Self,
        schema: FieldSchema,
    ) -> Result<Self, TomopickError> {
        let mut data = Self::new(schema, other.pixelsize_ori, other.pixelsize_tra)?;
        for particle in other.iter() {
            let pos = [
                particle.get(CanonicalField::PosX.name())?,
                particle.get(CanonicalField::PosY.name())?,
                particle.get(CanonicalField::PosZ.name())?,
            ];
            let shift = [
                particle.get(CanonicalField::ShiftX.name())?,
                particle.get(CanonicalField::ShiftY.name())?,
                particle.get(CanonicalField::ShiftZ.name())?,
            ];
            let rotation = particle.rotation();

            let converted = data.new_particle();
            converted.set(CanonicalField::PosX.name(), pos[0])?;
            converted.set(CanonicalField::PosY.name(), pos[1])?;
            converted.set(CanonicalField::PosZ.name(), pos[2])?;
            converted.set(CanonicalField::ShiftX.name(), shift[0])?;
            converted.set(CanonicalField::ShiftY.name(), shift[1])?;
            converted.set(CanonicalField::ShiftZ.name(), shift[2])?;
            converted.set_rotation(&rotation);
        }
        Ok(data)
    }

    /// The schema shared by all particles in this arena.
    #[must_use]
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Number of particles.
    #[must_use]
    pub fn size(&self) -> usize {
        self.particles.len()
    }

    /// Whether the arena holds no particles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Particle ids in insertion order.
    #[must_use]
    pub fn particle_ids(&self) -> Vec<ParticleId> {
        self.particles.iter().map(Particle::id).collect()
    }

    /// Whether a particle id is present.
    #[must_use]
    pub fn contains(&self, id: ParticleId) -> bool {
        self.index.contains_key(&id)
    }

    /// Read access to a particle.
    #[must_use]
    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.index.get(&id).map(|&i| &self.particles[i])
    }

    /// Write access to a particle.
    pub fn get_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        self.index.get(&id).map(|&i| &mut self.particles[i])
    }

    /// Iterate particles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    /// Create a new particle with a fresh id and a default-zero record,
    /// returning it for the caller to populate.
    ///
    /// The particle is only registered here; rendering collections are the
    /// façade's concern.
    pub fn new_particle(&mut self) -> &mut Particle {
        let id = ParticleId(self.next_id);
        self.next_id += 1;
        let particle = Particle::new(
            id,
            Rc::clone(&self.schema),
            self.pixelsize_ori,
            self.pixelsize_tra,
        );
        let slot = self.particles.len();
        self.particles.push(particle);
        let _ = self.index.insert(id, slot);
        &mut self.particles[slot]
    }

    /// Delete one particle by id. Deleting an absent id is a no-op:
    /// multiple event sources may race to request the same deletion.
    pub fn delete_particle(&mut self, id: ParticleId) {
        self.delete_particles(&[id]);
    }

    /// Delete several particles by id; absent ids are skipped.
    pub fn delete_particles(&mut self, ids: &[ParticleId]) {
        let mut removed = false;
        for id in ids {
            removed |= self.index.remove(id).is_some();
        }
        if removed {
            self.particles.retain(|p| self.index.contains_key(&p.id()));
            self.rebuild_index();
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .particles
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id(), i))
            .collect();
    }

    // -- Original-load snapshot --

    /// Freeze the current particles as the "original" state. Formats call
    /// this once after a successful read.
    pub fn store_original_particles(&mut self) {
        self.originals = self.particles.clone();
        self.original_index = self
            .originals
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id(), i))
            .collect();
    }

    /// Restore the given particles from the original-load snapshot.
    ///
    /// Ids without a snapshot entry (created after load) are left
    /// untouched with a diagnostic; this is expected, not an error.
    pub fn reset_particles(&mut self, ids: &[ParticleId]) {
        for &id in ids {
            match self.original_index.get(&id) {
                Some(&orig_slot) => {
                    if let Some(&slot) = self.index.get(&id) {
                        let mut restored = self.originals[orig_slot].clone();
                        restored.set_pixelsize_ori(self.pixelsize_ori);
                        restored.set_pixelsize_tra(self.pixelsize_tra);
                        self.particles[slot] = restored;
                    }
                }
                None => {
                    info!("not resetting particle {id}: it was not read from a file");
                }
            }
        }
    }

    /// Drop all current particles and restore the full original-load
    /// snapshot.
    pub fn reset_all_particles(&mut self) {
        self.particles = self.originals.clone();
        for particle in &mut self.particles {
            particle.set_pixelsize_ori(self.pixelsize_ori);
            particle.set_pixelsize_tra(self.pixelsize_tra);
        }
        self.rebuild_index();
    }

    /// Whether `id` has an original-load snapshot entry.
    #[must_use]
    pub fn has_original(&self, id: ParticleId) -> bool {
        self.original_index.contains_key(&id)
    }

    /// Iterate the original-load snapshot entries in file order.
    pub fn originals(&self) -> impl Iterator<Item = &Particle> {
        self.originals.iter()
    }

    // -- Pixel sizes --

    /// Pixel size applied to stored positions at read time.
    #[must_use]
    pub fn pixelsize_ori(&self) -> f64 {
        self.pixelsize_ori
    }

    /// Pixel size applied to stored shifts at read time.
    #[must_use]
    pub fn pixelsize_tra(&self) -> f64 {
        self.pixelsize_tra
    }

    /// Set the origin pixel size, rescaling every particle's effective
    /// position. Stored raw values are unchanged; scaling applies at read
    /// time.
    pub fn set_pixelsize_ori(&mut self, value: f64) -> Result<(), TomopickError> {
        check_pixelsize(value)?;
        self.pixelsize_ori = value;
        for particle in &mut self.particles {
            particle.set_pixelsize_ori(value);
        }
        Ok(())
    }

    /// Set the shift pixel size; same semantics as
    /// [`ParticleData::set_pixelsize_ori`].
    pub fn set_pixelsize_tra(&mut self, value: f64) -> Result<(), TomopickError> {
        check_pixelsize(value)?;
        self.pixelsize_tra = value;
        for particle in &mut self.particles {
            particle.set_pixelsize_tra(value);
        }
        Ok(())
    }

    // -- Schema extension --

    /// Register an extra named field (zero default) on the schema and on
    /// every existing particle and snapshot entry.
    pub fn register_field(
        &mut self,
        name: &str,
        aliases: &[&str],
    ) -> Result<usize, TomopickError> {
        let mut schema = (*self.schema).clone();
        let slot = schema.push_field(name, aliases)?;
        let schema = Rc::new(schema);
        for particle in &mut self.particles {
            particle.rebind_schema(Rc::clone(&schema));
        }
        for particle in &mut self.originals {
            particle.rebind_schema(Rc::clone(&schema));
        }
        self.schema = schema;
        Ok(slot)
    }

    /// Composed transforms of all particles, in insertion order.
    #[must_use]
    pub fn all_transforms(&self) -> Vec<Place> {
        self.particles.iter().map(Particle::full_transform).collect()
    }

    // -- Session restore plumbing --

    pub(crate) fn insert_restored(&mut self, values: Vec<f64>, id: ParticleId) {
        self.next_id = self.next_id.max(id.0 + 1);
        let mut particle = Particle::new(
            id,
            Rc::clone(&self.schema),
            self.pixelsize_ori,
            self.pixelsize_tra,
        );
        for (slot, value) in values.into_iter().enumerate().take(self.schema.len()) {
            particle.set_slot(slot, value);
        }
        let slot = self.particles.len();
        self.particles.push(particle);
        let _ = self.index.insert(id, slot);
    }

    pub(crate) fn insert_restored_original(&mut self, values: Vec<f64>, id: ParticleId) {
        self.next_id = self.next_id.max(id.0 + 1);
        let mut particle = Particle::new(
            id,
            Rc::clone(&self.schema),
            self.pixelsize_ori,
            self.pixelsize_tra,
        );
        for (slot, value) in values.into_iter().enumerate().take(self.schema.len()) {
            particle.set_slot(slot, value);
        }
        let slot = self.originals.len();
        self.originals.push(particle);
        let _ = self.original_index.insert(id, slot);
    }
}

fn check_pixelsize(value: f64) -> Result<(), TomopickError> {
    if value <= 0.0 {
        return Err(TomopickError::InvalidConfig(format!(
            "pixel size needs to be > 0, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::euler::ZXZ;
    use crate::data::schema::SchemaBuilder;
    use approx::assert_abs_diff_eq;

    fn schema() -> FieldSchema {
        let mut b = SchemaBuilder::new(&ZXZ);
        for field in CanonicalField::ALL {
            b = b.field(field.name(), &[]).canonical(field, field.name());
        }
        b.build().unwrap()
    }

    fn loaded_data(n: usize) -> ParticleData {
        let mut data = ParticleData::new(schema(), 1.0, 1.0).unwrap();
        for i in 0..n {
            let p = data.new_particle();
            p.set("pos_x", i as f64).unwrap();
        }
        data.store_original_particles();
        data
    }

    #[test]
    fn pixelsize_must_be_positive() {
        let mut data = loaded_data(1);
        assert!(matches!(
            data.set_pixelsize_ori(0.0),
            Err(TomopickError::InvalidConfig(_))
        ));
        assert!(data.set_pixelsize_ori(2.5).is_ok());
    }

    #[test]
    fn pixelsize_scales_at_read_time() {
        let mut data = loaded_data(3);
        let id = data.particle_ids()[2];
        let raw_before = data.get(id).unwrap().get("pos_x").unwrap();
        let coord_before = data.get(id).unwrap().origin_coord();

        data.set_pixelsize_ori(2.0).unwrap();

        let particle = data.get(id).unwrap();
        // Raw storage untouched, effective coordinate doubled.
        assert_eq!(particle.get("pos_x").unwrap(), raw_before);
        assert_abs_diff_eq!(
            particle.origin_coord().x,
            coord_before.x * 2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let mut data = loaded_data(3);
        let ids = data.particle_ids();
        data.delete_particle(ids[1]);
        assert_eq!(data.size(), 2);
        // Second delete of the same id: defined no-op.
        data.delete_particle(ids[1]);
        assert_eq!(data.size(), 2);
        assert_eq!(data.particle_ids(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut data = loaded_data(2);
        let ids = data.particle_ids();
        data.delete_particle(ids[1]);
        let fresh = data.new_particle().id();
        assert!(fresh != ids[0] && fresh != ids[1]);
    }

    #[test]
    fn reset_restores_snapshot_values() {
        let mut data = loaded_data(2);
        let id = data.particle_ids()[0];
        data.get_mut(id).unwrap().set("pos_x", 99.0).unwrap();
        data.reset_particles(&[id]);
        assert_eq!(data.get(id).unwrap().get("pos_x").unwrap(), 0.0);
    }

    #[test]
    fn reset_skips_particles_created_after_load() {
        let mut data = loaded_data(1);
        let fresh = {
            let p = data.new_particle();
            p.set("pos_x", 42.0).unwrap();
            p.id()
        };
        data.reset_particles(&[fresh]);
        // No snapshot entry: untouched, no error.
        assert_eq!(data.get(fresh).unwrap().get("pos_x").unwrap(), 42.0);
    }

    #[test]
    fn reset_all_drops_later_additions() {
        let mut data = loaded_data(2);
        let _ = data.new_particle();
        assert_eq!(data.size(), 3);
        data.reset_all_particles();
        assert_eq!(data.size(), 2);
    }

    #[test]
    fn conversion_rederives_angles_via_matrix() {
        use crate::euler::{EulerRotation, ZYZ_INVERTED};

        let mut source = loaded_data(1);
        let id = source.particle_ids()[0];
        {
            let p = source.get_mut(id).unwrap();
            p.set("ang_1", 40.0).unwrap();
            p.set("ang_2", 60.0).unwrap();
            p.set("ang_3", -20.0).unwrap();
            p.set("shift_y", 3.0).unwrap();
        }

        let mut b = SchemaBuilder::new(&ZYZ_INVERTED);
        for field in CanonicalField::ALL {
            b = b.field(field.name(), &[]).canonical(field, field.name());
        }
        let converted =
            ParticleData::from_particle_data(&source, b.build().unwrap()).unwrap();

        let src = source.get(id).unwrap();
        let dst = converted.iter().next().unwrap();
        // Same rotation matrix, different stored angles.
        assert!(dst.rotation().approx_eq(&src.rotation(), 1e-9));
        assert!(
            (dst.get("ang_1").unwrap() - src.get("ang_1").unwrap()).abs() > 1e-6,
            "conventions should disagree on raw angle values"
        );
        assert_eq!(dst.get("shift_y").unwrap(), 3.0);
        // And the target's own convention reproduces its stored angles.
        let angles = ZYZ_INVERTED.rot_from_matrix(&dst.rotation().rotation());
        assert_abs_diff_eq!(angles[0], dst.get("ang_1").unwrap(), epsilon = 1e-9);
    }
}
