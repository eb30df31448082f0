//! Session save and restore.
//!
//! A [`ListSnapshot`] serializes the authoritative state of a
//! [`ParticleList`]: the particle data verbatim (schema, raw field
//! values, the original-load snapshot, pixel sizes), the three
//! display/color arrays, and the lock flags. The surface collection and
//! the marker set are *not* serialized — they are derived caches and are
//! reconstructed from the data on restore.

use serde::{Deserialize, Serialize};

use crate::data::{CanonicalField, FieldSchema, ParticleData, ParticleId, SchemaBuilder};
use crate::error::TomopickError;
use crate::euler::convention_by_name;
use crate::list::ParticleList;
use crate::palette::Rgba;

/// Serialized form of a [`FieldSchema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Main field names in slot order.
    pub fields: Vec<String>,
    /// Alias → slot pairs.
    pub aliases: Vec<(String, usize)>,
    /// Slots of the nine canonical fields.
    pub canonical_slots: [usize; 9],
    /// Euler-convention name (see
    /// [`crate::euler::EulerRotation::convention_name`]).
    pub convention: String,
}

impl SchemaSnapshot {
    fn capture(schema: &FieldSchema) -> Self {
        Self {
            fields: schema.field_names().to_vec(),
            aliases: schema.aliases().to_vec(),
            canonical_slots: CanonicalField::ALL.map(|f| schema.canonical_slot(f)),
            convention: schema.euler().convention_name().to_owned(),
        }
    }

    fn restore(&self) -> Result<FieldSchema, TomopickError> {
        let euler = convention_by_name(&self.convention).ok_or_else(|| {
            TomopickError::InvalidConfig(format!(
                "unknown Euler convention in session data: {}",
                self.convention
            ))
        })?;

        let mut builder = SchemaBuilder::new(euler);
        for (slot, name) in self.fields.iter().enumerate() {
            let aliases: Vec<&str> = self
                .aliases
                .iter()
                .filter(|(_, s)| *s == slot)
                .map(|(a, _)| a.as_str())
                .collect();
            builder = builder.field(name, &aliases);
        }
        for (field, &slot) in CanonicalField::ALL.iter().zip(&self.canonical_slots) {
            let name = self.fields.get(slot).ok_or_else(|| {
                TomopickError::InvalidConfig(format!(
                    "canonical slot {slot} out of range in session data"
                ))
            })?;
            builder = builder.canonical(*field, name);
        }
        builder.build()
    }
}

/// Serialized form of a [`ParticleData`] arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// The field schema.
    pub schema: SchemaSnapshot,
    /// Origin pixel size.
    pub pixelsize_ori: f64,
    /// Shift pixel size.
    pub pixelsize_tra: f64,
    /// `(id, raw field values)` per particle, in list order.
    pub particles: Vec<(ParticleId, Vec<f64>)>,
    /// The frozen original-load copies, in file order.
    pub originals: Vec<(ParticleId, Vec<f64>)>,
}

impl DataSnapshot {
    /// Capture an arena.
    #[must_use]
    pub fn capture(data: &ParticleData) -> Self {
        Self {
            schema: SchemaSnapshot::capture(data.schema()),
            pixelsize_ori: data.pixelsize_ori(),
            pixelsize_tra: data.pixelsize_tra(),
            particles: data
                .iter()
                .map(|p| (p.id(), p.values().to_vec()))
                .collect(),
            originals: data
                .originals()
                .map(|p| (p.id(), p.values().to_vec()))
                .collect(),
        }
    }

    /// Rebuild the arena.
    pub fn restore(&self) -> Result<ParticleData, TomopickError> {
        let schema = self.schema.restore()?;
        let mut data = ParticleData::new(schema, self.pixelsize_ori, self.pixelsize_tra)?;
        for (id, values) in &self.particles {
            data.insert_restored(values.clone(), *id);
        }
        for (id, values) in &self.originals {
            data.insert_restored_original(values.clone(), *id);
        }
        Ok(data)
    }
}

/// Serialized form of a [`ParticleList`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSnapshot {
    /// The list name.
    pub name: String,
    /// The authoritative particle data.
    pub data: DataSnapshot,
    /// Selection mask.
    pub selected: Vec<bool>,
    /// Display mask.
    pub displayed: Vec<bool>,
    /// Per-particle colors.
    pub colors: Vec<Rgba>,
    /// Base list color.
    pub color: Rgba,
    /// Marker radius.
    pub radius: f64,
    /// Axes-tripod size.
    pub axes_size: f64,
    /// Translation lock flag.
    pub translation_locked: bool,
    /// Rotation lock flag.
    pub rotation_locked: bool,
    /// Editing lock flag.
    pub editing_locked: bool,
}

impl ListSnapshot {
    /// Capture a list.
    #[must_use]
    pub fn capture(list: &ParticleList) -> Self {
        Self {
            name: list.name().to_owned(),
            data: DataSnapshot::capture(list.data()),
            selected: list.selected_particles().to_vec(),
            displayed: list.displayed_particles().to_vec(),
            colors: list.particle_colors().to_vec(),
            color: list.color(),
            radius: list.radius(),
            axes_size: list.axes_size(),
            translation_locked: list.translation_locked,
            rotation_locked: list.rotation_locked,
            editing_locked: list.editing_locked,
        }
    }

    /// Rebuild the list: the data is restored verbatim, the surface
    /// collection and marker set are reconstructed from it, then the
    /// display arrays and locks are applied.
    pub fn restore(&self) -> Result<ParticleList, TomopickError> {
        let data = self.data.restore()?;
        let mut list = ParticleList::new(&self.name, data, self.color);
        list.set_radius(self.radius)?;
        list.set_axes_size(self.axes_size)?;
        list.set_selected_particles(Some(&self.selected))?;
        list.set_displayed_particles(Some(&self.displayed))?;
        list.set_particle_colors(Some(&self.colors))?;
        list.translation_locked = self.translation_locked;
        list.rotation_locked = self.rotation_locked;
        list.editing_locked = self.editing_locked;
        Ok(list)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, TomopickError> {
        serde_json::to_string(self).map_err(|e| TomopickError::Parse(e.to_string()))
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, TomopickError> {
        serde_json::from_str(json).map_err(|e| TomopickError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SchemaBuilder;
    use crate::euler::ZXZ;
    use crate::place::Place;
    use glam::DVec3;

    fn sample_list() -> ParticleList {
        let mut b = SchemaBuilder::new(&ZXZ);
        for field in CanonicalField::ALL {
            b = b.field(field.name(), &[]).canonical(field, field.name());
        }
        let mut data = ParticleData::new(b.build().unwrap(), 1.5, 1.0).unwrap();
        for i in 0..3 {
            let p = data.new_particle();
            p.set("pos_x", f64::from(i)).unwrap();
            p.set("phi", 15.0 * f64::from(i)).unwrap();
        }
        data.store_original_particles();

        let mut list = ParticleList::new("sample", data, [0, 255, 0, 255]);
        list.set_selected_particles(Some(&[true, false, true])).unwrap();
        list.translation_locked = true;
        list
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut list = sample_list();
        let _ = list.new_particle(DVec3::new(9.0, 9.0, 9.0), DVec3::ZERO, &Place::IDENTITY);

        let json = ListSnapshot::capture(&list).to_json().unwrap();
        let restored = ListSnapshot::from_json(&json).unwrap().restore().unwrap();

        assert_eq!(restored.size(), 4);
        assert_eq!(restored.particle_ids(), list.particle_ids());
        assert_eq!(restored.selected_particles(), list.selected_particles());
        assert_eq!(restored.particle_colors(), list.particle_colors());
        assert!(restored.translation_locked);
        assert_eq!(restored.origin_pixelsize(), 1.5);
        assert!(restored.check_consistency());

        // Field values identical.
        for (a, b) in list
            .data()
            .iter()
            .zip(restored.data().iter())
        {
            assert_eq!(a.values(), b.values());
        }
    }

    #[test]
    fn derived_views_are_rebuilt_not_deserialized() {
        let list = sample_list();
        let snapshot = ListSnapshot::capture(&list);
        let json = snapshot.to_json().unwrap();
        // The JSON payload must not contain marker or instance tables.
        assert!(!json.contains("markers"));
        assert!(!json.contains("places"));

        let restored = snapshot.restore().unwrap();
        assert_eq!(restored.collection().len(), 3);
        assert_eq!(restored.markers().len(), 3);
    }

    #[test]
    fn reset_still_works_after_restore() {
        let list = sample_list();
        let mut restored = ListSnapshot::capture(&list).restore().unwrap();
        let id = restored.particle_ids()[0];
        restored
            .data_mut()
            .get_mut(id)
            .unwrap()
            .set("pos_x", 123.0)
            .unwrap();
        restored.reset_particles(&[id]);
        assert_eq!(
            restored.get_particle(id).unwrap().get("pos_x").unwrap(),
            0.0
        );
    }
}
