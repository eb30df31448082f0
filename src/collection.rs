//! Instanced-surface state: one transform slot per particle, stored
//! column-wise for batch efficiency.
//!
//! A [`SurfaceCollection`] is the render-facing view of a particle list.
//! It never owns a GPU device; the host renderer reads the parallel
//! arrays (`places`, `displayed`, `colors`) and uploads them as instance
//! data. Selection state lives *here*, decoupled from any renderer-native
//! per-instance pick state — exposing instance transforms through the
//! host's highlight mechanism would let the default transform-gizmo mouse
//! mode reposition a single selected instance, which is incorrect for
//! particles.
//!
//! Named template sub-collections hold static geometry (axes tripod,
//! surface mesh) shared by every instance, separate from the per-particle
//! table.

use rustc_hash::FxHashMap;

use crate::data::ParticleId;
use crate::error::TomopickError;
use crate::palette::Rgba;
use crate::place::Place;
use crate::triggers::{Message, TriggerSet};

/// Channel for [`CollectionEvent::InstancesMoved`].
pub const INSTANCES_MOVED: &str = "instances moved";
/// Channel for [`CollectionEvent::InstancesSelected`].
pub const INSTANCES_SELECTED: &str = "instances selected";

/// Events published by a [`SurfaceCollection`].
///
/// Both are level-triggered: one event per logical action, not one per
/// internal array write, so batch operations cannot cause event storms.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// Instance transforms changed through direct manipulation; carries
    /// the affected ids.
    InstancesMoved(Vec<ParticleId>),
    /// The selection mask changed through picking; carries the new mask.
    InstancesSelected(Vec<bool>),
}

impl Message for CollectionEvent {
    fn channel(&self) -> &'static str {
        match self {
            Self::InstancesMoved(_) => INSTANCES_MOVED,
            Self::InstancesSelected(_) => INSTANCES_SELECTED,
        }
    }
}

/// Static triangulated geometry shared by all instances of one template
/// sub-collection.
#[derive(Debug, Clone, Default)]
pub struct TemplateGeometry {
    /// Vertex positions.
    pub vertices: Vec<[f32; 3]>,
    /// Per-vertex normals.
    pub normals: Vec<[f32; 3]>,
    /// Triangle index triples.
    pub triangles: Vec<[u32; 3]>,
    /// Optional per-vertex colors; when present the template ignores
    /// per-instance colors.
    pub vertex_colors: Option<Vec<[u8; 4]>>,
}

impl TemplateGeometry {
    /// Axes tripod shown at every particle: three shaft cuboids along
    /// +x (red), +y (yellow) and +z (blue), colored per vertex.
    #[must_use]
    pub fn axes_tripod(size: f32) -> Self {
        let mut geometry = Self::default();
        let mut colors = Vec::new();
        let w = size / 15.0;

        let shafts = [
            ([0.0, -w, -w], [size, w, w], [255u8, 0, 0, 255]),
            ([-w, 0.0, -w], [w, size, w], [255, 255, 0, 255]),
            ([-w, -w, 0.0], [w, w, size], [0, 0, 255, 255]),
        ];
        for (min, max, color) in shafts {
            geometry.push_cuboid(min, max);
            while colors.len() < geometry.vertices.len() {
                colors.push(color);
            }
        }
        geometry.vertex_colors = Some(colors);
        geometry
    }

    /// Append an axis-aligned cuboid with per-face normals.
    fn push_cuboid(&mut self, min: [f32; 3], max: [f32; 3]) {
        // One quad per face; vertices duplicated so normals stay flat.
        let faces: [([f32; 3], [usize; 4]); 6] = [
            ([-1.0, 0.0, 0.0], [0, 4, 6, 2]),
            ([1.0, 0.0, 0.0], [5, 1, 3, 7]),
            ([0.0, -1.0, 0.0], [0, 1, 5, 4]),
            ([0.0, 1.0, 0.0], [2, 6, 7, 3]),
            ([0.0, 0.0, -1.0], [1, 0, 2, 3]),
            ([0.0, 0.0, 1.0], [4, 5, 7, 6]),
        ];
        let corner = |i: usize| {
            [
                if i & 1 == 0 { min[0] } else { max[0] },
                if i & 2 == 0 { min[1] } else { max[1] },
                if i & 4 == 0 { min[2] } else { max[2] },
            ]
        };
        for (normal, quad) in faces {
            let base = self.vertices.len() as u32;
            for idx in quad {
                self.vertices.push(corner(idx));
                self.normals.push(normal);
            }
            self.triangles.push([base, base + 1, base + 2]);
            self.triangles.push([base, base + 2, base + 3]);
        }
    }
}

/// A named template sub-collection: geometry plus visibility state.
#[derive(Debug, Clone, Default)]
pub struct TemplateCollection {
    /// The shared geometry, if one has been set.
    pub geometry: Option<TemplateGeometry>,
    /// Whether this template is currently shown.
    pub active: bool,
    /// Whether per-vertex colors override instance colors.
    pub color_locked: bool,
}

/// Per-particle instance table plus named template sub-collections.
pub struct SurfaceCollection {
    order: Vec<ParticleId>,
    index: FxHashMap<ParticleId, usize>,
    places: Vec<Place>,
    selected: Vec<bool>,
    displayed: Vec<bool>,
    colors: Vec<Rgba>,
    templates: Vec<(String, TemplateCollection)>,
    triggers: TriggerSet<CollectionEvent>,
}

impl SurfaceCollection {
    /// An empty collection with no templates.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            index: FxHashMap::default(),
            places: Vec::new(),
            selected: Vec::new(),
            displayed: Vec::new(),
            colors: Vec::new(),
            templates: Vec::new(),
            triggers: TriggerSet::new(),
        }
    }

    /// Event subscription handle.
    #[must_use]
    pub fn triggers(&self) -> &TriggerSet<CollectionEvent> {
        &self.triggers
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the instance table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether an instance exists for `id`.
    #[must_use]
    pub fn contains(&self, id: ParticleId) -> bool {
        self.index.contains_key(&id)
    }

    /// Instance ids in table order.
    #[must_use]
    pub fn ids(&self) -> &[ParticleId] {
        &self.order
    }

    // -- Template sub-collections --

    /// Create a named template sub-collection (no-op if it exists).
    pub fn add_collection(&mut self, name: &str) {
        if self.template(name).is_none() {
            self.templates.push((
                name.to_owned(),
                TemplateCollection {
                    geometry: None,
                    active: true,
                    color_locked: false,
                },
            ));
        }
    }

    /// Remove a template sub-collection.
    pub fn remove_collection(&mut self, name: &str) {
        self.templates.retain(|(n, _)| n != name);
    }

    /// Look up a template by name.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&TemplateCollection> {
        self.templates
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    fn template_mut(&mut self, name: &str) -> Option<&mut TemplateCollection> {
        self.templates
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Set the geometry displayed at every instance of a template.
    pub fn set_surface(&mut self, name: &str, geometry: TemplateGeometry) {
        let color_locked = geometry.vertex_colors.is_some();
        if let Some(template) = self.template_mut(name) {
            template.geometry = Some(geometry);
            template.color_locked = color_locked;
        } else {
            log::warn!("no template collection named {name}");
        }
    }

    /// Show or hide a template sub-collection.
    pub fn show_collection(&mut self, name: &str, show: bool) {
        if let Some(template) = self.template_mut(name) {
            template.active = show;
        } else {
            log::info!("ignoring show/hide of unknown template collection {name}");
        }
    }

    /// Hide a template sub-collection.
    pub fn hide_collection(&mut self, name: &str) {
        self.show_collection(name, false);
    }

    // -- Instance-level actions --

    /// Add one instance. New single instances come up displayed and
    /// selected (they were just placed interactively).
    pub fn add_place(&mut self, id: ParticleId, place: Place) -> Result<(), TomopickError> {
        if self.contains(id) {
            return Err(TomopickError::DuplicateKey(id.raw()));
        }
        self.push_instance(id, place, true);
        Ok(())
    }

    /// Add many instances with a single bookkeeping pass. Batch-loaded
    /// instances come up displayed but unselected.
    ///
    /// Validates every id before mutating anything: on error the table is
    /// unchanged.
    pub fn add_places(
        &mut self,
        ids: &[ParticleId],
        places: &[Place],
    ) -> Result<(), TomopickError> {
        if ids.len() != places.len() {
            return Err(TomopickError::ShapeMismatch {
                expected: ids.len(),
                got: places.len(),
            });
        }
        for &id in ids {
            if self.contains(id) {
                return Err(TomopickError::DuplicateKey(id.raw()));
            }
        }
        for (&id, &place) in ids.iter().zip(places) {
            self.push_instance(id, place, false);
        }
        Ok(())
    }

    fn push_instance(&mut self, id: ParticleId, place: Place, selected: bool) {
        let slot = self.order.len();
        self.order.push(id);
        let _ = self.index.insert(id, slot);
        self.places.push(place);
        self.selected.push(selected);
        self.displayed.push(true);
        let color = self.colors.last().copied().unwrap_or([190, 190, 190, 255]);
        self.colors.push(color);
    }

    /// Transform of one instance.
    pub fn place(&self, id: ParticleId) -> Result<Place, TomopickError> {
        self.index
            .get(&id)
            .map(|&slot| self.places[slot])
            .ok_or(TomopickError::UnknownKey(id.raw()))
    }

    /// All instance transforms in table order.
    #[must_use]
    pub fn places(&self) -> &[Place] {
        &self.places
    }

    /// Set the transform of one instance.
    pub fn set_place(&mut self, id: ParticleId, place: Place) -> Result<(), TomopickError> {
        let slot = *self
            .index
            .get(&id)
            .ok_or(TomopickError::UnknownKey(id.raw()))?;
        self.places[slot] = place;
        Ok(())
    }

    /// Batch-update existing instances' transforms.
    ///
    /// All ids are validated before any write; a failed batch leaves the
    /// table unchanged.
    pub fn set_places(
        &mut self,
        ids: &[ParticleId],
        places: &[Place],
    ) -> Result<(), TomopickError> {
        if ids.len() != places.len() {
            return Err(TomopickError::ShapeMismatch {
                expected: ids.len(),
                got: places.len(),
            });
        }
        let mut slots = Vec::with_capacity(ids.len());
        for &id in ids {
            slots.push(
                *self
                    .index
                    .get(&id)
                    .ok_or(TomopickError::UnknownKey(id.raw()))?,
            );
        }
        for (slot, &place) in slots.into_iter().zip(places) {
            self.places[slot] = place;
        }
        Ok(())
    }

    /// Remove instances by id; absent ids are ignored (deletion requests
    /// legitimately race).
    pub fn delete_places(&mut self, ids: &[ParticleId]) {
        let mut doomed = vec![false; self.order.len()];
        let mut any = false;
        for id in ids {
            if let Some(&slot) = self.index.get(id) {
                doomed[slot] = true;
                any = true;
            }
        }
        if !any {
            return;
        }
        retain_by_mask(&mut self.order, &doomed);
        retain_by_mask(&mut self.places, &doomed);
        retain_by_mask(&mut self.selected, &doomed);
        retain_by_mask(&mut self.displayed, &doomed);
        retain_by_mask(&mut self.colors, &doomed);
        self.index = self
            .order
            .iter()
            .enumerate()
            .map(|(slot, &id)| (id, slot))
            .collect();
    }

    // -- Masks and colors --

    /// Per-instance selection mask, aligned with [`SurfaceCollection::ids`].
    #[must_use]
    pub fn selected_child_positions(&self) -> &[bool] {
        &self.selected
    }

    /// Set the selection mask. Publishes one
    /// [`CollectionEvent::InstancesSelected`] when the mask actually
    /// changes; element-wise identical input is a no-op.
    pub fn set_selected_child_positions(
        &mut self,
        mask: &[bool],
    ) -> Result<(), TomopickError> {
        self.check_len(mask.len())?;
        if self.selected == mask {
            return Ok(());
        }
        self.selected.clear();
        self.selected.extend_from_slice(mask);
        self.triggers
            .activate(&CollectionEvent::InstancesSelected(mask.to_vec()));
        Ok(())
    }

    /// Per-instance display mask.
    #[must_use]
    pub fn displayed_child_positions(&self) -> &[bool] {
        &self.displayed
    }

    /// Set the display mask; identical input is a no-op.
    pub fn set_displayed_child_positions(
        &mut self,
        mask: &[bool],
    ) -> Result<(), TomopickError> {
        self.check_len(mask.len())?;
        if self.displayed != mask {
            self.displayed.clear();
            self.displayed.extend_from_slice(mask);
        }
        Ok(())
    }

    /// Per-instance colors.
    #[must_use]
    pub fn colors(&self) -> &[Rgba] {
        &self.colors
    }

    /// Set per-instance colors.
    pub fn set_colors(&mut self, colors: &[Rgba]) -> Result<(), TomopickError> {
        self.check_len(colors.len())?;
        self.colors.clear();
        self.colors.extend_from_slice(colors);
        Ok(())
    }

    /// Set every instance to one color.
    pub fn set_color(&mut self, color: Rgba) {
        for c in &mut self.colors {
            *c = color;
        }
    }

    fn check_len(&self, got: usize) -> Result<(), TomopickError> {
        if got != self.order.len() {
            return Err(TomopickError::ShapeMismatch {
                expected: self.order.len(),
                got,
            });
        }
        Ok(())
    }

    // -- Direct manipulation --

    /// Apply `tf` (a world-space drag transform) to every instance under
    /// the mask, then publish one [`CollectionEvent::InstancesMoved`] with
    /// the affected ids.
    ///
    /// The collection is anchored at the scene origin, so the drag
    /// transform composes on the left of each instance transform.
    pub fn transform_instances(
        &mut self,
        tf: &Place,
        mask: &[bool],
    ) -> Result<(), TomopickError> {
        self.check_len(mask.len())?;
        let mut moved = Vec::new();
        for (slot, &hit) in mask.iter().enumerate() {
            if hit {
                self.places[slot] = *tf * self.places[slot];
                moved.push(self.order[slot]);
            }
        }
        if !moved.is_empty() {
            self.triggers
                .activate(&CollectionEvent::InstancesMoved(moved));
        }
        Ok(())
    }
}

impl Default for SurfaceCollection {
    fn default() -> Self {
        Self::new()
    }
}

fn retain_by_mask<T>(items: &mut Vec<T>, doomed: &[bool]) {
    let mut slot = 0;
    items.retain(|_| {
        let keep = !doomed[slot];
        slot += 1;
        keep
    });
}
