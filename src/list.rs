//! The particle-list façade: one authoritative data model, two derived
//! views, kept consistent.
//!
//! A [`ParticleList`] owns a [`ParticleData`] arena (authoritative), a
//! [`SurfaceCollection`] (instanced rendering state) and a [`MarkerSet`]
//! (pickable mirror). Host interaction arrives as queued change records
//! from the two views; programmatic edits flow outward to both. Every
//! public call returns with the three representations mutually
//! consistent — there is no eventual-consistency window.
//!
//! Feedback cycles are cut the same way in both directions: while the
//! list writes derived state into a view, that view's change channel is
//! suppressed with a scoped guard.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use glam::DVec3;
use log::info;
use rustc_hash::FxHashMap;

use crate::collection::{
    CollectionEvent, SurfaceCollection, TemplateGeometry, INSTANCES_MOVED, INSTANCES_SELECTED,
};
use crate::data::{Particle, ParticleData, ParticleId};
use crate::error::TomopickError;
use crate::markers::{MarkerChange, MarkerId, MarkerSet, MARKER_CHANGES};
use crate::palette::Rgba;
use crate::place::Place;
use crate::triggers::{Message, TriggerSet};

/// Channel notified after any structural or display change to the list.
pub const PARTLIST_CHANGED: &str = "partlist changed";

/// Events published by a [`ParticleList`] for UI consumers.
#[derive(Debug, Clone)]
pub enum ListEvent {
    /// The list's contents or display state changed.
    Changed,
}

impl Message for ListEvent {
    fn channel(&self) -> &'static str {
        match self {
            Self::Changed => PARTLIST_CHANGED,
        }
    }
}

/// Displays and edits a [`ParticleData`] through a marker set and an
/// instanced-surface collection.
pub struct ParticleList {
    name: String,
    data: ParticleData,
    collection: SurfaceCollection,
    markers: MarkerSet,
    /// Particle id → marker id; the two key sets stay equal outside the
    /// create/delete transaction window.
    map: FxHashMap<ParticleId, MarkerId>,
    collection_events: Rc<RefCell<VecDeque<CollectionEvent>>>,

    selected: Vec<bool>,
    displayed: Vec<bool>,
    colors: Vec<Rgba>,

    color: Rgba,
    radius: f64,
    axes_size: f64,

    /// Prevent position changes when reconciling dragged instances.
    pub translation_locked: bool,
    /// Prevent orientation changes when reconciling dragged instances.
    pub rotation_locked: bool,
    /// Prevent addition and deletion of particles.
    pub editing_locked: bool,

    triggers: TriggerSet<ListEvent>,
}

impl ParticleList {
    /// Display `data` as a new particle list with the given base color.
    #[must_use]
    pub fn new(name: &str, data: ParticleData, color: Rgba) -> Self {
        let radius = 4.0 * data.pixelsize_ori();
        let axes_size = 15.0 * data.pixelsize_ori();

        let mut collection = SurfaceCollection::new();
        collection.add_collection("axes");
        collection.set_surface("axes", TemplateGeometry::axes_tripod(axes_size as f32));
        collection.add_collection("surfaces");

        let collection_events = Rc::new(RefCell::new(VecDeque::new()));
        for channel in [INSTANCES_MOVED, INSTANCES_SELECTED] {
            let sink = Rc::clone(&collection_events);
            let _ = collection.triggers().add_handler(channel, move |event| {
                sink.borrow_mut().push_back(event.clone());
            });
        }

        let mut list = Self {
            name: name.to_owned(),
            data,
            collection,
            markers: MarkerSet::new(),
            map: FxHashMap::default(),
            collection_events,
            selected: Vec::new(),
            displayed: Vec::new(),
            colors: Vec::new(),
            color,
            radius,
            axes_size,
            translation_locked: false,
            rotation_locked: false,
            editing_locked: false,
            triggers: TriggerSet::new(),
        };
        list.init_particles(true, true);
        list
    }

    /// Convert an existing list to another format's data type.
    pub fn from_particle_list(
        other: &Self,
        schema: crate::data::FieldSchema,
    ) -> Result<Self, TomopickError> {
        let data = ParticleData::from_particle_data(&other.data, schema)?;
        Ok(Self::new(&other.name, data, other.color))
    }

    // -- Accessors --

    /// The list name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of particles in the list.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// The authoritative particle data.
    #[must_use]
    pub fn data(&self) -> &ParticleData {
        &self.data
    }

    /// Mutable access to the particle data for programmatic field edits.
    /// Follow up with [`ParticleList::update_places`] so the derived
    /// views pick up changed transforms.
    pub fn data_mut(&mut self) -> &mut ParticleData {
        &mut self.data
    }

    /// Particle ids in list order.
    #[must_use]
    pub fn particle_ids(&self) -> Vec<ParticleId> {
        self.data.particle_ids()
    }

    /// The instanced-surface view. Drive host-side picking and drags
    /// through this, then call [`ParticleList::sync`].
    #[must_use]
    pub fn collection(&self) -> &SurfaceCollection {
        &self.collection
    }

    /// Mutable access to the instanced-surface view for host
    /// interaction; follow up with [`ParticleList::sync`].
    pub fn collection_mut(&mut self) -> &mut SurfaceCollection {
        &mut self.collection
    }

    /// The marker view.
    #[must_use]
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Mutable access to the marker view for host interaction; follow up
    /// with [`ParticleList::sync`].
    pub fn markers_mut(&mut self) -> &mut MarkerSet {
        &mut self.markers
    }

    /// One particle by id.
    #[must_use]
    pub fn get_particle(&self, id: ParticleId) -> Option<&Particle> {
        self.data.get(id)
    }

    /// The marker mirroring a particle.
    #[must_use]
    pub fn get_marker(&self, id: ParticleId) -> Option<&crate::markers::Marker> {
        self.map.get(&id).and_then(|&mid| self.markers.get(mid))
    }

    /// Event subscription handle for UI consumers.
    #[must_use]
    pub fn triggers(&self) -> &TriggerSet<ListEvent> {
        &self.triggers
    }

    /// The base list color.
    #[must_use]
    pub fn color(&self) -> Rgba {
        self.color
    }

    /// Marker display radius.
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Set the marker display radius (must be ≥ 0.1).
    pub fn set_radius(&mut self, value: f64) -> Result<(), TomopickError> {
        if value < 0.1 {
            return Err(TomopickError::InvalidConfig(format!(
                "radius needs to be > 0.1, got {value}"
            )));
        }
        self.radius = value;
        self.markers.set_marker_radii(value);
        Ok(())
    }

    /// Edge length of the per-particle axes tripod.
    #[must_use]
    pub fn axes_size(&self) -> f64 {
        self.axes_size
    }

    /// Set the axes-tripod size (must be ≥ 0.1) and regenerate the
    /// template geometry.
    pub fn set_axes_size(&mut self, value: f64) -> Result<(), TomopickError> {
        if value < 0.1 {
            return Err(TomopickError::InvalidConfig(format!(
                "axes size needs to be > 0.1, got {value}"
            )));
        }
        self.axes_size = value;
        self.collection
            .set_surface("axes", TemplateGeometry::axes_tripod(value as f32));
        Ok(())
    }

    /// Pixel size scaling the stored particle positions.
    #[must_use]
    pub fn origin_pixelsize(&self) -> f64 {
        self.data.pixelsize_ori()
    }

    /// Set the origin pixel size; rescales radius, axes and every
    /// transform.
    pub fn set_origin_pixelsize(&mut self, value: f64) -> Result<(), TomopickError> {
        self.data.set_pixelsize_ori(value)?;
        let _ = self.set_radius(4.0 * value);
        let _ = self.set_axes_size(15.0 * value);
        self.update_places();
        Ok(())
    }

    /// Pixel size scaling the stored particle shifts.
    #[must_use]
    pub fn translation_pixelsize(&self) -> f64 {
        self.data.pixelsize_tra()
    }

    /// Set the shift pixel size and refresh every transform.
    pub fn set_translation_pixelsize(&mut self, value: f64) -> Result<(), TomopickError> {
        self.data.set_pixelsize_tra(value)?;
        self.update_places();
        Ok(())
    }

    // -- Bulk display state --

    /// Per-particle selection mask, aligned with list order.
    #[must_use]
    pub fn selected_particles(&self) -> &[bool] {
        &self.selected
    }

    /// Set the selection mask. `None` clears the selection. The mask must
    /// match the list length; an element-wise identical value is a no-op
    /// (no downstream propagation).
    pub fn set_selected_particles(
        &mut self,
        value: Option<&[bool]>,
    ) -> Result<(), TomopickError> {
        let value = normalize_mask(value, self.size(), false)?;
        if self.selected == value {
            return Ok(());
        }
        self.selected = value;
        self.write_selection_through();
        Ok(())
    }

    /// Select or deselect every particle.
    pub fn set_all_selected(&mut self, selected: bool) {
        let mask = vec![selected; self.size()];
        let _ = self.set_selected_particles(Some(&mask));
    }

    /// Per-particle display mask.
    #[must_use]
    pub fn displayed_particles(&self) -> &[bool] {
        &self.displayed
    }

    /// Set the display mask; same normalization rules as
    /// [`ParticleList::set_selected_particles`], with `None` hiding
    /// nothing (all false).
    pub fn set_displayed_particles(
        &mut self,
        value: Option<&[bool]>,
    ) -> Result<(), TomopickError> {
        let value = normalize_mask(value, self.size(), false)?;
        if self.displayed == value {
            return Ok(());
        }
        self.displayed = value;
        self.write_display_through();
        Ok(())
    }

    /// Show or hide every particle.
    pub fn set_all_displayed(&mut self, displayed: bool) {
        let mask = vec![displayed; self.size()];
        let _ = self.set_displayed_particles(Some(&mask));
    }

    /// Per-particle colors.
    #[must_use]
    pub fn particle_colors(&self) -> &[Rgba] {
        &self.colors
    }

    /// Set per-particle colors. `None` resets to the base list color.
    pub fn set_particle_colors(
        &mut self,
        value: Option<&[Rgba]>,
    ) -> Result<(), TomopickError> {
        let value = match value {
            Some(colors) => {
                if colors.len() != self.size() {
                    return Err(TomopickError::ShapeMismatch {
                        expected: self.size(),
                        got: colors.len(),
                    });
                }
                colors.to_vec()
            }
            None => vec![self.color; self.size()],
        };
        if self.colors == value {
            return Ok(());
        }
        self.colors = value;
        self.write_colors_through();
        Ok(())
    }

    /// Color every particle uniformly and make it the base color.
    pub fn set_color(&mut self, color: Rgba) {
        self.color = color;
        let uniform = vec![color; self.size()];
        let _ = self.set_particle_colors(Some(&uniform));
    }

    fn write_selection_through(&mut self) {
        let _scm = self.collection.triggers().block(INSTANCES_SELECTED);
        let _mrk = self.markers.triggers().block(MARKER_CHANGES);
        let _ = self.collection.set_selected_child_positions(&self.selected);
        self.markers.set_selected_markers(&self.selected);
    }

    fn write_display_through(&mut self) {
        let _mrk = self.markers.triggers().block(MARKER_CHANGES);
        let _ = self.collection.set_displayed_child_positions(&self.displayed);
        self.markers.set_displayed_markers(&self.displayed);
    }

    fn write_colors_through(&mut self) {
        let _mrk = self.markers.triggers().block(MARKER_CHANGES);
        let _ = self.collection.set_colors(&self.colors);
        self.markers.set_marker_colors(&self.colors);
    }

    // -- Structural edits --

    /// Create one particle from origin, shift and rotation. Returns
    /// `None` when editing is locked.
    pub fn new_particle(
        &mut self,
        origin: DVec3,
        translation: DVec3,
        rotation: &Place,
    ) -> Option<ParticleId> {
        if self.editing_locked {
            info!("list {}: editing locked, ignoring new particle", self.name);
            return None;
        }
        let id = self.create_particle_record(origin, translation, rotation);
        self.append_mask_entries(1, true);
        self.triggers.activate(&ListEvent::Changed);
        Some(id)
    }

    /// Create many particles with one bookkeeping pass. Returns the new
    /// ids, or `None` when editing is locked.
    pub fn new_particles(
        &mut self,
        entries: &[(DVec3, DVec3, Place)],
    ) -> Option<Vec<ParticleId>> {
        if self.editing_locked {
            info!("list {}: editing locked, ignoring new particles", self.name);
            return None;
        }
        let ids: Vec<ParticleId> = entries
            .iter()
            .map(|(o, t, r)| self.create_particle_record(*o, *t, r))
            .collect();
        self.append_mask_entries(ids.len(), true);
        self.triggers.activate(&ListEvent::Changed);
        Some(ids)
    }

    fn create_particle_record(
        &mut self,
        origin: DVec3,
        translation: DVec3,
        rotation: &Place,
    ) -> ParticleId {
        let (id, coord, place, fields) = {
            let particle = self.data.new_particle();
            particle.set_origin(origin);
            particle.set_translation(translation);
            particle.set_rotation(rotation);
            (
                particle.id(),
                particle.coord(),
                particle.full_transform(),
                particle.values().to_vec(),
            )
        };

        let color = self.colors.last().copied().unwrap_or(self.color);
        let marker_id = {
            let _mrk = self.markers.triggers().block(MARKER_CHANGES);
            let mid = self.markers.create_marker(coord, color, self.radius, false);
            self.markers.bind_particle(mid, id, fields);
            mid
        };
        let _ = self.map.insert(id, marker_id);
        let _ = self.collection.add_place(id, place);
        id
    }

    fn append_mask_entries(&mut self, count: usize, selected: bool) {
        let color = self.colors.last().copied().unwrap_or(self.color);
        for _ in 0..count {
            self.selected.push(selected);
            self.displayed.push(true);
            self.colors.push(color);
        }
        self.write_selection_through();
        self.write_display_through();
        self.write_colors_through();
    }

    /// Delete particles from all three representations.
    ///
    /// Surviving particles keep their selection/display/color values at
    /// their shifted positions. Absent ids are skipped (deletion requests
    /// race legitimately). A no-op when editing is locked.
    pub fn delete_data(&mut self, ids: &[ParticleId]) {
        if self.editing_locked {
            info!("list {}: editing locked, ignoring deletion", self.name);
            return;
        }
        if ids.is_empty() {
            return;
        }

        let prev_ids = self.data.particle_ids();
        let prev_index: FxHashMap<ParticleId, usize> = prev_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut removed = vec![false; prev_ids.len()];
        let mut data_doomed = Vec::new();
        let mut marker_doomed = Vec::new();
        let mut place_doomed = Vec::new();

        for &pid in ids {
            let Some(marker_id) = self.map.remove(&pid) else {
                continue;
            };
            if let Some(&pos) = prev_index.get(&pid) {
                removed[pos] = true;
            }
            if self.data.contains(pid) {
                data_doomed.push(pid);
            }
            if self.markers.get(marker_id).is_some() {
                marker_doomed.push(marker_id);
            }
            if self.collection.contains(pid) {
                place_doomed.push(pid);
            }
        }

        self.data.delete_particles(&data_doomed);
        self.collection.delete_places(&place_doomed);
        self.delete_markers_checked(&marker_doomed);

        self.selected = filter_by_removed(&self.selected, &removed);
        self.displayed = filter_by_removed(&self.displayed, &removed);
        self.colors = filter_by_removed(&self.colors, &removed);
        self.write_selection_through();
        self.write_display_through();
        self.write_colors_through();

        self.triggers.activate(&ListEvent::Changed);
    }

    /// Bulk-deleting the atoms backing the markers crashes the host when
    /// the batch empties the container; deleting everything goes through
    /// the bulk path for all but one marker and the single-object path
    /// for the last.
    fn delete_markers_checked(&mut self, doomed: &[MarkerId]) {
        let _mrk = self.markers.triggers().block(MARKER_CHANGES);
        if doomed.len() == self.markers.len() && !doomed.is_empty() {
            if doomed.len() == 1 {
                self.markers.delete_marker(doomed[0]);
            } else {
                let (rest, last) = doomed.split_at(doomed.len() - 1);
                self.markers.delete_markers(rest);
                self.markers.delete_marker(last[0]);
            }
        } else {
            self.markers.delete_markers(doomed);
        }
    }

    // -- Reset --

    /// Restore particles from the original-load snapshot and refresh
    /// their marker and instance state. Ids without a snapshot entry are
    /// left untouched.
    pub fn reset_particles(&mut self, ids: &[ParticleId]) {
        self.data.reset_particles(ids);

        let mut pids = Vec::new();
        let mut places = Vec::new();
        for &pid in ids {
            let Some(particle) = self.data.get(pid) else {
                continue;
            };
            let place = particle.full_transform();
            let coord = particle.coord();
            let fields = particle.values().to_vec();
            if let Some(&mid) = self.map.get(&pid) {
                let color = self
                    .markers
                    .get(mid)
                    .map_or(self.color, |m| m.color);
                let _mrk = self.markers.triggers().block(MARKER_CHANGES);
                self.markers.set_marker_state(mid, coord, color, self.radius);
                self.markers.bind_particle(mid, pid, fields);
            }
            if self.collection.contains(pid) {
                pids.push(pid);
                places.push(place);
            }
        }
        let _ = self.collection.set_places(&pids, &places);
        self.triggers.activate(&ListEvent::Changed);
    }

    /// Restore the full original-load snapshot, dropping particles
    /// created after load and rebuilding both derived views.
    pub fn reset_all_particles(&mut self) {
        {
            let _mrk = self.markers.triggers().block(MARKER_CHANGES);
            self.markers.delete();
        }
        self.markers = MarkerSet::new();
        let ids = self.data.particle_ids();
        self.collection.delete_places(&ids);
        self.map.clear();
        self.data.reset_all_particles();

        self.selected.clear();
        self.displayed.clear();
        self.colors.clear();
        self.init_particles(true, true);
        self.triggers.activate(&ListEvent::Changed);
    }

    /// Push every particle's current transform out to both views, e.g.
    /// after a pixel-size change.
    pub fn update_places(&mut self) {
        let mut pids = Vec::new();
        let mut places = Vec::new();
        let mut marker_updates = Vec::new();
        for particle in self.data.iter() {
            let pid = particle.id();
            pids.push(pid);
            places.push(particle.full_transform());
            if let Some(&mid) = self.map.get(&pid) {
                marker_updates.push((mid, pid, particle.coord(), particle.values().to_vec()));
            }
        }
        let _ = self.collection.set_places(&pids, &places);

        let _mrk = self.markers.triggers().block(MARKER_CHANGES);
        for (mid, pid, coord, fields) in marker_updates {
            let color = self.markers.get(mid).map_or(self.color, |m| m.color);
            self.markers.set_marker_state(mid, coord, color, self.radius);
            self.markers.bind_particle(mid, pid, fields);
        }
    }

    // -- Synchronization --

    /// Drain queued change records from both views and bring all three
    /// representations back into mutual consistency. Call after driving
    /// [`ParticleList::markers_mut`] or [`ParticleList::collection_mut`]
    /// directly.
    pub fn sync(&mut self) {
        loop {
            let marker_changes = self.markers.drain_changes();
            let collection_events: Vec<CollectionEvent> =
                self.collection_events.borrow_mut().drain(..).collect();
            if marker_changes.is_empty() && collection_events.is_empty() {
                return;
            }
            for change in marker_changes {
                self.process_marker_change(&change);
            }
            for event in collection_events {
                self.process_collection_event(&event);
            }
        }
    }

    fn process_marker_change(&mut self, change: &MarkerChange) {
        match change {
            MarkerChange::Created(id) => self.marker_created(*id),
            MarkerChange::Deleted(ids) => self.marker_deleted(ids),
            MarkerChange::Moved(ids) => self.marker_moved(ids),
            MarkerChange::ColorChanged(_) => {
                let colors = self.markers.marker_colors();
                let _ = self.set_particle_colors(Some(&colors));
            }
            MarkerChange::SelectionChanged(_) => {
                let mask = self.markers.selected_markers();
                let _ = self.set_selected_particles(Some(&mask));
            }
            MarkerChange::DisplayChanged(_) => {
                let mask = self.markers.displayed_markers();
                let _ = self.set_displayed_particles(Some(&mask));
            }
            MarkerChange::SetDeleted => self.markerset_deleted(),
        }
    }

    /// A marker was placed interactively: allocate a particle at the
    /// marker position and register it everywhere.
    fn marker_created(&mut self, marker_id: MarkerId) {
        let Some(marker) = self.markers.get(marker_id) else {
            return;
        };
        let coord = marker.coord;

        let (pid, place, fields) = {
            let particle = self.data.new_particle();
            particle.set_origin(coord);
            (
                particle.id(),
                particle.full_transform(),
                particle.values().to_vec(),
            )
        };
        let _ = self.collection.add_place(pid, place);

        let color = self.colors.last().copied().unwrap_or(self.color);
        {
            let _mrk = self.markers.triggers().block(MARKER_CHANGES);
            self.markers.set_marker_state(marker_id, coord, color, self.radius);
            self.markers.bind_particle(marker_id, pid, fields);
        }
        let _ = self.map.insert(pid, marker_id);

        self.append_mask_entries(1, true);
        self.triggers.activate(&ListEvent::Changed);
    }

    /// Markers were deleted by the host: delete the backing particles.
    /// With editing locked the markers are recreated instead, keeping
    /// marker count and particle count equal.
    fn marker_deleted(&mut self, marker_ids: &[MarkerId]) {
        if self.editing_locked {
            info!(
                "list {}: editing locked, restoring {} deleted markers",
                self.name,
                marker_ids.len()
            );
            self.rebuild_markers_from_data();
            return;
        }
        let pids: Vec<ParticleId> = self
            .map
            .iter()
            .filter(|(_, &mid)| marker_ids.contains(&mid))
            .map(|(&pid, _)| pid)
            .collect();
        self.delete_data(&pids);
    }

    /// Direct manipulation moved markers: the marker position becomes the
    /// particle's absolute origin and any stale refinement shift is
    /// cleared.
    fn marker_moved(&mut self, marker_ids: &[MarkerId]) {
        let mut pids = Vec::new();
        let mut places = Vec::new();

        for &mid in marker_ids {
            let Some(marker) = self.markers.get(mid) else {
                continue;
            };
            let Some(pid) = marker.particle_id else {
                continue;
            };
            let new_coord = marker.coord;

            if self.translation_locked {
                // Snap the marker back; the drag is discarded.
                if let Some(particle) = self.data.get(pid) {
                    let coord = particle.coord();
                    let color = marker.color;
                    let _mrk = self.markers.triggers().block(MARKER_CHANGES);
                    self.markers.set_marker_state(mid, coord, color, self.radius);
                }
                continue;
            }

            let (place, fields) = {
                let Some(particle) = self.data.get_mut(pid) else {
                    continue;
                };
                if !particle.translation().is_identity() {
                    particle.set_translation(DVec3::ZERO);
                }
                particle.set_origin(new_coord);
                (particle.full_transform(), particle.values().to_vec())
            };

            {
                let _mrk = self.markers.triggers().block(MARKER_CHANGES);
                self.markers.bind_particle(mid, pid, fields);
            }
            pids.push(pid);
            places.push(place);
        }
        let _ = self.collection.set_places(&pids, &places);
    }

    /// The host destroyed the whole marker container: recreate it and
    /// repopulate from the particles that still exist.
    fn markerset_deleted(&mut self) {
        if !self.markers.is_deleted() {
            return;
        }
        self.markers = MarkerSet::new();
        self.map.clear();
        self.init_particles(true, false);
        self.restore_marker_display_state();
    }

    fn rebuild_markers_from_data(&mut self) {
        self.markers = MarkerSet::new();
        self.map.clear();
        self.init_particles(true, false);
        self.restore_marker_display_state();
    }

    fn restore_marker_display_state(&mut self) {
        let _mrk = self.markers.triggers().block(MARKER_CHANGES);
        self.markers.set_selected_markers(&self.selected);
        self.markers.set_displayed_markers(&self.displayed);
        self.markers.set_marker_colors(&self.colors);
    }

    fn process_collection_event(&mut self, event: &CollectionEvent) {
        match event {
            CollectionEvent::InstancesMoved(ids) => self.instances_moved(ids),
            CollectionEvent::InstancesSelected(mask) => {
                let _ = self.set_selected_particles(Some(mask));
            }
        }
    }

    /// Dragged instances are reconciled back into particle state,
    /// honoring the two lock flags: a locked component reverts visually
    /// to the particle's unchanged value.
    fn instances_moved(&mut self, ids: &[ParticleId]) {
        let _mrk = self.markers.triggers().block(MARKER_CHANGES);

        for &pid in ids {
            let Ok(dragged) = self.collection.place(pid) else {
                continue;
            };

            let (coord, reconciled, fields) = {
                let Some(particle) = self.data.get_mut(pid) else {
                    continue;
                };
                let new_coord = if self.translation_locked {
                    particle.coord()
                } else {
                    dragged.translation()
                };
                let new_rot = if self.rotation_locked {
                    particle.rotation()
                } else {
                    dragged.zero_translation()
                };
                let reconciled = Place::from_translation(new_coord) * new_rot;

                if !particle.translation().is_identity() {
                    particle.set_translation(DVec3::ZERO);
                }
                particle.set_origin(new_coord);
                particle.set_rotation(&new_rot);
                (particle.coord(), reconciled, particle.values().to_vec())
            };

            if let Some(&mid) = self.map.get(&pid) {
                let color = self.markers.get(mid).map_or(self.color, |m| m.color);
                self.markers.set_marker_state(mid, coord, color, self.radius);
                self.markers.bind_particle(mid, pid, fields);
            }

            // Snap the instance back whenever a lock altered the drag.
            if (self.translation_locked || self.rotation_locked)
                && !reconciled.approx_eq(&dragged, 1e-9)
            {
                let _ = self.collection.set_place(pid, reconciled);
            }
        }
    }

    // -- Initial population --

    fn init_particles(&mut self, markers: bool, collection: bool) {
        let mut pids = Vec::new();
        let mut places = Vec::new();
        let mut marker_seed = Vec::new();

        for particle in self.data.iter() {
            let place = particle.full_transform();
            if collection {
                pids.push(particle.id());
                places.push(place);
            }
            if markers {
                marker_seed.push((
                    particle.id(),
                    particle.coord(),
                    particle.values().to_vec(),
                ));
            }
        }

        if collection {
            let _ = self.collection.add_places(&pids, &places);
        }
        if markers {
            let _mrk = self.markers.triggers().block(MARKER_CHANGES);
            for (pid, coord, fields) in marker_seed {
                let mid = self
                    .markers
                    .create_marker(coord, self.color, self.radius, false);
                self.markers.bind_particle(mid, pid, fields);
                let _ = self.map.insert(pid, mid);
            }
        }

        if markers && collection {
            self.selected = vec![false; self.size()];
            self.displayed = vec![true; self.size()];
            self.colors = vec![self.color; self.size()];
            self.write_selection_through();
            self.write_display_through();
            self.write_colors_through();
        }
    }

    // -- Invariants --

    /// Check the cross-representation invariants: equal sizes, matching
    /// identity sets, mask lengths equal to the particle count.
    #[must_use]
    pub fn check_consistency(&self) -> bool {
        let n = self.data.size();
        if self.collection.len() != n || self.markers.len() != n || self.map.len() != n {
            return false;
        }
        if self.selected.len() != n || self.displayed.len() != n || self.colors.len() != n {
            return false;
        }
        self.data.particle_ids().iter().all(|id| {
            self.collection.contains(*id)
                && self
                    .map
                    .get(id)
                    .is_some_and(|mid| self.markers.get(*mid).is_some())
        })
    }
}

fn normalize_mask(
    value: Option<&[bool]>,
    len: usize,
    default: bool,
) -> Result<Vec<bool>, TomopickError> {
    match value {
        Some(mask) => {
            if mask.len() != len {
                return Err(TomopickError::ShapeMismatch {
                    expected: len,
                    got: mask.len(),
                });
            }
            Ok(mask.to_vec())
        }
        None => Ok(vec![default; len]),
    }
}

fn filter_by_removed<T: Copy>(items: &[T], removed: &[bool]) -> Vec<T> {
    items
        .iter()
        .zip(removed)
        .filter(|(_, &gone)| !gone)
        .map(|(&item, _)| item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CanonicalField, SchemaBuilder};
    use crate::euler::ZXZ;
    use approx::assert_abs_diff_eq;

    const RED: Rgba = [255, 0, 0, 255];

    fn generic_data(n: usize) -> ParticleData {
        let mut b = SchemaBuilder::new(&ZXZ);
        for field in CanonicalField::ALL {
            b = b.field(field.name(), &[]).canonical(field, field.name());
        }
        let mut data = ParticleData::new(b.build().unwrap(), 1.0, 1.0).unwrap();
        for i in 0..n {
            let p = data.new_particle();
            p.set("pos_x", i as f64 * 10.0).unwrap();
        }
        data.store_original_particles();
        data
    }

    fn list_of(n: usize) -> ParticleList {
        ParticleList::new("test", generic_data(n), RED)
    }

    #[test]
    fn masks_match_size_for_all_list_lengths() {
        for n in [0usize, 1, 7] {
            let list = list_of(n);
            assert_eq!(list.selected_particles().len(), n);
            assert_eq!(list.displayed_particles().len(), n);
            assert_eq!(list.particle_colors().len(), n);
            assert!(list.check_consistency());
        }
    }

    #[test]
    fn masks_match_size_after_add_and_delete() {
        let mut list = list_of(2);
        let id = list
            .new_particle(DVec3::new(1.0, 2.0, 3.0), DVec3::ZERO, &Place::IDENTITY)
            .unwrap();
        assert_eq!(list.selected_particles().len(), 3);
        assert!(list.check_consistency());

        list.delete_data(&[id]);
        assert_eq!(list.selected_particles().len(), 2);
        assert_eq!(list.particle_colors().len(), 2);
        assert!(list.check_consistency());
    }

    #[test]
    fn deletion_shifts_surviving_mask_entries() {
        let mut list = list_of(10);
        let colors: Vec<Rgba> = (0..10u8).map(|i| [i, i, i, 255]).collect();
        list.set_particle_colors(Some(&colors)).unwrap();

        let ids = list.particle_ids();
        list.delete_data(&[ids[4]]);

        let expected: Vec<Rgba> = (0..10u8)
            .filter(|&i| i != 4)
            .map(|i| [i, i, i, 255])
            .collect();
        assert_eq!(list.particle_colors(), expected.as_slice());

        // All three representations agree on the surviving identities.
        assert_eq!(list.size(), 9);
        assert!(list.check_consistency());
        assert!(!list.collection().contains(ids[4]));
        assert!(list.get_marker(ids[4]).is_none());
    }

    #[test]
    fn deleting_the_only_particle_is_clean() {
        let mut list = list_of(1);
        let ids = list.particle_ids();
        list.delete_data(&ids);
        assert_eq!(list.size(), 0);
        assert_eq!(list.markers().len(), 0);
        assert_eq!(list.selected_particles().len(), 0);
        assert!(list.check_consistency());
    }

    #[test]
    fn deleting_all_but_one_is_clean() {
        let mut list = list_of(5);
        let ids = list.particle_ids();
        list.delete_data(&ids[1..]);
        assert_eq!(list.size(), 1);
        assert_eq!(list.particle_ids(), vec![ids[0]]);
        assert!(list.check_consistency());

        // And down to zero afterwards.
        list.delete_data(&[ids[0]]);
        assert_eq!(list.size(), 0);
        assert!(list.check_consistency());
    }

    #[test]
    fn delete_is_idempotent_across_event_sources() {
        let mut list = list_of(3);
        let ids = list.particle_ids();
        list.delete_data(&[ids[1]]);
        let after_first: Vec<ParticleId> = list.particle_ids();
        // Same request again, as a racing event source would issue it.
        list.delete_data(&[ids[1]]);
        assert_eq!(list.particle_ids(), after_first);
        assert!(list.check_consistency());
    }

    #[test]
    fn editing_lock_silently_ignores_edits() {
        let mut list = list_of(2);
        list.editing_locked = true;
        assert!(list
            .new_particle(DVec3::ZERO, DVec3::ZERO, &Place::IDENTITY)
            .is_none());
        let ids = list.particle_ids();
        list.delete_data(&ids);
        assert_eq!(list.size(), 2);
        assert!(list.check_consistency());
    }

    #[test]
    fn marker_placement_creates_a_particle() {
        let mut list = list_of(1);
        let coord = DVec3::new(5.0, 6.0, 7.0);
        let _mid = list
            .markers_mut()
            .create_marker(coord, RED, 4.0, true);
        list.sync();

        assert_eq!(list.size(), 2);
        assert!(list.check_consistency());
        let pid = list.particle_ids()[1];
        let particle = list.get_particle(pid).unwrap();
        assert_abs_diff_eq!(particle.origin_coord().x, 5.0, epsilon = 1e-12);
        // Newly placed particles come up selected.
        assert!(list.selected_particles()[1]);
    }

    #[test]
    fn marker_deletion_deletes_the_particle() {
        let mut list = list_of(3);
        let ids = list.particle_ids();
        let mid = list.get_marker(ids[1]).unwrap().id();
        list.markers_mut().delete_markers(&[mid]);
        list.sync();

        assert_eq!(list.size(), 2);
        assert!(!list.particle_ids().contains(&ids[1]));
        assert!(list.check_consistency());
    }

    #[test]
    fn marker_move_sets_absolute_origin_and_clears_shift() {
        let mut list = list_of(1);
        let pid = list.particle_ids()[0];
        {
            let data = &mut list.data;
            let p = data.get_mut(pid).unwrap();
            p.set("shift_x", 2.0).unwrap();
        }
        let mid = list.get_marker(pid).unwrap().id();
        list.markers_mut().set_coord(mid, DVec3::new(50.0, 0.0, 0.0));
        list.sync();

        let particle = list.get_particle(pid).unwrap();
        assert_eq!(particle.get("shift_x").unwrap(), 0.0);
        assert_abs_diff_eq!(particle.origin_coord().x, 50.0, epsilon = 1e-12);
        // Instance transform follows.
        let place = list.collection().place(pid).unwrap();
        assert_abs_diff_eq!(place.translation().x, 50.0, epsilon = 1e-12);
    }

    #[test]
    fn translation_lock_snaps_dragged_instances_back() {
        let mut list = list_of(1);
        list.translation_locked = true;
        let pid = list.particle_ids()[0];
        let before = list.collection().place(pid).unwrap();

        let drag = Place::from_translation(DVec3::new(9.0, 0.0, 0.0));
        list.collection_mut()
            .transform_instances(&drag, &[true])
            .unwrap();
        list.sync();

        let after = list.collection().place(pid).unwrap();
        assert!(after.approx_eq(&before, 1e-9));
        assert_abs_diff_eq!(
            list.get_particle(pid).unwrap().coord().x,
            before.translation().x,
            epsilon = 1e-12
        );
    }

    #[test]
    fn rotation_only_drag_survives_translation_lock() {
        let mut list = list_of(1);
        list.translation_locked = true;
        let pid = list.particle_ids()[0];
        // Particle at the origin: a rotation about the origin is a pure
        // orientation change for it.
        let drag = Place::from_axis_angle(DVec3::Z, 90.0);
        list.collection_mut()
            .transform_instances(&drag, &[true])
            .unwrap();
        list.sync();

        let particle = list.get_particle(pid).unwrap();
        assert!(particle
            .rotation()
            .approx_eq(&drag.zero_translation(), 1e-9));
        let place = list.collection().place(pid).unwrap();
        assert!(place.rotation().abs_diff_eq(drag.rotation(), 1e-9));
    }

    #[test]
    fn rotation_lock_keeps_orientation() {
        let mut list = list_of(1);
        list.rotation_locked = true;
        let pid = list.particle_ids()[0];

        let drag = Place::from_translation(DVec3::new(3.0, 0.0, 0.0))
            * Place::from_axis_angle(DVec3::Z, 45.0);
        list.collection_mut()
            .transform_instances(&drag, &[true])
            .unwrap();
        list.sync();

        let particle = list.get_particle(pid).unwrap();
        // Translation applied, rotation reverted.
        assert_abs_diff_eq!(particle.coord().x, 3.0, epsilon = 1e-9);
        assert!(particle.rotation().is_identity());
        let place = list.collection().place(pid).unwrap();
        assert!(place.rotation().abs_diff_eq(glam::DMat3::IDENTITY, 1e-9));
    }

    #[test]
    fn selection_changes_propagate_both_ways() {
        let mut list = list_of(3);
        // Inbound: pick on the instance table.
        list.collection_mut()
            .set_selected_child_positions(&[false, true, false])
            .unwrap();
        list.sync();
        assert_eq!(list.selected_particles(), &[false, true, false]);
        assert_eq!(list.markers().selected_markers(), vec![false, true, false]);

        // Outbound: programmatic selection reaches both views.
        list.set_all_selected(true);
        assert_eq!(
            list.collection().selected_child_positions(),
            &[true, true, true]
        );
        assert_eq!(list.markers().selected_markers(), vec![true, true, true]);
    }

    #[test]
    fn pixelsize_change_updates_every_view() {
        let mut list = list_of(2);
        let pid = list.particle_ids()[1];
        let before = list.collection().place(pid).unwrap().translation().x;

        list.set_origin_pixelsize(2.0).unwrap();

        let after = list.collection().place(pid).unwrap().translation().x;
        assert_abs_diff_eq!(after, before * 2.0, epsilon = 1e-12);
        let marker = list.get_marker(pid).unwrap();
        assert_abs_diff_eq!(marker.coord.x, after, epsilon = 1e-12);
        assert_eq!(list.radius(), 8.0);
    }

    #[test]
    fn reset_restores_file_state_and_views() {
        let mut list = list_of(2);
        let pid = list.particle_ids()[0];
        {
            let p = list.data.get_mut(pid).unwrap();
            p.set("pos_x", 77.0).unwrap();
        }
        list.update_places();
        list.reset_particles(&[pid]);

        assert_eq!(list.get_particle(pid).unwrap().get("pos_x").unwrap(), 0.0);
        let place = list.collection().place(pid).unwrap();
        assert_abs_diff_eq!(place.translation().x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn reset_all_drops_particles_added_after_load() {
        let mut list = list_of(2);
        let _ = list.new_particle(DVec3::ONE, DVec3::ZERO, &Place::IDENTITY);
        assert_eq!(list.size(), 3);

        list.reset_all_particles();
        assert_eq!(list.size(), 2);
        assert!(list.check_consistency());
    }

    #[test]
    fn markerset_destruction_recovers() {
        let mut list = list_of(3);
        list.set_all_selected(true);
        list.markers_mut().delete();
        list.sync();

        assert_eq!(list.markers().len(), 3);
        assert!(!list.markers().is_deleted());
        assert!(list.check_consistency());
        // Display state survived the rebuild.
        assert_eq!(list.markers().selected_markers(), vec![true, true, true]);
    }
}
