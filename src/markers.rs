//! Pickable marker mirror of a particle list.
//!
//! Markers are the host's lightweight point objects: one per particle,
//! used for picking and simple direct manipulation. They mirror the
//! authoritative state held by [`crate::data::ParticleData`] and
//! [`crate::collection::SurfaceCollection`]; the owning
//! [`crate::list::ParticleList`] keeps the three in sync.
//!
//! Every mutation records a [`MarkerChange`] on the `"changes"` channel —
//! both into the pending queue drained by the owner and to external
//! trigger subscribers. The owner suppresses the channel (see
//! [`crate::triggers::TriggerSet::block`]) while it writes derived marker
//! state itself, cutting the feedback cycle.

use std::collections::VecDeque;

use glam::DVec3;
use rustc_hash::FxHashMap;

use crate::data::ParticleId;
use crate::palette::Rgba;
use crate::triggers::{Message, TriggerSet};

/// Umbrella channel carrying every marker change record.
pub const MARKER_CHANGES: &str = "changes";

/// Stable identity of a marker within its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(u64);

impl MarkerId {
    /// The raw id value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// One pickable marker.
#[derive(Debug, Clone)]
pub struct Marker {
    id: MarkerId,
    /// World-space position.
    pub coord: DVec3,
    /// Display color.
    pub color: Rgba,
    /// Display radius.
    pub radius: f64,
    /// Whether the marker is selected.
    pub selected: bool,
    /// Whether the marker is shown.
    pub displayed: bool,
    /// The backing particle, once the owner has bound one.
    pub particle_id: Option<ParticleId>,
    /// Slot-aligned copy of the particle's fields, for attribute display.
    pub fields: Vec<f64>,
}

impl Marker {
    /// This marker's id.
    #[must_use]
    pub fn id(&self) -> MarkerId {
        self.id
    }
}

/// A change record queued by marker mutations.
#[derive(Debug, Clone)]
pub enum MarkerChange {
    /// A marker was placed interactively.
    Created(MarkerId),
    /// Markers were deleted (batched: deletions of several markers in one
    /// user action must arrive as one record).
    Deleted(Vec<MarkerId>),
    /// Marker positions changed.
    Moved(Vec<MarkerId>),
    /// Marker colors changed.
    ColorChanged(Vec<MarkerId>),
    /// Marker selection flags changed.
    SelectionChanged(Vec<MarkerId>),
    /// Marker display flags changed.
    DisplayChanged(Vec<MarkerId>),
    /// The whole marker container was destroyed.
    SetDeleted,
}

impl Message for MarkerChange {
    fn channel(&self) -> &'static str {
        MARKER_CHANGES
    }
}

/// The marker container: creation order, batched mutation, change
/// records.
pub struct MarkerSet {
    markers: Vec<Marker>,
    index: FxHashMap<MarkerId, usize>,
    pending: VecDeque<MarkerChange>,
    triggers: TriggerSet<MarkerChange>,
    deleted: bool,
    next_id: u64,
}

impl MarkerSet {
    /// An empty marker set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            markers: Vec::new(),
            index: FxHashMap::default(),
            pending: VecDeque::new(),
            triggers: TriggerSet::new(),
            deleted: false,
            next_id: 0,
        }
    }

    /// Subscription handle for change records.
    #[must_use]
    pub fn triggers(&self) -> &TriggerSet<MarkerChange> {
        &self.triggers
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Whether the set holds no markers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Whether the container itself has been destroyed.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Markers in creation order.
    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Marker ids in creation order.
    #[must_use]
    pub fn ids(&self) -> Vec<MarkerId> {
        self.markers.iter().map(Marker::id).collect()
    }

    /// Read access to one marker.
    #[must_use]
    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.index.get(&id).map(|&i| &self.markers[i])
    }

    fn record(&mut self, change: MarkerChange) {
        if self.triggers.is_blocked(MARKER_CHANGES) {
            return;
        }
        self.pending.push_back(change.clone());
        self.triggers.activate(&change);
    }

    /// Drain the queued change records for the owner to process.
    pub fn drain_changes(&mut self) -> Vec<MarkerChange> {
        self.pending.drain(..).collect()
    }

    // -- Mutation --

    /// Place a marker. `record_change` is false when the owner creates
    /// the marker itself (mirroring a particle that already exists).
    pub fn create_marker(
        &mut self,
        coord: DVec3,
        color: Rgba,
        radius: f64,
        record_change: bool,
    ) -> MarkerId {
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        let slot = self.markers.len();
        self.markers.push(Marker {
            id,
            coord,
            color,
            radius,
            selected: false,
            displayed: true,
            particle_id: None,
            fields: Vec::new(),
        });
        let _ = self.index.insert(id, slot);
        if record_change {
            self.record(MarkerChange::Created(id));
        }
        id
    }

    /// Delete one marker through the single-object path.
    pub fn delete_marker(&mut self, id: MarkerId) {
        if self.index.remove(&id).is_some() {
            self.remove_rows(&[id]);
            self.record(MarkerChange::Deleted(vec![id]));
        }
    }

    /// Delete markers through the bulk path; absent ids are ignored and
    /// all deletions arrive as one change record.
    ///
    /// Callers deleting *every* remaining marker must follow the
    /// batch-then-single sequence (bulk-delete all but one, then the last
    /// through [`MarkerSet::delete_marker`]) — the host's atom bulk-delete
    /// API has a destructive special path when it empties the container.
    pub fn delete_markers(&mut self, ids: &[MarkerId]) {
        let present: Vec<MarkerId> = ids
            .iter()
            .copied()
            .filter(|id| self.index.remove(id).is_some())
            .collect();
        if present.is_empty() {
            return;
        }
        self.remove_rows(&present);
        self.record(MarkerChange::Deleted(present));
    }

    fn remove_rows(&mut self, ids: &[MarkerId]) {
        self.markers.retain(|m| !ids.contains(&m.id));
        self.index = self
            .markers
            .iter()
            .enumerate()
            .map(|(slot, m)| (m.id, slot))
            .collect();
    }

    /// Destroy the whole container, as the host does when the user closes
    /// the marker model directly.
    pub fn delete(&mut self) {
        self.markers.clear();
        self.index.clear();
        self.deleted = true;
        self.record(MarkerChange::SetDeleted);
    }

    /// Move one marker.
    pub fn set_coord(&mut self, id: MarkerId, coord: DVec3) {
        if let Some(&slot) = self.index.get(&id) {
            self.markers[slot].coord = coord;
            self.record(MarkerChange::Moved(vec![id]));
        }
    }

    /// Bind a marker to its backing particle and mirror the particle's
    /// field values for attribute display.
    pub fn bind_particle(&mut self, id: MarkerId, particle: ParticleId, fields: Vec<f64>) {
        if let Some(&slot) = self.index.get(&id) {
            self.markers[slot].particle_id = Some(particle);
            self.markers[slot].fields = fields;
        }
    }

    /// Overwrite one marker's position/color/radius without recording a
    /// change; used by the owner under a blocked channel when writing
    /// derived state.
    pub fn set_marker_state(
        &mut self,
        id: MarkerId,
        coord: DVec3,
        color: Rgba,
        radius: f64,
    ) {
        if let Some(&slot) = self.index.get(&id) {
            let marker = &mut self.markers[slot];
            marker.coord = coord;
            marker.color = color;
            marker.radius = radius;
        }
    }

    // -- Whole-set state in creation order --

    /// Selection flags in creation order.
    #[must_use]
    pub fn selected_markers(&self) -> Vec<bool> {
        self.markers.iter().map(|m| m.selected).collect()
    }

    /// Set all selection flags. Records one change for the markers that
    /// actually flipped.
    pub fn set_selected_markers(&mut self, mask: &[bool]) {
        let changed = self.apply_mask(mask, |m, v| {
            let flip = m.selected != v;
            m.selected = v;
            flip
        });
        if !changed.is_empty() {
            self.record(MarkerChange::SelectionChanged(changed));
        }
    }

    /// Select or deselect one marker (pick action).
    pub fn select_marker(&mut self, id: MarkerId, selected: bool) {
        if let Some(&slot) = self.index.get(&id) {
            if self.markers[slot].selected != selected {
                self.markers[slot].selected = selected;
                self.record(MarkerChange::SelectionChanged(vec![id]));
            }
        }
    }

    /// Display flags in creation order.
    #[must_use]
    pub fn displayed_markers(&self) -> Vec<bool> {
        self.markers.iter().map(|m| m.displayed).collect()
    }

    /// Set all display flags.
    pub fn set_displayed_markers(&mut self, mask: &[bool]) {
        let changed = self.apply_mask(mask, |m, v| {
            let flip = m.displayed != v;
            m.displayed = v;
            flip
        });
        if !changed.is_empty() {
            self.record(MarkerChange::DisplayChanged(changed));
        }
    }

    /// Colors in creation order.
    #[must_use]
    pub fn marker_colors(&self) -> Vec<Rgba> {
        self.markers.iter().map(|m| m.color).collect()
    }

    /// Set all marker colors.
    pub fn set_marker_colors(&mut self, colors: &[Rgba]) {
        let mut changed = Vec::new();
        for (marker, &color) in self.markers.iter_mut().zip(colors) {
            if marker.color != color {
                marker.color = color;
                changed.push(marker.id);
            }
        }
        if !changed.is_empty() {
            self.record(MarkerChange::ColorChanged(changed));
        }
    }

    /// Set every marker's radius.
    pub fn set_marker_radii(&mut self, radius: f64) {
        for marker in &mut self.markers {
            marker.radius = radius;
        }
    }

    fn apply_mask(
        &mut self,
        mask: &[bool],
        mut apply: impl FnMut(&mut Marker, bool) -> bool,
    ) -> Vec<MarkerId> {
        let mut changed = Vec::new();
        for (marker, &value) in self.markers.iter_mut().zip(mask) {
            if apply(marker, value) {
                changed.push(marker.id);
            }
        }
        changed
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_queue_change_records() {
        let mut set = MarkerSet::new();
        let a = set.create_marker(DVec3::ZERO, [255, 0, 0, 255], 4.0, true);
        set.set_coord(a, DVec3::ONE);
        let changes = set.drain_changes();
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], MarkerChange::Created(id) if id == a));
        assert!(matches!(&changes[1], MarkerChange::Moved(ids) if ids == &vec![a]));
    }

    #[test]
    fn blocked_channel_swallows_records() {
        let mut set = MarkerSet::new();
        let a = set.create_marker(DVec3::ZERO, [255, 0, 0, 255], 4.0, false);
        {
            let triggers = set.triggers().clone();
            let _guard = triggers.block(MARKER_CHANGES);
            set.set_coord(a, DVec3::ONE);
        }
        assert!(set.drain_changes().is_empty());
        // State still applied even though the record was suppressed.
        assert_eq!(set.get(a).unwrap().coord, DVec3::ONE);
    }

    #[test]
    fn bulk_delete_is_one_record() {
        let mut set = MarkerSet::new();
        let ids: Vec<MarkerId> = (0..4)
            .map(|_| set.create_marker(DVec3::ZERO, [0; 4], 1.0, false))
            .collect();
        set.delete_markers(&[ids[0], ids[2], MarkerId(99)]);
        let changes = set.drain_changes();
        assert_eq!(changes.len(), 1);
        assert!(
            matches!(&changes[0], MarkerChange::Deleted(d) if d == &vec![ids[0], ids[2]])
        );
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn selection_mask_records_only_flips() {
        let mut set = MarkerSet::new();
        let a = set.create_marker(DVec3::ZERO, [0; 4], 1.0, false);
        let _b = set.create_marker(DVec3::ZERO, [0; 4], 1.0, false);
        set.set_selected_markers(&[true, false]);
        let changes = set.drain_changes();
        assert_eq!(changes.len(), 1);
        assert!(
            matches!(&changes[0], MarkerChange::SelectionChanged(ids) if ids == &vec![a])
        );
        // Same mask again: nothing flips, nothing recorded.
        set.set_selected_markers(&[true, false]);
        assert!(set.drain_changes().is_empty());
    }

    #[test]
    fn destroying_the_set_records_set_deleted() {
        let mut set = MarkerSet::new();
        let _ = set.create_marker(DVec3::ZERO, [0; 4], 1.0, false);
        set.delete();
        assert!(set.is_deleted());
        assert!(set.is_empty());
        let changes = set.drain_changes();
        assert!(matches!(changes.last(), Some(MarkerChange::SetDeleted)));
    }
}
