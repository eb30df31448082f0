//! Field schemas: canonical fields, format columns and their aliases.

use rustc_hash::FxHashMap;

use crate::error::TomopickError;
use crate::euler::EulerRotation;

/// The nine logical fields every particle format must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    /// Tomogram-space x position (scaled by the origin pixel size).
    PosX,
    /// Tomogram-space y position.
    PosY,
    /// Tomogram-space z position.
    PosZ,
    /// Refinement x shift, applied after rotation.
    ShiftX,
    /// Refinement y shift.
    ShiftY,
    /// Refinement z shift.
    ShiftZ,
    /// First Euler angle (degrees).
    Ang1,
    /// Second Euler angle (degrees).
    Ang2,
    /// Third Euler angle (degrees).
    Ang3,
}

impl CanonicalField {
    /// All canonical fields in storage order.
    pub const ALL: [Self; 9] = [
        Self::PosX,
        Self::PosY,
        Self::PosZ,
        Self::ShiftX,
        Self::ShiftY,
        Self::ShiftZ,
        Self::Ang1,
        Self::Ang2,
        Self::Ang3,
    ];

    /// The canonical interface name (always registered as an alias).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PosX => "pos_x",
            Self::PosY => "pos_y",
            Self::PosZ => "pos_z",
            Self::ShiftX => "shift_x",
            Self::ShiftY => "shift_y",
            Self::ShiftZ => "shift_z",
            Self::Ang1 => "ang_1",
            Self::Ang2 => "ang_2",
            Self::Ang3 => "ang_3",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::PosX => 0,
            Self::PosY => 1,
            Self::PosZ => 2,
            Self::ShiftX => 3,
            Self::ShiftY => 4,
            Self::ShiftZ => 5,
            Self::Ang1 => 6,
            Self::Ang2 => 7,
            Self::Ang3 => 8,
        }
    }
}

/// A format's field layout: main field names in slot order, aliases
/// resolving onto the same slots, and the canonical-field mapping.
///
/// Writes through any alias are visible through all others because every
/// name resolves to a shared storage slot, never to its own copy.
#[derive(Clone)]
pub struct FieldSchema {
    fields: Vec<String>,
    aliases: Vec<(String, usize)>,
    lookup: FxHashMap<String, usize>,
    canonical: [usize; 9],
    euler: &'static dyn EulerRotation,
}

impl std::fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSchema")
            .field("fields", &self.fields)
            .field("aliases", &self.aliases)
            .field("canonical", &self.canonical)
            .finish_non_exhaustive()
    }
}

impl FieldSchema {
    /// Number of storage slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields (never true for a built schema).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Main field names in slot order.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    /// Registered aliases as `(alias, slot)` pairs.
    #[must_use]
    pub fn aliases(&self) -> &[(String, usize)] {
        &self.aliases
    }

    /// Resolve a field name or alias to its storage slot.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Storage slot of a canonical field.
    #[must_use]
    pub fn canonical_slot(&self, field: CanonicalField) -> usize {
        self.canonical[field.index()]
    }

    /// Main field name mapped to a canonical field.
    #[must_use]
    pub fn canonical_field_name(&self, field: CanonicalField) -> &str {
        &self.fields[self.canonical_slot(field)]
    }

    /// The Euler-angle convention of this schema's format.
    #[must_use]
    pub fn euler(&self) -> &'static dyn EulerRotation {
        self.euler
    }

    /// Whether `slot` holds one of the three position fields.
    pub(crate) fn is_position_slot(&self, slot: usize) -> bool {
        self.canonical[0..3].contains(&slot)
    }

    /// Whether `slot` holds one of the three shift fields.
    pub(crate) fn is_shift_slot(&self, slot: usize) -> bool {
        self.canonical[3..6].contains(&slot)
    }

    /// Whether `slot` holds one of the three angle fields.
    pub(crate) fn is_angle_slot(&self, slot: usize) -> bool {
        self.canonical[6..9].contains(&slot)
    }

    /// Append a new zero-default field (used when a file carries extra
    /// columns). Fails with [`TomopickError::InvalidConfig`] if the name
    /// is already taken.
    pub(crate) fn push_field(
        &mut self,
        name: &str,
        aliases: &[&str],
    ) -> Result<usize, TomopickError> {
        if self.lookup.contains_key(name) {
            return Err(TomopickError::InvalidConfig(format!(
                "field {name} already defined"
            )));
        }
        let slot = self.fields.len();
        self.fields.push(name.to_owned());
        let _ = self.lookup.insert(name.to_owned(), slot);
        for alias in aliases {
            self.aliases.push(((*alias).to_owned(), slot));
            let _ = self.lookup.insert((*alias).to_owned(), slot);
        }
        Ok(slot)
    }
}

/// Builder for [`FieldSchema`]; validation of the canonical mapping
/// happens once at build time, not per particle.
pub struct SchemaBuilder {
    fields: Vec<String>,
    aliases: Vec<(String, usize)>,
    lookup: FxHashMap<String, usize>,
    canonical: [Option<usize>; 9],
    euler: &'static dyn EulerRotation,
}

impl SchemaBuilder {
    /// Start a schema for a format using the given angle convention.
    #[must_use]
    pub fn new(euler: &'static dyn EulerRotation) -> Self {
        Self {
            fields: Vec::new(),
            aliases: Vec::new(),
            lookup: FxHashMap::default(),
            canonical: [None; 9],
            euler,
        }
    }

    /// Add a field with optional aliases. Later duplicate names win the
    /// lookup slot, matching the last-registered-alias behavior of the
    /// formats this models.
    #[must_use]
    pub fn field(mut self, name: &str, aliases: &[&str]) -> Self {
        let slot = self.fields.len();
        self.fields.push(name.to_owned());
        let _ = self.lookup.insert(name.to_owned(), slot);
        for alias in aliases {
            self.aliases.push(((*alias).to_owned(), slot));
            let _ = self.lookup.insert((*alias).to_owned(), slot);
        }
        self
    }

    /// Map a canonical field onto an existing field name, registering the
    /// canonical interface name (`pos_x`, `ang_1`, …) as an alias.
    #[must_use]
    pub fn canonical(mut self, field: CanonicalField, name: &str) -> Self {
        if let Some(&slot) = self.lookup.get(name) {
            self.canonical[field.index()] = Some(slot);
            let canon = field.name();
            if !self.lookup.contains_key(canon) {
                self.aliases.push((canon.to_owned(), slot));
                let _ = self.lookup.insert(canon.to_owned(), slot);
            }
        }
        self
    }

    /// Finish the schema. Fails with [`TomopickError::InvalidConfig`] when
    /// any canonical field is unmapped — an incomplete format definition.
    pub fn build(self) -> Result<FieldSchema, TomopickError> {
        let mut canonical = [0usize; 9];
        let mut missing = Vec::new();
        for field in CanonicalField::ALL {
            match self.canonical[field.index()] {
                Some(slot) => canonical[field.index()] = slot,
                None => missing.push(field.name()),
            }
        }
        if !missing.is_empty() {
            return Err(TomopickError::InvalidConfig(format!(
                "incomplete particle list format definition; missing: {}",
                missing.join(", ")
            )));
        }
        Ok(FieldSchema {
            fields: self.fields,
            aliases: self.aliases,
            lookup: self.lookup,
            canonical,
            euler: self.euler,
        })
    }
}
