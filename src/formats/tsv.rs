//! Generic tab-separated particle table.
//!
//! A header line names the columns; the nine canonical columns
//! (`pos_x … shift_z`, `phi`, `the`, `psi`) are required, everything
//! else is preserved as an extra numeric field. Angles follow the Z-X-Z
//! convention.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::ListFormat;
use crate::data::{CanonicalField, FieldSchema, ParticleData, SchemaBuilder};
use crate::error::TomopickError;
use crate::euler::ZXZ;

/// The generic tab-separated format.
pub static TSV_FORMAT: ListFormat = ListFormat {
    name: "Generic Particle List",
    nicks: &["tsv", "generic"],
    marker_field: "pos_x",
    schema,
    read: read_file,
    write: write_file,
};

/// Required columns, in schema slot order.
const COLUMNS: [(&str, CanonicalField); 9] = [
    ("pos_x", CanonicalField::PosX),
    ("pos_y", CanonicalField::PosY),
    ("pos_z", CanonicalField::PosZ),
    ("shift_x", CanonicalField::ShiftX),
    ("shift_y", CanonicalField::ShiftY),
    ("shift_z", CanonicalField::ShiftZ),
    ("phi", CanonicalField::Ang1),
    ("the", CanonicalField::Ang2),
    ("psi", CanonicalField::Ang3),
];

fn schema() -> Result<FieldSchema, TomopickError> {
    let mut builder = SchemaBuilder::new(&ZXZ);
    for (name, _) in COLUMNS {
        builder = builder.field(name, &[]);
    }
    for (name, canon) in COLUMNS {
        builder = builder.canonical(canon, name);
    }
    builder.build()
}

fn read_file(path: &Path) -> Result<ParticleData, TomopickError> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| TomopickError::Parse(format!("{}: empty file", path.display())))?
        .split('\t')
        .map(str::trim)
        .collect();

    let missing: Vec<&str> = COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| !header.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(TomopickError::Parse(format!(
            "{}: required columns are missing from the particle list file: {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut data = ParticleData::new(schema()?, 1.0, 1.0)?;
    for column in &header {
        if !COLUMNS.iter().any(|(name, _)| name == column) {
            let _ = data.register_field(column, &[])?;
        }
    }

    for line in lines {
        let tokens: Vec<&str> = line.split('\t').map(str::trim).collect();
        if tokens.len() != header.len() {
            return Err(TomopickError::Parse(format!(
                "{}: row has {} columns, header has {}",
                path.display(),
                tokens.len(),
                header.len()
            )));
        }
        let particle = data.new_particle();
        for (column, token) in header.iter().zip(&tokens) {
            let value = token.parse::<f64>().map_err(|_| {
                TomopickError::Parse(format!(
                    "{}: malformed number {token} in column {column}",
                    path.display()
                ))
            })?;
            particle.set(column, value)?;
        }
    }

    data.store_original_particles();
    Ok(data)
}

fn write_file(data: &ParticleData, path: &Path) -> Result<(), TomopickError> {
    let fields = data.schema().field_names();
    let mut out = fields.join("\t");
    out.push('\n');

    for particle in data.iter() {
        let mut row = String::new();
        for value in particle.values() {
            if !row.is_empty() {
                row.push('\t');
            }
            let _ = write!(row, "{value}");
        }
        out.push_str(&row);
        out.push('\n');
    }

    fs::write(path, out)?;
    Ok(())
}
