//! EM motive-list format: a binary EM container holding one 20-row
//! record per particle.
//!
//! Layout: a 512-byte header — machine byte (6 = little endian), two
//! reserved bytes, data-type byte (5 = f32), three i32 dimensions
//! (x = 20 fields, y = particle count, z = 1), 496 bytes of padding —
//! followed by the records, 20 consecutive f32 values per particle.
//! Stored positions are 1-based and converted on the way in and out.

use std::fs;
use std::path::Path;

use super::ListFormat;
use crate::data::{CanonicalField, FieldSchema, ParticleData, SchemaBuilder};
use crate::error::TomopickError;
use crate::euler::ZXZ;

/// The EM motive-list format.
pub static MOTL_FORMAT: ListFormat = ListFormat {
    name: "Artiatomi Motivelist",
    nicks: &["motl", "em"],
    marker_field: "position_x",
    schema,
    read: read_file,
    write: write_file,
};

/// The 20 record rows, in file order.
const ROWS: [&str; 20] = [
    "cross_correlation",
    "legacy_x",
    "legacy_y",
    "legacy_num",
    "tomo_number",
    "part_number",
    "wedge_number",
    "position_x",
    "position_y",
    "position_z",
    "shift_x",
    "shift_y",
    "shift_z",
    "legacy_shift_x",
    "legacy_shift_y",
    "legacy_shift_z",
    "phi",
    "psi",
    "the",
    "class_number",
];

const HEADER_LEN: usize = 512;
const FLOAT32: u8 = 5;

fn schema() -> Result<FieldSchema, TomopickError> {
    let mut builder = SchemaBuilder::new(&ZXZ);
    for (i, row) in ROWS.iter().enumerate() {
        let row_alias = format!("row_{}", i + 1);
        let mut aliases: Vec<&str> = vec![&row_alias];
        // Historical short names for the correlation row.
        if *row == "cross_correlation" {
            aliases.insert(0, "xcorr");
        }
        builder = builder.field(row, &aliases);
    }
    builder
        .canonical(CanonicalField::PosX, "position_x")
        .canonical(CanonicalField::PosY, "position_y")
        .canonical(CanonicalField::PosZ, "position_z")
        .canonical(CanonicalField::ShiftX, "shift_x")
        .canonical(CanonicalField::ShiftY, "shift_y")
        .canonical(CanonicalField::ShiftZ, "shift_z")
        .canonical(CanonicalField::Ang1, "phi")
        .canonical(CanonicalField::Ang2, "the")
        .canonical(CanonicalField::Ang3, "psi")
        .build()
}

fn read_file(path: &Path) -> Result<ParticleData, TomopickError> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_LEN {
        return Err(TomopickError::Parse(format!(
            "{}: truncated EM header",
            path.display()
        )));
    }

    let little_endian = match bytes[0] {
        6 => true,
        0 | 3 | 5 => false,
        other => {
            return Err(TomopickError::Parse(format!(
                "{}: unknown EM machine byte {other}",
                path.display()
            )))
        }
    };
    if bytes[3] != FLOAT32 {
        return Err(TomopickError::Parse(format!(
            "{}: EM data type {} is not float32; not a motive list",
            path.display(),
            bytes[3]
        )));
    }

    let dim = |offset: usize| -> i32 {
        let raw = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        if little_endian {
            i32::from_le_bytes(raw)
        } else {
            i32::from_be_bytes(raw)
        }
    };
    let xdim = dim(4);
    let ydim = dim(8);
    let zdim = dim(12);

    if xdim != 20 || zdim > 1 {
        return Err(TomopickError::Parse(format!(
            "{}: {xdim}x{ydim}x{zdim} volume is likely not a motive list",
            path.display()
        )));
    }
    let count = usize::try_from(ydim.max(0)).unwrap_or(0);

    let payload = &bytes[HEADER_LEN..];
    if payload.len() < count * 20 * 4 {
        return Err(TomopickError::Parse(format!(
            "{}: EM payload shorter than {count} records",
            path.display()
        )));
    }

    let mut values = Vec::with_capacity(count * 20);
    for chunk in payload.chunks_exact(4).take(count * 20) {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        values.push(if little_endian {
            f32::from_le_bytes(raw)
        } else {
            f32::from_be_bytes(raw)
        });
    }

    let mut data = ParticleData::new(schema()?, 1.0, 1.0)?;
    for record in values.chunks_exact(20) {
        let particle = data.new_particle();
        for (row, &value) in ROWS.iter().zip(record) {
            let mut value = f64::from(value);
            // Motive lists store 1-based positions.
            if matches!(*row, "position_x" | "position_y" | "position_z") {
                value -= 1.0;
            }
            particle.set(row, value)?;
        }
    }
    data.store_original_particles();
    Ok(data)
}

fn write_file(data: &ParticleData, path: &Path) -> Result<(), TomopickError> {
    let count = data.size();
    let mut bytes = Vec::with_capacity(HEADER_LEN + count * 20 * 4);

    bytes.extend_from_slice(&[6, 0, 0, FLOAT32]);
    let count_i32 = i32::try_from(count).map_err(|_| {
        TomopickError::InvalidConfig(format!("{count} particles exceed the EM record limit"))
    })?;
    bytes.extend_from_slice(&20i32.to_le_bytes());
    bytes.extend_from_slice(&count_i32.to_le_bytes());
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.resize(HEADER_LEN, 0);

    let mut records: Vec<f32> = Vec::with_capacity(count * 20);
    for particle in data.iter() {
        for row in &ROWS {
            let mut value = particle.get(row)?;
            if matches!(*row, "position_x" | "position_y" | "position_z") {
                value += 1.0;
            }
            records.push(value as f32);
        }
    }
    bytes.extend_from_slice(bytemuck::cast_slice(&records));

    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn round_trip_preserves_records() {
        let mut data = ParticleData::new(schema().unwrap(), 1.0, 1.0).unwrap();
        for i in 0..3 {
            let p = data.new_particle();
            p.set("pos_x", 10.0 + f64::from(i)).unwrap();
            p.set("phi", 30.0).unwrap();
            p.set("the", 45.0).unwrap();
            p.set("cross_correlation", 0.5).unwrap();
            p.set("tomo_number", 7.0).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.em");
        write_file(&data, &path).unwrap();
        let back = read_file(&path).unwrap();

        assert_eq!(back.size(), 3);
        let p = back.iter().next().unwrap();
        assert_abs_diff_eq!(p.get("pos_x").unwrap(), 10.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p.get("phi").unwrap(), 30.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p.get("xcorr").unwrap(), 0.5, epsilon = 1e-7);
        assert_abs_diff_eq!(p.get("row_5").unwrap(), 7.0, epsilon = 1e-7);
    }

    #[test]
    fn one_based_positions_are_shifted() {
        let mut data = ParticleData::new(schema().unwrap(), 1.0, 1.0).unwrap();
        let _ = data.new_particle();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.em");
        write_file(&data, &path).unwrap();

        // A zero-position particle is stored as 1.0 on disk.
        let bytes = std::fs::read(&path).unwrap();
        let offset = 512 + 7 * 4; // row 8, first record
        let stored = f32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        assert_eq!(stored, 1.0);

        let back = read_file(&path).unwrap();
        assert_eq!(back.iter().next().unwrap().get("pos_x").unwrap(), 0.0);
    }

    #[test]
    fn rejects_non_motivelist_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.em");
        let mut bytes = vec![6u8, 0, 0, FLOAT32];
        bytes.extend_from_slice(&32i32.to_le_bytes());
        bytes.extend_from_slice(&32i32.to_le_bytes());
        bytes.extend_from_slice(&32i32.to_le_bytes());
        bytes.resize(512, 0);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read_file(&path),
            Err(TomopickError::Parse(_))
        ));
    }
}
