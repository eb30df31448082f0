//! STAR particle-table format (RELION-style).
//!
//! Reads the `loop_` block containing `rlnCoordinateZ`; coordinate,
//! origin and angle columns map onto the canonical fields, every other
//! numeric column is preserved as an extra field, and non-numeric
//! columns are reported and skipped. Stored origins are negated on read
//! and on write, per the format's shift convention. Angles follow the
//! inverted Z-Y-Z convention.
//!
//! The newer "centered coordinate" variant cannot be read without the
//! tomogram dimensions (an interactive input in the host application)
//! and is rejected as unsupported.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::warn;

use super::ListFormat;
use crate::data::{CanonicalField, FieldSchema, ParticleData, SchemaBuilder};
use crate::error::TomopickError;
use crate::euler::ZYZ_INVERTED;

/// The STAR particle-table format.
pub static STAR_FORMAT: ListFormat = ListFormat {
    name: "RELION STAR file",
    nicks: &["star", "relion"],
    marker_field: "rlnCoordinateX",
    schema: default_schema,
    read: read_file,
    write: write_file,
};

const COORD: [&str; 3] = ["rlnCoordinateX", "rlnCoordinateY", "rlnCoordinateZ"];
const ORIGIN: [&str; 3] = ["rlnOriginX", "rlnOriginY", "rlnOriginZ"];
const ORIGIN_ANGST: [&str; 3] = ["rlnOriginXAngst", "rlnOriginYAngst", "rlnOriginZAngst"];
const ANGLES: [&str; 3] = ["rlnAngleRot", "rlnAngleTilt", "rlnAnglePsi"];

fn default_schema() -> Result<FieldSchema, TomopickError> {
    build_schema(&ORIGIN)
}

fn build_schema(origin_names: &[&str; 3]) -> Result<FieldSchema, TomopickError> {
    let mut builder = SchemaBuilder::new(&ZYZ_INVERTED);
    for name in COORD.iter().chain(origin_names).chain(ANGLES.iter()) {
        builder = builder.field(name, &[]);
    }
    builder
        .canonical(CanonicalField::PosX, COORD[0])
        .canonical(CanonicalField::PosY, COORD[1])
        .canonical(CanonicalField::PosZ, COORD[2])
        .canonical(CanonicalField::ShiftX, origin_names[0])
        .canonical(CanonicalField::ShiftY, origin_names[1])
        .canonical(CanonicalField::ShiftZ, origin_names[2])
        .canonical(CanonicalField::Ang1, ANGLES[0])
        .canonical(CanonicalField::Ang2, ANGLES[1])
        .canonical(CanonicalField::Ang3, ANGLES[2])
        .build()
}

/// One parsed `loop_` block: column names and row tokens.
struct Loop {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn parse_loops(text: &str) -> Vec<Loop> {
    let mut loops = Vec::new();
    let mut current: Option<Loop> = None;
    let mut in_header = false;

    for line in text.lines() {
        let line = line.trim();
        if line == "loop_" {
            if let Some(done) = current.take() {
                loops.push(done);
            }
            current = Some(Loop {
                headers: Vec::new(),
                rows: Vec::new(),
            });
            in_header = true;
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("data_") {
            if let Some(done) = current.take() {
                loops.push(done);
            }
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        if let Some(header) = line.strip_prefix('_') {
            if in_header {
                let name = header.split_whitespace().next().unwrap_or(header);
                block.headers.push(name.to_owned());
            }
            continue;
        }
        in_header = false;
        let tokens: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if tokens.len() == block.headers.len() {
            block.rows.push(tokens);
        }
    }
    if let Some(done) = current.take() {
        loops.push(done);
    }
    loops
}

fn read_file(path: &Path) -> Result<ParticleData, TomopickError> {
    let text = fs::read_to_string(path)?;
    let loops = parse_loops(&text);

    if loops
        .iter()
        .any(|l| l.headers.iter().any(|h| h == "rlnCenteredCoordinateZAngst"))
    {
        return Err(TomopickError::Parse(format!(
            "{}: centered-coordinate STAR files need tomogram dimensions and are not supported",
            path.display()
        )));
    }

    let block = loops
        .into_iter()
        .find(|l| l.headers.iter().any(|h| h == COORD[2]))
        .ok_or_else(|| {
            TomopickError::Parse(format!(
                "{}: rlnCoordinateZ was not found in any loop section",
                path.display()
            ))
        })?;

    let column = |name: &str| block.headers.iter().position(|h| h == name);

    for required in COORD {
        if column(required).is_none() {
            return Err(TomopickError::Parse(format!(
                "{}: missing required column {required}",
                path.display()
            )));
        }
    }

    // Shifts may be absent, in pixels, or in Angstrom (which renames the
    // schema's shift columns).
    let (origin_names, origin_cols) = if ORIGIN.iter().all(|n| column(n).is_some()) {
        (&ORIGIN, Some(ORIGIN.map(|n| column(n).unwrap_or(0))))
    } else if ORIGIN_ANGST.iter().all(|n| column(n).is_some()) {
        (
            &ORIGIN_ANGST,
            Some(ORIGIN_ANGST.map(|n| column(n).unwrap_or(0))),
        )
    } else {
        (&ORIGIN, None)
    };

    let mut data = ParticleData::new(build_schema(origin_names)?, 1.0, 1.0)?;

    // Everything else that parses as a number is preserved as an extra
    // field; other columns are dropped (with a notice).
    let mapped: Vec<&str> = COORD
        .iter()
        .chain(origin_names.iter())
        .chain(ANGLES.iter())
        .copied()
        .collect();
    let mut extra_cols = Vec::new();
    for (idx, header) in block.headers.iter().enumerate() {
        if mapped.contains(&header.as_str()) {
            continue;
        }
        let numeric = block.rows.iter().all(|r| r[idx].parse::<f64>().is_ok());
        if numeric {
            let _ = data.register_field(header, &[])?;
            extra_cols.push((idx, header.clone()));
        } else {
            warn!("skipping non-numeric STAR column {header}");
        }
    }

    let parse = |token: &str| -> Result<f64, TomopickError> {
        token
            .parse::<f64>()
            .map_err(|_| TomopickError::Parse(format!("malformed number: {token}")))
    };

    for row in &block.rows {
        let particle = data.new_particle();
        for name in COORD {
            if let Some(idx) = block.headers.iter().position(|h| h == name) {
                particle.set(name, parse(&row[idx])?)?;
            }
        }
        if let Some(cols) = origin_cols {
            for (name, idx) in origin_names.iter().zip(cols) {
                // Shift convention: origins are stored negated.
                particle.set(name, -parse(&row[idx])?)?;
            }
        }
        for name in ANGLES {
            if let Some(idx) = block.headers.iter().position(|h| h == name) {
                particle.set(name, parse(&row[idx])?)?;
            }
        }
        for (idx, name) in &extra_cols {
            particle.set(name, parse(&row[*idx])?)?;
        }
    }

    data.store_original_particles();
    Ok(data)
}

fn write_file(data: &ParticleData, path: &Path) -> Result<(), TomopickError> {
    let schema = data.schema();
    let fields = schema.field_names();
    let shift_slots = [
        schema.canonical_slot(CanonicalField::ShiftX),
        schema.canonical_slot(CanonicalField::ShiftY),
        schema.canonical_slot(CanonicalField::ShiftZ),
    ];

    let mut out = String::from("\ndata_particles\n\nloop_\n");
    for (i, name) in fields.iter().enumerate() {
        let _ = writeln!(out, "_{name} #{}", i + 1);
    }
    for particle in data.iter() {
        let mut row = String::new();
        for (slot, value) in particle.values().iter().enumerate() {
            // Convert shifts back to the on-disk convention.
            let value = if shift_slots.contains(&slot) {
                -*value
            } else {
                *value
            };
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SAMPLE: &str = "
data_particles

loop_
_rlnCoordinateX #1
_rlnCoordinateY #2
_rlnCoordinateZ #3
_rlnOriginX #4
_rlnOriginY #5
_rlnOriginZ #6
_rlnAngleRot #7
_rlnAngleTilt #8
_rlnAnglePsi #9
_rlnClassNumber #10
_rlnMicrographName #11
100.0\t200.0\t300.0\t1.5\t0.0\t-2.0\t10.0\t20.0\t30.0\t2\ttomo_01.mrc
50.0\t60.0\t70.0\t0.0\t0.0\t0.0\t0.0\t90.0\t0.0\t1\ttomo_01.mrc
";

    fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("particles.star");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn reads_columns_with_shift_negation() {
        let dir = tempfile::tempdir().unwrap();
        let data = read_file(&write_sample(&dir)).unwrap();

        assert_eq!(data.size(), 2);
        let p = data.iter().next().unwrap();
        assert_eq!(p.get("pos_x").unwrap(), 100.0);
        // Origins negate on the way in.
        assert_eq!(p.get("shift_x").unwrap(), -1.5);
        assert_eq!(p.get("shift_z").unwrap(), 2.0);
        assert_eq!(p.get("ang_2").unwrap(), 20.0);
        // Numeric extras survive, non-numeric columns are dropped.
        assert_eq!(p.get("rlnClassNumber").unwrap(), 2.0);
        assert!(p.get("rlnMicrographName").is_err());
    }

    #[test]
    fn round_trip_preserves_on_disk_convention() {
        let dir = tempfile::tempdir().unwrap();
        let data = read_file(&write_sample(&dir)).unwrap();

        let out = dir.path().join("rewritten.star");
        write_file(&data, &out).unwrap();
        let back = read_file(&out).unwrap();

        assert_eq!(back.size(), 2);
        let (a, b) = (data.iter().next().unwrap(), back.iter().next().unwrap());
        assert_abs_diff_eq!(
            a.get("shift_x").unwrap(),
            b.get("shift_x").unwrap(),
            epsilon = 1e-12
        );
        assert_eq!(
            a.get("rlnClassNumber").unwrap(),
            b.get("rlnClassNumber").unwrap()
        );
        // Rotations agree through the convention.
        assert!(a.rotation().approx_eq(&b.rotation(), 1e-9));
    }

    #[test]
    fn missing_coordinate_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.star");
        std::fs::write(&path, "loop_\n_rlnAngleRot #1\n10.0\n").unwrap();
        assert!(matches!(read_file(&path), Err(TomopickError::Parse(_))));
    }

    #[test]
    fn centered_coordinates_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relion5.star");
        std::fs::write(
            &path,
            "loop_\n_rlnCenteredCoordinateZAngst #1\n10.0\n",
        )
        .unwrap();
        let err = read_file(&path).err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("not supported"), "got: {err}");
    }
}
