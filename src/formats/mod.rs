//! Particle-list file formats.
//!
//! Each format supplies a field schema (column names, aliases, canonical
//! mapping), an Euler-angle convention and synchronous read/write entry
//! points. The core's contract with every format is exactly the nine
//! canonical fields plus arbitrary extra numeric fields; converting a
//! list between formats copies the canonical fields and re-derives the
//! angles through the rotation matrix (conventions differ between
//! formats and raw angles are never copied across).

pub mod motl;
pub mod star;
pub mod tsv;

use std::path::Path;

use crate::data::{FieldSchema, ParticleData};
use crate::error::TomopickError;
use crate::list::ParticleList;
use crate::palette::Rgba;

/// A particle-list format definition.
pub struct ListFormat {
    /// Human-readable format name.
    pub name: &'static str,
    /// Short nicknames accepted by [`by_nick`].
    pub nicks: &'static [&'static str],
    /// A main field name unique to this format's schemas, used to decide
    /// whether a data set can be written without conversion.
    marker_field: &'static str,
    schema: fn() -> Result<FieldSchema, TomopickError>,
    read: fn(&Path) -> Result<ParticleData, TomopickError>,
    write: fn(&ParticleData, &Path) -> Result<(), TomopickError>,
}

impl ListFormat {
    /// The format's base schema.
    pub fn schema(&self) -> Result<FieldSchema, TomopickError> {
        (self.schema)()
    }

    /// Read a particle file into a fresh arena (with its original-load
    /// snapshot stored).
    pub fn read_file(&self, path: &Path) -> Result<ParticleData, TomopickError> {
        (self.read)(path)
    }

    /// Write an arena to a file in this format. The arena must already be
    /// in this format's layout (see [`ListFormat::matches`]).
    pub fn write_file(
        &self,
        data: &ParticleData,
        path: &Path,
    ) -> Result<(), TomopickError> {
        (self.write)(data, path)
    }

    /// Whether `data` is laid out in this format (and can be written
    /// without conversion).
    #[must_use]
    pub fn matches(&self, data: &ParticleData) -> bool {
        data.schema()
            .field_names()
            .iter()
            .any(|n| n == self.marker_field)
    }
}

/// All registered formats.
#[must_use]
pub fn formats() -> &'static [&'static ListFormat] {
    static FORMATS: &[&ListFormat] =
        &[&motl::MOTL_FORMAT, &star::STAR_FORMAT, &tsv::TSV_FORMAT];
    FORMATS
}

/// Look up a format by nickname (`"motl"`, `"star"`, `"tsv"`, …).
#[must_use]
pub fn by_nick(nick: &str) -> Option<&'static ListFormat> {
    formats()
        .iter()
        .copied()
        .find(|f| f.nicks.contains(&nick) || f.name == nick)
}

/// Read a particle file and wrap it in a display list named after the
/// file.
pub fn open_particle_list(
    path: &Path,
    format: &ListFormat,
    color: Rgba,
) -> Result<ParticleList, TomopickError> {
    let data = format.read_file(path)?;
    let name = path
        .file_name()
        .map_or_else(|| "particles".to_owned(), |n| n.to_string_lossy().into_owned());
    Ok(ParticleList::new(&name, data, color))
}

/// Write a list in the given format, converting the data first when its
/// layout differs from the target format.
pub fn save_particle_list(
    list: &ParticleList,
    path: &Path,
    format: &ListFormat,
) -> Result<(), TomopickError> {
    if format.matches(list.data()) {
        format.write_file(list.data(), path)
    } else {
        let converted = ParticleData::from_particle_data(list.data(), format.schema()?)?;
        format.write_file(&converted, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nick_lookup_finds_every_format() {
        assert!(by_nick("motl").is_some());
        assert!(by_nick("star").is_some());
        assert!(by_nick("tsv").is_some());
        assert!(by_nick("nope").is_none());
    }

    #[test]
    fn base_schemas_are_complete() {
        for format in formats() {
            let schema = format.schema().unwrap();
            assert!(schema.slot("pos_x").is_some(), "{}", format.name);
            assert!(schema.slot("ang_3").is_some(), "{}", format.name);
        }
    }

    #[test]
    fn matches_distinguishes_layouts() {
        let tsv_data = tsv::TSV_FORMAT.schema().unwrap();
        let data = ParticleData::new(tsv_data, 1.0, 1.0).unwrap();
        assert!(tsv::TSV_FORMAT.matches(&data));
        assert!(!star::STAR_FORMAT.matches(&data));
        assert!(!motl::MOTL_FORMAT.matches(&data));
    }
}
