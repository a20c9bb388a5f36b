use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use sp_formula::FormulaSet;
use tracing::info;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::{
    PlotSpecManager, SessionError, SessionMetadata, WorkspaceConfig, read_json_if_exists,
    validate_build_number, validate_engine_number, write_atomic, write_json,
};

pub const ARCHIVE_FORMULAS: &str = "op_cache.txt";
pub const ARCHIVE_METADATA: &str = "session.json";
pub const ARCHIVE_PLOT_SPECS: &str = "plot_specs.json";

/// Bundles formulas, metadata and plot specs into a zip at `dest`. Local
/// comments stay on this machine.
pub fn export_archive(config: &WorkspaceConfig, dest: &Path) -> Result<(), SessionError> {
    let metadata = SessionMetadata::load(&config.metadata_path())?;
    let formulas = read_or_empty(&config.formula_path())?;
    let plots: PlotSpecManager = read_json_if_exists(&config.plot_specs_path())?.unwrap_or_default();

    let metadata_json = serde_json::to_vec_pretty(&metadata)
        .map_err(|err| SessionError::json(&config.metadata_path(), err))?;
    let plots_json = serde_json::to_vec_pretty(&plots)
        .map_err(|err| SessionError::json(&config.plot_specs_path(), err))?;

    let file = File::create(dest).map_err(|err| SessionError::io(dest, err))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in [
        (ARCHIVE_FORMULAS, formulas.as_slice()),
        (ARCHIVE_METADATA, metadata_json.as_slice()),
        (ARCHIVE_PLOT_SPECS, plots_json.as_slice()),
    ] {
        writer.start_file(name, options)?;
        writer
            .write_all(bytes)
            .map_err(|err| SessionError::io(dest, err))?;
    }
    writer.finish()?;

    info!(
        archive = %dest.display(),
        engine = metadata.engine_number(),
        build = metadata.build_number(),
        plots = plots.len(),
        "session archive exported"
    );
    Ok(())
}

/// Replaces formulas, metadata and plot specs with the contents of `src`.
///
/// Every entry is validated before anything is written, so a bad archive
/// leaves the workspace untouched. The local comment store is never
/// overwritten, even if the archive carries one.
pub fn import_archive(config: &WorkspaceConfig, src: &Path) -> Result<(), SessionError> {
    let file = File::open(src).map_err(|err| SessionError::io(src, err))?;
    let mut archive = ZipArchive::new(file)?;

    let formulas = read_entry(&mut archive, ARCHIVE_FORMULAS, src)?
        .ok_or(SessionError::ArchiveMissingEntry(ARCHIVE_FORMULAS))?;
    let formula_text =
        String::from_utf8(formulas).map_err(|err| SessionError::io(src, invalid_data(err)))?;
    let formula_set = FormulaSet::parse(&formula_text)?;

    let metadata_bytes = read_entry(&mut archive, ARCHIVE_METADATA, src)?
        .ok_or(SessionError::ArchiveMissingEntry(ARCHIVE_METADATA))?;
    let metadata: SessionMetadata =
        serde_json::from_slice(&metadata_bytes).map_err(|err| SessionError::json(src, err))?;
    validate_engine_number(metadata.engine_number())?;
    validate_build_number(metadata.build_number())?;

    let plots = match read_entry(&mut archive, ARCHIVE_PLOT_SPECS, src)? {
        Some(bytes) => serde_json::from_slice::<PlotSpecManager>(&bytes)
            .map_err(|err| SessionError::json(src, err))?,
        None => PlotSpecManager::default(),
    };

    write_atomic(&config.formula_path(), formula_text.as_bytes())?;
    metadata.save(&config.metadata_path())?;
    write_json(&config.plot_specs_path(), &plots)?;

    info!(
        archive = %src.display(),
        engine = metadata.engine_number(),
        build = metadata.build_number(),
        formulas = formula_set.len(),
        plots = plots.len(),
        "session archive imported"
    );
    Ok(())
}

fn read_entry(
    archive: &mut ZipArchive<File>,
    name: &str,
    src: &Path,
) -> Result<Option<Vec<u8>>, SessionError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| SessionError::io(src, err))?;
    Ok(Some(bytes))
}

fn read_or_empty(path: &Path) -> Result<Vec<u8>, SessionError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(SessionError::io(path, err)),
    }
}

fn invalid_data(err: std::string::FromUtf8Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}
